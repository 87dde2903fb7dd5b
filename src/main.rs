use std::path::PathBuf;

use anyhow::Context;
use log::warn;
use structopt::StructOpt;

use simkit::auth::{self, Algorithm, AuthVars, TuakConfig};
use simkit::config::{self, CardConfig};
use simkit::credentials::{self, Credential};
use simkit::errors::CardError;
use simkit::esim::{self, build::ProfileOverrides, Profile};
use simkit::exchange::{ApduCommand, PcscReader};
use simkit::files::{self, ef, plmn::Plmn, service_table::ServiceTable};
use simkit::gp::{self, aram::AramRule, CapFile};
use simkit::keydb::KeyDb;
use simkit::nav::{AppKind, Session};
use simkit::scp::{ProbeCandidate, SecureChannel, SecurityLevel, StaticKeys};
use simkit::selftest;
use simkit::util::{parse_hex, parse_hex_exact};

#[derive(Debug, StructOpt)]
#[structopt(name = "simkit", about = "Read, personalize and authenticate (U)SIM/ISIM cards")]
struct Options {
    #[structopt(short, long, default_value = "0", help = "Reader index, see list-readers")]
    reader: usize,
    #[structopt(long, help = "Card driver name, overriding the ATR heuristic")]
    driver: Option<String>,
    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    #[structopt(about = "List connected readers")]
    ListReaders,
    #[structopt(about = "Dump one card")]
    Read {
        #[structopt(long, help = "Include MSISDN and emergency numbers")]
        phonebook: bool,
        #[structopt(long, help = "Include SMS parameters")]
        sms: bool,
        #[structopt(long, help = "Include per-file access conditions")]
        access: bool,
        #[structopt(long, help = "PIN 1, if reading protected files")]
        pin: Option<String>,
    },
    #[structopt(about = "Apply changes from flags or a configuration file")]
    Write {
        #[structopt(long, help = "JSON configuration file")]
        config: Option<PathBuf>,
        #[structopt(long, help = "ADM 1 value (digits or 16 hex digits)")]
        adm1: Option<String>,
        #[structopt(long)]
        imsi: Option<String>,
        #[structopt(long)]
        spn: Option<String>,
        #[structopt(long, help = "Treat a refused credential as fatal")]
        strict: bool,
    },
    #[structopt(about = "Run authentication against the card or locally")]
    Auth(AuthOptions),
    #[structopt(about = "Secure-channel registry and lifecycle operations")]
    Gp(GpCommand),
    #[structopt(about = "Profile container operations")]
    Esim(EsimCommand),
    #[structopt(about = "Run self-test categories against the card")]
    Test {
        #[structopt(long, help = "Categories: usim isim auth apdu security; default all")]
        category: Vec<String>,
        #[structopt(flatten)]
        auth: AuthKeyOptions,
    },
    #[structopt(about = "Execute a raw APDU script, one hex command per line")]
    Script {
        file: PathBuf,
    },
}

#[derive(Debug, StructOpt)]
struct AuthKeyOptions {
    #[structopt(long, help = "Subscriber key K, hex")]
    ki: Option<String>,
    #[structopt(long, help = "Operator variant OP, hex")]
    op: Option<String>,
    #[structopt(long, help = "Operator variant OPc, hex")]
    opc: Option<String>,
    #[structopt(long, default_value = "milenage")]
    algorithm: String,
    #[structopt(long, default_value = "000000000000", help = "Sequence number, hex")]
    sqn: String,
    #[structopt(long, default_value = "8000", help = "Authentication management field, hex")]
    amf: String,
    #[structopt(long, default_value = "8", help = "TUAK RES length in bytes")]
    tuak_res_len: usize,
    #[structopt(long, default_value = "8", help = "TUAK MAC length in bytes")]
    tuak_mac_len: usize,
    #[structopt(long, default_value = "16", help = "TUAK CK/IK length in bytes")]
    tuak_ck_len: usize,
    #[structopt(long, default_value = "1", help = "TUAK Keccak iterations")]
    tuak_iterations: u32,
}

impl AuthKeyOptions {
    fn vars(&self, rand: [u8; 16]) -> anyhow::Result<Option<AuthVars>> {
        let Some(ki) = &self.ki else {
            return Ok(None);
        };
        let algorithm: Algorithm = self.algorithm.parse()?;
        let vars = AuthVars {
            algorithm,
            k: parse_hex(ki)?,
            op: self.op.as_deref().map(parse_hex).transpose()?,
            opc: self.opc.as_deref().map(parse_hex).transpose()?,
            rand,
            sqn: parse_hex_exact(&self.sqn, 6)?.try_into().unwrap(),
            amf: parse_hex_exact(&self.amf, 2)?.try_into().unwrap(),
            tuak: TuakConfig {
                res_len: self.tuak_res_len,
                mac_len: self.tuak_mac_len,
                ck_len: self.tuak_ck_len,
                iterations: self.tuak_iterations,
            },
        };
        vars.validate()?;
        Ok(Some(vars))
    }
}

#[derive(Debug, StructOpt)]
struct AuthOptions {
    #[structopt(flatten)]
    keys: AuthKeyOptions,
    #[structopt(long, help = "Challenge, hex; random when omitted")]
    rand: Option<String>,
    #[structopt(long, help = "Compute locally, no card")]
    simulate: bool,
    #[structopt(long, help = "Replay a dumped AUTN through the card (card-only mode)")]
    autn: Option<String>,
    #[structopt(long, help = "Resynchronize from a dumped AUTS, hex")]
    auts: Option<String>,
    #[structopt(long, help = "Serving network for KASME, mcc/mnc")]
    serving: Option<String>,
}

#[derive(Debug, StructOpt)]
enum GpCommand {
    #[structopt(about = "Enumerate the card registry")]
    List(GpKeyOptions),
    #[structopt(about = "Try candidate keysets without authenticating")]
    Probe {
        #[structopt(long, help = "Key database file")]
        keydb: PathBuf,
        #[structopt(long, help = "Card identifier (ICCID or IMSI) to look up")]
        id: String,
    },
    #[structopt(about = "Delete card content by identifier")]
    Delete {
        #[structopt(flatten)]
        keys: GpKeyOptions,
        #[structopt(help = "Identifiers to delete, hex")]
        aids: Vec<String>,
    },
    #[structopt(about = "Load and install an applet container")]
    Load {
        #[structopt(flatten)]
        keys: GpKeyOptions,
        #[structopt(long)]
        cap: PathBuf,
        #[structopt(long, help = "Package identifier, hex")]
        package: String,
        #[structopt(long, help = "Module identifier, hex")]
        module: String,
        #[structopt(long, help = "Instance identifier, hex")]
        instance: String,
        #[structopt(long, default_value = "128")]
        block_size: usize,
    },
    #[structopt(about = "Store an access rule")]
    Aram {
        #[structopt(flatten)]
        keys: GpKeyOptions,
        #[structopt(long, help = "Device application certificate hash, hex")]
        hash: String,
        #[structopt(long, help = "Target application identifier, hex")]
        aid: Option<String>,
    },
    #[structopt(about = "Open a channel and verify the card cryptogram")]
    Verify(GpKeyOptions),
}

#[derive(Debug, StructOpt)]
struct GpKeyOptions {
    #[structopt(long, help = "Shared key for ENC/MAC/DEK, hex")]
    psk: Option<String>,
    #[structopt(long, help = "ENC key, hex")]
    enc: Option<String>,
    #[structopt(long, help = "MAC key, hex")]
    mac: Option<String>,
    #[structopt(long, help = "DEK key, hex")]
    dek: Option<String>,
    #[structopt(long, default_value = "0")]
    kvn: u8,
    #[structopt(long, default_value = "mac", help = "mac or mac+enc")]
    level: String,
    #[structopt(long, help = "Security domain identifier, hex")]
    sd: Option<String>,
}

impl GpKeyOptions {
    fn static_keys(&self) -> anyhow::Result<StaticKeys> {
        if let Some(psk) = &self.psk {
            let key: [u8; 16] = parse_hex_exact(psk, 16)?.try_into().unwrap();
            return Ok(StaticKeys::from_psk(key));
        }
        match (&self.enc, &self.mac, &self.dek) {
            (Some(enc), Some(mac), Some(dek)) => Ok(StaticKeys::from_hex(enc, mac, dek)?),
            _ => anyhow::bail!("supply either --psk or all of --enc/--mac/--dek"),
        }
    }

    fn sd_aid(&self) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.sd.as_deref().map(parse_hex).transpose()?)
    }

    fn level(&self) -> anyhow::Result<SecurityLevel> {
        Ok(self.level.parse()?)
    }
}

#[derive(Debug, StructOpt)]
enum EsimCommand {
    #[structopt(about = "Decode a profile container to the text form")]
    Decode { file: PathBuf },
    #[structopt(about = "Validate a profile container")]
    Validate { file: PathBuf },
    #[structopt(about = "Build a profile from a template and a configuration")]
    Build {
        #[structopt(long)]
        template: PathBuf,
        #[structopt(long)]
        config: PathBuf,
        #[structopt(long, short)]
        out: PathBuf,
    },
    #[structopt(about = "Compile the text form back to binary")]
    Compile {
        file: PathBuf,
        #[structopt(long, short)]
        out: PathBuf,
    },
    #[structopt(about = "Export a binary profile as text")]
    Export {
        file: PathBuf,
        #[structopt(long, short)]
        out: PathBuf,
    },
}

fn main() {
    pretty_env_logger::init();
    let options = Options::from_args();
    if let Err(err) = run(options) {
        eprintln!("error: {:#}", err);
        std::process::exit(1);
    }
}

fn run(options: Options) -> anyhow::Result<()> {
    // The profile subcommands and local authentication never touch a reader
    if let Command::Esim(cmd) = &options.cmd {
        return run_esim(cmd);
    }
    if let Command::Auth(auth_options) = &options.cmd {
        if auth_options.simulate || auth_options.auts.is_some() {
            return run_auth_local(auth_options);
        }
    }
    if let Command::ListReaders = options.cmd {
        return list_readers();
    }

    let context =
        pcsc::Context::establish(pcsc::Scope::User).context("Failed to create PC/SC context")?;
    let reader =
        PcscReader::connect(&context, options.reader).context("Failed to connect to card")?;
    let mut session =
        Session::open(reader, options.driver.as_deref()).context("Failed to open session")?;

    match options.cmd {
        Command::ListReaders | Command::Esim(_) => unreachable!(),
        Command::Read {
            phonebook,
            sms,
            access,
            pin,
        } => run_read(&mut session, phonebook, sms, access, pin),
        Command::Write {
            config,
            adm1,
            imsi,
            spn,
            strict,
        } => run_write(&mut session, config, adm1, imsi, spn, strict),
        Command::Auth(auth_options) => run_auth(&mut session, &auth_options),
        Command::Gp(gp_command) => run_gp(&mut session, &gp_command),
        Command::Test { category, auth } => run_test(&mut session, &category, &auth),
        Command::Script { file } => run_script(&mut session, &file),
    }
}

fn list_readers() -> anyhow::Result<()> {
    let context =
        pcsc::Context::establish(pcsc::Scope::User).context("Failed to create PC/SC context")?;
    let readers = context
        .list_readers_owned()
        .context("Failed to find readers")?;
    for (idx, reader) in readers.iter().enumerate() {
        println!("{}: {:?}", idx, reader);
    }
    Ok(())
}

/// Best-effort read: a failing file is reported and skipped, never fatal.
fn run_read(
    session: &mut Session<PcscReader>,
    phonebook: bool,
    sms: bool,
    access: bool,
    pin: Option<String>,
) -> anyhow::Result<()> {
    println!("ATR: {}", hex::encode(session.atr()));
    println!("Driver: {}", session.driver().name);

    let show = |name: &str, value: Result<String, CardError>| match value {
        Ok(v) => println!("{}: {}", name, v),
        Err(e) => println!("{}: <{}>", name, e),
    };

    show(
        "ICCID",
        session.select_mf().and_then(|_| {
            let (_, data) = session.read_ef_transparent(ef::ICCID)?;
            Ok(files::iccid::decode(&data).map_err(codec_err)?)
        }),
    );

    session.open_app(AppKind::Usim).context("No USIM application")?;
    if let Some(pin) = &pin {
        let value = credentials::pin_from_str(pin)?;
        session.verify(Credential::Pin1, &value, false)?;
    }

    show(
        "IMSI",
        session
            .read_ef_transparent(ef::IMSI)
            .and_then(|(_, d)| files::imsi::decode(&d).map_err(codec_err)),
    );
    show(
        "SPN",
        session.read_ef_transparent(ef::SPN).and_then(|(_, d)| {
            files::text::decode_spn(&d)
                .map(|s| s.name)
                .map_err(codec_err)
        }),
    );
    show(
        "AD",
        session.read_ef_transparent(ef::AD).and_then(|(_, d)| {
            files::admin::decode(&d)
                .map(|ad| format!("{:?}, MNC length {:?}", ad.mode, ad.mnc_len))
                .map_err(codec_err)
        }),
    );
    show(
        "Languages",
        session
            .read_ef_transparent(ef::LI)
            .and_then(|(_, d)| files::text::decode_languages(&d).map(|l| l.join(", ")).map_err(codec_err)),
    );
    for (name, id) in [
        ("PLMNwAcT", ef::PLMN_W_ACT),
        ("OPLMNwAcT", ef::OPLMN_W_ACT),
        ("HPLMNwAcT", ef::HPLMN_W_ACT),
    ] {
        show(
            name,
            session.read_ef_transparent(id).and_then(|(_, d)| {
                files::plmn::decode_act_list(&d)
                    .map(|list| {
                        list.iter()
                            .map(|e| format!("{} [{}]", e.plmn, e.act))
                            .collect::<Vec<_>>()
                            .join(", ")
                    })
                    .map_err(codec_err)
            }),
        );
    }
    show(
        "FPLMN",
        session.read_ef_transparent(ef::FPLMN).and_then(|(_, d)| {
            files::plmn::decode_fplmn(&d)
                .map(|l| {
                    l.iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .map_err(codec_err)
        }),
    );
    show(
        "LOCI",
        session.read_ef_transparent(ef::LOCI).and_then(|(_, d)| {
            files::loci::decode_loci(&d)
                .map(|l| format!("{} LAC {:04x} {:?}", l.plmn, l.lac, l.status))
                .map_err(codec_err)
        }),
    );
    show(
        "UST",
        session.read_ef_transparent(ef::UST).and_then(|(_, d)| {
            let table = ServiceTable::from_bytes(d);
            Ok(format!("{:?}", table.enabled_services()))
        }),
    );

    if access {
        for (name, id) in [("IMSI", ef::IMSI), ("UST", ef::UST), ("AD", ef::AD)] {
            let rule = session
                .select_file(id)
                .and_then(|info| session.resolve_access(&info));
            show(&format!("Access {}", name), rule.map(|r| r.to_string()));
        }
    }

    if phonebook {
        show(
            "MSISDN",
            session.read_ef_records(ef::MSISDN).and_then(|(_, records)| {
                let numbers: Vec<String> = records
                    .iter()
                    .filter_map(|r| files::msisdn::decode(r).ok().flatten())
                    .map(|m| m.number)
                    .collect();
                Ok(numbers.join(", "))
            }),
        );
        show(
            "ECC",
            session.read_ef_records(ef::ECC).and_then(|(_, records)| {
                let numbers: Vec<String> = records
                    .iter()
                    .filter_map(|r| files::ecc::decode(r).ok().flatten())
                    .map(|e| e.number)
                    .collect();
                Ok(numbers.join(", "))
            }),
        );
    }

    if sms {
        show(
            "SMSP",
            session.read_ef_records(ef::SMSP).and_then(|(_, records)| {
                let centres: Vec<String> = records
                    .iter()
                    .filter_map(|r| files::smsp::decode(r).ok().flatten())
                    .filter_map(|s| s.smsc)
                    .collect();
                Ok(centres.join(", "))
            }),
        );
    }

    // ISIM side, if the card has one
    if session.open_app(AppKind::Isim).is_ok() {
        show(
            "IMPI",
            session.read_ef_transparent(ef::IMPI).and_then(|(_, d)| {
                files::isim::decode_identity(&d)
                    .map(|v| v.unwrap_or_default())
                    .map_err(codec_err)
            }),
        );
        show(
            "Domain",
            session.read_ef_transparent(ef::DOMAIN).and_then(|(_, d)| {
                files::isim::decode_identity(&d)
                    .map(|v| v.unwrap_or_default())
                    .map_err(codec_err)
            }),
        );
        show(
            "IMPU",
            session.read_ef_records(ef::IMPU).and_then(|(_, records)| {
                let impus: Vec<String> = records
                    .iter()
                    .filter_map(|r| files::isim::decode_identity(r).ok().flatten())
                    .collect();
                Ok(impus.join(", "))
            }),
        );
        show(
            "P-CSCF",
            session.read_ef_records(ef::PCSCF).and_then(|(_, records)| {
                let addrs: Vec<String> = records
                    .iter()
                    .filter_map(|r| files::isim::decode_pcscf(r).ok().flatten())
                    .map(|a| a.to_string())
                    .collect();
                Ok(addrs.join(", "))
            }),
        );
    }

    Ok(())
}

fn codec_err(e: files::CodecError) -> CardError {
    match e {
        files::CodecError::Decode(d) => CardError::Decode(d),
        files::CodecError::Validation(v) => CardError::Validation(v),
        _ => CardError::Decode(simkit::tlv::DecodeError::BadShape("file body")),
    }
}

fn run_write(
    session: &mut Session<PcscReader>,
    config_path: Option<PathBuf>,
    adm1: Option<String>,
    imsi_flag: Option<String>,
    spn_flag: Option<String>,
    strict: bool,
) -> anyhow::Result<()> {
    let mut config = match config_path {
        Some(path) => config::load(&path)?,
        None => CardConfig::default(),
    };
    if imsi_flag.is_some() {
        config.imsi = imsi_flag;
    }
    if spn_flag.is_some() {
        config.spn = spn_flag;
    }

    session.open_app(AppKind::Usim).context("No USIM application")?;
    if let Some(adm) = &adm1 {
        let value = credentials::adm_from_str(adm)?;
        session.verify(Credential::Adm(1), &value, strict)?;
    }

    // Write paths stop at the first failure; there is no rollback on a card
    if let Some(imsi) = &config.imsi {
        let info = session.select_file(ef::IMSI)?;
        let encoded = files::imsi::encode(imsi, info.size)?;
        session.update_transparent(&info, &encoded, None)?;
        println!("IMSI <- {}", imsi);
    }
    if let Some(spn) = &config.spn {
        let info = session.select_file(ef::SPN)?;
        let value = files::text::ServiceProviderName {
            display_condition: 0x01,
            name: spn.clone(),
        };
        let encoded = files::text::encode_spn(&value, info.size)?;
        session.update_transparent(&info, &encoded, None)?;
        println!("SPN <- {}", spn);
    }
    if let Some(mode_name) = &config.operation_mode {
        let mode: files::admin::OperationMode = mode_name.parse()?;
        let info = session.select_file(ef::AD)?;
        let data = session.read_transparent(info.size, None)?;
        let mut ad = files::admin::decode(&data)?;
        ad.mode = mode;
        if let (Some(mnc), Some(slot)) = (&config.mnc, ad.mnc_len.as_mut()) {
            *slot = mnc.len() as u8;
        }
        let encoded = files::admin::encode(&ad, info.size)?;
        session.update_transparent(&info, &encoded, None)?;
        println!("AD <- {:?}", ad.mode);
    }
    if let Some(languages) = &config.languages {
        let info = session.select_file(ef::LI)?;
        let encoded = files::text::encode_languages(languages, info.size)?;
        session.update_transparent(&info, &encoded, None)?;
        println!("Languages <- {}", languages.join(", "));
    }

    for (name, id, entries) in [
        ("HPLMNwAcT", ef::HPLMN_W_ACT, &config.hplmn),
        ("OPLMNwAcT", ef::OPLMN_W_ACT, &config.oplmn),
        ("PLMNwAcT", ef::PLMN_W_ACT, &config.user_plmn),
    ] {
        let Some(entries) = entries else { continue };
        let list: Vec<files::plmn::PlmnAct> = entries
            .iter()
            .map(|e| {
                Ok(files::plmn::PlmnAct {
                    plmn: Plmn::new(&e.mcc, &e.mnc)?,
                    act: e.access_tech()?,
                })
            })
            .collect::<anyhow::Result<_>>()?;
        let info = session.select_file(id)?;
        let encoded = files::plmn::encode_act_list(&list, info.size)?;
        session.update_transparent(&info, &encoded, None)?;
        println!("{} <- {} entries", name, list.len());
    }

    if config.clear_fplmn {
        let info = session.select_file(ef::FPLMN)?;
        session.update_transparent(&info, &vec![0xff; info.size], None)?;
        println!("FPLMN cleared");
    }

    apply_services(session, &config)?;

    if let Some(programmable) = &config.programmable {
        apply_programmable(session, programmable)?;
    }

    if let Some(isim) = &config.isim {
        if session.open_app(AppKind::Isim).is_ok() {
            if let Some(impi) = &isim.impi {
                let info = session.select_file(ef::IMPI)?;
                let encoded = files::isim::encode_identity(impi, info.size)?;
                session.update_transparent(&info, &encoded, None)?;
                println!("IMPI <- {}", impi);
            }
            if let Some(domain) = &isim.domain {
                let info = session.select_file(ef::DOMAIN)?;
                let encoded = files::isim::encode_identity(domain, info.size)?;
                session.update_transparent(&info, &encoded, None)?;
                println!("Domain <- {}", domain);
            }
            if !isim.impu.is_empty() {
                let info = session.select_file(ef::IMPU)?;
                let record_len = info.structure.record_len().unwrap_or(0) as usize;
                for (index, impu) in isim.impu.iter().enumerate() {
                    let encoded = files::isim::encode_identity(impu, record_len)?;
                    session.update_record(&info, (index + 1) as u8, &encoded)?;
                }
                println!("IMPU <- {} records", isim.impu.len());
            }
            if !isim.pcscf.is_empty() {
                let info = session.select_file(ef::PCSCF)?;
                let record_len = info.structure.record_len().unwrap_or(0) as usize;
                for (index, pcscf) in isim.pcscf.iter().enumerate() {
                    let addr = files::isim::PcscfAddress::Fqdn(pcscf.clone());
                    let encoded = files::isim::encode_pcscf(&addr, record_len)?;
                    session.update_record(&info, (index + 1) as u8, &encoded)?;
                }
                println!("P-CSCF <- {} records", isim.pcscf.len());
            }
        } else {
            warn!("configuration carries ISIM settings but the card has no ISIM");
        }
    }

    Ok(())
}

/// Tri-state service switches: read the table, flip the requested bits,
/// write it back only when something changed.
fn apply_services(
    session: &mut Session<PcscReader>,
    config: &CardConfig,
) -> anyhow::Result<()> {
    use simkit::files::service_table::{isim, usim};

    let services = &config.services;
    let ust_changes: Vec<(Option<bool>, u16)> = vec![
        (services.volte, usim::VOLTE),
        (services.vowifi, usim::VOWIFI),
        (services.sms_over_ip, usim::SM_OVER_IP),
        (services.gsm_access, usim::GSM_ACCESS),
        (services.call_control, usim::CALL_CONTROL),
        (services.gba, usim::GBA),
        (services.nas_config_5g, usim::NAS_CONFIG_5G),
        (services.nssai_5g, usim::NSSAI_5G),
        (services.suci_calculation, usim::SUCI_CALCULATION),
    ];
    if ust_changes.iter().any(|(v, _)| v.is_some()) {
        session.open_app(AppKind::Usim)?;
        let info = session.select_file(ef::UST)?;
        let data = session.read_transparent(info.size, None)?;
        let mut table = ServiceTable::from_bytes(data);
        let mut touched = false;
        for (value, service) in &ust_changes {
            if let Some(on) = value {
                table.set(*service, *on)?;
                touched = true;
            }
        }
        if touched {
            session.update_transparent(&info, table.as_bytes(), None)?;
            println!("UST updated");
        }
    }

    let ist_changes: Vec<(Option<bool>, u16)> = vec![
        (services.isim_pcscf, isim::PCSCF),
        (services.isim_sms_over_ip, isim::SM_OVER_IP),
        (services.isim_voice_domain_pref, isim::VOICE_DOMAIN_PREF),
        (services.isim_gba, isim::GBA),
        (services.isim_http_digest, isim::HTTP_DIGEST),
    ];
    if ist_changes.iter().any(|(v, _)| v.is_some()) {
        session.open_app(AppKind::Isim)?;
        let info = session.select_file(ef::IST)?;
        let data = session.read_transparent(info.size, None)?;
        let mut table = ServiceTable::from_bytes(data);
        let mut touched = false;
        for (value, service) in &ist_changes {
            if let Some(on) = value {
                table.set(*service, *on)?;
                touched = true;
            }
        }
        if touched {
            session.update_transparent(&info, table.as_bytes(), None)?;
            println!("IST updated");
        }
    }
    Ok(())
}

fn auth_rand(options: &AuthOptions) -> anyhow::Result<[u8; 16]> {
    Ok(match &options.rand {
        Some(hex_str) => parse_hex_exact(hex_str, 16)?.try_into().unwrap(),
        None => rand::random(),
    })
}

/// The card-free paths: local vector computation and AUTS resync.
fn run_auth_local(options: &AuthOptions) -> anyhow::Result<()> {
    let rand = auth_rand(options)?;
    let vars = options
        .keys
        .vars(rand)?
        .context("local authentication needs the key material")?;

    if let Some(auts_hex) = &options.auts {
        let auts = parse_hex(auts_hex)?;
        let result = auth::process_auts(&vars, &auts)?;
        println!("SQNms:    {}", hex::encode(result.sqn_ms));
        println!("next SQN: {}", hex::encode(result.next_sqn));
        return Ok(());
    }

    let vectors = auth::compute_vectors(&vars)?;
    println!("RAND: {}", hex::encode(vectors.rand));
    println!("AUTN: {}", hex::encode(&vectors.autn));
    println!("XRES: {}", hex::encode(&vectors.xres));
    println!("CK:   {}", hex::encode(&vectors.ck));
    println!("IK:   {}", hex::encode(&vectors.ik));
    println!("AK:   {}", hex::encode(vectors.ak));
    if let Some(serving) = &options.serving {
        print_derived(&vectors, serving)?;
    }
    Ok(())
}

/// SELECT a vendor file by absolute path and overwrite it, using the class
/// byte the driver prescribes for proprietary files.
fn write_vendor_file(
    session: &mut Session<PcscReader>,
    path: &[u16],
    data: &[u8],
) -> anyhow::Result<()> {
    let cla = session.vendor_cla();
    for id in std::iter::once(simkit::nav::MF).chain(path.iter().copied()) {
        let cmd = ApduCommand::select_file_id(cla, id);
        let (_, sw) = session.exchange_cmd(&cmd)?;
        anyhow::ensure!(sw == 0x9000, "selecting {:04x} failed: {:04x}", id, sw);
    }
    let cmd = ApduCommand::update_binary(cla, 0, data);
    let (_, sw) = session.exchange_cmd(&cmd)?;
    anyhow::ensure!(sw == 0x9000, "vendor file update failed: {:04x}", sw);
    Ok(())
}

/// The personalization block: card serial, access class, own number, and
/// the vendor-held key material.
fn apply_programmable(
    session: &mut Session<PcscReader>,
    programmable: &simkit::config::ProgrammableConfig,
) -> anyhow::Result<()> {
    if let Some(iccid) = &programmable.iccid {
        session.select_mf()?;
        let info = session.select_file(ef::ICCID)?;
        let encoded = files::iccid::encode(iccid, info.size)?;
        session.update_transparent(&info, &encoded, None)?;
        println!("ICCID <- {}", iccid);
    }
    if let Some(acc) = &programmable.acc {
        session.open_app(AppKind::Usim)?;
        let info = session.select_file(ef::ACC)?;
        let encoded = parse_hex_exact(acc, info.size)?;
        session.update_transparent(&info, &encoded, None)?;
        println!("ACC <- {}", acc);
    }
    if let Some(msisdn) = &programmable.msisdn {
        session.open_app(AppKind::Usim)?;
        let info = session.select_file(ef::MSISDN)?;
        let record_len = info.structure.record_len().unwrap_or(0) as usize;
        let value = files::msisdn::Msisdn {
            label: String::new(),
            number: msisdn.trim_start_matches('+').to_string(),
            international: msisdn.starts_with('+'),
        };
        let encoded = files::msisdn::encode(&value, record_len)?;
        session.update_record(&info, 1, &encoded)?;
        println!("MSISDN <- {}", msisdn);
    }

    // Key material lives in vendor files; where the driver is known, write
    // them with its class byte
    let driver = session.driver();
    let key_file = |label: &str| {
        driver
            .key_files
            .iter()
            .find(|(name, _)| *name == label)
            .map(|(_, path)| *path)
    };
    for (label, value) in [("ki", &programmable.ki), ("opc", &programmable.opc)] {
        let Some(value) = value else { continue };
        match key_file(label) {
            Some(path) => {
                let data = parse_hex(value)?;
                write_vendor_file(session, path, &data)?;
                println!("{} written", label);
            }
            None => warn!(
                "driver {:?} has no {} file, skipping",
                driver.name, label
            ),
        }
    }
    if let Some(algorithm) = &programmable.algorithm {
        match driver.algo_selector_file {
            Some(path) => {
                let id: Algorithm = algorithm.parse()?;
                let byte = match id {
                    Algorithm::Milenage => 0x01,
                    Algorithm::Tuak => 0x02,
                };
                write_vendor_file(session, path, &[byte])?;
                println!("algorithm <- {}", algorithm);
            }
            None => warn!(
                "driver {:?} has no algorithm selector file, skipping",
                driver.name
            ),
        }
    }
    for (name, value) in [
        ("pin1", &programmable.pin1),
        ("puk1", &programmable.puk1),
        ("pin2", &programmable.pin2),
        ("puk2", &programmable.puk2),
    ] {
        if value.is_some() {
            warn!("{} programming is vendor specific, not supported by driver {:?}", name, driver.name);
        }
    }
    Ok(())
}

fn run_auth(session: &mut Session<PcscReader>, options: &AuthOptions) -> anyhow::Result<()> {
    let rand = auth_rand(options)?;
    let vars = options.keys.vars(rand)?;
    let autn_bytes = options.autn.as_deref().map(parse_hex).transpose()?;
    let run = auth::run_against_card(session, vars.as_ref(), &rand, autn_bytes.as_deref())?;
    match &run.card {
        auth::CardAuthResponse::Success { res, ck, ik, kc } => {
            println!("RES: {}", hex::encode(res));
            println!("CK:  {}", hex::encode(ck));
            println!("IK:  {}", hex::encode(ik));
            if let Some(kc) = kc {
                println!("Kc:  {}", hex::encode(kc));
            }
            match run.res_matches {
                Some(true) => println!("RES matches XRES"),
                Some(false) => anyhow::bail!("RES does not match XRES"),
                None => {}
            }
            if let (Some(vectors), Some(serving)) = (&run.vectors, &options.serving) {
                print_derived(vectors, serving)?;
            }
        }
        auth::CardAuthResponse::SyncFailure { auts } => {
            println!("AUTS: {}", hex::encode(auts));
            if let Some(vars) = &vars {
                let result = auth::process_auts(vars, auts)?;
                println!("SQNms:    {}", hex::encode(result.sqn_ms));
                println!("next SQN: {}", hex::encode(result.next_sqn));
            }
        }
    }
    Ok(())
}

fn print_derived(vectors: &auth::NetworkVectors, serving: &str) -> anyhow::Result<()> {
    let (mcc, mnc) = serving
        .split_once('/')
        .context("--serving must be mcc/mnc")?;
    let plmn = Plmn::new(mcc, mnc)?;
    let sqn_xor_ak: [u8; 6] = vectors.autn[0..6].try_into().unwrap();
    let kasme = auth::derive_kasme(&vectors.ck, &vectors.ik, &plmn, &sqn_xor_ak);
    println!("KASME: {}", hex::encode(kasme));
    let (sres, kc) = auth::gsm_triplet(&vectors.xres, &vectors.ck, &vectors.ik);
    println!("SRES: {}  Kc: {}", hex::encode(sres), hex::encode(kc));
    Ok(())
}

fn run_gp(session: &mut Session<PcscReader>, command: &GpCommand) -> anyhow::Result<()> {
    match command {
        GpCommand::List(keys) => {
            let static_keys = keys.static_keys()?;
            let mut channel = SecureChannel::open(
                session,
                keys.sd_aid()?.as_deref(),
                &static_keys,
                keys.kvn,
                keys.level()?,
                None,
            )?;
            for category in gp::StatusCategory::ALL {
                match gp::get_status(&mut channel, category) {
                    Ok(entries) => {
                        println!("{}:", category.label());
                        for entry in entries {
                            println!(
                                "  {}  lifecycle {:02x}  privileges {:02x}",
                                hex::encode(&entry.aid),
                                entry.lifecycle,
                                entry.privileges
                            );
                        }
                    }
                    Err(e) => {
                        println!("{}: <{}>", category.label(), e);
                        break;
                    }
                }
            }
        }
        GpCommand::Probe { keydb, id } => {
            let db = KeyDb::load(keydb)?;
            let record = db.lookup(id).context("No such card in the key database")?;
            let mut candidates = Vec::new();
            for name in ["cm", "psk40", "psk41", "a", "b", "c", "d", "e", "f", "g", "h"] {
                if let Ok(keys) = record.keyset(name) {
                    candidates.push(ProbeCandidate {
                        label: name.to_string(),
                        keys,
                        kvn: 0,
                        sd_aid: None,
                    });
                }
            }
            anyhow::ensure!(!candidates.is_empty(), "No keysets found in the database");
            let index = SecureChannel::probe(session, &candidates, None)?;
            println!("matching keyset: {}", candidates[index].label);
        }
        GpCommand::Delete { keys, aids } => {
            let parsed: Vec<Vec<u8>> = aids
                .iter()
                .map(|a| Ok(parse_hex(a)?))
                .collect::<anyhow::Result<_>>()?;
            anyhow::ensure!(!parsed.is_empty(), "Nothing to delete");
            let static_keys = keys.static_keys()?;
            let mut channel = SecureChannel::open(
                session,
                keys.sd_aid()?.as_deref(),
                &static_keys,
                keys.kvn,
                keys.level()?,
                None,
            )?;
            gp::delete(&mut channel, &parsed)?;
            println!("deleted {} identifiers", parsed.len());
        }
        GpCommand::Load {
            keys,
            cap,
            package,
            module,
            instance,
            block_size,
        } => {
            let bytes = std::fs::read(cap)
                .with_context(|| format!("Failed to read {}", cap.display()))?;
            let cap_file = CapFile::parse(&bytes)?;
            let spec = gp::InstallSpec {
                package_aid: parse_hex(package)?,
                module_aid: parse_hex(module)?,
                instance_aid: parse_hex(instance)?,
                privileges: 0,
                params: Vec::new(),
                sd_aid: Vec::new(),
            };
            let static_keys = keys.static_keys()?;
            let mut channel = SecureChannel::open(
                session,
                keys.sd_aid()?.as_deref(),
                &static_keys,
                keys.kvn,
                keys.level()?,
                None,
            )?;
            gp::load_and_install(&mut channel, &cap_file, &spec, *block_size, None)?;
            println!("installed {}", instance);
        }
        GpCommand::Aram { keys, hash, aid } => {
            let rule = AramRule {
                target_aid: aid.as_deref().map(parse_hex).transpose()?,
                hash: parse_hex(hash)?,
                permission: None,
                apdu_rule: 0x01,
            };
            let static_keys = keys.static_keys()?;
            let mut channel = SecureChannel::open(
                session,
                keys.sd_aid()?.as_deref(),
                &static_keys,
                keys.kvn,
                keys.level()?,
                None,
            )?;
            gp::aram::store_rule(&mut channel, &rule)?;
            println!("rule stored");
        }
        GpCommand::Verify(keys) => {
            let static_keys = keys.static_keys()?;
            let channel = SecureChannel::open(
                session,
                keys.sd_aid()?.as_deref(),
                &static_keys,
                keys.kvn,
                keys.level()?,
                None,
            )?;
            println!("card cryptogram verified, {:?} open", channel.variant());
            channel.close();
        }
    }
    Ok(())
}

fn run_esim(command: &EsimCommand) -> anyhow::Result<()> {
    match command {
        EsimCommand::Decode { file } => {
            let raw = std::fs::read(file)?;
            let profile = Profile::parse(&raw)?;
            print!("{}", esim::text::emit(&profile));
        }
        EsimCommand::Validate { file } => {
            let raw = std::fs::read(file)?;
            let profile = Profile::parse(&raw)?;
            let report = esim::validate::validate(&profile);
            for warning in &report.warnings {
                println!("warning: {}", warning);
            }
            for error in &report.errors {
                println!("error: {}", error);
            }
            anyhow::ensure!(report.passed(), "validation failed");
            println!("profile is valid");
        }
        EsimCommand::Build {
            template,
            config: config_path,
            out,
        } => {
            let raw = std::fs::read(template)?;
            let profile = Profile::parse(&raw)?;
            let config = config::load(config_path)?;
            let overrides = overrides_from_config(&config)?;
            let built = esim::build::build(&profile, &overrides)?;
            let report = esim::validate::validate(&built);
            for warning in &report.warnings {
                println!("warning: {}", warning);
            }
            anyhow::ensure!(report.passed(), "built profile fails validation: {:?}", report.errors);
            std::fs::write(out, built.emit())?;
            println!("wrote {}", out.display());
        }
        EsimCommand::Compile { file, out } => {
            let text = std::fs::read_to_string(file)?;
            let profile = esim::text::parse(&text)?;
            std::fs::write(out, profile.emit())?;
            println!("wrote {}", out.display());
        }
        EsimCommand::Export { file, out } => {
            let raw = std::fs::read(file)?;
            let profile = Profile::parse(&raw)?;
            std::fs::write(out, esim::text::emit(&profile))?;
            println!("wrote {}", out.display());
        }
    }
    Ok(())
}

fn overrides_from_config(config: &CardConfig) -> anyhow::Result<ProfileOverrides> {
    let mut overrides = ProfileOverrides {
        iccid: config.iccid.clone(),
        imsi: config.imsi.clone(),
        ..Default::default()
    };
    if let Some(programmable) = &config.programmable {
        overrides.k = programmable.ki.as_deref().map(parse_hex).transpose()?;
        overrides.op = programmable.op.as_deref().map(parse_hex).transpose()?;
        overrides.opc = programmable.opc.as_deref().map(parse_hex).transpose()?;
        overrides.pin1 = programmable.pin1.clone();
        overrides.puk1 = programmable.puk1.clone();
        overrides.pin2 = programmable.pin2.clone();
        overrides.puk2 = programmable.puk2.clone();
        if overrides.iccid.is_none() {
            overrides.iccid = programmable.iccid.clone();
        }
        overrides.algorithm = programmable
            .algorithm
            .as_deref()
            .map(|s| s.parse::<Algorithm>())
            .transpose()?;
    }
    if let Some(mnc) = &config.mnc {
        overrides.mnc_len = Some(mnc.len() as u8);
    }
    if let Some(isim) = &config.isim {
        overrides.impi = isim.impi.clone();
        overrides.domain = isim.domain.clone();
        overrides.impu = isim.impu.clone();
        overrides.pcscf = isim.pcscf.clone();
    }
    Ok(overrides)
}

fn run_test(
    session: &mut Session<PcscReader>,
    categories: &[String],
    auth_options: &AuthKeyOptions,
) -> anyhow::Result<()> {
    let categories: Vec<selftest::Category> = if categories.is_empty() {
        selftest::Category::ALL.to_vec()
    } else {
        categories
            .iter()
            .map(|c| c.parse())
            .collect::<Result<_, _>>()?
    };
    let vars = auth_options.vars(rand::random())?;
    let report = selftest::run(session, &categories, vars.as_ref())?;

    println!("self-test started {}", report.started.to_rfc3339());
    for outcome in &report.outcomes {
        println!(
            "[{}] {} {}: expected {}, got {} ({})",
            outcome.category.label(),
            if outcome.passed { "PASS" } else { "FAIL" },
            outcome.name,
            outcome.expected,
            outcome.actual,
            outcome.spec_ref,
        );
        if !outcome.passed && !outcome.apdu_hex.is_empty() {
            println!("    > {}", outcome.apdu_hex);
            println!("    < {} {:04x}", outcome.response_hex, outcome.sw);
        }
    }
    let failed = report.outcomes.iter().filter(|o| !o.passed).count();
    anyhow::ensure!(failed == 0, "{} test(s) failed", failed);
    Ok(())
}

fn run_script(session: &mut Session<PcscReader>, file: &PathBuf) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    for (number, line) in text.lines().enumerate() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let raw = parse_hex(line)
            .with_context(|| format!("line {}: not a hex APDU", number + 1))?;
        let command = ApduCommand::from_raw(&raw)
            .map_err(|e| anyhow::anyhow!("line {}: {}", number + 1, e))?;
        let (data, sw) = session.exchange_cmd(&command)?;
        println!("> {}", line);
        println!("< {} {:04x}", hex::encode(data), sw);
    }
    Ok(())
}
