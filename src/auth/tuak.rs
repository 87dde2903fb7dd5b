//! The TUAK algorithm set of TS 35.231: the Keccak-f[1600] permutation run
//! over a fully specified 1600-bit input, with configurable output widths.
//!
//! All widths must be fixed in a [`TuakConfig`] before anything is
//! computed; MAC width is implied by truncation of the permutation output.

use crate::errors::ValidationError;

const ALGONAME: &[u8; 7] = b"TUAK1.0";

/// Function codes carried in the INSTANCE byte, combined with the output
/// width codes and the key-length flag.
const FC_TOPC: u8 = 0x00;
const FC_F1: u8 = 0x20;
const FC_F1_STAR: u8 = 0x28;
const FC_F2345: u8 = 0x40;
const FC_F5_STAR: u8 = 0x48;
const KEY_256: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TuakConfig {
    /// RES length in bytes: 8, 16 or 32.
    pub res_len: usize,
    /// MAC-A / MAC-S length in bytes: 8, 16 or 32.
    pub mac_len: usize,
    /// CK and IK length in bytes: 16 or 32.
    pub ck_len: usize,
    /// Keccak iteration count, 1 unless the operator says otherwise.
    pub iterations: u32,
}

impl Default for TuakConfig {
    fn default() -> Self {
        TuakConfig {
            res_len: 8,
            mac_len: 8,
            ck_len: 16,
            iterations: 1,
        }
    }
}

impl TuakConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !matches!(self.res_len, 8 | 16 | 32) {
            return Err(ValidationError::Unsupported("TUAK RES length"));
        }
        if !matches!(self.mac_len, 8 | 16 | 32) {
            return Err(ValidationError::Unsupported("TUAK MAC length"));
        }
        if !matches!(self.ck_len, 16 | 32) {
            return Err(ValidationError::Unsupported("TUAK CK/IK length"));
        }
        if self.iterations == 0 {
            return Err(ValidationError::Unsupported("TUAK iteration count of zero"));
        }
        Ok(())
    }

    fn width_code(len: usize) -> u8 {
        match len {
            8 | 16 => ((len / 8) - 1) as u8 * 0x02,
            _ => 0x04,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TuakOutput {
    pub mac_a: Vec<u8>,
    pub mac_s: Vec<u8>,
    pub res: Vec<u8>,
    pub ck: Vec<u8>,
    pub ik: Vec<u8>,
    pub ak: [u8; 6],
    pub ak_star: [u8; 6],
}

fn permute(state: &mut [u8; 200], iterations: u32) {
    let mut lanes = [0u64; 25];
    for (i, lane) in lanes.iter_mut().enumerate() {
        *lane = u64::from_le_bytes(state[i * 8..i * 8 + 8].try_into().unwrap());
    }
    for _ in 0..iterations {
        keccak::f1600(&mut lanes);
    }
    for (i, lane) in lanes.iter().enumerate() {
        state[i * 8..i * 8 + 8].copy_from_slice(&lane.to_le_bytes());
    }
}

/// Build the permutation input: TOPc, INSTANCE, the algorithm name, then
/// the per-function fields, then the key with its closing marker bit.
fn state_in(
    topc: &[u8; 32],
    instance: u8,
    rand: &[u8; 16],
    amf: &[u8; 2],
    sqn: &[u8; 6],
    k: &[u8],
) -> [u8; 200] {
    let mut state = [0u8; 200];
    state[0..32].copy_from_slice(topc);
    state[32] = instance;
    state[33..40].copy_from_slice(ALGONAME);
    state[40..56].copy_from_slice(rand);
    state[56..58].copy_from_slice(amf);
    state[58..64].copy_from_slice(sqn);
    state[64..64 + k.len()].copy_from_slice(k);
    state[64 + k.len()] = 0x01;
    state
}

fn key_flag(k: &[u8]) -> u8 {
    if k.len() == 32 {
        KEY_256
    } else {
        0
    }
}

/// TOPc = TOP XOR permutation output, the TUAK counterpart of the Milenage
/// OPc derivation.
pub fn topc_from_top(k: &[u8], top: &[u8; 32], iterations: u32) -> [u8; 32] {
    let mut state = state_in(top, FC_TOPC | key_flag(k), &[0; 16], &[0; 2], &[0; 6], k);
    permute(&mut state, iterations);
    let mut topc = [0u8; 32];
    for (i, t) in topc.iter_mut().enumerate() {
        *t = state[i] ^ top[i];
    }
    topc
}

fn run(
    topc: &[u8; 32],
    instance: u8,
    rand: &[u8; 16],
    amf: &[u8; 2],
    sqn: &[u8; 6],
    k: &[u8],
    iterations: u32,
) -> [u8; 200] {
    let mut state = state_in(topc, instance, rand, amf, sqn, k);
    permute(&mut state, iterations);
    state
}

/// Run the whole family for one challenge. `k` is 16 or 32 bytes.
pub fn compute(
    k: &[u8],
    topc: &[u8; 32],
    rand: &[u8; 16],
    sqn: &[u8; 6],
    amf: &[u8; 2],
    config: &TuakConfig,
) -> Result<TuakOutput, ValidationError> {
    config.validate()?;
    if k.len() != 16 && k.len() != 32 {
        return Err(ValidationError::WrongLength {
            what: "TUAK subscriber key",
            expected: 32,
            got: k.len(),
        });
    }
    let kf = key_flag(k);
    let mac_code = TuakConfig::width_code(config.mac_len);
    let out_code = TuakConfig::width_code(config.res_len)
        | if config.ck_len == 32 { 0x10 } else { 0 };

    let out1 = run(topc, FC_F1 | mac_code | kf, rand, amf, sqn, k, config.iterations);
    let out1s = run(
        topc,
        FC_F1_STAR | mac_code | kf,
        rand,
        amf,
        sqn,
        k,
        config.iterations,
    );
    // f2..f5 ignore SQN and AMF
    let out2 = run(
        topc,
        FC_F2345 | out_code | kf,
        rand,
        &[0; 2],
        &[0; 6],
        k,
        config.iterations,
    );
    let out5s = run(
        topc,
        FC_F5_STAR | kf,
        rand,
        &[0; 2],
        &[0; 6],
        k,
        config.iterations,
    );

    Ok(TuakOutput {
        mac_a: out1[..config.mac_len].to_vec(),
        mac_s: out1s[..config.mac_len].to_vec(),
        res: out2[..config.res_len].to_vec(),
        ck: out2[32..32 + config.ck_len].to_vec(),
        ik: out2[64..64 + config.ck_len].to_vec(),
        ak: out2[96..102].try_into().unwrap(),
        ak_star: out5s[96..102].try_into().unwrap(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    const K128: [u8; 16] = hex!("465b5ce8b199b49faa5f0a2ee238a6bc");
    const TOP: [u8; 32] =
        hex!("5555555555555555555555555555555555555555555555555555555555555555");
    const RAND: [u8; 16] = hex!("23553cbe9637a89d218ae64dae47bf35");
    const SQN: [u8; 6] = hex!("ff9bb4d0b607");
    const AMF: [u8; 2] = hex!("b9b9");

    #[test]
    fn deterministic_and_distinct_outputs() {
        let topc = topc_from_top(&K128, &TOP, 1);
        let cfg = TuakConfig::default();
        let a = compute(&K128, &topc, &RAND, &SQN, &AMF, &cfg).unwrap();
        let b = compute(&K128, &topc, &RAND, &SQN, &AMF, &cfg).unwrap();
        assert_eq!(a, b);
        assert_ne!(a.mac_a, a.mac_s);
        assert_ne!(a.ak, a.ak_star);
        assert_ne!(a.ck, a.ik);
    }

    #[test]
    fn widths_follow_config() {
        let topc = topc_from_top(&K128, &TOP, 1);
        let cfg = TuakConfig {
            res_len: 16,
            mac_len: 32,
            ck_len: 32,
            iterations: 1,
        };
        let out = compute(&K128, &topc, &RAND, &SQN, &AMF, &cfg).unwrap();
        assert_eq!(out.res.len(), 16);
        assert_eq!(out.mac_a.len(), 32);
        assert_eq!(out.ck.len(), 32);
        assert_eq!(out.ik.len(), 32);
    }

    #[test]
    fn width_config_changes_output() {
        let topc = topc_from_top(&K128, &TOP, 1);
        let narrow = compute(&K128, &topc, &RAND, &SQN, &AMF, &TuakConfig::default()).unwrap();
        let wide = compute(
            &K128,
            &topc,
            &RAND,
            &SQN,
            &AMF,
            &TuakConfig {
                res_len: 32,
                ..TuakConfig::default()
            },
        )
        .unwrap();
        // A different declared width is a different function, not a prefix
        assert_ne!(narrow.res[..], wide.res[..8]);
    }

    #[test]
    fn key_lengths_and_iterations() {
        let k256: [u8; 32] = hex!(
            "465b5ce8b199b49faa5f0a2ee238a6bc465b5ce8b199b49faa5f0a2ee238a6bc"
        );
        let topc128 = topc_from_top(&K128, &TOP, 1);
        let topc256 = topc_from_top(&k256, &TOP, 1);
        assert_ne!(topc128, topc256);

        let once = topc_from_top(&K128, &TOP, 1);
        let twice = topc_from_top(&K128, &TOP, 2);
        assert_ne!(once, twice);
    }

    #[test]
    fn bad_config_refused() {
        let topc = [0u8; 32];
        let cfg = TuakConfig {
            res_len: 12,
            ..TuakConfig::default()
        };
        assert!(compute(&K128, &topc, &RAND, &SQN, &AMF, &cfg).is_err());
        assert!(compute(&[0u8; 20], &topc, &RAND, &SQN, &AMF, &TuakConfig::default()).is_err());
    }
}
