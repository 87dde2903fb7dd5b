//! The triple-DES secure-channel primitives: session-key derivation by
//! encrypting tagged derivation data, full-3DES cryptogram MACs, and the
//! retail MAC (single DES chaining, 3DES on the final block) used for
//! command integrity.

use cipher::generic_array::GenericArray;
use cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use des::{Des, TdesEde2};

/// Derivation constants, prefixed by 0x01 in the derivation data.
pub const DD_ENC: u8 = 0x82;
pub const DD_MAC: u8 = 0x01;
pub const DD_DEK: u8 = 0x81;

fn tdes(key16: &[u8]) -> TdesEde2 {
    TdesEde2::new(GenericArray::from_slice(key16))
}

fn des_single(key8: &[u8]) -> Des {
    Des::new(GenericArray::from_slice(key8))
}

/// ISO 9797-1 padding: 0x80 then zeros to the block boundary.
pub fn pad80(data: &[u8]) -> Vec<u8> {
    let mut out = data.to_vec();
    out.push(0x80);
    while out.len() % 8 != 0 {
        out.push(0x00);
    }
    out
}

/// 3DES in CBC mode over already padded data.
pub fn cbc_encrypt(key16: &[u8], iv: &[u8; 8], data: &[u8]) -> Vec<u8> {
    debug_assert!(data.len() % 8 == 0);
    let cipher = tdes(key16);
    let mut out = Vec::with_capacity(data.len());
    let mut chain = *iv;
    for block in data.chunks(8) {
        for (c, b) in chain.iter_mut().zip(block) {
            *c ^= b;
        }
        let mut ga = GenericArray::from(chain);
        cipher.encrypt_block(&mut ga);
        chain = ga.into();
        out.extend_from_slice(&chain);
    }
    out
}

pub fn cbc_decrypt(key16: &[u8], iv: &[u8; 8], data: &[u8]) -> Vec<u8> {
    debug_assert!(data.len() % 8 == 0);
    let cipher = tdes(key16);
    let mut out = Vec::with_capacity(data.len());
    let mut chain = *iv;
    for block in data.chunks(8) {
        let mut ga = GenericArray::clone_from_slice(block);
        cipher.decrypt_block(&mut ga);
        for (g, c) in ga.iter_mut().zip(chain.iter()) {
            *g ^= c;
        }
        out.extend_from_slice(&ga);
        chain = block.try_into().unwrap();
    }
    out
}

/// One session key: 3DES-CBC over `01 || constant || counter || 0^12` with
/// a zero IV under the static key.
pub fn derive_session_key(static_key: &[u8], constant: u8, counter: u16) -> Vec<u8> {
    let mut data = [0u8; 16];
    data[0] = 0x01;
    data[1] = constant;
    data[2..4].copy_from_slice(&counter.to_be_bytes());
    cbc_encrypt(static_key, &[0; 8], &data)
}

/// Full-3DES CBC MAC over padded data: every block through 3DES, the last
/// ciphertext block is the MAC. Used for both cryptograms.
pub fn full_mac(key16: &[u8], data: &[u8]) -> [u8; 8] {
    let padded = pad80(data);
    let encrypted = cbc_encrypt(key16, &[0; 8], &padded);
    encrypted[encrypted.len() - 8..].try_into().unwrap()
}

/// The retail MAC: single-DES CBC with the first key half, final block
/// through full 3DES. The ICV chains from the previous command's MAC.
pub fn retail_mac(key16: &[u8], icv: &[u8; 8], data: &[u8]) -> [u8; 8] {
    let padded = pad80(data);
    let single = des_single(&key16[..8]);
    let mut chain = *icv;
    let (body, last) = padded.split_at(padded.len() - 8);
    for block in body.chunks(8) {
        for (c, b) in chain.iter_mut().zip(block) {
            *c ^= b;
        }
        let mut ga = GenericArray::from(chain);
        single.encrypt_block(&mut ga);
        chain = ga.into();
    }
    for (c, b) in chain.iter_mut().zip(last) {
        *c ^= b;
    }
    let mut ga = GenericArray::from(chain);
    tdes(key16).encrypt_block(&mut ga);
    ga.into()
}

/// Card cryptogram: host challenge, then counter and card challenge.
pub fn card_cryptogram(
    s_enc: &[u8],
    host_challenge: &[u8; 8],
    counter_and_challenge: &[u8; 8],
) -> [u8; 8] {
    let mut data = Vec::with_capacity(16);
    data.extend_from_slice(host_challenge);
    data.extend_from_slice(counter_and_challenge);
    full_mac(s_enc, &data)
}

/// Host cryptogram: counter and card challenge first.
pub fn host_cryptogram(
    s_enc: &[u8],
    counter_and_challenge: &[u8; 8],
    host_challenge: &[u8; 8],
) -> [u8; 8] {
    let mut data = Vec::with_capacity(16);
    data.extend_from_slice(counter_and_challenge);
    data.extend_from_slice(host_challenge);
    full_mac(s_enc, &data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    const KEY: [u8; 16] = hex!("404142434445464748494a4b4c4d4e4f");

    #[test]
    fn padding() {
        assert_eq!(pad80(&[]), hex!("8000000000000000"));
        assert_eq!(pad80(&hex!("01020304050607")), hex!("0102030405060780"));
        assert_eq!(
            pad80(&hex!("0102030405060708")),
            hex!("01020304050607088000000000000000")
        );
    }

    #[test]
    fn cbc_round_trip() {
        let data = hex!("00112233445566778899aabbccddeeff");
        let iv = [0u8; 8];
        let enc = cbc_encrypt(&KEY, &iv, &data);
        assert_eq!(cbc_decrypt(&KEY, &iv, &enc), data);
        assert_ne!(enc, data);
    }

    #[test]
    fn derivation_is_constant_and_counter_sensitive() {
        let enc1 = derive_session_key(&KEY, DD_ENC, 0x0001);
        let enc2 = derive_session_key(&KEY, DD_ENC, 0x0002);
        let mac1 = derive_session_key(&KEY, DD_MAC, 0x0001);
        assert_eq!(enc1.len(), 16);
        assert_ne!(enc1, enc2);
        assert_ne!(enc1, mac1);
        assert_eq!(enc1, derive_session_key(&KEY, DD_ENC, 0x0001));
    }

    #[test]
    fn retail_mac_chains() {
        let m1 = retail_mac(&KEY, &[0; 8], b"command one");
        let m2_chained = retail_mac(&KEY, &m1, b"command two");
        let m2_flat = retail_mac(&KEY, &[0; 8], b"command two");
        assert_ne!(m2_chained, m2_flat);
        // Chain is deterministic
        assert_eq!(m2_chained, retail_mac(&KEY, &m1, b"command two"));
    }

    #[test]
    fn cryptograms_differ_by_order() {
        let host = hex!("0102030405060708");
        let card = hex!("1112131415161718");
        assert_ne!(
            card_cryptogram(&KEY, &host, &card),
            host_cryptogram(&KEY, &card, &host)
        );
    }
}
