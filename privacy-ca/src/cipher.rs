// SPDX-License-Identifier: Apache-2.0

//! Symmetric primitives shared by the envelope and credential layers.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::{Aes128, Aes256};
use anyhow::{anyhow, Result};
use cfb_mode::cipher::AsyncStreamCipher;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;
type Aes128CfbEnc = cfb_mode::Encryptor<Aes128>;
type Aes128CfbDec = cfb_mode::Decryptor<Aes128>;

pub(crate) const AES256_KEY_LEN: usize = 32;
pub(crate) const CBC_IV_LEN: usize = 16;

pub(crate) fn aes256_cbc_encrypt(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256CbcEnc::new_from_slices(key, iv)
        .map_err(|e| anyhow!("bad AES-256-CBC key or IV length: {e}"))?;
    Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

pub(crate) fn aes256_cbc_decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256CbcDec::new_from_slices(key, iv)
        .map_err(|e| anyhow!("bad AES-256-CBC key or IV length: {e}"))?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|e| anyhow!("AES-256-CBC unpadding failed: {e}"))
}

/// AES-128-CFB with a zero IV, as used for the credential inner wrap.
pub(crate) fn aes128_cfb_encrypt(key: &[u8], buf: &mut [u8]) -> Result<()> {
    let iv = [0u8; 16];
    Aes128CfbEnc::new_from_slices(key, &iv)
        .map_err(|e| anyhow!("bad AES-128-CFB key length: {e}"))?
        .encrypt(buf);
    Ok(())
}

pub(crate) fn aes128_cfb_decrypt(key: &[u8], buf: &mut [u8]) -> Result<()> {
    let iv = [0u8; 16];
    Aes128CfbDec::new_from_slices(key, &iv)
        .map_err(|e| anyhow!("bad AES-128-CFB key length: {e}"))?
        .decrypt(buf);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cbc_round_trip() {
        let key = [0x11u8; 32];
        let iv = [0x22u8; 16];
        let plain = b"attestation payload";
        let ct = aes256_cbc_encrypt(&key, &iv, plain).unwrap();
        assert_ne!(&ct[..plain.len().min(ct.len())], plain.as_slice());
        assert_eq!(aes256_cbc_decrypt(&key, &iv, &ct).unwrap(), plain);
    }

    #[test]
    fn cbc_rejects_wrong_key() {
        let key = [0x11u8; 32];
        let iv = [0x22u8; 16];
        let ct = aes256_cbc_encrypt(&key, &iv, b"payload").unwrap();
        let wrong = [0x33u8; 32];
        // Either an unpadding error or garbage that no longer matches.
        match aes256_cbc_decrypt(&wrong, &iv, &ct) {
            Ok(plain) => assert_ne!(plain, b"payload"),
            Err(_) => {}
        }
    }

    #[test]
    fn cfb_round_trip_preserves_length() {
        let key = [0x44u8; 16];
        let mut buf = b"\x00\x20credential-value".to_vec();
        let original = buf.clone();
        aes128_cfb_encrypt(&key, &mut buf).unwrap();
        assert_ne!(buf, original);
        assert_eq!(buf.len(), original.len());
        aes128_cfb_decrypt(&key, &mut buf).unwrap();
        assert_eq!(buf, original);
    }
}
