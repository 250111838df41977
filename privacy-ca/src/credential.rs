// SPDX-License-Identifier: Apache-2.0

//! TPM 2.0 identity-credential protection.
//!
//! [`make_credential`] produces the `(credential, secret)` pair a TPM
//! consumes in `TPM2_ActivateCredential`: a random seed is transported under
//! the EK with RSA-OAEP (label `IDENTITY`), the credential value is wrapped
//! with an AES-128-CFB key derived from the seed and the target object's
//! name, and an HMAC over the wrapped value binds it to that name. The
//! activation side is implemented too: host agents use it against software
//! TPMs and the protocol tests use it to close the loop without hardware.

use anyhow::{bail, Context, Result};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

use trustd_types::IdentityProofRequest;

use crate::cipher;

/// OAEP label for the credential seed, NUL terminator included.
const IDENTITY_LABEL: &str = "IDENTITY\0";
/// KDFa labels, NUL terminators included.
const STORAGE_LABEL: &[u8] = b"STORAGE\0";
const INTEGRITY_LABEL: &[u8] = b"INTEGRITY\0";

const SEED_LEN: usize = 32;

/// The two halves handed to `TPM2_ActivateCredential`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialBlob {
    /// `TPM2B_ID_OBJECT` contents: `len(integrity) ‖ integrity ‖ encIdentity`.
    pub credential: Vec<u8>,
    /// `TPM2B_ENCRYPTED_SECRET` contents: OAEP ciphertext of the seed.
    pub secret: Vec<u8>,
}

/// KDFa (SP800-108 counter mode, HMAC-SHA256). The label carries its own
/// NUL terminator, which doubles as the NIST separator byte.
fn kdf_a(key: &[u8], label: &[u8], context_u: &[u8], context_v: &[u8], bits: u32) -> Result<Vec<u8>> {
    let length = (bits as usize).div_ceil(8);
    let mut derived = Vec::with_capacity(length);
    let mut counter: u32 = 1;
    while derived.len() < length {
        let mut mac = <Hmac<Sha256>>::new_from_slice(key).context("bad KDFa key")?;
        mac.update(&counter.to_be_bytes());
        mac.update(label);
        mac.update(context_u);
        mac.update(context_v);
        mac.update(&bits.to_be_bytes());
        derived.extend_from_slice(&mac.finalize().into_bytes());
        counter += 1;
    }
    derived.truncate(length);
    Ok(derived)
}

/// Protect `credential_value` so that only the TPM holding the private half
/// of `ek_public`, with an object named `object_name` loaded, can recover it.
pub fn make_credential(
    ek_public: &RsaPublicKey,
    object_name: &[u8],
    credential_value: &[u8],
) -> Result<CredentialBlob> {
    if credential_value.is_empty() || credential_value.len() > u16::MAX as usize {
        bail!("credential value length {} out of range", credential_value.len());
    }
    if object_name.is_empty() {
        bail!("object name must not be empty");
    }

    let mut seed = [0u8; SEED_LEN];
    OsRng
        .try_fill_bytes(&mut seed)
        .context("failed to draw credential seed")?;

    let secret = ek_public
        .encrypt(
            &mut OsRng,
            Oaep::new_with_label::<Sha256, _>(IDENTITY_LABEL),
            &seed,
        )
        .context("failed to encrypt credential seed")?;

    // encIdentity = CFB(symKey, TPM2B(credential_value))
    let mut enc_identity = Vec::with_capacity(2 + credential_value.len());
    enc_identity.extend_from_slice(&(credential_value.len() as u16).to_be_bytes());
    enc_identity.extend_from_slice(credential_value);
    let sym_key = kdf_a(&seed, STORAGE_LABEL, object_name, &[], 128)?;
    cipher::aes128_cfb_encrypt(&sym_key, &mut enc_identity)?;

    let hmac_key = kdf_a(&seed, INTEGRITY_LABEL, &[], &[], 256)?;
    let mut mac = <Hmac<Sha256>>::new_from_slice(&hmac_key).context("bad integrity key")?;
    mac.update(&enc_identity);
    mac.update(object_name);
    let integrity = mac.finalize().into_bytes();

    let mut credential = Vec::with_capacity(2 + integrity.len() + enc_identity.len());
    credential.extend_from_slice(&(integrity.len() as u16).to_be_bytes());
    credential.extend_from_slice(&integrity);
    credential.extend_from_slice(&enc_identity);

    Ok(CredentialBlob { credential, secret })
}

/// The inverse of [`make_credential`], as a TPM would perform it.
pub fn activate_credential(
    ek_private: &RsaPrivateKey,
    object_name: &[u8],
    blob: &CredentialBlob,
) -> Result<Vec<u8>> {
    let seed = ek_private
        .decrypt(Oaep::new_with_label::<Sha256, _>(IDENTITY_LABEL), &blob.secret)
        .context("failed to decrypt credential seed")?;

    if blob.credential.len() < 2 {
        bail!("credential blob too short");
    }
    let integrity_len = u16::from_be_bytes([blob.credential[0], blob.credential[1]]) as usize;
    if blob.credential.len() < 2 + integrity_len {
        bail!("credential blob truncated");
    }
    let integrity = &blob.credential[2..2 + integrity_len];
    let enc_identity = &blob.credential[2 + integrity_len..];

    let hmac_key = kdf_a(&seed, INTEGRITY_LABEL, &[], &[], 256)?;
    let mut mac = <Hmac<Sha256>>::new_from_slice(&hmac_key).context("bad integrity key")?;
    mac.update(enc_identity);
    mac.update(object_name);
    mac.verify_slice(integrity)
        .context("credential integrity check failed")?;

    let sym_key = kdf_a(&seed, STORAGE_LABEL, object_name, &[], 128)?;
    let mut inner = enc_identity.to_vec();
    cipher::aes128_cfb_decrypt(&sym_key, &mut inner)?;

    if inner.len() < 2 {
        bail!("credential value truncated");
    }
    let value_len = u16::from_be_bytes([inner[0], inner[1]]) as usize;
    if inner.len() < 2 + value_len {
        bail!("credential value truncated");
    }
    Ok(inner[2..2 + value_len].to_vec())
}

/// Seal an arbitrary payload for the EK-owning TPM: the payload is encrypted
/// under a fresh AES-256-CBC key and that key becomes the credential value.
pub fn seal_payload(
    ek_public: &RsaPublicKey,
    object_name: &[u8],
    payload: &[u8],
) -> Result<IdentityProofRequest> {
    let mut key = [0u8; cipher::AES256_KEY_LEN];
    OsRng
        .try_fill_bytes(&mut key)
        .context("failed to draw payload key")?;
    let mut iv = [0u8; cipher::CBC_IV_LEN];
    OsRng.try_fill_bytes(&mut iv).context("failed to draw IV")?;

    let ciphertext = cipher::aes256_cbc_encrypt(&key, &iv, payload)?;
    let blob = make_credential(ek_public, object_name, &key)?;

    let mut sym_blob = iv.to_vec();
    sym_blob.extend_from_slice(&ciphertext);
    Ok(IdentityProofRequest {
        secret: blob.secret,
        credential: blob.credential,
        sym_blob,
    })
}

/// Recover a payload sealed with [`seal_payload`] (host side).
pub fn open_payload(
    ek_private: &RsaPrivateKey,
    object_name: &[u8],
    proof: &IdentityProofRequest,
) -> Result<Vec<u8>> {
    let key = activate_credential(
        ek_private,
        object_name,
        &CredentialBlob {
            credential: proof.credential.clone(),
            secret: proof.secret.clone(),
        },
    )?;
    if proof.sym_blob.len() < cipher::CBC_IV_LEN {
        bail!("symmetric blob too short");
    }
    let (iv, ciphertext) = proof.sym_blob.split_at(cipher::CBC_IV_LEN);
    cipher::aes256_cbc_decrypt(&key, iv, ciphertext)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ek_key() -> &'static RsaPrivateKey {
        static KEY: std::sync::OnceLock<RsaPrivateKey> = std::sync::OnceLock::new();
        KEY.get_or_init(|| RsaPrivateKey::new(&mut rand::thread_rng(), 2048).expect("generate key"))
    }

    #[test]
    fn kdf_a_is_deterministic_and_length_exact() {
        let k1 = kdf_a(b"seed", STORAGE_LABEL, b"name", &[], 128).unwrap();
        let k2 = kdf_a(b"seed", STORAGE_LABEL, b"name", &[], 128).unwrap();
        assert_eq!(k1, k2);
        assert_eq!(k1.len(), 16);
        assert_eq!(kdf_a(b"seed", INTEGRITY_LABEL, &[], &[], 256).unwrap().len(), 32);
        assert_ne!(
            kdf_a(b"seed", STORAGE_LABEL, b"name-a", &[], 128).unwrap(),
            kdf_a(b"seed", STORAGE_LABEL, b"name-b", &[], 128).unwrap()
        );
    }

    #[test]
    fn credential_round_trip() {
        let ek = ek_key();
        let name = b"\x00\x0baik-object-name";
        let value = [0xabu8; 32];
        let blob = make_credential(&ek.to_public_key(), name, &value).unwrap();
        let recovered = activate_credential(ek, name, &blob).unwrap();
        assert_eq!(recovered, value);
    }

    #[test]
    fn activation_fails_for_wrong_object_name() {
        let ek = ek_key();
        let blob = make_credential(&ek.to_public_key(), b"name-a", &[0x01; 32]).unwrap();
        assert!(activate_credential(ek, b"name-b", &blob).is_err());
    }

    #[test]
    fn activation_fails_for_tampered_credential() {
        let ek = ek_key();
        let mut blob = make_credential(&ek.to_public_key(), b"name", &[0x01; 32]).unwrap();
        let last = blob.credential.len() - 1;
        blob.credential[last] ^= 0xff;
        assert!(activate_credential(ek, b"name", &blob).is_err());
    }

    #[test]
    fn sealed_payload_round_trip() {
        let ek = ek_key();
        let payload = b"certificate bytes or challenge nonce";
        let proof = seal_payload(&ek.to_public_key(), b"aik-name", payload).unwrap();
        let recovered = open_payload(ek, b"aik-name", &proof).unwrap();
        assert_eq!(recovered, payload);
    }

    #[test]
    fn empty_credential_value_is_rejected() {
        let ek = ek_key();
        assert!(make_credential(&ek.to_public_key(), b"name", &[]).is_err());
    }
}
