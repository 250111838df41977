// SPDX-License-Identifier: Apache-2.0

//! The host → privacy-CA envelope used in both protocol rounds.
//!
//! `asym_blob` is RSA-OAEP(SHA-256) under the privacy-CA public key and
//! transports a fresh AES-256 key; `sym_blob` is `IV ‖ CBC ciphertext` of
//! the actual payload. Both directions live here so agents and tests can
//! build envelopes the same way the server opens them.

use anyhow::{bail, Context, Result};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

use trustd_types::{IdentityChallengePayload, IdentityRequest};

use crate::cipher;

/// Build a round-one or round-two envelope (host side).
pub fn seal_challenge_payload(
    pca_public: &RsaPublicKey,
    identity_request: IdentityRequest,
    payload: &[u8],
) -> Result<IdentityChallengePayload> {
    let mut key = [0u8; cipher::AES256_KEY_LEN];
    OsRng
        .try_fill_bytes(&mut key)
        .context("failed to draw envelope key")?;
    let mut iv = [0u8; cipher::CBC_IV_LEN];
    OsRng.try_fill_bytes(&mut iv).context("failed to draw IV")?;

    let asym_blob = pca_public
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), &key)
        .context("failed to wrap envelope key")?;
    let ciphertext = cipher::aes256_cbc_encrypt(&key, &iv, payload)?;

    let mut sym_blob = iv.to_vec();
    sym_blob.extend_from_slice(&ciphertext);
    Ok(IdentityChallengePayload {
        identity_request,
        asym_blob,
        sym_blob,
    })
}

/// Open an envelope with the privacy-CA private key (server side).
pub fn open_challenge_payload(
    pca_private: &RsaPrivateKey,
    payload: &IdentityChallengePayload,
) -> Result<Vec<u8>> {
    let key = pca_private
        .decrypt(Oaep::new::<Sha256>(), &payload.asym_blob)
        .context("failed to unwrap envelope key")?;
    if key.len() != cipher::AES256_KEY_LEN {
        bail!("unexpected envelope key length {}", key.len());
    }
    if payload.sym_blob.len() < cipher::CBC_IV_LEN {
        bail!("symmetric blob too short");
    }
    let (iv, ciphertext) = payload.sym_blob.split_at(cipher::CBC_IV_LEN);
    cipher::aes256_cbc_decrypt(&key, iv, ciphertext)
}
