// SPDX-License-Identifier: Apache-2.0

//! Wire types of the privacy-CA identity protocol.

use serde::{Deserialize, Serialize};

/// The AIK material produced by the host's TPM at enrollment time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRequest {
    /// RSA public modulus of the AIK (2048 bit, exponent 65537).
    #[serde(with = "serde_human_bytes")]
    pub aik_modulus: Vec<u8>,
    /// TPM-assigned name of the AIK (digest of its public area).
    #[serde(with = "serde_human_bytes")]
    pub aik_name: Vec<u8>,
    /// Opaque marshaled public area, carried through untouched.
    #[serde(with = "serde_human_bytes", default)]
    pub aik_public: Vec<u8>,
}

/// Envelope submitted by the host in both protocol rounds.
///
/// `asym_blob` is decryptable only by the privacy-CA private key and yields
/// a symmetric key; that key unwraps `sym_blob`, whose plaintext is the EK
/// certificate DER in round one and the recovered challenge nonce in round
/// two.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityChallengePayload {
    pub identity_request: IdentityRequest,
    #[serde(with = "serde_human_bytes")]
    pub asym_blob: Vec<u8>,
    #[serde(with = "serde_human_bytes")]
    pub sym_blob: Vec<u8>,
}

/// The privacy CA's answer in both rounds: a TPM credential that only the
/// EK-owning TPM can activate, plus the payload sealed under the credential
/// value (the challenge nonce in round one, the AIK certificate in round
/// two).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityProofRequest {
    /// OAEP-wrapped credential seed (`TPM2B_ENCRYPTED_SECRET` contents).
    #[serde(with = "serde_human_bytes")]
    pub secret: Vec<u8>,
    /// Integrity-protected credential blob (`TPM2B_ID_OBJECT` contents).
    #[serde(with = "serde_human_bytes")]
    pub credential: Vec<u8>,
    /// `IV ‖ AES-256-CBC` ciphertext of the payload, keyed by the credential
    /// value.
    #[serde(with = "serde_human_bytes")]
    pub sym_blob: Vec<u8>,
}
