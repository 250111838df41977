// SPDX-License-Identifier: Apache-2.0

//! Privacy CA: proves that a host owns both an endorsement key and a freshly
//! generated AIK, and issues the AIK certificate.
//!
//! The protocol is a strict two-round exchange. Round one decrypts the
//! host's envelope to the EK certificate, validates it against the
//! endorsement authorities, and answers with a TPM credential that only the
//! EK-owning TPM can activate. Round two proves the activation by returning
//! the challenge nonce and is answered with the AIK certificate, sealed the
//! same way. The only state between rounds is the on-disk challenge record.

mod challenge;
mod cipher;
mod credential;
mod ek;
mod engine;
mod envelope;

pub use challenge::{ChallengeRecord, ChallengeStore};
pub use credential::{activate_credential, make_credential, open_payload, seal_payload, CredentialBlob};
pub use ek::{common_name, normalized_issuer, EkTrustStatus, EndorsementAuthority};
pub use engine::{PrivacyCa, PrivacyCaConfig};
pub use envelope::{open_challenge_payload, seal_challenge_payload};
