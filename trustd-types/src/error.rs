// SPDX-License-Identifier: Apache-2.0

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error kinds surfaced by the attestation core.
///
/// The variants map onto caller-visible classes: `InvalidInput`,
/// `EkUntrusted` and `UnknownChallenge` are client errors, the rest are
/// server-side failures. Policy misses are never errors; they surface as
/// untrusted rule results inside a [`crate::TrustReport`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("endorsement certificate is not trusted")]
    EkUntrusted,

    #[error("unknown or already consumed identity challenge")]
    UnknownChallenge,

    #[error("store access failed: {0}")]
    Storage(#[source] anyhow::Error),

    #[error("cryptographic operation failed: {0}")]
    Crypto(#[source] anyhow::Error),

    #[error("host connector I/O failed: {0}")]
    HostUnreachable(#[source] anyhow::Error),
}

impl Error {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    pub fn storage(err: impl Into<anyhow::Error>) -> Self {
        Error::Storage(err.into())
    }

    pub fn crypto(err: impl Into<anyhow::Error>) -> Self {
        Error::Crypto(err.into())
    }

    pub fn host_unreachable(err: impl Into<anyhow::Error>) -> Self {
        Error::HostUnreachable(err.into())
    }

    /// Whether the caller is at fault (maps to a 4xx at the HTTP layer).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidInput(_) | Error::EkUntrusted | Error::UnknownChallenge
        )
    }
}
