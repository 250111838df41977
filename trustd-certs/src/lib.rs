// SPDX-License-Identifier: Apache-2.0

//! Certificate and key provider.
//!
//! Certificates and keys are kept on disk, one PEM bundle (and optionally
//! one PKCS#8 key) per role. The whole set is loaded into memory at startup
//! and can be re-read atomically with [`CertStore::reload`]: readers either
//! see the previous snapshot or the new one, never a mix.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::{bail, Context, Result};
use rsa::pkcs8::DecodePrivateKey;
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub mod issue;

/// Roles a certificate (and key) can be provisioned under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertRole {
    RootCa,
    EndorsementCa,
    PrivacyCa,
    TagCa,
    SamlSigning,
    Tls,
    FlavorSigning,
}

impl CertRole {
    pub const ALL: [CertRole; 7] = [
        CertRole::RootCa,
        CertRole::EndorsementCa,
        CertRole::PrivacyCa,
        CertRole::TagCa,
        CertRole::SamlSigning,
        CertRole::Tls,
        CertRole::FlavorSigning,
    ];

    /// File stem used for this role inside the provider directory.
    pub fn file_stem(&self) -> &'static str {
        match self {
            CertRole::RootCa => "root-ca",
            CertRole::EndorsementCa => "endorsement-ca",
            CertRole::PrivacyCa => "privacy-ca",
            CertRole::TagCa => "tag-ca",
            CertRole::SamlSigning => "saml-signing",
            CertRole::Tls => "tls",
            CertRole::FlavorSigning => "flavor-signing",
        }
    }
}

/// One role's on-disk material: the certificate chain (leaf first) and, for
/// signing roles, the private key PEM.
#[derive(Debug, Clone)]
pub struct CertEntry {
    pub path: PathBuf,
    /// DER-encoded certificates, leaf first.
    pub certificates: Vec<Vec<u8>>,
    /// PKCS#8 PEM of the role's private key, when provisioned.
    pub key_pem: Option<String>,
}

/// Role-keyed certificate/key provider.
pub struct CertStore {
    base_dir: PathBuf,
    entries: RwLock<HashMap<CertRole, CertEntry>>,
}

impl CertStore {
    /// Load every provisioned role from `base_dir`. Roles without a
    /// `<stem>.pem` file are simply absent.
    pub fn load(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        let entries = Self::read_entries(&base_dir)?;
        Ok(Self {
            base_dir,
            entries: RwLock::new(entries),
        })
    }

    /// Re-read all roles from disk and swap the snapshot in one step.
    pub fn reload(&self) -> Result<()> {
        let fresh = Self::read_entries(&self.base_dir)?;
        *self.entries.write().unwrap() = fresh;
        Ok(())
    }

    fn read_entries(base_dir: &Path) -> Result<HashMap<CertRole, CertEntry>> {
        let mut entries = HashMap::new();
        for role in CertRole::ALL {
            let cert_path = base_dir.join(format!("{}.pem", role.file_stem()));
            if !cert_path.exists() {
                continue;
            }
            let pem_data = fs_err::read(&cert_path)
                .with_context(|| format!("failed to read {}", cert_path.display()))?;
            let blocks = pem::parse_many(&pem_data)
                .with_context(|| format!("failed to parse {}", cert_path.display()))?;
            let certificates: Vec<Vec<u8>> = blocks
                .iter()
                .filter(|b| b.tag() == "CERTIFICATE")
                .map(|b| b.contents().to_vec())
                .collect();
            if certificates.is_empty() {
                bail!("no certificates in {}", cert_path.display());
            }

            let key_path = base_dir.join(format!("{}.key", role.file_stem()));
            let key_pem = if key_path.exists() {
                Some(
                    fs_err::read_to_string(&key_path)
                        .with_context(|| format!("failed to read {}", key_path.display()))?,
                )
            } else {
                None
            };

            debug!(
                role = role.file_stem(),
                certificates = certificates.len(),
                has_key = key_pem.is_some(),
                "loaded certificate entry"
            );
            entries.insert(
                role,
                CertEntry {
                    path: cert_path,
                    certificates,
                    key_pem,
                },
            );
        }
        Ok(entries)
    }

    pub fn entry(&self, role: CertRole) -> Result<CertEntry> {
        self.entries
            .read()
            .unwrap()
            .get(&role)
            .cloned()
            .with_context(|| format!("no certificate provisioned for role {}", role.file_stem()))
    }

    /// All DER certificates of a role, leaf first.
    pub fn certificates(&self, role: CertRole) -> Result<Vec<Vec<u8>>> {
        Ok(self.entry(role)?.certificates)
    }

    /// The leaf certificate of a role.
    pub fn leaf(&self, role: CertRole) -> Result<Vec<u8>> {
        let entry = self.entry(role)?;
        entry
            .certificates
            .first()
            .cloned()
            .with_context(|| format!("empty certificate chain for role {}", role.file_stem()))
    }

    /// Parse the role's PKCS#8 private key. Parsed on every call so a
    /// `reload` takes effect immediately.
    pub fn private_key(&self, role: CertRole) -> Result<RsaPrivateKey> {
        let entry = self.entry(role)?;
        let pem = entry
            .key_pem
            .with_context(|| format!("no private key provisioned for role {}", role.file_stem()))?;
        RsaPrivateKey::from_pkcs8_pem(&pem)
            .with_context(|| format!("failed to parse PKCS#8 key for role {}", role.file_stem()))
    }

    /// The role's raw key PEM, for consumers that do their own parsing.
    pub fn key_pem(&self, role: CertRole) -> Result<String> {
        self.entry(role)?
            .key_pem
            .with_context(|| format!("no private key provisioned for role {}", role.file_stem()))
    }
}
