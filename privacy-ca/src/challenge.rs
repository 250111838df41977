// SPDX-License-Identifier: Apache-2.0

//! On-disk challenge records.
//!
//! Each in-flight challenge is a triple of files in one flat directory,
//! keyed by the hex of the 32-byte nonce: the bare name holds the AIK
//! modulus, `.opt` the AIK name, `.ekcert` the EK certificate DER. The
//! directory is created with mode 0700 and each file with 0400. A record is
//! valid only when all three files exist and are non-empty.

use std::io::Write as _;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use tracing::{debug, warn};

const NONCE_HEX_LEN: usize = 64;

/// The fields persisted for one round-one challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeRecord {
    pub ek_cert_der: Vec<u8>,
    pub aik_modulus: Vec<u8>,
    pub aik_name: Vec<u8>,
}

/// Flat directory of challenge records, shared process-wide.
pub struct ChallengeStore {
    dir: PathBuf,
}

impl ChallengeStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn ensure_dir(&self) -> Result<()> {
        if !self.dir.exists() {
            fs_err::create_dir_all(&self.dir)
                .with_context(|| format!("failed to create {}", self.dir.display()))?;
        }
        fs_err::set_permissions(&self.dir, std::fs::Permissions::from_mode(0o700))
            .with_context(|| format!("failed to restrict {}", self.dir.display()))?;
        Ok(())
    }

    /// Persist a fresh record under `hex(nonce)`.
    pub fn store(&self, nonce: &[u8], record: &ChallengeRecord) -> Result<()> {
        self.ensure_dir()?;
        let stem = hex::encode(nonce);
        write_protected(&self.dir.join(&stem), &record.aik_modulus)?;
        write_protected(&self.dir.join(format!("{stem}.opt")), &record.aik_name)?;
        write_protected(&self.dir.join(format!("{stem}.ekcert")), &record.ek_cert_der)?;
        debug!(stem, "stored challenge record");
        Ok(())
    }

    /// Load the record for a nonce. `Ok(None)` covers everything that should
    /// read as "no such challenge": malformed identifiers, missing files,
    /// empty files.
    pub fn load(&self, nonce_hex: &str) -> Result<Option<ChallengeRecord>> {
        if !valid_stem(nonce_hex) {
            return Ok(None);
        }
        let aik_modulus = match read_part(&self.dir.join(nonce_hex))? {
            Some(data) => data,
            None => return Ok(None),
        };
        let aik_name = match read_part(&self.dir.join(format!("{nonce_hex}.opt")))? {
            Some(data) => data,
            None => return Ok(None),
        };
        let ek_cert_der = match read_part(&self.dir.join(format!("{nonce_hex}.ekcert")))? {
            Some(data) => data,
            None => return Ok(None),
        };
        Ok(Some(ChallengeRecord {
            ek_cert_der,
            aik_modulus,
            aik_name,
        }))
    }

    /// Remove a consumed record. Missing files are not an error; the record
    /// may already be partially gone.
    pub fn remove(&self, nonce_hex: &str) -> Result<()> {
        if !valid_stem(nonce_hex) {
            return Ok(());
        }
        for name in [
            nonce_hex.to_string(),
            format!("{nonce_hex}.opt"),
            format!("{nonce_hex}.ekcert"),
        ] {
            match fs_err::remove_file(self.dir.join(&name)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e).with_context(|| format!("failed to remove {name}")),
            }
        }
        Ok(())
    }

    /// Drop records older than `max_age`. Returns the number of files
    /// removed. Round-one records accumulate until consumed; this is the
    /// garbage collector for hosts that never completed round two.
    pub fn sweep_older_than(&self, max_age: Duration) -> Result<usize> {
        if !self.dir.exists() {
            return Ok(0);
        }
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut removed = 0;
        for entry in fs_err::read_dir(&self.dir)? {
            let entry = entry?;
            let modified = match entry.metadata().and_then(|m| m.modified()) {
                Ok(t) => t,
                Err(e) => {
                    warn!("skipping unreadable challenge file: {e}");
                    continue;
                }
            };
            if modified < cutoff {
                match fs_err::remove_file(entry.path()) {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => warn!("failed to sweep challenge file: {e}"),
                }
            }
        }
        Ok(removed)
    }
}

fn valid_stem(stem: &str) -> bool {
    stem.len() == NONCE_HEX_LEN && stem.bytes().all(|b| b.is_ascii_hexdigit())
}

fn write_protected(path: &Path, data: &[u8]) -> Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o400)
        .open(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    file.write_all(data)
        .with_context(|| format!("failed to write {}", path.display()))
}

fn read_part(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs_err::read(path) {
        Ok(data) if data.is_empty() => Ok(None),
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).context("failed to read challenge record"),
    }
}
