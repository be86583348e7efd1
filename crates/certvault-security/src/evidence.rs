// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Evidence store: fingerprint, encrypt, and write uploaded evidence under a
// content-derived filename. Nothing here touches the network or a database;
// the caller persists the returned `StorageRecord` however it likes.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use certvault_core::error::CertVaultError;
use certvault_core::types::{Fingerprint, StorageRecord};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument};

use crate::integrity::{fingerprint, verify_fingerprint};
use crate::vault::EncryptionVault;

/// Number of fingerprint hex characters embedded in the filename.
pub const FINGERPRINT_PREFIX_LEN: usize = 12;

/// Suffix marking a file as vault ciphertext.
pub const CIPHERTEXT_SUFFIX: &str = "enc";

/// Used when a naming hint sanitizes down to nothing.
const FALLBACK_HINT: &str = "evidence";

/// Longest hint kept in a filename, well under any filesystem's NAME_MAX.
pub const MAX_HINT_CHARS: usize = 64;

/// How ciphertext filenames are derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileNaming {
    /// `<hint>_<prefix12>.enc`. Two uploads with the same hint and prefix
    /// overwrite one another.
    Compatible,
    /// `<hint>_<prefix12>_<random8>.enc`; every upload gets its own file.
    #[default]
    Unique,
}

/// Writes encrypted evidence into a single storage directory.
pub struct EvidenceStore<'v> {
    root: PathBuf,
    vault: &'v EncryptionVault,
    naming: FileNaming,
}

impl<'v> EvidenceStore<'v> {
    pub fn new(root: impl Into<PathBuf>, vault: &'v EncryptionVault) -> Self {
        Self {
            root: root.into(),
            vault,
            naming: FileNaming::default(),
        }
    }

    pub fn with_naming(mut self, naming: FileNaming) -> Self {
        self.naming = naming;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Fingerprint `raw_bytes`, encrypt them, and write the ciphertext.
    ///
    /// Any existing file at the derived path is replaced. The write goes
    /// through a staging file plus rename, so a failure never leaves a
    /// truncated `.enc` behind.
    #[instrument(skip(self, raw_bytes), fields(len = raw_bytes.len(), root = %self.root.display()))]
    pub fn store_encrypted(
        &self,
        raw_bytes: &[u8],
        naming_hint: &str,
    ) -> Result<StorageRecord, CertVaultError> {
        let fingerprint = fingerprint(raw_bytes);
        let file_name = self.file_name(naming_hint, &fingerprint);

        fs::create_dir_all(&self.root).map_err(|e| {
            CertVaultError::Storage(format!("create {}: {e}", self.root.display()))
        })?;

        let ciphertext = self.vault.encrypt(raw_bytes)?;

        let storage_path = self.root.join(&file_name);
        write_replacing(&storage_path, &ciphertext)
            .map_err(|e| CertVaultError::Storage(format!("write {}: {e}", storage_path.display())))?;

        info!(
            file = %file_name,
            fingerprint = %fingerprint.prefix(FINGERPRINT_PREFIX_LEN),
            ciphertext_len = ciphertext.len(),
            "evidence stored"
        );

        Ok(StorageRecord {
            storage_path,
            fingerprint,
        })
    }

    /// Read a stored ciphertext back and decrypt it, checking the plaintext
    /// against `expected` when given.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn load_decrypted(
        &self,
        path: impl AsRef<Path>,
        expected: Option<&Fingerprint>,
    ) -> Result<Vec<u8>, CertVaultError> {
        let path = path.as_ref();
        let ciphertext = fs::read(path)
            .map_err(|e| CertVaultError::Storage(format!("read {}: {e}", path.display())))?;

        let plaintext = self.vault.decrypt(&ciphertext)?;
        if let Some(expected) = expected {
            verify_fingerprint(&plaintext, expected)?;
        }

        debug!(plaintext_len = plaintext.len(), "evidence loaded");
        Ok(plaintext)
    }

    fn file_name(&self, naming_hint: &str, fingerprint: &Fingerprint) -> String {
        let hint = sanitize_hint(naming_hint);
        let prefix = fingerprint.prefix(FINGERPRINT_PREFIX_LEN);
        match self.naming {
            FileNaming::Compatible => format!("{hint}_{prefix}.{CIPHERTEXT_SUFFIX}"),
            FileNaming::Unique => {
                let unique = uuid::Uuid::new_v4().simple().to_string();
                format!("{hint}_{prefix}_{}.{CIPHERTEXT_SUFFIX}", &unique[..8])
            }
        }
    }
}

/// Reduce a caller-supplied hint to something that stays inside the storage
/// directory: `[A-Za-z0-9._-]` pass through, everything else becomes `_`,
/// and only the first [`MAX_HINT_CHARS`] characters are kept.
pub fn sanitize_hint(hint: &str) -> String {
    let cleaned: String = hint
        .trim()
        .chars()
        .take(MAX_HINT_CHARS)
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.chars().all(|c| c == '.') {
        FALLBACK_HINT.to_owned()
    } else {
        cleaned
    }
}

/// Stage `bytes` in a temp file beside `path`, then move it over `path`.
/// The temp file is removed on drop if anything fails first.
fn write_replacing(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut staged = NamedTempFile::new_in(dir)?;
    staged.write_all(bytes)?;
    staged.as_file().sync_all()?;
    staged.persist(path).map_err(|e| e.error)?;
    Ok(())
}
