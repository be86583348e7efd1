// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Encryption vault: AES-256-GCM (via `ring`) under a single 256-bit key that
// is read from a local key file, or generated and persisted the first time.
//
// Ciphertext layout: nonce (12 bytes) || sealed payload || tag (16 bytes).
//
// Key file publication is create-if-absent: the fresh key is written to a
// temp file in the same directory and persisted without clobbering, which
// fails if the target already exists. A process that loses the race throws its key away
// and reads the winner's, so every process sees the same key.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;

use certvault_core::error::CertVaultError;
use ring::aead::{AES_256_GCM, Aad, LessSafeKey, NONCE_LEN, Nonce, UnboundKey};
use ring::rand::{SecureRandom, SystemRandom};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument, warn};

/// Raw key length in bytes (256 bits).
pub const KEY_LEN: usize = 32;

/// Smallest possible ciphertext: nonce plus tag around an empty payload.
const MIN_CIPHERTEXT_LEN: usize = NONCE_LEN + 16;

/// The vault's symmetric key. Immutable once loaded.
#[derive(Clone)]
pub struct VaultKey {
    bytes: [u8; KEY_LEN],
}

impl VaultKey {
    /// Generate a fresh key from the OS CSPRNG.
    pub fn generate() -> Result<Self, CertVaultError> {
        let rng = SystemRandom::new();
        let mut bytes = [0u8; KEY_LEN];
        rng.fill(&mut bytes)
            .map_err(|_| CertVaultError::Configuration("system RNG unavailable".into()))?;
        Ok(Self { bytes })
    }

    /// Wrap existing key material, which must be exactly 32 bytes.
    pub fn from_bytes(raw: &[u8]) -> Result<Self, CertVaultError> {
        let bytes: [u8; KEY_LEN] = raw.try_into().map_err(|_| {
            CertVaultError::Configuration(format!(
                "vault key must be {KEY_LEN} bytes, found {}",
                raw.len()
            ))
        })?;
        Ok(Self { bytes })
    }

    fn aead_key(&self) -> LessSafeKey {
        let unbound = UnboundKey::new(&AES_256_GCM, &self.bytes)
            .unwrap_or_else(|_| unreachable!("AES-256-GCM accepts any 32-byte key"));
        LessSafeKey::new(unbound)
    }
}

impl std::fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("VaultKey(<redacted>)")
    }
}

/// Authenticated encryption of evidence bytes under one vault key.
///
/// Built once at startup and handed by reference to whatever needs it.
pub struct EncryptionVault {
    key: VaultKey,
    rng: SystemRandom,
}

impl EncryptionVault {
    pub fn new(key: VaultKey) -> Self {
        Self {
            key,
            rng: SystemRandom::new(),
        }
    }

    /// Load the key at `path`, creating it first if absent, and build a vault.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CertVaultError> {
        Ok(Self::new(load_or_create_key(path)?))
    }

    pub fn key(&self) -> &VaultKey {
        &self.key
    }

    /// Encrypt `plaintext` under a fresh random nonce.
    ///
    /// Encrypting the same plaintext twice gives two different ciphertexts.
    #[instrument(skip_all, fields(plaintext_len = plaintext.len()))]
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CertVaultError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| CertVaultError::Encryption("system RNG unavailable".into()))?;

        let mut in_out = plaintext.to_vec();
        self.key
            .aead_key()
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::empty(),
                &mut in_out,
            )
            .map_err(|_| CertVaultError::Encryption("AES-256-GCM seal failed".into()))?;

        let mut ciphertext = Vec::with_capacity(NONCE_LEN + in_out.len());
        ciphertext.extend_from_slice(&nonce_bytes);
        ciphertext.extend_from_slice(&in_out);

        debug!(ciphertext_len = ciphertext.len(), "encryption complete");
        Ok(ciphertext)
    }

    /// Decrypt output of [`encrypt`](Self::encrypt).
    ///
    /// Tampered, truncated, or foreign-key ciphertext fails with
    /// `CertVaultError::Decryption`; it never yields partial plaintext.
    #[instrument(skip_all, fields(ciphertext_len = ciphertext.len()))]
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CertVaultError> {
        if ciphertext.len() < MIN_CIPHERTEXT_LEN {
            return Err(CertVaultError::Decryption);
        }

        let (nonce_bytes, sealed) = ciphertext.split_at(NONCE_LEN);
        let nonce =
            Nonce::try_assume_unique_for_key(nonce_bytes).map_err(|_| CertVaultError::Decryption)?;

        let mut in_out = sealed.to_vec();
        let plaintext_len = self
            .key
            .aead_key()
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| CertVaultError::Decryption)?
            .len();
        in_out.truncate(plaintext_len);

        debug!(plaintext_len, "decryption complete");
        Ok(in_out)
    }
}

/// Read the vault key at `path`, or generate and persist one if the file does
/// not exist yet.
///
/// Repeated calls against the same path always return the same key.
#[instrument(skip_all, fields(path = %path.as_ref().display()))]
pub fn load_or_create_key(path: impl AsRef<Path>) -> Result<VaultKey, CertVaultError> {
    let path = path.as_ref();

    match fs::read(path) {
        Ok(raw) => {
            debug!("vault key loaded");
            return VaultKey::from_bytes(&raw);
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
            return Err(CertVaultError::Configuration(format!(
                "cannot read key file {}: {e}",
                path.display()
            )));
        }
    }

    let key = VaultKey::generate()?;
    if publish_key(path, &key)? {
        info!("generated new vault key");
        Ok(key)
    } else {
        // Another process published first; theirs is authoritative.
        warn!("vault key created concurrently, using the existing one");
        let raw = fs::read(path).map_err(|e| {
            CertVaultError::Configuration(format!("cannot read key file {}: {e}", path.display()))
        })?;
        VaultKey::from_bytes(&raw)
    }
}

/// Atomically create `path` holding `key`. Returns `false` if it already
/// existed, leaving that file untouched.
fn publish_key(path: &Path, key: &VaultKey) -> Result<bool, CertVaultError> {
    let config_err = |what: &str, e: std::io::Error| {
        CertVaultError::Configuration(format!("cannot {what} key file {}: {e}", path.display()))
    };

    let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => {
            fs::create_dir_all(parent).map_err(|e| config_err("prepare directory for", e))?;
            parent
        }
        None => Path::new("."),
    };

    let mut staged = NamedTempFile::new_in(dir).map_err(|e| config_err("stage", e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        staged
            .as_file()
            .set_permissions(fs::Permissions::from_mode(0o600))
            .map_err(|e| config_err("restrict", e))?;
    }
    staged
        .write_all(&key.bytes)
        .and_then(|()| staged.as_file().sync_all())
        .map_err(|e| config_err("write", e))?;

    match staged.persist_noclobber(path) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(config_err("publish", e.error)),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn vault() -> EncryptionVault {
        EncryptionVault::new(VaultKey::generate().expect("keygen failed"))
    }

    #[test]
    fn round_trip() {
        let vault = vault();
        let plaintext = b"screenshot of phishing page";

        let ciphertext = vault.encrypt(plaintext).expect("encrypt failed");
        assert_ne!(&ciphertext[NONCE_LEN..], plaintext.as_slice());

        let decrypted = vault.decrypt(&ciphertext).expect("decrypt failed");
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn empty_plaintext() {
        let vault = vault();
        let ciphertext = vault.encrypt(b"").expect("encrypt failed");
        assert_eq!(ciphertext.len(), MIN_CIPHERTEXT_LEN);
        let decrypted = vault.decrypt(&ciphertext).expect("decrypt failed");
        assert!(decrypted.is_empty());
    }

    #[test]
    fn same_plaintext_encrypts_differently() {
        let vault = vault();
        let a = vault.encrypt(b"same bytes").unwrap();
        let b = vault.encrypt(b"same bytes").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn tampered_byte_fails() {
        let vault = vault();
        let ciphertext = vault.encrypt(b"evidence").unwrap();

        for i in 0..ciphertext.len() {
            let mut tampered = ciphertext.clone();
            tampered[i] ^= 0x01;
            assert!(
                matches!(vault.decrypt(&tampered), Err(CertVaultError::Decryption)),
                "flipping byte {i} must be detected"
            );
        }
    }

    #[test]
    fn truncated_ciphertext_fails() {
        let vault = vault();
        let ciphertext = vault.encrypt(b"evidence").unwrap();
        assert!(vault.decrypt(&ciphertext[..ciphertext.len() - 1]).is_err());
        assert!(vault.decrypt(&ciphertext[..5]).is_err());
        assert!(vault.decrypt(&[]).is_err());
    }

    #[test]
    fn wrong_key_fails() {
        let ciphertext = vault().encrypt(b"secret").unwrap();
        assert!(matches!(vault().decrypt(&ciphertext), Err(CertVaultError::Decryption)));
    }

    #[test]
    fn key_file_is_created_then_reused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.key");

        let first = load_or_create_key(&path).unwrap();
        assert_eq!(fs::read(&path).unwrap().len(), KEY_LEN);

        let second = load_or_create_key(&path).unwrap();
        assert_eq!(first.bytes, second.bytes);

        // Ciphertext from one "process start" opens after the next.
        let ciphertext = EncryptionVault::new(first).encrypt(b"persisted").unwrap();
        let reopened = EncryptionVault::open(&path).unwrap();
        assert_eq!(reopened.decrypt(&ciphertext).unwrap(), b"persisted");
    }

    #[test]
    fn key_file_in_missing_directory_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("secret.key");
        load_or_create_key(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn no_staging_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        load_or_create_key(dir.path().join("secret.key")).unwrap();
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn publishing_over_an_existing_key_keeps_the_original() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.key");
        let winner = VaultKey::generate().unwrap();
        let loser = VaultKey::generate().unwrap();

        assert!(publish_key(&path, &winner).unwrap());
        assert!(!publish_key(&path, &loser).unwrap());
        assert_eq!(fs::read(&path).unwrap(), winner.bytes);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.key");
        load_or_create_key(&path).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn malformed_key_file_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.key");
        fs::write(&path, b"too short").unwrap();

        assert!(matches!(
            load_or_create_key(&path),
            Err(CertVaultError::Configuration(_))
        ));
        // The bad file is reported, never replaced.
        assert_eq!(fs::read(&path).unwrap(), b"too short");
    }

    #[test]
    fn key_path_that_is_a_directory_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_or_create_key(dir.path()),
            Err(CertVaultError::Configuration(_))
        ));
    }

    #[test]
    fn concurrent_creators_agree_on_one_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = Arc::new(dir.path().join("secret.key"));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let path = Arc::clone(&path);
                std::thread::spawn(move || load_or_create_key(path.as_path()).unwrap())
            })
            .collect();
        let keys: Vec<VaultKey> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let on_disk = fs::read(path.as_path()).unwrap();
        for key in keys {
            assert_eq!(key.bytes.as_slice(), on_disk.as_slice());
        }
    }

    #[test]
    fn debug_output_is_redacted() {
        let key = VaultKey::from_bytes(&[7u8; KEY_LEN]).unwrap();
        assert_eq!(format!("{key:?}"), "VaultKey(<redacted>)");
    }
}
