//! The git-backed peer registry.
//!
//! Each registered node is one file in the peers directory, named after
//! its hostname and holding its fastd key.  Registrations land on the
//! review line; [`crate::deploy`] later promotes them to production.
//!
//! Every sequence that touches the checkout runs while holding the
//! [`SharedStore`] lock and is bracketed: the review line is checked out
//! and refreshed first, and the production line is checked out again
//! afterwards whether or not the sequence succeeded.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};

use crate::error::{GatewayError, Result};
use crate::rename::RenameVerifier;
use crate::store::{enter_review_line, restore_production_line, SharedStore, VersionedStore};
use crate::types::{Line, PeerRecord, Registration};
use crate::validate::{normalize_key, validate_hostname, validate_key};

pub struct PeerRegistry {
    store: SharedStore,
    rename_verifier: Box<dyn RenameVerifier>,
}

impl PeerRegistry {
    pub fn new(store: SharedStore, rename_verifier: Box<dyn RenameVerifier>) -> Self {
        Self {
            store,
            rename_verifier,
        }
    }

    /// Hostnames whose record contains `key`, as seen on the refreshed
    /// review line.
    pub async fn find_hostnames_for_key(&self, key: &str) -> Result<BTreeSet<String>> {
        if !validate_key(key) {
            return Err(GatewayError::InvalidInput("Key format invalid".into()));
        }
        let key = normalize_key(key);

        let mut store = self.store.lock().await;
        let outcome = match enter_review_line(&mut **store).await {
            Ok(()) => scan_for_key(store.workdir(), &key).await,
            Err(e) => Err(e),
        };
        restore_production_line(&mut **store, outcome).await
    }

    /// The challenge stored in `hostname`'s record, if it has one.
    pub async fn challenge_for(&self, hostname: &str) -> Result<Option<String>> {
        if !validate_hostname(hostname) {
            return Err(GatewayError::InvalidInput("Hostname invalid".into()));
        }

        let mut store = self.store.lock().await;
        let outcome = match enter_review_line(&mut **store).await {
            Ok(()) => read_record(store.workdir(), hostname)
                .await
                .map(|record| record.and_then(|r| r.challenge)),
            Err(e) => Err(e),
        };
        restore_production_line(&mut **store, outcome).await
    }

    /// Registers `key` under `hostname`.
    ///
    /// If the key already belongs to another hostname, the registration is
    /// only accepted as a rename when `proof` satisfies the configured
    /// [`RenameVerifier`] for the previous record.
    pub async fn add_or_rename(
        &self,
        hostname: &str,
        key: &str,
        proof: Option<&str>,
    ) -> Result<Registration> {
        if !validate_hostname(hostname) {
            return Err(GatewayError::InvalidInput("Hostname invalid".into()));
        }
        if !validate_key(key) {
            return Err(GatewayError::InvalidInput("Key format invalid".into()));
        }
        let key = normalize_key(key);

        let mut store = self.store.lock().await;
        let outcome = match enter_review_line(&mut **store).await {
            Ok(()) => self.register(&mut **store, hostname, &key, proof).await,
            Err(e) => Err(e),
        };
        restore_production_line(&mut **store, outcome).await
    }

    /// Body of [`Self::add_or_rename`]; runs on the review line.
    async fn register(
        &self,
        store: &mut dyn VersionedStore,
        hostname: &str,
        key: &str,
        proof: Option<&str>,
    ) -> Result<Registration> {
        let workdir = store.workdir().to_path_buf();
        let existing = scan_for_key(&workdir, key).await?;

        let renamed_from = match existing.len() {
            0 => None,
            1 => {
                let owner = existing.iter().next().cloned().unwrap_or_default();
                if owner == hostname {
                    warn!("{} re-registered its existing key", hostname);
                    return Err(GatewayError::DuplicateRegistration {
                        hostname: owner,
                    });
                }
                if !self.verify_rename(&workdir, &owner, proof).await? {
                    warn!(
                        "{} tried to claim the key registered for {}",
                        hostname, owner
                    );
                    return Err(GatewayError::KeyOwnershipConflict { hostname: owner });
                }
                Some(owner)
            }
            _ => {
                let hostnames: Vec<String> = existing.into_iter().collect();
                error!(
                    "key {} is registered for several hostnames: {}",
                    key,
                    hostnames.join(", ")
                );
                return Err(GatewayError::RegistryInconsistent { hostnames });
            }
        };

        let hostname = disambiguate(&workdir, hostname).await?;
        let registration = Registration {
            hostname,
            key: key.to_string(),
            renamed_from,
        };

        let record = PeerRecord::new(&registration.hostname, key);
        let paths = [PathBuf::from(&registration.hostname)];
        if let Err(e) = tokio::fs::write(workdir.join(&paths[0]), record.render()).await {
            roll_back(store, &paths, false).await;
            return Err(e.into());
        }

        let message = registration.commit_message();
        if let Err(e) = store.stage_and_commit(&paths, &message).await {
            roll_back(store, &paths, false).await;
            return Err(e.into());
        }
        if let Err(e) = store.push(Line::Review).await {
            roll_back(store, &paths, true).await;
            return Err(e.into());
        }

        info!("{}", message);
        Ok(registration)
    }

    async fn verify_rename(
        &self,
        workdir: &Path,
        owner: &str,
        proof: Option<&str>,
    ) -> Result<bool> {
        let Some(proof) = proof else {
            return Ok(false);
        };
        match read_record(workdir, owner).await? {
            Some(previous) => Ok(self.rename_verifier.verify(&previous, proof)),
            None => Ok(false),
        }
    }
}

/// Undoes a registration that did not reach the remote: drops unpushed
/// commits on the review line, then the written file, so nothing is carried
/// onto the production checkout.  Failures are logged; the original error
/// is what the caller sees.
async fn roll_back(store: &mut dyn VersionedStore, paths: &[PathBuf], committed: bool) {
    if committed {
        if let Err(e) = store.rewind(Line::Review).await {
            error!("could not rewind review line: {}", e);
        }
    }
    if let Err(e) = store.discard(paths).await {
        error!("could not discard uncommitted registration: {}", e);
    }
}

/// Hostnames of all peer files in `dir` with a line containing `key`,
/// ignoring ASCII case.  Subdirectories (including `.git`) are skipped.
pub async fn scan_for_key(dir: &Path, key: &str) -> Result<BTreeSet<String>> {
    let key = key.to_ascii_lowercase();
    let mut found = BTreeSet::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let contents = tokio::fs::read(entry.path()).await?;
        let contents = String::from_utf8_lossy(&contents);
        if contents
            .lines()
            .any(|line| line.to_ascii_lowercase().contains(&key))
        {
            found.insert(entry.file_name().to_string_lossy().into_owned());
        }
    }
    debug!("scan for key found {} record(s)", found.len());
    Ok(found)
}

async fn read_record(dir: &Path, hostname: &str) -> Result<Option<PeerRecord>> {
    match tokio::fs::read_to_string(dir.join(hostname)).await {
        Ok(contents) => Ok(PeerRecord::parse(hostname, &contents)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Appends a short random suffix when a file named `hostname` already
/// exists, so an unrelated registration is never overwritten.
async fn disambiguate(dir: &Path, hostname: &str) -> Result<String> {
    let mut candidate = hostname.to_string();
    while tokio::fs::try_exists(dir.join(&candidate)).await? {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        candidate = format!("{}__{}", hostname, &suffix[..8]);
        info!("{} is taken, registering as {}", hostname, candidate);
    }
    Ok(candidate)
}
