//! File-backed completion ledger. One file per marker key inside the state
//! directory; an empty file is a marker without payload.
//!
//! Nothing is cached in memory: every query goes to disk so the ledger after a
//! restart answers exactly as it did before it.

use crate::ledger::atomic::{sync_directory, write_atomically};
use crate::ledger::keys::MarkerKey;
use anyhow::{bail, Context, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum LedgerError {
    /// A marker was written twice with different payloads.
    ConflictingPayload {
        key: MarkerKey,
        stored: Option<String>,
        attempted: Option<String>,
    },
    /// A fresh observation disagrees with a previously committed value.
    CommitmentMismatch {
        key: MarkerKey,
        path: PathBuf,
        committed: String,
        observed: String,
    },
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerError::ConflictingPayload {
                key,
                stored,
                attempted,
            } => write!(
                f,
                "marker {key} already holds {stored:?}; refusing to overwrite it with {attempted:?}"
            ),
            LedgerError::CommitmentMismatch {
                key,
                path,
                committed,
                observed,
            } => write!(
                f,
                "commitment {key} changed from '{committed}' to '{observed}'; this usually means \
                 the chain reorganized. Confirm the network is stable, remove {} and restart",
                path.display()
            ),
        }
    }
}

impl std::error::Error for LedgerError {}

#[derive(Debug, Clone)]
pub struct CompletionLedger {
    state_dir: PathBuf,
}

impl CompletionLedger {
    /// Opens (creating if needed) the ledger rooted at `state_dir`.
    pub fn open(state_dir: impl Into<PathBuf>) -> Result<Self> {
        let state_dir = state_dir.into();
        fs::create_dir_all(&state_dir).with_context(|| {
            format!("failed to create state directory {}", state_dir.display())
        })?;
        Ok(Self { state_dir })
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn path_for(&self, key: MarkerKey) -> PathBuf {
        self.state_dir.join(key.file_name())
    }

    pub fn is_complete(&self, key: MarkerKey) -> Result<bool> {
        let path = self.path_for(key);
        match fs::metadata(&path) {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => {
                Err(err).with_context(|| format!("failed to stat marker {}", path.display()))
            }
        }
    }

    /// Returns the trimmed payload of a marker, or `None` when the marker is
    /// absent or carries no payload.
    pub fn read_payload(&self, key: MarkerKey) -> Result<Option<String>> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(normalize(&contents)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => {
                Err(err).with_context(|| format!("failed to read marker {}", path.display()))
            }
        }
    }

    /// Records `key` as complete. Writing the same payload again is a no-op;
    /// a different payload is rejected.
    pub fn mark_complete(&self, key: MarkerKey, payload: Option<&str>) -> Result<()> {
        let attempted = payload.and_then(normalize);

        if self.is_complete(key)? {
            let stored = self.read_payload(key)?;
            if stored == attempted {
                return Ok(());
            }
            return Err(LedgerError::ConflictingPayload {
                key,
                stored,
                attempted,
            }
            .into());
        }

        let path = self.path_for(key);
        write_atomically(&path, attempted.as_deref().unwrap_or_default().as_bytes())?;
        tracing::debug!(
            target: "orchestrator::ledger",
            key = %key,
            payload = attempted.as_deref().unwrap_or(""),
            "marker written"
        );
        Ok(())
    }

    /// Writes `payload` under `key`, replacing whatever was stored. Only for
    /// values derived from a commitment and recaptured alongside it.
    pub fn replace(&self, key: MarkerKey, payload: &str) -> Result<()> {
        let payload = payload.trim();
        write_atomically(&self.path_for(key), payload.as_bytes())?;
        tracing::debug!(
            target: "orchestrator::ledger",
            key = %key,
            payload,
            "marker replaced"
        );
        Ok(())
    }

    /// Binds `observed` to `key`. The first call records it; later calls must
    /// observe the identical value.
    pub fn commit(&self, key: MarkerKey, observed: &str) -> Result<()> {
        match self.read_payload(key)? {
            Some(_) => self.verify_commitment(key, observed),
            None => self.mark_complete(key, Some(observed)),
        }
    }

    /// Asserts that an existing commitment equals `observed`.
    pub fn verify_commitment(&self, key: MarkerKey, observed: &str) -> Result<()> {
        let Some(committed) = self.read_payload(key)? else {
            bail!("commitment {key} is missing; it must be captured before it can be verified");
        };

        let observed = observed.trim();
        if committed != observed {
            return Err(LedgerError::CommitmentMismatch {
                key,
                path: self.path_for(key),
                committed,
                observed: observed.to_owned(),
            }
            .into());
        }

        Ok(())
    }

    /// Removes the given markers. Only meant for operator-invoked recovery.
    pub fn reset(&self, keys: &[MarkerKey]) -> Result<()> {
        let mut removed = 0usize;
        for key in keys {
            let path = self.path_for(*key);
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("failed to remove marker {}", path.display()))
                }
            }
        }

        sync_directory(&self.state_dir)?;
        tracing::info!(
            target: "orchestrator::ledger",
            requested = keys.len(),
            removed,
            "ledger markers reset"
        );
        Ok(())
    }
}

fn normalize(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}
