use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use log::error;
use tokio::sync::Mutex;

use crate::error::{Result as GatewayResult, StoreError};
use crate::types::Line;

pub mod git;
#[cfg(test)]
pub mod memory;

pub use git::GitStore;

/// The version-controlled checkout that holds the peer files.
///
/// One working copy is shared by every request, so all access goes through
/// [`SharedStore`].
#[async_trait]
pub trait VersionedStore: Send + Sync {
    /// Directory containing the peer files.
    fn workdir(&self) -> &Path;

    async fn checkout_line(&mut self, line: Line) -> Result<(), StoreError>;

    /// Bring the currently checked out line up to date with its remote.
    async fn refresh(&mut self) -> Result<(), StoreError>;

    async fn stage_and_commit(&mut self, paths: &[PathBuf], message: &str)
        -> Result<(), StoreError>;

    async fn push(&mut self, line: Line) -> Result<(), StoreError>;

    /// Merge `from` into the currently checked out line.
    async fn merge(&mut self, from: Line) -> Result<(), StoreError>;

    /// Drop uncommitted changes to `paths`: unstage them and remove the
    /// files from the working tree.
    async fn discard(&mut self, paths: &[PathBuf]) -> Result<(), StoreError>;

    /// Reset the local `line` to the last state known from its remote,
    /// dropping commits that were never pushed.
    async fn rewind(&mut self, line: Line) -> Result<(), StoreError>;
}

/// The process-wide lock around the working copy.  Holding the guard is the
/// only way to reach the store.
pub type SharedStore = Arc<Mutex<Box<dyn VersionedStore>>>;

pub fn shared(store: impl VersionedStore + 'static) -> SharedStore {
    let store: Box<dyn VersionedStore> = Box::new(store);
    Arc::new(Mutex::new(store))
}

/// Checks out and refreshes the review line.
pub async fn enter_review_line(store: &mut dyn VersionedStore) -> GatewayResult<()> {
    store.checkout_line(Line::Review).await?;
    store.refresh().await?;
    Ok(())
}

/// Checks out the production line unconditionally.  The outcome of the
/// bracketed sequence wins over a failed restore.
pub async fn restore_production_line<T>(
    store: &mut dyn VersionedStore,
    outcome: GatewayResult<T>,
) -> GatewayResult<T> {
    let restored = store.checkout_line(Line::Production).await;
    match (outcome, restored) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e.into()),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(restore)) => {
            error!("could not return to production line after failure: {}", restore);
            Err(e)
        }
    }
}
