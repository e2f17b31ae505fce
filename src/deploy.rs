//! Promotion of the review line into production.

use log::info;

use crate::error::Result;
use crate::reload::DaemonReloader;
use crate::store::{enter_review_line, restore_production_line, SharedStore, VersionedStore};
use crate::types::{DeployPayload, Line, PromoteOutcome};

pub struct DeploymentOrchestrator {
    store: SharedStore,
    reloader: Box<dyn DaemonReloader>,
    success_state: String,
}

impl DeploymentOrchestrator {
    pub fn new(
        store: SharedStore,
        reloader: Box<dyn DaemonReloader>,
        success_state: String,
    ) -> Self {
        Self {
            store,
            reloader,
            success_state,
        }
    }

    /// Merges the review line into production, pushes it and reloads the
    /// daemon.  A payload whose state is not the success state is
    /// acknowledged without touching anything.
    ///
    /// Steps are not retried; the first failure ends the sequence and the
    /// production line is checked out again before the error is returned.
    pub async fn promote(&self, payload: &DeployPayload) -> Result<PromoteOutcome> {
        let state = payload.state.clone().unwrap_or_default();
        if state != self.success_state {
            info!("build state {:?}, skipping deploy", state);
            return Ok(PromoteOutcome::Skipped { state });
        }

        let mut store = self.store.lock().await;
        let outcome = merge_review_into_production(&mut **store).await;
        restore_production_line(&mut **store, outcome).await?;

        self.reloader.reload().await?;
        info!("review line promoted to production");
        Ok(PromoteOutcome::Deployed)
    }
}

async fn merge_review_into_production(store: &mut dyn VersionedStore) -> Result<()> {
    enter_review_line(store).await?;
    store.checkout_line(Line::Production).await?;
    store.refresh().await?;
    store.merge(Line::Review).await?;
    store.push(Line::Production).await?;
    Ok(())
}
