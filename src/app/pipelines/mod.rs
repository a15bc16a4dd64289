//! Concrete batch jobs, one per `job` kind in the run configuration.

pub mod cost_sync;
pub mod cost_update;
pub mod prep_upload;

use crate::config::toml_config::ReconcileSettings;
use crate::core::identifier::RandomSku;
use crate::core::loader::TableLoader;
use crate::domain::ports::{Delivery, Storage};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::Path;
use std::sync::Arc;

pub use cost_sync::CostSyncPipeline;
pub use cost_update::CostUpdatePipeline;
pub use prep_upload::PrepUploadPipeline;

/// Everything a job needs besides its own account entry.
#[derive(Clone)]
pub struct JobContext<S: Storage + Clone> {
    pub storage: S,
    pub loader: TableLoader,
    pub delivery: Arc<dyn Delivery>,
    pub settings: ReconcileSettings,
    pub output_path: String,
    pub dry_run: bool,
    /// Fixed seed for identifier generation; `None` draws from OS entropy.
    pub identifier_seed: Option<u64>,
}

impl<S: Storage + Clone> JobContext<S> {
    pub fn new(
        storage: S,
        loader: TableLoader,
        delivery: Arc<dyn Delivery>,
        settings: ReconcileSettings,
        output_path: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            loader,
            delivery,
            settings,
            output_path: output_path.into(),
            dry_run: false,
            identifier_seed: None,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_identifier_seed(mut self, seed: u64) -> Self {
        self.identifier_seed = Some(seed);
        self
    }

    pub(crate) fn identifiers(&self) -> RandomSku<StdRng> {
        match self.identifier_seed {
            Some(seed) => RandomSku::with_rng(
                StdRng::seed_from_u64(seed),
                self.settings.unique_identifiers,
            ),
            None => RandomSku::new(self.settings.unique_identifiers),
        }
    }
}

pub(crate) fn file_name(key: &str) -> String {
    Path::new(key)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(key)
        .to_string()
}

pub(crate) fn today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}
