pub mod cli;
#[cfg(feature = "lambda")]
pub mod lambda;
pub mod toml_config;

use crate::adapters::archive::ArchiveDelivery;
use crate::adapters::mail::{SmtpDelivery, DEFAULT_SMTP_PORT};
use crate::adapters::NullDelivery;
use crate::domain::ports::{Delivery, Storage};
use crate::utils::error::Result;
use std::sync::Arc;
use toml_config::{DeliveryConfig, DeliveryMode};

#[cfg(feature = "cli")]
pub use cli::CliConfig;
pub use toml_config::RunConfig;

/// Builds the configured delivery sink. Archives go to `storage`.
pub fn build_delivery<S>(config: &DeliveryConfig, storage: &S) -> Result<Arc<dyn Delivery>>
where
    S: Storage + Clone + 'static,
{
    let delivery: Arc<dyn Delivery> = match config.mode {
        DeliveryMode::Email => Arc::new(SmtpDelivery::new(
            config.smtp_host.as_deref().unwrap_or_default(),
            config.smtp_port.unwrap_or(DEFAULT_SMTP_PORT),
            config.username.clone(),
            config.password.clone(),
            config.from.as_deref().unwrap_or_default(),
        )?),
        DeliveryMode::Archive => Arc::new(ArchiveDelivery::new(
            storage.clone(),
            config.archive_prefix(),
        )),
        DeliveryMode::None => Arc::new(NullDelivery),
    };
    tracing::debug!("Delivery: {}", delivery.describe());
    Ok(delivery)
}
