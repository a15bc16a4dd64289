// Concrete implementations of the domain ports: encoders, report bodies and delivery sinks.

pub mod archive;
pub mod mail;
pub mod report;
pub mod tabular;

use crate::domain::ports::{Delivery, OutboundMessage};
use crate::utils::error::Result;
use async_trait::async_trait;

/// `mode = "none"`: messages are logged and dropped.
pub struct NullDelivery;

#[async_trait]
impl Delivery for NullDelivery {
    async fn deliver(&self, message: &OutboundMessage) -> Result<()> {
        tracing::info!(
            "Delivery disabled, dropping '{}' for {} ({} attachment(s))",
            message.subject,
            message.recipient,
            message.attachments.len()
        );
        Ok(())
    }

    fn describe(&self) -> String {
        "none".to_string()
    }
}
