use crate::domain::ports::{Delivery, OutboundMessage, Storage};
use crate::utils::error::{ReconError, Result};
use async_trait::async_trait;
use std::io::Write;
use zip::write::{FileOptions, ZipWriter};

/// Writes each message as a zip (body plus attachments) into storage instead of sending it.
pub struct ArchiveDelivery<S: Storage> {
    storage: S,
    prefix: String,
}

impl<S: Storage> ArchiveDelivery<S> {
    pub fn new(storage: S, prefix: impl Into<String>) -> Self {
        Self {
            storage,
            prefix: prefix.into(),
        }
    }

    pub fn archive_key(&self, message: &OutboundMessage) -> String {
        let slug: String = message
            .subject
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
            .collect();
        let stamp = chrono::Local::now().format("%Y%m%d%H%M%S");
        format!("{}/{}_{}.zip", self.prefix.trim_end_matches('/'), stamp, slug)
    }
}

pub fn build_archive(message: &OutboundMessage) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(std::io::Cursor::new(Vec::new()));

    let header = format!(
        "To: {}\nSubject: {}\n\n{}",
        message.recipient, message.subject, message.text_body
    );
    zip.start_file::<_, ()>("message.txt", FileOptions::default())?;
    zip.write_all(header.as_bytes())?;

    if let Some(html) = &message.html_body {
        zip.start_file::<_, ()>("message.html", FileOptions::default())?;
        zip.write_all(html.as_bytes())?;
    }

    for attachment in &message.attachments {
        zip.start_file::<_, ()>(attachment.filename.as_str(), FileOptions::default())?;
        zip.write_all(&attachment.data)?;
    }

    let cursor = zip.finish()?;
    Ok(cursor.into_inner())
}

#[async_trait]
impl<S: Storage> Delivery for ArchiveDelivery<S> {
    async fn deliver(&self, message: &OutboundMessage) -> Result<()> {
        let data = build_archive(message)?;
        let key = self.archive_key(message);
        self.storage
            .write_file(&key, &data)
            .await
            .map_err(|e| ReconError::DeliveryFailure {
                message: format!("Could not archive message to '{}': {}", key, e),
            })?;
        tracing::info!("📦 Message for {} archived to {}", message.recipient, key);
        Ok(())
    }

    fn describe(&self) -> String {
        format!("archive:{}", self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::Attachment;
    use std::io::Read;

    #[test]
    fn test_archive_contains_body_and_attachments() {
        let message = OutboundMessage {
            recipient: "owner@example.com".to_string(),
            subject: "Prep upload".to_string(),
            text_body: "see attached".to_string(),
            html_body: Some("<p>see attached</p>".to_string()),
            attachments: vec![Attachment {
                filename: "Processed_Instant_Fulfillment_Template.csv".to_string(),
                data: b"Order Date\n01/02/2024\n".to_vec(),
            }],
        };

        let bytes = build_archive(&message).unwrap();
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 3);

        let mut body = String::new();
        archive
            .by_name("message.txt")
            .unwrap()
            .read_to_string(&mut body)
            .unwrap();
        assert!(body.contains("Subject: Prep upload"));

        let mut csv = String::new();
        archive
            .by_name("Processed_Instant_Fulfillment_Template.csv")
            .unwrap()
            .read_to_string(&mut csv)
            .unwrap();
        assert_eq!(csv, "Order Date\n01/02/2024\n");
    }
}
