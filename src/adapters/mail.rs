use crate::domain::ports::{Delivery, OutboundMessage};
use crate::utils::error::{ReconError, Result};
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Attachment, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

pub const DEFAULT_SMTP_PORT: u16 = 465;

/// Sends reports through an implicit-TLS SMTP relay.
pub struct SmtpDelivery {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    host: String,
    port: u16,
}

fn failure(message: impl Into<String>) -> ReconError {
    ReconError::DeliveryFailure {
        message: message.into(),
    }
}

impl SmtpDelivery {
    pub fn new(
        host: &str,
        port: u16,
        username: Option<String>,
        password: Option<String>,
        from: &str,
    ) -> Result<Self> {
        let from: Mailbox = from
            .parse()
            .map_err(|e| failure(format!("Invalid sender address '{}': {}", from, e)))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(host)
            .map_err(|e| failure(e.to_string()))?
            .port(port);
        if let (Some(username), Some(password)) = (username, password) {
            builder = builder.credentials(Credentials::new(username, password));
        }

        Ok(Self {
            transport: builder.build(),
            from,
            host: host.to_string(),
            port,
        })
    }

    fn build(&self, message: &OutboundMessage) -> Result<Message> {
        let to: Mailbox = message
            .recipient
            .parse()
            .map_err(|e| failure(format!("Invalid recipient '{}': {}", message.recipient, e)))?;

        let mut body = match &message.html_body {
            Some(html) => MultiPart::mixed().multipart(MultiPart::alternative_plain_html(
                message.text_body.clone(),
                html.clone(),
            )),
            None => MultiPart::mixed().singlepart(SinglePart::plain(message.text_body.clone())),
        };

        let octet_stream = ContentType::parse("application/octet-stream")
            .map_err(|e| failure(e.to_string()))?;
        for attachment in &message.attachments {
            body = body.singlepart(
                Attachment::new(attachment.filename.clone())
                    .body(attachment.data.clone(), octet_stream.clone()),
            );
        }

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(message.subject.clone())
            .multipart(body)
            .map_err(|e| failure(e.to_string()))
    }
}

#[async_trait]
impl Delivery for SmtpDelivery {
    async fn deliver(&self, message: &OutboundMessage) -> Result<()> {
        let email = self.build(message)?;
        tracing::debug!(
            "Sending '{}' to {} with {} attachment(s)",
            message.subject,
            message.recipient,
            message.attachments.len()
        );
        self.transport
            .send(email)
            .await
            .map_err(|e| failure(format!("SMTP send to {} failed: {}", message.recipient, e)))?;
        tracing::info!("📧 Email sent to {}", message.recipient);
        Ok(())
    }

    fn describe(&self) -> String {
        format!("smtp://{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::Attachment as MessageAttachment;

    fn delivery() -> SmtpDelivery {
        SmtpDelivery::new(
            "smtp.example.com",
            DEFAULT_SMTP_PORT,
            Some("reports@example.com".to_string()),
            Some("secret".to_string()),
            "reports@example.com",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_builds_multipart_message() {
        let message = OutboundMessage {
            recipient: "owner@example.com".to_string(),
            subject: "Cost update".to_string(),
            text_body: "plain".to_string(),
            html_body: Some("<p>html</p>".to_string()),
            attachments: vec![MessageAttachment {
                filename: "catalog.xlsx".to_string(),
                data: vec![1, 2, 3],
            }],
        };
        let email = delivery().build(&message).unwrap();
        let raw = String::from_utf8_lossy(&email.formatted()).to_string();

        assert!(raw.contains("Subject: Cost update"));
        assert!(raw.contains("multipart/mixed"));
        assert!(raw.contains("multipart/alternative"));
        assert!(raw.contains("catalog.xlsx"));
        assert_eq!(delivery().describe(), "smtp://smtp.example.com:465");
    }

    #[tokio::test]
    async fn test_invalid_recipient_is_delivery_failure() {
        let message = OutboundMessage {
            recipient: "not an address".to_string(),
            subject: "x".to_string(),
            text_body: String::new(),
            html_body: None,
            attachments: vec![],
        };
        assert!(matches!(
            delivery().build(&message),
            Err(ReconError::DeliveryFailure { .. })
        ));
    }
}
