use crate::utils::error::Result;
use async_trait::async_trait;

pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
    fn exists(&self, path: &str) -> impl std::future::Future<Output = Result<bool>> + Send;
}

/// One batch job: fetch its inputs, reconcile/project them, then persist and deliver.
#[async_trait]
pub trait Pipeline: Send + Sync {
    type Extracted: Send;
    type Transformed: Send;

    fn name(&self) -> &str;
    async fn extract(&self) -> Result<Self::Extracted>;
    async fn transform(&self, data: Self::Extracted) -> Result<Self::Transformed>;
    async fn load(&self, result: Self::Transformed) -> Result<RunOutcome>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutcome {
    pub account: String,
    pub rows_considered: usize,
    pub artifacts: Vec<String>,
    pub delivered: bool,
    pub watermark: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub recipient: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: Option<String>,
    pub attachments: Vec<Attachment>,
}

#[async_trait]
pub trait Delivery: Send + Sync {
    async fn deliver(&self, message: &OutboundMessage) -> Result<()>;
    fn describe(&self) -> String;
}

/// Resolves where an account's leads come from before any mutation starts.
pub trait SourceResolver: Send + Sync {
    fn resolve(
        &self,
        account: &str,
        configured: Option<&crate::core::loader::SourceDescriptor>,
    ) -> Result<crate::core::loader::SourceDescriptor>;
}
