use crate::config::toml_config::RunConfig;
use crate::domain::ports::Storage;
use crate::utils::error::{ReconError, Result};
use crate::utils::validation::{validate_non_empty_string, Validate};
use aws_sdk_s3::operation::head_object::HeadObjectError;
use aws_sdk_s3::operation::put_object::PutObjectError;
use aws_sdk_s3::Client as S3Client;
use std::env;

/// Where the lambda finds its run configuration. Read once from the environment at cold start.
#[derive(Debug, Clone)]
pub struct LambdaConfig {
    pub s3_bucket: String,
    pub config_key: String,
    pub s3_region: String,
}

impl LambdaConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            s3_bucket: env::var("CONFIG_S3_BUCKET").map_err(|_| ReconError::MissingConfigError {
                field: "CONFIG_S3_BUCKET".to_string(),
            })?,
            config_key: env::var("CONFIG_KEY").unwrap_or_else(|_| "config/cogs-reconcile.toml".to_string()),
            s3_region: env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
        })
    }

    /// Fetches and parses the TOML run configuration from the bucket.
    pub async fn load_run_config(&self, storage: &S3Storage) -> Result<RunConfig> {
        let bytes = storage.read_file(&self.config_key).await?;
        let content = String::from_utf8(bytes).map_err(|e| ReconError::ConfigError {
            message: format!("{} is not valid UTF-8: {}", self.config_key, e),
        })?;
        RunConfig::from_toml_str(&content)
    }
}

impl Validate for LambdaConfig {
    fn validate(&self) -> Result<()> {
        validate_non_empty_string("CONFIG_KEY", &self.config_key)?;
        check_aws_name(
            "CONFIG_S3_BUCKET",
            &self.s3_bucket,
            3..=63,
            |c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '.'),
        )?;
        check_aws_name("S3_REGION", &self.s3_region, 1..=32, |c| {
            c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'
        })?;
        tracing::debug!("Lambda config: s3://{}/{}", self.s3_bucket, self.config_key);
        Ok(())
    }
}

/// Bucket and region names: bounded length, restricted charset, no leading/trailing hyphen.
fn check_aws_name(
    field: &str,
    value: &str,
    length: std::ops::RangeInclusive<usize>,
    allowed: impl Fn(char) -> bool,
) -> Result<()> {
    let reason = if !length.contains(&value.len()) {
        Some(format!(
            "must be {} to {} characters",
            length.start(),
            length.end()
        ))
    } else if !value.chars().all(allowed) {
        Some("contains characters AWS does not allow".to_string())
    } else if value.starts_with('-') || value.ends_with('-') {
        Some("cannot start or end with a hyphen".to_string())
    } else {
        None
    };

    match reason {
        Some(reason) => Err(ReconError::InvalidConfigValueError {
            field: field.to_string(),
            value: value.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

#[derive(Debug, Clone)]
pub struct S3Storage {
    client: S3Client,
    bucket: String,
}

impl S3Storage {
    pub fn new(client: S3Client, bucket: String) -> Self {
        Self { client, bucket }
    }

    fn error(&self, key: &str, message: impl std::fmt::Display) -> ReconError {
        ReconError::StorageError {
            key: format!("s3://{}/{}", self.bucket, key),
            message: message.to_string(),
        }
    }
}

impl Storage for S3Storage {
    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| self.error(path, format!("Failed to read from S3: {}", e)))?;

        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| self.error(path, format!("Failed to collect S3 data: {}", e)))?;

        Ok(data.into_bytes().to_vec())
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let result = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(path)
            .body(data.to_vec().into())
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) => Err(match err.into_service_error() {
                PutObjectError::EncryptionTypeMismatch(e) => {
                    self.error(path, format!("encryption type mismatch: {:?}", e))
                }
                PutObjectError::InvalidRequest(e) => {
                    self.error(path, format!("invalid request: {:?}", e))
                }
                err => self.error(path, format!("{:?}", err)),
            }),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(err) => match err.into_service_error() {
                HeadObjectError::NotFound(_) => Ok(false),
                err => Err(self.error(path, format!("{:?}", err))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_and_region_validation() {
        let config = LambdaConfig {
            s3_bucket: "cogs-config".to_string(),
            config_key: "config/cogs-reconcile.toml".to_string(),
            s3_region: "us-east-1".to_string(),
        };
        assert!(config.validate().is_ok());

        let bad_bucket = LambdaConfig {
            s3_bucket: "Bad_Bucket".to_string(),
            ..config.clone()
        };
        assert!(bad_bucket.validate().is_err());

        let hyphenated = LambdaConfig {
            s3_bucket: "-cogs-config".to_string(),
            ..config.clone()
        };
        assert!(hyphenated.validate().is_err());

        let bad_region = LambdaConfig {
            s3_region: "US EAST".to_string(),
            ..config
        };
        assert!(bad_region.validate().is_err());
    }
}
