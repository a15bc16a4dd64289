use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconError {
    #[error("Source '{source_name}' is unavailable: {reason}")]
    SourceUnavailable { source_name: String, reason: String },

    #[error("Source '{source_name}' could not be parsed: {reason}")]
    MalformedSource { source_name: String, reason: String },

    #[error("Invalid currency value: '{value}'")]
    InvalidCurrencyFormat { value: String },

    #[error("Invalid date value: '{value}'")]
    InvalidDateFormat { value: String },

    #[error("Table '{table}' is missing required column '{column}'")]
    MissingRequiredColumn { table: String, column: String },

    #[error("Delivery failed: {message}")]
    DeliveryFailure { message: String },

    #[error("Storage operation on '{key}' failed: {message}")]
    StorageError { key: String, message: String },

    #[error("Zip operation failed: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Spreadsheet write error: {0}")]
    SpreadsheetError(#[from] rust_xlsxwriter::XlsxError),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid value for '{field}': '{value}' ({reason})")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Source,
    Data,
    Delivery,
    Storage,
    Configuration,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ReconError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ReconError::SourceUnavailable { .. } | ReconError::HttpError(_) => {
                ErrorCategory::Source
            }
            ReconError::MalformedSource { .. }
            | ReconError::InvalidCurrencyFormat { .. }
            | ReconError::InvalidDateFormat { .. }
            | ReconError::MissingRequiredColumn { .. }
            | ReconError::CsvError(_) => ErrorCategory::Data,
            ReconError::DeliveryFailure { .. } | ReconError::ZipError(_) => {
                ErrorCategory::Delivery
            }
            ReconError::StorageError { .. } | ReconError::SpreadsheetError(_) => {
                ErrorCategory::Storage
            }
            ReconError::ConfigError { .. }
            | ReconError::InvalidConfigValueError { .. }
            | ReconError::MissingConfigError { .. } => ErrorCategory::Configuration,
            ReconError::IoError(_) | ReconError::SerializationError(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            // a rerun picks the same rows up again once the source or relay is back
            ErrorCategory::Source | ErrorCategory::Delivery => ErrorSeverity::Medium,
            ErrorCategory::Data | ErrorCategory::Configuration => ErrorSeverity::High,
            ErrorCategory::Storage | ErrorCategory::System => ErrorSeverity::Critical,
        }
    }

    pub fn recovery_suggestion(&self) -> String {
        match self {
            ReconError::SourceUnavailable { .. } | ReconError::HttpError(_) => {
                "Check that the sheet is published as CSV and reachable, then rerun".to_string()
            }
            ReconError::MalformedSource { .. } | ReconError::CsvError(_) => {
                "Check the file has a single header row and the same number of columns on every row"
                    .to_string()
            }
            ReconError::InvalidCurrencyFormat { value } => {
                format!("Fix the cost value '{}' or clear the cell", value)
            }
            ReconError::InvalidDateFormat { value } => {
                format!("Use a date like 2024-01-31 or 01/31/2024 instead of '{}'", value)
            }
            ReconError::MissingRequiredColumn { column, .. } => {
                format!("Add a '{}' column to the header row", column)
            }
            ReconError::DeliveryFailure { .. } | ReconError::ZipError(_) => {
                "Check SMTP credentials; the watermark was not advanced so the rows will be sent again"
                    .to_string()
            }
            ReconError::StorageError { .. } | ReconError::SpreadsheetError(_) => {
                "Check bucket permissions or the local data directory".to_string()
            }
            ReconError::ConfigError { .. }
            | ReconError::InvalidConfigValueError { .. }
            | ReconError::MissingConfigError { .. } => {
                "Review the configuration file and the environment variables it references"
                    .to_string()
            }
            ReconError::IoError(_) | ReconError::SerializationError(_) => {
                "Check file permissions and available disk space".to_string()
            }
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Source => format!("Could not fetch input data: {}", self),
            ErrorCategory::Data => format!("Input data problem: {}", self),
            ErrorCategory::Delivery => format!("Results were produced but not delivered: {}", self),
            ErrorCategory::Storage => format!("Could not read or write stored files: {}", self),
            ErrorCategory::Configuration => format!("Invalid configuration: {}", self),
            ErrorCategory::System => format!("System error: {}", self),
        }
    }

    /// Process exit code for an unrecoverable run.
    pub fn exit_code(&self) -> i32 {
        match self.severity() {
            ErrorSeverity::Low => 0,
            ErrorSeverity::Medium => 2,
            ErrorSeverity::High => 1,
            ErrorSeverity::Critical => 3,
        }
    }
}

pub type Result<T> = std::result::Result<T, ReconError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_failure_is_retryable() {
        let err = ReconError::DeliveryFailure {
            message: "relay refused".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::Delivery);
        assert_eq!(err.severity(), ErrorSeverity::Medium);
        assert_eq!(err.exit_code(), 2);
        assert!(err.recovery_suggestion().contains("watermark"));
    }

    #[test]
    fn test_missing_column_message() {
        let err = ReconError::MissingRequiredColumn {
            table: "catalog".to_string(),
            column: "ASIN".to_string(),
        };
        assert_eq!(err.exit_code(), 1);
        assert_eq!(
            err.to_string(),
            "Table 'catalog' is missing required column 'ASIN'"
        );
        assert!(err.user_friendly_message().starts_with("Input data problem"));
    }
}
