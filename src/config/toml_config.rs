use crate::core::loader::{SourceDescriptor, DEFAULT_TIMEOUT_SECS};
use crate::core::normalize::InvalidValuePolicy;
use crate::core::projector::{BundleUnitsMode, DEFAULT_MARKUP};
use crate::core::reconcile::{TargetFilter, DEFAULT_SENTINEL};
use crate::utils::error::{ReconError, Result};
use crate::utils::validation::{
    validate_email, validate_file_extension, validate_non_empty_string, validate_path,
    validate_range, validate_substituted, validate_url, Validate,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub load: LoadConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub reconcile: ReconcileSettings,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout(),
        }
    }
}

/// Base directory for local storage; the lambda binary uses its S3 bucket instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: String,
}

fn default_storage_path() -> String {
    "./data".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

/// Storage prefix generated artifacts are written under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadConfig {
    #[serde(default = "default_output_path")]
    pub output_path: String,
}

fn default_output_path() -> String {
    "output".to_string()
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            output_path: default_output_path(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    Email,
    Archive,
    #[default]
    None,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default)]
    pub mode: DeliveryMode,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: Option<String>,
    pub archive_prefix: Option<String>,
}

impl DeliveryConfig {
    pub fn archive_prefix(&self) -> &str {
        self.archive_prefix.as_deref().unwrap_or("outbox")
    }
}

/// Knobs shared by every account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileSettings {
    #[serde(default = "default_sentinel")]
    pub sentinel: String,
    #[serde(default = "default_markup")]
    pub markup: f64,
    #[serde(default)]
    pub date_policy: InvalidValuePolicy,
    #[serde(default)]
    pub bundle_units: BundleUnitsMode,
    #[serde(default)]
    pub unique_identifiers: bool,
    /// Target costs such as `N/A` or `#N/A`; treated as missing (and filled) by default.
    #[serde(default = "default_invalid_target_cost")]
    pub invalid_target_cost: InvalidValuePolicy,
}

fn default_sentinel() -> String {
    DEFAULT_SENTINEL.to_string()
}

fn default_markup() -> f64 {
    DEFAULT_MARKUP
}

fn default_invalid_target_cost() -> InvalidValuePolicy {
    InvalidValuePolicy::TreatAsMissing
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            sentinel: default_sentinel(),
            markup: default_markup(),
            date_policy: InvalidValuePolicy::SkipRow,
            bundle_units: BundleUnitsMode::Raw,
            unique_identifiers: false,
            invalid_target_cost: default_invalid_target_cost(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum AccountConfig {
    CostUpdate(CostUpdateAccount),
    PrepUpload(PrepUploadAccount),
    CostSync(CostSyncAccount),
}

impl AccountConfig {
    pub fn name(&self) -> &str {
        match self {
            AccountConfig::CostUpdate(a) => &a.name,
            AccountConfig::PrepUpload(a) => &a.name,
            AccountConfig::CostSync(a) => &a.name,
        }
    }

    pub fn job(&self) -> &'static str {
        match self {
            AccountConfig::CostUpdate(_) => "cost_update",
            AccountConfig::PrepUpload(_) => "prep_upload",
            AccountConfig::CostSync(_) => "cost_sync",
        }
    }

    pub fn email(&self) -> Option<&str> {
        match self {
            AccountConfig::CostUpdate(a) => Some(&a.email),
            AccountConfig::PrepUpload(a) => Some(&a.email),
            AccountConfig::CostSync(_) => None,
        }
    }

    /// Configured leads source, for jobs that read one.
    pub fn leads(&self) -> Option<&SourceDescriptor> {
        match self {
            AccountConfig::CostUpdate(a) => a.leads.as_ref(),
            AccountConfig::PrepUpload(a) => a.leads.as_ref(),
            AccountConfig::CostSync(_) => None,
        }
    }

    pub fn reads_leads(&self) -> bool {
        !matches!(self, AccountConfig::CostSync(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostUpdateAccount {
    pub name: String,
    pub email: String,
    pub leads: Option<SourceDescriptor>,
    /// Storage key of the catalog workbook; it is rewritten in place.
    pub catalog_key: String,
    pub catalog_sheet: Option<String>,
    pub listing_loader_key: Option<String>,
    pub watermark_key: Option<String>,
}

impl CostUpdateAccount {
    pub fn watermark_key(&self) -> String {
        self.watermark_key
            .clone()
            .unwrap_or_else(|| format!("state/{}_last_processed_date.json", self.name))
    }

    pub fn listing_loader_key(&self, output_path: &str) -> String {
        self.listing_loader_key.clone().unwrap_or_else(|| {
            format!(
                "{}/{}_listing_loader.xlsx",
                output_path.trim_end_matches('/'),
                self.name
            )
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepUploadAccount {
    pub name: String,
    pub email: String,
    pub leads: Option<SourceDescriptor>,
    pub output_key: Option<String>,
}

impl PrepUploadAccount {
    pub const FILENAME: &'static str = "Processed_Instant_Fulfillment_Template.csv";

    pub fn output_key(&self, output_path: &str) -> String {
        self.output_key.clone().unwrap_or_else(|| {
            format!(
                "{}/{}/{}",
                output_path.trim_end_matches('/'),
                self.name,
                Self::FILENAME
            )
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostSyncAccount {
    pub name: String,
    pub catalog: SourceDescriptor,
    pub inventory: SourceDescriptor,
    pub source_key: Vec<String>,
    pub target_key: Vec<String>,
    pub source_cost: String,
    pub target_cost: String,
    pub filter: Option<TargetFilter>,
    #[serde(default)]
    pub apply_conflicts: bool,
    pub output_key: String,
}

impl RunConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(ReconError::IoError)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed = Self::substitute_env_vars(content);

        toml::from_str(&processed).map_err(|e| ReconError::ConfigError {
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// Replaces `${VAR}` with the variable's value. Unset variables are left in place and
    /// rejected by validation wherever they matter.
    fn substitute_env_vars(content: &str) -> String {
        static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
        let Some(re) = PATTERN
            .get_or_init(|| Regex::new(r"\$\{([^}]+)\}").ok())
            .as_ref()
        else {
            return content.to_string();
        };

        re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        })
        .to_string()
    }

    pub fn accounts_matching<'a>(&'a self, only: &'a [String]) -> impl Iterator<Item = &'a AccountConfig> + 'a {
        self.accounts
            .iter()
            .filter(move |a| only.is_empty() || only.iter().any(|name| name == a.name()))
    }

    fn validate_delivery(&self) -> Result<()> {
        let delivery = &self.delivery;
        match delivery.mode {
            DeliveryMode::Email => {
                let host = delivery.smtp_host.as_deref().unwrap_or_default();
                validate_non_empty_string("delivery.smtp_host", host)?;
                validate_substituted("delivery.smtp_host", host)?;

                let from = delivery.from.as_deref().unwrap_or_default();
                validate_substituted("delivery.from", from)?;
                validate_email("delivery.from", from)?;

                match (&delivery.username, &delivery.password) {
                    (Some(user), Some(password)) => {
                        validate_substituted("delivery.username", user)?;
                        validate_substituted("delivery.password", password)?;
                    }
                    (None, None) => {}
                    _ => {
                        return Err(ReconError::InvalidConfigValueError {
                            field: "delivery.username".to_string(),
                            value: "<partial>".to_string(),
                            reason: "username and password must be set together".to_string(),
                        })
                    }
                }
            }
            DeliveryMode::Archive => {
                validate_path("delivery.archive_prefix", delivery.archive_prefix())?;
            }
            DeliveryMode::None => {}
        }
        Ok(())
    }

    fn validate_source(field: &str, source: &SourceDescriptor) -> Result<()> {
        match source {
            SourceDescriptor::Url(url) => {
                validate_substituted(field, url)?;
                validate_url(field, url)
            }
            SourceDescriptor::Path(path) | SourceDescriptor::Sheet { path, .. } => {
                validate_path(field, &path.display().to_string())
            }
            SourceDescriptor::Object(key) => validate_non_empty_string(field, key),
        }
    }

    fn validate_account(&self, account: &AccountConfig) -> Result<()> {
        let prefix = format!("accounts.{}", account.name());
        validate_non_empty_string("accounts.name", account.name())?;

        if self.delivery.mode != DeliveryMode::None {
            if let Some(email) = account.email() {
                validate_email(&format!("{}.email", prefix), email)?;
            }
        }
        if let Some(leads) = account.leads() {
            Self::validate_source(&format!("{}.leads", prefix), leads)?;
        }

        match account {
            AccountConfig::CostUpdate(a) => {
                validate_file_extension(&format!("{}.catalog_key", prefix), &a.catalog_key, &["xlsx"])?;
                if let Some(key) = &a.listing_loader_key {
                    validate_file_extension(&format!("{}.listing_loader_key", prefix), key, &["xlsx"])?;
                }
            }
            AccountConfig::PrepUpload(_) => {}
            AccountConfig::CostSync(a) => {
                Self::validate_source(&format!("{}.catalog", prefix), &a.catalog)?;
                Self::validate_source(&format!("{}.inventory", prefix), &a.inventory)?;
                if a.source_key.is_empty() || a.source_key.len() != a.target_key.len() {
                    return Err(ReconError::InvalidConfigValueError {
                        field: format!("{}.target_key", prefix),
                        value: a.target_key.join(","),
                        reason: "source_key and target_key must name the same number of columns"
                            .to_string(),
                    });
                }
                validate_non_empty_string(&format!("{}.source_cost", prefix), &a.source_cost)?;
                validate_non_empty_string(&format!("{}.target_cost", prefix), &a.target_cost)?;
                validate_file_extension(&format!("{}.output_key", prefix), &a.output_key, &["csv"])?;
            }
        }
        Ok(())
    }

    pub fn validate_config(&self) -> Result<()> {
        validate_non_empty_string("pipeline.name", &self.pipeline.name)?;
        validate_range("source.timeout_seconds", self.source.timeout_seconds, 1, 600)?;
        validate_path("storage.path", &self.storage.path)?;
        validate_path("load.output_path", &self.load.output_path)?;
        validate_range("reconcile.markup", self.reconcile.markup, 0.01, 10.0)?;
        validate_non_empty_string("reconcile.sentinel", &self.reconcile.sentinel)?;
        self.validate_delivery()?;

        if self.accounts.is_empty() {
            return Err(ReconError::MissingConfigError {
                field: "accounts".to_string(),
            });
        }
        let mut seen = HashSet::new();
        for account in &self.accounts {
            if !seen.insert(account.name()) {
                return Err(ReconError::InvalidConfigValueError {
                    field: "accounts.name".to_string(),
                    value: account.name().to_string(),
                    reason: "account names must be unique".to_string(),
                });
            }
            self.validate_account(account)?;
        }
        Ok(())
    }
}

impl Validate for RunConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const BASIC: &str = r#"
[pipeline]
name = "cogs-reconcile"
description = "Nightly COGS reconciliation"

[source]
timeout_seconds = 15

[reconcile]
markup = 1.2
date_policy = "abort"
bundle_units = "integer"

[[accounts]]
job = "cost_update"
name = "tevin"
email = "tevin@example.com"
leads = { url = "https://docs.example.com/sheet/pub?output=csv" }
catalog_key = "SB/tevin_sb.xlsx"

[[accounts]]
job = "prep_upload"
name = "aura"
email = "aura@example.com"

[[accounts]]
job = "cost_sync"
name = "inventory"
catalog = { object = "SB/tevin_sb.xlsx" }
inventory = { path = "exports/inventory.csv" }
source_key = ["ASIN", "SKU"]
target_key = ["asin", "sku"]
source_cost = "Cost"
target_cost = "cost"
filter = { column = "fulfillment_type", equals = "fba" }
apply_conflicts = true
output_key = "output/inventory_updated.csv"
"#;

    #[test]
    fn test_parse_table_driven_accounts() {
        let config = RunConfig::from_toml_str(BASIC).unwrap();

        assert_eq!(config.pipeline.name, "cogs-reconcile");
        assert_eq!(config.source.timeout_seconds, 15);
        assert_eq!(config.reconcile.markup, 1.2);
        assert_eq!(config.reconcile.sentinel, "Replen");
        assert_eq!(config.reconcile.date_policy, InvalidValuePolicy::Abort);
        assert_eq!(config.reconcile.bundle_units, BundleUnitsMode::Integer);
        assert_eq!(
            config.reconcile.invalid_target_cost,
            InvalidValuePolicy::TreatAsMissing
        );
        assert_eq!(config.delivery.mode, DeliveryMode::None);
        assert_eq!(config.storage.path, "./data");

        let jobs: Vec<_> = config.accounts.iter().map(|a| (a.name(), a.job())).collect();
        assert_eq!(
            jobs,
            vec![
                ("tevin", "cost_update"),
                ("aura", "prep_upload"),
                ("inventory", "cost_sync")
            ]
        );
        assert!(matches!(
            config.accounts[0].leads(),
            Some(SourceDescriptor::Url(_))
        ));
        assert!(config.accounts[1].leads().is_none());

        match &config.accounts[2] {
            AccountConfig::CostSync(sync) => {
                assert_eq!(sync.catalog, SourceDescriptor::Object("SB/tevin_sb.xlsx".to_string()));
                assert!(sync.apply_conflicts);
                assert_eq!(sync.filter.as_ref().unwrap().equals, "fba");
            }
            other => panic!("unexpected account {:?}", other),
        }
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_account_filter() {
        let config = RunConfig::from_toml_str(BASIC).unwrap();
        let only = vec!["aura".to_string()];
        let names: Vec<_> = config.accounts_matching(&only).map(|a| a.name()).collect();
        assert_eq!(names, vec!["aura"]);
        assert_eq!(config.accounts_matching(&[]).count(), 3);
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("COGS_TEST_SMTP_USER", "reports@example.com");
        std::env::set_var("COGS_TEST_SMTP_PASSWORD", "app-password");

        let content = format!(
            "{}\n[delivery]\nmode = \"email\"\nsmtp_host = \"smtp.gmail.com\"\nusername = \"${{COGS_TEST_SMTP_USER}}\"\npassword = \"${{COGS_TEST_SMTP_PASSWORD}}\"\nfrom = \"${{COGS_TEST_SMTP_USER}}\"\n",
            BASIC
        );
        let config = RunConfig::from_toml_str(&content).unwrap();
        assert_eq!(config.delivery.username.as_deref(), Some("reports@example.com"));
        assert_eq!(config.delivery.password.as_deref(), Some("app-password"));
        assert!(config.validate().is_ok());

        std::env::remove_var("COGS_TEST_SMTP_USER");
        std::env::remove_var("COGS_TEST_SMTP_PASSWORD");
    }

    #[test]
    fn test_unresolved_credentials_fail_validation() {
        let content = format!(
            "{}\n[delivery]\nmode = \"email\"\nsmtp_host = \"smtp.gmail.com\"\nusername = \"${{COGS_TEST_UNSET_USER}}\"\npassword = \"x\"\nfrom = \"reports@example.com\"\n",
            BASIC
        );
        let config = RunConfig::from_toml_str(&content).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_errors() {
        let bad_catalog = BASIC.replace("SB/tevin_sb.xlsx\"\n\n[[accounts]]\njob = \"prep_upload\"", "SB/tevin_sb.csv\"\n\n[[accounts]]\njob = \"prep_upload\"");
        let config = RunConfig::from_toml_str(&bad_catalog).unwrap();
        assert!(config.validate().is_err());

        let duplicate = BASIC.replace("name = \"aura\"", "name = \"tevin\"");
        let config = RunConfig::from_toml_str(&duplicate).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ReconError::InvalidConfigValueError { .. })
        ));

        let no_accounts = "[pipeline]\nname = \"x\"\n";
        let config = RunConfig::from_toml_str(no_accounts).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ReconError::MissingConfigError { .. })
        ));

        assert!(RunConfig::from_toml_str("[pipeline\nname=").is_err());
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(BASIC.as_bytes()).unwrap();

        let config = RunConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.accounts.len(), 3);
    }

    #[test]
    fn test_default_keys() {
        let config = RunConfig::from_toml_str(BASIC).unwrap();
        match &config.accounts[0] {
            AccountConfig::CostUpdate(a) => {
                assert_eq!(a.watermark_key(), "state/tevin_last_processed_date.json");
                assert_eq!(a.listing_loader_key("output/"), "output/tevin_listing_loader.xlsx");
            }
            other => panic!("unexpected account {:?}", other),
        }
        match &config.accounts[1] {
            AccountConfig::PrepUpload(a) => assert_eq!(
                a.output_key("output"),
                "output/aura/Processed_Instant_Fulfillment_Template.csv"
            ),
            other => panic!("unexpected account {:?}", other),
        }
    }
}
