use crate::core::loader::SourceDescriptor;
use crate::domain::ports::{SourceResolver, Storage};
use crate::utils::error::{ReconError, Result};
use crate::utils::validation::{validate_url, Validate};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.base_path.join(path)
    }
}

impl Storage for LocalStorage {
    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let full_path = self.full_path(path);
        tokio::fs::read(&full_path)
            .await
            .map_err(|e| ReconError::StorageError {
                key: full_path.display().to_string(),
                message: e.to_string(),
            })
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let full_path = self.full_path(path);

        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(&full_path, data)
            .await
            .map_err(|e| ReconError::StorageError {
                key: full_path.display().to_string(),
                message: e.to_string(),
            })
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.full_path(path)).await?)
    }
}

/// Uses the configured source and fails when there is none. Used by non-interactive runs.
pub struct ConfiguredResolver;

impl SourceResolver for ConfiguredResolver {
    fn resolve(
        &self,
        account: &str,
        configured: Option<&SourceDescriptor>,
    ) -> Result<SourceDescriptor> {
        configured
            .cloned()
            .ok_or_else(|| ReconError::MissingConfigError {
                field: format!("accounts.{}.leads", account),
            })
    }
}

/// Falls back to asking for a published-sheet URL on stdin.
pub struct PromptResolver<R: BufRead + Send + Sync> {
    input: std::sync::Mutex<R>,
}

impl PromptResolver<std::io::BufReader<std::io::Stdin>> {
    pub fn stdin() -> Self {
        Self::new(std::io::BufReader::new(std::io::stdin()))
    }
}

impl<R: BufRead + Send + Sync> PromptResolver<R> {
    pub fn new(input: R) -> Self {
        Self {
            input: std::sync::Mutex::new(input),
        }
    }
}

impl<R: BufRead + Send + Sync> SourceResolver for PromptResolver<R> {
    fn resolve(
        &self,
        account: &str,
        configured: Option<&SourceDescriptor>,
    ) -> Result<SourceDescriptor> {
        if let Some(source) = configured {
            return Ok(source.clone());
        }

        print!("Enter the published CSV link for {}'s leads sheet: ", account);
        std::io::stdout().flush()?;

        let mut line = String::new();
        let mut input = self.input.lock().map_err(|_| ReconError::ConfigError {
            message: "prompt input is unavailable".to_string(),
        })?;
        input.read_line(&mut line)?;

        let url = line.trim().to_string();
        validate_url(&format!("accounts.{}.leads", account), &url)?;
        Ok(SourceDescriptor::Url(url))
    }
}

#[cfg(feature = "cli")]
pub use args::CliConfig;

#[cfg(feature = "cli")]
mod args {
    use super::*;
    use clap::Parser;

    #[derive(Debug, Clone, Parser)]
    #[command(name = "cogs-reconcile")]
    #[command(about = "Reconcile sourcing leads against product catalogs and deliver the results")]
    pub struct CliConfig {
        #[arg(short, long, env = "COGS_CONFIG", default_value = "cogs-reconcile.toml")]
        pub config: PathBuf,

        /// Run only these accounts (comma separated); all accounts by default.
        #[arg(long, value_delimiter = ',')]
        pub account: Vec<String>,

        /// Overrides `[storage] path`.
        #[arg(long)]
        pub data_dir: Option<String>,

        /// Overrides `[load] output_path`.
        #[arg(long)]
        pub output_path: Option<String>,

        #[arg(long, help = "Fetch and reconcile, but write and send nothing")]
        pub dry_run: bool,

        #[arg(long, help = "Never prompt for missing lead sources")]
        pub no_prompt: bool,

        #[arg(long, help = "Enable verbose output")]
        pub verbose: bool,
    }

    impl Validate for CliConfig {
        fn validate(&self) -> Result<()> {
            use crate::utils::validation::*;

            validate_file_extension("config", &self.config.display().to_string(), &["toml"])?;
            if let Some(dir) = &self.data_dir {
                validate_path("data_dir", dir)?;
            }
            if let Some(path) = &self.output_path {
                validate_path("output_path", path)?;
            }
            for account in &self.account {
                validate_non_empty_string("account", account)?;
            }
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_parse_args() {
            let config = CliConfig::parse_from([
                "cogs-reconcile",
                "--config",
                "run.toml",
                "--account",
                "tevin,aura",
                "--dry-run",
            ]);
            assert_eq!(config.config, PathBuf::from("run.toml"));
            assert_eq!(config.account, vec!["tevin".to_string(), "aura".to_string()]);
            assert!(config.dry_run);
            assert!(!config.verbose);
            assert!(config.validate().is_ok());

            let bad = CliConfig::parse_from(["cogs-reconcile", "--config", "run.yaml"]);
            assert!(bad.validate().is_err());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_storage_round_trip() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path());

        assert!(!storage.exists("state/wm.json").await.unwrap());
        storage.write_file("state/wm.json", b"{}").await.unwrap();
        assert!(storage.exists("state/wm.json").await.unwrap());
        assert_eq!(storage.read_file("state/wm.json").await.unwrap(), b"{}");

        assert!(matches!(
            storage.read_file("missing.xlsx").await,
            Err(ReconError::StorageError { .. })
        ));
    }

    #[test]
    fn test_configured_resolver() {
        let source = SourceDescriptor::Url("https://example.com/pub?output=csv".to_string());
        assert_eq!(ConfiguredResolver.resolve("tevin", Some(&source)).unwrap(), source);
        assert!(matches!(
            ConfiguredResolver.resolve("tevin", None),
            Err(ReconError::MissingConfigError { .. })
        ));
    }

    #[test]
    fn test_prompt_resolver() {
        let resolver = PromptResolver::new(Cursor::new(b"  https://example.com/pub?output=csv \n".to_vec()));
        assert_eq!(
            resolver.resolve("aura", None).unwrap(),
            SourceDescriptor::Url("https://example.com/pub?output=csv".to_string())
        );

        let configured = SourceDescriptor::Path(PathBuf::from("leads.csv"));
        let untouched = PromptResolver::new(Cursor::new(Vec::new()));
        assert_eq!(untouched.resolve("aura", Some(&configured)).unwrap(), configured);

        let garbage = PromptResolver::new(Cursor::new(b"not a url\n".to_vec()));
        assert!(garbage.resolve("aura", None).is_err());
    }
}
