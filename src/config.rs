use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::pricing::RemovalPolicy;

/// Main configuration structure for fieldquote
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FieldQuoteConfig {
    /// Catalog and reconciliation settings
    pub pricing: PricingConfig,
    /// Invoice numbering
    pub invoicing: InvoicingConfig,
    /// Transition handling
    pub lifecycle: LifecycleConfig,
    /// Observability settings
    pub observability: ObservabilityConfig,
    /// Database settings (optional)
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PricingConfig {
    /// Allowed deviation from the catalog price, in basis points
    pub price_tolerance_bps: u32,
    /// Accept proposed items that are not in the tenant catalog
    pub allow_uncataloged: bool,
    /// Tax rate for new work items, in basis points (850 = 8.5%)
    pub default_tax_rate_bps: u32,
    /// What reconciliation does with saved items a proposal omits
    pub removal_policy: RemovalPolicy,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct InvoicingConfig {
    /// Label prefix, e.g. INV
    pub prefix: String,
    /// Zero-padding width of the sequence in labels
    pub width: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LifecycleConfig {
    /// How often a write that lost an optimistic-concurrency race is retried
    pub conflict_retries: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level
    pub log_level: String,
    /// Emit JSON log lines instead of human-readable output
    pub json_logs: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Database URL (SQLite file path or connection string)
    pub url: String,
    /// Maximum connections in pool
    pub max_connections: u32,
    /// Enable automatic migrations
    pub auto_migrate: bool,
    /// How long a writer waits for the database lock before giving up
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

impl Default for FieldQuoteConfig {
    fn default() -> Self {
        Self {
            pricing: PricingConfig {
                price_tolerance_bps: 1_000, // 10%
                allow_uncataloged: false,
                default_tax_rate_bps: 850,
                removal_policy: RemovalPolicy::Retain,
            },
            invoicing: InvoicingConfig {
                prefix: "INV".to_string(),
                width: 4,
            },
            lifecycle: LifecycleConfig {
                conflict_retries: 1,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                json_logs: false,
            },
            database: None,
        }
    }
}

impl FieldQuoteConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration file (fieldquote.toml)
    /// 3. Environment variables (prefixed with FIELDQUOTE__)
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Like [`FieldQuoteConfig::load`], reading `path` instead of
    /// `fieldquote.toml` when given.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        match path {
            Some(path) => {
                builder = builder.add_source(File::from(path));
            }
            None => {
                if Path::new("fieldquote.toml").exists() {
                    builder = builder.add_source(File::with_name("fieldquote"));
                }
            }
        }

        // Override with environment variables
        builder = builder.add_source(
            Environment::with_prefix("FIELDQUOTE")
                .separator("__")
                .try_parsing(true),
        );

        let config: FieldQuoteConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pricing.default_tax_rate_bps > 10_000 {
            anyhow::bail!(
                "pricing.default_tax_rate_bps must be at most 10000, got {}",
                self.pricing.default_tax_rate_bps
            );
        }
        if self.invoicing.prefix.trim().is_empty() {
            anyhow::bail!("invoicing.prefix must not be empty");
        }
        if self.invoicing.width == 0 || self.invoicing.width > 12 {
            anyhow::bail!("invoicing.width must be between 1 and 12");
        }
        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_round_trip_through_loader() {
        let file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        FieldQuoteConfig::default().save_to_file(file.path()).unwrap();
        let loaded = FieldQuoteConfig::load_from(Some(file.path())).unwrap();
        assert_eq!(loaded.pricing, FieldQuoteConfig::default().pricing);
        assert_eq!(loaded.invoicing.prefix, "INV");
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[pricing]\nremoval_policy = \"replace\"\nprice_tolerance_bps = 500\n\n[invoicing]\nprefix = \"ACME\""
        )
        .unwrap();

        let loaded = FieldQuoteConfig::load_from(Some(file.path())).unwrap();
        assert_eq!(loaded.pricing.removal_policy, RemovalPolicy::Replace);
        assert_eq!(loaded.pricing.price_tolerance_bps, 500);
        assert_eq!(loaded.pricing.default_tax_rate_bps, 850);
        assert_eq!(loaded.invoicing.prefix, "ACME");
        assert_eq!(loaded.invoicing.width, 4);
    }

    #[test]
    fn test_database_section_defaults_busy_timeout() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[database]\nurl = \"sqlite://fieldquote.db\"\nmax_connections = 4\nauto_migrate = true"
        )
        .unwrap();

        let loaded = FieldQuoteConfig::load_from(Some(file.path())).unwrap();
        let database = loaded.database.unwrap();
        assert_eq!(database.max_connections, 4);
        assert_eq!(database.busy_timeout_ms, 5_000);
    }

    #[test]
    fn test_rejects_invalid_values() {
        let mut config = FieldQuoteConfig::default();
        config.invoicing.width = 0;
        assert!(config.validate().is_err());
        config.invoicing.width = 4;
        config.pricing.default_tax_rate_bps = 20_000;
        assert!(config.validate().is_err());
    }
}
