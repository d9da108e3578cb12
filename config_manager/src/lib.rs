use chrono::{NaiveDate, TimeZone, Utc};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Configuration loading error: {0}")]
    ConfigLoad(#[from] ConfigError),
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
    #[error("Could not read API key file {path}: {source}")]
    KeyFile {
        path: String,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ConfigurationError>;

/// Every setting a collection run needs, built once at process start and
/// handed to each component by reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// BirdEye API configuration (prices, OHLCV, metadata, security, trending)
    pub birdeye: BirdEyeConfig,

    /// Moralis Solana gateway configuration (pairs and pair OHLCV)
    pub moralis: MoralisConfig,

    /// Bitquery GraphQL configuration (daily DEX trade aggregates)
    pub bitquery: BitqueryConfig,

    /// pump.fun frontend API configuration
    pub pump: PumpConfig,

    /// Solana JSON-RPC configuration (program signatures and transactions)
    pub solana_rpc: SolanaRpcConfig,

    /// Backoff-retry policy shared by every HTTP source
    pub retry: RetrySettings,

    /// Multi-resolution window boundaries
    pub windowing: WindowingConfig,

    /// Where artifacts, cache entries and the ledger live
    pub storage: StorageConfig,

    /// Batch-run options (mirrors the command line)
    pub fetch: FetchOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BirdEyeConfig {
    /// BirdEye API key
    pub api_key: String,

    /// Optional file holding the API key (used when `api_key` is empty)
    pub api_key_file: Option<String>,

    /// BirdEye API base URL
    pub api_base_url: String,

    /// Value of the `x-chain` header
    pub chain: String,

    /// Request timeout in seconds
    pub request_timeout_seconds: u64,

    /// Page size for trending / trades pagination (API maximum is 20 for trending)
    pub page_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoralisConfig {
    pub api_key: String,
    pub api_key_file: Option<String>,
    pub api_base_url: String,
    pub request_timeout_seconds: u64,
    /// Page size for the pairs endpoint
    pub pairs_page_size: usize,
    /// Page size for the pair OHLCV endpoint
    pub ohlcv_page_size: usize,
    /// Delay between per-pair history requests in milliseconds
    pub pair_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BitqueryConfig {
    pub api_key: String,
    pub api_key_file: Option<String>,
    /// GraphQL endpoint (the EAP streaming endpoint by default)
    pub endpoint: String,
    pub request_timeout_seconds: u64,
    /// Rows per GraphQL page
    pub page_size: usize,
    /// Total rows to collect per run
    pub max_records: usize,
    /// Delay between pages in milliseconds
    pub page_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PumpConfig {
    pub api_base_url: String,
    pub request_timeout_seconds: u64,
    /// Only addresses with this suffix are pump.fun coins
    pub address_suffix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolanaRpcConfig {
    /// RPC endpoint URL (may embed a provider key)
    pub rpc_url: String,
    pub request_timeout_seconds: u64,
    /// Signatures per getSignaturesForAddress page (RPC maximum 1000)
    pub signature_page_size: usize,
    /// Stop after this many signatures
    pub max_signatures: usize,
    /// Concurrent transaction detail lookups per page
    pub max_concurrent_requests: usize,
    /// Delay between signature pages in milliseconds
    pub page_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Maximum retries after the first attempt
    pub max_retries: u32,
    /// First backoff wait in milliseconds
    pub initial_wait_ms: u64,
    /// Multiplier applied on HTTP 429
    pub rate_limit_multiplier: u32,
    /// Statuses that are never retried (401 is always permanent)
    pub permanent_status_codes: Vec<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowingConfig {
    /// Length of the minute-resolution phase after creation
    pub minute_phase_secs: i64,
    /// Maximum span of one minute-resolution request
    pub minute_split_secs: i64,
    /// End of the hourly phase, measured from creation
    pub hourly_phase_end_secs: i64,
    pub minute_interval: String,
    pub hourly_interval: String,
    pub coarse_interval: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for every artifact written by the jobs
    pub data_dir: String,
    /// Append-only diagnostic error log, relative to `data_dir`
    pub error_log_file: String,
    /// Progress ledger name, relative to `data_dir`; `{job}` is replaced by the job name
    pub progress_file: String,
    /// Persist the ledger after this many processed entities
    pub flush_interval: usize,
    /// How many failed / skipped keys the final report lists
    pub report_limit: usize,
}

/// Batch-run options, one field per command-line flag
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchOptions {
    /// Start date (YYYY-MM-DD) for tokens without a known creation time
    pub default_start_date: String,
    /// Skip tokens without creation time instead of using the default start
    pub skip_missing: bool,
    /// Politeness delay between requests, in seconds
    pub sleep_seconds: f64,
    /// Also fetch security details for each token
    pub fetch_security: bool,
    /// Use one interval instead of multi-resolution windows
    pub single_interval: Option<String>,
    /// Reset the progress ledger before running
    pub reset: bool,
    /// Reprocess entities previously marked failed
    pub retry_failed: bool,
    /// Per-entity progress output
    pub verbose: bool,
    /// Ignore cached artifacts and fetch again
    pub force_refresh: bool,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            birdeye: BirdEyeConfig {
                api_key: "".to_string(), // Must be set in env, config file or key file
                api_key_file: None,
                api_base_url: "https://public-api.birdeye.so".to_string(),
                chain: "solana".to_string(),
                request_timeout_seconds: 30,
                page_size: 20,
            },
            moralis: MoralisConfig {
                api_key: "".to_string(),
                api_key_file: None,
                api_base_url: "https://solana-gateway.moralis.io".to_string(),
                request_timeout_seconds: 30,
                pairs_page_size: 25,
                ohlcv_page_size: 100,
                pair_delay_ms: 1000,
            },
            bitquery: BitqueryConfig {
                api_key: "".to_string(),
                api_key_file: None,
                endpoint: "https://streaming.bitquery.io/eap".to_string(),
                request_timeout_seconds: 60,
                page_size: 5,
                max_records: 2000,
                page_delay_ms: 5000,
            },
            pump: PumpConfig {
                api_base_url: "https://frontend-api.pump.fun".to_string(),
                request_timeout_seconds: 30,
                address_suffix: "pump".to_string(),
            },
            solana_rpc: SolanaRpcConfig {
                rpc_url: "https://api.mainnet-beta.solana.com".to_string(),
                request_timeout_seconds: 30,
                signature_page_size: 200,
                max_signatures: 50000,
                max_concurrent_requests: 8,
                page_delay_ms: 3000,
            },
            retry: RetrySettings {
                max_retries: 3,
                initial_wait_ms: 5000,
                rate_limit_multiplier: 3,
                permanent_status_codes: vec![400, 401, 403, 404, 405, 410, 422],
            },
            windowing: WindowingConfig {
                minute_phase_secs: 24 * 3600,
                minute_split_secs: 12 * 3600,
                hourly_phase_end_secs: 8 * 24 * 3600,
                minute_interval: "1m".to_string(),
                hourly_interval: "1H".to_string(),
                coarse_interval: "12H".to_string(),
            },
            storage: StorageConfig {
                data_dir: "data".to_string(),
                error_log_file: "birdeye_errors.csv".to_string(),
                progress_file: "{job}_progress.json".to_string(),
                flush_interval: 10,
                report_limit: 20,
            },
            fetch: FetchOptions::default(),
        }
    }
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            default_start_date: "2024-01-01".to_string(),
            skip_missing: false,
            sleep_seconds: 1.5,
            fetch_security: false,
            single_interval: None,
            reset: false,
            retry_failed: false,
            verbose: false,
            force_refresh: false,
        }
    }
}

impl FetchOptions {
    /// Unix timestamp (UTC midnight) of `default_start_date`
    pub fn default_start_ts(&self) -> Result<i64> {
        let date = NaiveDate::parse_from_str(&self.default_start_date, "%Y-%m-%d").map_err(|_| {
            ConfigurationError::InvalidValue(format!(
                "Invalid date format '{}'. Use YYYY-MM-DD",
                self.default_start_date
            ))
        })?;
        let midnight = date.and_hms_opt(0, 0, 0).ok_or_else(|| {
            ConfigurationError::InvalidValue(format!("Invalid date '{}'", self.default_start_date))
        })?;
        Ok(Utc.from_utc_datetime(&midnight).timestamp())
    }

    pub fn sleep_duration(&self) -> Duration {
        Duration::from_secs_f64(self.sleep_seconds.max(0.0))
    }

    pub fn validate(&self) -> Result<()> {
        if !self.sleep_seconds.is_finite() || self.sleep_seconds < 0.0 {
            return Err(ConfigurationError::InvalidValue(
                "sleep_seconds must be a non-negative number".to_string(),
            ));
        }
        if !self.skip_missing {
            self.default_start_ts()?;
        }
        Ok(())
    }
}

impl RetrySettings {
    pub fn retry_config(&self) -> retry_utils::RetryConfig {
        retry_utils::RetryConfig::new(
            self.max_retries,
            Duration::from_millis(self.initial_wait_ms),
            self.rate_limit_multiplier,
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.rate_limit_multiplier == 0 {
            return Err(ConfigurationError::InvalidValue(
                "rate_limit_multiplier must be at least 1".to_string(),
            ));
        }
        if self.permanent_status_codes.contains(&429) {
            return Err(ConfigurationError::InvalidValue(
                "429 is a rate limit and cannot be configured as permanent".to_string(),
            ));
        }
        Ok(())
    }
}

impl WindowingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.minute_split_secs <= 0 || self.minute_phase_secs <= 0 {
            return Err(ConfigurationError::InvalidValue(
                "window lengths must be positive".to_string(),
            ));
        }
        if self.minute_split_secs > self.minute_phase_secs {
            return Err(ConfigurationError::InvalidValue(
                "minute_split_secs cannot exceed minute_phase_secs".to_string(),
            ));
        }
        if self.hourly_phase_end_secs <= self.minute_phase_secs {
            return Err(ConfigurationError::InvalidValue(
                "hourly_phase_end_secs must be after minute_phase_secs".to_string(),
            ));
        }
        Ok(())
    }
}

impl StorageConfig {
    pub fn data_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }

    pub fn error_log_path(&self) -> PathBuf {
        self.data_path().join(&self.error_log_file)
    }

    /// Ledger file of one job, e.g. `data/ohlcv_progress.json`
    pub fn progress_path(&self, job: &str) -> PathBuf {
        self.data_path().join(self.progress_file.replace("{job}", job))
    }
}

/// The API-keyed sources a job can require
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyedSource {
    BirdEye,
    Moralis,
    Bitquery,
}

impl SystemConfig {
    /// Load configuration from file and environment variables
    pub fn load() -> Result<Self> {
        Self::load_from_path("harvest.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_path<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config_builder = Config::builder()
            // Start with defaults
            .add_source(Config::try_from(&SystemConfig::default())?);

        if config_path.as_ref().exists() {
            info!(
                "Loading configuration from: {}",
                config_path.as_ref().display()
            );
            config_builder = config_builder.add_source(File::from(config_path.as_ref()));
        } else {
            debug!("Config file not found, using defaults and environment variables");
        }

        config_builder = config_builder.add_source(
            Environment::with_prefix("HARVEST")
                .try_parsing(true)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("retry.permanent_status_codes"),
        );

        let mut system_config: SystemConfig = config_builder.build()?.try_deserialize()?;
        system_config.resolve_key_files()?;
        system_config.validate()?;

        Ok(system_config)
    }

    /// Fill empty API keys from their key files
    pub fn resolve_key_files(&mut self) -> Result<()> {
        resolve_key(&mut self.birdeye.api_key, self.birdeye.api_key_file.as_deref())?;
        resolve_key(&mut self.moralis.api_key, self.moralis.api_key_file.as_deref())?;
        resolve_key(&mut self.bitquery.api_key, self.bitquery.api_key_file.as_deref())?;
        Ok(())
    }

    /// Validate source-independent configuration values
    pub fn validate(&self) -> Result<()> {
        self.retry.validate()?;
        self.windowing.validate()?;
        self.fetch.validate()?;

        for (name, timeout) in [
            ("birdeye", self.birdeye.request_timeout_seconds),
            ("moralis", self.moralis.request_timeout_seconds),
            ("bitquery", self.bitquery.request_timeout_seconds),
            ("pump", self.pump.request_timeout_seconds),
            ("solana_rpc", self.solana_rpc.request_timeout_seconds),
        ] {
            if timeout == 0 {
                return Err(ConfigurationError::InvalidValue(format!(
                    "{} request timeout must be greater than 0",
                    name
                )));
            }
        }

        for (name, size) in [
            ("birdeye.page_size", self.birdeye.page_size),
            ("moralis.pairs_page_size", self.moralis.pairs_page_size),
            ("moralis.ohlcv_page_size", self.moralis.ohlcv_page_size),
            ("bitquery.page_size", self.bitquery.page_size),
            ("solana_rpc.signature_page_size", self.solana_rpc.signature_page_size),
            ("solana_rpc.max_concurrent_requests", self.solana_rpc.max_concurrent_requests),
            ("storage.flush_interval", self.storage.flush_interval),
        ] {
            if size == 0 {
                return Err(ConfigurationError::InvalidValue(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
        }

        if self.solana_rpc.signature_page_size > 1000 {
            return Err(ConfigurationError::InvalidValue(
                "solana_rpc.signature_page_size cannot exceed 1000".to_string(),
            ));
        }

        Ok(())
    }

    /// Check that the key a job needs is present
    pub fn require_key(&self, source: KeyedSource) -> Result<()> {
        let (name, key) = match source {
            KeyedSource::BirdEye => ("BirdEye", &self.birdeye.api_key),
            KeyedSource::Moralis => ("Moralis", &self.moralis.api_key),
            KeyedSource::Bitquery => ("Bitquery", &self.bitquery.api_key),
        };
        if key.trim().is_empty() {
            return Err(ConfigurationError::InvalidValue(format!(
                "{} API key is required",
                name
            )));
        }
        Ok(())
    }
}

fn resolve_key(key: &mut String, key_file: Option<&str>) -> Result<()> {
    if !key.trim().is_empty() {
        return Ok(());
    }
    let Some(path) = key_file else {
        return Ok(());
    };
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            *key = contents.lines().next().unwrap_or_default().trim().to_string();
            if key.is_empty() {
                warn!("API key file {} is empty", path);
            }
            Ok(())
        }
        Err(source) => Err(ConfigurationError::KeyFile {
            path: path.to_string(),
            source,
        }),
    }
}
