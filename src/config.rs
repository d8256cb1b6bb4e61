// src/config.rs
//! Configuration file parsing
//!
//! Supports TOML configuration files with the following sections:
//! - [ingest] - Inbox directories, polling interval, worker count
//! - [outbox] - Root of the processed/rejected/failed tree
//! - [output] - Bag output directory, extra digest algorithms, entry timestamp
//! - [validator] - Bag validation service
//! - [vault] - Vault catalog service, NBN prefix
//! - [vocabulary] - Access right URI overrides

use crate::bag::Vocabulary;
use crate::hash::DigestAlgorithm;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// TOML configuration file structure
#[derive(Debug, Default, Deserialize)]
pub struct BagforgeConfig {
    #[serde(default)]
    pub ingest: IngestSection,

    #[serde(default)]
    pub outbox: OutboxSection,

    #[serde(default)]
    pub output: OutputSection,

    #[serde(default)]
    pub validator: ServiceSection,

    #[serde(default)]
    pub vault: VaultSection,

    /// Access category -> access right URI
    #[serde(default)]
    pub vocabulary: BTreeMap<String, String>,
}

/// Inbox watching
#[derive(Debug, Deserialize)]
pub struct IngestSection {
    /// Directories whose subdirectories are deposits
    #[serde(default)]
    pub inboxes: Vec<PathBuf>,

    /// How often the watcher looks for new deposits (e.g., "500ms", "2s")
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,

    /// Worker threads processing deposits
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for IngestSection {
    fn default() -> Self {
        Self {
            inboxes: Vec::new(),
            poll_interval: default_poll_interval(),
            workers: default_workers(),
        }
    }
}

fn default_poll_interval() -> String {
    "1s".to_string()
}

fn default_workers() -> usize {
    2
}

/// Outbox tree
#[derive(Debug, Deserialize)]
pub struct OutboxSection {
    #[serde(default = "default_outbox_root")]
    pub root: PathBuf,

    /// Start even if processed/rejected/failed already hold deposits
    #[serde(default)]
    pub allow_non_empty: bool,
}

impl Default for OutboxSection {
    fn default() -> Self {
        Self {
            root: default_outbox_root(),
            allow_non_empty: false,
        }
    }
}

fn default_outbox_root() -> PathBuf {
    PathBuf::from("/var/opt/bagforge/outbox")
}

/// Produced bags
#[derive(Debug, Deserialize)]
pub struct OutputSection {
    #[serde(default = "default_output_directory")]
    pub directory: PathBuf,

    /// Digest algorithms on top of md5 and sha256
    #[serde(default)]
    pub extra_algorithms: Vec<String>,

    /// Timestamp of every archive entry, seconds since the epoch
    #[serde(default = "default_mtime")]
    pub mtime: u64,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            directory: default_output_directory(),
            extra_algorithms: Vec::new(),
            mtime: default_mtime(),
        }
    }
}

fn default_output_directory() -> PathBuf {
    PathBuf::from("/var/opt/bagforge/bags")
}

fn default_mtime() -> u64 {
    crate::bag::writer::DEFAULT_MTIME
}

/// Remote service endpoint
#[derive(Debug, Deserialize)]
pub struct ServiceSection {
    #[serde(default = "default_validator_url")]
    pub url: String,

    /// Request timeout (e.g., "30s", "5m")
    #[serde(default = "default_timeout")]
    pub timeout: String,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            url: default_validator_url(),
            timeout: default_timeout(),
        }
    }
}

fn default_validator_url() -> String {
    "http://localhost:20330/validate".to_string()
}

fn default_timeout() -> String {
    "30s".to_string()
}

/// Vault catalog
#[derive(Debug, Deserialize)]
pub struct VaultSection {
    #[serde(default = "default_vault_url")]
    pub url: String,

    #[serde(default = "default_timeout")]
    pub timeout: String,

    /// Prefix of minted NBNs
    #[serde(default = "default_nbn_prefix")]
    pub nbn_prefix: String,
}

impl Default for VaultSection {
    fn default() -> Self {
        Self {
            url: default_vault_url(),
            timeout: default_timeout(),
            nbn_prefix: default_nbn_prefix(),
        }
    }
}

fn default_vault_url() -> String {
    "http://localhost:20305".to_string()
}

fn default_nbn_prefix() -> String {
    "urn:nbn:nl:ui:13-".to_string()
}

impl BagforgeConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: BagforgeConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.ingest.workers == 0 {
            anyhow::bail!("ingest.workers must be at least 1");
        }
        let interval = self.poll_interval()?;
        if interval.is_zero() {
            anyhow::bail!("ingest.poll_interval must be greater than zero");
        }
        self.validator_timeout()?;
        self.vault_timeout()?;
        self.extra_algorithms()?;

        for (name, url) in [("validator.url", &self.validator.url), ("vault.url", &self.vault.url)] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                anyhow::bail!("{} must be an http(s) URL, got '{}'", name, url);
            }
        }

        // A deposit may not be moved into a directory that is also watched
        for inbox in &self.ingest.inboxes {
            if self.outbox.root.starts_with(inbox) {
                anyhow::bail!(
                    "outbox.root {} lies inside inbox {}",
                    self.outbox.root.display(),
                    inbox.display()
                );
            }
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Result<Duration> {
        parse_duration(&self.ingest.poll_interval)
            .with_context(|| format!("Invalid ingest.poll_interval: {}", self.ingest.poll_interval))
    }

    pub fn validator_timeout(&self) -> Result<Duration> {
        parse_duration(&self.validator.timeout)
            .with_context(|| format!("Invalid validator.timeout: {}", self.validator.timeout))
    }

    pub fn vault_timeout(&self) -> Result<Duration> {
        parse_duration(&self.vault.timeout)
            .with_context(|| format!("Invalid vault.timeout: {}", self.vault.timeout))
    }

    /// Extra digest algorithms, parsed
    pub fn extra_algorithms(&self) -> Result<Vec<DigestAlgorithm>> {
        self.output
            .extra_algorithms
            .iter()
            .map(|name| {
                name.parse::<DigestAlgorithm>()
                    .with_context(|| format!("Invalid output.extra_algorithms entry: {name}"))
            })
            .collect()
    }

    /// Vocabulary table with the configured overrides applied
    pub fn vocabulary(&self) -> Vocabulary {
        Vocabulary::with_overrides(&self.vocabulary)
    }
}

/// Parse a human-readable duration string (e.g., "500ms", "15m", "1h", "30s")
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim().to_lowercase();

    if let Some(ms) = s.strip_suffix("ms") {
        let num: u64 = ms
            .trim()
            .parse()
            .with_context(|| format!("Invalid duration number: {}", ms))?;
        return Ok(Duration::from_millis(num));
    }

    let (num_str, multiplier) = if s.ends_with('d') {
        (&s[..s.len() - 1], 24 * 60 * 60)
    } else if s.ends_with('h') {
        (&s[..s.len() - 1], 60 * 60)
    } else if s.ends_with('m') {
        (&s[..s.len() - 1], 60)
    } else if s.ends_with('s') {
        (&s[..s.len() - 1], 1)
    } else {
        // Assume seconds
        (s.as_str(), 1)
    };

    let num: u64 = num_str
        .trim()
        .parse()
        .with_context(|| format!("Invalid duration number: {}", num_str))?;

    let secs = num
        .checked_mul(multiplier)
        .with_context(|| format!("Duration out of range: {}", s))?;
    Ok(Duration::from_secs(secs))
}
