// src/vault.rs

//! Vault catalog registration
//!
//! The catalog knows every dataset version that was ever accepted. Before a
//! bag is produced the pipeline asks it which version number comes next and
//! registers a skeleton record for that version; update deposits must refer to
//! a version the catalog already knows.
//!
//! Endpoints used:
//!
//! | Request | Meaning |
//! |---------|---------|
//! | `GET {base}/datasets/sword-token/{token}` | prior registration, 404 if none |
//! | `GET {base}/bags/{bag_id}/versions/latest` | `{"version": n}`, 404 if none |
//! | `POST {base}/bags/{bag_id}/versions/{n}` | register a skeleton record |

use crate::deposit::{Deposit, SourceFormat};
use crate::error::{Error, Result};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A dataset version the catalog already has
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriorRegistration {
    /// Key of the version series
    pub bag_id: String,
    pub nbn: String,
    #[serde(default)]
    pub version: Option<u32>,
}

/// Body of a version registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkeletonRecord {
    pub skeleton_record: bool,
    pub nbn: String,
    pub data_supplier: String,
    pub sword_token: String,
}

/// Catalog operations the registrar needs
pub trait VaultCatalog: Send + Sync {
    fn find_existing_version(&self, sword_token: &str) -> Result<Option<PriorRegistration>>;

    /// Highest registered version of a series, 0 if there is none
    fn highest_version(&self, bag_id: &str) -> Result<u32>;

    fn register_version(&self, bag_id: &str, version: u32, record: &SkeletonRecord) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct LatestVersion {
    version: u32,
}

/// HTTP implementation of [`VaultCatalog`]
pub struct VaultCatalogClient {
    client: Client,
    base_url: String,
}

impl VaultCatalogClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn get(&self, url: &str) -> Result<(u16, String)> {
        debug!("GET {}", url);
        let response = self.client.get(url).send().map_err(|e| {
            warn!("Vault request to {} failed: {}", url, e);
            Error::transport(url, e.to_string())
        })?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|e| Error::transport(url, format!("failed to read response: {e}")))?;
        Ok((status, body))
    }
}

impl VaultCatalog for VaultCatalogClient {
    fn find_existing_version(&self, sword_token: &str) -> Result<Option<PriorRegistration>> {
        let url = format!(
            "{}/datasets/sword-token/{}",
            self.base_url,
            urlencoding::encode(sword_token)
        );
        let (status, body) = self.get(&url)?;
        interpret_lookup(&url, status, &body)
    }

    fn highest_version(&self, bag_id: &str) -> Result<u32> {
        let url = format!(
            "{}/bags/{}/versions/latest",
            self.base_url,
            urlencoding::encode(bag_id)
        );
        let (status, body) = self.get(&url)?;
        interpret_latest(&url, status, &body)
    }

    fn register_version(&self, bag_id: &str, version: u32, record: &SkeletonRecord) -> Result<()> {
        let url = format!(
            "{}/bags/{}/versions/{}",
            self.base_url,
            urlencoding::encode(bag_id),
            version
        );
        debug!("POST {}", url);
        let response = self.client.post(&url).json(record).send().map_err(|e| {
            warn!("Vault request to {} failed: {}", url, e);
            Error::transport(&url, e.to_string())
        })?;
        let status = response.status().as_u16();
        let body = response.text().unwrap_or_default();
        check_success(&url, status, &body)
    }
}

fn check_success(endpoint: &str, status: u16, body: &str) -> Result<()> {
    if (200..300).contains(&status) {
        return Ok(());
    }
    warn!("Vault {} answered HTTP {}", endpoint, status);
    Err(Error::transport(endpoint, format!("HTTP {status}: {}", body.trim())))
}

/// Interpret the answer to a sword token lookup
pub fn interpret_lookup(endpoint: &str, status: u16, body: &str) -> Result<Option<PriorRegistration>> {
    if status == 404 {
        return Ok(None);
    }
    check_success(endpoint, status, body)?;
    serde_json::from_str(body)
        .map(Some)
        .map_err(|e| Error::transport(endpoint, format!("unreadable response: {e}")))
}

/// Interpret the answer to a latest version query
pub fn interpret_latest(endpoint: &str, status: u16, body: &str) -> Result<u32> {
    if status == 404 {
        return Ok(0);
    }
    check_success(endpoint, status, body)?;
    serde_json::from_str::<LatestVersion>(body)
        .map(|latest| latest.version)
        .map_err(|e| Error::transport(endpoint, format!("unreadable response: {e}")))
}

/// Resolves identity and version of deposits against the catalog
pub struct Registrar {
    catalog: Arc<dyn VaultCatalog>,
    nbn_prefix: String,
}

impl Registrar {
    pub fn new(catalog: Arc<dyn VaultCatalog>, nbn_prefix: impl Into<String>) -> Self {
        Self {
            catalog,
            nbn_prefix: nbn_prefix.into(),
        }
    }

    /// Attach an update deposit to the version series it continues
    ///
    /// Does nothing for deposits that are not updates.
    pub fn resolve_update(&self, deposit: &mut Deposit) -> Result<()> {
        if !deposit.is_update() {
            return Ok(());
        }

        let Some(prior) = self.catalog.find_existing_version(&deposit.sword_token)? else {
            return Err(Error::Consistency(format!(
                "deposit {} is an update of {}, but no version with sword token {} is registered",
                deposit.id(),
                deposit.version_series_id(),
                deposit.sword_token
            )));
        };

        if let Some(nbn) = &deposit.nbn
            && *nbn != prior.nbn
        {
            return Err(Error::Consistency(format!(
                "deposit {} carries NBN {}, but the registered dataset has {}",
                deposit.id(),
                nbn,
                prior.nbn
            )));
        }

        debug!(
            "Deposit {} continues series {} ({})",
            deposit.id(),
            prior.bag_id,
            prior.nbn
        );
        deposit.nbn = Some(prior.nbn);
        deposit.is_version_of = Some(prior.bag_id);
        Ok(())
    }

    /// Register the next version of the deposit's series
    ///
    /// Assigns NBN and version to the deposit and returns the version.
    pub fn register_new_version(&self, deposit: &mut Deposit) -> Result<u32> {
        let series = deposit.version_series_id().to_string();
        let highest = self.catalog.highest_version(&series)?;
        if !deposit.is_update() && highest > 0 {
            warn!(
                "Deposit {} is not an update, but series {} already has version {}",
                deposit.id(),
                series,
                highest
            );
        }
        let version = highest.checked_add(1).ok_or_else(|| {
            Error::Consistency(format!(
                "series {series} already reached the highest possible version {highest}"
            ))
        })?;

        let nbn = match (&deposit.nbn, deposit.source_format) {
            (Some(nbn), _) => nbn.clone(),
            (None, SourceFormat::Migration) => {
                return Err(Error::Consistency(format!(
                    "migrated deposit {} has no NBN",
                    deposit.id()
                )));
            }
            (None, _) => self.mint_nbn(),
        };

        let record = SkeletonRecord {
            skeleton_record: true,
            nbn: nbn.clone(),
            data_supplier: deposit.depositor_id.clone(),
            sword_token: deposit.sword_token.clone(),
        };
        self.catalog.register_version(&series, version, &record)?;

        info!(
            "Registered {} version {} for deposit {} ({})",
            series,
            version,
            deposit.id(),
            nbn
        );
        deposit.nbn = Some(nbn);
        deposit.version = Some(version);
        Ok(version)
    }

    fn mint_nbn(&self) -> String {
        format!("{}{}", self.nbn_prefix, uuid::Uuid::new_v4())
    }
}
