// src/validator.rs

//! Client for the external bag validation service
//!
//! The service receives a multipart POST with a single `command` part holding
//! a JSON document that points at the bag on the shared filesystem:
//!
//! ```json
//! {"bagLocation": "/data/inbox/dep-1/bag", "packageType": "DEPOSIT"}
//! ```
//!
//! and answers with `{isCompliant, ruleViolations, profileVersion}`. Requests
//! are not retried; a failed call fails the deposit.

use crate::error::{Error, Result, RuleViolation};
use reqwest::blocking::{Client, multipart};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of a successful validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub profile_version: String,
}

/// Something that can judge a bag on disk
pub trait BagValidator: Send + Sync {
    fn validate(&self, bag_dir: &Path, package_type: &str) -> Result<ValidationReport>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ValidateCommand<'a> {
    bag_location: &'a str,
    package_type: &'a str,
}

#[derive(Debug, Deserialize)]
struct WireViolation {
    rule: String,
    violation: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValidateResponse {
    is_compliant: bool,
    #[serde(default)]
    rule_violations: Option<Vec<WireViolation>>,
    #[serde(default)]
    profile_version: String,
}

/// HTTP implementation of [`BagValidator`]
pub struct ValidatorClient {
    client: Client,
    url: String,
}

impl ValidatorClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl BagValidator for ValidatorClient {
    fn validate(&self, bag_dir: &Path, package_type: &str) -> Result<ValidationReport> {
        let location = bag_dir.canonicalize()?;
        let location = location.to_str().ok_or_else(|| {
            Error::InvalidArgument(format!("bag path is not valid UTF-8: {}", bag_dir.display()))
        })?;
        let command = serde_json::to_string(&ValidateCommand {
            bag_location: location,
            package_type,
        })?;
        debug!("Validating {} at {}", location, self.url);

        let part = multipart::Part::text(command)
            .mime_str("application/json")
            .map_err(|e| Error::transport(&self.url, e.to_string()))?;
        let form = multipart::Form::new().part("command", part);

        let response = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .map_err(|e| {
                warn!("Validator request to {} failed: {}", self.url, e);
                Error::transport(&self.url, e.to_string())
            })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|e| Error::transport(&self.url, format!("failed to read response: {e}")))?;
        let report = interpret_response(&self.url, status, &body)?;
        info!(
            "Bag {} is compliant with profile version {}",
            location, report.profile_version
        );
        Ok(report)
    }
}

/// Turn a validator HTTP response into a report or an error
pub fn interpret_response(endpoint: &str, status: u16, body: &str) -> Result<ValidationReport> {
    if status != 200 {
        warn!("Validator {} answered HTTP {}", endpoint, status);
        return Err(Error::transport(endpoint, format!("HTTP {status}: {}", body.trim())));
    }

    let response: ValidateResponse = serde_json::from_str(body)
        .map_err(|e| Error::transport(endpoint, format!("unreadable response: {e}")))?;

    if response.is_compliant {
        return Ok(ValidationReport {
            profile_version: response.profile_version,
        });
    }

    match response.rule_violations {
        Some(violations) if !violations.is_empty() => Err(Error::InvalidDeposit {
            profile_version: response.profile_version,
            violations: violations
                .into_iter()
                .map(|v| RuleViolation {
                    rule: v.rule,
                    violation: v.violation,
                })
                .collect(),
        }),
        _ => Err(Error::ValidatorAnomaly(response.profile_version)),
    }
}
