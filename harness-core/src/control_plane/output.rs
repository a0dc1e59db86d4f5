//! Adapters from free-text CLI output to typed values.
//!
//! CLI output is not a stable interface, so all of the scraping lives here and
//! every unexpected shape becomes a `Parse` error instead of a missing value.

use super::CommandOutput;
use crate::error::{HarnessError, HarnessResult};
use serde_json::Value;
use std::collections::HashMap;

/// Fields of `cf target` the harness needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetInfo {
    /// Cloud Controller v3 base URL.
    pub api_endpoint: String,
    pub user: String,
    pub space: String,
}

impl TargetInfo {
    pub fn parse(output: &str) -> HarnessResult<Self> {
        let api = labelled_value(output, "API endpoint")
            .ok_or_else(|| HarnessError::parse("target output", "no 'API endpoint:' line"))?;
        let user = labelled_value(output, "user")
            .ok_or_else(|| HarnessError::parse("target output", "no 'user:' line"))?;
        let space = labelled_value(output, "space")
            .ok_or_else(|| HarnessError::parse("target output", "no 'space:' line"))?;

        Ok(Self {
            api_endpoint: format!("{}/v3", api.trim_end_matches('/')),
            user,
            space,
        })
    }
}

/// Last-operation state of a service instance as reported by `cf service`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningStatus {
    Succeeded(String),
    InProgress(String),
    Failed(String),
}

impl ProvisioningStatus {
    /// Classifies a whole command result; a rejected command counts as failed.
    pub fn from_output(output: &CommandOutput) -> HarnessResult<Self> {
        if !output.success {
            return Ok(ProvisioningStatus::Failed(first_meaningful_line(&output.combined())));
        }
        Self::parse(&output.stdout)
    }

    pub fn parse(output: &str) -> HarnessResult<Self> {
        if output.contains("FAILED") {
            return Ok(ProvisioningStatus::Failed(first_meaningful_line(output)));
        }

        let status = labelled_value(output, "status").ok_or_else(|| {
            HarnessError::parse("service status output", "no 'status:' line")
        })?;
        let lowered = status.to_ascii_lowercase();

        if lowered.contains("failed") {
            Ok(ProvisioningStatus::Failed(status))
        } else if lowered.contains("succeeded") {
            Ok(ProvisioningStatus::Succeeded(status))
        } else {
            Ok(ProvisioningStatus::InProgress(status))
        }
    }

    pub fn text(&self) -> &str {
        match self {
            ProvisioningStatus::Succeeded(text)
            | ProvisioningStatus::InProgress(text)
            | ProvisioningStatus::Failed(text) => text,
        }
    }
}

/// Decodes `cf service-key` output into a flat credential map.
///
/// The CLI prints one human-readable line ("Getting key ...") before the JSON
/// document. Exactly that one line is dropped; anything else that is not JSON
/// is an error. Both `{"credentials": {...}}` and a bare credentials object are
/// accepted. Non-string scalars are stringified, nested values are kept as
/// compact JSON text.
pub fn parse_service_key_output(output: &str) -> HarnessResult<HashMap<String, String>> {
    let body = match output.split_once('\n') {
        Some((_preamble, rest)) => rest,
        None => "",
    };

    let document: Value = serde_json::from_str(body)
        .map_err(|e| HarnessError::parse("service key output", e))?;

    let credentials = match document.get("credentials") {
        Some(Value::Object(map)) => map,
        Some(_) => {
            return Err(HarnessError::parse(
                "service key output",
                "'credentials' is not an object",
            ));
        }
        None => match &document {
            Value::Object(map) => map,
            _ => {
                return Err(HarnessError::parse(
                    "service key output",
                    "expected a JSON object",
                ));
            }
        },
    };

    Ok(credentials
        .iter()
        .filter_map(|(key, value)| {
            let text = match value {
                Value::Null => return None,
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Some((key.clone(), text))
        })
        .collect())
}

/// Parses the output of `cf space <name> --guid`.
pub fn parse_space_guid(output: &str) -> HarnessResult<String> {
    let guid = output.trim();
    if guid.is_empty() || guid.contains(char::is_whitespace) {
        return Err(HarnessError::parse(
            "space guid output",
            format!("unexpected output '{}'", guid),
        ));
    }
    Ok(guid.to_string())
}

/// Parses `cf oauth-token` output, which is already an `Authorization` value
/// (`bearer <jwt>`).
pub fn parse_oauth_token(output: &str) -> HarnessResult<String> {
    let token = output.trim();
    if !token.to_ascii_lowercase().starts_with("bearer ") {
        return Err(HarnessError::parse(
            "oauth-token output",
            "expected a 'bearer <token>' value",
        ));
    }
    Ok(token.to_string())
}

fn labelled_value(output: &str, label: &str) -> Option<String> {
    output
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case(label))
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn first_meaningful_line(output: &str) -> String {
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && *line != "FAILED")
        .unwrap_or("FAILED")
        .to_string()
}
