//! Parser for the landscape `vars.yml` file shared with `cf push --vars-file`.
//!
//! The file is a flat list of `KEY: value` lines. Lines starting with `#` are
//! comments and are dropped before any field is looked up, so a commented-out
//! alternative such as `#ID: Y1111111` never shadows the active value.

use crate::error::{HarnessError, HarnessResult};
use std::path::Path;

#[derive(Debug, Clone)]
pub struct VarsParser {
    content: String,
}

impl VarsParser {
    pub fn new(raw: &str) -> Self {
        let content = raw
            .lines()
            .filter(|line| !line.starts_with('#'))
            .collect::<Vec<_>>()
            .join("\n");
        Self { content }
    }

    pub async fn from_file(path: impl AsRef<Path>) -> HarnessResult<Self> {
        let raw = tokio::fs::read_to_string(path.as_ref()).await?;
        Ok(Self::new(&raw))
    }

    /// Value of the `ID:` entry, the operator's user id used in app host names.
    pub fn user_id(&self) -> HarnessResult<String> {
        self.field("ID")
    }

    pub fn landscape_apps_domain(&self) -> HarnessResult<String> {
        self.field("LANDSCAPE_APPS_DOMAIN")
    }

    /// Looks up an exact `KEY:` entry. Keys are matched whole, so `ID` does not
    /// pick up `CLIENT_ID:` lines.
    pub fn field(&self, key: &str) -> HarnessResult<String> {
        self.content
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.trim() == key)
            .map(|(_, value)| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| HarnessError::parse("vars file", format!("missing '{key}:' entry")))
    }
}
