//! HTTP probes against deployed sample endpoints.
//!
//! A probe never judges the answer: every status comes back as a
//! [`ProbeResponse`] and only transport failures are errors.

use crate::config::VarsParser;
use crate::error::HarnessResult;
use crate::observability::WithTraceContext;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tracing::info;

#[derive(Clone)]
pub enum ProbeAuth {
    Anonymous,
    Bearer(String),
    Basic { username: String, password: SecretString },
}

impl std::fmt::Debug for ProbeAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeAuth::Anonymous => f.write_str("Anonymous"),
            ProbeAuth::Bearer(_) => f.write_str("Bearer"),
            ProbeAuth::Basic { username, .. } => f.debug_struct("Basic").field("username", username).finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status: u16,
    pub body: String,
}

impl ProbeResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub struct ProbeRunner {
    http: Client,
    user_id: String,
    apps_domain: String,
    /// Overrides the route-derived URL, used against local endpoints.
    base_url: Option<String>,
}

impl ProbeRunner {
    pub fn new(user_id: impl Into<String>, apps_domain: impl Into<String>, timeout: Duration) -> HarnessResult<Self> {
        Ok(Self {
            http: Client::builder().timeout(timeout).build()?,
            user_id: user_id.into(),
            apps_domain: apps_domain.into(),
            base_url: None,
        })
    }

    pub fn from_vars(vars: &VarsParser, timeout: Duration) -> HarnessResult<Self> {
        Self::new(vars.user_id()?, vars.landscape_apps_domain()?, timeout)
    }

    /// Sends every probe to `base_url` instead of the app's route.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// `https://{app}-{user_id}.{domain}{path}`
    pub fn url(&self, app: &str, path: &str) -> String {
        match &self.base_url {
            Some(base) => format!("{}{}", base.trim_end_matches('/'), path),
            None => format!("https://{}-{}.{}{}", app, self.user_id, self.apps_domain, path),
        }
    }

    pub async fn get(&self, app: &str, path: &str, auth: &ProbeAuth) -> HarnessResult<ProbeResponse> {
        let url = self.url(app, path);
        let mut request = self.http.get(&url);
        request = match auth {
            ProbeAuth::Anonymous => request,
            ProbeAuth::Bearer(token) => request.bearer_auth(token),
            ProbeAuth::Basic { username, password } => {
                let encoded = STANDARD.encode(format!("{}:{}", username, password.expose_secret()));
                request.header("Authorization", &format!("Basic {encoded}"))
            }
        };

        let response = request.with_trace_context().send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        info!(url = %url, status, auth = ?auth, "Probe answered");
        Ok(ProbeResponse { status, body })
    }
}
