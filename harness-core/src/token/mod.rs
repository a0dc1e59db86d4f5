//! Token acquisition against the authorization server and the identity
//! provider.
//!
//! Two flows share one response parser:
//!
//! * standard: form-encoded POST, client authenticated by secret (in the body
//!   for the authorization server, HTTP Basic for the identity provider);
//! * mTLS: the client presents an X.509 pair in the handshake and sends no
//!   secret at all.
//!
//! Nothing here retries. A non-2xx answer is an `Auth` error carrying the
//! server's status and body.

mod grant;
mod mtls;

pub use grant::Grant;
pub use mtls::KeyMaterial;

use crate::config::HttpSettings;
use crate::error::{HarnessError, HarnessResult};
use crate::observability::WithTraceContext;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info};

pub const AUTHORIZATION_SERVER_PATH: &str = "/oauth/token";
pub const IDENTITY_PROVIDER_PATH: &str = "/oauth2/token";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointFlavor {
    /// XSUAA style: client secret in the body, returns `access_token`.
    AuthorizationServer,
    /// IAS style: Basic client auth, returns `id_token`.
    IdentityProvider,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenEndpoint {
    pub base_url: String,
    pub flavor: EndpointFlavor,
}

impl TokenEndpoint {
    /// `base_url` is the service `url`, or its `certurl` for certificate flows.
    pub fn authorization_server(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            flavor: EndpointFlavor::AuthorizationServer,
        }
    }

    pub fn identity_provider(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            flavor: EndpointFlavor::IdentityProvider,
        }
    }

    pub fn token_url(&self) -> String {
        let path = match self.flavor {
            EndpointFlavor::AuthorizationServer => AUTHORIZATION_SERVER_PATH,
            EndpointFlavor::IdentityProvider => IDENTITY_PROVIDER_PATH,
        };
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    pub fn response_type(&self) -> &'static str {
        match self.flavor {
            EndpointFlavor::AuthorizationServer => "token",
            EndpointFlavor::IdentityProvider => "id_token",
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenPayload {
    access_token: Option<String>,
    id_token: Option<String>,
    refresh_token: Option<String>,
    token_type: Option<String>,
    expires_in: Option<u64>,
}

/// One successful token answer. Never mutated: fetch again once expired.
#[derive(Clone)]
pub struct TokenResponse {
    pub access_token: Option<String>,
    pub id_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_type: Option<String>,
    pub expires_in: Option<u64>,
    /// The whole decoded body, including claims this type does not model.
    pub raw: Value,
    pub issued_at: DateTime<Utc>,
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &self.access_token.as_ref().map(|_| "***"))
            .field("id_token", &self.id_token.as_ref().map(|_| "***"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "***"))
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

impl TokenResponse {
    /// Decodes a 2xx body. The token the flavour promises must be present and
    /// non-empty.
    pub fn from_body(flavor: EndpointFlavor, body: &str) -> HarnessResult<Self> {
        let raw: Value =
            serde_json::from_str(body).map_err(|e| HarnessError::parse("token response", e))?;
        let payload: TokenPayload = serde_json::from_value(raw.clone())
            .map_err(|e| HarnessError::parse("token response", e))?;

        let (field, value) = match flavor {
            EndpointFlavor::AuthorizationServer => ("access_token", &payload.access_token),
            EndpointFlavor::IdentityProvider => ("id_token", &payload.id_token),
        };
        if value.as_deref().is_none_or(str::is_empty) {
            return Err(HarnessError::parse(
                "token response",
                format!("missing or empty '{field}'"),
            ));
        }

        Ok(Self {
            access_token: payload.access_token,
            id_token: payload.id_token,
            refresh_token: payload.refresh_token,
            token_type: payload.token_type,
            expires_in: payload.expires_in,
            raw,
            issued_at: Utc::now(),
        })
    }

    /// The access token, or the id token for identity-provider answers.
    pub fn token(&self) -> &str {
        self.access_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .or(self.id_token.as_deref())
            .unwrap_or_default()
    }

    /// `None` when no lifetime was reported or it lies beyond what a
    /// timestamp can represent.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let seconds = i64::try_from(self.expires_in?).ok()?;
        self.issued_at.checked_add_signed(chrono::Duration::try_seconds(seconds)?)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|expiry| now >= expiry)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.raw.get(name)
    }
}

pub struct TokenClient {
    http: Client,
    mtls_timeout: Duration,
    scratch_dir: PathBuf,
    token_format: Option<String>,
}

impl TokenClient {
    pub fn new(settings: &HttpSettings, scratch_dir: impl Into<PathBuf>) -> HarnessResult<Self> {
        let http = Client::builder().timeout(settings.timeout()).build()?;
        Ok(Self {
            http,
            mtls_timeout: settings.mtls_timeout(),
            scratch_dir: scratch_dir.into(),
            token_format: None,
        })
    }

    /// Asks the server for a specific token format (`jwt` or `opaque`).
    pub fn with_token_format(mut self, format: impl Into<String>) -> Self {
        self.token_format = Some(format.into());
        self
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Runs a standard grant. A `Certificate` grant is handed to
    /// [`fetch_token_mtls`](Self::fetch_token_mtls).
    pub async fn fetch_token(
        &self,
        endpoint: &TokenEndpoint,
        grant: &Grant,
        client_id: &str,
        client_secret: Option<&str>,
    ) -> HarnessResult<TokenResponse> {
        if let Grant::Certificate { certificate, key } = grant {
            return self
                .fetch_token_mtls(endpoint, grant, client_id, certificate, key.expose_secret())
                .await;
        }

        let url = endpoint.token_url();
        let form = self.form(endpoint, grant, client_id, client_secret, false);
        info!(url = %url, grant = grant.grant_type(), client_id, "Requesting token");

        let mut request = self.http.post(&url).form(&form);
        if endpoint.flavor == EndpointFlavor::IdentityProvider {
            request = request.header(
                "Authorization",
                &basic_auth_value(client_id, client_secret.unwrap_or_default()),
            );
        }

        let response = request.with_trace_context().send().await.map_err(|e| {
            error!(url = %url, error = %e, "Token request failed");
            HarnessError::from(e)
        })?;
        read_response(endpoint, response).await
    }

    /// Runs `grant` with client authentication by certificate.
    ///
    /// `certificate` and `private_key` are PEM text from a service key. They
    /// only exist on disk for the duration of this call.
    pub async fn fetch_token_mtls(
        &self,
        endpoint: &TokenEndpoint,
        grant: &Grant,
        client_id: &str,
        certificate: &str,
        private_key: &str,
    ) -> HarnessResult<TokenResponse> {
        let material = KeyMaterial::write(&self.scratch_dir, certificate, private_key).await?;
        let result = self.send_mtls(&material, endpoint, grant, client_id).await;
        let cleanup = material.close();

        let response = result?;
        cleanup?;
        Ok(response)
    }

    async fn send_mtls(
        &self,
        material: &KeyMaterial,
        endpoint: &TokenEndpoint,
        grant: &Grant,
        client_id: &str,
    ) -> HarnessResult<TokenResponse> {
        let identity = material.identity().await?;
        let http = Client::builder()
            .identity(identity)
            .timeout(self.mtls_timeout)
            .build()?;

        let url = endpoint.token_url();
        let form = self.form(endpoint, grant, client_id, None, true);
        info!(url = %url, grant = grant.grant_type(), client_id, "Requesting token with client certificate");

        let response = http
            .post(&url)
            .form(&form)
            .with_trace_context()
            .send()
            .await
            .map_err(|e| {
                error!(url = %url, error = %e, "mTLS token request failed");
                HarnessError::from(e)
            })?;
        read_response(endpoint, response).await
    }

    fn form(
        &self,
        endpoint: &TokenEndpoint,
        grant: &Grant,
        client_id: &str,
        client_secret: Option<&str>,
        certificate_auth: bool,
    ) -> Vec<(&'static str, String)> {
        let mut form = Vec::new();
        // Identity-provider secrets travel in the Basic header instead.
        if endpoint.flavor == EndpointFlavor::AuthorizationServer || certificate_auth {
            form.push(("client_id", client_id.to_string()));
        }
        if endpoint.flavor == EndpointFlavor::AuthorizationServer
            && !certificate_auth
            && let Some(secret) = client_secret
        {
            form.push(("client_secret", secret.to_string()));
        }
        form.extend(grant.form_fields());
        form.push(("response_type", endpoint.response_type().to_string()));
        if let Some(format) = &self.token_format {
            form.push(("token_format", format.clone()));
        }
        form
    }
}

pub fn basic_auth_value(client_id: &str, client_secret: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{client_id}:{client_secret}")))
}

async fn read_response(
    endpoint: &TokenEndpoint,
    response: reqwest::Response,
) -> HarnessResult<TokenResponse> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        error!(status = %status, body = %body, url = %endpoint.token_url(), "Token endpoint rejected the request");
        return Err(HarnessError::Auth {
            status: status.as_u16(),
            body,
        });
    }

    let token = TokenResponse::from_body(endpoint.flavor, &body)?;
    debug!(expires_in = ?token.expires_in, token_type = ?token.token_type, "Token received");
    Ok(token)
}
