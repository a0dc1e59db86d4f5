//! Finds deployed applications and the credentials of their bound services.
//!
//! Lookups go to the Cloud Controller v3 API with the CLI's own bearer token.
//! That token is short-lived, so an authorization failure triggers exactly one
//! refresh through `cf oauth-token` and exactly one retry of the same call.

use crate::control_plane::output::{parse_oauth_token, parse_space_guid};
use crate::control_plane::{ControlPlane, ControlPlaneCommand, TargetInfo};
use crate::error::{HarnessError, HarnessResult};
use crate::observability::WithTraceContext;
use reqwest::Client;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct AppResolver {
    control_plane: Arc<dyn ControlPlane>,
    http: Client,
    target: TargetInfo,
    space_guid: String,
    /// Raw `Authorization` value as printed by the CLI (`bearer ...`).
    authorization: String,
    cache: HashMap<String, DeployedApp>,
}

impl AppResolver {
    /// Reads the CLI's bearer token, target and space guid.
    pub async fn connect(control_plane: Arc<dyn ControlPlane>, timeout: Duration) -> HarnessResult<Self> {
        let target = control_plane.execute_checked(&ControlPlaneCommand::Target).await?;
        let target = TargetInfo::parse(&target.stdout)?;

        let space = control_plane
            .execute_checked(&ControlPlaneCommand::SpaceGuid {
                space: target.space.clone(),
            })
            .await?;
        let space_guid = parse_space_guid(&space.stdout)?;

        let token = control_plane.execute_checked(&ControlPlaneCommand::OauthToken).await?;
        let authorization = parse_oauth_token(&token.stdout)?;

        info!(api = %target.api_endpoint, space = %target.space, "Connected to control plane");
        Ok(Self {
            control_plane,
            http: Client::builder().timeout(timeout).build()?,
            target,
            space_guid,
            authorization,
            cache: HashMap::new(),
        })
    }

    pub fn target(&self) -> &TargetInfo {
        &self.target
    }

    pub fn space_guid(&self) -> &str {
        &self.space_guid
    }

    /// Resolves `app_name` once; later calls are served from the cache.
    pub async fn resolve(&mut self, app_name: &str) -> HarnessResult<DeployedApp> {
        if let Some(app) = self.cache.get(app_name) {
            return Ok(app.clone());
        }

        let guid = self.lookup_guid(app_name).await?;
        let env_url = format!("{}/apps/{}/env", self.target.api_endpoint, guid);
        let env = self.get_json(&env_url, &[]).await?;
        let services = match env.pointer("/system_env_json/VCAP_SERVICES") {
            Some(Value::Object(services)) => services.clone(),
            Some(_) => {
                return Err(HarnessError::parse(
                    format!("environment of '{app_name}'"),
                    "VCAP_SERVICES is not an object",
                ));
            }
            None => Map::new(),
        };

        let app = DeployedApp {
            name: app_name.to_string(),
            guid,
            services,
        };
        info!(app = app_name, guid = %app.guid, bindings = ?app.labels(), "Resolved deployed app");
        self.cache.insert(app_name.to_string(), app.clone());
        Ok(app)
    }

    /// Drops a cached entry, e.g. after the app was redeployed.
    pub fn forget(&mut self, app_name: &str) {
        self.cache.remove(app_name);
    }

    async fn lookup_guid(&mut self, app_name: &str) -> HarnessResult<String> {
        let url = format!("{}/apps", self.target.api_endpoint);
        let query = [
            ("space_guids", self.space_guid.clone()),
            ("names", app_name.to_string()),
        ];
        let listing = self.get_json(&url, &query).await?;

        let total = listing
            .pointer("/pagination/total_results")
            .and_then(Value::as_u64)
            .ok_or_else(|| HarnessError::parse("app listing", "no pagination.total_results"))?;
        if total == 0 {
            return Err(HarnessError::not_found("app", app_name));
        }
        if total > 1 {
            warn!(app = app_name, matches = total, "More than one app matches, using the first");
        }

        listing
            .pointer("/resources/0/guid")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| HarnessError::parse("app listing", "first resource has no guid"))
    }

    async fn get_json(&mut self, url: &str, query: &[(&str, String)]) -> HarnessResult<Value> {
        match self.get_once(url, query).await {
            Err(e) if e.is_stale_bearer() => {
                warn!(url, error = %e, "Bearer token rejected, refreshing once");
                self.refresh_authorization().await?;
                self.get_once(url, query).await
            }
            other => other,
        }
    }

    async fn get_once(&self, url: &str, query: &[(&str, String)]) -> HarnessResult<Value> {
        let response = self
            .http
            .get(url)
            .query(query)
            .header("Authorization", &self.authorization)
            .with_trace_context()
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(HarnessError::Auth {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body).map_err(|e| HarnessError::parse(url.to_string(), e))
    }

    async fn refresh_authorization(&mut self) -> HarnessResult<()> {
        let output = self
            .control_plane
            .execute_checked(&ControlPlaneCommand::OauthToken)
            .await?;
        self.authorization = parse_oauth_token(&output.stdout)?;
        Ok(())
    }
}

/// A running application and its `VCAP_SERVICES` bundle.
#[derive(Clone)]
pub struct DeployedApp {
    pub name: String,
    pub guid: String,
    services: Map<String, Value>,
}

impl std::fmt::Debug for DeployedApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeployedApp")
            .field("name", &self.name)
            .field("guid", &self.guid)
            .field("labels", &self.labels())
            .finish()
    }
}

impl DeployedApp {
    pub fn new(name: impl Into<String>, guid: impl Into<String>, services: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            guid: guid.into(),
            services,
        }
    }

    /// Service labels present in the bundle (`xsuaa`, `identity`, ...).
    pub fn labels(&self) -> Vec<&str> {
        self.services.keys().map(String::as_str).collect()
    }

    /// Credentials of the first binding under `label`.
    pub fn credentials(&self, label: &str) -> HarnessResult<ServiceCredentials> {
        let binding = self
            .services
            .get(label)
            .and_then(Value::as_array)
            .and_then(|bindings| bindings.first())
            .ok_or_else(|| HarnessError::not_found("service binding", format!("{}/{}", self.name, label)))?;

        match binding.get("credentials") {
            Some(Value::Object(values)) => Ok(ServiceCredentials {
                label: label.to_string(),
                values: values.clone(),
            }),
            _ => Err(HarnessError::parse(
                format!("binding '{label}' of '{}'", self.name),
                "no credentials object",
            )),
        }
    }
}

#[derive(Clone)]
pub struct ServiceCredentials {
    pub label: String,
    values: Map<String, Value>,
}

impl std::fmt::Debug for ServiceCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceCredentials")
            .field("label", &self.label)
            .field("fields", &self.values.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ServiceCredentials {
    pub fn property(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(Value::as_str)
    }

    pub fn require(&self, name: &str) -> HarnessResult<&str> {
        self.property(name).ok_or_else(|| {
            HarnessError::parse(
                format!("'{}' credentials", self.label),
                format!("missing '{name}'"),
            )
        })
    }

    pub fn client_id(&self) -> Option<&str> {
        self.property("clientid")
    }

    pub fn client_secret(&self) -> Option<&str> {
        self.property("clientsecret")
    }

    pub fn url(&self) -> Option<&str> {
        self.property("url")
    }

    pub fn api_url(&self) -> Option<&str> {
        self.property("apiurl")
    }

    pub fn cert_url(&self) -> Option<&str> {
        self.property("certurl")
    }

    pub fn certificate(&self) -> Option<&str> {
        self.property("certificate")
    }

    pub fn key(&self) -> Option<&str> {
        self.property("key")
    }

    pub fn credential_type(&self) -> Option<&str> {
        self.property("credential-type")
    }

    /// True for `x509` and `X509_GENERATED` bindings.
    pub fn is_x509(&self) -> bool {
        self.credential_type()
            .is_some_and(|t| t.to_ascii_lowercase().starts_with("x509"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn app() -> DeployedApp {
        let services = json!({
            "xsuaa": [
                {"name": "xsuaa-java-security", "credentials": {
                    "clientid": "sb-java", "clientsecret": "s3cr3t", "url": "https://sub.auth",
                    "certurl": "https://sub.auth.cert", "credential-type": "x509",
                    "certificate": "CERT", "key": "KEY"
                }},
                {"name": "second", "credentials": {"clientid": "ignored"}}
            ],
            "identity": [
                {"name": "ias", "credentials": {"clientid": "ias-client", "url": "https://tenant.ias"}}
            ]
        });
        match services {
            Value::Object(map) => DeployedApp::new("java-security-usage", "guid-1", map),
            _ => unreachable!(),
        }
    }

    #[test]
    fn reads_first_binding_per_label() {
        let app = app();
        let xsuaa = app.credentials("xsuaa").unwrap();
        assert_eq!(xsuaa.client_id(), Some("sb-java"));
        assert_eq!(xsuaa.cert_url(), Some("https://sub.auth.cert"));
        assert!(xsuaa.is_x509());

        let identity = app.credentials("identity").unwrap();
        assert_eq!(identity.client_id(), Some("ias-client"));
        assert_eq!(identity.client_secret(), None);
        assert!(!identity.is_x509());
    }

    #[test]
    fn missing_label_is_not_found() {
        let err = app().credentials("destination").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn require_names_the_missing_field() {
        let identity = app().credentials("identity").unwrap();
        let err = identity.require("apiurl").unwrap_err();
        assert!(err.to_string().contains("apiurl"));
    }

    #[test]
    fn debug_hides_credential_values() {
        let debug = format!("{:?}", app().credentials("xsuaa").unwrap());
        assert!(debug.contains("clientsecret"));
        assert!(!debug.contains("s3cr3t"));
    }
}
