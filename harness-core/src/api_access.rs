//! User and role administration through an XSUAA `apiaccess` instance.
//!
//! Samples check that an endpoint answers 403 until the operator holds the
//! right role collection. The role is granted by adding the operator to a SCIM
//! group with a client-credentials token of the access-delegation service.

use crate::config::HarnessConfig;
use crate::control_plane::ControlPlane;
use crate::error::{HarnessError, HarnessResult};
use crate::observability::WithTraceContext;
use crate::provisioner::{ServiceConfig, ServiceKey, ServiceKind, ServiceProvisioner};
use crate::token::{Grant, TokenClient, TokenEndpoint, TokenResponse};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

pub const SERVICE_NAME: &str = "api-access-service";
pub const KEY_NAME: &str = "api-access-service-sk";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScimUser {
    pub id: String,
    pub user_name: String,
    #[serde(default)]
    pub origin: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScimUserList {
    #[serde(default)]
    resources: Vec<ScimUser>,
}

pub struct ApiAccess {
    provisioner: ServiceProvisioner,
    key: ServiceKey,
    tokens: TokenClient,
    http: Client,
    token: Option<TokenResponse>,
}

impl ApiAccess {
    /// Provisions the access-delegation service and its key. Anything created
    /// is torn down again if a later step fails.
    pub async fn provision(control_plane: Arc<dyn ControlPlane>, config: &HarnessConfig) -> HarnessResult<Self> {
        let mut provisioner = ServiceProvisioner::new(control_plane, config.poll_config());
        let key = match Self::create(&mut provisioner).await {
            Ok(key) => key,
            Err(e) => {
                if let Err(cleanup) = provisioner.teardown_all().await {
                    warn!(error = %cleanup, "Cleanup after failed api access setup failed");
                }
                return Err(e);
            }
        };

        Self::from_key(provisioner, key, config)
    }

    async fn create(provisioner: &mut ServiceProvisioner) -> HarnessResult<ServiceKey> {
        provisioner
            .provision(SERVICE_NAME, ServiceKind::AccessDelegation, ServiceConfig::none())
            .await?;
        provisioner.create_key(SERVICE_NAME, KEY_NAME, None).await
    }

    /// Wraps an existing key; `provisioner` is still used for teardown.
    pub fn from_key(provisioner: ServiceProvisioner, key: ServiceKey, config: &HarnessConfig) -> HarnessResult<Self> {
        Ok(Self {
            provisioner,
            key,
            tokens: TokenClient::new(&config.http, config.scratch_dir.clone())?,
            http: Client::builder().timeout(config.http.timeout()).build()?,
            token: None,
        })
    }

    pub fn key(&self) -> &ServiceKey {
        &self.key
    }

    async fn bearer(&mut self) -> HarnessResult<String> {
        if let Some(token) = &self.token
            && !token.is_expired()
        {
            return Ok(token.token().to_string());
        }

        let endpoint = TokenEndpoint::authorization_server(self.key.require("url")?);
        let token = self
            .tokens
            .fetch_token(
                &endpoint,
                &Grant::ClientCredentials,
                self.key.require("clientid")?,
                Some(self.key.require("clientsecret")?),
            )
            .await?;
        let bearer = token.token().to_string();
        self.token = Some(token);
        Ok(bearer)
    }

    pub async fn user_by_username(&mut self, username: &str) -> HarnessResult<ScimUser> {
        let bearer = self.bearer().await?;
        let url = format!("{}/Users", self.key.require("apiurl")?.trim_end_matches('/'));
        let filter = format!("userName eq \"{username}\"");

        let response = self
            .http
            .get(&url)
            .query(&[("filter", filter.as_str())])
            .bearer_auth(&bearer)
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

        let users: ScimUserList =
            serde_json::from_str(&body).map_err(|e| HarnessError::parse("SCIM user list", e))?;
        users
            .resources
            .into_iter()
            .next()
            .ok_or_else(|| HarnessError::not_found("user", username))
    }

    /// Adds `user_id` to `group`. Already being a member is fine.
    pub async fn add_user_to_group(&mut self, user_id: &str, group: &str) -> HarnessResult<()> {
        let bearer = self.bearer().await?;
        let url = format!(
            "{}/Groups/{}/members",
            self.key.require("apiurl")?.trim_end_matches('/'),
            group
        );

        let response = self
            .http
            .post(&url)
            .json(&json!({"value": user_id, "origin": "sap.default", "type": "USER"}))
            .bearer_auth(&bearer)
            .with_trace_context()
            .send()
            .await?;
        let status = response.status();
        if status == StatusCode::CONFLICT {
            info!(user_id, group, "User already in group");
            return Ok(());
        }
        if !status.is_success() {
            let body = response.text().await?;
            return Err(HarnessError::Auth {
                status: status.as_u16(),
                body,
            });
        }

        info!(user_id, group, "Added user to group");
        Ok(())
    }

    /// Grants `group` to the user called `username`.
    pub async fn assign_group(&mut self, username: &str, group: &str) -> HarnessResult<()> {
        let user = self.user_by_username(username).await?;
        self.add_user_to_group(&user.id, group).await
    }

    pub async fn delete(&mut self) -> HarnessResult<()> {
        self.token = None;
        self.provisioner.teardown_all().await
    }
}
