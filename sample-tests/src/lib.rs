//! End-to-end security checks for the cloud security sample applications.
//!
//! Each suite deploys one sample app with its backing services, probes its
//! endpoints anonymously, with a user token and after a role assignment, and
//! tears everything down again.
//!
//! ## Usage
//!
//! ```bash
//! # log in first, then point vars.yml at your landscape
//! cf login
//! RUN_SAMPLE_TESTS=1 cargo test -p sample-tests -- --test-threads=1
//! ```

pub mod app;

pub use app::{provision_identity, SampleApp};
pub use harness_core;

use anyhow::{anyhow, Result};
use harness_core::credentials::{confirm_manual_step, second_factor_code};
use harness_core::observability::init_test_tracing;
use harness_core::secrecy::{ExposeSecret, SecretString};
use harness_core::{
    control_plane, ApiAccess, AppResolver, CfCli, ControlPlane, DeployedApp, Grant, HarnessConfig,
    OperatorCredentials, ProbeAuth, ProbeResponse, ProbeRunner, Prompt, ServiceKey, ServiceProvisioner,
    StdinPrompt, TokenClient, TokenEndpoint, TokenResponse, VarsParser,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Time the platform needs before a freshly pushed route answers.
const ROUTE_SETTLE: Duration = Duration::from_secs(2);

/// Everything a sample suite needs, for one deployed sample app.
pub struct HarnessContext {
    pub config: HarnessConfig,
    pub credentials: OperatorCredentials,
    pub vars: VarsParser,
    pub app: SampleApp,
    control_plane: Arc<dyn ControlPlane>,
    provisioner: ServiceProvisioner,
    resolver: AppResolver,
    tokens: TokenClient,
    probes: ProbeRunner,
    prompt: Box<dyn Prompt + Send + Sync>,
    api_access: Option<ApiAccess>,
}

impl HarnessContext {
    /// Loads configuration and credentials, deploys `app` and connects to the
    /// control plane. Requires a logged-in `cf` CLI.
    pub async fn setup(app: SampleApp) -> Result<Self> {
        init_test_tracing();

        let config = HarnessConfig::load()?;
        let control_plane: Arc<dyn ControlPlane> = Arc::new(CfCli::new(config.cf_binary.clone()));
        if control_plane::is_logged_off(control_plane.as_ref()).await {
            return Err(anyhow!(
                "not logged in: run 'cf login' and adjust {} first",
                config.vars_file.display()
            ));
        }

        let prompt: Box<dyn Prompt + Send + Sync> = Box::new(StdinPrompt);
        let vars = VarsParser::from_file(&config.vars_file).await?;
        let credentials = OperatorCredentials::resolve(prompt.as_ref())?;

        let mut provisioner = ServiceProvisioner::new(control_plane.clone(), config.poll_config());
        if let Err(e) = app.deploy(&mut provisioner, control_plane.as_ref(), &config).await {
            warn!(app = %app.name, error = %e, "Deployment failed, cleaning up");
            if let Err(cleanup) = app.delete(&mut provisioner, control_plane.as_ref()).await {
                warn!(app = %app.name, error = %cleanup, "Cleanup after failed deployment failed");
            }
            return Err(e.into());
        }
        tokio::time::sleep(ROUTE_SETTLE).await;

        let resolver = AppResolver::connect(control_plane.clone(), config.http.timeout()).await?;
        let tokens = TokenClient::new(&config.http, config.scratch_dir.clone())?;
        let probes = ProbeRunner::from_vars(&vars, config.http.timeout())?;

        Ok(Self {
            config,
            credentials,
            vars,
            app,
            control_plane,
            provisioner,
            resolver,
            tokens,
            probes,
            prompt,
            api_access: None,
        })
    }

    pub async fn deployed_app(&mut self) -> Result<DeployedApp> {
        Ok(self.resolver.resolve(&self.app.name).await?)
    }

    /// GET without credentials.
    pub async fn get(&self, path: &str) -> Result<ProbeResponse> {
        Ok(self.probes.get(&self.app.name, path, &ProbeAuth::Anonymous).await?)
    }

    /// GET with the operator's Basic credentials.
    pub async fn get_with_basic_auth(&self, path: &str) -> Result<ProbeResponse> {
        let code = second_factor_code(self.prompt.as_ref(), self.config.second_factor_enabled)?;
        let auth = ProbeAuth::Basic {
            username: self.credentials.username.clone(),
            password: self.credentials.password_with_second_factor(&code),
        };
        Ok(self.probes.get(&self.app.name, path, &auth).await?)
    }

    /// GET with a fresh XSUAA user token.
    pub async fn get_with_token(&mut self, path: &str) -> Result<ProbeResponse> {
        let token = self.token().await?;
        self.get_with_bearer(path, token.token()).await
    }

    pub async fn get_with_bearer(&self, path: &str, token: &str) -> Result<ProbeResponse> {
        Ok(self
            .probes
            .get(&self.app.name, path, &ProbeAuth::Bearer(token.to_string()))
            .await?)
    }

    /// Password-grant token from the app's XSUAA binding, over mTLS for x509
    /// bindings.
    pub async fn token(&mut self) -> Result<TokenResponse> {
        let app = self.deployed_app().await?;
        let xsuaa = app.credentials("xsuaa")?;
        let grant = self.password_grant()?;
        let client_id = xsuaa.require("clientid")?;

        info!(
            app = %app.name,
            credential_type = ?xsuaa.credential_type(),
            client_id,
            user = %self.credentials.username,
            "Fetching user token"
        );
        let token = if xsuaa.is_x509() {
            self.tokens
                .fetch_token_mtls(
                    &TokenEndpoint::authorization_server(xsuaa.require("certurl")?),
                    &grant,
                    client_id,
                    xsuaa.require("certificate")?,
                    xsuaa.require("key")?,
                )
                .await?
        } else {
            self.tokens
                .fetch_token(
                    &TokenEndpoint::authorization_server(xsuaa.require("url")?),
                    &grant,
                    client_id,
                    xsuaa.client_secret(),
                )
                .await?
        };
        Ok(token)
    }

    /// Id token from the app's identity binding.
    pub async fn id_token(&mut self) -> Result<String> {
        let app = self.deployed_app().await?;
        let identity = app.credentials("identity")?;
        let endpoint = TokenEndpoint::identity_provider(identity.require("url")?);
        let client_id = identity.require("clientid")?;
        let grant = Grant::password(self.credentials.username.clone(), self.operator_password());

        let token = match (identity.certificate(), identity.key()) {
            (Some(certificate), Some(key)) => {
                self.tokens
                    .fetch_token_mtls(&endpoint, &grant, client_id, certificate, key)
                    .await?
            }
            _ => {
                self.tokens
                    .fetch_token(&endpoint, &grant, client_id, identity.client_secret())
                    .await?
            }
        };
        id_token_of(&token)
    }

    /// Id token from a standalone identity service key.
    pub async fn id_token_from_key(&self, key: &ServiceKey) -> Result<String> {
        let endpoint = TokenEndpoint::identity_provider(key.require("url")?);
        let client_id = key.require("clientid")?;
        let grant = Grant::password(self.credentials.username.clone(), self.operator_password());

        let token = match (key.certificate(), key.key()) {
            (Some(certificate), Some(private_key)) => {
                self.tokens
                    .fetch_token_mtls(&endpoint, &grant, client_id, certificate, private_key)
                    .await?
            }
            _ => {
                self.tokens
                    .fetch_token(&endpoint, &grant, client_id, key.client_secret())
                    .await?
            }
        };
        id_token_of(&token)
    }

    /// Provisions an identity service next to the app; removed on teardown.
    pub async fn standalone_identity(&mut self, name: &str) -> Result<ServiceKey> {
        Ok(provision_identity(&mut self.provisioner, name).await?)
    }

    /// Grants a role collection to the operator through the API access service.
    pub async fn add_user_to_role(&mut self, role: &str) -> Result<()> {
        info!(role, user = %self.credentials.username, "Assigning role collection");
        if self.api_access.is_none() {
            let access = ApiAccess::provision(self.control_plane.clone(), &self.config).await?;
            self.api_access = Some(access);
        }
        let access = self
            .api_access
            .as_mut()
            .ok_or_else(|| anyhow!("api access service is not available"))?;
        access.assign_group(&self.credentials.username, role).await?;
        Ok(())
    }

    /// Asks the operator to assign `role` by hand. False when prompts are off.
    pub fn prompt_role_assignment(&self, role: &str) -> Result<bool> {
        let message = format!(
            "Can't add user Role Collection to the custom IAS origin.\n\
             Please add the role '{}' to user {} in the cockpit manually.",
            role, self.credentials.username
        );
        Ok(confirm_manual_step(
            self.prompt.as_ref(),
            &message,
            self.config.user_input_enabled,
        )?)
    }

    /// Restarts the app and forgets its cached bindings.
    pub async fn restart(&mut self) -> Result<()> {
        self.app.restart(self.control_plane.as_ref(), &self.config).await?;
        self.resolver.forget(&self.app.name);
        tokio::time::sleep(ROUTE_SETTLE).await;
        Ok(())
    }

    /// Deletes the app, the API access service and any remaining services.
    pub async fn teardown(mut self) -> Result<()> {
        let mut errors = Vec::new();
        if let Err(e) = self.app.delete(&mut self.provisioner, self.control_plane.as_ref()).await {
            errors.push(e.to_string());
        }
        if let Some(access) = self.api_access.as_mut() {
            if let Err(e) = access.delete().await {
                errors.push(e.to_string());
            }
        }
        if let Err(e) = self.provisioner.teardown_all().await {
            errors.push(e.to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("teardown of '{}' incomplete: {}", self.app.name, errors.join("; ")))
        }
    }

    fn password_grant(&self) -> Result<Grant> {
        let code = second_factor_code(self.prompt.as_ref(), self.config.second_factor_enabled)?;
        Ok(Grant::password(self.credentials.username.clone(), self.operator_password()).with_second_factor(code))
    }

    fn operator_password(&self) -> SecretString {
        SecretString::new(self.credentials.password.expose_secret().clone())
    }
}

fn id_token_of(token: &TokenResponse) -> Result<String> {
    token
        .id_token
        .clone()
        .ok_or_else(|| anyhow!("identity provider answered without an id_token"))
}
