//! Sample applications and their deploy / delete lifecycle.

use harness_core::provisioner::ServiceConfig;
use harness_core::{
    ControlPlane, ControlPlaneCommand, HarnessConfig, HarnessError, HarnessResult, ServiceKey, ServiceKind,
    ServiceProvisioner,
};
use std::path::PathBuf;
use tracing::{info, warn};

/// Parameters of identity services the samples consume from XSUAA-secured apps.
pub const IDENTITY_PARAMETERS: &str = r#"{"xsuaa-cross-consumption": "true", "credential-type": "X509_GENERATED"}"#;
pub const IDENTITY_KEY_PARAMETERS: &str = r#"{"credential-type": "X509_GENERATED"}"#;

/// A sample application directory under `samples_dir` plus the services it binds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleApp {
    pub name: String,
    pub xsuaa_service: Option<String>,
    pub identity_service: Option<String>,
    pub app_router: Option<String>,
    /// Security descriptor inside the app directory, used for the XSUAA service.
    pub security_descriptor: String,
}

impl SampleApp {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            xsuaa_service: None,
            identity_service: None,
            app_router: None,
            security_descriptor: "xs-security.json".to_string(),
        }
    }

    pub fn with_xsuaa(mut self, service: impl Into<String>) -> Self {
        self.xsuaa_service = Some(service.into());
        self
    }

    pub fn with_identity(mut self, service: impl Into<String>) -> Self {
        self.identity_service = Some(service.into());
        self
    }

    pub fn with_app_router(mut self, router: impl Into<String>) -> Self {
        self.app_router = Some(router.into());
        self
    }

    pub fn with_security_descriptor(mut self, file: impl Into<String>) -> Self {
        self.security_descriptor = file.into();
        self
    }

    pub fn working_dir(&self, config: &HarnessConfig) -> PathBuf {
        config.samples_dir.join(&self.name)
    }

    /// Creates the app's services and pushes it.
    pub async fn deploy(
        &self,
        provisioner: &mut ServiceProvisioner,
        control_plane: &dyn ControlPlane,
        config: &HarnessConfig,
    ) -> HarnessResult<()> {
        let working_dir = self.working_dir(config);

        if let Some(xsuaa) = &self.xsuaa_service {
            provisioner
                .provision(
                    xsuaa,
                    ServiceKind::AuthorizationServer,
                    ServiceConfig::descriptor(&working_dir, &self.security_descriptor),
                )
                .await?;
        }
        if let Some(identity) = &self.identity_service {
            provision_identity(provisioner, identity).await?;
        }

        let vars_file = std::path::absolute(&config.vars_file)?;
        info!(app = %self.name, dir = %working_dir.display(), "Deploying sample app");
        control_plane
            .execute_checked(&ControlPlaneCommand::Push {
                app: self.name.clone(),
                working_dir,
                vars_file,
            })
            .await?;

        info!(app = %self.name, xsuaa = ?self.xsuaa_service, identity = ?self.identity_service, router = ?self.app_router, "Sample app deployed");
        Ok(())
    }

    /// Restarts the app, dropping tokens it cached.
    pub async fn restart(&self, control_plane: &dyn ControlPlane, config: &HarnessConfig) -> HarnessResult<()> {
        control_plane
            .execute_checked(&ControlPlaneCommand::Restart {
                app: self.name.clone(),
                working_dir: self.working_dir(config),
            })
            .await?;
        Ok(())
    }

    /// Removes the app, its router and its services. Every step runs; the
    /// first failure is returned.
    pub async fn delete(&self, provisioner: &mut ServiceProvisioner, control_plane: &dyn ControlPlane) -> HarnessResult<()> {
        info!(app = %self.name, "Deleting sample app");
        let mut commands = Vec::new();
        if let Some(identity) = &self.identity_service {
            commands.push(ControlPlaneCommand::UnbindService {
                app: self.name.clone(),
                service: identity.clone(),
            });
        }
        commands.push(ControlPlaneCommand::DeleteApp { app: self.name.clone() });
        commands.push(ControlPlaneCommand::DeleteOrphanedRoutes);
        if let Some(router) = &self.app_router {
            commands.push(ControlPlaneCommand::DeleteApp { app: router.clone() });
        }

        let mut first_error: Option<HarnessError> = None;
        for command in &commands {
            match control_plane.execute(command).await {
                Ok(output) if output.reports_failure() && !output.reports_not_found() => {
                    warn!(verb = command.verb(), output = %output.combined(), "Cleanup command failed");
                    first_error.get_or_insert(HarnessError::provision(command.verb(), output.combined()));
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(verb = command.verb(), error = %e, "Cleanup command failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        for service in [&self.xsuaa_service, &self.identity_service].into_iter().flatten() {
            if let Err(e) = provisioner.delete(service).await {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Provisions an identity service with generated X.509 credentials and returns
/// its `<name>-key` service key.
pub async fn provision_identity(provisioner: &mut ServiceProvisioner, name: &str) -> HarnessResult<ServiceKey> {
    provisioner
        .provision(
            name,
            ServiceKind::IdentityProvider,
            ServiceConfig::inline(IDENTITY_PARAMETERS),
        )
        .await?;
    provisioner
        .create_key(name, &format!("{name}-key"), Some(IDENTITY_KEY_PARAMETERS.to_string()))
        .await
}
