//! Lifecycle of backing services (identity providers, authorization servers,
//! API-access delegations) and their service keys.
//!
//! ```text
//! Requested --submit ok--> Provisioning --succeeded--> Ready --delete--> Deleted
//!     |                        |
//!     +--rejected--> Failed <--+-- failed / timeout        Failed --delete--> Deleted
//! ```
//!
//! The provisioner owns every instance it creates. Keys are only created for
//! `Ready` instances and are always deleted before their instance.

use crate::control_plane::{
    CommandOutput, ControlPlane, ControlPlaneCommand, ProvisioningStatus, parse_service_key_output,
};
use crate::error::{HarnessError, HarnessResult};
use crate::poll::{PollConfig, PollOutcome, poll_until};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    /// Identity Authentication (`identity` / `application`).
    IdentityProvider,
    /// XSUAA application plan (`xsuaa` / `application`).
    AuthorizationServer,
    /// XSUAA API access plan (`xsuaa` / `apiaccess`), used for user/role administration.
    AccessDelegation,
}

impl ServiceKind {
    pub fn offering(&self) -> &'static str {
        match self {
            ServiceKind::IdentityProvider => "identity",
            ServiceKind::AuthorizationServer | ServiceKind::AccessDelegation => "xsuaa",
        }
    }

    pub fn plan(&self) -> &'static str {
        match self {
            ServiceKind::IdentityProvider | ServiceKind::AuthorizationServer => "application",
            ServiceKind::AccessDelegation => "apiaccess",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Requested,
    Provisioning,
    Ready,
    Failed,
    Deleted,
}

/// Parameters handed to `create-service -c`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Inline JSON, or a descriptor file name resolved against `working_dir`.
    pub parameters: Option<String>,
    pub working_dir: Option<PathBuf>,
}

impl ServiceConfig {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn inline(json: impl Into<String>) -> Self {
        Self {
            parameters: Some(json.into()),
            working_dir: None,
        }
    }

    /// A security descriptor file (e.g. `xs-security.json`) inside an app directory.
    pub fn descriptor(working_dir: impl Into<PathBuf>, file: impl Into<String>) -> Self {
        Self {
            parameters: Some(file.into()),
            working_dir: Some(working_dir.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInstance {
    pub name: String,
    pub kind: ServiceKind,
    pub config: ServiceConfig,
    pub state: ServiceState,
}

/// Credential bundle delegated through a service key.
#[derive(Clone, PartialEq, Eq)]
pub struct ServiceKey {
    pub service: String,
    pub name: String,
    pub credentials: HashMap<String, String>,
}

impl std::fmt::Debug for ServiceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut fields: Vec<&String> = self.credentials.keys().collect();
        fields.sort();
        f.debug_struct("ServiceKey")
            .field("service", &self.service)
            .field("name", &self.name)
            .field("credential_fields", &fields)
            .finish()
    }
}

impl ServiceKey {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.credentials.get(field).map(String::as_str)
    }

    pub fn require(&self, field: &str) -> HarnessResult<&str> {
        self.get(field).ok_or_else(|| {
            HarnessError::parse(
                format!("service key '{}'", self.name),
                format!("missing credential '{field}'"),
            )
        })
    }

    pub fn client_id(&self) -> Option<&str> {
        self.get("clientid")
    }

    pub fn client_secret(&self) -> Option<&str> {
        self.get("clientsecret")
    }

    pub fn url(&self) -> Option<&str> {
        self.get("url")
    }

    pub fn certificate(&self) -> Option<&str> {
        self.get("certificate")
    }

    pub fn key(&self) -> Option<&str> {
        self.get("key")
    }
}

pub struct ServiceProvisioner {
    control_plane: Arc<dyn ControlPlane>,
    poll: PollConfig,
    /// In creation order; teardown walks it backwards.
    instances: Vec<ServiceInstance>,
    keys: Vec<ServiceKey>,
}

impl ServiceProvisioner {
    pub fn new(control_plane: Arc<dyn ControlPlane>, poll: PollConfig) -> Self {
        Self {
            control_plane,
            poll,
            instances: Vec::new(),
            keys: Vec::new(),
        }
    }

    pub fn instance(&self, name: &str) -> Option<&ServiceInstance> {
        self.instances.iter().find(|i| i.name == name)
    }

    pub fn keys_for(&self, service: &str) -> impl Iterator<Item = &ServiceKey> {
        self.keys.iter().filter(move |k| k.service == service)
    }

    /// Submits `create-service`. The instance is `Provisioning` afterwards;
    /// call [`await_ready`](Self::await_ready) before using it.
    pub async fn create(
        &mut self,
        name: &str,
        kind: ServiceKind,
        config: ServiceConfig,
    ) -> HarnessResult<ServiceInstance> {
        if let Some(existing) = self.instance(name)
            && existing.state != ServiceState::Deleted
        {
            return Err(HarnessError::provision(
                name,
                format!("already managed in state {:?}", existing.state),
            ));
        }
        self.instances.retain(|i| i.name != name);
        self.instances.push(ServiceInstance {
            name: name.to_string(),
            kind,
            config: config.clone(),
            state: ServiceState::Requested,
        });

        info!(
            service = name,
            offering = kind.offering(),
            plan = kind.plan(),
            "Creating service"
        );
        let command = ControlPlaneCommand::CreateService {
            offering: kind.offering().to_string(),
            plan: kind.plan().to_string(),
            name: name.to_string(),
            parameters: config.parameters.clone(),
            working_dir: config.working_dir.clone(),
        };

        let output = match self.control_plane.execute(&command).await {
            Ok(output) => output,
            Err(e) => {
                self.set_state(name, ServiceState::Failed)?;
                return Err(e);
            }
        };
        if output.reports_failure() {
            self.set_state(name, ServiceState::Failed)?;
            return Err(HarnessError::provision(name, output.combined()));
        }

        self.set_state(name, ServiceState::Provisioning)
    }

    /// Current last-operation status as reported by the control plane.
    pub async fn status(&self, name: &str) -> HarnessResult<ProvisioningStatus> {
        let output = self
            .control_plane
            .execute(&ControlPlaneCommand::Service {
                name: name.to_string(),
            })
            .await?;
        ProvisioningStatus::from_output(&output)
    }

    /// Polls until the instance reports success. Failure is returned as soon as
    /// it is observed; running out of time yields `Timeout` with the last status.
    pub async fn await_ready(
        &mut self,
        name: &str,
        interval: Duration,
        max_wait: Duration,
    ) -> HarnessResult<ServiceInstance> {
        if self.instance(name).is_none() {
            return Err(HarnessError::not_found("service instance", name));
        }

        let config = PollConfig::new(interval, max_wait);
        let control_plane = self.control_plane.clone();
        let result = poll_until(&config, name, || {
            let control_plane = control_plane.clone();
            let name = name.to_string();
            async move {
                let output = control_plane
                    .execute(&ControlPlaneCommand::Service { name: name.clone() })
                    .await?;
                match ProvisioningStatus::from_output(&output)? {
                    ProvisioningStatus::Succeeded(_) => Ok(PollOutcome::Ready(())),
                    ProvisioningStatus::InProgress(status) => Ok(PollOutcome::Pending(status)),
                    ProvisioningStatus::Failed(status) => Err(HarnessError::provision(name, status)),
                }
            }
        })
        .await;

        match result {
            Ok(()) => {
                info!(service = name, "Service is ready");
                self.set_state(name, ServiceState::Ready)
            }
            Err(e) => {
                warn!(service = name, error = %e, "Service did not become ready");
                self.set_state(name, ServiceState::Failed)?;
                Err(e)
            }
        }
    }

    pub async fn await_ready_default(&mut self, name: &str) -> HarnessResult<ServiceInstance> {
        let PollConfig { interval, max_wait } = self.poll.clone();
        self.await_ready(name, interval, max_wait).await
    }

    /// Create followed by waiting with the configured poll settings.
    pub async fn provision(
        &mut self,
        name: &str,
        kind: ServiceKind,
        config: ServiceConfig,
    ) -> HarnessResult<ServiceInstance> {
        self.create(name, kind, config).await?;
        self.await_ready_default(name).await
    }

    /// Creates `key_name` on a ready instance and reads its credential bundle.
    pub async fn create_key(
        &mut self,
        instance: &str,
        key_name: &str,
        extra_config: Option<String>,
    ) -> HarnessResult<ServiceKey> {
        match self.instance(instance).map(|i| i.state) {
            Some(ServiceState::Ready) => {}
            Some(state) => {
                return Err(HarnessError::provision(
                    instance,
                    format!("cannot create key '{key_name}' while instance is {state:?}"),
                ));
            }
            None => return Err(HarnessError::not_found("service instance", instance)),
        }

        info!(service = instance, key = key_name, "Creating service key");
        let created = self
            .control_plane
            .execute(&ControlPlaneCommand::CreateServiceKey {
                service: instance.to_string(),
                key: key_name.to_string(),
                parameters: extra_config,
            })
            .await?;
        if created.reports_failure() {
            return Err(HarnessError::provision(
                format!("{instance}/{key_name}"),
                created.combined(),
            ));
        }

        // The key exists from here on; track it so teardown removes it even if
        // reading it back fails.
        self.keys.retain(|k| !(k.service == instance && k.name == key_name));
        self.keys.push(ServiceKey {
            service: instance.to_string(),
            name: key_name.to_string(),
            credentials: HashMap::new(),
        });

        info!(service = instance, key = key_name, "Fetching service key");
        let fetched = self
            .control_plane
            .execute(&ControlPlaneCommand::ServiceKey {
                service: instance.to_string(),
                key: key_name.to_string(),
            })
            .await?;
        if fetched.reports_failure() {
            return Err(HarnessError::provision(
                format!("{instance}/{key_name}"),
                fetched.combined(),
            ));
        }
        let credentials = parse_service_key_output(&fetched.stdout)?;

        let key = ServiceKey {
            service: instance.to_string(),
            name: key_name.to_string(),
            credentials,
        };
        if let Some(slot) = self
            .keys
            .iter_mut()
            .find(|k| k.service == instance && k.name == key_name)
        {
            *slot = key.clone();
        }
        Ok(key)
    }

    /// Deletes the instance's keys, then the instance.
    ///
    /// Anything already gone counts as deleted. Every step is attempted even if
    /// an earlier one fails; the first real failure is returned at the end.
    pub async fn delete(&mut self, name: &str) -> HarnessResult<()> {
        if self.instance(name).map(|i| i.state) == Some(ServiceState::Deleted)
            && self.keys_for(name).next().is_none()
        {
            info!(service = name, "Service already deleted");
            return Ok(());
        }

        let mut first_error: Option<HarnessError> = None;

        let key_names: Vec<String> = self.keys_for(name).map(|k| k.name.clone()).collect();
        for key in key_names.iter().rev() {
            info!(service = name, key = %key, "Deleting service key");
            let result = self
                .control_plane
                .execute(&ControlPlaneCommand::DeleteServiceKey {
                    service: name.to_string(),
                    key: key.clone(),
                })
                .await;
            match absorb_not_found(&format!("{name}/{key}"), result) {
                Ok(()) => self.keys.retain(|k| !(k.service == name && &k.name == key)),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        info!(service = name, "Deleting service");
        let result = self
            .control_plane
            .execute(&ControlPlaneCommand::DeleteService {
                name: name.to_string(),
            })
            .await;
        match absorb_not_found(name, result) {
            Ok(()) => {
                if self.instance(name).is_some() {
                    self.set_state(name, ServiceState::Deleted)?;
                }
            }
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Deletes every managed instance, newest first.
    pub async fn teardown_all(&mut self) -> HarnessResult<()> {
        let names: Vec<String> = self
            .instances
            .iter()
            .rev()
            .filter(|i| i.state != ServiceState::Deleted)
            .map(|i| i.name.clone())
            .collect();

        let mut first_error = None;
        for name in names {
            if let Err(e) = self.delete(&name).await {
                warn!(service = %name, error = %e, "Teardown of service failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn set_state(&mut self, name: &str, state: ServiceState) -> HarnessResult<ServiceInstance> {
        let instance = self
            .instances
            .iter_mut()
            .find(|i| i.name == name)
            .ok_or_else(|| HarnessError::not_found("service instance", name))?;
        instance.state = state;
        Ok(instance.clone())
    }
}

/// Turns a "resource is already absent" response into success.
fn absorb_not_found(resource: &str, result: HarnessResult<CommandOutput>) -> HarnessResult<()> {
    let output = result?;
    if output.reports_not_found() {
        info!(resource, "Resource already absent, nothing to delete");
        return Ok(());
    }
    if output.reports_failure() {
        warn!(resource, output = %output.combined(), "Delete was rejected");
        return Err(HarnessError::provision(resource, output.combined()));
    }
    Ok(())
}
