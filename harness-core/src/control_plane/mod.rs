//! Thin executor for Cloud Foundry CLI verbs.
//!
//! Components never build argv themselves: they describe what they want as a
//! [`ControlPlaneCommand`] and hand it to a [`ControlPlane`]. `CfCli` runs the
//! real binary; tests plug in a scripted implementation.

pub mod output;

pub use output::{ProvisioningStatus, TargetInfo, parse_service_key_output};

use crate::error::{HarnessError, HarnessResult};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlPlaneCommand {
    CreateService {
        offering: String,
        plan: String,
        name: String,
        /// Inline JSON or a path to a JSON file, passed as `-c`.
        parameters: Option<String>,
        working_dir: Option<PathBuf>,
    },
    DeleteService {
        name: String,
    },
    CreateServiceKey {
        service: String,
        key: String,
        parameters: Option<String>,
    },
    DeleteServiceKey {
        service: String,
        key: String,
    },
    ServiceKey {
        service: String,
        key: String,
    },
    Service {
        name: String,
    },
    OauthToken,
    Target,
    SpaceGuid {
        space: String,
    },
    Push {
        app: String,
        working_dir: PathBuf,
        vars_file: PathBuf,
    },
    DeleteApp {
        app: String,
    },
    Restart {
        app: String,
        working_dir: PathBuf,
    },
    UnbindService {
        app: String,
        service: String,
    },
    DeleteOrphanedRoutes,
}

impl ControlPlaneCommand {
    pub fn args(&self) -> Vec<String> {
        match self {
            ControlPlaneCommand::CreateService {
                offering,
                plan,
                name,
                parameters,
                ..
            } => {
                let mut args = vec!["create-service".into(), offering.clone(), plan.clone(), name.clone()];
                if let Some(parameters) = parameters {
                    args.extend(["-c".into(), parameters.clone()]);
                }
                args
            }
            ControlPlaneCommand::DeleteService { name } => {
                vec!["delete-service".into(), "-f".into(), name.clone()]
            }
            ControlPlaneCommand::CreateServiceKey {
                service,
                key,
                parameters,
            } => {
                let mut args = vec!["create-service-key".into(), service.clone(), key.clone()];
                if let Some(parameters) = parameters {
                    args.extend(["-c".into(), parameters.clone()]);
                }
                args
            }
            ControlPlaneCommand::DeleteServiceKey { service, key } => {
                vec!["delete-service-key".into(), "-f".into(), service.clone(), key.clone()]
            }
            ControlPlaneCommand::ServiceKey { service, key } => {
                vec!["service-key".into(), service.clone(), key.clone()]
            }
            ControlPlaneCommand::Service { name } => vec!["service".into(), name.clone()],
            ControlPlaneCommand::OauthToken => vec!["oauth-token".into()],
            ControlPlaneCommand::Target => vec!["target".into()],
            ControlPlaneCommand::SpaceGuid { space } => {
                vec!["space".into(), space.clone(), "--guid".into()]
            }
            ControlPlaneCommand::Push { vars_file, .. } => vec![
                "push".into(),
                "--vars-file".into(),
                vars_file.display().to_string(),
            ],
            ControlPlaneCommand::DeleteApp { app } => {
                vec!["delete".into(), "-f".into(), "-r".into(), app.clone()]
            }
            ControlPlaneCommand::Restart { app, .. } => vec!["restart".into(), app.clone()],
            ControlPlaneCommand::UnbindService { app, service } => {
                vec!["unbind-service".into(), app.clone(), service.clone()]
            }
            ControlPlaneCommand::DeleteOrphanedRoutes => {
                vec!["delete-orphaned-routes".into(), "-f".into()]
            }
        }
    }

    pub fn working_dir(&self) -> Option<&PathBuf> {
        match self {
            ControlPlaneCommand::CreateService { working_dir, .. } => working_dir.as_ref(),
            ControlPlaneCommand::Push { working_dir, .. }
            | ControlPlaneCommand::Restart { working_dir, .. } => Some(working_dir),
            _ => None,
        }
    }

    /// Verb name used in logs.
    pub fn verb(&self) -> &'static str {
        match self {
            ControlPlaneCommand::CreateService { .. } => "create-service",
            ControlPlaneCommand::DeleteService { .. } => "delete-service",
            ControlPlaneCommand::CreateServiceKey { .. } => "create-service-key",
            ControlPlaneCommand::DeleteServiceKey { .. } => "delete-service-key",
            ControlPlaneCommand::ServiceKey { .. } => "service-key",
            ControlPlaneCommand::Service { .. } => "service",
            ControlPlaneCommand::OauthToken => "oauth-token",
            ControlPlaneCommand::Target => "target",
            ControlPlaneCommand::SpaceGuid { .. } => "space",
            ControlPlaneCommand::Push { .. } => "push",
            ControlPlaneCommand::DeleteApp { .. } => "delete",
            ControlPlaneCommand::Restart { .. } => "restart",
            ControlPlaneCommand::UnbindService { .. } => "unbind-service",
            ControlPlaneCommand::DeleteOrphanedRoutes => "delete-orphaned-routes",
        }
    }
}

/// Captured result of one control-plane invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// Non-zero exit, or the CLI's `FAILED` marker on either stream.
    pub fn reports_failure(&self) -> bool {
        !self.success || self.stdout.contains("FAILED") || self.stderr.contains("FAILED")
    }

    pub fn reports_not_found(&self) -> bool {
        let text = format!("{}\n{}", self.stdout, self.stderr).to_ascii_lowercase();
        text.contains("not found") || text.contains("not exist")
    }

    /// Both streams, trimmed, for error messages.
    pub fn combined(&self) -> String {
        let mut text = self.stdout.trim().to_string();
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(stderr);
        }
        text
    }
}

#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn execute(&self, command: &ControlPlaneCommand) -> HarnessResult<CommandOutput>;

    /// Like `execute`, but a reported failure becomes a `Provision` error.
    async fn execute_checked(&self, command: &ControlPlaneCommand) -> HarnessResult<CommandOutput> {
        let output = self.execute(command).await?;
        if output.reports_failure() {
            return Err(HarnessError::provision(command.verb(), output.combined()));
        }
        Ok(output)
    }
}

/// Runs the `cf` binary.
#[derive(Debug, Clone)]
pub struct CfCli {
    binary: String,
}

impl CfCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for CfCli {
    fn default() -> Self {
        Self::new("cf")
    }
}

#[async_trait]
impl ControlPlane for CfCli {
    async fn execute(&self, command: &ControlPlaneCommand) -> HarnessResult<CommandOutput> {
        let args = command.args();
        let mut process = Command::new(&self.binary);
        process.args(&args).kill_on_drop(true);
        if let Some(dir) = command.working_dir() {
            process.current_dir(dir);
        }

        debug!(verb = command.verb(), args = ?args, "Running control-plane command");
        let output = process.output().await.map_err(|e| {
            HarnessError::Transport(anyhow::anyhow!(
                "failed to run '{} {}': {}",
                self.binary,
                command.verb(),
                e
            ))
        })?;

        let result = CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        debug!(
            target: "harness_core::control_plane",
            verb = command.verb(),
            success = result.success,
            stdout = %result.stdout,
            stderr = %result.stderr,
            "Control-plane command finished"
        );
        if !result.success {
            warn!(verb = command.verb(), status = ?output.status.code(), "Control-plane command exited non-zero");
        }

        Ok(result)
    }
}

/// True when the CLI is not logged in (no target, or `target` reports FAILED).
pub async fn is_logged_off<C: ControlPlane + ?Sized>(control_plane: &C) -> bool {
    match control_plane.execute(&ControlPlaneCommand::Target).await {
        Ok(output) => !output.success || output.stdout.trim_start().starts_with("FAILED"),
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_service_args_include_parameters() {
        let command = ControlPlaneCommand::CreateService {
            offering: "identity".to_string(),
            plan: "application".to_string(),
            name: "ias-authn".to_string(),
            parameters: Some(r#"{"credential-type": "X509_GENERATED"}"#.to_string()),
            working_dir: None,
        };
        assert_eq!(
            command.args(),
            vec![
                "create-service",
                "identity",
                "application",
                "ias-authn",
                "-c",
                r#"{"credential-type": "X509_GENERATED"}"#
            ]
        );
    }

    #[test]
    fn deletes_are_forced() {
        let command = ControlPlaneCommand::DeleteServiceKey {
            service: "svc".to_string(),
            key: "svc-key".to_string(),
        };
        assert_eq!(command.args(), vec!["delete-service-key", "-f", "svc", "svc-key"]);
        assert_eq!(
            ControlPlaneCommand::DeleteApp { app: "app".to_string() }.args(),
            vec!["delete", "-f", "-r", "app"]
        );
    }

    #[test]
    fn push_runs_in_app_directory() {
        let command = ControlPlaneCommand::Push {
            app: "java-security-usage".to_string(),
            working_dir: PathBuf::from("./java-security-usage"),
            vars_file: PathBuf::from("../vars.yml"),
        };
        assert_eq!(command.args(), vec!["push", "--vars-file", "../vars.yml"]);
        assert_eq!(command.working_dir(), Some(&PathBuf::from("./java-security-usage")));
    }

    #[test]
    fn failure_detection() {
        assert!(CommandOutput::failed("", "boom").reports_failure());
        assert!(CommandOutput::ok("FAILED\nService instance x not found").reports_failure());
        assert!(!CommandOutput::ok("OK").reports_failure());
        assert!(CommandOutput::ok("Service instance x not found").reports_not_found());
        assert!(CommandOutput::ok("Service instance x does not exist.").reports_not_found());
        assert!(CommandOutput::ok("Service instance x did not exist.").reports_not_found());
    }

    #[tokio::test]
    async fn missing_binary_is_a_transport_error() {
        let cli = CfCli::new("definitely-not-a-cf-binary");
        let result = cli.execute(&ControlPlaneCommand::Target).await;
        assert!(matches!(result, Err(HarnessError::Transport(_))));
        assert!(is_logged_off(&cli).await);
    }
}
