//! harness-core: provisioning, token acquisition and app resolution for the cloud security samples.
pub mod api_access;
pub mod config;
pub mod control_plane;
pub mod credentials;
pub mod error;
pub mod observability;
pub mod poll;
pub mod probe;
pub mod provisioner;
pub mod resolver;
pub mod token;

pub use api_access::ApiAccess;
pub use config::{HarnessConfig, VarsParser};
pub use control_plane::{CfCli, CommandOutput, ControlPlane, ControlPlaneCommand};
pub use credentials::{OperatorCredentials, Prompt, StdinPrompt};
pub use error::{HarnessError, HarnessResult};
pub use poll::{PollConfig, PollOutcome, poll_until};
pub use probe::{ProbeAuth, ProbeResponse, ProbeRunner};
pub use provisioner::{ServiceInstance, ServiceKey, ServiceKind, ServiceProvisioner, ServiceState};
pub use resolver::{AppResolver, DeployedApp, ServiceCredentials};
pub use token::{Grant, TokenClient, TokenEndpoint, TokenResponse};

pub use async_trait;
pub use reqwest;
pub use secrecy;
pub use serde_json;
pub use tokio;
pub use tracing;
