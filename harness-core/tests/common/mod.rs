//! Shared fixtures for harness-core integration tests.

#![allow(dead_code)]

use harness_core::async_trait::async_trait;
use harness_core::{CommandOutput, ControlPlane, ControlPlaneCommand, HarnessConfig, HarnessResult};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

/// In-memory control plane answering from per-verb scripts.
///
/// Queued answers are consumed first; once a verb's queue is empty its
/// `always` answer is repeated, and verbs without any script answer `OK`.
#[derive(Default)]
pub struct ScriptedControlPlane {
    queued: Mutex<HashMap<&'static str, VecDeque<CommandOutput>>>,
    always: Mutex<HashMap<&'static str, CommandOutput>>,
    calls: Mutex<Vec<ControlPlaneCommand>>,
}

impl ScriptedControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(self, verb: &'static str, output: CommandOutput) -> Self {
        self.queued
            .lock()
            .unwrap()
            .entry(verb)
            .or_default()
            .push_back(output);
        self
    }

    pub fn always(self, verb: &'static str, output: CommandOutput) -> Self {
        self.always.lock().unwrap().insert(verb, output);
        self
    }

    pub fn calls(&self) -> Vec<ControlPlaneCommand> {
        self.calls.lock().unwrap().clone()
    }

    pub fn verbs(&self) -> Vec<&'static str> {
        self.calls().iter().map(ControlPlaneCommand::verb).collect()
    }

    pub fn count(&self, verb: &str) -> usize {
        self.verbs().into_iter().filter(|v| *v == verb).count()
    }
}

#[async_trait]
impl ControlPlane for ScriptedControlPlane {
    async fn execute(&self, command: &ControlPlaneCommand) -> HarnessResult<CommandOutput> {
        self.calls.lock().unwrap().push(command.clone());
        let verb = command.verb();

        if let Some(output) = self
            .queued
            .lock()
            .unwrap()
            .get_mut(verb)
            .and_then(VecDeque::pop_front)
        {
            return Ok(output);
        }
        if let Some(output) = self.always.lock().unwrap().get(verb) {
            return Ok(output.clone());
        }
        Ok(CommandOutput::ok("OK"))
    }
}

pub fn service_status(status: &str) -> CommandOutput {
    CommandOutput::ok(format!(
        "Showing info of service ias-authn in org security / space samples as operator...\n\n\
         name:            ias-authn\n\
         service:         identity\n\n\
         Showing status of last operation:\n   status:    {status}\n   message:\n"
    ))
}

pub fn service_key(credentials: &str) -> CommandOutput {
    CommandOutput::ok(format!(
        "Getting key ias-authn-key for service instance ias-authn as operator...\n{{\"credentials\": {credentials}}}\n"
    ))
}

pub fn target(api: &str) -> CommandOutput {
    CommandOutput::ok(format!(
        "API endpoint:   {api}\nAPI version:    3.140.0\nuser:           operator@example.com\n\
         org:            security\nspace:          samples\n"
    ))
}

pub fn config(scratch_dir: &Path) -> HarnessConfig {
    let mut config = HarnessConfig::default();
    config.poll.interval_secs = 1;
    config.poll.max_wait_secs = 5;
    config.scratch_dir = scratch_dir.to_path_buf();
    config
}

pub fn fixture(name: &str) -> String {
    let path: PathBuf = [env!("CARGO_MANIFEST_DIR"), "tests", "fixtures", name].iter().collect();
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("fixture {}: {}", path.display(), e))
}

pub fn entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

/// One recorded log event: its level and fields rendered as text.
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: Level,
    pub fields: HashMap<String, String>,
}

impl CapturedEvent {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// Layer recording every event emitted while it is the thread's default.
#[derive(Clone, Default)]
pub struct CapturedEvents(Arc<Mutex<Vec<CapturedEvent>>>);

impl CapturedEvents {
    /// Installs a subscriber with this layer for the current thread until the
    /// guard is dropped.
    pub fn install(&self) -> DefaultGuard {
        tracing::subscriber::set_default(tracing_subscriber::registry().with(self.clone()))
    }

    pub fn at(&self, level: Level) -> Vec<CapturedEvent> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.level == level)
            .cloned()
            .collect()
    }
}

impl<S: Subscriber> Layer<S> for CapturedEvents {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut fields = FieldText::default();
        event.record(&mut fields);
        self.0.lock().unwrap().push(CapturedEvent {
            level: *event.metadata().level(),
            fields: fields.0,
        });
    }
}

#[derive(Default)]
struct FieldText(HashMap<String, String>);

impl Visit for FieldText {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0.insert(field.name().to_string(), format!("{value:?}"));
    }
}
