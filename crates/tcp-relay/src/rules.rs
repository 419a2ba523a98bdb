use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use audit_log::{AuditEntry, AuditEventType, AuditSink, AuditSource};
use relay_engine::{
    resolve_target, Engine, EngineConfig, EngineError, StatsSnapshot, StopHandle,
};

use crate::journal::JournalObserver;

/// Operator-visible rule identifier.
pub type RuleId = u64;

#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("engine task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Settings applied to every rule started after they are set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleSettings {
    pub buffer_size: usize,
    pub idle_timeout: Duration,
    pub bind_host: IpAddr,
}

/// What `start` needs to know about a new rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSpec {
    pub listen_port: u16,
    pub target_host: String,
    pub target_port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleState {
    /// Listener bound, engine not yet handed to a worker.
    Created,
    Running,
    /// The engine returned, either on request or on its own.
    Stopped,
}

/// Read-only view of one rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleInfo {
    pub id: RuleId,
    pub listen: SocketAddr,
    pub target: SocketAddr,
    pub buffer_size: usize,
    pub state: RuleState,
}

struct Rule {
    id: RuleId,
    listen: SocketAddr,
    target: SocketAddr,
    buffer_size: usize,
    stop: StopHandle,
    task: Option<JoinHandle<Result<StatsSnapshot, EngineError>>>,
}

impl Rule {
    fn new(id: RuleId, engine: &Engine) -> Self {
        let config = engine.config();
        Self {
            id,
            listen: engine.local_addr(),
            target: config.target,
            buffer_size: config.buffer_size,
            stop: engine.stop_handle(),
            task: None,
        }
    }

    /// Hand the engine to its own blocking worker.
    fn launch(&mut self, engine: Engine) {
        self.task = Some(tokio::task::spawn_blocking(move || engine.run()));
    }

    fn state(&self) -> RuleState {
        match &self.task {
            None => RuleState::Created,
            Some(task) if task.is_finished() => RuleState::Stopped,
            Some(_) => RuleState::Running,
        }
    }

    fn info(&self) -> RuleInfo {
        RuleInfo {
            id: self.id,
            listen: self.listen,
            target: self.target,
            buffer_size: self.buffer_size,
            state: self.state(),
        }
    }

    /// Signal the engine and wait for it to release its sockets.
    async fn shutdown(self) -> Result<StatsSnapshot, RuleError> {
        self.stop.stop();
        match self.task {
            Some(task) => Ok(task.await??),
            None => Ok(StatsSnapshot::default()),
        }
    }
}

/// Every rule started by the operator, keyed by id.
pub struct RuleTable {
    rules: BTreeMap<RuleId, Rule>,
    next_id: RuleId,
    settings: RuleSettings,
    journal: Option<AuditSink>,
}

impl RuleTable {
    pub fn new(settings: RuleSettings, journal: Option<AuditSink>) -> Self {
        Self {
            rules: BTreeMap::new(),
            next_id: 1,
            settings,
            journal,
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.settings.buffer_size
    }

    /// Buffer size for rules started from now on. Running rules keep theirs.
    pub fn set_buffer_size(&mut self, size: usize) {
        self.settings.buffer_size = size.max(1);
        info!(buffer_size = self.settings.buffer_size, "buffer size for new rules changed");
    }

    /// Resolve the target, bind the listener and start the rule's engine.
    ///
    /// An id is consumed only when the rule actually starts.
    pub async fn start(&mut self, spec: &RuleSpec) -> Result<RuleId, RuleError> {
        let id = self.next_id;
        let engine = match self.bind(id, spec).await {
            Ok(engine) => engine,
            Err(err) => {
                warn!(
                    listen_port = spec.listen_port,
                    target = %format!("{}:{}", spec.target_host, spec.target_port),
                    %err,
                    "failed to start rule"
                );
                self.journal(AuditEntry::new(
                    AuditEventType::RuleFailed,
                    AuditSource::new("rules"),
                    serde_json::json!({
                        "listen_port": spec.listen_port,
                        "target_host": spec.target_host,
                        "target_port": spec.target_port,
                        "error": err.to_string(),
                    }),
                ))
                .await;
                return Err(err);
            }
        };
        self.next_id += 1;

        let mut rule = Rule::new(id, &engine);
        rule.launch(engine);
        info!(
            rule = id,
            listen = %rule.listen,
            target = %rule.target,
            buffer_size = rule.buffer_size,
            "rule started"
        );
        self.journal(AuditEntry::new(
            AuditEventType::RuleStarted,
            AuditSource::new("rules").with_rule(id),
            serde_json::json!({
                "listen": rule.listen.to_string(),
                "target": rule.target.to_string(),
                "target_host": spec.target_host,
                "buffer_size": rule.buffer_size,
                "idle_timeout_secs": self.settings.idle_timeout.as_secs(),
            }),
        ))
        .await;

        self.rules.insert(id, rule);
        Ok(id)
    }

    async fn bind(&self, id: RuleId, spec: &RuleSpec) -> Result<Engine, RuleError> {
        let target = resolve_target(&spec.target_host, spec.target_port).await?;
        let listen = SocketAddr::new(self.settings.bind_host, spec.listen_port);
        let config = EngineConfig::new(listen, target)
            .with_buffer_size(self.settings.buffer_size)
            .with_idle_timeout(self.settings.idle_timeout)
            .with_label(format!("rule-{id}"));

        let mut engine = Engine::bind(config)?;
        if let Some(sink) = &self.journal {
            engine = engine.with_observer(Arc::new(JournalObserver::new(id, sink.clone())));
        }
        Ok(engine)
    }

    /// Stop and remove rule `id`. Returns `false` when no such rule exists.
    pub async fn stop(&mut self, id: RuleId) -> bool {
        let Some(rule) = self.rules.remove(&id) else {
            return false;
        };
        let was_running = rule.state() != RuleState::Stopped;

        let details = match rule.shutdown().await {
            Ok(stats) => {
                info!(rule = id, was_running, ?stats, "rule stopped");
                serde_json::json!({ "stats": stats, "was_running": was_running })
            }
            Err(err) => {
                warn!(rule = id, %err, "rule engine ended with an error");
                serde_json::json!({ "error": err.to_string(), "was_running": was_running })
            }
        };
        self.journal(AuditEntry::new(
            AuditEventType::RuleStopped,
            AuditSource::new("rules").with_rule(id),
            details,
        ))
        .await;
        true
    }

    /// Stop every rule, in id order.
    pub async fn shutdown(&mut self) {
        let ids = self.ids();
        if !ids.is_empty() {
            info!(count = ids.len(), "stopping all rules");
        }
        for id in ids {
            self.stop(id).await;
        }
    }

    pub fn info(&self, id: RuleId) -> Option<RuleInfo> {
        self.rules.get(&id).map(Rule::info)
    }

    pub fn ids(&self) -> Vec<RuleId> {
        self.rules.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    async fn journal(&self, entry: AuditEntry) {
        if let Some(sink) = &self.journal {
            sink.log(entry).await;
        }
    }
}
