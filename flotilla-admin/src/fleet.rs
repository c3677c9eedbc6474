//! Fleet node: command parsing, dispatch and the in-memory command ledger.

use crate::execution::{HostControl, PowerAction};
use crate::metrics::SystemMetrics;
use chrono::{DateTime, Local, Utc};
use flotilla_common::{AdminConf, ExecuteConf};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("malformed command body: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("command body is not a JSON object")]
    NotAnObject,
}

#[derive(Debug, Deserialize)]
struct RawCommand {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Echo(Value),
    Shutdown,
    Reboot,
    Execute(Value),
    Status,
    Unknown(String),
}

impl Command {
    pub fn kind(&self) -> &str {
        match self {
            Self::Echo(_) => "echo",
            Self::Shutdown => "shutdown",
            Self::Reboot => "reboot",
            Self::Execute(_) => "execute",
            Self::Status => "status",
            Self::Unknown(kind) => kind,
        }
    }
}

/// A well-formed command body: the decoded command plus the body as sent.
#[derive(Debug, Clone)]
pub struct ParsedCommand {
    pub command: Command,
    pub raw: Value,
}

impl ParsedCommand {
    /// The body must be a JSON object with a string `type`.
    pub fn parse(body: &[u8]) -> Result<Self, CommandError> {
        let raw: Value = serde_json::from_slice(body)?;
        if !raw.is_object() {
            return Err(CommandError::NotAnObject);
        }
        let RawCommand { kind, data } = RawCommand::deserialize(&raw)?;
        let command = match kind.as_str() {
            "echo" => Command::Echo(data),
            "shutdown" => Command::Shutdown,
            "reboot" => Command::Reboot,
            "execute" => Command::Execute(data),
            "status" => Command::Status,
            _ => Command::Unknown(kind),
        };
        Ok(Self { command, raw })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandRecord {
    pub command: Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Ledger {
    command_count: u64,
    last_command: Option<Value>,
    // unbounded, lives as long as the process
    history: Vec<CommandRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShipStatus {
    pub ship_name: String,
    /// Seconds since the server started.
    pub uptime: f64,
    pub timestamp: String,
    pub last_command: Option<Value>,
    pub command_count: u64,
    pub system: SystemMetrics,
}

pub struct FleetNode<H> {
    ship_name: String,
    started: Instant,
    power_delay: Duration,
    execute: ExecuteConf,
    ledger: Mutex<Ledger>,
    host: H,
}

impl<H: HostControl> FleetNode<H> {
    pub fn new(ship_name: String, conf: &AdminConf, host: H) -> Self {
        Self {
            ship_name,
            started: Instant::now(),
            power_delay: Duration::from_secs(conf.power_delay_secs),
            execute: conf.execute.clone(),
            ledger: Mutex::new(Ledger::default()),
            host,
        }
    }

    #[cfg(test)]
    pub fn command_count(&self) -> u64 {
        self.ledger.lock().command_count
    }

    #[cfg(test)]
    pub fn history(&self) -> Vec<CommandRecord> {
        self.ledger.lock().history.clone()
    }

    pub async fn status(&self) -> ShipStatus {
        let (last_command, command_count) = {
            let ledger = self.ledger.lock();
            (ledger.last_command.clone(), ledger.command_count)
        };
        let uptime = self.started.elapsed().as_secs_f64();
        let system = self.host.system_metrics().await;
        ShipStatus {
            ship_name: self.ship_name.clone(),
            uptime,
            timestamp: Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
            last_command,
            command_count,
            system,
        }
    }

    /// Record then dispatch. The returned value is the command result; domain
    /// errors are values too.
    pub async fn handle(&self, parsed: ParsedCommand) -> Value {
        self.record(parsed.raw);
        info!("Received command: {}", parsed.command.kind());

        match parsed.command {
            Command::Echo(data) => json!({ "message": data }),
            Command::Shutdown => self.schedule(PowerAction::Shutdown),
            Command::Reboot => self.schedule(PowerAction::Reboot),
            Command::Execute(data) => self.execute(data).await,
            Command::Status => match serde_json::to_value(self.status().await) {
                Ok(status) => status,
                Err(e) => json!({ "error": e.to_string() }),
            },
            Command::Unknown(kind) => json!({ "error": format!("Unknown command type: {kind}") }),
        }
    }

    fn record(&self, raw: Value) {
        let mut ledger = self.ledger.lock();
        ledger.command_count += 1;
        ledger.last_command = Some(raw.clone());
        ledger.history.push(CommandRecord { command: raw, timestamp: Utc::now() });
    }

    fn schedule(&self, action: PowerAction) -> Value {
        self.host.schedule_power(action, self.power_delay);
        json!({
            "message": format!("{} scheduled in {} seconds", action.label(), self.power_delay.as_secs())
        })
    }

    /// Arbitrary shell execution. Gated by `admin.execute`; open by default.
    async fn execute(&self, data: Value) -> Value {
        let Some(command) = data.as_str() else {
            return json!({ "error": "execute expects a command string" });
        };
        if let Err(reason) = self.check_execute(command) {
            warn!("refused execute: {reason}");
            return json!({ "error": reason });
        }
        let timeout = self.execute.timeout_secs.map(Duration::from_secs);
        let outcome = self.host.execute(command, timeout).await;
        serde_json::to_value(outcome).unwrap_or_else(|e| json!({ "error": e.to_string() }))
    }

    fn check_execute(&self, command: &str) -> Result<(), String> {
        if !self.execute.enabled {
            return Err("execute is disabled on this node".into());
        }
        if self.execute.allow_list.is_empty() {
            return Ok(());
        }
        let program = command.split_whitespace().next().unwrap_or_default();
        if self.execute.allow_list.iter().any(|allowed| allowed == program) {
            Ok(())
        } else {
            Err(format!("program not allowed: {program}"))
        }
    }
}
