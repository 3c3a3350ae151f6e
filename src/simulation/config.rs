use crate::connection::RetryPolicy;
use crate::mailbox::MailboxConfig;
use crate::network::TransportKind;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub name: String,
    pub seed: u64,
    /// Levels below the root. 0 is a lone root.
    pub depth: usize,
    pub fanout: usize,
    pub max_turns: u64,
    pub mailbox: MailboxConfig,
    pub transport: TransportKind,
    pub behaviors: Vec<String>,
    pub retry: RetryPolicy,
    pub turn_timeout_ms: Option<u64>,
    /// End the run as soon as every expected link is in the graph.
    pub stop_on_convergence: bool,
    pub output_dir: Option<PathBuf>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            name: "default_sim".to_string(),
            seed: 42,
            depth: 1,
            fanout: 2,
            max_turns: 50,
            mailbox: MailboxConfig::default(),
            transport: TransportKind::Broker,
            behaviors: vec!["connect".to_string()],
            retry: RetryPolicy::default(),
            turn_timeout_ms: None,
            stop_on_convergence: true,
            output_dir: None,
        }
    }
}

impl SimConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_topology(mut self, depth: usize, fanout: usize) -> Self {
        self.depth = depth;
        self.fanout = fanout;
        self
    }

    pub fn with_turns(mut self, max_turns: u64) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_failures(mut self, send_failure: f64, receive_failure: f64) -> Self {
        self.mailbox = MailboxConfig {
            send_failure,
            receive_failure,
            ..self.mailbox
        }
        .clamped();
        self
    }

    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_behaviors(mut self, behaviors: &[&str]) -> Self {
        self.behaviors = behaviors.iter().map(|b| b.to_string()).collect();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_turn_timeout(mut self, timeout_ms: Option<u64>) -> Self {
        self.turn_timeout_ms = timeout_ms;
        self
    }

    pub fn run_to_completion(mut self) -> Self {
        self.stop_on_convergence = false;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn turn_timeout(&self) -> Option<Duration> {
        self.turn_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_json_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"name": "lossy", "depth": 2, "mailbox": {{"send_failure": 0.25}}, "transport": "mailbox"}}"#).unwrap();

        let config = SimConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.name, "lossy");
        assert_eq!(config.depth, 2);
        assert_eq!(config.fanout, 2);
        assert_eq!(config.transport, TransportKind::Mailbox);
        assert_eq!(config.mailbox.send_failure, 0.25);
        assert_eq!(config.mailbox.receive_failure, 0.0);
        assert_eq!(config.behaviors, vec!["connect"]);
    }

    #[test]
    fn test_failures_are_clamped() {
        let config = SimConfig::default().with_failures(2.0, -1.0);
        assert_eq!(config.mailbox.send_failure, 1.0);
        assert_eq!(config.mailbox.receive_failure, 0.0);
    }
}
