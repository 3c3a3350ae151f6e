pub mod config;
pub mod topology;

pub use config::SimConfig;
pub use topology::{Topology, TopologyNode};

use crate::agent::Agent;
use crate::behaviors::{Behavior, BehaviorRegistry, BehaviorSetup, TurnContext};
use crate::connection::LinkCategory;
use crate::context::SimContext;
use crate::error::SimError;
use crate::metrics::analyzer::{self, AnalysisReport};
use crate::metrics::logger::MetricsLogger;
use crate::network::{InMemoryBroker, MailboxTransport, Transport, TransportKind};
use crate::organization::Organization;
use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How one agent's worker ended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOutcome {
    pub id: String,
    pub turns: u64,
    /// Every behaviour reported done.
    pub done: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimReport {
    pub name: String,
    pub turns: u64,
    pub converged_at: Option<u64>,
    pub all_connected: bool,
    pub connections: Vec<String>,
    pub expected_connections: usize,
    pub summary: String,
    pub outcomes: Vec<AgentOutcome>,
    pub analysis: AnalysisReport,
}

impl SimReport {
    pub fn failed_agents(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.error.is_some())
            .map(|o| o.id.as_str())
            .collect()
    }
}

pub struct Simulation {
    config: SimConfig,
    ctx: Arc<SimContext>,
    org: Arc<Organization>,
}

impl Simulation {
    pub fn new(config: SimConfig) -> Self {
        let (ctx, org) = Self::fresh(&config);
        Self { config, ctx, org }
    }

    fn fresh(config: &SimConfig) -> (Arc<SimContext>, Arc<Organization>) {
        let ctx = SimContext::shared(config.seed);
        let org = Arc::new(Organization::new(&config.name, ctx.clone(), config.turn_timeout()));
        (ctx, org)
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Context of the most recent run.
    pub fn context(&self) -> &Arc<SimContext> {
        &self.ctx
    }

    pub fn organization(&self) -> &Arc<Organization> {
        &self.org
    }

    pub async fn run(&mut self) -> Result<SimReport> {
        info!("Starting simulation: {}", self.config.name);
        info!(
            "Tree depth {} fanout {}, {} turns max, transport {}",
            self.config.depth, self.config.fanout, self.config.max_turns, self.config.transport
        );
        info!(
            "Send failure {:.2}, receive failure {:.2}, seed {}",
            self.config.mailbox.send_failure, self.config.mailbox.receive_failure, self.config.seed
        );

        // Each run gets its own turn clock, graph and metrics
        let (ctx, org) = Self::fresh(&self.config);
        self.ctx = ctx;
        self.org = org;

        let topology = Topology::tree(self.config.depth, self.config.fanout, &self.config.name)?;
        self.ctx.graph.set_expected(topology.links());

        let broker = Arc::new(InMemoryBroker::new());
        let mut workers = Vec::new();
        for node in topology.nodes() {
            let kind = format!("{:?}", LinkCategory::for_level(node.level)).to_lowercase();
            let agent = self.org.create_agent(&node.id, &kind, self.config.mailbox)?;

            let transport: Arc<dyn Transport> = match self.config.transport {
                TransportKind::Broker => broker.clone(),
                TransportKind::Mailbox => Arc::new(MailboxTransport::attach(agent.mailbox().clone())?),
            };
            let setup = BehaviorSetup {
                agent: agent.clone(),
                connections: node.connections.clone(),
                ctx: self.ctx.clone(),
                transport,
                retry: self.config.retry.clone(),
            };

            let behaviors = self
                .config
                .behaviors
                .iter()
                .map(|name| BehaviorRegistry::global().create(name, &setup))
                .collect::<crate::error::Result<Vec<_>>>()?;
            for behavior in &behaviors {
                agent.add_capability(behavior.name());
            }
            workers.push((agent, behaviors));
        }
        info!("{}", self.org.summary());

        let cancel_token = CancellationToken::new();
        let max_turns = self.config.max_turns;
        let handles: Vec<_> = workers
            .into_iter()
            .map(|(agent, behaviors)| {
                let org = self.org.clone();
                let cancel = cancel_token.clone();
                tokio::task::spawn_blocking(move || run_agent(org, agent, behaviors, max_turns, cancel))
            })
            .collect();

        let pb = ProgressBar::new(max_turns);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.orange/yellow} {pos}/{len} turns {msg}")?
                .progress_chars("█▓░"),
        );

        let mut converged_at = None;
        let mut tick = interval(Duration::from_millis(5));
        loop {
            tick.tick().await;
            let turn = self.ctx.turn();
            pb.set_position(turn.min(max_turns));
            pb.set_message(format!(
                "Links: {}/{}",
                self.ctx.graph.len(),
                self.ctx.graph.expected()
            ));

            if converged_at.is_none() && self.ctx.graph.is_complete() {
                converged_at = Some(turn);
                info!("All {} links established by turn {}", self.ctx.graph.len(), turn);
                if self.config.stop_on_convergence {
                    cancel_token.cancel();
                }
            }

            if handles.iter().all(|h| h.is_finished()) {
                break;
            }
        }
        pb.finish_with_message("Simulation complete");

        let mut outcomes = Vec::new();
        for handle in handles {
            match tokio::time::timeout(Duration::from_secs(2), handle).await {
                Ok(Ok(outcome)) => outcomes.push(outcome),
                Ok(Err(e)) => error!("Agent worker panicked: {}", e),
                Err(_) => warn!("Agent worker did not stop in time"),
            }
        }

        let turns = self.ctx.turn();
        let metrics = &self.ctx.metrics;
        // Closing snapshot, unless the last barrier advance already captured this state
        let links = self.ctx.graph.len();
        if metrics.get_snapshots().last().map(|s| (s.turn, s.connections)) != Some((turns, links)) {
            metrics.record_connections(links);
            metrics.save_snapshot(turns);
        }

        let expected = self.ctx.graph.expected();
        let analysis = analyzer::analyze(&metrics.get_snapshots(), &self.config.name, expected);
        let report = SimReport {
            name: self.config.name.clone(),
            turns,
            converged_at: analysis.converged_at.or(converged_at),
            all_connected: self.ctx.graph.len() >= expected,
            connections: self.ctx.graph.keys(),
            expected_connections: expected,
            summary: self.ctx.graph.summary(),
            outcomes,
            analysis,
        };

        info!("{}", report.summary);
        for failed in report.failed_agents() {
            warn!("Agent {} stopped on error", failed);
        }

        if let Some(dir) = self.config.output_dir.clone() {
            self.save_results(&dir, &report)?;
        }
        Ok(report)
    }

    fn save_results(&self, dir: &Path, report: &SimReport) -> Result<()> {
        let snapshots = self.ctx.metrics.get_snapshots();
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");

        std::fs::create_dir_all(dir)?;

        let csv_path = dir.join(format!("{}_{}.csv", self.config.name, timestamp));
        let mut logger = MetricsLogger::new(&csv_path)?;
        logger.log_batch(&snapshots)?;
        info!("Results saved to: {}", csv_path.display());

        let json_path = dir.join(format!("{}_{}_report.json", self.config.name, timestamp));
        std::fs::write(&json_path, serde_json::to_string_pretty(report)?)?;
        info!("Report saved to: {}", json_path.display());

        info!("Delivery rate: {:.2}%", report.analysis.delivery_rate * 100.0);
        info!("Hellos sent: {}", report.analysis.hellos_sent);
        Ok(())
    }
}

/// One agent's turn loop. Leaves the barrier on every exit path.
fn run_agent(
    org: Arc<Organization>,
    agent: Arc<Agent>,
    mut behaviors: Vec<Box<dyn Behavior>>,
    max_turns: u64,
    cancel: CancellationToken,
) -> AgentOutcome {
    let id = agent.id().clone();
    let mut turns = 0;

    let failure: Option<SimError> = loop {
        let turn = org.turn();
        if cancel.is_cancelled() || turn >= max_turns || !agent.is_alive() {
            break None;
        }

        agent.mailbox().reset();
        let cx = TurnContext {
            agent: agent.as_ref(),
            turn,
        };
        if let Err(e) = behaviors.iter_mut().try_for_each(|b| b.on_turn(&cx)) {
            error!("Agent {} failed at turn {}: {}", id, turn, e);
            break Some(e);
        }
        turns += 1;

        if let Err(e) = org.end_turn(&id) {
            if !agent.is_alive() {
                break None;
            }
            warn!("Agent {} left the barrier: {}", id, e);
            break Some(e);
        }
    };

    // A disabled agent was already taken off the barrier by whoever disabled it
    if agent.is_alive() {
        let left = match &failure {
            Some(e) if e.is_fatal_for_agent() => org.disable_agent(&id).map(|_| ()),
            _ => org.scheduler().deregister(&id),
        };
        if let Err(e) = left {
            warn!("Agent {} could not leave cleanly: {}", id, e);
        }
    } else {
        debug!("Agent {} was disabled at turn {}", id, org.turn());
    }

    AgentOutcome {
        id: id.to_string(),
        turns,
        done: behaviors.iter().all(|b| b.is_done()),
        error: failure.map(|e| e.to_string()),
    }
}
