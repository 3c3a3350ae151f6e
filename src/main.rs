// Copyright 2025 Servus Altissimi (Pseudonym)

// Permission is hereby granted, free of charge, to any person obtaining a copy of this software and associated documentation files (the "Software"), to deal in the Software without restriction, including without limitation the rights to use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of the Software, and to permit persons to whom the Software is furnished to do so, subject to the following conditions:
// The above copyright notice and this permission notice shall be included in all copies or substantial portions of the Software.
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

use lockstep::behaviors::BehaviorRegistry;
use lockstep::metrics::analyzer::{self, AnalysisReport};
use lockstep::metrics::logger;
use lockstep::network::TransportKind;
use lockstep::simulation::{SimConfig, Simulation};

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one simulation. Flags override values from --config.
    Run {
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(short, long)]
        depth: Option<usize>,
        #[arg(short, long)]
        fanout: Option<usize>,
        #[arg(short, long)]
        turns: Option<u64>,
        #[arg(long)]
        send_failure: Option<f64>,
        #[arg(long)]
        receive_failure: Option<f64>,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        transport: Option<TransportKind>,
        #[arg(long)]
        turn_timeout_ms: Option<u64>,
        /// Comma separated behaviour names
        #[arg(short, long)]
        behaviors: Option<String>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Repeat runs across several failure rates and compare them.
    Sweep {
        #[arg(long, default_value = "0.0,0.1,0.3")]
        failures: String,
        #[arg(short, long, default_value_t = 3)]
        repetitions: u32,
        #[arg(short, long, default_value_t = 2)]
        depth: usize,
        #[arg(short, long, default_value_t = 3)]
        fanout: usize,
        #[arg(short, long, default_value_t = 200)]
        turns: u64,
        #[arg(long, default_value = "mailbox")]
        transport: TransportKind,
        #[arg(short, long, default_value = "results")]
        output: PathBuf,
    },

    /// Print a comparison table for a saved CSV run, or every CSV in a directory.
    Analyze {
        #[arg(default_value = "results")]
        path: PathBuf,
        /// Links a complete run has. Defaults to the highest count in each file.
        #[arg(long)]
        expected: Option<usize>,
    },

    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let program_start = Instant::now();

    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run {
            config,
            depth,
            fanout,
            turns,
            send_failure,
            receive_failure,
            seed,
            transport,
            turn_timeout_ms,
            behaviors,
            output,
        } => {
            let mut sim_config = match config {
                Some(path) => SimConfig::from_json_file(path)?,
                None => SimConfig::default(),
            };
            if let Some(depth) = depth {
                sim_config.depth = depth;
            }
            if let Some(fanout) = fanout {
                sim_config.fanout = fanout;
            }
            if let Some(turns) = turns {
                sim_config.max_turns = turns;
            }
            if let Some(seed) = seed {
                sim_config.seed = seed;
            }
            if let Some(transport) = transport {
                sim_config.transport = transport;
            }
            if turn_timeout_ms.is_some() {
                sim_config.turn_timeout_ms = turn_timeout_ms;
            }
            if let Some(behaviors) = behaviors {
                sim_config.behaviors = split_list(&behaviors);
            }
            if let Some(output) = output {
                sim_config.output_dir = Some(output);
            }
            let mailbox = sim_config.mailbox;
            sim_config = sim_config.with_failures(
                send_failure.unwrap_or(mailbox.send_failure),
                receive_failure.unwrap_or(mailbox.receive_failure),
            );

            run_single_simulation(sim_config).await?;
        }

        Commands::Sweep {
            failures,
            repetitions,
            depth,
            fanout,
            turns,
            transport,
            output,
        } => {
            let rates = failures
                .split(',')
                .map(|s| s.trim().parse::<f64>())
                .collect::<Result<Vec<_>, _>>()?;
            let base = SimConfig::default()
                .with_topology(depth, fanout)
                .with_turns(turns)
                .with_transport(transport);
            sweep_failures(base, &rates, repetitions, &output, program_start).await?;
        }

        Commands::Analyze { path, expected } => {
            analyze_results(&path, expected)?;
        }

        Commands::List => {
            println!("\nAvailable Behaviors");

            for behavior in BehaviorRegistry::global().list() {
                println!("  - {}", behavior);
            }

            println!("\nUsage: cargo run -- run --behaviors <name,...>");
            println!("Example: cargo run -- run --behaviors connect,heartbeat --transport mailbox\n");
        }
    }

    let total_time = program_start.elapsed();
    info!("Total runtime: {:.2}s", total_time.as_secs_f64());

    Ok(())
}

async fn run_single_simulation(config: SimConfig) -> Result<()> {
    info!("Lockstep: Single Run");

    let mut sim = Simulation::new(config);
    let report = sim.run().await?;

    println!("\n{}", report.summary);
    match report.converged_at {
        Some(turn) => println!("Converged at turn {}", turn),
        None => println!("Did not converge within {} turns", report.turns),
    }
    let failed = report.failed_agents();
    if !failed.is_empty() {
        println!("Agents stopped on error: {}", failed.join(", "));
    }
    Ok(())
}

async fn sweep_failures(
    base: SimConfig,
    rates: &[f64],
    repetitions: u32,
    output: &Path,
    global_start: Instant,
) -> Result<()> {
    info!("Lockstep: Failure Sweep");
    info!("Rates: {:?}", rates);
    info!("Repetitions: {}", repetitions);

    let mut all_reports = Vec::new();

    for &rate in rates {
        info!("Testing send/receive failure {:.2}", rate);
        let mut rate_reports = Vec::new();

        for rep in 1..=repetitions {
            let elapsed = global_start.elapsed();
            info!("  [{}] Run {}/{}", format_time(elapsed), rep, repetitions);

            let config = base
                .clone()
                .with_name(format!("fail{:.2}", rate))
                .with_seed(base.seed.wrapping_add(rep as u64))
                .with_failures(rate, rate)
                .with_output_dir(output);

            let mut sim = Simulation::new(config);
            let report = sim.run().await?;
            rate_reports.push(report.analysis);
        }

        if let Some(avg) = analyzer::average(&rate_reports) {
            all_reports.push(avg);
        }
    }

    comparison_table(&all_reports);

    std::fs::create_dir_all(output)?;
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let comparison_path = output.join(format!("sweep_{}_report.json", timestamp));
    std::fs::write(&comparison_path, serde_json::to_string_pretty(&all_reports)?)?;
    info!("Sweep saved to: {}", comparison_path.display());

    Ok(())
}

fn format_time(duration: Duration) -> String {
    let secs = duration.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn analyze_results(path: &Path, expected: Option<usize>) -> Result<()> {
    info!("Analyzing results in: {}", path.display());

    let files: Vec<PathBuf> = if path.is_dir() {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(path)? {
            let file = entry?.path();
            if file.extension().and_then(|s| s.to_str()) == Some("csv") {
                files.push(file);
            }
        }
        files.sort();
        files
    } else {
        vec![path.to_path_buf()]
    };

    let mut reports = Vec::new();
    for file in &files {
        let snapshots = logger::load_snapshots(file)?;
        let name = file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        // Without a target, the best count the run reached stands in for it
        let target = expected.unwrap_or_else(|| snapshots.iter().map(|s| s.connections).max().unwrap_or(0));
        reports.push(analyzer::analyze(&snapshots, &name, target));
    }

    if reports.is_empty() {
        info!("No CSV files found.");
        return Ok(());
    }

    comparison_table(&reports);
    Ok(())
}

fn comparison_table(reports: &[AnalysisReport]) {
    println!("\n╔═══════════════╦═══════════╦═══════════╦════════════╦════════════╦═════════════╗");
    println!("║ Run           ║ Converged ║ Links     ║ Delivery   ║ Send drop  ║ Hellos      ║");
    println!("║               ║ (turn)    ║           ║ (%)        ║ (%)        ║             ║");
    println!("╠═══════════════╬═══════════╬═══════════╬════════════╬════════════╬═════════════╣");

    for report in reports {
        let converged = report
            .converged_at
            .map(|t| t.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "║ {:<13} ║ {:>9} ║ {:>4}/{:<4} ║ {:>9.2}% ║ {:>9.2}% ║ {:>11} ║",
            report.name,
            converged,
            report.final_connections,
            report.expected_connections,
            report.delivery_rate * 100.0,
            report.send_drop_rate * 100.0,
            report.hellos_sent,
        );
    }

    println!("╚═══════════════╩═══════════╩═══════════╩════════════╩════════════╩═════════════╝\n");

    if let Some(fastest) = reports
        .iter()
        .filter_map(|r| r.converged_at.map(|t| (r, t)))
        .min_by_key(|(_, t)| *t)
    {
        println!("Fastest convergence: {} (turn {})", fastest.0.name, fastest.1);
    }

    println!();
}
