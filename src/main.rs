//! Entry point for `udp-probe`.
//!
//! Parses CLI arguments and dispatches into either a **network run** or an
//! offline **simulation**.  All actual protocol work is delegated to library
//! modules; `main.rs` owns only process setup (logging, argument parsing).

use std::net::IpAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use udp_probe::config::{DEFAULT_DATA_PORT, DEFAULT_FEEDBACK_PORT};
use udp_probe::echo::EchoReceiver;
use udp_probe::prober::Prober;
use udp_probe::simulator::{FaultConfig, Lockstep};
use udp_probe::{orchestrator, ProbeConfig, RoleSet};

/// Find the largest UDP payload a network path delivers reliably.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Probe a real path; run the receiver on the far host (or both roles here).
    Run {
        /// Peer IP address or hostname.
        #[arg(short, long, default_value = "127.0.0.1")]
        target: String,
        /// Local address to bind.
        #[arg(long, default_value = "0.0.0.0")]
        bind: IpAddr,
        /// Receiver's port for probes.
        #[arg(long, default_value_t = DEFAULT_DATA_PORT)]
        data_port: u16,
        /// Prober's port for feedback.
        #[arg(long, default_value_t = DEFAULT_FEEDBACK_PORT)]
        feedback_port: u16,
        #[arg(short, long, value_enum, default_value_t = CliRole::Both)]
        role: CliRole,
        /// First probe size in bytes.
        #[arg(short = 's', long, default_value_t = 1)]
        initial_size: u32,
        /// Initial growth step in bytes.
        #[arg(short = 'p', long, default_value_t = 10_000)]
        initial_step: u32,
        /// Probes per second.
        #[arg(long, default_value_t = 10)]
        rate: u32,
        /// Give up after this many seconds (default: wait forever).
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Run the ladder offline against a simulated size boundary.
    Simulate {
        /// Payloads of this many bytes or more are dropped.
        #[arg(short, long)]
        drop_from: usize,
        #[arg(short = 's', long, default_value_t = 1)]
        initial_size: u32,
        #[arg(short = 'p', long, default_value_t = 10_000)]
        initial_step: u32,
        /// Extra random loss probability for every datagram.
        #[arg(long, default_value_t = 0.0)]
        loss_rate: f64,
        /// Probability that a probe's announcement overtakes its payload.
        #[arg(long, default_value_t = 0.0)]
        reorder_rate: f64,
        #[arg(long, default_value_t = 0)]
        seed: u64,
        #[arg(long, default_value_t = 100_000)]
        max_ticks: u64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum CliRole {
    Send,
    Receive,
    Both,
}

impl From<CliRole> for RoleSet {
    fn from(role: CliRole) -> Self {
        match role {
            CliRole::Send => RoleSet::Send,
            CliRole::Receive => RoleSet::Receive,
            CliRole::Both => RoleSet::Both,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Run {
            target,
            bind,
            data_port,
            feedback_port,
            role,
            initial_size,
            initial_step,
            rate,
            timeout,
        } => {
            if rate == 0 {
                bail!("--rate must be at least 1 probe per second");
            }
            let config = ProbeConfig {
                target,
                bind_ip: bind,
                data_port,
                feedback_port,
                roles: role.into(),
                initial_size,
                initial_step,
                tick_interval: Duration::from_secs(1) / rate,
                run_timeout: timeout.map(Duration::from_secs),
                ..ProbeConfig::default()
            };
            log::info!(
                "Probing {} (data port {}, feedback port {})",
                config.target,
                config.data_port,
                config.feedback_port
            );
            let report = orchestrator::run(config).await.context("probe run failed")?;
            println!("{}", report.max_safe_size);
        }
        Mode::Simulate {
            drop_from,
            initial_size,
            initial_step,
            loss_rate,
            reorder_rate,
            seed,
            max_ticks,
        } => {
            if initial_size == 0 || initial_step == 0 {
                bail!("initial size and step must be at least 1 byte");
            }
            if !(0.0..=1.0).contains(&loss_rate) {
                bail!("--loss-rate must be within [0, 1]");
            }
            if !(0.0..=1.0).contains(&reorder_rate) {
                bail!("--reorder-rate must be within [0, 1]");
            }
            let faults = FaultConfig {
                drop_from: Some(drop_from),
                loss_rate,
                reorder_rate,
                seed,
                ..FaultConfig::default()
            };
            let mut sim = Lockstep::new(
                Prober::new(initial_size, initial_step),
                EchoReceiver::new(),
                faults,
            );
            let outcome = sim
                .run(max_ticks)
                .with_context(|| format!("no convergence within {max_ticks} ticks"))?;
            log::info!(
                "Converged after {} ticks (prober estimate {:?})",
                outcome.ticks,
                outcome.prober_size
            );
            println!("{}", outcome.receiver_size);
        }
    }

    Ok(())
}
