//! CLI entry point for torque-daq.
//!
//! Two subcommands:
//!
//! - `run`: drives a complete demo acquisition session against the bundled
//!   mock transducer — connect, InitRead, simulated tightening cycles,
//!   re-arm — printing status updates and accepted results.
//! - `tail`: follows the newest protocol log file in the given directories
//!   and prints classified telegrams, the same way a diagnostics panel
//!   would.
//!
//! A real deployment replaces the mock with the vendor link implementation;
//! everything else is identical.

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;
use torque_daq::config::Settings;
use torque_daq::device::mock::MockTransducer;
use torque_daq::protolog::queue::DeliveryQueue;
use torque_daq::protolog::sink::ProtocolLog;
use torque_daq::protolog::tail::LogTailer;
use torque_daq::session::SessionManager;

#[derive(Parser)]
#[command(name = "torque-daq")]
#[command(about = "Acquisition controller for Phoenix torque transducers", long_about = None)]
struct Cli {
    /// Config name under config/ (defaults to "default", falling back to
    /// built-in defaults if the file is absent).
    #[arg(long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a demo acquisition session against the mock transducer
    Run {
        /// Device address to "connect" to
        #[arg(long, default_value = "192.168.0.100")]
        address: String,

        /// How long to keep the session alive
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },

    /// Tail the newest protocol log file and print telegrams
    Tail {
        /// Candidate directories to scan (repeatable)
        #[arg(long)]
        dir: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match Settings::new(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            if cli.config.is_some() {
                return Err(e.into());
            }
            Settings::default()
        }
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(settings.log_level.clone()),
    )
    .init();

    match cli.command {
        Commands::Run { address, seconds } => run_demo_session(&settings, &address, seconds).await,
        Commands::Tail { dir } => tail_logs(&settings, dir).await,
    }
}

async fn run_demo_session(settings: &Settings, address: &str, seconds: u64) -> Result<()> {
    let protolog = ProtocolLog::new(&settings.protocol_log.dir);
    let (queue, mut batches) = DeliveryQueue::new();
    let _forwarder = queue.attach(&protolog);

    let mut session = SessionManager::new(
        Box::new(MockTransducer::simulated()),
        settings,
        protolog.clone(),
    );

    let status = session.status_sink();
    let mut status_rx = status.subscribe_status();
    tokio::spawn(async move {
        while status_rx.changed().await.is_ok() {
            println!("status: {}", status_rx.borrow_and_update().clone());
        }
    });
    tokio::spawn(async move {
        while let Some(batch) = batches.recv().await {
            for line in batch {
                info!("protocol [{}] {}", line.direction, line.text);
            }
        }
    });

    session.connect(address).await?;
    session.run_init_sequence().await?;

    tokio::time::sleep(std::time::Duration::from_secs(seconds)).await;

    let results = session.results();
    println!();
    println!("accepted results: {}", results.len());
    for result in &results {
        println!(
            "  {}  {:.2} Nm  {:.1} deg",
            result.timestamp.format("%H:%M:%S%.3f"),
            result.torque,
            result.angle
        );
    }
    println!("untightenings: {}", session.untightenings());

    session.shutdown().await;
    Ok(())
}

async fn tail_logs(settings: &Settings, dirs: Vec<PathBuf>) -> Result<()> {
    let dirs = if dirs.is_empty() {
        settings.protocol_log.tail_dirs.clone()
    } else {
        dirs
    };
    println!("tailing newest log under: {dirs:?} (ctrl-c to stop)");

    let mut tailer = LogTailer::new(dirs);
    let mut lines = tailer.start().await;

    loop {
        tokio::select! {
            line = lines.recv() => match line {
                Some(line) => match &line.telegram {
                    Some(telegram) => {
                        println!("[{:?}] {}", telegram.direction, line.raw);
                    }
                    None => println!("        {}", line.raw),
                },
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    tailer.stop().await;
    Ok(())
}
