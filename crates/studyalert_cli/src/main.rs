//! Notification service entry point.
//!
//! # Responsibility
//! - Parse process configuration from flags and environment.
//! - Open exactly one persistence backend and hand it to the engine.
//! - Run the engine until Ctrl-C, or a single cycle with `--once`.

use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use studyalert_core::{
    default_log_level, init_logging, open_gateway, EngineConfig, LogNotifier, NotificationEngine,
    StoreConfig, SystemClock,
};

#[derive(Parser, Debug)]
#[command(name = "studyalert", version, about = "Deadline notification engine")]
struct Args {
    /// Document-store connection string; the in-process store is used when unset.
    #[arg(long, env = "MONGO_URI")]
    mongo_uri: Option<String>,
    #[arg(long, env = "MONGO_DB")]
    mongo_db: Option<String>,
    #[arg(long, env = "STUDYALERT_LOG_LEVEL", default_value = default_log_level())]
    log_level: String,
    /// Absolute directory for rolling log files.
    #[arg(long, env = "STUDYALERT_LOG_DIR", default_value = "")]
    log_dir: String,
    #[arg(long, default_value_t = 60)]
    tick_secs: u64,
    /// Run one cycle and exit.
    #[arg(long, default_value_t = false)]
    once: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let log_dir = resolve_log_dir(&args.log_dir);
    if let Err(err) = init_logging(&args.log_level, &log_dir) {
        eprintln!("studyalert: {err}");
        return ExitCode::from(2);
    }

    let store = StoreConfig::from_target(args.mongo_uri.as_deref(), args.mongo_db.as_deref());
    let gateway = match open_gateway(&store, Arc::new(SystemClock)) {
        Ok(gateway) => gateway,
        Err(err) => {
            error!("event=service_exit module=cli status=error error={err}");
            eprintln!("studyalert: {err}");
            return ExitCode::from(1);
        }
    };

    let config = EngineConfig {
        tick_interval: Duration::from_secs(args.tick_secs),
        ..EngineConfig::default()
    };
    let engine = Arc::new(NotificationEngine::with_config(
        gateway,
        Arc::new(LogNotifier),
        config,
    ));

    if args.once {
        let report = engine.run_cycle();
        println!(
            "tasks_created={} events_created={} emailed={}",
            report.tasks.created, report.events.created, report.stale.emailed
        );
        return ExitCode::SUCCESS;
    }

    let handle = match engine.start() {
        Ok(handle) => handle,
        Err(err) => {
            error!("event=engine_start module=cli status=error error={err}");
            eprintln!("studyalert: {err}");
            return ExitCode::from(1);
        }
    };

    if let Err(err) = wait_for_ctrl_c() {
        error!("event=signal_wait module=cli status=error error={err}");
    }
    info!("event=service_exit module=cli status=ok cycles={}", handle.cycles_completed());
    handle.stop();
    ExitCode::SUCCESS
}

fn wait_for_ctrl_c() -> std::io::Result<()> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(tokio::signal::ctrl_c())
}

fn resolve_log_dir(raw: &str) -> String {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
        return trimmed.to_string();
    }
    let fallback: PathBuf = std::env::temp_dir().join("studyalert-logs");
    fallback.to_string_lossy().into_owned()
}
