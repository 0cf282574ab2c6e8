#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use parking_lot::Mutex;
use procwatch::bridge::ProcessEventStream;
use procwatch::cli::{self, CliCommand, WatchOptions};
use procwatch::config::MonitorConfiguration;
use procwatch::logging::{self, EventLogger};
use procwatch::models::EventRecord;
use procwatch::monitor::{EventCallback, MonitorController, UserData};
use procwatch::output::{self, SessionSummary};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How long one pull-mode wait blocks before re-checking for Ctrl+C
const WAIT_SLICE: Duration = Duration::from_millis(200);

/// Records drained per wake-up
const DRAIN_BATCH: usize = 64;

fn main() -> Result<()> {
    match cli::parse_args()? {
        CliCommand::Watch(options) => run_watch(options),
        CliCommand::Stream {
            config_path,
            buffer,
        } => run_stream(config_path, buffer),
        CliCommand::Config { config_path } => run_config(config_path),
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<MonitorConfiguration> {
    MonitorConfiguration::load_or_default(path.map(PathBuf::as_path))
}

fn run_watch(options: WatchOptions) -> Result<()> {
    let mut config = load_config(options.config_path.as_ref())?;
    if let Some(interval) = options.interval {
        config.source.polling_interval = interval;
    }
    config.validate()?;

    // Graceful degradation if logging fails
    let _ = logging::init_logger(options.verbose);
    let event_logger = EventLogger::default().with_process_events(options.verbose);

    // Set up interrupt handling
    let interrupted = Arc::new(AtomicBool::new(false));
    let _ = signal_hook::flag::register(signal_hook::consts::SIGINT, interrupted.clone());
    let _ = signal_hook::flag::register(signal_hook::consts::SIGTERM, interrupted.clone());

    let controller = MonitorController::with_system_source(config);
    controller.initialize();

    if !options.json_output {
        eprintln!(
            "Watching process start/stop events ({} mode, interval: {:.1}s)...",
            if options.push_mode { "push" } else { "pull" },
            controller.config().source.polling_duration().as_secs_f64()
        );
        eprintln!("Press Ctrl+C to stop monitoring.");
    }

    let result = if options.push_mode {
        watch_push(&controller, &options, &event_logger, &interrupted)
    } else {
        watch_pull(&controller, &options, &event_logger, &interrupted)
    };

    controller.cleanup();

    let mut summary = result?;
    summary.dropped = controller.dropped_count();
    summary.interrupted = interrupted.load(Ordering::Relaxed);
    if !options.json_output {
        output::print_summary(&summary);
    }

    Ok(())
}

fn limit_reached(summary: &SessionSummary, options: &WatchOptions) -> bool {
    options.max_events.is_some_and(|max| summary.total() >= max)
}

/// Background setup failures surface as a stopped monitor with a last error
fn check_session(controller: &MonitorController) -> Result<()> {
    if !controller.is_running() {
        let reason = controller.last_error();
        if !reason.is_empty() {
            anyhow::bail!("Monitoring failed: {}", reason);
        }
    }
    Ok(())
}

fn watch_pull(
    controller: &MonitorController,
    options: &WatchOptions,
    event_logger: &EventLogger,
    interrupted: &AtomicBool,
) -> Result<SessionSummary> {
    let mut summary = SessionSummary::default();
    controller.start()?;

    'session: while !interrupted.load(Ordering::Relaxed) {
        controller.wait_for_events(WAIT_SLICE)?;

        // A wake-up may cover several enqueues, so drain until empty
        loop {
            let batch = controller.get_all_events(DRAIN_BATCH);
            if batch.is_empty() {
                break;
            }
            for record in &batch {
                output::print_event(record, options.json_output)?;
                let _ = event_logger.log_process_event(record);
                summary.record(record);
                if limit_reached(&summary, options) {
                    break 'session;
                }
            }
        }

        check_session(controller)?;
    }

    controller.stop();
    Ok(summary)
}

fn watch_push(
    controller: &MonitorController,
    options: &WatchOptions,
    event_logger: &EventLogger,
    interrupted: &AtomicBool,
) -> Result<SessionSummary> {
    let summary = Arc::new(Mutex::new(SessionSummary::default()));
    let done = Arc::new(AtomicBool::new(false));

    let callback: EventCallback = {
        let summary = Arc::clone(&summary);
        let done = Arc::clone(&done);
        let options = options.clone();
        let event_logger = event_logger.clone();
        Arc::new(move |record: &EventRecord, _user_data: Option<&UserData>| {
            let mut summary = summary.lock();
            if limit_reached(&summary, &options) {
                return Ok(());
            }
            output::print_event(record, options.json_output)?;
            let _ = event_logger.log_process_event(record);
            summary.record(record);
            if limit_reached(&summary, &options) {
                done.store(true, Ordering::SeqCst);
            }
            Ok(())
        })
    };

    controller.start_with_callback(Some(callback), None)?;

    while !interrupted.load(Ordering::Relaxed) && !done.load(Ordering::SeqCst) {
        std::thread::sleep(WAIT_SLICE);
        check_session(controller)?;
    }

    controller.stop();
    let summary = *summary.lock();
    Ok(summary)
}

fn run_stream(config_path: Option<PathBuf>, buffer: usize) -> Result<()> {
    let config = load_config(config_path.as_ref())?;
    let _ = logging::init_logger(false);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create async runtime")?;

    runtime.block_on(async move {
        let controller = Arc::new(MonitorController::with_system_source(config));
        let stream = ProcessEventStream::new(controller);
        let mut events = stream.listen(buffer)?;

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(map) => println!("{}", serde_json::Value::Object(map)),
                    None => break,
                },
                _ = &mut ctrl_c => break,
            }
        }

        stream.cancel().await;
        Ok::<(), anyhow::Error>(())
    })
}

fn run_config(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path.as_ref())?;
    print!("{}", config.to_toml()?);
    Ok(())
}
