//! # fortis_collector_cli
//!
//! Part of the fortis_collector crate family.
//!
//! This is the command line application that runs an OAxFORTIS acquisition.
//!
//! ## Install
//!
//! Use `cargo install --path ./fortis_collector_cli`
//!
//! ## Use
//!
//! ```bash
//! fortis_collector_cli <modifier> [--config <path>]
//! ```
//!
//! The modifier is a run identifier of your choice (ex: `Oct0622` or `test1`) used to name
//! the three event logs. Without `--config` the flight defaults are used. To write a
//! template configuration to edit:
//!
//! ```bash
//! fortis_collector_cli new --path config.yml
//! ```
//!
//! A line per spectral order shows the latest count rate and totals. Ctrl+C stops the
//! acquisition; a summary of the run is printed on exit. Detailed diagnostics (unknown
//! senders, bad packets) go to `fortis_collector.log` in the working directory.
use clap::{Arg, Command};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::Duration;

use libfortis_collector::channel::Channel;
use libfortis_collector::config::Config;
use libfortis_collector::pipeline::Pipeline;
use libfortis_collector::snapshot::ChannelSnapshot;

const DIAGNOSTIC_LOG_PATH: &str = "./fortis_collector.log";

/// Returns the process exit code
fn make_template_config(path: &Path) -> i32 {
    match Config::default().write_config_file(path) {
        Ok(()) => {
            log::info!("Done.");
            0
        }
        Err(e) => {
            log::error!("Could not write template config: {e}");
            1
        }
    }
}

/// Send library diagnostics to a file so they don't fight with the progress display
fn setup_diagnostic_log() -> spdlog::Result<()> {
    let file_sink = Arc::new(
        spdlog::sink::FileSink::builder()
            .path(PathBuf::from(DIAGNOSTIC_LOG_PATH))
            .formatter(Box::new(spdlog::formatter::PatternFormatter::new(
                spdlog::formatter::pattern!(
                    "[{date_short} {time_short}] - [thread: {tid}] - [{^{level}}] - {payload}{eol}"
                ),
            )))
            .truncate(false)
            .build()?,
    );
    let logger = Arc::new(
        spdlog::Logger::builder()
            .flush_level_filter(spdlog::LevelFilter::All)
            .sink(file_sink)
            .build()?,
    );
    spdlog::set_default_logger(logger);
    Ok(())
}

/// Raise the shutdown flag on Ctrl+C
fn watch_for_ctrl_c(shutdown: Arc<AtomicBool>) {
    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                log::error!("Could not create signal handler, Ctrl+C will kill the process: {e}");
                return;
            }
        };
        match runtime.block_on(tokio::signal::ctrl_c()) {
            Ok(()) => {
                log::info!("Ctrl+C received, stopping...");
                shutdown.store(true, Ordering::Relaxed);
            }
            Err(e) => log::error!("Failed waiting for Ctrl+C: {e}"),
        }
    });
}

fn channel_message(snapshot: &ChannelSnapshot) -> String {
    let rate = match snapshot.rate {
        Some(rate) => format!("{rate:.0} counts/s"),
        None => String::from("-- counts/s"),
    };
    let peak = snapshot.histogram.iter().copied().max().unwrap_or(0);
    format!(
        "Inst Rate: {} | packets: {} | events: {} | peak bin: {}",
        rate, snapshot.packets_total, snapshot.events_written_total, peak
    )
}

fn main() {
    // Create a cli
    let matches = Command::new("fortis_collector_cli")
        .about("Collect OAxFORTIS TDC photon events into per-order logs")
        .arg_required_else_help(true)
        .subcommand_negates_reqs(true)
        .subcommand(
            Command::new("new")
                .about("Make a template configuration yaml file")
                .arg(
                    Arg::new("path")
                        .short('p')
                        .long("path")
                        .required(true)
                        .help("Path to the file"),
                ),
        )
        .arg(
            Arg::new("modifier")
                .required(true)
                .help("Unique filename modifier for this run (ex: Oct0622)"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .help("Path to a configuration yaml file; flight defaults if omitted"),
        )
        .get_matches();

    // Initialize feedback
    let logger = simplelog::TermLogger::new(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let pb_manager = MultiProgress::new();

    if let Err(e) = LogWrapper::new(pb_manager.clone(), logger).try_init() {
        eprintln!("Could not create logging/progress: {e}");
        std::process::exit(1);
    }

    if let Err(e) = setup_diagnostic_log() {
        log::warn!("Could not open {DIAGNOSTIC_LOG_PATH}, diagnostics will be lost: {e}");
    }

    if let Some(("new", sub_matches)) = matches.subcommand() {
        let Some(path) = sub_matches.get_one::<String>("path") else {
            log::error!("A path for the template is required");
            std::process::exit(1);
        };
        log::info!("Making a template config at {}...", path);
        std::process::exit(make_template_config(Path::new(path)));
    }

    // Parse the cli
    let Some(modifier) = matches.get_one::<String>("modifier") else {
        log::error!("A run modifier is required");
        std::process::exit(1);
    };

    // Load our config
    let config = match matches.get_one::<String>("config") {
        Some(config_path) => {
            log::info!("Loading config from {}...", config_path);
            match Config::read_config_file(Path::new(config_path)) {
                Ok(c) => c,
                Err(e) => {
                    log::error!("{e}");
                    std::process::exit(1);
                }
            }
        }
        None => {
            log::info!("No config given, using flight defaults.");
            Config::default()
        }
    };
    log::info!("Config successfully loaded.");
    log::info!("Listening on: {}", config.bind_address);
    log::info!("Output Path: {}", config.output_path.to_string_lossy());
    log::info!("Run Modifier: {}", modifier);
    log::info!("Delimiter: {:?}", config.delimiter);
    for channel in Channel::ALL {
        log::info!(
            "{}: {}",
            channel,
            config.get_channel_config(channel).address
        );
    }

    let mut pipeline = match Pipeline::new(&config, modifier) {
        Ok(p) => p,
        Err(e) => {
            log::error!("{e}");
            log::error!("Are the TDC boards on and the network adapter configured?");
            std::process::exit(1);
        }
    };
    let snapshots = pipeline.subscribe();

    let shutdown = Arc::new(AtomicBool::new(false));
    watch_for_ctrl_c(shutdown.clone());

    // Setup a status line per order
    let style = ProgressStyle::with_template("{spinner} {prefix:>16}: {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    let bars: Vec<ProgressBar> = Channel::ALL
        .iter()
        .map(|channel| {
            let pb = pb_manager.add(ProgressBar::new_spinner());
            pb.set_style(style.clone());
            pb.set_prefix(channel.to_string());
            pb.set_message("waiting for packets");
            pb
        })
        .collect();

    log::info!("Server is listening... wait for the first packet. Ctrl+C to stop.");
    // Spawn the task!
    let flag = shutdown.clone();
    let handle = std::thread::spawn(move || pipeline.run(&flag));

    let mut exit_code = 0;
    loop {
        match snapshots.recv_timeout(Duration::from_secs(1)) {
            Ok(snapshot) => {
                for channel in snapshot.channels.iter() {
                    let pb = &bars[channel.channel.index()];
                    pb.set_message(channel_message(channel));
                    pb.tick();
                }
            }
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => std::thread::sleep(Duration::from_millis(50)),
        }

        if handle.is_finished() {
            match handle.join() {
                Ok(result) => match result {
                    Ok(summary) => {
                        for line in summary.to_string().lines() {
                            log::info!("{line}");
                        }
                    }
                    Err(e) => {
                        log::error!("Acquisition failed with error: {e}");
                        exit_code = 1;
                    }
                },
                Err(_) => {
                    log::error!("Failed to join acquisition task!");
                    exit_code = 1;
                }
            }
            break;
        }
    }

    for pb in bars.iter() {
        pb.finish();
    }

    log::info!("Done.");
    std::process::exit(exit_code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_config_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        assert_eq!(make_template_config(&path), 0);
        assert_eq!(Config::read_config_file(&path).unwrap(), Config::default());

        let unwritable = dir.path().join("missing").join("config.yml");
        assert_eq!(make_template_config(&unwritable), 1);
        assert!(!unwritable.exists());
    }
}
