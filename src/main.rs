use anyhow::{Context, Result};
use chrono::Local;
use clap::{CommandFactory, Parser};
use log::{debug, info};
use std::io::Write;
use std::time::Duration;

use keepplaying::cli::{self, ConfigAction, DaemonAction, TargetArgs};
use keepplaying::completion;
use keepplaying::config::{self, TargetConfig};
use keepplaying::controller::{KeyboardController, PlayerControl};
use keepplaying::daemon::{self, DaemonFiles, Monitor};
use keepplaying::platform;

/// Config file merged with the flags and environment of this invocation
fn effective_config(target: &TargetArgs) -> Result<TargetConfig> {
    let path = config::get_config_path()?;
    let base = config::load_config(&path)?;
    let config = target.overrides().apply(&base)?;
    debug!("Effective config: {config:?}");
    Ok(config)
}

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(buf, "[{}] {}", Local::now().format("%H:%M:%S"), record.args())
        })
        .init();
}

/// Main entry point for keepplaying.
///
/// Initializes logging, parses command-line arguments, and routes commands.
///
/// # Logging
///
/// Logging is controlled via `RUST_LOG` and defaults to `info`:
/// - `RUST_LOG=debug keepplaying run` - Show every tick's peaks and verdicts
fn main() -> Result<()> {
    init_logging();

    let args = cli::Args::parse();

    match args.command {
        cli::Command::Run { target } => {
            let config = effective_config(&target)?;
            info!(
                "Keeping {} playing (hotkey {}, every {}ms)",
                config.process_name, config.hotkey, config.poll_interval_ms
            );

            let files = DaemonFiles::locate()?;
            let mut monitor = Monitor::new(config, platform::native_backend())?;
            monitor.run_registered(&files)?;
        }
        cli::Command::Sessions => {
            let mut backend = platform::native_backend();
            let sampled = backend.sampler.sample()?;

            for skipped in &sampled.skipped {
                eprintln!("{skipped}");
            }
            if sampled.sessions.is_empty() {
                println!("No active audio sessions");
            }
            for session in &sampled.sessions {
                println!("{:<32} {:.4}", session.process_name, session.peak_amplitude);
            }
        }
        cli::Command::Check { target } => {
            let config = effective_config(&target)?;
            let mut monitor = Monitor::new(config.clone(), platform::native_backend())?;
            let observation = monitor.observe(&config)?;

            println!("Target:        {}", config.process_name);
            println!("Window title:  {}", observation.window_title.as_deref().unwrap_or("-"));
            println!("Peak:          {:.6}", observation.verdict.peak);
            println!(
                "Verdict:       {} ({})",
                if observation.verdict.playing { "playing" } else { "paused" },
                observation.verdict.reason
            );
            if observation.competing.is_empty() {
                println!("Other audio:   none");
            } else {
                println!("Other audio:   {}", observation.competing.join(", "));
            }
        }
        cli::Command::Toggle { target } => {
            let config = effective_config(&target)?;
            KeyboardController::new().toggle(&config.hotkey, Duration::ZERO)?;
            println!("Sent {} to {}", config.hotkey, config.process_name);
        }
        cli::Command::Config { action } => {
            let path = config::get_config_path()?;

            match action {
                ConfigAction::Show => {
                    let current = config::load_config(&path)?;
                    println!("{}", serde_json::to_string_pretty(&current)?);
                }
                ConfigAction::Path => {
                    println!("{}", path.display());
                }
                ConfigAction::Init { force } => {
                    if path.exists() && !force {
                        anyhow::bail!(
                            "Config file already exists at {} (use --force to overwrite)",
                            path.display()
                        );
                    }
                    config::save_config(&TargetConfig::default(), &path)?;
                    println!("Wrote default config to {}", path.display());
                }
                ConfigAction::Set { key, value } => {
                    let mut current = config::load_config(&path)?;
                    current
                        .set_field(&key, &value)
                        .with_context(|| format!("Cannot set {key}"))?;
                    config::save_config(&current, &path)?;
                    println!("{key} updated");
                }
            }
        }
        cli::Command::Daemon { action } => {
            let files = DaemonFiles::locate()?;

            match action {
                DaemonAction::Start { target } => {
                    if files.is_running()? {
                        eprintln!("Monitor is already running");
                        return Ok(());
                    }

                    // Fail here rather than in the detached child
                    effective_config(&target)?;

                    let mut run_args = vec!["run".to_string()];
                    run_args.extend(target.to_cli_args());
                    let pid = daemon::spawn_detached(&run_args)?;
                    println!("Starting background monitor...");

                    if files.wait_until_running(daemon::START_GRACE)? {
                        println!("Monitor started (PID: {pid})");
                    } else {
                        eprintln!("Failed to start monitor");
                    }
                }
                DaemonAction::Stop => {
                    if files.request_stop()? {
                        println!("Monitor stopped");
                    } else {
                        println!("Monitor is not running");
                    }
                }
                DaemonAction::Status => {
                    if files.is_running()? {
                        println!("Monitor is running");
                    } else {
                        println!("Monitor is not running");
                    }
                }
            }
        }
        cli::Command::Completion { shell } => {
            let mut cmd = cli::Args::command();
            completion::generate_completions(completion::shell_to_completion_shell(&shell), &mut cmd);
        }
    }

    Ok(())
}

