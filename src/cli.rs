//! # Command-Line Interface Module
//!
//! This module defines the command-line interface for keepplaying using Clap
//! derive macros.
//!
//! ## Commands
//!
//! - `run`: Monitor audio in the foreground until interrupted or stopped
//! - `sessions`: Print one snapshot of every audio session and its peak
//! - `check`: Print how the target player is classified right now
//! - `toggle`: Send the play/pause hotkey once
//! - `config`: Show, locate, create or edit the config file
//! - `daemon`: Start, stop or query a background monitor
//! - `completion`: Generate shell completion scripts
//!
//! ## Examples
//!
//! ```bash
//! keepplaying run --process foobar2000.exe --hotkey ctrl+shift+space
//! keepplaying config set poll_interval_ms 1500
//! keepplaying daemon start
//! ```

use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};

use crate::config::ConfigOverrides;

/// Shell types supported for completion generation
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    /// Bash shell
    Bash,
    /// Zsh shell
    Zsh,
    /// Fish shell
    Fish,
    /// PowerShell
    PowerShell,
    /// Elvish shell
    Elvish,
}

/// Main application arguments structure.
///
/// All functionality is reached through a subcommand.
#[derive(Parser)]
#[command(name = "keepplaying")]
#[command(about = "keepplaying: pause your music player while other audio plays, resume it after")]
#[command(version)]
pub struct Args {
    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Per-invocation overrides of the config file.
///
/// Each flag can also be set through its environment variable.
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct TargetArgs {
    /// Executable name of the player to keep playing (e.g. foobar2000.exe)
    #[arg(long, env = "KEEPPLAYING_PROCESS")]
    pub process: Option<String>,

    /// Play/pause hotkey of the player, keys joined by '+' (e.g. ctrl+alt+p)
    #[arg(long, env = "KEEPPLAYING_HOTKEY")]
    pub hotkey: Option<String>,

    /// Milliseconds between two polls
    #[arg(long, env = "KEEPPLAYING_INTERVAL_MS")]
    pub interval_ms: Option<u64>,
}

impl TargetArgs {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            process_name: self.process.clone(),
            hotkey: self.hotkey.clone(),
            poll_interval_ms: self.interval_ms,
        }
    }

    /// The same flags again, for re-launching the binary
    pub fn to_cli_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(process) = &self.process {
            args.push(format!("--process={process}"));
        }
        if let Some(hotkey) = &self.hotkey {
            args.push(format!("--hotkey={hotkey}"));
        }
        if let Some(interval) = self.interval_ms {
            args.push(format!("--interval-ms={interval}"));
        }
        args
    }
}

/// Enumeration of all available subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Monitor audio and arbitrate playback in the foreground
    ///
    /// Polls every audio session, pauses the player when other audio plays
    /// and resumes it once everything else is quiet. Runs until Ctrl+C or
    /// until `keepplaying daemon stop` is issued.
    Run {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Print every active audio session with its current peak
    Sessions,

    /// Print how the target player is classified right now
    ///
    /// Shows the window title, peak and verdict without pressing any key.
    Check {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Send the play/pause hotkey to the player once
    Toggle {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Inspect or edit the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Manage a background monitor
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },

    /// Generate shell completions
    ///
    /// Usage: keepplaying completion bash > ~/.local/share/bash-completion/completions/keepplaying
    Completion {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Config file actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as JSON
    Show,

    /// Print the config file location
    Path,

    /// Write a config file with default values
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Set one field and save
    ///
    /// Keys: process_name, hotkey, poll_interval_ms, settle_delay_ms,
    /// idle_title, title_match, paused_markers, excluded_processes.
    /// List values are comma-separated.
    Set {
        /// Field to change
        key: String,
        /// New value
        value: String,
    },
}

/// Daemon management actions
#[derive(Subcommand, Debug)]
pub enum DaemonAction {
    /// Start a monitor in the background
    Start {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Stop the background monitor
    ///
    /// The monitor exits at its next tick boundary; it is terminated if it
    /// does not exit within a few seconds.
    Stop,

    /// Check whether a background monitor is running
    Status,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_run_flags_parse() {
        let args = Args::try_parse_from([
            "keepplaying",
            "run",
            "--process",
            "foobar2000.exe",
            "--hotkey",
            "ctrl+shift+space",
            "--interval-ms",
            "1500",
        ])
        .expect("valid arguments");

        match args.command {
            Command::Run { target } => {
                let overrides = target.overrides();
                assert_eq!(overrides.process_name.as_deref(), Some("foobar2000.exe"));
                assert_eq!(overrides.hotkey.as_deref(), Some("ctrl+shift+space"));
                assert_eq!(overrides.poll_interval_ms, Some(1500));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_target_args_round_trip_to_cli() {
        let target = TargetArgs {
            process: Some("player.exe".to_string()),
            hotkey: None,
            interval_ms: Some(500),
        };

        assert_eq!(target.to_cli_args(), vec!["--process=player.exe", "--interval-ms=500"]);
    }

    #[test]
    fn test_config_set_parses() {
        let args = Args::try_parse_from(["keepplaying", "config", "set", "hotkey", "ctrl+alt+p"])
            .expect("valid arguments");

        match args.command {
            Command::Config {
                action: ConfigAction::Set { key, value },
            } => {
                assert_eq!(key, "hotkey");
                assert_eq!(value, "ctrl+alt+p");
            }
            _ => panic!("expected config set"),
        }
    }
}
