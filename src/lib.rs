//! Keeps a background music player playing, and out of the way.
//!
//! keepplaying polls every audio session of the system. While some other
//! program is producing audio it pauses the target player; once everything
//! else is quiet again it resumes it. The player is driven only through its
//! global play/pause hotkey, so its real state is inferred from its peak meter
//! and its window title.
//!
//! Core modules:
//! - [`session`] - Audio session snapshots and the OS collaborator traits
//! - [`classifier`] - Is the target playing? Is anything else playing?
//! - [`arbiter`] - Arbitration state machine (cooldown, retries, back-off)
//! - [`controller`] - Hotkey chord synthesis
//! - [`daemon`] - Poll driver, log events and background runs
//!
//! ### Supporting Modules
//!
//! - [`config`] - Target configuration and data directory management
//! - [`error`] - Error values contained at the tick boundary
//! - [`platform`] - Native sampler, window and process backends
//! - [`cli`] - Command-line interface definitions with clap integration
//! - [`completion`] - Shell completion generation
//!
//! ## Quick Start Example
//!
//! ```no_run
//! use keepplaying::config::TargetConfig;
//! use keepplaying::daemon::Monitor;
//! use keepplaying::platform;
//!
//! let config = TargetConfig::for_process("foobar2000.exe");
//! let mut monitor = Monitor::new(config, platform::native_backend())?;
//! monitor.on_log(|event| println!("{event}"));
//!
//! let handle = monitor.handle();
//! // From any thread: handle.configure(...), handle.stop()
//! # let _ = handle;
//! monitor.run(); // Runs until stopped
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Arbitration Rules
//!
//! - Other audio plays and the target plays: pause it, at most once per 5s
//! - Nothing plays: start the target, then hold the next poll for 2s
//! - Three start attempts without success trigger a 15s back-off
//! - Every key press is fire-and-forget; the next poll tells whether it worked
//!
//! ```
//! use keepplaying::arbiter::{Action, ArbitrationEngine};
//! use std::time::Instant;
//!
//! let mut engine = ArbitrationEngine::new();
//! let decision = engine.tick(true, true, Instant::now());
//! assert_eq!(decision.action, Some(Action::Pause));
//! ```

pub mod arbiter;
pub mod classifier;
pub mod cli;
pub mod completion;
pub mod config;
pub mod controller;
pub mod daemon;
pub mod error;
pub mod platform;
pub mod session;
