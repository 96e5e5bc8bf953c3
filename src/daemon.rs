//! # Monitoring Daemon
//!
//! This module implements the poll driver: a loop that runs exactly one tick
//! at a time, and the caller-facing surface around it (`configure`,
//! `start`/`stop`, `on_log`, `status`).
//!
//! ## Tick
//!
//! Each tick samples every audio session, reduces them to "is anything else
//! playing" and "is the target playing", lets the arbitration engine decide,
//! and hands any resulting action to the player controller. Both state
//! objects (classifier hysteresis and arbitration state) are committed
//! together after observation succeeded, so a failed tick leaves them
//! untouched and a successful one is applied as a whole.
//!
//! Any error raised while observing is caught at the tick boundary, logged,
//! and the loop carries on with the next tick.
//!
//! ## Background runs
//!
//! `keepplaying daemon start` re-launches the binary detached. The running
//! monitor writes a PID file and watches for a stop file, which is how
//! `daemon stop` asks it to exit between two ticks.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use log::{debug, info, Level};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::arbiter::{Action, ArbitrationEngine, ArbitrationState, Decision, Note};
use crate::classifier::{competing_sessions, ClassifierState, PlaybackClassifier, TargetVerdict, VerdictReason};
use crate::config::{self, Hotkey, TargetConfig};
use crate::controller::PlayerControl;
use crate::error::MonitorError;
use crate::platform::process::{is_pid_alive, terminate_pid};
use crate::session::{select_window_title, AudioSampler, ProcessProbe, WindowTitles};

/// Longest uninterrupted sleep between ticks, so stop requests are noticed
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// How long `daemon stop` waits for a graceful exit before terminating
const STOP_GRACE: Duration = Duration::from_secs(5);

/// How long `daemon start` waits for the child to record its PID
pub const START_GRACE: Duration = Duration::from_secs(3);

/// The OS collaborators a monitor reads from and acts through
pub struct Backend {
    pub sampler: Box<dyn AudioSampler>,
    pub windows: Box<dyn WindowTitles>,
    pub probe: Box<dyn ProcessProbe>,
    pub controller: Box<dyn PlayerControl>,
}

/// One observable decision point, delivered to every `on_log` callback
#[derive(Debug, Clone)]
pub struct LogEvent {
    pub timestamp: DateTime<Local>,
    pub level: Level,
    pub message: String,
}

impl fmt::Display for LogEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.timestamp.format("%H:%M:%S"), self.message)
    }
}

/// Monitor status as seen by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorStatus {
    pub running: bool,
}

type LogSink = Box<dyn FnMut(&LogEvent) + Send>;

struct Shared {
    config: Mutex<TargetConfig>,
    running: AtomicBool,
    sinks: Mutex<Vec<LogSink>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    fn emit(&self, level: Level, message: String) {
        log::log!(level, "{message}");

        let event = LogEvent {
            timestamp: Local::now(),
            level,
            message,
        };

        // Dispatch unlocked; sinks registered meanwhile land behind the current ones
        let mut sinks = std::mem::take(&mut *lock(&self.sinks));
        for sink in sinks.iter_mut() {
            sink(&event);
        }
        let mut slot = lock(&self.sinks);
        sinks.append(&mut slot);
        *slot = sinks;
    }
}

/// Log level for a contained error: tick-fatal ones are warnings
fn error_level(error: &MonitorError) -> Level {
    if error.is_tick_fatal() {
        Level::Warn
    } else {
        Level::Debug
    }
}

/// Thread-safe control surface of a [`Monitor`].
///
/// Configuration changes take effect at the start of the next tick; a tick
/// already in flight finishes with the configuration it started with.
#[derive(Clone)]
pub struct MonitorHandle {
    shared: Arc<Shared>,
}

impl MonitorHandle {
    /// Replace the target, hotkey and poll interval.
    ///
    /// Hotkey entries are split on `+` and trimmed; every resulting token must
    /// be non-empty. On error the previous configuration stays in effect.
    pub fn configure<S: AsRef<str>>(
        &self,
        process_name: &str,
        hotkey: &[S],
        poll_interval_ms: u64,
    ) -> Result<(), MonitorError> {
        let hotkey = Hotkey::from_tokens(hotkey)?;

        let mut next = self.config();
        next.process_name = process_name.trim().to_string();
        next.hotkey = hotkey;
        next.poll_interval_ms = poll_interval_ms;

        self.set_config(next)
    }

    /// Replace the whole configuration
    pub fn set_config(&self, config: TargetConfig) -> Result<(), MonitorError> {
        if let Err(e) = config.validate() {
            self.shared.emit(Level::Warn, format!("configuration rejected: {e}"));
            return Err(e);
        }

        let message = format!(
            "configured: target {}, hotkey {}, every {}ms",
            config.process_name, config.hotkey, config.poll_interval_ms
        );
        *lock(&self.shared.config) = config;
        self.shared.emit(Level::Info, message);
        Ok(())
    }

    /// Snapshot of the current configuration
    pub fn config(&self) -> TargetConfig {
        lock(&self.shared.config).clone()
    }

    /// Mark the monitor as running. Idempotent.
    pub fn start(&self) {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            self.shared.emit(Level::Info, "monitoring already running".to_string());
        } else {
            self.shared.emit(Level::Info, "monitoring started".to_string());
        }
    }

    /// Ask the monitor to stop at the next tick boundary. Idempotent.
    pub fn stop(&self) {
        if self.shared.running.swap(false, Ordering::SeqCst) {
            self.shared.emit(Level::Info, "monitoring stopped".to_string());
        } else {
            self.shared.emit(Level::Info, "monitoring already stopped".to_string());
        }
    }

    pub fn status(&self) -> MonitorStatus {
        MonitorStatus {
            running: self.shared.running.load(Ordering::SeqCst),
        }
    }

    /// Register a log callback.
    ///
    /// Callbacks run synchronously inside the tick, in registration order.
    /// They may use the handle (`stop`, `configure`, `on_log`). Events raised
    /// from inside a callback go to the `log` facade only, and a callback
    /// registered there first sees the next event.
    pub fn on_log<F>(&self, callback: F)
    where
        F: FnMut(&LogEvent) + Send + 'static,
    {
        lock(&self.shared.sinks).push(Box::new(callback));
    }
}

/// What a single observation found, before anything is committed
#[derive(Debug, Clone)]
pub struct Observation {
    pub other_playing: bool,
    /// Processes producing competing audio
    pub competing: Vec<String>,
    pub window_title: Option<String>,
    pub verdict: TargetVerdict,
    classifier_next: ClassifierState,
}

/// Result of one call to [`Monitor::tick`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Still inside the hold period after a Play; nothing was read
    Held { remaining: Duration },
    /// Observation failed; no state changed
    Failed(MonitorError),
    /// The engine ran
    Decided(Decision),
}

/// The poll driver: owns the backends and both state objects
pub struct Monitor {
    backend: Backend,
    classifier: PlaybackClassifier,
    engine: ArbitrationEngine,
    shared: Arc<Shared>,
    hold_until: Option<Instant>,
    target_was_running: Option<bool>,
}

impl Monitor {
    /// Create a stopped monitor
    pub fn new(config: TargetConfig, backend: Backend) -> Result<Self, MonitorError> {
        Self::with_engine(config, backend, ArbitrationEngine::new())
    }

    /// Create a stopped monitor with a custom arbitration engine
    pub fn with_engine(config: TargetConfig, backend: Backend, engine: ArbitrationEngine) -> Result<Self, MonitorError> {
        config.validate()?;

        Ok(Self {
            backend,
            classifier: PlaybackClassifier::new(),
            engine,
            shared: Arc::new(Shared {
                config: Mutex::new(config),
                running: AtomicBool::new(false),
                sinks: Mutex::new(Vec::new()),
            }),
            hold_until: None,
            target_was_running: None,
        })
    }

    pub fn handle(&self) -> MonitorHandle {
        MonitorHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// See [`MonitorHandle::configure`]
    pub fn configure<S: AsRef<str>>(&self, process_name: &str, hotkey: &[S], poll_interval_ms: u64) -> Result<(), MonitorError> {
        self.handle().configure(process_name, hotkey, poll_interval_ms)
    }

    pub fn start(&self) {
        self.handle().start();
    }

    pub fn stop(&self) {
        self.handle().stop();
    }

    pub fn status(&self) -> MonitorStatus {
        self.handle().status()
    }

    /// See [`MonitorHandle::on_log`]
    pub fn on_log<F>(&self, callback: F)
    where
        F: FnMut(&LogEvent) + Send + 'static,
    {
        self.handle().on_log(callback);
    }

    pub fn engine_state(&self) -> &ArbitrationState {
        self.engine.state()
    }

    fn emit(&self, level: Level, message: String) {
        self.shared.emit(level, message);
    }

    /// Sample and classify without committing anything
    pub fn observe(&mut self, config: &TargetConfig) -> Result<Observation, MonitorError> {
        let sampled = self.backend.sampler.sample()?;
        for skipped in &sampled.skipped {
            self.emit(error_level(skipped), skipped.to_string());
        }

        let competing: Vec<String> = competing_sessions(&sampled.sessions, config)
            .map(|s| {
                self.emit(
                    Level::Debug,
                    format!("session detected: {} (peak {:.4})", s.process_name, s.peak_amplitude),
                );
                s.process_name.clone()
            })
            .collect();
        let other_playing = !competing.is_empty();

        let running = match self.backend.probe.is_running(&config.process_name) {
            Ok(running) => running,
            Err(e) => {
                self.emit(Level::Warn, format!("{e}; assuming {} is not running", config.process_name));
                false
            }
        };

        if !running {
            return Ok(Observation {
                other_playing,
                competing,
                window_title: None,
                verdict: TargetVerdict {
                    playing: false,
                    reason: VerdictReason::NotRunning,
                    peak: 0.0,
                },
                classifier_next: ClassifierState::default(),
            });
        }

        let window_title = match self.backend.windows.visible_windows() {
            Ok(windows) => select_window_title(&windows, &config.process_name),
            Err(e) => {
                self.emit(Level::Debug, e.to_string());
                None
            }
        };
        self.emit(
            Level::Debug,
            format!("{} window title: '{}'", config.process_name, window_title.as_deref().unwrap_or("")),
        );

        let (verdict, classifier_next) =
            self.classifier
                .evaluate(&sampled.sessions, window_title.as_deref(), config);

        Ok(Observation {
            other_playing,
            competing,
            window_title,
            verdict,
            classifier_next,
        })
    }

    /// Run one tick at `now`
    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        if let Some(until) = self.hold_until {
            if now < until {
                return TickOutcome::Held {
                    remaining: until - now,
                };
            }
            self.hold_until = None;
        }

        let config = self.handle().config();

        let observation = match self.observe(&config) {
            Ok(observation) => observation,
            Err(e) => {
                self.emit(error_level(&e), format!("tick skipped: {e}"));
                return TickOutcome::Failed(e);
            }
        };

        self.log_verdict(&config, &observation.verdict);

        let (decision, next) = self.engine.decide(observation.other_playing, observation.verdict.playing, now);
        self.classifier.commit(observation.classifier_next);
        self.engine.commit(next);
        self.emit(
            Level::Debug,
            format!(
                "other playing: {}, target playing: {}, phase: {:?}",
                observation.other_playing,
                observation.verdict.playing,
                self.engine.phase(now)
            ),
        );

        if decision.backoff_ended {
            self.emit(Level::Info, "back-off over, start attempts re-enabled".to_string());
        }
        let level = if decision.action.is_some() || matches!(decision.note, Note::BackoffEntered { .. }) {
            Level::Info
        } else {
            Level::Debug
        };
        let message = match (decision.action, observation.competing.first()) {
            (Some(Action::Pause), Some(process)) => format!("{} ({process})", decision.note),
            _ => decision.note.to_string(),
        };
        self.emit(level, message);

        if let Some(action) = decision.action {
            self.emit(
                Level::Info,
                format!("sending {} to {} ({action})", config.hotkey, config.process_name),
            );
            if let Err(e) = self.backend.controller.toggle(&config.hotkey, config.settle_delay()) {
                self.emit(Level::Warn, e.to_string());
            }
        }

        if let Some(hold) = decision.hold {
            self.hold_until = Some(now + hold);
        }

        TickOutcome::Decided(decision)
    }

    fn log_verdict(&mut self, config: &TargetConfig, verdict: &TargetVerdict) {
        let running = verdict.reason != VerdictReason::NotRunning;
        let changed = self.target_was_running != Some(running);
        self.target_was_running = Some(running);

        if !running {
            let level = if changed { Level::Info } else { Level::Debug };
            self.emit(level, format!("{} process not running", config.process_name));
            return;
        }

        self.emit(
            Level::Debug,
            format!(
                "{} peak {:.6}: {} ({})",
                config.process_name,
                verdict.peak,
                if verdict.playing { "playing" } else { "paused" },
                verdict.reason
            ),
        );
    }

    /// Tick until stopped.
    ///
    /// Marks the monitor as running first. Returns once [`Monitor::stop`] (or a
    /// handle's `stop`) was called; a tick in flight always completes.
    pub fn run(&mut self) {
        self.run_until(|| false);
    }

    /// Tick until stopped or until `stop_requested` returns true, checked
    /// between ticks
    pub fn run_until<F: FnMut() -> bool>(&mut self, mut stop_requested: F) {
        self.start();

        while self.status().running {
            if stop_requested() {
                self.stop();
                break;
            }

            self.tick(Instant::now());

            let deadline = Instant::now() + self.handle().config().poll_interval();
            loop {
                let now = Instant::now();
                if now >= deadline || !self.status().running {
                    break;
                }
                if stop_requested() {
                    self.stop();
                    break;
                }
                std::thread::sleep(SLEEP_SLICE.min(deadline - now));
            }
        }

        debug!("Monitor loop exited");
    }

    /// Run as the registered monitor process: claim the PID file, tick until
    /// a stop file appears, clean up.
    pub fn run_registered(&mut self, files: &DaemonFiles) -> Result<()> {
        if files.is_running()? {
            bail!("Another monitor is already running");
        }

        files.claim()?;
        info!("Monitor started with PID {}", std::process::id());

        self.run_until(|| files.stop_requested());

        files.release();
        Ok(())
    }
}

/// PID and stop-request files of a background monitor
#[derive(Debug, Clone)]
pub struct DaemonFiles {
    pub pid_file: PathBuf,
    pub stop_file: PathBuf,
}

impl DaemonFiles {
    /// Files in the platform data directory
    pub fn locate() -> Result<Self> {
        Ok(Self::in_dir(&config::get_data_dir()?))
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self {
            pid_file: dir.join("keepplaying.pid"),
            stop_file: dir.join("keepplaying.stop"),
        }
    }

    /// PID recorded in the PID file, if any
    pub fn recorded_pid(&self) -> Result<Option<u32>> {
        if !self.pid_file.exists() {
            return Ok(None);
        }

        let pid_str = fs::read_to_string(&self.pid_file)
            .with_context(|| format!("Failed to read {}", self.pid_file.display()))?;
        let pid: u32 = pid_str.trim().parse().context("Invalid PID in daemon file")?;
        Ok(Some(pid))
    }

    /// Whether the recorded monitor process is alive.
    ///
    /// A stale PID file is removed.
    pub fn is_running(&self) -> Result<bool> {
        match self.recorded_pid()? {
            Some(pid) if pid == std::process::id() => Ok(true),
            Some(pid) if is_pid_alive(pid) => Ok(true),
            Some(pid) => {
                debug!("Removing stale PID file for {pid}");
                let _ = fs::remove_file(&self.pid_file);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    /// Record this process as the monitor and drop any leftover stop request
    pub fn claim(&self) -> Result<()> {
        if let Some(parent) = self.pid_file.parent() {
            fs::create_dir_all(parent)?;
        }
        let _ = fs::remove_file(&self.stop_file);
        fs::write(&self.pid_file, std::process::id().to_string())
            .with_context(|| format!("Failed to write {}", self.pid_file.display()))?;
        Ok(())
    }

    pub fn release(&self) {
        let _ = fs::remove_file(&self.pid_file);
        let _ = fs::remove_file(&self.stop_file);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_file.exists()
    }

    /// Poll until a monitor has recorded itself, or `timeout` passes
    pub fn wait_until_running(&self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_running()? {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            std::thread::sleep(SLEEP_SLICE);
        }
    }

    /// Ask the running monitor to exit at its next tick boundary.
    ///
    /// Waits up to a few seconds, then terminates the process. Returns
    /// `false` when no monitor was running.
    pub fn request_stop(&self) -> Result<bool> {
        let Some(pid) = self.recorded_pid()? else {
            return Ok(false);
        };
        if !self.is_running()? {
            return Ok(false);
        }

        fs::write(&self.stop_file, pid.to_string())
            .with_context(|| format!("Failed to write {}", self.stop_file.display()))?;

        let deadline = Instant::now() + STOP_GRACE;
        while Instant::now() < deadline {
            if !is_pid_alive(pid) {
                self.release();
                info!("Monitor stopped (PID: {pid})");
                return Ok(true);
            }
            std::thread::sleep(SLEEP_SLICE);
        }

        if !terminate_pid(pid) {
            bail!("Monitor (PID {pid}) did not stop and could not be terminated");
        }
        self.release();
        info!("Monitor terminated (PID: {pid})");
        Ok(true)
    }
}

/// Re-launch this executable detached with `args`; returns the child PID
pub fn spawn_detached(args: &[String]) -> Result<u32> {
    let exe = std::env::current_exe().context("Failed to locate own executable")?;

    let mut command = Command::new(exe);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    #[cfg(target_os = "windows")]
    {
        use std::os::windows::process::CommandExt;
        const DETACHED_PROCESS: u32 = 0x0000_0008;
        const CREATE_NO_WINDOW: u32 = 0x0800_0000;
        command.creation_flags(DETACHED_PROCESS | CREATE_NO_WINDOW);
    }

    let child = command.spawn().context("Failed to start background monitor")?;
    Ok(child.id())
}
