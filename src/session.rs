//! # Audio Sessions and OS Collaborators
//!
//! The data the arbiter reasons about, and the three OS-facing contracts it
//! reads from each tick:
//!
//! - [`AudioSampler`] - live output sessions with their peak meters
//! - [`ProcessProbe`] - whether a process with a given name exists
//! - [`WindowTitles`] - visible top-level windows and their owning processes
//!
//! Native implementations live in [`crate::platform`]; tests script their own.

use crate::error::MonitorError;

/// One audio output session, sampled fresh on every poll
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSession {
    /// Executable name of the process owning the session
    pub process_name: String,
    /// Instantaneous peak level, normalized to `[0, 1]`
    pub peak_amplitude: f32,
}

impl AudioSession {
    /// Create a session, clamping the peak into `[0, 1]`.
    ///
    /// NaN readings are treated as silence.
    pub fn new(process_name: impl Into<String>, peak_amplitude: f32) -> Self {
        let peak_amplitude = if peak_amplitude.is_nan() {
            0.0
        } else {
            peak_amplitude.clamp(0.0, 1.0)
        };

        Self {
            process_name: process_name.into(),
            peak_amplitude,
        }
    }

    /// Whether this session belongs to `process_name` (case-insensitive)
    pub fn belongs_to(&self, process_name: &str) -> bool {
        same_process(&self.process_name, process_name)
    }
}

/// Result of one sampler pass: the sessions that could be read, plus the
/// per-session failures that were skipped on the way.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sampled {
    pub sessions: Vec<AudioSession>,
    pub skipped: Vec<MonitorError>,
}

impl Sampled {
    pub fn new(sessions: Vec<AudioSession>) -> Self {
        Self {
            sessions,
            skipped: Vec::new(),
        }
    }
}

/// Queries the OS audio mixer for all active output sessions.
///
/// Fails with [`MonitorError::SamplerUnavailable`] only when the mixer itself
/// cannot be reached. A session that cannot be read (for example because its
/// process exited between enumeration and query) is skipped and reported in
/// [`Sampled::skipped`] instead of failing the whole call.
pub trait AudioSampler {
    fn sample(&mut self) -> Result<Sampled, MonitorError>;
}

/// Answers whether a process is currently running
pub trait ProcessProbe {
    fn is_running(&mut self, process_name: &str) -> Result<bool, MonitorError>;
}

/// A visible top-level window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowInfo {
    pub process_name: String,
    pub title: String,
}

/// Enumerates visible top-level windows
pub trait WindowTitles {
    fn visible_windows(&mut self) -> Result<Vec<WindowInfo>, MonitorError>;
}

/// Case-insensitive process name comparison
pub fn same_process(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

/// Pick the window title of `process_name` out of an enumeration.
///
/// Empty titles are ignored; when the process owns several visible windows,
/// the last one enumerated wins.
pub fn select_window_title(windows: &[WindowInfo], process_name: &str) -> Option<String> {
    windows
        .iter()
        .filter(|w| same_process(&w.process_name, process_name))
        .filter(|w| !w.title.trim().is_empty())
        .last()
        .map(|w| w.title.clone())
}

/// Highest peak among the sessions owned by `process_name`.
///
/// `None` when the process has no session at all.
pub fn target_peak(sessions: &[AudioSession], process_name: &str) -> Option<f32> {
    sessions
        .iter()
        .filter(|s| s.belongs_to(process_name))
        .map(|s| s.peak_amplitude)
        .fold(None, |max, peak| Some(max.map_or(peak, |m: f32| m.max(peak))))
}
