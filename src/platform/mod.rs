//! # Native Backends
//!
//! Builds the OS collaborators the monitor reads from and acts through:
//!
//! - **Windows**: WASAPI per-session peak meters, `EnumWindows` titles
//! - **elsewhere**: no per-process peak meters are available, so the sampler
//!   reports [`MonitorError::SamplerUnavailable`] every tick and no window
//!   titles are listed
//!
//! Process lookup (`sysinfo`) and key injection (`enigo`) work everywhere.

pub mod process;
#[cfg(target_os = "windows")]
pub mod win32;

use crate::controller::KeyboardController;
use crate::daemon::Backend;
#[cfg(not(target_os = "windows"))]
use crate::error::MonitorError;
#[cfg(not(target_os = "windows"))]
use crate::session::{AudioSampler, Sampled, WindowInfo, WindowTitles};

use self::process::SysinfoProbe;

/// Sampler for platforms without per-process meters
#[cfg(not(target_os = "windows"))]
#[derive(Debug, Default)]
pub struct UnsupportedSampler;

#[cfg(not(target_os = "windows"))]
impl AudioSampler for UnsupportedSampler {
    fn sample(&mut self) -> Result<Sampled, MonitorError> {
        Err(MonitorError::SamplerUnavailable(format!(
            "per-process audio meters are not supported on {}",
            std::env::consts::OS
        )))
    }
}

/// Window source for platforms without a window enumeration backend
#[cfg(not(target_os = "windows"))]
#[derive(Debug, Default)]
pub struct NoWindows;

#[cfg(not(target_os = "windows"))]
impl WindowTitles for NoWindows {
    fn visible_windows(&mut self) -> Result<Vec<WindowInfo>, MonitorError> {
        Ok(Vec::new())
    }
}

/// The backends for the platform this binary was built for
#[cfg(target_os = "windows")]
pub fn native_backend() -> Backend {
    Backend {
        sampler: Box::new(self::win32::WasapiSampler::new()),
        windows: Box::new(self::win32::Win32Windows::new()),
        probe: Box::new(SysinfoProbe::new()),
        controller: Box::new(KeyboardController::new()),
    }
}

/// The backends for the platform this binary was built for
#[cfg(not(target_os = "windows"))]
pub fn native_backend() -> Backend {
    Backend {
        sampler: Box::new(UnsupportedSampler),
        windows: Box::new(NoWindows),
        probe: Box::new(SysinfoProbe::new()),
        controller: Box::new(KeyboardController::new()),
    }
}
