//! WASAPI session meters and Win32 window enumeration.

use windows::core::{Interface, BOOL};
use windows::Win32::Foundation::{HWND, LPARAM};
use windows::Win32::Media::Audio::Endpoints::IAudioMeterInformation;
use windows::Win32::Media::Audio::{
    eConsole, eRender, AudioSessionStateExpired, IAudioSessionControl, IAudioSessionControl2,
    IAudioSessionEnumerator, IAudioSessionManager2, IMMDeviceEnumerator, MMDeviceEnumerator,
};
use windows::Win32::System::Com::{CoCreateInstance, CoInitializeEx, CoUninitialize, CLSCTX_ALL, COINIT_MULTITHREADED};
use windows::Win32::UI::WindowsAndMessaging::{EnumWindows, GetWindowTextW, GetWindowThreadProcessId, IsWindowVisible};

use super::process::SysinfoProbe;
use crate::error::MonitorError;
use crate::session::{AudioSampler, AudioSession, Sampled, WindowInfo, WindowTitles};

/// Longest window title read, in UTF-16 units
const MAX_TITLE_LEN: usize = 512;

/// Initialises COM for the current thread for as long as it lives.
///
/// Ticks may run on any thread, so every COM user takes its own guard.
struct ComGuard {
    owned: bool,
}

impl ComGuard {
    fn init() -> Self {
        // S_OK and S_FALSE both need a matching CoUninitialize; RPC_E_CHANGED_MODE
        // means COM is already usable in another apartment mode.
        let hr = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
        Self { owned: hr.is_ok() }
    }
}

impl Drop for ComGuard {
    fn drop(&mut self) {
        if self.owned {
            unsafe { CoUninitialize() };
        }
    }
}

/// [`AudioSampler`] over the default render endpoint's session manager
#[derive(Default)]
pub struct WasapiSampler {
    processes: SysinfoProbe,
}

impl WasapiSampler {
    pub fn new() -> Self {
        Self::default()
    }

    unsafe fn session_enumerator() -> windows::core::Result<IAudioSessionEnumerator> {
        let enumerator: IMMDeviceEnumerator = CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)?;
        let device = enumerator.GetDefaultAudioEndpoint(eRender, eConsole)?;
        let manager: IAudioSessionManager2 = device.Activate(CLSCTX_ALL, None)?;
        manager.GetSessionEnumerator()
    }

    unsafe fn read_session(&self, sessions: &IAudioSessionEnumerator, index: i32) -> Result<Option<AudioSession>, String> {
        let control: IAudioSessionControl = sessions.GetSession(index).map_err(|e| e.to_string())?;
        if control.GetState().map_err(|e| e.to_string())? == AudioSessionStateExpired {
            return Ok(None);
        }

        let control2: IAudioSessionControl2 = control.cast().map_err(|e| e.to_string())?;
        let pid = control2.GetProcessId().map_err(|e| e.to_string())?;
        if pid == 0 {
            // System sounds
            return Ok(None);
        }

        let name = self
            .processes
            .name_of(pid)
            .ok_or_else(|| format!("process {pid} exited"))?;
        let meter: IAudioMeterInformation = control.cast().map_err(|e| e.to_string())?;
        let peak = meter.GetPeakValue().map_err(|e| e.to_string())?;

        Ok(Some(AudioSession::new(name, peak)))
    }
}

impl AudioSampler for WasapiSampler {
    fn sample(&mut self) -> Result<Sampled, MonitorError> {
        let _com = ComGuard::init();

        let sessions = unsafe { Self::session_enumerator() }
            .map_err(|e| MonitorError::SamplerUnavailable(e.to_string()))?;
        let count = unsafe { sessions.GetCount() }
            .map_err(|e| MonitorError::SamplerUnavailable(e.to_string()))?;

        self.processes.refresh();

        let mut sampled = Sampled::default();
        for index in 0..count.max(0) {
            match unsafe { self.read_session(&sessions, index) } {
                Ok(Some(session)) => sampled.sessions.push(session),
                Ok(None) => {}
                Err(reason) => sampled.skipped.push(MonitorError::SessionQueryFailed {
                    index: index as usize,
                    reason,
                }),
            }
        }

        Ok(sampled)
    }
}

unsafe extern "system" fn collect_visible_window(hwnd: HWND, lparam: LPARAM) -> BOOL {
    // SAFETY: lparam is the &mut Vec handed to EnumWindows below, which
    // outlives the enumeration.
    let windows = &mut *(lparam.0 as *mut Vec<(u32, String)>);

    if IsWindowVisible(hwnd).as_bool() {
        let mut pid = 0u32;
        GetWindowThreadProcessId(hwnd, Some(&mut pid));

        let mut buffer = [0u16; MAX_TITLE_LEN];
        let len = GetWindowTextW(hwnd, &mut buffer);
        if len > 0 {
            windows.push((pid, String::from_utf16_lossy(&buffer[..len as usize])));
        }
    }

    true.into()
}

/// [`WindowTitles`] over `EnumWindows`
#[derive(Default)]
pub struct Win32Windows {
    processes: SysinfoProbe,
}

impl Win32Windows {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WindowTitles for Win32Windows {
    fn visible_windows(&mut self) -> Result<Vec<WindowInfo>, MonitorError> {
        let mut raw: Vec<(u32, String)> = Vec::new();
        unsafe { EnumWindows(Some(collect_visible_window), LPARAM(&mut raw as *mut _ as isize)) }
            .map_err(|e| MonitorError::ProcessLookupFailed(format!("window enumeration failed: {e}")))?;

        self.processes.refresh();

        Ok(raw
            .into_iter()
            .filter_map(|(pid, title)| {
                self.processes
                    .name_of(pid)
                    .map(|process_name| WindowInfo { process_name, title })
            })
            .collect())
    }
}
