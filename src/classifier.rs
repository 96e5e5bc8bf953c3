//! # Playback Classifier
//!
//! Reduces a noisy observation of the target player (its session peak plus its
//! window title) to a single playing/paused verdict, and reduces every other
//! session to one "is anything else playing" flag.
//!
//! ## Decision order
//!
//! The first matching rule wins:
//!
//! 1. peak above [`PEAK_THRESHOLD`] - playing
//! 2. peak in `(0, VERY_LOW_THRESHOLD)` - paused (players that stop their
//!    stream leave a near-zero but nonzero meter behind)
//! 3. title contains a configured "paused" marker - paused
//! 4. title carries track metadata (non-empty and not the bare idle label) -
//!    playing, unless the meter has read exactly zero for more than
//!    [`SILENT_TITLE_LIMIT`] consecutive ticks, in which case paused
//!
//! Rules 1-3 are definitive and reset the silent-title counter.

use std::fmt;

use crate::config::{TargetConfig, TitleMatch};
use crate::session::{same_process, target_peak, AudioSession};

/// Peak above which a session is considered audible
pub const PEAK_THRESHOLD: f32 = 0.01;

/// Nonzero peaks below this are treated as a paused stream
pub const VERY_LOW_THRESHOLD: f32 = 1e-8;

/// Ambiguous silent ticks tolerated before the title verdict is overridden
pub const SILENT_TITLE_LIMIT: u32 = 2;

/// Why the classifier reached its verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictReason {
    /// Rule 1
    AudiblePeak,
    /// Rule 2
    NearSilentPeak,
    /// Rule 3
    PausedTitle,
    /// Rule 4, with an audible-but-quiet or zero meter still under the limit
    TrackTitle,
    /// Rule 4, overridden after too many silent ticks
    SilentTitle,
    /// Rule 4, title is the bare idle label
    IdleTitle,
    /// Rule 4, no window title at all
    NoTitle,
    /// No session and no window: the player is not running
    NotRunning,
}

impl fmt::Display for VerdictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            VerdictReason::AudiblePeak => "audible peak",
            VerdictReason::NearSilentPeak => "paused (near-zero peak)",
            VerdictReason::PausedTitle => "paused marker in title",
            VerdictReason::TrackTitle => "track in title",
            VerdictReason::SilentTitle => "probably paused (no volume)",
            VerdictReason::IdleTitle => "idle title",
            VerdictReason::NoTitle => "no window title",
            VerdictReason::NotRunning => "process not running",
        };
        f.write_str(text)
    }
}

/// Classifier verdict for the target player
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetVerdict {
    pub playing: bool,
    pub reason: VerdictReason,
    /// Loudest target session peak, 0 when it has none
    pub peak: f32,
}

/// Hysteresis carried from one tick to the next
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassifierState {
    consecutive_silent_title_matches: u32,
}

/// Classify the target player.
///
/// Pure: the caller decides whether to keep the returned state.
pub fn classify_target(
    sessions: &[AudioSession],
    window_title: Option<&str>,
    config: &TargetConfig,
    state: ClassifierState,
) -> (TargetVerdict, ClassifierState) {
    let reset = ClassifierState::default();
    let title = window_title.map(str::trim).unwrap_or("");

    let peak = match target_peak(sessions, &config.process_name) {
        Some(peak) => peak,
        None if title.is_empty() => {
            return (verdict(false, VerdictReason::NotRunning, 0.0), reset);
        }
        None => 0.0,
    };

    if peak > PEAK_THRESHOLD {
        return (verdict(true, VerdictReason::AudiblePeak, peak), reset);
    }
    if peak > 0.0 && peak < VERY_LOW_THRESHOLD {
        return (verdict(false, VerdictReason::NearSilentPeak, peak), reset);
    }
    if has_paused_marker(title, &config.paused_markers) {
        return (verdict(false, VerdictReason::PausedTitle, peak), reset);
    }

    if title.is_empty() {
        return (verdict(false, VerdictReason::NoTitle, peak), reset);
    }
    if is_idle_title(title, config) {
        return (verdict(false, VerdictReason::IdleTitle, peak), reset);
    }

    if peak == 0.0 {
        let count = (state.consecutive_silent_title_matches + 1).min(SILENT_TITLE_LIMIT + 1);
        let next = ClassifierState {
            consecutive_silent_title_matches: count,
        };
        if count > SILENT_TITLE_LIMIT {
            return (verdict(false, VerdictReason::SilentTitle, peak), next);
        }
        return (verdict(true, VerdictReason::TrackTitle, peak), next);
    }

    (verdict(true, VerdictReason::TrackTitle, peak), reset)
}

/// Whether any session other than `target_process_name` is audible
pub fn classify_other(sessions: &[AudioSession], target_process_name: &str) -> bool {
    sessions
        .iter()
        .any(|s| !same_process(&s.process_name, target_process_name) && is_audible(s))
}

/// Audible sessions that count as competing audio under `config`
/// (the target and excluded processes never do)
pub fn competing_sessions<'a>(
    sessions: &'a [AudioSession],
    config: &'a TargetConfig,
) -> impl Iterator<Item = &'a AudioSession> + 'a {
    sessions
        .iter()
        .filter(move |s| !config.is_excluded(&s.process_name) && is_audible(s))
}

fn is_audible(session: &AudioSession) -> bool {
    session.peak_amplitude > PEAK_THRESHOLD
}

fn verdict(playing: bool, reason: VerdictReason, peak: f32) -> TargetVerdict {
    TargetVerdict { playing, reason, peak }
}

fn has_paused_marker(title: &str, markers: &[String]) -> bool {
    let title = title.to_lowercase();
    markers
        .iter()
        .map(|m| m.trim().to_lowercase())
        .filter(|m| !m.is_empty())
        .any(|m| title.contains(&m))
}

fn is_idle_title(title: &str, config: &TargetConfig) -> bool {
    let title = title.to_lowercase();
    let labels = [config.idle_label().to_lowercase(), config.process_name.trim().to_lowercase()];

    let mode = config.idle_match();

    labels.iter().filter(|l| !l.is_empty()).any(|label| match mode {
        TitleMatch::Exact => title == *label,
        TitleMatch::Suffix => title.ends_with(label.as_str()),
    })
}

/// Owns the classifier hysteresis between ticks
#[derive(Debug, Default)]
pub struct PlaybackClassifier {
    state: ClassifierState,
}

impl PlaybackClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify without committing; pair with [`PlaybackClassifier::commit`]
    pub fn evaluate(
        &self,
        sessions: &[AudioSession],
        window_title: Option<&str>,
        config: &TargetConfig,
    ) -> (TargetVerdict, ClassifierState) {
        classify_target(sessions, window_title, config, self.state)
    }

    pub fn commit(&mut self, state: ClassifierState) {
        self.state = state;
    }

    /// The target process is gone; that is a definitive paused signal
    pub fn reset(&mut self) {
        self.state = ClassifierState::default();
    }

    pub fn silent_ticks(&self) -> u32 {
        self.state.consecutive_silent_title_matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(peak: f32) -> Vec<AudioSession> {
        vec![AudioSession::new("target.exe", peak)]
    }

    fn config() -> TargetConfig {
        TargetConfig::for_process("target.exe")
    }

    fn run(sessions: &[AudioSession], title: Option<&str>, state: ClassifierState) -> (TargetVerdict, ClassifierState) {
        classify_target(sessions, title, &config(), state)
    }

    fn counter(n: u32) -> ClassifierState {
        ClassifierState {
            consecutive_silent_title_matches: n,
        }
    }

    #[test]
    fn test_loud_peak_wins_regardless_of_title() {
        let titles = [None, Some(""), Some("target"), Some("target.exe - 暂停中"), Some("Song - paused")];
        for peak in [0.0101_f32, 0.02, 0.5, 1.0] {
            for title in titles {
                let (verdict, state) = run(&target(peak), title, counter(3));
                assert!(verdict.playing, "peak {peak} title {title:?}");
                assert_eq!(verdict.reason, VerdictReason::AudiblePeak);
                assert_eq!(state, ClassifierState::default());
            }
        }
    }

    #[test]
    fn test_near_zero_peak_means_paused_regardless_of_title() {
        for peak in [1e-12_f32, 5e-9, 9.9e-9] {
            let (verdict, state) = run(&target(peak), Some("target.exe - Song A"), counter(2));
            assert!(!verdict.playing, "peak {peak}");
            assert_eq!(verdict.reason, VerdictReason::NearSilentPeak);
            assert_eq!(state, ClassifierState::default());
        }
    }

    #[test]
    fn test_scenario_audible_target_with_track_title() {
        let (verdict, _) = run(&target(0.02), Some("target.exe - Song A"), ClassifierState::default());
        assert!(verdict.playing);
    }

    #[test]
    fn test_scenario_localized_paused_marker() {
        let (verdict, state) = run(&target(0.0), Some("target.exe - 暂停中"), counter(1));
        assert!(!verdict.playing);
        assert_eq!(verdict.reason, VerdictReason::PausedTitle);
        assert_eq!(state, ClassifierState::default());
    }

    #[test]
    fn test_paused_marker_is_case_insensitive() {
        let (verdict, _) = run(&target(0.0), Some("Song A - PAUSED"), ClassifierState::default());
        assert!(!verdict.playing);
        assert_eq!(verdict.reason, VerdictReason::PausedTitle);
    }

    #[test]
    fn test_scenario_no_target_session_means_not_running() {
        let others = vec![AudioSession::new("chrome.exe", 0.3)];
        let (verdict, _) = run(&others, None, counter(2));
        assert!(!verdict.playing);
        assert_eq!(verdict.reason, VerdictReason::NotRunning);
        assert_eq!(verdict.reason.to_string(), "process not running");
    }

    #[test]
    fn test_idle_title_is_not_playing() {
        let (verdict, state) = run(&target(0.0), Some("target"), counter(2));
        assert!(!verdict.playing);
        assert_eq!(verdict.reason, VerdictReason::IdleTitle);
        assert_eq!(state, ClassifierState::default());

        let (verdict, _) = run(&target(0.0), Some("TARGET.EXE"), ClassifierState::default());
        assert_eq!(verdict.reason, VerdictReason::IdleTitle);
    }

    #[test]
    fn test_suffix_title_match() {
        let config = TargetConfig {
            idle_title: Some("Music Box".to_string()),
            title_match: Some(TitleMatch::Suffix),
            ..TargetConfig::for_process("musicbox.exe")
        };
        let sessions = vec![AudioSession::new("musicbox.exe", 0.0)];

        let (verdict, _) = classify_target(&sessions, Some("Welcome - Music Box"), &config, ClassifierState::default());
        assert!(!verdict.playing);

        let (verdict, _) = classify_target(&sessions, Some("Song - Artist"), &config, ClassifierState::default());
        assert!(verdict.playing);
    }

    #[test]
    fn test_default_player_idle_window_is_not_playing() {
        let config = TargetConfig::default();
        let sessions = vec![
            AudioSession::new("lx-music-desktop.exe", 0.0),
            AudioSession::new("chrome.exe", 0.3),
        ];

        for title in ["LX Music", "Song - LX Music"] {
            let (verdict, state) = classify_target(&sessions, Some(title), &config, ClassifierState::default());
            assert!(!verdict.playing, "title {title:?}");
            assert_eq!(verdict.reason, VerdictReason::IdleTitle);
            assert_eq!(state, ClassifierState::default());

            // Competing audio next to an idle player must not press anything
            let mut engine = crate::arbiter::ArbitrationEngine::new();
            let decision = engine.tick(classify_other(&sessions, &config.process_name), verdict.playing, std::time::Instant::now());
            assert_eq!(decision.action, None);
        }

        let (verdict, _) = classify_target(&sessions, Some("晴天 - 周杰伦"), &config, ClassifierState::default());
        assert!(verdict.playing);
        assert_eq!(verdict.reason, VerdictReason::TrackTitle);
    }

    #[test]
    fn test_silent_title_hysteresis() {
        let sessions = target(0.0);
        let title = Some("target.exe - Song A");

        let (v1, s1) = run(&sessions, title, ClassifierState::default());
        assert!(v1.playing);
        let (v2, s2) = run(&sessions, title, s1);
        assert!(v2.playing);
        let (v3, s3) = run(&sessions, title, s2);
        assert!(!v3.playing);
        assert_eq!(v3.reason, VerdictReason::SilentTitle);

        // Counter stays pinned at its threshold while the ambiguity lasts
        let (v4, s4) = run(&sessions, title, s3);
        assert!(!v4.playing);
        assert_eq!(s4, s3);
        assert_eq!(s4, counter(SILENT_TITLE_LIMIT + 1));

        // A definitive signal clears it
        let (v5, s5) = run(&target(0.3), title, s4);
        assert!(v5.playing);
        assert_eq!(s5, ClassifierState::default());
    }

    #[test]
    fn test_quiet_nonzero_peak_trusts_title_and_resets_counter() {
        let (verdict, state) = run(&target(0.005), Some("target.exe - Song A"), counter(2));
        assert!(verdict.playing);
        assert_eq!(verdict.reason, VerdictReason::TrackTitle);
        assert_eq!(state, ClassifierState::default());
    }

    #[test]
    fn test_window_without_session_uses_title() {
        let (verdict, state) = run(&[], Some("target.exe - Song A"), ClassifierState::default());
        assert!(verdict.playing);
        assert_eq!(state, counter(1));
    }

    #[test]
    fn test_classify_other_ignores_target_and_quiet_sessions() {
        let sessions = vec![
            AudioSession::new("target.exe", 0.8),
            AudioSession::new("chrome.exe", 0.005),
        ];
        assert!(!classify_other(&sessions, "target.exe"));
        assert!(!classify_other(&sessions, "TARGET.exe"));

        let sessions = vec![
            AudioSession::new("target.exe", 0.0),
            AudioSession::new("chrome.exe", 0.05),
        ];
        assert!(classify_other(&sessions, "target.exe"));
        assert!(!classify_other(&[], "target.exe"));
    }

    #[test]
    fn test_competing_sessions_respect_exclusions() {
        let config = TargetConfig {
            excluded_processes: vec!["spotify.exe".to_string()],
            ..config()
        };
        let sessions = vec![
            AudioSession::new("target.exe", 0.5),
            AudioSession::new("spotify.exe", 0.5),
            AudioSession::new("game.exe", 0.2),
        ];

        let names: Vec<_> = competing_sessions(&sessions, &config).map(|s| s.process_name.as_str()).collect();
        assert_eq!(names, vec!["game.exe"]);
    }

    #[test]
    fn test_classify_other_agrees_with_competing_sessions() {
        let config = config();
        let mixes = [
            vec![],
            vec![AudioSession::new("target.exe", 0.9)],
            vec![AudioSession::new("target.exe", 0.0), AudioSession::new("chrome.exe", PEAK_THRESHOLD)],
            vec![AudioSession::new("TARGET.EXE", 0.0), AudioSession::new("chrome.exe", 0.0101)],
            vec![AudioSession::new("game.exe", 0.2), AudioSession::new("chrome.exe", 0.0)],
        ];

        for sessions in &mixes {
            assert_eq!(
                classify_other(sessions, &config.process_name),
                competing_sessions(sessions, &config).next().is_some(),
                "{sessions:?}"
            );
        }
    }

    #[test]
    fn test_playback_classifier_commits_explicitly() {
        let mut classifier = PlaybackClassifier::new();
        let sessions = target(0.0);

        let (_, next) = classifier.evaluate(&sessions, Some("target.exe - Song"), &config());
        assert_eq!(classifier.silent_ticks(), 0);

        classifier.commit(next);
        assert_eq!(classifier.silent_ticks(), 1);

        classifier.reset();
        assert_eq!(classifier.silent_ticks(), 0);
    }
}
