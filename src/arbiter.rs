//! # Arbitration Engine
//!
//! Decides, once per tick, whether the background player should be paused
//! (something else is audible) or started (the system is quiet), given the
//! two classifier outputs.
//!
//! ## Throttling
//!
//! - **Cool-down**: no two actions closer than [`COOLDOWN`]; both signals
//!   flicker near their thresholds and would otherwise thrash the player.
//! - **Start hold**: after a Play the driver skips ticks for [`START_SETTLE`]
//!   to give the player time to respond.
//! - **Retry cap**: at most [`MAX_START_ATTEMPTS`] consecutive Play attempts,
//!   then start attempts are suppressed for [`BACKOFF`] and the attempt
//!   counter is reset when the back-off ends.
//! - Competing audio always clears the attempt counter: an unresponsive
//!   player only matters while the system is otherwise silent.
//!
//! [`ArbitrationEngine::decide`] is pure; [`ArbitrationEngine::commit`] swaps
//! in the new state in one step so no reader ever sees half a tick.

use std::fmt;
use std::time::{Duration, Instant};

/// Minimum time between two control actions
pub const COOLDOWN: Duration = Duration::from_secs(5);

/// Time given to the player to start after a Play
pub const START_SETTLE: Duration = Duration::from_secs(2);

/// Start-attempt suppression after the retry cap is hit
pub const BACKOFF: Duration = Duration::from_secs(15);

/// Consecutive start attempts before backing off
pub const MAX_START_ATTEMPTS: u32 = 3;

/// Control action sent to the player
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Play,
    Pause,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Play => f.write_str("play"),
            Action::Pause => f.write_str("pause"),
        }
    }
}

/// Timing knobs; the defaults are the constants above
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArbitrationPolicy {
    pub cooldown: Duration,
    pub start_settle: Duration,
    pub backoff: Duration,
    pub max_start_attempts: u32,
}

impl Default for ArbitrationPolicy {
    fn default() -> Self {
        Self {
            cooldown: COOLDOWN,
            start_settle: START_SETTLE,
            backoff: BACKOFF,
            max_start_attempts: MAX_START_ATTEMPTS,
        }
    }
}

/// Everything the engine remembers between ticks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArbitrationState {
    pub last_action: Option<Action>,
    pub last_action_time: Option<Instant>,
    pub consecutive_start_attempts: u32,
    /// Start attempts are suppressed until this instant
    pub backoff_until: Option<Instant>,
    pub other_playing_prev: bool,
    pub target_playing_prev: bool,
}

/// Conceptual engine phase, derived from the state rather than stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    OtherPlaying,
    TargetStarting,
    Backoff,
}

/// What a tick concluded, for the log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Note {
    /// Competing audio while the target plays: pause it
    PauseForCompetingAudio,
    /// Competing audio while the target plays, but still cooling down
    CompetingAudioCoolingDown { remaining: Duration },
    /// Competing audio and the target is already quiet
    CompetingAudioTargetQuiet,
    /// Silence: start the target
    Starting { attempt: u32, max: u32 },
    /// Retry cap hit
    BackoffEntered { duration: Duration },
    /// Silence, but start attempts are suppressed
    BackingOff { remaining: Duration },
    /// Silence apart from the target, which is playing
    TargetPlaying,
    /// Nothing else playing, still cooling down from the last action
    CoolingDown { remaining: Duration },
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Note::PauseForCompetingAudio => write!(f, "other audio detected, pausing player"),
            Note::CompetingAudioCoolingDown { remaining } => write!(
                f,
                "other audio detected, pause deferred ({:.1}s cool-down left)",
                remaining.as_secs_f64()
            ),
            Note::CompetingAudioTargetQuiet => write!(f, "other audio detected, player already quiet"),
            Note::Starting { attempt, max } => {
                write!(f, "no audio playing, starting player (attempt {attempt}/{max})")
            }
            Note::BackoffEntered { duration } => write!(
                f,
                "player did not start after repeated attempts, backing off for {}s",
                duration.as_secs()
            ),
            Note::BackingOff { remaining } => {
                write!(f, "backing off, next start attempt in {:.1}s", remaining.as_secs_f64())
            }
            Note::TargetPlaying => write!(f, "player is playing"),
            Note::CoolingDown { remaining } => {
                write!(f, "cooling down ({:.1}s left)", remaining.as_secs_f64())
            }
        }
    }
}

/// Result of one engine tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Action to hand to the player controller
    pub action: Option<Action>,
    /// How long the driver must hold off the next tick
    pub hold: Option<Duration>,
    pub note: Note,
    /// A back-off period ended at the start of this tick
    pub backoff_ended: bool,
}

/// The arbitration state machine
#[derive(Debug, Default)]
pub struct ArbitrationEngine {
    policy: ArbitrationPolicy,
    state: ArbitrationState,
}

impl ArbitrationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: ArbitrationPolicy) -> Self {
        Self {
            policy,
            state: ArbitrationState::default(),
        }
    }

    pub fn state(&self) -> &ArbitrationState {
        &self.state
    }

    /// Compute the decision and successor state for one tick without
    /// touching the engine
    pub fn decide(&self, other_playing: bool, target_playing: bool, now: Instant) -> (Decision, ArbitrationState) {
        let policy = &self.policy;
        let mut next = self.state.clone();
        let mut action = None;
        let mut hold = None;

        let backoff_ended = matches!(next.backoff_until, Some(until) if now >= until);
        if backoff_ended {
            next.backoff_until = None;
            next.consecutive_start_attempts = 0;
        }

        let since_action = next.last_action_time.map(|t| now.saturating_duration_since(t));
        let cooldown_ok = since_action.map_or(true, |elapsed| elapsed > policy.cooldown);
        let cooldown_left = since_action.map_or(Duration::ZERO, |elapsed| policy.cooldown.saturating_sub(elapsed));

        let note = if other_playing {
            next.consecutive_start_attempts = 0;
            if target_playing && cooldown_ok {
                action = Some(Action::Pause);
                Note::PauseForCompetingAudio
            } else if target_playing {
                Note::CompetingAudioCoolingDown {
                    remaining: cooldown_left,
                }
            } else {
                Note::CompetingAudioTargetQuiet
            }
        } else if cooldown_ok {
            if target_playing {
                next.consecutive_start_attempts = 0;
                Note::TargetPlaying
            } else if let Some(until) = next.backoff_until {
                Note::BackingOff {
                    remaining: until.saturating_duration_since(now),
                }
            } else {
                next.consecutive_start_attempts += 1;
                if next.consecutive_start_attempts <= policy.max_start_attempts {
                    action = Some(Action::Play);
                    hold = Some(policy.start_settle);
                    Note::Starting {
                        attempt: next.consecutive_start_attempts,
                        max: policy.max_start_attempts,
                    }
                } else {
                    next.backoff_until = Some(now + policy.backoff);
                    Note::BackoffEntered {
                        duration: policy.backoff,
                    }
                }
            }
        } else {
            Note::CoolingDown {
                remaining: cooldown_left,
            }
        };

        if let Some(action) = action {
            next.last_action = Some(action);
            next.last_action_time = Some(now);
        }
        next.other_playing_prev = other_playing;
        next.target_playing_prev = target_playing;

        let decision = Decision {
            action,
            hold,
            note,
            backoff_ended,
        };
        (decision, next)
    }

    /// Replace the engine state with the result of [`ArbitrationEngine::decide`]
    pub fn commit(&mut self, state: ArbitrationState) {
        self.state = state;
    }

    /// Decide and commit in one step
    pub fn tick(&mut self, other_playing: bool, target_playing: bool, now: Instant) -> Decision {
        let (decision, next) = self.decide(other_playing, target_playing, now);
        self.commit(next);
        decision
    }

    /// Phase the engine is in at `now`
    pub fn phase(&self, now: Instant) -> Phase {
        let state = &self.state;
        if matches!(state.backoff_until, Some(until) if now < until) {
            Phase::Backoff
        } else if state.other_playing_prev {
            Phase::OtherPlaying
        } else if state.consecutive_start_attempts > 0 && !state.target_playing_prev {
            Phase::TargetStarting
        } else {
            Phase::Idle
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_playing_target_in_silence_never_acts() {
        let mut engine = ArbitrationEngine::new();
        let t0 = Instant::now();

        for i in 0..20 {
            let decision = engine.tick(false, true, t0 + secs(i * 3));
            assert_eq!(decision.action, None);
            assert_eq!(decision.note, Note::TargetPlaying);
            assert_eq!(engine.state().consecutive_start_attempts, 0);
        }
        assert_eq!(engine.state().last_action, None);
    }

    #[test]
    fn test_cooldown_allows_one_pause() {
        let mut engine = ArbitrationEngine::new();
        let t0 = Instant::now();

        let first = engine.tick(true, true, t0);
        let second = engine.tick(true, true, t0 + secs(3));

        assert_eq!(first.action, Some(Action::Pause));
        assert_eq!(second.action, None);
        assert!(matches!(second.note, Note::CompetingAudioCoolingDown { .. }));

        // Cool-down is strict: exactly 5s is still too soon
        let third = engine.tick(true, true, t0 + secs(5));
        assert_eq!(third.action, None);
        let fourth = engine.tick(true, true, t0 + Duration::from_millis(5001));
        assert_eq!(fourth.action, Some(Action::Pause));
    }

    #[test]
    fn test_retry_cap_then_backoff_then_reset() {
        let mut engine = ArbitrationEngine::new();
        let t0 = Instant::now();
        let mut plays = 0;

        for i in 0..4 {
            let decision = engine.tick(false, false, t0 + secs(i * 6));
            if decision.action == Some(Action::Play) {
                plays += 1;
                assert_eq!(decision.hold, Some(START_SETTLE));
            }
        }
        assert_eq!(plays, 3);
        let entered_at = t0 + secs(18);
        assert_eq!(engine.state().backoff_until, Some(entered_at + BACKOFF));
        assert_eq!(engine.phase(entered_at), Phase::Backoff);

        // Suppressed for the whole back-off
        for offset in [1, 6, 12, 14] {
            let decision = engine.tick(false, false, entered_at + secs(offset));
            assert_eq!(decision.action, None, "offset {offset}");
            assert!(matches!(decision.note, Note::BackingOff { .. }));
        }

        // Back-off over: counter reset and a fresh attempt goes out
        let decision = engine.tick(false, false, entered_at + secs(15));
        assert!(decision.backoff_ended);
        assert_eq!(decision.action, Some(Action::Play));
        assert_eq!(decision.note, Note::Starting { attempt: 1, max: MAX_START_ATTEMPTS });
        assert_eq!(engine.state().backoff_until, None);
    }

    #[test]
    fn test_competing_audio_with_quiet_target_takes_no_action() {
        let mut engine = ArbitrationEngine::new();
        let decision = engine.tick(true, false, Instant::now());

        assert_eq!(decision.action, None);
        assert_eq!(decision.note, Note::CompetingAudioTargetQuiet);
        assert_eq!(engine.state().consecutive_start_attempts, 0);
        assert_eq!(engine.state().last_action, None);
    }

    #[test]
    fn test_competing_audio_clears_attempts_even_during_cooldown() {
        let mut engine = ArbitrationEngine::new();
        let t0 = Instant::now();

        engine.tick(false, false, t0);
        engine.tick(false, false, t0 + secs(6));
        assert_eq!(engine.state().consecutive_start_attempts, 2);

        let decision = engine.tick(true, false, t0 + secs(7));
        assert_eq!(decision.action, None);
        assert_eq!(engine.state().consecutive_start_attempts, 0);
    }

    #[test]
    fn test_target_playing_resets_attempts() {
        let mut engine = ArbitrationEngine::new();
        let t0 = Instant::now();

        engine.tick(false, false, t0);
        assert_eq!(engine.state().consecutive_start_attempts, 1);
        assert_eq!(engine.phase(t0), Phase::TargetStarting);

        engine.tick(false, true, t0 + secs(6));
        assert_eq!(engine.state().consecutive_start_attempts, 0);
        assert_eq!(engine.phase(t0 + secs(6)), Phase::Idle);
    }

    #[test]
    fn test_cooldown_blocks_start_branch_without_touching_state() {
        let mut engine = ArbitrationEngine::new();
        let t0 = Instant::now();

        engine.tick(true, true, t0);
        let before = engine.state().clone();

        let decision = engine.tick(false, false, t0 + secs(2));
        assert_eq!(decision.action, None);
        assert!(matches!(decision.note, Note::CoolingDown { .. }));

        let after = engine.state();
        assert_eq!(after.consecutive_start_attempts, before.consecutive_start_attempts);
        assert_eq!(after.last_action, before.last_action);
        assert_eq!(after.last_action_time, before.last_action_time);
        assert!(!after.other_playing_prev);
        assert!(!after.target_playing_prev);
    }

    #[test]
    fn test_decide_is_pure() {
        let engine = ArbitrationEngine::new();
        let (decision, next) = engine.decide(false, false, Instant::now());

        assert_eq!(decision.action, Some(Action::Play));
        assert_eq!(next.consecutive_start_attempts, 1);
        assert_eq!(engine.state(), &ArbitrationState::default());
    }

    #[test]
    fn test_pause_records_last_action() {
        let mut engine = ArbitrationEngine::new();
        let t0 = Instant::now();
        engine.tick(true, true, t0);

        let state = engine.state();
        assert_eq!(state.last_action, Some(Action::Pause));
        assert_eq!(state.last_action_time, Some(t0));
        assert!(state.other_playing_prev);
        assert!(state.target_playing_prev);
        assert_eq!(engine.phase(t0), Phase::OtherPlaying);
    }

    #[test]
    fn test_custom_policy() {
        let policy = ArbitrationPolicy {
            max_start_attempts: 1,
            backoff: secs(2),
            ..ArbitrationPolicy::default()
        };
        let mut engine = ArbitrationEngine::with_policy(policy);
        let t0 = Instant::now();

        assert_eq!(engine.tick(false, false, t0).action, Some(Action::Play));
        let decision = engine.tick(false, false, t0 + secs(6));
        assert_eq!(decision.note, Note::BackoffEntered { duration: secs(2) });
        assert_eq!(engine.tick(false, false, t0 + secs(9)).action, Some(Action::Play));
    }

    #[test]
    fn test_note_messages() {
        assert_eq!(
            Note::Starting { attempt: 2, max: 3 }.to_string(),
            "no audio playing, starting player (attempt 2/3)"
        );
        assert!(Note::BackoffEntered { duration: BACKOFF }.to_string().contains("15s"));
        assert_eq!(Action::Pause.to_string(), "pause");
    }
}
