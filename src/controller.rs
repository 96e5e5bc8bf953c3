//! # Player Controller
//!
//! Toggles the background player by synthesizing its play/pause key chord
//! through the OS input layer (via `enigo`). This is the only component with
//! an externally observable side effect.
//!
//! Key injection is fire-and-forget: a successful dispatch says nothing about
//! whether the player reacted. The arbiter infers that from the next poll.

use enigo::{Direction, Enigo, Key, Keyboard, Settings};
use log::debug;
use std::collections::HashMap;
use std::time::Duration;

use crate::config::Hotkey;
use crate::error::MonitorError;

lazy_static::lazy_static! {
    /// Named keys accepted in hotkey strings
    static ref NAMED_KEYS: HashMap<&'static str, Key> = {
        let mut keys = HashMap::new();
        keys.insert("ctrl", Key::Control);
        keys.insert("control", Key::Control);
        keys.insert("alt", Key::Alt);
        keys.insert("option", Key::Alt);
        keys.insert("shift", Key::Shift);
        keys.insert("win", Key::Meta);
        keys.insert("super", Key::Meta);
        keys.insert("meta", Key::Meta);
        keys.insert("cmd", Key::Meta);
        keys.insert("space", Key::Space);
        keys.insert("enter", Key::Return);
        keys.insert("return", Key::Return);
        keys.insert("tab", Key::Tab);
        keys.insert("esc", Key::Escape);
        keys.insert("escape", Key::Escape);
        keys.insert("backspace", Key::Backspace);
        keys.insert("delete", Key::Delete);
        keys.insert("home", Key::Home);
        keys.insert("end", Key::End);
        keys.insert("pageup", Key::PageUp);
        keys.insert("pagedown", Key::PageDown);
        keys.insert("up", Key::UpArrow);
        keys.insert("down", Key::DownArrow);
        keys.insert("left", Key::LeftArrow);
        keys.insert("right", Key::RightArrow);
        keys.insert("f1", Key::F1);
        keys.insert("f2", Key::F2);
        keys.insert("f3", Key::F3);
        keys.insert("f4", Key::F4);
        keys.insert("f5", Key::F5);
        keys.insert("f6", Key::F6);
        keys.insert("f7", Key::F7);
        keys.insert("f8", Key::F8);
        keys.insert("f9", Key::F9);
        keys.insert("f10", Key::F10);
        keys.insert("f11", Key::F11);
        keys.insert("f12", Key::F12);
        keys
    };
}

/// Map a hotkey token to a key.
///
/// Accepts the named keys above (case-insensitive) and any single character.
pub fn resolve_key(token: &str) -> Option<Key> {
    let token = token.trim().to_lowercase();
    if let Some(key) = NAMED_KEYS.get(token.as_str()) {
        return Some(*key);
    }

    let mut chars = token.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if !c.is_whitespace() && c != crate::config::HOTKEY_DELIMITER => {
            Some(Key::Unicode(c))
        }
        _ => None,
    }
}

/// Sends the player's toggle chord
pub trait PlayerControl {
    /// Press and release `hotkey` as one chord, then wait `settle` so the
    /// player has time to react before the caller observes it again.
    fn toggle(&mut self, hotkey: &Hotkey, settle: Duration) -> Result<(), MonitorError>;
}

/// Expand a chord into press/release steps: keys pressed in order, released
/// in reverse.
pub fn chord_steps(keys: &[Key]) -> Vec<(Key, Direction)> {
    keys.iter()
        .map(|key| (*key, Direction::Press))
        .chain(keys.iter().rev().map(|key| (*key, Direction::Release)))
        .collect()
}

/// [`PlayerControl`] backed by the OS keyboard
#[derive(Default)]
pub struct KeyboardController {
    // Created on first use; input injection may be unavailable (no display).
    enigo: Option<Enigo>,
}

impl KeyboardController {
    pub fn new() -> Self {
        Self::default()
    }

    fn enigo(&mut self) -> Result<&mut Enigo, MonitorError> {
        if self.enigo.is_none() {
            let enigo = Enigo::new(&Settings::default())
                .map_err(|e| MonitorError::InputDispatchFailed(format!("input backend unavailable: {e:?}")))?;
            self.enigo = Some(enigo);
        }

        self.enigo
            .as_mut()
            .ok_or_else(|| MonitorError::InputDispatchFailed("input backend unavailable".to_string()))
    }
}

impl PlayerControl for KeyboardController {
    fn toggle(&mut self, hotkey: &Hotkey, settle: Duration) -> Result<(), MonitorError> {
        let keys = hotkey
            .tokens()
            .iter()
            .map(|token| {
                resolve_key(token)
                    .ok_or_else(|| MonitorError::InvalidConfig(format!("unknown key '{token}'")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!("Sending {hotkey}");
        let enigo = self.enigo()?;
        let mut failure = None;
        for (key, direction) in chord_steps(&keys) {
            if let Err(e) = enigo.key(key, direction) {
                // Keep going so modifiers pressed earlier still get released.
                failure.get_or_insert_with(|| format!("{key:?} {direction:?}: {e:?}"));
            }
        }

        std::thread::sleep(settle);

        match failure {
            Some(reason) => Err(MonitorError::InputDispatchFailed(reason)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_named_keys() {
        assert_eq!(resolve_key("ctrl"), Some(Key::Control));
        assert_eq!(resolve_key("Control"), Some(Key::Control));
        assert_eq!(resolve_key("ALT"), Some(Key::Alt));
        assert_eq!(resolve_key("win"), Some(Key::Meta));
        assert_eq!(resolve_key("f9"), Some(Key::F9));
        assert_eq!(resolve_key("space"), Some(Key::Space));
    }

    #[test]
    fn test_resolve_single_characters() {
        assert_eq!(resolve_key("p"), Some(Key::Unicode('p')));
        assert_eq!(resolve_key("P"), Some(Key::Unicode('p')));
        assert_eq!(resolve_key("7"), Some(Key::Unicode('7')));
    }

    #[test]
    fn test_resolve_rejects_unknown_tokens() {
        assert_eq!(resolve_key(""), None);
        assert_eq!(resolve_key("hyper"), None);
        assert_eq!(resolve_key("+"), None);
        assert_eq!(resolve_key("f13"), None);
    }

    #[test]
    fn test_chord_releases_in_reverse_order() {
        let steps = chord_steps(&[Key::Control, Key::Alt, Key::Unicode('p')]);

        assert_eq!(
            steps,
            vec![
                (Key::Control, Direction::Press),
                (Key::Alt, Direction::Press),
                (Key::Unicode('p'), Direction::Press),
                (Key::Unicode('p'), Direction::Release),
                (Key::Alt, Direction::Release),
                (Key::Control, Direction::Release),
            ]
        );
    }
}
