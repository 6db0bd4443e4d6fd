//! Persisted player preferences
//!
//! Storage is an external key-value collaborator; `PlayerSettings` is the
//! typed view handed to whichever component needs it.

use std::collections::HashMap;

const SOUND_ENABLED: &str = "settings.soundEnabled";
const MUSIC_ENABLED: &str = "settings.musicEnabled";
const JOYSTICK_SENSITIVITY: &str = "settings.joystickSensitivity";
const PLAYER_NAME: &str = "settings.playerName";

pub const MIN_SENSITIVITY: f32 = 0.5;
pub const MAX_SENSITIVITY: f32 = 2.0;

/// String key-value storage
pub trait SettingsStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: String);
}

/// In-memory store for tests and headless peers
#[derive(Debug, Default, Clone)]
pub struct MemorySettingsStore {
    values: HashMap<String, String>,
}

impl SettingsStore for MemorySettingsStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) {
        self.values.insert(key.to_string(), value);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSettings {
    pub sound_enabled: bool,
    pub music_enabled: bool,
    pub joystick_sensitivity: f32,
    pub player_name: String,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            sound_enabled: true,
            music_enabled: true,
            joystick_sensitivity: 1.0,
            player_name: String::new(),
        }
    }
}

impl PlayerSettings {
    /// Read from `store`; missing or unparsable entries fall back to defaults
    pub fn load(store: &impl SettingsStore) -> Self {
        let defaults = Self::default();
        let flag = |key: &str, default: bool| {
            store
                .get(key)
                .and_then(|v| v.parse::<bool>().ok())
                .unwrap_or(default)
        };

        Self {
            sound_enabled: flag(SOUND_ENABLED, defaults.sound_enabled),
            music_enabled: flag(MUSIC_ENABLED, defaults.music_enabled),
            joystick_sensitivity: store
                .get(JOYSTICK_SENSITIVITY)
                .and_then(|v| v.parse::<f32>().ok())
                .filter(|v| *v > 0.0)
                .map(clamp_sensitivity)
                .unwrap_or(defaults.joystick_sensitivity),
            player_name: store.get(PLAYER_NAME).unwrap_or_default(),
        }
    }

    pub fn save(&self, store: &mut impl SettingsStore) {
        store.set(SOUND_ENABLED, self.sound_enabled.to_string());
        store.set(MUSIC_ENABLED, self.music_enabled.to_string());
        store.set(
            JOYSTICK_SENSITIVITY,
            clamp_sensitivity(self.joystick_sensitivity).to_string(),
        );
        store.set(PLAYER_NAME, self.player_name.clone());
    }
}

fn clamp_sensitivity(value: f32) -> f32 {
    value.clamp(MIN_SENSITIVITY, MAX_SENSITIVITY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_store_yields_defaults() {
        let settings = PlayerSettings::load(&MemorySettingsStore::default());
        assert_eq!(settings, PlayerSettings::default());
    }

    #[test]
    fn save_then_load_preserves_values() {
        let mut store = MemorySettingsStore::default();
        let settings = PlayerSettings {
            sound_enabled: false,
            music_enabled: true,
            joystick_sensitivity: 1.5,
            player_name: "brave-otter".to_string(),
        };
        settings.save(&mut store);
        assert_eq!(PlayerSettings::load(&store), settings);
    }

    #[test]
    fn sensitivity_is_clamped() {
        let mut store = MemorySettingsStore::default();
        store.set(JOYSTICK_SENSITIVITY, "9.0".to_string());
        assert_eq!(PlayerSettings::load(&store).joystick_sensitivity, MAX_SENSITIVITY);
        store.set(JOYSTICK_SENSITIVITY, "-1".to_string());
        assert_eq!(PlayerSettings::load(&store).joystick_sensitivity, 1.0);
    }
}
