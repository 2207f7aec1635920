//! Timer settings and the provider seam the coordinator reads them through.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::timer::Phase;

/// Upper bound accepted for any phase duration, in minutes.
pub const MAX_DURATION_MINUTES: u32 = 180;

/// Durations are in minutes; converted to seconds once per phase
/// initialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_focus_duration")]
    pub focus_duration: u32,
    #[serde(default = "default_short_break")]
    pub short_break_duration: u32,
    #[serde(default = "default_long_break")]
    pub long_break_duration: u32,
    #[serde(default)]
    pub auto_start_focus: bool,
    #[serde(default)]
    pub auto_start_breaks: bool,
}

fn default_focus_duration() -> u32 {
    25
}
fn default_short_break() -> u32 {
    5
}
fn default_long_break() -> u32 {
    15
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            focus_duration: default_focus_duration(),
            short_break_duration: default_short_break(),
            long_break_duration: default_long_break(),
            auto_start_focus: false,
            auto_start_breaks: false,
        }
    }
}

impl Settings {
    pub fn duration_minutes(&self, phase: Phase) -> u32 {
        match phase {
            Phase::Focus => self.focus_duration,
            Phase::ShortBreak => self.short_break_duration,
            Phase::LongBreak => self.long_break_duration,
        }
    }

    pub fn duration_secs(&self, phase: Phase) -> u64 {
        u64::from(self.duration_minutes(phase)).saturating_mul(60)
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for a zero duration or one
    /// above [`MAX_DURATION_MINUTES`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("timer.focus_duration", self.focus_duration),
            ("timer.short_break_duration", self.short_break_duration),
            ("timer.long_break_duration", self.long_break_duration),
        ];
        for (key, minutes) in fields {
            if minutes == 0 || minutes > MAX_DURATION_MINUTES {
                return Err(ConfigError::InvalidValue {
                    key: key.into(),
                    message: format!("must be between 1 and {MAX_DURATION_MINUTES} minutes"),
                });
            }
        }
        Ok(())
    }
}

/// Synchronous read access to the current settings.
pub trait SettingsProvider: Send + Sync {
    fn settings(&self) -> Settings;
}

impl SettingsProvider for Settings {
    fn settings(&self) -> Settings {
        self.clone()
    }
}

/// Settings that can be changed while a timer is running. Changes apply
/// from the next phase initialization on.
#[derive(Debug, Clone, Default)]
pub struct SharedSettings {
    inner: Arc<RwLock<Settings>>,
}

impl SharedSettings {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    /// # Errors
    ///
    /// Rejects settings that fail [`Settings::validate`]; the previous
    /// value is kept.
    pub fn update(&self, settings: Settings) -> Result<(), ConfigError> {
        settings.validate()?;
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = settings;
        Ok(())
    }
}

impl SettingsProvider for SharedSettings {
    fn settings(&self) -> Settings {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_convert_to_seconds() {
        let s = Settings::default();
        assert_eq!(s.duration_secs(Phase::Focus), 1500);
        assert_eq!(s.duration_secs(Phase::ShortBreak), 300);
        assert_eq!(s.duration_secs(Phase::LongBreak), 900);
    }

    #[test]
    fn rejects_zero_and_oversized_durations() {
        let zero = Settings {
            focus_duration: 0,
            ..Settings::default()
        };
        assert!(zero.validate().is_err());

        let huge = Settings {
            long_break_duration: MAX_DURATION_MINUTES + 1,
            ..Settings::default()
        };
        assert!(huge.validate().is_err());
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn shared_settings_keep_previous_on_invalid_update() {
        let shared = SharedSettings::new(Settings::default());
        let bad = Settings {
            short_break_duration: 0,
            ..Settings::default()
        };
        assert!(shared.update(bad).is_err());
        assert_eq!(shared.settings().short_break_duration, 5);

        let good = Settings {
            short_break_duration: 10,
            ..Settings::default()
        };
        shared.update(good).unwrap();
        assert_eq!(shared.settings().short_break_duration, 10);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let s: Settings = toml::from_str("focus_duration = 50").unwrap();
        assert_eq!(s.focus_duration, 50);
        assert_eq!(s.short_break_duration, 5);
        assert!(!s.auto_start_breaks);
    }
}
