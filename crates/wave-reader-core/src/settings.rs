//! Shared animation settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Shortest accepted wave period.
pub const MIN_WAVE_SPEED_MS: u64 = 100;
/// Longest accepted wave period.
pub const MAX_WAVE_SPEED_MS: u64 = 60_000;

/// Animation settings, owned by the coordinator and copied into every agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Wave period in milliseconds; also the engine's recompute period.
    pub wave_speed_ms: u64,
    /// CSS color applied to waving elements.
    pub wave_color: String,
    /// Opacity in `[0, 1]`.
    pub opacity: f64,
    /// Whether the control surface shows notifications.
    pub notifications_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            wave_speed_ms: 2000,
            wave_color: "#4a90e2".to_string(),
            opacity: 0.8,
            notifications_enabled: true,
        }
    }
}

impl Settings {
    /// Merge a partial update, keeping fields the patch leaves out.
    pub fn merge(&mut self, patch: &SettingsPatch) {
        if let Some(speed) = patch.wave_speed_ms {
            self.wave_speed_ms = speed;
        }
        if let Some(ref color) = patch.wave_color {
            self.wave_color.clone_from(color);
        }
        if let Some(opacity) = patch.opacity {
            self.opacity = opacity;
        }
        if let Some(enabled) = patch.notifications_enabled {
            self.notifications_enabled = enabled;
        }
        self.clamp();
    }

    /// Copy with out-of-range values pulled back into range.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.clamp();
        self
    }

    fn clamp(&mut self) {
        self.wave_speed_ms = self.wave_speed_ms.clamp(MIN_WAVE_SPEED_MS, MAX_WAVE_SPEED_MS);
        self.opacity = if self.opacity.is_finite() {
            self.opacity.clamp(0.0, 1.0)
        } else {
            Self::default().opacity
        };
    }

    /// Recompute period of the wave engine.
    #[must_use]
    pub const fn wave_period(&self) -> Duration {
        Duration::from_millis(self.wave_speed_ms)
    }
}

/// Partial settings update; absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wave_speed_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wave_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notifications_enabled: Option<bool>,
}

impl SettingsPatch {
    /// Whether the patch changes nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.wave_speed_ms.is_none()
            && self.wave_color.is_none()
            && self.opacity.is_none()
            && self.notifications_enabled.is_none()
    }
}

impl From<&Settings> for SettingsPatch {
    fn from(settings: &Settings) -> Self {
        Self {
            wave_speed_ms: Some(settings.wave_speed_ms),
            wave_color: Some(settings.wave_color.clone()),
            opacity: Some(settings.opacity),
            notifications_enabled: Some(settings.notifications_enabled),
        }
    }
}
