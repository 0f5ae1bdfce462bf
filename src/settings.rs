//! Device settings document, a JSON file on the SD card.
//!
//! Every key is optional: a hand-edited or partially written file keeps
//! defaults for whatever it omits, and unknown keys are ignored. The
//! core only consumes the refresh periods; the credentials and display
//! flags belong to the firmware collaborators.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// File name under the SD mount point.
pub const SETTINGS_FILE: &str = "settings.json";

/// Refresh periods below this are clamped up; sub-second display churn
/// starves the capture loop.
pub const MIN_PERIOD_MS: u32 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Station credentials for the SNTP sync at boot.
    pub wifi_ssid: String,
    pub wifi_password: String,
    /// Soft-AP credentials for the admin surface.
    pub server_wifi_ssid: String,
    pub server_wifi_password: String,
    /// Display refresh periods, milliseconds.
    pub short_oled_period: u32,
    pub medium_oled_period: u32,
    pub long_oled_period: u32,
    /// Include battery volts/current on the status page.
    pub display_battery_data: bool,
    /// Display mounted upside down.
    pub current_rotation: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_password: String::new(),
            server_wifi_ssid: String::from("probelog"),
            server_wifi_password: String::new(),
            short_oled_period: 10_000,
            medium_oled_period: 30_000,
            long_oled_period: 3_600_000,
            display_battery_data: false,
            current_rotation: false,
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| Error::Settings(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text =
            serde_json::to_string_pretty(self).map_err(|e| Error::Settings(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Boot-time load: a missing file is written back with defaults so
    /// it can be edited in place on the card.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let settings = Self::load(path)?;
            log::info!("settings loaded from {}", path.display());
            Ok(settings)
        } else {
            log::warn!("no settings file, writing defaults to {}", path.display());
            let settings = Self::default();
            settings.save(path)?;
            Ok(settings)
        }
    }

    pub fn short_period(&self) -> Duration {
        clamp_period(self.short_oled_period)
    }

    pub fn medium_period(&self) -> Duration {
        clamp_period(self.medium_oled_period)
    }

    pub fn long_period(&self) -> Duration {
        clamp_period(self.long_oled_period)
    }
}

fn clamp_period(ms: u32) -> Duration {
    Duration::from_millis(u64::from(ms.max(MIN_PERIOD_MS)))
}
