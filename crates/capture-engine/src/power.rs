//! Power-aware encoder profile adjustment.
//!
//! On battery the encoder is capped at 30 fps / 8 Mbps regardless of the
//! requested profile. Resolution is never touched.

use std::path::Path;

use serde::Serialize;

use crate::media::EncoderProfile;

const BATTERY_MAX_FPS: u32 = 30;
const BATTERY_MAX_BITRATE_BPS: u32 = 8_000_000;

/// Where the machine is drawing power from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    Ac,
    Battery,
    /// No power supply information (desktops, containers). Treated as AC.
    Unknown,
}

impl PowerState {
    /// Read the current state from the OS.
    pub fn detect() -> Self {
        Self::detect_from(Path::new("/sys/class/power_supply"))
    }

    /// Read power state from a sysfs-style `power_supply` directory.
    pub fn detect_from(root: &Path) -> Self {
        let Ok(entries) = std::fs::read_dir(root) else {
            return PowerState::Unknown;
        };

        let mut saw_mains = false;
        let mut saw_battery = false;
        for entry in entries.flatten() {
            let dir = entry.path();
            let kind = read_trimmed(&dir.join("type"));
            match kind.as_deref() {
                Some("Mains") | Some("USB") => {
                    saw_mains = true;
                    if read_trimmed(&dir.join("online")).as_deref() == Some("1") {
                        return PowerState::Ac;
                    }
                }
                Some("Battery") => saw_battery = true,
                _ => {}
            }
        }

        if saw_mains && saw_battery {
            PowerState::Battery
        } else {
            PowerState::Unknown
        }
    }

    pub fn is_on_battery(self) -> bool {
        self == PowerState::Battery
    }
}

fn read_trimmed(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
}

/// Clamp `requested` for the given power state.
pub fn clamp_for_power(requested: EncoderProfile, state: PowerState) -> EncoderProfile {
    if !state.is_on_battery() {
        tracing::info!(
            fps = requested.fps,
            bitrate_bps = requested.bitrate_bps,
            ?state,
            "Using requested encoder profile"
        );
        return requested;
    }

    let throttled = EncoderProfile {
        fps: requested.fps.min(BATTERY_MAX_FPS),
        bitrate_bps: requested.bitrate_bps.min(BATTERY_MAX_BITRATE_BPS),
        ..requested
    };
    tracing::info!(
        fps = throttled.fps,
        bitrate_bps = throttled.bitrate_bps,
        requested_fps = requested.fps,
        requested_bitrate_bps = requested.bitrate_bps,
        "On battery, throttling encoder profile"
    );
    throttled
}
