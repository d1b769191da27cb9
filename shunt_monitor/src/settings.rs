//! Startup configuration and the persisted settings outside of calibration.
//!
//! Everything is read once at startup. A missing or corrupt entry falls back to the value in
//! [MonitorConfig].

use log::{info, warn};

use crate::calibration::ShuntRating;
use crate::error::StoreError;
use crate::protection::ProtectionSettings;
use crate::storage::KeyValueStore;

pub const PROTECTION_NAMESPACE: &str = "protect";
pub const SHUNT_NAMESPACE: &str = "shunt";
pub const BATTERY_NAMESPACE: &str = "battery";

const KEY_CUTOFF: &str = "lv_cut";
const KEY_HYSTERESIS: &str = "lv_hyst";
const KEY_OVERCURRENT: &str = "oc_thr";
const KEY_ALERT_ENABLED: &str = "alert_en";
const KEY_RATING: &str = "rating";
const KEY_RESISTANCE: &str = "res_ohm";
const KEY_SNAPSHOT: &str = "snap_ah";

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MonitorConfig {
    pub rated_capacity_ah: f32,
    pub shunt_rating: ShuntRating,
    pub shunt_resistance_ohms: f32,
    /// Below this bus voltage the board is powered externally and protection is skipped
    pub external_power_guard_v: f32,
    pub run_flat_warning_hours: f32,
    pub run_flat_sample_interval_ms: u64,
    pub low_voltage_sleep_ms: u32,
    pub message_id: i32,
    pub protection: ProtectionSettings,
    pub alert_enabled: bool,
}

impl MonitorConfig {
    pub const DEFAULT: MonitorConfig = MonitorConfig {
        rated_capacity_ah: 100.0,
        shunt_rating: ShuntRating::A100,
        // measured on the reference unit, nominal would be 0.00075
        shunt_resistance_ohms: 0.001078,
        external_power_guard_v: 5.5,
        run_flat_warning_hours: 10.0,
        run_flat_sample_interval_ms: 10_000,
        low_voltage_sleep_ms: 60 * 60 * 1000,
        message_id: 1,
        protection: ProtectionSettings::DEFAULT,
        alert_enabled: true,
    };
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Reads the protection settings, field by field, falling back to `fallback`
pub fn load_protection_settings(
    store: &dyn KeyValueStore,
    fallback: ProtectionSettings,
) -> ProtectionSettings {
    let stored = ProtectionSettings {
        low_voltage_cutoff: store
            .get_f32(PROTECTION_NAMESPACE, KEY_CUTOFF)
            .unwrap_or(fallback.low_voltage_cutoff),
        hysteresis: store
            .get_f32(PROTECTION_NAMESPACE, KEY_HYSTERESIS)
            .unwrap_or(fallback.hysteresis),
        overcurrent_threshold: store
            .get_f32(PROTECTION_NAMESPACE, KEY_OVERCURRENT)
            .unwrap_or(fallback.overcurrent_threshold),
    };
    let settings = stored.sanitized(fallback);
    if settings != stored {
        warn!("Stored protection settings out of range, using defaults for invalid fields");
    }
    info!(
        "Protection: cutoff {} V, hysteresis {} V, overcurrent {} A",
        settings.low_voltage_cutoff, settings.hysteresis, settings.overcurrent_threshold
    );
    settings
}

pub fn save_protection_settings(
    store: &dyn KeyValueStore,
    settings: &ProtectionSettings,
) -> Result<(), StoreError> {
    store.put_f32(PROTECTION_NAMESPACE, KEY_CUTOFF, settings.low_voltage_cutoff)?;
    store.put_f32(PROTECTION_NAMESPACE, KEY_HYSTERESIS, settings.hysteresis)?;
    store.put_f32(PROTECTION_NAMESPACE, KEY_OVERCURRENT, settings.overcurrent_threshold)
}

pub fn load_alert_enabled(store: &dyn KeyValueStore, fallback: bool) -> bool {
    store
        .get_u32(PROTECTION_NAMESPACE, KEY_ALERT_ENABLED)
        .map(|value| value != 0)
        .unwrap_or(fallback)
}

pub fn save_alert_enabled(store: &dyn KeyValueStore, enabled: bool) -> Result<(), StoreError> {
    store.put_u32(PROTECTION_NAMESPACE, KEY_ALERT_ENABLED, enabled as u32)
}

pub fn load_shunt_rating(store: &dyn KeyValueStore, fallback: ShuntRating) -> ShuntRating {
    match store.get_u32(SHUNT_NAMESPACE, KEY_RATING) {
        Some(amps) => ShuntRating::from_amps(amps).unwrap_or_else(|| {
            warn!("Unknown shunt rating {}A, using {}A", amps, fallback.amps());
            fallback
        }),
        None => fallback,
    }
}

/// Reads the shunt resistance, only positive values are accepted
pub fn load_shunt_resistance(store: &dyn KeyValueStore, fallback: f32) -> f32 {
    match store.get_f32(SHUNT_NAMESPACE, KEY_RESISTANCE) {
        Some(ohms) if ohms > 0.0 => ohms,
        Some(ohms) => {
            warn!("Invalid shunt resistance {} ohm, using {} ohm", ohms, fallback);
            fallback
        }
        None => fallback,
    }
}

pub fn save_shunt(
    store: &dyn KeyValueStore,
    rating: ShuntRating,
    resistance_ohms: f32,
) -> Result<(), StoreError> {
    store.put_u32(SHUNT_NAMESPACE, KEY_RATING, rating.amps() as u32)?;
    store.put_f32(SHUNT_NAMESPACE, KEY_RESISTANCE, resistance_ohms)
}

pub fn save_capacity_snapshot(store: &dyn KeyValueStore, capacity_ah: f32) -> Result<(), StoreError> {
    store.put_f32(BATTERY_NAMESPACE, KEY_SNAPSHOT, capacity_ah)
}

/// Reads and removes the capacity snapshot, so it is restored at most once
pub fn take_capacity_snapshot(store: &dyn KeyValueStore) -> Option<f32> {
    let snapshot = store.get_f32(BATTERY_NAMESPACE, KEY_SNAPSHOT);
    if store.exists(BATTERY_NAMESPACE, KEY_SNAPSHOT) {
        if let Err(error) = store.remove(BATTERY_NAMESPACE, KEY_SNAPSHOT) {
            warn!("Capacity snapshot not removed: {}", error);
        }
    }
    snapshot
}
