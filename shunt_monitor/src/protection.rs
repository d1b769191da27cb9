//! Load protection.
//!
//! Disconnects the load when the battery voltage drops below the cutoff (and puts the MCU to
//! sleep) or when the current exceeds the overcurrent threshold. A low-voltage disconnect
//! recovers once the voltage climbs above cutoff + hysteresis, an overcurrent disconnect only
//! by an explicit reset.
//!
//! Pure logic, the caller drives the switch and the sleep. Fully testable on host.

use core::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProtectionSettings {
    /// Battery voltage (V) below which the load is disconnected
    pub low_voltage_cutoff: f32,
    /// Extra voltage (V) above the cutoff required to reconnect
    pub hysteresis: f32,
    /// Current magnitude (A) above which the load is disconnected
    pub overcurrent_threshold: f32,
}

impl ProtectionSettings {
    pub const DEFAULT: ProtectionSettings = ProtectionSettings {
        low_voltage_cutoff: 11.6,
        hysteresis: 0.6,
        overcurrent_threshold: 50.0,
    };

    pub fn reconnect_voltage(&self) -> f32 {
        self.low_voltage_cutoff + self.hysteresis
    }

    /// Replaces out-of-range fields with the corresponding field of `fallback`
    pub fn sanitized(self, fallback: ProtectionSettings) -> Self {
        ProtectionSettings {
            low_voltage_cutoff: if self.low_voltage_cutoff.is_finite() {
                self.low_voltage_cutoff
            } else {
                fallback.low_voltage_cutoff
            },
            hysteresis: if self.hysteresis.is_finite() && self.hysteresis >= 0.0 {
                self.hysteresis
            } else {
                fallback.hysteresis
            },
            overcurrent_threshold: if self.overcurrent_threshold.is_finite()
                && self.overcurrent_threshold > 0.0
            {
                self.overcurrent_threshold
            } else {
                fallback.overcurrent_threshold
            },
        }
    }
}

impl Default for ProtectionSettings {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    LowVoltage,
    Overcurrent,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadState {
    Connected,
    Disconnected(DisconnectReason),
}

impl LoadState {
    pub fn is_connected(self) -> bool {
        self == LoadState::Connected
    }

    pub fn disconnect_reason(self) -> Option<DisconnectReason> {
        match self {
            LoadState::Connected => None,
            LoadState::Disconnected(reason) => Some(reason),
        }
    }
}

/// Set from the alert interrupt of the sensor, consumed by the next poll.
///
/// The interrupt handler must only call [AlertLatch::signal].
pub struct AlertLatch {
    pending: AtomicBool,
}

impl AlertLatch {
    pub const fn new() -> Self {
        AlertLatch {
            pending: AtomicBool::new(false),
        }
    }

    /// Lock-free, safe to call from interrupt context
    pub fn signal(&self) {
        self.pending.store(true, Ordering::Release);
    }

    /// Clears the latch and reports whether it was set
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }
}

impl Default for AlertLatch {
    fn default() -> Self {
        Self::new()
    }
}

/// Transition taken during one poll
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProtectionEvent {
    LowVoltageTrip,
    OvercurrentTrip,
    /// Overcurrent signalled by the hardware alert
    AlertTrip,
    Reconnected,
}

impl ProtectionEvent {
    /// Low-voltage trips end the poll cycle in deep sleep
    pub fn requires_sleep(self) -> bool {
        self == ProtectionEvent::LowVoltageTrip
    }
}

pub struct ProtectionStateMachine {
    settings: ProtectionSettings,
    /// Below this bus voltage the device runs from external power without a battery
    external_power_guard_v: f32,
    alert_enabled: bool,
    state: LoadState,
}

impl ProtectionStateMachine {
    pub fn new(settings: ProtectionSettings, external_power_guard_v: f32) -> Self {
        ProtectionStateMachine {
            settings,
            external_power_guard_v,
            alert_enabled: true,
            state: LoadState::Connected,
        }
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn settings(&self) -> ProtectionSettings {
        self.settings
    }

    pub fn set_settings(&mut self, settings: ProtectionSettings) {
        self.settings = settings;
    }

    pub fn alert_enabled(&self) -> bool {
        self.alert_enabled
    }

    pub fn set_alert_enabled(&mut self, enabled: bool) {
        self.alert_enabled = enabled;
    }

    /// One protection step: the thresholds are checked first, then a pending alert is serviced.
    /// A low-voltage trip is never masked by an alert in the same step.
    pub fn step(
        &mut self,
        alert_pending: bool,
        bus_voltage_v: f32,
        current_a: f32,
    ) -> Option<ProtectionEvent> {
        let threshold_event = self.evaluate(bus_voltage_v, current_a);
        let alert_event = if alert_pending {
            self.service_alert()
        } else {
            None
        };
        alert_event.or(threshold_event)
    }

    /// Forces an overcurrent disconnect for a latched hardware alert, unless alerting is
    /// disabled or the load is already disconnected
    pub fn service_alert(&mut self) -> Option<ProtectionEvent> {
        if !self.alert_enabled {
            debug!("Alert ignored, hardware alerting disabled");
            return None;
        }
        if self.state.is_connected() {
            warn!("Hardware alert, disconnecting load");
            self.state = LoadState::Disconnected(DisconnectReason::Overcurrent);
            Some(ProtectionEvent::AlertTrip)
        } else {
            None
        }
    }

    pub fn evaluate(&mut self, bus_voltage_v: f32, current_a: f32) -> Option<ProtectionEvent> {
        if bus_voltage_v < self.external_power_guard_v {
            return None;
        }
        match self.state {
            LoadState::Connected if bus_voltage_v < self.settings.low_voltage_cutoff => {
                warn!(
                    "Battery at {} V below cutoff {} V, disconnecting load",
                    bus_voltage_v, self.settings.low_voltage_cutoff
                );
                self.state = LoadState::Disconnected(DisconnectReason::LowVoltage);
                Some(ProtectionEvent::LowVoltageTrip)
            }
            LoadState::Connected
                if libm::fabsf(current_a) > self.settings.overcurrent_threshold =>
            {
                warn!(
                    "Current {} A above {} A, disconnecting load",
                    current_a, self.settings.overcurrent_threshold
                );
                self.state = LoadState::Disconnected(DisconnectReason::Overcurrent);
                Some(ProtectionEvent::OvercurrentTrip)
            }
            LoadState::Disconnected(DisconnectReason::LowVoltage)
                if bus_voltage_v > self.settings.reconnect_voltage() =>
            {
                info!("Battery recovered to {} V, reconnecting load", bus_voltage_v);
                self.state = LoadState::Connected;
                Some(ProtectionEvent::Reconnected)
            }
            _ => None,
        }
    }

    /// Manual recovery from an overcurrent disconnect. Returns whether the load reconnected.
    pub fn reset_overcurrent(&mut self) -> bool {
        if self.state == LoadState::Disconnected(DisconnectReason::Overcurrent) {
            info!("Overcurrent reset, reconnecting load");
            self.state = LoadState::Connected;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod test {
    use crate::protection::{
        AlertLatch, DisconnectReason, LoadState, ProtectionEvent, ProtectionSettings,
        ProtectionStateMachine,
    };

    const GUARD_V: f32 = 5.5;

    fn settings() -> ProtectionSettings {
        ProtectionSettings {
            low_voltage_cutoff: 9.0,
            hysteresis: 0.5,
            overcurrent_threshold: 50.0,
        }
    }

    fn machine() -> ProtectionStateMachine {
        ProtectionStateMachine::new(settings(), GUARD_V)
    }

    #[test]
    fn starts_connected() {
        assert_eq!(machine().state(), LoadState::Connected);
    }

    #[test]
    fn low_voltage_disconnects_and_sleeps() {
        let mut protection = machine();
        let event = protection.step(false, 8.9, 1.0);
        assert_eq!(event, Some(ProtectionEvent::LowVoltageTrip));
        assert!(event.unwrap().requires_sleep());
        assert_eq!(
            protection.state(),
            LoadState::Disconnected(DisconnectReason::LowVoltage)
        );
    }

    #[test]
    fn overcurrent_disconnects_without_sleep() {
        let mut protection = machine();
        let event = protection.step(false, 12.8, 51.0);
        assert_eq!(event, Some(ProtectionEvent::OvercurrentTrip));
        assert!(!event.unwrap().requires_sleep());
        assert_eq!(
            protection.state().disconnect_reason(),
            Some(DisconnectReason::Overcurrent)
        );
    }

    #[test]
    fn charge_overcurrent_also_disconnects() {
        let mut protection = machine();
        assert_eq!(
            protection.step(false, 14.2, -60.0),
            Some(ProtectionEvent::OvercurrentTrip)
        );
    }

    #[test]
    fn low_voltage_has_priority_over_overcurrent() {
        let mut protection = machine();
        assert_eq!(
            protection.step(false, 8.0, 80.0),
            Some(ProtectionEvent::LowVoltageTrip)
        );
    }

    #[test]
    fn reconnects_above_hysteresis_band() {
        let mut protection = machine();
        protection.step(false, 8.9, 0.0);

        // inside the band nothing changes
        assert_eq!(protection.step(false, 9.2, 0.0), None);
        assert_eq!(protection.step(false, 9.5, 0.0), None);
        assert!(!protection.state().is_connected());

        assert_eq!(
            protection.step(false, 9.6, 0.0),
            Some(ProtectionEvent::Reconnected)
        );
        assert!(protection.state().is_connected());
    }

    #[test]
    fn overcurrent_does_not_recover_by_itself() {
        let mut protection = machine();
        protection.step(false, 12.8, 51.0);
        for _ in 0..10 {
            assert_eq!(protection.step(false, 13.0, 0.0), None);
        }
        assert!(protection.reset_overcurrent());
        assert!(protection.state().is_connected());
        assert!(!protection.reset_overcurrent());
    }

    #[test]
    fn external_power_skips_protection() {
        let mut protection = machine();
        assert_eq!(protection.step(false, 5.0, 80.0), None);
        assert!(protection.state().is_connected());
    }

    #[test]
    fn alert_forces_overcurrent_disconnect() {
        let mut protection = machine();
        assert_eq!(
            protection.step(true, 12.8, 1.0),
            Some(ProtectionEvent::AlertTrip)
        );
        assert_eq!(
            protection.state(),
            LoadState::Disconnected(DisconnectReason::Overcurrent)
        );
    }

    #[test]
    fn alert_is_serviced_on_external_power() {
        let mut protection = machine();
        assert_eq!(
            protection.step(true, 5.0, 0.0),
            Some(ProtectionEvent::AlertTrip)
        );
    }

    #[test]
    fn disabled_alert_only_clears() {
        let mut protection = machine();
        protection.set_alert_enabled(false);
        assert_eq!(protection.step(true, 12.8, 1.0), None);
        assert!(protection.state().is_connected());
    }

    #[test]
    fn alert_does_not_mask_low_voltage_trip() {
        let mut protection = machine();
        let event = protection.step(true, 8.9, 1.0);
        assert_eq!(event, Some(ProtectionEvent::LowVoltageTrip));
        assert!(event.unwrap().requires_sleep());
        assert_eq!(
            protection.state(),
            LoadState::Disconnected(DisconnectReason::LowVoltage)
        );
    }

    #[test]
    fn alert_after_reconnect_disconnects_again() {
        let mut protection = machine();
        protection.step(false, 8.9, 0.0);
        assert_eq!(
            protection.step(true, 9.6, 0.0),
            Some(ProtectionEvent::AlertTrip)
        );
        assert_eq!(
            protection.state(),
            LoadState::Disconnected(DisconnectReason::Overcurrent)
        );
    }

    #[test]
    fn alert_while_low_voltage_disconnected_keeps_reason() {
        let mut protection = machine();
        protection.step(false, 8.9, 0.0);
        assert_eq!(protection.step(true, 9.0, 0.0), None);
        assert_eq!(
            protection.state(),
            LoadState::Disconnected(DisconnectReason::LowVoltage)
        );
    }

    #[test]
    fn latch_is_cleared_by_take() {
        let latch = AlertLatch::new();
        assert!(!latch.take());
        latch.signal();
        assert!(latch.is_pending());
        assert!(latch.take());
        assert!(!latch.take());
    }

    #[test]
    fn sanitize_replaces_invalid_fields() {
        let stored = ProtectionSettings {
            low_voltage_cutoff: 10.5,
            hysteresis: -1.0,
            overcurrent_threshold: 0.0,
        };
        assert_eq!(
            stored.sanitized(ProtectionSettings::DEFAULT),
            ProtectionSettings {
                low_voltage_cutoff: 10.5,
                hysteresis: 0.6,
                overcurrent_threshold: 50.0,
            }
        );
    }
}
