//! The smart shunt: runs calibration, protection, Coulomb counting and run-flat estimation once
//! per poll and produces one telemetry record.
//!
//! Maintenance operations (calibration, shunt selection, protection settings) persist
//! immediately and take effect without a restart.

use log::{info, warn};

use crate::bsp::power::PowerControl;
use crate::bsp::sensor::ShuntSensor;
use crate::bsp::switch::LoadSwitch;
use crate::bsp::transport::TelemetrySink;
use crate::calibration::{CalibrationEngine, CalibrationPoint, LinearCalibration, ShuntRating};
use crate::capacity::CapacityTracker;
use crate::error::{CalibrationError, StoreError};
use crate::protection::{AlertLatch, LoadState, ProtectionSettings, ProtectionStateMachine};
use crate::run_flat::RunFlatEstimator;
use crate::settings::{
    load_alert_enabled, load_protection_settings, load_shunt_rating, load_shunt_resistance,
    save_alert_enabled, save_capacity_snapshot, save_protection_settings, save_shunt,
    take_capacity_snapshot, MonitorConfig,
};
use crate::storage::KeyValueStore;
use crate::telemetry::{BatteryStatus, TelemetryRecord};

#[derive(Clone, Debug, PartialEq)]
pub enum PollOutcome {
    Telemetry(TelemetryRecord),
    /// Low-voltage disconnect, the MCU was sent to deep sleep and the cycle ended
    Sleeping,
}

pub struct SmartShunt<'a> {
    sensor: &'a dyn ShuntSensor,
    switch: &'a dyn LoadSwitch,
    power: &'a dyn PowerControl,
    store: &'a dyn KeyValueStore,
    alert: &'a AlertLatch,
    config: MonitorConfig,
    rating: ShuntRating,
    resistance_ohms: f32,
    calibration: CalibrationEngine,
    battery: CapacityTracker,
    run_flat: RunFlatEstimator,
    protection: ProtectionStateMachine,
    last_record: Option<TelemetryRecord>,
}

impl<'a> SmartShunt<'a> {
    pub fn new(
        config: MonitorConfig,
        sensor: &'a dyn ShuntSensor,
        switch: &'a dyn LoadSwitch,
        power: &'a dyn PowerControl,
        store: &'a dyn KeyValueStore,
        alert: &'a AlertLatch,
    ) -> Self {
        let mut protection =
            ProtectionStateMachine::new(config.protection, config.external_power_guard_v);
        protection.set_alert_enabled(config.alert_enabled);
        SmartShunt {
            sensor,
            switch,
            power,
            store,
            alert,
            config,
            rating: config.shunt_rating,
            resistance_ohms: config.shunt_resistance_ohms,
            calibration: CalibrationEngine::new(),
            battery: CapacityTracker::new(config.rated_capacity_ah),
            run_flat: RunFlatEstimator::new(config.run_flat_sample_interval_ms),
            protection,
            last_record: None,
        }
    }

    /// Loads the persisted configuration, sets up the sensor and connects the load
    pub fn start(&mut self) {
        let settings = load_protection_settings(self.store, self.config.protection);
        self.protection.set_settings(settings);
        self.protection
            .set_alert_enabled(load_alert_enabled(self.store, self.config.alert_enabled));

        self.rating = load_shunt_rating(self.store, self.config.shunt_rating);
        self.resistance_ohms = load_shunt_resistance(self.store, self.config.shunt_resistance_ohms);
        info!(
            "Shunt {}A, {} ohm",
            self.rating.amps(),
            self.resistance_ohms
        );
        self.sensor
            .configure(self.resistance_ohms, self.rating.amps() as f32);
        self.reload_calibration();

        if let Some(capacity_ah) = take_capacity_snapshot(self.store) {
            info!("Restored capacity {} Ah from snapshot", capacity_ah);
            self.battery.set_capacity(capacity_ah);
        }

        self.apply_alert_limit();
        self.switch.set_connected(self.protection.state().is_connected());
    }

    pub fn poll(&mut self, now_ms: u64) -> PollOutcome {
        let raw = self.sensor.read_raw();
        if raw.overflow {
            warn!("Sensor overflow, current and power are saturated");
        }
        let bus_voltage_v = finite_or_zero(raw.bus_voltage_v);
        let current_a = finite_or_zero(self.calibration.apply(finite_or_zero(raw.current_ma))) / 1000.0;

        let alert_pending = self.alert.take();
        if alert_pending {
            self.sensor.acknowledge_alert();
        }
        if let Some(event) = self.protection.step(alert_pending, bus_voltage_v, current_a) {
            self.switch.set_connected(self.protection.state().is_connected());
            if event.requires_sleep() {
                info!("Sleeping for {} ms", self.config.low_voltage_sleep_ms);
                self.power.deep_sleep(self.config.low_voltage_sleep_ms);
                return PollOutcome::Sleeping;
            }
        }

        self.battery.update(current_a, now_ms);
        let run_flat = self.run_flat.averaged(
            &self.battery,
            current_a,
            self.config.run_flat_warning_hours,
            now_ms,
        );

        let mut record = TelemetryRecord {
            message_id: self.config.message_id,
            data_changed: false,
            battery_voltage: bus_voltage_v,
            battery_current: current_a,
            battery_power: bus_voltage_v * current_a,
            battery_soc: self.battery.state_of_charge(),
            battery_capacity: self.battery.capacity_ah(),
            battery_state: BatteryStatus::classify(
                raw.overflow,
                !self.protection.state().is_connected(),
                run_flat.warning,
            ),
            run_flat_time: run_flat.text,
        };
        record.data_changed = self.last_record.as_ref() != Some(&record);
        let mut unchanged = record.clone();
        unchanged.data_changed = false;
        self.last_record = Some(unchanged);

        PollOutcome::Telemetry(record)
    }

    /// Encodes and sends `record`. A failed send is logged and dropped.
    pub fn publish(&self, sink: &dyn TelemetrySink, record: &TelemetryRecord) -> bool {
        match sink.send(&record.encode()) {
            Ok(()) => true,
            Err(error) => {
                warn!("Telemetry not sent: {}", error);
                false
            }
        }
    }

    /// Loads the table and the linear calibration of the active shunt
    pub fn reload_calibration(&mut self) {
        self.calibration.load_table(self.store, self.rating);
        self.calibration.load_linear(self.store, self.rating);
    }

    /// Switches to another shunt, using its nominal resistance unless one is given
    pub fn select_shunt(
        &mut self,
        rating: ShuntRating,
        resistance_ohms: Option<f32>,
    ) -> Result<(), StoreError> {
        let resistance_ohms = resistance_ohms
            .filter(|ohms| ohms.is_finite() && *ohms > 0.0)
            .unwrap_or_else(|| rating.nominal_resistance_ohms());
        self.rating = rating;
        self.resistance_ohms = resistance_ohms;
        self.sensor.configure(resistance_ohms, rating.amps() as f32);
        self.reload_calibration();
        self.apply_alert_limit();
        save_shunt(self.store, rating, resistance_ohms)
    }

    pub fn save_linear_calibration(
        &mut self,
        rating: ShuntRating,
        gain: f32,
        offset_ma: f32,
    ) -> Result<(), CalibrationError> {
        self.with_engine(rating, |engine, store| {
            engine.save_linear(store, rating, gain, offset_ma)
        })
    }

    /// Persisted linear calibration of `rating`, `None` when it was never saved
    pub fn load_linear_calibration(&mut self, rating: ShuntRating) -> Option<LinearCalibration> {
        self.with_engine(rating, |engine, store| {
            if engine.load_linear(store, rating) {
                Some(engine.linear())
            } else {
                None
            }
        })
    }

    pub fn save_calibration_table(
        &mut self,
        rating: ShuntRating,
        points: &[CalibrationPoint],
    ) -> Result<(), CalibrationError> {
        self.with_engine(rating, |engine, store| engine.save_table(store, rating, points))
    }

    pub fn load_calibration_table(&mut self, rating: ShuntRating) -> bool {
        self.with_engine(rating, |engine, store| engine.load_table(store, rating))
    }

    pub fn clear_calibration_table(&mut self, rating: ShuntRating) -> Result<(), CalibrationError> {
        self.with_engine(rating, |engine, store| engine.clear_table(store, rating))
    }

    /// Applies and persists new protection settings, invalid fields keep their defaults
    pub fn set_protection_settings(&mut self, settings: ProtectionSettings) -> Result<(), StoreError> {
        let settings = settings.sanitized(self.config.protection);
        self.protection.set_settings(settings);
        self.apply_alert_limit();
        save_protection_settings(self.store, &settings)
    }

    pub fn set_alert_enabled(&mut self, enabled: bool) -> Result<(), StoreError> {
        self.protection.set_alert_enabled(enabled);
        self.apply_alert_limit();
        save_alert_enabled(self.store, enabled)
    }

    /// Reconnects the load after an overcurrent disconnect
    pub fn reset_overcurrent(&mut self) -> bool {
        let reconnected = self.protection.reset_overcurrent();
        if reconnected {
            self.switch.set_connected(true);
        }
        reconnected
    }

    /// Runs a firmware update with the remaining capacity saved around it. When the update
    /// reboots, the capacity is restored by the next [SmartShunt::start].
    pub fn with_update_snapshot<R>(&mut self, update: impl FnOnce() -> R) -> R {
        if let Err(error) = save_capacity_snapshot(self.store, self.battery.capacity_ah()) {
            warn!("Capacity snapshot not saved: {}", error);
        }
        let result = update();
        if let Some(capacity_ah) = take_capacity_snapshot(self.store) {
            self.battery.set_capacity(capacity_ah);
        }
        result
    }

    pub fn battery(&self) -> &CapacityTracker {
        &self.battery
    }

    /// Seeds the remaining capacity, e.g. after a manual top-up
    pub fn set_capacity(&mut self, capacity_ah: f32) {
        self.battery.set_capacity(capacity_ah);
    }

    pub fn calibration(&self) -> &CalibrationEngine {
        &self.calibration
    }

    pub fn load_state(&self) -> LoadState {
        self.protection.state()
    }

    pub fn protection_settings(&self) -> ProtectionSettings {
        self.protection.settings()
    }

    pub fn alert_enabled(&self) -> bool {
        self.protection.alert_enabled()
    }

    pub fn shunt_rating(&self) -> ShuntRating {
        self.rating
    }

    pub fn shunt_resistance_ohms(&self) -> f32 {
        self.resistance_ohms
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    fn apply_alert_limit(&self) {
        let limit = if self.protection.alert_enabled() {
            Some(self.protection.settings().overcurrent_threshold)
        } else {
            None
        };
        self.sensor.set_alert_limit(limit);
    }

    /// Calibration of the active shunt is changed in place, others through a scratch engine
    fn with_engine<R>(
        &mut self,
        rating: ShuntRating,
        operation: impl FnOnce(&mut CalibrationEngine, &dyn KeyValueStore) -> R,
    ) -> R {
        if rating == self.rating {
            operation(&mut self.calibration, self.store)
        } else {
            operation(&mut CalibrationEngine::new(), self.store)
        }
    }
}

fn finite_or_zero(value: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}
