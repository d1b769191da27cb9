use std::cell::Cell;

use shunt_monitor::bsp::sensor::{RawReading, ShuntSensor};
use shunt_monitor::bsp::switch::LoadSwitch;
use shunt_monitor::protection::AlertLatch;

/// Largest shunt voltage the sense chip converts, beyond it the reading saturates
const SHUNT_RANGE_MV: f32 = 81.92;
const INTERNAL_RESISTANCE_OHMS: f32 = 0.02;
/// Error of the uncalibrated chip, see [SimBattery::factory_calibration]
const SENSOR_GAIN: f32 = 1.03;
const SENSOR_OFFSET_MA: f32 = 40.0;

/// Battery, load, shunt and current-sense chip in one piece.
///
/// Positive load current discharges the battery. The chip raises the alert (the interrupt
/// on hardware) when a conversion exceeds the armed limit.
pub struct SimBattery {
    open_circuit_v: Cell<f32>,
    load_a: Cell<f32>,
    connected: Cell<bool>,
    resistance_ohms: Cell<f32>,
    alert_limit_a: Cell<Option<f32>>,
    alert_pin: &'static AlertLatch,
}

impl SimBattery {
    pub fn create(open_circuit_v: f32, load_a: f32, alert_pin: &'static AlertLatch) -> Self {
        SimBattery {
            open_circuit_v: Cell::new(open_circuit_v),
            load_a: Cell::new(load_a),
            connected: Cell::new(false),
            resistance_ohms: Cell::new(0.001),
            alert_limit_a: Cell::new(None),
            alert_pin,
        }
    }

    /// Gain and offset which undo the error of the simulated chip
    pub fn factory_calibration() -> (f32, f32) {
        (1.0 / SENSOR_GAIN, -SENSOR_OFFSET_MA / SENSOR_GAIN)
    }

    pub fn change_voltage(&self, delta_v: f32) {
        let voltage = (self.open_circuit_v.get() + delta_v).clamp(0.0, 16.0);
        self.open_circuit_v.set(voltage);
    }

    pub fn change_load(&self, delta_a: f32) {
        self.load_a.set(self.load_a.get() + delta_a);
    }

    pub fn open_circuit_v(&self) -> f32 {
        self.open_circuit_v.get()
    }

    pub fn load_a(&self) -> f32 {
        self.load_a.get()
    }

    pub fn alert_limit_a(&self) -> Option<f32> {
        self.alert_limit_a.get()
    }

    fn flowing_a(&self) -> f32 {
        if self.connected.get() {
            self.load_a.get()
        } else {
            0.0
        }
    }
}

impl ShuntSensor for SimBattery {
    fn read_raw(&self) -> RawReading {
        let current_a = self.flowing_a();
        let resistance_ohms = self.resistance_ohms.get();
        let bus_voltage_v = self.open_circuit_v.get() - current_a * INTERNAL_RESISTANCE_OHMS;

        let shunt_mv = current_a * resistance_ohms * 1000.0;
        let overflow = shunt_mv.abs() > SHUNT_RANGE_MV;
        let shunt_voltage_mv = shunt_mv.clamp(-SHUNT_RANGE_MV, SHUNT_RANGE_MV);
        let measured_a = shunt_voltage_mv / 1000.0 / resistance_ohms;
        let current_ma = measured_a * 1000.0 * SENSOR_GAIN + SENSOR_OFFSET_MA;

        if let Some(limit_a) = self.alert_limit_a.get() {
            if measured_a.abs() > limit_a {
                self.alert_pin.signal();
            }
        }

        RawReading {
            shunt_voltage_mv,
            bus_voltage_v,
            current_ma,
            power_mw: bus_voltage_v * current_ma,
            overflow,
        }
    }

    fn configure(&self, resistance_ohms: f32, _rated_amps: f32) {
        self.resistance_ohms.set(resistance_ohms);
    }

    fn set_alert_limit(&self, limit_amps: Option<f32>) {
        self.alert_limit_a.set(limit_amps);
    }

    /// The modelled chip raises the alert per conversion and latches nothing
    fn acknowledge_alert(&self) {}
}

impl LoadSwitch for SimBattery {
    fn set_connected(&self, connected: bool) {
        self.connected.set(connected);
    }

    fn is_connected(&self) -> bool {
        self.connected.get()
    }
}
