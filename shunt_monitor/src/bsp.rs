pub mod sensor {
    /// One conversion of the current-sense chip, before any calibration is applied
    #[derive(Clone, Copy, Debug, Default, PartialEq)]
    pub struct RawReading {
        pub shunt_voltage_mv: f32,
        pub bus_voltage_v: f32,
        pub current_ma: f32,
        pub power_mw: f32,
        /// The shunt voltage exceeded the range of the chip, current and power are saturated
        pub overflow: bool,
    }

    impl RawReading {
        /// Voltage on the load side of the shunt
        pub fn load_voltage_v(&self) -> f32 {
            self.bus_voltage_v + self.shunt_voltage_mv / 1000.0
        }
    }

    /// Current-sense chip sitting across the shunt
    pub trait ShuntSensor {
        fn read_raw(&self) -> RawReading;
        fn configure(&self, resistance_ohms: f32, rated_amps: f32);
        /// Arms the alert output of the chip at the given current, `None` disarms it
        fn set_alert_limit(&self, limit_amps: Option<f32>);
        /// Clears the alert condition latched in the chip
        fn acknowledge_alert(&self);
    }
}

pub mod switch {
    /// MOSFET or relay between the battery and the load
    pub trait LoadSwitch {
        fn set_connected(&self, connected: bool);
        fn is_connected(&self) -> bool;
    }
}

pub mod power {
    pub trait PowerControl {
        /// Suspends the MCU until a timer wakes it up. On hardware this never returns,
        /// the wake-up restarts the firmware from the beginning.
        fn deep_sleep(&self, duration_ms: u32);
    }
}

pub mod transport {
    use crate::error::TransportError;

    /// Radio link which broadcasts encoded telemetry frames
    pub trait TelemetrySink {
        fn send(&self, frame: &[u8]) -> Result<(), TransportError>;
    }
}

#[cfg(test)]
mod test {
    use crate::bsp::sensor::RawReading;

    #[test]
    fn load_voltage_adds_shunt_drop() {
        let reading = RawReading {
            shunt_voltage_mv: 50.0,
            bus_voltage_v: 12.0,
            ..RawReading::default()
        };
        assert!(libm::fabsf(reading.load_voltage_v() - 12.05) < 1e-5);

        let charging = RawReading {
            shunt_voltage_mv: -25.0,
            bus_voltage_v: 13.5,
            ..RawReading::default()
        };
        assert!(libm::fabsf(charging.load_voltage_v() - 13.475) < 1e-5);
    }
}
