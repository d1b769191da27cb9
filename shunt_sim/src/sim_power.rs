use std::cell::Cell;

use shunt_monitor::bsp::power::PowerControl;

/// Records the sleep request, the main loop plays the sleep and the wake-up reboot
pub struct SimPower {
    requested_sleep_ms: Cell<Option<u32>>,
}

impl SimPower {
    pub fn create() -> Self {
        SimPower {
            requested_sleep_ms: Cell::new(None),
        }
    }

    pub fn take_sleep_request(&self) -> Option<u32> {
        self.requested_sleep_ms.take()
    }
}

impl PowerControl for SimPower {
    fn deep_sleep(&self, duration_ms: u32) {
        self.requested_sleep_ms.set(Some(duration_ms));
    }
}
