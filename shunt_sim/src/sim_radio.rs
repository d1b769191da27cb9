use std::cell::{Cell, RefCell};

use log::debug;
use shunt_monitor::bsp::transport::TelemetrySink;
use shunt_monitor::error::TransportError;
use shunt_monitor::telemetry::TelemetryRecord;

/// Receiving end of the broadcast, decodes every frame like a display unit would
pub struct SimRadio {
    frames: Cell<u32>,
    last: RefCell<Option<TelemetryRecord>>,
}

impl SimRadio {
    pub fn create() -> Self {
        SimRadio {
            frames: Cell::new(0),
            last: RefCell::new(None),
        }
    }

    pub fn frames(&self) -> u32 {
        self.frames.get()
    }

    pub fn last_received(&self) -> Option<TelemetryRecord> {
        self.last.borrow().clone()
    }
}

impl TelemetrySink for SimRadio {
    fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        let record = TelemetryRecord::decode(frame).map_err(|error| {
            debug!("Receiver rejected frame: {}", error);
            TransportError::SendFailed
        })?;
        self.frames.set(self.frames.get() + 1);
        self.last.replace(Some(record));
        Ok(())
    }
}
