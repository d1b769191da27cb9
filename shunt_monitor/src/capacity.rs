//! Coulomb counting of the remaining battery capacity.

pub const SECONDS_PER_HOUR: f32 = 3600.0;

/// Remaining capacity, integrated from the calibrated current over irregular time steps.
/// Positive current discharges the battery, negative current charges it.
#[derive(Clone, Debug)]
pub struct CapacityTracker {
    capacity_ah: f32,
    max_capacity_ah: f32,
    last_update_ms: Option<u64>,
}

impl CapacityTracker {
    /// A full battery of the given rated capacity
    pub fn new(rated_capacity_ah: f32) -> Self {
        let max_capacity_ah = if rated_capacity_ah.is_finite() && rated_capacity_ah > 0.0 {
            rated_capacity_ah
        } else {
            0.0
        };
        CapacityTracker {
            capacity_ah: max_capacity_ah,
            max_capacity_ah,
            last_update_ms: None,
        }
    }

    /// Integrates `current_a` over the time since the previous update. The first update only
    /// records the time base.
    pub fn update(&mut self, current_a: f32, now_ms: u64) {
        let last_update_ms = match self.last_update_ms.replace(now_ms) {
            Some(last) => last,
            None => return,
        };
        if !current_a.is_finite() {
            return;
        }
        let elapsed_s = now_ms.saturating_sub(last_update_ms) as f32 / 1000.0;
        let delta_ah = current_a * elapsed_s / SECONDS_PER_HOUR;
        self.set_capacity(self.capacity_ah - delta_ah);
    }

    /// Seeds the remaining capacity, e.g. from a snapshot. Does not touch the time base.
    pub fn set_capacity(&mut self, capacity_ah: f32) {
        if capacity_ah.is_nan() {
            return;
        }
        self.capacity_ah = if capacity_ah < 0.0 {
            0.0
        } else if capacity_ah > self.max_capacity_ah {
            self.max_capacity_ah
        } else {
            capacity_ah
        };
    }

    pub fn capacity_ah(&self) -> f32 {
        self.capacity_ah
    }

    pub fn max_capacity_ah(&self) -> f32 {
        self.max_capacity_ah
    }

    /// Fraction of the rated capacity remaining, 0..=1
    pub fn state_of_charge(&self) -> f32 {
        if self.max_capacity_ah > 0.0 {
            self.capacity_ah / self.max_capacity_ah
        } else {
            0.0
        }
    }
}
