//! Time until the battery is flat (or full), in words.
//!
//! The instantaneous estimate jumps with every load change, so the reported value is the mean
//! of run-hours samples taken on a fixed clock interval over the last half hour.

use core::fmt::Write;

use heapless::{HistoryBuf, String};

use crate::capacity::CapacityTracker;

/// Text capacity, one byte of the 40 byte telemetry field is kept for the terminator
pub const RUN_FLAT_TEXT_LEN: usize = 39;
/// Currents below this (A) are treated as no current at all
pub const IDLE_CURRENT_A: f32 = 0.001;
/// Charge currents must exceed this (A) before the battery is considered charging
pub const CHARGE_GUARD_A: f32 = 0.01;
/// Fraction of the rated capacity above which a charging battery counts as full
pub const FULL_FRACTION: f32 = 0.995;
pub const MAX_RUN_FLAT_HOURS: f32 = 24.0 * 7.0;
/// 30 minutes of samples at 10 second intervals
pub const SAMPLE_CAPACITY: usize = 180;
pub const MIN_SAMPLES_FOR_AVERAGE: usize = 3;

pub const FULLY_CHARGED: &str = "Fully Charged!";
pub const OVER_A_WEEK: &str = "> 7 days";
pub const GATHERING_DATA: &str = "Gathering data...";

const MINUTES_PER_DAY: u32 = 24 * 60;

pub type RunFlatText = String<RUN_FLAT_TEXT_LEN>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunFlat {
    pub text: RunFlatText,
    /// The battery is discharging and will be flat within the warning threshold
    pub warning: bool,
}

impl RunFlat {
    fn label(text: &str) -> Self {
        RunFlat {
            text: RunFlatText::try_from(text).unwrap_or_default(),
            warning: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Direction {
    UntilFlat,
    UntilFull,
}

/// Classifies the instantaneous `current_a` against the battery state, e.g.
/// `"2 days 2 hours until flat"`
pub fn format_run_flat(battery: &CapacityTracker, current_a: f32, warning_hours: f32) -> RunFlat {
    let capacity_ah = battery.capacity_ah();
    let max_capacity_ah = battery.max_capacity_ah();
    let full = capacity_ah >= max_capacity_ah * FULL_FRACTION;

    let (run_hours, direction) = if current_a > IDLE_CURRENT_A {
        (capacity_ah / current_a, Direction::UntilFlat)
    } else if current_a < -CHARGE_GUARD_A && !full {
        ((max_capacity_ah - capacity_ah) / -current_a, Direction::UntilFull)
    } else {
        return RunFlat::label(FULLY_CHARGED);
    };

    if run_hours.is_nan() {
        return RunFlat::label(FULLY_CHARGED);
    }
    classify_hours(run_hours, direction, warning_hours)
}

fn classify_hours(run_hours: f32, direction: Direction, warning_hours: f32) -> RunFlat {
    if run_hours > MAX_RUN_FLAT_HOURS {
        return RunFlat::label(OVER_A_WEEK);
    }
    let run_hours = libm::fmaxf(run_hours, 0.0);

    RunFlat {
        text: render(run_hours, direction),
        warning: direction == Direction::UntilFlat && run_hours <= warning_hours,
    }
}

fn render(run_hours: f32, direction: Direction) -> RunFlatText {
    let total_minutes = (run_hours * 60.0) as u32;
    let days = total_minutes / MINUTES_PER_DAY;
    let hours = total_minutes % MINUTES_PER_DAY / 60;
    let minutes = total_minutes % 60;

    // "6 days 23 hours until flat" is the longest text, well within the capacity
    let mut text = RunFlatText::new();
    if days > 0 {
        let _ = write!(text, "{} {} ", days, plural(days, "day", "days"));
    }
    if hours > 0 {
        let _ = write!(text, "{} {} ", hours, plural(hours, "hour", "hours"));
    }
    if days == 0 && hours == 0 {
        let _ = write!(text, "{} {} ", minutes, plural(minutes, "minute", "minutes"));
    }
    let _ = match direction {
        Direction::UntilFlat => text.push_str("until flat"),
        Direction::UntilFull => text.push_str("until full"),
    };
    text
}

fn plural<'a>(count: u32, one: &'a str, many: &'a str) -> &'a str {
    if count == 1 {
        one
    } else {
        many
    }
}

/// Averages run-hours samples taken every `sample_interval_ms`, independent of how often it is
/// asked. Between samples the previous answer is repeated.
pub struct RunFlatEstimator {
    samples: HistoryBuf<f32, SAMPLE_CAPACITY>,
    sample_interval_ms: u64,
    last_sample_ms: u64,
    latest: RunFlat,
}

impl RunFlatEstimator {
    /// Sampling starts one interval after boot (time 0)
    pub fn new(sample_interval_ms: u64) -> Self {
        RunFlatEstimator {
            samples: HistoryBuf::new(),
            sample_interval_ms,
            last_sample_ms: 0,
            latest: RunFlat::label(GATHERING_DATA),
        }
    }

    /// Only discharge samples are kept, so the estimate always reads "until flat"
    pub fn averaged(
        &mut self,
        battery: &CapacityTracker,
        current_a: f32,
        warning_hours: f32,
        now_ms: u64,
    ) -> RunFlat {
        if now_ms.saturating_sub(self.last_sample_ms) < self.sample_interval_ms {
            return self.latest.clone();
        }
        self.last_sample_ms = now_ms;

        if current_a > IDLE_CURRENT_A {
            let run_hours = battery.capacity_ah() / current_a;
            if run_hours.is_finite() {
                self.samples.write(run_hours);
            }
        }

        self.latest = match self.estimated_hours() {
            Some(hours) => classify_hours(hours, Direction::UntilFlat, warning_hours),
            None => RunFlat::label(GATHERING_DATA),
        };
        self.latest.clone()
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    fn estimated_hours(&self) -> Option<f32> {
        if self.samples.len() < MIN_SAMPLES_FOR_AVERAGE {
            return self.samples.recent().copied();
        }
        let sum: f32 = self.samples.as_slice().iter().sum();
        Some(sum / self.samples.len() as f32)
    }
}
