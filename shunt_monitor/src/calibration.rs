//! Current calibration.
//!
//! Each shunt rating owns a linear correction (`true = raw * gain + offset`) and optionally a
//! piecewise-linear table of measured raw/true pairs. The table, when loaded, takes precedence:
//! it corrects the non-linearity of the sensor near zero and at the top of the range, which a
//! single gain cannot.

use heapless::Vec;
use log::{info, warn};
use no_std_compat::cmp::Ordering;

use crate::error::CalibrationError;
use crate::storage::{indexed_key, rated_key, KeyValueStore};

pub const NAMESPACE: &str = "calib";
pub const MAX_TABLE_POINTS: usize = 16;
/// Raw readings closer than this (mA) describe the same calibration point
pub const MERGE_EPSILON_MA: f32 = 0.01;

const KEY_GAIN: &str = "lg";
const KEY_OFFSET: &str = "lo";
const KEY_TABLE_COUNT: &str = "tn";
const KEY_TABLE_RAW: &str = "tr";
const KEY_TABLE_TRUE: &str = "tt";

/// Supported shunts, all of them 75 mV at the rated current
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShuntRating {
    A50,
    A100,
    A150,
    A200,
    A300,
    A500,
}

impl ShuntRating {
    pub const ALL: [ShuntRating; 6] = [
        ShuntRating::A50,
        ShuntRating::A100,
        ShuntRating::A150,
        ShuntRating::A200,
        ShuntRating::A300,
        ShuntRating::A500,
    ];

    pub const fn amps(self) -> u16 {
        match self {
            ShuntRating::A50 => 50,
            ShuntRating::A100 => 100,
            ShuntRating::A150 => 150,
            ShuntRating::A200 => 200,
            ShuntRating::A300 => 300,
            ShuntRating::A500 => 500,
        }
    }

    pub fn from_amps(amps: u32) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|rating| rating.amps() as u32 == amps)
    }

    pub fn nominal_resistance_ohms(self) -> f32 {
        0.075 / self.amps() as f32
    }
}

impl Default for ShuntRating {
    fn default() -> Self {
        ShuntRating::A100
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CalibrationPoint {
    pub raw_ma: f32,
    pub true_ma: f32,
}

impl CalibrationPoint {
    pub const fn new(raw_ma: f32, true_ma: f32) -> Self {
        CalibrationPoint { raw_ma, true_ma }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LinearCalibration {
    pub gain: f32,
    pub offset_ma: f32,
}

impl LinearCalibration {
    pub const IDENTITY: LinearCalibration = LinearCalibration {
        gain: 1.0,
        offset_ma: 0.0,
    };

    pub fn apply(&self, raw_ma: f32) -> f32 {
        raw_ma * self.gain + self.offset_ma
    }
}

impl Default for LinearCalibration {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Readings merged into one table point
struct MergeGroup {
    raw_ma: f32,
    true_sum: f32,
    count: f32,
}

/// Points sorted by `raw_ma`, strictly increasing. Empty means "no table".
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CalibrationTable {
    points: Vec<CalibrationPoint, MAX_TABLE_POINTS>,
}

impl CalibrationTable {
    pub const fn empty() -> Self {
        CalibrationTable { points: Vec::new() }
    }

    /// Builds a table from points in any order. Non-finite points are dropped, points whose
    /// raw readings are closer than [MERGE_EPSILON_MA] collapse into one with the mean true value.
    /// Only distinct points count against [MAX_TABLE_POINTS].
    pub fn from_points(points: &[CalibrationPoint]) -> Result<Self, CalibrationError> {
        let mut groups: Vec<MergeGroup, MAX_TABLE_POINTS> = Vec::new();
        for point in points
            .iter()
            .filter(|it| it.raw_ma.is_finite() && it.true_ma.is_finite())
        {
            let existing = groups
                .iter_mut()
                .find(|group| libm::fabsf(point.raw_ma - group.raw_ma) < MERGE_EPSILON_MA);
            match existing {
                Some(group) => {
                    group.raw_ma = libm::fminf(group.raw_ma, point.raw_ma);
                    group.true_sum += point.true_ma;
                    group.count += 1.0;
                }
                None => groups
                    .push(MergeGroup {
                        raw_ma: point.raw_ma,
                        true_sum: point.true_ma,
                        count: 1.0,
                    })
                    .map_err(|_| CalibrationError::TooManyPoints)?,
            }
        }

        let mut merged: Vec<CalibrationPoint, MAX_TABLE_POINTS> = groups
            .iter()
            .map(|group| CalibrationPoint::new(group.raw_ma, group.true_sum / group.count))
            .collect();
        merged.sort_unstable_by(|lhs, rhs| {
            lhs.raw_ma.partial_cmp(&rhs.raw_ma).unwrap_or(Ordering::Equal)
        });

        if merged.is_empty() {
            Err(CalibrationError::EmptyTable)
        } else {
            Ok(CalibrationTable { points: merged })
        }
    }

    pub fn points(&self) -> &[CalibrationPoint] {
        &self.points
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Corrected value for `raw_ma`, clamped to the edge points outside the table.
    /// `None` for an empty table.
    pub fn interpolate(&self, raw_ma: f32) -> Option<f32> {
        let first = self.points.first()?;
        let last = self.points.last()?;
        if raw_ma <= first.raw_ma {
            return Some(first.true_ma);
        }
        if raw_ma >= last.raw_ma {
            return Some(last.true_ma);
        }
        for segment in self.points.windows(2) {
            let (lo, hi) = (segment[0], segment[1]);
            if raw_ma > lo.raw_ma && raw_ma <= hi.raw_ma {
                let span = hi.raw_ma - lo.raw_ma;
                if span == 0.0 {
                    return Some(lo.true_ma);
                }
                return Some(lo.true_ma + (raw_ma - lo.raw_ma) * (hi.true_ma - lo.true_ma) / span);
            }
        }
        // only a NaN query falls through all comparisons
        Some(last.true_ma)
    }
}

/// Maps raw current readings to corrected ones for the active shunt
#[derive(Clone, Debug, Default)]
pub struct CalibrationEngine {
    linear: LinearCalibration,
    table: CalibrationTable,
}

impl CalibrationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&self, raw_ma: f32) -> f32 {
        match self.table.interpolate(raw_ma) {
            Some(corrected) => corrected,
            None => self.linear.apply(raw_ma),
        }
    }

    /// Changes the linear calibration in memory only
    pub fn set_linear(&mut self, gain: f32, offset_ma: f32) {
        self.linear = LinearCalibration { gain, offset_ma };
    }

    pub fn linear(&self) -> LinearCalibration {
        self.linear
    }

    pub fn table(&self) -> &CalibrationTable {
        &self.table
    }

    pub fn has_table(&self) -> bool {
        !self.table.is_empty()
    }

    /// Loads the linear calibration of `rating`. Falls back to the identity when it was never
    /// saved and returns `false` then.
    pub fn load_linear(&mut self, store: &dyn KeyValueStore, rating: ShuntRating) -> bool {
        let amps = rating.amps();
        let gain = read_rated(store, KEY_GAIN, amps);
        let offset = read_rated(store, KEY_OFFSET, amps);
        match (gain, offset) {
            (Some(gain), Some(offset_ma)) => {
                self.set_linear(gain, offset_ma);
                info!(
                    "Calibration for {}A shunt: gain {} offset {} mA",
                    amps, gain, offset_ma
                );
                true
            }
            _ => {
                self.linear = LinearCalibration::IDENTITY;
                info!("No calibration for {}A shunt, using gain 1 offset 0", amps);
                false
            }
        }
    }

    /// Activates and persists a linear calibration for `rating`. The calibration stays active
    /// even when persisting fails.
    pub fn save_linear(
        &mut self,
        store: &dyn KeyValueStore,
        rating: ShuntRating,
        gain: f32,
        offset_ma: f32,
    ) -> Result<(), CalibrationError> {
        let amps = rating.amps();
        self.set_linear(gain, offset_ma);
        store.put_f32(NAMESPACE, &rated_key(KEY_GAIN, amps)?, gain)?;
        store.put_f32(NAMESPACE, &rated_key(KEY_OFFSET, amps)?, offset_ma)?;
        info!("Saved calibration for {}A shunt", amps);
        Ok(())
    }

    /// Normalizes `points` into a table, activates it and persists it for `rating`
    pub fn save_table(
        &mut self,
        store: &dyn KeyValueStore,
        rating: ShuntRating,
        points: &[CalibrationPoint],
    ) -> Result<(), CalibrationError> {
        if points.is_empty() {
            return Err(CalibrationError::EmptyTable);
        }
        let table = CalibrationTable::from_points(points)?;
        let amps = rating.amps();
        self.table = table;

        let points = self.table.points();
        store.put_u32(NAMESPACE, &rated_key(KEY_TABLE_COUNT, amps)?, points.len() as u32)?;
        for (index, point) in points.iter().enumerate() {
            store.put_f32(NAMESPACE, &indexed_key(KEY_TABLE_RAW, amps, index)?, point.raw_ma)?;
            store.put_f32(NAMESPACE, &indexed_key(KEY_TABLE_TRUE, amps, index)?, point.true_ma)?;
        }
        for index in points.len()..MAX_TABLE_POINTS {
            remove_point(store, amps, index)?;
        }
        info!("Saved {} point calibration table for {}A shunt", points.len(), amps);
        Ok(())
    }

    /// Loads the table of `rating`. Unreadable points are skipped, when none is usable the
    /// table is cleared and `false` is returned.
    pub fn load_table(&mut self, store: &dyn KeyValueStore, rating: ShuntRating) -> bool {
        let amps = rating.amps();
        let count = rated_key(KEY_TABLE_COUNT, amps)
            .ok()
            .and_then(|key| store.get_u32(NAMESPACE, &key));
        let count = match count {
            Some(count) => count as usize,
            None => {
                self.table = CalibrationTable::empty();
                info!("No calibration table for {}A shunt", amps);
                return false;
            }
        };

        let mut points: Vec<CalibrationPoint, MAX_TABLE_POINTS> = Vec::new();
        for index in 0..count.min(MAX_TABLE_POINTS) {
            let raw = read_indexed(store, KEY_TABLE_RAW, amps, index);
            let corrected = read_indexed(store, KEY_TABLE_TRUE, amps, index);
            match (raw, corrected) {
                (Some(raw_ma), Some(true_ma)) => {
                    let _ = points.push(CalibrationPoint::new(raw_ma, true_ma));
                }
                _ => warn!("Skipping unreadable calibration point {} of {}A table", index, amps),
            }
        }

        match CalibrationTable::from_points(&points) {
            Ok(table) => {
                info!("Loaded {} point calibration table for {}A shunt", table.points().len(), amps);
                self.table = table;
                true
            }
            Err(_) => {
                warn!("Calibration table for {}A shunt is unusable", amps);
                self.table = CalibrationTable::empty();
                false
            }
        }
    }

    /// Forgets the table in memory and removes every persisted entry of `rating`
    pub fn clear_table(
        &mut self,
        store: &dyn KeyValueStore,
        rating: ShuntRating,
    ) -> Result<(), CalibrationError> {
        let amps = rating.amps();
        self.table = CalibrationTable::empty();
        store.remove(NAMESPACE, &rated_key(KEY_TABLE_COUNT, amps)?)?;
        for index in 0..MAX_TABLE_POINTS {
            remove_point(store, amps, index)?;
        }
        info!("Cleared calibration table for {}A shunt", amps);
        Ok(())
    }
}

fn read_rated(store: &dyn KeyValueStore, prefix: &str, amps: u16) -> Option<f32> {
    let key = rated_key(prefix, amps).ok()?;
    store.get_f32(NAMESPACE, &key)
}

fn read_indexed(store: &dyn KeyValueStore, prefix: &str, amps: u16, index: usize) -> Option<f32> {
    let key = indexed_key(prefix, amps, index).ok()?;
    store.get_f32(NAMESPACE, &key)
}

fn remove_point(
    store: &dyn KeyValueStore,
    amps: u16,
    index: usize,
) -> Result<(), CalibrationError> {
    store.remove(NAMESPACE, &indexed_key(KEY_TABLE_RAW, amps, index)?)?;
    store.remove(NAMESPACE, &indexed_key(KEY_TABLE_TRUE, amps, index)?)?;
    Ok(())
}

#[cfg(test)]
mod test {
    use crate::calibration::{
        CalibrationEngine, CalibrationPoint, CalibrationTable, ShuntRating, MAX_TABLE_POINTS,
    };
    use crate::error::CalibrationError;

    fn pt(raw_ma: f32, true_ma: f32) -> CalibrationPoint {
        CalibrationPoint::new(raw_ma, true_ma)
    }

    fn table(points: &[CalibrationPoint]) -> CalibrationTable {
        CalibrationTable::from_points(points).unwrap()
    }

    #[test]
    fn interpolates_between_neighbours() {
        let table = table(&[pt(0.0, 0.0), pt(1000.0, 1100.0), pt(3000.0, 2900.0)]);
        assert_eq!(table.interpolate(500.0), Some(550.0));
        assert_eq!(table.interpolate(2000.0), Some(2000.0));
        assert_eq!(table.interpolate(1000.0), Some(1100.0));
    }

    #[test]
    fn clamps_to_edge_points() {
        let table = table(&[pt(-2000.0, -2050.0), pt(1000.0, 1100.0)]);
        assert_eq!(table.interpolate(-2000.0), Some(-2050.0));
        assert_eq!(table.interpolate(-9000.0), Some(-2050.0));
        assert_eq!(table.interpolate(1000.0), Some(1100.0));
        assert_eq!(table.interpolate(50_000.0), Some(1100.0));
    }

    #[test]
    fn single_point_table_is_constant() {
        let table = table(&[pt(100.0, 120.0)]);
        assert_eq!(table.interpolate(-5.0), Some(120.0));
        assert_eq!(table.interpolate(500.0), Some(120.0));
    }

    #[test]
    fn empty_table_does_not_interpolate() {
        assert_eq!(CalibrationTable::empty().interpolate(10.0), None);
    }

    #[test]
    fn points_are_sorted_and_duplicates_averaged() {
        let table = table(&[
            pt(2000.0, 2100.0),
            pt(0.0, 5.0),
            pt(1000.0, 1000.0),
            pt(1000.001, 1010.0),
            pt(1000.0, 1020.0),
        ]);
        assert_eq!(
            table.points(),
            &[pt(0.0, 5.0), pt(1000.0, 1010.0), pt(2000.0, 2100.0)]
        );
    }

    #[test]
    fn non_finite_points_are_dropped() {
        let table = table(&[pt(f32::NAN, 1.0), pt(10.0, f32::INFINITY), pt(20.0, 21.0)]);
        assert_eq!(table.points(), &[pt(20.0, 21.0)]);
        assert_eq!(
            CalibrationTable::from_points(&[pt(f32::NAN, 1.0)]),
            Err(CalibrationError::EmptyTable)
        );
    }

    #[test]
    fn too_many_points_are_rejected() {
        let points: std::vec::Vec<CalibrationPoint> = (0..=MAX_TABLE_POINTS)
            .map(|i| pt(i as f32 * 100.0, i as f32 * 100.0))
            .collect();
        assert_eq!(
            CalibrationTable::from_points(&points),
            Err(CalibrationError::TooManyPoints)
        );
    }

    #[test]
    fn repeated_readings_do_not_count_against_capacity() {
        let points: std::vec::Vec<CalibrationPoint> = (0..(MAX_TABLE_POINTS * 3))
            .map(|i| pt((i % 4) as f32 * 1000.0, (i % 4) as f32 * 1000.0 + (i % 2) as f32))
            .collect();
        let table = table(&points);
        assert_eq!(table.points().len(), 4);
        assert_eq!(table.points()[0], pt(0.0, 0.0));
        assert_eq!(table.points()[1], pt(1000.0, 1001.0));
    }

    #[test]
    fn linear_calibration_is_used_without_table() {
        let mut engine = CalibrationEngine::new();
        assert_eq!(engine.apply(1000.0), 1000.0);

        engine.set_linear(1.1, -5.5);
        let expected = 1000.0 * 1.1 - 5.5;
        assert_eq!(engine.apply(1000.0), expected);
    }

    #[test]
    fn ratings_map_to_amps() {
        for rating in ShuntRating::ALL.iter() {
            assert_eq!(ShuntRating::from_amps(rating.amps() as u32), Some(*rating));
        }
        assert_eq!(ShuntRating::from_amps(75), None);
        assert!(libm::fabsf(ShuntRating::A50.nominal_resistance_ohms() - 0.0015) < 1e-9);
    }
}
