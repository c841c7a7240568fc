//! Demo data source
//!
//! Produces plausible, slowly drifting values for every catalog parameter
//! and a fixed set of trouble codes so the session can be exercised
//! without an adapter.

use chrono::{Duration as ChronoDuration, Utc};
use obd_protocol::{Dtc, DtcRecord, FreezeFrame, Formula, Parameter, Reading};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Bounds and per-tick drift of one simulated parameter
#[derive(Debug, Clone, Copy)]
struct DemoRange {
    min: f64,
    max: f64,
    drift: f64,
    /// Starting value
    seed: f64,
}

const fn range(min: f64, max: f64, drift: f64, seed: f64) -> DemoRange {
    DemoRange {
        min,
        max,
        drift,
        seed,
    }
}

/// Catalog order
const RANGES: [DemoRange; 9] = [
    range(650.0, 3500.0, 150.0, 1200.0),
    range(0.0, 120.0, 8.0, 60.0),
    range(80.0, 100.0, 2.0, 90.0),
    range(20.0, 85.0, 5.0, 50.0),
    range(5.0, 75.0, 6.0, 30.0),
    range(25.0, 90.0, 1.0, 55.0),
    range(15.0, 45.0, 2.0, 28.0),
    range(2.0, 15.0, 1.0, 8.0),
    range(-5.0, 25.0, 2.0, 10.0),
];

/// Stored codes with their age in hours
const DEMO_CODES: [([u8; 2], i64); 3] = [([0x03, 0x00], 1), ([0x04, 0x20], 24), ([0x01, 0x71], 48)];

/// Simulated vehicle
#[derive(Debug, Clone)]
pub struct DemoSource {
    values: [f64; 9],
    codes: Vec<DtcRecord>,
    seed: u64,
    counter: u64,
}

impl DemoSource {
    pub fn new() -> Self {
        let seed = Utc::now().timestamp_nanos_opt().unwrap_or_default() as u64;
        Self::with_seed(seed)
    }

    /// Deterministic source for tests
    pub fn with_seed(seed: u64) -> Self {
        let mut source = Self {
            values: RANGES.map(|r| r.seed),
            codes: Vec::new(),
            seed,
            counter: 0,
        };
        source.codes = source.build_codes();
        source
    }

    /// Drift every parameter once and return the new readings in catalog order
    pub fn tick(&mut self) -> Vec<(Parameter, Reading)> {
        self.counter += 1;
        Parameter::ALL
            .iter()
            .map(|&parameter| {
                let index = parameter as usize;
                let range = RANGES[index];
                let delta = self.unit(index as u64) * range.drift;
                let value = (self.values[index] + delta).clamp(range.min, range.max);
                self.values[index] = value;
                (parameter, reading_for(parameter, value))
            })
            .collect()
    }

    /// Codes a simulated scan reports
    pub fn stored_codes(&self) -> Vec<DtcRecord> {
        self.codes.clone()
    }

    /// Simulated clear: the vehicle forgets its codes
    pub fn clear_codes(&mut self) {
        self.codes.clear();
    }

    /// Pseudo-random value in [-1, 1]
    fn unit(&self, salt: u64) -> f64 {
        let mut hasher = DefaultHasher::new();
        self.seed.hash(&mut hasher);
        self.counter.hash(&mut hasher);
        salt.hash(&mut hasher);
        let hash = hasher.finish();
        (hash % 20_001) as f64 / 10_000.0 - 1.0
    }

    /// Value in [min, max] derived from the seed
    fn pick(&self, salt: u64, min: f64, max: f64) -> f64 {
        min + (self.unit(salt) + 1.0) / 2.0 * (max - min)
    }

    fn build_codes(&self) -> Vec<DtcRecord> {
        let now = Utc::now();
        DEMO_CODES
            .iter()
            .enumerate()
            .map(|(n, (raw, age_hours))| {
                let code = Dtc::from_bytes(*raw);
                let mut record = DtcRecord::new(code);
                record.detected_at = now - ChronoDuration::hours(*age_hours);

                let mut frame = FreezeFrame::new(code);
                frame.captured_at = now - ChronoDuration::hours(1);
                let salt = 100 + n as u64 * 10;
                let captured = [
                    (Parameter::Rpm, self.pick(salt, 1500.0, 3500.0)),
                    (Parameter::Speed, self.pick(salt + 1, 40.0, 90.0)),
                    (Parameter::CoolantTemp, self.pick(salt + 2, 85.0, 100.0)),
                    (Parameter::EngineLoad, self.pick(salt + 3, 30.0, 70.0)),
                    (Parameter::ThrottlePosition, self.pick(salt + 4, 15.0, 45.0)),
                    (Parameter::IntakeAirTemp, self.pick(salt + 5, 20.0, 40.0)),
                    (Parameter::Maf, self.pick(salt + 6, 5.0, 15.0)),
                ];
                for (parameter, value) in captured {
                    frame.merge(parameter, reading_for(parameter, value));
                }
                record.freeze_frame = Some(frame);
                record
            })
            .collect()
    }
}

impl Default for DemoSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Shape a raw value the way the parameter's formula would report it
fn reading_for(parameter: Parameter, value: f64) -> Reading {
    match parameter.spec().formula {
        Formula::Hundredths | Formula::HalfOffset => Reading::Tenths((value * 10.0).round() / 10.0),
        _ => Reading::Whole(value.trunc() as i64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_tick_covers_catalog() {
        let mut demo = DemoSource::with_seed(7);
        let readings = demo.tick();
        let parameters: Vec<_> = readings.iter().map(|(p, _)| *p).collect();
        assert_eq!(parameters, Parameter::ALL.to_vec());
        assert!(matches!(readings[0].1, Reading::Whole(_)));
        assert!(matches!(readings[7].1, Reading::Tenths(_)));
    }

    #[test]
    fn test_demo_codes() {
        let mut demo = DemoSource::with_seed(1);
        let codes: Vec<String> = demo
            .stored_codes()
            .iter()
            .map(|r| r.code.to_string())
            .collect();
        assert_eq!(codes, vec!["P0300", "P0420", "P0171"]);
        assert!(demo.stored_codes().iter().all(|r| r
            .freeze_frame
            .as_ref()
            .is_some_and(|f| f.values.len() == 7)));

        demo.clear_codes();
        assert!(demo.stored_codes().is_empty());
    }

    #[test]
    fn test_same_seed_same_values() {
        let mut a = DemoSource::with_seed(42);
        let mut b = DemoSource::with_seed(42);
        assert_eq!(a.tick(), b.tick());
    }

    proptest! {
        #[test]
        fn prop_values_stay_in_range(seed in any::<u64>(), ticks in 1usize..50) {
            let mut demo = DemoSource::with_seed(seed);
            for _ in 0..ticks {
                for (parameter, reading) in demo.tick() {
                    let range = RANGES[parameter as usize];
                    let value = reading.as_f64();
                    prop_assert!(value >= range.min.trunc() - 0.05);
                    prop_assert!(value <= range.max + 0.05);
                }
            }
        }
    }
}
