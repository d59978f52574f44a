//! Deterministic synthetic datasets for tests and benchmarks.

use std::ops::RangeInclusive;

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
    builder::{EventGroup, Item},
    error::{FormatResult, ValidationError},
};

/// Shape of a generated dataset.
///
/// Codes are drawn from `1..=vocab_size`, so `0` never appears as a real code
/// and stays free for padding.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetGenerator {
    pub event_groups_per_item: RangeInclusive<usize>,
    pub measurements_per_event_group: RangeInclusive<usize>,
    pub vocab_size: u32,
    pub static_vocab_size: u32,
    /// Probability that an item carries a static code.
    pub static_code_probability: f64,
    /// Fraction of measurements that carry a value; the rest are `NaN`.
    pub value_fraction: f64,
    /// Mean of the exponential distribution timedeltas are drawn from.
    pub mean_timedelta: f32,
}

impl Default for DatasetGenerator {
    fn default() -> Self {
        Self {
            event_groups_per_item: 1..=64,
            measurements_per_event_group: 1..=16,
            vocab_size: 1000,
            static_vocab_size: 16,
            static_code_probability: 0.8,
            value_fraction: 0.5,
            mean_timedelta: 24.0,
        }
    }
}

impl DatasetGenerator {
    pub fn validate(&self) -> FormatResult<()> {
        let invalid = |reason: &str| -> FormatResult<()> {
            Err(ValidationError::InvalidGenerator(reason.to_string()).into())
        };
        if self.event_groups_per_item.is_empty() {
            return invalid("event_groups_per_item is an empty range");
        }
        if self.measurements_per_event_group.is_empty() {
            return invalid("measurements_per_event_group is an empty range");
        }
        if self.vocab_size == 0 || self.static_vocab_size == 0 {
            return invalid("vocabularies must hold at least one code");
        }
        if !(0.0..=1.0).contains(&self.static_code_probability) {
            return invalid("static_code_probability must lie in [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.value_fraction) {
            return invalid("value_fraction must lie in [0, 1]");
        }
        if !self.mean_timedelta.is_finite() || self.mean_timedelta < 0.0 {
            return invalid("mean_timedelta must be finite and non-negative");
        }
        Ok(())
    }

    /// Generates `num_items` items. The same seed always yields the same items.
    pub fn generate(&self, num_items: usize, seed: u64) -> FormatResult<Vec<Item>> {
        self.validate()?;
        let mut rng = StdRng::seed_from_u64(seed);
        let items = (0..num_items).map(|_| self.item(&mut rng)).collect();
        Ok(items)
    }

    fn item(&self, rng: &mut StdRng) -> Item {
        let static_code = rng
            .random_bool(self.static_code_probability)
            .then(|| rng.random_range(1..=self.static_vocab_size));

        let num_groups = rng.random_range(self.event_groups_per_item.clone());
        let event_groups = (0..num_groups)
            .map(|group| {
                // The first event-group of an item has no predecessor.
                let timedelta = if group == 0 { 0.0 } else { self.timedelta(rng) };
                let num_measurements = rng.random_range(self.measurements_per_event_group.clone());
                let measurements: Vec<(u32, f32)> = (0..num_measurements)
                    .map(|_| {
                        let code = rng.random_range(1..=self.vocab_size);
                        let value = if rng.random_bool(self.value_fraction) {
                            rng.random::<f32>() * 10.0 - 5.0
                        } else {
                            f32::NAN
                        };
                        (code, value)
                    })
                    .collect();
                EventGroup::new(timedelta, measurements)
            })
            .collect();

        Item::new(static_code, event_groups)
    }

    fn timedelta(&self, rng: &mut StdRng) -> f32 {
        let u: f32 = rng.random();
        // Inverse CDF of the exponential distribution; `u` lies in [0, 1).
        -self.mean_timedelta * (1.0 - u).ln()
    }
}
