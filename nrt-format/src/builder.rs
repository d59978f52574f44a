//! Construction of a [`NestedRaggedTensor`] from nested in-memory input.
//!
//! Building is a single forward pass that appends to the flat buffers while
//! accumulating running offsets at both boundary levels. Each item is validated
//! in full before anything is appended, and a failed build discards the
//! builder, so no partially built tensor is ever observable.

use std::borrow::Borrow;

use arrow_buffer::ScalarBuffer;

use crate::{
    error::{FormatResult, ValidationError},
    tensor::{NestedRaggedTensor, RaggedBuffers},
};

/// One group of measurements sharing a time offset.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EventGroup {
    /// Time elapsed since the previous event-group of the same item.
    pub timedelta: f32,
    pub codes: Vec<u32>,
    /// One value per code; `NaN` marks a code observed without a value.
    pub values: Vec<f32>,
}

impl EventGroup {
    pub fn new(timedelta: f32, measurements: impl IntoIterator<Item = (u32, f32)>) -> Self {
        let (codes, values) = measurements.into_iter().unzip();
        Self {
            timedelta,
            codes,
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

/// A single item (for example one subject) and its event-groups.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Item {
    pub static_code: Option<u32>,
    pub event_groups: Vec<EventGroup>,
}

impl Item {
    pub fn new(static_code: Option<u32>, event_groups: Vec<EventGroup>) -> Self {
        Self {
            static_code,
            event_groups,
        }
    }

    /// Equality that compares floats by bit pattern, so `NaN` values match.
    pub fn bit_eq(&self, other: &Item) -> bool {
        self.static_code == other.static_code
            && self.event_groups.len() == other.event_groups.len()
            && self
                .event_groups
                .iter()
                .zip(&other.event_groups)
                .all(|(a, b)| {
                    a.timedelta.to_bits() == b.timedelta.to_bits()
                        && a.codes == b.codes
                        && a.values.len() == b.values.len()
                        && a.values
                            .iter()
                            .zip(&b.values)
                            .all(|(x, y)| x.to_bits() == y.to_bits())
                })
    }
}

/// Column-oriented input: one nested list per field, aligned by position.
#[derive(Debug, Clone, Default)]
pub struct ColumnarItems {
    pub static_code: Vec<Option<u32>>,
    /// `[item][event_group]`
    pub timedelta: Vec<Vec<f32>>,
    /// `[item][event_group][measurement]`
    pub dynamic_code: Vec<Vec<Vec<u32>>>,
    /// `[item][event_group][measurement]`
    pub dynamic_value: Vec<Vec<Vec<f32>>>,
}

#[derive(Debug, Clone)]
pub struct RaggedBuilder {
    static_code: Vec<u32>,
    static_present: Vec<u8>,
    timedelta: Vec<f32>,
    dynamic_code: Vec<u32>,
    dynamic_value: Vec<f32>,
    dim1_bounds: Vec<u64>,
    dim2_bounds: Vec<u64>,
}

impl Default for RaggedBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RaggedBuilder {
    pub fn new() -> Self {
        Self::with_capacity(0, 0, 0)
    }

    pub fn with_capacity(items: usize, event_groups: usize, measurements: usize) -> Self {
        let mut dim1_bounds = Vec::with_capacity(items + 1);
        dim1_bounds.push(0);
        let mut dim2_bounds = Vec::with_capacity(event_groups + 1);
        dim2_bounds.push(0);
        Self {
            static_code: Vec::with_capacity(items),
            static_present: Vec::with_capacity(items),
            timedelta: Vec::with_capacity(event_groups),
            dynamic_code: Vec::with_capacity(measurements),
            dynamic_value: Vec::with_capacity(measurements),
            dim1_bounds,
            dim2_bounds,
        }
    }

    pub fn num_items(&self) -> usize {
        self.static_code.len()
    }

    /// Validates and appends one item. A rejected item leaves the builder untouched.
    pub fn push_item(&mut self, item: &Item) -> FormatResult<()> {
        let index = self.num_items();
        for (group_index, group) in item.event_groups.iter().enumerate() {
            validate_event_group(index, group_index, group.timedelta, &group.codes, &group.values)?;
        }

        self.push_static(item.static_code);
        for group in &item.event_groups {
            self.push_event_group(group.timedelta, &group.codes, &group.values);
        }
        self.close_item();
        Ok(())
    }

    /// Validates the flat buffers and produces the immutable tensor.
    pub fn finish(self) -> FormatResult<NestedRaggedTensor> {
        let buffers = RaggedBuffers {
            static_code: ScalarBuffer::from(self.static_code),
            static_present: ScalarBuffer::from(self.static_present),
            timedelta: ScalarBuffer::from(self.timedelta),
            dynamic_code: ScalarBuffer::from(self.dynamic_code),
            dynamic_value: ScalarBuffer::from(self.dynamic_value),
            dim1_bounds: ScalarBuffer::from(self.dim1_bounds),
            dim2_bounds: ScalarBuffer::from(self.dim2_bounds),
        };
        let tensor = NestedRaggedTensor::try_new(buffers)?;
        tracing::debug!(
            items = tensor.num_items(),
            event_groups = tensor.num_event_groups(),
            measurements = tensor.num_measurements(),
            "built nested ragged tensor"
        );
        Ok(tensor)
    }

    /// Builds a tensor from a sequence of items; fails as a whole on the first defect.
    pub fn build<I, T>(items: I) -> FormatResult<NestedRaggedTensor>
    where
        I: IntoIterator<Item = T>,
        T: Borrow<Item>,
    {
        let mut builder = Self::new();
        for item in items {
            builder.push_item(item.borrow())?;
        }
        builder.finish()
    }

    /// Builds a tensor from column-oriented nested lists.
    ///
    /// Every column must agree on the number of items, every per-item column on
    /// the number of event-groups, and codes and values on the number of
    /// measurements per event-group.
    pub fn from_columns(columns: &ColumnarItems) -> FormatResult<NestedRaggedTensor> {
        let num_items = columns.static_code.len();
        check_column("timedelta", "top level".to_string(), num_items, columns.timedelta.len())?;
        check_column("dynamic_code", "top level".to_string(), num_items, columns.dynamic_code.len())?;
        check_column(
            "dynamic_value",
            "top level".to_string(),
            num_items,
            columns.dynamic_value.len(),
        )?;

        let event_groups = columns.timedelta.iter().map(Vec::len).sum();
        let measurements = columns
            .dynamic_code
            .iter()
            .flat_map(|groups| groups.iter().map(Vec::len))
            .sum();
        let mut builder = Self::with_capacity(num_items, event_groups, measurements);

        for item in 0..num_items {
            let timedelta = &columns.timedelta[item];
            let codes = &columns.dynamic_code[item];
            let values = &columns.dynamic_value[item];
            check_column("dynamic_code", format!("item {item}"), timedelta.len(), codes.len())?;
            check_column("dynamic_value", format!("item {item}"), timedelta.len(), values.len())?;
            for group in 0..timedelta.len() {
                validate_event_group(item, group, timedelta[group], &codes[group], &values[group])?;
            }

            builder.push_static(columns.static_code[item]);
            for group in 0..timedelta.len() {
                builder.push_event_group(timedelta[group], &codes[group], &values[group]);
            }
            builder.close_item();
        }

        builder.finish()
    }

    fn push_static(&mut self, static_code: Option<u32>) {
        match static_code {
            Some(code) => {
                self.static_code.push(code);
                self.static_present.push(1);
            }
            None => {
                self.static_code.push(0);
                self.static_present.push(0);
            }
        }
    }

    fn push_event_group(&mut self, timedelta: f32, codes: &[u32], values: &[f32]) {
        self.timedelta.push(timedelta);
        self.dynamic_code.extend_from_slice(codes);
        self.dynamic_value.extend_from_slice(values);
        self.dim2_bounds.push(self.dynamic_code.len() as u64);
    }

    fn close_item(&mut self) {
        self.dim1_bounds.push(self.timedelta.len() as u64);
    }
}

fn validate_event_group(
    item: usize,
    event_group: usize,
    timedelta: f32,
    codes: &[u32],
    values: &[f32],
) -> Result<(), ValidationError> {
    if codes.len() != values.len() {
        return Err(ValidationError::CodeValueMismatch {
            item,
            event_group,
            codes: codes.len(),
            values: values.len(),
        });
    }
    if !timedelta.is_finite() || timedelta < 0.0 {
        return Err(ValidationError::InvalidTimedelta {
            item,
            event_group,
            value: timedelta,
        });
    }
    Ok(())
}

fn check_column(
    column: &'static str,
    location: String,
    expected: usize,
    actual: usize,
) -> Result<(), ValidationError> {
    if expected != actual {
        return Err(ValidationError::ColumnLengthMismatch {
            column,
            location,
            expected,
            actual,
        });
    }
    Ok(())
}
