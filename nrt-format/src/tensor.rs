//! Flat value store and two-level boundary index.
//!
//! A [`NestedRaggedTensor`] keeps every field in one flat buffer and encodes the
//! ragged shape with two offset arrays:
//!
//! ```text
//! dim1_bounds[i]..dim1_bounds[i + 1]  event-groups of item i
//! dim2_bounds[g]..dim2_bounds[g + 1]  measurements of event-group g
//! ```
//!
//! Both lookups are a pair of reads, independent of the size of the dataset.

use std::ops::Range;

use arrow_buffer::ScalarBuffer;

use crate::{
    builder::{EventGroup, Item},
    error::{FormatError, FormatResult, ValidationError},
    layout,
};

/// The raw buffers of a tensor, before validation.
#[derive(Debug, Clone)]
pub struct RaggedBuffers {
    pub static_code: ScalarBuffer<u32>,
    pub static_present: ScalarBuffer<u8>,
    pub timedelta: ScalarBuffer<f32>,
    pub dynamic_code: ScalarBuffer<u32>,
    pub dynamic_value: ScalarBuffer<f32>,
    pub dim1_bounds: ScalarBuffer<u64>,
    pub dim2_bounds: ScalarBuffer<u64>,
}

/// One immutable dataset partition.
///
/// Buffers are either owned (built in memory or read eagerly) or backed by a
/// read-only memory mapping; both cases share the same Arrow buffer type so the
/// read surface does not depend on how the tensor was obtained.
#[derive(Debug, Clone)]
pub struct NestedRaggedTensor {
    buffers: RaggedBuffers,
}

impl NestedRaggedTensor {
    /// Validates `buffers` against the layout invariants and wraps them.
    pub fn try_new(buffers: RaggedBuffers) -> FormatResult<Self> {
        let num_items = buffers.dim1_bounds.len().checked_sub(1).ok_or(
            ValidationError::CorruptBoundary {
                field: layout::DIM1_BOUNDS,
                index: 0,
                reason: "boundary array is empty".to_string(),
            },
        )?;
        let num_event_groups = buffers.timedelta.len();
        let num_measurements = buffers.dynamic_code.len();

        check_len(layout::STATIC_CODE, num_items, buffers.static_code.len())?;
        check_len(layout::STATIC_PRESENT, num_items, buffers.static_present.len())?;
        check_len(
            layout::DIM2_BOUNDS,
            num_event_groups + 1,
            buffers.dim2_bounds.len(),
        )?;
        check_len(
            layout::DYNAMIC_VALUE,
            num_measurements,
            buffers.dynamic_value.len(),
        )?;

        validate_boundary(layout::DIM1_BOUNDS, &buffers.dim1_bounds, num_event_groups)?;
        validate_boundary(layout::DIM2_BOUNDS, &buffers.dim2_bounds, num_measurements)?;

        for (index, (&present, &code)) in buffers
            .static_present
            .iter()
            .zip(buffers.static_code.iter())
            .enumerate()
        {
            match present {
                0 if code != 0 => {
                    return Err(ValidationError::InvalidValue {
                        field: layout::STATIC_CODE,
                        index,
                        reason: format!("absent static code stored as {code}, expected 0"),
                    }
                    .into())
                }
                0 | 1 => {}
                other => {
                    return Err(ValidationError::InvalidValue {
                        field: layout::STATIC_PRESENT,
                        index,
                        reason: format!("presence flag {other} is neither 0 nor 1"),
                    }
                    .into())
                }
            }
        }

        if let Some(index) = buffers
            .timedelta
            .iter()
            .position(|t| !t.is_finite() || *t < 0.0)
        {
            return Err(ValidationError::InvalidValue {
                field: layout::TIMEDELTA,
                index,
                reason: format!(
                    "{} is not a finite, non-negative time offset",
                    buffers.timedelta[index]
                ),
            }
            .into());
        }

        Ok(Self { buffers })
    }

    pub fn num_items(&self) -> usize {
        self.buffers.static_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.num_items() == 0
    }

    pub fn num_event_groups(&self) -> usize {
        self.buffers.timedelta.len()
    }

    pub fn num_measurements(&self) -> usize {
        self.buffers.dynamic_code.len()
    }

    /// Event-groups owned by `item`, as indices into the level-1 buffers.
    pub fn event_group_range(&self, item: usize) -> FormatResult<Range<usize>> {
        bounded_range(&self.buffers.dim1_bounds, item, "item")
    }

    /// Measurements owned by `event_group`, as indices into the level-2 buffers.
    pub fn measurement_range(&self, event_group: usize) -> FormatResult<Range<usize>> {
        bounded_range(&self.buffers.dim2_bounds, event_group, "event-group")
    }

    /// The item's static code, or `None` when the item has none.
    pub fn static_code(&self, item: usize) -> FormatResult<Option<u32>> {
        let present = self
            .buffers
            .static_present
            .get(item)
            .ok_or(FormatError::IndexOutOfRange {
                what: "item",
                index: item,
                len: self.num_items(),
            })?;
        Ok((*present == 1).then(|| self.buffers.static_code[item]))
    }

    pub fn static_codes(&self) -> &[u32] {
        &self.buffers.static_code
    }

    pub fn static_present(&self) -> &[u8] {
        &self.buffers.static_present
    }

    pub fn timedelta(&self) -> &[f32] {
        &self.buffers.timedelta
    }

    pub fn dynamic_code(&self) -> &[u32] {
        &self.buffers.dynamic_code
    }

    pub fn dynamic_value(&self) -> &[f32] {
        &self.buffers.dynamic_value
    }

    pub fn dim1_bounds(&self) -> &[u64] {
        &self.buffers.dim1_bounds
    }

    pub fn dim2_bounds(&self) -> &[u64] {
        &self.buffers.dim2_bounds
    }

    pub fn buffers(&self) -> &RaggedBuffers {
        &self.buffers
    }

    /// Reconstructs the owned nested representation of one item.
    pub fn item(&self, index: usize) -> FormatResult<Item> {
        let groups = self.event_group_range(index)?;
        let mut event_groups = Vec::with_capacity(groups.len());
        for group in groups {
            let measurements = self.measurement_range(group)?;
            event_groups.push(EventGroup {
                timedelta: self.buffers.timedelta[group],
                codes: self.buffers.dynamic_code[measurements.clone()].to_vec(),
                values: self.buffers.dynamic_value[measurements].to_vec(),
            });
        }
        Ok(Item {
            static_code: self.static_code(index)?,
            event_groups,
        })
    }

    /// Reconstructs every item, in order.
    pub fn to_items(&self) -> FormatResult<Vec<Item>> {
        (0..self.num_items()).map(|i| self.item(i)).collect()
    }

    /// The items in `items` as a tensor of their own.
    ///
    /// Value buffers are shared with `self` (no copy, also for mapped
    /// datasets); only the two boundary arrays are rebased to start at 0.
    pub fn slice(&self, items: Range<usize>) -> FormatResult<Self> {
        let len = self.num_items();
        if items.start > items.end || items.end > len {
            return Err(FormatError::InvalidRange {
                start: items.start,
                end: items.end,
                len,
            });
        }

        let dim1 = &self.buffers.dim1_bounds[items.start..=items.end];
        let (first_group, last_group) = (dim1[0], dim1[dim1.len() - 1]);
        let dim2 = &self.buffers.dim2_bounds[first_group as usize..=last_group as usize];
        let (first_measurement, last_measurement) = (dim2[0], dim2[dim2.len() - 1]);

        let groups = first_group as usize..last_group as usize;
        let measurements = first_measurement as usize..last_measurement as usize;
        let b = &self.buffers;
        Self::try_new(RaggedBuffers {
            static_code: b.static_code.slice(items.start, items.len()),
            static_present: b.static_present.slice(items.start, items.len()),
            timedelta: b.timedelta.slice(groups.start, groups.len()),
            dynamic_code: b.dynamic_code.slice(measurements.start, measurements.len()),
            dynamic_value: b.dynamic_value.slice(measurements.start, measurements.len()),
            dim1_bounds: dim1.iter().map(|g| g - first_group).collect::<Vec<_>>().into(),
            dim2_bounds: dim2
                .iter()
                .map(|m| m - first_measurement)
                .collect::<Vec<_>>()
                .into(),
        })
    }

    /// Appends `parts` in order into one tensor, offsetting each part's
    /// boundaries by the event-groups and measurements that precede it.
    pub fn concatenate(parts: &[&NestedRaggedTensor]) -> FormatResult<Self> {
        let total = |count: fn(&NestedRaggedTensor) -> usize| -> usize {
            parts.iter().map(|part| count(part)).sum()
        };
        let items = total(Self::num_items);
        let event_groups = total(Self::num_event_groups);
        let measurements = total(Self::num_measurements);

        let mut static_code = Vec::with_capacity(items);
        let mut static_present = Vec::with_capacity(items);
        let mut timedelta = Vec::with_capacity(event_groups);
        let mut dynamic_code = Vec::with_capacity(measurements);
        let mut dynamic_value = Vec::with_capacity(measurements);
        let mut dim1_bounds = Vec::with_capacity(items + 1);
        let mut dim2_bounds = Vec::with_capacity(event_groups + 1);
        dim1_bounds.push(0u64);
        dim2_bounds.push(0u64);

        for part in parts {
            let group_offset = timedelta.len() as u64;
            let measurement_offset = dynamic_code.len() as u64;
            static_code.extend_from_slice(part.static_codes());
            static_present.extend_from_slice(part.static_present());
            timedelta.extend_from_slice(part.timedelta());
            dynamic_code.extend_from_slice(part.dynamic_code());
            dynamic_value.extend_from_slice(part.dynamic_value());
            dim1_bounds.extend(part.dim1_bounds()[1..].iter().map(|g| g + group_offset));
            dim2_bounds.extend(part.dim2_bounds()[1..].iter().map(|m| m + measurement_offset));
        }

        let tensor = Self::try_new(RaggedBuffers {
            static_code: static_code.into(),
            static_present: static_present.into(),
            timedelta: timedelta.into(),
            dynamic_code: dynamic_code.into(),
            dynamic_value: dynamic_value.into(),
            dim1_bounds: dim1_bounds.into(),
            dim2_bounds: dim2_bounds.into(),
        })?;
        tracing::debug!(
            parts = parts.len(),
            items = tensor.num_items(),
            "concatenated tensors"
        );
        Ok(tensor)
    }
}

fn bounded_range(bounds: &[u64], index: usize, what: &'static str) -> FormatResult<Range<usize>> {
    let len = bounds.len().saturating_sub(1);
    if index >= len {
        return Err(FormatError::IndexOutOfRange { what, index, len });
    }
    Ok(bounds[index] as usize..bounds[index + 1] as usize)
}

fn check_len(field: &'static str, expected: usize, actual: usize) -> FormatResult<()> {
    if expected != actual {
        return Err(ValidationError::BufferLength {
            field,
            expected,
            actual,
        }
        .into());
    }
    Ok(())
}

/// Checks that `bounds` starts at 0, never decreases and ends at `target_len`.
pub fn validate_boundary(field: &'static str, bounds: &[u64], target_len: usize) -> FormatResult<()> {
    let corrupt = |index: usize, reason: String| -> FormatError {
        ValidationError::CorruptBoundary {
            field,
            index,
            reason,
        }
        .into()
    };

    match bounds.first() {
        None => return Err(corrupt(0, "boundary array is empty".to_string())),
        Some(&first) if first != 0 => {
            return Err(corrupt(0, format!("starts at {first}, expected 0")))
        }
        Some(_) => {}
    }

    if let Some(pos) = bounds.windows(2).position(|w| w[1] < w[0]) {
        return Err(corrupt(
            pos + 1,
            format!("decreases from {} to {}", bounds[pos], bounds[pos + 1]),
        ));
    }

    let last = bounds[bounds.len() - 1];
    if last != target_len as u64 {
        return Err(corrupt(
            bounds.len() - 1,
            format!("ends at {last}, delimited buffer holds {target_len}"),
        ));
    }

    Ok(())
}
