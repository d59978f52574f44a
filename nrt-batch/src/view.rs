//! Random access to single items of a [`NestedRaggedTensor`].
//!
//! A lookup resolves the item's event-group range from the level-1 boundaries,
//! narrows it by an optional explicit sub-range and then by the window policy,
//! and hands out slices borrowed straight from the tensor's buffers.

use std::ops::Range;

use nrt_format::NestedRaggedTensor;

use crate::{
    error::{BatchError, BatchResult},
    window::{apply_window, WindowPolicy},
};

/// Which item to fetch, and optionally which of its event-groups.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemRequest {
    pub index: usize,
    /// Event-group range relative to the item, applied before the window.
    pub event_groups: Option<Range<usize>>,
}

impl ItemRequest {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            event_groups: None,
        }
    }

    pub fn with_event_groups(index: usize, event_groups: Range<usize>) -> Self {
        Self {
            index,
            event_groups: Some(event_groups),
        }
    }
}

impl From<usize> for ItemRequest {
    fn from(index: usize) -> Self {
        ItemRequest::new(index)
    }
}

/// The retained part of one item, borrowed from the tensor.
#[derive(Debug, Clone, Copy)]
pub struct ItemSlice<'a> {
    index: usize,
    static_code: Option<u32>,
    timedelta: &'a [f32],
    dynamic_code: &'a [u32],
    dynamic_value: &'a [f32],
    /// Level-2 boundaries of the retained event-groups, one more than their count.
    dim2_bounds: &'a [u64],
}

impl<'a> ItemSlice<'a> {
    pub fn index(&self) -> usize {
        self.index
    }

    /// The static code, or `0` when the item has none.
    pub fn static_code(&self) -> u32 {
        self.static_code.unwrap_or(0)
    }

    pub fn has_static_code(&self) -> bool {
        self.static_code.is_some()
    }

    pub fn num_event_groups(&self) -> usize {
        self.timedelta.len()
    }

    pub fn num_measurements(&self) -> usize {
        self.dynamic_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timedelta.is_empty()
    }

    pub fn timedelta(&self) -> &'a [f32] {
        self.timedelta
    }

    /// Codes of every retained measurement, event-groups concatenated.
    pub fn dynamic_code(&self) -> &'a [u32] {
        self.dynamic_code
    }

    pub fn dynamic_value(&self) -> &'a [f32] {
        self.dynamic_value
    }

    pub fn dim2_bounds(&self) -> &'a [u64] {
        self.dim2_bounds
    }

    /// Measurement range of retained event-group `k`, relative to
    /// [`Self::dynamic_code`].
    ///
    /// # Panics
    /// - If `k >= self.num_event_groups()`
    pub fn measurement_range(&self, k: usize) -> Range<usize> {
        let base = self.dim2_bounds[0];
        (self.dim2_bounds[k] - base) as usize..(self.dim2_bounds[k + 1] - base) as usize
    }

    /// Codes of retained event-group `k`.
    ///
    /// # Panics
    /// - If `k >= self.num_event_groups()`
    pub fn codes(&self, k: usize) -> &'a [u32] {
        &self.dynamic_code[self.measurement_range(k)]
    }

    /// # Panics
    /// - If `k >= self.num_event_groups()`
    pub fn values(&self, k: usize) -> &'a [f32] {
        &self.dynamic_value[self.measurement_range(k)]
    }

    /// Largest number of measurements in any retained event-group.
    pub fn max_measurements(&self) -> usize {
        self.dim2_bounds
            .windows(2)
            .map(|w| (w[1] - w[0]) as usize)
            .max()
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RandomAccessView<'a> {
    tensor: &'a NestedRaggedTensor,
}

impl<'a> RandomAccessView<'a> {
    pub fn new(tensor: &'a NestedRaggedTensor) -> Self {
        Self { tensor }
    }

    pub fn len(&self) -> usize {
        self.tensor.num_items()
    }

    pub fn is_empty(&self) -> bool {
        self.tensor.is_empty()
    }

    pub fn tensor(&self) -> &'a NestedRaggedTensor {
        self.tensor
    }

    pub fn get(&self, request: &ItemRequest, policy: &WindowPolicy) -> BatchResult<ItemSlice<'a>> {
        policy.validate()?;
        self.slice(request, policy)
    }

    pub fn get_many(
        &self,
        requests: &[ItemRequest],
        policy: &WindowPolicy,
    ) -> BatchResult<Vec<ItemSlice<'a>>> {
        policy.validate()?;
        requests.iter().map(|r| self.slice(r, policy)).collect()
    }

    fn slice(&self, request: &ItemRequest, policy: &WindowPolicy) -> BatchResult<ItemSlice<'a>> {
        let index = request.index;
        let item_groups = self.tensor.event_group_range(index)?;

        let groups = match &request.event_groups {
            None => item_groups,
            Some(sub) => {
                if sub.start > sub.end || sub.end > item_groups.len() {
                    return Err(BatchError::SubRangeOutOfBounds {
                        index,
                        start: sub.start,
                        end: sub.end,
                        len: item_groups.len(),
                    });
                }
                item_groups.start + sub.start..item_groups.start + sub.end
            }
        };

        let timedelta = &self.tensor.timedelta()[groups.clone()];
        let window = apply_window(timedelta, policy);
        let groups = groups.start + window.start..groups.start + window.end;

        let dim2_bounds = &self.tensor.dim2_bounds()[groups.start..=groups.end];
        let measurements = dim2_bounds[0] as usize..dim2_bounds[dim2_bounds.len() - 1] as usize;

        Ok(ItemSlice {
            index,
            static_code: self.tensor.static_code(index)?,
            timedelta: &self.tensor.timedelta()[groups],
            dynamic_code: &self.tensor.dynamic_code()[measurements.clone()],
            dynamic_value: &self.tensor.dynamic_value()[measurements],
            dim2_bounds,
        })
    }
}
