//! Densification of a batch of ragged items.
//!
//! Items are copied left-aligned into row-major buffers sized by the largest
//! retained event-group count (`dim1`) and the largest measurement count of
//! any event-group (`dim2`) in the batch. Everything else is padding, set to
//! zero and marked `false` in the masks.

use arrow_buffer::{BooleanBuffer, BooleanBufferBuilder, ScalarBuffer};

use crate::{
    dimensions::{Dimensions, DIM1, DIM2},
    view::ItemSlice,
};

/// A padded, masked batch. All buffers are row-major.
#[derive(Debug, Clone)]
pub struct BatchTensor {
    items: Vec<usize>,
    /// `[batch, dim1, dim2]`
    dims: Dimensions,
    /// `[batch]`
    static_code: ScalarBuffer<u32>,
    /// `[batch]`
    static_mask: BooleanBuffer,
    /// `[batch, dim1]`
    timedelta: ScalarBuffer<f32>,
    /// `[batch, dim1]`
    dim1_mask: BooleanBuffer,
    /// `[batch, dim1, dim2]`
    dynamic_code: ScalarBuffer<u32>,
    /// `[batch, dim1, dim2]`
    dynamic_value: ScalarBuffer<f32>,
    /// `[batch, dim1, dim2]`
    dim2_mask: BooleanBuffer,
}

impl BatchTensor {
    /// A batch without items; every dimension is 0.
    pub fn empty() -> Self {
        collate(&[])
    }

    pub fn batch_size(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn max_dim1(&self) -> usize {
        self.dims.size_of(DIM1).unwrap_or(0)
    }

    pub fn max_dim2(&self) -> usize {
        self.dims.size_of(DIM2).unwrap_or(0)
    }

    /// Dataset indices of the items, in batch order.
    pub fn item_indices(&self) -> &[usize] {
        &self.items
    }

    /// `[batch, dim1, dim2]`
    pub fn dimensions(&self) -> &Dimensions {
        &self.dims
    }

    /// `[batch]`
    pub fn static_dimensions(&self) -> Dimensions {
        self.dims.leading(1)
    }

    /// `[batch, dim1]`
    pub fn event_group_dimensions(&self) -> Dimensions {
        self.dims.leading(2)
    }

    pub fn static_code(&self) -> &[u32] {
        &self.static_code
    }

    pub fn static_mask(&self) -> &BooleanBuffer {
        &self.static_mask
    }

    pub fn timedelta(&self) -> &[f32] {
        &self.timedelta
    }

    pub fn dim1_mask(&self) -> &BooleanBuffer {
        &self.dim1_mask
    }

    pub fn dynamic_code(&self) -> &[u32] {
        &self.dynamic_code
    }

    pub fn dynamic_value(&self) -> &[f32] {
        &self.dynamic_value
    }

    pub fn dim2_mask(&self) -> &BooleanBuffer {
        &self.dim2_mask
    }

    // Element accessors return `None` outside the batch shape.

    pub fn timedelta_at(&self, b: usize, i: usize) -> Option<f32> {
        self.dims.flat_index(&[b, i]).map(|pos| self.timedelta[pos])
    }

    pub fn dynamic_code_at(&self, b: usize, i: usize, j: usize) -> Option<u32> {
        self.dims.flat_index(&[b, i, j]).map(|pos| self.dynamic_code[pos])
    }

    pub fn dynamic_value_at(&self, b: usize, i: usize, j: usize) -> Option<f32> {
        self.dims.flat_index(&[b, i, j]).map(|pos| self.dynamic_value[pos])
    }

    pub fn dim1_mask_at(&self, b: usize, i: usize) -> Option<bool> {
        self.dims.flat_index(&[b, i]).map(|pos| self.dim1_mask.value(pos))
    }

    pub fn dim2_mask_at(&self, b: usize, i: usize, j: usize) -> Option<bool> {
        self.dims.flat_index(&[b, i, j]).map(|pos| self.dim2_mask.value(pos))
    }

    /// Real event-groups per item.
    pub fn event_group_counts(&self) -> Vec<usize> {
        let max_dim1 = self.max_dim1();
        (0..self.batch_size())
            .map(|b| self.dim1_mask.slice(b * max_dim1, max_dim1).count_set_bits())
            .collect()
    }

    /// The static code repeated over each item's real event-groups, `[batch, dim1]`.
    /// Padding positions hold 0.
    pub fn broadcast_static_code(&self) -> Vec<u32> {
        let max_dim1 = self.max_dim1();
        let mut out = vec![0u32; self.event_group_dimensions().flat_len()];
        for (pos, slot) in out.iter_mut().enumerate() {
            if self.dim1_mask.value(pos) {
                *slot = self.static_code[pos / max_dim1];
            }
        }
        out
    }
}

/// Collates `items` into one dense batch, preserving their order.
pub fn collate(items: &[ItemSlice<'_>]) -> BatchTensor {
    let batch = items.len();
    let max_dim1 = items
        .iter()
        .map(ItemSlice::num_event_groups)
        .max()
        .unwrap_or(0);
    let max_dim2 = items
        .iter()
        .map(ItemSlice::max_measurements)
        .max()
        .unwrap_or(0);
    let len1 = batch * max_dim1;
    let len2 = len1 * max_dim2;

    let mut static_code = Vec::with_capacity(batch);
    let mut static_mask = BooleanBufferBuilder::new(batch);
    let mut timedelta = vec![0f32; len1];
    let mut dim1_mask = BooleanBufferBuilder::new(len1);
    dim1_mask.append_n(len1, false);
    let mut dynamic_code = vec![0u32; len2];
    let mut dynamic_value = vec![0f32; len2];
    let mut dim2_mask = BooleanBufferBuilder::new(len2);
    dim2_mask.append_n(len2, false);

    for (row, item) in items.iter().enumerate() {
        static_code.push(item.static_code());
        static_mask.append(item.has_static_code());

        let row1 = row * max_dim1;
        let groups = item.num_event_groups();
        timedelta[row1..row1 + groups].copy_from_slice(item.timedelta());
        for k in 0..groups {
            dim1_mask.set_bit(row1 + k, true);

            let row2 = (row1 + k) * max_dim2;
            let codes = item.codes(k);
            dynamic_code[row2..row2 + codes.len()].copy_from_slice(codes);
            dynamic_value[row2..row2 + codes.len()].copy_from_slice(item.values(k));
            for j in 0..codes.len() {
                dim2_mask.set_bit(row2 + j, true);
            }
        }
    }

    BatchTensor {
        items: items.iter().map(ItemSlice::index).collect(),
        dims: Dimensions::batch(batch, max_dim1, max_dim2),
        static_code: static_code.into(),
        static_mask: static_mask.finish(),
        timedelta: timedelta.into(),
        dim1_mask: dim1_mask.finish(),
        dynamic_code: dynamic_code.into(),
        dynamic_value: dynamic_value.into(),
        dim2_mask: dim2_mask.finish(),
    }
}
