//! Named axes of the dense buffers in a [`BatchTensor`](crate::BatchTensor).
//!
//! Every batch buffer is row-major over a leading subset of the axes
//! `[batch, dim1, dim2]`: static fields use `[batch]`, event-group fields
//! `[batch, dim1]` and measurement fields all three.

pub const BATCH: &str = "batch";
pub const DIM1: &str = "dim1";
pub const DIM2: &str = "dim2";

/// A single named axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dimension {
    name: &'static str,
    size: usize,
}

impl Dimension {
    pub(crate) const fn new(name: &'static str, size: usize) -> Self {
        Self { name, size }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

/// Ordered axes of a batch buffer, outermost first.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dimensions(Vec<Dimension>);

impl Dimensions {
    /// `[batch, dim1, dim2]` with the given sizes.
    pub(crate) fn batch(batch: usize, dim1: usize, dim2: usize) -> Self {
        Self(vec![
            Dimension::new(BATCH, batch),
            Dimension::new(DIM1, dim1),
            Dimension::new(DIM2, dim2),
        ])
    }

    /// The first `n` axes.
    pub fn leading(&self, n: usize) -> Self {
        Self(self.0[..n.min(self.0.len())].to_vec())
    }

    pub fn num_dims(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Dimension> {
        self.0.iter()
    }

    pub fn shape(&self) -> Vec<usize> {
        self.0.iter().map(Dimension::size).collect()
    }

    /// Number of elements in a buffer spanning every axis.
    pub fn flat_len(&self) -> usize {
        self.0.iter().map(Dimension::size).product()
    }

    /// Size of the axis called `name`, if present.
    pub fn size_of(&self, name: &str) -> Option<usize> {
        self.0.iter().find(|d| d.name == name).map(Dimension::size)
    }

    /// Row-major offset of `index` in a buffer spanning the leading
    /// `index.len()` axes, or `None` when any coordinate is out of bounds.
    pub fn flat_index(&self, index: &[usize]) -> Option<usize> {
        if index.len() > self.0.len() {
            return None;
        }
        index
            .iter()
            .zip(&self.0)
            .try_fold(0usize, |offset, (&i, dim)| {
                (i < dim.size).then_some(offset * dim.size + i)
            })
    }
}
