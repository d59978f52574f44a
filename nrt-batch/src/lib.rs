//! Random access, windowing, collation and epoch iteration over datasets
//! stored with `nrt-format`.
//!
//! ```no_run
//! use nrt_batch::{BatchPlan, IndexOrdering, WindowPolicy};
//! use nrt_format::{NestedRaggedTensor, OpenOptions};
//!
//! let tensor = NestedRaggedTensor::open("/data/train.nrt", OpenOptions::lazy())?;
//! let plan = BatchPlan::new(32)
//!     .with_ordering(IndexOrdering::Shuffled { seed: 0 })
//!     .with_window(WindowPolicy::last(256));
//! for batch in plan.epoch(&tensor, 0)? {
//!     let batch = batch?;
//!     println!("{:?}", batch.dimensions().shape());
//! }
//! # Ok::<(), nrt_batch::BatchError>(())
//! ```

pub mod collate;
pub mod dimensions;
pub mod driver;
pub mod error;
pub mod ordering;
pub mod parallel;
pub mod view;
pub mod window;

pub use collate::{collate, BatchTensor};
pub use dimensions::{Dimension, Dimensions};
pub use driver::{BatchPlan, EpochIter};
pub use error::{BatchError, BatchResult};
pub use ordering::IndexOrdering;
pub use parallel::{LoadedBatch, LoaderOptions, MergePolicy, ParallelLoader};
pub use view::{ItemRequest, ItemSlice, RandomAccessView};
pub use window::{apply_window, WindowAnchor, WindowPolicy};
