//! On-disk format for two-level ragged sequence data.
//!
//! A dataset is a set of items; every item owns a variable number of
//! event-groups and every event-group a variable number of `(code, value)`
//! measurements plus one timedelta. All values live in flat Arrow buffers and
//! the nesting is encoded by two boundary arrays (see [`tensor`]).
//!
//! ```no_run
//! use nrt_format::{EventGroup, Item, NestedRaggedTensor, OpenOptions, RaggedBuilder};
//!
//! let tensor = RaggedBuilder::build([Item::new(
//!     Some(4),
//!     vec![EventGroup::new(0.0, [(5, 1.2)]), EventGroup::new(3.0, [(7, 0.4), (9, 2.1)])],
//! )])?;
//! tensor.save("/tmp/example.nrt")?;
//! let reopened = NestedRaggedTensor::open("/tmp/example.nrt", OpenOptions::lazy())?;
//! assert_eq!(reopened.event_group_range(0)?, 0..2);
//! # Ok::<(), nrt_format::error::FormatError>(())
//! ```

pub mod builder;
pub mod error;
pub mod layout;
pub mod manifest;
pub mod reader;
pub mod synthetic;
pub mod tensor;
pub mod writer;

pub use builder::{ColumnarItems, EventGroup, Item, RaggedBuilder};
pub use error::{FormatError, FormatResult};
pub use manifest::{FieldEntry, Manifest};
pub use reader::{DatasetReader, EagerLoader, FieldLoader, MmapLoader, OpenOptions, ReadMode};
pub use synthetic::DatasetGenerator;
pub use tensor::{NestedRaggedTensor, RaggedBuffers};
pub use writer::DatasetWriter;
