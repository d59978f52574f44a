//! Shared on-disk layout constants.
//!
//! Field names, file names and element types used by the writer, the reader,
//! tests and the manifest. Keeping them in one place avoids drift between the
//! components that produce and consume a dataset directory.

use arrow_buffer::ArrowNativeType;
use serde::{Deserialize, Serialize};

/// Manifest file inside a dataset directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Value of the manifest `format` key.
pub const FORMAT_NAME: &str = "nested-ragged-tensor";

/// Manifest version written by this crate and the only one it reads.
pub const FORMAT_VERSION: u32 = 1;

/// Prefix of the staging directory created next to a dataset while it is written.
pub const STAGING_PREFIX: &str = ".nrt-staging-";

pub const STATIC_CODE: &str = "static_code";
pub const STATIC_PRESENT: &str = "static_present";
pub const TIMEDELTA: &str = "timedelta";
pub const DYNAMIC_CODE: &str = "dynamic_code";
pub const DYNAMIC_VALUE: &str = "dynamic_value";
pub const DIM1_BOUNDS: &str = "dim1_bounds";
pub const DIM2_BOUNDS: &str = "dim2_bounds";

/// Every persisted field, in manifest order.
pub const FIELDS: [&str; 7] = [
    STATIC_CODE,
    STATIC_PRESENT,
    TIMEDELTA,
    DYNAMIC_CODE,
    DYNAMIC_VALUE,
    DIM1_BOUNDS,
    DIM2_BOUNDS,
];

/// File name used for a field's binary buffer.
pub fn field_file_name(field: &str) -> String {
    format!("{field}.bin")
}

/// Element type of a persisted buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    U8,
    U32,
    U64,
    F32,
}

impl DType {
    pub const fn byte_width(self) -> u8 {
        match self {
            DType::U8 => 1,
            DType::U32 | DType::F32 => 4,
            DType::U64 => 8,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            DType::U8 => "u8",
            DType::U32 => "u32",
            DType::U64 => "u64",
            DType::F32 => "f32",
        }
    }
}

/// Which ragged level a field is indexed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldLevel {
    /// One element per item.
    Dim0,
    /// One element per event-group.
    Dim1,
    /// One element per measurement.
    Dim2,
    /// Level-1 boundary array (items -> event-groups).
    Dim1Bounds,
    /// Level-2 boundary array (event-groups -> measurements).
    Dim2Bounds,
}

impl FieldLevel {
    pub const fn name(self) -> &'static str {
        match self {
            FieldLevel::Dim0 => "dim0",
            FieldLevel::Dim1 => "dim1",
            FieldLevel::Dim2 => "dim2",
            FieldLevel::Dim1Bounds => "dim1_bounds",
            FieldLevel::Dim2Bounds => "dim2_bounds",
        }
    }
}

/// Byte order of persisted buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    pub const fn host() -> Self {
        if cfg!(target_endian = "little") {
            ByteOrder::Little
        } else {
            ByteOrder::Big
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            ByteOrder::Little => "little",
            ByteOrder::Big => "big",
        }
    }
}

/// Native element types that can back a persisted field.
pub trait Element: ArrowNativeType {
    const DTYPE: DType;
}

impl Element for u8 {
    const DTYPE: DType = DType::U8;
}

impl Element for u32 {
    const DTYPE: DType = DType::U32;
}

impl Element for u64 {
    const DTYPE: DType = DType::U64;
}

impl Element for f32 {
    const DTYPE: DType = DType::F32;
}
