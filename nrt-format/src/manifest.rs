//! `manifest.json`: the self-describing header of a dataset directory.
//!
//! The manifest maps every field to its file, element type, element count and
//! ragged level, so a reader needs no schema knowledge beyond this crate's
//! field names. Field order is fixed ([`layout::FIELDS`]) and serialization is
//! pretty-printed JSON, which keeps the file byte-stable for a given dataset.

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    error::{FormatResult, ReadingError},
    layout::{self, ByteOrder, DType, Element, FieldLevel},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub format: String,
    pub version: u32,
    pub byte_order: ByteOrder,
    pub num_items: u64,
    pub fields: IndexMap<String, FieldEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldEntry {
    pub file: String,
    pub dtype: DType,
    pub byte_width: u8,
    pub count: u64,
    pub level: FieldLevel,
    /// Hex encoded SHA-256 of the field's file.
    pub sha256: String,
}

impl FieldEntry {
    pub fn byte_len(&self) -> u64 {
        self.count.saturating_mul(self.byte_width as u64)
    }
}

impl Manifest {
    pub fn new(num_items: u64) -> Self {
        Self {
            format: layout::FORMAT_NAME.to_string(),
            version: layout::FORMAT_VERSION,
            byte_order: ByteOrder::host(),
            num_items,
            fields: IndexMap::new(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Reads and checks the header of the manifest stored in `dir`.
    pub fn load(dir: &Path) -> FormatResult<Self> {
        let path = dir.join(layout::MANIFEST_FILE);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ReadingError::ManifestMissing(path).into())
            }
            Err(source) => return Err(ReadingError::FieldLoadFailure { path, source }.into()),
        };
        let manifest: Manifest = serde_json::from_slice(&bytes)
            .map_err(|source| ReadingError::ManifestDecode { path, source })?;
        manifest.validate_header()?;
        Ok(manifest)
    }

    pub fn validate_header(&self) -> FormatResult<()> {
        if self.format != layout::FORMAT_NAME {
            return Err(ReadingError::UnsupportedFormat(self.format.clone()).into());
        }
        if self.version != layout::FORMAT_VERSION {
            return Err(ReadingError::UnsupportedVersion {
                found: self.version,
                supported: layout::FORMAT_VERSION,
            }
            .into());
        }
        if self.byte_order != ByteOrder::host() {
            return Err(ReadingError::ByteOrderMismatch {
                dataset: self.byte_order.name(),
                host: ByteOrder::host().name(),
            }
            .into());
        }
        Ok(())
    }

    /// Looks up `field` and checks that it is stored with element type `T` at
    /// ragged level `level`.
    pub fn field<T: Element>(
        &self,
        field: &'static str,
        level: FieldLevel,
    ) -> FormatResult<&FieldEntry> {
        let entry = self
            .fields
            .get(field)
            .ok_or(ReadingError::FieldMissing(field))?;
        if entry.dtype != T::DTYPE || entry.byte_width != T::DTYPE.byte_width() {
            return Err(ReadingError::FieldDType {
                field,
                expected: T::DTYPE.name(),
                actual: entry.dtype.name(),
                actual_width: entry.byte_width,
            }
            .into());
        }
        if entry.level != level {
            return Err(ReadingError::FieldLevel {
                field,
                expected: level.name(),
                actual: entry.level.name(),
            }
            .into());
        }
        if Path::new(&entry.file).file_name().and_then(|n| n.to_str()) != Some(entry.file.as_str())
        {
            return Err(ReadingError::FieldFileName {
                field,
                file: entry.file.clone(),
            }
            .into());
        }
        Ok(entry)
    }
}
