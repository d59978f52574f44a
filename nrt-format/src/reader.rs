//! Opening a persisted dataset directory.
//!
//! The manifest is checked first, then every field is loaded through a
//! [`FieldLoader`] and the resulting buffers go through the same validation the
//! builder applies. Any defect is reported by [`DatasetReader::open`]; nothing is
//! handed out from a dataset that failed to open.

use std::{
    fs::File,
    io::Read,
    path::{Path, PathBuf},
    ptr::NonNull,
    sync::Arc,
};

use arrow_buffer::{Buffer, MutableBuffer, ScalarBuffer};
use hmac_sha256::Hash;
use memmap2::Mmap;

pub use nrt_config::ReadMode;

use crate::{
    error::{FormatResult, ReadingError},
    layout::{self, Element, FieldLevel},
    manifest::Manifest,
    tensor::{NestedRaggedTensor, RaggedBuffers},
    writer::to_hex,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenOptions {
    pub mode: ReadMode,
    /// Hash every buffer and compare it with the manifest before returning.
    pub verify_checksums: bool,
}

impl OpenOptions {
    /// Options taken from the process configuration (`NRT_READ_MODE`,
    /// `NRT_VERIFY_CHECKSUMS`).
    pub fn from_config() -> Self {
        Self {
            mode: nrt_config::CONFIG.read_mode,
            verify_checksums: nrt_config::CONFIG.verify_checksums,
        }
    }

    pub fn eager() -> Self {
        Self {
            mode: ReadMode::Eager,
            ..Default::default()
        }
    }

    pub fn lazy() -> Self {
        Self {
            mode: ReadMode::Lazy,
            ..Default::default()
        }
    }

    pub fn with_checksums(mut self, verify_checksums: bool) -> Self {
        self.verify_checksums = verify_checksums;
        self
    }
}

/// Strategy that turns one field file into an Arrow buffer.
pub trait FieldLoader: Send + Sync {
    fn mode(&self) -> ReadMode;

    /// Loads the file at `path`, whose length has already been checked to be
    /// `byte_len`.
    fn load(&self, path: &Path, byte_len: usize) -> FormatResult<Buffer>;
}

/// Copies every file into owned, 64 byte aligned memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct EagerLoader;

impl FieldLoader for EagerLoader {
    fn mode(&self) -> ReadMode {
        ReadMode::Eager
    }

    fn load(&self, path: &Path, byte_len: usize) -> FormatResult<Buffer> {
        let to_error = |source| ReadingError::FieldLoadFailure {
            path: path.to_path_buf(),
            source,
        };
        let mut file = File::open(path).map_err(to_error)?;
        let mut buffer = MutableBuffer::from_len_zeroed(byte_len);
        file.read_exact(buffer.as_slice_mut()).map_err(to_error)?;
        Ok(buffer.into())
    }
}

/// Maps every file read-only. The mapping is owned by the returned buffer and
/// released when the last slice referencing it is dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct MmapLoader;

impl FieldLoader for MmapLoader {
    fn mode(&self) -> ReadMode {
        ReadMode::Lazy
    }

    fn load(&self, path: &Path, byte_len: usize) -> FormatResult<Buffer> {
        if byte_len == 0 {
            return Ok(MutableBuffer::new(0).into());
        }
        let to_error = |source| ReadingError::FieldLoadFailure {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(to_error)?;
        // SAFETY: datasets are immutable once published; nothing writes to the
        // file while it is mapped.
        let mmap = unsafe { Mmap::map(&file) }.map_err(to_error)?;
        if mmap.len() != byte_len {
            return Err(ReadingError::FieldLength {
                field: "mapped file",
                expected: byte_len as u64,
                actual: mmap.len() as u64,
            }
            .into());
        }
        let ptr = NonNull::new(mmap.as_ptr() as *mut u8).ok_or_else(|| {
            to_error(std::io::Error::other("mapping returned a null pointer"))
        })?;
        // SAFETY: `ptr` points to `byte_len` readable bytes that stay valid for
        // as long as the owning `Mmap` lives, which the buffer keeps alive.
        Ok(unsafe { Buffer::from_custom_allocation(ptr, byte_len, Arc::new(mmap)) })
    }
}

pub fn loader_for(mode: ReadMode) -> Box<dyn FieldLoader> {
    match mode {
        ReadMode::Eager => Box::new(EagerLoader),
        ReadMode::Lazy => Box::new(MmapLoader),
    }
}

/// An opened, validated dataset.
#[derive(Debug, Clone)]
pub struct DatasetReader {
    root: PathBuf,
    manifest: Manifest,
    mode: ReadMode,
    tensor: NestedRaggedTensor,
}

impl DatasetReader {
    pub fn open(dir: impl AsRef<Path>, options: OpenOptions) -> FormatResult<Self> {
        let loader = loader_for(options.mode);
        Self::open_with_loader(dir, loader.as_ref(), options.verify_checksums)
    }

    pub fn open_with_loader(
        dir: impl AsRef<Path>,
        loader: &dyn FieldLoader,
        verify_checksums: bool,
    ) -> FormatResult<Self> {
        let root = dir.as_ref().to_path_buf();
        let manifest = Manifest::load(&root)?;

        let fields = FieldSource {
            root: &root,
            manifest: &manifest,
            loader,
            verify_checksums,
        };
        let buffers = RaggedBuffers {
            static_code: fields.load::<u32>(layout::STATIC_CODE, FieldLevel::Dim0)?,
            static_present: fields.load::<u8>(layout::STATIC_PRESENT, FieldLevel::Dim0)?,
            timedelta: fields.load::<f32>(layout::TIMEDELTA, FieldLevel::Dim1)?,
            dynamic_code: fields.load::<u32>(layout::DYNAMIC_CODE, FieldLevel::Dim2)?,
            dynamic_value: fields.load::<f32>(layout::DYNAMIC_VALUE, FieldLevel::Dim2)?,
            dim1_bounds: fields.load::<u64>(layout::DIM1_BOUNDS, FieldLevel::Dim1Bounds)?,
            dim2_bounds: fields.load::<u64>(layout::DIM2_BOUNDS, FieldLevel::Dim2Bounds)?,
        };

        let actual = buffers.dim1_bounds.len().saturating_sub(1) as u64;
        if actual != manifest.num_items {
            return Err(ReadingError::ItemCountMismatch {
                declared: manifest.num_items,
                actual,
            }
            .into());
        }
        let tensor = NestedRaggedTensor::try_new(buffers)?;

        tracing::debug!(
            path = %root.display(),
            mode = %loader.mode(),
            verify_checksums,
            items = tensor.num_items(),
            "opened dataset"
        );
        Ok(Self {
            root,
            manifest,
            mode: loader.mode(),
            tensor,
        })
    }

    pub fn tensor(&self) -> &NestedRaggedTensor {
        &self.tensor
    }

    pub fn into_tensor(self) -> NestedRaggedTensor {
        self.tensor
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn mode(&self) -> ReadMode {
        self.mode
    }

    pub fn path(&self) -> &Path {
        &self.root
    }
}

impl NestedRaggedTensor {
    /// Opens the dataset at `dir`. See [`DatasetReader::open`].
    pub fn open(dir: impl AsRef<Path>, options: OpenOptions) -> FormatResult<Self> {
        DatasetReader::open(dir, options).map(DatasetReader::into_tensor)
    }
}

struct FieldSource<'a> {
    root: &'a Path,
    manifest: &'a Manifest,
    loader: &'a dyn FieldLoader,
    verify_checksums: bool,
}

impl FieldSource<'_> {
    fn load<T: Element>(
        &self,
        field: &'static str,
        level: FieldLevel,
    ) -> FormatResult<ScalarBuffer<T>> {
        let entry = self.manifest.field::<T>(field, level)?;
        let path = self.root.join(&entry.file);

        let on_disk = std::fs::metadata(&path)
            .map_err(|source| ReadingError::FieldLoadFailure {
                path: path.clone(),
                source,
            })?
            .len();
        let expected = entry.byte_len();
        if on_disk != expected {
            return Err(ReadingError::FieldLength {
                field,
                expected,
                actual: on_disk,
            }
            .into());
        }

        let buffer = self.loader.load(&path, expected as usize)?;

        if self.verify_checksums {
            let mut hasher = Hash::new();
            hasher.update(buffer.as_slice());
            let actual = to_hex(&hasher.finalize());
            if actual != entry.sha256 {
                return Err(ReadingError::ChecksumMismatch {
                    field,
                    expected: entry.sha256.clone(),
                    actual,
                }
                .into());
            }
        }

        if buffer.as_ptr().align_offset(std::mem::align_of::<T>()) != 0 {
            return Err(ReadingError::Misaligned(field).into());
        }
        Ok(ScalarBuffer::new(buffer, 0, entry.count as usize))
    }
}
