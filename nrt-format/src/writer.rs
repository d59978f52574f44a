//! Persists a [`NestedRaggedTensor`] as a dataset directory.
//!
//! Every buffer goes to its own file inside a staging directory created next to
//! the target. Files are fsynced, the manifest is written last, and the staging
//! directory is published with a single rename. A failure at any point removes
//! the staging directory, so a reader never observes a partially written dataset.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use arrow_buffer::ScalarBuffer;
use hmac_sha256::Hash;

use crate::{
    error::{FormatResult, WritingError},
    layout::{self, ByteOrder, Element, FieldLevel},
    manifest::{FieldEntry, Manifest},
    tensor::NestedRaggedTensor,
};

const WRITE_BUFFER_SIZE: usize = 1024 * 1024;

pub struct DatasetWriter {
    target: PathBuf,
}

impl DatasetWriter {
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
        }
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Writes `tensor` and returns the published manifest.
    ///
    /// # Errors
    /// Fails if the target already exists (datasets are immutable once
    /// published), if any file cannot be written, or if the host is big-endian.
    ///
    /// The target is checked before staging and again just before the rename.
    /// A directory created at the target between that last check and the
    /// rename is replaced if it is empty; a non-empty one makes the rename fail.
    pub fn write(&self, tensor: &NestedRaggedTensor) -> FormatResult<Manifest> {
        self.publish(tensor, |dir| stage_into(dir, tensor))
    }

    /// Runs `stage` inside a fresh staging directory and publishes the result.
    /// The staging directory is removed if `stage` or the publish fails.
    fn publish(
        &self,
        tensor: &NestedRaggedTensor,
        stage: impl FnOnce(&Path) -> FormatResult<Manifest>,
    ) -> FormatResult<Manifest> {
        if ByteOrder::host() != ByteOrder::Little {
            return Err(WritingError::UnsupportedByteOrder(ByteOrder::host().name()).into());
        }
        if self.target.exists() {
            return Err(WritingError::AlreadyExists(self.target.clone()).into());
        }

        let parent = match self.target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent).map_err(|source| WritingError::StagingFailure {
            path: self.target.clone(),
            source,
        })?;
        let staging = tempfile::Builder::new()
            .prefix(layout::STAGING_PREFIX)
            .tempdir_in(&parent)
            .map_err(|source| WritingError::StagingFailure {
                path: self.target.clone(),
                source,
            })?;

        let manifest = stage(staging.path())?;

        if self.target.exists() {
            return Err(WritingError::AlreadyExists(self.target.clone()).into());
        }
        // The staging directory no longer exists after the rename; dropping the
        // guard afterwards is a no-op.
        std::fs::rename(staging.path(), &self.target).map_err(|source| {
            WritingError::PublishFailure {
                path: self.target.clone(),
                source,
            }
        })?;
        drop(staging);

        match File::open(&parent).and_then(|d| d.sync_all()) {
            Ok(()) => {}
            Err(err) => tracing::debug!(
                parent = %parent.display(),
                error = %err,
                "could not sync parent directory after publish"
            ),
        }

        tracing::info!(
            path = %self.target.display(),
            items = tensor.num_items(),
            event_groups = tensor.num_event_groups(),
            measurements = tensor.num_measurements(),
            "published dataset"
        );
        Ok(manifest)
    }
}

/// Writes every field of `tensor` into `dir`, then the manifest.
fn stage_into(dir: &Path, tensor: &NestedRaggedTensor) -> FormatResult<Manifest> {
    let buffers = tensor.buffers();
    let mut manifest = Manifest::new(tensor.num_items() as u64);
    write_field(dir, &mut manifest, layout::STATIC_CODE, FieldLevel::Dim0, &buffers.static_code)?;
    write_field(
        dir,
        &mut manifest,
        layout::STATIC_PRESENT,
        FieldLevel::Dim0,
        &buffers.static_present,
    )?;
    write_field(dir, &mut manifest, layout::TIMEDELTA, FieldLevel::Dim1, &buffers.timedelta)?;
    write_field(
        dir,
        &mut manifest,
        layout::DYNAMIC_CODE,
        FieldLevel::Dim2,
        &buffers.dynamic_code,
    )?;
    write_field(
        dir,
        &mut manifest,
        layout::DYNAMIC_VALUE,
        FieldLevel::Dim2,
        &buffers.dynamic_value,
    )?;
    write_field(
        dir,
        &mut manifest,
        layout::DIM1_BOUNDS,
        FieldLevel::Dim1Bounds,
        &buffers.dim1_bounds,
    )?;
    write_field(
        dir,
        &mut manifest,
        layout::DIM2_BOUNDS,
        FieldLevel::Dim2Bounds,
        &buffers.dim2_bounds,
    )?;

    let manifest_bytes = manifest.to_json().map_err(WritingError::ManifestEncode)?;
    write_file(&dir.join(layout::MANIFEST_FILE), |writer| {
        writer.write_all(&manifest_bytes)
    })?;
    Ok(manifest)
}

impl NestedRaggedTensor {
    /// Persists this tensor to `target`. See [`DatasetWriter::write`].
    pub fn save(&self, target: impl Into<PathBuf>) -> FormatResult<Manifest> {
        DatasetWriter::new(target).write(self)
    }
}

fn write_field<T: Element>(
    dir: &Path,
    manifest: &mut Manifest,
    field: &'static str,
    level: FieldLevel,
    values: &ScalarBuffer<T>,
) -> FormatResult<()> {
    let file = layout::field_file_name(field);
    let path = dir.join(&file);
    let bytes = values.inner().as_slice();

    let mut hasher = Hash::new();
    hasher.update(bytes);
    let sha256 = to_hex(&hasher.finalize());

    write_file(&path, |writer| writer.write_all(bytes))?;
    tracing::debug!(field, bytes = bytes.len(), "wrote field");

    manifest.fields.insert(
        field.to_string(),
        FieldEntry {
            file,
            dtype: T::DTYPE,
            byte_width: T::DTYPE.byte_width(),
            count: values.len() as u64,
            level,
            sha256,
        },
    );
    Ok(())
}

fn write_file(
    path: &Path,
    write: impl FnOnce(&mut BufWriter<File>) -> std::io::Result<()>,
) -> FormatResult<()> {
    let to_error = |source| WritingError::FileWriteFailure {
        path: path.to_path_buf(),
        source,
    };
    let file = File::create(path).map_err(to_error)?;
    let mut writer = BufWriter::with_capacity(WRITE_BUFFER_SIZE, file);
    write(&mut writer).map_err(to_error)?;
    let file = writer.into_inner().map_err(|err| to_error(err.into_error()))?;
    file.sync_all().map_err(to_error)?;
    Ok(())
}

pub(crate) fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        builder::{EventGroup, Item, RaggedBuilder},
        error::FormatError,
    };

    fn tensor() -> NestedRaggedTensor {
        RaggedBuilder::build([Item::new(
            Some(2),
            vec![EventGroup::new(0.0, [(5, 1.5), (6, f32::NAN)])],
        )])
        .unwrap()
    }

    #[test]
    fn writes_one_file_per_field_plus_manifest() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("data.nrt");
        let manifest = tensor().save(&target).unwrap();

        assert_eq!(manifest.num_items, 1);
        assert_eq!(
            manifest.fields.keys().map(String::as_str).collect::<Vec<_>>(),
            layout::FIELDS.to_vec()
        );
        for entry in manifest.fields.values() {
            let len = std::fs::metadata(target.join(&entry.file)).unwrap().len();
            assert_eq!(len, entry.byte_len());
            assert_eq!(entry.sha256.len(), 64);
        }
        assert!(target.join(layout::MANIFEST_FILE).is_file());
        assert_eq!(manifest.fields[layout::DYNAMIC_VALUE].count, 2);
        assert_eq!(manifest.fields[layout::DIM2_BOUNDS].count, 2);
    }

    #[test]
    fn no_staging_directory_survives_publish() {
        let root = tempfile::tempdir().unwrap();
        tensor().save(root.path().join("data.nrt")).unwrap();
        let names: Vec<_> = std::fs::read_dir(root.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["data.nrt".to_string()]);
    }

    #[test]
    fn existing_target_is_never_overwritten() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("data.nrt");
        tensor().save(&target).unwrap();
        let before = std::fs::read(target.join(layout::MANIFEST_FILE)).unwrap();

        let err = tensor().save(&target).unwrap_err();
        assert!(matches!(err, FormatError::Writing(WritingError::AlreadyExists(_))));
        assert_eq!(std::fs::read(target.join(layout::MANIFEST_FILE)).unwrap(), before);
    }

    fn entries(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn failed_field_write_removes_staging_directory() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("data.nrt");
        let tensor = tensor();

        let err = DatasetWriter::new(&target)
            .publish(&tensor, |dir| {
                // A directory where a field file should go makes its creation fail.
                std::fs::create_dir(dir.join(layout::field_file_name(layout::TIMEDELTA)))
                    .unwrap();
                stage_into(dir, &tensor)
            })
            .unwrap_err();

        assert!(matches!(
            err,
            FormatError::Writing(WritingError::FileWriteFailure { .. })
        ));
        assert!(!target.exists());
        assert!(entries(root.path()).is_empty());
    }

    #[test]
    fn failure_after_staging_everything_publishes_nothing() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("data.nrt");
        let tensor = tensor();

        let err = DatasetWriter::new(&target)
            .publish(&tensor, |dir| {
                stage_into(dir, &tensor)?;
                assert!(dir.join(layout::MANIFEST_FILE).is_file());
                Err(WritingError::FileWriteFailure {
                    path: dir.to_path_buf(),
                    source: std::io::Error::other("device full"),
                }
                .into())
            })
            .unwrap_err();

        assert!(matches!(err, FormatError::Writing(_)));
        assert!(!target.exists());
        assert!(entries(root.path()).is_empty());
    }

    #[test]
    fn empty_directory_at_target_is_not_replaced() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("data.nrt");
        std::fs::create_dir(&target).unwrap();

        assert!(matches!(
            tensor().save(&target),
            Err(FormatError::Writing(WritingError::AlreadyExists(_)))
        ));
        assert!(entries(&target).is_empty());
        assert_eq!(entries(root.path()), vec!["data.nrt".to_string()]);
    }

    #[test]
    fn manifest_is_byte_stable_across_writes() {
        let root = tempfile::tempdir().unwrap();
        tensor().save(root.path().join("a")).unwrap();
        tensor().save(root.path().join("b")).unwrap();
        assert_eq!(
            std::fs::read(root.path().join("a").join(layout::MANIFEST_FILE)).unwrap(),
            std::fs::read(root.path().join("b").join(layout::MANIFEST_FILE)).unwrap()
        );
    }

    #[test]
    fn hex_encoding_is_lowercase_and_padded() {
        assert_eq!(to_hex(&[0x00, 0x0f, 0xab]), "000fab");
    }
}
