//! Session file backends.
//!
//! Two formats are supported:
//! - **JSON** (always available): the whole [`Group`] tree as one document, rewritten
//!   atomically on every flush.
//! - **HDF5** (`storage_hdf5` feature): groups, attributes and 2×N `i64` datasets in a
//!   native HDF5 file. Datasets are chunked and resized on every flush.
//!
//! Both open existing files for appending so several sessions can share one file.

use super::session_file::Group;
use crate::error::{AppResult, DaqError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// On-disk format of the session file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageFormat {
    /// JSON document.
    #[default]
    Json,
    /// HDF5 file.
    Hdf5,
}

impl StorageFormat {
    /// File extension without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            StorageFormat::Json => "json",
            StorageFormat::Hdf5 => "h5",
        }
    }
}

/// Writable session file.
pub trait SessionStorage: Send {
    /// Location of the file.
    fn path(&self) -> &Path;

    /// Whether a group exists at `path`.
    fn group_exists(&self, path: &str) -> AppResult<bool>;

    /// Write `group` at `path`.
    ///
    /// Attributes and datasets named in `group` overwrite those already stored; a
    /// dataset takes the shape of the new one.
    fn write_group(&mut self, path: &str, group: &Group) -> AppResult<()>;

    /// Make everything written so far durable.
    fn flush(&mut self) -> AppResult<()>;

    /// Flush and release the file.
    fn close(&mut self) -> AppResult<()>;
}

/// Open `path` for appending in `format`.
pub fn open_storage(format: StorageFormat, path: &Path) -> AppResult<Box<dyn SessionStorage>> {
    match format {
        StorageFormat::Json => Ok(Box::new(JsonStorage::open(path)?)),
        #[cfg(feature = "storage_hdf5")]
        StorageFormat::Hdf5 => Ok(Box::new(hdf5_backend::Hdf5Storage::open(path)?)),
        #[cfg(not(feature = "storage_hdf5"))]
        StorageFormat::Hdf5 => Err(DaqError::FeatureNotEnabled("storage_hdf5".to_string())),
    }
}

fn file_create_error(path: &Path, message: impl ToString) -> DaqError {
    DaqError::FileCreate {
        path: path.to_path_buf(),
        message: message.to_string(),
    }
}

fn ensure_parent_dir(path: &Path) -> AppResult<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            std::fs::create_dir_all(parent).map_err(|e| file_create_error(path, e))
        }
        _ => Ok(()),
    }
}

/// JSON session file.
#[derive(Debug)]
pub struct JsonStorage {
    path: PathBuf,
    root: Group,
    dirty: bool,
}

impl JsonStorage {
    /// Open `path`, loading it when it already exists.
    ///
    /// A new file is written immediately so an unwritable location is reported as
    /// [`DaqError::FileCreate`] before any session data is at stake.
    pub fn open(path: &Path) -> AppResult<Self> {
        ensure_parent_dir(path)?;

        let root = if path.exists() {
            Self::read(path).map_err(|e| file_create_error(path, e))?
        } else {
            Group::new()
        };

        let mut storage = Self {
            path: path.to_path_buf(),
            root,
            dirty: true,
        };
        storage.persist().map_err(|e| file_create_error(path, e))?;
        Ok(storage)
    }

    /// Load a JSON session file.
    pub fn read(path: &Path) -> AppResult<Group> {
        let text = std::fs::read_to_string(path)?;
        if text.trim().is_empty() {
            return Ok(Group::new());
        }
        Ok(serde_json::from_str(&text)?)
    }

    /// In-memory view of the file.
    pub fn root(&self) -> &Group {
        &self.root
    }

    fn persist(&mut self) -> AppResult<()> {
        if !self.dirty {
            return Ok(());
        }
        let text = serde_json::to_string_pretty(&self.root)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, &self.path)?;
        self.dirty = false;
        debug!("Session file '{}' written", self.path.display());
        Ok(())
    }
}

impl SessionStorage for JsonStorage {
    fn path(&self) -> &Path {
        &self.path
    }

    fn group_exists(&self, path: &str) -> AppResult<bool> {
        Ok(self.root.contains(path))
    }

    fn write_group(&mut self, path: &str, group: &Group) -> AppResult<()> {
        self.root.replace(path, group.clone());
        self.dirty = true;
        Ok(())
    }

    fn flush(&mut self) -> AppResult<()> {
        self.persist()
    }

    fn close(&mut self) -> AppResult<()> {
        self.persist()
    }
}

#[cfg(feature = "storage_hdf5")]
mod hdf5_backend {
    use super::{ensure_parent_dir, file_create_error, SessionStorage};
    use crate::data::session_file::{AttrValue, Dataset, Group};
    use crate::error::{AppResult, DaqError};
    use hdf5::types::VarLenUnicode;
    use std::path::{Path, PathBuf};

    fn storage_error(e: hdf5::Error) -> DaqError {
        DaqError::Storage(e.to_string())
    }

    /// HDF5 session file.
    pub struct Hdf5Storage {
        path: PathBuf,
        file: Option<hdf5::File>,
    }

    impl Hdf5Storage {
        pub fn open(path: &Path) -> AppResult<Self> {
            ensure_parent_dir(path)?;
            let file = hdf5::File::append(path).map_err(|e| file_create_error(path, e))?;
            Ok(Self {
                path: path.to_path_buf(),
                file: Some(file),
            })
        }

        fn file(&self) -> AppResult<&hdf5::File> {
            self.file
                .as_ref()
                .ok_or_else(|| DaqError::Storage(format!("'{}' is closed", self.path.display())))
        }
    }

    /// Columns per chunk of an event dataset.
    const CHUNK_COLUMNS: usize = 4096;

    fn write_attr(target: &hdf5::Group, name: &str, value: &AttrValue) -> hdf5::Result<()> {
        let existing = target.attr_names()?.iter().any(|n| n == name);
        let attr = match value {
            // zero-length attribute stands in for null
            AttrValue::Null if existing => return Ok(()),
            AttrValue::Null => {
                target.new_attr::<i64>().shape(0).create(name)?;
                return Ok(());
            }
            _ if existing => target.attr(name)?,
            AttrValue::Bool(_) => target.new_attr::<bool>().create(name)?,
            AttrValue::Int(_) => target.new_attr::<i64>().create(name)?,
            AttrValue::Float(_) => target.new_attr::<f64>().create(name)?,
            AttrValue::Text(_) => target.new_attr::<VarLenUnicode>().create(name)?,
        };
        match value {
            AttrValue::Null => {}
            AttrValue::Bool(v) => attr.write_scalar(v)?,
            AttrValue::Int(v) => attr.write_scalar(v)?,
            AttrValue::Float(v) => attr.write_scalar(v)?,
            AttrValue::Text(v) => {
                let text: VarLenUnicode = v
                    .parse()
                    .map_err(|e| hdf5::Error::from(format!("attribute '{name}': {e}")))?;
                attr.write_scalar(&text)?;
            }
        }
        Ok(())
    }

    /// Event datasets are chunked along the column axis and resized in place on later
    /// writes.
    fn write_dataset(target: &hdf5::Group, name: &str, dataset: &Dataset) -> hdf5::Result<()> {
        let [rows, columns] = dataset.shape;
        let stored = if target.link_exists(name) {
            target.dataset(name)?
        } else {
            target
                .new_dataset::<i64>()
                .chunk((rows.max(1), CHUNK_COLUMNS))
                .shape((rows, 0..))
                .create(name)?
        };
        if stored.shape() != dataset.shape {
            stored.resize((rows, columns))?;
        }
        if columns > 0 {
            stored.write_raw(dataset.flat().as_slice())?;
        }
        Ok(())
    }

    fn open_or_create(parent: &hdf5::Group, name: &str) -> hdf5::Result<hdf5::Group> {
        if parent.link_exists(name) {
            parent.group(name)
        } else {
            parent.create_group(name)
        }
    }

    fn write_tree(target: &hdf5::Group, group: &Group) -> hdf5::Result<()> {
        for (name, value) in &group.attrs {
            write_attr(target, name, value)?;
        }
        for (name, dataset) in &group.datasets {
            write_dataset(target, name, dataset)?;
        }
        for (name, child) in &group.groups {
            write_tree(&open_or_create(target, name)?, child)?;
        }
        Ok(())
    }

    impl SessionStorage for Hdf5Storage {
        fn path(&self) -> &Path {
            &self.path
        }

        fn group_exists(&self, path: &str) -> AppResult<bool> {
            Ok(self.file()?.link_exists(path))
        }

        fn write_group(&mut self, path: &str, group: &Group) -> AppResult<()> {
            let mut parent = hdf5::Group::clone(self.file()?);
            for level in path.split('/').filter(|s| !s.is_empty()) {
                parent = open_or_create(&parent, level).map_err(storage_error)?;
            }
            write_tree(&parent, group).map_err(storage_error)
        }

        fn flush(&mut self) -> AppResult<()> {
            self.file()?.flush().map_err(storage_error)
        }

        fn close(&mut self) -> AppResult<()> {
            if let Some(file) = self.file.take() {
                file.flush().map_err(storage_error)?;
                file.close().map_err(storage_error)?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::session_file::AttrValue;
    use tempfile::tempdir;

    #[test]
    fn json_round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/session.json");

        let mut storage = JsonStorage::open(&path).unwrap();
        assert!(path.exists(), "file is created on open");

        let mut group = Group::new();
        group.set_attr("notes", "first");
        storage.write_group("mouse/2024-01-01", &group).unwrap();
        storage.flush().unwrap();

        let root = JsonStorage::read(&path).unwrap();
        assert_eq!(
            root.get("mouse/2024-01-01").and_then(|g| g.attr("notes")),
            Some(&AttrValue::Text("first".into()))
        );
    }

    #[test]
    fn json_appends_to_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.json");

        let mut first = JsonStorage::open(&path).unwrap();
        first.write_group("a/1", &Group::new()).unwrap();
        first.close().unwrap();

        let mut second = JsonStorage::open(&path).unwrap();
        assert!(second.group_exists("a/1").unwrap());
        second.write_group("a/2", &Group::new()).unwrap();
        second.close().unwrap();

        let root = JsonStorage::read(&path).unwrap();
        assert!(root.contains("a/1") && root.contains("a/2"));
    }

    #[test]
    fn unwritable_location_is_a_file_create_error() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();

        let err = JsonStorage::open(&blocker.join("session.json")).unwrap_err();
        assert!(matches!(err, DaqError::FileCreate { .. }), "{err}");
    }

    #[test]
    fn extension_follows_format() {
        assert_eq!(StorageFormat::Json.extension(), "json");
        assert_eq!(StorageFormat::Hdf5.extension(), "h5");
    }

    #[cfg(not(feature = "storage_hdf5"))]
    #[test]
    fn hdf5_needs_feature() {
        let dir = tempdir().unwrap();
        let result = open_storage(StorageFormat::Hdf5, &dir.path().join("x.h5"));
        assert!(matches!(result, Err(DaqError::FeatureNotEnabled(_))));
    }

    #[cfg(feature = "storage_hdf5")]
    #[test]
    fn hdf5_writes_groups_and_datasets() {
        use crate::data::session_file::Dataset;

        let dir = tempdir().unwrap();
        let path = dir.path().join("session.h5");
        let mut storage = open_storage(StorageFormat::Hdf5, &path).unwrap();

        let mut group = Group::new();
        group.set_attr("arduino_end", None::<i64>);
        group.set_attr("subject", "m1");
        group.set_dataset("lick", Dataset::from_rows(vec![10, 20], vec![1, 0]));
        storage.write_group("m1/2024-01-01/behavior", &group).unwrap();
        storage.close().unwrap();

        let file = hdf5::File::open(&path).unwrap();
        let lick = file.dataset("m1/2024-01-01/behavior/lick").unwrap();
        assert_eq!(lick.shape(), vec![2, 2]);
        assert_eq!(lick.read_raw::<i64>().unwrap(), vec![10, 20, 1, 0]);
    }

    #[cfg(feature = "storage_hdf5")]
    #[test]
    fn hdf5_repeated_flushes_update_in_place() {
        use crate::data::session_file::Dataset;

        let dir = tempdir().unwrap();
        let path = dir.path().join("session.h5");
        let mut storage = open_storage(StorageFormat::Hdf5, &path).unwrap();

        let write = |storage: &mut Box<dyn SessionStorage>, columns: i64| {
            let mut group = Group::new();
            group.set_attr("notes", "running");
            group.set_dataset(
                "lick",
                Dataset::from_rows((0..columns).collect(), vec![1; columns as usize]),
            );
            storage.write_group("m1/2024-01-01/behavior", &group).unwrap();
            storage.flush().unwrap();
        };

        write(&mut storage, 1000);
        let size_after_first = std::fs::metadata(&path).unwrap().len();
        for _ in 0..100 {
            write(&mut storage, 1000);
        }
        let size_after_many = std::fs::metadata(&path).unwrap().len();
        // a rewrite per flush would add about 16 KB each time
        assert!(
            size_after_many < size_after_first + 64 * 1024,
            "{size_after_first} -> {size_after_many}"
        );

        write(&mut storage, 1200);
        write(&mut storage, 3);
        storage.close().unwrap();

        let file = hdf5::File::open(&path).unwrap();
        let lick = file.dataset("m1/2024-01-01/behavior/lick").unwrap();
        assert_eq!(lick.shape(), vec![2, 3]);
        assert_eq!(lick.read_raw::<i64>().unwrap(), vec![0, 1, 2, 1, 1, 1]);
    }
}
