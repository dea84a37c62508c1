//! Where installed extensions live.
//!
//! One directory per extension under a base directory. The directory name
//! is the extension identifier; the directory holds the module file and an
//! optional manifest.

use crate::{
    Error, Result,
    input::{ElfBinary, ElfReader},
};
use alloc::{collections::BTreeMap, string::String, vec::Vec};

/// Checks that `id` names a single directory directly under the base:
/// non-empty, at most `max_len` bytes, not `.` or `..`, and free of path
/// separators and NUL.
pub fn validate_id(id: &str, max_len: usize) -> Result<()> {
    let plain = !id.is_empty()
        && id.len() <= max_len
        && id != "."
        && id != ".."
        && !id.contains(['/', '\\', '\0']);
    if plain {
        Ok(())
    } else {
        Err(Error::InvalidId { id: id.into() })
    }
}

/// Storage of installed extensions.
pub trait ExtensionStore {
    /// Reader over one module file.
    type Reader: ElfReader;

    /// Creates the base directory if it does not exist.
    fn ensure_base(&mut self) -> Result<()>;

    /// Identifiers of all installed extensions, sorted.
    fn list(&mut self) -> Result<Vec<String>>;

    /// Opens the module of `id`, `None` when it has no module file.
    fn open_module(&mut self, id: &str) -> Result<Option<Self::Reader>>;

    /// Reads the manifest of `id`, `None` when there is none.
    fn read_manifest(&mut self, id: &str) -> Result<Option<Vec<u8>>>;

    /// Creates the directory for `id`; an existing one is fine.
    fn prepare(&mut self, id: &str) -> Result<()>;

    /// Removes the module and manifest of `id`, then its directory if
    /// that left it empty. Missing files are fine.
    fn remove(&mut self, id: &str) -> Result<()>;
}

#[derive(Clone, Debug, Default)]
struct MemEntry {
    module: Option<Vec<u8>>,
    manifest: Option<Vec<u8>>,
}

/// An [`ExtensionStore`] held in memory.
#[derive(Clone, Debug, Default)]
pub struct MemStore {
    entries: BTreeMap<String, MemEntry>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a module, replacing any previous one.
    pub fn install(&mut self, id: impl Into<String>, module: Vec<u8>) -> &mut Self {
        self.entries.entry(id.into()).or_default().module = Some(module);
        self
    }

    pub fn set_manifest(&mut self, id: impl Into<String>, manifest: impl Into<Vec<u8>>) -> &mut Self {
        self.entries.entry(id.into()).or_default().manifest = Some(manifest.into());
        self
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }
}

impl ExtensionStore for MemStore {
    type Reader = ElfBinary<'static>;

    fn ensure_base(&mut self) -> Result<()> {
        Ok(())
    }

    fn list(&mut self) -> Result<Vec<String>> {
        Ok(self.entries.keys().cloned().collect())
    }

    fn open_module(&mut self, id: &str) -> Result<Option<Self::Reader>> {
        Ok(self
            .entries
            .get(id)
            .and_then(|entry| entry.module.clone())
            .map(|bytes| ElfBinary::from_vec(id, bytes)))
    }

    fn read_manifest(&mut self, id: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(id).and_then(|entry| entry.manifest.clone()))
    }

    fn prepare(&mut self, id: &str) -> Result<()> {
        self.entries.entry(id.into()).or_default();
        Ok(())
    }

    fn remove(&mut self, id: &str) -> Result<()> {
        self.entries.remove(id);
        Ok(())
    }
}

#[cfg(feature = "std")]
mod fs {
    use super::{ExtensionStore, validate_id};
    use crate::{DEFAULT_MAX_ID_LEN, ManagerConfig, Result, error::io_error, input::ElfFile};
    use alloc::{string::String, vec::Vec};
    use std::{
        fs,
        io::ErrorKind,
        path::{Path, PathBuf},
    };

    /// An [`ExtensionStore`] on the host filesystem.
    #[derive(Clone, Debug)]
    pub struct FsStore {
        base: PathBuf,
        module_file: String,
        manifest_file: String,
        max_id_len: usize,
    }

    impl FsStore {
        pub fn new(base: impl AsRef<Path>, module_file: &str, manifest_file: &str) -> Self {
            Self {
                base: base.as_ref().to_path_buf(),
                module_file: module_file.into(),
                manifest_file: manifest_file.into(),
                max_id_len: DEFAULT_MAX_ID_LEN,
            }
        }

        /// A store laid out as `config` describes.
        pub fn from_config(config: &ManagerConfig) -> Self {
            Self::new(&config.base_dir, &config.module_file, &config.manifest_file)
                .with_max_id_len(config.max_id_len)
        }

        pub fn with_max_id_len(mut self, max: usize) -> Self {
            self.max_id_len = max;
            self
        }

        /// Directory of `id`, which must be a plain name.
        fn dir(&self, id: &str) -> Result<PathBuf> {
            validate_id(id, self.max_id_len)?;
            Ok(self.base.join(id))
        }

        pub fn base(&self) -> &Path {
            &self.base
        }

        /// Path of the module file of `id`.
        pub fn module_path(&self, id: &str) -> PathBuf {
            self.base.join(id).join(&self.module_file)
        }
    }

    fn fs_error(what: &str, path: &Path, e: std::io::Error) -> crate::Error {
        io_error(alloc::format!("{what} {}: {e}", path.display()))
    }

    fn remove_file(path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(fs_error("remove", path, e)),
            _ => Ok(()),
        }
    }

    impl ExtensionStore for FsStore {
        type Reader = ElfFile;

        fn ensure_base(&mut self) -> Result<()> {
            fs::create_dir_all(&self.base).map_err(|e| fs_error("create", &self.base, e))
        }

        fn list(&mut self) -> Result<Vec<String>> {
            let dir = fs::read_dir(&self.base).map_err(|e| fs_error("list", &self.base, e))?;
            let mut ids = Vec::new();
            for entry in dir {
                let entry = entry.map_err(|e| fs_error("list", &self.base, e))?;
                let is_dir = entry.file_type().is_ok_and(|t| t.is_dir());
                if let (true, Some(name)) = (is_dir, entry.file_name().to_str()) {
                    if !name.starts_with('.') {
                        ids.push(name.into());
                    }
                }
            }
            ids.sort();
            Ok(ids)
        }

        fn open_module(&mut self, id: &str) -> Result<Option<Self::Reader>> {
            let path = self.dir(id)?.join(&self.module_file);
            match fs::File::open(&path) {
                Ok(file) => Ok(Some(ElfFile::from_file(&path.to_string_lossy(), file))),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
                Err(e) => Err(fs_error("open", &path, e)),
            }
        }

        fn read_manifest(&mut self, id: &str) -> Result<Option<Vec<u8>>> {
            let path = self.dir(id)?.join(&self.manifest_file);
            match fs::read(&path) {
                Ok(bytes) => Ok(Some(bytes)),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
                Err(e) => Err(fs_error("read", &path, e)),
            }
        }

        fn prepare(&mut self, id: &str) -> Result<()> {
            let path = self.dir(id)?;
            fs::create_dir_all(&path).map_err(|e| fs_error("create", &path, e))
        }

        fn remove(&mut self, id: &str) -> Result<()> {
            let dir = self.dir(id)?;
            remove_file(&dir.join(&self.module_file))?;
            remove_file(&dir.join(&self.manifest_file))?;
            // Anything else the extension left behind keeps the directory.
            match fs::remove_dir(&dir) {
                Err(e) if e.kind() != ErrorKind::NotFound => Err(fs_error("remove", &dir, e)),
                _ => Ok(()),
            }
        }
    }
}

#[cfg(feature = "std")]
pub use fs::FsStore;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_must_be_plain_names() {
        let longest = "x".repeat(32);
        for id in ["weather", "qr_code", "a.b", longest.as_str()] {
            assert!(validate_id(id, 32).is_ok(), "{id}");
        }
        let long = "x".repeat(33);
        for id in ["", ".", "..", "../x", "a/b", "a\\b", "nul\0", long.as_str()] {
            assert!(
                matches!(validate_id(id, 32), Err(Error::InvalidId { id: ref bad }) if bad == id),
                "{id:?}"
            );
        }
    }

    #[test]
    fn mem_store_lifecycle() {
        let mut store = MemStore::new();
        store.install("weather", vec![1, 2, 3]).set_manifest("weather", "{}");
        store.prepare("empty").unwrap();
        assert_eq!(store.list().unwrap(), ["empty", "weather"]);
        assert!(store.open_module("empty").unwrap().is_none());
        assert_eq!(store.open_module("weather").unwrap().unwrap().len(), 3);
        assert_eq!(store.read_manifest("weather").unwrap().as_deref(), Some(&b"{}"[..]));
        store.remove("weather").unwrap();
        store.remove("weather").unwrap();
        assert!(!store.contains("weather"));
    }
}
