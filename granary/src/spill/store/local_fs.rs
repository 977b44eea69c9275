//! Object store on the local file system

use std::fs;
use std::path::{Path, PathBuf};

use snafu::{ResultExt, ensure};

use super::{BlobHandle, IoSnafu, ObjectStore, Result, SizeMismatchSnafu, StoreState};

const HEALTH_FILE: &str = ".granary-health";

/// Object store that writes each blob as a file under the root directory. The `/` in
/// the key creates sub directories
#[derive(Debug, Clone)]
pub struct LocalFsObjectStore {
    root: PathBuf,
}

impl LocalFsObjectStore {
    /// Create a store rooted at the directory. The directory is not created
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl ObjectStore for LocalFsObjectStore {
    fn write(&self, key: &str, bytes: &[u8]) -> Result<BlobHandle> {
        let path = self.path_of(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context(IoSnafu { key })?;
        }
        // Write to a temporary file first, readers never see a partial blob
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes).context(IoSnafu { key })?;
        fs::rename(&tmp, &path).context(IoSnafu { key })?;
        Ok(BlobHandle::new(key.to_string(), bytes.len()))
    }

    fn read(&self, handle: &BlobHandle) -> Result<Vec<u8>> {
        let bytes = fs::read(self.path_of(handle.key())).context(IoSnafu {
            key: handle.key(),
        })?;
        ensure!(
            bytes.len() == handle.size(),
            SizeMismatchSnafu {
                key: handle.key(),
                expect: handle.size(),
                actual: bytes.len()
            }
        );
        Ok(bytes)
    }

    fn delete(&self, handle: &BlobHandle) -> Result<()> {
        fs::remove_file(self.path_of(handle.key())).context(IoSnafu { key: handle.key() })
    }

    fn state(&self) -> StoreState {
        match fs::metadata(&self.root) {
            Ok(metadata) if metadata.is_dir() => {}
            Ok(_) => {
                return StoreState::Bad(format!("`{}` is not a directory", self.root.display()));
            }
            Err(e) => {
                return StoreState::Bad(format!("`{}` is not accessible: {e}", self.root.display()));
            }
        }

        let health = self.root.join(HEALTH_FILE);
        match fs::write(&health, b"ok").and_then(|_| fs::remove_file(&health)) {
            Ok(()) => StoreState::Good,
            Err(e) => StoreState::Degraded(format!(
                "`{}` can not be written: {e}",
                self.root.display()
            )),
        }
    }
}
