use std::{
    ffi::OsString,
    fs::{self, File},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use crate::{
    error::PersistenceError,
    registry::{LinkMap, LinkRegistry},
};

/// The JSON file the registry is saved to.
///
/// Writes go to `<path>.tmp` first, which is then renamed over `<path>`,
/// so `<path>` always holds some complete snapshot.
#[derive(Debug)]
pub struct StateFile {
    path: PathBuf,
    temp_path: PathBuf,
    // Serializes writers of the temp file.
    write_lock: Mutex<()>,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut temp_path = OsString::from(path.as_os_str());
        temp_path.push(".tmp");

        Self {
            path,
            temp_path: PathBuf::from(temp_path),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// Read the registry back.
    /// If there's no file yet, one with no links is created.
    pub fn load(&self) -> Result<LinkRegistry, PersistenceError> {
        let contents = match fs::read(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::info!(
                    "No state file at {}, starting with no links.",
                    self.path.display()
                );
                let registry = LinkRegistry::new();
                self.flush(&registry)?;
                return Ok(registry);
            }
            Err(e) => return Err(PersistenceError::io(&self.path, e)),
        };

        let links: LinkMap =
            serde_json::from_slice(&contents).map_err(|source| PersistenceError::Corrupt {
                path: self.path.clone(),
                source,
            })?;

        Ok(LinkRegistry::from_map(links))
    }

    /// Save the registry. Returns how many links were written.
    ///
    /// On failure the previous snapshot stays untouched.
    pub fn flush(&self, registry: &LinkRegistry) -> Result<usize, PersistenceError> {
        let _writing = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        // Registry is only locked for this bit.
        let (bytes, count) = registry
            .encode_snapshot()
            .map_err(PersistenceError::Encode)?;

        let io_err = |e| PersistenceError::io(&self.temp_path, e);
        let mut file = File::create(&self.temp_path).map_err(io_err)?;
        file.write_all(&bytes).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        drop(file);

        fs::rename(&self.temp_path, &self.path)
            .map_err(|e| PersistenceError::io(&self.path, e))?;

        Ok(count)
    }
}

/// The registry together with where it's saved.
#[derive(Debug)]
pub struct LinkStore {
    pub registry: LinkRegistry,
    pub state: StateFile,
}

impl LinkStore {
    /// Load the links from `path`, see [`StateFile::load`].
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let state = StateFile::new(path);
        let registry = state.load()?;
        Ok(Self { registry, state })
    }

    pub fn flush(&self) -> Result<usize, PersistenceError> {
        self.state.flush(&self.registry)
    }
}
