//! Shared access to tracking sidecar files.
//!
//! Tracking files (`_remote.repositories`, `*.lastUpdated`) are the only
//! cross-process shared state in the engine. Reads take a shared OS file
//! lock, updates an exclusive one, and an in-process lock interned per
//! canonical path keeps threads of the same process from racing the OS lock.

use std::collections::{BTreeMap, HashMap};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use depot_util::errors::{DepotError, DepotResult};
use depot_util::properties;

const LOCK_RETRIES: u32 = 8;
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Manages concurrent reads and updates of properties-format sidecars.
#[derive(Default)]
pub struct TrackingFileManager {
    intern: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl TrackingFileManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a tracking file. Missing files yield an empty map.
    pub fn read(&self, path: &Path) -> DepotResult<BTreeMap<String, String>> {
        let path_lock = self.path_lock(path);
        let _guard = path_lock.lock();

        let file = match OpenOptions::new().read(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(BTreeMap::new());
            }
            Err(e) => return Err(DepotError::io(e)),
        };
        lock_with_retry(&file, true, path)?;
        let result = std::fs::read(path).map(|data| properties::parse(&data));
        let _ = file.unlock();
        result.map_err(DepotError::io)
    }

    /// Apply updates to a tracking file under an exclusive lock and return
    /// the resulting state. A `None` value removes the key.
    pub fn update(
        &self,
        path: &Path,
        updates: &BTreeMap<String, Option<String>>,
        header: Option<&str>,
    ) -> DepotResult<BTreeMap<String, String>> {
        let path_lock = self.path_lock(path);
        let _guard = path_lock.lock();

        if let Some(parent) = path.parent() {
            depot_util::fs::ensure_dir(parent).map_err(DepotError::io)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(DepotError::io)?;
        lock_with_retry(&file, false, path)?;

        let result = (|| {
            let data = std::fs::read(path)?;
            let mut map = properties::parse(&data);
            for (key, value) in updates {
                match value {
                    Some(value) => {
                        map.insert(key.clone(), value.clone());
                    }
                    None => {
                        map.remove(key);
                    }
                }
            }
            std::fs::write(path, properties::render(&map, header))?;
            Ok::<_, std::io::Error>(map)
        })();
        let _ = file.unlock();
        result.map_err(DepotError::io)
    }

    /// The in-process lock for a path, interned by canonical form so that
    /// `a/../b` and `b` contend on the same lock.
    fn path_lock(&self, path: &Path) -> Arc<Mutex<()>> {
        let canonical = canonicalize_lenient(path);
        self.intern
            .lock()
            .entry(canonical)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Canonicalize a possibly not-yet-existing file path through its parent.
fn canonicalize_lenient(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => match parent.canonicalize() {
            Ok(parent) => parent.join(name),
            Err(_) => path.to_path_buf(),
        },
        _ => path.to_path_buf(),
    }
}

/// Take an OS lock, retrying on contention a bounded number of times.
fn lock_with_retry(file: &std::fs::File, shared: bool, path: &Path) -> DepotResult<()> {
    for attempt in 0..LOCK_RETRIES {
        let result = if shared {
            fs2::FileExt::try_lock_shared(file)
        } else {
            fs2::FileExt::try_lock_exclusive(file)
        };
        match result {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                if attempt + 1 < LOCK_RETRIES {
                    std::thread::sleep(LOCK_RETRY_DELAY);
                }
            }
            Err(e) => return Err(DepotError::io(e)),
        }
    }
    Err(DepotError::Io {
        message: format!("could not lock {}", path.display()),
    })
}
