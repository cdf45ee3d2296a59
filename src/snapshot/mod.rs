//! Snapshot engine
//!
//! Two dump dialects over one streaming core:
//!
//! - [`redis::RedisDump`]: the Redis-compatible dump format up to file
//!   version 6, for interchange with the reference server.
//! - [`native::NativeDump`]: chunked raw engine rows, optionally
//!   Snappy-compressed, for fast full-database backup and replication.
//!
//! Both run single-threaded over a [`io::SnapshotIo`] stream which owns the
//! running CRC-64 and the cooperative abort callback.

pub mod crc64;
pub mod io;
pub mod lzf;
pub mod native;
pub mod packed;
pub mod redis;

use std::path::Path;
use std::sync::{Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Result, SnapshotError};
pub use io::{DumpRoutine, SnapshotIo};
pub use native::{LoadIdentity, NativeDump};
pub use redis::RedisDump;

/// Shared lifecycle state of one dump file: the stream, the
/// save-in-progress guard and the last-save stamp. Both dialects embed one
/// of these behind an `Arc` so a cloned handle can drive a background save.
pub(crate) struct DumpCore {
    io: Mutex<SnapshotIo>,
    is_saving: Mutex<bool>,
    last_save: RwLock<Option<u64>>,
}

impl DumpCore {
    pub(crate) fn new() -> Self {
        DumpCore {
            io: Mutex::new(SnapshotIo::new()),
            is_saving: Mutex::new(false),
            last_save: RwLock::new(None),
        }
    }

    /// Run a save body against a freshly opened stream. Refuses immediately
    /// when another save is running on this dump file.
    pub(crate) fn save_with<F>(&self, path: &Path, routine: Option<DumpRoutine>, body: F) -> Result<()>
    where
        F: FnOnce(&mut SnapshotIo) -> Result<()>,
    {
        {
            let mut saving = self.is_saving.lock().unwrap();
            if *saving {
                return Err(SnapshotError::SaveInProgress.into());
            }
            *saving = true;
        }

        let result = {
            let mut io = self.io.lock().unwrap();
            let run = (|| {
                io.open_write(path)?;
                io.set_routine(routine);
                body(&mut io)?;
                io.close()
            })();
            if run.is_err() {
                let _ = io.close();
            }
            run
        };

        if result.is_ok() {
            *self.last_save.write().unwrap() = Some(epoch_seconds());
        }
        *self.is_saving.lock().unwrap() = false;
        result
    }

    /// Run a load body against the stream opened for reading.
    pub(crate) fn load_with<F>(&self, path: &Path, routine: Option<DumpRoutine>, body: F) -> Result<()>
    where
        F: FnOnce(&mut SnapshotIo) -> Result<()>,
    {
        let mut io = self.io.lock().unwrap();
        let run = (|| {
            io.open_read(path)?;
            io.set_routine(routine);
            body(&mut io)?;
            io.close()
        })();
        if run.is_err() {
            let _ = io.close();
        }
        run
    }

    pub(crate) fn rename(&self, new_path: &Path) -> Result<()> {
        self.io.lock().unwrap().rename(new_path)
    }

    pub(crate) fn remove(&self) -> Result<()> {
        self.io.lock().unwrap().remove()
    }

    pub(crate) fn flush(&self) -> Result<()> {
        self.io.lock().unwrap().flush()
    }

    pub(crate) fn is_saving(&self) -> bool {
        *self.is_saving.lock().unwrap()
    }

    pub(crate) fn last_save(&self) -> Option<u64> {
        *self.last_save.read().unwrap()
    }
}

/// Wall-clock seconds since the epoch, for last-save bookkeeping.
fn epoch_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
