//! Buffered checksumming file stream
//!
//! Every byte of every dump file flows through [`SnapshotIo`], which keeps
//! the running CRC-64, the processed/written byte counters used for
//! replication progress reporting, and the cooperative routine gate that
//! lets a supervisor abort a long save or load.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::error::{CinnabarError, Result, SnapshotError};
use super::crc64::crc64;

/// User-space buffer in front of the file handle.
const FILE_BUFFER_SIZE: usize = 10 * 1024 * 1024;

/// Largest single slice handed to the OS per write/read call.
const MAX_SLICE_BYTES: usize = 2 * 1024 * 1024;

/// Emit a progress line every this many bytes processed on load.
const PROGRESS_INTERVAL_BYTES: u64 = 10 * 1024 * 1024;

/// Minimum gap between two invocations of the routine callback.
const ROUTINE_INTERVAL_MS: u128 = 100;

/// Cooperative callback. A non-zero return aborts the running save/load with
/// that code.
pub type DumpRoutine = Box<dyn FnMut() -> i32 + Send>;

enum Mode {
    Closed,
    Read(BufReader<File>),
    Write(BufWriter<File>),
}

/// Buffered file stream with a running CRC-64
pub struct SnapshotIo {
    path: PathBuf,
    mode: Mode,
    checksum: u64,
    processed_bytes: u64,
    written_bytes: u64,
    file_size: u64,
    expected_size: u64,
    routine: Option<DumpRoutine>,
    last_routine: Option<Instant>,
}

impl SnapshotIo {
    pub fn new() -> Self {
        SnapshotIo {
            path: PathBuf::new(),
            mode: Mode::Closed,
            checksum: 0,
            processed_bytes: 0,
            written_bytes: 0,
            file_size: 0,
            expected_size: 0,
            routine: None,
            last_routine: None,
        }
    }

    /// Truncate-create `path` and switch to write mode, resetting the
    /// checksum and counters.
    pub fn open_write(&mut self, path: &Path) -> Result<()> {
        self.close()?;
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| CinnabarError::Io(format!("Failed to open dump file {} for writing: {}", path.display(), e)))?;
        self.path = path.to_path_buf();
        self.mode = Mode::Write(BufWriter::with_capacity(FILE_BUFFER_SIZE, file));
        self.checksum = 0;
        self.processed_bytes = 0;
        self.written_bytes = 0;
        self.file_size = 0;
        self.last_routine = None;
        Ok(())
    }

    /// Open `path` for reading and switch to read mode.
    pub fn open_read(&mut self, path: &Path) -> Result<()> {
        self.close()?;
        let file = File::open(path)
            .map_err(|e| CinnabarError::Io(format!("Failed to open dump file {} for reading: {}", path.display(), e)))?;
        self.file_size = file
            .metadata()
            .map(|m| m.len())
            .unwrap_or(0);
        self.path = path.to_path_buf();
        self.mode = Mode::Read(BufReader::with_capacity(FILE_BUFFER_SIZE, file));
        self.checksum = 0;
        self.processed_bytes = 0;
        self.written_bytes = 0;
        self.last_routine = None;
        Ok(())
    }

    /// Install the cooperative callback for the next save/load.
    pub fn set_routine(&mut self, routine: Option<DumpRoutine>) {
        self.routine = routine;
        self.last_routine = None;
    }

    /// Invoke the routine callback if one is registered and at least 100 ms
    /// have passed since the previous invocation. A non-zero return becomes
    /// a `Cancelled` error.
    pub fn routine_tick(&mut self) -> Result<()> {
        if let Some(routine) = self.routine.as_mut() {
            let due = match self.last_routine {
                Some(at) => at.elapsed().as_millis() >= ROUTINE_INTERVAL_MS,
                None => true,
            };
            if due {
                // Stamp before invoking so a slow callback counts toward
                // the next interval
                self.last_routine = Some(Instant::now());
                let code = routine();
                if code != 0 {
                    return Err(SnapshotError::Cancelled(code).into());
                }
            }
        }
        Ok(())
    }

    /// Write all of `buf`, folding it into the checksum.
    pub fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.routine_tick()?;
        let writer = match &mut self.mode {
            Mode::Write(w) => w,
            _ => {
                return Err(CinnabarError::Io(format!(
                    "Dump file {} is not open for writing",
                    self.path.display()
                )))
            }
        };
        for slice in buf.chunks(MAX_SLICE_BYTES) {
            writer.write_all(slice)?;
            self.checksum = crc64(self.checksum, slice);
            self.written_bytes += slice.len() as u64;
        }
        Ok(())
    }

    /// Fill `buf` from the stream. With `checksummed` false the bytes are
    /// consumed without touching the running CRC (used for the trailer).
    pub fn read_into(&mut self, buf: &mut [u8], checksummed: bool) -> Result<()> {
        if (self.processed_bytes + buf.len() as u64) / PROGRESS_INTERVAL_BYTES
            > self.processed_bytes / PROGRESS_INTERVAL_BYTES
        {
            println!("SNAPSHOT: {} bytes loaded from dump file.", self.processed_bytes);
        }
        self.processed_bytes += buf.len() as u64;
        self.routine_tick()?;
        let reader = match &mut self.mode {
            Mode::Read(r) => r,
            _ => {
                return Err(CinnabarError::Io(format!(
                    "Dump file {} is not open for reading",
                    self.path.display()
                )))
            }
        };
        for slice in buf.chunks_mut(MAX_SLICE_BYTES) {
            reader.read_exact(slice)?;
            if checksummed {
                self.checksum = crc64(self.checksum, slice);
            }
        }
        Ok(())
    }

    /// Running CRC-64 over everything written/read so far.
    pub fn checksum(&self) -> u64 {
        self.checksum
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the file opened for reading.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Expected total payload, for progress reporting during replication.
    pub fn set_expected_size(&mut self, size: u64) {
        self.expected_size = size;
    }

    /// Bytes still to be written before reaching the expected size.
    pub fn write_remaining(&self) -> u64 {
        self.expected_size.saturating_sub(self.written_bytes)
    }

    /// Bytes still to be read before reaching the expected size.
    pub fn read_remaining(&self) -> u64 {
        self.expected_size.saturating_sub(self.processed_bytes)
    }

    pub fn flush(&mut self) -> Result<()> {
        if let Mode::Write(writer) = &mut self.mode {
            writer.flush()?;
        }
        Ok(())
    }

    /// Flush and drop the underlying handle. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if let Mode::Write(writer) = &mut self.mode {
            writer.flush()?;
        }
        self.mode = Mode::Closed;
        self.routine = None;
        Ok(())
    }

    /// Close, then move the file to `new_path`, keeping the stored path in
    /// sync on success. A rename onto the current path is a no-op.
    pub fn rename(&mut self, new_path: &Path) -> Result<()> {
        if new_path == self.path {
            return Ok(());
        }
        self.close()?;
        std::fs::rename(&self.path, new_path)
            .map_err(|e| CinnabarError::Io(format!("Failed to rename dump file: {}", e)))?;
        self.path = new_path.to_path_buf();
        Ok(())
    }

    /// Close and unlink the file, if it exists.
    pub fn remove(&mut self) -> Result<()> {
        self.close()?;
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CinnabarError::Io(format!("Failed to remove dump file: {}", e))),
        }
    }
}

impl Default for SnapshotIo {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SnapshotError;
    use tempfile::TempDir;

    #[test]
    fn test_write_read_checksum_symmetry() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stream.bin");

        let mut io = SnapshotIo::new();
        io.open_write(&path).unwrap();
        io.write(b"hello ").unwrap();
        io.write(b"world").unwrap();
        let write_crc = io.checksum();
        io.close().unwrap();

        let mut io = SnapshotIo::new();
        io.open_read(&path).unwrap();
        let mut buf = [0u8; 11];
        io.read_into(&mut buf, true).unwrap();
        assert_eq!(&buf, b"hello world");
        assert_eq!(io.checksum(), write_crc);
        assert_eq!(io.file_size(), 11);
    }

    #[test]
    fn test_unchecksummed_read_leaves_crc() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stream.bin");

        let mut io = SnapshotIo::new();
        io.open_write(&path).unwrap();
        io.write(b"body").unwrap();
        let body_crc = io.checksum();
        io.write(b"TRAILER!").unwrap();
        io.close().unwrap();

        let mut io = SnapshotIo::new();
        io.open_read(&path).unwrap();
        let mut body = [0u8; 4];
        io.read_into(&mut body, true).unwrap();
        let mut trailer = [0u8; 8];
        io.read_into(&mut trailer, false).unwrap();
        assert_eq!(io.checksum(), body_crc);
    }

    #[test]
    fn test_short_read_is_truncated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short.bin");
        std::fs::write(&path, b"abc").unwrap();

        let mut io = SnapshotIo::new();
        io.open_read(&path).unwrap();
        let mut buf = [0u8; 8];
        match io.read_into(&mut buf, true) {
            Err(CinnabarError::Snapshot(SnapshotError::Truncated)) => {}
            other => panic!("expected truncation, got {:?}", other),
        }
    }

    #[test]
    fn test_routine_cancel_propagates_code() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cancel.bin");

        let mut io = SnapshotIo::new();
        io.open_write(&path).unwrap();
        io.set_routine(Some(Box::new(|| 7)));
        match io.write(b"data") {
            Err(CinnabarError::Snapshot(SnapshotError::Cancelled(7))) => {}
            other => panic!("expected cancellation, got {:?}", other),
        }
    }

    #[test]
    fn test_rename_and_remove() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.bin");
        let target = dir.path().join("b.bin");

        let mut io = SnapshotIo::new();
        io.open_write(&path).unwrap();
        io.write(b"x").unwrap();
        io.rename(&target).unwrap();
        assert!(target.exists());
        assert!(!path.exists());
        assert_eq!(io.path(), target.as_path());

        // Renaming onto the current path is a no-op
        io.rename(&target).unwrap();
        assert!(target.exists());

        io.remove().unwrap();
        assert!(!target.exists());
        // Removing again is fine
        io.remove().unwrap();
    }

    #[test]
    fn test_progress_counters() {
        let mut io = SnapshotIo::new();
        io.set_expected_size(100);
        assert_eq!(io.read_remaining(), 100);
        assert_eq!(io.write_remaining(), 100);
    }
}
