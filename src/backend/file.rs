//! Durable backend: an append-only batch log replayed into memory on open.
//!
//! Layout under the backend directory:
//!
//! - `LOCK`: held exclusively while the backend is open.
//! - `tables.log`: header (`magic + version`) followed by frames of
//!   `len (u32 LE) | msgpack(Vec<WriteOp>) | crc32 (u32 LE)`.
//!
//! Each frame is one atomic batch. A torn or corrupt tail (for example
//! after a crash mid-write) ends replay and is truncated away. A write that
//! fails in-process is cut back off the log before the error is returned,
//! so no later batch is ever appended after a partial frame.

use super::memory::{check_batch, Tables};
use super::{Backend, Columns, Order, Table, WriteOp};
use crate::error::{FeedError, Result};
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Magic bytes for the table log.
const LOG_MAGIC: &[u8; 4] = b"FNL\0";

/// Current log format version.
const LOG_VERSION: u8 = 1;

/// Header size (magic + version).
const HEADER_SIZE: u64 = 5;

/// Frames larger than this are treated as corruption.
const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// What the log writer needs from its file.
trait LogFile: Write + Seek {
    fn truncate(&mut self, len: u64) -> io::Result<()>;
    fn sync(&mut self) -> io::Result<()>;
}

impl LogFile for File {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }
}

/// Append side of the table log.
struct LogWriter<F = File> {
    file: F,

    /// Offset just past the last acknowledged frame.
    end: u64,

    writes_since_sync: u64,

    /// Set when a failed append could not be cut back off the log.
    failed: bool,
}

impl<F: LogFile> LogWriter<F> {
    fn new(file: F, end: u64) -> Self {
        Self {
            file,
            end,
            writes_since_sync: 0,
            failed: false,
        }
    }

    /// Append one encoded frame, fsyncing every `sync_interval` frames.
    ///
    /// On error the log is truncated back to `end`. If that truncation fails
    /// too, every later append is refused until the backend is reopened.
    fn append(&mut self, frame: &[u8], sync_interval: u64) -> Result<()> {
        if self.failed {
            return Err(FeedError::Backend(
                "table log has an unrecovered partial write; reopen the backend".into(),
            ));
        }

        if let Err(e) = self.write_through(frame, sync_interval) {
            self.rollback();
            return Err(e.into());
        }
        self.end += frame.len() as u64;
        Ok(())
    }

    fn write_through(&mut self, frame: &[u8], sync_interval: u64) -> io::Result<()> {
        self.file.write_all(frame)?;
        self.file.flush()?;

        self.writes_since_sync += 1;
        if self.writes_since_sync >= sync_interval {
            self.file.sync()?;
            self.writes_since_sync = 0;
        }
        Ok(())
    }

    fn rollback(&mut self) {
        let end = self.end;
        let restored = self
            .file
            .truncate(end)
            .and_then(|()| self.file.seek(SeekFrom::Start(end)))
            .map(drop);
        if let Err(e) = restored {
            warn!(end, error = %e, "could not roll back table log, refusing further writes");
            self.failed = true;
        }
    }

    fn sync(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file.sync()?;
        self.writes_since_sync = 0;
        Ok(())
    }
}

/// Log-structured backend persisted in a directory.
pub struct FileBackend {
    /// Backend directory.
    path: PathBuf,

    /// Lock file for exclusive access.
    _lock_file: File,

    /// Replayed table contents.
    tables: RwLock<Tables>,

    /// Append handle. Held while a batch is written and applied so the log
    /// and the in-memory tables see batches in the same order.
    writer: Mutex<LogWriter>,

    /// Fsync every N batches (1 = every batch).
    sync_interval: u64,
}

impl FileBackend {
    /// Default sync interval.
    pub const DEFAULT_SYNC_INTERVAL: u64 = 1;

    /// Open an existing backend or create a new one.
    pub fn open(path: impl AsRef<Path>, create_if_missing: bool, sync_interval: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let log_path = path.join("tables.log");

        if !log_path.exists() {
            if !create_if_missing {
                return Err(FeedError::NotFound(format!(
                    "no backend at {}",
                    path.display()
                )));
            }
            fs::create_dir_all(&path)?;
        }

        let lock_file = Self::acquire_lock(&path)?;

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&log_path)?;

        let mut tables = Tables::default();
        if file.metadata()?.len() == 0 {
            file.write_all(LOG_MAGIC)?;
            file.write_all(&[LOG_VERSION])?;
            file.sync_all()?;
        } else {
            let (valid_end, batches) = Self::replay(BufReader::new(&file), &mut tables)?;
            let file_len = file.metadata()?.len();
            if valid_end < file_len {
                warn!(
                    path = %log_path.display(),
                    valid_end,
                    file_len,
                    "truncating torn tail of table log"
                );
                file.set_len(valid_end)?;
                file.sync_all()?;
            }
            info!(path = %log_path.display(), batches, "replayed table log");
        }

        let end = file.seek(SeekFrom::End(0))?;

        Ok(Self {
            path,
            _lock_file: lock_file,
            tables: RwLock::new(tables),
            writer: Mutex::new(LogWriter::new(file, end)),
            sync_interval: sync_interval.max(1),
        })
    }

    /// Backend directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and fsync pending batches.
    pub fn sync(&self) -> Result<()> {
        self.writer.lock().sync()?;
        Ok(())
    }

    /// Replay every intact frame. Returns the offset just past the last good
    /// frame and the number of batches applied.
    fn replay(mut reader: impl Read, tables: &mut Tables) -> Result<(u64, u64)> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != LOG_MAGIC {
            return Err(FeedError::InvalidFormat("Invalid table log magic".into()));
        }

        let mut version = [0u8; 1];
        reader.read_exact(&mut version)?;
        if version[0] != LOG_VERSION {
            return Err(FeedError::InvalidFormat(format!(
                "Unsupported table log version: {}",
                version[0]
            )));
        }

        let mut offset = HEADER_SIZE;
        let mut batches = 0u64;
        loop {
            match Self::read_frame(&mut reader) {
                Ok(Some((batch, frame_len))) => {
                    for op in batch {
                        tables.apply(op);
                    }
                    offset += frame_len;
                    batches += 1;
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(offset, error = %e, "stopping replay at bad frame");
                    break;
                }
            }
        }

        Ok((offset, batches))
    }

    /// Read one frame. `Ok(None)` at a clean end of file.
    fn read_frame(reader: &mut impl Read) -> Result<Option<(Vec<WriteOp>, u64)>> {
        let mut len_bytes = [0u8; 4];
        match reader.read_exact(&mut len_bytes) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_le_bytes(len_bytes) as usize;

        if len > MAX_FRAME_SIZE {
            return Err(FeedError::Corruption("table log frame too large".into()));
        }

        let mut encoded = vec![0u8; len];
        reader.read_exact(&mut encoded)?;

        let mut checksum_bytes = [0u8; 4];
        reader.read_exact(&mut checksum_bytes)?;
        let stored = u32::from_le_bytes(checksum_bytes);
        let computed = crc32fast::hash(&encoded);
        if stored != computed {
            return Err(FeedError::Corruption(format!(
                "table log checksum mismatch: expected {stored}, got {computed}"
            )));
        }

        let batch: Vec<WriteOp> = rmp_serde::from_slice(&encoded)?;
        Ok(Some((batch, 4 + len as u64 + 4)))
    }

    fn encode_frame(batch: &[WriteOp]) -> Result<Vec<u8>> {
        let encoded = rmp_serde::to_vec_named(&batch)?;
        let len = u32::try_from(encoded.len())
            .map_err(|_| FeedError::Serialization("batch too large for one frame".into()))?;

        let mut frame = Vec::with_capacity(encoded.len() + 8);
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&encoded);
        frame.extend_from_slice(&crc32fast::hash(&encoded).to_le_bytes());
        Ok(frame)
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_file = File::create(path.join("LOCK"))?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| FeedError::Locked)?;

        Ok(lock_file)
    }
}

impl Backend for FileBackend {
    fn get(&self, table: Table, partition: &str, column: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.tables.read().get(table, partition, column))
    }

    fn multi_get(
        &self,
        table: Table,
        partitions: &[String],
        column: &str,
    ) -> Result<HashMap<String, Vec<u8>>> {
        check_batch(partitions)?;
        let tables = self.tables.read();
        Ok(partitions
            .iter()
            .filter_map(|p| tables.get(table, p, column).map(|v| (p.clone(), v)))
            .collect())
    }

    fn row(&self, table: Table, partition: &str) -> Result<Columns> {
        Ok(self.tables.read().row(table, partition))
    }

    fn slice(
        &self,
        table: Table,
        partition: &str,
        from: Option<&str>,
        limit: usize,
        order: Order,
    ) -> Result<Columns> {
        Ok(self.tables.read().slice(table, partition, from, limit, order))
    }

    fn multi_slice(
        &self,
        table: Table,
        partitions: &[String],
        limit: usize,
        order: Order,
    ) -> Result<HashMap<String, Columns>> {
        check_batch(partitions)?;
        let tables = self.tables.read();
        Ok(partitions
            .iter()
            .map(|p| (p.clone(), tables.slice(table, p, None, limit, order)))
            .collect())
    }

    fn count(&self, table: Table, partition: &str) -> Result<usize> {
        Ok(self.tables.read().count(table, partition))
    }

    fn apply(&self, batch: Vec<WriteOp>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let frame = Self::encode_frame(&batch)?;
        let mut log = self.writer.lock();
        log.append(&frame, self.sync_interval)?;

        let mut tables = self.tables.write();
        for op in batch {
            tables.apply(op);
        }
        Ok(())
    }
}

impl Drop for FileBackend {
    fn drop(&mut self) {
        // Best-effort sync on drop
        let _ = self.sync();
    }
}
