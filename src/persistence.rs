//! Append-only file persistence for restaurant records
//!
//! Each command is a one-byte tag followed by its payload:
//!
//! ```text
//! PUT    : 0x00 | u32 length (big endian) | bincode(RestaurantRecord)
//! DELETE : 0x01 | 16-byte record uuid
//! ```
//!
//! The file is replayed on open. A command cut short at the end of the file
//! (a torn write) is truncated away; anything else malformed is an error.

use crate::error::{NearbiteError, Result};
use crate::record::{RecordId, RestaurantRecord};
use crate::storage::{RecordStore, StoreStats};
use crate::types::{Config, SyncPolicy};
use bytes::{Buf, BufMut, BytesMut};
use rustc_hash::FxHashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

const CMD_PUT: u8 = 0;
const CMD_DELETE: u8 = 1;

/// A single logged mutation
#[derive(Debug, Clone, PartialEq)]
pub enum AofCommand {
    Put(RestaurantRecord),
    Delete(RecordId),
}

/// Append-only command log
pub struct AofFile {
    file: File,
    writer: BufWriter<File>,
    path: PathBuf,
    size: u64,
    #[cfg(test)]
    fail_sync: bool,
}

impl AofFile {
    /// Open or create the log at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;

        let size = file.metadata()?.len();
        let writer = BufWriter::new(file.try_clone()?);

        Ok(AofFile {
            file,
            writer,
            path,
            size,
            #[cfg(test)]
            fail_sync: false,
        })
    }

    /// Bytes written so far, including buffered ones
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, command: &AofCommand) -> Result<()> {
        let serialized = encode_command(command)?;
        self.writer.write_all(&serialized)?;
        self.size += serialized.len() as u64;
        Ok(())
    }

    /// Read every complete command from the start of the file.
    ///
    /// A torn command at the tail is truncated away so later appends start
    /// on a command boundary.
    pub fn replay(&mut self) -> Result<Vec<AofCommand>> {
        self.writer.flush()?;
        let mut reader = BufReader::new(File::open(&self.path)?);
        let mut commands = Vec::new();
        let mut good_offset = 0u64;

        loop {
            match decode_command(&mut reader) {
                Ok(Some((command, consumed))) => {
                    commands.push(command);
                    good_offset += consumed;
                }
                Ok(None) => break,
                Err(NearbiteError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    warn!(
                        path = %self.path.display(),
                        replayed = commands.len(),
                        offset = good_offset,
                        "truncating torn command at end of append-only file"
                    );
                    self.file.set_len(good_offset)?;
                    self.size = good_offset;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(commands)
    }

    /// Replace the log with one `Put` per live record.
    ///
    /// The compacted log is written to a sibling file, synced, then renamed
    /// over the original.
    pub fn rewrite<'a, I>(&mut self, records: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a RestaurantRecord>,
    {
        self.writer.flush()?;

        let rewrite_path = self.path.with_extension("aof.rewrite");
        {
            let file = File::create(&rewrite_path)?;
            let mut writer = BufWriter::new(&file);
            for record in records {
                writer.write_all(&encode_command(&AofCommand::Put(record.clone()))?)?;
            }
            writer.flush()?;
            drop(writer);
            file.sync_all()?;
        }

        std::fs::rename(&rewrite_path, &self.path)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&self.path)?;
        self.size = file.metadata()?.len();
        self.writer = BufWriter::new(file.try_clone()?);
        self.file = file;

        debug!(path = %self.path.display(), size = self.size, "append-only file compacted");
        Ok(())
    }

    /// Flush buffered writes to the OS
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Flush and sync to disk
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        #[cfg(test)]
        if self.fail_sync {
            return Err(io::Error::other("sync refused").into());
        }
        self.file.sync_all()?;
        Ok(())
    }

    /// Cut the log back to `len` bytes, discarding anything still buffered.
    pub fn truncate(&mut self, len: u64) -> Result<()> {
        let fresh = BufWriter::new(self.file.try_clone()?);
        let (_, _discarded) = std::mem::replace(&mut self.writer, fresh).into_parts();
        self.file.set_len(len)?;
        self.size = len;
        Ok(())
    }
}

impl Drop for AofFile {
    fn drop(&mut self) {
        // Best effort flush on drop
        let _ = self.writer.flush();
    }
}

fn encode_command(command: &AofCommand) -> Result<Vec<u8>> {
    let mut buf = BytesMut::new();

    match command {
        AofCommand::Put(record) => {
            let payload = bincode::serialize(record)
                .map_err(|e| NearbiteError::Serialization(format!("encoding {}: {}", record.id, e)))?;
            let len = u32::try_from(payload.len()).map_err(|_| {
                NearbiteError::Serialization(format!("record {} is too large", record.id))
            })?;
            buf.put_u8(CMD_PUT);
            buf.put_u32(len);
            buf.put_slice(&payload);
        }
        AofCommand::Delete(id) => {
            buf.put_u8(CMD_DELETE);
            buf.put_slice(id.as_uuid().as_bytes());
        }
    }

    Ok(buf.to_vec())
}

/// Next command and the number of bytes it occupied. `Ok(None)` at a clean end of file.
fn decode_command<R: Read>(reader: &mut R) -> Result<Option<(AofCommand, u64)>> {
    let mut tag = [0u8; 1];
    if reader.read(&mut tag)? == 0 {
        return Ok(None);
    }

    match tag[0] {
        CMD_PUT => {
            let mut len_buf = [0u8; 4];
            reader.read_exact(&mut len_buf)?;
            let len = (&len_buf[..]).get_u32() as usize;

            let mut payload = vec![0u8; len];
            reader.read_exact(&mut payload)?;
            let record = bincode::deserialize(&payload)
                .map_err(|e| NearbiteError::Serialization(format!("decoding record: {}", e)))?;
            Ok(Some((AofCommand::Put(record), 5 + len as u64)))
        }
        CMD_DELETE => {
            let mut id_buf = [0u8; 16];
            reader.read_exact(&mut id_buf)?;
            let id = RecordId::from_uuid(Uuid::from_bytes(id_buf));
            Ok(Some((AofCommand::Delete(id), 17)))
        }
        other => Err(NearbiteError::Serialization(format!(
            "unknown append-only command tag {:#04x}",
            other
        ))),
    }
}

struct AofInner {
    records: FxHashMap<RecordId, RestaurantRecord>,
    aof: AofFile,
    sync_policy: SyncPolicy,
    rewrite_threshold: u64,
    last_rewrite_size: u64,
    last_sync: Instant,
    operations_count: u64,
}

impl AofInner {
    /// Append `command` and sync it per policy. On failure the command is cut
    /// from the log again, so it is neither applied nor replayed.
    fn log(&mut self, command: &AofCommand) -> Result<()> {
        let mark = self.aof.size();
        let logged = match self.aof.append(command) {
            Ok(()) => self.sync_per_policy(),
            Err(e) => Err(e),
        };

        if let Err(e) = logged {
            if let Err(undo) = self.aof.truncate(mark) {
                warn!(offset = mark, error = %undo, "could not cut failed command from append-only file");
            }
            return Err(e);
        }
        self.operations_count += 1;
        Ok(())
    }

    fn sync_per_policy(&mut self) -> Result<()> {
        match self.sync_policy {
            SyncPolicy::Always => self.aof.sync()?,
            SyncPolicy::EverySecond if self.last_sync.elapsed() >= Duration::from_secs(1) => {
                self.aof.sync()?;
                self.last_sync = Instant::now();
            }
            SyncPolicy::EverySecond | SyncPolicy::Never => {}
        }
        Ok(())
    }

    /// Compact once the log has doubled past the threshold. The write that
    /// triggered it is already durable, so a failed rewrite is only logged.
    fn maybe_rewrite(&mut self) {
        let size = self.aof.size();
        if size < self.rewrite_threshold || size < self.last_rewrite_size.saturating_mul(2) {
            return;
        }
        match self.aof.rewrite(self.records.values()) {
            Ok(()) => self.last_rewrite_size = self.aof.size(),
            Err(e) => warn!(size, error = %e, "append-only file rewrite failed"),
        }
    }
}

/// Record store backed by an in-memory map and an append-only file.
///
/// Every mutation is logged, and synced when the policy asks for it, before
/// it is applied. A failed write is cut from the log again, so it leaves the
/// store unchanged both now and after a restart.
pub struct AofStore {
    inner: RwLock<AofInner>,
}

impl AofStore {
    /// Open the store at `path`, replaying any existing log.
    pub fn open<P: AsRef<Path>>(path: P, config: &Config) -> Result<Self> {
        let mut aof = AofFile::open(path)?;
        let mut records = FxHashMap::default();

        for command in aof.replay()? {
            match command {
                AofCommand::Put(record) => {
                    records.insert(record.id, record);
                }
                AofCommand::Delete(id) => {
                    records.remove(&id);
                }
            }
        }

        info!(
            path = %aof.path().display(),
            records = records.len(),
            "replayed append-only file"
        );

        let size = aof.size();
        Ok(Self {
            inner: RwLock::new(AofInner {
                records,
                aof,
                sync_policy: config.sync_policy,
                rewrite_threshold: config.aof_rewrite_threshold,
                last_rewrite_size: size,
                last_sync: Instant::now(),
                operations_count: 0,
            }),
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> Result<PathBuf> {
        Ok(self.read()?.aof.path().to_path_buf())
    }

    /// Compact the log to the live records now.
    pub fn compact(&self) -> Result<()> {
        let mut inner = self.write()?;
        let inner = &mut *inner;
        inner.aof.rewrite(inner.records.values())?;
        inner.last_rewrite_size = inner.aof.size();
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, AofInner>> {
        self.inner
            .read()
            .map_err(|_| NearbiteError::Lock("Failed to acquire store read lock".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, AofInner>> {
        self.inner
            .write()
            .map_err(|_| NearbiteError::Lock("Failed to acquire store write lock".to_string()))
    }
}

impl RecordStore for AofStore {
    fn get(&self, id: RecordId) -> Result<Option<RestaurantRecord>> {
        Ok(self.read()?.records.get(&id).cloned())
    }

    fn put(&self, record: &RestaurantRecord) -> Result<()> {
        let mut inner = self.write()?;
        inner.log(&AofCommand::Put(record.clone()))?;
        inner.records.insert(record.id, record.clone());
        inner.maybe_rewrite();
        Ok(())
    }

    fn delete(&self, id: RecordId) -> Result<RestaurantRecord> {
        let mut inner = self.write()?;
        if !inner.records.contains_key(&id) {
            return Err(NearbiteError::NotFound(id));
        }
        inner.log(&AofCommand::Delete(id))?;
        let removed = inner.records.remove(&id).ok_or(NearbiteError::NotFound(id))?;
        inner.maybe_rewrite();
        Ok(removed)
    }

    fn scan(&self) -> Result<Vec<RestaurantRecord>> {
        Ok(self.read()?.records.values().cloned().collect())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.read()?.records.len())
    }

    fn sync(&self) -> Result<()> {
        let mut inner = self.write()?;
        inner.aof.sync()?;
        inner.last_sync = Instant::now();
        Ok(())
    }

    fn stats(&self) -> Result<StoreStats> {
        let inner = self.read()?;
        Ok(StoreStats {
            record_count: inner.records.len(),
            operations_count: inner.operations_count,
            size_bytes: inner.aof.size(),
        })
    }
}
