//! AOF (append-only file) persistence.
//!
//! Every successful write command is appended as a RESP array. Replay feeds
//! the same arrays back through the dispatcher before the server accepts
//! client traffic.
//!
//! Fsync policies: `always` (after every command), `everysec` (a background
//! task syncs once per second), `no` (the OS schedules write-back).

use crate::error::StorageError;
use crate::server::config::AppendFsync;
use crate::storage::{Database, ValuePayload};
use crate::types::{DbIndex, DB_COUNT};
use bytes::Bytes;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};

/// Low-level AOF writer.
pub struct AofWriter {
    writer: BufWriter<File>,
    fsync_policy: AppendFsync,
    /// Database index of the last logged command; a change interposes a
    /// SELECT record so replay lands writes in the right database.
    current_db: DbIndex,
    dirty: bool,
}

impl AofWriter {
    /// Open (or create) the AOF for appending.
    pub fn open(path: &Path, fsync_policy: AppendFsync) -> Result<Self, StorageError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(StorageError::Io)?;

        Ok(Self {
            writer: BufWriter::with_capacity(64 * 1024, file),
            fsync_policy,
            current_db: 0,
            dirty: false,
        })
    }

    /// Append one command executed against database `db_index`.
    pub fn append(
        &mut self,
        db_index: DbIndex,
        name: &str,
        args: &[Bytes],
    ) -> Result<(), StorageError> {
        if db_index != self.current_db {
            write_resp_command(
                &mut self.writer,
                &[b"SELECT".to_vec(), db_index.to_string().into_bytes()],
            )?;
            self.current_db = db_index;
        }

        let mut parts: Vec<Vec<u8>> = Vec::with_capacity(args.len() + 1);
        parts.push(name.as_bytes().to_vec());
        parts.extend(args.iter().map(|a| a.to_vec()));
        write_resp_command(&mut self.writer, &parts)?;
        self.dirty = true;

        match self.fsync_policy {
            AppendFsync::Always => self.fsync()?,
            AppendFsync::Everysec => self.writer.flush().map_err(StorageError::Io)?,
            AppendFsync::No => self.writer.flush().map_err(StorageError::Io)?,
        }
        Ok(())
    }

    /// Flush buffers and fsync to disk.
    pub fn fsync(&mut self) -> Result<(), StorageError> {
        if self.dirty {
            self.writer.flush().map_err(StorageError::Io)?;
            self.writer
                .get_ref()
                .sync_data()
                .map_err(StorageError::Io)?;
            self.dirty = false;
        }
        Ok(())
    }

    /// Change the fsync policy (CONFIG SET appendfsync).
    pub fn set_fsync_policy(&mut self, policy: AppendFsync) {
        self.fsync_policy = policy;
    }
}

/// Serialize one command as a RESP array of bulk strings.
fn write_resp_command<W: Write>(writer: &mut W, parts: &[Vec<u8>]) -> Result<(), StorageError> {
    write!(writer, "*{}\r\n", parts.len()).map_err(StorageError::Io)?;
    for part in parts {
        write!(writer, "${}\r\n", part.len()).map_err(StorageError::Io)?;
        writer.write_all(part).map_err(StorageError::Io)?;
        writer.write_all(b"\r\n").map_err(StorageError::Io)?;
    }
    Ok(())
}

/// AOF reader for startup replay.
pub struct AofReader {
    data: Vec<u8>,
    pos: usize,
}

impl AofReader {
    /// Read the whole file into memory for replay.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let data = std::fs::read(path).map_err(StorageError::Io)?;
        Ok(Self { data, pos: 0 })
    }

    /// Read the next command; None at end of file.
    pub fn next_command(&mut self) -> Result<Option<Vec<Bytes>>, StorageError> {
        while self.pos < self.data.len()
            && (self.data[self.pos] == b'\r' || self.data[self.pos] == b'\n')
        {
            self.pos += 1;
        }
        if self.pos >= self.data.len() {
            return Ok(None);
        }

        if self.data[self.pos] != b'*' {
            return Err(StorageError::Corrupted(format!(
                "expected '*', got {:#04x}",
                self.data[self.pos]
            )));
        }
        self.pos += 1;
        let count = self.read_integer()? as usize;
        self.skip_crlf();

        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            if self.pos >= self.data.len() || self.data[self.pos] != b'$' {
                return Err(StorageError::Corrupted("expected '$'".to_string()));
            }
            self.pos += 1;
            let len = self.read_integer()? as usize;
            self.skip_crlf();

            if self.pos + len > self.data.len() {
                return Err(StorageError::Corrupted("unexpected end of AOF".to_string()));
            }
            args.push(Bytes::copy_from_slice(&self.data[self.pos..self.pos + len]));
            self.pos += len;
            self.skip_crlf();
        }

        Ok(Some(args))
    }

    fn read_integer(&mut self) -> Result<i64, StorageError> {
        let start = self.pos;
        while self.pos < self.data.len() && self.data[self.pos] != b'\r' {
            self.pos += 1;
        }
        std::str::from_utf8(&self.data[start..self.pos])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| StorageError::Corrupted("invalid integer in AOF".to_string()))
    }

    fn skip_crlf(&mut self) {
        if self.pos < self.data.len() && self.data[self.pos] == b'\r' {
            self.pos += 1;
        }
        if self.pos < self.data.len() && self.data[self.pos] == b'\n' {
            self.pos += 1;
        }
    }
}

/// The AOF subsystem: a single serialized writer, runtime enable/disable,
/// replay suppression, and rewrite.
pub struct AofService {
    writer: Mutex<Option<AofWriter>>,
    path: Mutex<PathBuf>,
    enabled: AtomicBool,
    /// Suppresses appends during startup replay.
    suppressed: AtomicBool,
    fsync_policy: Mutex<AppendFsync>,
}

impl std::fmt::Debug for AofService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AofService")
            .field("enabled", &self.is_enabled())
            .field("path", &*self.path.lock())
            .finish()
    }
}

impl AofService {
    /// Create the service. When `enabled`, the file is opened immediately.
    pub fn new(path: PathBuf, enabled: bool, fsync_policy: AppendFsync) -> Self {
        let service = Self {
            writer: Mutex::new(None),
            path: Mutex::new(path),
            enabled: AtomicBool::new(false),
            suppressed: AtomicBool::new(false),
            fsync_policy: Mutex::new(fsync_policy),
        };
        if enabled {
            service.set_enabled(true);
        }
        service
    }

    /// Is AOF logging active?
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// The configured AOF path.
    pub fn path(&self) -> PathBuf {
        self.path.lock().clone()
    }

    /// Enable or disable logging (CONFIG SET appendonly). Enabling opens
    /// the file; disabling syncs and closes it.
    pub fn set_enabled(&self, enabled: bool) {
        if enabled {
            let path = self.path.lock().clone();
            match AofWriter::open(&path, *self.fsync_policy.lock()) {
                Ok(writer) => {
                    *self.writer.lock() = Some(writer);
                    self.enabled.store(true, Ordering::Relaxed);
                    info!("AOF enabled, logging to {}", path.display());
                }
                Err(e) => {
                    error!("failed to open AOF {}: {e}", path.display());
                }
            }
        } else {
            self.enabled.store(false, Ordering::Relaxed);
            if let Some(mut writer) = self.writer.lock().take() {
                if let Err(e) = writer.fsync() {
                    error!("failed to sync AOF on close: {e}");
                }
            }
            info!("AOF disabled");
        }
    }

    /// Change the fsync policy (CONFIG SET appendfsync).
    pub fn set_fsync_policy(&self, policy: AppendFsync) {
        *self.fsync_policy.lock() = policy;
        if let Some(writer) = self.writer.lock().as_mut() {
            writer.set_fsync_policy(policy);
        }
    }

    /// Suppress or resume appends (startup replay).
    pub fn set_suppressed(&self, suppressed: bool) {
        self.suppressed.store(suppressed, Ordering::Relaxed);
    }

    /// Append a write command. Failures are logged, never propagated to the
    /// issuing client.
    pub fn append(&self, db_index: DbIndex, name: &str, args: &[Bytes]) {
        if !self.is_enabled() || self.suppressed.load(Ordering::Relaxed) {
            return;
        }
        if let Some(writer) = self.writer.lock().as_mut() {
            if let Err(e) = writer.append(db_index, name, args) {
                error!("AOF append failed: {e}");
            }
        }
    }

    /// Fsync now (the everysec background task and shutdown path).
    pub fn fsync(&self) {
        if let Some(writer) = self.writer.lock().as_mut() {
            if let Err(e) = writer.fsync() {
                error!("AOF fsync failed: {e}");
            }
        }
    }

    /// Rewrite the AOF as the minimal command sequence reproducing the
    /// current keyspace. Writes to a private temp file, then atomically
    /// renames over the old log while holding the writer lock.
    pub fn rewrite(&self, database: &Database) -> Result<(), StorageError> {
        let path = self.path.lock().clone();
        let temp_path = path.with_extension(format!("rewrite.{}", std::process::id()));

        if let Err(e) = write_minimal_aof(&temp_path, database) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(e);
        }

        // Swap under the writer lock so no append lands in the old file
        // after the rename.
        let mut writer_slot = self.writer.lock();
        std::fs::rename(&temp_path, &path).map_err(StorageError::Io)?;
        if self.is_enabled() {
            *writer_slot = Some(AofWriter::open(&path, *self.fsync_policy.lock())?);
        }
        info!("AOF rewrite complete: {}", path.display());
        Ok(())
    }
}

/// Enumerate the keyspace as minimal commands: SET for strings, RPUSH for
/// lists, SADD for sets, HSET for hashes, ZADD for sorted sets, XADD plus
/// XGROUP CREATE/CREATECONSUMER for streams, JSON.SET for documents, then
/// PEXPIREAT for TTLs.
fn write_minimal_aof(path: &Path, database: &Database) -> Result<(), StorageError> {
    let file = File::create(path).map_err(StorageError::Io)?;
    let mut writer = BufWriter::with_capacity(64 * 1024, file);

    for db_index in 0..DB_COUNT {
        let db = match database.get_db(db_index) {
            Ok(db) => db,
            Err(_) => continue,
        };
        let dump = db.dump();
        if dump.is_empty() {
            continue;
        }

        write_resp_command(
            &mut writer,
            &[b"SELECT".to_vec(), db_index.to_string().into_bytes()],
        )?;

        for entry in dump {
            let key = entry.key.as_bytes().to_vec();

            match entry.payload {
                ValuePayload::String(s) => {
                    write_resp_command(&mut writer, &[b"SET".to_vec(), key.clone(), s.to_vec()])?;
                }
                ValuePayload::List(items) => {
                    let mut parts = vec![b"RPUSH".to_vec(), key.clone()];
                    parts.extend(items.iter().map(|i| i.to_vec()));
                    write_resp_command(&mut writer, &parts)?;
                }
                ValuePayload::Set(members) => {
                    let mut parts = vec![b"SADD".to_vec(), key.clone()];
                    parts.extend(members.iter().map(|m| m.to_vec()));
                    write_resp_command(&mut writer, &parts)?;
                }
                ValuePayload::Hash(fields) => {
                    let mut parts = vec![b"HSET".to_vec(), key.clone()];
                    for (field, value) in fields {
                        parts.push(field.to_vec());
                        parts.push(value.to_vec());
                    }
                    write_resp_command(&mut writer, &parts)?;
                }
                ValuePayload::ZSet(members) => {
                    let mut parts = vec![b"ZADD".to_vec(), key.clone()];
                    for (member, score) in members {
                        parts.push(crate::commands::format_float(score).into_bytes());
                        parts.push(member.to_vec());
                    }
                    write_resp_command(&mut writer, &parts)?;
                }
                ValuePayload::Stream {
                    entries, groups, ..
                } => {
                    for stream_entry in entries {
                        let mut parts = vec![
                            b"XADD".to_vec(),
                            key.clone(),
                            stream_entry.id.to_string().into_bytes(),
                        ];
                        for (field, value) in stream_entry.fields {
                            parts.push(field.to_vec());
                            parts.push(value.to_vec());
                        }
                        write_resp_command(&mut writer, &parts)?;
                    }
                    // Consumer groups are recreated at their delivery point.
                    // MKSTREAM keeps a key alive that has groups but no
                    // entries, which would otherwise vanish from the log.
                    for group in groups {
                        write_resp_command(
                            &mut writer,
                            &[
                                b"XGROUP".to_vec(),
                                b"CREATE".to_vec(),
                                key.clone(),
                                group.name.to_vec(),
                                group.last_delivered.to_string().into_bytes(),
                                b"MKSTREAM".to_vec(),
                            ],
                        )?;
                        for (consumer, _) in &group.consumers {
                            write_resp_command(
                                &mut writer,
                                &[
                                    b"XGROUP".to_vec(),
                                    b"CREATECONSUMER".to_vec(),
                                    key.clone(),
                                    group.name.to_vec(),
                                    consumer.to_vec(),
                                ],
                            )?;
                        }
                    }
                }
                ValuePayload::Json(doc) => {
                    write_resp_command(
                        &mut writer,
                        &[
                            b"JSON.SET".to_vec(),
                            key.clone(),
                            b"$".to_vec(),
                            doc.into_bytes(),
                        ],
                    )?;
                }
            }

            if let Some(expire_at) = entry.expire_at {
                write_resp_command(
                    &mut writer,
                    &[
                        b"PEXPIREAT".to_vec(),
                        key,
                        expire_at.to_string().into_bytes(),
                    ],
                )?;
            }
        }
    }

    writer.flush().map_err(StorageError::Io)?;
    writer.get_ref().sync_all().map_err(StorageError::Io)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CustosValue, Key, StreamId, StreamIdArg};
    use tempfile::tempdir;

    #[test]
    fn test_writer_reader_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.aof");

        {
            let mut writer = AofWriter::open(&path, AppendFsync::Always).unwrap();
            writer
                .append(0, "SET", &[Bytes::from("k"), Bytes::from("v")])
                .unwrap();
            writer.append(2, "DEL", &[Bytes::from("gone")]).unwrap();
            writer.fsync().unwrap();
        }

        let mut reader = AofReader::open(&path).unwrap();

        let cmd = reader.next_command().unwrap().unwrap();
        assert_eq!(cmd, vec![Bytes::from("SET"), Bytes::from("k"), Bytes::from("v")]);

        // The db change interposed a SELECT 2.
        let cmd = reader.next_command().unwrap().unwrap();
        assert_eq!(cmd, vec![Bytes::from("SELECT"), Bytes::from("2")]);

        let cmd = reader.next_command().unwrap().unwrap();
        assert_eq!(cmd, vec![Bytes::from("DEL"), Bytes::from("gone")]);

        assert!(reader.next_command().unwrap().is_none());
    }

    #[test]
    fn test_service_suppression() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.aof");

        let service = AofService::new(path.clone(), true, AppendFsync::Always);
        service.set_suppressed(true);
        service.append(0, "SET", &[Bytes::from("k"), Bytes::from("v")]);
        service.set_suppressed(false);
        service.append(0, "SET", &[Bytes::from("k2"), Bytes::from("v")]);
        service.fsync();

        let mut reader = AofReader::open(&path).unwrap();
        let cmd = reader.next_command().unwrap().unwrap();
        assert_eq!(cmd[1], Bytes::from("k2"));
        assert!(reader.next_command().unwrap().is_none());
    }

    #[test]
    fn test_disabled_service_writes_nothing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.aof");

        let service = AofService::new(path.clone(), false, AppendFsync::No);
        service.append(0, "SET", &[Bytes::from("k"), Bytes::from("v")]);
        assert!(!path.exists());
    }

    #[test]
    fn test_rewrite_minimal_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.aof");

        let database = Database::new();
        let db = database.get_db(0).unwrap();
        db.set(Key::from("s"), CustosValue::string("v"));
        let list = CustosValue::new_list();
        list.as_list().unwrap().write().push_back(Bytes::from("a"));
        list.as_list().unwrap().write().push_back(Bytes::from("b"));
        db.store(Key::from("l"), list);

        let service = AofService::new(path.clone(), true, AppendFsync::No);
        service.rewrite(&database).unwrap();

        let mut reader = AofReader::open(&path).unwrap();
        let mut commands = Vec::new();
        while let Some(cmd) = reader.next_command().unwrap() {
            commands.push(
                cmd.iter()
                    .map(|b| String::from_utf8_lossy(b).into_owned())
                    .collect::<Vec<_>>(),
            );
        }

        assert_eq!(commands[0], vec!["SELECT", "0"]);
        assert!(commands.iter().any(|c| c[0] == "SET" && c[1] == "s"));
        assert!(commands
            .iter()
            .any(|c| c[0] == "RPUSH" && c[1] == "l" && c[2] == "a" && c[3] == "b"));
    }

    #[test]
    fn test_rewrite_keeps_stream_groups() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.aof");

        let database = Database::new();
        let db = database.get_db(0).unwrap();

        let stream = CustosValue::new_stream();
        {
            let mut guard = stream.as_stream().unwrap().write();
            guard
                .add(
                    StreamIdArg::Exact(StreamId::new(1, 1)),
                    vec![(Bytes::from("f"), Bytes::from("v"))],
                )
                .unwrap();
            guard.create_group(Bytes::from("g"), StreamId::new(1, 1));
            guard.create_consumer(b"g", Bytes::from("c1"));
        }
        db.store(Key::from("st"), stream);

        // A stream alive only because of its group.
        let bare = CustosValue::new_stream();
        bare.as_stream()
            .unwrap()
            .write()
            .create_group(Bytes::from("waiters"), StreamId::MIN);
        db.store(Key::from("bare"), bare);

        let service = AofService::new(path.clone(), true, AppendFsync::No);
        service.rewrite(&database).unwrap();

        let mut reader = AofReader::open(&path).unwrap();
        let mut commands = Vec::new();
        while let Some(cmd) = reader.next_command().unwrap() {
            commands.push(
                cmd.iter()
                    .map(|b| String::from_utf8_lossy(b).into_owned())
                    .collect::<Vec<_>>(),
            );
        }

        assert!(commands
            .iter()
            .any(|c| c[0] == "XADD" && c[1] == "st" && c[2] == "1-1"));
        assert!(commands.iter().any(|c| c[0] == "XGROUP"
            && c[1] == "CREATE"
            && c[2] == "st"
            && c[3] == "g"
            && c[4] == "1-1"
            && c[5] == "MKSTREAM"));
        assert!(commands.iter().any(|c| c[0] == "XGROUP"
            && c[1] == "CREATECONSUMER"
            && c[2] == "st"
            && c[3] == "g"
            && c[4] == "c1"));

        // The entry-less stream still appears via its MKSTREAM group.
        assert!(commands
            .iter()
            .any(|c| c[0] == "XGROUP" && c[1] == "CREATE" && c[2] == "bare" && c[3] == "waiters"));
        assert!(!commands.iter().any(|c| c[0] == "XADD" && c[1] == "bare"));
    }
}
