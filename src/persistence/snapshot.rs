//! Binary snapshot persistence.
//!
//! A single file holds all 16 databases with their expiration records.
//!
//! ```text
//! +-------+---------+-----------+---------+------+-------+
//! | CUSTS | VERSION | AUX-PAIRS | DB-DATA | 0xFF | CRC64 |
//! +-------+---------+-----------+---------+------+-------+
//! ```
//!
//! Strings are u32-length-prefixed; integers are little-endian. The only
//! format contract is lossless round-trip by this crate's own loader.

use crate::error::StorageError;
use crate::storage::{Database, GroupDump, ValuePayload};
use crate::types::{
    current_timestamp_ms, Consumer, ConsumerGroup, CustosValue, Expiry, Key, PendingEntry,
    Stream, StreamEntry, StreamId, DB_COUNT,
};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use tracing::warn;

/// Snapshot file magic.
const MAGIC: &[u8; 5] = b"CUSTS";

/// Snapshot format version.
const VERSION: u32 = 1;

// Opcodes
const OP_AUX: u8 = 0xFA;
const OP_SELECTDB: u8 = 0xFE;
const OP_EXPIRETIME_MS: u8 = 0xFC;
const OP_EOF: u8 = 0xFF;

// Value type bytes
const TYPE_STRING: u8 = 0;
const TYPE_LIST: u8 = 1;
const TYPE_SET: u8 = 2;
const TYPE_HASH: u8 = 3;
const TYPE_ZSET: u8 = 4;
const TYPE_STREAM: u8 = 5;
const TYPE_JSON: u8 = 6;

/// CRC64 polynomial (ECMA-182).
const CRC64_POLY: u64 = 0xC96C5795D7870F42;

static CRC64_TABLE: std::sync::LazyLock<[u64; 256]> = std::sync::LazyLock::new(|| {
    let mut table = [0u64; 256];
    for (i, slot) in table.iter_mut().enumerate() {
        let mut crc = i as u64;
        for _ in 0..8 {
            crc = if crc & 1 == 1 {
                (crc >> 1) ^ CRC64_POLY
            } else {
                crc >> 1
            };
        }
        *slot = crc;
    }
    table
});

fn crc64(data: &[u8]) -> u64 {
    let mut crc = 0u64;
    for byte in data {
        let idx = ((crc ^ (*byte as u64)) & 0xFF) as usize;
        crc = CRC64_TABLE[idx] ^ (crc >> 8);
    }
    crc
}

/// Outcome of a snapshot save.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotSaveResult {
    /// Keys written
    pub keys_saved: usize,
    /// Bytes written, including header and checksum
    pub bytes_written: usize,
}

/// Outcome of a snapshot load.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotLoadResult {
    /// Keys restored
    pub keys_loaded: usize,
    /// Keys skipped because their expiration had already passed
    pub keys_expired: usize,
}

/// Snapshot writer.
pub struct SnapshotSaver;

impl SnapshotSaver {
    /// Serialize the whole keyspace to `path`. The file is written to a
    /// temp name and renamed so a crash cannot leave a torn snapshot.
    pub fn save(path: &Path, database: &Database) -> Result<SnapshotSaveResult, StorageError> {
        let mut buf = Vec::with_capacity(64 * 1024);
        let mut keys_saved = 0;

        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&VERSION.to_le_bytes());

        write_aux(&mut buf, "custos-ver", env!("CARGO_PKG_VERSION"));
        write_aux(&mut buf, "created-ms", &current_timestamp_ms().to_string());

        for db_index in 0..DB_COUNT {
            let db = match database.get_db(db_index) {
                Ok(db) => db,
                Err(_) => continue,
            };
            let dump = db.dump();
            if dump.is_empty() {
                continue;
            }

            buf.push(OP_SELECTDB);
            buf.extend_from_slice(&db_index.to_le_bytes());

            for entry in dump {
                if let Some(expire_at) = entry.expire_at {
                    buf.push(OP_EXPIRETIME_MS);
                    buf.extend_from_slice(&expire_at.to_le_bytes());
                }

                match &entry.payload {
                    ValuePayload::String(s) => {
                        buf.push(TYPE_STRING);
                        write_string(&mut buf, entry.key.as_bytes());
                        write_string(&mut buf, s);
                    }
                    ValuePayload::List(items) => {
                        buf.push(TYPE_LIST);
                        write_string(&mut buf, entry.key.as_bytes());
                        write_u32(&mut buf, items.len());
                        for item in items {
                            write_string(&mut buf, item);
                        }
                    }
                    ValuePayload::Set(members) => {
                        buf.push(TYPE_SET);
                        write_string(&mut buf, entry.key.as_bytes());
                        write_u32(&mut buf, members.len());
                        for member in members {
                            write_string(&mut buf, member);
                        }
                    }
                    ValuePayload::Hash(fields) => {
                        buf.push(TYPE_HASH);
                        write_string(&mut buf, entry.key.as_bytes());
                        write_u32(&mut buf, fields.len());
                        for (field, value) in fields {
                            write_string(&mut buf, field);
                            write_string(&mut buf, value);
                        }
                    }
                    ValuePayload::ZSet(members) => {
                        buf.push(TYPE_ZSET);
                        write_string(&mut buf, entry.key.as_bytes());
                        write_u32(&mut buf, members.len());
                        for (member, score) in members {
                            write_string(&mut buf, member);
                            buf.extend_from_slice(&score.to_le_bytes());
                        }
                    }
                    ValuePayload::Stream {
                        entries,
                        last_id,
                        entries_added,
                        groups,
                    } => {
                        buf.push(TYPE_STREAM);
                        write_string(&mut buf, entry.key.as_bytes());
                        buf.extend_from_slice(&last_id.ms.to_le_bytes());
                        buf.extend_from_slice(&last_id.seq.to_le_bytes());
                        buf.extend_from_slice(&entries_added.to_le_bytes());
                        write_u32(&mut buf, entries.len());
                        for stream_entry in entries {
                            buf.extend_from_slice(&stream_entry.id.ms.to_le_bytes());
                            buf.extend_from_slice(&stream_entry.id.seq.to_le_bytes());
                            write_u32(&mut buf, stream_entry.fields.len());
                            for (field, value) in &stream_entry.fields {
                                write_string(&mut buf, field);
                                write_string(&mut buf, value);
                            }
                        }
                        write_u32(&mut buf, groups.len());
                        for group in groups {
                            write_group(&mut buf, group);
                        }
                    }
                    ValuePayload::Json(doc) => {
                        buf.push(TYPE_JSON);
                        write_string(&mut buf, entry.key.as_bytes());
                        write_string(&mut buf, doc.as_bytes());
                    }
                }
                keys_saved += 1;
            }
        }

        buf.push(OP_EOF);
        let checksum = crc64(&buf);
        buf.extend_from_slice(&checksum.to_le_bytes());

        let temp_path = path.with_extension(format!("tmp.{}", std::process::id()));
        let mut file = std::fs::File::create(&temp_path).map_err(StorageError::Io)?;
        file.write_all(&buf).map_err(StorageError::Io)?;
        file.sync_all().map_err(StorageError::Io)?;
        drop(file);
        std::fs::rename(&temp_path, path).map_err(StorageError::Io)?;

        Ok(SnapshotSaveResult {
            keys_saved,
            bytes_written: buf.len(),
        })
    }
}

fn write_u32(buf: &mut Vec<u8>, n: usize) {
    buf.extend_from_slice(&(n as u32).to_le_bytes());
}

fn write_string(buf: &mut Vec<u8>, s: &[u8]) {
    write_u32(buf, s.len());
    buf.extend_from_slice(s);
}

fn write_aux(buf: &mut Vec<u8>, key: &str, value: &str) {
    buf.push(OP_AUX);
    write_string(buf, key.as_bytes());
    write_string(buf, value.as_bytes());
}

fn write_group(buf: &mut Vec<u8>, group: &GroupDump) {
    write_string(buf, &group.name);
    buf.extend_from_slice(&group.last_delivered.ms.to_le_bytes());
    buf.extend_from_slice(&group.last_delivered.seq.to_le_bytes());
    write_u32(buf, group.consumers.len());
    for (name, pending) in &group.consumers {
        write_string(buf, name);
        buf.extend_from_slice(&pending.to_le_bytes());
    }
    write_u32(buf, group.pending.len());
    for (id, consumer, delivery_time_ms, delivery_count) in &group.pending {
        buf.extend_from_slice(&id.ms.to_le_bytes());
        buf.extend_from_slice(&id.seq.to_le_bytes());
        write_string(buf, consumer);
        buf.extend_from_slice(&delivery_time_ms.to_le_bytes());
        buf.extend_from_slice(&delivery_count.to_le_bytes());
    }
}

/// Snapshot reader.
pub struct SnapshotLoader {
    data: Vec<u8>,
    pos: usize,
}

impl SnapshotLoader {
    /// Read and checksum-verify the snapshot file.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let data = std::fs::read(path).map_err(StorageError::Io)?;

        if data.len() < MAGIC.len() + 4 + 1 + 8 {
            return Err(StorageError::Corrupted("snapshot too short".to_string()));
        }
        if &data[..MAGIC.len()] != MAGIC {
            return Err(StorageError::Corrupted("bad magic".to_string()));
        }

        let body_len = data.len() - 8;
        let expected = u64::from_le_bytes(
            data[body_len..]
                .try_into()
                .map_err(|_| StorageError::Corrupted("truncated checksum".to_string()))?,
        );
        let actual = crc64(&data[..body_len]);
        if expected != actual {
            return Err(StorageError::ChecksumMismatch { expected, actual });
        }

        let mut loader = Self { data, pos: MAGIC.len() };
        let version = loader.read_u32()?;
        if version != VERSION {
            return Err(StorageError::UnsupportedVersion(version));
        }
        Ok(loader)
    }

    /// Restore the snapshot into the database manager. Keys whose
    /// expiration has already passed are dropped.
    pub fn load_into(mut self, database: &Database) -> Result<SnapshotLoadResult, StorageError> {
        let mut result = SnapshotLoadResult::default();
        let mut db = database.get_db(0).map_err(|_| {
            StorageError::Corrupted("database manager has no db 0".to_string())
        })?;
        let mut pending_expiry: Option<i64> = None;
        let now = current_timestamp_ms();

        loop {
            let opcode = self.read_u8()?;
            match opcode {
                OP_AUX => {
                    let _key = self.read_string()?;
                    let _value = self.read_string()?;
                }
                OP_SELECTDB => {
                    let index = self.read_u16()?;
                    db = database
                        .get_db(index)
                        .map_err(|_| StorageError::Corrupted(format!("bad db index {index}")))?;
                }
                OP_EXPIRETIME_MS => {
                    pending_expiry = Some(self.read_i64()?);
                }
                OP_EOF => break,
                type_byte => {
                    let expire_at = pending_expiry.take();
                    let key = Key::from(self.read_string()?);
                    let value = self.read_value(type_byte)?;

                    match expire_at {
                        Some(ts) if ts <= now => {
                            result.keys_expired += 1;
                        }
                        Some(ts) => {
                            db.set_with_expiry(key, value, Expiry::At(ts));
                            result.keys_loaded += 1;
                        }
                        None => {
                            db.set(key, value);
                            result.keys_loaded += 1;
                        }
                    }
                }
            }
        }

        Ok(result)
    }

    fn read_value(&mut self, type_byte: u8) -> Result<CustosValue, StorageError> {
        match type_byte {
            TYPE_STRING => Ok(CustosValue::String(self.read_string()?)),
            TYPE_LIST => {
                let count = self.read_u32()? as usize;
                let value = CustosValue::new_list();
                {
                    let list = value.as_list().expect("created as list");
                    let mut list = list.write();
                    for _ in 0..count {
                        list.push_back(self.read_string()?);
                    }
                }
                Ok(value)
            }
            TYPE_SET => {
                let count = self.read_u32()? as usize;
                let value = CustosValue::new_set();
                {
                    let set = value.as_set().expect("created as set");
                    let mut set = set.write();
                    for _ in 0..count {
                        set.add(self.read_string()?);
                    }
                }
                Ok(value)
            }
            TYPE_HASH => {
                let count = self.read_u32()? as usize;
                let value = CustosValue::new_hash();
                {
                    let hash = value.as_hash().expect("created as hash");
                    let mut hash = hash.write();
                    for _ in 0..count {
                        let field = self.read_string()?;
                        let val = self.read_string()?;
                        hash.insert(field, val);
                    }
                }
                Ok(value)
            }
            TYPE_ZSET => {
                let count = self.read_u32()? as usize;
                let value = CustosValue::new_zset();
                {
                    let zset = value.as_zset().expect("created as zset");
                    let mut zset = zset.write();
                    for _ in 0..count {
                        let member = self.read_string()?;
                        let score = self.read_f64()?;
                        zset.add(member, score);
                    }
                }
                Ok(value)
            }
            TYPE_STREAM => {
                let last_id = StreamId::new(self.read_u64()?, self.read_u64()?);
                let entries_added = self.read_u64()?;

                let entry_count = self.read_u32()? as usize;
                let mut entries = Vec::with_capacity(entry_count);
                for _ in 0..entry_count {
                    let id = StreamId::new(self.read_u64()?, self.read_u64()?);
                    let field_count = self.read_u32()? as usize;
                    let mut fields = Vec::with_capacity(field_count);
                    for _ in 0..field_count {
                        let field = self.read_string()?;
                        let val = self.read_string()?;
                        fields.push((field, val));
                    }
                    entries.push(StreamEntry::new(id, fields));
                }

                let mut stream = Stream::restore(entries, last_id, entries_added);

                let group_count = self.read_u32()? as usize;
                for _ in 0..group_count {
                    let (name, group) = self.read_group()?;
                    stream.insert_group(name, group);
                }

                Ok(CustosValue::Stream(std::sync::Arc::new(
                    parking_lot::RwLock::new(stream),
                )))
            }
            TYPE_JSON => {
                let raw = self.read_string()?;
                let doc: serde_json::Value = serde_json::from_slice(&raw)
                    .map_err(|e| StorageError::Corrupted(format!("bad JSON payload: {e}")))?;
                Ok(CustosValue::json(doc))
            }
            other => Err(StorageError::Corrupted(format!(
                "unknown value type {other:#04x}"
            ))),
        }
    }

    fn read_group(&mut self) -> Result<(Bytes, ConsumerGroup), StorageError> {
        let name = self.read_string()?;
        let last_delivered = StreamId::new(self.read_u64()?, self.read_u64()?);

        let consumer_count = self.read_u32()? as usize;
        let mut consumers = std::collections::HashMap::with_capacity(consumer_count);
        for _ in 0..consumer_count {
            let consumer_name = self.read_string()?;
            let pending = self.read_u64()?;
            consumers.insert(
                consumer_name,
                Consumer {
                    seen_time_ms: 0,
                    pending,
                },
            );
        }

        let pending_count = self.read_u32()? as usize;
        let mut pending = BTreeMap::new();
        for _ in 0..pending_count {
            let id = StreamId::new(self.read_u64()?, self.read_u64()?);
            let consumer = self.read_string()?;
            let delivery_time_ms = self.read_i64()?;
            let delivery_count = self.read_u64()?;
            pending.insert(
                id,
                PendingEntry {
                    consumer,
                    delivery_time_ms,
                    delivery_count,
                },
            );
        }

        Ok((
            name,
            ConsumerGroup {
                last_delivered,
                pending,
                consumers,
            },
        ))
    }

    fn take(&mut self, n: usize) -> Result<&[u8], StorageError> {
        if self.pos + n > self.data.len() {
            return Err(StorageError::Corrupted(
                "unexpected end of snapshot".to_string(),
            ));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, StorageError> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, StorageError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().expect("len 2")))
    }

    fn read_u32(&mut self) -> Result<u32, StorageError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().expect("len 4")))
    }

    fn read_u64(&mut self) -> Result<u64, StorageError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().expect("len 8")))
    }

    fn read_i64(&mut self) -> Result<i64, StorageError> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().expect("len 8")))
    }

    fn read_f64(&mut self) -> Result<f64, StorageError> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().expect("len 8")))
    }

    fn read_string(&mut self) -> Result<Bytes, StorageError> {
        let len = self.read_u32()? as usize;
        Ok(Bytes::copy_from_slice(self.take(len)?))
    }
}

/// Load a snapshot if the file exists, logging and ignoring a missing file.
pub fn load_if_present(
    path: &Path,
    database: &Database,
) -> Result<Option<SnapshotLoadResult>, StorageError> {
    if !path.exists() {
        return Ok(None);
    }
    match SnapshotLoader::open(path) {
        Ok(loader) => Ok(Some(loader.load_into(database)?)),
        Err(e) => {
            warn!("snapshot {} unreadable: {e}", path.display());
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StreamIdArg;
    use tempfile::tempdir;

    fn populated_database() -> Database {
        let database = Database::new();
        let db = database.get_db(0).unwrap();

        db.set(Key::from("str"), CustosValue::string("hello"));

        let list = CustosValue::new_list();
        {
            let mut guard = list.as_list().unwrap().write();
            guard.push_back(Bytes::from("a"));
            guard.push_back(Bytes::from("b"));
        }
        db.store(Key::from("list"), list);

        let set = CustosValue::new_set();
        {
            let mut guard = set.as_set().unwrap().write();
            guard.add(Bytes::from("m1"));
            guard.add(Bytes::from("m2"));
        }
        db.store(Key::from("set"), set);

        let hash = CustosValue::new_hash();
        hash.as_hash()
            .unwrap()
            .write()
            .insert(Bytes::from("f"), Bytes::from("v"));
        db.store(Key::from("hash"), hash);

        let zset = CustosValue::new_zset();
        {
            let mut guard = zset.as_zset().unwrap().write();
            guard.add(Bytes::from("one"), 1.0);
            guard.add(Bytes::from("two"), 2.0);
        }
        db.store(Key::from("zset"), zset);

        let stream = CustosValue::new_stream();
        {
            let mut guard = stream.as_stream().unwrap().write();
            guard
                .add(
                    StreamIdArg::Exact(StreamId::new(1, 1)),
                    vec![(Bytes::from("k"), Bytes::from("v"))],
                )
                .unwrap();
            guard.create_group(Bytes::from("g"), StreamId::new(1, 1));
        }
        db.store(Key::from("stream"), stream);

        db.store(
            Key::from("doc"),
            CustosValue::json(serde_json::json!({"nested": {"n": 1}})),
        );

        db.expire(&Key::from("str"), Expiry::from_seconds(1000));

        // A second database too.
        let db9 = database.get_db(9).unwrap();
        db9.set(Key::from("other"), CustosValue::string("db9"));

        database
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dump.cdb");

        let original = populated_database();
        let save = SnapshotSaver::save(&path, &original).unwrap();
        assert_eq!(save.keys_saved, 8);

        let restored = Database::new();
        let load = SnapshotLoader::open(&path)
            .unwrap()
            .load_into(&restored)
            .unwrap();
        assert_eq!(load.keys_loaded, 8);
        assert_eq!(load.keys_expired, 0);

        let db = restored.get_db(0).unwrap();
        assert_eq!(
            db.get_string(&Key::from("str")).unwrap(),
            Some(Bytes::from("hello"))
        );
        assert!(db.ttl(&Key::from("str")) > 0);

        let list = db.get(&Key::from("list")).unwrap();
        assert_eq!(
            list.as_list().unwrap().read().range(0, -1),
            vec![Bytes::from("a"), Bytes::from("b")]
        );

        let set = db.get(&Key::from("set")).unwrap();
        assert!(set.as_set().unwrap().read().contains(b"m1"));

        let zset = db.get(&Key::from("zset")).unwrap();
        assert_eq!(zset.as_zset().unwrap().read().score(b"two"), Some(2.0));

        let stream = db.get(&Key::from("stream")).unwrap();
        {
            let guard = stream.as_stream().unwrap().read();
            assert_eq!(guard.len(), 1);
            assert_eq!(guard.last_id(), StreamId::new(1, 1));
            assert!(guard.group(b"g").is_some());
        }

        let doc = db.get(&Key::from("doc")).unwrap();
        assert_eq!(
            **doc.as_json().unwrap(),
            serde_json::json!({"nested": {"n": 1}})
        );

        let db9 = restored.get_db(9).unwrap();
        assert_eq!(
            db9.get_string(&Key::from("other")).unwrap(),
            Some(Bytes::from("db9"))
        );
    }

    #[test]
    fn test_expired_keys_dropped_on_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dump.cdb");

        let original = Database::new();
        let db = original.get_db(0).unwrap();
        db.set(Key::from("live"), CustosValue::string("x"));
        db.set_with_expiry(
            Key::from("dead"),
            CustosValue::string("y"),
            Expiry::At(current_timestamp_ms() + 50),
        );
        SnapshotSaver::save(&path, &original).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(80));

        let restored = Database::new();
        let load = SnapshotLoader::open(&path)
            .unwrap()
            .load_into(&restored)
            .unwrap();
        assert_eq!(load.keys_loaded, 1);
        assert_eq!(load.keys_expired, 1);
        assert!(!restored.get_db(0).unwrap().exists(&Key::from("dead")));
    }

    #[test]
    fn test_corruption_detected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dump.cdb");

        SnapshotSaver::save(&path, &populated_database()).unwrap();

        let mut data = std::fs::read(&path).unwrap();
        let mid = data.len() / 2;
        data[mid] ^= 0xFF;
        std::fs::write(&path, data).unwrap();

        assert!(matches!(
            SnapshotLoader::open(&path),
            Err(StorageError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_bad_magic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dump.cdb");
        std::fs::write(&path, b"NOTCDB-FILE-CONTENT").unwrap();
        assert!(SnapshotLoader::open(&path).is_err());
    }

    #[test]
    fn test_load_if_present_missing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("none.cdb");
        assert!(load_if_present(&path, &Database::new()).unwrap().is_none());
    }
}
