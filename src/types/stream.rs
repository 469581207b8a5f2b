//! Stream implementation.
//!
//! An append-only sequence of entries identified by `ms-seq` IDs, totally
//! ordered on the pair. A stream also owns its consumer groups.

use super::current_timestamp_ms;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};

/// Stream entry ID: `<milliseconds>-<sequence>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct StreamId {
    /// Milliseconds timestamp
    pub ms: u64,
    /// Sequence number
    pub seq: u64,
}

impl StreamId {
    /// Create a new stream ID.
    pub const fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }

    /// Minimum possible ID (`-`).
    pub const MIN: Self = Self { ms: 0, seq: 0 };

    /// Maximum possible ID (`+`).
    pub const MAX: Self = Self {
        ms: u64::MAX,
        seq: u64::MAX,
    };

    /// The ID immediately after this one in the total order.
    pub fn next(self) -> Self {
        if self.seq == u64::MAX {
            Self::new(self.ms + 1, 0)
        } else {
            Self::new(self.ms, self.seq + 1)
        }
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

/// A stream ID as written in a command argument.
#[derive(Debug, Clone, Copy)]
pub enum StreamIdArg {
    /// Exact `ms-seq` ID
    Exact(StreamId),
    /// `ms` or `ms-*`: sequence chosen by the server
    Partial(u64),
    /// `*`: fully auto-generated
    Auto,
    /// `-`: minimum ID
    Min,
    /// `+`: maximum ID
    Max,
    /// `$`: the current last ID
    Last,
}

impl StreamIdArg {
    /// Parse a stream ID argument.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "*" => return Some(Self::Auto),
            "-" => return Some(Self::Min),
            "+" => return Some(Self::Max),
            "$" => return Some(Self::Last),
            _ => {}
        }

        match s.split_once('-') {
            Some((ms, seq)) => {
                let ms = ms.parse().ok()?;
                if seq == "*" {
                    Some(Self::Partial(ms))
                } else {
                    Some(Self::Exact(StreamId::new(ms, seq.parse().ok()?)))
                }
            }
            None => Some(Self::Partial(s.parse().ok()?)),
        }
    }

    /// Resolve a range-position argument to a concrete ID; `seq` defaults
    /// to 0 for a partial start bound and to `u64::MAX` for an end bound.
    pub fn resolve_range(self, last: StreamId, end_bound: bool) -> Option<StreamId> {
        match self {
            Self::Exact(id) => Some(id),
            Self::Partial(ms) => Some(StreamId::new(ms, if end_bound { u64::MAX } else { 0 })),
            Self::Min => Some(StreamId::MIN),
            Self::Max => Some(StreamId::MAX),
            Self::Last => Some(last),
            Self::Auto => None,
        }
    }
}

/// A single stream entry.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEntry {
    /// Entry ID
    pub id: StreamId,
    /// Field-value pairs
    pub fields: Vec<(Bytes, Bytes)>,
}

impl StreamEntry {
    /// Create a new stream entry.
    pub fn new(id: StreamId, fields: Vec<(Bytes, Bytes)>) -> Self {
        Self { id, fields }
    }
}

/// A pending (delivered, not yet acknowledged) entry within a group.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    /// Consumer the entry was last delivered to
    pub consumer: Bytes,
    /// Last delivery time, milliseconds since epoch
    pub delivery_time_ms: i64,
    /// Number of deliveries
    pub delivery_count: u64,
}

/// A consumer within a group.
#[derive(Debug, Clone, Default)]
pub struct Consumer {
    /// Last interaction time, milliseconds since epoch
    pub seen_time_ms: i64,
    /// Number of entries pending for this consumer
    pub pending: u64,
}

/// A consumer group attached to a stream.
#[derive(Debug, Clone, Default)]
pub struct ConsumerGroup {
    /// Last entry ID delivered to the group
    pub last_delivered: StreamId,
    /// Delivered-but-unacknowledged entries
    pub pending: BTreeMap<StreamId, PendingEntry>,
    /// Known consumers
    pub consumers: HashMap<Bytes, Consumer>,
}

/// The stream data structure.
#[derive(Debug, Clone, Default)]
pub struct Stream {
    /// Entries stored by ID
    entries: BTreeMap<StreamId, Vec<(Bytes, Bytes)>>,
    /// Last ID ever assigned; IDs are never reissued, even after XDEL
    last_id: StreamId,
    /// Total number of entries ever added
    entries_added: u64,
    /// Consumer groups by name
    groups: HashMap<Bytes, ConsumerGroup>,
}

/// Outcome of attempting to append with an explicit ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddError {
    /// The ID is not strictly greater than the stream's last ID.
    IdTooSmall,
}

impl Stream {
    /// Create a new empty stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the stream holds no live entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Last assigned entry ID.
    #[inline]
    pub fn last_id(&self) -> StreamId {
        self.last_id
    }

    /// Overwrite the last assigned ID (XGROUP SETID / XSETID semantics).
    pub fn set_last_id(&mut self, id: StreamId) {
        self.last_id = id;
    }

    /// First live entry ID.
    pub fn first_id(&self) -> Option<StreamId> {
        self.entries.keys().next().copied()
    }

    /// Total entries ever appended, including deleted ones.
    #[inline]
    pub fn entries_added(&self) -> u64 {
        self.entries_added
    }

    /// Append an entry.
    ///
    /// ID generation: `Auto` uses `(max(now_ms, last_ms), last_seq+1 when
    /// the millisecond is unchanged, else 0)`; `Partial(ms)` auto-generates
    /// the sequence; an explicit ID must be strictly greater than the
    /// stream's last ID.
    pub fn add(
        &mut self,
        id: StreamIdArg,
        fields: Vec<(Bytes, Bytes)>,
    ) -> Result<StreamId, AddError> {
        let now_ms = current_timestamp_ms() as u64;

        let new_id = match id {
            StreamIdArg::Auto => {
                if now_ms > self.last_id.ms {
                    StreamId::new(now_ms, 0)
                } else {
                    StreamId::new(self.last_id.ms, self.last_id.seq + 1)
                }
            }
            StreamIdArg::Partial(ms) => {
                if ms == self.last_id.ms {
                    StreamId::new(ms, self.last_id.seq + 1)
                } else {
                    StreamId::new(ms, 0)
                }
            }
            StreamIdArg::Exact(id) => id,
            _ => return Err(AddError::IdTooSmall),
        };

        // IDs are strictly monotonically increasing over the stream's whole
        // lifetime; 0-0 is never a valid entry ID.
        let has_history = self.entries_added > 0 || self.last_id != StreamId::MIN;
        if (has_history && new_id <= self.last_id) || new_id == StreamId::MIN {
            return Err(AddError::IdTooSmall);
        }

        self.entries.insert(new_id, fields);
        self.last_id = new_id;
        self.entries_added += 1;
        Ok(new_id)
    }

    /// Entries within the inclusive ID range (XRANGE).
    pub fn range(&self, start: StreamId, end: StreamId, count: Option<usize>) -> Vec<StreamEntry> {
        if start > end {
            return Vec::new();
        }
        let iter = self
            .entries
            .range(start..=end)
            .map(|(id, fields)| StreamEntry::new(*id, fields.clone()));
        match count {
            Some(n) => iter.take(n).collect(),
            None => iter.collect(),
        }
    }

    /// Entries within the inclusive ID range, newest first (XREVRANGE).
    pub fn rev_range(
        &self,
        start: StreamId,
        end: StreamId,
        count: Option<usize>,
    ) -> Vec<StreamEntry> {
        if start > end {
            return Vec::new();
        }
        let iter = self
            .entries
            .range(start..=end)
            .rev()
            .map(|(id, fields)| StreamEntry::new(*id, fields.clone()));
        match count {
            Some(n) => iter.take(n).collect(),
            None => iter.collect(),
        }
    }

    /// Entries strictly after `after_id` (XREAD).
    pub fn read_after(&self, after_id: StreamId, count: Option<usize>) -> Vec<StreamEntry> {
        let iter = self
            .entries
            .range((std::ops::Bound::Excluded(after_id), std::ops::Bound::Unbounded))
            .map(|(id, fields)| StreamEntry::new(*id, fields.clone()));
        match count {
            Some(n) => iter.take(n).collect(),
            None => iter.collect(),
        }
    }

    /// Trim the stream down to at most `maxlen` entries, oldest first.
    ///
    /// With `approximate` the trim is skipped entirely while the excess is
    /// small, trading exactness for fewer tree operations.
    pub fn trim_maxlen(&mut self, maxlen: usize, approximate: bool) -> usize {
        if self.entries.len() <= maxlen {
            return 0;
        }
        let excess = self.entries.len() - maxlen;
        if approximate && excess < maxlen / 10 {
            return 0;
        }

        let victims: Vec<StreamId> = self.entries.keys().take(excess).copied().collect();
        for id in &victims {
            self.entries.remove(id);
        }
        victims.len()
    }

    /// Delete specific entries (XDEL). Returns the number removed.
    pub fn delete(&mut self, ids: &[StreamId]) -> usize {
        ids.iter()
            .filter(|id| self.entries.remove(id).is_some())
            .count()
    }

    /// Rebuild a stream from dumped state (snapshot load).
    pub fn restore(entries: Vec<StreamEntry>, last_id: StreamId, entries_added: u64) -> Self {
        Self {
            entries: entries.into_iter().map(|e| (e.id, e.fields)).collect(),
            last_id,
            entries_added,
            groups: HashMap::new(),
        }
    }

    /// Attach a restored consumer group (snapshot load).
    pub fn insert_group(&mut self, name: Bytes, group: ConsumerGroup) {
        self.groups.insert(name, group);
    }

    // Consumer groups

    /// Number of consumer groups.
    #[inline]
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Create a consumer group. Returns false when the name is taken.
    pub fn create_group(&mut self, name: Bytes, start: StreamId) -> bool {
        if self.groups.contains_key(&name) {
            return false;
        }
        self.groups.insert(
            name,
            ConsumerGroup {
                last_delivered: start,
                ..ConsumerGroup::default()
            },
        );
        true
    }

    /// Destroy a consumer group. Returns true when it existed.
    pub fn destroy_group(&mut self, name: &[u8]) -> bool {
        self.groups.remove(name).is_some()
    }

    /// Look up a group.
    pub fn group(&self, name: &[u8]) -> Option<&ConsumerGroup> {
        self.groups.get(name)
    }

    /// Look up a group mutably.
    pub fn group_mut(&mut self, name: &[u8]) -> Option<&mut ConsumerGroup> {
        self.groups.get_mut(name)
    }

    /// Iterate groups with their names.
    pub fn groups(&self) -> impl Iterator<Item = (&Bytes, &ConsumerGroup)> {
        self.groups.iter()
    }

    /// Create a consumer inside a group. Returns true when newly created.
    pub fn create_consumer(&mut self, group: &[u8], consumer: Bytes) -> Option<bool> {
        let group = self.groups.get_mut(group)?;
        if group.consumers.contains_key(&consumer) {
            return Some(false);
        }
        group.consumers.insert(
            consumer,
            Consumer {
                seen_time_ms: current_timestamp_ms(),
                pending: 0,
            },
        );
        Some(true)
    }

    /// Delete a consumer from a group. Returns the number of pending
    /// entries that were discarded with it.
    pub fn delete_consumer(&mut self, group: &[u8], consumer: &[u8]) -> Option<u64> {
        let group = self.groups.get_mut(group)?;
        let removed = group.consumers.remove(consumer)?;
        group
            .pending
            .retain(|_, entry| entry.consumer.as_ref() != consumer);
        Some(removed.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> Vec<(Bytes, Bytes)> {
        pairs
            .iter()
            .map(|(k, v)| {
                (
                    Bytes::copy_from_slice(k.as_bytes()),
                    Bytes::copy_from_slice(v.as_bytes()),
                )
            })
            .collect()
    }

    #[test]
    fn test_id_parse() {
        assert!(matches!(StreamIdArg::parse("*"), Some(StreamIdArg::Auto)));
        assert!(matches!(StreamIdArg::parse("-"), Some(StreamIdArg::Min)));
        assert!(matches!(StreamIdArg::parse("+"), Some(StreamIdArg::Max)));
        assert!(matches!(StreamIdArg::parse("$"), Some(StreamIdArg::Last)));
        assert!(matches!(
            StreamIdArg::parse("5-*"),
            Some(StreamIdArg::Partial(5))
        ));
        assert!(StreamIdArg::parse("a-b").is_none());

        match StreamIdArg::parse("1000-2") {
            Some(StreamIdArg::Exact(id)) => {
                assert_eq!(id.ms, 1000);
                assert_eq!(id.seq, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_add_explicit_ordering() {
        let mut stream = Stream::new();
        let id = stream
            .add(StreamIdArg::Exact(StreamId::new(1, 1)), fields(&[("k", "v")]))
            .unwrap();
        assert_eq!(id, StreamId::new(1, 1));

        // Same ID again is rejected.
        assert_eq!(
            stream.add(StreamIdArg::Exact(StreamId::new(1, 1)), fields(&[("k", "v")])),
            Err(AddError::IdTooSmall)
        );
        // Smaller ID is rejected.
        assert_eq!(
            stream.add(StreamIdArg::Exact(StreamId::new(0, 5)), fields(&[("k", "v")])),
            Err(AddError::IdTooSmall)
        );
    }

    #[test]
    fn test_add_auto_monotonic() {
        let mut stream = Stream::new();
        let a = stream.add(StreamIdArg::Auto, fields(&[("n", "1")])).unwrap();
        let b = stream.add(StreamIdArg::Auto, fields(&[("n", "2")])).unwrap();
        assert!(b > a);
        assert_eq!(stream.len(), 2);
        assert_eq!(stream.entries_added(), 2);
    }

    #[test]
    fn test_add_partial_seq() {
        let mut stream = Stream::new();
        let a = stream
            .add(StreamIdArg::Partial(100), fields(&[("k", "v")]))
            .unwrap();
        assert_eq!(a, StreamId::new(100, 0));
        let b = stream
            .add(StreamIdArg::Partial(100), fields(&[("k", "v")]))
            .unwrap();
        assert_eq!(b, StreamId::new(100, 1));
    }

    #[test]
    fn test_ordering_survives_delete() {
        let mut stream = Stream::new();
        stream
            .add(StreamIdArg::Exact(StreamId::new(5, 0)), fields(&[("k", "v")]))
            .unwrap();
        stream.delete(&[StreamId::new(5, 0)]);
        assert!(stream.is_empty());

        // last_id survives deletion, so smaller IDs remain invalid.
        assert_eq!(
            stream.add(StreamIdArg::Exact(StreamId::new(4, 0)), fields(&[("k", "v")])),
            Err(AddError::IdTooSmall)
        );
    }

    #[test]
    fn test_zero_id_rejected() {
        let mut stream = Stream::new();
        assert_eq!(
            stream.add(StreamIdArg::Exact(StreamId::MIN), fields(&[("k", "v")])),
            Err(AddError::IdTooSmall)
        );
    }

    #[test]
    fn test_range() {
        let mut stream = Stream::new();
        for i in 1..=5u64 {
            stream
                .add(
                    StreamIdArg::Exact(StreamId::new(i * 1000, 0)),
                    fields(&[("n", &i.to_string())]),
                )
                .unwrap();
        }

        let entries = stream.range(StreamId::new(2000, 0), StreamId::new(4000, 0), None);
        assert_eq!(entries.len(), 3);

        let entries = stream.rev_range(StreamId::MIN, StreamId::MAX, Some(2));
        assert_eq!(entries[0].id, StreamId::new(5000, 0));
        assert_eq!(entries[1].id, StreamId::new(4000, 0));
    }

    #[test]
    fn test_read_after() {
        let mut stream = Stream::new();
        for i in 1..=3u64 {
            stream
                .add(StreamIdArg::Exact(StreamId::new(i, 0)), fields(&[("k", "v")]))
                .unwrap();
        }
        let entries = stream.read_after(StreamId::new(1, 0), None);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, StreamId::new(2, 0));
    }

    #[test]
    fn test_trim_exact_and_approximate() {
        let mut stream = Stream::new();
        for i in 1..=100u64 {
            stream
                .add(StreamIdArg::Exact(StreamId::new(i, 0)), fields(&[("k", "v")]))
                .unwrap();
        }

        // Approximate trim skips when the excess is small.
        assert_eq!(stream.trim_maxlen(99, true), 0);
        assert_eq!(stream.len(), 100);

        assert_eq!(stream.trim_maxlen(10, false), 90);
        assert_eq!(stream.len(), 10);
        assert_eq!(stream.first_id(), Some(StreamId::new(91, 0)));
    }

    #[test]
    fn test_groups() {
        let mut stream = Stream::new();
        stream
            .add(StreamIdArg::Exact(StreamId::new(1, 0)), fields(&[("k", "v")]))
            .unwrap();

        assert!(stream.create_group(Bytes::from("g"), stream.last_id()));
        assert!(!stream.create_group(Bytes::from("g"), StreamId::MIN));
        assert_eq!(stream.group_count(), 1);

        assert_eq!(stream.create_consumer(b"g", Bytes::from("c1")), Some(true));
        assert_eq!(stream.create_consumer(b"g", Bytes::from("c1")), Some(false));
        assert_eq!(stream.create_consumer(b"missing", Bytes::from("c1")), None);

        assert_eq!(stream.delete_consumer(b"g", b"c1"), Some(0));
        assert!(stream.destroy_group(b"g"));
        assert!(!stream.destroy_group(b"g"));
    }
}
