//! Sorted set implementation.
//!
//! Two structures back every sorted set: a member-to-score map for O(1)
//! score lookup and a `BTreeMap` keyed by `(score, member)` for the ordered
//! projection. Every mutation updates both, so the invariant holds: the
//! ordered index always equals the score map sorted by ascending score with
//! ties broken by ascending lexicographic member order.

use super::Score;
use bytes::Bytes;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

/// An entry in a sorted set.
#[derive(Debug, Clone, PartialEq)]
pub struct SortedSetEntry {
    /// The member
    pub member: Bytes,
    /// The score
    pub score: Score,
}

impl SortedSetEntry {
    /// Create a new entry.
    pub fn new(member: Bytes, score: Score) -> Self {
        Self { member, score }
    }
}

/// Score wrapper with a total order. NaN is rejected before scores reach
/// this type, so the ordering only has to rank finite values and infinities.
#[derive(Debug, Clone, Copy)]
struct OrderedScore(Score);

impl PartialEq for OrderedScore {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for OrderedScore {}

impl PartialOrd for OrderedScore {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedScore {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.partial_cmp(&other.0).unwrap_or(Ordering::Equal)
    }
}

/// Key for the ordered index: score first, member breaks ties.
#[derive(Debug, Clone, Eq, PartialEq)]
struct ScoreKey {
    score: OrderedScore,
    member: Bytes,
}

impl Ord for ScoreKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .cmp(&other.score)
            .then_with(|| self.member.cmp(&other.member))
    }
}

impl PartialOrd for ScoreKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A sorted set with O(log N) ordered operations.
#[derive(Debug, Clone, Default)]
pub struct SortedSet {
    /// Member to score mapping
    scores: HashMap<Bytes, Score>,
    /// (score, member) ordered index
    by_score: BTreeMap<ScoreKey, ()>,
}

impl SortedSet {
    /// Create a new empty sorted set.
    pub fn new() -> Self {
        Self {
            scores: HashMap::new(),
            by_score: BTreeMap::new(),
        }
    }

    /// Returns the number of members.
    #[inline]
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    /// Returns true if the sorted set is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Add a member or update its score (ZADD).
    ///
    /// Returns true when the member is newly added, false on update. An
    /// update removes the stale ordered-index entry before reinserting so
    /// the total order is correct the moment the call returns.
    pub fn add(&mut self, member: Bytes, score: Score) -> bool {
        match self.scores.insert(member.clone(), score) {
            Some(old_score) => {
                if old_score.to_bits() != score.to_bits() {
                    self.by_score.remove(&ScoreKey {
                        score: OrderedScore(old_score),
                        member: member.clone(),
                    });
                    self.by_score.insert(
                        ScoreKey {
                            score: OrderedScore(score),
                            member,
                        },
                        (),
                    );
                }
                false
            }
            None => {
                self.by_score.insert(
                    ScoreKey {
                        score: OrderedScore(score),
                        member,
                    },
                    (),
                );
                true
            }
        }
    }

    /// Remove a member (ZREM). Returns true if it was present.
    pub fn remove(&mut self, member: &[u8]) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                self.by_score.remove(&ScoreKey {
                    score: OrderedScore(score),
                    member: Bytes::copy_from_slice(member),
                });
                true
            }
            None => false,
        }
    }

    /// Score of a member (ZSCORE).
    #[inline]
    pub fn score(&self, member: &[u8]) -> Option<Score> {
        self.scores.get(member).copied()
    }

    /// Increment a member's score (ZINCRBY), creating it at `delta` when
    /// absent. Returns the new score.
    pub fn incr(&mut self, member: Bytes, delta: Score) -> Score {
        let new_score = self.scores.get(&member).copied().unwrap_or(0.0) + delta;
        self.add(member, new_score);
        new_score
    }

    /// 0-based ascending rank (ZRANK).
    pub fn rank(&self, member: &[u8]) -> Option<usize> {
        let score = *self.scores.get(member)?;
        let key = ScoreKey {
            score: OrderedScore(score),
            member: Bytes::copy_from_slice(member),
        };
        Some(self.by_score.range(..&key).count())
    }

    /// 0-based descending rank (ZREVRANK).
    pub fn rev_rank(&self, member: &[u8]) -> Option<usize> {
        Some(self.len() - 1 - self.rank(member)?)
    }

    /// Range by rank (ZRANGE), inclusive negative-index bounds.
    pub fn range(&self, start: i64, stop: i64) -> Vec<SortedSetEntry> {
        let len = self.len() as i64;
        if len == 0 {
            return Vec::new();
        }

        let start = (if start < 0 { len + start } else { start }).max(0);
        let stop = (if stop < 0 { len + stop } else { stop }).min(len - 1);
        if start > stop {
            return Vec::new();
        }

        self.by_score
            .keys()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .map(|k| SortedSetEntry::new(k.member.clone(), k.score.0))
            .collect()
    }

    /// Reverse range by rank (ZREVRANGE).
    pub fn rev_range(&self, start: i64, stop: i64) -> Vec<SortedSetEntry> {
        let len = self.len() as i64;
        if len == 0 {
            return Vec::new();
        }

        let start = (if start < 0 { len + start } else { start }).max(0);
        let stop = (if stop < 0 { len + stop } else { stop }).min(len - 1);
        if start > stop {
            return Vec::new();
        }

        self.by_score
            .keys()
            .rev()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .map(|k| SortedSetEntry::new(k.member.clone(), k.score.0))
            .collect()
    }

    /// Range by score (ZRANGEBYSCORE), ascending.
    pub fn range_by_score(&self, min: ScoreBound, max: ScoreBound) -> Vec<SortedSetEntry> {
        self.by_score
            .keys()
            .filter(|k| min.admits_from_below(k.score.0) && max.admits_from_above(k.score.0))
            .map(|k| SortedSetEntry::new(k.member.clone(), k.score.0))
            .collect()
    }

    /// Count members within the score interval (ZCOUNT).
    pub fn count_by_score(&self, min: ScoreBound, max: ScoreBound) -> usize {
        self.by_score
            .keys()
            .filter(|k| min.admits_from_below(k.score.0) && max.admits_from_above(k.score.0))
            .count()
    }

    /// Iterate entries in score order.
    pub fn iter(&self) -> impl Iterator<Item = SortedSetEntry> + '_ {
        self.by_score
            .keys()
            .map(|k| SortedSetEntry::new(k.member.clone(), k.score.0))
    }
}

/// Score bound for range queries.
#[derive(Debug, Clone, Copy)]
pub enum ScoreBound {
    /// Inclusive bound
    Inclusive(Score),
    /// Exclusive bound (`(` prefix)
    Exclusive(Score),
    /// Negative infinity (`-inf`)
    NegInf,
    /// Positive infinity (`+inf`)
    PosInf,
}

impl ScoreBound {
    /// Does `s` satisfy this bound when it is the lower end of the interval?
    fn admits_from_below(self, s: Score) -> bool {
        match self {
            Self::Inclusive(v) => s >= v,
            Self::Exclusive(v) => s > v,
            Self::NegInf => true,
            Self::PosInf => false,
        }
    }

    /// Does `s` satisfy this bound when it is the upper end of the interval?
    fn admits_from_above(self, s: Score) -> bool {
        match self {
            Self::Inclusive(v) => s <= v,
            Self::Exclusive(v) => s < v,
            Self::NegInf => false,
            Self::PosInf => true,
        }
    }

    /// Parse score bound syntax: `1.5`, `(1.5`, `-inf`, `+inf`.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("-inf") {
            return Some(Self::NegInf);
        }
        if s.eq_ignore_ascii_case("+inf") || s.eq_ignore_ascii_case("inf") {
            return Some(Self::PosInf);
        }
        if let Some(rest) = s.strip_prefix('(') {
            let v: Score = rest.parse().ok()?;
            if v.is_nan() {
                return None;
            }
            return Some(Self::Exclusive(v));
        }
        let v: Score = s.parse().ok()?;
        if v.is_nan() {
            return None;
        }
        Some(Self::Inclusive(v))
    }
}
