//! Set implementation.

use bytes::Bytes;
use rand::seq::IteratorRandom;
use std::collections::HashSet;

/// An unordered collection of unique byte strings.
#[derive(Debug, Clone, Default)]
pub struct CustosSet {
    inner: HashSet<Bytes>,
}

impl CustosSet {
    /// Create a new empty set.
    #[inline]
    pub fn new() -> Self {
        Self {
            inner: HashSet::new(),
        }
    }

    /// Returns the cardinality.
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns true if the set is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Add a member (SADD). Returns true if newly added.
    #[inline]
    pub fn add(&mut self, value: Bytes) -> bool {
        self.inner.insert(value)
    }

    /// Remove a member (SREM). Returns true if it was present.
    #[inline]
    pub fn remove(&mut self, value: &[u8]) -> bool {
        self.inner.remove(value)
    }

    /// Membership test (SISMEMBER).
    #[inline]
    pub fn contains(&self, value: &[u8]) -> bool {
        self.inner.contains(value)
    }

    /// All members (SMEMBERS). Order is not observable.
    pub fn members(&self) -> Vec<Bytes> {
        self.inner.iter().cloned().collect()
    }

    /// Remove and return up to `count` uniformly random members (SPOP).
    pub fn pop_random(&mut self, count: usize) -> Vec<Bytes> {
        let mut rng = rand::thread_rng();
        let picked: Vec<Bytes> = self
            .inner
            .iter()
            .cloned()
            .choose_multiple(&mut rng, count.min(self.inner.len()));
        for member in &picked {
            self.inner.remove(member);
        }
        picked
    }

    /// Return up to `count` random members without removal (SRANDMEMBER).
    /// A negative count permits duplicates.
    pub fn random_members(&self, count: i64) -> Vec<Bytes> {
        let mut rng = rand::thread_rng();
        if count >= 0 {
            self.inner
                .iter()
                .cloned()
                .choose_multiple(&mut rng, (count as usize).min(self.inner.len()))
        } else {
            let wanted = count.unsigned_abs() as usize;
            (0..wanted)
                .filter_map(|_| self.inner.iter().choose(&mut rng).cloned())
                .collect()
        }
    }

    /// Iterate over members.
    pub fn iter(&self) -> impl Iterator<Item = &Bytes> {
        self.inner.iter()
    }

    /// Intersection with other sets (SINTER).
    pub fn intersect(&self, others: &[&CustosSet]) -> Vec<Bytes> {
        self.inner
            .iter()
            .filter(|m| others.iter().all(|o| o.contains(m)))
            .cloned()
            .collect()
    }

    /// Union with other sets (SUNION).
    pub fn union(&self, others: &[&CustosSet]) -> Vec<Bytes> {
        let mut result = self.inner.clone();
        for other in others {
            result.extend(other.inner.iter().cloned());
        }
        result.into_iter().collect()
    }

    /// Members of this set absent from every other set (SDIFF).
    pub fn difference(&self, others: &[&CustosSet]) -> Vec<Bytes> {
        self.inner
            .iter()
            .filter(|m| !others.iter().any(|o| o.contains(m)))
            .cloned()
            .collect()
    }
}

impl FromIterator<Bytes> for CustosSet {
    fn from_iter<I: IntoIterator<Item = Bytes>>(iter: I) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_of(items: &[&str]) -> CustosSet {
        items
            .iter()
            .map(|s| Bytes::copy_from_slice(s.as_bytes()))
            .collect()
    }

    #[test]
    fn test_add_remove() {
        let mut set = CustosSet::new();
        assert!(set.add(Bytes::from("a")));
        assert!(!set.add(Bytes::from("a")));
        assert_eq!(set.len(), 1);
        assert!(set.remove(b"a"));
        assert!(!set.remove(b"a"));
        assert!(set.is_empty());
    }

    #[test]
    fn test_algebra() {
        let x = set_of(&["a", "b", "c"]);
        let y = set_of(&["b", "c", "d"]);

        let mut inter = x.intersect(&[&y]);
        inter.sort();
        assert_eq!(inter, vec![Bytes::from("b"), Bytes::from("c")]);

        let union = x.union(&[&y]);
        assert_eq!(union.len(), 4);

        let diff = x.difference(&[&y]);
        assert_eq!(diff, vec![Bytes::from("a")]);
    }

    #[test]
    fn test_diff_order_matters() {
        let x = set_of(&["a", "b"]);
        let y = set_of(&["b"]);
        let z = set_of(&["a"]);
        // x minus all others
        assert!(x.difference(&[&y, &z]).is_empty());
        // y minus x is empty, but z minus y is not
        assert_eq!(z.difference(&[&y]), vec![Bytes::from("a")]);
    }

    #[test]
    fn test_pop_random() {
        let mut set = set_of(&["a", "b", "c"]);
        let popped = set.pop_random(2);
        assert_eq!(popped.len(), 2);
        assert_eq!(set.len(), 1);
        for member in popped {
            assert!(!set.contains(&member));
        }
    }

    #[test]
    fn test_random_members_negative_count() {
        let set = set_of(&["a"]);
        let members = set.random_members(-5);
        assert_eq!(members.len(), 5);
        assert!(members.iter().all(|m| m == &Bytes::from("a")));
    }
}
