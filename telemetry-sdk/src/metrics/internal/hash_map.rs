use std::collections::HashMap;
use std::hash::{BuildHasher, Hasher};

use crate::metrics::attributes::AttributeSet;

/// Map from [AttributeSet] to `V` that iterates in insertion order.
///
/// Entries live in a dense arena. A side table maps each precomputed
/// attribute-set hash to the arena slots holding sets with that hash, so a
/// lookup never rehashes the attributes and a hash collision costs a short
/// equality scan over that bucket. The map owns every key it stores.
#[derive(Debug, Clone)]
pub(crate) struct AttributeHashMap<V> {
    entries: Vec<(AttributeSet, V)>,
    buckets: HashMap<u64, Vec<usize>, PrecomputedHashBuilder>,
}

impl<V> Default for AttributeHashMap<V> {
    fn default() -> Self {
        AttributeHashMap::new()
    }
}

impl<V> AttributeHashMap<V> {
    pub(crate) fn new() -> Self {
        AttributeHashMap {
            entries: Vec::new(),
            buckets: HashMap::with_hasher(PrecomputedHashBuilder),
        }
    }

    fn slot_of(&self, key: &AttributeSet) -> Option<usize> {
        self.buckets
            .get(&key.hash_code())?
            .iter()
            .copied()
            .find(|&slot| self.entries[slot].0 == *key)
    }

    pub(crate) fn get(&self, key: &AttributeSet) -> Option<&V> {
        self.slot_of(key).map(|slot| &self.entries[slot].1)
    }

    pub(crate) fn contains(&self, key: &AttributeSet) -> bool {
        self.slot_of(key).is_some()
    }

    /// Inserts or overwrites. An overwritten entry keeps its original
    /// position in iteration order.
    pub(crate) fn set(&mut self, key: AttributeSet, value: V) -> Option<V> {
        match self.slot_of(&key) {
            Some(slot) => Some(std::mem::replace(&mut self.entries[slot].1, value)),
            None => {
                self.push(key, value);
                None
            }
        }
    }

    pub(crate) fn get_or_insert_with(
        &mut self,
        key: &AttributeSet,
        make: impl FnOnce() -> V,
    ) -> &mut V {
        let slot = match self.slot_of(key) {
            Some(slot) => slot,
            None => self.push(key.clone(), make()),
        };
        &mut self.entries[slot].1
    }

    fn push(&mut self, key: AttributeSet, value: V) -> usize {
        let slot = self.entries.len();
        self.buckets.entry(key.hash_code()).or_default().push(slot);
        self.entries.push((key, value));
        slot
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&AttributeSet, &V)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (&AttributeSet, &mut V)> {
        self.entries.iter_mut().map(|(k, v)| (&*k, v))
    }
}

impl<V> IntoIterator for AttributeHashMap<V> {
    type Item = (AttributeSet, V);
    type IntoIter = std::vec::IntoIter<(AttributeSet, V)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<V> FromIterator<(AttributeSet, V)> for AttributeHashMap<V> {
    fn from_iter<I: IntoIterator<Item = (AttributeSet, V)>>(iter: I) -> Self {
        let mut map = AttributeHashMap::new();
        for (k, v) in iter {
            map.set(k, v);
        }
        map
    }
}

/// Passes an already computed `u64` hash straight through.
#[derive(Debug, Default, Clone, Copy)]
struct PrecomputedHashBuilder;

#[derive(Default)]
struct PrecomputedHasher(u64);

impl Hasher for PrecomputedHasher {
    fn finish(&self) -> u64 {
        self.0
    }

    fn write(&mut self, _bytes: &[u8]) {
        unreachable!("only precomputed u64 hashes are stored")
    }

    fn write_u64(&mut self, i: u64) {
        self.0 = i;
    }
}

impl BuildHasher for PrecomputedHashBuilder {
    type Hasher = PrecomputedHasher;

    fn build_hasher(&self) -> Self::Hasher {
        PrecomputedHasher::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use telemetry_api::KeyValue;

    fn attrs(v: &'static str) -> AttributeSet {
        AttributeSet::from([KeyValue::new("k", v)])
    }

    #[test]
    fn set_overwrites_in_place() {
        let mut map = AttributeHashMap::new();
        assert_eq!(map.set(attrs("a"), 1), None);
        assert_eq!(map.set(attrs("b"), 2), None);
        assert_eq!(map.set(attrs("a"), 3), Some(1));

        let entries: Vec<_> = map.iter().map(|(k, v)| (k.clone(), *v)).collect();
        assert_eq!(entries, vec![(attrs("a"), 3), (attrs("b"), 2)]);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn lookup_is_structural() {
        let mut map = AttributeHashMap::new();
        map.set(
            AttributeSet::from([KeyValue::new("x", 1_i64), KeyValue::new("y", 2_i64)]),
            "v",
        );
        let reordered = AttributeSet::from([KeyValue::new("y", 2_i64), KeyValue::new("x", 1_i64)]);
        assert_eq!(map.get(&reordered), Some(&"v"));
        assert!(!map.contains(&attrs("x")));
    }

    #[test]
    fn iteration_is_restartable() {
        let map: AttributeHashMap<i32> = [(attrs("a"), 1), (attrs("b"), 2)].into_iter().collect();
        assert_eq!(map.iter().count(), 2);
        assert_eq!(map.iter().count(), 2);
        assert_eq!(map.iter().map(|(_, v)| *v).sum::<i32>(), 3);
    }

    #[test]
    fn get_or_insert_with_only_creates_once() {
        let mut map = AttributeHashMap::new();
        *map.get_or_insert_with(&attrs("a"), || 10) += 1;
        *map.get_or_insert_with(&attrs("a"), || 100) += 1;
        assert_eq!(map.get(&attrs("a")), Some(&12));
    }

    #[test]
    fn colliding_hashes_are_resolved_by_equality() {
        let mut map = AttributeHashMap::new();
        let a = attrs("a");
        let b = attrs("b");
        // force both keys into the same bucket
        map.entries.push((a.clone(), 1));
        map.entries.push((b.clone(), 2));
        map.buckets.insert(a.hash_code(), vec![0, 1]);
        map.buckets.insert(b.hash_code(), vec![0, 1]);

        assert_eq!(map.get(&a), Some(&1));
        assert_eq!(map.get(&b), Some(&2));
        assert_eq!(map.set(b.clone(), 5), Some(2));
        assert_eq!(map.len(), 2);
    }
}
