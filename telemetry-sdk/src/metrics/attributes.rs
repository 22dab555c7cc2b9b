use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};

use telemetry_api::{Key, KeyValue, Value};

/// Attribute key marking the series that collects measurements once a
/// stream has reached its cardinality limit.
pub(crate) const OVERFLOW_KEY: &str = "otel.metric.overflow";

/// A canonical, unordered set of attributes identifying one time series.
///
/// Entries are sorted by key and deduplicated (the last value given for a key
/// wins), so two sets built from the same pairs in any order compare equal.
/// The structural hash is computed once at construction and reused for every
/// lookup.
#[derive(Clone, Debug)]
pub struct AttributeSet(Vec<KeyValue>, u64);

impl Default for AttributeSet {
    fn default() -> Self {
        AttributeSet::new(Vec::new())
    }
}

impl From<&[KeyValue]> for AttributeSet {
    fn from(values: &[KeyValue]) -> Self {
        AttributeSet::new(values.to_vec())
    }
}

impl<const N: usize> From<[KeyValue; N]> for AttributeSet {
    fn from(values: [KeyValue; N]) -> Self {
        AttributeSet::new(values.into())
    }
}

impl FromIterator<KeyValue> for AttributeSet {
    fn from_iter<I: IntoIterator<Item = KeyValue>>(iter: I) -> Self {
        AttributeSet::new(iter.into_iter().collect())
    }
}

impl AttributeSet {
    fn new(mut values: Vec<KeyValue>) -> Self {
        // stable sort keeps the caller's order among equal keys, so keeping
        // the last of each run keeps the last value given
        values.sort_by(|a, b| a.key.cmp(&b.key));
        let mut deduped: Vec<KeyValue> = Vec::with_capacity(values.len());
        for kv in values {
            match deduped.last_mut() {
                Some(last) if last.key == kv.key => *last = kv,
                _ => deduped.push(kv),
            }
        }

        let hash = calculate_hash(&deduped);
        AttributeSet(deduped, hash)
    }

    /// The set every measurement lands in once a stream overflows.
    pub(crate) fn overflow() -> Self {
        AttributeSet::new(vec![KeyValue::new(OVERFLOW_KEY, true)])
    }

    /// Iterate over key value pairs in the set, ordered by key.
    pub fn iter(&self) -> impl Iterator<Item = (&Key, &Value)> {
        self.0.iter().map(|kv| (&kv.key, &kv.value))
    }

    /// Returns the value for `key`, if present.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0
            .binary_search_by(|kv| kv.key.as_str().cmp(key))
            .ok()
            .map(|i| &self.0[i].value)
    }

    /// Number of attributes in the set.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the set holds no attributes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The sorted pairs backing this set.
    pub fn as_slice(&self) -> &[KeyValue] {
        &self.0
    }

    /// A new set holding only the attributes whose keys are in `allowed`.
    pub(crate) fn retain_keys(&self, allowed: &HashSet<Key>) -> AttributeSet {
        let kept: Vec<KeyValue> = self
            .0
            .iter()
            .filter(|kv| allowed.contains(&kv.key))
            .cloned()
            .collect();
        if kept.len() == self.0.len() {
            return self.clone();
        }
        let hash = calculate_hash(&kept);
        AttributeSet(kept, hash)
    }

    /// The precomputed structural hash.
    pub(crate) fn hash_code(&self) -> u64 {
        self.1
    }
}

fn calculate_hash(values: &[KeyValue]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for item in values {
        item.hash(&mut hasher);
    }
    hasher.finish()
}

impl PartialEq for AttributeSet {
    fn eq(&self, other: &Self) -> bool {
        self.1 == other.1 && self.0 == other.0
    }
}

impl Eq for AttributeSet {}

impl Hash for AttributeSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insertion_order_does_not_matter() {
        let a = AttributeSet::from(&[KeyValue::new("a", 1_i64), KeyValue::new("b", "x")][..]);
        let b = AttributeSet::from([KeyValue::new("b", "x"), KeyValue::new("a", 1_i64)]);
        assert_eq!(a, b);
        assert_eq!(a.hash_code(), b.hash_code());
    }

    #[test]
    fn duplicate_keys_keep_last_value() {
        let set = AttributeSet::from([
            KeyValue::new("k", "first"),
            KeyValue::new("z", true),
            KeyValue::new("k", "second"),
        ]);
        assert_eq!(set.len(), 2);
        assert_eq!(set.get("k"), Some(&Value::from("second")));
    }

    #[test]
    fn different_values_are_different_sets() {
        let a = AttributeSet::from([KeyValue::new("k", 1_i64)]);
        let b = AttributeSet::from([KeyValue::new("k", 1.0)]);
        assert_ne!(a, b);
    }

    #[test]
    fn retain_keys_rehashes() {
        let full = AttributeSet::from([KeyValue::new("a", 1_i64), KeyValue::new("b", 2_i64)]);
        let allowed: HashSet<Key> = [Key::new("a")].into_iter().collect();
        let filtered = full.retain_keys(&allowed);
        assert_eq!(filtered, AttributeSet::from([KeyValue::new("a", 1_i64)]));
        assert_eq!(
            filtered.hash_code(),
            AttributeSet::from([KeyValue::new("a", 1_i64)]).hash_code()
        );
    }

    #[test]
    fn empty_set() {
        let set = AttributeSet::from(&[] as &[KeyValue]);
        assert!(set.is_empty());
        assert_eq!(set, AttributeSet::default());
        assert_eq!(set.hash_code(), AttributeSet::from_iter(Vec::new()).hash_code());
    }
}
