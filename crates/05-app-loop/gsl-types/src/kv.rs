use smallvec::SmallVec;

pub type Key = u32;
pub type Value = u32;

/// An ordered set of `(key, value)` pairs identifying a graph (GKV), a
/// calibration context (CKV), or a module tag context (TKV). Equality and
/// hashing are order-independent: pairs are kept sorted by key so two
/// vectors built in different orders compare equal.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyVector {
    pairs: SmallVec<[(Key, Value); 8]>,
}

impl KeyVector {
    pub fn new() -> Self {
        Self {
            pairs: SmallVec::new(),
        }
    }

    pub fn from_pairs(mut pairs: Vec<(Key, Value)>) -> Self {
        pairs.sort_unstable_by_key(|(k, _)| *k);
        Self {
            pairs: SmallVec::from_vec(pairs),
        }
    }

    pub fn insert(&mut self, key: Key, value: Value) {
        match self.pairs.binary_search_by_key(&key, |(k, _)| *k) {
            Ok(idx) => self.pairs[idx].1 = value,
            Err(idx) => self.pairs.insert(idx, (key, value)),
        }
    }

    pub fn get(&self, key: Key) -> Option<Value> {
        self.pairs
            .binary_search_by_key(&key, |(k, _)| *k)
            .ok()
            .map(|idx| self.pairs[idx].1)
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Key, Value)> {
        self.pairs.iter()
    }
}

impl FromIterator<(Key, Value)> for KeyVector {
    fn from_iter<I: IntoIterator<Item = (Key, Value)>>(iter: I) -> Self {
        Self::from_pairs(iter.into_iter().collect())
    }
}
