use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

/// Members of a [`Group`] must be able to tell whether they conflict with each other.
pub trait Clash {
    /// Returns a description of the conflict between `self` and `other`, if any.
    fn clash(&self, other: &Self) -> Option<String>;
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GroupError {
    #[error("Key {0} is already present in the group")]
    DuplicateKey(String),
    #[error("Member {key} clashes with member {other}: {reason}")]
    Clash {
        key: String,
        other: String,
        reason: String,
    },
}

/// Ordered map whose members never clash with each other.
///
/// Every insert is checked against all current members, so building a group of
/// `n` members costs `n(n-1)/2` clash tests. Iteration follows insertion order.
#[derive(Debug, Clone)]
pub struct Group<K: Clone + Eq + Hash + Debug, V: Clash> {
    items: Vec<(K, V)>,
    idx_by_key: HashMap<K, usize>,
}

impl<K, V> Default for Group<K, V>
where
    K: Clone + Eq + Hash + Debug,
    V: Clash,
{
    fn default() -> Self {
        Self {
            items: Vec::new(),
            idx_by_key: HashMap::new(),
        }
    }
}

impl<K, V> Group<K, V>
where
    K: Clone + Eq + Hash + Debug,
    V: Clash,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a group member by member, stopping at the first violation.
    pub fn try_from_iter<I>(pairs: I) -> Result<Self, GroupError>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let mut group = Self::new();
        for (key, value) in pairs {
            group.insert(key, value)?;
        }
        Ok(group)
    }

    pub fn insert(&mut self, key: K, value: V) -> Result<(), GroupError> {
        if self.idx_by_key.contains_key(&key) {
            return Err(GroupError::DuplicateKey(format!("{key:?}")));
        }
        for (other_key, other) in self.items.iter() {
            if let Some(reason) = value.clash(other) {
                return Err(GroupError::Clash {
                    key: format!("{key:?}"),
                    other: format!("{other_key:?}"),
                    reason,
                });
            }
        }

        self.idx_by_key.insert(key.clone(), self.items.len());
        self.items.push((key, value));
        Ok(())
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.idx_by_key.get(key).map(|&idx| &self.items[idx].1)
    }

    /// Mutable access to a member.
    ///
    /// Changes made through this reference are not clash-checked again.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let idx = *self.idx_by_key.get(key)?;
        Some(&mut self.items[idx].1)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.idx_by_key.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.items.iter().map(|(k, v)| (k, v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&K, &mut V)> {
        self.items.iter_mut().map(|(k, v)| (&*k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.items.iter().map(|(k, _)| k)
    }

    pub fn len(&self) -> usize {
        assert_eq!(self.items.len(), self.idx_by_key.len());
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
