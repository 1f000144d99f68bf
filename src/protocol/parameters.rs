//! Ordered parameter set uploaded to the device before a session.
//!
//! The firmware reads parameter values positionally, so insertion order is part of
//! the wire contract. Re-assigning an existing name keeps its original position.

use serde::{Serialize, Serializer};

/// Ordered mapping from parameter name to integer value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterSet {
    entries: Vec<(String, i64)>,
}

impl ParameterSet {
    /// Create an empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update a parameter.
    ///
    /// A new name is appended at the end. An existing name is updated in place and
    /// its previous value is returned.
    pub fn insert(&mut self, name: impl Into<String>, value: i64) -> Option<i64> {
        let name = name.into();
        match self.entries.iter_mut().find(|(key, _)| *key == name) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((name, value));
                None
            }
        }
    }

    /// Look up a parameter by name.
    pub fn get(&self, name: &str) -> Option<i64> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| *value)
    }

    /// Value of `name`, or zero when the parameter is missing.
    pub fn get_or_zero(&self, name: &str) -> i64 {
        self.get(name).unwrap_or(0)
    }

    /// Values in insertion order.
    pub fn values(&self) -> impl Iterator<Item = i64> + '_ {
        self.entries.iter().map(|(_, value)| *value)
    }

    /// `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> + '_ {
        self.entries.iter().map(|(key, value)| (key.as_str(), *value))
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set holds no parameters.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every parameter.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<K: Into<String>> FromIterator<(K, i64)> for ParameterSet {
    fn from_iter<T: IntoIterator<Item = (K, i64)>>(iter: T) -> Self {
        let mut set = ParameterSet::new();
        for (name, value) in iter {
            set.insert(name, value);
        }
        set
    }
}

impl Serialize for ParameterSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_insertion_order() {
        let params: ParameterSet = [("z", 1), ("a", 2), ("m", 3)].into_iter().collect();
        let names: Vec<&str> = params.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["z", "a", "m"]);
        assert_eq!(params.values().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn reassignment_keeps_first_position() {
        let mut params = ParameterSet::new();
        params.insert("cs1_dur", 2000);
        params.insert("cs1_freq", 6000);
        assert_eq!(params.insert("cs1_dur", 2500), Some(2000));

        assert_eq!(params.len(), 2);
        assert_eq!(params.values().collect::<Vec<_>>(), vec![2500, 6000]);
    }

    #[test]
    fn missing_parameter_reads_as_zero() {
        let params = ParameterSet::new();
        assert_eq!(params.get("track_period"), None);
        assert_eq!(params.get_or_zero("track_period"), 0);
    }
}
