//! Request parameters
//!
//! The wire format is a flat string map. List-valued parameters use indexed
//! keys (`Filter.1.Name`, `Filter.1.Value.1`, `GroupId.1`,
//! `Users.member.1`); the builder methods here produce those keys so callers
//! never format them by hand.

use std::collections::BTreeMap;

/// Flat request parameters, iterated in key order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterMap {
    entries: BTreeMap<String, String>,
    filters: usize,
    tags: usize,
}

impl ParameterMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.entries.insert(key.into(), value.into())
    }

    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.insert(key, value.to_string());
        self
    }

    /// `Filter.N.Name` / `Filter.N.Value.M` (EC2 style filters)
    pub fn with_filter<I, S>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filters += 1;
        let n = self.filters;
        self.insert(format!("Filter.{}.Name", n), name);
        for (m, value) in values.into_iter().enumerate() {
            self.insert(format!("Filter.{}.Value.{}", n, m + 1), value);
        }
        self
    }

    /// `Prefix.1`, `Prefix.2`, … (EC2 id lists such as `GroupId.N`)
    pub fn with_indexed<I, S>(mut self, prefix: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for (i, value) in values.into_iter().enumerate() {
            self.insert(format!("{}.{}", prefix, i + 1), value);
        }
        self
    }

    /// `Prefix.member.1`, `Prefix.member.2`, … (Query protocol lists)
    pub fn with_members<I, S>(self, prefix: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_indexed(&format!("{}.member", prefix), values)
    }

    /// `Tag.N.Key` / `Tag.N.Value`
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags += 1;
        let n = self.tags;
        self.insert(format!("Tag.{}.Key", n), key);
        self.insert(format!("Tag.{}.Value", n), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ParameterMap {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut params = ParameterMap::new();
        for (k, v) in iter {
            params.insert(k, v);
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filters_are_numbered() {
        let params = ParameterMap::new()
            .with_filter("vpc-id", ["vpc-1"])
            .with_filter("tag:env", ["prod", "stage"]);

        assert_eq!(params.get("Filter.1.Name"), Some("vpc-id"));
        assert_eq!(params.get("Filter.1.Value.1"), Some("vpc-1"));
        assert_eq!(params.get("Filter.2.Name"), Some("tag:env"));
        assert_eq!(params.get("Filter.2.Value.2"), Some("stage"));
        assert_eq!(params.len(), 5);
    }

    #[test]
    fn test_indexed_and_member_lists() {
        let params = ParameterMap::new()
            .with_indexed("GroupId", ["sg-1", "sg-2"])
            .with_members("AttributeNames", ["a"]);
        assert_eq!(params.get("GroupId.2"), Some("sg-2"));
        assert_eq!(params.get("AttributeNames.member.1"), Some("a"));
    }

    #[test]
    fn test_tags_and_scalars() {
        let params = ParameterMap::new()
            .with("MaxResults", 50)
            .with_tag("Name", "web")
            .with_tag("env", "prod");
        assert_eq!(params.get("MaxResults"), Some("50"));
        assert_eq!(params.get("Tag.2.Key"), Some("env"));
        assert_eq!(params.get("Tag.2.Value"), Some("prod"));
    }

    #[test]
    fn test_iteration_is_key_ordered() {
        let params: ParameterMap = [("b", "2"), ("a", "1"), ("c", "3")].into_iter().collect();
        let keys: Vec<&str> = params.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }
}
