//! String-keyed node attributes, resolved before `init`.
//!
//! Whatever front end describes the graph (YAML in the CLI, a builder in
//! tests) ends up producing one `Attributes` map per node. Typed accessors
//! turn malformed values into configuration errors that name the attribute.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::key::split_key_spec;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(BTreeMap<String, String>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str).filter(|v| !v.trim().is_empty())
    }

    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| Error::Config(format!("missing required attribute '{key}'")))
    }

    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool> {
        let Some(raw) = self.get(key) else {
            return Ok(default);
        };
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" | "on" => Ok(true),
            "false" | "no" | "0" | "off" => Ok(false),
            other => Err(Error::Config(format!(
                "attribute '{key}': expected a boolean, got '{other}'"
            ))),
        }
    }

    pub fn get_parsed<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|e| Error::Config(format!("attribute '{key}': {e} (value '{raw}')"))),
        }
    }

    pub fn get_usize(&self, key: &str, default: usize) -> Result<usize> {
        Ok(self.get_parsed::<usize>(key)?.unwrap_or(default))
    }

    /// Delimiter-separated list (same delimiters as key specs).
    pub fn get_list(&self, key: &str) -> Option<Vec<String>> {
        self.get(key)
            .map(|raw| split_key_spec(raw).into_iter().map(str::to_string).collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_accessors() {
        let attrs = Attributes::new()
            .with("joinKey", "id;name")
            .with("leftOuterJoin", "yes")
            .with("hashTableSize", "1024")
            .with("blank", "  ");
        assert_eq!(attrs.get_list("joinKey").unwrap(), vec!["id", "name"]);
        assert!(attrs.get_bool("leftOuterJoin", false).unwrap());
        assert_eq!(attrs.get_usize("hashTableSize", 1).unwrap(), 1024);
        assert_eq!(attrs.get_usize("missing", 7).unwrap(), 7);
        assert!(attrs.get("blank").is_none());
    }

    #[test]
    fn bad_values_name_the_attribute() {
        let attrs = Attributes::new()
            .with("flag", "maybe")
            .with("size", "-3");
        let err = attrs.get_bool("flag", false).unwrap_err().to_string();
        assert!(err.contains("flag"));
        let err = attrs.get_usize("size", 0).unwrap_err().to_string();
        assert!(err.contains("size"));
        assert!(attrs.require("absent").is_err());
    }
}
