//! Alert Identity

use crate::ModelError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Ordered tag key/value set identifying one alert instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet(BTreeMap<String, String>);

impl TagSet {
    /// Create an empty tag set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tag, returning the updated set
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// True when every key present in both sets carries the same value.
    ///
    /// An empty set overlaps everything.
    pub fn overlaps(&self, other: &TagSet) -> bool {
        self.0
            .iter()
            .all(|(k, v)| other.0.get(k).map_or(true, |ov| ov == v))
    }

    /// True when every tag of `self` is present in `other` with the same value
    pub fn subset_of(&self, other: &TagSet) -> bool {
        self.0.iter().all(|(k, v)| other.0.get(k) == Some(v))
    }

    /// Tags shared by both sets with equal values
    pub fn intersection(&self, other: &TagSet) -> TagSet {
        TagSet(
            self.0
                .iter()
                .filter(|(k, v)| other.0.get(*k) == Some(*v))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Tag keys, in order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}={}", k, v)?;
        }
        f.write_str("}")
    }
}

impl FromStr for TagSet {
    type Err = ModelError;

    /// Parse `{k=v,k2=v2}` or `k=v,k2=v2`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let inner = s
            .strip_prefix('{')
            .and_then(|rest| rest.strip_suffix('}'))
            .unwrap_or(s);

        let mut tags = TagSet::new();
        for pair in inner.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (k, v) = pair
                .split_once('=')
                .ok_or_else(|| ModelError::InvalidTagSet(s.to_string()))?;
            let (k, v) = (k.trim(), v.trim());
            if k.is_empty() || v.is_empty() {
                return Err(ModelError::InvalidTagSet(s.to_string()));
            }
            if tags.0.insert(k.to_string(), v.to_string()).is_some() {
                return Err(ModelError::InvalidTagSet(format!("duplicate tag {} in {}", k, s)));
            }
        }
        Ok(tags)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TagSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        TagSet(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Identity of one alert-rule instance: alert name plus tag group
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AlertKey {
    name: String,
    group: TagSet,
}

impl AlertKey {
    pub fn new(name: impl Into<String>, group: TagSet) -> Self {
        Self {
            name: name.into(),
            group,
        }
    }

    /// Alert name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tag group
    pub fn group(&self) -> &TagSet {
        &self.group
    }
}

impl fmt::Display for AlertKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.group)
    }
}

impl FromStr for AlertKey {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let open = s
            .find('{')
            .ok_or_else(|| ModelError::InvalidAlertKey(s.to_string()))?;
        if !s.ends_with('}') || open == 0 {
            return Err(ModelError::InvalidAlertKey(s.to_string()));
        }
        let group = s[open..]
            .parse()
            .map_err(|_| ModelError::InvalidAlertKey(s.to_string()))?;
        Ok(AlertKey::new(&s[..open], group))
    }
}

impl Serialize for AlertKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AlertKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_key_round_trip() {
        let ak = AlertKey::new("cpu.high", TagSet::new().with("host", "web01").with("dc", "ny"));
        assert_eq!(ak.to_string(), "cpu.high{dc=ny,host=web01}");

        let parsed: AlertKey = "cpu.high{dc=ny,host=web01}".parse().unwrap();
        assert_eq!(parsed, ak);

        let empty: AlertKey = "a{}".parse().unwrap();
        assert!(empty.group().is_empty());
    }

    #[test]
    fn test_alert_key_rejects_garbage() {
        assert!("nobraces".parse::<AlertKey>().is_err());
        assert!("{a=b}".parse::<AlertKey>().is_err());
        assert!("a{b}".parse::<AlertKey>().is_err());
    }

    #[test]
    fn test_overlaps() {
        let host = TagSet::new().with("host", "a");
        let host_iface = TagSet::new().with("host", "a").with("iface", "eth0");
        let other_host = TagSet::new().with("host", "b");
        let dc = TagSet::new().with("dc", "ny");

        assert!(host.overlaps(&host_iface));
        assert!(host_iface.overlaps(&host));
        assert!(!host.overlaps(&other_host));
        // No shared keys means no conflict
        assert!(host.overlaps(&dc));
        assert!(TagSet::new().overlaps(&host));
    }

    #[test]
    fn test_subset_and_intersection() {
        let host = TagSet::new().with("host", "a");
        let host_iface = TagSet::new().with("host", "a").with("iface", "eth0");

        assert!(host.subset_of(&host_iface));
        assert!(!host_iface.subset_of(&host));
        assert_eq!(host_iface.intersection(&host), host);
    }

    #[test]
    fn test_alert_key_ordering() {
        let a1: AlertKey = "a{host=1}".parse().unwrap();
        let a2: AlertKey = "a{host=2}".parse().unwrap();
        let b: AlertKey = "b{}".parse().unwrap();
        let mut keys = vec![b.clone(), a2.clone(), a1.clone()];
        keys.sort();
        assert_eq!(keys, vec![a1, a2, b]);
    }

    #[test]
    fn test_alert_key_serde_as_string() {
        let ak: AlertKey = "a{a=b}".parse().unwrap();
        let json = serde_json::to_string(&ak).unwrap();
        assert_eq!(json, "\"a{a=b}\"");
        let back: AlertKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ak);
    }
}
