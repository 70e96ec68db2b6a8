use std::{collections::BTreeMap, sync::Arc};

pub type Map = BTreeMap<String, String>;

/// An immutable, cheaply-cloned set of resource labels.
#[derive(Clone, Debug, Eq, PartialEq, Default)]
pub struct Labels(Arc<Map>);

// === impl Labels ===

impl Labels {
    /// Returns true if every key/value in `required` is present in these
    /// labels. An empty requirement matches everything.
    pub fn contains_all(&self, required: &Map) -> bool {
        required.iter().all(|(k, v)| self.0.get(k) == Some(v))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}

impl From<Map> for Labels {
    #[inline]
    fn from(labels: Map) -> Self {
        Self(Arc::new(labels))
    }
}

impl From<Option<Map>> for Labels {
    #[inline]
    fn from(labels: Option<Map>) -> Self {
        labels.unwrap_or_default().into()
    }
}

impl AsRef<Map> for Labels {
    #[inline]
    fn as_ref(&self) -> &Map {
        self.0.as_ref()
    }
}

impl std::iter::FromIterator<(String, String)> for Labels {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(Arc::new(iter.into_iter().collect()))
    }
}

impl std::iter::FromIterator<(&'static str, &'static str)> for Labels {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        iter.into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;

    #[test]
    fn contains_all() {
        let labels = Labels::from_iter(vec![("env", "prod"), ("team", "a")]);
        for (required, expected, msg) in [
            (Map::new(), true, "empty requirement"),
            (btreemap! {"env".into() => "prod".into()}, true, "subset"),
            (btreemap! {"env".into() => "dev".into()}, false, "wrong value"),
            (btreemap! {"zone".into() => "a".into()}, false, "missing key"),
        ] {
            assert_eq!(labels.contains_all(&required), expected, "{msg}");
        }
    }
}
