//! Route parameters handed to the pipeline by a router.
//!
//! The chain never interprets these. It only threads them from the entry
//! point to every stage of one request.

use std::sync::Arc;

/// Named path parameters extracted by a router, e.g. `id` for `/users/{id}`.
///
/// Cloning is one atomic increment; the pairs themselves are immutable and
/// shared. The empty value allocates nothing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Params(Option<Arc<[(String, String)]>>);

impl Params {
    pub fn empty() -> Self {
        Self(None)
    }

    /// Returns the value of the first parameter called `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.iter().find(|(k, _)| *k == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.as_ref().map_or(0, |pairs| pairs.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> FromIterator<(K, V)> for Params
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let pairs: Arc<[(String, String)]> =
            iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        if pairs.is_empty() { Self(None) } else { Self(Some(pairs)) }
    }
}
