use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A named projection from an order body to a job payload: output key to path
/// expression. The compiled form lives in [`crate::template::PreparedMapping`]
/// and is never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReadMapping {
    #[serde(default)]
    pub id: String,
    pub body: BTreeMap<String, String>,
}

impl ReadMapping {
    pub fn new<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            id: String::new(),
            body: entries
                .into_iter()
                .map(|(key, expression)| (key.into(), expression.into()))
                .collect(),
        }
    }
}
