use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Order is one instantiation of a process against a data document.
///
/// The body is stored verbatim; only the template engine looks inside it, at
/// dispatch time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub process_id: String,
    #[serde(default)]
    pub body: Value,
}

impl Order {
    /// An unsaved order carrying `body`; id and process are stamped on submission
    pub fn new(body: Value) -> Self {
        Self {
            id: String::new(),
            process_id: String::new(),
            body,
        }
    }
}
