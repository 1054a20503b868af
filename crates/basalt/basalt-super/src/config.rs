use serde::Deserialize;
use serde_json::Value;

/// Root configuration object.
///
/// `nodes` and `paths` stay as raw JSON here; the node and path layers
/// parse their own entries. `http` and `logging` are accepted and handed
/// to external collaborators untouched.
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "defaults::name")]
    pub name: String,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub hugepages: usize,
    #[serde(default)]
    pub affinity: u64,
    #[serde(default)]
    pub priority: i32,
    /// Statistics period in seconds; 0 disables the tick.
    #[serde(default = "defaults::stats")]
    pub stats: f64,
    #[serde(default)]
    pub logging: Option<Value>,
    #[serde(default)]
    pub http: Option<Value>,
    #[serde(default)]
    pub nodes: serde_json::Map<String, Value>,
    #[serde(default)]
    pub paths: Vec<Value>,
}

mod defaults {
    pub fn name() -> String {
        "basalt".into()
    }

    pub fn stats() -> f64 {
        1.0
    }
}
