use basalt_config::ConfigError;
use basalt_mapping::SourceResolver;
use basalt_sample::SignalList;
use basalt_stats::Stats;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::factory::NodeRegistry;
use crate::node::Node;

/// The named node set of one supervisor.
#[derive(Default)]
pub struct NodeList {
    nodes: Vec<Arc<Node>>,
}

impl NodeList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses the `nodes` table of the root config. Disabled nodes are
    /// parsed (so errors surface) but not added to the graph.
    pub fn parse(
        table: &serde_json::Map<String, Value>,
        sn_uuid: Uuid,
        registry: &NodeRegistry,
    ) -> Result<NodeList, ConfigError> {
        let mut list = NodeList::new();

        for (name, cfg) in table {
            let node = Node::parse(name, cfg, sn_uuid, registry)?;
            if node.is_enabled() {
                list.add(node);
            }
        }

        Ok(list)
    }

    pub fn add(&mut self, node: Arc<Node>) {
        self.nodes.push(node);
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<Node>> {
        self.nodes.iter().find(|n| n.name() == name).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Node>> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl SourceResolver for NodeList {
    fn input_signals(&self, node: &str) -> Option<Arc<SignalList>> {
        self.lookup(node).map(|n| n.input_signals())
    }

    fn node_stats(&self, node: &str) -> Option<Arc<Stats>> {
        self.lookup(node).map(|n| n.stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_skips_disabled_nodes() {
        let table = json!({
            "active": { "type": "loopback" },
            "paused": { "type": "loopback", "enabled": false },
        });

        let list = NodeList::parse(
            table.as_object().unwrap(),
            Uuid::nil(),
            &NodeRegistry::with_builtins(),
        )
        .unwrap();

        assert_eq!(list.len(), 1);
        assert!(list.lookup("active").is_some());
        assert!(list.lookup("paused").is_none());
    }

    #[test]
    fn resolver_exposes_input_signals() {
        let table = json!({
            "src": { "type": "loopback", "in": { "signals": "3f" } },
        });

        let list = NodeList::parse(
            table.as_object().unwrap(),
            Uuid::nil(),
            &NodeRegistry::with_builtins(),
        )
        .unwrap();

        let node = list.lookup("src").unwrap();
        node.check().unwrap();
        node.prepare().unwrap();

        assert_eq!(list.input_signals("src").unwrap().len(), 3);
        assert!(list.input_signals("ghost").is_none());
    }
}
