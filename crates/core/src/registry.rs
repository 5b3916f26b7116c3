use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::node::Node;
use crate::segmentation::converter::ConverterTable;
use crate::segmentation::node::{TensorsToSegmentationNode, NODE_TYPE};
use crate::segmentation::BackendCapabilities;

type NodeFactory =
    dyn Fn(HashMap<String, serde_json::Value>) -> Result<Box<dyn Node>> + Send + Sync;

pub struct NodeRegistry {
    factories: HashMap<String, Box<NodeFactory>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, node_type: &str, factory: F)
    where
        F: Fn(HashMap<String, serde_json::Value>) -> Result<Box<dyn Node>> + Send + Sync + 'static,
    {
        self.factories
            .insert(node_type.to_string(), Box::new(factory));
    }

    pub fn create(
        &self,
        node_type: &str,
        params: HashMap<String, serde_json::Value>,
    ) -> Result<Box<dyn Node>> {
        let factory = self
            .factories
            .get(node_type)
            .ok_or_else(|| anyhow!("unknown node type: {node_type}"))?;

        factory(params)
    }

    pub fn list_node_types(&self) -> Vec<&str> {
        let mut node_types: Vec<&str> = self.factories.keys().map(|v| v.as_str()).collect();
        node_types.sort_unstable();
        node_types
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Every segmentation node created by the registry shares `table`.
/// Options in `params` are parsed when the node is opened.
pub fn register_segmentation_node(registry: &mut NodeRegistry, table: Arc<ConverterTable>) {
    registry.register(NODE_TYPE, move |params| {
        Ok(Box::new(TensorsToSegmentationNode::new(
            table.clone(),
            params,
        )))
    });
}

pub fn register_all_nodes(registry: &mut NodeRegistry, caps: &BackendCapabilities) {
    let table = Arc::new(ConverterTable::from_capabilities(caps));
    register_segmentation_node(registry, table);
}

pub fn build_default_registry(caps: &BackendCapabilities) -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    register_all_nodes(&mut registry, caps);
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::GpuApi;
    use crate::node::{ExecutionContext, NodeState, PortDefinition};
    use crate::types::{Packet, PortData, PortType};

    struct DummyNode;

    impl Node for DummyNode {
        fn node_type(&self) -> &str {
            "dummy"
        }

        fn input_ports(&self) -> Vec<PortDefinition> {
            vec![PortDefinition {
                name: "IN".to_string(),
                port_type: PortType::Size,
                required: true,
            }]
        }

        fn output_ports(&self) -> Vec<PortDefinition> {
            vec![PortDefinition {
                name: "OUT".to_string(),
                port_type: PortType::Size,
                required: true,
            }]
        }

        fn execute(
            &mut self,
            _inputs: &HashMap<String, PortData>,
            _ctx: &ExecutionContext,
        ) -> Result<HashMap<String, Packet>> {
            Ok(HashMap::new())
        }
    }

    #[test]
    fn test_node_registry_register_and_create() {
        let mut registry = NodeRegistry::new();
        registry.register("dummy", |_| Ok(Box::new(DummyNode)));

        let node = registry
            .create("dummy", HashMap::new())
            .expect("dummy node should be created");

        assert_eq!(node.node_type(), "dummy");
        assert_eq!(node.input_ports().len(), 1);
        assert_eq!(node.output_ports().len(), 1);
        assert_eq!(registry.list_node_types(), vec!["dummy"]);
    }

    #[test]
    fn test_node_registry_unknown_type_errors() {
        let registry = NodeRegistry::new();

        for node_type in ["unknown", "TensorsToDetections"] {
            let err = match registry.create(node_type, HashMap::new()) {
                Ok(_) => panic!("unknown node type should error"),
                Err(err) => err,
            };

            assert_eq!(err.to_string(), format!("unknown node type: {node_type}"));
        }
    }

    #[test]
    fn test_default_registry_expected_set() {
        let caps = BackendCapabilities::detect(true, GpuApi::OpenglEs31);
        let registry = build_default_registry(&caps);
        assert_eq!(registry.list_node_types(), vec!["TensorsToSegmentation"]);
    }

    #[test]
    fn test_segmentation_factory_defers_params_to_open() {
        let caps = BackendCapabilities::detect(false, GpuApi::OpenglEs31);
        let registry = build_default_registry(&caps);

        let params = HashMap::from([("activation".to_string(), serde_json::json!("GELU"))]);
        let mut node = registry
            .create("TensorsToSegmentation", params)
            .expect("factory should not parse options");
        assert_eq!(node.state(), NodeState::Uninitialized);

        let err = node.open(&mut ExecutionContext::default()).unwrap_err();
        assert!(format!("{err:#}").contains("unsupported activation"));
        assert_eq!(node.state(), NodeState::Faulted);
    }
}
