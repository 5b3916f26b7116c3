use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;

use crate::contract::NodeContract;
use crate::gpu::GpuContext;
use crate::types::{Packet, PortData, PortType, Timestamp};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDefinition {
    pub name: String,
    pub port_type: PortType,
    pub required: bool,
}

/// Per-node view of the host runtime.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub input_timestamp: Timestamp,
    /// Provisioned only when the node's contract asked for a GPU.
    pub gpu: Option<Arc<GpuContext>>,
    /// Declared by the node at open time; `Some(0)` means outputs carry the
    /// input timestamp unchanged.
    pub timestamp_offset: Option<i64>,
}

impl ExecutionContext {
    pub fn with_gpu(mut self, gpu: Arc<GpuContext>) -> Self {
        self.gpu = Some(gpu);
        self
    }

    pub fn at(mut self, timestamp: Timestamp) -> Self {
        self.input_timestamp = timestamp;
        self
    }

    /// Timestamp that packets published for the current input must carry.
    pub fn output_timestamp(&self) -> Timestamp {
        self.input_timestamp.offset(self.timestamp_offset.unwrap_or(0))
    }
}

/// Lifecycle of a node instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NodeState {
    #[default]
    Uninitialized,
    Ready,
    Validating,
    Dispatching,
    Published,
    Faulted,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Ready => "ready",
            Self::Validating => "validating",
            Self::Dispatching => "dispatching",
            Self::Published => "published",
            Self::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

/// Core node trait that all nodes implement.
pub trait Node: Send + Sync {
    fn node_type(&self) -> &str;
    fn input_ports(&self) -> Vec<PortDefinition>;
    fn output_ports(&self) -> Vec<PortDefinition>;

    /// Resolve the node's side of the contract. Runs once, before `open`.
    ///
    /// The default accepts every declared port and requires the required ones.
    fn update_contract(&self, contract: &mut NodeContract) -> Result<()> {
        for port in self.input_ports() {
            if port.required || contract.has_input(&port.name) {
                contract.set_input(port)?;
            }
        }
        for port in self.output_ports() {
            if port.required || contract.has_output(&port.name) {
                contract.set_output(port)?;
            }
        }
        Ok(())
    }

    fn open(&mut self, _ctx: &mut ExecutionContext) -> Result<()> {
        Ok(())
    }

    /// Process one invocation. An empty map means nothing was published.
    fn execute(
        &mut self,
        inputs: &HashMap<String, PortData>,
        ctx: &ExecutionContext,
    ) -> Result<HashMap<String, Packet>>;

    fn state(&self) -> NodeState {
        NodeState::Ready
    }
}
