//! Minimal host runtime around a single node.
//!
//! [`NodeRunner`] owns one node instance and drives it the way a graph
//! scheduler would: contract negotiation and resource provisioning once,
//! `open` once, then strictly ordered frames. Published packets are moved
//! into per-tag [`OutputStream`]s that downstream consumers drain.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use tracing::{debug, info};

use crate::contract::{NodeContract, StreamDeclaration};
use crate::gpu::GpuContext;
use crate::node::{ExecutionContext, Node, NodeState};
use crate::types::{Packet, PortData, Timestamp};

/// FIFO of packets published on one output tag.
#[derive(Debug, Default)]
pub struct OutputStream {
    name: String,
    packets: VecDeque<Packet>,
}

impl OutputStream {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            packets: VecDeque::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Take ownership of the oldest packet.
    pub fn pop(&mut self) -> Option<Packet> {
        self.packets.pop_front()
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    fn push(&mut self, packet: Packet) {
        self.packets.push_back(packet);
    }
}

pub struct NodeRunner {
    node: Box<dyn Node>,
    contract: NodeContract,
    ctx: ExecutionContext,
    outputs: HashMap<String, OutputStream>,
    last_timestamp: Option<Timestamp>,
}

impl NodeRunner {
    /// Negotiate the node's contract against `declaration` and provision the
    /// resources it asks for. `gpu` is only handed over if requested.
    pub fn new(
        node: Box<dyn Node>,
        declaration: &StreamDeclaration,
        gpu: Option<Arc<GpuContext>>,
    ) -> Result<Self> {
        let mut contract = NodeContract::from_declaration(declaration);
        node.update_contract(&mut contract)
            .with_context(|| format!("contract negotiation failed for '{}'", node.node_type()))?;
        contract
            .finalize()
            .with_context(|| format!("contract negotiation failed for '{}'", node.node_type()))?;

        let mut ctx = ExecutionContext::default();
        if contract.wants_gpu() {
            match gpu {
                Some(gpu) => {
                    info!(
                        node = node.node_type(),
                        api = %gpu.api(),
                        device = gpu.device(),
                        "Provisioned GPU context"
                    );
                    ctx.gpu = Some(gpu);
                }
                None => debug!(
                    node = node.node_type(),
                    "Node requested an optional GPU; none is available"
                ),
            }
        }

        let outputs = declaration
            .outputs
            .iter()
            .map(|spec| (spec.tag.clone(), OutputStream::new(spec.name.clone())))
            .collect();

        Ok(Self {
            node,
            contract,
            ctx,
            outputs,
            last_timestamp: None,
        })
    }

    pub fn contract(&self) -> &NodeContract {
        &self.contract
    }

    pub fn node(&self) -> &dyn Node {
        self.node.as_ref()
    }

    pub fn state(&self) -> NodeState {
        self.node.state()
    }

    pub fn has_gpu(&self) -> bool {
        self.ctx.gpu.is_some()
    }

    pub fn open(&mut self) -> Result<()> {
        let node_type = self.node.node_type().to_string();
        self.node
            .open(&mut self.ctx)
            .with_context(|| format!("failed to open node '{node_type}'"))
    }

    /// Run one frame. Returns how many packets were published.
    ///
    /// An error aborts only this frame; nothing it produced reaches the
    /// output streams.
    pub fn process(
        &mut self,
        timestamp: Timestamp,
        inputs: HashMap<String, PortData>,
    ) -> Result<usize> {
        if let Some(last) = self.last_timestamp {
            if timestamp <= last {
                bail!("timestamp {timestamp} is not after the previous frame at {last}");
            }
        }

        for (tag, data) in &inputs {
            let port = self
                .contract
                .input(tag)
                .ok_or_else(|| anyhow!("input tag '{tag}' is not part of the node contract"))?;
            if !port.port_type.is_compatible(&data.port_type()) {
                bail!(
                    "input tag '{tag}' expects {}, got {}",
                    port.port_type,
                    data.port_type()
                );
            }
        }

        self.last_timestamp = Some(timestamp);
        self.ctx.input_timestamp = timestamp;

        let published = self.node.execute(&inputs, &self.ctx)?;

        let expected = self.ctx.output_timestamp();
        for (tag, packet) in &published {
            if !self.outputs.contains_key(tag) {
                bail!("node published on undeclared output tag '{tag}'");
            }
            if packet.timestamp != expected {
                bail!(
                    "packet on '{tag}' stamped {}, expected {expected}",
                    packet.timestamp
                );
            }
        }

        let count = published.len();
        for (tag, packet) in published {
            if let Some(stream) = self.outputs.get_mut(&tag) {
                stream.push(packet);
            }
        }
        Ok(count)
    }

    pub fn output(&mut self, tag: &str) -> Option<&mut OutputStream> {
        self.outputs.get_mut(tag)
    }
}
