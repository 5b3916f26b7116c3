use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, error, info, trace, warn};

use crate::contract::{NodeContract, ResourceRequirement};
use crate::error::SegmentationError;
use crate::node::{ExecutionContext, Node, NodeState, PortDefinition};
use crate::types::{Image, Packet, PortData, PortType};

use super::backend::{select_backend, Backend};
use super::converter::{ConverterSlots, ConverterTable};
use super::options::SegmentationOptions;
use super::shape::validate_tensor;

pub const NODE_TYPE: &str = "TensorsToSegmentation";
pub const TENSORS_TAG: &str = "TENSORS";
pub const OUTPUT_SIZE_TAG: &str = "OUTPUT_SIZE";
pub const MASK_TAG: &str = "MASK";

/// Converts a model's output tensors into a segmentation mask image.
///
/// Options are read from the parameter map when the node is opened. Each
/// frame validates tensor 0, picks a backend from tensor residency, and hands
/// the whole tensor set to that backend's converter, which is built on first
/// use and kept for the node's lifetime.
pub struct TensorsToSegmentationNode {
    table: Arc<ConverterTable>,
    params: HashMap<String, serde_json::Value>,
    options: SegmentationOptions,
    slots: ConverterSlots,
    state: NodeState,
    fault: Option<String>,
}

impl TensorsToSegmentationNode {
    pub fn new(table: Arc<ConverterTable>, params: HashMap<String, serde_json::Value>) -> Self {
        Self {
            table,
            params,
            options: SegmentationOptions::default(),
            slots: ConverterSlots::new(),
            state: NodeState::Uninitialized,
            fault: None,
        }
    }

    /// Build a node whose parameter map reproduces `options`.
    pub fn with_options(table: Arc<ConverterTable>, options: &SegmentationOptions) -> Self {
        let params = match serde_json::to_value(options) {
            Ok(serde_json::Value::Object(map)) => map.into_iter().collect(),
            _ => HashMap::new(),
        };
        Self::new(table, params)
    }

    /// Options in effect; defaults until the node is opened.
    pub fn options(&self) -> &SegmentationOptions {
        &self.options
    }

    pub fn slots(&self) -> &ConverterSlots {
        &self.slots
    }

    fn gpu_available(&self) -> bool {
        self.table.supports(Backend::Gpu)
    }

    fn transition(&mut self, next: NodeState) {
        trace!(from = %self.state, to = %next, "Segmentation node state change");
        self.state = next;
    }

    fn mark_faulted(&mut self, reason: String) {
        self.transition(NodeState::Faulted);
        self.fault = Some(reason);
    }

    /// One frame, up to but excluding publication. `None` means the frame
    /// carried no tensors.
    fn convert_frame(
        &mut self,
        inputs: &HashMap<String, PortData>,
        ctx: &ExecutionContext,
    ) -> Result<Option<Image>, SegmentationError> {
        let tensors = match inputs.get(TENSORS_TAG) {
            None => return Ok(None),
            Some(PortData::Tensors(tensors)) => tensors,
            Some(other) => {
                return Err(SegmentationError::Configuration(format!(
                    "{TENSORS_TAG} must carry tensors, got {}",
                    other.port_type()
                )))
            }
        };

        self.transition(NodeState::Validating);
        let primary = tensors
            .first()
            .ok_or_else(|| SegmentationError::Shape("tensor set is empty".to_string()))?;
        let shape = validate_tensor(primary, self.options.activation)?;

        let (width, height) = match inputs.get(OUTPUT_SIZE_TAG) {
            Some(PortData::Size(width, height)) => (*width, *height),
            Some(other) => {
                return Err(SegmentationError::Configuration(format!(
                    "{OUTPUT_SIZE_TAG} must carry a size, got {}",
                    other.port_type()
                )))
            }
            None => {
                let width = i32::try_from(shape.width).map_err(|_| {
                    SegmentationError::Shape(format!("tensor width {} is too large", shape.width))
                })?;
                let height = i32::try_from(shape.height).map_err(|_| {
                    SegmentationError::Shape(format!(
                        "tensor height {} is too large",
                        shape.height
                    ))
                })?;
                (width, height)
            }
        };

        self.transition(NodeState::Dispatching);
        let backend = select_backend(tensors, self.gpu_available());
        debug!(
            backend = %backend,
            width,
            height,
            timestamp = %ctx.input_timestamp,
            tensors = tensors.len(),
            "Dispatching segmentation conversion"
        );

        let converter = self
            .slots
            .get_or_create(backend, &self.table, &self.options, ctx)?;
        let image = converter.convert(tensors, width, height)?;
        Ok(Some(image))
    }
}

impl Node for TensorsToSegmentationNode {
    fn node_type(&self) -> &str {
        NODE_TYPE
    }

    fn input_ports(&self) -> Vec<PortDefinition> {
        vec![
            PortDefinition {
                name: TENSORS_TAG.to_string(),
                port_type: PortType::Tensors,
                required: true,
            },
            PortDefinition {
                name: OUTPUT_SIZE_TAG.to_string(),
                port_type: PortType::Size,
                required: false,
            },
        ]
    }

    fn output_ports(&self) -> Vec<PortDefinition> {
        vec![PortDefinition {
            name: MASK_TAG.to_string(),
            port_type: PortType::Image,
            required: true,
        }]
    }

    fn update_contract(&self, contract: &mut NodeContract) -> Result<()> {
        if contract.input_tags().next().is_none() {
            return Err(SegmentationError::Configuration(
                "no input streams declared".to_string(),
            )
            .into());
        }

        for port in self.input_ports() {
            if port.required || contract.has_input(&port.name) {
                contract
                    .set_input(port)
                    .with_context(|| format!("{NODE_TYPE} input contract"))?;
            }
        }
        for port in self.output_ports() {
            contract
                .set_output(port)
                .with_context(|| format!("{NODE_TYPE} output contract"))?;
        }

        if self.gpu_available() {
            contract.request(ResourceRequirement::Gpu { optional: true });
        }
        Ok(())
    }

    fn open(&mut self, ctx: &mut ExecutionContext) -> Result<()> {
        ctx.timestamp_offset = Some(0);

        match SegmentationOptions::from_params(&self.params) {
            Ok(options) => self.options = options,
            Err(err) => {
                error!(error = %err, "Failed to load segmentation options");
                self.mark_faulted(err.to_string());
                return Err(err).context("failed to open TensorsToSegmentation node");
            }
        }

        self.transition(NodeState::Ready);
        info!(
            activation = %self.options.activation,
            output_layer_index = self.options.output_layer_index,
            gpu_origin = ?self.options.gpu_origin,
            backends = ?self.table.backends(),
            "Opened segmentation node"
        );
        Ok(())
    }

    fn execute(
        &mut self,
        inputs: &HashMap<String, PortData>,
        ctx: &ExecutionContext,
    ) -> Result<HashMap<String, Packet>> {
        match self.state {
            NodeState::Uninitialized => return Err(SegmentationError::NotOpened.into()),
            NodeState::Faulted => {
                let reason = self.fault.clone().unwrap_or_default();
                return Err(SegmentationError::Faulted(reason).into());
            }
            _ => {}
        }

        match self.convert_frame(inputs, ctx) {
            Ok(Some(image)) => {
                let timestamp = ctx.output_timestamp();
                let packet = Packet::new(PortData::Image(image), timestamp);
                self.transition(NodeState::Published);
                let outputs = HashMap::from([(MASK_TAG.to_string(), packet)]);
                self.transition(NodeState::Ready);
                Ok(outputs)
            }
            Ok(None) => {
                self.transition(NodeState::Ready);
                Ok(HashMap::new())
            }
            Err(err) => {
                if err.is_structural() {
                    error!(
                        timestamp = %ctx.input_timestamp,
                        error = %err,
                        "Segmentation node faulted"
                    );
                    self.mark_faulted(err.to_string());
                } else {
                    warn!(
                        timestamp = %ctx.input_timestamp,
                        error = %err,
                        "Dropping segmentation frame"
                    );
                    self.transition(NodeState::Ready);
                }
                Err(anyhow::Error::new(err)
                    .context(format!("segmentation frame at {} failed", ctx.input_timestamp)))
            }
        }
    }

    fn state(&self) -> NodeState {
        self.state
    }
}
