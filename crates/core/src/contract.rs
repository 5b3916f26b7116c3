//! One-time contract negotiation between a node and the host runtime.
//!
//! The graph declares which tagged streams a node is wired to (for example
//! `TENSORS:tensors`). Before any frame flows, the node fills in the payload
//! type for every tag it accepts and may ask for platform resources. Anything
//! left unresolved is a configuration error.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::SegmentationError;
use crate::node::PortDefinition;

/// A single `TAG:name` stream binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSpec {
    pub tag: String,
    pub name: String,
}

impl StreamSpec {
    /// Parse `TAG:name`. The tag must be upper-case; the name must be non-empty.
    pub fn parse(spec: &str) -> Result<Self, SegmentationError> {
        let (tag, name) = spec.split_once(':').ok_or_else(|| {
            SegmentationError::Configuration(format!(
                "stream '{spec}' must be written as TAG:name"
            ))
        })?;
        let tag = tag.trim();
        let name = name.trim();

        if tag.is_empty() || name.is_empty() {
            return Err(SegmentationError::Configuration(format!(
                "stream '{spec}' has an empty tag or name"
            )));
        }
        if !tag
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(SegmentationError::Configuration(format!(
                "stream tag '{tag}' must be upper-case"
            )));
        }

        Ok(Self {
            tag: tag.to_string(),
            name: name.to_string(),
        })
    }
}

impl fmt::Display for StreamSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tag, self.name)
    }
}

/// Streams the graph wires to one node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamDeclaration {
    pub inputs: Vec<StreamSpec>,
    pub outputs: Vec<StreamSpec>,
}

impl StreamDeclaration {
    pub fn parse(inputs: &[&str], outputs: &[&str]) -> Result<Self, SegmentationError> {
        let inputs = inputs
            .iter()
            .map(|s| StreamSpec::parse(s))
            .collect::<Result<Vec<_>, _>>()?;
        let outputs = outputs
            .iter()
            .map(|s| StreamSpec::parse(s))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { inputs, outputs })
    }
}

/// Platform resources a node may ask the host to provision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceRequirement {
    Gpu { optional: bool },
}

#[derive(Debug, Clone, Default)]
pub struct NodeContract {
    inputs: BTreeMap<String, Option<PortDefinition>>,
    outputs: BTreeMap<String, Option<PortDefinition>>,
    resources: Vec<ResourceRequirement>,
}

impl NodeContract {
    pub fn from_declaration(declaration: &StreamDeclaration) -> Self {
        Self {
            inputs: declaration
                .inputs
                .iter()
                .map(|s| (s.tag.clone(), None))
                .collect(),
            outputs: declaration
                .outputs
                .iter()
                .map(|s| (s.tag.clone(), None))
                .collect(),
            resources: Vec::new(),
        }
    }

    pub fn input_tags(&self) -> impl Iterator<Item = &str> {
        self.inputs.keys().map(String::as_str)
    }

    pub fn has_input(&self, tag: &str) -> bool {
        self.inputs.contains_key(tag)
    }

    pub fn has_output(&self, tag: &str) -> bool {
        self.outputs.contains_key(tag)
    }

    /// Accept a declared input tag with the given definition.
    pub fn set_input(&mut self, port: PortDefinition) -> Result<(), SegmentationError> {
        let slot = self.inputs.get_mut(&port.name).ok_or_else(|| {
            SegmentationError::Configuration(format!(
                "required input tag '{}' is not connected",
                port.name
            ))
        })?;
        *slot = Some(port);
        Ok(())
    }

    /// Accept a declared output tag with the given definition.
    pub fn set_output(&mut self, port: PortDefinition) -> Result<(), SegmentationError> {
        let slot = self.outputs.get_mut(&port.name).ok_or_else(|| {
            SegmentationError::Configuration(format!(
                "output tag '{}' is not connected",
                port.name
            ))
        })?;
        *slot = Some(port);
        Ok(())
    }

    pub fn request(&mut self, requirement: ResourceRequirement) {
        if !self.resources.contains(&requirement) {
            self.resources.push(requirement);
        }
    }

    pub fn resources(&self) -> &[ResourceRequirement] {
        &self.resources
    }

    pub fn wants_gpu(&self) -> bool {
        self.resources
            .iter()
            .any(|r| matches!(r, ResourceRequirement::Gpu { .. }))
    }

    pub fn input(&self, tag: &str) -> Option<&PortDefinition> {
        self.inputs.get(tag).and_then(Option::as_ref)
    }

    pub fn output(&self, tag: &str) -> Option<&PortDefinition> {
        self.outputs.get(tag).and_then(Option::as_ref)
    }

    /// Every declared tag must have been accepted by the node.
    pub fn finalize(&self) -> Result<(), SegmentationError> {
        for (direction, ports) in [("input", &self.inputs), ("output", &self.outputs)] {
            if let Some((tag, _)) = ports.iter().find(|(_, port)| port.is_none()) {
                return Err(SegmentationError::Configuration(format!(
                    "{direction} tag '{tag}' is connected but not accepted by the node"
                )));
            }
        }
        Ok(())
    }
}
