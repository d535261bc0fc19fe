//! Turns a request body into a [`Chain`].
//!
//! A body is either a single operation spec (`{"type": ..., "params": ...}`)
//! or a pipeline (`{"operations": [spec, ...]}`).

use crate::error::{Result, TransformationError};
use crate::node::{Chain, NodeId, OperationNode};
use crate::params::OperationParams;
use crate::registry::OperationKind;
use serde_json::Value;

pub const DEFAULT_MAX_OPERATIONS: usize = 32;

/// What to do with a pipeline element that does not parse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnknownOperationPolicy {
    /// Leave the element out and keep building.
    #[default]
    Skip,
    /// Fail the whole request.
    Reject,
}

impl UnknownOperationPolicy {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "skip" => Some(Self::Skip),
            "reject" | "abort" => Some(Self::Reject),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChainBuilder {
    unknown_policy: UnknownOperationPolicy,
    max_operations: usize,
}

impl Default for ChainBuilder {
    fn default() -> Self {
        Self {
            unknown_policy: UnknownOperationPolicy::default(),
            max_operations: DEFAULT_MAX_OPERATIONS,
        }
    }
}

impl ChainBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_unknown_policy(mut self, policy: UnknownOperationPolicy) -> Self {
        self.unknown_policy = policy;
        self
    }

    pub fn with_max_operations(mut self, max_operations: usize) -> Self {
        self.max_operations = max_operations;
        self
    }

    pub fn unknown_policy(&self) -> UnknownOperationPolicy {
        self.unknown_policy
    }

    pub fn max_operations(&self) -> usize {
        self.max_operations
    }

    /// Parses one operation spec into a node reading from `predecessor` or
    /// `raw_input`.
    pub fn parse_one(
        &self,
        spec: &Value,
        predecessor: Option<NodeId>,
        raw_input: Option<Vec<u8>>,
    ) -> Result<OperationNode> {
        let (kind, params) = parse_spec(spec)?;
        OperationNode::new(kind, params, predecessor, raw_input)
    }

    /// Builds the chain for a request body. The raw input goes to the first
    /// node that parses; every later node reads from the last one that did.
    pub fn build(&self, body: &Value, raw_input: Vec<u8>) -> Result<Chain> {
        let mut chain = Chain::new();

        let specs = match body.get("operations") {
            Some(Value::Array(specs)) => specs,
            _ => {
                chain.push(self.parse_one(body, None, Some(raw_input))?)?;
                return Ok(chain);
            }
        };

        if specs.len() > self.max_operations {
            return Err(TransformationError::TooManyOperations {
                count: specs.len(),
                limit: self.max_operations,
            });
        }

        let mut raw_input = Some(raw_input);
        for (index, spec) in specs.iter().enumerate() {
            let (kind, params) = match parse_spec(spec) {
                Ok(parsed) => parsed,
                Err(err) if self.unknown_policy == UnknownOperationPolicy::Skip => {
                    log::warn!("Skipping pipeline operation {}: {}", index, err);
                    continue;
                }
                Err(err) => return Err(err),
            };

            let node = match chain.tail() {
                Some(previous) => OperationNode::new(kind, params, Some(previous), None)?,
                None => OperationNode::new(kind, params, None, raw_input.take())?,
            };
            chain.push(node)?;
        }

        if chain.is_empty() {
            return Err(TransformationError::NoOperationProduced);
        }
        log::debug!(
            "Built chain of {} operations from {} specs",
            chain.len(),
            specs.len()
        );
        Ok(chain)
    }
}

fn parse_spec(spec: &Value) -> Result<(OperationKind, OperationParams)> {
    let fields = spec.as_object().ok_or_else(|| {
        TransformationError::MalformedOperation("an operation must be a JSON object".to_string())
    })?;

    let type_name = match fields.get("type") {
        None | Some(Value::Null) => return Err(TransformationError::MissingOperationType),
        Some(Value::String(name)) => name,
        Some(_) => {
            return Err(TransformationError::MalformedOperation(
                "'type' must be a string".to_string(),
            ))
        }
    };

    let kind = OperationKind::lookup(type_name)
        .ok_or_else(|| TransformationError::UnsupportedOperation(type_name.clone()))?;
    let params = OperationParams::from_value(fields.get("params"))?;
    Ok((kind, params))
}
