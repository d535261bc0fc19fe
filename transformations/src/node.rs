//! Operation nodes and the arena that links them into a chain.
//!
//! Predecessor links are indices into the owning [`Chain`], and a node may
//! only point at a node pushed before it, so every chain is a finite,
//! acyclic path ending at the single root that holds the raw input bytes.

use crate::error::{Result, TransformationError};
use crate::params::OperationParams;
use crate::registry::OperationKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Where a node reads its input from.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeInput {
    Predecessor(NodeId),
    Raw(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct OperationNode {
    kind: OperationKind,
    params: OperationParams,
    input: NodeInput,
}

impl OperationNode {
    /// Builds a node reading from exactly one of `predecessor` or
    /// `raw_input`.
    pub fn new(
        kind: OperationKind,
        params: OperationParams,
        predecessor: Option<NodeId>,
        raw_input: Option<Vec<u8>>,
    ) -> Result<Self> {
        let input = match (predecessor, raw_input) {
            (Some(id), None) => NodeInput::Predecessor(id),
            (None, Some(bytes)) if !bytes.is_empty() => NodeInput::Raw(bytes),
            (None, _) => return Err(TransformationError::InputRequired),
            (Some(_), Some(_)) => {
                return Err(TransformationError::InvalidInput(
                    "a node reads from a predecessor or from raw input, not both".to_string(),
                ))
            }
        };
        Ok(Self {
            kind,
            params,
            input,
        })
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn params(&self) -> &OperationParams {
        &self.params
    }

    pub fn input(&self) -> &NodeInput {
        &self.input
    }

    pub fn predecessor(&self) -> Option<NodeId> {
        match self.input {
            NodeInput::Predecessor(id) => Some(id),
            NodeInput::Raw(_) => None,
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self.input, NodeInput::Raw(_))
    }

    pub fn into_parts(self) -> (OperationKind, OperationParams, NodeInput) {
        (self.kind, self.params, self.input)
    }
}

/// One request's nodes, in construction order.
#[derive(Debug, Default)]
pub struct Chain {
    nodes: Vec<OperationNode>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a node. The first node must be the root; every later node
    /// must read from the current tail, so the chain never branches.
    pub fn push(&mut self, node: OperationNode) -> Result<NodeId> {
        match (node.predecessor(), self.tail()) {
            (None, None) => {}
            (None, Some(_)) => {
                return Err(TransformationError::InvalidInput(
                    "a chain has exactly one root".to_string(),
                ))
            }
            (Some(id), tail) if Some(id) != tail => {
                return Err(TransformationError::InvalidInput(format!(
                    "predecessor {} is not the tail of the chain",
                    id.0
                )))
            }
            _ => {}
        }
        self.nodes.push(node);
        Ok(NodeId(self.nodes.len() - 1))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn tail(&self) -> Option<NodeId> {
        self.nodes.len().checked_sub(1).map(NodeId)
    }

    pub fn node(&self, id: NodeId) -> Option<&OperationNode> {
        self.nodes.get(id.0)
    }

    pub fn nodes(&self) -> &[OperationNode] {
        &self.nodes
    }

    /// Node ids from the root to `tail`, following predecessor links.
    pub fn lineage(&self, tail: NodeId) -> Result<Vec<NodeId>> {
        let mut path = Vec::new();
        let mut current = Some(tail);
        while let Some(id) = current {
            let node = self.node(id).ok_or_else(|| {
                TransformationError::InvalidInput(format!("node {} is not in the chain", id.0))
            })?;
            path.push(id);
            current = node.predecessor();
        }
        path.reverse();
        Ok(path)
    }

    /// Consumes the chain and returns the tail's lineage, root first.
    pub fn into_lineage(self) -> Result<Vec<OperationNode>> {
        let tail = self.tail().ok_or(TransformationError::NoOperationProduced)?;
        let path = self.lineage(tail)?;
        let mut slots: Vec<Option<OperationNode>> = self.nodes.into_iter().map(Some).collect();
        Ok(path
            .into_iter()
            .filter_map(|id| slots[id.0].take())
            .collect())
    }
}
