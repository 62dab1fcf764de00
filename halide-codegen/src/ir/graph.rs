//! Model dataflow graph, as handed over by the graph-construction tooling.
//!
//! The compiler never mutates a `Graph`; nodes are listed in dependency order
//! and operand edges refer to earlier nodes by index.

use serde::{Deserialize, Serialize};

pub type NodeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    #[default]
    F32,
    F64,
    F16,
    I32,
}

/// Quantization annotation attached by the upstream quantizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quantization {
    /// Total storage width in bits.
    pub bits: u32,
    /// Bit budget handed to the runtime quantizer.
    #[serde(default)]
    pub reserved_bits: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub begin_index: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_index: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slice_strides: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    /// Trained weight
    Parameter,
    /// Constant value, stored like a parameter
    Constant,
    /// Graph input - provided by caller, or a recurrent history slot
    Input,
    /// Graph output - realized by caller, or fed back into a recurrent input
    Output,
    /// Primitive function, resolved to an `Op` during lowering
    Operator {
        op_name: String,
        #[serde(default)]
        attributes: OpAttributes,
    },
    /// Inserted by the quantizer in front of quantized operands
    QuantizeMarker,
}

impl NodeKind {
    pub fn is_leaf_value(&self) -> bool {
        matches!(self, NodeKind::Parameter | NodeKind::Constant)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub kind: NodeKind,
    #[serde(default)]
    pub shape: Vec<usize>,
    #[serde(default)]
    pub dtype: DType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantized: Option<Quantization>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence_offset: Option<usize>,
    #[serde(default)]
    pub operands: Vec<NodeId>,
    /// Flattened leaf value, consumed only by weight extraction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Vec<f64>>,
}

impl Node {
    pub fn new(uid: impl Into<String>, kind: NodeKind, shape: Vec<usize>) -> Self {
        Self {
            uid: uid.into(),
            name: None,
            kind,
            shape,
            dtype: DType::F32,
            quantized: None,
            recurrence_offset: None,
            operands: Vec::new(),
            value: None,
        }
    }

    /// Name used for inputs and outputs in generated signatures.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.uid)
    }

    pub fn element_count(&self) -> usize {
        self.shape.iter().product::<usize>()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    pub nodes: Vec<Node>,
}

impl Graph {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(node);
        id
    }

    pub fn add_parameter(&mut self, uid: &str, shape: Vec<usize>) -> NodeId {
        self.add_node(Node::new(uid, NodeKind::Parameter, shape))
    }

    pub fn add_constant(&mut self, uid: &str, shape: Vec<usize>) -> NodeId {
        self.add_node(Node::new(uid, NodeKind::Constant, shape))
    }

    pub fn add_input(&mut self, uid: &str, shape: Vec<usize>) -> NodeId {
        self.add_node(Node::new(uid, NodeKind::Input, shape))
    }

    pub fn add_output(&mut self, uid: &str, shape: Vec<usize>, operands: Vec<NodeId>) -> NodeId {
        let mut node = Node::new(uid, NodeKind::Output, shape);
        node.operands = operands;
        self.add_node(node)
    }

    pub fn add_op(
        &mut self,
        uid: &str,
        op_name: &str,
        shape: Vec<usize>,
        operands: Vec<NodeId>,
    ) -> NodeId {
        let mut node = Node::new(
            uid,
            NodeKind::Operator {
                op_name: op_name.to_string(),
                attributes: OpAttributes::default(),
            },
            shape,
        );
        node.operands = operands;
        self.add_node(node)
    }

    /// Number of distinct nodes consuming each node, indexed by `NodeId`.
    pub fn consumer_counts(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.nodes.len()];
        for node in &self.nodes {
            let mut seen: Vec<NodeId> = Vec::with_capacity(node.operands.len());
            for &operand in &node.operands {
                if operand < counts.len() && !seen.contains(&operand) {
                    counts[operand] += 1;
                    seen.push(operand);
                }
            }
        }
        counts
    }
}
