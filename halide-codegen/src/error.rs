use thiserror::Error;

use crate::ir::DType;

pub type CompileResult<T> = Result<T, CompileError>;

/// Fatal lowering failures. Every variant names the offending node by uid.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("node '{node}': unsupported operator '{op}'")]
    UnsupportedOperator { node: String, op: String },

    #[error("node '{node}': operator {op} expects {expected} operand(s), given {found}")]
    OperatorArity {
        node: String,
        op: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("node '{node}': unsupported shape {shape:?}, {constraint}")]
    UnsupportedShape {
        node: String,
        shape: Vec<usize>,
        constraint: &'static str,
    },

    #[error("node '{node}': unsupported slice stride {stride}, only stride 1 is supported")]
    UnsupportedStride { node: String, stride: i64 },

    #[error("node '{node}': unsupported quantization width {bits}, expected 8 or 16 bits")]
    UnsupportedQuantizationWidth { node: String, bits: u32 },

    #[error("node '{node}': {kind} output expects {expected} operand(s), given {found}")]
    MalformedOutput {
        node: String,
        kind: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("node '{node}': recurrent output must feed a recurrent input, operand {operand} is not one")]
    UnmatchedFeedback { node: String, operand: usize },

    #[error("node '{node}': unsupported element type {dtype:?}, expected f32 or f64")]
    UnsupportedElementType { node: String, dtype: DType },

    #[error("node '{node}': operand {operand} has not been lowered yet (graph not in dependency order)")]
    OperandNotLowered { node: String, operand: usize },

    #[error("node '{node}': symbol '{symbol}' is already bound")]
    DuplicateSymbol { node: String, symbol: String },

    #[error("node '{node}': {role} name '{name}' is not unique")]
    DuplicateName {
        node: String,
        role: &'static str,
        name: String,
    },

    #[error("node '{node}': operator {op} is missing attribute '{attribute}'")]
    MissingAttribute {
        node: String,
        op: &'static str,
        attribute: &'static str,
    },

    #[error("node '{node}': recurrent input is fed by {feeders} recurrent outputs, expected exactly 1")]
    UnpairedRecurrence { node: String, feeders: usize },
}

impl CompileError {
    /// Uid of the node that violated a lowering constraint.
    pub fn node(&self) -> &str {
        match self {
            CompileError::UnsupportedOperator { node, .. }
            | CompileError::OperatorArity { node, .. }
            | CompileError::UnsupportedShape { node, .. }
            | CompileError::UnsupportedStride { node, .. }
            | CompileError::UnsupportedQuantizationWidth { node, .. }
            | CompileError::MalformedOutput { node, .. }
            | CompileError::UnmatchedFeedback { node, .. }
            | CompileError::UnsupportedElementType { node, .. }
            | CompileError::OperandNotLowered { node, .. }
            | CompileError::DuplicateSymbol { node, .. }
            | CompileError::DuplicateName { node, .. }
            | CompileError::MissingAttribute { node, .. }
            | CompileError::UnpairedRecurrence { node, .. } => node,
        }
    }
}
