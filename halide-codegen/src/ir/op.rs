//! Closed operator set understood by the lowering.
//!
//! Operator nodes arrive with a free-form name; `Op::resolve` is the only
//! place a name is matched, everything downstream matches on `Op`.

use crate::error::{CompileError, CompileResult};
use crate::ir::graph::{Node, NodeKind, OpAttributes};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Plus,
    Minus,
    ElementTimes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Log,
    Tanh,
    Sigmoid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// Element-wise `Plus`, `Minus`, `ElementTimes`
    Binary(BinaryOp),

    /// `Log`, `Tanh`, `Sigmoid`/`StableSigmoid`
    Unary(UnaryOp),

    /// Vector-by-matrix product
    Times,

    /// Contiguous range of a vector
    Slice { begin: i64, end: i64 },

    /// Concatenation of two vectors
    Splice,
}

impl Op {
    pub fn resolve(node: &Node) -> CompileResult<Op> {
        let NodeKind::Operator {
            op_name,
            attributes,
        } = &node.kind
        else {
            return Err(CompileError::UnsupportedOperator {
                node: node.uid.clone(),
                op: format!("{:?}", node.kind),
            });
        };

        let op = match op_name.as_str() {
            "Plus" => Op::Binary(BinaryOp::Plus),
            "Minus" => Op::Binary(BinaryOp::Minus),
            "ElementTimes" => Op::Binary(BinaryOp::ElementTimes),
            "Log" => Op::Unary(UnaryOp::Log),
            "Tanh" => Op::Unary(UnaryOp::Tanh),
            "Sigmoid" | "StableSigmoid" => Op::Unary(UnaryOp::Sigmoid),
            "Times" => Op::Times,
            "Slice" => resolve_slice(node, attributes)?,
            "Splice" => Op::Splice,
            other => {
                return Err(CompileError::UnsupportedOperator {
                    node: node.uid.clone(),
                    op: other.to_string(),
                })
            }
        };
        Ok(op)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Op::Binary(BinaryOp::Plus) => "Plus",
            Op::Binary(BinaryOp::Minus) => "Minus",
            Op::Binary(BinaryOp::ElementTimes) => "ElementTimes",
            Op::Unary(UnaryOp::Log) => "Log",
            Op::Unary(UnaryOp::Tanh) => "Tanh",
            Op::Unary(UnaryOp::Sigmoid) => "Sigmoid",
            Op::Times => "Times",
            Op::Slice { .. } => "Slice",
            Op::Splice => "Splice",
        }
    }

    /// Fixed operand count of the operator.
    pub fn arity(&self) -> usize {
        match self {
            Op::Binary(_) | Op::Times | Op::Splice => 2,
            Op::Unary(_) | Op::Slice { .. } => 1,
        }
    }
}

/// Only unit stride is supported; that is checked before the bounds are required.
fn resolve_slice(node: &Node, attributes: &OpAttributes) -> CompileResult<Op> {
    if let Some(stride) = attributes.slice_strides.filter(|s| *s != 1) {
        return Err(CompileError::UnsupportedStride {
            node: node.uid.clone(),
            stride,
        });
    }
    let missing = |attribute| CompileError::MissingAttribute {
        node: node.uid.clone(),
        op: "Slice",
        attribute,
    };
    Ok(Op::Slice {
        begin: attributes.begin_index.ok_or_else(|| missing("begin_index"))?,
        end: attributes.end_index.ok_or_else(|| missing("end_index"))?,
    })
}
