//! Shape and index policy. Only rank 0, 1 and 2 tensors reach codegen.

use crate::error::{CompileError, CompileResult};
use crate::ir::Node;

use super::plan::IndexVars;

fn unsupported(node: &Node, constraint: &'static str) -> CompileError {
    CompileError::UnsupportedShape {
        node: node.uid.clone(),
        shape: node.shape.clone(),
        constraint,
    }
}

/// Rank 0 and 1 use one index variable, rank 2 uses two.
pub fn index_vars(node: &Node) -> CompileResult<IndexVars> {
    match node.shape.len() {
        0 | 1 => Ok(IndexVars::One),
        2 => Ok(IndexVars::Two),
        _ => Err(unsupported(node, "only rank 0, 1 and 2 are supported")),
    }
}

/// Buffer extents in runtime order: innermost dimension first, scalars as one element.
pub fn buffer_dims(node: &Node) -> CompileResult<Vec<usize>> {
    match node.shape.as_slice() {
        [] => Ok(vec![1]),
        [n] => Ok(vec![*n]),
        [rows, cols] => Ok(vec![*cols, *rows]),
        _ => Err(unsupported(node, "only rank 0, 1 and 2 are supported")),
    }
}

/// Literal dimension arguments of a quantize call, in declared order.
pub fn quantize_dims(node: &Node) -> CompileResult<Vec<usize>> {
    match node.shape.as_slice() {
        [] => Ok(vec![1]),
        [n] => Ok(vec![*n]),
        [rows, cols] => Ok(vec![*rows, *cols]),
        _ => Err(unsupported(node, "quantization supports only rank 0, 1 and 2")),
    }
}

/// Matrix operand of `Times` as `[rows, cols]`.
///
/// A scalar is a 1x1 matrix and a vector of length n is an n x 1 matrix.
pub fn matrix_dims(node: &Node) -> CompileResult<[usize; 2]> {
    match node.shape.as_slice() {
        [] => Ok([1, 1]),
        [n] => Ok([*n, 1]),
        [rows, cols] => Ok([*rows, *cols]),
        _ => Err(unsupported(node, "Times matrix operand must have rank <= 2")),
    }
}

/// Vector operands must have rank 0 or 1.
pub fn expect_vector(node: &Node, constraint: &'static str) -> CompileResult<()> {
    if node.shape.len() <= 1 {
        Ok(())
    } else {
        Err(unsupported(node, constraint))
    }
}

/// Strictly rank-1 operands.
pub fn expect_rank1(node: &Node, constraint: &'static str) -> CompileResult<usize> {
    match node.shape.as_slice() {
        [n] => Ok(*n),
        _ => Err(unsupported(node, constraint)),
    }
}
