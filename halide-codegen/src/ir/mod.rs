pub mod graph;
pub mod op;

pub use graph::{DType, Graph, Node, NodeId, NodeKind, OpAttributes, Quantization};
pub use op::{BinaryOp, Op, UnaryOp};
