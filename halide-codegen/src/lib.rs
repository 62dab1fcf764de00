//! Model graph compiler: generates Halide C++ evaluator classes plus their weight files.

pub mod codegen;
pub mod error;
pub mod ir;
pub mod weights;
