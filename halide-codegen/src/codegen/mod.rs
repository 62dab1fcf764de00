mod lower;
mod names;
pub mod plan;
mod render;
mod scaffold;
mod shape;

use crate::error::CompileResult;
use crate::ir::Graph;

pub use lower::lower;
pub use plan::EvaluatorPlan;
pub use render::{Backend, HalideCpp};

/// Naming of the generated class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodegenOptions {
    pub class_name: String,
    pub namespace: String,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        Self {
            class_name: "Evaluator".to_string(),
            namespace: "dnn".to_string(),
        }
    }
}

pub struct Generated {
    /// Complete header text.
    pub source: String,
    pub plan: EvaluatorPlan,
}

impl Generated {
    /// File name the header is conventionally written to.
    pub fn header_name(&self) -> String {
        format!("{}.h", self.plan.class_name)
    }
}

/// Lower `graph` and render it with the Halide C++ backend.
pub fn generate_code(graph: &Graph, options: &CodegenOptions) -> CompileResult<Generated> {
    generate_with(graph, options, &HalideCpp)
}

pub fn generate_with(
    graph: &Graph,
    options: &CodegenOptions,
    backend: &dyn Backend,
) -> CompileResult<Generated> {
    let plan = lower(graph, options)?;
    let source = backend.render(&plan);
    Ok(Generated { source, plan })
}
