use std::collections::{HashMap, HashSet};

use crate::error::{CompileError, CompileResult};
use crate::ir::{BinaryOp, DType, Graph, Node, NodeId, NodeKind, Op, UnaryOp};

use super::names;
use super::plan::*;
use super::shape;
use super::CodegenOptions;

/**
 * Lower a graph into an EvaluatorPlan.
 */
pub fn lower(graph: &Graph, options: &CodegenOptions) -> CompileResult<EvaluatorPlan> {
    let ctx = walk(graph)?;
    ctx.finish(options)
}

/// Identifiers the generated class always declares or refers to.
const FIXED_IDENTIFIERS: &[&str] = &[
    "var1",
    "var2",
    "timestep",
    "root",
    "slot",
    "weightFilePath",
    "m_graph",
    "m_graphInitialized",
    "create_eval_graph",
    "init",
    "Evaluate",
    "ReadValues",
    "Halide",
    "std",
    "boost",
    "auto",
    "bool",
    "char",
    "class",
    "const",
    "double",
    "float",
    "int",
    "return",
    "short",
    "static",
    "template",
    "void",
];

/// Visit every node once, in the order the graph lists them.
pub(crate) fn walk(graph: &Graph) -> CompileResult<CompileContext<'_>> {
    let mut ctx = CompileContext::new(graph);
    for (id, node) in graph.nodes.iter().enumerate() {
        dispatch(&mut ctx, id, node)?;
    }
    Ok(ctx)
}

/// State of one compilation run, handed to every lowering rule.
pub(crate) struct CompileContext<'g> {
    graph: &'g Graph,
    consumers: Vec<usize>,
    symbols: HashMap<NodeId, String>,
    /// Every identifier the plan will print, fixed names included.
    reserved: HashSet<String>,
    body: Vec<Stmt>,
    values: Vec<LeafValue>,
    inputs: Vec<InputBinding>,
    outputs: Vec<OutputBinding>,
}

impl<'g> CompileContext<'g> {
    fn new(graph: &'g Graph) -> Self {
        Self {
            graph,
            consumers: graph.consumer_counts(),
            symbols: HashMap::new(),
            reserved: FIXED_IDENTIFIERS.iter().map(|s| s.to_string()).collect(),
            body: Vec::new(),
            values: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn symbol(&self, id: NodeId) -> Option<&str> {
        self.symbols.get(&id).map(String::as_str)
    }

    #[cfg(test)]
    pub(crate) fn symbol_count(&self) -> usize {
        self.symbols.len()
    }

    fn emit(&mut self, stmt: Stmt) {
        self.body.push(stmt);
    }

    /// Claim an identifier of the generated code for `node`.
    fn reserve(&mut self, node: &Node, name: String) -> CompileResult<()> {
        if self.reserved.contains(&name) {
            return Err(CompileError::DuplicateSymbol {
                node: node.uid.clone(),
                symbol: name,
            });
        }
        self.reserved.insert(name);
        Ok(())
    }

    fn bind(&mut self, id: NodeId, node: &Node, symbol: String) -> CompileResult<()> {
        if self.symbols.contains_key(&id) {
            return Err(CompileError::DuplicateSymbol {
                node: node.uid.clone(),
                symbol,
            });
        }
        self.reserve(node, symbol.clone())?;
        log::debug!("bind {} -> {}", node.uid, symbol);
        self.symbols.insert(id, symbol);
        Ok(())
    }

    /// Operand `index` of `node`, which must already carry a symbol.
    fn operand(&self, node: &Node, index: usize) -> CompileResult<(&'g Node, String)> {
        let id = node.operands[index];
        let not_lowered = || CompileError::OperandNotLowered {
            node: node.uid.clone(),
            operand: id,
        };
        let operand = self.graph.get(id).ok_or_else(not_lowered)?;
        let symbol = self.symbols.get(&id).ok_or_else(not_lowered)?;
        Ok((operand, symbol.clone()))
    }

    /// Emit the materialize-once directive for values read by several consumers.
    fn materialize_shared(&mut self, id: NodeId, symbol: &str) {
        if self.consumers[id] > 1 {
            self.emit(Stmt::ComputeRoot {
                func: symbol.to_string(),
            });
        }
    }

    fn finish(self, options: &CodegenOptions) -> CompileResult<EvaluatorPlan> {
        for input in self.inputs.iter().filter(|i| i.recurrence.is_some()) {
            let feeders = self
                .outputs
                .iter()
                .filter(|o| o.feeds.as_deref() == Some(input.name.as_str()))
                .count();
            if feeders != 1 {
                return Err(CompileError::UnpairedRecurrence {
                    node: input.uid.clone(),
                    feeders,
                });
            }
        }
        if let Some(output) = self
            .outputs
            .iter()
            .find(|o| self.inputs.iter().any(|i| i.name == o.name))
        {
            return Err(CompileError::DuplicateName {
                node: output.uid.clone(),
                role: "output",
                name: output.name.clone(),
            });
        }
        // Immediate outputs become parameters of the evaluation entry point.
        if let Some(output) = self
            .outputs
            .iter()
            .filter(|o| o.feeds.is_none())
            .find(|o| self.reserved.contains(&o.name))
        {
            return Err(CompileError::DuplicateSymbol {
                node: output.uid.clone(),
                symbol: output.name.clone(),
            });
        }

        let (mut inputs, mut recurrent_inputs): (Vec<_>, Vec<_>) =
            self.inputs.into_iter().partition(|i| i.recurrence.is_none());
        inputs.sort_by(|a, b| a.name.cmp(&b.name));
        recurrent_inputs.sort_by(|a, b| a.name.cmp(&b.name));
        inputs.extend(recurrent_inputs);

        let (mut outputs, mut recurrent_outputs): (Vec<_>, Vec<_>) =
            self.outputs.into_iter().partition(|o| o.feeds.is_none());
        outputs.sort_by(|a, b| a.name.cmp(&b.name));
        recurrent_outputs.sort_by(|a, b| a.name.cmp(&b.name));
        outputs.extend(recurrent_outputs);

        log::info!(
            "lowered {} nodes: {} values, {} inputs, {} outputs, {} statements",
            self.graph.len(),
            self.values.len(),
            inputs.len(),
            outputs.len(),
            self.body.len()
        );

        Ok(EvaluatorPlan {
            namespace: options.namespace.clone(),
            class_name: options.class_name.clone(),
            values: self.values,
            inputs,
            outputs,
            body: self.body,
        })
    }
}

fn dispatch(ctx: &mut CompileContext, id: NodeId, node: &Node) -> CompileResult<()> {
    match &node.kind {
        NodeKind::Parameter | NodeKind::Constant => lower_value(ctx, id, node),
        NodeKind::Input => classify_input(ctx, id, node),
        NodeKind::Output => classify_output(ctx, node),
        NodeKind::Operator { .. } => {
            let op = Op::resolve(node)?;
            log::debug!("lowering {} as {}", node.uid, op.name());
            lower_op(ctx, id, node, &op)
        }
        NodeKind::QuantizeMarker => lower_quantize(ctx, id, node),
    }
}

fn lower_op(ctx: &mut CompileContext, id: NodeId, node: &Node, op: &Op) -> CompileResult<()> {
    expect_arity(node, op)?;
    match op {
        Op::Binary(binary) => lower_binary(ctx, id, node, *binary),
        Op::Unary(unary) => lower_unary(ctx, id, node, *unary),
        Op::Times => lower_times(ctx, id, node),
        Op::Slice { begin, end } => lower_slice(ctx, id, node, *begin, *end),
        Op::Splice => lower_splice(ctx, id, node),
    }
}

fn expect_arity(node: &Node, op: &Op) -> CompileResult<()> {
    let expected = op.arity();
    if node.operands.len() != expected {
        return Err(CompileError::OperatorArity {
            node: node.uid.clone(),
            op: op.name(),
            expected,
            found: node.operands.len(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Element types
// ---------------------------------------------------------------------------

/// Floating type the node was declared with.
fn element_type(node: &Node) -> CompileResult<CType> {
    match node.dtype {
        DType::F32 => Ok(CType::Float),
        DType::F64 => Ok(CType::Double),
        other => Err(CompileError::UnsupportedElementType {
            node: node.uid.clone(),
            dtype: other,
        }),
    }
}

/// Resolved type of the node: the storage width if quantized, the element type otherwise.
fn data_type(node: &Node) -> CompileResult<CType> {
    match node.quantized {
        Some(q) => match q.bits {
            8 => Ok(CType::Int8),
            16 => Ok(CType::Int16),
            bits => Err(CompileError::UnsupportedQuantizationWidth {
                node: node.uid.clone(),
                bits,
            }),
        },
        None => element_type(node),
    }
}

// ---------------------------------------------------------------------------
// Leaves and signature
// ---------------------------------------------------------------------------

fn lower_value(ctx: &mut CompileContext, id: NodeId, node: &Node) -> CompileResult<()> {
    let symbol = names::ident(&node.uid);
    let source = element_type(node)?;
    let elem = data_type(node)?;
    let dims = shape::buffer_dims(node)?;
    let vars = shape::index_vars(node)?;
    let buffer = names::buffer(&symbol);

    ctx.bind(id, node, symbol.clone())?;
    let mut derived = vec![
        buffer.clone(),
        names::storage(&symbol),
        names::getter(&symbol),
        names::setter(&symbol),
    ];
    if node.quantized.is_some() {
        derived.extend([
            names::view_func(&symbol),
            names::step_func(&symbol),
            names::step(&symbol),
        ]);
    }
    for name in derived {
        ctx.reserve(node, name)?;
    }

    ctx.emit(Stmt::BufferView {
        name: buffer.clone(),
        elem,
        storage: names::storage(&symbol),
        dims,
        label: symbol.clone(),
    });

    let storage = match node.quantized {
        None => {
            ctx.emit(Stmt::Func {
                name: symbol.clone(),
                def: FuncDef::Indexed { vars, buffer },
            });
            LeafStorage::Plain
        }
        Some(q) => {
            let view = names::view_func(&symbol);
            let step = names::step_func(&symbol);
            ctx.emit(Stmt::Func {
                name: view.clone(),
                def: FuncDef::Indexed { vars, buffer },
            });
            ctx.emit(Stmt::Func {
                name: step.clone(),
                def: FuncDef::Scalar {
                    member: names::step(&symbol),
                },
            });
            ctx.emit(Stmt::FuncPair {
                name: symbol.clone(),
                members: [view, step],
            });
            LeafStorage::Quantized {
                storage: elem,
                reserved_bits: q.reserved_bits,
            }
        }
    };

    ctx.values.push(LeafValue {
        uid: node.uid.clone(),
        symbol,
        source,
        storage,
    });
    Ok(())
}

fn classify_input(ctx: &mut CompileContext, id: NodeId, node: &Node) -> CompileResult<()> {
    let name = names::ident(node.display_name());
    if ctx.inputs.iter().any(|i| i.name == name) {
        return Err(CompileError::DuplicateName {
            node: node.uid.clone(),
            role: "input",
            name,
        });
    }

    let elem = data_type(node)?;
    let dims = shape::buffer_dims(node)?;
    let recurrence = node
        .recurrence_offset
        .map(|offset| RecurrentSlot { offset, dims });

    ctx.bind(id, node, name.clone())?;
    if recurrence.is_some() {
        ctx.reserve(node, names::history(&name))?;
        ctx.reserve(node, names::history_param(&name))?;
    }
    ctx.inputs.push(InputBinding {
        name,
        uid: node.uid.clone(),
        elem,
        recurrence,
    });
    Ok(())
}

fn classify_output(ctx: &mut CompileContext, node: &Node) -> CompileResult<()> {
    let recurrent = node.recurrence_offset.is_some();
    let (kind, expected) = if recurrent {
        ("recurrent", 2)
    } else {
        ("immediate", 1)
    };
    if node.operands.len() != expected {
        return Err(CompileError::MalformedOutput {
            node: node.uid.clone(),
            kind,
            expected,
            found: node.operands.len(),
        });
    }

    let name = names::ident(node.display_name());
    if ctx.outputs.iter().any(|o| o.name == name) {
        return Err(CompileError::DuplicateName {
            node: node.uid.clone(),
            role: "output",
            name,
        });
    }

    let elem = element_type(node)?;
    shape::buffer_dims(node)?;

    let (_, value) = ctx.operand(node, 0)?;

    let feeds = if recurrent {
        let (target, _) = ctx.operand(node, 1)?;
        if target.kind != NodeKind::Input || target.recurrence_offset.is_none() {
            return Err(CompileError::UnmatchedFeedback {
                node: node.uid.clone(),
                operand: node.operands[1],
            });
        }
        Some(names::ident(target.display_name()))
    } else {
        None
    };

    ctx.outputs.push(OutputBinding {
        name,
        uid: node.uid.clone(),
        value,
        elem,
        feeds,
    });
    Ok(())
}

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

fn define(ctx: &mut CompileContext, id: NodeId, node: &Node, value: Expr) -> CompileResult<String> {
    let symbol = names::ident(&node.uid);
    ctx.emit(Stmt::Func {
        name: symbol.clone(),
        def: FuncDef::Expr(value),
    });
    ctx.bind(id, node, symbol.clone())?;
    Ok(symbol)
}

fn lower_binary(
    ctx: &mut CompileContext,
    id: NodeId,
    node: &Node,
    op: BinaryOp,
) -> CompileResult<()> {
    let (_, lhs) = ctx.operand(node, 0)?;
    let (_, rhs) = ctx.operand(node, 1)?;
    let callee = match op {
        BinaryOp::Plus => Callee::Plus,
        BinaryOp::Minus => Callee::Minus,
        BinaryOp::ElementTimes => Callee::ElementTimes,
    };
    let args = vec![Expr::Ref(lhs), Expr::Ref(rhs)];
    let symbol = define(ctx, id, node, Expr::call(callee, args))?;
    ctx.materialize_shared(id, &symbol);
    Ok(())
}

fn lower_unary(ctx: &mut CompileContext, id: NodeId, node: &Node, op: UnaryOp) -> CompileResult<()> {
    let (_, x) = ctx.operand(node, 0)?;
    let callee = match op {
        UnaryOp::Log => Callee::Log,
        UnaryOp::Tanh => Callee::Tanh,
        UnaryOp::Sigmoid => Callee::Sigmoid(data_type(node)?),
    };
    define(ctx, id, node, Expr::call(callee, vec![Expr::Ref(x)]))?;
    Ok(())
}

fn lower_times(ctx: &mut CompileContext, id: NodeId, node: &Node) -> CompileResult<()> {
    let (vector, x) = ctx.operand(node, 0)?;
    shape::expect_vector(vector, "Times vector operand must have rank 0 or 1")?;
    let (matrix, w) = ctx.operand(node, 1)?;
    let [rows, cols] = shape::matrix_dims(matrix)?;

    let callee = if node.quantized.is_some() {
        Callee::VectorByMatrixTimesQuantized
    } else {
        Callee::VectorByMatrixTimes
    };
    let args = vec![Expr::Ref(x), Expr::Ref(w), Expr::int(rows), Expr::int(cols)];
    let symbol = define(ctx, id, node, Expr::call(callee, args))?;
    ctx.materialize_shared(id, &symbol);
    Ok(())
}

fn lower_slice(
    ctx: &mut CompileContext,
    id: NodeId,
    node: &Node,
    begin: i64,
    end: i64,
) -> CompileResult<()> {
    let (operand, x) = ctx.operand(node, 0)?;
    shape::expect_rank1(operand, "Slice operand must be a vector")?;
    let args = vec![Expr::Ref(x), Expr::Int(begin), Expr::Int(end)];
    define(ctx, id, node, Expr::call(Callee::Slice, args))?;
    Ok(())
}

fn lower_splice(ctx: &mut CompileContext, id: NodeId, node: &Node) -> CompileResult<()> {
    let (first, a) = ctx.operand(node, 0)?;
    let (second, b) = ctx.operand(node, 1)?;
    let a_len = shape::expect_rank1(first, "Splice operands must be vectors")?;
    let b_len = shape::expect_rank1(second, "Splice operands must be vectors")?;
    let args = vec![Expr::Ref(a), Expr::Ref(b), Expr::int(a_len), Expr::int(b_len)];
    define(ctx, id, node, Expr::call(Callee::Splice, args))?;
    Ok(())
}

fn lower_quantize(ctx: &mut CompileContext, id: NodeId, node: &Node) -> CompileResult<()> {
    if node.operands.len() != 1 {
        return Err(CompileError::OperatorArity {
            node: node.uid.clone(),
            op: "Quantize",
            expected: 1,
            found: node.operands.len(),
        });
    }
    let quantization = node.quantized.ok_or_else(|| CompileError::MissingAttribute {
        node: node.uid.clone(),
        op: "Quantize",
        attribute: "quantized",
    })?;
    let (_, x) = ctx.operand(node, 0)?;
    let dims = shape::quantize_dims(node)?;
    let from = element_type(node)?;
    let to = data_type(node)?;

    let mut args = vec![Expr::Ref(x)];
    args.extend(dims.into_iter().map(Expr::int));
    args.push(Expr::Int(i64::from(quantization.reserved_bits)));

    let symbol = names::ident(&node.uid);
    ctx.emit(Stmt::FuncGroup {
        name: symbol.clone(),
        value: Expr::call(Callee::Quantize { from, to }, args),
    });
    ctx.bind(id, node, symbol)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{OpAttributes, Quantization};

    fn options() -> CodegenOptions {
        CodegenOptions::default()
    }

    /// Parameter P (3,4), Input X (3,), Times(X, P) -> Output Y.
    fn times_graph() -> Graph {
        let mut graph = Graph::new();
        let p = graph.add_parameter("P", vec![3, 4]);
        let x = graph.add_input("X", vec![3]);
        let t = graph.add_op("T", "Times", vec![4], vec![x, p]);
        graph.add_output("Y", vec![4], vec![t]);
        graph
    }

    fn calls(plan: &EvaluatorPlan) -> Vec<(String, Callee)> {
        plan.body
            .iter()
            .filter_map(|s| match s {
                Stmt::Func {
                    name,
                    def: FuncDef::Expr(Expr::Call { callee, .. }),
                } => Some((name.clone(), *callee)),
                _ => None,
            })
            .collect()
    }

    fn compute_roots(plan: &EvaluatorPlan) -> Vec<String> {
        plan.body
            .iter()
            .filter_map(|s| match s {
                Stmt::ComputeRoot { func } => Some(func.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn times_scenario() {
        let graph = times_graph();
        let ctx = walk(&graph).unwrap();
        assert_eq!(ctx.symbol_count(), 3);
        assert_eq!(ctx.symbol(3), None);

        let plan = ctx.finish(&options()).unwrap();
        let names: Vec<_> = plan.inputs.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["X"]);

        let call = plan.body.iter().find_map(|s| match s {
            Stmt::Func {
                def: FuncDef::Expr(Expr::Call { callee, args }),
                ..
            } => Some((*callee, args.clone())),
            _ => None,
        });
        assert_eq!(
            call,
            Some((
                Callee::VectorByMatrixTimes,
                vec![
                    Expr::Ref("X".into()),
                    Expr::Ref("P".into()),
                    Expr::Int(3),
                    Expr::Int(4)
                ]
            ))
        );

        assert_eq!(plan.outputs.len(), 1);
        assert_eq!(plan.outputs[0].value, "T");
        assert_eq!(plan.outputs[0].name, "Y");
    }

    #[test]
    fn value_emission_plain() {
        let plan = lower(&times_graph(), &options()).unwrap();
        assert_eq!(
            plan.body[0],
            Stmt::BufferView {
                name: "b_P".into(),
                elem: CType::Float,
                storage: "m_P".into(),
                dims: vec![4, 3],
                label: "P".into(),
            }
        );
        assert_eq!(
            plan.body[1],
            Stmt::Func {
                name: "P".into(),
                def: FuncDef::Indexed {
                    vars: IndexVars::Two,
                    buffer: "b_P".into()
                },
            }
        );
        assert_eq!(plan.values.len(), 1);
        assert_eq!(plan.values[0].storage, LeafStorage::Plain);
    }

    #[test]
    fn value_emission_quantized() {
        let mut graph = Graph::new();
        let c = graph.add_constant("C", vec![5]);
        graph.nodes[c].quantized = Some(Quantization {
            bits: 16,
            reserved_bits: 2,
        });
        let plan = lower(&graph, &options()).unwrap();
        assert!(matches!(
            &plan.body[0],
            Stmt::BufferView { elem: CType::Int16, dims, .. } if dims == &vec![5]
        ));
        assert_eq!(
            plan.body[3],
            Stmt::FuncPair {
                name: "C".into(),
                members: ["f_C".into(), "f_step_C".into()],
            }
        );
        assert_eq!(
            plan.values[0].storage,
            LeafStorage::Quantized {
                storage: CType::Int16,
                reserved_bits: 2
            }
        );
        assert_eq!(plan.values[0].source, CType::Float);
    }

    #[test]
    fn quantization_width_must_be_8_or_16() {
        let mut graph = Graph::new();
        let p = graph.add_parameter("P", vec![2]);
        graph.nodes[p].quantized = Some(Quantization {
            bits: 4,
            reserved_bits: 0,
        });
        let err = lower(&graph, &options()).unwrap_err();
        assert_eq!(
            err,
            CompileError::UnsupportedQuantizationWidth {
                node: "P".into(),
                bits: 4
            }
        );
    }

    #[test]
    fn times_quantized_variant_follows_flag() {
        for quantized in [false, true] {
            let mut graph = times_graph();
            if quantized {
                graph.nodes[2].quantized = Some(Quantization {
                    bits: 8,
                    reserved_bits: 0,
                });
            }
            let plan = lower(&graph, &options()).unwrap();
            let expected = if quantized {
                Callee::VectorByMatrixTimesQuantized
            } else {
                Callee::VectorByMatrixTimes
            };
            assert_eq!(calls(&plan), vec![("T".to_string(), expected)]);
        }
    }

    #[test]
    fn times_rejects_matrix_as_vector_operand() {
        let mut graph = Graph::new();
        let a = graph.add_parameter("A", vec![2, 2]);
        let b = graph.add_parameter("B", vec![2, 2]);
        graph.add_op("T", "Times", vec![2, 2], vec![a, b]);
        let err = lower(&graph, &options()).unwrap_err();
        assert!(
            matches!(err, CompileError::UnsupportedShape { ref node, .. } if node == "A"),
            "got: {err}"
        );
    }

    #[test]
    fn compute_root_iff_shared() {
        let mut graph = Graph::new();
        let a = graph.add_input("a", vec![4]);
        let b = graph.add_input("b", vec![4]);
        let shared = graph.add_op("shared", "Plus", vec![4], vec![a, b]);
        let single = graph.add_op("single", "Minus", vec![4], vec![a, b]);
        let t1 = graph.add_op("t1", "Tanh", vec![4], vec![shared]);
        let t2 = graph.add_op("t2", "ElementTimes", vec![4], vec![shared, single]);
        graph.add_output("o1", vec![4], vec![t1]);
        graph.add_output("o2", vec![4], vec![t2]);

        let plan = lower(&graph, &options()).unwrap();
        assert_eq!(compute_roots(&plan), vec!["shared".to_string()]);

        let pos = plan
            .body
            .iter()
            .position(|s| matches!(s, Stmt::Func { name, .. } if name == "shared"))
            .unwrap();
        assert_eq!(
            plan.body[pos + 1],
            Stmt::ComputeRoot {
                func: "shared".into()
            }
        );
    }

    #[test]
    fn shared_times_is_computed_once() {
        let mut graph = times_graph();
        let t = 2;
        let l = graph.add_op("L", "Log", vec![4], vec![t]);
        graph.add_output("Z", vec![4], vec![l]);

        let plan = lower(&graph, &options()).unwrap();
        assert_eq!(compute_roots(&plan), vec!["T".to_string()]);
        let pos = plan
            .body
            .iter()
            .position(|s| matches!(s, Stmt::Func { name, .. } if name == "T"))
            .unwrap();
        assert_eq!(
            plan.body[pos + 1],
            Stmt::ComputeRoot { func: "T".into() }
        );
    }

    #[test]
    fn single_use_times_not_materialized() {
        let plan = lower(&times_graph(), &options()).unwrap();
        assert!(compute_roots(&plan).is_empty());
    }

    #[test]
    fn repeated_operand_is_one_consumer() {
        let mut graph = Graph::new();
        let x = graph.add_input("x", vec![4]);
        let sq = graph.add_op("sq", "ElementTimes", vec![4], vec![x, x]);
        graph.add_output("y", vec![4], vec![sq]);
        let plan = lower(&graph, &options()).unwrap();
        assert!(compute_roots(&plan).is_empty());
    }

    #[test]
    fn binary_arity_checked() {
        let mut graph = Graph::new();
        let x = graph.add_input("x", vec![4]);
        graph.add_op("p", "Plus", vec![4], vec![x]);
        let err = lower(&graph, &options()).unwrap_err();
        assert_eq!(
            err,
            CompileError::OperatorArity {
                node: "p".into(),
                op: "Plus",
                expected: 2,
                found: 1
            }
        );
    }

    #[test]
    fn sigmoid_uses_resolved_type() {
        let mut graph = Graph::new();
        let x = graph.add_input("x", vec![4]);
        let s = graph.add_op("s", "StableSigmoid", vec![4], vec![x]);
        graph.nodes[s].dtype = DType::F64;
        let plan = lower(&graph, &options()).unwrap();
        assert_eq!(
            calls(&plan),
            vec![("s".to_string(), Callee::Sigmoid(CType::Double))]
        );
    }

    #[test]
    fn unsupported_element_type() {
        let mut graph = Graph::new();
        let x = graph.add_input("x", vec![4]);
        graph.nodes[x].dtype = DType::F16;
        let err = lower(&graph, &options()).unwrap_err();
        assert_eq!(
            err,
            CompileError::UnsupportedElementType {
                node: "x".into(),
                dtype: DType::F16
            }
        );
    }

    fn slice_graph(operand_shape: Vec<usize>, stride: Option<i64>) -> Graph {
        let mut graph = Graph::new();
        let x = graph.add_input("x", operand_shape);
        let s = graph.add_op("s", "Slice", vec![2], vec![x]);
        if let NodeKind::Operator { attributes, .. } = &mut graph.nodes[s].kind {
            *attributes = OpAttributes {
                begin_index: Some(1),
                end_index: Some(3),
                slice_strides: stride,
            };
        }
        graph
    }

    #[test]
    fn slice_emits_bounds() {
        let plan = lower(&slice_graph(vec![6], Some(1)), &options()).unwrap();
        assert!(plan.body.contains(&Stmt::Func {
            name: "s".into(),
            def: FuncDef::Expr(Expr::call(
                Callee::Slice,
                vec![Expr::Ref("x".into()), Expr::Int(1), Expr::Int(3)]
            )),
        }));
    }

    #[test]
    fn slice_rejects_stride() {
        for shape in [vec![6], vec![2, 3]] {
            let err = lower(&slice_graph(shape, Some(2)), &options()).unwrap_err();
            assert_eq!(
                err,
                CompileError::UnsupportedStride {
                    node: "s".into(),
                    stride: 2
                }
            );
        }
    }

    #[test]
    fn slice_rejects_matrix_operand() {
        let err = lower(&slice_graph(vec![2, 3], None), &options()).unwrap_err();
        assert!(matches!(err, CompileError::UnsupportedShape { .. }), "got: {err}");
    }

    #[test]
    fn splice_passes_lengths() {
        let mut graph = Graph::new();
        let a = graph.add_input("a", vec![3]);
        let b = graph.add_input("b", vec![5]);
        graph.add_op("cat", "Splice", vec![8], vec![a, b]);
        let plan = lower(&graph, &options()).unwrap();
        assert_eq!(
            plan.body,
            vec![Stmt::Func {
                name: "cat".into(),
                def: FuncDef::Expr(Expr::call(
                    Callee::Splice,
                    vec![
                        Expr::Ref("a".into()),
                        Expr::Ref("b".into()),
                        Expr::Int(3),
                        Expr::Int(5)
                    ]
                )),
            }]
        );
    }

    #[test]
    fn splice_rejects_scalar() {
        let mut graph = Graph::new();
        let a = graph.add_input("a", vec![]);
        let b = graph.add_input("b", vec![5]);
        graph.add_op("cat", "Splice", vec![6], vec![a, b]);
        let err = lower(&graph, &options()).unwrap_err();
        assert!(
            matches!(err, CompileError::UnsupportedShape { ref node, .. } if node == "a"),
            "got: {err}"
        );
    }

    #[test]
    fn quantize_marker_group() {
        let mut graph = Graph::new();
        let x = graph.add_input("x", vec![2, 3]);
        let mut marker = Node::new("q", NodeKind::QuantizeMarker, vec![2, 3]);
        marker.operands = vec![x];
        marker.quantized = Some(Quantization {
            bits: 8,
            reserved_bits: 1,
        });
        graph.add_node(marker);
        let plan = lower(&graph, &options()).unwrap();
        assert_eq!(
            plan.body,
            vec![Stmt::FuncGroup {
                name: "q".into(),
                value: Expr::call(
                    Callee::Quantize {
                        from: CType::Float,
                        to: CType::Int8
                    },
                    vec![
                        Expr::Ref("x".into()),
                        Expr::Int(2),
                        Expr::Int(3),
                        Expr::Int(1)
                    ]
                ),
            }]
        );
    }

    #[test]
    fn quantize_marker_rank3_rejected() {
        let mut graph = Graph::new();
        let x = graph.add_input("x", vec![4]);
        let mut marker = Node::new("q", NodeKind::QuantizeMarker, vec![2, 2, 1]);
        marker.operands = vec![x];
        marker.quantized = Some(Quantization {
            bits: 8,
            reserved_bits: 0,
        });
        graph.add_node(marker);
        let err = lower(&graph, &options()).unwrap_err();
        assert!(matches!(err, CompileError::UnsupportedShape { .. }), "got: {err}");
    }

    #[test]
    fn quantize_marker_requires_annotation() {
        let mut graph = Graph::new();
        let x = graph.add_input("x", vec![4]);
        let mut marker = Node::new("q", NodeKind::QuantizeMarker, vec![4]);
        marker.operands = vec![x];
        graph.add_node(marker);
        let err = lower(&graph, &options()).unwrap_err();
        assert_eq!(
            err,
            CompileError::MissingAttribute {
                node: "q".into(),
                op: "Quantize",
                attribute: "quantized"
            }
        );
    }

    #[test]
    fn unknown_operator_aborts() {
        let mut graph = Graph::new();
        let x = graph.add_input("x", vec![4]);
        graph.add_op("r", "ReLU", vec![4], vec![x]);
        let err = lower(&graph, &options()).unwrap_err();
        assert_eq!(err.node(), "r");
        assert!(matches!(err, CompileError::UnsupportedOperator { .. }));
    }

    #[test]
    fn operand_before_definition_rejected() {
        let mut graph = Graph::new();
        let t = graph.add_op("t", "Tanh", vec![4], vec![1]);
        graph.add_input("x", vec![4]);
        graph.add_output("y", vec![4], vec![t]);
        let err = lower(&graph, &options()).unwrap_err();
        assert_eq!(
            err,
            CompileError::OperandNotLowered {
                node: "t".into(),
                operand: 1
            }
        );
    }

    #[test]
    fn every_symbol_bound_after_its_operands() {
        let mut graph = Graph::new();
        let x = graph.add_input("x", vec![4]);
        let w = graph.add_parameter("w", vec![4]);
        let p = graph.add_op("p", "Plus", vec![4], vec![x, w]);
        let l = graph.add_op("l", "Log", vec![4], vec![p]);
        let m = graph.add_op("m", "Minus", vec![4], vec![l, p]);
        graph.add_output("y", vec![4], vec![m]);

        let ctx = walk(&graph).unwrap();
        assert_eq!(ctx.symbol_count(), 5);
        for (id, node) in graph.nodes.iter().enumerate() {
            if node.kind == NodeKind::Output {
                continue;
            }
            assert!(ctx.symbol(id).is_some(), "{} has no symbol", node.uid);
            let position = |name: &str| {
                ctx.body.iter().position(|s| match s {
                    Stmt::Func { name: n, .. } => n == name,
                    _ => false,
                })
            };
            if let Some(at) = position(&node.uid) {
                for operand in &node.operands {
                    let operand_symbol = ctx.symbol(*operand).unwrap();
                    if let Some(before) = position(operand_symbol) {
                        assert!(before < at);
                    }
                }
            }
        }
    }

    #[test]
    fn immediate_output_arity() {
        let mut graph = Graph::new();
        let a = graph.add_input("a", vec![4]);
        let b = graph.add_input("b", vec![4]);
        graph.add_output("y", vec![4], vec![a, b]);
        let err = lower(&graph, &options()).unwrap_err();
        assert_eq!(
            err,
            CompileError::MalformedOutput {
                node: "y".into(),
                kind: "immediate",
                expected: 1,
                found: 2
            }
        );
    }

    /// Recurrent pair: input `h` delayed by `offset`, fed by `next = Tanh(x + h)`.
    fn recurrent_graph(offset: usize) -> Graph {
        let mut graph = Graph::new();
        let mut h = Node::new("h", NodeKind::Input, vec![4]);
        h.recurrence_offset = Some(offset);
        let h = graph.add_node(h);
        let x = graph.add_input("x", vec![4]);
        let sum = graph.add_op("sum", "Plus", vec![4], vec![x, h]);
        let next = graph.add_op("next", "Tanh", vec![4], vec![sum]);
        graph.add_output("y", vec![4], vec![next]);
        let mut fb = Node::new("h_next", NodeKind::Output, vec![4]);
        fb.recurrence_offset = Some(offset);
        fb.operands = vec![next, h];
        graph.add_node(fb);
        graph
    }

    #[test]
    fn recurrent_pair_classification() {
        let plan = lower(&recurrent_graph(2), &options()).unwrap();
        assert!(plan.has_recurrence());

        let names: Vec<_> = plan.inputs.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["x", "h"]);
        let (h, slot) = plan.recurrent_inputs().next().unwrap();
        assert_eq!(h.name, "h");
        assert_eq!(slot.len(), 3);

        let outputs: Vec<_> = plan
            .outputs
            .iter()
            .map(|o| (o.name.as_str(), o.feeds.as_deref()))
            .collect();
        assert_eq!(outputs, vec![("y", None), ("h_next", Some("h"))]);
        assert_eq!(plan.outputs[1].value, "next");
    }

    #[test]
    fn recurrent_output_arity() {
        let mut graph = recurrent_graph(1);
        graph.nodes[5].operands.pop();
        let err = lower(&graph, &options()).unwrap_err();
        assert!(
            matches!(err, CompileError::MalformedOutput { kind: "recurrent", found: 1, .. }),
            "got: {err}"
        );
    }

    #[test]
    fn recurrent_output_must_feed_recurrent_input() {
        let mut graph = recurrent_graph(1);
        graph.nodes[5].operands[1] = 1;
        let err = lower(&graph, &options()).unwrap_err();
        assert_eq!(
            err,
            CompileError::UnmatchedFeedback {
                node: "h_next".into(),
                operand: 1
            }
        );
    }

    #[test]
    fn recurrent_input_without_feedback_rejected() {
        let mut graph = recurrent_graph(1);
        graph.nodes.pop();
        let err = lower(&graph, &options()).unwrap_err();
        assert_eq!(
            err,
            CompileError::UnpairedRecurrence {
                node: "h".into(),
                feeders: 0
            }
        );
    }

    #[test]
    fn parameter_order_is_sorted_and_stable() {
        let build = |order: &[&str]| {
            let mut graph = Graph::new();
            for name in order {
                graph.add_input(name, vec![2]);
            }
            let mut past = Node::new("past_a", NodeKind::Input, vec![2]);
            past.recurrence_offset = Some(0);
            let past = graph.add_node(past);
            let mut fb = Node::new("fb", NodeKind::Output, vec![2]);
            fb.recurrence_offset = Some(0);
            fb.operands = vec![0, past];
            graph.add_node(fb);
            graph
        };
        let names = |graph: &Graph| -> Vec<String> {
            lower(graph, &options())
                .unwrap()
                .inputs
                .into_iter()
                .map(|i| i.name)
                .collect()
        };
        let first = names(&build(&["zeta", "alpha", "mid"]));
        let second = names(&build(&["mid", "zeta", "alpha"]));
        assert_eq!(first, vec!["alpha", "mid", "zeta", "past_a"]);
        assert_eq!(first, second);
    }

    #[test]
    fn duplicate_output_names_flagged() {
        let mut graph = Graph::new();
        let x = graph.add_input("x", vec![2]);
        let mut a = Node::new("o1", NodeKind::Output, vec![2]);
        a.name = Some("out".into());
        a.operands = vec![x];
        let mut b = a.clone();
        b.uid = "o2".into();
        graph.add_node(a);
        graph.add_node(b);
        let err = lower(&graph, &options()).unwrap_err();
        assert_eq!(
            err,
            CompileError::DuplicateName {
                node: "o2".into(),
                role: "output",
                name: "out".into()
            }
        );
    }

    #[test]
    fn output_named_like_input_flagged() {
        let mut graph = Graph::new();
        let x = graph.add_input("x", vec![2]);
        let mut y = Node::new("y", NodeKind::Output, vec![2]);
        y.name = Some("x".into());
        y.operands = vec![x];
        graph.add_node(y);
        let err = lower(&graph, &options()).unwrap_err();
        assert!(matches!(err, CompileError::DuplicateName { role: "output", .. }), "got: {err}");
    }

    #[test]
    fn accessor_names_collide_case_insensitively() {
        let mut graph = Graph::new();
        graph.add_parameter("P", vec![2]);
        graph.add_parameter("p", vec![2]);
        let err = lower(&graph, &options()).unwrap_err();
        assert_eq!(
            err,
            CompileError::DuplicateSymbol {
                node: "p".into(),
                symbol: "get_p".into()
            }
        );
    }

    #[test]
    fn derived_names_are_reserved() {
        let quantized = |graph: &mut Graph, uid: &str| {
            let id = graph.add_parameter(uid, vec![2]);
            graph.nodes[id].quantized = Some(Quantization {
                bits: 8,
                reserved_bits: 0,
            });
        };

        let mut graph = Graph::new();
        quantized(&mut graph, "P");
        graph.add_parameter("f_P", vec![2]);
        let err = lower(&graph, &options()).unwrap_err();
        assert_eq!(
            err,
            CompileError::DuplicateSymbol {
                node: "f_P".into(),
                symbol: "f_P".into()
            }
        );

        let mut graph = Graph::new();
        graph.add_parameter("f_P", vec![2]);
        quantized(&mut graph, "P");
        let err = lower(&graph, &options()).unwrap_err();
        assert_eq!(
            err,
            CompileError::DuplicateSymbol {
                node: "P".into(),
                symbol: "f_P".into()
            }
        );
    }

    #[test]
    fn fixed_identifiers_are_reserved() {
        let mut graph = Graph::new();
        let x = graph.add_input("var1", vec![4]);
        graph.add_op("t", "Tanh", vec![4], vec![x]);
        let err = lower(&graph, &options()).unwrap_err();
        assert_eq!(
            err,
            CompileError::DuplicateSymbol {
                node: "var1".into(),
                symbol: "var1".into()
            }
        );

        let mut graph = Graph::new();
        let x = graph.add_input("x", vec![4]);
        let mut out = Node::new("o", NodeKind::Output, vec![4]);
        out.name = Some("timestep".into());
        out.operands = vec![x];
        graph.add_node(out);
        let err = lower(&graph, &options()).unwrap_err();
        assert_eq!(
            err,
            CompileError::DuplicateSymbol {
                node: "o".into(),
                symbol: "timestep".into()
            }
        );
    }

    #[test]
    fn history_members_are_reserved() {
        let mut graph = recurrent_graph(1);
        graph.add_parameter("bufferh", vec![4]);
        let err = lower(&graph, &options()).unwrap_err();
        assert_eq!(
            err,
            CompileError::DuplicateSymbol {
                node: "bufferh".into(),
                symbol: "m_bufferh".into()
            }
        );
    }

    #[test]
    fn uid_collision_after_sanitizing() {
        let mut graph = Graph::new();
        graph.add_parameter("w.0", vec![2]);
        graph.add_parameter("w_0", vec![2]);
        let err = lower(&graph, &options()).unwrap_err();
        assert_eq!(
            err,
            CompileError::DuplicateSymbol {
                node: "w_0".into(),
                symbol: "w_0".into()
            }
        );
    }
}
