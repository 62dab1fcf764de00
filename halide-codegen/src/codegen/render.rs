//! Renders an `EvaluatorPlan` as a Halide/C++ header.
//!
//! This is the only codegen file that knows target syntax.

use super::names;
use super::plan::*;
use super::scaffold::{escape_c_string, push_block, push_line, CppClass, CppNamespace};

/// Printer for a target language.
pub trait Backend {
    fn render(&self, plan: &EvaluatorPlan) -> String;
}

/// C++ header against the Halide DNN helper library.
#[derive(Debug, Clone, Copy, Default)]
pub struct HalideCpp;

impl Backend for HalideCpp {
    fn render(&self, plan: &EvaluatorPlan) -> String {
        let mut class = CppClass::new(&plan.class_name);

        for value in &plan.values {
            for accessor in render_accessors(value) {
                class.add_public(accessor);
            }
            for member in render_value_storage(value) {
                class.add_private(member);
            }
        }

        class.add_public(render_pipeline_builder(plan));
        class.add_public(render_loader(plan));
        class.add_public(render_evaluate(plan));

        for (input, slot) in plan.recurrent_inputs() {
            let elem = ctype(input.elem);
            class.add_private(format!(
                "std::vector<Halide::Buffer<{elem}>> {};",
                names::history(&input.name)
            ));
            class.add_private(format!(
                "Halide::ImageParam {} {{ Halide::type_of<{elem}>(), {} }};",
                names::history_param(&input.name),
                slot.dims.len()
            ));
            log::debug!("history buffer {} holds {} slots", input.name, slot.len());
        }
        class.add_private("Halide::Pipeline m_graph;".to_string());
        class.add_private("bool m_graphInitialized {false};".to_string());
        class.add_private(READ_VALUES.to_string());

        let mut namespace = CppNamespace::new(&plan.namespace);
        namespace.add_member(class.to_string());

        let mut out = String::from(HEADER);
        out.push('\n');
        out.push_str(&namespace.to_string());
        out
    }
}

const HEADER: &str = "\
#pragma once
#include <string>
#include <vector>
#include \"HalideDNNLib.h\"
#include <boost/property_tree/ptree.hpp>
#include <boost/property_tree/json_parser.hpp>
";

const READ_VALUES: &str = r#"
template <typename T>
static std::vector<T> ReadValues(const boost::property_tree::ptree& root, const std::string& name)
{
    std::vector<T> result;
    for (auto& v : root.get_child(boost::property_tree::ptree::path_type(name, '\0')))
        result.push_back(v.second.get_value<T>());
    return result;
}
"#;

// ---------------------------------------------------------------------------
// Types and expressions
// ---------------------------------------------------------------------------

fn ctype(ty: CType) -> &'static str {
    match ty {
        CType::Float => "float",
        CType::Double => "double",
        CType::Int8 => "char",
        CType::Int16 => "short",
    }
}

fn callee_name(callee: Callee) -> String {
    match callee {
        Callee::Plus => "Plus".into(),
        Callee::Minus => "Minus".into(),
        Callee::ElementTimes => "ElementTimes".into(),
        Callee::Log => "Log".into(),
        Callee::Tanh => "Tanh".into(),
        Callee::Sigmoid(ty) => format!("Sigmoid<{}>", ctype(ty)),
        Callee::VectorByMatrixTimes => "VectorByMatrixTimes".into(),
        Callee::VectorByMatrixTimesQuantized => "VectorByMatrixTimesQuantized".into(),
        Callee::Slice => "Slice".into(),
        Callee::Splice => "Splice".into(),
        Callee::Quantize { from, to } => format!("Quantize<{}, {}>", ctype(from), ctype(to)),
    }
}

fn render_expr(expr: &Expr) -> String {
    match expr {
        Expr::Ref(name) => name.clone(),
        Expr::Int(value) => value.to_string(),
        Expr::Call { callee, args } => {
            let args: Vec<String> = args.iter().map(render_expr).collect();
            format!("{}({})", callee_name(*callee), args.join(", "))
        }
    }
}

fn index_vars(vars: IndexVars) -> &'static str {
    match vars {
        IndexVars::One => "var1",
        IndexVars::Two => "var1, var2",
    }
}

fn join_dims(dims: &[usize]) -> String {
    dims.iter()
        .map(usize::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_stmt(stmt: &Stmt) -> String {
    match stmt {
        Stmt::BufferView {
            name,
            elem,
            storage,
            dims,
            label,
        } => format!(
            "auto {name} = Halide::Buffer<{}>({storage}.data(), {}, \"{}\");",
            ctype(*elem),
            join_dims(dims),
            escape_c_string(label)
        ),
        Stmt::Func { name, def } => {
            let definition = match def {
                FuncDef::Indexed { vars, buffer } => {
                    let vars = index_vars(*vars);
                    format!("{name}({vars}) = {buffer}({vars});")
                }
                FuncDef::Scalar { member } => format!("{name}() = {member};"),
                FuncDef::Expr(expr) => format!("{name} = {};", render_expr(expr)),
            };
            format!("Halide::Func {name}(\"{name}\"); {definition}")
        }
        Stmt::FuncPair { name, members } => format!(
            "std::vector<Halide::Func> {name} {{ {} }};",
            members.join(", ")
        ),
        Stmt::FuncGroup { name, value } => format!(
            "std::vector<Halide::Func> {name}; {name} = {};",
            render_expr(value)
        ),
        Stmt::ComputeRoot { func } => format!("{func}.compute_root();"),
    }
}

// ---------------------------------------------------------------------------
// Leaf values
// ---------------------------------------------------------------------------

fn render_accessors(value: &LeafValue) -> Vec<String> {
    let symbol = &value.symbol;
    let storage = names::storage(symbol);
    let source = ctype(value.source);
    let stored = ctype(value.storage_type());
    let getter = format!(
        "const std::vector<{stored}>& {}() const {{ return {storage}; }}",
        names::getter(symbol)
    );
    let setter = match value.storage {
        LeafStorage::Plain => format!(
            "void {}(std::vector<{source}>&& v) {{ {storage} = std::move(v); }}",
            names::setter(symbol)
        ),
        LeafStorage::Quantized { reserved_bits, .. } => format!(
            "void {}(std::vector<{source}>&& v) {{ auto r = Quantize<{source}, {stored}>(v, {reserved_bits}); {storage} = r.first; {} = r.second; }}",
            names::setter(symbol),
            names::step(symbol)
        ),
    };
    vec![getter, setter]
}

fn render_value_storage(value: &LeafValue) -> Vec<String> {
    let symbol = &value.symbol;
    let mut members = vec![format!(
        "std::vector<{}> {};",
        ctype(value.storage_type()),
        names::storage(symbol)
    )];
    if let LeafStorage::Quantized { .. } = value.storage {
        members.push(format!("{} {};", ctype(value.source), names::step(symbol)));
    }
    members
}

// ---------------------------------------------------------------------------
// Pipeline construction
// ---------------------------------------------------------------------------

fn render_pipeline_builder(plan: &EvaluatorPlan) -> String {
    let params: Vec<String> = plan
        .inputs
        .iter()
        .map(|i| format!("const Halide::ImageParam& {}", i.name))
        .collect();
    let outputs: Vec<String> = plan
        .outputs
        .iter()
        .map(|o| format!("{} /*{}*/", o.value, o.name))
        .collect();

    let mut out = String::new();
    push_line(
        &mut out,
        0,
        &format!("Halide::Pipeline create_eval_graph({})", params.join(", ")),
    );
    push_line(&mut out, 0, "{");
    push_line(&mut out, 1, "Halide::Var var1, var2;");
    for stmt in &plan.body {
        push_line(&mut out, 1, &render_stmt(stmt));
    }
    push_line(
        &mut out,
        1,
        &format!("return Halide::Pipeline({{ {} }});", outputs.join(", ")),
    );
    push_line(&mut out, 0, "}");
    out
}

// ---------------------------------------------------------------------------
// Evaluation entry point
// ---------------------------------------------------------------------------

fn render_evaluate(plan: &EvaluatorPlan) -> String {
    let mut params = Vec::new();
    if plan.has_recurrence() {
        params.push("int timestep".to_string());
    }
    params.extend(
        plan.immediate_inputs()
            .map(|i| format!("const Halide::ImageParam& {}", i.name)),
    );
    params.extend(
        plan.immediate_outputs()
            .map(|o| format!("Halide::Buffer<{}>& {}", ctype(o.elem), o.name)),
    );

    let build_args: Vec<String> = plan
        .inputs
        .iter()
        .map(|i| match i.recurrence {
            Some(_) => names::history_param(&i.name),
            None => i.name.clone(),
        })
        .collect();

    let realize_args: Vec<String> = plan
        .outputs
        .iter()
        .map(|o| match &o.feeds {
            None => o.name.clone(),
            Some(target) => {
                let len = plan
                    .input(target)
                    .and_then(|i| i.recurrence.as_ref())
                    .map(RecurrentSlot::len)
                    .unwrap_or(1);
                format!("{}[timestep % {len}]", names::history(target))
            }
        })
        .collect();

    let mut out = String::new();
    push_line(&mut out, 0, &format!("void Evaluate({})", params.join(", ")));
    push_line(&mut out, 0, "{");
    push_block(
        &mut out,
        1,
        &format!(
            r#"
            if (!m_graphInitialized)
            {{
                m_graph = create_eval_graph({});
                m_graphInitialized = true;
            }}
            "#,
            build_args.join(", ")
        ),
    );
    for (input, slot) in plan.recurrent_inputs() {
        let offset = slot.offset;
        let len = slot.len();
        push_line(
            &mut out,
            1,
            &format!(
                "{}.set({}[((timestep - {offset}) % {len} + {len}) % {len}]);",
                names::history_param(&input.name),
                names::history(&input.name)
            ),
        );
    }
    push_line(
        &mut out,
        1,
        &format!("m_graph.realize({{ {} }});", realize_args.join(", ")),
    );
    push_line(&mut out, 0, "}");
    out
}

// ---------------------------------------------------------------------------
// Weight loading
// ---------------------------------------------------------------------------

fn render_loader(plan: &EvaluatorPlan) -> String {
    let mut out = String::new();
    push_block(
        &mut out,
        0,
        r#"
        void init(const std::string& weightFilePath)
        {
            boost::property_tree::ptree root;
            boost::property_tree::read_json(weightFilePath, root);
        "#,
    );
    for value in &plan.values {
        push_line(
            &mut out,
            1,
            &format!(
                "{}(ReadValues<{}>(root, \"{}\"));",
                names::setter(&value.symbol),
                ctype(value.source),
                escape_c_string(&value.uid)
            ),
        );
    }
    for (input, slot) in plan.recurrent_inputs() {
        let history = names::history(&input.name);
        push_block(
            &mut out,
            1,
            &format!(
                r#"
                {history}.resize({});
                for (auto& slot : {history})
                    slot = Halide::Buffer<{}>({});
                "#,
                slot.len(),
                ctype(input.elem),
                join_dims(&slot.dims)
            ),
        );
    }
    push_line(&mut out, 0, "}");
    out
}
