//! Command-line front end.
//!
//! Usage:
//!   halide-codegen compile graph.json -o out/ --class LstmEvaluator --namespace nets

use std::fs;
use std::io::BufWriter;
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};

use halide_codegen::codegen::{generate_code, CodegenOptions};
use halide_codegen::ir::Graph;
use halide_codegen::weights::WeightStore;

const COMPILE_USAGE: &str =
    "Usage: halide-codegen compile <graph.json> [-o <dir>] [--class <name>] [--namespace <name>]";

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    match args.first().map(|s| s.as_str()) {
        Some("compile") => cmd_compile(&args[1..]),
        Some("--help") | Some("-h") | None => print_usage(),
        Some(other) => {
            eprintln!("error: unknown subcommand '{other}'");
            eprintln!();
            print_usage();
            process::exit(1);
        }
    }
}

fn print_usage() {
    eprintln!("halide-codegen: model graph to Halide evaluator compiler");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  halide-codegen compile <graph.json> [-o <dir>] [--class <name>] [--namespace <name>]");
    eprintln!();
    eprintln!("Subcommands:");
    eprintln!("  compile   Generate an evaluator header and its weight file");
}

// ---------------------------------------------------------------------------
// compile
// ---------------------------------------------------------------------------

struct CompileArgs {
    graph_path: PathBuf,
    out_dir: PathBuf,
    options: CodegenOptions,
}

fn usage_error(message: &str) -> ! {
    if !message.is_empty() {
        eprintln!("{message}");
    }
    eprintln!("{COMPILE_USAGE}");
    process::exit(1);
}

fn parse_compile_args(args: &[String]) -> CompileArgs {
    let mut graph_path: Option<PathBuf> = None;
    let mut out_dir = PathBuf::from(".");
    let mut options = CodegenOptions::default();

    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        let mut value = || {
            i += 1;
            args.get(i)
                .cloned()
                .unwrap_or_else(|| usage_error(&format!("Missing value for {flag}")))
        };
        match flag {
            "--out" | "-o" => out_dir = PathBuf::from(value()),
            "--class" => options.class_name = value(),
            "--namespace" => options.namespace = value(),
            "--help" | "-h" => {
                eprintln!("{COMPILE_USAGE}");
                eprintln!();
                eprintln!("Compile a graph description into a Halide C++ evaluator class.");
                eprintln!();
                eprintln!("Options:");
                eprintln!("  -o, --out <DIR>         Output directory (default: current directory)");
                eprintln!("      --class <NAME>      Generated class name (default: Evaluator)");
                eprintln!("      --namespace <NAME>  Enclosing namespace (default: dnn)");
                process::exit(0);
            }
            _ => {
                if graph_path.is_none() {
                    graph_path = Some(PathBuf::from(flag));
                } else {
                    usage_error(&format!("Unexpected argument: {flag}"));
                }
            }
        }
        i += 1;
    }

    let graph_path = graph_path.unwrap_or_else(|| usage_error(""));
    CompileArgs {
        graph_path,
        out_dir,
        options,
    }
}

fn cmd_compile(args: &[String]) {
    let args = parse_compile_args(args);
    if let Err(err) = compile(&args) {
        eprintln!("Error: {err:#}");
        process::exit(1);
    }
}

fn compile(args: &CompileArgs) -> Result<()> {
    let text = fs::read_to_string(&args.graph_path)
        .with_context(|| format!("reading {}", args.graph_path.display()))?;
    let graph: Graph = serde_json::from_str(&text)
        .with_context(|| format!("parsing {}", args.graph_path.display()))?;
    log::info!(
        "loaded {} nodes from {}",
        graph.len(),
        args.graph_path.display()
    );

    let generated = generate_code(&graph, &args.options).context("lowering graph")?;
    let store = WeightStore::from_graph(&graph).context("extracting weights")?;

    fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("creating {}", args.out_dir.display()))?;

    let header_path = args.out_dir.join(generated.header_name());
    fs::write(&header_path, &generated.source)
        .with_context(|| format!("writing {}", header_path.display()))?;

    if store.is_empty() {
        eprintln!("Generated {}", header_path.display());
        return Ok(());
    }

    let weights_path = args.out_dir.join("weights.json");
    let file = fs::File::create(&weights_path)
        .with_context(|| format!("creating {}", weights_path.display()))?;
    store
        .write_json(BufWriter::new(file))
        .with_context(|| format!("writing {}", weights_path.display()))?;

    eprintln!(
        "Generated {} and {}",
        header_path.display(),
        weights_path.display()
    );
    Ok(())
}
