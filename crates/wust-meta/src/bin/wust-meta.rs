use std::io::Read;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, FmtSubscriber, filter::Directive};
use wust_meta::{Engine, FuncIdx, resolve_module};

#[derive(Parser)]
#[command(name = "wust-meta", about = "WebAssembly control-flow marker inspector")]
struct Cli {
    /// Default log filter, overridden by RUST_LOG.
    #[arg(long, global = true, default_value = "warn")]
    log_level: Directive,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve every function and print its marker listing.
    Inspect {
        /// Path to a .wat or .wasm file. Reads from stdin if omitted.
        file: Option<String>,
        /// Only print the function with this index.
        #[arg(long)]
        func: Option<u32>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(cli.log_level)
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Command::Inspect { file, func } => inspect(file, func.map(FuncIdx)),
    }
}

fn inspect(file: Option<String>, only: Option<FuncIdx>) -> anyhow::Result<()> {
    let input = read_input(file)?;
    // `wat::parse_bytes` passes binary modules through untouched.
    let wasm_bytes = wat::parse_bytes(&input)?;
    let engine = Engine::default();

    for func in resolve_module(&engine, &wasm_bytes)? {
        if only.is_some_and(|idx| idx != func.func_idx) {
            continue;
        }
        println!(";;; func {}", func.func_idx.0);
        print!("{}", func.stream);
        println!();
    }
    Ok(())
}

fn read_input(file: Option<String>) -> anyhow::Result<Vec<u8>> {
    match file {
        Some(path) => Ok(std::fs::read(&path)?),
        None => {
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf)?;
            Ok(buf)
        }
    }
}
