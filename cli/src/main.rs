use anyhow::Context;
use clap::{Parser, Subcommand};
use std::{fs, path::PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tlvgen::{build::compile_to_dir, dump_to_json};
use tlvgen_compiler::{compile_schema, schema_to_json, Target};

#[derive(Parser)]
#[command(name = "tlvgen", version)]
#[command(about = "Generate TLV marshalling code from .rpc schemas", long_about = None)]
struct Cli {
    /// Raise log verbosity (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate code from a `.rpc` schema
    Gen {
        /// Input `.rpc` schema file
        input: PathBuf,

        /// Output language: `c` (header + implementation) or `rust`
        #[arg(short, long, default_value = "c", value_parser = clap::value_parser!(Target))]
        target: Target,

        /// Directory for the generated files (defaults to the input's directory)
        #[arg(short, long)]
        out_dir: Option<PathBuf>,
    },

    /// Print the verified schema as JSON
    Ir {
        /// Input `.rpc` schema file
        input: PathBuf,
    },

    /// Print the top-level records of a marshalled file as JSON
    Dump {
        /// File holding marshalled records
        input: PathBuf,
    },
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    run(&cli)
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Gen { input, target, out_dir } => {
            let out_dir = match out_dir {
                Some(dir) => dir.clone(),
                None => input.parent().map(PathBuf::from).unwrap_or_default(),
            };
            let (declarations, implementation) = compile_to_dir(input, &out_dir, *target)
                .with_context(|| format!("failed to compile {}", input.display()))?;
            info!("Generated {} and {}", declarations.display(), implementation.display());
            Ok(())
        }

        Commands::Ir { input } => {
            let text = fs::read_to_string(input).with_context(|| format!("failed to read {}", input.display()))?;
            let schema = compile_schema(&text).with_context(|| format!("failed to compile {}", input.display()))?;
            println!("{}", schema_to_json(&schema)?);
            Ok(())
        }

        Commands::Dump { input } => {
            let data = fs::read(input).with_context(|| format!("failed to read {}", input.display()))?;
            let json = dump_to_json(&data).with_context(|| format!("failed to decode {}", input.display()))?;
            println!("{}", json);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_gen() {
        let cli = Cli::try_parse_from(["tlvgen", "-vv", "gen", "msg.rpc", "--target", "rust", "--out-dir", "out"]).unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Gen { input, target, out_dir } => {
                assert_eq!(input, PathBuf::from("msg.rpc"));
                assert_eq!(target, Target::Rust);
                assert_eq!(out_dir, Some(PathBuf::from("out")));
            }
            _ => panic!("expected gen"),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_target() {
        assert!(Cli::try_parse_from(["tlvgen", "gen", "msg.rpc", "--target", "go"]).is_err());
    }

    #[test]
    fn test_gen_defaults_to_input_directory() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("msg.rpc");
        fs::write(&input, "struct msg { int id = 1; }\n").unwrap();

        let cli = Cli::try_parse_from(["tlvgen", "gen", input.to_str().unwrap()]).unwrap();
        run(&cli).unwrap();
        assert!(dir.path().join("msg.gen.h").exists());
        assert!(dir.path().join("msg.gen.c").exists());
    }

    #[test]
    fn test_gen_reports_schema_errors() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("bad.rpc");
        fs::write(&input, "struct bad { int id = 1; int other = 1; }\n").unwrap();

        let cli = Cli::try_parse_from(["tlvgen", "gen", input.to_str().unwrap()]).unwrap();
        let err = run(&cli).unwrap_err();
        assert!(err.to_string().starts_with("failed to compile"));
        assert!(!dir.path().join("bad.gen.h").exists());
    }
}
