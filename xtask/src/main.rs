//! Build automation tasks for FRAMELINK
//!
//! Run with: cargo xtask <command>

use clap::{Parser, Subcommand};
use std::process::Command;

const CLIPPY_ARGS: &[&str] = &["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"];

const FUZZ_TARGETS: &[&str] = &["fuzz_frame_parser", "fuzz_chunk_header", "fuzz_reassembly"];

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "FRAMELINK build automation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all tests
    Test,

    /// Run clippy lints
    Lint,

    /// Check formatting
    Fmt,

    /// Run all CI checks
    Ci,

    /// Run the codec and reassembly benchmarks
    Bench,

    /// Run fuzz targets (requires cargo-fuzz and a nightly toolchain)
    Fuzz {
        /// Single target to run; all targets when omitted
        target: Option<String>,

        /// Seconds to spend on each target
        #[arg(long, default_value_t = 60)]
        seconds: u64,
    },

    /// Generate documentation
    Doc,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Test => {
            run_command("cargo", &["test", "--workspace"])?;
        }
        Commands::Lint => {
            run_command("cargo", CLIPPY_ARGS)?;
        }
        Commands::Fmt => {
            run_command("cargo", &["fmt", "--all", "--check"])?;
        }
        Commands::Ci => {
            println!("Running CI checks...");
            run_command("cargo", &["fmt", "--all", "--check"])?;
            run_command("cargo", CLIPPY_ARGS)?;
            run_command("cargo", &["test", "--workspace"])?;
            println!("All CI checks passed!");
        }
        Commands::Bench => {
            run_command("cargo", &["bench", "-p", "framelink-core"])?;
        }
        Commands::Fuzz { target, seconds } => {
            let targets: Vec<&str> = match &target {
                Some(name) => {
                    if !FUZZ_TARGETS.contains(&name.as_str()) {
                        anyhow::bail!("Unknown fuzz target {name} (see {FUZZ_TARGETS:?})");
                    }
                    vec![name.as_str()]
                }
                None => FUZZ_TARGETS.to_vec(),
            };
            let max_time = format!("-max_total_time={seconds}");
            for name in targets {
                println!("Fuzzing {name} for {seconds}s...");
                run_command("cargo", &["+nightly", "fuzz", "run", name, "--", &max_time])?;
            }
        }
        Commands::Doc => {
            run_command("cargo", &["doc", "--workspace", "--no-deps", "--open"])?;
        }
    }

    Ok(())
}

fn run_command(program: &str, args: &[&str]) -> anyhow::Result<()> {
    let status = Command::new(program).args(args).status()?;

    if !status.success() {
        anyhow::bail!("{} {:?} failed", program, args);
    }

    Ok(())
}
