// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SWIRL compiler CLI
//!
//! Usage:
//!
//! ```text
//! swirlc compile <trace> <metadata> [--target default] [--outdir <dir>] [--no-format]
//!                [--runtime-dir <dir>]
//! swirlc translate --language dax <dir> [--outdir <dir>] [--sequential-steps]
//! swirlc events <trace> <metadata>
//! swirlc version
//! ```
//!
//! Example:
//!
//! ```text
//! swirlc compile workflow.swirl metadata.yml --outdir build && ./build/run.sh
//! ```

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use swirl_compiler::{
    CompilerConfig, RecordingCompiler, Serializer, StepComposition, TARGETS, compile,
    compile_files, translate_dir,
};
use swirl_dsl::{Metadata, SUPPORTED_VERSIONS};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "swirlc", about = "SWIRL trace compiler", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate one program per location and a launch script.
    Compile {
        /// Trace file.
        trace: PathBuf,
        /// Metadata document.
        metadata: PathBuf,
        /// Backend target.
        #[arg(long, default_value = "default", env = "SWIRLC_TARGET")]
        target: String,
        /// Output directory; overrides SWIRLC_OUTPUT_DIR.
        #[arg(long)]
        outdir: Option<PathBuf>,
        /// Skip rustfmt on the generated programs.
        #[arg(long)]
        no_format: bool,
        /// Directory holding libswirl_runtime.rlib; overrides SWIRLC_RUNTIME_DIR.
        #[arg(long)]
        runtime_dir: Option<PathBuf>,
    },
    /// Translate a foreign workflow description into a trace and metadata.
    Translate {
        /// Source language.
        #[arg(long, default_value = "dax")]
        language: String,
        /// Directory holding the description.
        input: PathBuf,
        /// Output directory.
        #[arg(long, default_value = ".")]
        outdir: PathBuf,
        /// Compose the steps of one location sequentially instead of in parallel.
        #[arg(long)]
        sequential_steps: bool,
    },
    /// Print the interpreter callbacks of a trace as JSON.
    Events {
        trace: PathBuf,
        metadata: PathBuf,
    },
    /// Print version information.
    Version,
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Compile {
            trace,
            metadata,
            target,
            outdir,
            no_format,
            runtime_dir,
        } => {
            let mut config = CompilerConfig::from_env().context("invalid configuration")?;
            if let Some(outdir) = outdir {
                config = config.with_output_dir(outdir);
            }
            if no_format {
                config = config.with_format(false);
            }
            if let Some(runtime_dir) = runtime_dir {
                let runtime_dir = std::path::absolute(&runtime_dir).unwrap_or(runtime_dir);
                config = config.with_runtime_dir(runtime_dir);
            }
            let output_dir = config.output_dir.clone();
            compile_files(&trace, &metadata, &target, config)
                .with_context(|| format!("failed to compile {}", trace.display()))?;
            info!(output = %output_dir.display(), "Compilation finished");
        }
        Command::Translate {
            language,
            input,
            outdir,
            sequential_steps,
        } => {
            let composition = if sequential_steps {
                StepComposition::Sequential
            } else {
                StepComposition::Parallel
            };
            translate_dir(&language, &input, &outdir, &Serializer::new(composition))
                .with_context(|| format!("failed to translate {}", input.display()))?;
        }
        Command::Events { trace, metadata } => {
            let metadata = Metadata::from_file(&metadata)?;
            let source = std::fs::read_to_string(&trace)
                .with_context(|| format!("failed to read {}", trace.display()))?;
            let mut recorder = RecordingCompiler::new();
            compile(&source, &metadata, &mut recorder)?;
            serde_json::to_writer_pretty(io::stdout().lock(), &recorder.events)?;
            println!();
        }
        Command::Version => {
            println!("swirlc {}", env!("CARGO_PKG_VERSION"));
            println!("metadata versions: {}", SUPPORTED_VERSIONS.join(", "));
            println!("targets: {}", TARGETS.join(", "));
            println!("languages: {}", swirl_compiler::LANGUAGES.join(", "));
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(io::stderr)
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("swirlc: {err:#}");
            ExitCode::FAILURE
        }
    }
}
