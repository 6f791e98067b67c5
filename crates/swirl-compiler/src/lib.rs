// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SWIRL compiler.
//!
//! Compiles a SWIRL trace plus its metadata document into one Rust program per
//! location and a `run.sh` launcher, and translates foreign workflow
//! descriptions back into SWIRL.
//!
//! ```text
//! trace text + metadata ─▶ TraceInterpreter ─▶ Compiler callbacks ─▶ DefaultTarget ─▶ <loc>.rs, run.sh
//! DAX bundle ─▶ DaxTranslator ─▶ DistributedWorkflow ─▶ Serializer ─▶ workflow.swirl, metadata.yml
//! ```

pub mod codegen;
pub mod compiler;
pub mod config;
pub mod error;
pub mod interpreter;
pub mod translator;

use std::path::Path;

use swirl_dsl::{DistributedWorkflow, Metadata, parse_workflow};
use tracing::info;

pub use codegen::{DefaultTarget, TARGETS, for_target};
pub use compiler::{Compiler, Event, RecordingCompiler};
pub use config::CompilerConfig;
pub use error::{CodegenError, CompileError, TranslateError};
pub use interpreter::TraceInterpreter;
pub use translator::{
    DaxTranslator, LANGUAGES, Serialized, Serializer, StepComposition, Translator, for_language,
};

/// Default file names of a serialized workflow.
pub const TRACE_FILE: &str = "workflow.swirl";
pub const METADATA_FILE: &str = "metadata.yml";

/// Parse `trace` and drive `compiler` over it.
pub fn compile(
    trace: &str,
    metadata: &Metadata,
    compiler: &mut dyn Compiler,
) -> Result<DistributedWorkflow, CompileError> {
    let trace = parse_workflow(trace)?;
    TraceInterpreter::new(metadata).compile(&trace, compiler)
}

/// Compile the trace and metadata files with the backend named `target`.
pub fn compile_files(
    trace_path: &Path,
    metadata_path: &Path,
    target: &str,
    config: CompilerConfig,
) -> Result<DistributedWorkflow, CompileError> {
    let mut backend = for_target(target, config)?;
    let metadata = Metadata::from_file(metadata_path)?;
    let trace = std::fs::read_to_string(trace_path).map_err(|source| CodegenError::Io {
        path: trace_path.to_path_buf(),
        source,
    })?;
    let workflow = compile(&trace, &metadata, backend.as_mut())?;
    info!(
        trace = %trace_path.display(),
        locations = workflow.locations.len(),
        steps = workflow.steps.len(),
        "Compiled workflow"
    );
    Ok(workflow)
}

/// Translate the `language` description in `input` and write the trace and
/// metadata into `output_dir`.
pub fn translate_dir(
    language: &str,
    input: &Path,
    output_dir: &Path,
    serializer: &Serializer,
) -> Result<Serialized, CompileError> {
    let translator = for_language(language, input)?;
    let serialized = translator.translate(serializer)?;
    std::fs::create_dir_all(output_dir).map_err(|source| TranslateError::Io {
        path: output_dir.to_path_buf(),
        source,
    })?;
    serialized.write_to(&output_dir.join(TRACE_FILE), &output_dir.join(METADATA_FILE))?;
    info!(
        language,
        input = %input.display(),
        output = %output_dir.display(),
        "Translated workflow"
    );
    Ok(serialized)
}
