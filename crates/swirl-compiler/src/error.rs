// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for compilation and translation.

use std::path::PathBuf;

use swirl_dsl::{ConfigError, ModelError, ParseError};
use thiserror::Error;

/// Errors raised while generating location programs.
#[derive(Debug, Error)]
pub enum CodegenError {
    #[error("choice is unsupported")]
    ChoiceUnsupported,

    #[error("step {step} declares outputs {ports:?} with the same glob {glob}; the artifact would be ambiguous")]
    AmbiguousArtifact {
        step: String,
        glob: String,
        ports: Vec<String>,
    },

    #[error("transferring directories is not implemented (port {port})")]
    DirectoryTransfer { port: String },

    #[error("port {port} has unsupported data type {data_type}")]
    UnsupportedDataType { port: String, data_type: String },

    #[error("step {step} has no processor for output port {port}")]
    MissingProcessor { step: String, port: String },

    #[error("step {0} has no command")]
    MissingCommand(String),

    #[error("location {0} needs a hostname and a port")]
    MissingAddress(String),

    #[error("{0} emitted outside of a location")]
    OutsideLocation(&'static str),

    #[error("unbalanced {0}")]
    Unbalanced(&'static str),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while translating a foreign workflow into SWIRL.
#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("{0} is not a directory")]
    NotADirectory(PathBuf),

    #[error("missing files in {dir}: {missing:?}")]
    IncompleteBundle {
        dir: PathBuf,
        missing: Vec<&'static str>,
    },

    #[error("invalid document {path}: {source}")]
    Document {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Any failure of a compile or translate run.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Codegen(#[from] CodegenError),

    #[error(transparent)]
    Translate(#[from] TranslateError),
}
