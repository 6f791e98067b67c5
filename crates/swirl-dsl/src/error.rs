// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types shared by the SWIRL toolchain.

use std::path::PathBuf;

use thiserror::Error;

/// Trace text that does not match the grammar.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid trace: {0}")]
    Syntax(String),

    #[error("malformed {rule} in trace")]
    Malformed { rule: &'static str },
}

/// Configuration problems, reported before any generation starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("version {found} is not supported; the `version` clause should be one of {supported:?}")]
    UnsupportedVersion {
        found: String,
        supported: &'static [&'static str],
    },

    #[error("target {0} is not supported")]
    UnsupportedTarget(String),

    #[error("language {0} is not supported")]
    UnsupportedLanguage(String),

    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },

    #[error("invalid metadata document: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Structural errors raised while building or querying a workflow model.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("location {0} is not defined")]
    UnknownLocation(String),

    #[error("step {0} is not defined")]
    UnknownStep(String),

    #[error("port {0} is not defined")]
    UnknownPort(String),

    #[error("data {0} is not defined")]
    UnknownData(String),

    #[error("step {step} declares valueFrom {port}, which is not one of its input ports")]
    InvalidValueFrom { step: String, port: String },

    #[error("cannot determine the type of port {port} received from {src}")]
    UnresolvedPortType { port: String, src: String },

    #[error("location {location} uses unsupported connection type {connection_type}")]
    UnsupportedConnectionType {
        location: String,
        connection_type: String,
    },
}
