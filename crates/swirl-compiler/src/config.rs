// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::path::{Path, PathBuf};

use swirl_dsl::ConfigError;

/// Settings of the default backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerConfig {
    /// Directory receiving the location programs and `run.sh`.
    pub output_dir: PathBuf,
    /// Run the formatter on every generated program.
    pub format: bool,
    /// Formatter executable.
    pub rustfmt: PathBuf,
    /// Directory holding `libswirl_runtime.rlib` and its `deps` directory.
    pub runtime_dir: PathBuf,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            format: true,
            rustfmt: PathBuf::from("rustfmt"),
            runtime_dir: default_runtime_dir(),
        }
    }
}

/// Cargo places the runtime rlib next to the `swirlc` binary when the
/// workspace is built.
fn default_runtime_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("target/release"))
}

impl CompilerConfig {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `SWIRLC_OUTPUT_DIR`: output directory (default: `.`)
    /// - `SWIRLC_FORMAT`: format generated programs (default: true)
    /// - `SWIRLC_RUSTFMT`: formatter executable (default: `rustfmt`)
    /// - `SWIRLC_RUNTIME_DIR`: prebuilt runtime library directory (default:
    ///   the directory of the running executable)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let output_dir = std::env::var_os("SWIRLC_OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.output_dir);

        let format = match std::env::var("SWIRLC_FORMAT") {
            Ok(value) => parse_flag(&value).ok_or_else(|| ConfigError::Invalid {
                key: "SWIRLC_FORMAT",
                message: format!("expected a boolean, found {value:?}"),
            })?,
            Err(_) => defaults.format,
        };

        let rustfmt = std::env::var_os("SWIRLC_RUSTFMT")
            .map(PathBuf::from)
            .unwrap_or(defaults.rustfmt);

        // The launch script may run from another directory.
        let runtime_dir = match std::env::var_os("SWIRLC_RUNTIME_DIR") {
            Some(dir) => {
                let dir = PathBuf::from(dir);
                std::path::absolute(&dir).unwrap_or(dir)
            }
            None => defaults.runtime_dir,
        };

        Ok(Self {
            output_dir,
            format,
            rustfmt,
            runtime_dir,
        })
    }

    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = output_dir.into();
        self
    }

    pub fn with_format(mut self, format: bool) -> Self {
        self.format = format;
        self
    }

    pub fn with_runtime_dir(mut self, runtime_dir: impl Into<PathBuf>) -> Self {
        self.runtime_dir = runtime_dir.into();
        self
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
