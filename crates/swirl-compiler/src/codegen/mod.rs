// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Code generation for the default target.
//!
//! [`DefaultTarget`] implements [`Compiler`]: for every location it writes one
//! Rust program (`<location>.rs`) built from `quote!` token streams calling
//! into the `swirl_runtime` library, and at the end of the workflow one
//! `run.sh` launch script that links the programs against the prebuilt rlib. A location program is written only once its whole
//! trace has been generated, so a failure leaves no file for that location.

pub mod context;
pub mod program;
pub mod script;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use swirl_dsl::{
    Connection, ConfigError, Data, DataPair, DataType, DistributedWorkflow, Location, Operator,
    Step,
};
use tracing::{debug, info, warn};

use crate::compiler::Compiler;
use crate::config::CompilerConfig;
use crate::error::CodegenError;
use context::LocationGen;
use program::Address;

/// Names accepted by [`for_target`].
pub const TARGETS: &[&str] = &["default"];

/// Backend registered under `name`.
pub fn for_target(name: &str, config: CompilerConfig) -> Result<Box<dyn Compiler>, ConfigError> {
    match name {
        "default" => Ok(Box::new(DefaultTarget::new(config))),
        other => Err(ConfigError::UnsupportedTarget(other.to_string())),
    }
}

/// Rust programs plus a POSIX launch script.
pub struct DefaultTarget {
    config: CompilerConfig,
    locations: BTreeMap<String, Location>,
    current: Option<LocationGen>,
    /// Locations with a written program, in trace order.
    programs: Vec<String>,
}

impl DefaultTarget {
    pub fn new(config: CompilerConfig) -> Self {
        Self {
            config,
            locations: BTreeMap::new(),
            current: None,
            programs: Vec::new(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.config.output_dir
    }

    fn generator(&mut self, callback: &'static str) -> Result<&mut LocationGen, CodegenError> {
        self.current
            .as_mut()
            .ok_or(CodegenError::OutsideLocation(callback))
    }

    fn address(&self, name: &str) -> Result<Address, CodegenError> {
        let location = self
            .locations
            .get(name)
            .ok_or_else(|| swirl_dsl::ModelError::UnknownLocation(name.to_string()))?;
        Address::of(location)
    }

    fn write(&self, path: &Path, contents: &str) -> Result<(), CodegenError> {
        fs::write(path, contents).map_err(|source| CodegenError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Best effort; the program stays valid when formatting is unavailable.
    fn format(&self, path: &Path) {
        if !self.config.format {
            return;
        }
        match Command::new(&self.config.rustfmt)
            .args(["--edition", "2021"])
            .arg(path)
            .output()
        {
            Ok(output) if output.status.success() => {
                debug!(path = %path.display(), "Formatted location program");
            }
            Ok(output) => {
                warn!(
                    path = %path.display(),
                    status = ?output.status.code(),
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "Formatter failed, keeping unformatted program"
                );
            }
            Err(err) => {
                warn!(
                    rustfmt = %self.config.rustfmt.display(),
                    error = %err,
                    "Formatter unavailable, keeping unformatted program"
                );
            }
        }
    }

    fn program_path(&self, location: &str) -> PathBuf {
        self.config.output_dir.join(format!("{location}.rs"))
    }
}

impl Compiler for DefaultTarget {
    fn begin_workflow(&mut self, workflow: &DistributedWorkflow) -> Result<(), CodegenError> {
        self.locations = workflow.locations.clone();
        self.programs.clear();
        fs::create_dir_all(&self.config.output_dir).map_err(|source| CodegenError::Io {
            path: self.config.output_dir.clone(),
            source,
        })
    }

    fn end_workflow(&mut self) -> Result<(), CodegenError> {
        let locations = self
            .programs
            .iter()
            .filter_map(|name| self.locations.get(name))
            .collect::<Vec<_>>();
        let runtime_dir = &self.config.runtime_dir;
        if !runtime_dir.join(script::RUNTIME_RLIB).is_file() {
            warn!(
                runtime_dir = %runtime_dir.display(),
                "Runtime library not found, run.sh needs SWIRL_RUNTIME_DIR"
            );
        }
        let script = script::emit_script(&locations, runtime_dir)?;
        let path = self.config.output_dir.join(script::SCRIPT_NAME);
        self.write(&path, &script)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o750)).map_err(|source| {
                CodegenError::Io {
                    path: path.clone(),
                    source,
                }
            })?;
        }

        info!(
            path = %path.display(),
            locations = self.programs.len(),
            "Wrote launch script"
        );
        Ok(())
    }

    fn begin_location(&mut self, location: &Location) -> Result<(), CodegenError> {
        location.connection()?;
        debug!(location = %location.name, "Generating location program");
        self.current = Some(LocationGen::new(location.clone()));
        Ok(())
    }

    fn end_location(&mut self) -> Result<(), CodegenError> {
        let mut generator = self
            .current
            .take()
            .ok_or(CodegenError::OutsideLocation("end_location"))?;
        let body = generator.finish()?;

        let name = generator.location.name.clone();
        let mut addresses = Vec::new();
        if generator.listens {
            addresses.push(self.address(&name)?);
        }
        for peer in &generator.peers {
            if *peer != name {
                addresses.push(self.address(peer)?);
            }
        }

        // Remote programs are started inside their workdir by the launcher.
        let workdir = match generator.location.connection()? {
            Connection::Local => generator.location.workdir_or_default(),
            _ => ".".to_string(),
        };
        let source = program::emit_program(&generator, body.as_ref(), &workdir, &addresses);
        let path = self.program_path(&name);
        self.write(&path, &source)?;
        self.format(&path);

        info!(
            location = %name,
            path = %path.display(),
            listens = generator.listens,
            peers = generator.peers.len(),
            "Wrote location program"
        );
        self.programs.push(name);
        Ok(())
    }

    fn begin_dataset(&mut self, dataset: &[(String, Data)]) -> Result<(), CodegenError> {
        let generator = self.generator("dataset")?;
        for (port, data) in dataset {
            let value = data.value.as_deref().unwrap_or(&data.name);
            generator.dataset
                .push(program::emit_dataset_entry(port, &data.data_type, value)?);
        }
        Ok(())
    }

    fn begin_par(&mut self) -> Result<(), CodegenError> {
        self.generator("par")?.open(Operator::Par);
        Ok(())
    }

    fn par(&mut self) -> Result<(), CodegenError> {
        self.generator("par")?.mark(Operator::Par)
    }

    fn end_par(&mut self) -> Result<(), CodegenError> {
        self.generator("par")?.close(Operator::Par)
    }

    fn begin_seq(&mut self) -> Result<(), CodegenError> {
        self.generator("seq")?.open(Operator::Seq);
        Ok(())
    }

    fn seq(&mut self) -> Result<(), CodegenError> {
        self.generator("seq")?.mark(Operator::Seq)
    }

    fn end_seq(&mut self) -> Result<(), CodegenError> {
        self.generator("seq")?.close(Operator::Seq)
    }

    fn begin_choice(&mut self) -> Result<(), CodegenError> {
        Err(CodegenError::ChoiceUnsupported)
    }

    fn choice(&mut self) -> Result<(), CodegenError> {
        Err(CodegenError::ChoiceUnsupported)
    }

    fn end_choice(&mut self) -> Result<(), CodegenError> {
        Err(CodegenError::ChoiceUnsupported)
    }

    fn begin_paren(&mut self) -> Result<(), CodegenError> {
        self.generator("paren")?.open_paren();
        Ok(())
    }

    fn end_paren(&mut self) -> Result<(), CodegenError> {
        self.generator("paren")?.close_paren()
    }

    fn exec(
        &mut self,
        step: &Step,
        inputs: &[DataPair],
        outputs: &[DataPair],
        _mapping: &[String],
    ) -> Result<(), CodegenError> {
        let fragment = program::emit_exec(step, inputs, outputs)?;
        self.generator("exec")?.push(fragment)
    }

    fn send(
        &mut self,
        _data: &str,
        port: &str,
        data_type: &DataType,
        src: &str,
        dst: &str,
    ) -> Result<(), CodegenError> {
        let fragment = program::emit_send(port, data_type, dst)?;
        let generator = self.generator("send")?;
        if generator.location.name != src {
            warn!(location = %generator.location.name, src = %src, port = %port, "send emitted away from its source location");
        }
        generator.peers.insert(dst.to_string());
        generator.push(fragment)
    }

    fn recv(
        &mut self,
        port: &str,
        data_type: &DataType,
        src: &str,
        dst: &str,
    ) -> Result<(), CodegenError> {
        let fragment = program::emit_recv(port, data_type, src)?;
        let generator = self.generator("recv")?;
        if generator.location.name != dst {
            warn!(location = %generator.location.name, dst = %dst, port = %port, "recv emitted away from its destination location");
        }
        generator.listens = true;
        generator.push(fragment)
    }
}
