// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory workflow model.
//!
//! Entities are keyed by name and stored in ordered maps, so every derived
//! query returns name-sorted results. Code generation relies on that order
//! being stable between runs.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Name of the location a plain [`Workflow`] is placed on.
pub const LOCAL_LOCATION: &str = "l";

/// Transfer type of a unit of data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DataType {
    Stdout,
    File,
    Directory,
    Text,
    Other(String),
}

impl DataType {
    pub fn as_str(&self) -> &str {
        match self {
            DataType::Stdout => "stdout",
            DataType::File => "file",
            DataType::Directory => "directory",
            DataType::Text => "string",
            DataType::Other(other) => other,
        }
    }
}

impl From<&str> for DataType {
    fn from(value: &str) -> Self {
        match value {
            "stdout" => DataType::Stdout,
            "file" => DataType::File,
            "directory" => DataType::Directory,
            "string" => DataType::Text,
            other => DataType::Other(other.to_string()),
        }
    }
}

impl From<String> for DataType {
    fn from(value: String) -> Self {
        DataType::from(value.as_str())
    }
}

impl From<DataType> for String {
    fn from(value: DataType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of data: literal payload or source path, tagged with its type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Data {
    pub name: String,
    pub data_type: DataType,
    pub value: Option<String>,
}

impl Data {
    pub fn new(name: impl Into<String>, data_type: DataType, value: Option<String>) -> Self {
        Self {
            name: name.into(),
            data_type,
            value,
        }
    }
}

/// How commands and artifacts reach a location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connection {
    Local,
    Ssh,
    Docker,
}

impl Connection {
    /// Wrap `command` so that it runs inside `workdir` on `host`.
    pub fn wrap_command(&self, host: &str, workdir: &str, command: &str) -> String {
        match self {
            Connection::Local => format!("cd {workdir} && {command}"),
            Connection::Ssh => format!("ssh {host} \"cd {workdir} && {command}\""),
            Connection::Docker => {
                format!("docker exec --workdir {workdir} {host} sh -c \"{command}\"")
            }
        }
    }

    /// Command copying `src` to `dst` on `host`, or `None` when nothing has to move.
    pub fn copy_command(&self, host: &str, src: &str, dst: &str) -> Option<String> {
        match self {
            Connection::Local => None,
            Connection::Ssh => Some(format!("scp {src} {host}:{dst}")),
            Connection::Docker => Some(format!("docker cp {src} {host}:{dst}")),
        }
    }
}

/// A place where steps execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub name: String,
    pub display_name: String,
    /// Data seeded at this location before any step runs.
    pub data: BTreeMap<String, Data>,
    pub connection_type: Option<String>,
    pub hostname: Option<String>,
    pub port: Option<u16>,
    pub workdir: Option<String>,
    pub outdir: Option<String>,
}

impl Location {
    pub fn new(name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            data: BTreeMap::new(),
            connection_type: None,
            hostname: None,
            port: None,
            workdir: None,
            outdir: None,
        }
    }

    pub fn add_data(&mut self, data: Data) {
        self.data.insert(data.name.clone(), data);
    }

    pub fn connection(&self) -> Result<Connection, ModelError> {
        match self.connection_type.as_deref() {
            None => Ok(Connection::Local),
            Some("ssh") => Ok(Connection::Ssh),
            Some("docker") => Ok(Connection::Docker),
            Some(other) => Err(ModelError::UnsupportedConnectionType {
                location: self.name.clone(),
                connection_type: other.to_string(),
            }),
        }
    }

    /// Working directory with any trailing separator removed; `.` when unset.
    pub fn workdir_or_default(&self) -> String {
        normalize_dir(self.workdir.as_deref().unwrap_or("."))
    }

    /// Remote host used for ssh and docker placement; falls back to the hostname
    /// and then to the location name.
    pub fn host(&self) -> &str {
        self.hostname.as_deref().unwrap_or(&self.name)
    }

    pub fn wrap_command(&self, command: &str) -> Result<String, ModelError> {
        Ok(self
            .connection()?
            .wrap_command(self.host(), &self.workdir_or_default(), command))
    }

    /// Copy `src` into this location's working directory.
    pub fn copy_command(&self, src: &str) -> Result<Option<String>, ModelError> {
        Ok(self
            .connection()?
            .copy_command(self.host(), src, &self.workdir_or_default()))
    }
}

fn normalize_dir(dir: &str) -> String {
    let trimmed = dir.trim_end_matches('/');
    if trimmed.is_empty() && dir.starts_with('/') {
        "/".to_string()
    } else if trimmed.is_empty() {
        ".".to_string()
    } else {
        trimmed.to_string()
    }
}

/// A named channel; `data` collects every data name that flows through it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    pub name: String,
    pub display_name: String,
    pub data: BTreeSet<String>,
}

impl Port {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            data: BTreeSet::new(),
        }
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data.insert(data.into());
        self
    }
}

/// Extracts the value of one output port from a finished step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Processor {
    pub data_type: DataType,
    pub glob: Option<String>,
}

/// A positional command argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Argument {
    Literal(String),
    /// Replaced at run time with the value of the named input port.
    Port(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub name: String,
    pub display_name: String,
    pub command: Option<String>,
    pub arguments: Vec<Argument>,
    /// Output port name to processor.
    pub processors: BTreeMap<String, Processor>,
}

impl Step {
    pub fn new(name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            command: None,
            arguments: Vec::new(),
            processors: BTreeMap::new(),
        }
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_argument(mut self, argument: Argument) -> Self {
        self.arguments.push(argument);
        self
    }

    pub fn with_processor(mut self, port: impl Into<String>, processor: Processor) -> Self {
        self.processors.insert(port.into(), processor);
        self
    }
}

/// A directed dependency edge.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Edge {
    /// The port feeds the step.
    Feeds { port: String, step: String },
    /// The step produces the port.
    Produces { step: String, port: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Workflow {
    pub steps: BTreeMap<String, Step>,
    pub ports: BTreeMap<String, Port>,
    pub dependencies: BTreeSet<Edge>,
}

impl Workflow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_step(&mut self, step: Step) {
        self.steps.insert(step.name.clone(), step);
    }

    /// Add `port` as an input of `step`, merging its data into an existing port
    /// of the same name.
    pub fn add_input_port(&mut self, step: &str, port: Port) -> Result<(), ModelError> {
        let port = self.merge_port(step, port)?;
        self.dependencies.insert(Edge::Feeds {
            port,
            step: step.to_string(),
        });
        Ok(())
    }

    /// Add `port` as an output of `step`.
    pub fn add_output_port(&mut self, step: &str, port: Port) -> Result<(), ModelError> {
        let port = self.merge_port(step, port)?;
        self.dependencies.insert(Edge::Produces {
            step: step.to_string(),
            port,
        });
        Ok(())
    }

    fn merge_port(&mut self, step: &str, port: Port) -> Result<String, ModelError> {
        if !self.steps.contains_key(step) {
            return Err(ModelError::UnknownStep(step.to_string()));
        }
        let name = port.name.clone();
        match self.ports.get_mut(&name) {
            Some(existing) => existing.data.extend(port.data),
            None => {
                self.ports.insert(name.clone(), port);
            }
        }
        Ok(name)
    }

    /// Insert a port that is not attached to any step yet, or extend the data
    /// of an existing one.
    pub fn bind_port(&mut self, port: &str, data: &str) -> &mut Port {
        let entry = self
            .ports
            .entry(port.to_string())
            .or_insert_with(|| Port::new(port));
        entry.data.insert(data.to_string());
        entry
    }

    pub fn step(&self, name: &str) -> Result<&Step, ModelError> {
        self.steps
            .get(name)
            .ok_or_else(|| ModelError::UnknownStep(name.to_string()))
    }

    pub fn port(&self, name: &str) -> Result<&Port, ModelError> {
        self.ports
            .get(name)
            .ok_or_else(|| ModelError::UnknownPort(name.to_string()))
    }

    pub fn input_ports(&self, step: &str) -> Vec<&Port> {
        self.dependencies
            .iter()
            .filter_map(|edge| match edge {
                Edge::Feeds { port, step: s } if s == step => self.ports.get(port),
                _ => None,
            })
            .collect()
    }

    pub fn output_ports(&self, step: &str) -> Vec<&Port> {
        self.dependencies
            .iter()
            .filter_map(|edge| match edge {
                Edge::Produces { step: s, port } if s == step => self.ports.get(port),
                _ => None,
            })
            .collect()
    }

    /// Steps producing `port`.
    pub fn input_steps(&self, port: &str) -> Vec<&Step> {
        self.dependencies
            .iter()
            .filter_map(|edge| match edge {
                Edge::Produces { step, port: p } if p == port => self.steps.get(step),
                _ => None,
            })
            .collect()
    }

    /// Steps consuming `port`.
    pub fn output_steps(&self, port: &str) -> Vec<&Step> {
        self.dependencies
            .iter()
            .filter_map(|edge| match edge {
                Edge::Feeds { port: p, step } if p == port => self.steps.get(step),
                _ => None,
            })
            .collect()
    }

    /// `(port,data)` pairs read by `step`.
    pub fn input_data(&self, step: &str) -> Vec<String> {
        port_data_pairs(self.input_ports(step))
    }

    /// `(port,data)` pairs written by `step`.
    pub fn output_data(&self, step: &str) -> Vec<String> {
        port_data_pairs(self.output_ports(step))
    }
}

fn port_data_pairs(ports: Vec<&Port>) -> Vec<String> {
    let pairs: BTreeSet<String> = ports
        .into_iter()
        .flat_map(|port| port.data.iter().map(move |d| format!("({},{})", port.name, d)))
        .collect();
    pairs.into_iter().collect()
}

/// A workflow whose steps are placed on locations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistributedWorkflow {
    pub workflow: Workflow,
    pub locations: BTreeMap<String, Location>,
    /// `(step, location)` placements.
    pub mapping: BTreeSet<(String, String)>,
}

impl Deref for DistributedWorkflow {
    type Target = Workflow;

    fn deref(&self) -> &Workflow {
        &self.workflow
    }
}

impl DerefMut for DistributedWorkflow {
    fn deref_mut(&mut self) -> &mut Workflow {
        &mut self.workflow
    }
}

impl DistributedWorkflow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_location(&mut self, location: Location) {
        self.locations.insert(location.name.clone(), location);
    }

    pub fn location(&self, name: &str) -> Result<&Location, ModelError> {
        self.locations
            .get(name)
            .ok_or_else(|| ModelError::UnknownLocation(name.to_string()))
    }

    pub fn location_mut(&mut self, name: &str) -> Result<&mut Location, ModelError> {
        self.locations
            .get_mut(name)
            .ok_or_else(|| ModelError::UnknownLocation(name.to_string()))
    }

    /// Place `step` on `location`.
    pub fn map(&mut self, step: &str, location: &str) -> Result<(), ModelError> {
        if !self.workflow.steps.contains_key(step) {
            return Err(ModelError::UnknownStep(step.to_string()));
        }
        if !self.locations.contains_key(location) {
            return Err(ModelError::UnknownLocation(location.to_string()));
        }
        self.mapping.insert((step.to_string(), location.to_string()));
        Ok(())
    }

    pub fn locations(&self) -> Vec<&Location> {
        self.locations.values().collect()
    }

    pub fn location_steps(&self, location: &str) -> Vec<&Step> {
        self.mapping
            .iter()
            .filter(|(_, l)| l == location)
            .filter_map(|(s, _)| self.workflow.steps.get(s))
            .collect()
    }

    pub fn step_locations(&self, step: &str) -> Vec<&Location> {
        self.mapping
            .iter()
            .filter(|(s, _)| s == step)
            .filter_map(|(_, l)| self.locations.get(l))
            .collect()
    }

    /// Locations hosting a producer of `port`.
    pub fn input_locations(&self, port: &str) -> Vec<&Location> {
        self.collect_locations(self.workflow.input_steps(port))
    }

    /// Locations hosting a consumer of `port`.
    pub fn output_locations(&self, port: &str) -> Vec<&Location> {
        self.collect_locations(self.workflow.output_steps(port))
    }

    fn collect_locations(&self, steps: Vec<&Step>) -> Vec<&Location> {
        let names: BTreeSet<&str> = steps
            .iter()
            .flat_map(|step| self.step_locations(&step.name))
            .map(|location| location.name.as_str())
            .collect();
        names
            .into_iter()
            .filter_map(|name| self.locations.get(name))
            .collect()
    }
}

impl From<Workflow> for DistributedWorkflow {
    fn from(workflow: Workflow) -> Self {
        let mapping = workflow
            .steps
            .keys()
            .map(|step| (step.clone(), LOCAL_LOCATION.to_string()))
            .collect();
        let mut locations = BTreeMap::new();
        locations.insert(
            LOCAL_LOCATION.to_string(),
            Location::new(LOCAL_LOCATION, "local"),
        );
        Self {
            workflow,
            locations,
            mapping,
        }
    }
}
