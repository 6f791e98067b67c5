// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pegasus DAX import.
//!
//! A DAX bundle is a directory holding four YAML documents, recognized by file
//! stem: `replicas`, `sites`, `transformations` and `workflow`. Pegasus names
//! (job ids, logical file names, site names) are replaced by canonical SWIRL
//! names `s<n>`, `d<n>`, `p<n>` and `l<n>` in order of first appearance.
//!
//! Every output flagged `stageOut` gets a collector step placed next to its
//! producer that copies the artifact into the site's local storage.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde::de::DeserializeOwned;
use swirl_dsl::{
    Argument, Data, DataType, DistributedWorkflow, Location, ModelError, Port, Processor, Step,
};
use tracing::{debug, info, warn};

use super::Translator;
use crate::error::TranslateError;

const MANDATORY_FILES: [&str; 4] = ["replicas", "sites", "transformations", "workflow"];
const PEGASUS_VERSION: &str = "5.0.4";
const DEFAULT_HOSTNAME: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 35050;
const DEFAULT_CONNECTION: &str = "ssh";
const COLLECTOR_COMMAND: &str = "cp";

#[derive(Debug, Deserialize)]
struct WorkflowDocument {
    #[serde(default)]
    jobs: Vec<Job>,
}

#[derive(Debug, Deserialize)]
struct Job {
    id: String,
    name: String,
    #[serde(default)]
    arguments: Vec<String>,
    #[serde(default)]
    uses: Vec<Use>,
}

#[derive(Debug, Deserialize)]
struct Use {
    lfn: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, rename = "stageOut")]
    stage_out: bool,
}

#[derive(Debug, Deserialize)]
struct SitesDocument {
    #[serde(default)]
    sites: Vec<Site>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Site {
    name: String,
    hostname: Option<String>,
    port: Option<u16>,
    connection_type: Option<String>,
    #[serde(default)]
    directories: Vec<Directory>,
}

impl Site {
    fn directory(&self, kind: &str) -> Option<String> {
        self.directories
            .iter()
            .find(|directory| directory.kind == kind)
            .map(|directory| directory.path.clone())
    }
}

#[derive(Debug, Deserialize)]
struct Directory {
    #[serde(rename = "type")]
    kind: String,
    path: String,
}

#[derive(Debug, Deserialize)]
struct ReplicasDocument {
    #[serde(default)]
    replicas: Vec<Replica>,
}

#[derive(Debug, Deserialize)]
struct Replica {
    lfn: String,
    #[serde(default)]
    pfns: Vec<PhysicalFile>,
}

#[derive(Debug, Deserialize)]
struct PhysicalFile {
    site: String,
    pfn: String,
}

#[derive(Debug, Deserialize)]
struct TransformationsDocument {
    #[serde(default)]
    transformations: Vec<Transformation>,
}

#[derive(Debug, Deserialize)]
struct Transformation {
    name: String,
    #[serde(default)]
    sites: Vec<TransformationSite>,
}

#[derive(Debug, Deserialize)]
struct TransformationSite {
    name: String,
    pfn: String,
}

/// Read a bundle document, warning about untested Pegasus versions.
fn load<T: DeserializeOwned>(path: &Path) -> Result<T, TranslateError> {
    let source = fs::read_to_string(path).map_err(|source| TranslateError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let document = |source| TranslateError::Document {
        path: path.to_path_buf(),
        source,
    };
    let raw: serde_yaml::Value = serde_yaml::from_str(&source).map_err(document)?;
    match raw.get("pegasus") {
        Some(serde_yaml::Value::String(version)) if version == PEGASUS_VERSION => {}
        found => warn!(
            path = %path.display(),
            found = ?found,
            supported = PEGASUS_VERSION,
            "Pegasus version is not checked for this translator, errors can occur"
        ),
    }
    serde_yaml::from_value(raw).map_err(document)
}

/// Canonical names handed out in order of first appearance.
#[derive(Debug)]
struct Names {
    prefix: &'static str,
    bound: BTreeMap<String, String>,
}

impl Names {
    fn new(prefix: &'static str) -> Self {
        Self {
            prefix,
            bound: BTreeMap::new(),
        }
    }

    fn bind(&mut self, foreign: &str) -> String {
        let next = format!("{}{}", self.prefix, self.bound.len());
        self.bound.entry(foreign.to_string()).or_insert(next).clone()
    }

    fn get(&self, foreign: &str) -> Option<&String> {
        self.bound.get(foreign)
    }
}

/// A step being assembled from the job list.
#[derive(Debug)]
struct PendingStep {
    name: String,
    display_name: String,
    command: Option<String>,
    arguments: Vec<String>,
    inputs: Vec<String>,
    outputs: Vec<String>,
}

pub struct DaxTranslator {
    replicas: PathBuf,
    sites: PathBuf,
    transformations: PathBuf,
    workflow: PathBuf,
}

impl DaxTranslator {
    /// Locate the four bundle documents inside `dir`.
    pub fn new(dir: &Path) -> Result<Self, TranslateError> {
        if !dir.is_dir() {
            return Err(TranslateError::NotADirectory(dir.to_path_buf()));
        }
        let entries = fs::read_dir(dir).map_err(|source| TranslateError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .collect();
        paths.sort();

        let mut by_stem: BTreeMap<String, PathBuf> = BTreeMap::new();
        for path in paths {
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                by_stem.entry(stem.to_string()).or_insert(path.clone());
            }
        }

        let missing: Vec<&'static str> = MANDATORY_FILES
            .into_iter()
            .filter(|name| !by_stem.contains_key(*name))
            .collect();
        if !missing.is_empty() {
            return Err(TranslateError::IncompleteBundle {
                dir: dir.to_path_buf(),
                missing,
            });
        }
        let mut take = |name: &str| by_stem.remove(name).unwrap_or_default();
        Ok(Self {
            replicas: take("replicas"),
            sites: take("sites"),
            transformations: take("transformations"),
            workflow: take("workflow"),
        })
    }
}

impl Translator for DaxTranslator {
    fn translate_workflow(&self) -> Result<DistributedWorkflow, TranslateError> {
        let mut workflow = DistributedWorkflow::new();
        let mut data_names = Names::new("d");
        let mut port_names = Names::new("p");
        let mut location_names = Names::new("l");

        // Jobs, in document order, each followed by its collectors.
        let document: WorkflowDocument = load(&self.workflow)?;
        let mut steps: Vec<PendingStep> = Vec::new();
        // Pegasus transformation name -> SWIRL steps running it.
        let mut jobs_by_name: BTreeMap<String, Vec<String>> = BTreeMap::new();
        // SWIRL step -> collectors of its staged-out outputs.
        let mut collectors: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for job in &document.jobs {
            let step_name = format!("s{}", steps.len());
            jobs_by_name
                .entry(job.name.clone())
                .or_default()
                .push(step_name.clone());
            let mut step = PendingStep {
                name: step_name.clone(),
                display_name: job.name.clone(),
                command: None,
                arguments: job.arguments.clone(),
                inputs: Vec::new(),
                outputs: Vec::new(),
            };
            let mut staged = Vec::new();
            for usage in &job.uses {
                let data = data_names.bind(&usage.lfn);
                match usage.kind.as_str() {
                    "input" => step.inputs.push(data),
                    "output" => {
                        step.outputs.push(data.clone());
                        if usage.stage_out {
                            staged.push(data);
                        }
                    }
                    other => {
                        debug!(job = %job.id, lfn = %usage.lfn, kind = %other, "Ignoring file usage")
                    }
                }
            }
            steps.push(step);
            for data in staged {
                let collector = format!("s{}", steps.len());
                debug!(job = %job.id, data = %data, collector = %collector, "Adding collector step");
                collectors
                    .entry(step_name.clone())
                    .or_default()
                    .push(collector.clone());
                steps.push(PendingStep {
                    name: collector,
                    display_name: format!("{}-{data}-collector", job.name),
                    command: Some(COLLECTOR_COMMAND.to_string()),
                    arguments: vec!["-r".to_string(), data.clone()],
                    inputs: vec![data],
                    outputs: Vec::new(),
                });
            }
        }

        // Ports: every produced data item first, then data only consumed.
        let mut data_ports: BTreeMap<String, String> = BTreeMap::new();
        for data in steps.iter().flat_map(|step| &step.outputs) {
            data_ports.insert(data.clone(), port_names.bind(data));
        }
        for data in steps.iter().flat_map(|step| &step.inputs) {
            data_ports.insert(data.clone(), port_names.bind(data));
        }
        let port_of = |data: &str| -> Result<&String, ModelError> {
            data_ports
                .get(data)
                .ok_or_else(|| ModelError::UnknownData(data.to_string()))
        };

        for pending in &steps {
            let mut step = Step::new(&pending.name, &pending.display_name);
            step.command = pending.command.clone();
            for argument in &pending.arguments {
                step.arguments.push(match data_ports.get(argument) {
                    Some(port) if pending.inputs.contains(argument) => Argument::Port(port.clone()),
                    _ => Argument::Literal(argument.clone()),
                });
            }
            for data in &pending.outputs {
                let glob = data_names
                    .bound
                    .iter()
                    .find(|(_, name)| *name == data)
                    .map(|(lfn, _)| lfn.clone());
                step.processors.insert(
                    port_of(data)?.clone(),
                    Processor {
                        data_type: DataType::File,
                        glob,
                    },
                );
            }
            workflow.add_step(step);
            for data in &pending.outputs {
                workflow.add_output_port(&pending.name, Port::new(port_of(data)?).with_data(data))?;
            }
            for data in &pending.inputs {
                workflow.add_input_port(&pending.name, Port::new(port_of(data)?).with_data(data))?;
            }
        }

        // Sites become locations.
        let sites: SitesDocument = load(&self.sites)?;
        for site in &sites.sites {
            let name = location_names.bind(&site.name);
            let mut location = Location::new(&name, &site.name);
            location.hostname = Some(
                site.hostname
                    .clone()
                    .unwrap_or_else(|| DEFAULT_HOSTNAME.to_string()),
            );
            location.port = Some(site.port.unwrap_or(DEFAULT_PORT));
            location.connection_type = Some(
                site.connection_type
                    .clone()
                    .unwrap_or_else(|| DEFAULT_CONNECTION.to_string()),
            );
            location.workdir = site.directory("sharedScratch");
            location.outdir = site.directory("localStorage");
            workflow.add_location(location);
        }
        let location_of = |site: &str| -> Result<String, ModelError> {
            location_names
                .get(site)
                .cloned()
                .ok_or_else(|| ModelError::UnknownLocation(site.to_string()))
        };

        // Replicas seed the initial datasets.
        let replicas: ReplicasDocument = load(&self.replicas)?;
        for replica in &replicas.replicas {
            let Some(data) = data_names.get(&replica.lfn).cloned() else {
                debug!(lfn = %replica.lfn, "Replica is not used by any job");
                continue;
            };
            for physical in &replica.pfns {
                let location = location_of(&physical.site)?;
                workflow
                    .location_mut(&location)?
                    .add_data(Data::new(&data, DataType::File, Some(physical.pfn.clone())));
            }
        }

        // Transformations place steps on sites and name their executables.
        let transformations: TransformationsDocument = load(&self.transformations)?;
        for transformation in &transformations.transformations {
            let Some(bound_steps) = jobs_by_name.get(&transformation.name) else {
                debug!(transformation = %transformation.name, "Transformation is not used by any job");
                continue;
            };
            for binding in &transformation.sites {
                let location = location_of(&binding.name)?;
                let outdir = workflow.location(&location)?.outdir.clone();
                for step_name in bound_steps {
                    if let Some(step) = workflow.steps.get_mut(step_name) {
                        step.command = Some(binding.pfn.clone());
                    }
                    workflow.map(step_name, &location)?;
                    for collector in collectors.get(step_name).into_iter().flatten() {
                        workflow.map(collector, &location)?;
                        match &outdir {
                            Some(outdir) => {
                                if let Some(step) = workflow.steps.get_mut(collector) {
                                    step.arguments.push(Argument::Literal(outdir.clone()));
                                }
                            }
                            None => warn!(
                                step = %collector,
                                location = %location,
                                "Location has no local storage, collector copies into its workdir"
                            ),
                        }
                    }
                }
            }
        }

        info!(
            steps = workflow.steps.len(),
            ports = workflow.ports.len(),
            locations = workflow.locations.len(),
            "Translated DAX bundle"
        );
        Ok(workflow)
    }
}
