// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Translation of foreign workflow descriptions into SWIRL.
//!
//! A [`Translator`] builds a [`DistributedWorkflow`] from some other format.
//! The [`Serializer`] turns any such model into trace text plus the metadata
//! document describing it. Both outputs are projections of the same model, so
//! they always agree with each other.

pub mod dax;

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use swirl_dsl::{
    Argument, ArgumentConfig, ConfigError, DataPair, DependencyConfig, DistributedWorkflow,
    Location, LocationConfig, Metadata, Operator, OutputConfig, Port, Predicate, Step, StepConfig,
    Trace,
};
use tracing::{debug, warn};

use crate::error::TranslateError;

pub use dax::DaxTranslator;

/// Names accepted by [`for_language`].
pub const LANGUAGES: &[&str] = &["dax"];

/// Translator for `language` reading from `dir`.
pub fn for_language(language: &str, dir: &Path) -> Result<Box<dyn Translator>, TranslateError> {
    match language {
        "dax" => Ok(Box::new(DaxTranslator::new(dir)?)),
        other => Err(ConfigError::UnsupportedLanguage(other.to_string()).into()),
    }
}

/// Importer of a foreign workflow description.
pub trait Translator {
    fn translate_workflow(&self) -> Result<DistributedWorkflow, TranslateError>;

    fn translate(&self, serializer: &Serializer) -> Result<Serialized, TranslateError> {
        Ok(serializer.serialize(&self.translate_workflow()?))
    }
}

/// How the step units of one location are composed in the serialized trace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StepComposition {
    #[default]
    Parallel,
    Sequential,
}

impl StepComposition {
    fn operator(self) -> Operator {
        match self {
            StepComposition::Parallel => Operator::Par,
            StepComposition::Sequential => Operator::Seq,
        }
    }
}

/// Trace text and metadata of one workflow.
#[derive(Debug, Clone, PartialEq)]
pub struct Serialized {
    pub trace: String,
    pub metadata: Metadata,
}

impl Serialized {
    pub fn write_to(&self, trace_path: &Path, metadata_path: &Path) -> Result<(), TranslateError> {
        let write = |path: &Path, contents: &str| {
            fs::write(path, contents).map_err(|source| TranslateError::Io {
                path: path.to_path_buf(),
                source,
            })
        };
        write(trace_path, &self.trace)?;
        write(metadata_path, &self.metadata.to_yaml()?)
    }
}

/// Predicates deduplicated and ordered by their text.
#[derive(Default)]
struct Group(BTreeMap<String, Predicate>);

impl Group {
    fn insert(&mut self, predicate: Predicate) {
        self.0.insert(predicate.to_string(), predicate);
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `(a | b | ..)`, or `None` when empty.
    fn into_trace(self) -> Option<Trace> {
        Trace::fold(Operator::Par, self.0.into_values().map(Trace::from)).map(Trace::paren)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Serializer {
    pub composition: StepComposition,
}

impl Serializer {
    pub fn new(composition: StepComposition) -> Self {
        Self { composition }
    }

    pub fn serialize(&self, workflow: &DistributedWorkflow) -> Serialized {
        let mut metadata = Metadata::new();
        // Seeded data first: its values win over the bare types step outputs declare.
        for location in workflow.locations() {
            metadata
                .locations
                .insert(location.name.clone(), location_config(location));
            for data in location.data.values() {
                metadata.dependencies.insert(
                    data.name.clone(),
                    DependencyConfig {
                        data_type: data.data_type.clone(),
                        value: data.value.clone(),
                    },
                );
            }
        }

        let locations: Vec<String> = workflow
            .locations()
            .into_iter()
            .map(|location| self.location_trace(workflow, location, &mut metadata))
            .collect();
        let mut trace = locations.join(" |\n");
        trace.push('\n');
        Serialized { trace, metadata }
    }

    fn location_trace(
        &self,
        workflow: &DistributedWorkflow,
        location: &Location,
        metadata: &mut Metadata,
    ) -> String {
        let dataset: Vec<String> = location
            .data
            .keys()
            .filter_map(|data| {
                workflow
                    .ports
                    .values()
                    .find(|port| port.data.contains(data))
                    .map(|port| DataPair::new(&port.name, data).to_string())
            })
            .collect();

        // Seeded data consumed elsewhere.
        let mut dataset_sends = Group::default();
        for data in location.data.values() {
            for port in workflow.ports.values().filter(|p| p.data.contains(&data.name)) {
                for dst in workflow.output_locations(&port.name) {
                    if dst.name != location.name {
                        dataset_sends.insert(Predicate::Send {
                            data: data.name.clone(),
                            port: port.name.clone(),
                            src: location.name.clone(),
                            dst: dst.name.clone(),
                        });
                    }
                }
            }
        }

        // One recv per (port, source) in this location's trace.
        let mut requested = BTreeSet::new();
        let mut units = Vec::new();
        for step in workflow.location_steps(&location.name) {
            add_step(workflow, step, metadata);
            units.push(self.step_unit(workflow, location, step, &mut requested));
        }

        // Operators share one precedence level, so a sequential chain after
        // the dataset sends needs its own parentheses.
        let wrap = units.len() > 1
            && self.composition == StepComposition::Sequential
            && !dataset_sends.is_empty();
        let steps = Trace::fold(self.composition.operator(), units)
            .map(|steps| if wrap { Trace::paren(steps) } else { steps });
        let parts = dataset_sends.into_trace().into_iter().chain(steps);
        let trace = Trace::fold(Operator::Par, parts)
            .map(|trace| trace.to_string())
            .unwrap_or_default();
        format!("<{}, {{{}}},\n\t{trace}>", location.name, dataset.join(","))
    }

    /// `(recvs).exec.(sends)` for one step placed on `location`.
    fn step_unit(
        &self,
        workflow: &DistributedWorkflow,
        location: &Location,
        step: &Step,
        requested: &mut BTreeSet<(String, String)>,
    ) -> Trace {
        let mut recvs = Group::default();
        let mut request = |port: &str, src: &str| {
            if requested.insert((port.to_string(), src.to_string())) {
                recvs.insert(Predicate::Recv {
                    port: port.to_string(),
                    src: src.to_string(),
                    dst: location.name.clone(),
                });
            }
        };
        for port in workflow.input_ports(&step.name) {
            // Produced by a step elsewhere.
            for src in workflow.input_locations(&port.name) {
                if src.name != location.name {
                    request(&port.name, &src.name);
                }
            }
            // Seeded elsewhere.
            if let Some(data) = port.data.iter().next() {
                for src in workflow.locations() {
                    if src.name != location.name && src.data.contains_key(data) {
                        request(&port.name, &src.name);
                    }
                }
            }
        }

        let pairs = |ports: Vec<&Port>| -> Vec<DataPair> {
            ports
                .into_iter()
                .flat_map(|port| port.data.iter().map(|data| DataPair::new(&port.name, data)))
                .collect()
        };
        let exec = Predicate::Exec {
            step: step.name.clone(),
            inputs: pairs(workflow.input_ports(&step.name)),
            outputs: pairs(workflow.output_ports(&step.name)),
            mapping: workflow
                .step_locations(&step.name)
                .into_iter()
                .map(|l| l.name.clone())
                .collect(),
        };

        let mut sends = Group::default();
        for port in workflow.output_ports(&step.name) {
            for data in &port.data {
                for dst in workflow.output_locations(&port.name) {
                    if dst.name != location.name {
                        sends.insert(Predicate::Send {
                            data: data.clone(),
                            port: port.name.clone(),
                            src: location.name.clone(),
                            dst: dst.name.clone(),
                        });
                    }
                }
            }
        }

        let mut unit = Trace::from(exec);
        if let Some(recvs) = recvs.into_trace() {
            unit = Trace::op(Operator::Seq, recvs, unit);
        }
        if let Some(sends) = sends.into_trace() {
            unit = Trace::op(Operator::Seq, unit, sends);
        }
        Trace::paren(unit)
    }
}

fn location_config(location: &Location) -> LocationConfig {
    LocationConfig {
        hostname: location.hostname.clone(),
        port: location.port,
        connection_type: location.connection_type.clone(),
        workdir: location.workdir.clone(),
        outdir: location.outdir.clone(),
    }
}

/// Record `step` and the types of the data it produces.
fn add_step(workflow: &DistributedWorkflow, step: &Step, metadata: &mut Metadata) {
    let mut outputs = BTreeMap::new();
    for (port, processor) in &step.processors {
        let Some(data) = workflow.ports.get(port).and_then(|p| p.data.iter().next()) else {
            warn!(step = %step.name, port = %port, "Output port carries no data, skipping");
            continue;
        };
        metadata
            .dependencies
            .entry(data.clone())
            .or_insert_with(|| DependencyConfig {
                data_type: processor.data_type.clone(),
                value: None,
            });
        outputs.insert(
            port.clone(),
            OutputConfig {
                data_name: data.clone(),
                glob: processor.glob.clone(),
            },
        );
    }
    let arguments = step
        .arguments
        .iter()
        .map(|argument| match argument {
            Argument::Literal(value) => ArgumentConfig::Value {
                value: value.clone(),
            },
            Argument::Port(port) => ArgumentConfig::ValueFrom {
                value_from: port.clone(),
            },
        })
        .collect();
    debug!(step = %step.name, "Serialized step");
    metadata.steps.insert(
        step.name.clone(),
        StepConfig {
            display_name: step.display_name.clone(),
            command: step.command.clone(),
            arguments,
            outputs,
        },
    );
}
