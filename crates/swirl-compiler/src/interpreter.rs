// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Trace interpreter.
//!
//! Interpretation runs in two passes over the same tree:
//!
//! 1. [`TraceInterpreter::build`] resolves every name against the metadata and
//!    builds the complete [`DistributedWorkflow`]: locations, datasets, steps,
//!    ports, dependency edges and placements.
//! 2. [`TraceInterpreter::drive`] walks the tree again, depth first and left to
//!    right, and reports it to a [`Compiler`]. Every callback sees the finished
//!    model, so a step referenced in several places is always the same entity.

use swirl_dsl::{
    Argument, ArgumentConfig, Data, DataPair, DataType, DistributedWorkflow, Location, Metadata,
    ModelError, Operator, Port, Predicate, Processor, Step, Trace, WorkflowTrace,
};
use tracing::{debug, info};

use crate::compiler::Compiler;
use crate::error::{CodegenError, CompileError};

pub struct TraceInterpreter<'a> {
    metadata: &'a Metadata,
}

impl<'a> TraceInterpreter<'a> {
    pub fn new(metadata: &'a Metadata) -> Self {
        Self { metadata }
    }

    /// Build the model, then drive `compiler` over the trace.
    pub fn compile(
        &self,
        trace: &WorkflowTrace,
        compiler: &mut dyn Compiler,
    ) -> Result<DistributedWorkflow, CompileError> {
        let workflow = self.build(trace)?;
        self.drive(trace, &workflow, compiler)?;
        Ok(workflow)
    }

    /// Workflow holding every location declared in the metadata.
    fn seed(&self) -> DistributedWorkflow {
        let mut workflow = DistributedWorkflow::new();
        for (name, config) in &self.metadata.locations {
            let mut location = Location::new(name, name);
            location.hostname = config.hostname.clone();
            location.port = config.port;
            location.connection_type = config.connection_type.clone();
            location.workdir = config.workdir.clone();
            location.outdir = config.outdir.clone();
            workflow.add_location(location);
        }
        workflow
    }

    fn data(&self, name: &str) -> Result<Data, ModelError> {
        self.metadata
            .dependencies
            .get(name)
            .map(|dependency| Data::new(name, dependency.data_type.clone(), dependency.value.clone()))
            .ok_or_else(|| ModelError::UnknownData(name.to_string()))
    }

    pub fn build(&self, trace: &WorkflowTrace) -> Result<DistributedWorkflow, ModelError> {
        let mut workflow = self.seed();
        for location in &trace.locations {
            for pair in &location.dataset {
                let data = self.data(&pair.data)?;
                workflow.location_mut(&location.name)?.add_data(data);
                workflow.bind_port(&pair.port, &pair.data);
            }
            // Locations without a dataset still have to exist.
            workflow.location(&location.name)?;
            if let Some(trace) = &location.trace {
                self.build_trace(trace, &mut workflow)?;
            }
        }
        info!(
            locations = workflow.locations.len(),
            steps = workflow.steps.len(),
            ports = workflow.ports.len(),
            "Workflow model built"
        );
        Ok(workflow)
    }

    fn build_trace(&self, trace: &Trace, workflow: &mut DistributedWorkflow) -> Result<(), ModelError> {
        match trace {
            Trace::Op { left, right, .. } => {
                self.build_trace(left, workflow)?;
                self.build_trace(right, workflow)
            }
            Trace::Paren(inner) => self.build_trace(inner, workflow),
            Trace::Predicate(Predicate::Exec {
                step,
                inputs,
                outputs,
                mapping,
            }) => self.build_exec(step, inputs, outputs, mapping, workflow),
            Trace::Predicate(Predicate::Send { data, src, dst, .. }) => {
                self.data(data)?;
                workflow.location(src)?;
                workflow.location(dst)?;
                Ok(())
            }
            Trace::Predicate(Predicate::Recv { src, dst, .. }) => {
                workflow.location(src)?;
                workflow.location(dst)?;
                Ok(())
            }
        }
    }

    fn build_exec(
        &self,
        name: &str,
        inputs: &[DataPair],
        outputs: &[DataPair],
        mapping: &[String],
        workflow: &mut DistributedWorkflow,
    ) -> Result<(), ModelError> {
        if !workflow.steps.contains_key(name) {
            workflow.add_step(self.create_step(name, inputs)?);
        }
        for pair in inputs {
            self.data(&pair.data)?;
            workflow.add_input_port(name, Port::new(&pair.port).with_data(&pair.data))?;
        }
        for pair in outputs {
            self.data(&pair.data)?;
            workflow.add_output_port(name, Port::new(&pair.port).with_data(&pair.data))?;
        }
        for location in mapping {
            workflow.map(name, location)?;
        }
        Ok(())
    }

    fn create_step(&self, name: &str, inputs: &[DataPair]) -> Result<Step, ModelError> {
        let config = self
            .metadata
            .steps
            .get(name)
            .ok_or_else(|| ModelError::UnknownStep(name.to_string()))?;

        let mut step = Step::new(name, &config.display_name);
        step.command = config.command.clone();
        for (port, output) in &config.outputs {
            let dependency = self
                .metadata
                .dependencies
                .get(&output.data_name)
                .ok_or_else(|| ModelError::UnknownData(output.data_name.clone()))?;
            step.processors.insert(
                port.clone(),
                Processor {
                    data_type: dependency.data_type.clone(),
                    glob: output.glob.clone(),
                },
            );
        }
        for argument in &config.arguments {
            step.arguments.push(match argument {
                ArgumentConfig::Value { value } => Argument::Literal(value.clone()),
                ArgumentConfig::ValueFrom { value_from } => {
                    if !inputs.iter().any(|pair| &pair.port == value_from) {
                        return Err(ModelError::InvalidValueFrom {
                            step: name.to_string(),
                            port: value_from.clone(),
                        });
                    }
                    Argument::Port(value_from.clone())
                }
            });
        }
        debug!(step = %name, display_name = %step.display_name, "Created step");
        Ok(step)
    }

    /// Report `trace` to `compiler` against the already built `workflow`.
    pub fn drive(
        &self,
        trace: &WorkflowTrace,
        workflow: &DistributedWorkflow,
        compiler: &mut dyn Compiler,
    ) -> Result<(), CompileError> {
        compiler.begin_workflow(workflow)?;
        for location in &trace.locations {
            compiler.begin_location(workflow.location(&location.name)?)?;
            let dataset = location
                .dataset
                .iter()
                .map(|pair| Ok((pair.port.clone(), self.data(&pair.data)?)))
                .collect::<Result<Vec<_>, ModelError>>()?;
            compiler.begin_dataset(&dataset)?;
            compiler.end_dataset()?;
            if let Some(trace) = &location.trace {
                self.drive_trace(trace, workflow, compiler)?;
            }
            compiler.end_location()?;
        }
        compiler.end_workflow()?;
        Ok(())
    }

    fn drive_trace(
        &self,
        trace: &Trace,
        workflow: &DistributedWorkflow,
        compiler: &mut dyn Compiler,
    ) -> Result<(), CompileError> {
        match trace {
            Trace::Op { op, left, right } => {
                match op {
                    Operator::Par => compiler.begin_par()?,
                    Operator::Seq => compiler.begin_seq()?,
                    Operator::Choice => compiler.begin_choice()?,
                }
                self.drive_trace(left, workflow, compiler)?;
                match op {
                    Operator::Par => compiler.par()?,
                    Operator::Seq => compiler.seq()?,
                    Operator::Choice => compiler.choice()?,
                }
                self.drive_trace(right, workflow, compiler)?;
                match op {
                    Operator::Par => compiler.end_par()?,
                    Operator::Seq => compiler.end_seq()?,
                    Operator::Choice => compiler.end_choice()?,
                }
            }
            Trace::Paren(inner) => {
                compiler.begin_paren()?;
                self.drive_trace(inner, workflow, compiler)?;
                compiler.end_paren()?;
            }
            Trace::Predicate(predicate) => self.drive_predicate(predicate, workflow, compiler)?,
        }
        Ok(())
    }

    fn drive_predicate(
        &self,
        predicate: &Predicate,
        workflow: &DistributedWorkflow,
        compiler: &mut dyn Compiler,
    ) -> Result<(), CodegenError> {
        match predicate {
            Predicate::Exec {
                step,
                inputs,
                outputs,
                mapping,
            } => compiler.exec(workflow.step(step)?, inputs, outputs, mapping),
            Predicate::Send {
                data,
                port,
                src,
                dst,
            } => {
                let data_type = self.data(data)?.data_type;
                compiler.send(data, port, &data_type, src, dst)
            }
            Predicate::Recv { port, src, dst } => {
                let data_type = self.recv_type(port, src, workflow)?;
                compiler.recv(port, &data_type, src, dst)
            }
        }
    }

    /// Type of the data arriving on `port` from `src`: data seeded at `src`
    /// wins, then any step output declared for `port` in the metadata.
    fn recv_type(
        &self,
        port: &str,
        src: &str,
        workflow: &DistributedWorkflow,
    ) -> Result<DataType, ModelError> {
        let source = workflow.location(src)?;
        let seeded = workflow
            .ports
            .get(port)
            .and_then(|p| p.data.iter().find_map(|data| source.data.get(data)));
        if let Some(data) = seeded {
            return Ok(data.data_type.clone());
        }
        self.metadata
            .port_producers(port)
            .find_map(|(_, output)| self.metadata.dependencies.get(&output.data_name))
            .map(|dependency| dependency.data_type.clone())
            .ok_or_else(|| ModelError::UnresolvedPortType {
                port: port.to_string(),
                src: src.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{Event, RecordingCompiler};
    use swirl_dsl::parse_workflow;

    const METADATA: &str = r#"
version: v1.0
steps:
  s1:
    displayName: produce
    command: echo
    arguments:
      - value: hello
    outputs:
      p2:
        dataName: d2
  s2:
    displayName: consume
    command: cat
    arguments:
      - value: -n
      - valueFrom: p2
      - value: --
    outputs:
      p3:
        dataName: d3
        glob: "*.txt"
locations:
  l1:
    hostname: 127.0.0.1
    port: 8080
  l2:
    hostname: 127.0.0.1
    port: 8081
dependencies:
  d1:
    type: file
    value: input.txt
  d2:
    type: stdout
  d3:
    type: file
"#;

    const TRACE: &str = "<l1, {(p1,d1)}, exec(s1,{(p1,d1)}->{(p2,d2)},{l1}).send(d2->p2,l1,l2)> |
        <l2, {}, recv(p2,l1,l2).exec(s2,{(p2,d2)}->{(p3,d3)},{l2})>";

    fn metadata() -> Metadata {
        Metadata::from_yaml(METADATA).unwrap()
    }

    #[test]
    fn test_build_model() {
        let metadata = metadata();
        let trace = parse_workflow(TRACE).unwrap();
        let workflow = TraceInterpreter::new(&metadata).build(&trace).unwrap();

        assert_eq!(workflow.steps.len(), 2);
        let s2 = workflow.step("s2").unwrap();
        assert_eq!(
            s2.arguments,
            vec![
                Argument::Literal("-n".into()),
                Argument::Port("p2".into()),
                Argument::Literal("--".into()),
            ]
        );
        assert_eq!(s2.processors["p3"].glob.as_deref(), Some("*.txt"));
        assert_eq!(s2.processors["p3"].data_type, DataType::File);

        let l1 = workflow.location("l1").unwrap();
        assert_eq!(l1.data["d1"].value.as_deref(), Some("input.txt"));
        assert_eq!(workflow.input_data("s2"), vec!["(p2,d2)"]);
        assert_eq!(
            workflow.output_locations("p2").iter().map(|l| &l.name).collect::<Vec<_>>(),
            vec!["l2"]
        );
    }

    #[test]
    fn test_callback_order() {
        let metadata = metadata();
        let trace = parse_workflow(TRACE).unwrap();
        let mut recorder = RecordingCompiler::new();
        TraceInterpreter::new(&metadata)
            .compile(&trace, &mut recorder)
            .unwrap();

        let expected = vec![
            Event::BeginWorkflow,
            Event::BeginLocation {
                location: "l1".into(),
            },
            Event::BeginDataset {
                bindings: vec![("p1".into(), "d1".into())],
            },
            Event::EndDataset,
            Event::BeginSeq,
            Event::Exec {
                step: "s1".into(),
                inputs: vec!["(p1,d1)".into()],
                outputs: vec!["(p2,d2)".into()],
                mapping: vec!["l1".into()],
            },
            Event::Seq,
            Event::Send {
                data: "d2".into(),
                port: "p2".into(),
                data_type: "stdout".into(),
                src: "l1".into(),
                dst: "l2".into(),
            },
            Event::EndSeq,
            Event::EndLocation,
            Event::BeginLocation {
                location: "l2".into(),
            },
            Event::BeginDataset { bindings: vec![] },
            Event::EndDataset,
            Event::BeginSeq,
            Event::Recv {
                port: "p2".into(),
                data_type: "stdout".into(),
                src: "l1".into(),
                dst: "l2".into(),
            },
            Event::Seq,
            Event::Exec {
                step: "s2".into(),
                inputs: vec!["(p2,d2)".into()],
                outputs: vec!["(p3,d3)".into()],
                mapping: vec!["l2".into()],
            },
            Event::EndSeq,
            Event::EndLocation,
            Event::EndWorkflow,
        ];
        assert_eq!(recorder.events, expected);
    }

    #[test]
    fn test_parenthesized_par_brackets() {
        let metadata = metadata();
        let trace = parse_workflow("<l2, {}, (recv(p2,l1,l2) | recv(p2,l1,l2))>").unwrap();
        let mut recorder = RecordingCompiler::new();
        TraceInterpreter::new(&metadata)
            .compile(&trace, &mut recorder)
            .unwrap();
        let operators: Vec<_> = recorder
            .events
            .iter()
            .filter(|e| {
                matches!(
                    e,
                    Event::BeginParen | Event::EndParen | Event::BeginPar | Event::Par | Event::EndPar
                )
            })
            .cloned()
            .collect();
        assert_eq!(
            operators,
            vec![
                Event::BeginParen,
                Event::BeginPar,
                Event::Par,
                Event::EndPar,
                Event::EndParen
            ]
        );
    }

    #[test]
    fn test_recv_prefers_data_seeded_at_source() {
        // p1 is seeded at l1 as a file while s9 declares p1 as a stdout output.
        let metadata = Metadata::from_yaml(
            r#"
version: v1.0
steps:
  s9:
    displayName: other
    command: echo
    outputs:
      p1:
        dataName: d9
locations:
  l1: { hostname: h1, port: 1 }
  l2: { hostname: h2, port: 2 }
dependencies:
  d1: { type: file, value: data.txt }
  d9: { type: stdout }
"#,
        )
        .unwrap();
        let trace = parse_workflow("<l1, {(p1,d1)}, send(d1->p1,l1,l2)> | <l2, {}, recv(p1,l1,l2)>").unwrap();
        let mut recorder = RecordingCompiler::new();
        TraceInterpreter::new(&metadata)
            .compile(&trace, &mut recorder)
            .unwrap();
        let recv_type = recorder.events.iter().find_map(|e| match e {
            Event::Recv { data_type, .. } => Some(data_type.clone()),
            _ => None,
        });
        assert_eq!(recv_type.as_deref(), Some("file"));
    }

    #[test]
    fn test_recv_falls_back_to_step_outputs() {
        let metadata = metadata();
        let trace = parse_workflow("<l2, {}, recv(p3,l1,l2)>").unwrap();
        let mut recorder = RecordingCompiler::new();
        TraceInterpreter::new(&metadata)
            .compile(&trace, &mut recorder)
            .unwrap();
        assert!(recorder.events.contains(&Event::Recv {
            port: "p3".into(),
            data_type: "file".into(),
            src: "l1".into(),
            dst: "l2".into(),
        }));
    }

    #[test]
    fn test_recv_unresolved_type() {
        let metadata = metadata();
        let trace = parse_workflow("<l2, {}, recv(p7,l1,l2)>").unwrap();
        let err = TraceInterpreter::new(&metadata)
            .compile(&trace, &mut RecordingCompiler::new())
            .unwrap_err();
        assert!(matches!(
            err,
            CompileError::Codegen(CodegenError::Model(ModelError::UnresolvedPortType { ref port, .. }))
                if port == "p7"
        ));
    }

    #[test]
    fn test_invalid_value_from() {
        let metadata = metadata();
        // s2 takes p2 as an argument but the exec does not declare it.
        let trace = parse_workflow("<l2, {}, exec(s2,{}->{(p3,d3)},{l2})>").unwrap();
        let err = TraceInterpreter::new(&metadata).build(&trace).unwrap_err();
        assert_eq!(
            err,
            ModelError::InvalidValueFrom {
                step: "s2".into(),
                port: "p2".into()
            }
        );
    }

    #[test]
    fn test_unknown_names() {
        let metadata = metadata();
        let interpreter = TraceInterpreter::new(&metadata);

        let trace = parse_workflow("<l9, {}, >").unwrap();
        assert_eq!(
            interpreter.build(&trace).unwrap_err(),
            ModelError::UnknownLocation("l9".into())
        );

        let trace = parse_workflow("<l1, {}, exec(s9,{}->{},{l1})>").unwrap();
        assert_eq!(
            interpreter.build(&trace).unwrap_err(),
            ModelError::UnknownStep("s9".into())
        );

        let trace = parse_workflow("<l1, {(p1,d9)}, >").unwrap();
        assert_eq!(
            interpreter.build(&trace).unwrap_err(),
            ModelError::UnknownData("d9".into())
        );

        let trace = parse_workflow("<l1, {}, exec(s1,{}->{(p2,d2)},{l7})>").unwrap();
        assert_eq!(
            interpreter.build(&trace).unwrap_err(),
            ModelError::UnknownLocation("l7".into())
        );
    }

    #[test]
    fn test_repeated_exec_is_the_same_step() {
        let metadata = metadata();
        let trace = parse_workflow(
            "<l1, {}, exec(s1,{}->{(p2,d2)},{l1})> | <l2, {}, exec(s1,{}->{(p2,d2)},{l2})>",
        )
        .unwrap();
        let workflow = TraceInterpreter::new(&metadata).build(&trace).unwrap();
        assert_eq!(workflow.steps.len(), 1);
        let locations: Vec<_> = workflow
            .step_locations("s1")
            .iter()
            .map(|l| l.name.clone())
            .collect();
        assert_eq!(locations, vec!["l1", "l2"]);
    }
}
