// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Serializer and DAX translator tests.

use std::fs;
use std::path::Path;

use swirl_compiler::{
    CompileError, CompilerConfig, DaxTranslator, Event, RecordingCompiler, Serializer,
    StepComposition, TranslateError, Translator, compile, compile_files, translate_dir,
};
use swirl_dsl::{
    Argument, ArgumentConfig, ConfigError, Data, DataType, DistributedWorkflow, Location, Metadata,
    Port, Processor, Step,
};
use tempfile::TempDir;

fn location(name: &str, port: u16) -> Location {
    let mut location = Location::new(name, name);
    location.hostname = Some("127.0.0.1".to_string());
    location.port = Some(port);
    location
}

fn stdout() -> Processor {
    Processor {
        data_type: DataType::Stdout,
        glob: None,
    }
}

/// `l0` seeds `d0`; `s1` on `l0` feeds `s2` on `l1`, which feeds `s3` on
/// both `l2` and `l3`. `s3` also reads the seeded `d0`.
fn scattered() -> DistributedWorkflow {
    let mut workflow = DistributedWorkflow::new();
    let mut l0 = location("l0", 35200);
    l0.add_data(Data::new("d0", DataType::Text, Some("test".to_string())));
    workflow.add_location(l0);
    workflow.add_location(location("l1", 35201));
    workflow.add_location(location("l2", 35202));
    workflow.add_location(location("l3", 35203));

    workflow.add_step(
        Step::new("s1", "produce")
            .with_command("echo")
            .with_argument(Argument::Port("p0".into()))
            .with_processor("p1", stdout()),
    );
    workflow.add_step(
        Step::new("s2", "transform")
            .with_command("echo")
            .with_argument(Argument::Literal("-n".into()))
            .with_argument(Argument::Port("p1".into()))
            .with_processor("p2", stdout()),
    );
    workflow.add_step(
        Step::new("s3", "consume")
            .with_command("echo")
            .with_argument(Argument::Port("p2".into())),
    );

    workflow.bind_port("p0", "d0");
    workflow
        .add_input_port("s1", Port::new("p0").with_data("d0"))
        .unwrap();
    workflow
        .add_output_port("s1", Port::new("p1").with_data("d1"))
        .unwrap();
    workflow
        .add_input_port("s2", Port::new("p1").with_data("d1"))
        .unwrap();
    workflow
        .add_output_port("s2", Port::new("p2").with_data("d2"))
        .unwrap();
    workflow
        .add_input_port("s3", Port::new("p0").with_data("d0"))
        .unwrap();
    workflow
        .add_input_port("s3", Port::new("p2").with_data("d2"))
        .unwrap();

    workflow.map("s1", "l0").unwrap();
    workflow.map("s2", "l1").unwrap();
    workflow.map("s3", "l2").unwrap();
    workflow.map("s3", "l3").unwrap();
    workflow
}

/// Two steps on `l0` chained locally, two steps on `l1` both reading the
/// data seeded at `l0`.
fn local_chain() -> DistributedWorkflow {
    let mut workflow = DistributedWorkflow::new();
    let mut l0 = location("l0", 35210);
    l0.add_data(Data::new("d0", DataType::Text, Some("seed".to_string())));
    workflow.add_location(l0);
    workflow.add_location(location("l1", 35211));

    workflow.add_step(Step::new("s1", "first").with_command("echo").with_processor("p1", stdout()));
    workflow.add_step(Step::new("s4", "second").with_command("echo"));
    workflow.add_step(Step::new("s2", "left").with_command("echo"));
    workflow.add_step(Step::new("s5", "right").with_command("echo"));

    workflow.bind_port("p0", "d0");
    for step in ["s1", "s2", "s5"] {
        workflow
            .add_input_port(step, Port::new("p0").with_data("d0"))
            .unwrap();
    }
    workflow
        .add_output_port("s1", Port::new("p1").with_data("d1"))
        .unwrap();
    workflow
        .add_input_port("s4", Port::new("p1").with_data("d1"))
        .unwrap();

    workflow.map("s1", "l0").unwrap();
    workflow.map("s4", "l0").unwrap();
    workflow.map("s2", "l1").unwrap();
    workflow.map("s5", "l1").unwrap();
    workflow
}

fn block<'a>(trace: &'a str, location: &str) -> &'a str {
    let start = trace.find(&format!("<{location},")).unwrap();
    let rest = &trace[start..];
    // `->` inside predicates is not the closing bracket.
    let (end, _) = rest
        .match_indices('>')
        .find(|(i, _)| matches!(rest.as_bytes().get(i + 1), Some(b' ' | b'\n') | None))
        .unwrap();
    &rest[..=end]
}

#[test]
fn test_serialize_scattered_workflow() {
    let serialized = Serializer::default().serialize(&scattered());
    let trace = &serialized.trace;

    assert_eq!(
        block(trace, "l0"),
        "<l0, {(p0,d0)},\n\t(send(d0->p0,l0,l2) | send(d0->p0,l0,l3)) | \
         (exec(s1,{(p0,d0)}->{(p1,d1)},{l0}).(send(d1->p1,l0,l1)))>"
    );
    assert_eq!(
        block(trace, "l1"),
        "<l1, {},\n\t((recv(p1,l0,l1)).exec(s2,{(p1,d1)}->{(p2,d2)},{l1})\
         .(send(d2->p2,l1,l2) | send(d2->p2,l1,l3)))>"
    );
    assert_eq!(
        block(trace, "l2"),
        "<l2, {},\n\t((recv(p0,l0,l2) | recv(p2,l1,l2)).exec(s3,{(p0,d0),(p2,d2)}->{},{l2,l3}))>"
    );
    assert!(block(trace, "l3").contains("recv(p2,l1,l3)"));
    assert!(trace.ends_with(">\n"));
}

#[test]
fn test_serialized_metadata() {
    let metadata = Serializer::default().serialize(&scattered()).metadata;

    let seeded = &metadata.dependencies["d0"];
    assert_eq!(seeded.data_type, DataType::Text);
    assert_eq!(seeded.value.as_deref(), Some("test"));
    let produced = &metadata.dependencies["d1"];
    assert_eq!(produced.data_type, DataType::Stdout);
    assert!(produced.value.is_none());

    let s2 = &metadata.steps["s2"];
    assert_eq!(s2.display_name, "transform");
    assert_eq!(
        s2.arguments,
        vec![
            ArgumentConfig::Value { value: "-n".into() },
            ArgumentConfig::ValueFrom {
                value_from: "p1".into()
            },
        ]
    );
    assert_eq!(s2.outputs["p2"].data_name, "d2");
    assert_eq!(metadata.locations["l3"].port, Some(35203));
}

#[test]
fn test_serialized_workflow_round_trips() {
    let serialized = Serializer::default().serialize(&scattered());
    let metadata = Metadata::from_yaml(&serialized.metadata.to_yaml().unwrap()).unwrap();

    let mut recorder = RecordingCompiler::new();
    let workflow = compile(&serialized.trace, &metadata, &mut recorder).unwrap();
    assert_eq!(workflow.steps.len(), 3);
    assert_eq!(workflow.step_locations("s3").len(), 2);

    let recv_types: Vec<(String, String)> = recorder
        .events
        .iter()
        .filter_map(|event| match event {
            Event::Recv { port, data_type, .. } => Some((port.clone(), data_type.clone())),
            _ => None,
        })
        .collect();
    assert!(recv_types.contains(&("p0".to_string(), "string".to_string())));
    assert!(recv_types.contains(&("p1".to_string(), "stdout".to_string())));
    assert!(recv_types.contains(&("p2".to_string(), "stdout".to_string())));
}

const PIPELINE_METADATA: &str = r#"
version: v1.0
steps:
  s1:
    displayName: count
    command: wc
    arguments:
      - value: -l
      - valueFrom: p1
    outputs:
      p2:
        dataName: d2
  s2:
    displayName: show
    command: echo
    arguments:
      - value: counted
      - valueFrom: p2
    outputs:
      p3:
        dataName: d3
locations:
  l1:
    hostname: 127.0.0.1
    port: 35101
  l2:
    hostname: 127.0.0.1
    port: 35102
dependencies:
  d1:
    type: file
    value: input.txt
  d2:
    type: stdout
  d3:
    type: stdout
"#;

const PIPELINE: &str = "<l1, {(p1,d1)}, exec(s1,{(p1,d1)}->{(p2,d2)},{l1}).send(d2->p2,l1,l2)> |
<l2, {}, recv(p2,l1,l2).exec(s2,{(p2,d2)}->{(p3,d3)},{l2})>";

#[test]
fn test_compiled_workflow_keeps_its_dependencies() {
    let original = Metadata::from_yaml(PIPELINE_METADATA).unwrap();
    let mut recorder = RecordingCompiler::new();
    let workflow = compile(PIPELINE, &original, &mut recorder).unwrap();

    let serialized = Serializer::default().serialize(&workflow);
    for (name, dependency) in &original.dependencies {
        assert_eq!(
            serialized.metadata.dependencies.get(name),
            Some(dependency),
            "dependency {name}"
        );
    }
    assert_eq!(
        serialized.metadata.dependencies["d1"].value.as_deref(),
        Some("input.txt")
    );

    // The regenerated pair is a valid input again.
    let metadata = Metadata::from_yaml(&serialized.metadata.to_yaml().unwrap()).unwrap();
    let again = compile(&serialized.trace, &metadata, &mut RecordingCompiler::new()).unwrap();
    assert_eq!(again.steps.len(), 2);
    assert_eq!(again.locations.len(), 2);
}

#[test]
fn test_serialized_workflow_compiles() {
    let serialized = Serializer::default().serialize(&scattered());
    let dir = TempDir::new().unwrap();
    let mut target = swirl_compiler::DefaultTarget::new(
        CompilerConfig::default()
            .with_output_dir(dir.path())
            .with_format(false)
            .with_runtime_dir(dir.path()),
    );
    compile(&serialized.trace, &serialized.metadata, &mut target).unwrap();
    for location in ["l0", "l1", "l2", "l3"] {
        let source = fs::read_to_string(dir.path().join(format!("{location}.rs"))).unwrap();
        syn::parse_file(&source).unwrap();
    }
}

#[test]
fn test_recv_is_requested_once_per_location() {
    let trace = Serializer::default().serialize(&local_chain()).trace;
    let l1 = block(&trace, "l1");
    assert_eq!(l1.matches("recv(p0,l0,l1)").count(), 1);
    assert_eq!(l1.matches("exec(").count(), 2);
}

#[test]
fn test_sequential_composition() {
    let parallel = Serializer::new(StepComposition::Parallel).serialize(&local_chain());
    assert_eq!(
        block(&parallel.trace, "l0"),
        "<l0, {(p0,d0)},\n\t(send(d0->p0,l0,l1)) | \
         (exec(s1,{(p0,d0)}->{(p1,d1)},{l0})) | (exec(s4,{(p1,d1)}->{},{l0}))>"
    );

    let sequential = Serializer::new(StepComposition::Sequential).serialize(&local_chain());
    assert_eq!(
        block(&sequential.trace, "l0"),
        "<l0, {(p0,d0)},\n\t(send(d0->p0,l0,l1)) | \
         ((exec(s1,{(p0,d0)}->{(p1,d1)},{l0})).(exec(s4,{(p1,d1)}->{},{l0})))>"
    );
    // Both compositions describe the same workflow.
    let mut recorder = RecordingCompiler::new();
    compile(&sequential.trace, &sequential.metadata, &mut recorder).unwrap();
}

const DAX_WORKFLOW: &str = r#"
pegasus: 5.0.4
jobs:
  - id: ID0000001
    name: preprocess
    arguments: [-i, f.a, -o, f.b]
    uses:
      - lfn: f.a
        type: input
      - lfn: f.b
        type: output
        stageOut: true
  - id: ID0000002
    name: analyze
    arguments: [-i, f.b, -o, f.c]
    uses:
      - lfn: f.b
        type: input
      - lfn: f.c
        type: output
        stageOut: false
"#;

const DAX_SITES: &str = r#"
pegasus: 5.0.4
sites:
  - name: local
    directories:
      - type: sharedScratch
        path: /scratch
      - type: localStorage
        path: /storage
  - name: condorpool
    hostname: 10.0.0.2
    port: 9000
    connectionType: docker
"#;

const DAX_REPLICAS: &str = r#"
pegasus: 5.0.4
replicas:
  - lfn: f.a
    pfns:
      - site: local
        pfn: /data/f.a
  - lfn: f.z
    pfns:
      - site: local
        pfn: /data/f.z
"#;

const DAX_TRANSFORMATIONS: &str = r#"
pegasus: 5.0.4
transformations:
  - name: preprocess
    sites:
      - name: local
        pfn: /usr/bin/preprocess
  - name: analyze
    sites:
      - name: condorpool
        pfn: /usr/bin/analyze
  - name: unused
    sites:
      - name: local
        pfn: /usr/bin/unused
"#;

fn dax_bundle(dir: &Path) {
    fs::write(dir.join("workflow.yml"), DAX_WORKFLOW).unwrap();
    fs::write(dir.join("sites.yml"), DAX_SITES).unwrap();
    fs::write(dir.join("replicas.yml"), DAX_REPLICAS).unwrap();
    fs::write(dir.join("transformations.yml"), DAX_TRANSFORMATIONS).unwrap();
}

#[test]
fn test_dax_model() {
    let dir = TempDir::new().unwrap();
    dax_bundle(dir.path());
    let workflow = DaxTranslator::new(dir.path())
        .unwrap()
        .translate_workflow()
        .unwrap();

    // Two jobs plus the collector of the staged-out f.b.
    assert_eq!(workflow.steps.len(), 3);
    let preprocess = &workflow.steps["s0"];
    assert_eq!(preprocess.display_name, "preprocess");
    assert_eq!(preprocess.command.as_deref(), Some("/usr/bin/preprocess"));
    assert_eq!(preprocess.processors["p0"].data_type, DataType::File);
    assert_eq!(preprocess.processors["p0"].glob.as_deref(), Some("f.b"));

    let collector = &workflow.steps["s1"];
    assert_eq!(collector.display_name, "preprocess-d1-collector");
    assert_eq!(collector.command.as_deref(), Some("cp"));
    assert_eq!(
        collector.arguments,
        vec![
            Argument::Literal("-r".into()),
            Argument::Port("p0".into()),
            Argument::Literal("/storage".into()),
        ]
    );

    let local = workflow.location("l0").unwrap();
    assert_eq!(local.display_name, "local");
    assert_eq!(local.hostname.as_deref(), Some("127.0.0.1"));
    assert_eq!(local.port, Some(35050));
    assert_eq!(local.connection_type.as_deref(), Some("ssh"));
    assert_eq!(local.workdir.as_deref(), Some("/scratch"));
    assert_eq!(local.data["d0"].value.as_deref(), Some("/data/f.a"));
    assert_eq!(local.data.len(), 1);

    let pool = workflow.location("l1").unwrap();
    assert_eq!(pool.connection_type.as_deref(), Some("docker"));
    assert_eq!(pool.port, Some(9000));

    let placed: Vec<&str> = workflow
        .location_steps("l0")
        .into_iter()
        .map(|step| step.name.as_str())
        .collect();
    assert_eq!(placed, vec!["s0", "s1"]);
    assert_eq!(workflow.step_locations("s2")[0].name, "l1");
}

#[test]
fn test_dax_translate_and_compile() {
    let bundle = TempDir::new().unwrap();
    dax_bundle(bundle.path());
    let out = TempDir::new().unwrap();

    let serialized =
        translate_dir("dax", bundle.path(), out.path(), &Serializer::default()).unwrap();
    assert!(serialized.trace.contains("send(d1->p0,l0,l1)"));
    assert!(serialized.trace.contains("recv(p0,l0,l1)"));

    let trace = out.path().join("workflow.swirl");
    let metadata = out.path().join("metadata.yml");
    assert_eq!(fs::read_to_string(&trace).unwrap(), serialized.trace);
    assert_eq!(Metadata::from_file(&metadata).unwrap(), serialized.metadata);

    let build = out.path().join("build");
    let config = CompilerConfig::default()
        .with_output_dir(&build)
        .with_format(false);
    compile_files(&trace, &metadata, "default", config).unwrap();

    let script = fs::read_to_string(build.join("run.sh")).unwrap();
    assert!(script.contains("scp \"$SCRIPT_DIR/l0\" 127.0.0.1:/scratch &"));
    assert!(script.contains("docker cp \"$SCRIPT_DIR/l1\" 10.0.0.2:. &"));
    assert!(script.contains("docker exec --workdir . 10.0.0.2 sh -c \"./l1\" &"));
    syn::parse_file(&fs::read_to_string(build.join("l1.rs")).unwrap()).unwrap();
}

#[test]
fn test_unsupported_language() {
    let dir = TempDir::new().unwrap();
    let err = translate_dir("cwl", dir.path(), dir.path(), &Serializer::default()).unwrap_err();
    assert!(matches!(
        err,
        CompileError::Translate(TranslateError::Config(ConfigError::UnsupportedLanguage(ref l)))
            if l == "cwl"
    ));
}
