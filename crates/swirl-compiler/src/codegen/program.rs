// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Program assembly for location programs.
//!
//! A location program is a single Rust source file linked against the
//! `swirl_runtime` crate: the location constants, `main`, and the `execute`
//! function holding the rendered trace. Every statement runs with `ctx` (the shared
//! `LocationContext`) and `tasks` (tasks spawned since the last join) in scope.

use proc_macro2::TokenStream;
use quote::quote;
use swirl_dsl::{Argument, DataPair, DataType, Location, Step};

use super::context::{Fragment, LocationGen};
use crate::error::CodegenError;

/// Lints the generated code trips without consequence.
const ALLOWED_LINTS: &str =
    "#![allow(dead_code, unused_imports, unused_mut, unused_variables, clippy::all)]";

fn data_type_tokens(port: &str, data_type: &DataType) -> Result<TokenStream, CodegenError> {
    match data_type {
        DataType::Stdout => Ok(quote!(swirl_runtime::DataType::Stdout)),
        DataType::File => Ok(quote!(swirl_runtime::DataType::File)),
        DataType::Directory => Ok(quote!(swirl_runtime::DataType::Directory)),
        DataType::Text => Ok(quote!(swirl_runtime::DataType::Text)),
        DataType::Other(name) => Err(CodegenError::UnsupportedDataType {
            port: port.to_string(),
            data_type: name.clone(),
        }),
    }
}

/// Like [`data_type_tokens`], restricted to the types that can cross locations.
fn transfer_type_tokens(port: &str, data_type: &DataType) -> Result<TokenStream, CodegenError> {
    if *data_type == DataType::Directory {
        return Err(CodegenError::DirectoryTransfer {
            port: port.to_string(),
        });
    }
    data_type_tokens(port, data_type)
}

/// Seed `port` with `value` before the trace starts.
pub fn emit_dataset_entry(
    port: &str,
    data_type: &DataType,
    value: &str,
) -> Result<TokenStream, CodegenError> {
    let data_type = data_type_tokens(port, data_type)?;
    Ok(quote! {
        ctx.init_dataset(#port, #data_type, #value);
    })
}

/// Blocking `exec` of `step` with the ports bound by one trace predicate.
pub fn emit_exec(
    step: &Step,
    inputs: &[DataPair],
    outputs: &[DataPair],
) -> Result<Fragment, CodegenError> {
    let command = step
        .command
        .as_deref()
        .ok_or_else(|| CodegenError::MissingCommand(step.name.clone()))?;

    // File artifacts are told apart by glob only.
    let mut artifacts: Vec<(&str, &str)> = Vec::new();
    let mut output_specs = Vec::with_capacity(outputs.len());
    for pair in outputs {
        let processor =
            step.processors
                .get(&pair.port)
                .ok_or_else(|| CodegenError::MissingProcessor {
                    step: step.name.clone(),
                    port: pair.port.clone(),
                })?;
        let data_type = data_type_tokens(&pair.port, &processor.data_type)?;
        let glob = match processor.data_type {
            DataType::File | DataType::Directory => {
                let glob = processor.glob.as_deref().unwrap_or("*");
                let clashing: Vec<String> = artifacts
                    .iter()
                    .filter(|(_, other)| *other == glob)
                    .map(|(port, _)| port.to_string())
                    .collect();
                if !clashing.is_empty() {
                    let mut ports = clashing;
                    ports.push(pair.port.clone());
                    return Err(CodegenError::AmbiguousArtifact {
                        step: step.name.clone(),
                        glob: glob.to_string(),
                        ports,
                    });
                }
                artifacts.push((pair.port.as_str(), glob));
                quote!(Some(#glob))
            }
            _ => quote!(None),
        };
        let port = &pair.port;
        output_specs.push(quote! {
            swirl_runtime::Output {
                port: #port,
                data_type: #data_type,
                glob: #glob,
            }
        });
    }

    let arguments = step.arguments.iter().map(|argument| match argument {
        Argument::Literal(value) => quote!(swirl_runtime::Arg::Literal(#value)),
        Argument::Port(port) => quote!(swirl_runtime::Arg::Port(#port)),
    });
    let input_ports = inputs.iter().map(|pair| pair.port.as_str());
    let name = &step.name;
    let display_name = &step.display_name;

    Ok(Fragment::Blocking(quote! {
        ctx.exec(&swirl_runtime::ExecSpec {
            step: #name,
            display_name: #display_name,
            command: #command,
            inputs: &[#(#input_ports),*],
            arguments: &[#(#arguments),*],
            outputs: &[#(#output_specs),*],
        })?;
    }))
}

pub fn emit_send(port: &str, data_type: &DataType, dst: &str) -> Result<Fragment, CodegenError> {
    let data_type = transfer_type_tokens(port, data_type)?;
    Ok(Fragment::Spawning(quote! {
        tasks.push(ctx.spawn_send(#port, #data_type, #dst));
    }))
}

pub fn emit_recv(port: &str, data_type: &DataType, src: &str) -> Result<Fragment, CodegenError> {
    let data_type = transfer_type_tokens(port, data_type)?;
    Ok(Fragment::Spawning(quote! {
        tasks.push(ctx.spawn_recv(#port, #data_type, #src));
    }))
}

fn join_pending() -> TokenStream {
    quote! {
        swirl_runtime::join_all(std::mem::take(&mut tasks))?;
    }
}

/// Run `body` as one concurrent unit with its own task list.
fn spawn_unit(body: TokenStream) -> TokenStream {
    quote! {
        tasks.push(ctx.spawn({
            let ctx = std::sync::Arc::clone(ctx);
            move || -> Result<(), swirl_runtime::RuntimeError> {
                let ctx = &ctx;
                let mut tasks: Vec<swirl_runtime::Task> = Vec::new();
                #body
                swirl_runtime::join_all(tasks)
            }
        }));
    }
}

/// Statements realizing `fragment`.
pub fn render(fragment: &Fragment) -> TokenStream {
    match fragment {
        Fragment::Blocking(tokens) | Fragment::Spawning(tokens) => tokens.clone(),
        Fragment::Seq(parts) => {
            let mut out = TokenStream::new();
            for (i, part) in parts.iter().enumerate() {
                if i > 0 {
                    out.extend(join_pending());
                }
                out.extend(render(part));
            }
            out
        }
        Fragment::Par(units) => {
            let mut out = TokenStream::new();
            for unit in units {
                match unit {
                    // Transfers are tasks already.
                    Fragment::Spawning(tokens) => out.extend(tokens.clone()),
                    other => out.extend(spawn_unit(render(other))),
                }
            }
            out.extend(join_pending());
            out
        }
        Fragment::Paren(inner) => {
            let mut out = render(inner);
            if inner.leaves_tasks() {
                out.extend(join_pending());
            }
            out
        }
    }
}

/// One row of the static address table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub location: String,
    pub hostname: String,
    pub port: u16,
}

impl Address {
    pub fn of(location: &Location) -> Result<Self, CodegenError> {
        match (&location.hostname, location.port) {
            (Some(hostname), Some(port)) => Ok(Self {
                location: location.name.clone(),
                hostname: hostname.clone(),
                port,
            }),
            _ => Err(CodegenError::MissingAddress(location.name.clone())),
        }
    }
}

/// Complete source text of one location program.
pub fn emit_program(
    generator: &LocationGen,
    body: Option<&Fragment>,
    workdir: &str,
    addresses: &[Address],
) -> String {
    let location = generator.location.name.as_str();
    let names = addresses.iter().map(|a| a.location.as_str());
    let hosts = addresses.iter().map(|a| a.hostname.as_str());
    let ports = addresses.iter().map(|a| a.port);
    let dataset = &generator.dataset;
    let body = body.map(render).unwrap_or_default();

    let run = if generator.listens {
        quote! {
            fn run(ctx: &std::sync::Arc<swirl_runtime::LocationContext>) -> Result<(), swirl_runtime::RuntimeError> {
                let listener = ctx.listen()?;
                let result = execute(ctx);
                ctx.shutdown();
                swirl_runtime::join_all(vec![listener])?;
                result
            }
        }
    } else {
        quote! {
            fn run(ctx: &std::sync::Arc<swirl_runtime::LocationContext>) -> Result<(), swirl_runtime::RuntimeError> {
                let result = execute(ctx);
                ctx.shutdown();
                result
            }
        }
    };

    let tokens = quote! {
        const LOCATION: &str = #location;
        const WORKDIR: &str = #workdir;
        const ADDRESSES: &[(&str, &str, u16)] = &[#((#names, #hosts, #ports)),*];

        fn main() -> std::process::ExitCode {
            swirl_runtime::init_subscriber();
            let ctx = swirl_runtime::LocationContext::new(LOCATION, WORKDIR, ADDRESSES);
            match run(&ctx) {
                Ok(()) => {
                    swirl_runtime::tracing::info!(location = LOCATION, "Location completed");
                    std::process::ExitCode::SUCCESS
                }
                Err(err) => {
                    swirl_runtime::tracing::error!(location = LOCATION, error = %err, "Location failed");
                    std::process::ExitCode::FAILURE
                }
            }
        }

        #run

        fn execute(ctx: &std::sync::Arc<swirl_runtime::LocationContext>) -> Result<(), swirl_runtime::RuntimeError> {
            #(#dataset)*
            let mut tasks: Vec<swirl_runtime::Task> = Vec::new();
            #body
            swirl_runtime::join_all(tasks)
        }
    };

    format!(
        "// Generated by swirlc for location {location} ({}). Do not edit.\n\
         {ALLOWED_LINTS}\n\n\
         {tokens}\n",
        generator.location.display_name,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use swirl_dsl::Processor;

    fn step() -> Step {
        Step::new("s1", "tool")
            .with_command("tool")
            .with_argument(Argument::Literal("-v".into()))
            .with_argument(Argument::Port("p1".into()))
            .with_argument(Argument::Literal("--out".into()))
    }

    fn file(glob: &str) -> Processor {
        Processor {
            data_type: DataType::File,
            glob: Some(glob.to_string()),
        }
    }

    #[test]
    fn test_exec_keeps_argument_order() {
        let fragment = emit_exec(&step(), &[DataPair::new("p1", "d1")], &[]).unwrap();
        let Fragment::Blocking(tokens) = fragment else {
            panic!("exec must block");
        };
        let code = tokens.to_string();
        let literal = code.find("Arg :: Literal (\"-v\")").unwrap();
        let port = code.find("Arg :: Port (\"p1\")").unwrap();
        let last = code.find("Arg :: Literal (\"--out\")").unwrap();
        assert!(literal < port && port < last);
    }

    #[test]
    fn test_exec_ambiguous_artifact() {
        let step = step()
            .with_processor("p2", file("*.out"))
            .with_processor("p3", file("*.out"));
        let err = emit_exec(
            &step,
            &[DataPair::new("p1", "d1")],
            &[DataPair::new("p2", "d2"), DataPair::new("p3", "d3")],
        )
        .unwrap_err();
        match err {
            CodegenError::AmbiguousArtifact { step, glob, ports } => {
                assert_eq!(step, "s1");
                assert_eq!(glob, "*.out");
                assert_eq!(ports, vec!["p2", "p3"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_exec_missing_processor_and_command() {
        let err = emit_exec(&step(), &[], &[DataPair::new("p9", "d9")]).unwrap_err();
        assert!(matches!(err, CodegenError::MissingProcessor { ref port, .. } if port == "p9"));

        let err = emit_exec(&Step::new("s2", "none"), &[], &[]).unwrap_err();
        assert!(matches!(err, CodegenError::MissingCommand(ref s) if s == "s2"));
    }

    #[test]
    fn test_transfer_rejects_directory_and_unknown_types() {
        assert!(matches!(
            emit_send("p1", &DataType::Directory, "l2"),
            Err(CodegenError::DirectoryTransfer { .. })
        ));
        assert!(matches!(
            emit_recv("p1", &DataType::Other("blob".into()), "l1"),
            Err(CodegenError::UnsupportedDataType { ref data_type, .. }) if data_type == "blob"
        ));
        assert!(matches!(
            emit_send("p1", &DataType::Text, "l2"),
            Ok(Fragment::Spawning(_))
        ));
    }

    #[test]
    fn test_seq_joins_between_operands() {
        let send = emit_send("p1", &DataType::File, "l2").unwrap();
        let exec = emit_exec(&step(), &[DataPair::new("p1", "d1")], &[]).unwrap();
        let code = render(&Fragment::Seq(vec![send, exec])).to_string();
        let spawn = code.find("spawn_send").unwrap();
        let join = code.find("join_all").unwrap();
        let run = code.find("ctx . exec").unwrap();
        assert!(spawn < join && join < run);
    }

    #[test]
    fn test_par_spawns_blocking_units() {
        let exec = emit_exec(&step(), &[], &[]).unwrap();
        let recv = emit_recv("p1", &DataType::Stdout, "l2").unwrap();
        let code = render(&Fragment::Par(vec![exec, recv])).to_string();
        assert_eq!(code.matches("ctx . spawn (").count(), 1);
        assert_eq!(code.matches("spawn_recv").count(), 1);
        assert!(code.trim_end().ends_with("join_all (std :: mem :: take (& mut tasks)) ? ;"));
    }

    #[test]
    fn test_address_requires_hostname_and_port() {
        let mut location = Location::new("l1", "l1");
        location.port = Some(9000);
        assert!(matches!(
            Address::of(&location),
            Err(CodegenError::MissingAddress(ref l)) if l == "l1"
        ));
        location.hostname = Some("10.0.0.1".into());
        assert_eq!(Address::of(&location).unwrap().port, 9000);
    }
}
