// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SWIRL language definitions.
//!
//! This crate is the shared vocabulary of the SWIRL toolchain:
//! - [`model`]: the workflow graph (data, ports, steps, locations and their edges)
//! - [`metadata`]: the YAML metadata document that accompanies a trace
//! - [`trace`]: the trace AST and its parser
//!
//! A trace describes, per location, the datasets available at start and a
//! process term built from `exec`, `send` and `recv` predicates composed with
//! parallel (`|`), sequential (`.`) and choice (`+`) operators:
//!
//! ```text
//! <l1, {(p1,d1)}, exec(s1,{(p1,d1)}->{(p2,d2)},{l1}).send(d2->p2,l1,l2)> |
//! <l2, {}, recv(p2,l1,l2).exec(s2,{(p2,d2)}->{},{l2})>
//! ```

pub mod error;
pub mod metadata;
pub mod model;
pub mod trace;

pub use error::{ConfigError, ModelError, ParseError};
pub use metadata::{
    ArgumentConfig, DependencyConfig, LocationConfig, Metadata, OutputConfig, StepConfig,
    SUPPORTED_VERSIONS,
};
pub use model::{
    Argument, Connection, Data, DataType, DistributedWorkflow, Edge, Location, Port, Processor,
    Step, Workflow,
};
pub use trace::{
    DataPair, LocationTrace, Operator, Predicate, Trace, WorkflowTrace, parse_workflow,
};
