// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Callback interface driven by the trace interpreter.
//!
//! The interpreter walks a trace depth first and reports its operator
//! structure through these callbacks. Binary operators are bracketed as
//! `begin_X`, left operand, `X`, right operand, `end_X`.

use serde::Serialize;
use swirl_dsl::{Data, DataPair, DataType, DistributedWorkflow, Location, Step};

use crate::error::CodegenError;

/// Consumer of interpreter callbacks. Every method defaults to a no-op.
pub trait Compiler {
    fn begin_workflow(&mut self, _workflow: &DistributedWorkflow) -> Result<(), CodegenError> {
        Ok(())
    }

    fn end_workflow(&mut self) -> Result<(), CodegenError> {
        Ok(())
    }

    fn begin_location(&mut self, _location: &Location) -> Result<(), CodegenError> {
        Ok(())
    }

    fn end_location(&mut self) -> Result<(), CodegenError> {
        Ok(())
    }

    /// `(port, data)` bindings the current location starts with.
    fn begin_dataset(&mut self, _dataset: &[(String, Data)]) -> Result<(), CodegenError> {
        Ok(())
    }

    fn end_dataset(&mut self) -> Result<(), CodegenError> {
        Ok(())
    }

    fn begin_par(&mut self) -> Result<(), CodegenError> {
        Ok(())
    }

    fn par(&mut self) -> Result<(), CodegenError> {
        Ok(())
    }

    fn end_par(&mut self) -> Result<(), CodegenError> {
        Ok(())
    }

    fn begin_seq(&mut self) -> Result<(), CodegenError> {
        Ok(())
    }

    fn seq(&mut self) -> Result<(), CodegenError> {
        Ok(())
    }

    fn end_seq(&mut self) -> Result<(), CodegenError> {
        Ok(())
    }

    fn begin_choice(&mut self) -> Result<(), CodegenError> {
        Ok(())
    }

    fn choice(&mut self) -> Result<(), CodegenError> {
        Ok(())
    }

    fn end_choice(&mut self) -> Result<(), CodegenError> {
        Ok(())
    }

    fn begin_paren(&mut self) -> Result<(), CodegenError> {
        Ok(())
    }

    fn end_paren(&mut self) -> Result<(), CodegenError> {
        Ok(())
    }

    fn exec(
        &mut self,
        _step: &Step,
        _inputs: &[DataPair],
        _outputs: &[DataPair],
        _mapping: &[String],
    ) -> Result<(), CodegenError> {
        Ok(())
    }

    fn send(
        &mut self,
        _data: &str,
        _port: &str,
        _data_type: &DataType,
        _src: &str,
        _dst: &str,
    ) -> Result<(), CodegenError> {
        Ok(())
    }

    fn recv(
        &mut self,
        _port: &str,
        _data_type: &DataType,
        _src: &str,
        _dst: &str,
    ) -> Result<(), CodegenError> {
        Ok(())
    }
}

/// One recorded callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    BeginWorkflow,
    EndWorkflow,
    BeginLocation {
        location: String,
    },
    EndLocation,
    BeginDataset {
        bindings: Vec<(String, String)>,
    },
    EndDataset,
    BeginPar,
    Par,
    EndPar,
    BeginSeq,
    Seq,
    EndSeq,
    BeginChoice,
    Choice,
    EndChoice,
    BeginParen,
    EndParen,
    Exec {
        step: String,
        inputs: Vec<String>,
        outputs: Vec<String>,
        mapping: Vec<String>,
    },
    Send {
        data: String,
        port: String,
        data_type: String,
        src: String,
        dst: String,
    },
    Recv {
        port: String,
        data_type: String,
        src: String,
        dst: String,
    },
}

/// Records the callback sequence instead of generating code.
#[derive(Debug, Default)]
pub struct RecordingCompiler {
    pub events: Vec<Event>,
}

impl RecordingCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&mut self, event: Event) -> Result<(), CodegenError> {
        self.events.push(event);
        Ok(())
    }
}

fn pair_texts(pairs: &[DataPair]) -> Vec<String> {
    pairs.iter().map(ToString::to_string).collect()
}

impl Compiler for RecordingCompiler {
    fn begin_workflow(&mut self, _workflow: &DistributedWorkflow) -> Result<(), CodegenError> {
        self.record(Event::BeginWorkflow)
    }

    fn end_workflow(&mut self) -> Result<(), CodegenError> {
        self.record(Event::EndWorkflow)
    }

    fn begin_location(&mut self, location: &Location) -> Result<(), CodegenError> {
        self.record(Event::BeginLocation {
            location: location.name.clone(),
        })
    }

    fn end_location(&mut self) -> Result<(), CodegenError> {
        self.record(Event::EndLocation)
    }

    fn begin_dataset(&mut self, dataset: &[(String, Data)]) -> Result<(), CodegenError> {
        self.record(Event::BeginDataset {
            bindings: dataset
                .iter()
                .map(|(port, data)| (port.clone(), data.name.clone()))
                .collect(),
        })
    }

    fn end_dataset(&mut self) -> Result<(), CodegenError> {
        self.record(Event::EndDataset)
    }

    fn begin_par(&mut self) -> Result<(), CodegenError> {
        self.record(Event::BeginPar)
    }

    fn par(&mut self) -> Result<(), CodegenError> {
        self.record(Event::Par)
    }

    fn end_par(&mut self) -> Result<(), CodegenError> {
        self.record(Event::EndPar)
    }

    fn begin_seq(&mut self) -> Result<(), CodegenError> {
        self.record(Event::BeginSeq)
    }

    fn seq(&mut self) -> Result<(), CodegenError> {
        self.record(Event::Seq)
    }

    fn end_seq(&mut self) -> Result<(), CodegenError> {
        self.record(Event::EndSeq)
    }

    fn begin_choice(&mut self) -> Result<(), CodegenError> {
        self.record(Event::BeginChoice)
    }

    fn choice(&mut self) -> Result<(), CodegenError> {
        self.record(Event::Choice)
    }

    fn end_choice(&mut self) -> Result<(), CodegenError> {
        self.record(Event::EndChoice)
    }

    fn begin_paren(&mut self) -> Result<(), CodegenError> {
        self.record(Event::BeginParen)
    }

    fn end_paren(&mut self) -> Result<(), CodegenError> {
        self.record(Event::EndParen)
    }

    fn exec(
        &mut self,
        step: &Step,
        inputs: &[DataPair],
        outputs: &[DataPair],
        mapping: &[String],
    ) -> Result<(), CodegenError> {
        self.record(Event::Exec {
            step: step.name.clone(),
            inputs: pair_texts(inputs),
            outputs: pair_texts(outputs),
            mapping: mapping.to_vec(),
        })
    }

    fn send(
        &mut self,
        data: &str,
        port: &str,
        data_type: &DataType,
        src: &str,
        dst: &str,
    ) -> Result<(), CodegenError> {
        self.record(Event::Send {
            data: data.to_string(),
            port: port.to_string(),
            data_type: data_type.to_string(),
            src: src.to_string(),
            dst: dst.to_string(),
        })
    }

    fn recv(
        &mut self,
        port: &str,
        data_type: &DataType,
        src: &str,
        dst: &str,
    ) -> Result<(), CodegenError> {
        self.record(Event::Recv {
            port: port.to_string(),
            data_type: data_type.to_string(),
            src: src.to_string(),
            dst: dst.to_string(),
        })
    }
}
