// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Trace AST.
//!
//! Each type renders back to canonical trace text through `Display`.

mod parser;

use std::fmt;

pub use parser::parse_workflow;

/// A `(port,data)` binding.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DataPair {
    pub port: String,
    pub data: String,
}

impl DataPair {
    pub fn new(port: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            data: data.into(),
        }
    }
}

impl fmt::Display for DataPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.port, self.data)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Par,
    Seq,
    Choice,
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operator::Par => " | ",
            Operator::Seq => ".",
            Operator::Choice => " + ",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Exec {
        step: String,
        inputs: Vec<DataPair>,
        outputs: Vec<DataPair>,
        mapping: Vec<String>,
    },
    Send {
        data: String,
        port: String,
        src: String,
        dst: String,
    },
    Recv {
        port: String,
        src: String,
        dst: String,
    },
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Exec {
                step,
                inputs,
                outputs,
                mapping,
            } => write!(
                f,
                "exec({step},{{{}}}->{{{}}},{{{}}})",
                join(inputs, ","),
                join(outputs, ","),
                mapping.join(",")
            ),
            Predicate::Send {
                data,
                port,
                src,
                dst,
            } => write!(f, "send({data}->{port},{src},{dst})"),
            Predicate::Recv { port, src, dst } => write!(f, "recv({port},{src},{dst})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trace {
    Predicate(Predicate),
    Op {
        op: Operator,
        left: Box<Trace>,
        right: Box<Trace>,
    },
    Paren(Box<Trace>),
}

impl Trace {
    pub fn op(op: Operator, left: Trace, right: Trace) -> Self {
        Trace::Op {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn paren(inner: Trace) -> Self {
        Trace::Paren(Box::new(inner))
    }

    /// Fold `terms` left to right with `op`; `None` when there are no terms.
    pub fn fold(op: Operator, terms: impl IntoIterator<Item = Trace>) -> Option<Self> {
        terms
            .into_iter()
            .reduce(|left, right| Trace::op(op, left, right))
    }
}

impl From<Predicate> for Trace {
    fn from(predicate: Predicate) -> Self {
        Trace::Predicate(predicate)
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trace::Predicate(p) => p.fmt(f),
            Trace::Op { op, left, right } => write!(f, "{left}{op}{right}"),
            Trace::Paren(inner) => write!(f, "({inner})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationTrace {
    pub name: String,
    pub dataset: Vec<DataPair>,
    pub trace: Option<Trace>,
}

impl fmt::Display for LocationTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}, {{{}}}, ", self.name, join(&self.dataset, ","))?;
        if let Some(trace) = &self.trace {
            write!(f, "{trace}")?;
        }
        f.write_str(">")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowTrace {
    pub locations: Vec<LocationTrace>,
}

impl fmt::Display for WorkflowTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&join(&self.locations, " |\n"))
    }
}

fn join<T: fmt::Display>(items: &[T], separator: &str) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(separator)
}
