// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-location generation context.
//!
//! The interpreter reports operators as bracketed callbacks. The context turns
//! them back into a tree of [`Fragment`]s with a small stack of open frames, so
//! that rendering can decide which operands become concurrent units and where
//! join barriers go.

use std::collections::BTreeSet;

use proc_macro2::TokenStream;
use swirl_dsl::{Location, Operator};

use crate::error::CodegenError;

/// A piece of the location program, still structured by operator.
#[derive(Debug, Clone)]
pub enum Fragment {
    /// Runs on the current thread until done (an `exec`).
    Blocking(TokenStream),
    /// Only spawns a task into the current task list (a `send` or `recv`).
    Spawning(TokenStream),
    Seq(Vec<Fragment>),
    /// Operands run as concurrent units, followed by a join.
    Par(Vec<Fragment>),
    Paren(Box<Fragment>),
}

impl Fragment {
    /// Whether rendering this fragment may leave spawned tasks unjoined.
    pub fn leaves_tasks(&self) -> bool {
        match self {
            Fragment::Blocking(_) | Fragment::Par(_) | Fragment::Paren(_) => false,
            Fragment::Spawning(_) => true,
            Fragment::Seq(parts) => parts.last().is_some_and(Fragment::leaves_tasks),
        }
    }
}

#[derive(Debug)]
enum Frame {
    Op { op: Operator, operands: Vec<Fragment> },
    Paren { operands: Vec<Fragment> },
}

fn op_name(op: Operator) -> &'static str {
    match op {
        Operator::Par => "par",
        Operator::Seq => "seq",
        Operator::Choice => "choice",
    }
}

/// Everything collected for one location program.
pub struct LocationGen {
    pub location: Location,
    /// `ctx.init_dataset(..)` statements.
    pub dataset: Vec<TokenStream>,
    /// Destinations of `send` predicates.
    pub peers: BTreeSet<String>,
    /// Set once a `recv` is emitted; the program then has to accept peers.
    pub listens: bool,
    frames: Vec<Frame>,
    root: Option<Fragment>,
}

impl LocationGen {
    pub fn new(location: Location) -> Self {
        Self {
            location,
            dataset: Vec::new(),
            peers: BTreeSet::new(),
            listens: false,
            frames: Vec::new(),
            root: None,
        }
    }

    pub fn open(&mut self, op: Operator) {
        self.frames.push(Frame::Op {
            op,
            operands: Vec::new(),
        });
    }

    pub fn open_paren(&mut self) {
        self.frames.push(Frame::Paren {
            operands: Vec::new(),
        });
    }

    /// Mid-marker of a binary operator: exactly the left operand is done.
    pub fn mark(&mut self, op: Operator) -> Result<(), CodegenError> {
        match self.frames.last() {
            Some(Frame::Op { op: open, operands }) if *open == op && operands.len() == 1 => Ok(()),
            _ => Err(CodegenError::Unbalanced(op_name(op))),
        }
    }

    pub fn close(&mut self, op: Operator) -> Result<(), CodegenError> {
        let operands = match self.frames.pop() {
            Some(Frame::Op { op: open, operands }) if open == op && operands.len() == 2 => operands,
            _ => return Err(CodegenError::Unbalanced(op_name(op))),
        };
        let fragment = match op {
            // Nested operands of the same operator join the enclosing group
            // instead of becoming units of their own.
            Operator::Par => Fragment::Par(
                operands
                    .into_iter()
                    .flat_map(|operand| match operand {
                        Fragment::Par(units) => units,
                        other => vec![other],
                    })
                    .collect(),
            ),
            Operator::Seq => Fragment::Seq(
                operands
                    .into_iter()
                    .flat_map(|operand| match operand {
                        Fragment::Seq(parts) => parts,
                        other => vec![other],
                    })
                    .collect(),
            ),
            Operator::Choice => return Err(CodegenError::ChoiceUnsupported),
        };
        self.push(fragment)
    }

    pub fn close_paren(&mut self) -> Result<(), CodegenError> {
        match self.frames.pop() {
            Some(Frame::Paren { mut operands }) if operands.len() == 1 => match operands.pop() {
                Some(inner) => self.push(Fragment::Paren(Box::new(inner))),
                None => Err(CodegenError::Unbalanced("paren")),
            },
            _ => Err(CodegenError::Unbalanced("paren")),
        }
    }

    pub fn push(&mut self, fragment: Fragment) -> Result<(), CodegenError> {
        match self.frames.last_mut() {
            Some(Frame::Op { operands, .. } | Frame::Paren { operands }) => {
                operands.push(fragment);
                Ok(())
            }
            None if self.root.is_none() => {
                self.root = Some(fragment);
                Ok(())
            }
            None => Err(CodegenError::Unbalanced("trace")),
        }
    }

    /// The finished trace, or `None` for a location that only serves data.
    pub fn finish(&mut self) -> Result<Option<Fragment>, CodegenError> {
        match self.frames.last() {
            None => Ok(self.root.take()),
            Some(Frame::Op { op, .. }) => Err(CodegenError::Unbalanced(op_name(*op))),
            Some(Frame::Paren { .. }) => Err(CodegenError::Unbalanced("paren")),
        }
    }
}
