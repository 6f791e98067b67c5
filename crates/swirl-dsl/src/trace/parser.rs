// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pest front end turning trace text into the AST.

use pest::Parser;
use pest::iterators::{Pair, Pairs};
use pest_derive::Parser;

use super::{DataPair, LocationTrace, Operator, Predicate, Trace, WorkflowTrace};
use crate::error::ParseError;

#[derive(Parser)]
#[grammar = "trace/swirl.pest"]
struct TraceParser;

impl From<pest::error::Error<Rule>> for ParseError {
    fn from(err: pest::error::Error<Rule>) -> Self {
        ParseError::Syntax(err.to_string())
    }
}

type ParseResult<T> = Result<T, ParseError>;

/// Parse a whole workflow trace.
pub fn parse_workflow(source: &str) -> ParseResult<WorkflowTrace> {
    let mut pairs = TraceParser::parse(Rule::workflow, source)?;
    let workflow = next(&mut pairs, "workflow")?;
    let locations = workflow
        .into_inner()
        .filter(|pair| pair.as_rule() == Rule::location)
        .map(build_location)
        .collect::<ParseResult<Vec<_>>>()?;
    Ok(WorkflowTrace { locations })
}

fn next<'i>(pairs: &mut Pairs<'i, Rule>, rule: &'static str) -> ParseResult<Pair<'i, Rule>> {
    pairs.next().ok_or(ParseError::Malformed { rule })
}

fn next_id(pairs: &mut Pairs<'_, Rule>, rule: &'static str) -> ParseResult<String> {
    Ok(next(pairs, rule)?.as_str().to_string())
}

fn build_location(pair: Pair<'_, Rule>) -> ParseResult<LocationTrace> {
    let mut inner = pair.into_inner();
    let name = next_id(&mut inner, "location")?;
    let dataset = build_dataset(next(&mut inner, "location")?)?;
    let trace = inner.next().map(build_trace).transpose()?;
    Ok(LocationTrace {
        name,
        dataset,
        trace,
    })
}

fn build_dataset(pair: Pair<'_, Rule>) -> ParseResult<Vec<DataPair>> {
    pair.into_inner()
        .map(|pair| {
            let mut inner = pair.into_inner();
            let port = next_id(&mut inner, "pair")?;
            let data = next_id(&mut inner, "pair")?;
            Ok(DataPair { port, data })
        })
        .collect()
}

/// Operators share one precedence level and associate to the left.
fn build_trace(pair: Pair<'_, Rule>) -> ParseResult<Trace> {
    let mut inner = pair.into_inner();
    let mut trace = build_term(next(&mut inner, "trace")?)?;
    while let Some(op) = inner.next() {
        let op = match op.as_rule() {
            Rule::par => Operator::Par,
            Rule::seq => Operator::Seq,
            Rule::choice => Operator::Choice,
            _ => return Err(ParseError::Malformed { rule: "operator" }),
        };
        let right = build_term(next(&mut inner, "trace")?)?;
        trace = Trace::op(op, trace, right);
    }
    Ok(trace)
}

fn build_term(pair: Pair<'_, Rule>) -> ParseResult<Trace> {
    match pair.as_rule() {
        Rule::paren => {
            let mut inner = pair.into_inner();
            Ok(Trace::paren(build_trace(next(&mut inner, "paren")?)?))
        }
        Rule::exec => {
            let mut inner = pair.into_inner();
            let step = next_id(&mut inner, "exec")?;
            let inputs = build_dataset(next(&mut inner, "exec")?)?;
            let outputs = build_dataset(next(&mut inner, "exec")?)?;
            let mapping = next(&mut inner, "exec")?
                .into_inner()
                .map(|id| id.as_str().to_string())
                .collect();
            Ok(Trace::Predicate(Predicate::Exec {
                step,
                inputs,
                outputs,
                mapping,
            }))
        }
        Rule::send => {
            let mut inner = pair.into_inner();
            Ok(Trace::Predicate(Predicate::Send {
                data: next_id(&mut inner, "send")?,
                port: next_id(&mut inner, "send")?,
                src: next_id(&mut inner, "send")?,
                dst: next_id(&mut inner, "send")?,
            }))
        }
        Rule::recv => {
            let mut inner = pair.into_inner();
            Ok(Trace::Predicate(Predicate::Recv {
                port: next_id(&mut inner, "recv")?,
                src: next_id(&mut inner, "recv")?,
                dst: next_id(&mut inner, "recv")?,
            }))
        }
        _ => Err(ParseError::Malformed { rule: "term" }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recv(port: &str) -> Trace {
        Trace::Predicate(Predicate::Recv {
            port: port.into(),
            src: "a".into(),
            dst: "b".into(),
        })
    }

    #[test]
    fn test_operators_associate_left() {
        let workflow = parse_workflow("<b, {}, recv(p1,a,b) | recv(p2,a,b) . recv(p3,a,b)>").unwrap();
        let expected = Trace::op(
            Operator::Seq,
            Trace::op(Operator::Par, recv("p1"), recv("p2")),
            recv("p3"),
        );
        assert_eq!(workflow.locations[0].trace, Some(expected));
    }

    #[test]
    fn test_parenthesized_group() {
        let workflow = parse_workflow("<b, {}, recv(p1,a,b).(recv(p2,a,b) | recv(p3,a,b))>").unwrap();
        let expected = Trace::op(
            Operator::Seq,
            recv("p1"),
            Trace::paren(Trace::op(Operator::Par, recv("p2"), recv("p3"))),
        );
        assert_eq!(workflow.locations[0].trace, Some(expected));
    }

    #[test]
    fn test_exec_with_empty_sets() {
        let workflow = parse_workflow("<l, {}, exec(s1,{}->{},{})>").unwrap();
        assert_eq!(
            workflow.locations[0].trace,
            Some(Trace::Predicate(Predicate::Exec {
                step: "s1".into(),
                inputs: vec![],
                outputs: vec![],
                mapping: vec![],
            }))
        );
    }

    #[test]
    fn test_syntax_error_reports_position() {
        let err = parse_workflow("<l, {}, exec(s1)>").unwrap_err();
        match err {
            ParseError::Syntax(message) => assert!(message.contains("1:")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
