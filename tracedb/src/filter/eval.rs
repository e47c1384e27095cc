// Copyright (C) 2025 Category Labs, Inc.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use protocol::ArgValue;
use regex::{Regex, RegexBuilder};

use super::parser::{AccessKey, Clause, FilterExpr, Literal, Op, Operand, Reference, TypeQuery};
use super::FilterError;
use crate::event::Event;
use crate::event_type::EventType;

#[derive(Debug)]
pub(crate) struct CompiledFilter {
    type_matcher: TypeMatcher,
    clauses: Option<Vec<CompiledClause>>,
    time_range: (f64, f64),
}

impl CompiledFilter {
    pub(crate) fn compile(expr: FilterExpr) -> Result<Self, FilterError> {
        let type_matcher = match expr.type_query {
            TypeQuery::Substring { value } => TypeMatcher::Substring(value.to_lowercase()),
            TypeQuery::Regex { value, flags } => TypeMatcher::Regex(build_regex(&value, &flags)?),
        };
        let clauses = expr
            .arg_query
            .map(|clauses| {
                clauses
                    .into_iter()
                    .map(CompiledClause::compile)
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?;
        Ok(CompiledFilter {
            type_matcher,
            clauses,
            time_range: expr.time_range.unwrap_or((f64::NEG_INFINITY, f64::INFINITY)),
        })
    }

    pub(crate) fn time_range(&self) -> (f64, f64) {
        self.time_range
    }

    pub(crate) fn has_argument_query(&self) -> bool {
        self.clauses.as_ref().is_some_and(|c| !c.is_empty())
    }

    pub(crate) fn type_matches(&self, event_type: &EventType) -> bool {
        match &self.type_matcher {
            TypeMatcher::Substring(needle) => event_type.name().to_lowercase().contains(needle),
            TypeMatcher::Regex(regex) => regex.is_match(event_type.name()),
        }
    }

    pub(crate) fn event_matches(&self, event_type: &EventType, event: &Event) -> bool {
        let (t0, t1) = self.time_range;
        if event.time() < t0 || event.time() > t1 || !self.type_matches(event_type) {
            return false;
        }
        self.clauses
            .iter()
            .flatten()
            .all(|clause| clause.evaluate(event_type, event))
    }
}

#[derive(Debug)]
enum TypeMatcher {
    /// Lowercased needle.
    Substring(String),
    Regex(Regex),
}

fn build_regex(pattern: &str, flags: &str) -> Result<Regex, FilterError> {
    let mut builder = RegexBuilder::new(pattern);
    for flag in flags.chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'g' => continue,
            other => return Err(FilterError::UnsupportedRegexFlag(other)),
        };
    }
    Ok(builder.build()?)
}

#[derive(Debug)]
enum PathStep {
    Key(String),
    Index(usize),
}

#[derive(Debug)]
enum Rhs {
    Value(ArgValue),
    Regex(Regex),
}

#[derive(Debug)]
struct CompiledClause {
    root: String,
    path: Vec<PathStep>,
    op: Op,
    rhs: Rhs,
}

impl CompiledClause {
    fn compile(clause: Clause) -> Result<Self, FilterError> {
        let Operand::Reference(reference) = clause.lhs else {
            return Err(FilterError::UnsupportedOperand("left-hand side must be a reference"));
        };
        let mut path = Vec::new();
        let root = flatten_reference(reference, &mut path);
        let is_match = matches!(clause.op, Op::Match | Op::NotMatch);
        let rhs = match clause.rhs {
            Operand::Regex { pattern, flags } if is_match => Rhs::Regex(build_regex(&pattern, &flags)?),
            Operand::Literal(Literal::String(pattern)) if is_match => Rhs::Regex(build_regex(&pattern, "")?),
            Operand::Literal(literal) if !is_match => Rhs::Value(literal_value(literal)),
            Operand::Regex { .. } => {
                return Err(FilterError::UnsupportedOperand("regex values need =~ or !~"));
            }
            _ => return Err(FilterError::UnsupportedOperand("=~ and !~ need a regex or string")),
        };
        Ok(CompiledClause {
            root,
            path,
            op: clause.op,
            rhs,
        })
    }

    fn resolve<'a>(&self, event_type: &EventType, event: &'a Event) -> Option<&'a ArgValue> {
        let mut value = event.argument(event_type, &self.root)?;
        for step in &self.path {
            value = match step {
                PathStep::Key(key) => value.get(key)?,
                PathStep::Index(index) => value.index(*index)?,
            };
        }
        Some(value)
    }

    fn evaluate(&self, event_type: &EventType, event: &Event) -> bool {
        let Some(lhs) = self.resolve(event_type, event) else {
            return matches!(self.op, Op::Ne | Op::NotMatch);
        };
        match &self.rhs {
            Rhs::Regex(regex) => {
                let matched = match lhs.as_str() {
                    Some(s) => regex.is_match(s),
                    None => regex.is_match(&lhs.to_string()),
                };
                matched == (self.op == Op::Match)
            }
            Rhs::Value(rhs) => compare(lhs, self.op, rhs),
        }
    }
}

/// Flattens `a.b[2]` into the root argument name and the access path.
fn flatten_reference(reference: Reference, path: &mut Vec<PathStep>) -> String {
    match reference {
        Reference::Name(name) => name,
        Reference::Access(base, key) => {
            let root = flatten_reference(*base, path);
            path.push(match key {
                AccessKey::Name(name) => PathStep::Key(name),
                AccessKey::Index(index) => PathStep::Index(index as usize),
            });
            root
        }
    }
}

fn literal_value(literal: Literal) -> ArgValue {
    match literal {
        Literal::Number(n) => ArgValue::Float(n),
        Literal::String(s) => ArgValue::String(s),
        Literal::Boolean(b) => ArgValue::Bool(b),
        Literal::Null => ArgValue::Null,
        Literal::Array(values) => ArgValue::Array(values.into_iter().map(literal_value).collect()),
        Literal::Object(entries) => ArgValue::Object(
            entries
                .into_iter()
                .map(|(key, value)| (key, literal_value(value)))
                .collect::<BTreeMap<_, _>>(),
        ),
    }
}

fn numeric(value: &ArgValue) -> Option<f64> {
    match value {
        ArgValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        other => other.as_f64(),
    }
}

fn scalar_order(lhs: &ArgValue, rhs: &ArgValue) -> Option<Ordering> {
    match (lhs, rhs) {
        (ArgValue::String(a), ArgValue::String(b)) => Some(a.cmp(b)),
        (ArgValue::Null, ArgValue::Null) => Some(Ordering::Equal),
        _ => numeric(lhs)?.partial_cmp(&numeric(rhs)?),
    }
}

fn loose_eq(lhs: &ArgValue, rhs: &ArgValue) -> bool {
    scalar_order(lhs, rhs).map_or_else(|| lhs == rhs, Ordering::is_eq)
}

/// Element-wise equality one level deep.
fn shallow_eq(lhs: &ArgValue, rhs: &ArgValue) -> bool {
    match (lhs, rhs) {
        (ArgValue::Array(a), ArgValue::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| loose_eq(x, y))
        }
        (ArgValue::Object(a), ArgValue::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(key, x)| b.get(key).is_some_and(|y| loose_eq(x, y)))
        }
        _ => false,
    }
}

fn compare(lhs: &ArgValue, op: Op, rhs: &ArgValue) -> bool {
    if matches!(rhs, ArgValue::Array(_) | ArgValue::Object(_)) {
        return match op {
            Op::Eq => shallow_eq(lhs, rhs),
            Op::Ne => !shallow_eq(lhs, rhs),
            _ => false,
        };
    }
    let Some(order) = scalar_order(lhs, rhs) else {
        return op == Op::Ne;
    };
    match op {
        Op::Lt => order.is_lt(),
        Op::Le => order.is_le(),
        Op::Gt => order.is_gt(),
        Op::Ge => order.is_ge(),
        Op::Eq => order.is_eq(),
        Op::Ne => order.is_ne(),
        Op::Match | Op::NotMatch => false,
    }
}
