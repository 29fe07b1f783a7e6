/// Fixed-form condition evaluator
///
/// Supports `<path> <op> <literal-or-path>` comparisons with `== != > >= < <=`
/// and a handful of named predicates over the previous step result. Paths
/// starting with `previous.` read the previous `StepResult`; all other paths
/// read the run context.

use crate::runtime::{resolver::lookup, result::StepResult};
use serde_json::Value;
use std::{cmp::Ordering, fmt, str::FromStr};

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Compare {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
    Predicate(Predicate),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Path(String),
    Literal(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predicate {
    AnyParallelFailed,
    AllParallelSucceeded,
    PreviousSucceeded,
    PreviousFailed,
}

const PREVIOUS_PREFIX: &str = "previous.";

impl FromStr for Condition {
    type Err = String;

    fn from_str(expression: &str) -> Result<Self, Self::Err> {
        let expr = expression.trim();
        if expr.is_empty() {
            return Err("empty condition expression".to_string());
        }

        let predicate = match expr {
            "any_parallel_failed" => Some(Predicate::AnyParallelFailed),
            "all_parallel_succeeded" => Some(Predicate::AllParallelSucceeded),
            "previous_succeeded" => Some(Predicate::PreviousSucceeded),
            "previous_failed" => Some(Predicate::PreviousFailed),
            _ => None,
        };
        if let Some(predicate) = predicate {
            return Ok(Condition::Predicate(predicate));
        }

        let (position, op, width) = find_operator(expr)
            .ok_or_else(|| format!("unsupported condition expression '{}'", expr))?;

        let left = expr[..position].trim();
        if !is_path(left) {
            return Err(format!("left side of '{}' must be a path", expr));
        }
        let right = parse_operand(expr[position + width..].trim())
            .ok_or_else(|| format!("cannot parse right side of '{}'", expr))?;

        Ok(Condition::Compare {
            left: Operand::Path(left.to_string()),
            op,
            right,
        })
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
        };
        f.write_str(s)
    }
}

/// First operator occurrence scanning left to right; two-char tokens win
fn find_operator(expr: &str) -> Option<(usize, CompareOp, usize)> {
    let bytes = expr.as_bytes();
    for (i, &byte) in bytes.iter().enumerate() {
        let next = bytes.get(i + 1).copied();
        match (byte, next) {
            (b'=', Some(b'=')) => return Some((i, CompareOp::Eq, 2)),
            (b'!', Some(b'=')) => return Some((i, CompareOp::Ne, 2)),
            (b'>', Some(b'=')) => return Some((i, CompareOp::Ge, 2)),
            (b'<', Some(b'=')) => return Some((i, CompareOp::Le, 2)),
            (b'>', _) => return Some((i, CompareOp::Gt, 1)),
            (b'<', _) => return Some((i, CompareOp::Lt, 1)),
            (b'=', _) | (b'!', _) => return None,
            _ => {}
        }
    }
    None
}

fn is_path(s: &str) -> bool {
    !s.is_empty()
        && !s.starts_with('.')
        && !s.ends_with('.')
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

fn parse_operand(s: &str) -> Option<Operand> {
    if s.is_empty() {
        return None;
    }
    if s.len() >= 2 {
        let quoted = (s.starts_with('\'') && s.ends_with('\''))
            || (s.starts_with('"') && s.ends_with('"'));
        if quoted {
            return Some(Operand::Literal(Value::String(s[1..s.len() - 1].to_string())));
        }
    }
    match s {
        "true" => return Some(Operand::Literal(Value::Bool(true))),
        "false" => return Some(Operand::Literal(Value::Bool(false))),
        "null" => return Some(Operand::Literal(Value::Null)),
        _ => {}
    }
    if let Ok(number) = serde_json::from_str::<serde_json::Number>(s) {
        return Some(Operand::Literal(Value::Number(number)));
    }
    if is_path(s) && !s.starts_with(|c: char| c.is_ascii_digit()) {
        return Some(Operand::Path(s.to_string()));
    }
    None
}

impl Condition {
    pub fn evaluate(&self, context: &Value, previous: Option<&StepResult>) -> bool {
        match self {
            Condition::Predicate(predicate) => evaluate_predicate(*predicate, previous),
            Condition::Compare { left, op, right } => {
                let previous_value = previous.map(StepResult::to_value);
                let left = operand_value(left, context, previous_value.as_ref());
                let right = operand_value(right, context, previous_value.as_ref());
                compare(left.as_ref(), *op, right.as_ref())
            }
        }
    }
}

fn operand_value(operand: &Operand, context: &Value, previous: Option<&Value>) -> Option<Value> {
    match operand {
        Operand::Literal(value) => Some(value.clone()),
        Operand::Path(path) => match path.strip_prefix(PREVIOUS_PREFIX) {
            Some(rest) => previous.and_then(|p| lookup(p, rest)).cloned(),
            None => lookup(context, path).cloned(),
        },
    }
}

fn compare(left: Option<&Value>, op: CompareOp, right: Option<&Value>) -> bool {
    let null = Value::Null;
    let left = left.unwrap_or(&null);
    let right = right.unwrap_or(&null);

    match op {
        CompareOp::Eq => loosely_equal(left, right),
        CompareOp::Ne => !loosely_equal(left, right),
        _ => match ordering(left, right) {
            Some(ordering) => match op {
                CompareOp::Gt => ordering == Ordering::Greater,
                CompareOp::Ge => ordering != Ordering::Less,
                CompareOp::Lt => ordering == Ordering::Less,
                CompareOp::Le => ordering != Ordering::Greater,
                CompareOp::Eq | CompareOp::Ne => false,
            },
            None => false,
        },
    }
}

fn loosely_equal(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => left == right,
    }
}

fn ordering(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn evaluate_predicate(predicate: Predicate, previous: Option<&StepResult>) -> bool {
    match predicate {
        Predicate::PreviousSucceeded => previous.is_some_and(|p| p.success),
        Predicate::PreviousFailed => previous.is_some_and(|p| !p.success),
        Predicate::AnyParallelFailed => {
            parallel_flags(previous).is_some_and(|flags| flags.iter().any(|ok| !ok))
        }
        Predicate::AllParallelSucceeded => parallel_flags(previous)
            .is_some_and(|flags| !flags.is_empty() && flags.iter().all(|ok| *ok)),
    }
}

/// Success flags of the sub-results recorded by a parallel step
fn parallel_flags(previous: Option<&StepResult>) -> Option<Vec<bool>> {
    let results = previous?.data.as_ref()?.get("results")?.as_array()?;
    Some(
        results
            .iter()
            .map(|r| r.get("success").and_then(Value::as_bool).unwrap_or(false))
            .collect(),
    )
}
