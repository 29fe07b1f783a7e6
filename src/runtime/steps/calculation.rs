/// Calculation step
///
/// Numeric aggregates over gathered fields plus a few analytical routines used
/// by account-health workflows (trend detection, health score, churn risk,
/// growth potential).

use crate::runtime::executor::{Dispatcher, StepExecutor, StepInvocation};
use crate::runtime::resolver::lookup;
use crate::runtime::result::{FailureKind, StepResult};
use async_trait::async_trait;
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Sum,
    Average,
    Min,
    Max,
    Count,
    Trend,
    HealthScore,
    ChurnRisk,
    GrowthPotential,
}

impl Operation {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "sum" => Some(Operation::Sum),
            "average" | "avg" | "mean" => Some(Operation::Average),
            "min" => Some(Operation::Min),
            "max" => Some(Operation::Max),
            "count" => Some(Operation::Count),
            "trend" => Some(Operation::Trend),
            "health_score" => Some(Operation::HealthScore),
            "churn_risk" => Some(Operation::ChurnRisk),
            "growth_potential" => Some(Operation::GrowthPotential),
            _ => None,
        }
    }
}

pub(crate) fn check_config(config: &Value) -> Result<(), String> {
    let name = config
        .get("operation")
        .and_then(Value::as_str)
        .ok_or("calculation requires an 'operation'")?;
    Operation::parse(name)
        .map(|_| ())
        .ok_or_else(|| format!("unsupported calculation '{}'", name))
}

fn push_numbers(value: &Value, out: &mut Vec<f64>) {
    match value {
        Value::Number(n) => out.extend(n.as_f64()),
        Value::String(s) => out.extend(s.trim().parse::<f64>().ok()),
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::Number(_) | Value::String(_) => push_numbers(item, out),
                    _ => {}
                }
            }
        }
        _ => {}
    }
}

/// Collect numbers for `fields` from `source`; arrays of objects are gathered per item
pub(crate) fn gather(source: &Value, fields: &[String]) -> Vec<f64> {
    let mut out = Vec::new();
    if fields.is_empty() {
        match source {
            Value::Object(map) => {
                for value in map.values() {
                    if value.is_number() {
                        push_numbers(value, &mut out);
                    }
                }
            }
            other => push_numbers(other, &mut out),
        }
        return out;
    }

    for field in fields {
        match source {
            Value::Array(items) => {
                for item in items {
                    if let Some(value) = lookup(item, field) {
                        push_numbers(value, &mut out);
                    }
                }
            }
            other => {
                if let Some(value) = lookup(other, field) {
                    push_numbers(value, &mut out);
                }
            }
        }
    }
    out
}

/// Compare the mean of the second half of a series against the first (±10%)
pub fn detect_trend(values: &[f64]) -> &'static str {
    if values.len() < 2 {
        return "insufficient_data";
    }
    let mid = values.len() / 2;
    let first = values[..mid].iter().sum::<f64>() / mid as f64;
    let second = values[mid..].iter().sum::<f64>() / (values.len() - mid) as f64;

    if second > first * 1.1 {
        "growing"
    } else if second < first * 0.9 {
        "declining"
    } else {
        "stable"
    }
}

fn text<'a>(source: &'a Value, key: &str) -> &'a str {
    source.get(key).and_then(Value::as_str).unwrap_or_default()
}

/// 0-100 account health from revenue trend, engagement and activity
pub fn health_score(source: &Value) -> i64 {
    let mut score = 50;
    match text(source, "revenue_trend") {
        "growing" => score += 20,
        "declining" => score -= 20,
        _ => {}
    }
    match text(source, "engagement") {
        "high" => score += 15,
        "low" => score -= 15,
        _ => {}
    }
    if matches!(text(source, "activity_level"), "active" | "very_active") {
        score += 15;
    }
    score.clamp(0, 100)
}

pub fn churn_risk(source: &Value) -> &'static str {
    let mut risk = 0;
    if text(source, "revenue_trend") == "declining" {
        risk += 2;
    }
    if text(source, "engagement") == "low" {
        risk += 2;
    }
    if text(source, "engagement_quality") == "low" {
        risk += 1;
    }
    match risk {
        r if r >= 4 => "high",
        r if r >= 2 => "medium",
        _ => "low",
    }
}

pub fn growth_potential(source: &Value) -> i64 {
    let mut score = 50;
    if text(source, "revenue_trend") == "growing" {
        score += 20;
    }
    if text(source, "activity_level") == "very_active" {
        score += 20;
    }
    if text(source, "traffic_trend") == "growing" {
        score += 10;
    }
    score.min(100)
}

fn fields_of(config: &Value) -> Vec<String> {
    match config.get("fields").or_else(|| config.get("field")) {
        Some(Value::String(field)) => vec![field.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

#[derive(Debug, Default)]
pub struct CalculationExecutor;

#[async_trait]
impl StepExecutor for CalculationExecutor {
    async fn execute(&self, invocation: &StepInvocation<'_>, _dispatcher: &Dispatcher) -> StepResult {
        let config = invocation.config;
        let name = config
            .get("operation")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let Some(operation) = Operation::parse(name) else {
            return StepResult::definition(format!("unsupported calculation '{}'", name));
        };

        let source = config
            .get("source")
            .or_else(|| invocation.previous.and_then(|p| p.data.as_ref()).filter(|d| !d.is_null()))
            .unwrap_or(invocation.payload);
        let fields = fields_of(config);

        let result = match operation {
            Operation::HealthScore => json!(health_score(source)),
            Operation::ChurnRisk => json!(churn_risk(source)),
            Operation::GrowthPotential => json!(growth_potential(source)),
            Operation::Trend => {
                let series = match source.get("values") {
                    Some(values) if fields.is_empty() => gather(values, &[]),
                    _ => gather(source, &fields),
                };
                json!(detect_trend(&series))
            }
            Operation::Count => json!(gather(source, &fields).len()),
            Operation::Sum | Operation::Average | Operation::Min | Operation::Max => {
                let values = gather(source, &fields);
                if values.is_empty() && operation != Operation::Sum {
                    return StepResult::failure(
                        FailureKind::Validation,
                        format!("no numeric values found for {}", name),
                    );
                }
                let value = match operation {
                    Operation::Sum => values.iter().sum(),
                    Operation::Average => values.iter().sum::<f64>() / values.len() as f64,
                    Operation::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
                    _ => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                };
                json!(value)
            }
        };

        StepResult::ok(json!({ "operation": name, "result": result }))
    }
}
