/// Data validation step
///
/// Checks fields of the input (trigger payload by default) against per-field
/// rules and reports every violation at once.

use crate::integrations::{DataStore, Filter};
use crate::runtime::executor::{Dispatcher, StepExecutor, StepInvocation};
use crate::runtime::resolver::lookup;
use crate::runtime::result::{FailureKind, StepResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldRules {
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub unique: Option<UniqueRule>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

/// `true` requires distinct array elements; a table name requires the value
/// to be absent from that storage table
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum UniqueRule {
    Flag(bool),
    Table(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RuleSpec {
    Flags(Vec<String>),
    Detailed(FieldRules),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    pub field: String,
    pub rule: String,
    pub message: String,
}

pub(crate) fn parse_rules(config: &Value) -> Result<Vec<(String, FieldRules)>, String> {
    let rules = config
        .get("rules")
        .and_then(Value::as_object)
        .ok_or("data_validation requires a 'rules' object")?;

    let mut parsed = Vec::with_capacity(rules.len());
    for (field, spec) in rules {
        let spec: RuleSpec = serde_json::from_value(spec.clone())
            .map_err(|_| format!("invalid rule spec for field '{}'", field))?;
        let rules = match spec {
            RuleSpec::Detailed(rules) => rules,
            RuleSpec::Flags(flags) => {
                let mut rules = FieldRules::default();
                for flag in flags {
                    match flag.as_str() {
                        "required" => rules.required = true,
                        "unique" => rules.unique = Some(UniqueRule::Flag(true)),
                        other => {
                            return Err(format!("unknown rule '{}' for field '{}'", other, field))
                        }
                    }
                }
                rules
            }
        };
        parsed.push((field.clone(), rules));
    }
    Ok(parsed)
}

pub(crate) fn check_config(config: &Value) -> Result<(), String> {
    parse_rules(config).map(|_| ())
}

pub struct ValidationExecutor {
    store: Arc<dyn DataStore>,
}

impl ValidationExecutor {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self { store }
    }

    /// Violations for one field; storage errors abort the whole step
    async fn check_field(
        &self,
        field: &str,
        rules: &FieldRules,
        value: Option<&Value>,
    ) -> anyhow::Result<Vec<Violation>> {
        let mut violations = Vec::new();
        let violation = |rule: &str, message: String| Violation {
            field: field.to_string(),
            rule: rule.to_string(),
            message,
        };

        let present = match value {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(_) => true,
        };
        if !present {
            if rules.required {
                violations.push(violation("required", format!("field '{}' is required", field)));
            }
            return Ok(violations);
        }
        let Some(value) = value else {
            return Ok(violations);
        };

        if rules.min.is_some() || rules.max.is_some() {
            let number = match value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            match number {
                None => violations.push(violation("numeric", format!("field '{}' must be numeric", field))),
                Some(n) => {
                    if let Some(min) = rules.min.filter(|min| n < *min) {
                        violations.push(violation("min", format!("field '{}' must be at least {}", field, min)));
                    }
                    if let Some(max) = rules.max.filter(|max| n > *max) {
                        violations.push(violation("max", format!("field '{}' must be at most {}", field, max)));
                    }
                }
            }
        }

        match &rules.unique {
            Some(UniqueRule::Flag(true)) => {
                if let Value::Array(items) = value {
                    let duplicated = items
                        .iter()
                        .enumerate()
                        .any(|(i, item)| items[..i].contains(item));
                    if duplicated {
                        violations.push(violation(
                            "unique",
                            format!("field '{}' contains duplicate values", field),
                        ));
                    }
                }
            }
            Some(UniqueRule::Table(table)) => {
                let key = field.rsplit('.').next().unwrap_or(field);
                let mut filter = Filter::new();
                filter.insert(key.to_string(), value.clone());
                let existing = self.store.find(table, &filter, Some(1)).await?;
                if !existing.is_empty() {
                    violations.push(violation(
                        "unique",
                        format!("field '{}' already exists in {}", field, table),
                    ));
                }
            }
            Some(UniqueRule::Flag(false)) | None => {}
        }

        Ok(violations)
    }
}

#[async_trait]
impl StepExecutor for ValidationExecutor {
    async fn execute(&self, invocation: &StepInvocation<'_>, _dispatcher: &Dispatcher) -> StepResult {
        let rules = match parse_rules(invocation.config) {
            Ok(rules) => rules,
            Err(message) => return StepResult::definition(message),
        };
        let input = invocation.config.get("input").unwrap_or(invocation.payload);

        let mut violations = Vec::new();
        for (field, field_rules) in &rules {
            match self.check_field(field, field_rules, lookup(input, field)).await {
                Ok(found) => violations.extend(found),
                Err(e) => {
                    return StepResult::transient(format!("uniqueness lookup for '{}' failed: {}", field, e))
                }
            }
        }

        if violations.is_empty() {
            return StepResult::ok(json!({ "valid": true, "checked_fields": rules.len() }));
        }

        let mut fields: Vec<&str> = violations.iter().map(|v| v.field.as_str()).collect();
        fields.dedup();
        tracing::debug!("🚫 Validation failed on fields: {:?}", fields);

        StepResult::failure(
            FailureKind::Validation,
            format!("validation failed for fields: {}", fields.join(", ")),
        )
        .with_data(json!({ "valid": false, "violations": violations }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::MemoryDataStore;
    use crate::runtime::executor::testing::{dispatcher_with, run_step, MockCaller};
    use crate::runtime::executor::Collaborators;

    fn dispatcher(store: Arc<MemoryDataStore>) -> Dispatcher {
        let mut collaborators = Collaborators::new(Arc::new(MockCaller::new()));
        collaborators.store = store;
        dispatcher_with(collaborators)
    }

    fn step(rules: Value) -> Value {
        json!({"id": "validate", "kind": "action", "action": "data_validation",
               "config": {"rules": rules}})
    }

    #[test]
    fn test_rule_spec_forms() {
        let rules = parse_rules(&json!({"rules": {
            "email": ["required", "unique"],
            "age": {"required": true, "min": 18, "max": 120},
            "username": {"unique": "users"}
        }}))
        .unwrap();

        let email = &rules.iter().find(|(f, _)| f == "email").unwrap().1;
        assert!(email.required);
        assert_eq!(email.unique, Some(UniqueRule::Flag(true)));
        let username = &rules.iter().find(|(f, _)| f == "username").unwrap().1;
        assert_eq!(username.unique, Some(UniqueRule::Table("users".into())));

        assert!(parse_rules(&json!({"rules": {"email": ["mandatory"]}})).is_err());
        assert!(parse_rules(&json!({})).is_err());
    }

    #[tokio::test]
    async fn test_collects_all_violations() {
        let dispatcher = dispatcher(Arc::new(MemoryDataStore::new()));
        let result = run_step(
            &dispatcher,
            step(json!({
                "email": ["required"],
                "age": {"min": 18},
                "tags": ["unique"]
            })),
            json!({"age": 12, "tags": ["a", "b", "a"]}),
        )
        .await;

        assert!(!result.success);
        assert_eq!(result.failure_kind(), Some(FailureKind::Validation));
        let message = result.error_message().unwrap();
        assert!(message.contains("email"));
        assert!(message.contains("age"));
        assert!(message.contains("tags"));
        assert_eq!(result.data.unwrap()["violations"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_unique_against_table() {
        let store = Arc::new(MemoryDataStore::new());
        store.insert("users", json!({"email": "taken@b.com"})).await.unwrap();
        let dispatcher = dispatcher(store);

        let taken = run_step(
            &dispatcher,
            step(json!({"email": {"required": true, "unique": "users"}})),
            json!({"email": "taken@b.com"}),
        )
        .await;
        assert!(!taken.success);

        let free = run_step(
            &dispatcher,
            step(json!({"email": {"required": true, "unique": "users"}})),
            json!({"email": "new@b.com"}),
        )
        .await;
        assert!(free.success);
    }

    #[tokio::test]
    async fn test_explicit_input_overrides_payload() {
        let dispatcher = dispatcher(Arc::new(MemoryDataStore::new()));
        let result = run_step(
            &dispatcher,
            json!({"id": "v", "kind": "action", "action": "data_validation",
                   "config": {"input": {"name": "Ada"}, "rules": {"name": ["required"]}}}),
            json!({}),
        )
        .await;
        assert!(result.success);
    }
}
