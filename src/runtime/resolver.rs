/// Variable resolver for `{{dotted.path}}` placeholders
///
/// Walks a JSON template and substitutes placeholders with values from the run
/// context. A string that is exactly one placeholder takes the raw value (type
/// preserved); embedded placeholders are rendered as text. Unresolved
/// placeholders stay verbatim and substituted text is never re-scanned.

use serde_json::Value;

/// Resolve every placeholder in `template` against `context`
pub fn resolve(template: &Value, context: &Value) -> Value {
    match template {
        Value::String(s) => resolve_str(s, context),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve(v, context)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve(v, context)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Resolve a single string template
pub fn resolve_str(template: &str, context: &Value) -> Value {
    if let Some(path) = sole_placeholder(template) {
        return match lookup(context, path) {
            Some(value) => value.clone(),
            None => Value::String(template.to_string()),
        };
    }

    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };

        let inner = &after[..end];
        if inner.contains("{{") {
            // the outer opening is literal text, rescan from the inner one
            out.push_str("{{");
            rest = after;
            continue;
        }

        match lookup(context, inner.trim()) {
            Some(value) => out.push_str(&render(value)),
            None => out.push_str(&rest[start..start + 2 + end + 2]),
        }
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    Value::String(out)
}

/// Look up a dotted path; objects are indexed by key, arrays by position
pub fn lookup<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }

    let mut current = context;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn sole_placeholder(template: &str) -> Option<&str> {
    let trimmed = template.trim();
    if trimmed.len() < 4 || !trimmed.starts_with("{{") || !trimmed.ends_with("}}") {
        return None;
    }
    let inner = &trimmed[2..trimmed.len() - 2];
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner.trim())
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> Value {
        json!({
            "email": "a@b.com",
            "age": 42,
            "user": {"tags": ["x", "y"], "active": true},
            "validate": {"success": true, "data": {"valid": true}},
            "template": "{{email}}"
        })
    }

    #[test]
    fn test_sole_placeholder_preserves_type() {
        let ctx = context();
        assert_eq!(resolve_str("{{age}}", &ctx), json!(42));
        assert_eq!(resolve_str("{{ user.active }}", &ctx), json!(true));
        assert_eq!(resolve_str("{{user.tags}}", &ctx), json!(["x", "y"]));
        assert_eq!(resolve_str("{{validate.data}}", &ctx), json!({"valid": true}));
    }

    #[test]
    fn test_embedded_placeholders_render_text() {
        let ctx = context();
        assert_eq!(
            resolve_str("Welcome {{email}}, age {{age}} ({{user.tags.1}})", &ctx),
            json!("Welcome a@b.com, age 42 (y)")
        );
        assert_eq!(resolve_str("tags={{user.tags}}", &ctx), json!("tags=[\"x\",\"y\"]"));
    }

    #[test]
    fn test_unresolved_placeholders_stay_verbatim() {
        let ctx = context();
        assert_eq!(resolve_str("{{missing.path}}", &ctx), json!("{{missing.path}}"));
        assert_eq!(resolve_str("hi {{nope}} {{email}}", &ctx), json!("hi {{nope}} a@b.com"));
        assert_eq!(resolve_str("{{user.tags.9}}", &ctx), json!("{{user.tags.9}}"));
        assert_eq!(resolve_str("open {{email", &ctx), json!("open {{email"));
        assert_eq!(resolve_str("{{}}", &ctx), json!("{{}}"));
    }

    #[test]
    fn test_substituted_text_is_not_rescanned() {
        let ctx = context();
        assert_eq!(resolve_str("x {{template}}", &ctx), json!("x {{email}}"));
        assert_eq!(resolve_str("{{template}}", &ctx), json!("{{email}}"));
    }

    #[test]
    fn test_nested_open_braces() {
        let ctx = context();
        assert_eq!(resolve_str("{{ {{email}}", &ctx), json!("{{ a@b.com"));
    }

    #[test]
    fn test_resolves_nested_structures() {
        let ctx = context();
        let template = json!({
            "to": ["{{email}}", "ops@example.com"],
            "body": {"age": "{{age}}", "note": "age is {{age}}"},
            "count": 3
        });
        assert_eq!(
            resolve(&template, &ctx),
            json!({
                "to": ["a@b.com", "ops@example.com"],
                "body": {"age": 42, "note": "age is 42"},
                "count": 3
            })
        );
    }

    #[test]
    fn test_idempotent_over_unchanged_context() {
        let ctx = context();
        let template = json!({"a": "{{email}} {{missing}}", "b": ["{{age}}"]});
        assert_eq!(resolve(&template, &ctx), resolve(&template, &ctx));
    }
}
