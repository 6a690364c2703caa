//! GitLab operations exposed as MCP tools.
//!
//! Each operation validates its arguments, makes exactly one upstream call
//! with the caller's credential (`create_or_update_file` adds an existence
//! probe first) and returns the upstream body. JSON arrays are normalized to
//! `{count, items}`; objects pass through unchanged.

use async_trait::async_trait;
use garde::Validate;
use labgate_types::ToolDescriptor;
use serde::de::{DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{FieldViolation, GatewayError, Result};
use crate::gitlab::GitLabClient;
use crate::mcp::RequestContext;

pub mod issues;
pub mod projects;
pub mod repository;

/// A single tool callable through `tools/call`.
#[async_trait]
pub trait Operation: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// JSON Schema advertised in `tools/list`.
    fn input_schema(&self) -> Value;

    /// Run the operation with the credential carried by `ctx`.
    async fn invoke(&self, ctx: &RequestContext, gitlab: &GitLabClient, args: Value)
        -> Result<Value>;
}

/// Registry of the operations offered to agents, in advertised order.
#[derive(Clone, Default)]
pub struct OperationRegistry {
    operations: Vec<Arc<dyn Operation>>,
    index: HashMap<&'static str, usize>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every GitLab operation.
    pub fn with_gitlab_operations() -> Self {
        let mut registry = Self::new();
        registry.register(projects::SearchRepositories);
        registry.register(projects::ListProjects);
        registry.register(projects::CreateRepository);
        registry.register(projects::ForkRepository);
        registry.register(repository::GetFileContents);
        registry.register(repository::CreateOrUpdateFile);
        registry.register(repository::PushFiles);
        registry.register(repository::CreateBranch);
        registry.register(issues::CreateIssue);
        registry.register(issues::CreateMergeRequest);
        registry
    }

    /// Add an operation, replacing any previous one with the same name.
    pub fn register(&mut self, operation: impl Operation + 'static) {
        let name = operation.name();
        let operation: Arc<dyn Operation> = Arc::new(operation);
        match self.index.get(name) {
            Some(&i) => self.operations[i] = operation,
            None => {
                self.index.insert(name, self.operations.len());
                self.operations.push(operation);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Operation>> {
        self.index.get(name).map(|&i| &self.operations[i])
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Descriptors for `tools/list`.
    pub fn list(&self) -> Vec<ToolDescriptor> {
        self.operations
            .iter()
            .map(|op| ToolDescriptor {
                name: op.name().to_string(),
                description: op.description().to_string(),
                input_schema: op.input_schema(),
            })
            .collect()
    }

    /// Invoke an operation by name and normalize its result.
    pub async fn invoke(
        &self,
        ctx: &RequestContext,
        gitlab: &GitLabClient,
        name: &str,
        args: Value,
    ) -> Result<Value> {
        let operation = self.get(name).ok_or_else(|| {
            GatewayError::invalid_argument("name", format!("Unknown operation: {}", name))
        })?;
        info!("MCP: Invoking operation {}", name);
        let result = operation.invoke(ctx, gitlab, args).await?;
        Ok(normalize(result))
    }
}

/// Wrap list-shaped bodies as `{count, items}`.
pub fn normalize(value: Value) -> Value {
    match value {
        Value::Array(items) => json!({ "count": items.len(), "items": items }),
        other => other,
    }
}

/// Decode and validate operation arguments against `schema`.
///
/// Missing arguments are treated as `{}`. Every violated field is reported,
/// not only the first: values of the wrong JSON type are reported per field
/// and dropped, then the rest is decoded and checked by garde.
pub fn parse_args<T>(args: Value, schema: &Value) -> Result<T>
where
    T: DeserializeOwned + Validate,
    T::Context: Default,
{
    let mut args = match args {
        Value::Null => Map::new(),
        Value::Object(map) => map,
        _ => {
            return Err(GatewayError::invalid_argument(
                "arguments",
                "expected a JSON object",
            ))
        }
    };

    let mut violations = Vec::new();
    check_properties(&mut args, schema, "", &mut violations);

    let parsed: T = match serde_json::from_value(Value::Object(args)) {
        Ok(parsed) => parsed,
        Err(e) => {
            violations.push(FieldViolation::new("arguments", e.to_string()));
            return Err(invalid(violations));
        }
    };

    if let Err(report) = parsed.validate() {
        for (path, error) in report.iter() {
            let field = path.to_string().replace("r#", "");
            if !violations.iter().any(|v| overlaps(&v.field, &field)) {
                violations.push(FieldViolation::new(field, error.to_string()));
            }
        }
    }
    if !violations.is_empty() {
        return Err(invalid(violations));
    }
    Ok(parsed)
}

fn invalid(violations: Vec<FieldViolation>) -> GatewayError {
    debug!("Argument validation failed: {:?}", violations);
    GatewayError::InvalidArgument(violations)
}

/// Whether one field path is the other or nested inside it.
fn overlaps(a: &str, b: &str) -> bool {
    let nested = |outer: &str, inner: &str| {
        inner
            .strip_prefix(outer)
            .is_some_and(|rest| rest.starts_with('.') || rest.starts_with('['))
    };
    a == b || nested(a, b) || nested(b, a)
}

/// Report and remove every property whose value does not match its schema.
///
/// Arrays of objects are checked item by item; an array holding an item of
/// the wrong type is removed as a whole.
fn check_properties(
    args: &mut Map<String, Value>,
    schema: &Value,
    prefix: &str,
    violations: &mut Vec<FieldViolation>,
) {
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return;
    };
    for (name, property) in properties {
        let field = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{}.{}", prefix, name)
        };
        let Some(value) = args.get_mut(name) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        if let Some(message) = mismatch(value, property) {
            violations.push(FieldViolation::new(field, message));
            args.remove(name);
            continue;
        }

        let (Value::Array(items), Some(item_schema)) = (value, property.get("items")) else {
            continue;
        };
        let mut drop_array = false;
        for (i, item) in items.iter_mut().enumerate() {
            let item_field = format!("{}[{}]", field, i);
            if let Some(message) = mismatch(item, item_schema) {
                violations.push(FieldViolation::new(item_field, message));
                drop_array = true;
            } else if let Value::Object(map) = item {
                check_properties(map, item_schema, &item_field, violations);
            }
        }
        if drop_array {
            args.remove(name);
        }
    }
}

/// Why `value` does not satisfy the `type`, `enum` and integer bounds of
/// `schema`, if it does not.
fn mismatch(value: &Value, schema: &Value) -> Option<String> {
    let types: Vec<&str> = match schema.get("type") {
        Some(Value::String(t)) => vec![t.as_str()],
        Some(Value::Array(ts)) => ts.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    };
    if !types.is_empty() && !types.iter().any(|t| has_type(value, t)) {
        return Some(format!(
            "expected {}, got {}",
            types.join(" or "),
            type_name(value)
        ));
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            let names: Vec<String> = allowed.iter().map(Value::to_string).collect();
            return Some(format!("expected one of {}", names.join(", ")));
        }
    }

    if let Some(n) = value.as_i64() {
        if let Some(min) = schema.get("minimum").and_then(Value::as_i64) {
            if n < min {
                return Some(format!("must be at least {}", min));
            }
        }
        if let Some(max) = schema.get("maximum").and_then(Value::as_i64) {
            if n > max {
                return Some(format!("must be at most {}", max));
            }
        }
    }
    None
}

fn has_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Accept a project id given either as a number or as a `group/name` path.
pub(crate) fn project_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Number(n) => n.to_string(),
        Raw::Text(s) => s,
    })
}

/// Insert `value` under `key` when present.
pub(crate) fn put_opt<T: serde::Serialize>(body: &mut Value, key: &str, value: Option<T>) {
    if let (Some(value), Some(map)) = (value, body.as_object_mut()) {
        map.insert(key.to_string(), json!(value));
    }
}

/// Schema fragment shared by every operation scoped to one project.
pub(crate) fn project_id_schema() -> Value {
    json!({
        "type": ["string", "integer"],
        "description": "Project ID or URL-encoded path, e.g. 42 or \"group/project\""
    })
}

/// Schema fragment for paginated listings.
pub(crate) fn pagination_schema() -> (Value, Value) {
    (
        json!({ "type": "integer", "minimum": 1, "description": "Page number (default 1)" }),
        json!({
            "type": "integer",
            "minimum": 1,
            "maximum": 100,
            "description": "Results per page (default 20, max 100)"
        }),
    )
}

/// Query pairs for `page` / `per_page`.
pub(crate) fn pagination_query(page: Option<u32>, per_page: Option<u32>) -> Vec<(&'static str, String)> {
    let mut query = Vec::new();
    if let Some(page) = page {
        query.push(("page", page.to_string()));
    }
    if let Some(per_page) = per_page {
        query.push(("per_page", per_page.to_string()));
    }
    query
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::auth::Credential;
    use crate::gitlab::GitLabClient;
    use crate::mcp::{RequestContext, SessionStore};
    use std::time::Duration;

    /// A session-backed context plus a client pointed at `url`.
    pub fn context(url: &str, token: &str) -> (SessionStore, RequestContext, GitLabClient) {
        let store = SessionStore::new();
        let session = store.create(Credential::new(token)).unwrap();
        let ctx = RequestContext::attach(&session).unwrap();
        let gitlab = GitLabClient::new(url, Duration::from_secs(5)).unwrap();
        (store, ctx, gitlab)
    }
}
