//! Shared execution context and the destination-write primitives.
//!
//! # Design
//! The host owns one `ExecutionContext` per flow and hands it to every action
//! by mutable reference, so there is no locking here: callers serialize
//! access. Destinations address one of three scopes (`ctx`, `secrets`,
//! `parameters`) with a `$`-rooted dotted path. Segments are taken literally,
//! so `$.response.body[]` writes the key `body[]`.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::error::ActionError;
use crate::types::{Destination, DestinationTarget};

/// Delimiters of the two template passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemplateDelimiters {
    pub global: char,
    pub local: char,
}

impl Default for TemplateDelimiters {
    fn default() -> Self {
        Self {
            global: '$',
            local: '%',
        }
    }
}

/// Flow-wide mutable state shared between actions.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub ctx: Map<String, Value>,
    pub secrets: Map<String, Value>,
    pub delimiters: TemplateDelimiters,
}

/// Per-invocation parameter bag, opaque to the handlers except as a
/// destination scope and as template input.
#[derive(Debug, Clone, Default)]
pub struct DelegatedParameters {
    pub values: Map<String, Value>,
}

impl ExecutionContext {
    /// View used for template lookups: `{ctx, secrets, parameters}`.
    pub fn template_scope(&self, parameters: &DelegatedParameters) -> Value {
        let mut scope = Map::new();
        scope.insert("ctx".to_string(), Value::Object(self.ctx.clone()));
        scope.insert("secrets".to_string(), Value::Object(self.secrets.clone()));
        scope.insert(
            "parameters".to_string(),
            Value::Object(parameters.values.clone()),
        );
        Value::Object(scope)
    }
}

/// Identity and working directory of the running action, plus its log.
#[derive(Debug, Clone)]
pub struct ActionSnapshot {
    pub id: String,
    pub wd: PathBuf,
    messages: Vec<String>,
}

impl ActionSnapshot {
    pub fn new(id: impl Into<String>, wd: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            wd: wd.into(),
            messages: Vec::new(),
        }
    }

    pub fn log(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(action = %self.id, "{message}");
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    /// Resolve `path` against the working directory into an absolute path.
    pub fn absolute_path(&self, path: &str) -> PathBuf {
        let joined = self.wd.join(Path::new(path));
        std::path::absolute(&joined).unwrap_or(joined)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Ctx,
    Secrets,
    Parameters,
}

struct Target {
    scope: Scope,
    path: Vec<String>,
}

/// Write `value` to `destination`, replacing what is there. Without
/// `override`, object values are merged key by key into an existing object.
///
/// # Errors
/// `ActionError::Delivery` when the locator is malformed or the path runs
/// through a non-object value.
pub fn assign_to(
    context: &mut ExecutionContext,
    parameters: &mut DelegatedParameters,
    destination: &Destination,
    value: Value,
) -> Result<(), ActionError> {
    let override_existing = destination.override_existing();
    for target in resolve(destination)? {
        let root = scope_mut(context, parameters, target.scope);
        assign_at(root, &target.path, value.clone(), override_existing)
            .map_err(|reason| ActionError::delivery(destination, reason))?;
    }
    Ok(())
}

/// Append `value` to the array at `destination`, creating it when absent.
/// With `children`, array values are appended element by element; with
/// `override`, the array is reset first.
///
/// # Errors
/// `ActionError::Delivery` when the locator is malformed or the target
/// exists and is not an array.
pub fn push_to(
    context: &mut ExecutionContext,
    parameters: &mut DelegatedParameters,
    destination: &Destination,
    value: Value,
) -> Result<(), ActionError> {
    let override_existing = destination.override_existing();
    let children = destination.children();
    for target in resolve(destination)? {
        let root = scope_mut(context, parameters, target.scope);
        push_at(root, &target.path, value.clone(), children, override_existing)
            .map_err(|reason| ActionError::delivery(destination, reason))?;
    }
    Ok(())
}

/// Check that `destination` is well formed without writing anything.
///
/// # Errors
/// `ActionError::Validation` at `field` when the locator is malformed.
pub fn check_destination(field: &str, destination: &Destination) -> Result<(), ActionError> {
    match resolve(destination) {
        Ok(_) => Ok(()),
        Err(ActionError::Delivery { reason, .. }) => Err(ActionError::validation(field, reason)),
        Err(other) => Err(other),
    }
}

/// Look up a dotted path (`ctx.a.b`) in a template scope value.
pub fn lookup<'a>(scope: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(scope, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

fn scope_mut<'a>(
    context: &'a mut ExecutionContext,
    parameters: &'a mut DelegatedParameters,
    scope: Scope,
) -> &'a mut Map<String, Value> {
    match scope {
        Scope::Ctx => &mut context.ctx,
        Scope::Secrets => &mut context.secrets,
        Scope::Parameters => &mut parameters.values,
    }
}

fn resolve(destination: &Destination) -> Result<Vec<Target>, ActionError> {
    match destination {
        Destination::Locator(locator) => {
            let segments = split_path(locator)
                .ok_or_else(|| ActionError::delivery(locator, "locator must start with `$.`"))?;
            let (scope, path) = segments
                .split_first()
                .ok_or_else(|| ActionError::delivery(locator, "locator has no scope"))?;
            let scope = match scope.as_str() {
                "ctx" => Scope::Ctx,
                "secrets" => Scope::Secrets,
                "parameters" => Scope::Parameters,
                other => {
                    return Err(ActionError::delivery(
                        locator,
                        format!("unknown scope `{other}`, expected ctx, secrets or parameters"),
                    ))
                }
            };
            Ok(vec![Target {
                scope,
                path: path.to_vec(),
            }])
        }
        Destination::Target(target) => resolve_target(destination, target),
    }
}

fn resolve_target(
    destination: &Destination,
    target: &DestinationTarget,
) -> Result<Vec<Target>, ActionError> {
    let scoped = [
        (Scope::Ctx, &target.ctx),
        (Scope::Secrets, &target.secrets),
        (Scope::Parameters, &target.parameters),
    ];
    let mut targets = Vec::new();
    for (scope, locator) in scoped {
        if let Some(locator) = locator {
            let path = split_path(locator).ok_or_else(|| {
                ActionError::delivery(destination, format!("`{locator}` must start with `$`"))
            })?;
            targets.push(Target { scope, path });
        }
    }
    if targets.is_empty() {
        return Err(ActionError::delivery(
            destination,
            "one of ctx, secrets or parameters is required",
        ));
    }
    Ok(targets)
}

/// `$` is the root, `$.a.b` is `[a, b]`. Anything else is rejected.
fn split_path(locator: &str) -> Option<Vec<String>> {
    if locator == "$" {
        return Some(Vec::new());
    }
    let rest = locator.strip_prefix("$.")?;
    let segments: Vec<String> = rest.split('.').map(str::to_string).collect();
    if segments.iter().any(String::is_empty) {
        return None;
    }
    Some(segments)
}

fn parent_mut<'a>(
    root: &'a mut Map<String, Value>,
    parents: &[String],
) -> Result<&'a mut Map<String, Value>, String> {
    let mut current = root;
    for segment in parents {
        let entry = current
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        current = match entry {
            Value::Object(map) => map,
            _ => return Err(format!("`{segment}` is not an object")),
        };
    }
    Ok(current)
}

fn assign_at(
    root: &mut Map<String, Value>,
    path: &[String],
    value: Value,
    override_existing: bool,
) -> Result<(), String> {
    let Some((key, parents)) = path.split_last() else {
        return match value {
            Value::Object(map) if override_existing => {
                *root = map;
                Ok(())
            }
            Value::Object(map) => {
                root.extend(map);
                Ok(())
            }
            _ => Err("only objects can be assigned to the scope root".to_string()),
        };
    };

    let parent = parent_mut(root, parents)?;
    match parent.get_mut(key) {
        Some(Value::Object(existing)) if !override_existing && value.is_object() => {
            if let Value::Object(incoming) = value {
                existing.extend(incoming);
            }
        }
        _ => {
            parent.insert(key.clone(), value);
        }
    }
    Ok(())
}

fn push_at(
    root: &mut Map<String, Value>,
    path: &[String],
    value: Value,
    children: bool,
    override_existing: bool,
) -> Result<(), String> {
    let Some((key, parents)) = path.split_last() else {
        return Err("cannot push to the scope root".to_string());
    };

    let parent = parent_mut(root, parents)?;
    if override_existing {
        parent.insert(key.clone(), Value::Array(Vec::new()));
    }
    let entry = parent
        .entry(key.clone())
        .or_insert_with(|| Value::Array(Vec::new()));
    let Value::Array(items) = entry else {
        return Err(format!("`{key}` is not an array"));
    };
    match value {
        Value::Array(values) if children => items.extend(values),
        value => items.push(value),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dest(value: Value) -> Destination {
        serde_json::from_value(value).unwrap()
    }

    fn fresh() -> (ExecutionContext, DelegatedParameters) {
        (ExecutionContext::default(), DelegatedParameters::default())
    }

    #[test]
    fn assign_creates_nested_path() {
        let (mut context, mut params) = fresh();
        assign_to(&mut context, &mut params, &dest(json!({ "ctx": "$.response.code" })), json!(200))
            .unwrap();
        assert_eq!(context.ctx["response"]["code"], 200);
    }

    #[test]
    fn bare_locator_selects_scope() {
        let (mut context, mut params) = fresh();
        assign_to(&mut context, &mut params, &dest(json!("$.secrets.token")), json!("t")).unwrap();
        assign_to(&mut context, &mut params, &dest(json!("$.parameters.n")), json!(1)).unwrap();
        assert_eq!(context.secrets["token"], "t");
        assert_eq!(params.values["n"], 1);
    }

    #[test]
    fn assign_merges_objects_unless_override() {
        let (mut context, mut params) = fresh();
        let merge = dest(json!({ "ctx": "$.obj" }));
        assign_to(&mut context, &mut params, &merge, json!({ "a": 1 })).unwrap();
        assign_to(&mut context, &mut params, &merge, json!({ "b": 2 })).unwrap();
        assert_eq!(context.ctx["obj"], json!({ "a": 1, "b": 2 }));

        let replace = dest(json!({ "ctx": "$.obj", "override": true }));
        assign_to(&mut context, &mut params, &replace, json!({ "c": 3 })).unwrap();
        assert_eq!(context.ctx["obj"], json!({ "c": 3 }));
    }

    #[test]
    fn assign_replaces_scalars() {
        let (mut context, mut params) = fresh();
        let d = dest(json!("$.ctx.v"));
        assign_to(&mut context, &mut params, &d, json!("a")).unwrap();
        assign_to(&mut context, &mut params, &d, json!("b")).unwrap();
        assert_eq!(context.ctx["v"], "b");
    }

    #[test]
    fn assign_through_scalar_fails() {
        let (mut context, mut params) = fresh();
        assign_to(&mut context, &mut params, &dest(json!("$.ctx.v")), json!(1)).unwrap();
        let err = assign_to(&mut context, &mut params, &dest(json!("$.ctx.v.w")), json!(2))
            .unwrap_err();
        assert!(matches!(err, ActionError::Delivery { .. }));
    }

    #[test]
    fn assign_to_root_requires_object() {
        let (mut context, mut params) = fresh();
        let root = dest(json!({ "ctx": "$" }));
        assign_to(&mut context, &mut params, &root, json!({ "x": 1 })).unwrap();
        assert_eq!(context.ctx["x"], 1);
        assert!(assign_to(&mut context, &mut params, &root, json!(5)).is_err());
    }

    #[test]
    fn push_wraps_first_value_and_appends_in_order() {
        let (mut context, mut params) = fresh();
        let d = dest(json!({ "ctx": "$.codes" }));
        push_to(&mut context, &mut params, &d, json!(200)).unwrap();
        assert_eq!(context.ctx["codes"], json!([200]));
        push_to(&mut context, &mut params, &d, json!(404)).unwrap();
        assert_eq!(context.ctx["codes"], json!([200, 404]));
    }

    #[test]
    fn push_children_flattens_arrays() {
        let (mut context, mut params) = fresh();
        let flat = dest(json!({ "ctx": "$.items", "children": true }));
        push_to(&mut context, &mut params, &flat, json!([1, 2])).unwrap();
        let nested = dest(json!({ "ctx": "$.items" }));
        push_to(&mut context, &mut params, &nested, json!([3])).unwrap();
        assert_eq!(context.ctx["items"], json!([1, 2, [3]]));
    }

    #[test]
    fn push_override_resets_array() {
        let (mut context, mut params) = fresh();
        push_to(&mut context, &mut params, &dest(json!("$.ctx.a")), json!(1)).unwrap();
        let reset = dest(json!({ "ctx": "$.a", "override": true }));
        push_to(&mut context, &mut params, &reset, json!(2)).unwrap();
        assert_eq!(context.ctx["a"], json!([2]));
    }

    #[test]
    fn push_to_non_array_fails() {
        let (mut context, mut params) = fresh();
        assign_to(&mut context, &mut params, &dest(json!("$.ctx.a")), json!("x")).unwrap();
        assert!(push_to(&mut context, &mut params, &dest(json!("$.ctx.a")), json!(1)).is_err());
    }

    #[test]
    fn literal_bracket_segments_are_keys() {
        let (mut context, mut params) = fresh();
        let d = dest(json!({ "ctx": "$.response.body[]" }));
        push_to(&mut context, &mut params, &d, json!("x")).unwrap();
        assert_eq!(context.ctx["response"]["body[]"][0], "x");
    }

    #[test]
    fn malformed_locators_are_rejected() {
        let (mut context, mut params) = fresh();
        for bad in [json!("ctx.a"), json!("$.unknown.a"), json!("$."), json!({ "ctx": "a" }), json!({})] {
            let err = assign_to(&mut context, &mut params, &dest(bad), json!(1)).unwrap_err();
            assert!(matches!(err, ActionError::Delivery { .. }));
        }
    }

    #[test]
    fn destinations_are_checked_without_writing() {
        check_destination("x", &dest(json!("$.ctx.a"))).unwrap();
        check_destination("x", &dest(json!({ "secrets": "$.a", "parameters": "$" }))).unwrap();
        for bad in [json!("ctx.a"), json!("$.nope"), json!({ "ctx": "a" }), json!({})] {
            match check_destination("response.body.assignTo", &dest(bad)).unwrap_err() {
                ActionError::Validation { field, .. } => assert_eq!(field, "response.body.assignTo"),
                other => panic!("expected validation error, got {other:?}"),
            }
        }
    }

    #[test]
    fn lookup_walks_objects_and_arrays() {
        let scope = json!({ "ctx": { "a": { "list": [10, 20] } } });
        assert_eq!(lookup(&scope, "ctx.a.list.1"), Some(&json!(20)));
        assert_eq!(lookup(&scope, "ctx.missing"), None);
    }

    #[test]
    fn snapshot_resolves_relative_paths() {
        let mut snapshot = ActionSnapshot::new("test", "/work");
        assert_eq!(snapshot.absolute_path("a/b.txt"), PathBuf::from("/work/a/b.txt"));
        assert_eq!(snapshot.absolute_path("/abs.txt"), PathBuf::from("/abs.txt"));
        snapshot.log("hello");
        assert_eq!(snapshot.messages(), ["hello".to_string()]);
    }
}
