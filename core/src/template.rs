//! Template expansion of file-sourced request bodies.
//!
//! The host normally supplies the resolver; `PlaceholderTemplates` covers
//! the placeholder forms request bodies actually use: `<D- path D>` and
//! `<D= path D>`, `D` being the delimiter of the pass, plus calls to the
//! `http.randomUserAgent(filter?)` utility.

use std::path::Path;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use crate::context::{lookup, DelegatedParameters, ExecutionContext};
use crate::error::ActionError;
use crate::user_agent::random_user_agent;

#[async_trait]
pub trait TemplateResolver: Send + Sync {
    /// Expand every placeholder using `delimiter` in `text`.
    async fn resolve(
        &self,
        delimiter: char,
        wd: &Path,
        text: &str,
        context: &ExecutionContext,
        parameters: &DelegatedParameters,
    ) -> Result<String, ActionError>;
}

/// Resolver for value placeholders rooted at `ctx`, `secrets` or `parameters`.
///
/// Strings are inserted verbatim, other values as compact JSON, missing
/// values as the empty string.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderTemplates;

impl PlaceholderTemplates {
    fn pattern(delimiter: char) -> Result<Regex, ActionError> {
        let d = regex::escape(&delimiter.to_string());
        Regex::new(&format!(r"<{d}[-=]\s*([A-Za-z0-9_.$\[\]-]+?)\s*{d}>"))
            .map_err(|e| ActionError::Template(e.to_string()))
    }

    fn utility_pattern(delimiter: char) -> Result<Regex, ActionError> {
        let d = regex::escape(&delimiter.to_string());
        Regex::new(&format!(
            r#"<{d}[-=]\s*http\.randomUserAgent\(\s*(?:'([^']*)'|"([^"]*)")?\s*\)\s*{d}>"#
        ))
        .map_err(|e| ActionError::Template(e.to_string()))
    }
}

/// Replace every `http.randomUserAgent(filter?)` call. The optional argument
/// is a regular expression; no match expands to the empty string.
fn expand_utilities(pattern: &Regex, text: &str) -> Result<String, ActionError> {
    let mut expanded = String::with_capacity(text.len());
    let mut last = 0;
    for caps in pattern.captures_iter(text) {
        let Some(call) = caps.get(0) else {
            continue;
        };
        let filter = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| Regex::new(m.as_str()))
            .transpose()
            .map_err(|e| ActionError::Template(format!("http.randomUserAgent: {e}")))?;
        expanded.push_str(&text[last..call.start()]);
        expanded.push_str(&random_user_agent(filter.as_ref()).unwrap_or_default());
        last = call.end();
    }
    expanded.push_str(&text[last..]);
    Ok(expanded)
}

#[async_trait]
impl TemplateResolver for PlaceholderTemplates {
    async fn resolve(
        &self,
        delimiter: char,
        _wd: &Path,
        text: &str,
        context: &ExecutionContext,
        parameters: &DelegatedParameters,
    ) -> Result<String, ActionError> {
        let text = expand_utilities(&Self::utility_pattern(delimiter)?, text)?;
        let pattern = Self::pattern(delimiter)?;
        let scope = context.template_scope(parameters);
        let expanded = pattern.replace_all(&text, |caps: &regex::Captures<'_>| {
            match lookup(&scope, &caps[1]) {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            }
        });
        Ok(expanded.into_owned())
    }
}

/// Run the global pass and then the local pass over `text`.
///
/// # Errors
/// Propagates the resolver's failure.
pub async fn expand_twice(
    resolver: &dyn TemplateResolver,
    wd: &Path,
    text: &str,
    context: &ExecutionContext,
    parameters: &DelegatedParameters,
) -> Result<String, ActionError> {
    let delimiters = context.delimiters;
    let global = resolver
        .resolve(delimiters.global, wd, text, context, parameters)
        .await?;
    resolver
        .resolve(delimiters.local, wd, &global, context, parameters)
        .await
}
