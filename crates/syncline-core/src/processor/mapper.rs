//! Builtin template mapper.
//!
//! Rewrites an event's payload according to a configured output template.
//! String values of the form `{{path.to.field}}` are resolved against the
//! incoming event's parsed payload; strings mixing literal text and
//! placeholders are interpolated.

use async_trait::async_trait;
use serde_json::Value;

use super::{Processor, Result};
use crate::event::PipelineEvent;

/// Template-driven payload rewrite.
pub struct Mapper {
    template: Value,
}

impl Mapper {
    pub fn new(template: Value) -> Self {
        Self { template }
    }

    fn resolve(&self, template: &Value, source: &Value) -> Value {
        match template {
            Value::String(s) => resolve_string(s, source),
            Value::Array(items) => {
                Value::Array(items.iter().map(|item| self.resolve(item, source)).collect())
            }
            Value::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(key, value)| (key.clone(), self.resolve(value, source)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

#[async_trait]
impl Processor for Mapper {
    async fn process(
        &self,
        event: Box<dyn PipelineEvent>,
    ) -> Result<Option<Box<dyn PipelineEvent>>> {
        let source = event.parsed()?;
        let output = self.resolve(&self.template, &source);

        let mut next = event.clone_event();
        next.replace_raw(serde_json::to_vec(&output)?);
        Ok(Some(next))
    }
}

/// Resolve a template string. A string that is exactly one placeholder
/// yields the referenced value with its JSON type preserved; otherwise
/// placeholders are interpolated into the surrounding text.
fn resolve_string(template: &str, source: &Value) -> Value {
    if let Some(path) = exact_placeholder(template) {
        return lookup(source, path).cloned().unwrap_or(Value::Null);
    }

    let mut out = String::new();
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        match rest[start + 2..].find("}}") {
            Some(end) => {
                let path = rest[start + 2..start + 2 + end].trim();
                match lookup(source, path) {
                    Some(Value::String(s)) => out.push_str(s),
                    Some(Value::Null) | None => {}
                    Some(value) => out.push_str(&value.to_string()),
                }
                rest = &rest[start + 2 + end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    Value::String(out)
}

fn exact_placeholder(template: &str) -> Option<&str> {
    let inner = template.strip_prefix("{{")?.strip_suffix("}}")?;
    let inner = inner.trim();
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner)
}

fn lookup<'a>(source: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = source;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}
