//! Template rendering.
//!
//! Templates support `{{ .Release.Name }}`, `{{ .Release.Namespace }}`,
//! `{{ .Package.Name }}`, `{{ .Package.Version }}` and `{{ .Values.<path> }}`
//! placeholders. Anything else inside braces renders empty.

use std::collections::BTreeMap;

use serde_json::Value;

use super::error::{ResolveError, ResolveResult};
use super::manifest::Package;

/// A package rendered for one release.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPackage {
    pub name: String,
    pub version: String,
    /// Effective values (defaults merged with overrides)
    pub values: Value,
    /// Rendered manifests keyed by template name
    pub manifests: BTreeMap<String, String>,
}

struct Context<'a> {
    release_name: &'a str,
    namespace: &'a str,
    package: &'a Package,
    values: &'a Value,
}

/// Render every template of `package` for a release.
pub fn render(
    package: &Package,
    release_name: &str,
    namespace: &str,
    overrides: &Value,
) -> ResolveResult<RenderedPackage> {
    let values = merge_values(&package.values, overrides);
    let ctx = Context {
        release_name,
        namespace,
        package,
        values: &values,
    };

    let mut manifests = BTreeMap::new();
    for (name, source) in &package.templates {
        let rendered = render_template(source, &ctx).map_err(|reason| {
            ResolveError::malformed(format!("{}:{}", package.name(), name), reason)
        })?;
        manifests.insert(name.clone(), rendered);
    }

    Ok(RenderedPackage {
        name: package.name().to_string(),
        version: package.version().to_string(),
        values,
        manifests,
    })
}

/// Deep-merge `overrides` onto `base`. Objects merge key by key; any other
/// override value replaces the base value.
pub fn merge_values(base: &Value, overrides: &Value) -> Value {
    match (base, overrides) {
        (Value::Object(base), Value::Object(overrides)) => {
            let mut merged = base.clone();
            for (key, value) in overrides {
                let next = match merged.get(key) {
                    Some(existing) => merge_values(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), next);
            }
            Value::Object(merged)
        }
        (base, Value::Null) => base.clone(),
        (_, overrides) => overrides.clone(),
    }
}

fn render_template(source: &str, ctx: &Context<'_>) -> Result<String, String> {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            let offset = source.len() - rest.len() + start;
            let line = source[..offset].matches('\n').count() + 1;
            return Err(format!("unterminated placeholder on line {}", line));
        };
        out.push_str(&evaluate(after[..end].trim(), ctx));
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

fn evaluate(expr: &str, ctx: &Context<'_>) -> String {
    match expr {
        ".Release.Name" => ctx.release_name.to_string(),
        ".Release.Namespace" => ctx.namespace.to_string(),
        ".Package.Name" => ctx.package.name().to_string(),
        ".Package.Version" => ctx.package.version().to_string(),
        ".Values" => display_value(ctx.values),
        _ => match expr.strip_prefix(".Values.") {
            Some(path) => lookup(ctx.values, path)
                .map(display_value)
                .unwrap_or_default(),
            None => {
                tracing::debug!(expr, "unknown placeholder rendered empty");
                String::new()
            }
        },
    }
}

fn lookup<'v>(values: &'v Value, path: &str) -> Option<&'v Value> {
    path.split('.').try_fold(values, |current, key| match current {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        _ => value.to_string(),
    }
}
