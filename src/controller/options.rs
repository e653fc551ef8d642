//! Option pipeline shared by the Ingress and Service builders
//!
//! Each resource kind has a closed, ordered set of options. Building folds the
//! options over a skeleton object and stops at the first error, so a failed
//! build never hands back a half-mutated object.

use std::collections::BTreeMap;

use kube::ResourceExt;
use minijinja::{context, Environment};
use tracing::debug;

use crate::crd::GameServer;
use crate::error::{Result, ValidationError};
use crate::gameserver;

/// A single step of a resource builder
pub trait BuildOption<K> {
    fn apply(&self, gs: &GameServer, target: &mut K) -> Result<()>;
}

/// Fold `options` over `skeleton` in order
pub fn build<K, O>(gs: &GameServer, mut skeleton: K, options: &[O]) -> Result<K>
where
    O: BuildOption<K>,
{
    for option in options {
        option.apply(gs, &mut skeleton)?;
    }
    Ok(skeleton)
}

/// Values carrying both template markers are rendered instead of copied
pub fn is_template(value: &str) -> bool {
    value.contains("{{") && value.contains("}}")
}

/// Annotations under `prefix` with the prefix stripped, in key order
fn custom_annotations<'a>(
    gs: &'a GameServer,
    prefix: &str,
) -> Result<Vec<(&'a str, &'a str, &'a str)>> {
    let mut found = Vec::new();
    for (key, value) in gs.annotations() {
        if let Some(custom) = key.strip_prefix(prefix) {
            if custom.is_empty() {
                return Err(ValidationError::CustomAnnotationSuffix(key.clone()).into());
            }
            found.push((key.as_str(), custom, value.as_str()));
        }
    }
    Ok(found)
}

/// Copy literal custom annotations onto `annotations`
pub(crate) fn apply_custom_annotations(
    gs: &GameServer,
    prefix: &str,
    annotations: &mut BTreeMap<String, String>,
) -> Result<()> {
    for (_, custom, value) in custom_annotations(gs, prefix)? {
        if is_template(value) {
            continue;
        }
        annotations.insert(custom.to_string(), value.to_string());
    }
    Ok(())
}

/// Render templated custom annotations onto `annotations`.
///
/// An empty rendering removes the annotation instead of writing an empty value.
pub(crate) fn apply_custom_annotations_template(
    gs: &GameServer,
    prefix: &str,
    annotations: &mut BTreeMap<String, String>,
) -> Result<()> {
    let data = TemplateData {
        name: gs.name_any(),
        port: gameserver::game_server_port(gs),
    };

    for (key, custom, value) in custom_annotations(gs, prefix)? {
        if !is_template(value) {
            continue;
        }

        match render_template(value, &data) {
            Ok(rendered) if !rendered.is_empty() => {
                annotations.insert(custom.to_string(), rendered);
            }
            Ok(_) => {
                debug!("custom annotation {} rendered empty, skipping", key);
                annotations.remove(custom);
            }
            Err(e) => {
                debug!("invalid annotation template {:?}: {}", value, e);
                return Err(ValidationError::InvalidTemplate {
                    annotation: custom.to_string(),
                    value: value.to_string(),
                }
                .into())
            }
        }
    }
    Ok(())
}

/// Fields exposed to annotation templates
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TemplateData {
    pub name: String,
    pub port: i32,
}

/// Render an annotation template.
///
/// Syntax errors are `Err`. Runtime failures, such as walking into an unknown
/// field, render as an empty string.
pub fn render_template(
    source: &str,
    data: &TemplateData,
) -> std::result::Result<String, minijinja::Error> {
    let normalized = strip_field_dots(source);
    let env = Environment::new();
    let template = env.template_from_str(&normalized)?;

    match template.render(context! { Name => data.name.clone(), Port => data.port }) {
        Ok(rendered) => Ok(rendered),
        Err(e) => {
            debug!("annotation template {:?} failed to render: {}", source, e);
            Ok(String::new())
        }
    }
}

/// Rewrite Go style field access (`{{ .Name }}`) into plain variable lookups.
///
/// A dot is dropped only inside `{{ }}`, when it follows whitespace, `{` or
/// `(` and starts an identifier. Anything else is left for the parser to
/// reject.
fn strip_field_dots(source: &str) -> String {
    let chars: Vec<char> = source.chars().collect();
    let mut out = String::with_capacity(source.len());
    let mut in_block = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if !in_block && c == '{' && next == Some('{') {
            in_block = true;
            out.push_str("{{");
            i += 2;
            continue;
        }
        if in_block && c == '}' && next == Some('}') {
            in_block = false;
            out.push_str("}}");
            i += 2;
            continue;
        }

        if in_block && c == '.' {
            let prev = if i == 0 { None } else { Some(chars[i - 1]) };
            let starts_field = matches!(next, Some(n) if n.is_ascii_alphabetic() || n == '_');
            let after_boundary = matches!(prev, Some(p) if p.is_whitespace() || p == '{' || p == '(');
            if starts_field && after_boundary {
                i += 1;
                continue;
            }
        }

        out.push(c);
        i += 1;
    }

    out
}
