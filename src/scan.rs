//! Registry pre-pass — populates the [`Registry`] from all configured
//! headers before any declaration is classified.
//!
//! The classifier resolves known-enum and known-handle membership through the
//! registry, so this pass must see every header first (two-pass requirement).

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info, trace, warn};

use crate::model::{RawField, RawStruct, Registry};
use crate::parse;

/// Scan one header into the registry: opaque-handle names, enum names with
/// their first enumerator, and struct bodies.
pub fn scan_header(registry: &mut Registry, path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading header {}", path.display()))?;
    scan_text(registry, &text, path);
    Ok(())
}

/// Scan already-loaded header text. Split out for tests.
pub fn scan_text(registry: &mut Registry, text: &str, path: &Path) {
    let before = (
        registry.handle_count(),
        registry.enum_count(),
        registry.struct_count(),
    );

    let stripped = parse::strip_comments(text);
    scan_handles(registry, &stripped, path);
    scan_enums(registry, &stripped);
    scan_structs(registry, &stripped, path);

    info!(
        header = %path.display(),
        handles = registry.handle_count() - before.0,
        enums = registry.enum_count() - before.1,
        structs = registry.struct_count() - before.2,
        "registry pre-pass"
    );
}

/// Opaque handles come in two spellings:
/// `#define NAME void*` and `typedef void* NAME;` — plus aliases of an
/// already-known handle (`typedef KNOWN_HDL NAME;`).
fn scan_handles(registry: &mut Registry, text: &str, path: &Path) {
    for line in text.lines() {
        let line = line.trim();

        if let Some(rest) = line.strip_prefix("#define ") {
            let mut parts = rest.split_whitespace();
            if let (Some(name), Some(value)) = (parts.next(), parts.next())
                && (value == "void*" || registry.is_handle(value))
            {
                trace!(name, "handle define");
                registry.register_handle(name, path);
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix("typedef ") {
            let rest = rest.trim_end_matches(';').trim();
            // `typedef void* NAME` / `typedef void *NAME`
            if let Some(tail) = rest.strip_prefix("void*").or_else(|| {
                rest.strip_prefix("void *")
            }) {
                let name = tail.trim();
                if is_ident(name) {
                    trace!(name, "handle typedef");
                    registry.register_handle(name, path);
                }
                continue;
            }
            // `typedef KNOWN_HDL NAME`
            let mut parts = rest.split_whitespace();
            if let (Some(base), Some(name)) = (parts.next(), parts.next())
                && parts.next().is_none()
                && registry.is_handle(base)
                && is_ident(name)
            {
                trace!(name, base, "handle alias typedef");
                registry.register_handle(name, path);
            }
        }
    }
}

/// Enums: record the name and the **first** enumerator, which is the
/// fail-safe default return value for the type.
fn scan_enums(registry: &mut Registry, text: &str) {
    let mut pending: Option<String> = None;
    let mut in_body = false;

    for line in text.lines() {
        let line = line.trim();

        if in_body {
            if line.starts_with('}') {
                // Body closed without a single enumerator.
                warn!(name = pending.as_deref(), "empty enum body");
                pending = None;
                in_body = false;
                continue;
            }
            let first = line
                .split(',')
                .next()
                .unwrap_or("")
                .split('=')
                .next()
                .unwrap_or("")
                .trim();
            if !is_ident(first) {
                // Not an enumerator yet (blank line, preprocessor guard);
                // keep looking for the first one.
                continue;
            }
            if let Some(name) = pending.take() {
                debug!(name, default = first, "enum");
                registry.register_enum(&name, first);
            }
            in_body = false;
            continue;
        }

        if let Some(rest) = line.strip_prefix("enum ").or_else(|| {
            line.strip_prefix("typedef enum ")
        }) {
            let name: String = rest
                .chars()
                .take_while(|c| c.is_alphanumeric() || *c == '_')
                .collect();
            if name.is_empty() {
                continue;
            }
            if let Some(brace_rest) = rest.split_once('{') {
                // `enum NAME { FIRST = 0,` on one line
                let first = brace_rest
                    .1
                    .split(',')
                    .next()
                    .unwrap_or("")
                    .split('=')
                    .next()
                    .unwrap_or("")
                    .trim();
                if is_ident(first) {
                    debug!(name, default = first, "enum");
                    registry.register_enum(&name, first);
                } else {
                    pending = Some(name);
                    in_body = true;
                }
            } else {
                pending = Some(name);
                in_body = false;
                // Body opens on a following line.
                continue;
            }
        } else if pending.is_some() && line.starts_with('{') {
            let first = line
                .trim_start_matches('{')
                .split(',')
                .next()
                .unwrap_or("")
                .split('=')
                .next()
                .unwrap_or("")
                .trim();
            if is_ident(first) {
                let name = pending.take().unwrap_or_default();
                debug!(name, default = first, "enum");
                registry.register_enum(&name, first);
            } else {
                in_body = true;
            }
        }
    }
}

/// Structs: collect the raw field list (type + name per field) for the
/// descriptor builder. Nested braces (inline unions) are skipped — their
/// fields fall through to `RawFallback` later rather than being guessed.
fn scan_structs(registry: &mut Registry, text: &str, path: &Path) {
    let mut lines = text.lines().peekable();
    while let Some(line) = lines.next() {
        let trimmed = line.trim();
        let Some(rest) = trimmed.strip_prefix("struct ").or_else(|| {
            trimmed.strip_prefix("typedef struct ")
        }) else {
            continue;
        };
        let name: String = rest
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect();
        if name.is_empty() {
            continue;
        }
        // Forward declarations (`struct Foo;`) and pointer typedefs carry no
        // body; only a `{` on this or the next line opens one.
        let has_brace = rest.contains('{')
            || matches!(lines.peek(), Some(next) if next.trim().starts_with('{'));
        if !has_brace {
            continue;
        }
        let mut fields = Vec::new();
        let mut closed = false;
        if let Some((_, after)) = rest.split_once('{') {
            // Fields may start (and end) on the declaration line itself:
            // `struct X { int a; };`
            let body = match after.split_once('}') {
                Some((body, _)) => {
                    closed = true;
                    body
                }
                None => after,
            };
            for stmt in body.split(';') {
                if let Some(field) = parse_field(stmt) {
                    fields.push(field);
                }
            }
        } else {
            lines.next();
        }

        if !closed {
            let mut depth = 1usize;
            for body_line in lines.by_ref() {
                let body_line = body_line.trim();
                depth += body_line.matches('{').count();
                let closes = body_line.matches('}').count();
                if closes >= depth {
                    break;
                }
                depth -= closes;
                if depth != 1 || body_line.is_empty() {
                    continue;
                }
                for stmt in body_line.split(';') {
                    if let Some(field) = parse_field(stmt) {
                        fields.push(field);
                    }
                }
            }
        }

        if fields.is_empty() {
            continue;
        }
        debug!(name, fields = fields.len(), "struct body");
        registry.register_struct(RawStruct {
            name,
            fields,
            header: path.to_path_buf(),
        });
    }
}

/// Split one struct-field statement into raw type and declared name.
/// Array suffixes stay attached to the name (`char buf[64]` → name `buf[64]`)
/// so the classifier's fixed-array rule sees both spellings.
fn parse_field(stmt: &str) -> Option<RawField> {
    let stmt = stmt.trim();
    if stmt.is_empty() || stmt.starts_with("//") || stmt.starts_with('#') {
        return None;
    }
    // Function-pointer fields and bitfields are not carved up here; they fall
    // through to RawFallback during field classification.
    if stmt.contains('(') || stmt.contains(':') {
        return Some(RawField {
            raw_type: stmt.to_string(),
            name: String::new(),
        });
    }
    let cut = stmt.rfind([' ', '*'])?;
    let (ty, name) = stmt.split_at(cut + 1);
    let name = name.trim();
    let ty = ty.trim();
    if ty.is_empty() || name.is_empty() {
        return None;
    }
    Some(RawField {
        raw_type: ty.to_string(),
        name: name.to_string(),
    })
}

fn is_ident(s: &str) -> bool {
    !s.is_empty()
        && s.chars().next().is_some_and(|c| c.is_alphabetic() || c == '_')
        && s.chars().all(|c| c.is_alphanumeric() || c == '_')
}
