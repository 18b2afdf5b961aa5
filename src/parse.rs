//! Declaration parser — raw header text → [`Declaration`]s.
//!
//! Only the constrained grammar used by this ABI is parsed: exported-function
//! declarations carrying `ATTR_DLL_EXPORT` plus version macros, and versioned
//! function-pointer typedefs (`PFN_<NAME>_V<n>`). Anything else in a header
//! is ignored, not rejected.

use anyhow::Result;
use tracing::{debug, warn};

use crate::model::{DeclKind, Declaration, OverrideMarker, Parameter, Signature};

/// Export marker on plugin-callable functions.
pub const EXPORT_MARKER: &str = "ATTR_DLL_EXPORT";
/// Calling-convention marker inside function-pointer typedefs.
pub const FNPTR_MARKER: &str = "ATTR_APIENTRYP";
/// Version-annotation macro spellings. Absence must be explicit in both.
pub const INTRODUCED_MACRO: &str = "__INTRODUCED_IN";
pub const DEPRECATED_MACRO: &str = "__DEPRECATED_IN";

/// Result of parsing one header: the declarations that parsed, plus the
/// declarations that did not. Malformed declarations are skipped, never
/// fatal to the run.
#[derive(Debug, Default)]
pub struct ParseOutcome {
    pub declarations: Vec<Declaration>,
    pub malformed: Vec<MalformedDeclaration>,
}

/// A declaration that matched a flavor's start token but failed to parse.
#[derive(Debug, Clone)]
pub struct MalformedDeclaration {
    pub text: String,
    pub reason: String,
}

/// Parse every recognizable declaration in `text`.
///
/// `lowest_api` and `allow_unversioned` control the handling of exported
/// functions without an `__INTRODUCED_IN` annotation: with
/// `allow_unversioned` they are treated as present since `lowest_api`,
/// otherwise they are reported as malformed.
pub fn parse_header(text: &str, lowest_api: u32, allow_unversioned: bool) -> ParseOutcome {
    let markers = collect_override_markers(text);
    let stripped = strip_comments(text);

    let mut outcome = ParseOutcome::default();
    for decl_text in extract_declaration_texts(&stripped) {
        let parsed = if decl_text.starts_with(EXPORT_MARKER) {
            parse_exported(&decl_text, lowest_api, allow_unversioned)
        } else {
            parse_fnptr_typedef(&decl_text)
        };
        match parsed {
            Ok(Some(mut decl)) => {
                decl.override_marker = markers
                    .iter()
                    .find(|(name, _)| *name == decl.signature.name)
                    .map(|(_, m)| m.clone());
                debug!(
                    name = %decl.signature.name,
                    api = decl.signature.api_added,
                    params = decl.signature.params.len(),
                    kind = ?decl.kind,
                    "parsed declaration"
                );
                outcome.declarations.push(decl);
            }
            Ok(None) => {}
            Err(reason) => {
                warn!(decl = %decl_text, %reason, "skipping malformed declaration");
                outcome.malformed.push(MalformedDeclaration {
                    text: decl_text,
                    reason,
                });
            }
        }
    }
    outcome
}

// ---------------------------------------------------------------------------
// Text preparation
// ---------------------------------------------------------------------------

/// Remove `/* */` and `//` comments, preserving line structure.
pub fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '/' if chars.peek() == Some(&'/') => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                    }
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }
    out
}

/// Pull `/*---AUTO_GEN_PARSE<OVERRIDE;...>---*/` markers out of the raw
/// (un-stripped) text. Markers name their function explicitly, so they are
/// attached to declarations by name rather than by position.
fn collect_override_markers(text: &str) -> Vec<(String, OverrideMarker)> {
    let mut markers = Vec::new();
    for chunk in text.split("/*---AUTO_GEN_PARSE<").skip(1) {
        let Some(inner) = chunk.split(">---*/").next() else {
            continue;
        };
        let Some(rest) = inner.strip_prefix("OVERRIDE;") else {
            continue;
        };
        if let Some(name) = rest.strip_prefix("USE_HAND_MAKE=") {
            markers.push((name.to_string(), OverrideMarker::UseHandMake(name.to_string())));
        } else if let Some(name) = rest.strip_prefix("USE_INTERNAL=") {
            markers.push((name.to_string(), OverrideMarker::UseInternal(name.to_string())));
        }
    }
    markers
}

/// Collapse whitespace runs to single spaces.
fn collapse_ws(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_space = true;
    for c in s.chars() {
        if c.is_whitespace() {
            if !last_space {
                out.push(' ');
                last_space = true;
            }
        } else {
            out.push(c);
            last_space = false;
        }
    }
    out.trim().to_string()
}

/// Find every declaration candidate: text from a recognized start token to
/// the next `;`, whitespace-collapsed. Function declarations contain no
/// internal `;`, so this is independent of surrounding brace nesting.
fn extract_declaration_texts(stripped: &str) -> Vec<String> {
    let flat = collapse_ws(stripped);
    let mut decls = Vec::new();
    let mut rest = flat.as_str();
    loop {
        let export_pos = rest.find(EXPORT_MARKER);
        let typedef_pos = find_fnptr_typedef(rest);
        let pos = match (export_pos, typedef_pos) {
            (Some(a), Some(b)) => a.min(b),
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (None, None) => break,
        };
        let tail = &rest[pos..];
        match tail.find(';') {
            Some(end) => {
                decls.push(tail[..end].trim().to_string());
                rest = &tail[end + 1..];
            }
            None => {
                decls.push(tail.trim().to_string());
                break;
            }
        }
    }
    decls
}

/// Position of the next `typedef … (ATTR_APIENTRYP PFN_…)` declaration.
fn find_fnptr_typedef(s: &str) -> Option<usize> {
    let mut offset = 0;
    let mut rest = s;
    while let Some(pos) = rest.find("typedef ") {
        let tail = &rest[pos..];
        let end = tail.find(';').unwrap_or(tail.len());
        if tail[..end].contains(FNPTR_MARKER) {
            return Some(offset + pos);
        }
        offset += pos + 8;
        rest = &rest[pos + 8..];
    }
    None
}

// ---------------------------------------------------------------------------
// Flavor (a): exported function
// ---------------------------------------------------------------------------

fn parse_exported(
    decl: &str,
    lowest_api: u32,
    allow_unversioned: bool,
) -> Result<Option<Declaration>, String> {
    let body = decl
        .strip_prefix(EXPORT_MARKER)
        .ok_or("missing export marker")?
        .trim();

    let open = body.find('(').ok_or("no parameter list")?;
    let close = matching_paren(body, open).ok_or("unbalanced parameter list")?;

    let head = &body[..open];
    let (return_type, name) = split_type_and_name(head).ok_or("no function name")?;
    if return_type.is_empty() {
        return Err("no return type".into());
    }

    let params = split_parameters(&body[open + 1..close])?;

    let suffix = body[close + 1..].trim();
    let api_added = match version_macro(suffix, INTRODUCED_MACRO)? {
        Some(v) => v,
        None if allow_unversioned => lowest_api,
        None => {
            return Err(format!("missing {INTRODUCED_MACRO} annotation"));
        }
    };
    let api_deprecated = version_macro(suffix, DEPRECATED_MACRO)?;

    Ok(Some(Declaration {
        kind: DeclKind::Exported,
        signature: Signature {
            name,
            return_type,
            params,
            api_added,
            api_deprecated,
        },
        override_marker: None,
    }))
}

// ---------------------------------------------------------------------------
// Flavor (b): function-pointer typedef
// ---------------------------------------------------------------------------

fn parse_fnptr_typedef(decl: &str) -> Result<Option<Declaration>, String> {
    let body = match decl.strip_prefix("typedef ") {
        Some(b) => b.trim(),
        None => return Ok(None),
    };

    let open = body.find('(').ok_or("no pointer declarator")?;
    let return_type = body[..open].trim().to_string();
    if return_type.is_empty() {
        return Err("no return type".into());
    }

    let close = matching_paren(body, open).ok_or("unbalanced pointer declarator")?;
    let declarator = body[open + 1..close].trim();
    let pfn = declarator
        .strip_prefix(FNPTR_MARKER)
        .ok_or("missing calling-convention marker")?
        .trim();
    let (name, api_added) = split_pfn_name(pfn)
        .ok_or_else(|| format!("typedef name `{pfn}` is not of the form PFN_<NAME>_V<n>"))?;

    let params_open = body[close + 1..]
        .find('(')
        .map(|p| p + close + 1)
        .ok_or("no parameter list")?;
    let params_close = matching_paren(body, params_open).ok_or("unbalanced parameter list")?;
    let params = split_parameters(&body[params_open + 1..params_close])?;

    Ok(Some(Declaration {
        kind: DeclKind::FnPtrTypedef,
        signature: Signature {
            name,
            return_type,
            params,
            api_added,
            api_deprecated: None,
        },
        override_marker: None,
    }))
}

/// `PFN_PLUGIN_START_V2` → (`plugin_start`, 2).
fn split_pfn_name(pfn: &str) -> Option<(String, u32)> {
    let stripped = pfn.strip_prefix("PFN_")?;
    let v_pos = stripped.rfind("_V")?;
    let api: u32 = stripped[v_pos + 2..].parse().ok()?;
    let name = stripped[..v_pos].to_lowercase();
    if name.is_empty() {
        return None;
    }
    Some((name, api))
}

// ---------------------------------------------------------------------------
// Shared parsing helpers
// ---------------------------------------------------------------------------

/// Index of the `)` matching the `(` at `open`.
fn matching_paren(s: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (off, c) in s[open..].char_indices() {
        let i = open + off;
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Split a parameter list on top-level commas, respecting nested parens for
/// function-pointer parameters, and parse each into type + name.
fn split_parameters(list: &str) -> Result<Vec<Parameter>, String> {
    let list = list.trim();
    if list.is_empty() || list == "void" {
        return Ok(Vec::new());
    }

    let mut pieces = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in list.char_indices() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                pieces.push(list[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    pieces.push(list[start..].trim());

    let mut params = Vec::new();
    for (index, piece) in pieces.into_iter().enumerate() {
        if piece == "..." {
            params.push(Parameter {
                raw_type: "...".to_string(),
                name: String::new(),
                index,
            });
            continue;
        }
        let (raw_type, name) = split_type_and_name(piece)
            .ok_or_else(|| format!("cannot split parameter `{piece}`"))?;
        params.push(Parameter {
            raw_type,
            name,
            index,
        });
    }
    Ok(params)
}

/// Split `const char* name` / `char buf[64]` / `int foo` into raw type and
/// declared name. Array suffixes stay attached to the name so the classifier
/// sees both fixed-array spellings. Unnamed parameters (the usual spelling in
/// fn-pointer typedefs, `(void*, const char*)`) keep an empty name.
pub fn split_type_and_name(s: &str) -> Option<(String, String)> {
    let s = collapse_ws(s);
    if s.is_empty() {
        return None;
    }
    // Function-pointer parameters keep the whole text as the type; stub
    // emission classifies them through the registry or falls back.
    if s.contains('(') {
        return Some((s.clone(), String::new()));
    }
    let Some(cut) = s.rfind([' ', '*']) else {
        // Single token: an unnamed `int`-style parameter, or garbage.
        if s.starts_with(|c: char| c.is_alphabetic() || c == '_') {
            return Some((s.clone(), String::new()));
        }
        return None;
    };
    let (ty, name) = s.split_at(cut + 1);
    let ty = ty.trim();
    let name = name.trim();
    if ty.is_empty() {
        return None;
    }
    if name.is_empty() {
        // Trailing `*`: unnamed pointer parameter.
        return Some((normalize_pointer(ty), String::new()));
    }
    Some((normalize_pointer(ty), name.to_string()))
}

/// Normalize pointer spacing: `const char *` → `const char*`.
fn normalize_pointer(ty: &str) -> String {
    let mut out = String::with_capacity(ty.len());
    for c in ty.chars() {
        if c == '*' {
            while out.ends_with(' ') {
                out.pop();
            }
        }
        out.push(c);
    }
    out
}

/// Extract `MACRO(<n>)` from a declaration suffix. A macro present without a
/// parseable number is malformed, not ignored.
fn version_macro(suffix: &str, macro_name: &str) -> Result<Option<u32>, String> {
    let Some(pos) = suffix.find(macro_name) else {
        return Ok(None);
    };
    let rest = &suffix[pos + macro_name.len()..];
    let inner = rest
        .strip_prefix('(')
        .and_then(|r| r.split(')').next())
        .ok_or_else(|| format!("malformed {macro_name} annotation"))?;
    inner
        .trim()
        .parse::<u32>()
        .map(Some)
        .map_err(|_| format!("non-numeric version in {macro_name}({inner})"))
}
