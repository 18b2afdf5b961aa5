//! Output placement — sentinel-region splicing and change-detecting writes.
//!
//! Generated text never owns a whole target file: it is spliced between
//! `/*---AUTO_GEN_PARSE<TAG>---*/` and `/*---AUTO_GEN_PARSE<TAG_END>---*/`
//! markers, leaving everything outside the region untouched. Writes compare
//! against the current file content first, so a byte-identical second run
//! performs zero writes.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use tracing::{debug, warn};

const MARKER_OPEN: &str = "/*---AUTO_GEN_PARSE<";
const MARKER_CLOSE: &str = ">---*/";

/// Byte span between a tag's open and close markers (exclusive of both
/// marker lines). `None` when the region is not present.
fn region_span(text: &str, tag: &str) -> Option<(usize, usize)> {
    let open = format!("{MARKER_OPEN}{tag}{MARKER_CLOSE}");
    let close = format!("{MARKER_OPEN}{tag}_END{MARKER_CLOSE}");
    let open_at = text.find(&open)?;
    let inner_start = open_at + open.len();
    let close_at = text[inner_start..].find(&close)? + inner_start;
    Some((inner_start, close_at))
}

/// Replace the content of the `tag` region, keeping the markers and all
/// text outside them. Fails when the target has no such region: sentinels
/// are authored by hand and the generator must never invent them.
pub fn splice_region(text: &str, tag: &str, replacement: &str) -> Result<String> {
    let (start, end) = match region_span(text, tag) {
        Some(span) => span,
        None => bail!("target file has no AUTO_GEN_PARSE<{tag}> region"),
    };
    let mut out = String::with_capacity(text.len() + replacement.len());
    out.push_str(&text[..start]);
    out.push('\n');
    out.push_str(replacement);
    if !replacement.is_empty() && !replacement.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&text[end..]);
    Ok(out)
}

/// The current content of the `tag` region, without the markers.
pub fn region_content<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    region_span(text, tag).map(|(start, end)| text[start..end].trim_matches('\n'))
}

/// Carry a hand-written override body from the previous file content into a
/// freshly generated region. When the previous content has nothing to carry,
/// a warning placeholder is emitted instead; the run still succeeds.
pub fn carry_hand_made(previous: Option<&str>, generated: &str, tag: &str) -> Result<String> {
    let carried = previous.and_then(|old| region_content(old, tag)).filter(|c| !c.trim().is_empty());
    match carried {
        Some(body) => splice_region(generated, tag, body),
        None => {
            warn!(tag, "no hand-written body found to carry, placeholder emitted");
            splice_region(
                generated,
                tag,
                "#warning hand-written implementation missing here",
            )
        }
    }
}

/// Write `content` to `path` only when it differs from what is already
/// there. Returns whether a write happened.
pub fn write_if_changed(path: &Path, content: &str) -> Result<bool> {
    if let Ok(existing) = fs::read_to_string(path) {
        if existing == content {
            debug!(path = %path.display(), "unchanged, skipped");
            return Ok(false);
        }
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating directory {}", parent.display()))?;
    }
    fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;
    debug!(path = %path.display(), bytes = content.len(), "wrote");
    Ok(true)
}
