//! Version dispatch builder — `PFN_…_V<n>` revisions → per-API selection
//! tables.
//!
//! Each callee-visible logical function collects its versioned revisions into
//! a [`VersionGroup`]. Scanning API levels from the lowest supported to the
//! highest, a revision is active for every level at or above its own version
//! until a newer revision takes over (nearest-not-greater). Adjacent spans
//! whose revisions are textually identical coalesce into one range, so adding
//! an API level without changing a function never widens the emitted switch.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::emit::{Fragment, render};
use crate::model::{ClassifiedSignature, DeclKind, OverrideMarker};

/// All versioned revisions of one logical function, sorted by version.
#[derive(Debug, Clone)]
pub struct VersionGroup {
    pub name: String,
    pub revisions: Vec<ClassifiedSignature>,
}

impl VersionGroup {
    /// The revision active at `api`: the newest one not exceeding it.
    pub fn revision_at(&self, api: u32) -> Option<&ClassifiedSignature> {
        self.revisions
            .iter()
            .rev()
            .find(|r| r.signature.api_added <= api)
    }
}

/// Collect the fn-pointer typedef signatures into version groups, keyed by
/// logical name. Generator-internal functions are annotated in the stubs but
/// never wired into dispatch.
pub fn group_versions(sigs: &[ClassifiedSignature]) -> Vec<VersionGroup> {
    let mut by_name: BTreeMap<String, Vec<ClassifiedSignature>> = BTreeMap::new();
    for sig in sigs {
        if sig.kind != DeclKind::FnPtrTypedef {
            continue;
        }
        if let Some(OverrideMarker::UseInternal(name)) = &sig.override_marker {
            debug!(name = %name, "generator-internal, left out of dispatch");
            continue;
        }
        by_name
            .entry(sig.signature.name.clone())
            .or_default()
            .push(sig.clone());
    }

    let mut groups: Vec<VersionGroup> = Vec::new();
    for (name, mut revisions) in by_name {
        revisions.sort_by_key(|r| r.signature.api_added);
        revisions.dedup_by_key(|r| r.signature.api_added);
        groups.push(VersionGroup { name, revisions });
    }
    groups
}

/// A contiguous span of API levels served by one revision. `last == None`
/// means the span is open-ended (everything at or above `first`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    pub first: u32,
    pub last: Option<u32>,
    pub revision: u32,
}

/// The dispatch decision for one logical function over the supported span.
#[derive(Debug, Clone)]
pub struct DispatchTable {
    pub name: String,
    pub ranges: Vec<VersionRange>,
    /// The oldest revision is newer than the lowest supported API; levels
    /// below it need hand-authored compatibility code.
    pub needs_hand_make: bool,
    /// One revision serves the entire supported span; the selection switch
    /// is bypassed.
    pub equal_everywhere: bool,
}

/// Build the range table for one version group over `[min_api, max_api]`.
pub fn build_table(group: &VersionGroup, min_api: u32, max_api: u32) -> DispatchTable {
    let mut ranges: Vec<VersionRange> = Vec::new();

    for (i, rev) in group.revisions.iter().enumerate() {
        let added = rev.signature.api_added;
        if added > max_api {
            warn!(
                name = %group.name,
                version = added,
                max_api,
                "revision newer than the highest supported API, skipped"
            );
            continue;
        }
        let first = added.max(min_api);
        let last = group
            .revisions
            .get(i + 1)
            .map(|next| next.signature.api_added - 1)
            .filter(|&l| l <= max_api);
        // A revision fully shadowed below the supported span contributes
        // nothing.
        if let Some(l) = last {
            if l < min_api {
                continue;
            }
        }
        ranges.push(VersionRange {
            first,
            last,
            revision: added,
        });
    }

    // Coalesce adjacent ranges whose revisions carry the same call shape.
    // `[3,5]` + `[6,∞)` with identical signatures becomes `[3,∞)`, keeping
    // the earlier revision.
    let mut coalesced: Vec<VersionRange> = Vec::new();
    for range in ranges {
        if let Some(prev) = coalesced.last_mut() {
            let prev_sig = revision_sig(group, prev.revision);
            let cur_sig = revision_sig(group, range.revision);
            let adjacent = prev.last.is_some_and(|l| l + 1 == range.first);
            if adjacent
                && prev_sig.is_some()
                && cur_sig.is_some()
                && prev_sig.map(ClassifiedSignature::content_key)
                    == cur_sig.map(ClassifiedSignature::content_key)
            {
                prev.last = range.last;
                continue;
            }
        }
        coalesced.push(range);
    }

    let needs_hand_make = coalesced
        .first()
        .is_none_or(|r| r.first > min_api);
    let equal_everywhere =
        coalesced.len() == 1 && !needs_hand_make && coalesced[0].last.is_none();

    debug!(
        name = %group.name,
        ranges = coalesced.len(),
        equal_everywhere,
        "built dispatch table"
    );

    DispatchTable {
        name: group.name.clone(),
        ranges: coalesced,
        needs_hand_make,
        equal_everywhere,
    }
}

fn revision_sig(group: &VersionGroup, version: u32) -> Option<&ClassifiedSignature> {
    group
        .revisions
        .iter()
        .find(|r| r.signature.api_added == version)
}

// ---------------------------------------------------------------------------
// Emission
// ---------------------------------------------------------------------------

/// Emit the `InitDirect` body wiring one group's function table for the
/// requested API level. `plain` names versioned functions wired
/// unconditionally, ahead of the version-selected groups.
pub fn emit_init_direct(group_name: &str, plain: &[String], tables: &[DispatchTable]) -> String {
    let mut body: Vec<Fragment> = vec![
        Fragment::line("ifcToHost->thisClassHdl = this;"),
        Fragment::Blank,
    ];

    for vname in plain {
        body.push(Fragment::line(format!("ifcToHost->{vname} = {vname};")));
    }
    if !plain.is_empty() && !tables.is_empty() {
        body.push(Fragment::Blank);
    }

    for table in tables {
        body.extend(emit_table_selection(table));
        body.push(Fragment::Blank);
    }
    body.push(Fragment::line("return true;"));

    render(&[Fragment::Block {
        header: Some(format!(
            "bool CHdl_{group_name}::InitDirect(directFuncToHost_{group_name}* ifcToHost, int api)"
        )),
        body,
    }])
}

fn emit_table_selection(table: &DispatchTable) -> Vec<Fragment> {
    let name = &table.name;

    if table.equal_everywhere {
        let r = table.ranges[0].revision;
        return vec![Fragment::line(format!(
            "ifcToHost->{name}_v{r} = {name}_v{r};"
        ))];
    }

    let mut switch_body: Vec<Fragment> = Vec::new();
    let mut default_body: Vec<Fragment> = Vec::new();

    for range in &table.ranges {
        let r = range.revision;
        match range.last {
            Some(last) => {
                for level in range.first..=last {
                    switch_body.push(Fragment::line(format!("case {level}:")));
                }
                switch_body.push(Fragment::line(format!(
                    "  ifcToHost->{name}_v{r} = {name}_v{r};"
                )));
                switch_body.push(Fragment::line("  break;"));
            }
            None => {
                default_body.push(Fragment::Block {
                    header: Some(format!("if (api >= {})", range.first)),
                    body: vec![
                        Fragment::line(format!("ifcToHost->{name}_v{r} = {name}_v{r};")),
                        Fragment::line("break;"),
                    ],
                });
            }
        }
    }

    if table.needs_hand_make {
        default_body.push(Fragment::Line(
            "/*---AUTO_GEN_PARSE<NEED_HAND_MAKE>---*/".to_string(),
        ));
        default_body.push(Fragment::line(
            "// API levels below the oldest revision need hand-authored wiring",
        ));
        default_body.push(Fragment::Line(
            "/*---AUTO_GEN_PARSE<NEED_HAND_MAKE_END>---*/".to_string(),
        ));
    }
    default_body.push(Fragment::line("return false;"));

    switch_body.push(Fragment::line("default:"));
    switch_body.push(Fragment::Block {
        header: None,
        body: default_body,
    });

    vec![
        Fragment::line(format!("// {name}")),
        Fragment::line("switch (api)"),
        Fragment::Block {
            header: None,
            body: switch_body,
        },
    ]
}
