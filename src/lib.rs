//! ifcgen — versioned C ABI declarations → marshalling stub generator.
//!
//! Reads the plugin-facing C headers of a host application, classifies every
//! exported function's parameters into marshalling shapes, and splices the
//! generated caller stubs, callee dispatch cases, wire-tuple typedefs and
//! struct wrappers into sentinel-marked regions of the interface sources.
//! Both a serialized transport path and a direct function-pointer path are
//! generated from the same classification, so the two can never disagree.
//!
//! # Quick start
//!
//! Regenerate all interface sources from a config (suitable for CI checks):
//!
//! ```no_run
//! use std::path::Path;
//!
//! let report = ifcgen::run(Path::new("ifcgen.toml"), None).unwrap();
//! println!("{} files changed", report.files_written);
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

pub mod classify;
pub mod config;
pub mod dispatch;
pub mod emit;
pub mod model;
pub mod output;
pub mod parse;
pub mod scan;
pub mod structs;

use config::{Config, GroupConfig};
use model::{ClassifiedSignature, DeclKind, OverrideMarker, Registry};
use structs::{DescriptorSet, PendingRef};

/// Sentinel region tags expected in the target files.
pub const TAG_DIRECT_API: &str = "DIRECT_API";
pub const TAG_FUNC_IDS: &str = "FUNC_IDS";
pub const TAG_FUNC_TUPLES: &str = "FUNC_TUPLES";
pub const TAG_STRUCT_WRAPPERS: &str = "STRUCT_WRAPPERS";
pub const TAG_CALLER_STUBS: &str = "CALLER_STUBS";
pub const TAG_CALLEE_DISPATCH: &str = "CALLEE_DISPATCH";
pub const TAG_SHARED_STRUCTS: &str = "SHARED_STRUCTS";

/// Summary of one generator run.
#[derive(Debug, Default)]
pub struct Report {
    pub groups: usize,
    pub functions: usize,
    pub structs: usize,
    /// Files whose content actually changed. Zero on an idempotent re-run.
    pub files_written: usize,
    /// Declarations skipped as malformed.
    pub malformed: usize,
    /// Signatures that fell through to a hand-edit placeholder.
    pub placeholders: usize,
}

/// One group's parsed and classified declarations, ready for emission.
struct GroupWork {
    cfg: GroupConfig,
    header_path: PathBuf,
    sigs: Vec<ClassifiedSignature>,
}

/// Run the full pipeline: load config, pre-scan registries, parse and
/// classify each group, resolve struct descriptors, emit and splice.
///
/// `config_path` is the path to an `ifcgen.toml` configuration file.
/// `out_dir` optionally re-roots the target files named in the config.
pub fn run(config_path: &Path, out_dir: Option<&Path>) -> Result<Report> {
    let cfg = config::load_config(config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;
    cfg.validate()?;

    let base_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
    let out_base = out_dir.unwrap_or(base_dir);

    let mut report = Report {
        groups: cfg.group.len(),
        ..Report::default()
    };

    // Registry pre-pass over every header before any classification, so a
    // struct declared in one group's header is known when another group's
    // function references it.
    let mut registry = Registry::default();
    for group in &cfg.group {
        let header = config::resolve_header(&group.header, base_dir, &cfg.include_paths);
        scan::scan_header(&mut registry, &header)
            .with_context(|| format!("scanning {}", header.display()))?;
    }
    info!(
        handles = registry.handle_count(),
        enums = registry.enum_count(),
        structs = registry.struct_count(),
        "registry pre-pass complete"
    );

    // Parse and classify each group's declarations.
    let mut work: Vec<GroupWork> = Vec::new();
    let mut pending: Vec<PendingRef> = Vec::new();
    for group in &cfg.group {
        let header_path = config::resolve_header(&group.header, base_dir, &cfg.include_paths);
        let text = fs::read_to_string(&header_path)
            .with_context(|| format!("reading {}", header_path.display()))?;
        let outcome = parse::parse_header(&text, cfg.api.min, cfg.api.allow_unversioned);
        report.malformed += outcome.malformed.len();
        for m in &outcome.malformed {
            warn!(group = %group.name, reason = %m.reason, text = %m.text, "skipped declaration");
        }

        let sigs: Vec<ClassifiedSignature> = outcome
            .declarations
            .iter()
            .map(|d| classify::classify_signature(d, &registry))
            .collect();
        for sig in &sigs {
            for shape in sig.param_shapes.iter().chain(sig.return_shape.iter()) {
                if let Some(struct_ref) = shape.struct_ref() {
                    pending.push(PendingRef {
                        struct_ref: struct_ref.clone(),
                        referenced_from: header_path.clone(),
                    });
                }
            }
        }
        report.functions += sigs.len();
        report.placeholders += sigs.iter().filter(|s| s.has_fallback()).count();
        info!(
            group = %group.name,
            functions = sigs.len(),
            "classified group"
        );
        work.push(GroupWork {
            cfg: group.clone(),
            header_path,
            sigs,
        });
    }

    let descriptors = structs::resolve_all(&pending, &registry)?;
    report.structs = descriptors.len();

    // Emission and splicing, one group at a time.
    for gw in &work {
        report.files_written += emit_group(gw, &cfg, &registry, &descriptors, out_base)?;
    }

    // Shared struct wrappers collect into one file for the whole run.
    let shared_wrappers: Vec<String> = descriptors
        .iter()
        .filter(|d| d.shared)
        .map(|d| emit::emit_struct_wrapper(d, &descriptors))
        .collect();
    if !shared_wrappers.is_empty() {
        let target = out_base.join(&cfg.output.shared_structs);
        let previous = fs::read_to_string(&target)
            .with_context(|| format!("reading {}", target.display()))?;
        let spliced =
            output::splice_region(&previous, TAG_SHARED_STRUCTS, &shared_wrappers.join("\n"))?;
        if output::write_if_changed(&target, &spliced)? {
            report.files_written += 1;
        }
    }

    info!(
        groups = report.groups,
        functions = report.functions,
        structs = report.structs,
        files_written = report.files_written,
        malformed = report.malformed,
        placeholders = report.placeholders,
        "generation complete"
    );
    Ok(report)
}

/// Emit one group's stubs and splice them into its three target files.
/// Returns the number of files whose content changed.
fn emit_group(
    gw: &GroupWork,
    cfg: &Config,
    registry: &Registry,
    descriptors: &DescriptorSet,
    out_base: &Path,
) -> Result<usize> {
    let group = &gw.cfg.name;
    let stubs: Vec<(&ClassifiedSignature, emit::StubSet)> = gw
        .sigs
        .iter()
        .map(|s| (s, emit::emit(s, group, registry, descriptors)))
        .collect();

    let mut written = 0;

    // Shared header: direct-call typedefs and table, message identifiers,
    // wire-tuple typedefs, and the wrappers for structs declared here.
    let mut tuples = String::new();
    for (_, stub) in &stubs {
        tuples.push_str(&stub.in_tuple_typedef);
        tuples.push('\n');
        tuples.push_str(&stub.out_tuple_typedef);
        tuples.push('\n');
    }
    let direct_api = format!(
        "{}\n{}",
        emit::emit_direct_typedefs(&gw.sigs),
        emit::emit_direct_table(group, &gw.sigs)
    );
    let func_ids = emit::emit_func_enum(group, &gw.sigs);
    let inline_wrappers: Vec<String> = descriptors
        .iter()
        .filter(|d| !d.shared && d.header == gw.header_path)
        .map(|d| emit::emit_struct_wrapper(d, descriptors))
        .collect();

    written += splice_file(
        &out_base.join(&gw.cfg.shared),
        &[
            (TAG_DIRECT_API, direct_api),
            (TAG_FUNC_IDS, func_ids),
            (TAG_FUNC_TUPLES, tuples),
            (TAG_STRUCT_WRAPPERS, inline_wrappers.join("\n")),
        ],
        &gw.sigs,
    )?;

    // Caller file: one stub definition per exported function. Fn-pointer
    // typedefs run the other direction and only appear in dispatch.
    let caller_stubs: Vec<String> = stubs
        .iter()
        .filter(|(sig, _)| sig.kind == DeclKind::Exported)
        .map(|(_, stub)| stub.caller_stub.clone())
        .collect();
    written += splice_file(
        &out_base.join(&gw.cfg.caller),
        &[(TAG_CALLER_STUBS, caller_stubs.join("\n"))],
        &gw.sigs,
    )?;

    // Callee file: the message switch plus the direct-table wiring. Exported
    // functions wire unconditionally; fn-pointer groups go through the
    // version-selection switch.
    let mut callee = handle_message(group, &stubs);
    let plain: Vec<String> = gw
        .sigs
        .iter()
        .filter(|s| s.kind == DeclKind::Exported)
        .map(ClassifiedSignature::versioned_name)
        .collect();
    let groups = dispatch::group_versions(&gw.sigs);
    let tables: Vec<dispatch::DispatchTable> = groups
        .iter()
        .map(|g| dispatch::build_table(g, cfg.api.min, cfg.api.max))
        .collect();
    callee.push('\n');
    callee.push_str(&dispatch::emit_init_direct(group, &plain, &tables));
    written += splice_file(
        &out_base.join(&gw.cfg.callee),
        &[(TAG_CALLEE_DISPATCH, callee)],
        &gw.sigs,
    )?;

    Ok(written)
}

/// The callee-side `HandleMessage` definition for one group.
fn handle_message(group: &str, stubs: &[(&ClassifiedSignature, emit::StubSet)]) -> String {
    let gid = emit::group_id(group);
    let mut text = format!(
        "bool CHdl_{group}::HandleMessage(int funcGroup, int func, const msgpack::unpacked& in, msgpack::sbuffer& out)\n{{\n  if (funcGroup != {gid})\n    return false;\n\n  switch (func)\n  {{\n"
    );
    for (sig, stub) in stubs {
        // Internal-only functions are annotated, not dispatched.
        if let Some(OverrideMarker::UseInternal(name)) = &sig.override_marker {
            text.push_str(&format!("    // generator internal: {name}\n"));
            continue;
        }
        if sig.kind == DeclKind::FnPtrTypedef {
            continue;
        }
        text.push_str(&emit::indent(&stub.callee_case, 2));
    }
    text.push_str("    default:\n      break;\n  }\n  return false;\n}\n");
    text
}

/// Splice the given `(tag, content)` pairs into one target file, carrying
/// hand-written override bodies across, and write it back if changed.
fn splice_file(
    target: &Path,
    regions: &[(&str, String)],
    sigs: &[ClassifiedSignature],
) -> Result<usize> {
    let previous = fs::read_to_string(target)
        .with_context(|| format!("reading {}", target.display()))?;

    let mut text = previous.clone();
    for (tag, content) in regions {
        text = output::splice_region(&text, tag, content)
            .with_context(|| format!("splicing {} into {}", tag, target.display()))?;
    }

    // Hand-made override bodies survive regeneration: the freshly emitted
    // regions are empty markers, refilled from the previous content.
    for sig in sigs {
        if let Some(OverrideMarker::UseHandMake(name)) = &sig.override_marker {
            let tag = format!("OVERRIDE;USE_HAND_MAKE={name}");
            if text.contains(&format!("/*---AUTO_GEN_PARSE<{tag}>---*/")) {
                text = output::carry_hand_made(Some(&previous), &text, &tag)?;
            }
        }
    }

    Ok(usize::from(output::write_if_changed(target, &text)?))
}
