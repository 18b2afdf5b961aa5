//! Version dispatch tests: nearest-not-greater selection, range coalescing,
//! and the equal-everywhere fast path.

use ifcgen::classify::classify_signature;
use ifcgen::dispatch::{VersionRange, build_table, emit_init_direct, group_versions};
use ifcgen::model::*;

fn fnptr_sig(name: &str, api: u32, param_types: &[&str]) -> ClassifiedSignature {
    let params: Vec<Parameter> = param_types
        .iter()
        .enumerate()
        .map(|(index, t)| Parameter {
            raw_type: t.to_string(),
            name: String::new(),
            index,
        })
        .collect();
    let decl = Declaration {
        kind: DeclKind::FnPtrTypedef,
        signature: Signature {
            name: name.to_string(),
            return_type: "bool".to_string(),
            params,
            api_added: api,
            api_deprecated: None,
        },
        override_marker: None,
    };
    classify_signature(&decl, &Registry::default())
}

#[test]
fn groups_collect_by_logical_name() {
    let sigs = vec![
        fnptr_sig("plugin_create", 1, &["void*"]),
        fnptr_sig("plugin_create", 4, &["void*", "int"]),
        fnptr_sig("plugin_destroy", 1, &["void*"]),
    ];
    let groups = group_versions(&sigs);
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].name, "plugin_create");
    assert_eq!(groups[0].revisions.len(), 2);
    assert_eq!(groups[1].name, "plugin_destroy");
}

#[test]
fn revision_at_selects_nearest_not_greater() {
    let sigs = vec![
        fnptr_sig("plugin_create", 2, &["void*"]),
        fnptr_sig("plugin_create", 5, &["void*", "int"]),
    ];
    let groups = group_versions(&sigs);
    let g = &groups[0];

    assert!(g.revision_at(1).is_none());
    assert_eq!(g.revision_at(2).map(|r| r.signature.api_added), Some(2));
    assert_eq!(g.revision_at(4).map(|r| r.signature.api_added), Some(2));
    assert_eq!(g.revision_at(5).map(|r| r.signature.api_added), Some(5));
    assert_eq!(g.revision_at(9).map(|r| r.signature.api_added), Some(5));
}

#[test]
fn identical_adjacent_revisions_coalesce() {
    // Same call shape re-declared at v6: [3,5] + [6,∞) collapses to [3,∞).
    let sigs = vec![
        fnptr_sig("plugin_tick", 3, &["void*", "int"]),
        fnptr_sig("plugin_tick", 6, &["void*", "int"]),
    ];
    let groups = group_versions(&sigs);
    let table = build_table(&groups[0], 3, 8);

    assert_eq!(
        table.ranges,
        vec![VersionRange {
            first: 3,
            last: None,
            revision: 3,
        }]
    );
    assert!(table.equal_everywhere);
    assert!(!table.needs_hand_make);
}

#[test]
fn differing_revisions_stay_separate() {
    let sigs = vec![
        fnptr_sig("plugin_tick", 3, &["void*", "int"]),
        fnptr_sig("plugin_tick", 6, &["void*", "int", "float"]),
    ];
    let groups = group_versions(&sigs);
    let table = build_table(&groups[0], 3, 8);

    assert_eq!(
        table.ranges,
        vec![
            VersionRange {
                first: 3,
                last: Some(5),
                revision: 3,
            },
            VersionRange {
                first: 6,
                last: None,
                revision: 6,
            },
        ]
    );
    assert!(!table.equal_everywhere);
}

#[test]
fn levels_below_oldest_revision_need_hand_make() {
    let sigs = vec![fnptr_sig("plugin_tick", 4, &["void*"])];
    let groups = group_versions(&sigs);
    let table = build_table(&groups[0], 1, 8);
    assert!(table.needs_hand_make);
    assert!(!table.equal_everywhere);

    let text = emit_init_direct("control_h", &[], &[table]);
    assert!(text.contains("NEED_HAND_MAKE"), "{text}");
    assert!(text.contains("if (api >= 4)"), "{text}");
}

#[test]
fn equal_everywhere_bypasses_the_switch() {
    let sigs = vec![fnptr_sig("plugin_tick", 1, &["void*"])];
    let groups = group_versions(&sigs);
    let table = build_table(&groups[0], 1, 8);
    assert!(table.equal_everywhere);

    let text = emit_init_direct("control_h", &[], &[table]);
    assert!(
        !text.contains("switch (api)"),
        "equal-everywhere table must not emit a switch:\n{text}"
    );
    assert!(text.contains("ifcToHost->plugin_tick_v1 = plugin_tick_v1;"));
}

#[test]
fn bounded_ranges_emit_case_fallthrough() {
    let sigs = vec![
        fnptr_sig("plugin_tick", 1, &["void*"]),
        fnptr_sig("plugin_tick", 4, &["void*", "int"]),
    ];
    let groups = group_versions(&sigs);
    let table = build_table(&groups[0], 1, 6);
    let text = emit_init_direct("control_h", &[], &[table]);

    assert!(text.contains("case 1:"), "{text}");
    assert!(text.contains("case 3:"), "{text}");
    assert!(text.contains("ifcToHost->plugin_tick_v1 = plugin_tick_v1;"));
    assert!(text.contains("if (api >= 4)"), "{text}");
    assert!(text.contains("ifcToHost->plugin_tick_v4 = plugin_tick_v4;"));
}

#[test]
fn internal_overrides_stay_out_of_dispatch() {
    let mut sig = fnptr_sig("plugin_probe", 1, &["void*"]);
    sig.override_marker = Some(OverrideMarker::UseInternal("plugin_probe".to_string()));
    let groups = group_versions(&[sig]);
    assert!(groups.is_empty());
}
