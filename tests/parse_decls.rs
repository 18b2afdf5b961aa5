//! Declaration-grammar tests: both flavors, version macros, override
//! markers, and malformed-input handling.

use ifcgen::model::{DeclKind, OverrideMarker};
use ifcgen::parse::parse_header;

const HEADER: &str = r#"
#pragma once

#define PLUGIN_HANDLE void*

/* A plain exported function. */
ATTR_DLL_EXPORT bool plugin_start(PLUGIN_HANDLE hdl,
                                  const char* profile) __INTRODUCED_IN(1);

// Revised in v3, old revision deprecated.
ATTR_DLL_EXPORT bool plugin_stop(PLUGIN_HANDLE hdl)
    __INTRODUCED_IN(1) __DEPRECATED_IN(3);
ATTR_DLL_EXPORT bool plugin_stop_ex(PLUGIN_HANDLE hdl, int flags) __INTRODUCED_IN(3);

ATTR_DLL_EXPORT void plugin_log(int level, const char* fmt, ...) __INTRODUCED_IN(1);

/*---AUTO_GEN_PARSE<OVERRIDE;USE_HAND_MAKE=plugin_render>---*/
ATTR_DLL_EXPORT void plugin_render(PLUGIN_HANDLE hdl) __INTRODUCED_IN(2);

/*---AUTO_GEN_PARSE<OVERRIDE;USE_INTERNAL=plugin_debug_dump>---*/
ATTR_DLL_EXPORT void plugin_debug_dump(PLUGIN_HANDLE hdl) __INTRODUCED_IN(2);

typedef bool(ATTR_APIENTRYP PFN_PLUGIN_CREATE_V1)(void*, const char*);
typedef bool(ATTR_APIENTRYP PFN_PLUGIN_CREATE_V4)(void*, const char*, int);
"#;

#[test]
fn parses_both_flavors() {
    let outcome = parse_header(HEADER, 1, false);
    assert!(outcome.malformed.is_empty(), "{:?}", outcome.malformed);

    let exported: Vec<_> = outcome
        .declarations
        .iter()
        .filter(|d| d.kind == DeclKind::Exported)
        .collect();
    let typedefs: Vec<_> = outcome
        .declarations
        .iter()
        .filter(|d| d.kind == DeclKind::FnPtrTypedef)
        .collect();
    assert_eq!(exported.len(), 6);
    assert_eq!(typedefs.len(), 2);

    let start = exported
        .iter()
        .find(|d| d.signature.name == "plugin_start")
        .expect("plugin_start parsed");
    assert_eq!(start.signature.api_added, 1);
    assert_eq!(start.signature.return_type, "bool");
    assert_eq!(start.signature.params.len(), 2);
    assert_eq!(start.signature.params[0].raw_type, "PLUGIN_HANDLE");
    assert_eq!(start.signature.params[1].raw_type, "const char*");
    assert_eq!(start.signature.params[1].name, "profile");
}

#[test]
fn version_macros_are_read() {
    let outcome = parse_header(HEADER, 1, false);
    let stop = outcome
        .declarations
        .iter()
        .find(|d| d.signature.name == "plugin_stop")
        .expect("plugin_stop parsed");
    assert_eq!(stop.signature.api_added, 1);
    assert_eq!(stop.signature.api_deprecated, Some(3));

    let stop_ex = outcome
        .declarations
        .iter()
        .find(|d| d.signature.name == "plugin_stop_ex")
        .expect("plugin_stop_ex parsed");
    assert_eq!(stop_ex.signature.api_added, 3);
    assert_eq!(stop_ex.signature.api_deprecated, None);
}

#[test]
fn pfn_typedef_name_carries_version() {
    let outcome = parse_header(HEADER, 1, false);
    let creates: Vec<_> = outcome
        .declarations
        .iter()
        .filter(|d| d.signature.name == "plugin_create")
        .collect();
    assert_eq!(creates.len(), 2);
    assert_eq!(creates[0].signature.api_added, 1);
    assert_eq!(creates[1].signature.api_added, 4);
    assert_eq!(creates[1].signature.params.len(), 3);
}

#[test]
fn variadic_tail_parses_as_parameter() {
    let outcome = parse_header(HEADER, 1, false);
    let log = outcome
        .declarations
        .iter()
        .find(|d| d.signature.name == "plugin_log")
        .expect("plugin_log parsed");
    assert_eq!(log.signature.params.len(), 3);
    assert_eq!(log.signature.params[2].raw_type, "...");
}

#[test]
fn override_markers_attach_by_name() {
    let outcome = parse_header(HEADER, 1, false);
    let render = outcome
        .declarations
        .iter()
        .find(|d| d.signature.name == "plugin_render")
        .expect("plugin_render parsed");
    assert_eq!(
        render.override_marker,
        Some(OverrideMarker::UseHandMake("plugin_render".to_string()))
    );

    let dump = outcome
        .declarations
        .iter()
        .find(|d| d.signature.name == "plugin_debug_dump")
        .expect("plugin_debug_dump parsed");
    assert_eq!(
        dump.override_marker,
        Some(OverrideMarker::UseInternal("plugin_debug_dump".to_string()))
    );

    // Markers never leak onto other declarations.
    let start = outcome
        .declarations
        .iter()
        .find(|d| d.signature.name == "plugin_start")
        .expect("plugin_start parsed");
    assert_eq!(start.override_marker, None);
}

#[test]
fn missing_version_is_malformed_unless_allowed() {
    let text = "ATTR_DLL_EXPORT void plugin_ping(void);";

    let strict = parse_header(text, 2, false);
    assert!(strict.declarations.is_empty());
    assert_eq!(strict.malformed.len(), 1);
    assert!(strict.malformed[0].reason.contains("__INTRODUCED_IN"));

    let lenient = parse_header(text, 2, true);
    assert_eq!(lenient.declarations.len(), 1);
    assert_eq!(lenient.declarations[0].signature.api_added, 2);
    assert!(lenient.declarations[0].signature.params.is_empty());
}

#[test]
fn unparseable_version_number_is_malformed() {
    let text = "ATTR_DLL_EXPORT void plugin_ping(void) __INTRODUCED_IN(abc);";
    let outcome = parse_header(text, 1, true);
    assert!(outcome.declarations.is_empty());
    assert_eq!(outcome.malformed.len(), 1);
}

#[test]
fn one_bad_declaration_does_not_poison_the_rest() {
    let text = r#"
ATTR_DLL_EXPORT void plugin_good(int x) __INTRODUCED_IN(1);
ATTR_DLL_EXPORT plugin_headless __INTRODUCED_IN(1);
ATTR_DLL_EXPORT void plugin_also_good(void) __INTRODUCED_IN(1);
"#;
    let outcome = parse_header(text, 1, false);
    assert_eq!(outcome.declarations.len(), 2);
    assert_eq!(outcome.malformed.len(), 1);
}

#[test]
fn comments_do_not_hide_or_invent_declarations() {
    let text = r#"
// ATTR_DLL_EXPORT void plugin_commented_out(void) __INTRODUCED_IN(1);
/* ATTR_DLL_EXPORT void plugin_block_commented(void) __INTRODUCED_IN(1); */
ATTR_DLL_EXPORT /* inline note */ void plugin_real(void) __INTRODUCED_IN(1);
"#;
    let outcome = parse_header(text, 1, false);
    assert_eq!(outcome.declarations.len(), 1);
    assert_eq!(outcome.declarations[0].signature.name, "plugin_real");
}
