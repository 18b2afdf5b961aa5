//! End-to-end pipeline test: a config with two groups, real headers and
//! sentinel-marked target files, run twice. The second run must write
//! nothing.

use std::fs;
use std::path::Path;

const CONTROL_H: &str = "\
#include <stddef.h>

typedef void* PLUGIN_HANDLE;

struct PLUGIN_ITEM
{
  int id;
  const char* label;
};

ATTR_DLL_EXPORT PLUGIN_HANDLE plugin_open(const char* path) __INTRODUCED_IN(1);
ATTR_DLL_EXPORT int plugin_count_items(PLUGIN_HANDLE handle, int* out_count) __INTRODUCED_IN(2);

typedef bool(ATTR_APIENTRYP PFN_PLUGIN_TICK_V1)(void*, int);
typedef bool(ATTR_APIENTRYP PFN_PLUGIN_TICK_V3)(void*, int, float);
";

const BROWSE_H: &str = "\
#include \"control.h\"

ATTR_DLL_EXPORT void plugin_fill_item(PLUGIN_HANDLE handle, struct PLUGIN_ITEM* item) __INTRODUCED_IN(1);
";

const CONFIG: &str = r#"
[api]
min = 1
max = 4

[output]
shared_structs = "shared/ifc_structs.h"

[[group]]
name = "control_h"
header = "control.h"
caller = "addon/control.cpp"
callee = "host/control.cpp"
shared = "shared/control.h"

[[group]]
name = "browse_h"
header = "browse.h"
caller = "addon/browse.cpp"
callee = "host/browse.cpp"
shared = "shared/browse.h"
"#;

fn region(tag: &str) -> String {
    format!("/*---AUTO_GEN_PARSE<{tag}>---*/\n/*---AUTO_GEN_PARSE<{tag}_END>---*/\n")
}

fn write(dir: &Path, rel: &str, content: &str) {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap_or_else(|e| panic!("{e}"));
    }
    fs::write(&path, content).unwrap_or_else(|e| panic!("{e}"));
}

fn read(dir: &Path, rel: &str) -> String {
    fs::read_to_string(dir.join(rel)).unwrap_or_else(|e| panic!("{e}"))
}

fn scaffold(dir: &Path) {
    write(dir, "ifcgen.toml", CONFIG);
    write(dir, "control.h", CONTROL_H);
    write(dir, "browse.h", BROWSE_H);

    let shared_skeleton = format!(
        "// hand-written includes\n{}\n{}\n{}\n{}",
        region("DIRECT_API"),
        region("FUNC_IDS"),
        region("FUNC_TUPLES"),
        region("STRUCT_WRAPPERS"),
    );
    for group in ["control", "browse"] {
        write(dir, &format!("shared/{group}.h"), &shared_skeleton);
        write(
            dir,
            &format!("addon/{group}.cpp"),
            &format!("// caller side\n{}", region("CALLER_STUBS")),
        );
        write(
            dir,
            &format!("host/{group}.cpp"),
            &format!("// host side\n{}", region("CALLEE_DISPATCH")),
        );
    }
    write(
        dir,
        "shared/ifc_structs.h",
        &format!("#pragma once\n{}", region("SHARED_STRUCTS")),
    );
}

#[test]
fn run_generates_once_then_writes_nothing() {
    let tmp = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
    let dir = tmp.path();
    scaffold(dir);

    let report = ifcgen::run(&dir.join("ifcgen.toml"), None).unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(report.groups, 2);
    assert_eq!(report.functions, 5);
    assert_eq!(report.structs, 1);
    assert_eq!(report.malformed, 0);
    assert_eq!(report.placeholders, 0);
    assert_eq!(
        report.files_written, 7,
        "three files per group plus the shared struct header"
    );

    // Spot-check each target got its content.
    let shared = read(dir, "shared/control.h");
    assert!(shared.contains("// hand-written includes"), "{shared}");
    assert!(shared.contains("struct directFuncToHost_control_h"), "{shared}");
    assert!(shared.contains("funcHost_plugin_open_v1,"), "{shared}");
    assert!(
        shared.contains("typedef std::tuple<std::string> msgHost__IN_plugin_open_v1;"),
        "{shared}"
    );

    let caller = read(dir, "addon/control.cpp");
    assert!(
        caller.contains("ATTR_DLL_EXPORT PLUGIN_HANDLE plugin_open(const char* path)"),
        "{caller}"
    );
    // Fn-pointer typedefs run host→plugin and get no caller stub.
    assert!(!caller.contains("plugin_tick"), "{caller}");

    let callee = read(dir, "host/control.cpp");
    assert!(callee.contains("bool CHdl_control_h::HandleMessage"), "{callee}");
    assert!(callee.contains("case funcHost_plugin_count_items_v2:"), "{callee}");
    assert!(callee.contains("bool CHdl_control_h::InitDirect"), "{callee}");
    // The two tick revisions differ, so dispatch selects by API level.
    assert!(callee.contains("switch (api)"), "{callee}");
    assert!(callee.contains("ifcToHost->plugin_tick_v1 = plugin_tick_v1;"), "{callee}");
    assert!(callee.contains("if (api >= 3)"), "{callee}");

    // The item struct is declared in control.h but referenced from browse.h,
    // so its wrapper lands in the shared struct header.
    let structs = read(dir, "shared/ifc_structs.h");
    assert!(structs.contains("struct IFC_PLUGIN_ITEM"), "{structs}");
    assert!(!read(dir, "shared/browse.h").contains("struct IFC_PLUGIN_ITEM"));

    // Second run: byte-identical output everywhere, zero writes.
    let report = ifcgen::run(&dir.join("ifcgen.toml"), None).unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(report.files_written, 0, "regeneration must be idempotent");
}

#[test]
fn missing_sentinel_region_fails_without_touching_the_file() {
    let tmp = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
    let dir = tmp.path();
    scaffold(dir);
    // Break one target: no CALLER_STUBS region to splice into.
    write(dir, "addon/browse.cpp", "// caller side, markers removed\n");

    let err = ifcgen::run(&dir.join("ifcgen.toml"), None)
        .err()
        .map(|e| format!("{e:#}"))
        .unwrap_or_default();
    assert!(err.contains("CALLER_STUBS"), "{err}");
    assert_eq!(
        read(dir, "addon/browse.cpp"),
        "// caller side, markers removed\n",
        "a failed splice must not modify the target"
    );
}

#[test]
fn hand_made_override_body_survives_regeneration() {
    let tmp = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
    let dir = tmp.path();
    scaffold(dir);

    // Mark one function hand-made and seed its body in the caller file.
    let header = format!(
        "/*---AUTO_GEN_PARSE<OVERRIDE;USE_HAND_MAKE=plugin_fill_item>---*/\n{BROWSE_H}"
    );
    write(dir, "browse.h", &header);
    let tag = "OVERRIDE;USE_HAND_MAKE=plugin_fill_item";
    write(
        dir,
        "addon/browse.cpp",
        &format!(
            "// caller side\n/*---AUTO_GEN_PARSE<CALLER_STUBS>---*/\n\
             /*---AUTO_GEN_PARSE<{tag}>---*/\nvoid plugin_fill_item(PLUGIN_HANDLE h, struct PLUGIN_ITEM* i) {{ /* custom */ }}\n/*---AUTO_GEN_PARSE<{tag}_END>---*/\n\
             /*---AUTO_GEN_PARSE<CALLER_STUBS_END>---*/\n"
        ),
    );

    ifcgen::run(&dir.join("ifcgen.toml"), None).unwrap_or_else(|e| panic!("{e}"));
    let caller = read(dir, "addon/browse.cpp");
    assert!(caller.contains("/* custom */"), "{caller}");

    ifcgen::run(&dir.join("ifcgen.toml"), None).unwrap_or_else(|e| panic!("{e}"));
    let caller = read(dir, "addon/browse.cpp");
    assert!(caller.contains("/* custom */"), "{caller}");
}
