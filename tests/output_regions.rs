//! Sentinel-region splicing and change-detecting writes.

use ifcgen::output::{carry_hand_made, region_content, splice_region, write_if_changed};

const TARGET: &str = "\
// hand-written prologue
#include \"plugin.h\"

/*---AUTO_GEN_PARSE<CALLER_STUBS>---*/
// stale generated text
/*---AUTO_GEN_PARSE<CALLER_STUBS_END>---*/

// hand-written epilogue
";

#[test]
fn splice_replaces_only_the_region() {
    let out = splice_region(TARGET, "CALLER_STUBS", "int new_body;\n")
        .unwrap_or_else(|e| panic!("{e}"));

    assert!(out.contains("// hand-written prologue"));
    assert!(out.contains("// hand-written epilogue"));
    assert!(out.contains("int new_body;"));
    assert!(!out.contains("stale generated text"));
    // Markers survive the splice for the next run.
    assert!(out.contains("/*---AUTO_GEN_PARSE<CALLER_STUBS>---*/"));
    assert!(out.contains("/*---AUTO_GEN_PARSE<CALLER_STUBS_END>---*/"));
}

#[test]
fn splicing_is_idempotent() {
    let once = splice_region(TARGET, "CALLER_STUBS", "int body;\n")
        .unwrap_or_else(|e| panic!("{e}"));
    let twice = splice_region(&once, "CALLER_STUBS", "int body;\n")
        .unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(once, twice);
}

#[test]
fn missing_region_is_an_error_not_an_insertion() {
    let err = splice_region(TARGET, "CALLEE_DISPATCH", "body")
        .err()
        .map(|e| e.to_string())
        .unwrap_or_default();
    assert!(err.contains("CALLEE_DISPATCH"), "{err}");
}

#[test]
fn region_content_reads_between_the_markers() {
    assert_eq!(
        region_content(TARGET, "CALLER_STUBS"),
        Some("// stale generated text")
    );
    assert_eq!(region_content(TARGET, "NO_SUCH_TAG"), None);
}

#[test]
fn hand_made_bodies_carry_across_regenerations() {
    let tag = "OVERRIDE;USE_HAND_MAKE=plugin_special";
    let previous = format!(
        "/*---AUTO_GEN_PARSE<{tag}>---*/\nint hand_written(void) {{ return 7; }}\n/*---AUTO_GEN_PARSE<{tag}_END>---*/\n"
    );
    let generated = format!(
        "/*---AUTO_GEN_PARSE<{tag}>---*/\n/*---AUTO_GEN_PARSE<{tag}_END>---*/\n"
    );

    let out = carry_hand_made(Some(&previous), &generated, tag)
        .unwrap_or_else(|e| panic!("{e}"));
    assert!(out.contains("int hand_written(void) { return 7; }"), "{out}");

    // Nothing to carry: a visible placeholder, not a silent empty region.
    let out = carry_hand_made(None, &generated, tag).unwrap_or_else(|e| panic!("{e}"));
    assert!(
        out.contains("#warning hand-written implementation missing here"),
        "{out}"
    );
}

#[test]
fn writes_are_skipped_when_content_is_unchanged() {
    let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
    let path = dir.path().join("gen").join("caller.cpp");

    let first = write_if_changed(&path, "content v1\n").unwrap_or_else(|e| panic!("{e}"));
    assert!(first, "first write must create the file");

    let second = write_if_changed(&path, "content v1\n").unwrap_or_else(|e| panic!("{e}"));
    assert!(!second, "identical content must not rewrite the file");

    let third = write_if_changed(&path, "content v2\n").unwrap_or_else(|e| panic!("{e}"));
    assert!(third, "changed content must rewrite the file");
    assert_eq!(
        std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("{e}")),
        "content v2\n"
    );
}
