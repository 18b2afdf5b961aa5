//! Rule-priority tests on deliberately ambiguous signatures.

use std::path::Path;

use ifcgen::classify::{classify, classify_signature, default_return};
use ifcgen::model::*;

fn param(raw_type: &str, name: &str, index: usize) -> Parameter {
    Parameter {
        raw_type: raw_type.to_string(),
        name: name.to_string(),
        index,
    }
}

fn params(specs: &[(&str, &str)]) -> Vec<Parameter> {
    specs
        .iter()
        .enumerate()
        .map(|(i, (t, n))| param(t, n, i))
        .collect()
}

fn registry_with_known_types() -> Registry {
    let mut registry = Registry::default();
    registry.register_handle("PLUGIN_HANDLE", Path::new("types.h"));
    registry.register_enum("PLUGIN_STATUS", "PLUGIN_STATUS_OK");
    registry.register_struct(RawStruct {
        name: "PLUGIN_INFO".to_string(),
        fields: vec![
            RawField {
                raw_type: "int".to_string(),
                name: "id".to_string(),
            },
            RawField {
                raw_type: "const char*".to_string(),
                name: "name".to_string(),
            },
        ],
        header: Path::new("types.h").to_path_buf(),
    });
    registry
}

fn shape_of(specs: &[(&str, &str)], index: usize, registry: &Registry) -> MarshallingShape {
    let list = params(specs);
    classify(&list[index], index, &list, registry).shape
}

#[test]
fn sized_buffer_outranks_string() {
    let registry = Registry::default();

    // `char* s, size_t n` is a buffer, not an owned string.
    let shape = shape_of(&[("char*", "s"), ("size_t", "n")], 0, &registry);
    assert_eq!(
        shape,
        MarshallingShape::SizedBuffer {
            element: "char".to_string(),
            size_param: 1,
            size_out_param: None,
            direction: Direction::Out,
        }
    );

    // The const spelling is an input buffer.
    let shape = shape_of(&[("const char*", "s"), ("size_t", "n")], 0, &registry);
    assert!(matches!(
        shape,
        MarshallingShape::SizedBuffer {
            direction: Direction::In,
            ..
        }
    ));

    // Without the size companion it is a string again.
    let shape = shape_of(&[("char*", "s")], 0, &registry);
    assert_eq!(shape, MarshallingShape::OwnedString);
    let shape = shape_of(&[("const char*", "s")], 0, &registry);
    assert_eq!(shape, MarshallingShape::BorrowedString);
}

#[test]
fn string_array_outranks_sized_buffer() {
    let registry = Registry::default();
    let shape = shape_of(&[("const char**", "names"), ("size_t", "count")], 0, &registry);
    assert_eq!(
        shape,
        MarshallingShape::StringArray {
            size_param: 1,
            direction: Direction::In,
        }
    );

    let shape = shape_of(&[("char***", "names"), ("size_t*", "count")], 0, &registry);
    assert_eq!(
        shape,
        MarshallingShape::StringArray {
            size_param: 1,
            direction: Direction::Out,
        }
    );
}

#[test]
fn size_companion_is_consumed() {
    let registry = Registry::default();
    let list = params(&[("const uint8_t*", "data"), ("size_t", "len")]);
    let m = classify(&list[0], 0, &list, &registry);
    assert_eq!(m.consumed, vec![1]);
}

#[test]
fn two_size_spelling_is_callee_allocated_buffer() {
    let registry = Registry::default();
    let shape = shape_of(
        &[("uint8_t**", "data"), ("size_t", "capacity"), ("size_t*", "used")],
        0,
        &registry,
    );
    assert_eq!(
        shape,
        MarshallingShape::SizedBuffer {
            element: "uint8_t".to_string(),
            size_param: 1,
            size_out_param: Some(2),
            direction: Direction::Out,
        }
    );
}

#[test]
fn fixed_arrays_match_both_spellings() {
    let registry = Registry::default();

    // Dimension on the name.
    let shape = shape_of(&[("char", "buf[64]")], 0, &registry);
    assert_eq!(
        shape,
        MarshallingShape::FixedArray {
            element: "char".to_string(),
            dims: vec![64],
        }
    );

    // Dimension on the type.
    let shape = shape_of(&[("int[8]", "values")], 0, &registry);
    assert_eq!(
        shape,
        MarshallingShape::FixedArray {
            element: "int".to_string(),
            dims: vec![8],
        }
    );

    // Two dimensions.
    let shape = shape_of(&[("float", "matrix[4][4]")], 0, &registry);
    assert_eq!(
        shape,
        MarshallingShape::FixedArray {
            element: "float".to_string(),
            dims: vec![4, 4],
        }
    );
}

#[test]
fn registry_membership_drives_enum_struct_handle() {
    let registry = registry_with_known_types();

    let shape = shape_of(&[("PLUGIN_STATUS", "status")], 0, &registry);
    assert_eq!(
        shape,
        MarshallingShape::Enum {
            c_type: "PLUGIN_STATUS".to_string(),
            pointer: false,
            direction: Direction::In,
        }
    );

    // Non-const enum pointer rides in both tuples.
    let shape = shape_of(&[("PLUGIN_STATUS*", "status")], 0, &registry);
    assert_eq!(
        shape,
        MarshallingShape::Enum {
            c_type: "PLUGIN_STATUS".to_string(),
            pointer: true,
            direction: Direction::InOut,
        }
    );

    let shape = shape_of(&[("const struct PLUGIN_INFO*", "info")], 0, &registry);
    assert_eq!(
        shape,
        MarshallingShape::StructByValuePointer {
            struct_ref: StructRef("PLUGIN_INFO".to_string()),
            direction: Direction::In,
        }
    );

    let shape = shape_of(&[("PLUGIN_HANDLE", "hdl")], 0, &registry);
    assert_eq!(
        shape,
        MarshallingShape::OpaqueHandle {
            c_type: "PLUGIN_HANDLE".to_string(),
        }
    );

    // Bare void* is a handle even without registration.
    let shape = shape_of(&[("void*", "opaque")], 0, &Registry::default());
    assert_eq!(
        shape,
        MarshallingShape::OpaqueHandle {
            c_type: "void".to_string(),
        }
    );
}

#[test]
fn enum_pointers_honor_the_out_name_prefix() {
    let registry = registry_with_known_types();

    let shape = shape_of(&[("PLUGIN_STATUS*", "out_status")], 0, &registry);
    assert_eq!(
        shape,
        MarshallingShape::Enum {
            c_type: "PLUGIN_STATUS".to_string(),
            pointer: true,
            direction: Direction::Out,
        }
    );

    let shape = shape_of(&[("const PLUGIN_STATUS*", "status")], 0, &registry);
    assert_eq!(
        shape,
        MarshallingShape::Enum {
            c_type: "PLUGIN_STATUS".to_string(),
            pointer: true,
            direction: Direction::In,
        }
    );

    // A pure out enum never packs an input member.
    let decl = Declaration {
        kind: DeclKind::Exported,
        signature: Signature {
            name: "plugin_status".to_string(),
            return_type: "void".to_string(),
            params: params(&[("PLUGIN_STATUS*", "out_status")]),
            api_added: 1,
            api_deprecated: None,
        },
        override_marker: None,
    };
    let classified = classify_signature(&decl, &registry);
    assert!(classified.in_tuple.is_empty());
    assert_eq!(classified.out_tuple, vec!["PLUGIN_STATUS"]);
}

#[test]
fn struct_array_consumes_size_pointer() {
    let registry = registry_with_known_types();
    let list = params(&[("struct PLUGIN_INFO**", "entries"), ("size_t*", "count")]);
    let m = classify(&list[0], 0, &list, &registry);
    assert_eq!(
        m.shape,
        MarshallingShape::StructArray {
            struct_ref: StructRef("PLUGIN_INFO".to_string()),
            size_param: 1,
        }
    );
    assert_eq!(m.consumed, vec![1]);
}

#[test]
fn variadic_requires_format_string() {
    let registry = Registry::default();

    let shape = shape_of(&[("const char*", "fmt"), ("...", "")], 1, &registry);
    assert_eq!(shape, MarshallingShape::Variadic { format_param: 0 });

    // A tail without a preceding format string cannot be marshalled.
    let shape = shape_of(&[("int", "level"), ("...", "")], 1, &registry);
    assert!(shape.is_fallback());
}

#[test]
fn unknown_type_falls_back_without_crashing() {
    let registry = Registry::default();
    let shape = shape_of(&[("UNKNOWN_THING*", "x")], 0, &registry);
    assert_eq!(
        shape,
        MarshallingShape::RawFallback {
            raw_type: "UNKNOWN_THING*".to_string(),
        }
    );
}

#[test]
fn classification_is_deterministic() {
    let registry = registry_with_known_types();
    let decl = Declaration {
        kind: DeclKind::Exported,
        signature: Signature {
            name: "plugin_query".to_string(),
            return_type: "bool".to_string(),
            params: params(&[
                ("PLUGIN_HANDLE", "hdl"),
                ("const char*", "key"),
                ("char**", "value"),
                ("PLUGIN_STATUS*", "status"),
            ]),
            api_added: 1,
            api_deprecated: None,
        },
        override_marker: None,
    };
    let a = classify_signature(&decl, &registry);
    let b = classify_signature(&decl, &registry);
    assert_eq!(a.param_shapes, b.param_shapes);
    assert_eq!(a.in_tuple, b.in_tuple);
    assert_eq!(a.out_tuple, b.out_tuple);
    assert_eq!(a.content_key(), b.content_key());
}

#[test]
fn out_count_scenario() {
    // int plugin_list(const char* name, int* out_count) introduced in v2.
    let registry = Registry::default();
    let decl = Declaration {
        kind: DeclKind::Exported,
        signature: Signature {
            name: "plugin_list".to_string(),
            return_type: "int".to_string(),
            params: params(&[("const char*", "name"), ("int*", "out_count")]),
            api_added: 2,
            api_deprecated: None,
        },
        override_marker: None,
    };
    let classified = classify_signature(&decl, &registry);

    assert_eq!(classified.param_shapes[0], MarshallingShape::BorrowedString);
    assert_eq!(
        classified.param_shapes[1],
        MarshallingShape::Scalar {
            c_type: "int".to_string(),
            pointer: true,
            direction: Direction::Out,
        }
    );
    assert_eq!(classified.in_tuple, vec!["std::string"]);
    assert_eq!(classified.out_tuple, vec!["int", "int"]);
    assert_eq!(classified.versioned_name(), "plugin_list_v2");
    assert_eq!(default_return("int", &registry), "-1");
}

#[test]
fn default_return_table() {
    let registry = registry_with_known_types();
    assert_eq!(default_return("void", &registry), "");
    assert_eq!(default_return("bool", &registry), "false");
    assert_eq!(default_return("float", &registry), "0.0f");
    assert_eq!(default_return("double", &registry), "0.0");
    assert_eq!(default_return("unsigned int", &registry), "0");
    assert_eq!(default_return("size_t", &registry), "0");
    assert_eq!(default_return("int", &registry), "-1");
    assert_eq!(default_return("int64_t", &registry), "-1");
    assert_eq!(default_return("char*", &registry), "nullptr");
    assert_eq!(default_return("void*", &registry), "nullptr");
    assert_eq!(default_return("PLUGIN_HANDLE", &registry), "nullptr");
    assert_eq!(
        default_return("PLUGIN_STATUS", &registry),
        "PLUGIN_STATUS_OK"
    );
}
