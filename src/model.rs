//! Intermediate model types — the bridge between header parsing and stub emission.
//!
//! These types are independent of both the declaration grammar and the emitted
//! C++ text, making the parser, classifier and emitter testable in isolation.

use std::collections::BTreeMap;
use std::path::PathBuf;

/// One parameter of a parsed declaration. Read-only once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    /// Raw declared type, whitespace-collapsed (e.g. `const char*`).
    pub raw_type: String,
    /// Declared name. Empty for the variadic `...` tail.
    pub name: String,
    /// Position in the parameter list.
    pub index: usize,
}

/// A parsed function declaration. Immutable once parsed; identified
/// uniquely by `(name, api_added)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub return_type: String,
    pub params: Vec<Parameter>,
    /// API version the function appeared in.
    pub api_added: u32,
    pub api_deprecated: Option<u32>,
}

/// Which declaration flavor a signature was parsed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    /// `ATTR_DLL_EXPORT <ret> <name>(...) __INTRODUCED_IN(n);`
    Exported,
    /// `typedef <ret>(ATTR_APIENTRYP PFN_<NAME>_V<n>)(...);`
    FnPtrTypedef,
}

/// A parsed declaration together with its flavor and any override marker
/// attached to it in the header.
#[derive(Debug, Clone)]
pub struct Declaration {
    pub kind: DeclKind,
    pub signature: Signature,
    pub override_marker: Option<OverrideMarker>,
}

/// Manual-override markers recognized next to a declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverrideMarker {
    /// `OVERRIDE;USE_HAND_MAKE=<name>` — the stub body is hand-written and
    /// must be pulled from the target file's override region.
    UseHandMake(String),
    /// `OVERRIDE;USE_INTERNAL=<name>` — generator-internal only; annotated
    /// but not wired into the cross-boundary dispatch tables.
    UseInternal(String),
}

/// Data-flow direction of a parameter across the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Caller → callee only.
    In,
    /// Callee writes, caller reads back.
    Out,
    /// Present in both wire tuples.
    InOut,
}

impl Direction {
    pub fn is_input(self) -> bool {
        matches!(self, Direction::In | Direction::InOut)
    }

    pub fn is_output(self) -> bool {
        matches!(self, Direction::Out | Direction::InOut)
    }
}

/// Reference token for a struct shape. Resolution into a [`StructDescriptor`]
/// happens in a separate fixed-point pass before emission; classification
/// never calls back into the struct builder.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct StructRef(pub String);

impl StructRef {
    /// Generated wrapper type name (`IFC_<Name>`).
    pub fn wrapper_name(&self) -> String {
        format!("IFC_{}", self.0)
    }
}

/// How a parameter's value is carried across the process/ABI boundary.
///
/// The central type of the generator: every variant carries enough metadata
/// (element type, companion-parameter index, constness) to drive code
/// emission deterministically. Classification assigns exactly one shape per
/// parameter, chosen by the first matching rule in a fixed priority order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarshallingShape {
    /// Standard C scalar, by value or through a non-const pointer (out).
    Scalar {
        c_type: String,
        pointer: bool,
        direction: Direction,
    },
    /// A `void*`-like registry-known handle, passed through uninterpreted.
    OpaqueHandle { c_type: String },
    /// Registry-known enum, by value or through a non-const pointer (out).
    Enum {
        c_type: String,
        pointer: bool,
        direction: Direction,
    },
    /// `char*` — callee-allocated string the caller receives and owns.
    OwnedString,
    /// `const char*` — borrowed input string.
    BorrowedString,
    /// `char**`/`char***` with a companion length parameter.
    StringArray {
        size_param: usize,
        direction: Direction,
    },
    /// `T*` with a companion `size_t` length, optionally a second out length
    /// (`T**` + two sizes spelling).
    SizedBuffer {
        element: String,
        size_param: usize,
        size_out_param: Option<usize>,
        direction: Direction,
    },
    /// `T name[N]` or `T name[N][M]`.
    FixedArray { element: String, dims: Vec<usize> },
    /// `struct T*` — registry-known struct carried by wrapper value.
    StructByValuePointer {
        struct_ref: StructRef,
        direction: Direction,
    },
    /// `struct T**` + `size_t*` — callee-allocated array of structs.
    StructArray {
        struct_ref: StructRef,
        size_param: usize,
    },
    /// The `...` tail, paired with the preceding format-string parameter.
    Variadic { format_param: usize },
    /// Unclassifiable — emits a needs-hand-edit placeholder, never guessed.
    RawFallback { raw_type: String },
}

impl MarshallingShape {
    /// The struct reference carried by this shape, if any.
    pub fn struct_ref(&self) -> Option<&StructRef> {
        match self {
            MarshallingShape::StructByValuePointer { struct_ref, .. }
            | MarshallingShape::StructArray { struct_ref, .. } => Some(struct_ref),
            _ => None,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, MarshallingShape::RawFallback { .. })
    }
}

/// A [`Signature`] with one shape per parameter and one for the return
/// value, plus the derived wire tuples.
#[derive(Debug, Clone)]
pub struct ClassifiedSignature {
    pub signature: Signature,
    pub kind: DeclKind,
    pub override_marker: Option<OverrideMarker>,
    /// Shape per parameter, same order as `signature.params`.
    pub param_shapes: Vec<MarshallingShape>,
    /// For each parameter, the index of the shape that consumed it as a
    /// size/length companion, if any. Consumed parameters contribute no
    /// wire-tuple member of their own.
    pub consumed_by: Vec<Option<usize>>,
    /// `None` for `void` returns.
    pub return_shape: Option<MarshallingShape>,
    /// Ordered wire types packed caller → callee.
    pub in_tuple: Vec<String>,
    /// Ordered wire types packed callee → caller; begins with the return
    /// value's wire type when the return is non-void.
    pub out_tuple: Vec<String>,
}

impl ClassifiedSignature {
    /// Versioned function name (`foo_v2`).
    pub fn versioned_name(&self) -> String {
        format!("{}_v{}", self.signature.name, self.signature.api_added)
    }

    /// True when any parameter or the return value fell through to
    /// [`MarshallingShape::RawFallback`].
    pub fn has_fallback(&self) -> bool {
        self.param_shapes.iter().any(MarshallingShape::is_fallback)
            || self.return_shape.as_ref().is_some_and(MarshallingShape::is_fallback)
    }

    /// Content identity used for version-range coalescing: everything that
    /// affects the effective call shape except the version number itself.
    pub fn content_key(&self) -> String {
        let mut key = String::new();
        key.push_str(&self.signature.return_type);
        key.push('|');
        for p in &self.signature.params {
            key.push_str(&p.raw_type);
            key.push(',');
        }
        key.push('|');
        key.push_str(&format!("{:?}|{:?}", self.param_shapes, self.return_shape));
        key
    }
}

/// One field of a struct descriptor, classified with the same shape rules as
/// top-level parameters.
#[derive(Debug, Clone)]
pub struct DescribedField {
    pub name: String,
    pub raw_type: String,
    pub shape: MarshallingShape,
    /// Index of the shape that consumed this field as a length companion.
    pub consumed_by: Option<usize>,
}

/// A serializable wrapper descriptor for one C struct, registered at most
/// once per name and shared across all generated files for the whole run.
#[derive(Debug, Clone)]
pub struct StructDescriptor {
    pub name: String,
    /// `IFC_<Name>`.
    pub wrapper_name: String,
    pub fields: Vec<DescribedField>,
    /// True when any field owns heap memory, requiring a cleanup routine.
    pub owns_heap: bool,
    /// Header the struct was declared in.
    pub header: PathBuf,
    /// Routed to the shared file instead of inline: the struct is referenced
    /// from a header other than the one that declares it.
    pub shared: bool,
}

// ---------------------------------------------------------------------------
// Registries
// ---------------------------------------------------------------------------

/// A raw struct body collected by the registry pre-pass, before any field
/// has been classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawStruct {
    pub name: String,
    pub fields: Vec<RawField>,
    pub header: PathBuf,
}

/// One unclassified struct field (raw type + name).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawField {
    pub raw_type: String,
    pub name: String,
}

/// Process-wide tables of known opaque-handle names, enum names (with their
/// first enumerator) and struct bodies.
///
/// Built by a sequential pre-pass over **all** headers before any function is
/// classified, then passed by reference into the parser, classifier and
/// struct builder. Never implicit global state.
#[derive(Debug, Default)]
pub struct Registry {
    handles: BTreeMap<String, PathBuf>,
    /// Enum name → first-recorded enumerator (the fail-safe default value).
    enums: BTreeMap<String, String>,
    structs: BTreeMap<String, RawStruct>,
}

impl Registry {
    pub fn register_handle(&mut self, name: &str, header: &std::path::Path) {
        self.handles
            .entry(name.to_string())
            .or_insert_with(|| header.to_path_buf());
    }

    pub fn register_enum(&mut self, name: &str, first_enumerator: &str) {
        self.enums
            .entry(name.to_string())
            .or_insert_with(|| first_enumerator.to_string());
    }

    pub fn register_struct(&mut self, raw: RawStruct) {
        // First-writer-wins: duplicate declarations across headers keep the
        // first-scanned body.
        self.structs.entry(raw.name.clone()).or_insert(raw);
    }

    pub fn is_handle(&self, name: &str) -> bool {
        self.handles.contains_key(name)
    }

    pub fn is_enum(&self, name: &str) -> bool {
        self.enums.contains_key(name)
    }

    /// First-recorded enumerator for a known enum.
    pub fn enum_default(&self, name: &str) -> Option<&str> {
        self.enums.get(name).map(String::as_str)
    }

    pub fn struct_body(&self, name: &str) -> Option<&RawStruct> {
        self.structs.get(name)
    }

    pub fn handle_count(&self) -> usize {
        self.handles.len()
    }

    pub fn enum_count(&self) -> usize {
        self.enums.len()
    }

    pub fn struct_count(&self) -> usize {
        self.structs.len()
    }
}
