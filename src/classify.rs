//! Parameter classifier — the marshalling-rule engine.
//!
//! Maps each parameter's raw type/name/position, with lookahead into the next
//! one or two parameters, to exactly one [`MarshallingShape`]. Rules are
//! evaluated strictly in priority order and the first match wins; that total
//! order is part of the public contract, since two rules can structurally
//! match the same text (`char* s, size_t n` is a sized buffer, not a string).
//!
//! Classification never mutates input order, never looks backward except to
//! find the format string preceding a variadic tail, and resolves known-enum
//! and known-handle membership through the [`Registry`], which must already
//! be fully populated by the pre-pass.

use tracing::{trace, warn};

use crate::model::{
    ClassifiedSignature, Declaration, Direction, MarshallingShape, Parameter, Registry, StructRef,
};

/// C scalar types carried by value on the wire.
pub const STANDARD_C_TYPES: &[&str] = &[
    "unsigned int",
    "signed int",
    "int",
    "unsigned short",
    "signed short",
    "short",
    "unsigned long",
    "signed long",
    "long",
    "unsigned long long",
    "signed long long",
    "long long",
    "bool",
    "float",
    "double",
    "long double",
    "int64_t",
    "int32_t",
    "int16_t",
    "int8_t",
    "uint64_t",
    "uint32_t",
    "uint16_t",
    "uint8_t",
    "size_t",
    "ssize_t",
    "time_t",
];

pub const STANDARD_C_TYPES_SIGNED: &[&str] = &[
    "signed int",
    "int",
    "signed short",
    "short",
    "signed long",
    "long",
    "signed long long",
    "long long",
    "int64_t",
    "int32_t",
    "int16_t",
    "int8_t",
    "ssize_t",
    "time_t",
];

pub const STANDARD_C_TYPES_UNSIGNED: &[&str] = &[
    "unsigned int",
    "unsigned short",
    "unsigned long",
    "unsigned long long",
    "uint64_t",
    "uint32_t",
    "uint16_t",
    "uint8_t",
    "size_t",
];

// ---------------------------------------------------------------------------
// Type text helpers
// ---------------------------------------------------------------------------

/// Decomposed raw parameter type: constness, pointer depth, base name and
/// any array dimensions from either spelling (`T name[N]` or `T[N] name`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeText {
    pub is_const: bool,
    pub pointer_depth: usize,
    pub base: String,
    pub dims: Vec<usize>,
}

impl TypeText {
    pub fn parse(raw_type: &str, name: &str) -> TypeText {
        let mut text = raw_type.trim().to_string();
        let is_const = text.starts_with("const ");
        if is_const {
            text = text["const ".len()..].trim().to_string();
        }
        // `const` can also trail the base (`char const*`); normalize it away.
        let text = text.replace(" const", "");

        let mut dims = Vec::new();
        let mut scan = |s: &str| {
            let mut rest = s;
            while let Some(open) = rest.find('[') {
                if let Some(close) = rest[open..].find(']') {
                    if let Ok(n) = rest[open + 1..open + close].trim().parse::<usize>() {
                        dims.push(n);
                    }
                    rest = &rest[open + close + 1..];
                } else {
                    break;
                }
            }
        };
        scan(&text);
        scan(name);

        let without_dims: String = match text.find('[') {
            Some(p) => text[..p].to_string(),
            None => text,
        };
        let pointer_depth = without_dims.matches('*').count();
        let base = without_dims
            .replace('*', "")
            .trim()
            .trim_start_matches("struct ")
            .trim_start_matches("enum ")
            .trim()
            .to_string();

        TypeText {
            is_const,
            pointer_depth,
            base,
            dims,
        }
    }

    pub fn is_scalar_base(&self) -> bool {
        STANDARD_C_TYPES.contains(&self.base.as_str())
    }

    pub fn is_size(&self) -> bool {
        self.base == "size_t" && self.pointer_depth == 0 && self.dims.is_empty()
    }

    pub fn is_size_ptr(&self) -> bool {
        self.base == "size_t" && self.pointer_depth == 1 && !self.is_const
    }
}

// ---------------------------------------------------------------------------
// Rule table
// ---------------------------------------------------------------------------

/// Context handed to each rule: the parameter under classification plus
/// read-only access to its neighbors and the registries.
pub struct RuleCtx<'a> {
    pub param: &'a Parameter,
    pub ty: TypeText,
    pub index: usize,
    pub params: &'a [Parameter],
    pub registry: &'a Registry,
}

impl<'a> RuleCtx<'a> {
    fn next(&self, offset: usize) -> Option<TypeText> {
        self.params
            .get(self.index + offset)
            .map(|p| TypeText::parse(&p.raw_type, &p.name))
    }

    fn prev(&self) -> Option<TypeText> {
        self.index
            .checked_sub(1)
            .and_then(|i| self.params.get(i))
            .map(|p| TypeText::parse(&p.raw_type, &p.name))
    }
}

/// A successful rule application: the shape plus any neighbor parameters the
/// rule consumed as size/length companions.
pub struct RuleMatch {
    pub shape: MarshallingShape,
    pub consumed: Vec<usize>,
}

impl RuleMatch {
    fn plain(shape: MarshallingShape) -> Option<RuleMatch> {
        Some(RuleMatch {
            shape,
            consumed: Vec::new(),
        })
    }
}

/// One ordered classification rule: a named predicate + constructor pair.
pub struct Rule {
    pub name: &'static str,
    pub apply: fn(&RuleCtx) -> Option<RuleMatch>,
}

/// The fixed priority order. Shared by parameter and struct-field
/// classification; do not reorder without updating the documented contract.
pub const RULES: &[Rule] = &[
    Rule {
        name: "variadic",
        apply: rule_variadic,
    },
    Rule {
        name: "ptr-ptr-two-sizes",
        apply: rule_ptr_ptr_two_sizes,
    },
    Rule {
        name: "fixed-2d-array",
        apply: rule_fixed_2d_array,
    },
    Rule {
        name: "fixed-1d-array",
        apply: rule_fixed_1d_array,
    },
    Rule {
        name: "string-array",
        apply: rule_string_array,
    },
    Rule {
        name: "sized-buffer",
        apply: rule_sized_buffer,
    },
    Rule {
        name: "string",
        apply: rule_string,
    },
    Rule {
        name: "struct-array",
        apply: rule_struct_array,
    },
    Rule {
        name: "known-enum",
        apply: rule_known_enum,
    },
    Rule {
        name: "known-struct",
        apply: rule_known_struct,
    },
    Rule {
        name: "scalar",
        apply: rule_scalar,
    },
    Rule {
        name: "opaque-handle",
        apply: rule_opaque_handle,
    },
];

/// Classify one parameter. The first matching rule wins and classification
/// stops; anything unmatched becomes [`MarshallingShape::RawFallback`].
pub fn classify(
    param: &Parameter,
    index: usize,
    params: &[Parameter],
    registry: &Registry,
) -> RuleMatch {
    let ctx = RuleCtx {
        param,
        ty: TypeText::parse(&param.raw_type, &param.name),
        index,
        params,
        registry,
    };
    for rule in RULES {
        if let Some(m) = (rule.apply)(&ctx) {
            trace!(
                param = %param.name,
                raw = %param.raw_type,
                rule = rule.name,
                "classified"
            );
            return m;
        }
    }
    warn!(
        param = %param.name,
        raw = %param.raw_type,
        "no classification rule matched, emitting hand-edit placeholder"
    );
    RuleMatch {
        shape: MarshallingShape::RawFallback {
            raw_type: param.raw_type.clone(),
        },
        consumed: Vec::new(),
    }
}

// Rule 1: the `...` tail, valid only behind a `const char*` format string.
fn rule_variadic(ctx: &RuleCtx) -> Option<RuleMatch> {
    if ctx.param.raw_type != "..." {
        return None;
    }
    let prev = ctx.prev()?;
    if prev.is_const && prev.base == "char" && prev.pointer_depth == 1 {
        return RuleMatch::plain(MarshallingShape::Variadic {
            format_param: ctx.index - 1,
        });
    }
    // `...` without a format string cannot be marshalled.
    RuleMatch::plain(MarshallingShape::RawFallback {
        raw_type: "...".to_string(),
    })
}

// Rule 2: `T**` followed by two size parameters — a callee-allocated buffer
// with an input capacity and an output length.
fn rule_ptr_ptr_two_sizes(ctx: &RuleCtx) -> Option<RuleMatch> {
    if ctx.ty.pointer_depth != 2 || !ctx.ty.is_scalar_base() {
        return None;
    }
    let first = ctx.next(1)?;
    let second = ctx.next(2)?;
    if (first.is_size() || first.is_size_ptr()) && (second.is_size() || second.is_size_ptr()) {
        return Some(RuleMatch {
            shape: MarshallingShape::SizedBuffer {
                element: ctx.ty.base.clone(),
                size_param: ctx.index + 1,
                size_out_param: Some(ctx.index + 2),
                direction: Direction::Out,
            },
            consumed: vec![ctx.index + 1, ctx.index + 2],
        });
    }
    None
}

// Rule 3: `T name[N][M]`.
fn rule_fixed_2d_array(ctx: &RuleCtx) -> Option<RuleMatch> {
    if ctx.ty.dims.len() == 2 && ctx.ty.pointer_depth == 0 {
        return RuleMatch::plain(MarshallingShape::FixedArray {
            element: ctx.ty.base.clone(),
            dims: ctx.ty.dims.clone(),
        });
    }
    None
}

// Rule 4: `T name[N]` — both spellings (dimension on the name or the type).
fn rule_fixed_1d_array(ctx: &RuleCtx) -> Option<RuleMatch> {
    if ctx.ty.dims.len() == 1 && ctx.ty.pointer_depth == 0 {
        return RuleMatch::plain(MarshallingShape::FixedArray {
            element: ctx.ty.base.clone(),
            dims: ctx.ty.dims.clone(),
        });
    }
    None
}

// Rule 5: `const char**` + `size_t` (in) or `char***` + `size_t*` (out).
fn rule_string_array(ctx: &RuleCtx) -> Option<RuleMatch> {
    if ctx.ty.base != "char" {
        return None;
    }
    let next = ctx.next(1)?;
    if ctx.ty.pointer_depth == 2 && ctx.ty.is_const && next.is_size() {
        return Some(RuleMatch {
            shape: MarshallingShape::StringArray {
                size_param: ctx.index + 1,
                direction: Direction::In,
            },
            consumed: vec![ctx.index + 1],
        });
    }
    if ctx.ty.pointer_depth == 3 && !ctx.ty.is_const && next.is_size_ptr() {
        return Some(RuleMatch {
            shape: MarshallingShape::StringArray {
                size_param: ctx.index + 1,
                direction: Direction::Out,
            },
            consumed: vec![ctx.index + 1],
        });
    }
    None
}

// Rule 6: scalar `T*` immediately followed by a by-value `size_t`. Outranks
// the string rules: `char* s, size_t n` is a buffer.
fn rule_sized_buffer(ctx: &RuleCtx) -> Option<RuleMatch> {
    if ctx.ty.pointer_depth != 1 || (!ctx.ty.is_scalar_base() && ctx.ty.base != "char") {
        return None;
    }
    let next = ctx.next(1)?;
    if !next.is_size() {
        return None;
    }
    let direction = if ctx.ty.is_const {
        Direction::In
    } else {
        Direction::Out
    };
    Some(RuleMatch {
        shape: MarshallingShape::SizedBuffer {
            element: ctx.ty.base.clone(),
            size_param: ctx.index + 1,
            size_out_param: None,
            direction,
        },
        consumed: vec![ctx.index + 1],
    })
}

// Rule 7: strings. `const char*` borrowed in; `char*` and the size-less
// `char**` spelling are callee-written owned strings.
fn rule_string(ctx: &RuleCtx) -> Option<RuleMatch> {
    if ctx.ty.base != "char" || !ctx.ty.dims.is_empty() {
        return None;
    }
    match (ctx.ty.pointer_depth, ctx.ty.is_const) {
        (1, true) => RuleMatch::plain(MarshallingShape::BorrowedString),
        (1, false) | (2, false) => RuleMatch::plain(MarshallingShape::OwnedString),
        _ => None,
    }
}

// Rule 8: `struct T**` + `size_t*` — callee-allocated struct array.
fn rule_struct_array(ctx: &RuleCtx) -> Option<RuleMatch> {
    if ctx.ty.pointer_depth != 2 || ctx.registry.struct_body(&ctx.ty.base).is_none() {
        return None;
    }
    let next = ctx.next(1)?;
    if next.is_size_ptr() {
        return Some(RuleMatch {
            shape: MarshallingShape::StructArray {
                struct_ref: StructRef(ctx.ty.base.clone()),
                size_param: ctx.index + 1,
            },
            consumed: vec![ctx.index + 1],
        });
    }
    None
}

// Rule 9: registry-known enum, by value or by pointer.
fn rule_known_enum(ctx: &RuleCtx) -> Option<RuleMatch> {
    if !ctx.registry.is_enum(&ctx.ty.base) {
        return None;
    }
    match ctx.ty.pointer_depth {
        0 => RuleMatch::plain(MarshallingShape::Enum {
            c_type: ctx.ty.base.clone(),
            pointer: false,
            direction: Direction::In,
        }),
        1 => RuleMatch::plain(MarshallingShape::Enum {
            c_type: ctx.ty.base.clone(),
            pointer: true,
            direction: pointer_direction(ctx),
        }),
        _ => None,
    }
}

// Rule 10: registry-known struct, carried by wrapper value. Parameters in
// this ABI always pass structs by pointer; the depth-0 case only occurs for
// struct fields nesting another struct by value.
fn rule_known_struct(ctx: &RuleCtx) -> Option<RuleMatch> {
    if ctx.ty.pointer_depth > 1 || ctx.registry.struct_body(&ctx.ty.base).is_none() {
        return None;
    }
    RuleMatch::plain(MarshallingShape::StructByValuePointer {
        struct_ref: StructRef(ctx.ty.base.clone()),
        direction: if ctx.ty.is_const || ctx.ty.pointer_depth == 0 {
            Direction::In
        } else {
            Direction::Out
        },
    })
}

// A non-const pointer named `out_*`/`ret*` is a pure out-parameter; otherwise
// the callee may also read the seed value, so it rides in both tuples.
fn pointer_direction(ctx: &RuleCtx) -> Direction {
    if ctx.ty.is_const {
        Direction::In
    } else if ctx.param.name.starts_with("out") || ctx.param.name.starts_with("ret") {
        Direction::Out
    } else {
        Direction::InOut
    }
}

// Rule 11: standard scalars, by value or by pointer.
fn rule_scalar(ctx: &RuleCtx) -> Option<RuleMatch> {
    if !ctx.ty.is_scalar_base() || !ctx.ty.dims.is_empty() {
        return None;
    }
    match ctx.ty.pointer_depth {
        0 => RuleMatch::plain(MarshallingShape::Scalar {
            c_type: ctx.ty.base.clone(),
            pointer: false,
            direction: Direction::In,
        }),
        1 => RuleMatch::plain(MarshallingShape::Scalar {
            c_type: ctx.ty.base.clone(),
            pointer: true,
            direction: pointer_direction(ctx),
        }),
        _ => None,
    }
}

// Rule 12: registry-known opaque handles (and the bare `void*`), passed
// through without interpretation.
fn rule_opaque_handle(ctx: &RuleCtx) -> Option<RuleMatch> {
    let is_handle = ctx.registry.is_handle(&ctx.ty.base)
        || (ctx.ty.base == "void" && ctx.ty.pointer_depth == 1);
    if is_handle && ctx.ty.pointer_depth <= 1 {
        return RuleMatch::plain(MarshallingShape::OpaqueHandle {
            c_type: ctx.ty.base.clone(),
        });
    }
    None
}

// ---------------------------------------------------------------------------
// Return-value classification
// ---------------------------------------------------------------------------

/// Classify a return type. `None` for `void`.
pub fn classify_return(return_type: &str, registry: &Registry) -> Option<MarshallingShape> {
    let ty = TypeText::parse(return_type, "");
    if ty.base == "void" && ty.pointer_depth == 0 {
        return None;
    }
    if ty.base == "char" && ty.pointer_depth == 1 {
        return Some(if ty.is_const {
            MarshallingShape::BorrowedString
        } else {
            MarshallingShape::OwnedString
        });
    }
    if registry.is_enum(&ty.base) && ty.pointer_depth == 0 {
        return Some(MarshallingShape::Enum {
            c_type: ty.base,
            pointer: false,
            direction: Direction::Out,
        });
    }
    if ty.is_scalar_base() && ty.pointer_depth == 0 {
        return Some(MarshallingShape::Scalar {
            c_type: ty.base,
            pointer: false,
            direction: Direction::Out,
        });
    }
    if registry.is_handle(&ty.base) || (ty.base == "void" && ty.pointer_depth == 1) {
        return Some(MarshallingShape::OpaqueHandle { c_type: ty.base });
    }
    Some(MarshallingShape::RawFallback {
        raw_type: return_type.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Whole-signature classification and wire-tuple derivation
// ---------------------------------------------------------------------------

/// Classify every parameter and the return value of one declaration and
/// derive its wire tuples. Deterministic: the same signature with the same
/// registries always yields the identical assignment.
pub fn classify_signature(decl: &Declaration, registry: &Registry) -> ClassifiedSignature {
    let params = &decl.signature.params;
    let mut param_shapes: Vec<MarshallingShape> = Vec::with_capacity(params.len());
    let mut consumed_by: Vec<Option<usize>> = vec![None; params.len()];

    for (index, param) in params.iter().enumerate() {
        let m = classify(param, index, params, registry);
        for c in &m.consumed {
            consumed_by[*c] = Some(index);
        }
        param_shapes.push(m.shape);
    }

    let return_shape = classify_return(&decl.signature.return_type, registry);

    let mut in_tuple = Vec::new();
    let mut out_tuple = Vec::new();
    if let Some(ret) = &return_shape {
        out_tuple.push(wire_type(ret));
    }
    for (index, shape) in param_shapes.iter().enumerate() {
        if consumed_by[index].is_some() {
            continue;
        }
        let (input, output) = tuple_members(shape);
        if let Some(t) = input {
            in_tuple.push(t);
        }
        if let Some(t) = output {
            out_tuple.push(t);
        }
    }

    ClassifiedSignature {
        signature: decl.signature.clone(),
        kind: decl.kind,
        override_marker: decl.override_marker.clone(),
        param_shapes,
        consumed_by,
        return_shape,
        in_tuple,
        out_tuple,
    }
}

/// The wire representation of a shape (the type spelled into the tuple
/// typedefs).
pub fn wire_type(shape: &MarshallingShape) -> String {
    match shape {
        MarshallingShape::Scalar { c_type, .. } => c_type.clone(),
        MarshallingShape::OpaqueHandle { .. } => "PtrValue".to_string(),
        MarshallingShape::Enum { c_type, .. } => c_type.clone(),
        MarshallingShape::OwnedString | MarshallingShape::BorrowedString => {
            "std::string".to_string()
        }
        MarshallingShape::StringArray { .. } => "std::vector<std::string>".to_string(),
        MarshallingShape::SizedBuffer { element, .. } => format!("std::vector<{element}>"),
        MarshallingShape::FixedArray { element, dims } => match dims.as_slice() {
            [n] => format!("std::array<{element}, {n}>"),
            [n, m] => format!("std::array<std::array<{element}, {m}>, {n}>"),
            _ => format!("std::vector<{element}>"),
        },
        MarshallingShape::StructByValuePointer { struct_ref, .. } => struct_ref.wrapper_name(),
        MarshallingShape::StructArray { struct_ref, .. } => {
            format!("std::vector<{}>", struct_ref.wrapper_name())
        }
        MarshallingShape::Variadic { .. } => "std::string".to_string(),
        MarshallingShape::RawFallback { raw_type } => {
            format!("/* NEED_HAND_EDIT: {raw_type} */ void*")
        }
    }
}

/// In/out tuple membership per shape: input member if not a pure
/// out-parameter, output member if writable by the callee.
pub fn tuple_members(shape: &MarshallingShape) -> (Option<String>, Option<String>) {
    match shape {
        MarshallingShape::Scalar { direction, .. }
        | MarshallingShape::Enum { direction, .. }
        | MarshallingShape::StringArray { direction, .. }
        | MarshallingShape::StructByValuePointer { direction, .. } => {
            let input = direction.is_input().then(|| wire_type(shape));
            let output = direction.is_output().then(|| wire_type(shape));
            (input, output)
        }
        MarshallingShape::SizedBuffer { direction, .. } => match direction {
            // In-buffer: contents travel forward.
            Direction::In => (Some(wire_type(shape)), None),
            // Out-buffer: the capacity travels forward, the data back.
            _ => (Some("size_t".to_string()), Some(wire_type(shape))),
        },
        MarshallingShape::OpaqueHandle { .. }
        | MarshallingShape::BorrowedString
        | MarshallingShape::FixedArray { .. } => (Some(wire_type(shape)), None),
        MarshallingShape::OwnedString => (None, Some(wire_type(shape))),
        MarshallingShape::StructArray { .. } => (None, Some(wire_type(shape))),
        // The format string is its own BorrowedString member; the tail is
        // rendered caller-side and contributes nothing.
        MarshallingShape::Variadic { .. } => (None, None),
        MarshallingShape::RawFallback { .. } => (None, None),
    }
}

// ---------------------------------------------------------------------------
// Default-return table
// ---------------------------------------------------------------------------

/// The deterministic fallback value returned on an error/transport-failure
/// path. Callers rely on this table to fail safely; reproduce it exactly:
/// `false` for bool, `0.0f`/`0.0` for floats, `0` for unsigned, `-1` for
/// signed, `nullptr` for pointers and handles, the first-recorded enumerator
/// for enums, nothing for `void`.
pub fn default_return(return_type: &str, registry: &Registry) -> String {
    let ty = TypeText::parse(return_type, "");
    if ty.base == "void" && ty.pointer_depth == 0 {
        return String::new();
    }
    if ty.base == "bool" && ty.pointer_depth == 0 {
        return "false".to_string();
    }
    if ty.pointer_depth > 0 || registry.is_handle(&ty.base) {
        return "nullptr".to_string();
    }
    if ty.base == "float" {
        return "0.0f".to_string();
    }
    if ty.base == "double" || ty.base == "long double" {
        return "0.0".to_string();
    }
    if STANDARD_C_TYPES_UNSIGNED.contains(&ty.base.as_str()) {
        return "0".to_string();
    }
    if STANDARD_C_TYPES_SIGNED.contains(&ty.base.as_str()) {
        return "-1".to_string();
    }
    if let Some(first) = registry.enum_default(&ty.base) {
        return first.to_string();
    }
    // Unknown return type: surfaced as a placeholder, never silently guessed.
    format!("/* NEED_HAND_EDIT: default for {return_type} */ 0")
}
