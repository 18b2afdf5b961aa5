//! Call-stub emitter — classified signatures → C++ marshalling text.
//!
//! Everything here is rendered from one small fragment IR ([`Fragment`]) so
//! the shared-transport and direct-call paths of a stub are built from the
//! same per-parameter plan and cannot drift apart. The emitter is pure text
//! production: it never touches the filesystem and never consults global
//! state beyond the [`Registry`] and [`DescriptorSet`] passed in.

use tracing::debug;

use crate::classify::{TypeText, default_return, tuple_members, wire_type};
use crate::model::*;
use crate::structs::DescriptorSet;

/// Export marker spelled on generated caller definitions.
const EXPORT_ATTR: &str = "ATTR_DLL_EXPORT";

// ---------------------------------------------------------------------------
// Fragment IR
// ---------------------------------------------------------------------------

/// One node of emitted C++ text. Rendering is the only place indentation is
/// decided, so every producer builds structure, not whitespace.
#[derive(Debug, Clone)]
pub enum Fragment {
    Line(String),
    Blank,
    /// Optional header line followed by a braced, indented body.
    Block {
        header: Option<String>,
        body: Vec<Fragment>,
    },
    /// Preprocessor line, always rendered at column zero.
    Pp(String),
}

impl Fragment {
    pub fn line(s: impl Into<String>) -> Fragment {
        Fragment::Line(s.into())
    }
}

/// Render fragments with two-space indentation per block level.
pub fn render(fragments: &[Fragment]) -> String {
    let mut out = String::new();
    render_into(&mut out, fragments, 0);
    out
}

fn render_into(out: &mut String, fragments: &[Fragment], level: usize) {
    for f in fragments {
        match f {
            Fragment::Line(s) => {
                push_indented(out, s, level);
            }
            Fragment::Blank => out.push('\n'),
            Fragment::Pp(s) => {
                out.push_str(s);
                out.push('\n');
            }
            Fragment::Block { header, body } => {
                if let Some(h) = header {
                    push_indented(out, h, level);
                }
                push_indented(out, "{", level);
                render_into(out, body, level + 1);
                push_indented(out, "}", level);
            }
        }
    }
}

/// Shift pre-rendered text right by `levels` block levels. Blank lines and
/// preprocessor lines stay at column zero.
pub fn indent(text: &str, levels: usize) -> String {
    let pad = "  ".repeat(levels);
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        if line.is_empty() || line.starts_with('#') {
            out.push_str(line);
        } else {
            out.push_str(&pad);
            out.push_str(line);
        }
        out.push('\n');
    }
    out
}

fn push_indented(out: &mut String, s: &str, level: usize) {
    for _ in 0..level {
        out.push_str("  ");
    }
    out.push_str(s);
    out.push('\n');
}

// ---------------------------------------------------------------------------
// Stub set
// ---------------------------------------------------------------------------

/// The four text fragments generated for one classified signature.
#[derive(Debug, Clone)]
pub struct StubSet {
    /// `typedef std::tuple<...> msgHost__IN_<name>_v<n>;`
    pub in_tuple_typedef: String,
    /// `typedef std::tuple<...> msgHost_OUT_<name>_v<n>;`
    pub out_tuple_typedef: String,
    /// Exported caller-side definition with shared and direct paths.
    pub caller_stub: String,
    /// One `case funcHost_<name>_v<n>:` block for the callee switch.
    pub callee_case: String,
}

/// Wire-tuple typedef names for one versioned function.
fn in_tuple_name(vname: &str) -> String {
    format!("msgHost__IN_{vname}")
}

fn out_tuple_name(vname: &str) -> String {
    format!("msgHost_OUT_{vname}")
}

/// Per-group message identifier enum value for one versioned function.
pub fn func_id(vname: &str) -> String {
    format!("funcHost_{vname}")
}

/// Per-group message group identifier.
pub fn group_id(group: &str) -> String {
    format!("funcGroup_{group}")
}

// ---------------------------------------------------------------------------
// Slot assignment
// ---------------------------------------------------------------------------

/// Wire-tuple slot of each parameter, mirroring the tuple derivation in the
/// classifier: out slot 0 is the return value when the return is non-void.
struct Slots {
    in_slot: Vec<Option<usize>>,
    out_slot: Vec<Option<usize>>,
}

fn assign_slots(sig: &ClassifiedSignature) -> Slots {
    let n = sig.param_shapes.len();
    let mut slots = Slots {
        in_slot: vec![None; n],
        out_slot: vec![None; n],
    };
    let mut next_in = 0usize;
    let mut next_out = usize::from(sig.return_shape.is_some());
    for (index, shape) in sig.param_shapes.iter().enumerate() {
        if sig.consumed_by[index].is_some() {
            continue;
        }
        let (input, output) = tuple_members(shape);
        if input.is_some() {
            slots.in_slot[index] = Some(next_in);
            next_in += 1;
        }
        if output.is_some() {
            slots.out_slot[index] = Some(next_out);
            next_out += 1;
        }
    }
    slots
}

// ---------------------------------------------------------------------------
// Per-parameter plan
// ---------------------------------------------------------------------------

/// Everything the two stub bodies need for one parameter, derived once from
/// its shape so caller and callee stay structurally consistent.
#[derive(Debug, Default)]
struct ParamPlan {
    /// Null-check expressions guarding the caller stub entry.
    guards: Vec<String>,
    /// Statements run in the caller before packing (variadic formatting,
    /// fixed-array staging).
    caller_prepack: Vec<String>,
    /// The caller's in-tuple member expression.
    pack: Option<String>,
    /// Caller statements copying out-tuple slots back into out-parameters.
    writeback: Vec<String>,
    /// Arguments the caller passes on the direct path (usually the name).
    direct_args: Vec<String>,
    /// Local declarations in the callee case.
    callee_locals: Vec<String>,
    /// Arguments the callee passes to the versioned implementation.
    callee_args: Vec<String>,
    /// Callee statements run between the call and the out-tuple pack.
    callee_prepack: Vec<String>,
    /// The callee's out-tuple member expression.
    callee_out: Option<String>,
    /// Callee statements after packing (heap cleanup).
    callee_post: Vec<String>,
}

/// Build the plan for the parameter at `index`. Consumed size companions get
/// an empty plan; their call arguments are produced by the consuming shape.
fn plan_param(
    sig: &ClassifiedSignature,
    index: usize,
    slots: &Slots,
    descriptors: &DescriptorSet,
) -> ParamPlan {
    let param = &sig.signature.params[index];
    let shape = &sig.param_shapes[index];
    let name = param.name.clone();
    let ty = TypeText::parse(&param.raw_type, &param.name);

    let in_slot = slots.in_slot[index];
    let out_slot = slots.out_slot[index];
    let get_in = in_slot.map(|i| format!("std::get<{i}>(t)"));
    let get_out = out_slot.map(|i| format!("std::get<{i}>(t)"));

    let mut plan = ParamPlan {
        direct_args: vec![name.clone()],
        callee_args: vec![name.clone()],
        ..ParamPlan::default()
    };

    if sig.consumed_by[index].is_some() {
        // Size companions carry no plan of their own.
        plan.direct_args = vec![name];
        plan.callee_args = Vec::new();
        return plan;
    }

    match shape {
        MarshallingShape::Scalar { c_type, pointer, direction }
        | MarshallingShape::Enum { c_type, pointer, direction } => {
            if !pointer {
                plan.pack = Some(name.clone());
                plan.callee_locals
                    .push(format!("{c_type} {name} = {};", get_expr(&get_in)));
            } else {
                plan.guards.push(format!("{name} == nullptr"));
                plan.callee_args = vec![format!("&{name}")];
                match direction {
                    Direction::In => {
                        plan.pack = Some(format!("*{name}"));
                        plan.callee_locals
                            .push(format!("{c_type} {name} = {};", get_expr(&get_in)));
                    }
                    Direction::InOut => {
                        plan.pack = Some(format!("*{name}"));
                        plan.callee_locals
                            .push(format!("{c_type} {name} = {};", get_expr(&get_in)));
                        plan.writeback
                            .push(format!("*{name} = {};", get_expr(&get_out)));
                        plan.callee_out = Some(name.clone());
                    }
                    Direction::Out => {
                        plan.callee_locals.push(format!("{c_type} {name};"));
                        plan.writeback
                            .push(format!("*{name} = {};", get_expr(&get_out)));
                        plan.callee_out = Some(name.clone());
                    }
                }
            }
        }

        MarshallingShape::OpaqueHandle { c_type } => {
            let decl_type = if c_type == "void" {
                "void*".to_string()
            } else {
                c_type.clone()
            };
            if ty.pointer_depth > 0 && c_type != "void" {
                plan.guards.push(format!("{name} == nullptr"));
                plan.pack = Some(format!("PtrValue(*{name})"));
                plan.callee_locals.push(format!(
                    "{decl_type} {name} = reinterpret_cast<{decl_type}>({});",
                    get_expr(&get_in)
                ));
                plan.callee_args = vec![format!("&{name}")];
            } else {
                plan.pack = Some(format!("PtrValue({name})"));
                plan.callee_locals.push(format!(
                    "{decl_type} {name} = reinterpret_cast<{decl_type}>({});",
                    get_expr(&get_in)
                ));
            }
        }

        MarshallingShape::BorrowedString => {
            plan.guards.push(format!("{name} == nullptr"));
            plan.pack = Some(name.clone());
            plan.callee_locals.push(format!(
                "const std::string& {name} = {};",
                get_expr(&get_in)
            ));
            plan.callee_args = vec![format!("{name}.c_str()")];
        }

        MarshallingShape::OwnedString => {
            plan.guards.push(format!("{name} == nullptr"));
            if ty.pointer_depth >= 2 {
                // Callee-allocated string handed back through `char**`.
                plan.writeback.push(format!(
                    "*{name} = strdup({}.c_str());",
                    get_expr(&get_out)
                ));
                plan.callee_locals.push(format!("char* {name} = nullptr;"));
                plan.callee_args = vec![format!("&{name}")];
                plan.callee_out = Some(format!("{name} ? {name} : \"\""));
                plan.callee_post.push(format!("if ({name})"));
                plan.callee_post.push(format!("  free({name});"));
            } else {
                // Unsized caller-provided `char*` buffer: the boundary cannot
                // see its capacity, so the callee fills a fixed staging
                // buffer and the caller copies whatever came back.
                plan.writeback.push(format!(
                    "strcpy({name}, {}.c_str());",
                    get_expr(&get_out)
                ));
                plan.callee_locals
                    .push(format!("std::array<char, 1024> {name}{{}};"));
                plan.callee_args = vec![format!("{name}.data()")];
                plan.callee_out = Some(format!("{name}.data()"));
            }
        }

        MarshallingShape::StringArray { size_param, direction } => {
            let size_name = sig.signature.params[*size_param].name.clone();
            plan.guards.push(format!("{name} == nullptr"));
            if *direction == Direction::In {
                plan.pack = Some(format!(
                    "std::vector<std::string>({name}, {name} + {size_name})"
                ));
                plan.callee_locals.push(format!(
                    "const std::vector<std::string>& {name} = {};",
                    get_expr(&get_in)
                ));
                plan.callee_locals
                    .push(format!("std::vector<const char*> {name}_ptr;"));
                plan.callee_locals
                    .push(format!("{name}_ptr.reserve({name}.size());"));
                plan.callee_locals
                    .push(format!("for (const auto& auto_gen_s : {name})"));
                plan.callee_locals
                    .push(format!("  {name}_ptr.push_back(auto_gen_s.c_str());"));
                plan.callee_args = vec![format!("{name}_ptr.data()")];
                plan.callee_args.push(format!("{name}.size()"));
            } else {
                plan.guards.push(format!("{size_name} == nullptr"));
                let get = get_expr(&get_out);
                plan.writeback.push(format!(
                    "const std::vector<std::string>& {name}_out = {get};"
                ));
                plan.writeback.push(format!(
                    "*{name} = static_cast<char**>(malloc(sizeof(char*) * {name}_out.size()));"
                ));
                plan.writeback
                    .push(format!("for (size_t i = 0; i < {name}_out.size(); ++i)"));
                plan.writeback
                    .push(format!("  (*{name})[i] = strdup({name}_out[i].c_str());"));
                plan.writeback
                    .push(format!("*{size_name} = {name}_out.size();"));
                plan.callee_locals
                    .push(format!("char** {name} = nullptr;"));
                plan.callee_locals.push(format!("size_t {size_name} = 0;"));
                plan.callee_args = vec![format!("&{name}"), format!("&{size_name}")];
                plan.callee_prepack
                    .push(format!("std::vector<std::string> {name}_vec;"));
                plan.callee_prepack
                    .push(format!("{name}_vec.reserve({size_name});"));
                plan.callee_prepack
                    .push(format!("for (size_t i = 0; i < {size_name}; ++i)"));
                plan.callee_prepack.push(format!(
                    "  {name}_vec.emplace_back({name}[i] ? {name}[i] : \"\");"
                ));
                plan.callee_out = Some(format!("{name}_vec"));
                plan.callee_post
                    .push(format!("for (size_t i = 0; i < {size_name}; ++i)"));
                plan.callee_post.push(format!("  free({name}[i]);"));
                plan.callee_post.push(format!("free({name});"));
            }
        }

        MarshallingShape::SizedBuffer {
            element,
            size_param,
            size_out_param,
            direction,
        } => {
            let size_name = sig.signature.params[*size_param].name.clone();
            plan.guards.push(format!("{name} == nullptr"));
            match (direction, size_out_param) {
                (Direction::In, _) => {
                    plan.pack = Some(format!(
                        "std::vector<{element}>({name}, {name} + {size_name})"
                    ));
                    plan.callee_locals.push(format!(
                        "const std::vector<{element}>& {name} = {};",
                        get_expr(&get_in)
                    ));
                    plan.callee_args = vec![format!("{name}.data()")];
                    plan.callee_args.push(format!("{name}.size()"));
                }
                (_, None) => {
                    // Caller-provided buffer of `size_name` elements.
                    plan.pack = Some(size_name.clone());
                    let get = get_expr(&get_out);
                    plan.writeback.push(format!(
                        "const std::vector<{element}>& {name}_out = {get};"
                    ));
                    plan.writeback.push(format!(
                        "memcpy({name}, {name}_out.data(), std::min({name}_out.size(), {size_name}) * sizeof({element}));"
                    ));
                    plan.callee_locals.push(format!(
                        "size_t {size_name} = {};",
                        get_expr(&get_in)
                    ));
                    plan.callee_locals
                        .push(format!("std::vector<{element}> {name}({size_name});"));
                    plan.callee_args = vec![format!("{name}.data()"), size_name.clone()];
                    plan.callee_out = Some(name.clone());
                }
                (_, Some(out_idx)) => {
                    // Callee-allocated `T**` with capacity in and used-count out.
                    let used_name = sig.signature.params[*out_idx].name.clone();
                    plan.guards.push(format!("{used_name} == nullptr"));
                    plan.pack = Some(size_name.clone());
                    let get = get_expr(&get_out);
                    plan.writeback.push(format!(
                        "const std::vector<{element}>& {name}_out = {get};"
                    ));
                    plan.writeback.push(format!(
                        "*{name} = static_cast<{element}*>(malloc(sizeof({element}) * {name}_out.size()));"
                    ));
                    plan.writeback.push(format!(
                        "memcpy(*{name}, {name}_out.data(), sizeof({element}) * {name}_out.size());"
                    ));
                    plan.writeback
                        .push(format!("*{used_name} = {name}_out.size();"));
                    plan.callee_locals.push(format!(
                        "size_t {size_name} = {};",
                        get_expr(&get_in)
                    ));
                    plan.callee_locals
                        .push(format!("{element}* {name} = nullptr;"));
                    plan.callee_locals.push(format!("size_t {used_name} = 0;"));
                    plan.callee_args = vec![
                        format!("&{name}"),
                        size_name.clone(),
                        format!("&{used_name}"),
                    ];
                    plan.callee_prepack
                        .push(format!("std::vector<{element}> {name}_vec;"));
                    plan.callee_prepack.push(format!("if ({name})"));
                    plan.callee_prepack.push(format!(
                        "  {name}_vec.assign({name}, {name} + {used_name});"
                    ));
                    plan.callee_out = Some(format!("{name}_vec"));
                    plan.callee_post.push(format!("free({name});"));
                }
            }
        }

        MarshallingShape::FixedArray { element, dims } => {
            plan.guards.push(format!("{name} == nullptr"));
            let wire = wire_type(shape);
            plan.caller_prepack.push(format!("{wire} {name}_arr{{}};"));
            plan.caller_prepack.push(format!(
                "memcpy({name}_arr.data(), {name}, sizeof({name}_arr));"
            ));
            plan.pack = Some(format!("{name}_arr"));
            plan.callee_locals.push(format!(
                "const {wire}& {name} = {};",
                get_expr(&get_in)
            ));
            plan.callee_args = vec![match dims.as_slice() {
                [_, m] => format!(
                    "reinterpret_cast<{element}(*)[{m}]>(const_cast<std::array<{element}, {m}>*>({name}.data()))"
                ),
                _ if ty.is_const => format!("{name}.data()"),
                _ => format!("const_cast<{element}*>({name}.data())"),
            }];
        }

        MarshallingShape::StructByValuePointer { struct_ref, direction } => {
            let wrapper = struct_ref.wrapper_name();
            let c_name = &struct_ref.0;
            let owns_heap = descriptors
                .get(c_name)
                .is_some_and(|d| d.owns_heap);
            plan.guards.push(format!("{name} == nullptr"));
            if *direction == Direction::In {
                plan.pack = Some(format!("{wrapper}({name})"));
                plan.callee_locals.push(format!(
                    "{wrapper} {name}_ifc = {};",
                    get_expr(&get_in)
                ));
                plan.callee_locals.push(format!("{c_name} {name}{{}};"));
                plan.callee_locals
                    .push(format!("{name}_ifc.SetCStructure(&{name});"));
                plan.callee_args = vec![format!("&{name}")];
                if owns_heap {
                    plan.callee_post
                        .push(format!("{wrapper}::CleanCStructure(&{name});"));
                }
            } else {
                plan.writeback.push(format!(
                    "{wrapper}({}).SetCStructure({name});",
                    get_expr(&get_out)
                ));
                plan.callee_locals.push(format!("{c_name} {name}{{}};"));
                plan.callee_args = vec![format!("&{name}")];
                plan.callee_out = Some(format!("{wrapper}(&{name})"));
            }
        }

        MarshallingShape::StructArray { struct_ref, size_param } => {
            let wrapper = struct_ref.wrapper_name();
            let c_name = &struct_ref.0;
            let size_name = sig.signature.params[*size_param].name.clone();
            let owns_heap = descriptors
                .get(c_name)
                .is_some_and(|d| d.owns_heap);
            plan.guards.push(format!("{name} == nullptr"));
            plan.guards.push(format!("{size_name} == nullptr"));
            let get = get_expr(&get_out);
            plan.writeback
                .push(format!("std::vector<{wrapper}> {name}_out = {get};"));
            plan.writeback.push(format!(
                "*{name} = static_cast<{c_name}*>(malloc(sizeof({c_name}) * {name}_out.size()));"
            ));
            plan.writeback
                .push(format!("for (size_t i = 0; i < {name}_out.size(); ++i)"));
            plan.writeback
                .push(format!("  {name}_out[i].SetCStructure(&(*{name})[i]);"));
            plan.writeback
                .push(format!("*{size_name} = {name}_out.size();"));
            plan.callee_locals
                .push(format!("{c_name}* {name} = nullptr;"));
            plan.callee_locals.push(format!("size_t {size_name} = 0;"));
            plan.callee_args = vec![format!("&{name}"), format!("&{size_name}")];
            plan.callee_prepack
                .push(format!("std::vector<{wrapper}> {name}_vec;"));
            plan.callee_prepack
                .push(format!("{name}_vec.reserve({size_name});"));
            plan.callee_prepack
                .push(format!("for (size_t i = 0; i < {size_name}; ++i)"));
            plan.callee_prepack
                .push(format!("  {name}_vec.emplace_back(&{name}[i]);"));
            plan.callee_out = Some(format!("{name}_vec"));
            if owns_heap {
                plan.callee_post
                    .push(format!("for (size_t i = 0; i < {size_name}; ++i)"));
                plan.callee_post
                    .push(format!("  {wrapper}::CleanCStructure(&{name}[i]);"));
            }
            plan.callee_post.push(format!("free({name});"));
        }

        MarshallingShape::Variadic { format_param } => {
            // The tail itself: the caller renders its arguments into the
            // format parameter's staging string before packing; nothing
            // crosses the boundary for the `...` slot.
            let fmt = sig.signature.params[*format_param].name.clone();
            plan.caller_prepack.push("va_list args;".to_string());
            plan.caller_prepack.push(format!("va_start(args, {fmt});"));
            plan.caller_prepack.push(format!(
                "const std::string auto_gen_formatted = FormatVarArgs({fmt}, args);"
            ));
            plan.caller_prepack.push("va_end(args);".to_string());
            plan.direct_args = Vec::new();
            plan.callee_args = Vec::new();
        }

        MarshallingShape::RawFallback { raw_type } => {
            // Callers check `has_fallback()` before planning; this arm only
            // runs for struct-field plans, which never reach stub emission.
            debug!(name = %name, raw_type = %raw_type, "fallback parameter reached stub planning");
            plan.callee_args = Vec::new();
        }
    }

    // A format parameter consumed by a variadic tail packs the pre-rendered
    // text instead of the raw pointer.
    if sig.param_shapes.iter().any(
        |s| matches!(s, MarshallingShape::Variadic { format_param } if *format_param == index),
    ) {
        plan.pack = Some("auto_gen_formatted".to_string());
        plan.direct_args = vec!["auto_gen_formatted.c_str()".to_string()];
    }

    plan
}

fn get_expr(get: &Option<String>) -> String {
    match get {
        Some(g) => g.clone(),
        None => "{}".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Whole-signature emission
// ---------------------------------------------------------------------------

/// Emit the four stub fragments for one classified signature.
pub fn emit(
    sig: &ClassifiedSignature,
    group: &str,
    registry: &Registry,
    descriptors: &DescriptorSet,
) -> StubSet {
    let vname = sig.versioned_name();
    let in_types = if sig.in_tuple.is_empty() {
        "DummyValue".to_string()
    } else {
        sig.in_tuple.join(", ")
    };
    let out_types = if sig.out_tuple.is_empty() {
        "DummyValue".to_string()
    } else {
        sig.out_tuple.join(", ")
    };
    let in_tuple_typedef = format!(
        "typedef std::tuple<{in_types}> {}; /* Autogenerated */",
        in_tuple_name(&vname)
    );
    let out_tuple_typedef = format!(
        "typedef std::tuple<{out_types}> {}; /* Autogenerated */",
        out_tuple_name(&vname)
    );

    if sig.has_fallback() {
        let placeholder = fallback_placeholder(sig);
        return StubSet {
            in_tuple_typedef,
            out_tuple_typedef,
            caller_stub: placeholder.clone(),
            callee_case: placeholder,
        };
    }

    if let Some(OverrideMarker::UseHandMake(name)) = &sig.override_marker {
        // The body lives in the target file's override region; the splicer
        // carries it across regenerations.
        let region = format!(
            "/*---AUTO_GEN_PARSE<OVERRIDE;USE_HAND_MAKE={name}>---*/\n/*---AUTO_GEN_PARSE<OVERRIDE;USE_HAND_MAKE={name}_END>---*/\n"
        );
        return StubSet {
            in_tuple_typedef,
            out_tuple_typedef,
            caller_stub: region.clone(),
            callee_case: region,
        };
    }

    let slots = assign_slots(sig);
    let plans: Vec<ParamPlan> = (0..sig.signature.params.len())
        .map(|i| plan_param(sig, i, &slots, descriptors))
        .collect();

    let caller_stub = render(&caller_stub(sig, group, registry, &plans));
    let callee_case = render(&callee_case(sig, &plans));
    debug!(name = %vname, group, "emitted stub set");

    StubSet {
        in_tuple_typedef,
        out_tuple_typedef,
        caller_stub,
        callee_case,
    }
}

fn fallback_placeholder(sig: &ClassifiedSignature) -> String {
    let raw = sig
        .param_shapes
        .iter()
        .chain(sig.return_shape.iter())
        .find_map(|s| match s {
            MarshallingShape::RawFallback { raw_type } => Some(raw_type.clone()),
            _ => None,
        })
        .unwrap_or_default();
    format!(
        "/*---AUTO_GEN_PARSE<NEED_HAND_EDIT>---*/\n// {}: unclassifiable type '{}', marshalling must be written by hand\n/*---AUTO_GEN_PARSE<NEED_HAND_EDIT_END>---*/\n",
        sig.versioned_name(),
        raw
    )
}

/// The `// Original API call:` comment header repeated on both stub sides.
fn origin_comment(sig: &ClassifiedSignature) -> Vec<Fragment> {
    let vname = sig.versioned_name();
    let params: Vec<String> = sig
        .signature
        .params
        .iter()
        .map(|p| {
            if p.raw_type == "..." {
                "...".to_string()
            } else {
                format!("{} {}", p.raw_type, p.name)
            }
        })
        .collect();
    let in_types = if sig.in_tuple.is_empty() {
        "DummyValue".to_string()
    } else {
        sig.in_tuple.join(", ")
    };
    let out_types = if sig.out_tuple.is_empty() {
        "DummyValue".to_string()
    } else {
        sig.out_tuple.join(", ")
    };
    vec![
        Fragment::line(format!(
            "// Original API call: {EXPORT_ATTR} {} {}({}) __INTRODUCED_IN({});",
            sig.signature.return_type,
            sig.signature.name,
            params.join(", "),
            sig.signature.api_added
        )),
        Fragment::line(format!(
            "// Tuple in:          typedef std::tuple<{in_types}> {}; /* Autogenerated */",
            in_tuple_name(&vname)
        )),
        Fragment::line(format!(
            "// Tuple out:         typedef std::tuple<{out_types}> {}; /* Autogenerated */",
            out_tuple_name(&vname)
        )),
    ]
}

fn caller_stub(
    sig: &ClassifiedSignature,
    group: &str,
    registry: &Registry,
    plans: &[ParamPlan],
) -> Vec<Fragment> {
    let vname = sig.versioned_name();
    let ret = &sig.signature.return_type;
    let is_void = sig.return_shape.is_none();
    let default = default_return(ret, registry);
    let fail_return = if is_void {
        "return;".to_string()
    } else {
        format!("return {default};")
    };

    let params: Vec<String> = sig
        .signature
        .params
        .iter()
        .map(|p| {
            if p.raw_type == "..." {
                "...".to_string()
            } else {
                format!("{} {}", p.raw_type, p.name)
            }
        })
        .collect();

    let mut body: Vec<Fragment> = origin_comment(sig);
    body.push(Fragment::Blank);

    // Null guards.
    let guards: Vec<String> = plans.iter().flat_map(|p| p.guards.clone()).collect();
    if !guards.is_empty() {
        body.push(Fragment::line(format!("if ({})", guards.join(" || "))));
        body.push(Fragment::line(format!("  {fail_return}")));
        body.push(Fragment::Blank);
    }

    for p in plans {
        for line in &p.caller_prepack {
            body.push(Fragment::line(line.clone()));
        }
    }
    if plans.iter().any(|p| !p.caller_prepack.is_empty()) {
        body.push(Fragment::Blank);
    }

    // Shared-transport path.
    body.push(Fragment::Pp("#ifndef IFC_INHIBIT_SHARED".to_string()));
    let mut shared: Vec<Fragment> = Vec::new();
    let pack_args: Vec<String> = plans.iter().filter_map(|p| p.pack.clone()).collect();
    let has_in = !sig.in_tuple.is_empty();
    let has_out = !sig.out_tuple.is_empty();
    let gid = group_id(group);
    let fid = func_id(&vname);

    match (has_in, has_out) {
        (true, true) => {
            shared.push(Fragment::line("msgpack::sbuffer in;"));
            shared.push(Fragment::line("msgpack::sbuffer out;"));
            shared.push(Fragment::line(format!(
                "msgpack::pack(in, {}({}));",
                in_tuple_name(&vname),
                pack_args.join(", ")
            )));
            shared.push(Fragment::line(format!(
                "if (!PluginIfc::g_ifc->control->GetThreadIfc()->SendMessage({gid}, {fid}, in, out))"
            )));
            shared.push(Fragment::line(format!("  {fail_return}")));
        }
        (true, false) => {
            shared.push(Fragment::line("msgpack::sbuffer in;"));
            shared.push(Fragment::line(format!(
                "msgpack::pack(in, {}({}));",
                in_tuple_name(&vname),
                pack_args.join(", ")
            )));
            shared.push(Fragment::line(format!(
                "if (!PluginIfc::g_ifc->control->GetThreadIfc()->SendMessage({gid}, {fid}, in))"
            )));
            shared.push(Fragment::line(format!("  {fail_return}")));
        }
        (false, true) => {
            shared.push(Fragment::line("msgpack::sbuffer out;"));
            shared.push(Fragment::line(format!(
                "if (!PluginIfc::g_ifc->control->GetThreadIfc()->SendMessageOnlyGetReturn({gid}, {fid}, out))"
            )));
            shared.push(Fragment::line(format!("  {fail_return}")));
        }
        (false, false) => {
            // Fire-and-forget: nothing to send, nothing to wait for.
            shared.push(Fragment::line(format!(
                "PluginIfc::g_ifc->control->GetThreadIfc()->SendMessage({gid}, {fid});"
            )));
        }
    }

    if has_out {
        shared.push(Fragment::line(
            "msgpack::unpacked ident = msgpack::unpack(out.data(), out.size());",
        ));
        shared.push(Fragment::line(format!(
            "{} t = ident.get().as<decltype(t)>();",
            out_tuple_name(&vname)
        )));
        shared.push(Fragment::Blank);
        for p in plans {
            for line in &p.writeback {
                shared.push(Fragment::line(line.clone()));
            }
        }
        if is_void {
            shared.push(Fragment::line("return;"));
        } else {
            shared.push(Fragment::line(caller_return_expr(sig)));
        }
    } else if is_void {
        shared.push(Fragment::line("return;"));
    }

    body.push(Fragment::Block {
        header: Some("if (!PluginIfc::g_ifc->direct_used)".to_string()),
        body: shared,
    });
    body.push(Fragment::Pp("#endif /* !IFC_INHIBIT_SHARED */".to_string()));
    body.push(Fragment::Blank);

    // Direct path.
    let direct_args: Vec<String> = std::iter::once("auto_gen_group.thisClassHdl".to_string())
        .chain(plans.iter().flat_map(|p| p.direct_args.clone()))
        .collect();
    body.push(Fragment::line(format!(
        "const auto& auto_gen_group = PluginIfc::g_ifc->direct->to_host.{group};"
    )));
    body.push(Fragment::line(format!(
        "{}auto_gen_group.{vname}({});",
        if is_void { "" } else { "return " },
        direct_args.join(", ")
    )));

    vec![Fragment::Block {
        header: Some(format!(
            "{EXPORT_ATTR} {ret} {}({})",
            sig.signature.name,
            params.join(", ")
        )),
        body,
    }]
}

/// Expression returned from the caller stub after unpacking: the out tuple's
/// slot 0, converted back to the declared C return type.
fn caller_return_expr(sig: &ClassifiedSignature) -> String {
    match &sig.return_shape {
        Some(MarshallingShape::OwnedString) => "return strdup(std::get<0>(t).c_str());".to_string(),
        Some(MarshallingShape::OpaqueHandle { c_type }) => {
            let decl_type = if c_type == "void" {
                "void*".to_string()
            } else {
                c_type.clone()
            };
            format!("return reinterpret_cast<{decl_type}>(std::get<0>(t));")
        }
        Some(_) => "return std::get<0>(t);".to_string(),
        None => "return;".to_string(),
    }
}

fn callee_case(sig: &ClassifiedSignature, plans: &[ParamPlan]) -> Vec<Fragment> {
    let vname = sig.versioned_name();
    let is_void = sig.return_shape.is_none();
    let has_in = !sig.in_tuple.is_empty();

    let mut body: Vec<Fragment> = origin_comment(sig);
    if has_in {
        body.push(Fragment::line(format!(
            "{} t = in.get().as<decltype(t)>();",
            in_tuple_name(&vname)
        )));
    }
    for p in plans {
        for line in &p.callee_locals {
            body.push(Fragment::line(line.clone()));
        }
    }

    // Call the versioned implementation.
    let call_args: Vec<String> = std::iter::once("this".to_string())
        .chain(plans.iter().flat_map(|p| p.callee_args.clone()))
        .collect();
    let call = format!("{vname}({})", call_args.join(", "));
    let (ret_pack, ret_post) = callee_return(sig);
    if is_void {
        body.push(Fragment::line(format!("{call};")));
    } else {
        body.push(Fragment::line(format!(
            "{} auto_gen_ret = {call};",
            sig.signature.return_type
        )));
    }

    for p in plans {
        for line in &p.callee_prepack {
            body.push(Fragment::line(line.clone()));
        }
    }

    // Pack the out tuple.
    let mut out_members: Vec<String> = Vec::new();
    if let Some(expr) = ret_pack {
        out_members.push(expr);
    }
    out_members.extend(plans.iter().filter_map(|p| p.callee_out.clone()));
    if !out_members.is_empty() {
        body.push(Fragment::line(format!(
            "msgpack::pack(out, {}({}));",
            out_tuple_name(&vname),
            out_members.join(", ")
        )));
    }

    for line in ret_post {
        body.push(Fragment::line(line));
    }
    for p in plans {
        for line in &p.callee_post {
            body.push(Fragment::line(line.clone()));
        }
    }
    body.push(Fragment::line("return true;"));

    vec![
        Fragment::line(format!("case {}:", func_id(&vname))),
        Fragment::Block { header: None, body },
    ]
}

/// Out-tuple slot 0 expression and post-pack cleanup for the return value.
fn callee_return(sig: &ClassifiedSignature) -> (Option<String>, Vec<String>) {
    match &sig.return_shape {
        None => (None, Vec::new()),
        Some(MarshallingShape::OwnedString) => (
            Some("auto_gen_ret ? auto_gen_ret : \"\"".to_string()),
            vec![
                "if (auto_gen_ret)".to_string(),
                "  free(auto_gen_ret);".to_string(),
            ],
        ),
        Some(MarshallingShape::OpaqueHandle { .. }) => {
            (Some("PtrValue(auto_gen_ret)".to_string()), Vec::new())
        }
        Some(_) => (Some("auto_gen_ret".to_string()), Vec::new()),
    }
}

// ---------------------------------------------------------------------------
// Group-level artifacts
// ---------------------------------------------------------------------------

/// `typedef <ret>(ATTR_INT_APIENTRYP PFN_INT_<NAME>_V<n>)(void*, ...);` lines
/// for the direct-call table, one per signature.
pub fn emit_direct_typedefs(sigs: &[ClassifiedSignature]) -> String {
    let mut out = String::new();
    for sig in sigs {
        let params: Vec<String> = std::iter::once("void*".to_string())
            .chain(sig.signature.params.iter().map(|p| p.raw_type.clone()))
            .collect();
        out.push_str(&format!(
            "typedef {}(ATTR_INT_APIENTRYP {})({});\n",
            sig.signature.return_type,
            direct_typedef_name(sig),
            params.join(", ")
        ));
    }
    out
}

fn direct_typedef_name(sig: &ClassifiedSignature) -> String {
    format!(
        "PFN_INT_{}_V{}",
        sig.signature.name.to_uppercase(),
        sig.signature.api_added
    )
}

/// The per-group direct function-pointer table struct.
pub fn emit_direct_table(group: &str, sigs: &[ClassifiedSignature]) -> String {
    let mut body: Vec<Fragment> = vec![Fragment::line("void* thisClassHdl;")];
    for sig in sigs {
        body.push(Fragment::line(format!(
            "{} {};",
            direct_typedef_name(sig),
            sig.versioned_name()
        )));
    }
    let mut text = render(&[Fragment::Block {
        header: Some(format!("struct directFuncToHost_{group}")),
        body,
    }]);
    // Struct definitions close with a semicolon.
    let trimmed = text.trim_end().len();
    text.replace_range(trimmed.., ";\n");
    text
}

/// The per-group message identifier enum.
pub fn emit_func_enum(group: &str, sigs: &[ClassifiedSignature]) -> String {
    let gid = group_id(group);
    let mut body: Vec<Fragment> = Vec::new();
    for sig in sigs {
        body.push(Fragment::line(format!("{},", func_id(&sig.versioned_name()))));
    }
    let mut text = render(&[Fragment::Block {
        header: Some(format!("typedef enum {gid}_func : int")),
        body,
    }]);
    let trimmed = text.trim_end().len();
    text.replace_range(trimmed.., &format!(" {gid}_func;\n"));
    text
}

// ---------------------------------------------------------------------------
// Struct wrapper bodies
// ---------------------------------------------------------------------------

/// Emit the serializable `IFC_<Name>` wrapper for one struct descriptor.
pub fn emit_struct_wrapper(desc: &StructDescriptor, descriptors: &DescriptorSet) -> String {
    let wrapper = &desc.wrapper_name;
    let c_name = &desc.name;

    let mut from_c: Vec<Fragment> = vec![
        Fragment::line("if (c_data == nullptr)"),
        Fragment::line("  return;"),
        Fragment::Blank,
    ];
    let mut to_c: Vec<Fragment> = vec![
        Fragment::line("if (c_data == nullptr)"),
        Fragment::line("  return;"),
        Fragment::Blank,
    ];
    let mut clean: Vec<Fragment> = vec![
        Fragment::line("if (c_data == nullptr)"),
        Fragment::line("  return;"),
        Fragment::Blank,
    ];
    let mut members: Vec<String> = Vec::new();
    let mut member_names: Vec<String> = Vec::new();

    for field in &desc.fields {
        if field.consumed_by.is_some() {
            // Length companions are derived from the owning member.
            continue;
        }
        let f = FieldCode::build(field, &desc.fields, descriptors);
        from_c.extend(f.from_c.into_iter().map(Fragment::Line));
        to_c.extend(f.to_c.into_iter().map(Fragment::Line));
        clean.extend(f.clean.into_iter().map(Fragment::Line));
        if let Some(decl) = f.member_decl {
            if !f.member_name.is_empty() {
                member_names.push(f.member_name);
            }
            members.push(decl);
        }
    }

    let mut body: Vec<Fragment> = vec![Fragment::line(format!("{wrapper}() = default;"))];
    body.push(Fragment::Block {
        header: Some(format!("{wrapper}(const {c_name}* c_data)")),
        body: from_c,
    });
    body.push(Fragment::Blank);
    body.push(Fragment::Block {
        header: Some(format!("void SetCStructure({c_name}* c_data)")),
        body: to_c,
    });
    if desc.owns_heap {
        body.push(Fragment::Blank);
        body.push(Fragment::Block {
            header: Some(format!("static void CleanCStructure({c_name}* c_data)")),
            body: clean,
        });
    }
    body.push(Fragment::Blank);
    for m in &members {
        body.push(Fragment::line(m.clone()));
    }
    body.push(Fragment::Blank);
    body.push(Fragment::line(format!(
        "MSGPACK_DEFINE({});",
        member_names.join(", ")
    )));

    let mut text = render(&[Fragment::Block {
        header: Some(format!("struct {wrapper}")),
        body,
    }]);
    let trimmed = text.trim_end().len();
    text.replace_range(trimmed.., ";\n");
    text
}

/// Conversion statements for one wrapper field.
struct FieldCode {
    member_name: String,
    member_decl: Option<String>,
    from_c: Vec<String>,
    to_c: Vec<String>,
    clean: Vec<String>,
}

impl FieldCode {
    fn build(
        field: &DescribedField,
        fields: &[DescribedField],
        descriptors: &DescriptorSet,
    ) -> FieldCode {
        let name = base_field_name(&field.name);
        let ty = TypeText::parse(&field.raw_type, &field.name);
        let mut code = FieldCode {
            member_name: name.clone(),
            member_decl: None,
            from_c: Vec::new(),
            to_c: Vec::new(),
            clean: Vec::new(),
        };

        match &field.shape {
            MarshallingShape::Scalar { c_type, pointer: false, .. }
            | MarshallingShape::Enum { c_type, pointer: false, .. } => {
                code.member_decl = Some(format!("{c_type} {name};"));
                code.from_c.push(format!("{name} = c_data->{name};"));
                code.to_c.push(format!("c_data->{name} = {name};"));
            }
            MarshallingShape::OpaqueHandle { .. } => {
                code.member_decl = Some(format!("PtrValue {name};"));
                code.from_c
                    .push(format!("{name} = PtrValue(c_data->{name});"));
                code.to_c.push(format!(
                    "c_data->{name} = reinterpret_cast<{}>({name});",
                    pointer_spelling(&ty)
                ));
            }
            MarshallingShape::OwnedString | MarshallingShape::BorrowedString => {
                code.member_decl = Some(format!("std::string {name};"));
                code.from_c.push(format!("if (c_data->{name})"));
                code.from_c.push(format!("  {name} = c_data->{name};"));
                code.to_c
                    .push(format!("c_data->{name} = strdup({name}.c_str());"));
                code.clean.push(format!(
                    "free(const_cast<char*>(c_data->{name}));"
                ));
                code.clean.push(format!("c_data->{name} = nullptr;"));
            }
            MarshallingShape::FixedArray { .. } => {
                let wire = wire_type(&field.shape);
                code.member_decl = Some(format!("{wire} {name};"));
                code.from_c.push(format!(
                    "memcpy({name}.data(), c_data->{name}, sizeof(c_data->{name}));"
                ));
                code.to_c.push(format!(
                    "memcpy(c_data->{name}, {name}.data(), sizeof(c_data->{name}));"
                ));
            }
            MarshallingShape::SizedBuffer { element, .. } => {
                code.member_decl = Some(format!("std::vector<{element}> {name};"));
                // The length companion lives in the same struct.
                let sib = sibling_name(field, fields);
                code.from_c.push(format!("if (c_data->{name})"));
                code.from_c.push(format!(
                    "  {name}.assign(c_data->{name}, c_data->{name} + c_data->{sib});"
                ));
                code.to_c.push(format!(
                    "c_data->{name} = static_cast<{element}*>(malloc(sizeof({element}) * {name}.size()));"
                ));
                code.to_c.push(format!(
                    "memcpy(c_data->{name}, {name}.data(), sizeof({element}) * {name}.size());"
                ));
                code.to_c.push(format!("c_data->{sib} = {name}.size();"));
                code.clean.push(format!("free(c_data->{name});"));
                code.clean.push(format!("c_data->{name} = nullptr;"));
            }
            MarshallingShape::StringArray { .. } => {
                code.member_decl = Some(format!("std::vector<std::string> {name};"));
                let sib = sibling_name(field, fields);
                code.from_c
                    .push(format!("for (size_t i = 0; i < c_data->{sib}; ++i)"));
                code.from_c.push(format!(
                    "  {name}.emplace_back(c_data->{name}[i] ? c_data->{name}[i] : \"\");"
                ));
                code.to_c.push(format!(
                    "c_data->{name} = static_cast<char**>(malloc(sizeof(char*) * {name}.size()));"
                ));
                code.to_c
                    .push(format!("for (size_t i = 0; i < {name}.size(); ++i)"));
                code.to_c.push(format!(
                    "  c_data->{name}[i] = strdup({name}[i].c_str());"
                ));
                code.to_c.push(format!("c_data->{sib} = {name}.size();"));
                code.clean
                    .push(format!("for (size_t i = 0; i < c_data->{sib}; ++i)"));
                code.clean.push(format!("  free(c_data->{name}[i]);"));
                code.clean.push(format!("free(c_data->{name});"));
                code.clean.push(format!("c_data->{name} = nullptr;"));
            }
            MarshallingShape::StructByValuePointer { struct_ref, .. } => {
                let wrapper = struct_ref.wrapper_name();
                let nested_owns = descriptors
                    .get(&struct_ref.0)
                    .is_some_and(|d| d.owns_heap);
                code.member_decl = Some(format!("{wrapper} {name};"));
                if ty.pointer_depth == 0 {
                    code.from_c
                        .push(format!("{name} = {wrapper}(&c_data->{name});"));
                    code.to_c
                        .push(format!("{name}.SetCStructure(&c_data->{name});"));
                    if nested_owns {
                        code.clean
                            .push(format!("{wrapper}::CleanCStructure(&c_data->{name});"));
                    }
                } else {
                    code.from_c.push(format!("if (c_data->{name})"));
                    code.from_c
                        .push(format!("  {name} = {wrapper}(c_data->{name});"));
                    code.to_c.push(format!(
                        "c_data->{name} = static_cast<{}*>(malloc(sizeof({})));",
                        struct_ref.0, struct_ref.0
                    ));
                    code.to_c
                        .push(format!("{name}.SetCStructure(c_data->{name});"));
                    if nested_owns {
                        code.clean.push(format!("if (c_data->{name})"));
                        code.clean
                            .push(format!("  {wrapper}::CleanCStructure(c_data->{name});"));
                    }
                    code.clean.push(format!("free(c_data->{name});"));
                    code.clean.push(format!("c_data->{name} = nullptr;"));
                }
            }
            _ => {
                // Pointer scalars, variadics and fallbacks have no wrapper
                // representation; surfaced as a hand-edit marker.
                code.member_decl = Some(format!(
                    "/*---AUTO_GEN_PARSE<NEED_HAND_EDIT>---*/ // {} {}",
                    field.raw_type, field.name
                ));
                code.member_name = String::new();
            }
        }

        if code.member_name.is_empty() {
            // Not serializable; the marker member stays but generates no
            // conversion statements.
            code.from_c.clear();
            code.to_c.clear();
            code.clean.clear();
        }
        code
    }
}

/// Field name with any array suffix removed (`buf[64]` → `buf`).
fn base_field_name(name: &str) -> String {
    match name.find('[') {
        Some(i) => name[..i].to_string(),
        None => name.to_string(),
    }
}

/// The length-companion field name recovered from the shape metadata. Field
/// shapes index their companions by field position, same as parameters.
fn sibling_name(field: &DescribedField, fields: &[DescribedField]) -> String {
    match &field.shape {
        MarshallingShape::SizedBuffer { size_param, .. }
        | MarshallingShape::StringArray { size_param, .. } => fields
            .get(*size_param)
            .map(|f| base_field_name(&f.name))
            .unwrap_or_default(),
        _ => String::new(),
    }
}

/// The C pointer type a handle member casts back into.
fn pointer_spelling(ty: &TypeText) -> String {
    if ty.base == "void" {
        "void*".to_string()
    } else {
        ty.base.clone()
    }
}
