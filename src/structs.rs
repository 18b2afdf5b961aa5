//! Struct descriptor builder.
//!
//! Classification returns [`StructRef`] tokens instead of descriptors; this
//! module resolves all pending references in a separate fixed-point pass
//! before emission begins, so the classify/describe dependency stays
//! explicit and acyclic. Descriptors are deduplicated by struct name and
//! live for the whole generation run.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Result, bail};
use tracing::{debug, warn};

use crate::classify;
use crate::model::{
    DescribedField, MarshallingShape, Parameter, RawStruct, Registry, StructDescriptor, StructRef,
};

/// All resolved descriptors for one run, in first-reference order.
#[derive(Debug, Default)]
pub struct DescriptorSet {
    by_name: BTreeMap<String, StructDescriptor>,
    order: Vec<String>,
}

impl DescriptorSet {
    pub fn get(&self, name: &str) -> Option<&StructDescriptor> {
        self.by_name.get(name)
    }

    /// Descriptors in first-reference order (stable across runs).
    pub fn iter(&self) -> impl Iterator<Item = &StructDescriptor> {
        self.order.iter().filter_map(|n| self.by_name.get(n))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// A struct reference collected during classification, tagged with the
/// header whose declarations produced it (for shared-file routing).
#[derive(Debug, Clone)]
pub struct PendingRef {
    pub struct_ref: StructRef,
    pub referenced_from: PathBuf,
}

/// Resolve every pending reference, plus any struct referenced transitively
/// from struct fields, into descriptors. Idempotent by name.
///
/// A missing struct body is a malformed-registry condition and therefore a
/// hard stop for the whole run: emitting stubs around an unknown layout
/// would produce wire tuples that cannot round-trip.
pub fn resolve_all(pending: &[PendingRef], registry: &Registry) -> Result<DescriptorSet> {
    let mut set = DescriptorSet::default();
    let mut queue: std::collections::VecDeque<PendingRef> = pending.iter().cloned().collect();

    while let Some(p) = queue.pop_front() {
        let name = &p.struct_ref.0;
        let Some(raw) = registry.struct_body(name) else {
            bail!(
                "struct `{}` referenced from {} has no registered body; \
                 is its header listed in the configuration?",
                name,
                p.referenced_from.display()
            );
        };

        let shared = raw.header != p.referenced_from;
        if let Some(existing) = set.by_name.get_mut(name.as_str()) {
            // Referenced again: a second referencing header promotes the
            // descriptor to the shared file.
            existing.shared = existing.shared || shared;
            continue;
        }

        let descriptor = describe(raw, registry, shared);
        for field in &descriptor.fields {
            if let Some(nested) = field.shape.struct_ref() {
                queue.push_back(PendingRef {
                    struct_ref: nested.clone(),
                    // Nested structs are referenced from the declaring header.
                    referenced_from: raw.header.clone(),
                });
            }
        }
        debug!(
            name = %descriptor.name,
            fields = descriptor.fields.len(),
            owns_heap = descriptor.owns_heap,
            shared = descriptor.shared,
            "resolved struct descriptor"
        );
        set.order.push(name.clone());
        set.by_name.insert(name.clone(), descriptor);
    }

    // Heap ownership propagates through nested struct fields; iterate to a
    // fixed point (nesting depth is tiny in practice).
    loop {
        let mut changed = false;
        let owners: Vec<String> = set
            .by_name
            .values()
            .filter(|d| d.owns_heap)
            .map(|d| d.name.clone())
            .collect();
        let names: Vec<String> = set.by_name.keys().cloned().collect();
        for name in names {
            let nested_owner = {
                let d = &set.by_name[&name];
                d.fields.iter().any(|f| {
                    f.shape
                        .struct_ref()
                        .is_some_and(|r| owners.contains(&r.0))
                })
            };
            if nested_owner
                && let Some(d) = set.by_name.get_mut(&name)
                && !d.owns_heap
            {
                d.owns_heap = true;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    Ok(set)
}

/// Build one descriptor: classify every field with the same shape rules as
/// top-level parameters (sized arrays, strings, nested struct pointers and
/// enums all follow the identical disambiguation logic).
pub fn describe(raw: &RawStruct, registry: &Registry, shared: bool) -> StructDescriptor {
    let params: Vec<Parameter> = raw
        .fields
        .iter()
        .enumerate()
        .map(|(index, f)| Parameter {
            raw_type: f.raw_type.clone(),
            name: f.name.clone(),
            index,
        })
        .collect();

    let mut fields = Vec::with_capacity(params.len());
    let mut consumed_by: Vec<Option<usize>> = vec![None; params.len()];
    for (index, param) in params.iter().enumerate() {
        let m = classify::classify(param, index, &params, registry);
        if m.shape.is_fallback() {
            warn!(
                strukt = %raw.name,
                field = %param.name,
                raw = %param.raw_type,
                "struct field needs hand edit"
            );
        }
        for c in &m.consumed {
            consumed_by[*c] = Some(index);
        }
        fields.push(m.shape);
    }

    let described: Vec<DescribedField> = params
        .iter()
        .zip(fields)
        .map(|(p, shape)| DescribedField {
            name: p.name.clone(),
            raw_type: p.raw_type.clone(),
            shape,
            consumed_by: consumed_by[p.index],
        })
        .collect();

    let owns_heap = described.iter().any(|f| field_owns_heap(&f.shape));

    StructDescriptor {
        name: raw.name.clone(),
        wrapper_name: StructRef(raw.name.clone()).wrapper_name(),
        fields: described,
        owns_heap,
        header: raw.header.clone(),
        shared,
    }
}

/// True when serializing this field back into a raw C struct allocates
/// memory the C side must later release.
fn field_owns_heap(shape: &MarshallingShape) -> bool {
    matches!(
        shape,
        MarshallingShape::OwnedString
            | MarshallingShape::BorrowedString
            | MarshallingShape::StringArray { .. }
            | MarshallingShape::StructArray { .. }
    )
}
