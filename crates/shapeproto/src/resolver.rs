// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Resolver: type references to descriptor graphs.
//!
//! Named shapes live in a [`ShapeArena`] keyed by [`ShapeId`]. Each call to
//! [`Resolver::resolve`] runs one resolution pass: named shapes entered during
//! the pass are marked in progress, and a reference back to one of them yields a
//! [`ShapeKind::Recursive`] node instead of descending again. Descriptors built by
//! the pass are staged and only published to the arena when the whole pass
//! succeeds, so every recursive node in the arena names a completed slot.

use crate::descriptor::{
    Constraints, EnumDescriptor, FieldDescriptor, LeafDescriptor, MappingDescriptor,
    PrimitiveKind, RecordDescriptor, SequenceDescriptor, ShapeId, ShapeKind, TypeDescriptor,
};
use crate::error::{Error, Result};
use crate::reference::{RecordDef, ShapeDef, TypeRef};
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Completed descriptors of named shapes, one slot per identity.
#[derive(Debug, Default)]
pub struct ShapeArena {
    slots: DashMap<ShapeId, Arc<TypeDescriptor>>,
}

impl ShapeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &ShapeId) -> Option<Arc<TypeDescriptor>> {
        self.slots.get(id).map(|slot| Arc::clone(slot.value()))
    }

    pub fn contains(&self, id: &ShapeId) -> bool {
        self.slots.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Insert unless the slot is taken; returns the slot's descriptor either way.
    fn publish(&self, id: ShapeId, desc: Arc<TypeDescriptor>) -> Arc<TypeDescriptor> {
        Arc::clone(self.slots.entry(id).or_insert(desc).value())
    }
}

/// Resolves [`TypeRef`]s against registered [`ShapeDef`]s.
#[derive(Debug)]
pub struct Resolver {
    definitions: DashMap<String, Arc<ShapeDef>>,
    arena: Arc<ShapeArena>,
}

impl Resolver {
    pub fn new(arena: Arc<ShapeArena>) -> Self {
        Self {
            definitions: DashMap::new(),
            arena,
        }
    }

    pub fn arena(&self) -> &Arc<ShapeArena> {
        &self.arena
    }

    /// Register a named definition.
    ///
    /// Re-registering an identical definition is a no-op; a different definition
    /// under a taken name is rejected.
    pub fn define(&self, def: ShapeDef) -> Result<()> {
        let name = def.name().to_string();
        if name.is_empty() {
            return Err(Error::invalid_shape(name, "definition name is empty"));
        }
        if primitive_named(&name).is_some() {
            return Err(Error::invalid_shape(name, "name is reserved for a primitive"));
        }
        match self.definitions.entry(name) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                if existing.get().as_ref() == &def {
                    Ok(())
                } else {
                    Err(Error::invalid_shape(
                        existing.key().clone(),
                        "already defined with a different shape",
                    ))
                }
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                log::trace!("[Resolver] defined {}", slot.key());
                slot.insert(Arc::new(def));
                Ok(())
            }
        }
    }

    pub fn definition(&self, name: &str) -> Option<Arc<ShapeDef>> {
        self.definitions.get(name).map(|d| Arc::clone(d.value()))
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    /// Resolve a reference into a descriptor graph.
    ///
    /// Named shapes come back as the arena's instance for their identity.
    pub fn resolve(&self, type_ref: &TypeRef) -> Result<Arc<TypeDescriptor>> {
        let mut pass = ResolutionPass::new(self);
        let desc = pass.resolve(type_ref, &Env::new())?;
        Ok(pass.commit(desc))
    }
}

fn primitive_named(name: &str) -> Option<PrimitiveKind> {
    [
        PrimitiveKind::Bool,
        PrimitiveKind::Int,
        PrimitiveKind::Float,
        PrimitiveKind::Str,
        PrimitiveKind::Bytes,
        PrimitiveKind::Any,
    ]
    .into_iter()
    .find(|kind| kind.canonical() == name)
}

/// Type parameter bindings of the definition being expanded.
type Env = HashMap<String, Arc<TypeDescriptor>>;

/// Instantiations of one generic that may be in progress at once.
///
/// A generic whose body instantiates itself with a growing argument
/// (`Nest[T] { inner: Nest[list[T]] }`) gets a new identity at every level and
/// would never close into a recursive node.
pub const MAX_GENERIC_NESTING: usize = 32;

/// State of a single `resolve` call.
struct ResolutionPass<'r> {
    resolver: &'r Resolver,
    in_progress: HashSet<ShapeId>,
    staged: HashMap<ShapeId, Arc<TypeDescriptor>>,
    /// Generic name -> instantiations currently being expanded.
    instantiating: HashMap<String, usize>,
}

impl<'r> ResolutionPass<'r> {
    fn new(resolver: &'r Resolver) -> Self {
        Self {
            resolver,
            in_progress: HashSet::new(),
            staged: HashMap::new(),
            instantiating: HashMap::new(),
        }
    }

    fn resolve(&mut self, type_ref: &TypeRef, env: &Env) -> Result<Arc<TypeDescriptor>> {
        match type_ref {
            TypeRef::Primitive(kind) => Ok(Arc::new(TypeDescriptor::primitive(*kind))),
            TypeRef::Named(name) => match primitive_named(name) {
                Some(kind) => Ok(Arc::new(TypeDescriptor::primitive(kind))),
                None => self.resolve_named(name, &[], env),
            },
            TypeRef::Generic { name, args } => self.resolve_named(name, args, env),
            TypeRef::Param(name) => env
                .get(name)
                .cloned()
                .ok_or_else(|| Error::unresolved(name.clone())),
            TypeRef::Optional(inner) => {
                let inner = self.resolve(inner, env)?;
                if inner.is_optional() {
                    return Ok(inner);
                }
                let name = format!("Optional[{}]", inner.name);
                Ok(Arc::new(TypeDescriptor::new(name, ShapeKind::Optional(inner))))
            }
            TypeRef::Union(members) => self.resolve_union(members, env),
            TypeRef::Sequence(element) | TypeRef::Set(element) => {
                let unique = matches!(type_ref, TypeRef::Set(_));
                let element = self.resolve(element, env)?;
                let name = format!("{}[{}]", if unique { "set" } else { "list" }, element.name);
                Ok(Arc::new(TypeDescriptor::new(
                    name,
                    ShapeKind::Sequence(SequenceDescriptor { element, unique }),
                )))
            }
            TypeRef::Tuple(items) => {
                let items = self.resolve_all(items, env)?;
                let name = format!("tuple[{}]", join_names(&items));
                Ok(Arc::new(TypeDescriptor::new(name, ShapeKind::Tuple(items))))
            }
            TypeRef::Mapping(key, value) => {
                let key = self.resolve(key, env)?;
                let value = self.resolve(value, env)?;
                let name = format!("dict[{},{}]", key.name, value.name);
                Ok(Arc::new(TypeDescriptor::new(
                    name,
                    ShapeKind::Mapping(MappingDescriptor { key, value }),
                )))
            }
            TypeRef::Literal(values) => {
                if values.is_empty() {
                    return Err(Error::invalid_shape("Literal", "no allowed values"));
                }
                let rendered: Vec<String> = values.iter().map(ToString::to_string).collect();
                let name = format!("Literal[{}]", rendered.join(","));
                Ok(Arc::new(TypeDescriptor::new(
                    name,
                    ShapeKind::Literal(values.clone()),
                )))
            }
            TypeRef::Constrained(inner, constraints) => {
                let inner = self.resolve(inner, env)?;
                constrain(&inner, constraints)
            }
        }
    }

    fn resolve_all(&mut self, refs: &[TypeRef], env: &Env) -> Result<Vec<Arc<TypeDescriptor>>> {
        refs.iter().map(|r| self.resolve(r, env)).collect()
    }

    fn resolve_union(&mut self, members: &[TypeRef], env: &Env) -> Result<Arc<TypeDescriptor>> {
        let mut flat: Vec<Arc<TypeDescriptor>> = Vec::with_capacity(members.len());
        for member in self.resolve_all(members, env)? {
            let nested = match &member.kind {
                ShapeKind::Union(inner) => inner.clone(),
                _ => vec![member],
            };
            for candidate in nested {
                if !flat.iter().any(|m| m.id == candidate.id) {
                    flat.push(candidate);
                }
            }
        }
        match flat.len() {
            0 => Err(Error::invalid_shape("Union", "no members")),
            1 => Ok(flat.remove(0)),
            _ => {
                let name = format!("Union[{}]", join_names(&flat));
                Ok(Arc::new(TypeDescriptor::new(name, ShapeKind::Union(flat))))
            }
        }
    }

    fn resolve_named(
        &mut self,
        name: &str,
        args: &[TypeRef],
        env: &Env,
    ) -> Result<Arc<TypeDescriptor>> {
        let args = self.resolve_all(args, env)?;
        let canonical = if args.is_empty() {
            name.to_string()
        } else {
            format!("{}[{}]", name, join_names(&args))
        };
        let id = ShapeId::of(&canonical);

        if let Some(desc) = self.resolver.arena.get(&id) {
            return Ok(desc);
        }
        if let Some(desc) = self.staged.get(&id) {
            return Ok(Arc::clone(desc));
        }
        if self.in_progress.contains(&id) {
            return Ok(Arc::new(TypeDescriptor::recursive(id, canonical)));
        }

        let def = self
            .resolver
            .definition(name)
            .ok_or_else(|| Error::unresolved(name))?;
        let params = def.params();
        if params.len() != args.len() {
            return Err(Error::invalid_shape(
                canonical,
                format!(
                    "expects {} type argument(s), got {}",
                    params.len(),
                    args.len()
                ),
            ));
        }
        let generic = !params.is_empty();
        if generic {
            let depth = self.instantiating.entry(name.to_string()).or_insert(0);
            if *depth >= MAX_GENERIC_NESTING {
                return Err(Error::invalid_shape(
                    canonical,
                    format!(
                        "instantiates itself more than {} levels deep",
                        MAX_GENERIC_NESTING
                    ),
                ));
            }
            *depth += 1;
        }
        let bindings: Env = params.iter().cloned().zip(args).collect();

        self.in_progress.insert(id);
        let built = self.expand(&def, &canonical, &bindings);
        self.in_progress.remove(&id);
        if generic {
            if let Some(depth) = self.instantiating.get_mut(name) {
                *depth -= 1;
            }
        }

        let desc = built?;
        self.staged.insert(id, Arc::clone(&desc));
        Ok(desc)
    }

    fn expand(&mut self, def: &ShapeDef, canonical: &str, env: &Env) -> Result<Arc<TypeDescriptor>> {
        match def {
            ShapeDef::Record(record) => self.expand_record(record, canonical, env),
            ShapeDef::Enum(e) => {
                if e.variants.is_empty() {
                    return Err(Error::invalid_shape(canonical, "enum has no variants"));
                }
                let mut seen = HashSet::new();
                if let Some(dup) = e.variants.iter().find(|v| !seen.insert(v.name.as_str())) {
                    return Err(Error::invalid_shape(
                        canonical,
                        format!("duplicate variant `{}`", dup.name),
                    ));
                }
                let kind = ShapeKind::Enum(EnumDescriptor {
                    variants: e.variants.clone(),
                });
                Ok(Arc::new(
                    TypeDescriptor::new(canonical, kind).with_doc(e.doc.clone()),
                ))
            }
            // The alias slot holds the target itself
            ShapeDef::Alias(alias) => {
                let target = self.resolve(&alias.target, env)?;
                if refers_to_itself(&target, &ShapeId::of(canonical)) {
                    return Err(Error::invalid_shape(
                        canonical,
                        "alias refers to itself outside any container",
                    ));
                }
                Ok(target)
            }
            ShapeDef::Leaf(leaf) => Ok(Arc::new(TypeDescriptor::new(
                canonical,
                ShapeKind::Leaf(LeafDescriptor {
                    schema: leaf.schema.clone(),
                }),
            ))),
        }
    }

    fn expand_record(
        &mut self,
        record: &RecordDef,
        canonical: &str,
        env: &Env,
    ) -> Result<Arc<TypeDescriptor>> {
        let mut fields: Vec<FieldDescriptor> = Vec::with_capacity(record.fields.len());
        for field in &record.fields {
            if fields.iter().any(|f| f.name == field.name) {
                return Err(Error::invalid_shape(
                    canonical,
                    format!("duplicate field `{}`", field.name),
                ));
            }
            let type_desc = self
                .resolve(&field.type_ref, env)
                .map_err(|e| e.at_field(&field.name))?;
            fields.push(FieldDescriptor {
                required: field.default.is_none() && !type_desc.is_optional(),
                name: field.name.clone(),
                type_desc,
                default: field.default.clone(),
                rename: field.rename.clone(),
                read_only: field.read_only,
                write_only: field.write_only,
                doc: field.doc.clone(),
            });
        }
        let kind = ShapeKind::Record(RecordDescriptor { fields });
        Ok(Arc::new(
            TypeDescriptor::new(canonical, kind).with_doc(record.doc.clone()),
        ))
    }

    /// Publish staged descriptors and return the arena's instance of `root`.
    fn commit(self, root: Arc<TypeDescriptor>) -> Arc<TypeDescriptor> {
        let arena = &self.resolver.arena;
        let mut root = root;
        let staged = self.staged.len();
        for (id, desc) in self.staged {
            let is_root = Arc::ptr_eq(&desc, &root);
            let published = arena.publish(id, desc);
            if is_root {
                root = published;
            }
        }
        if staged > 0 {
            log::debug!(
                "[Resolver] committed {} descriptor(s) resolving {}",
                staged,
                root.name
            );
        }
        root
    }
}

/// True if `desc` is `id` itself once optionals and unions are looked through.
fn refers_to_itself(desc: &TypeDescriptor, id: &ShapeId) -> bool {
    match &desc.kind {
        ShapeKind::Recursive(r) => r.id == *id,
        ShapeKind::Optional(inner) => refers_to_itself(inner, id),
        ShapeKind::Union(members) => members.iter().any(|m| refers_to_itself(m, id)),
        _ => false,
    }
}

fn join_names(descs: &[Arc<TypeDescriptor>]) -> String {
    descs
        .iter()
        .map(|d| d.name.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

/// Derive the constrained variant of `inner`.
fn constrain(inner: &Arc<TypeDescriptor>, constraints: &Constraints) -> Result<Arc<TypeDescriptor>> {
    if constraints.is_empty() {
        return Ok(Arc::clone(inner));
    }
    if inner.constraints.is_some() {
        return Err(Error::invalid_shape(&inner.name, "shape is already constrained"));
    }
    let text = matches!(inner.kind, ShapeKind::Primitive(PrimitiveKind::Str));
    let numeric = matches!(&inner.kind, ShapeKind::Primitive(kind) if kind.is_numeric());
    let items = matches!(inner.kind, ShapeKind::Sequence(_) | ShapeKind::Mapping(_));
    let misplaced = if constraints.has_text() && !text {
        Some("string")
    } else if constraints.has_numeric() && !numeric {
        Some("numeric")
    } else if constraints.has_items() && !items {
        Some("item count")
    } else {
        None
    };
    if let Some(what) = misplaced {
        return Err(Error::invalid_shape(
            &inner.name,
            format!("{} constraints do not apply to this shape", what),
        ));
    }

    let name = format!("{}{}", inner.name, constraints.canonical());
    Ok(Arc::new(
        TypeDescriptor::new(name, inner.kind.clone())
            .with_constraints(constraints.clone())
            .with_doc(inner.doc.clone()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::{AliasDef, EnumBuilder, RecordBuilder};

    fn resolver() -> Resolver {
        Resolver::new(Arc::new(ShapeArena::new()))
    }

    fn node_def() -> ShapeDef {
        RecordBuilder::new("Node")
            .field("value", TypeRef::int())
            .field("children", TypeRef::sequence(TypeRef::named("Node")))
            .build()
    }

    #[test]
    fn test_primitives_and_containers() {
        let r = resolver();
        let desc = r
            .resolve(&TypeRef::mapping(TypeRef::string(), TypeRef::sequence(TypeRef::int())))
            .expect("resolve");
        assert_eq!(desc.name, "dict[str,list[int]]");
        assert_eq!(desc.id, ShapeId::of("dict[str,list[int]]"));
    }

    #[test]
    fn test_self_reference_becomes_recursive_node() {
        let r = resolver();
        r.define(node_def()).expect("define");
        let node = r.resolve(&TypeRef::named("Node")).expect("resolve");

        let children = &node.field("children").expect("children").type_desc;
        let ShapeKind::Sequence(seq) = &children.kind else {
            panic!("expected sequence");
        };
        assert!(seq.element.is_recursive());
        assert_eq!(seq.element.id, node.id);
        assert!(r.arena().contains(&node.id));
    }

    #[test]
    fn test_resolve_returns_arena_instance() {
        let r = resolver();
        r.define(node_def()).expect("define");
        let a = r.resolve(&TypeRef::named("Node")).expect("first");
        let b = r.resolve(&TypeRef::named("Node")).expect("second");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_forward_reference_resolves_at_first_use() {
        let r = resolver();
        r.define(
            RecordBuilder::new("Outer")
                .field("inner", TypeRef::named("Inner"))
                .build(),
        )
        .expect("define outer");

        let err = r.resolve(&TypeRef::named("Outer")).unwrap_err();
        assert!(matches!(err, Error::UnresolvedType { ref name, .. } if name == "Inner"));
        assert_eq!(err.path().map(ToString::to_string).as_deref(), Some("inner"));
        assert!(r.arena().is_empty());

        r.define(RecordBuilder::new("Inner").field("x", TypeRef::int()).build())
            .expect("define inner");
        assert!(r.resolve(&TypeRef::named("Outer")).is_ok());
        assert_eq!(r.arena().len(), 2);
    }

    #[test]
    fn test_generic_instantiation_identity() {
        let r = resolver();
        r.define(
            RecordBuilder::new("Page")
                .params(&["T"])
                .field("items", TypeRef::sequence(TypeRef::param("T")))
                .build(),
        )
        .expect("define");
        let ints = r
            .resolve(&TypeRef::generic("Page", vec![TypeRef::int()]))
            .expect("Page[int]");
        let strs = r
            .resolve(&TypeRef::generic("Page", vec![TypeRef::string()]))
            .expect("Page[str]");
        assert_eq!(ints.name, "Page[int]");
        assert_ne!(ints.id, strs.id);

        let err = r.resolve(&TypeRef::named("Page")).unwrap_err();
        assert!(matches!(err, Error::InvalidShape { .. }));
    }

    #[test]
    fn test_optional_and_union_normalisation() {
        let r = resolver();
        let nested = r
            .resolve(&TypeRef::optional(TypeRef::optional(TypeRef::int())))
            .expect("optional");
        assert_eq!(nested.name, "Optional[int]");

        let flat = r
            .resolve(&TypeRef::union(vec![
                TypeRef::int(),
                TypeRef::union(vec![TypeRef::string(), TypeRef::int()]),
            ]))
            .expect("union");
        assert_eq!(flat.name, "Union[int,str]");

        let single = r
            .resolve(&TypeRef::union(vec![TypeRef::int(), TypeRef::int()]))
            .expect("single");
        assert_eq!(single.name, "int");
    }

    #[test]
    fn test_constraints_participate_in_identity() {
        let r = resolver();
        let short = r
            .resolve(&TypeRef::string().with(Constraints::new().max_length(5)))
            .expect("constrained");
        assert_eq!(short.name, "str{max_length=5}");
        assert_ne!(short.id, ShapeId::of("str"));

        let err = r
            .resolve(&TypeRef::int().with(Constraints::new().max_length(5)))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidShape { .. }));
    }

    #[test]
    fn test_redefinition() {
        let r = resolver();
        r.define(node_def()).expect("define");
        r.define(node_def()).expect("identical redefinition");
        let other = EnumBuilder::new("Node").variant("A").build();
        assert!(matches!(r.define(other), Err(Error::InvalidShape { .. })));
        let reserved = EnumBuilder::new("int").variant("A").build();
        assert!(r.define(reserved).is_err());
    }

    #[test]
    fn test_recursive_alias() {
        let r = resolver();
        r.define(
            AliasDef::new(
                "Json",
                TypeRef::union(vec![
                    TypeRef::int(),
                    TypeRef::string(),
                    TypeRef::sequence(TypeRef::named("Json")),
                ]),
            )
            .into(),
        )
        .expect("define");
        let json = r.resolve(&TypeRef::named("Json")).expect("resolve");
        assert_eq!(json.name, "Union[int,str,list[Json]]");
        assert!(r.arena().contains(&ShapeId::of("Json")));
    }

    #[test]
    fn test_unguarded_alias_is_rejected() {
        let r = resolver();
        r.define(
            AliasDef::new("Loop", TypeRef::union(vec![TypeRef::named("Loop"), TypeRef::int()]))
                .into(),
        )
        .expect("define");
        let err = r.resolve(&TypeRef::named("Loop")).unwrap_err();
        assert!(matches!(err, Error::InvalidShape { ref name, .. } if name == "Loop"));
        assert!(r.arena().is_empty());

        // Two aliases naming each other
        r.define(AliasDef::new("Ping", TypeRef::optional(TypeRef::named("Pong"))).into())
            .expect("define ping");
        r.define(AliasDef::new("Pong", TypeRef::named("Ping")).into())
            .expect("define pong");
        assert!(matches!(
            r.resolve(&TypeRef::named("Ping")),
            Err(Error::InvalidShape { .. })
        ));
    }

    #[test]
    fn test_growing_generic_is_rejected() {
        let r = resolver();
        r.define(
            RecordBuilder::new("Nest")
                .params(&["T"])
                .field(
                    "inner",
                    TypeRef::optional(TypeRef::generic(
                        "Nest",
                        vec![TypeRef::sequence(TypeRef::param("T"))],
                    )),
                )
                .build(),
        )
        .expect("define");
        let err = r
            .resolve(&TypeRef::generic("Nest", vec![TypeRef::int()]))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidShape { .. }));
        assert!(r.arena().is_empty());

        // Self-instantiation with the same argument closes into a cycle
        r.define(
            RecordBuilder::new("Chain")
                .params(&["T"])
                .field("value", TypeRef::param("T"))
                .field(
                    "next",
                    TypeRef::optional(TypeRef::generic("Chain", vec![TypeRef::param("T")])),
                )
                .build(),
        )
        .expect("define chain");
        assert!(r
            .resolve(&TypeRef::generic("Chain", vec![TypeRef::int()]))
            .is_ok());
    }
}
