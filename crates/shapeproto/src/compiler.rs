// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Compiler: descriptors to protocol pipelines.
//!
//! Each descriptor kind maps to one structural step, optionally preceded by a
//! null short-circuit and followed by a constraint check. Child shapes are
//! obtained through the engine, so they are resolved and cached by identity like
//! any top-level request.

use crate::descriptor::{ShapeKind, TypeDescriptor};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::protocol::Protocol;
use crate::steps::{
    ConstraintStep, DelegateStep, EnumStep, FieldSlot, LeafStep, LiteralStep, MappingStep,
    NullableStep, PrimitiveStep, RecordStep, SequenceStep, Step, TupleStep, UnionStep,
};
use std::sync::Arc;

/// Builds the protocol of one descriptor.
pub(crate) struct Compiler<'e> {
    engine: &'e Engine,
}

impl<'e> Compiler<'e> {
    pub(crate) fn new(engine: &'e Engine) -> Self {
        Self { engine }
    }

    pub(crate) fn compile(&self, desc: &Arc<TypeDescriptor>) -> Result<Protocol> {
        let config = self.engine.config();
        let mut steps: Vec<Box<dyn Step>> = Vec::with_capacity(3);

        match &desc.kind {
            ShapeKind::Primitive(kind) => {
                steps.push(Box::new(PrimitiveStep::new(*kind, config.lenient_numbers)));
            }
            ShapeKind::Optional(inner) => {
                steps.push(Box::new(NullableStep));
                steps.push(Box::new(DelegateStep::new(self.child(inner)?)));
            }
            ShapeKind::Union(members) => {
                if members.len() > config.max_union_candidates {
                    return Err(Error::invalid_shape(
                        &desc.name,
                        format!(
                            "{} union members exceed the limit of {}",
                            members.len(),
                            config.max_union_candidates
                        ),
                    ));
                }
                let members = members
                    .iter()
                    .map(|m| self.child(m))
                    .collect::<Result<Vec<_>>>()?;
                steps.push(Box::new(UnionStep::new(&desc.name, members)));
            }
            ShapeKind::Sequence(seq) => {
                let element = self.child(&seq.element)?;
                steps.push(Box::new(SequenceStep::new(element, seq.unique)));
            }
            ShapeKind::Tuple(items) => {
                let items = items
                    .iter()
                    .map(|i| self.child(i))
                    .collect::<Result<Vec<_>>>()?;
                steps.push(Box::new(TupleStep::new(items)));
            }
            ShapeKind::Mapping(m) => {
                let key = self.child(&m.key)?;
                let value = self.child(&m.value)?;
                steps.push(Box::new(MappingStep::new(key, value)));
            }
            ShapeKind::Record(record) => {
                let mut fields = Vec::with_capacity(record.fields.len());
                for field in &record.fields {
                    let protocol = self
                        .child(&field.type_desc)
                        .map_err(|e| e.at_field(&field.name))?;
                    let wire = field.key_in(config.output_case);
                    fields.push(FieldSlot::new(field.clone(), wire, protocol));
                }
                steps.push(Box::new(RecordStep::new(
                    &desc.name,
                    fields,
                    config.forbids_unknown(),
                    config.omitted(),
                )));
            }
            ShapeKind::Enum(e) => {
                steps.push(Box::new(EnumStep::new(&desc.name, e.variants.clone())));
            }
            ShapeKind::Literal(values) => {
                steps.push(Box::new(LiteralStep::new(values.clone())));
            }
            ShapeKind::Recursive(_) => {
                steps.push(Box::new(DelegateStep::new(self.child(desc)?)));
            }
            ShapeKind::Leaf(_) => {
                let codec = self.engine.leaf_codec(&desc.name).ok_or_else(|| {
                    Error::invalid_shape(&desc.name, "no codec registered for leaf shape")
                })?;
                steps.push(Box::new(LeafStep::new(&desc.name, codec)));
            }
        }

        if let Some(constraints) = &desc.constraints {
            steps.push(Box::new(ConstraintStep::new(&desc.name, constraints)?));
        }

        log::trace!("[Compiler] compiled {} into {} step(s)", desc.name, steps.len());
        Ok(self.engine.assemble(Arc::clone(desc), steps))
    }

    fn child(&self, desc: &Arc<TypeDescriptor>) -> Result<Arc<Protocol>> {
        self.engine.protocol_for_descriptor(desc)
    }
}
