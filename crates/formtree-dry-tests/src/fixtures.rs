// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Form tree builder.
//!
//! Children get dense `order` values in insertion order and parent references
//! that point at their builder's container.

use std::sync::Arc;

use formtree_model::{
    Field, FieldKind, Form, IdError, NodeId, ParentRef, Section, ServerId, Subform,
};

/// Parse a node id (server or `tmp-N`).
pub fn nid(raw: &str) -> Result<NodeId, IdError> {
    NodeId::parse(raw)
}

/// Builder for a [`Form`] with sections.
///
/// # Example
///
/// ```
/// use formtree_dry_tests::FormBuilder;
/// use formtree_model::FieldKind;
///
/// let form = FormBuilder::new("form-1", "Intake")
///     .section("s1", "Main", |s| {
///         s.field("f1", FieldKind::Text, "Name")
///             .subform("sf1", "Lines", |sf| sf.field("f2", FieldKind::Number, "Qty"))
///     })
///     .build()
///     .unwrap();
/// assert_eq!(form.node_count(), 4);
/// assert!(form.check_invariants().is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct FormBuilder {
    id: String,
    name: String,
    sections: Vec<(String, String, ContainerBuilder)>,
}

impl FormBuilder {
    /// Start a form.
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_owned(),
            name: name.to_owned(),
            sections: Vec::new(),
        }
    }

    /// Append a section and fill it with `build`.
    pub fn section(
        mut self,
        id: &str,
        title: &str,
        build: impl FnOnce(ContainerBuilder) -> ContainerBuilder,
    ) -> Self {
        self.sections
            .push((id.to_owned(), title.to_owned(), build(ContainerBuilder::default())));
        self
    }

    /// Finish; fails on the first malformed id.
    pub fn build(self) -> Result<Form, IdError> {
        let form_id = ServerId::new(self.id)?;
        let mut form = Form::new(form_id.clone(), self.name);
        for (order, (id, title, children)) in (0u32..).zip(self.sections) {
            let mut section = Section::new(nid(&id)?, form_id.clone(), title);
            section.order = order;
            let parent = ParentRef::Section(section.id.clone());
            let (fields, subforms) = children.finish(&parent)?;
            section.fields = fields;
            section.subforms = subforms;
            form.sections.push(Arc::new(section));
        }
        Ok(form)
    }
}

type Children = (Vec<Arc<Field>>, Vec<Arc<Subform>>);

#[derive(Debug, Clone)]
enum Child {
    Field {
        id: String,
        kind: FieldKind,
        label: String,
    },
    Subform {
        id: String,
        name: String,
        children: ContainerBuilder,
    },
}

/// Children of a section or subform.
#[derive(Debug, Clone, Default)]
pub struct ContainerBuilder {
    children: Vec<Child>,
}

impl ContainerBuilder {
    /// Append a field.
    pub fn field(mut self, id: &str, kind: FieldKind, label: &str) -> Self {
        self.children.push(Child::Field {
            id: id.to_owned(),
            kind,
            label: label.to_owned(),
        });
        self
    }

    /// Append a subform and fill it with `build`.
    pub fn subform(
        mut self,
        id: &str,
        name: &str,
        build: impl FnOnce(Self) -> Self,
    ) -> Self {
        self.children.push(Child::Subform {
            id: id.to_owned(),
            name: name.to_owned(),
            children: build(Self::default()),
        });
        self
    }

    fn finish(self, parent: &ParentRef) -> Result<Children, IdError> {
        let mut fields = Vec::new();
        let mut subforms = Vec::new();
        for child in self.children {
            match child {
                Child::Field { id, kind, label } => {
                    let mut field = Field::new(nid(&id)?, parent.clone(), kind, label);
                    field.order = dense(fields.len());
                    fields.push(Arc::new(field));
                }
                Child::Subform { id, name, children } => {
                    let mut subform = Subform::new(nid(&id)?, parent.clone(), name);
                    subform.order = dense(subforms.len());
                    let (inner_fields, inner_subforms) =
                        children.finish(&ParentRef::Subform(subform.id.clone()))?;
                    subform.fields = inner_fields;
                    subform.subforms = inner_subforms;
                    subforms.push(Arc::new(subform));
                }
            }
        }
        Ok((fields, subforms))
    }
}

fn dense(index: usize) -> u32 {
    u32::try_from(index).unwrap_or(u32::MAX)
}
