// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Authoring payloads: drafts for creates, partial patches for updates.
//!
//! Patches never carry `id`, `order`, or a parent reference. Position changes go
//! through reorder intents and ownership is fixed at creation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ident::{FormId, NodeId};
use crate::node::{Field, FieldKind, Form, ParentRef, Section, Subform};

/// Content of a section create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionDraft {
    /// Heading.
    pub title: String,
    /// Optional help text.
    #[serde(default)]
    pub description: Option<String>,
    /// Column-layout hint.
    #[serde(default = "one")]
    pub columns: u8,
    /// Visibility flag.
    #[serde(default = "yes")]
    pub visible: bool,
}

// A present `null` means "clear", an absent key means "unchanged".
fn present_or_null<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

const fn one() -> u8 {
    1
}

const fn yes() -> bool {
    true
}

impl SectionDraft {
    /// Visible single-column section with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            columns: 1,
            visible: true,
        }
    }

    /// Materialize as a childless section.
    pub fn to_section(&self, id: NodeId, form_id: FormId, order: u32) -> Section {
        let mut section = Section::new(id, form_id, self.title.clone());
        section.description.clone_from(&self.description);
        section.columns = self.columns;
        section.visible = self.visible;
        section.order = order;
        section
    }
}

/// Content of a field create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDraft {
    /// Type tag.
    pub kind: FieldKind,
    /// Label.
    pub label: String,
    /// Mandatory flag.
    #[serde(default)]
    pub required: bool,
    /// Opaque config payload.
    #[serde(default)]
    pub config: Value,
}

impl FieldDraft {
    /// Optional field with an empty config.
    pub fn new(kind: FieldKind, label: impl Into<String>) -> Self {
        Self {
            kind,
            label: label.into(),
            required: false,
            config: Value::Null,
        }
    }

    /// Materialize under `parent`.
    pub fn to_field(&self, id: NodeId, parent: ParentRef, order: u32) -> Field {
        let mut field = Field::new(id, parent, self.kind, self.label.clone());
        field.required = self.required;
        field.config.clone_from(&self.config);
        field.order = order;
        field
    }
}

/// Content of a subform create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubformDraft {
    /// Display name.
    pub name: String,
}

impl SubformDraft {
    /// Subform with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Materialize as an empty subform under `parent`.
    pub fn to_subform(&self, id: NodeId, parent: ParentRef, order: u32) -> Subform {
        let mut subform = Subform::new(id, parent, self.name.clone());
        subform.order = order;
        subform
    }
}

/// Form-level metadata edit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormPatch {
    /// New name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// New publication flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<bool>,
}

impl FormPatch {
    /// `true` when nothing would change.
    pub const fn is_empty(&self) -> bool {
        self.name.is_none() && self.published.is_none()
    }

    /// Apply to a form in place.
    pub fn apply(&self, form: &mut Form) {
        if let Some(name) = &self.name {
            form.name.clone_from(name);
        }
        if let Some(published) = self.published {
            form.published = published;
        }
    }
}

/// Partial section update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionPatch {
    /// New heading.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// New description; `Some(None)` clears it.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_or_null"
    )]
    pub description: Option<Option<String>>,
    /// New column hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<u8>,
    /// New visibility.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible: Option<bool>,
}

impl SectionPatch {
    /// `true` when nothing would change.
    pub const fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.columns.is_none()
            && self.visible.is_none()
    }

    /// Apply to a section in place.
    pub fn apply(&self, section: &mut Section) {
        if let Some(title) = &self.title {
            section.title.clone_from(title);
        }
        if let Some(description) = &self.description {
            section.description.clone_from(description);
        }
        if let Some(columns) = self.columns {
            section.columns = columns;
        }
        if let Some(visible) = self.visible {
            section.visible = visible;
        }
    }
}

/// Partial field update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldPatch {
    /// New label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// New type tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<FieldKind>,
    /// New mandatory flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    /// Replacement config payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
}

impl FieldPatch {
    /// `true` when nothing would change.
    pub const fn is_empty(&self) -> bool {
        self.label.is_none()
            && self.kind.is_none()
            && self.required.is_none()
            && self.config.is_none()
    }

    /// Apply to a field in place.
    pub fn apply(&self, field: &mut Field) {
        if let Some(label) = &self.label {
            field.label.clone_from(label);
        }
        if let Some(kind) = self.kind {
            field.kind = kind;
        }
        if let Some(required) = self.required {
            field.required = required;
        }
        if let Some(config) = &self.config {
            field.config.clone_from(config);
        }
    }
}

/// Partial subform update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubformPatch {
    /// New name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl SubformPatch {
    /// `true` when nothing would change.
    pub const fn is_empty(&self) -> bool {
        self.name.is_none()
    }

    /// Apply to a subform in place.
    pub fn apply(&self, subform: &mut Subform) {
        if let Some(name) = &self.name {
            subform.name.clone_from(name);
        }
    }
}
