// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Node shapes: Form → Section → (Field | Subform → (Field | Subform …)).
//!
//! Children live behind [`Arc`] so a snapshot can be copied along one
//! root-to-site path while every untouched subtree stays shared with the
//! previous snapshot. Mutation code goes through `Arc::make_mut`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ident::{FormId, NodeId, Timestamp};

/// Discriminator for the three node types that live inside a form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Top-level group owned by a form.
    Section,
    /// Single input definition.
    Field,
    /// Nestable named group of fields and child subforms.
    Subform,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Section => "section",
            Self::Field => "field",
            Self::Subform => "subform",
        })
    }
}

/// Fixed enumeration of field type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldKind {
    /// Single-line text.
    Text,
    /// Multi-line text.
    Textarea,
    /// Numeric input.
    Number,
    /// Calendar date.
    Date,
    /// Boolean toggle.
    Checkbox,
    /// One-of / many-of selection.
    Choice,
    /// File upload.
    File,
    /// Presentational grouping of other inputs.
    LayoutGroup,
}

/// Owner of a Field or Subform. Exactly one of the two container kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ParentRef {
    /// Owned by a section.
    Section(NodeId),
    /// Owned by a subform.
    Subform(NodeId),
}

impl ParentRef {
    /// Identifier of the parent container.
    pub fn id(&self) -> &NodeId {
        match self {
            Self::Section(id) | Self::Subform(id) => id,
        }
    }

    /// Kind of the parent container.
    pub const fn kind(&self) -> NodeKind {
        match self {
            Self::Section(_) => NodeKind::Section,
            Self::Subform(_) => NodeKind::Subform,
        }
    }

    /// Same parent kind, different id.
    pub fn with_id(&self, id: NodeId) -> Self {
        match self {
            Self::Section(_) => Self::Section(id),
            Self::Subform(_) => Self::Subform(id),
        }
    }
}

impl std::fmt::Display for ParentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

/// Root document: an ordered list of sections plus form-level metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Form {
    /// Authoritative form id.
    pub id: FormId,
    /// Display name.
    pub name: String,
    /// Publication flag.
    #[serde(default)]
    pub published: bool,
    /// Last server-side update.
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
    /// Ordered sections.
    #[serde(default)]
    pub sections: Vec<Arc<Section>>,
}

/// Form-level metadata without the section tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormMeta {
    /// Authoritative form id.
    pub id: FormId,
    /// Display name.
    pub name: String,
    /// Publication flag.
    pub published: bool,
    /// Last server-side update.
    pub updated_at: Option<Timestamp>,
}

impl Form {
    /// Empty, unpublished form.
    pub fn new(id: FormId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            published: false,
            updated_at: None,
            sections: Vec::new(),
        }
    }

    /// Metadata view of this form.
    pub fn meta(&self) -> FormMeta {
        FormMeta {
            id: self.id.clone(),
            name: self.name.clone(),
            published: self.published,
            updated_at: self.updated_at,
        }
    }

    /// Overwrite form-level scalars from an authoritative metadata record.
    pub fn apply_meta(&mut self, meta: &FormMeta) {
        self.name.clone_from(&meta.name);
        self.published = meta.published;
        self.updated_at = meta.updated_at;
    }
}

/// Ordered group of fields and subforms belonging to a form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    /// Section id.
    pub id: NodeId,
    /// Owning form.
    pub form_id: FormId,
    /// Heading.
    pub title: String,
    /// Optional help text.
    #[serde(default)]
    pub description: Option<String>,
    /// Dense zero-based position among the form's sections.
    pub order: u32,
    /// Column-layout hint.
    #[serde(default = "default_columns")]
    pub columns: u8,
    /// Visibility flag.
    #[serde(default = "default_visible")]
    pub visible: bool,
    /// Ordered fields.
    #[serde(default)]
    pub fields: Vec<Arc<Field>>,
    /// Ordered subforms.
    #[serde(default)]
    pub subforms: Vec<Arc<Subform>>,
    /// Server-side creation time.
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    /// Server-side update time.
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
}

const fn default_columns() -> u8 {
    1
}

const fn default_visible() -> bool {
    true
}

impl Section {
    /// Empty, visible, single-column section at `order` 0.
    pub fn new(id: NodeId, form_id: FormId, title: impl Into<String>) -> Self {
        Self {
            id,
            form_id,
            title: title.into(),
            description: None,
            order: 0,
            columns: default_columns(),
            visible: default_visible(),
            fields: Vec::new(),
            subforms: Vec::new(),
            created_at: None,
            updated_at: None,
        }
    }

    /// Copy scalar attributes from `other`, keeping id-independent children.
    pub fn adopt_scalars(&mut self, other: &Self) {
        self.title.clone_from(&other.title);
        self.description.clone_from(&other.description);
        self.columns = other.columns;
        self.visible = other.visible;
        self.created_at = other.created_at;
        self.updated_at = other.updated_at;
    }
}

/// Single input definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    /// Field id.
    pub id: NodeId,
    /// Owning section or subform.
    pub parent: ParentRef,
    /// Type tag.
    pub kind: FieldKind,
    /// Label shown to users.
    pub label: String,
    /// Dense zero-based position among siblings.
    pub order: u32,
    /// Whether the input is mandatory.
    #[serde(default)]
    pub required: bool,
    /// Validation/config payload; opaque to the engine.
    #[serde(default)]
    pub config: Value,
    /// Server-side creation time.
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    /// Server-side update time.
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
}

impl Field {
    /// Optional field at `order` 0 with a null config payload.
    pub fn new(id: NodeId, parent: ParentRef, kind: FieldKind, label: impl Into<String>) -> Self {
        Self {
            id,
            parent,
            kind,
            label: label.into(),
            order: 0,
            required: false,
            config: Value::Null,
            created_at: None,
            updated_at: None,
        }
    }

    /// Copy scalar attributes from `other`.
    pub fn adopt_scalars(&mut self, other: &Self) {
        self.kind = other.kind;
        self.label.clone_from(&other.label);
        self.required = other.required;
        self.config.clone_from(&other.config);
        self.created_at = other.created_at;
        self.updated_at = other.updated_at;
    }
}

/// Nestable named group of fields and child subforms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subform {
    /// Subform id.
    pub id: NodeId,
    /// Owning section or parent subform.
    pub parent: ParentRef,
    /// Display name.
    pub name: String,
    /// Dense zero-based position among siblings.
    pub order: u32,
    /// Ordered fields.
    #[serde(default)]
    pub fields: Vec<Arc<Field>>,
    /// Ordered child subforms.
    #[serde(default)]
    pub subforms: Vec<Arc<Subform>>,
    /// Server-side creation time.
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    /// Server-side update time.
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
}

impl Subform {
    /// Empty subform at `order` 0.
    pub fn new(id: NodeId, parent: ParentRef, name: impl Into<String>) -> Self {
        Self {
            id,
            parent,
            name: name.into(),
            order: 0,
            fields: Vec::new(),
            subforms: Vec::new(),
            created_at: None,
            updated_at: None,
        }
    }

    /// Copy scalar attributes from `other`.
    pub fn adopt_scalars(&mut self, other: &Self) {
        self.name.clone_from(&other.name);
        self.created_at = other.created_at;
        self.updated_at = other.updated_at;
    }
}

/// Anything that owns an ordered field collection and an ordered subform
/// collection (sections and subforms).
pub trait Container {
    /// Id of this container.
    fn container_id(&self) -> &NodeId;
    /// `Section` or `Subform`.
    fn container_kind(&self) -> NodeKind;
    /// Ordered fields.
    fn fields(&self) -> &[Arc<Field>];
    /// Ordered subforms.
    fn subforms(&self) -> &[Arc<Subform>];
    /// Mutable field collection.
    fn fields_mut(&mut self) -> &mut Vec<Arc<Field>>;
    /// Mutable subform collection.
    fn subforms_mut(&mut self) -> &mut Vec<Arc<Subform>>;

    /// Reference a child would use to point at this container.
    fn as_parent(&self) -> ParentRef {
        let id = self.container_id().clone();
        if self.container_kind() == NodeKind::Subform {
            ParentRef::Subform(id)
        } else {
            ParentRef::Section(id)
        }
    }
}

impl Container for Section {
    fn container_id(&self) -> &NodeId {
        &self.id
    }
    fn container_kind(&self) -> NodeKind {
        NodeKind::Section
    }
    fn fields(&self) -> &[Arc<Field>] {
        &self.fields
    }
    fn subforms(&self) -> &[Arc<Subform>] {
        &self.subforms
    }
    fn fields_mut(&mut self) -> &mut Vec<Arc<Field>> {
        &mut self.fields
    }
    fn subforms_mut(&mut self) -> &mut Vec<Arc<Subform>> {
        &mut self.subforms
    }
}

impl Container for Subform {
    fn container_id(&self) -> &NodeId {
        &self.id
    }
    fn container_kind(&self) -> NodeKind {
        NodeKind::Subform
    }
    fn fields(&self) -> &[Arc<Field>] {
        &self.fields
    }
    fn subforms(&self) -> &[Arc<Subform>] {
        &self.subforms
    }
    fn fields_mut(&mut self) -> &mut Vec<Arc<Field>> {
        &mut self.fields
    }
    fn subforms_mut(&mut self) -> &mut Vec<Arc<Subform>> {
        &mut self.subforms
    }
}

/// Owned node of any kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Node {
    /// A section.
    Section(Section),
    /// A field.
    Field(Field),
    /// A subform.
    Subform(Subform),
}

impl Node {
    /// Node id.
    pub fn id(&self) -> &NodeId {
        match self {
            Self::Section(s) => &s.id,
            Self::Field(f) => &f.id,
            Self::Subform(s) => &s.id,
        }
    }
}

/// Borrowed node of any kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NodeRef<'a> {
    /// A section.
    Section(&'a Section),
    /// A field.
    Field(&'a Field),
    /// A subform.
    Subform(&'a Subform),
}

impl<'a> NodeRef<'a> {
    /// Node id.
    pub fn id(self) -> &'a NodeId {
        match self {
            Self::Section(s) => &s.id,
            Self::Field(f) => &f.id,
            Self::Subform(s) => &s.id,
        }
    }

    /// Discriminator.
    pub const fn kind(self) -> NodeKind {
        match self {
            Self::Section(_) => NodeKind::Section,
            Self::Field(_) => NodeKind::Field,
            Self::Subform(_) => NodeKind::Subform,
        }
    }

    /// Position among siblings.
    pub const fn order(self) -> u32 {
        match self {
            Self::Section(s) => s.order,
            Self::Field(f) => f.order,
            Self::Subform(s) => s.order,
        }
    }

    /// Container view (sections and subforms only).
    pub fn as_container(self) -> Option<&'a dyn Container> {
        match self {
            Self::Section(s) => Some(s),
            Self::Subform(s) => Some(s),
            Self::Field(_) => None,
        }
    }

    /// Clone into an owned node.
    pub fn to_node(self) -> Node {
        match self {
            Self::Section(s) => Node::Section(s.clone()),
            Self::Field(f) => Node::Field(f.clone()),
            Self::Subform(s) => Node::Subform(s.clone()),
        }
    }
}
