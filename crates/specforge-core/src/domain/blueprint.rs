//! Blueprint: the structured build specification a job is driven from.
//!
//! Blueprints arrive pre-parsed from an external collaborator. The core only
//! checks the one invariant it depends on (at least one entity with at least
//! one field) and otherwise treats the content as opaque input for
//! generators.

use serde::{Deserialize, Serialize};

use super::digest;
use super::error::{Result, ValidationError};

/// Semantic type of an entity field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Uuid,
    String,
    Text,
    Integer,
    Decimal,
    Boolean,
    Date,
    DateTime,
    Email,
    Json,
    /// Closed set of allowed values.
    Enum(Vec<String>),
    /// Foreign key to another entity by name.
    Reference(String),
}

impl FieldType {
    /// Short tag used in logs and manifests.
    pub fn tag(&self) -> &'static str {
        match self {
            FieldType::Uuid => "uuid",
            FieldType::String => "string",
            FieldType::Text => "text",
            FieldType::Integer => "integer",
            FieldType::Decimal => "decimal",
            FieldType::Boolean => "boolean",
            FieldType::Date => "date",
            FieldType::DateTime => "date_time",
            FieldType::Email => "email",
            FieldType::Json => "json",
            FieldType::Enum(_) => "enum",
            FieldType::Reference(_) => "reference",
        }
    }
}

/// A single field on an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default)]
    pub unique: bool,
}

fn default_true() -> bool {
    true
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
            unique: false,
        }
    }
}

/// Relationship cardinality between two entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    OneToOne,
    OneToMany,
    ManyToOne,
    ManyToMany,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub kind: RelationshipKind,
    /// Target entity name.
    pub target: String,
}

/// A domain entity to generate persistence, API, and UI for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<Field>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

impl Entity {
    pub fn new(name: impl Into<String>, fields: Vec<Field>) -> Self {
        Self {
            name: name.into(),
            fields,
            relationships: Vec::new(),
        }
    }

    /// snake_case singular name (`LineItem` → `line_item`).
    pub fn snake_name(&self) -> String {
        to_snake_case(&self.name)
    }

    /// Table / resource collection name (`Invoice` → `invoices`).
    pub fn collection_name(&self) -> String {
        pluralize(&self.snake_name())
    }
}

/// A frontend page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub name: String,
    pub route: String,
    /// Entity the page lists or edits, if any.
    #[serde(default)]
    pub entity: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRole {
    pub name: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Integration {
    pub name: String,
    pub kind: String,
}

/// Coarse deployment sizing hint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfraSize {
    #[default]
    Small,
    Medium,
    Large,
}

impl InfraSize {
    pub fn replicas(&self) -> u32 {
        match self {
            InfraSize::Small => 1,
            InfraSize::Medium => 2,
            InfraSize::Large => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceFramework {
    Gdpr,
    Hipaa,
    Soc2,
    PciDss,
}

/// Structured description of the application to generate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blueprint {
    pub name: String,
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub pages: Vec<Page>,
    #[serde(default)]
    pub roles: Vec<AuthRole>,
    #[serde(default)]
    pub integrations: Vec<Integration>,
    #[serde(default)]
    pub infra_size: InfraSize,
    #[serde(default)]
    pub compliance: Vec<ComplianceFramework>,
}

impl Blueprint {
    pub fn new(name: impl Into<String>, entities: Vec<Entity>) -> Self {
        Self {
            name: name.into(),
            entities,
            pages: Vec::new(),
            roles: Vec::new(),
            integrations: Vec::new(),
            infra_size: InfraSize::default(),
            compliance: Vec::new(),
        }
    }

    /// Parse a blueprint from JSON.
    pub fn from_json(raw: &str) -> std::result::Result<Self, ValidationError> {
        serde_json::from_str(raw).map_err(|e| ValidationError::Malformed(e.to_string()))
    }

    /// Check the invariant generation depends on: ≥1 entity with ≥1 field.
    ///
    /// Entities without fields are allowed alongside a populated one; the
    /// generators skip them.
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        if self.entities.is_empty() {
            return Err(ValidationError::NoEntities);
        }
        if self.entities.iter().all(|e| e.fields.is_empty()) {
            return Err(ValidationError::NoFields {
                entities: self.entities.iter().map(|e| e.name.clone()).collect(),
            });
        }
        Ok(())
    }

    /// Entities that generators should emit code for.
    pub fn generatable_entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter().filter(|e| !e.fields.is_empty())
    }

    /// SHA256 digest of the canonical JSON form.
    pub fn digest(&self) -> Result<String> {
        digest::blueprint_digest(self)
    }
}

/// `LineItem` / `line-item` / `line item` → `line_item`.
pub fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for ch in name.chars() {
        if ch.is_ascii_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
            prev_lower = false;
        } else if ch == '-' || ch == ' ' {
            if !out.ends_with('_') && !out.is_empty() {
                out.push('_');
            }
            prev_lower = false;
        } else {
            out.push(ch);
            prev_lower = ch.is_ascii_lowercase() || ch.is_ascii_digit();
        }
    }
    out
}

/// Naive English plural for resource names.
pub fn pluralize(word: &str) -> String {
    if word.ends_with('y')
        && !word.ends_with("ay")
        && !word.ends_with("ey")
        && !word.ends_with("oy")
        && !word.ends_with("uy")
    {
        format!("{}ies", &word[..word.len() - 1])
    } else if word.ends_with('s')
        || word.ends_with('x')
        || word.ends_with("ch")
        || word.ends_with("sh")
    {
        format!("{word}es")
    } else {
        format!("{word}s")
    }
}
