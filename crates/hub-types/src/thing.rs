//! Thing Description model.
//!
//! Only the fields the Hub acts on are typed. Everything else a TD carries
//! (links, version info, vendor extensions) is preserved verbatim through the
//! flattened `extra` maps so a TD read back from the directory is the TD the
//! agent published, plus the injected Forms.

use crate::errors::TypeError;
use crate::WILDCARD;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Default JSON-LD context for TDs that omit one.
pub const TD_CONTEXT: &str = "https://www.w3.org/2022/wot/td/v1.1";

/// Derive the digital twin ID of a Thing published by an agent.
///
/// The Hub uses the identity scheme: the dThingID is the agent's own thingID.
/// The owning agent is tracked beside the TD in the directory, so a second
/// agent publishing the same ID is detected as an ownership conflict instead
/// of silently creating a parallel twin.
pub fn dthing_id(_agent_id: &str, thing_id: &str) -> String {
    thing_id.to_string()
}

/// Check that a concrete Thing ID can be addressed in paths and push ids.
pub fn validate_thing_id(id: &str) -> Result<(), TypeError> {
    let reason = if id.is_empty() {
        "empty"
    } else if id == WILDCARD {
        "wildcard is not a thing id"
    } else if id.contains('/') {
        "'/' is reserved"
    } else {
        return Ok(());
    };
    Err(TypeError::InvalidThingId {
        id: id.to_string(),
        reason,
    })
}

/// Check that a concrete affordance name can be addressed.
pub fn validate_name(name: &str) -> Result<(), TypeError> {
    let reason = if name.is_empty() {
        "empty"
    } else if name == WILDCARD {
        "wildcard is not an affordance name"
    } else if name.contains('/') {
        "'/' is reserved"
    } else {
        return Ok(());
    };
    Err(TypeError::InvalidName {
        name: name.to_string(),
        reason,
    })
}

/// Data schema type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DataType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
    DateTime,
    Null,
}

/// Data schema of an affordance value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSchema {
    #[serde(rename = "@type", default, skip_serializing_if = "Option::is_none")]
    pub semantic_type: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<DataType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enumeration: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub read_only: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub write_only: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Protocol binding metadata describing how to perform an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Form {
    pub op: String,
    pub href: String,
    #[serde(rename = "htv:methodName", default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subprotocol: Option<String>,
    #[serde(rename = "contentType", default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl Form {
    pub fn new(op: &str, href: String, method: &str) -> Self {
        Self {
            op: op.to_string(),
            href,
            method: Some(method.to_string()),
            subprotocol: None,
            content_type: Some("application/json".to_string()),
        }
    }

    pub fn with_subprotocol(mut self, subprotocol: &str) -> Self {
        self.subprotocol = Some(subprotocol.to_string());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyAffordance {
    #[serde(flatten)]
    pub schema: DataSchema,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observable: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub forms: Vec<Form>,
}

impl PropertyAffordance {
    pub fn is_read_only(&self) -> bool {
        self.schema.read_only
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventAffordance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<DataSchema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub forms: Vec<Form>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionAffordance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<DataSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<DataSchema>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub safe: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub idempotent: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub forms: Vec<Form>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_context() -> Value {
    Value::String(TD_CONTEXT.to_string())
}

/// Thing Description document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThingDescription {
    #[serde(rename = "@context", default = "default_context")]
    pub context: Value,
    #[serde(rename = "@type", default, skip_serializing_if = "Option::is_none")]
    pub semantic_type: Option<Value>,
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyAffordance>,
    #[serde(default)]
    pub events: BTreeMap<String, EventAffordance>,
    #[serde(default)]
    pub actions: BTreeMap<String, ActionAffordance>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub forms: Vec<Form>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_definitions: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ThingDescription {
    /// Minimal TD with an id and title, no affordances.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            context: default_context(),
            semantic_type: None,
            id: id.into(),
            title: title.into(),
            description: None,
            properties: BTreeMap::new(),
            events: BTreeMap::new(),
            actions: BTreeMap::new(),
            forms: Vec::new(),
            security: None,
            security_definitions: None,
            extra: Map::new(),
        }
    }

    pub fn with_property(mut self, name: &str, property: PropertyAffordance) -> Self {
        self.properties.insert(name.to_string(), property);
        self
    }

    pub fn with_event(mut self, name: &str, event: EventAffordance) -> Self {
        self.events.insert(name.to_string(), event);
        self
    }

    pub fn with_action(mut self, name: &str, action: ActionAffordance) -> Self {
        self.actions.insert(name.to_string(), action);
        self
    }

    /// Validate the id and every affordance name.
    pub fn validate(&self) -> Result<(), TypeError> {
        validate_thing_id(&self.id)?;
        self.properties
            .keys()
            .chain(self.events.keys())
            .chain(self.actions.keys())
            .try_for_each(|name| validate_name(name))
    }

    /// Remove every Form, at TD and affordance level.
    ///
    /// Agents publish Forms describing their own endpoints; consumers must only
    /// see the Hub's.
    pub fn strip_forms(&mut self) {
        self.forms.clear();
        self.properties.values_mut().for_each(|p| p.forms.clear());
        self.events.values_mut().for_each(|e| e.forms.clear());
        self.actions.values_mut().for_each(|a| a.forms.clear());
    }
}
