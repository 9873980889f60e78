use std::collections::BTreeMap;

use serde_json::{Map, Value, json};

use crate::api::RemoteEntity;
use crate::domain::{DirectLink, EntityType};

/// One in-memory metadata record: its type, spreadsheet-local identifier,
/// content payload, and its outbound links to other records. Content is
/// mutated only through this type's own methods.
#[derive(Debug, Clone)]
pub struct EntityRecord {
    pub entity_type: EntityType,
    pub concrete_type: Option<String>,
    pub id: String,
    pub content: Value,
    pub links_by_entity: BTreeMap<EntityType, Vec<String>>,
    pub external_links_by_entity: BTreeMap<EntityType, Vec<String>>,
    pub linking_details: Option<Value>,
    /// Appended only by the link resolver.
    pub direct_links: Vec<DirectLink>,
    pub is_reference: bool,
    pub is_linking_reference: bool,
    pub remote: Option<RemoteEntity>,
}

impl EntityRecord {
    pub fn new(entity_type: EntityType, id: impl Into<String>, content: Value) -> Self {
        Self {
            entity_type,
            concrete_type: None,
            id: id.into(),
            content,
            links_by_entity: BTreeMap::new(),
            external_links_by_entity: BTreeMap::new(),
            linking_details: None,
            direct_links: Vec::new(),
            is_reference: false,
            is_linking_reference: false,
            remote: None,
        }
    }

    /// A stand-in for a record that exists only remotely and only as a
    /// link target.
    pub fn linking_stub(entity_type: EntityType, uuid: impl Into<String>) -> Self {
        let mut record = Self::new(entity_type, uuid, Value::Null);
        record.is_reference = true;
        record.is_linking_reference = true;
        record
    }

    /// A synthesized process record, seeded from the owning record's
    /// `linking_details` when present.
    pub fn process(id: &str, linking_details: Option<&Value>, schema_url: &str) -> Self {
        let mut content = match linking_details {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        match content.get_mut("process_core") {
            Some(Value::Object(core)) => {
                core.insert("process_id".to_string(), Value::String(id.to_string()));
            }
            _ => {
                content.insert("process_core".to_string(), json!({ "process_id": id }));
            }
        }
        content.insert("schema_type".to_string(), Value::String("process".to_string()));
        content.insert(
            "describedBy".to_string(),
            Value::String(schema_url.to_string()),
        );
        Self::new(EntityType::Process, id, Value::Object(content))
    }

    pub fn add_direct_link(&mut self, link: DirectLink) {
        self.direct_links.push(link);
    }

    pub fn links_to(&self, relationship: &str, target_id: &str) -> bool {
        self.direct_links
            .iter()
            .any(|link| link.relationship == relationship && link.target_id == target_id)
    }

    pub fn set_remote(&mut self, remote: RemoteEntity) {
        self.remote = Some(remote);
    }

    /// Shallow merge of this record's content over an existing remote
    /// payload: our keys win, remote-only keys survive.
    pub fn content_merged_onto(&self, existing: &Value) -> Value {
        let mut merged = match existing {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        if let Value::Object(ours) = &self.content {
            for (key, value) in ours {
                merged.insert(key.clone(), value.clone());
            }
        }
        Value::Object(merged)
    }

    pub fn is_external_stub(&self) -> bool {
        self.is_reference && self.is_linking_reference
    }
}
