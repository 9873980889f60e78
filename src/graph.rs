use std::collections::{BTreeMap, HashMap};
use std::fs;

use camino::Utf8Path;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::domain::EntityType;
use crate::entity::EntityRecord;
use crate::error::SubmitError;

/// Raw, spreadsheet-derived entity set as produced by the tabular
/// conversion layer. Declaration order is preserved.
#[derive(Debug, Deserialize)]
pub struct RawGraph {
    pub entities: Vec<RawEntity>,
}

#[derive(Debug, Deserialize)]
pub struct RawEntity {
    pub entity_type: EntityType,
    #[serde(default)]
    pub concrete_type: Option<String>,
    pub id: String,
    #[serde(default)]
    pub content: Value,
    #[serde(default)]
    pub links_by_entity: BTreeMap<EntityType, Vec<String>>,
    #[serde(default)]
    pub external_links_by_entity: BTreeMap<EntityType, Vec<String>>,
    #[serde(default)]
    pub linking_details: Option<Value>,
    #[serde(default)]
    pub is_reference: bool,
}

pub fn read_graph_file(path: &Utf8Path) -> Result<RawGraph, SubmitError> {
    let content = fs::read_to_string(path.as_std_path())
        .map_err(|_| SubmitError::GraphRead(path.to_path_buf()))?;
    serde_json::from_str(&content).map_err(|err| SubmitError::GraphParse(err.to_string()))
}

/// Insertion-ordered index of entity records keyed by `(type, id)`.
#[derive(Debug, Default, Clone)]
pub struct EntityGraph {
    records: Vec<EntityRecord>,
    index: HashMap<(EntityType, String), usize>,
}

impl EntityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a graph from a raw entity set, expanding every external
    /// link into a linking-reference stub so that downstream resolution
    /// treats external references uniformly with in-graph ones.
    pub fn load(raw: RawGraph) -> Result<EntityGraph, SubmitError> {
        let uuid_re = Regex::new(
            r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$",
        )
        .unwrap();

        let mut graph = EntityGraph::new();
        for raw_entity in raw.entities {
            let mut record = EntityRecord::new(
                raw_entity.entity_type,
                raw_entity.id,
                raw_entity.content,
            );
            record.concrete_type = raw_entity.concrete_type;
            record.links_by_entity = raw_entity.links_by_entity;
            record.linking_details = raw_entity.linking_details;
            record.is_reference = raw_entity.is_reference;

            let mut stubs = Vec::new();
            for (target_type, uuids) in raw_entity.external_links_by_entity {
                for uuid in uuids {
                    if !uuid_re.is_match(&uuid) {
                        return Err(SubmitError::InvalidExternalId {
                            entity_type: record.entity_type.to_string(),
                            entity_id: record.id.clone(),
                            external_id: uuid,
                        });
                    }
                    record
                        .links_by_entity
                        .entry(target_type)
                        .or_default()
                        .push(uuid.clone());
                    stubs.push((target_type, uuid));
                }
            }

            graph.add(record);
            for (target_type, uuid) in stubs {
                graph.add_stub(target_type, uuid);
            }
        }
        Ok(graph)
    }

    /// Inserts or merges by `(type, id)`: reference flags are OR'd and
    /// the most recently added content wins.
    pub fn add(&mut self, mut record: EntityRecord) -> usize {
        let key = (record.entity_type, record.id.clone());
        match self.index.get(&key).copied() {
            Some(idx) => {
                let existing = &self.records[idx];
                record.is_reference |= existing.is_reference;
                record.is_linking_reference |= existing.is_linking_reference;
                self.records[idx] = record;
                idx
            }
            None => {
                let idx = self.records.len();
                self.records.push(record);
                self.index.insert(key, idx);
                idx
            }
        }
    }

    // Stubs never clobber a record the spreadsheet declared; a collision
    // only marks the existing record as a remote reference.
    fn add_stub(&mut self, entity_type: EntityType, uuid: String) {
        match self.index_of(entity_type, &uuid) {
            Some(idx) => {
                let record = &mut self.records[idx];
                record.is_reference = true;
                record.is_linking_reference = true;
            }
            None => {
                self.add(EntityRecord::linking_stub(entity_type, uuid));
            }
        }
    }

    pub fn get(&self, entity_type: EntityType, id: &str) -> Option<&EntityRecord> {
        self.index_of(entity_type, id).map(|idx| &self.records[idx])
    }

    pub fn index_of(&self, entity_type: EntityType, id: &str) -> Option<usize> {
        self.index.get(&(entity_type, id.to_string())).copied()
    }

    pub fn record(&self, idx: usize) -> &EntityRecord {
        &self.records[idx]
    }

    pub fn record_mut(&mut self, idx: usize) -> &mut EntityRecord {
        &mut self.records[idx]
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &EntityRecord> {
        self.records.iter()
    }

    pub fn get_all(&self, entity_type: EntityType) -> Vec<&EntityRecord> {
        self.records
            .iter()
            .filter(|record| record.entity_type == entity_type)
            .collect()
    }

    pub fn get_new(&self, entity_type: EntityType) -> Vec<&EntityRecord> {
        self.records
            .iter()
            .filter(|record| record.entity_type == entity_type && !record.is_external_stub())
            .collect()
    }

    pub fn new_indices(&self) -> Vec<usize> {
        (0..self.records.len())
            .filter(|&idx| !self.records[idx].is_external_stub())
            .collect()
    }

    pub fn resolvable_indices(&self) -> Vec<usize> {
        (0..self.records.len())
            .filter(|&idx| {
                let record = &self.records[idx];
                !record.is_reference && !record.is_linking_reference
            })
            .collect()
    }

    pub fn project(&self) -> Result<&EntityRecord, SubmitError> {
        self.project_index().map(|idx| &self.records[idx])
    }

    pub fn project_index(&self) -> Result<usize, SubmitError> {
        (0..self.records.len())
            .find(|&idx| self.records[idx].entity_type == EntityType::Project)
            .ok_or(SubmitError::MissingProject)
    }

    pub fn count_total(&self) -> usize {
        self.records.len()
    }

    pub fn count_new_of_type(&self, entity_type: EntityType) -> usize {
        self.get_new(entity_type).len()
    }

    pub fn count_links(&self) -> usize {
        self.records
            .iter()
            .map(|record| record.direct_links.len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;
    use crate::domain::{DirectLink, REL_PROJECT};

    fn raw(entity_type: EntityType, id: &str) -> RawEntity {
        RawEntity {
            entity_type,
            concrete_type: None,
            id: id.to_string(),
            content: json!({}),
            links_by_entity: BTreeMap::new(),
            external_links_by_entity: BTreeMap::new(),
            linking_details: None,
            is_reference: false,
        }
    }

    #[test]
    fn add_merges_flags_and_keeps_latest_content() {
        let mut graph = EntityGraph::new();
        let mut first = EntityRecord::new(EntityType::Biomaterial, "b1", json!({ "v": 1 }));
        first.is_reference = true;
        graph.add(first);
        graph.add(EntityRecord::new(EntityType::Biomaterial, "b1", json!({ "v": 2 })));

        assert_eq!(graph.count_total(), 1);
        let merged = graph.get(EntityType::Biomaterial, "b1").unwrap();
        assert!(merged.is_reference);
        assert_eq!(merged.content, json!({ "v": 2 }));
    }

    #[test]
    fn load_expands_external_links_into_stubs() {
        let uuid = "7f2c8a44-10ce-4f0a-9bd5-6f1e2ab3c901";
        let mut file = raw(EntityType::File, "f1");
        file.external_links_by_entity
            .insert(EntityType::Biomaterial, vec![uuid.to_string()]);

        let graph = EntityGraph::load(RawGraph {
            entities: vec![raw(EntityType::Project, "p1"), file],
        })
        .unwrap();

        let stub = graph.get(EntityType::Biomaterial, uuid).unwrap();
        assert!(stub.is_external_stub());
        let file = graph.get(EntityType::File, "f1").unwrap();
        assert_eq!(
            file.links_by_entity.get(&EntityType::Biomaterial),
            Some(&vec![uuid.to_string()])
        );
        // stubs are not part of any creation phase
        assert_eq!(graph.count_new_of_type(EntityType::Biomaterial), 0);
        assert_eq!(graph.count_total(), 3);
    }

    #[test]
    fn load_rejects_non_uuid_external_ids() {
        let mut file = raw(EntityType::File, "f1");
        file.external_links_by_entity
            .insert(EntityType::Biomaterial, vec!["donor_1".to_string()]);

        let err = EntityGraph::load(RawGraph {
            entities: vec![file],
        })
        .unwrap_err();
        assert_matches!(err, SubmitError::InvalidExternalId { .. });
    }

    #[test]
    fn project_lookup() {
        let mut graph = EntityGraph::new();
        assert_matches!(graph.project(), Err(SubmitError::MissingProject));
        graph.add(EntityRecord::new(EntityType::Project, "p1", json!({})));
        assert_eq!(graph.project().unwrap().id, "p1");
    }

    #[test]
    fn count_links_sums_direct_links() {
        let mut graph = EntityGraph::new();
        let idx = graph.add(EntityRecord::new(EntityType::Biomaterial, "b1", json!({})));
        graph
            .record_mut(idx)
            .add_direct_link(DirectLink::new(EntityType::Project, "p1", REL_PROJECT, false));
        assert_eq!(graph.count_links(), 1);
    }
}
