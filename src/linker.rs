use std::collections::BTreeMap;

use tracing::debug;

use crate::domain::{
    self, DirectLink, EntityType, REL_DERIVED_BY_PROCESSES, REL_INPUT_TO_PROCESSES, REL_PROJECT,
    REL_PROJECTS, REL_PROTOCOLS, REL_SUPPLEMENTARY_FILES,
};
use crate::entity::EntityRecord;
use crate::error::SubmitError;
use crate::graph::EntityGraph;
use crate::schema::TemplateStore;

/// Turns the declared, unresolved `links_by_entity` references of every
/// non-reference record into validated direct links, synthesizing the
/// mediating process records the data model requires between inputs and
/// their derived outputs.
pub struct LinkResolver<'a> {
    templates: &'a dyn TemplateStore,
    process_counter: u32,
}

impl<'a> LinkResolver<'a> {
    pub fn new(templates: &'a dyn TemplateStore) -> Self {
        Self {
            templates,
            process_counter: 0,
        }
    }

    pub fn resolve(&mut self, graph: &mut EntityGraph) -> Result<(), SubmitError> {
        let project_idx = graph.project_index()?;
        // snapshot: processes synthesized below must not be re-visited
        for idx in graph.resolvable_indices() {
            self.resolve_record(graph, project_idx, idx)?;
        }
        Ok(())
    }

    fn resolve_record(
        &mut self,
        graph: &mut EntityGraph,
        project_idx: usize,
        idx: usize,
    ) -> Result<(), SubmitError> {
        let (entity_type, entity_id, concrete_type, links) = {
            let record = graph.record(idx);
            (
                record.entity_type,
                record.id.clone(),
                record.concrete_type.clone(),
                record.links_by_entity.clone(),
            )
        };

        if idx != project_idx {
            link_to_project(graph, project_idx, idx);
        }

        if concrete_type.as_deref() == Some("supplementary_file") {
            let link =
                DirectLink::new(entity_type, entity_id.clone(), REL_SUPPLEMENTARY_FILES, true);
            graph.record_mut(project_idx).add_direct_link(link);
        }

        validate_links(graph, entity_type, &entity_id, &links)?;

        let biomaterial_inputs = links
            .get(&EntityType::Biomaterial)
            .cloned()
            .unwrap_or_default();
        let file_inputs = links.get(&EntityType::File).cloned().unwrap_or_default();
        let protocol_ids = links
            .get(&EntityType::Protocol)
            .cloned()
            .unwrap_or_default();
        let declared_process = links
            .get(&EntityType::Process)
            .and_then(|ids| ids.first())
            .cloned();

        // biomaterial/file references are inputs this record derives from;
        // without them there is nothing to mediate
        if biomaterial_inputs.is_empty() && file_inputs.is_empty() {
            return Ok(());
        }

        let process_idx = self.obtain_process(graph, idx, declared_process);
        link_to_project(graph, project_idx, process_idx);
        let process_id = graph.record(process_idx).id.clone();

        graph.record_mut(idx).add_direct_link(DirectLink::new(
            EntityType::Process,
            process_id.clone(),
            REL_DERIVED_BY_PROCESSES,
            true,
        ));

        for input_id in &biomaterial_inputs {
            link_input(
                graph,
                EntityType::Biomaterial,
                input_id,
                &process_id,
                entity_type,
                &entity_id,
            )?;
        }
        for input_id in &file_inputs {
            link_input(
                graph,
                EntityType::File,
                input_id,
                &process_id,
                entity_type,
                &entity_id,
            )?;
        }
        for protocol_id in protocol_ids {
            graph.record_mut(process_idx).add_direct_link(DirectLink::new(
                EntityType::Protocol,
                protocol_id,
                REL_PROTOCOLS,
                true,
            ));
        }
        Ok(())
    }

    fn obtain_process(
        &mut self,
        graph: &mut EntityGraph,
        owner_idx: usize,
        declared: Option<String>,
    ) -> usize {
        let process_id = match declared {
            Some(id) => {
                if let Some(existing) = graph.index_of(EntityType::Process, &id) {
                    return existing;
                }
                id
            }
            None => {
                self.process_counter += 1;
                format!("process_id_{}", self.process_counter)
            }
        };
        let linking_details = graph.record(owner_idx).linking_details.clone();
        let schema_url = self.templates.schema_url(EntityType::Process);
        debug!(process_id = %process_id, "synthesizing linking process");
        graph.add(EntityRecord::process(
            &process_id,
            linking_details.as_ref(),
            &schema_url,
        ))
    }
}

// Every record hangs off the project; biomaterials and processes carry
// the legacy plural duplicate as well. Guarded so a process reached both
// by its own pass and by a synthesis branch is linked once.
fn link_to_project(graph: &mut EntityGraph, project_idx: usize, idx: usize) {
    let project_id = graph.record(project_idx).id.clone();
    let record = graph.record_mut(idx);
    if record.links_to(REL_PROJECT, &project_id) {
        return;
    }
    record.add_direct_link(DirectLink::new(
        EntityType::Project,
        project_id.clone(),
        REL_PROJECT,
        false,
    ));
    if matches!(
        record.entity_type,
        EntityType::Biomaterial | EntityType::Process
    ) {
        record.add_direct_link(DirectLink::new(
            EntityType::Project,
            project_id,
            REL_PROJECTS,
            true,
        ));
    }
}

fn validate_links(
    graph: &EntityGraph,
    entity_type: EntityType,
    entity_id: &str,
    links: &BTreeMap<EntityType, Vec<String>>,
) -> Result<(), SubmitError> {
    for (&target_type, ids) in links {
        if target_type == EntityType::Process {
            if ids.len() > 1 {
                return Err(SubmitError::MultipleProcessesFound {
                    entity_type: entity_type.to_string(),
                    entity_id: entity_id.to_string(),
                    process_ids: ids.clone(),
                });
            }
            continue;
        }
        for id in ids {
            if !domain::is_valid_spreadsheet_link(entity_type, target_type) {
                return Err(SubmitError::InvalidSpreadsheetLink {
                    entity_type: entity_type.to_string(),
                    entity_id: entity_id.to_string(),
                    link_entity_type: target_type.to_string(),
                    link_entity_id: id.clone(),
                });
            }
            if graph.get(target_type, id).is_none() {
                return Err(SubmitError::LinkedEntityNotFound {
                    entity_type: entity_type.to_string(),
                    entity_id: entity_id.to_string(),
                    link_entity_type: target_type.to_string(),
                    link_entity_id: id.clone(),
                });
            }
        }
    }
    Ok(())
}

fn link_input(
    graph: &mut EntityGraph,
    input_type: EntityType,
    input_id: &str,
    process_id: &str,
    entity_type: EntityType,
    entity_id: &str,
) -> Result<(), SubmitError> {
    let input_idx = graph.index_of(input_type, input_id).ok_or_else(|| {
        SubmitError::LinkedEntityNotFound {
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            link_entity_type: input_type.to_string(),
            link_entity_id: input_id.to_string(),
        }
    })?;
    graph.record_mut(input_idx).add_direct_link(DirectLink::new(
        EntityType::Process,
        process_id,
        REL_INPUT_TO_PROCESSES,
        true,
    ));
    Ok(())
}
