use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::api::{CreateOutcome, IngestApi, RemoteEntity, file_name_of};
use crate::domain::{EntityType, REL_SUBMISSION_ENVELOPES};
use crate::error::SubmitError;
use crate::graph::EntityGraph;

/// The manifest's actual-link counter is pushed remotely after every
/// batch of this many links, so an observer polling the manifest sees
/// in-flight progress.
const LINK_PROGRESS_BATCH: u64 = 50;

/// Durable, externally visible record of submission intent and progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionManifest {
    pub total_count: usize,
    pub expected_biomaterials: usize,
    pub expected_processes: usize,
    pub expected_files: usize,
    pub expected_protocols: usize,
    pub expected_projects: usize,
    pub expected_links: usize,
    pub actual_links: u64,
}

impl SubmissionManifest {
    pub fn from_graph(graph: &EntityGraph) -> Self {
        Self {
            total_count: graph.count_total(),
            expected_biomaterials: graph.count_new_of_type(EntityType::Biomaterial),
            expected_processes: graph.count_new_of_type(EntityType::Process),
            expected_files: graph.count_new_of_type(EntityType::File),
            expected_protocols: graph.count_new_of_type(EntityType::Protocol),
            expected_projects: graph.count_new_of_type(EntityType::Project),
            expected_links: graph.count_links(),
            actual_links: 0,
        }
    }
}

/// Realizes a linked graph against the remote repository: manifest, then
/// creation, then linking. Creation fully precedes linking because link
/// targets must exist remotely before a link call can succeed.
pub struct SubmissionCoordinator<'a, A: IngestApi + ?Sized> {
    api: &'a A,
    links_submitted: u64,
}

impl<'a, A: IngestApi + ?Sized> SubmissionCoordinator<'a, A> {
    pub fn new(api: &'a A) -> Self {
        Self {
            api,
            links_submitted: 0,
        }
    }

    pub fn submit(
        &mut self,
        graph: &mut EntityGraph,
        submission_uuid: &str,
    ) -> Result<SubmissionManifest, SubmitError> {
        let submission = self
            .api
            .get_by_uuid(EntityType::SubmissionEnvelope, submission_uuid)?;
        self.submit_to(graph, &submission)
    }

    pub fn submit_to(
        &mut self,
        graph: &mut EntityGraph,
        submission: &RemoteEntity,
    ) -> Result<SubmissionManifest, SubmitError> {
        graph.project_index()?;

        let manifest = SubmissionManifest::from_graph(graph);
        let manifest_value = serde_json::to_value(&manifest)
            .map_err(|err| SubmitError::MalformedResource(err.to_string()))?;
        let manifest_ref = self.api.create_manifest(submission, &manifest_value)?;
        info!(
            total = manifest.total_count,
            links = manifest.expected_links,
            "submission manifest created"
        );

        self.create_entities(graph, submission)?;
        self.link_entities(graph, &manifest, &manifest_ref)?;
        Ok(manifest)
    }

    fn create_entities(
        &mut self,
        graph: &mut EntityGraph,
        submission: &RemoteEntity,
    ) -> Result<(), SubmitError> {
        // the project is created first and tied to its envelope before
        // any other content exists
        let project_idx = graph.project_index()?;
        self.create_record(graph, project_idx, submission)?;
        let project = graph.record(project_idx);
        let project_remote =
            project
                .remote
                .clone()
                .ok_or_else(|| SubmitError::MissingRemote {
                    entity_type: project.entity_type.to_string(),
                    entity_id: project.id.clone(),
                })?;
        self.api
            .link(&project_remote, submission, REL_SUBMISSION_ENVELOPES, true)?;

        for idx in graph.new_indices() {
            if idx == project_idx {
                continue;
            }
            self.create_record(graph, idx, submission)?;
        }
        Ok(())
    }

    fn create_record(
        &mut self,
        graph: &mut EntityGraph,
        idx: usize,
        submission: &RemoteEntity,
    ) -> Result<(), SubmitError> {
        let (kind, id, content) = {
            let record = graph.record(idx);
            (record.entity_type, record.id.clone(), record.content.clone())
        };
        if kind == EntityType::File && file_name_of(&content).is_none() {
            return Err(SubmitError::MissingFileName(id));
        }

        debug!(kind = %kind, id = %id, "creating entity");
        let remote = match self.api.create(kind, &content, submission)? {
            CreateOutcome::Created(remote) => remote,
            CreateOutcome::Conflict => {
                // the natural key exists remotely; merge our content over
                // the existing record instead of failing
                let file_name = file_name_of(&content)
                    .ok_or_else(|| SubmitError::MissingFileName(id.clone()))?;
                warn!(id = %id, file_name = %file_name, "entity exists remotely, merging content");
                let existing = self.api.find_file_by_name(submission, &file_name)?;
                let merged = graph.record(idx).content_merged_onto(&existing.content);
                self.api.patch(&existing, &merged)?
            }
        };
        graph.record_mut(idx).set_remote(remote);
        Ok(())
    }

    fn link_entities(
        &mut self,
        graph: &mut EntityGraph,
        manifest: &SubmissionManifest,
        manifest_ref: &RemoteEntity,
    ) -> Result<(), SubmitError> {
        let expected = manifest.expected_links as u64;
        for idx in 0..graph.len() {
            let links = graph.record(idx).direct_links.clone();
            if links.is_empty() {
                continue;
            }
            let from = self.remote_of(graph, idx)?;
            for link in links {
                let target_idx = graph
                    .index_of(link.target_type, &link.target_id)
                    .ok_or_else(|| {
                        let record = graph.record(idx);
                        SubmitError::LinkedEntityNotFound {
                            entity_type: record.entity_type.to_string(),
                            entity_id: record.id.clone(),
                            link_entity_type: link.target_type.to_string(),
                            link_entity_id: link.target_id.clone(),
                        }
                    })?;
                let to = self.remote_of(graph, target_idx)?;
                if let Err(err) =
                    self.api
                        .link(&from, &to, &link.relationship, link.is_collection)
                {
                    let record = graph.record(idx);
                    error!(
                        from_type = %record.entity_type,
                        from_id = %record.id,
                        to_type = %link.target_type,
                        to_id = %link.target_id,
                        relationship = %link.relationship,
                        "link submission failed"
                    );
                    return Err(SubmitError::LinkFailed {
                        from_type: record.entity_type.to_string(),
                        from_id: record.id.clone(),
                        to_type: link.target_type.to_string(),
                        to_id: link.target_id.clone(),
                        relationship: link.relationship.clone(),
                        message: err.to_string(),
                    });
                }
                self.links_submitted += 1;
                if self.links_submitted % LINK_PROGRESS_BATCH == 0
                    || self.links_submitted == expected
                {
                    self.api.patch_manifest(
                        manifest_ref,
                        &json!({ "actualLinks": self.links_submitted }),
                    )?;
                    debug!(
                        actual = self.links_submitted,
                        expected, "manifest progress updated"
                    );
                }
            }
        }
        Ok(())
    }

    // Linking references never go through the creation phase; the first
    // link touching one resolves it by UUID and caches the result.
    fn remote_of(
        &self,
        graph: &mut EntityGraph,
        idx: usize,
    ) -> Result<RemoteEntity, SubmitError> {
        if let Some(remote) = graph.record(idx).remote.clone() {
            return Ok(remote);
        }
        let (kind, id, is_linking_reference) = {
            let record = graph.record(idx);
            (
                record.entity_type,
                record.id.clone(),
                record.is_linking_reference,
            )
        };
        if !is_linking_reference {
            return Err(SubmitError::MissingRemote {
                entity_type: kind.to_string(),
                entity_id: id,
            });
        }
        debug!(kind = %kind, uuid = %id, "resolving linking reference");
        let remote = self.api.get_by_uuid(kind, &id)?;
        graph.record_mut(idx).set_remote(remote.clone());
        Ok(remote)
    }

    /// Update-style submission: shallow-merge each reference record's
    /// local content over its current remote content, patching only when
    /// the merged document differs.
    pub fn update(&mut self, graph: &mut EntityGraph) -> Result<usize, SubmitError> {
        let mut patched = 0;
        for idx in 0..graph.len() {
            {
                let record = graph.record(idx);
                if !record.is_reference || record.is_linking_reference {
                    continue;
                }
            }
            let remote = match graph.record(idx).remote.clone() {
                Some(remote) => remote,
                None => {
                    let (kind, id) = {
                        let record = graph.record(idx);
                        (record.entity_type, record.id.clone())
                    };
                    let remote = self.api.get_by_uuid(kind, &id)?;
                    graph.record_mut(idx).set_remote(remote.clone());
                    remote
                }
            };
            let merged = graph.record(idx).content_merged_onto(&remote.content);
            if merged == remote.content {
                debug!(id = %graph.record(idx).id, "remote content already current, skipping patch");
                continue;
            }
            let updated = self.api.patch(&remote, &merged)?;
            graph.record_mut(idx).set_remote(updated);
            patched += 1;
        }
        Ok(patched)
    }
}
