use assert_matches::assert_matches;
use serde_json::json;

use biosubmit::domain::{
    EntityType, REL_DERIVED_BY_PROCESSES, REL_INPUT_TO_PROCESSES, REL_PROJECT, REL_PROJECTS,
    REL_PROTOCOLS, REL_SUPPLEMENTARY_FILES,
};
use biosubmit::entity::EntityRecord;
use biosubmit::error::SubmitError;
use biosubmit::graph::EntityGraph;
use biosubmit::linker::LinkResolver;
use biosubmit::schema::FixedTemplateStore;

fn record(entity_type: EntityType, id: &str) -> EntityRecord {
    EntityRecord::new(entity_type, id, json!({}))
}

fn with_links(mut record: EntityRecord, links: &[(EntityType, &[&str])]) -> EntityRecord {
    for (target_type, ids) in links {
        record.links_by_entity.insert(
            *target_type,
            ids.iter().map(|id| id.to_string()).collect(),
        );
    }
    record
}

fn resolve(graph: &mut EntityGraph) -> Result<(), SubmitError> {
    let templates = FixedTemplateStore::new("https://ingest.test/schemas");
    let mut resolver = LinkResolver::new(&templates);
    resolver.resolve(graph)
}

fn relationship_count(record: &EntityRecord, relationship: &str) -> usize {
    record
        .direct_links
        .iter()
        .filter(|link| link.relationship == relationship)
        .count()
}

#[test]
fn biomaterial_chain_with_declared_process() {
    let mut graph = EntityGraph::new();
    graph.add(record(EntityType::Project, "project_1"));
    graph.add(record(EntityType::Biomaterial, "biomaterial_id_1"));
    graph.add(with_links(
        record(EntityType::Biomaterial, "biomaterial_id_2"),
        &[
            (EntityType::Biomaterial, &["biomaterial_id_1"]),
            (EntityType::Process, &["process_id_1"]),
            (EntityType::Protocol, &["protocol_id_1", "protocol_id_2"]),
        ],
    ));
    graph.add(record(EntityType::Protocol, "protocol_id_1"));
    graph.add(record(EntityType::Protocol, "protocol_id_2"));

    resolve(&mut graph).unwrap();

    let input = graph.get(EntityType::Biomaterial, "biomaterial_id_1").unwrap();
    assert!(input.links_to(REL_INPUT_TO_PROCESSES, "process_id_1"));
    assert!(input.links_to(REL_PROJECT, "project_1"));
    assert!(input.links_to(REL_PROJECTS, "project_1"));

    let output = graph.get(EntityType::Biomaterial, "biomaterial_id_2").unwrap();
    assert!(output.links_to(REL_DERIVED_BY_PROCESSES, "process_id_1"));

    let process = graph.get(EntityType::Process, "process_id_1").unwrap();
    assert!(process.links_to(REL_PROTOCOLS, "protocol_id_1"));
    assert!(process.links_to(REL_PROTOCOLS, "protocol_id_2"));
    assert!(process.links_to(REL_PROJECT, "project_1"));
    assert!(process.links_to(REL_PROJECTS, "project_1"));
    assert_eq!(relationship_count(process, REL_PROJECT), 1);
    assert_eq!(relationship_count(process, REL_PROJECTS), 1);

    // protocols hang off the project singularly, without the plural dual
    let protocol = graph.get(EntityType::Protocol, "protocol_id_1").unwrap();
    assert!(protocol.links_to(REL_PROJECT, "project_1"));
    assert_eq!(relationship_count(protocol, REL_PROJECTS), 0);
}

#[test]
fn synthesizes_one_process_for_all_inputs_of_a_record() {
    let mut graph = EntityGraph::new();
    graph.add(record(EntityType::Project, "project_1"));
    graph.add(record(EntityType::Biomaterial, "biomaterial_id_0"));
    graph.add(record(EntityType::Biomaterial, "biomaterial_id_1"));
    graph.add(with_links(
        record(EntityType::Biomaterial, "biomaterial_id_2"),
        &[(
            EntityType::Biomaterial,
            &["biomaterial_id_0", "biomaterial_id_1"],
        )],
    ));

    resolve(&mut graph).unwrap();

    assert_eq!(graph.get_all(EntityType::Process).len(), 1);
    let process = graph.get(EntityType::Process, "process_id_1").unwrap();
    assert_eq!(
        process.content.pointer("/process_core/process_id"),
        Some(&json!("process_id_1"))
    );
    assert_eq!(
        process.content.get("describedBy"),
        Some(&json!("https://ingest.test/schemas/process"))
    );

    for input in ["biomaterial_id_0", "biomaterial_id_1"] {
        let record = graph.get(EntityType::Biomaterial, input).unwrap();
        assert!(record.links_to(REL_INPUT_TO_PROCESSES, "process_id_1"));
    }
    let output = graph.get(EntityType::Biomaterial, "biomaterial_id_2").unwrap();
    assert!(output.links_to(REL_DERIVED_BY_PROCESSES, "process_id_1"));
}

#[test]
fn reuses_a_declared_process_already_in_the_graph() {
    let mut graph = EntityGraph::new();
    graph.add(record(EntityType::Project, "project_1"));
    graph.add(record(EntityType::Biomaterial, "biomaterial_id_1"));
    graph.add(EntityRecord::new(
        EntityType::Process,
        "dissociation_1",
        json!({ "process_core": { "process_id": "dissociation_1" } }),
    ));
    graph.add(with_links(
        record(EntityType::File, "file_id_1"),
        &[
            (EntityType::Biomaterial, &["biomaterial_id_1"]),
            (EntityType::Process, &["dissociation_1"]),
        ],
    ));

    resolve(&mut graph).unwrap();

    // no duplicate process, original content untouched
    assert_eq!(graph.get_all(EntityType::Process).len(), 1);
    let process = graph.get(EntityType::Process, "dissociation_1").unwrap();
    assert_eq!(
        process.content.pointer("/process_core/process_id"),
        Some(&json!("dissociation_1"))
    );
    assert_eq!(relationship_count(process, REL_PROJECT), 1);
    assert_eq!(relationship_count(process, REL_PROJECTS), 1);

    let file = graph.get(EntityType::File, "file_id_1").unwrap();
    assert!(file.links_to(REL_DERIVED_BY_PROCESSES, "dissociation_1"));
    let input = graph.get(EntityType::Biomaterial, "biomaterial_id_1").unwrap();
    assert!(input.links_to(REL_INPUT_TO_PROCESSES, "dissociation_1"));
}

#[test]
fn process_content_seeded_from_linking_details() {
    let mut graph = EntityGraph::new();
    graph.add(record(EntityType::Project, "project_1"));
    graph.add(record(EntityType::Biomaterial, "biomaterial_id_1"));
    let mut derived = with_links(
        record(EntityType::Biomaterial, "biomaterial_id_2"),
        &[(EntityType::Biomaterial, &["biomaterial_id_1"])],
    );
    derived.linking_details = Some(json!({
        "process_core": { "process_name": "enzymatic dissociation" },
    }));
    graph.add(derived);

    resolve(&mut graph).unwrap();

    let process = graph.get(EntityType::Process, "process_id_1").unwrap();
    assert_eq!(
        process.content.pointer("/process_core/process_name"),
        Some(&json!("enzymatic dissociation"))
    );
    assert_eq!(
        process.content.pointer("/process_core/process_id"),
        Some(&json!("process_id_1"))
    );
}

#[test]
fn invalid_link_pair_is_rejected() {
    let mut graph = EntityGraph::new();
    graph.add(record(EntityType::Project, "project_1"));
    graph.add(record(EntityType::File, "file_id_1"));
    graph.add(with_links(
        record(EntityType::Biomaterial, "biomaterial_id_1"),
        &[(EntityType::File, &["file_id_1"])],
    ));

    let err = resolve(&mut graph).unwrap_err();
    assert_matches!(
        err,
        SubmitError::InvalidSpreadsheetLink {
            entity_type,
            entity_id,
            link_entity_type,
            link_entity_id,
        } if entity_type == "biomaterial"
            && entity_id == "biomaterial_id_1"
            && link_entity_type == "file"
            && link_entity_id == "file_id_1"
    );
}

#[test]
fn link_to_missing_entity_is_rejected() {
    let mut graph = EntityGraph::new();
    graph.add(record(EntityType::Project, "project_1"));
    graph.add(with_links(
        record(EntityType::File, "file_id_1"),
        &[(EntityType::Biomaterial, &["biomaterial_id_404"])],
    ));

    let err = resolve(&mut graph).unwrap_err();
    assert_matches!(
        err,
        SubmitError::LinkedEntityNotFound { link_entity_id, .. }
            if link_entity_id == "biomaterial_id_404"
    );
}

#[test]
fn multiple_declared_processes_are_rejected() {
    let mut graph = EntityGraph::new();
    graph.add(record(EntityType::Project, "project_1"));
    graph.add(record(EntityType::Biomaterial, "biomaterial_id_1"));
    graph.add(with_links(
        record(EntityType::Biomaterial, "biomaterial_id_2"),
        &[
            (EntityType::Biomaterial, &["biomaterial_id_1"]),
            (EntityType::Process, &["process_id_1", "process_id_2"]),
        ],
    ));

    let err = resolve(&mut graph).unwrap_err();
    assert_matches!(
        err,
        SubmitError::MultipleProcessesFound { process_ids, .. }
            if process_ids == vec!["process_id_1".to_string(), "process_id_2".to_string()]
    );
}

#[test]
fn supplementary_file_links_back_from_the_project() {
    let mut graph = EntityGraph::new();
    graph.add(record(EntityType::Project, "project_1"));
    let mut supplementary = record(EntityType::File, "marker_genes.csv");
    supplementary.concrete_type = Some("supplementary_file".to_string());
    graph.add(supplementary);

    resolve(&mut graph).unwrap();

    let project = graph.project().unwrap();
    assert!(project.links_to(REL_SUPPLEMENTARY_FILES, "marker_genes.csv"));
    let file = graph.get(EntityType::File, "marker_genes.csv").unwrap();
    assert!(file.links_to(REL_PROJECT, "project_1"));
}

#[test]
fn external_reference_stub_receives_input_links() {
    let uuid = "4cc41147-50b2-4e77-b5cd-0ea57a7b8f3a";
    let mut graph = EntityGraph::new();
    graph.add(record(EntityType::Project, "project_1"));
    graph.add(EntityRecord::linking_stub(EntityType::Biomaterial, uuid));
    graph.add(with_links(
        record(EntityType::File, "file_id_1"),
        &[(EntityType::Biomaterial, &[uuid])],
    ));

    resolve(&mut graph).unwrap();

    let stub = graph.get(EntityType::Biomaterial, uuid).unwrap();
    assert!(stub.links_to(REL_INPUT_TO_PROCESSES, "process_id_1"));
    // stubs are never resolved themselves, so they carry no project links
    assert_eq!(relationship_count(stub, REL_PROJECT), 0);
}
