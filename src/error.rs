use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum SubmitError {
    #[error("invalid entity type: {0}")]
    InvalidEntityType(String),

    #[error(
        "{entity_type} '{entity_id}' declares a link to {link_entity_type} '{link_entity_id}', \
         which is not a valid spreadsheet link"
    )]
    InvalidSpreadsheetLink {
        entity_type: String,
        entity_id: String,
        link_entity_type: String,
        link_entity_id: String,
    },

    #[error(
        "{entity_type} '{entity_id}' links to {link_entity_type} '{link_entity_id}', \
         which is not in the submitted data"
    )]
    LinkedEntityNotFound {
        entity_type: String,
        entity_id: String,
        link_entity_type: String,
        link_entity_id: String,
    },

    #[error("{entity_type} '{entity_id}' declares more than one process: {}", .process_ids.join(", "))]
    MultipleProcessesFound {
        entity_type: String,
        entity_id: String,
        process_ids: Vec<String>,
    },

    #[error("graph has no project record")]
    MissingProject,

    #[error("file '{0}' has no file_core.file_name in its content")]
    MissingFileName(String),

    #[error("{entity_type} '{entity_id}' has no remote representation")]
    MissingRemote {
        entity_type: String,
        entity_id: String,
    },

    #[error(
        "{entity_type} '{entity_id}' has external link '{external_id}', which is not a UUID"
    )]
    InvalidExternalId {
        entity_type: String,
        entity_id: String,
        external_id: String,
    },

    #[error("failed to read graph file at {0}")]
    GraphRead(Utf8PathBuf),

    #[error("failed to parse graph file: {0}")]
    GraphParse(String),

    #[error("ingest request failed: {0}")]
    ApiHttp(String),

    #[error("ingest service returned status {status}: {message}")]
    ApiStatus { status: u16, message: String },

    #[error("malformed ingest resource: {0}")]
    MalformedResource(String),

    #[error(
        "failed to link {from_type} '{from_id}' to {to_type} '{to_id}' as '{relationship}': {message}"
    )]
    LinkFailed {
        from_type: String,
        from_id: String,
        to_type: String,
        to_id: String,
        relationship: String,
        message: String,
    },
}
