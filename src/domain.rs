use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SubmitError;

pub const REL_PROJECT: &str = "project";
pub const REL_PROJECTS: &str = "projects";
pub const REL_SUPPLEMENTARY_FILES: &str = "supplementaryFiles";
pub const REL_DERIVED_BY_PROCESSES: &str = "derivedByProcesses";
pub const REL_INPUT_TO_PROCESSES: &str = "inputToProcesses";
pub const REL_PROTOCOLS: &str = "protocols";
pub const REL_SUBMISSION_ENVELOPES: &str = "submissionEnvelopes";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Project,
    Biomaterial,
    Process,
    Protocol,
    File,
    SubmissionEnvelope,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Project => "project",
            EntityType::Biomaterial => "biomaterial",
            EntityType::Process => "process",
            EntityType::Protocol => "protocol",
            EntityType::File => "file",
            EntityType::SubmissionEnvelope => "submission_envelope",
        }
    }

    /// Collection segment used by the ingest API for this kind.
    pub fn collection(&self) -> &'static str {
        match self {
            EntityType::Project => "projects",
            EntityType::Biomaterial => "biomaterials",
            EntityType::Process => "processes",
            EntityType::Protocol => "protocols",
            EntityType::File => "files",
            EntityType::SubmissionEnvelope => "submissionEnvelopes",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = SubmitError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "project" => Ok(EntityType::Project),
            "biomaterial" => Ok(EntityType::Biomaterial),
            "process" => Ok(EntityType::Process),
            "protocol" => Ok(EntityType::Protocol),
            "file" => Ok(EntityType::File),
            "submission_envelope" => Ok(EntityType::SubmissionEnvelope),
            _ => Err(SubmitError::InvalidEntityType(value.to_string())),
        }
    }
}

/// A fully resolved, directed, named relationship ready to submit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectLink {
    pub target_type: EntityType,
    pub target_id: String,
    pub relationship: String,
    pub is_collection: bool,
}

impl DirectLink {
    pub fn new(
        target_type: EntityType,
        target_id: impl Into<String>,
        relationship: &str,
        is_collection: bool,
    ) -> Self {
        Self {
            target_type,
            target_id: target_id.into(),
            relationship: relationship.to_string(),
            is_collection,
        }
    }
}

// The link shapes a spreadsheet may declare. Process targets are handled
// separately by the resolver and never checked against this table.
const VALID_SPREADSHEET_LINKS: [(EntityType, EntityType); 7] = [
    (EntityType::Biomaterial, EntityType::Biomaterial),
    (EntityType::File, EntityType::Biomaterial),
    (EntityType::File, EntityType::File),
    (EntityType::Biomaterial, EntityType::Process),
    (EntityType::Biomaterial, EntityType::Protocol),
    (EntityType::File, EntityType::Process),
    (EntityType::File, EntityType::Protocol),
];

pub fn is_valid_spreadsheet_link(from: EntityType, to: EntityType) -> bool {
    VALID_SPREADSHEET_LINKS.contains(&(from, to))
}
