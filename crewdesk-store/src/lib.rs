//! crewdesk-store - durable state.
//!
//! One relational schema (SQLite) holds users, teams, memberships,
//! projects, skills, requirements, chat sessions/messages, and file
//! records. Next to it: an append-only artifact root of opaque files keyed
//! by `file_id`, and a best-effort JSON snapshot directory mirroring
//! sessions for grep-style history search.

pub mod artifacts;
pub mod db;
pub mod error;
pub mod files;
pub mod requirements;
pub mod sessions;
pub mod snapshot;
pub mod teams;

pub use artifacts::{ArtifactStore, NewArtifactRecord, StoredArtifact};
pub use db::Database;
pub use error::StoreError;
pub use files::FileRecord;
pub use requirements::{Requirement, RequirementUpdate};
pub use sessions::{MessageRow, SessionRow, SessionSummary, TurnCommit};
pub use snapshot::SnapshotStore;
pub use teams::{Project, Skill};
