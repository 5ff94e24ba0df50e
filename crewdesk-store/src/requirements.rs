//! Team requirements and cross-team delivery.
//!
//! A delivered requirement is materialized on the target team only, with
//! `delivery_state = pending`; the target accepts or rejects it.

use rusqlite::{params, OptionalExtension};
use serde::Serialize;

use crate::db::{utc_now, Database};
use crate::error::StoreError;

#[derive(Debug, Clone, Serialize)]
pub struct Requirement {
    pub id: i64,
    pub team_id: i64,
    pub project_id: Option<i64>,
    pub title: String,
    pub description: String,
    pub status: String,
    pub priority: String,
    pub source_team: String,
    pub delivery_state: Option<String>,
    pub delivery_from_team_id: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

/// Partial update for a requirement.
#[derive(Debug, Clone, Default)]
pub struct RequirementUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub project_id: Option<Option<i64>>,
}

const STATUSES: [&str; 5] = ["incoming", "todo", "in_progress", "done", "blocked"];

fn valid_status(status: &str) -> bool {
    STATUSES.contains(&status)
}

fn row_to_requirement(r: &rusqlite::Row<'_>) -> Result<Requirement, rusqlite::Error> {
    Ok(Requirement {
        id: r.get(0)?,
        team_id: r.get(1)?,
        project_id: r.get(2)?,
        title: r.get(3)?,
        description: r.get(4)?,
        status: r.get(5)?,
        priority: r.get(6)?,
        source_team: r.get(7)?,
        delivery_state: r.get(8)?,
        delivery_from_team_id: r.get(9)?,
        created_at: r.get(10)?,
        updated_at: r.get(11)?,
    })
}

const REQ_COLUMNS: &str = "id, team_id, project_id, title, description, status, priority, source_team, delivery_state, delivery_from_team_id, created_at, updated_at";

impl Database {
    pub fn create_requirement(
        &self,
        team_id: i64,
        project_id: Option<i64>,
        title: &str,
        description: &str,
        priority: &str,
    ) -> Result<i64, StoreError> {
        self.with_conn(|conn| {
            let now = utc_now();
            conn.execute(
                "INSERT INTO team_requirements(
                    team_id, project_id, title, description, status, priority,
                    source_team, created_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, 'todo', ?5, '', ?6, ?6)",
                params![team_id, project_id, title, description, priority, now],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_requirement(&self, team_id: i64, id: i64) -> Result<Option<Requirement>, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {REQ_COLUMNS} FROM team_requirements WHERE id = ?1 AND team_id = ?2"),
                params![id, team_id],
                |r| row_to_requirement(r),
            )
            .optional()
        })
    }

    pub fn list_requirements(&self, team_id: i64) -> Result<Vec<Requirement>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {REQ_COLUMNS} FROM team_requirements
                 WHERE team_id = ?1 ORDER BY updated_at DESC"
            ))?;
            let rows = stmt.query_map(params![team_id], |r| row_to_requirement(r))?;
            rows.collect()
        })
    }

    pub fn update_requirement(
        &self,
        team_id: i64,
        id: i64,
        update: &RequirementUpdate,
    ) -> Result<Requirement, StoreError> {
        if let Some(status) = update.status.as_deref() {
            if !valid_status(status) {
                return Err(StoreError::Conflict(format!("invalid status: {status}")));
            }
        }
        let existing = self.get_requirement(team_id, id)?.ok_or(StoreError::NotFound)?;
        let title = update.title.clone().unwrap_or(existing.title);
        let description = update.description.clone().unwrap_or(existing.description);
        let status = update.status.clone().unwrap_or(existing.status);
        let priority = update.priority.clone().unwrap_or(existing.priority);
        let project_id = match update.project_id {
            Some(value) => value,
            None => existing.project_id,
        };

        self.with_conn(|conn| {
            conn.execute(
                "UPDATE team_requirements
                 SET title = ?3, description = ?4, status = ?5, priority = ?6,
                     project_id = ?7, updated_at = ?8
                 WHERE id = ?1 AND team_id = ?2",
                params![id, team_id, title, description, status, priority, project_id, utc_now()],
            )?;
            Ok(())
        })?;
        self.get_requirement(team_id, id)?.ok_or(StoreError::NotFound)
    }

    pub fn delete_requirement(&self, team_id: i64, id: i64) -> Result<(), StoreError> {
        let deleted = self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM team_requirements WHERE id = ?1 AND team_id = ?2",
                params![id, team_id],
            )
        })?;
        if deleted == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Deliver a requirement to another team: a new row materializes on
    /// the target with `delivery_state = pending`.
    pub fn deliver_requirement(
        &self,
        from_team_id: i64,
        requirement_id: i64,
        to_team_id: i64,
    ) -> Result<i64, StoreError> {
        let source = self
            .get_requirement(from_team_id, requirement_id)?
            .ok_or(StoreError::NotFound)?;
        let source_team_name = self
            .team_name(from_team_id)?
            .unwrap_or_else(|| format!("team-{from_team_id}"));

        self.with_conn(|conn| {
            let now = utc_now();
            conn.execute(
                "INSERT INTO team_requirements(
                    team_id, project_id, title, description, status, priority,
                    source_team, delivery_state, delivery_from_team_id, created_at, updated_at
                 ) VALUES (?1, NULL, ?2, ?3, 'incoming', ?4, ?5, 'pending', ?6, ?7, ?7)",
                params![
                    to_team_id,
                    source.title,
                    source.description,
                    source.priority,
                    source_team_name,
                    from_team_id,
                    now,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Accept or reject a delivered requirement on the target team.
    pub fn resolve_delivery(
        &self,
        team_id: i64,
        requirement_id: i64,
        accept: bool,
    ) -> Result<Requirement, StoreError> {
        let existing = self
            .get_requirement(team_id, requirement_id)?
            .ok_or(StoreError::NotFound)?;
        if existing.delivery_state.as_deref() != Some("pending") {
            return Err(StoreError::Conflict("delivery already resolved".to_string()));
        }
        let (state, status) = if accept {
            ("accepted", "todo")
        } else {
            ("rejected", existing.status.as_str())
        };
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE team_requirements
                 SET delivery_state = ?3, status = ?4, updated_at = ?5
                 WHERE id = ?1 AND team_id = ?2",
                params![requirement_id, team_id, state, status, utc_now()],
            )?;
            Ok(())
        })?;
        self.get_requirement(team_id, requirement_id)?.ok_or(StoreError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_teams(db: &Database) -> (i64, i64) {
        (db.create_team("alpha").unwrap(), db.create_team("beta").unwrap())
    }

    #[test]
    fn test_create_and_update() {
        let db = Database::open_in_memory().unwrap();
        let (team, _) = two_teams(&db);
        let id = db
            .create_requirement(team, None, "Add export", "CSV export", "high")
            .unwrap();

        let updated = db
            .update_requirement(
                team,
                id,
                &RequirementUpdate {
                    status: Some("in_progress".to_string()),
                    ..RequirementUpdate::default()
                },
            )
            .unwrap();
        assert_eq!(updated.status, "in_progress");
        assert_eq!(updated.title, "Add export");
    }

    #[test]
    fn test_invalid_status_rejected() {
        let db = Database::open_in_memory().unwrap();
        let (team, _) = two_teams(&db);
        let id = db.create_requirement(team, None, "x", "", "low").unwrap();
        let result = db.update_requirement(
            team,
            id,
            &RequirementUpdate {
                status: Some("someday".to_string()),
                ..RequirementUpdate::default()
            },
        );
        assert!(matches!(result, Err(StoreError::Conflict(_))));
    }

    #[test]
    fn test_delivery_materializes_on_target_only() {
        let db = Database::open_in_memory().unwrap();
        let (alpha, beta) = two_teams(&db);
        let source = db
            .create_requirement(alpha, None, "Integrate gateway", "", "medium")
            .unwrap();

        let delivered = db.deliver_requirement(alpha, source, beta).unwrap();
        let row = db.get_requirement(beta, delivered).unwrap().unwrap();
        assert_eq!(row.delivery_state.as_deref(), Some("pending"));
        assert_eq!(row.status, "incoming");
        assert_eq!(row.delivery_from_team_id, Some(alpha));
        assert_eq!(row.source_team, "alpha");

        // The source team cannot see the delivered row.
        assert!(db.get_requirement(alpha, delivered).unwrap().is_none());
    }

    #[test]
    fn test_accept_delivery_moves_to_todo() {
        let db = Database::open_in_memory().unwrap();
        let (alpha, beta) = two_teams(&db);
        let source = db.create_requirement(alpha, None, "r", "", "low").unwrap();
        let delivered = db.deliver_requirement(alpha, source, beta).unwrap();

        let resolved = db.resolve_delivery(beta, delivered, true).unwrap();
        assert_eq!(resolved.delivery_state.as_deref(), Some("accepted"));
        assert_eq!(resolved.status, "todo");

        // Resolving twice conflicts.
        assert!(matches!(
            db.resolve_delivery(beta, delivered, false),
            Err(StoreError::Conflict(_))
        ));
    }

    #[test]
    fn test_reject_delivery_keeps_state() {
        let db = Database::open_in_memory().unwrap();
        let (alpha, beta) = two_teams(&db);
        let source = db.create_requirement(alpha, None, "r", "", "low").unwrap();
        let delivered = db.deliver_requirement(alpha, source, beta).unwrap();

        let resolved = db.resolve_delivery(beta, delivered, false).unwrap();
        assert_eq!(resolved.delivery_state.as_deref(), Some("rejected"));
    }

    #[test]
    fn test_deliver_foreign_requirement_not_found() {
        let db = Database::open_in_memory().unwrap();
        let (alpha, beta) = two_teams(&db);
        let source = db.create_requirement(alpha, None, "r", "", "low").unwrap();
        assert!(matches!(
            db.deliver_requirement(beta, source, alpha),
            Err(StoreError::NotFound)
        ));
    }
}
