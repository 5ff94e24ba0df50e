//! Teams, users, memberships, settings, projects, and skills.

use crewdesk_core::policy::TeamRole;
use crewdesk_core::prompt::TeamSkill;
use rusqlite::{params, OptionalExtension};
use serde::Serialize;

use crate::db::{utc_now, Database};
use crate::error::StoreError;

#[derive(Debug, Clone, Serialize)]
pub struct Project {
    pub id: i64,
    pub team_id: i64,
    pub name: String,
    pub slug: String,
    pub path: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Skill {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub content: String,
    pub enabled: bool,
}

impl Database {
    pub fn create_user(&self, email: &str, name: &str) -> Result<i64, StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users(email, name, created_at) VALUES (?1, ?2, ?3)",
                params![email, name, utc_now()],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn create_team(&self, name: &str) -> Result<i64, StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO teams(name, created_at) VALUES (?1, ?2)",
                params![name, utc_now()],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn team_name(&self, team_id: i64) -> Result<Option<String>, StoreError> {
        self.with_conn(|conn| {
            conn.query_row("SELECT name FROM teams WHERE id = ?1", params![team_id], |r| {
                r.get(0)
            })
            .optional()
        })
    }

    pub fn add_membership(&self, user_id: i64, team_id: i64, role: TeamRole) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO memberships(user_id, team_id, role) VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id, team_id) DO UPDATE SET role = excluded.role",
                params![user_id, team_id, role.as_str()],
            )?;
            Ok(())
        })
    }

    pub fn membership_role(&self, user_id: i64, team_id: i64) -> Result<Option<TeamRole>, StoreError> {
        let role: Option<String> = self.with_conn(|conn| {
            conn.query_row(
                "SELECT role FROM memberships WHERE user_id = ?1 AND team_id = ?2",
                params![user_id, team_id],
                |r| r.get(0),
            )
            .optional()
        })?;
        Ok(role.map(|r| TeamRole::parse(&r)))
    }

    // ==================== Team settings ====================

    pub fn team_workspace_path(&self, team_id: i64) -> Result<Option<String>, StoreError> {
        let path: Option<String> = self.with_conn(|conn| {
            conn.query_row(
                "SELECT workspace_path FROM team_settings WHERE team_id = ?1",
                params![team_id],
                |r| r.get(0),
            )
            .optional()
        })?;
        Ok(path.filter(|p| !p.trim().is_empty()))
    }

    pub fn set_team_workspace_path(&self, team_id: i64, path: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO team_settings(team_id, workspace_path) VALUES (?1, ?2)
                 ON CONFLICT(team_id) DO UPDATE SET workspace_path = excluded.workspace_path",
                params![team_id, path],
            )?;
            Ok(())
        })
    }

    // ==================== Projects ====================

    pub fn create_project(
        &self,
        team_id: i64,
        name: &str,
        slug: &str,
        path: &str,
    ) -> Result<i64, StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO team_projects(team_id, name, slug, path, enabled, created_at)
                 VALUES (?1, ?2, ?3, ?4, 1, ?5)",
                params![team_id, name, slug, path, utc_now()],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_project(&self, team_id: i64, project_id: i64) -> Result<Option<Project>, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, team_id, name, slug, path, enabled
                 FROM team_projects WHERE id = ?1 AND team_id = ?2",
                params![project_id, team_id],
                |r| {
                    Ok(Project {
                        id: r.get(0)?,
                        team_id: r.get(1)?,
                        name: r.get(2)?,
                        slug: r.get(3)?,
                        path: r.get(4)?,
                        enabled: r.get::<_, i64>(5)? != 0,
                    })
                },
            )
            .optional()
        })
    }

    pub fn list_projects(&self, team_id: i64) -> Result<Vec<Project>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, team_id, name, slug, path, enabled
                 FROM team_projects WHERE team_id = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![team_id], |r| {
                Ok(Project {
                    id: r.get(0)?,
                    team_id: r.get(1)?,
                    name: r.get(2)?,
                    slug: r.get(3)?,
                    path: r.get(4)?,
                    enabled: r.get::<_, i64>(5)? != 0,
                })
            })?;
            rows.collect()
        })
    }

    pub fn set_project_enabled(&self, team_id: i64, project_id: i64, enabled: bool) -> Result<(), StoreError> {
        let changed = self.with_conn(|conn| {
            conn.execute(
                "UPDATE team_projects SET enabled = ?3 WHERE id = ?1 AND team_id = ?2",
                params![project_id, team_id, enabled as i64],
            )
        })?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    // ==================== Skills ====================

    pub fn create_skill(
        &self,
        team_id: i64,
        name: &str,
        description: &str,
        content: &str,
    ) -> Result<i64, StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO team_skills(team_id, name, description, content, enabled, created_at)
                 VALUES (?1, ?2, ?3, ?4, 1, ?5)",
                params![team_id, name, description, content, utc_now()],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn list_skills(&self, team_id: i64) -> Result<Vec<Skill>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, description, content, enabled
                 FROM team_skills WHERE team_id = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![team_id], |r| {
                Ok(Skill {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    description: r.get(2)?,
                    content: r.get(3)?,
                    enabled: r.get::<_, i64>(4)? != 0,
                })
            })?;
            rows.collect()
        })
    }

    /// Enabled skills in id order, shaped for the prompt assembler.
    pub fn enabled_skill_prompts(&self, team_id: i64) -> Result<Vec<TeamSkill>, StoreError> {
        Ok(self
            .list_skills(team_id)?
            .into_iter()
            .filter(|s| s.enabled)
            .map(|s| TeamSkill {
                name: s.name,
                description: s.description,
                content: s.content,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> (Database, i64, i64) {
        let db = Database::open_in_memory().unwrap();
        let user = db.create_user("a@example.com", "A").unwrap();
        let team = db.create_team("alpha").unwrap();
        db.add_membership(user, team, TeamRole::Owner).unwrap();
        (db, user, team)
    }

    #[test]
    fn test_membership_roles() {
        let (db, user, team) = seeded();
        assert_eq!(db.membership_role(user, team).unwrap(), Some(TeamRole::Owner));
        assert_eq!(db.membership_role(user, team + 1).unwrap(), None);
    }

    #[test]
    fn test_workspace_path_roundtrip() {
        let (db, _, team) = seeded();
        assert!(db.team_workspace_path(team).unwrap().is_none());
        db.set_team_workspace_path(team, "/srv/work").unwrap();
        assert_eq!(db.team_workspace_path(team).unwrap().as_deref(), Some("/srv/work"));
    }

    #[test]
    fn test_project_team_scoping() {
        let (db, _, team) = seeded();
        let other_team = db.create_team("beta").unwrap();
        let project = db.create_project(team, "api", "api", "/srv/api").unwrap();

        assert!(db.get_project(team, project).unwrap().is_some());
        assert!(db.get_project(other_team, project).unwrap().is_none());
    }

    #[test]
    fn test_project_disable() {
        let (db, _, team) = seeded();
        let project = db.create_project(team, "api", "api", "/srv/api").unwrap();
        db.set_project_enabled(team, project, false).unwrap();
        assert!(!db.get_project(team, project).unwrap().unwrap().enabled);
        assert!(matches!(
            db.set_project_enabled(team, project + 99, false),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn test_enabled_skills_ordered_by_id() {
        let (db, _, team) = seeded();
        db.create_skill(team, "first", "", "a").unwrap();
        db.create_skill(team, "second", "", "b").unwrap();
        let skills = db.enabled_skill_prompts(team).unwrap();
        assert_eq!(skills.len(), 2);
        assert_eq!(skills[0].name, "first");
        assert_eq!(skills[1].name, "second");
    }
}
