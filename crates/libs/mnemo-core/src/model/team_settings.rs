//! Per-project governance settings consumed by the policy engine.

use crate::model::{ModelManager, opt_text};
use crate::time::now_z;
use crate::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamSettings {
    pub project_key: String,
    pub team_write_enabled: bool,
    pub policy_json: Option<serde_json::Value>,
    pub updated_ts: String,
}

impl TeamSettings {
    /// Defaults used when no row exists for a project.
    pub fn default_for(project_key: &str) -> Self {
        TeamSettings {
            project_key: project_key.to_string(),
            team_write_enabled: true,
            policy_json: None,
            updated_ts: now_z(),
        }
    }
}

pub struct TeamSettingsBmc;

impl TeamSettingsBmc {
    pub async fn get(mm: &ModelManager, project_key: &str) -> Result<TeamSettings> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "SELECT project_key, team_write_enabled, policy_json, updated_ts
                 FROM team_settings WHERE project_key = ?",
            )
            .await?;
        let mut rows = stmt.query([project_key]).await?;
        if let Some(row) = rows.next().await? {
            let policy_raw: Option<String> = row.get(2)?;
            Ok(TeamSettings {
                project_key: row.get(0)?,
                team_write_enabled: row.get::<i64>(1)? != 0,
                policy_json: policy_raw.map(|s| serde_json::from_str(&s)).transpose()?,
                updated_ts: row.get(3)?,
            })
        } else {
            Ok(TeamSettings::default_for(project_key))
        }
    }

    pub async fn upsert(
        mm: &ModelManager,
        project_key: &str,
        team_write_enabled: bool,
        policy_json: Option<serde_json::Value>,
    ) -> Result<()> {
        let db = mm.db();
        let policy = policy_json.as_ref().map(|v| v.to_string());
        let stmt = db
            .prepare(
                "INSERT INTO team_settings (project_key, team_write_enabled, policy_json, updated_ts)
                 VALUES (?, ?, ?, ?)
                 ON CONFLICT(project_key) DO UPDATE SET
                   team_write_enabled = excluded.team_write_enabled,
                   policy_json = COALESCE(excluded.policy_json, team_settings.policy_json),
                   updated_ts = excluded.updated_ts",
            )
            .await?;
        stmt.execute((
            project_key,
            team_write_enabled as i64,
            opt_text(policy),
            now_z().as_str(),
        ))
        .await?;
        Ok(())
    }
}
