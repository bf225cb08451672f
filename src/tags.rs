use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::Value;

use crate::error::AlertSyncError;

const ALERT_RULE_TAGS_KEY: &str = "alertRuleTags";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

pub struct Tags;

impl Tags {
    /// Tags declared under `alertRuleTags` in an alert's settings. Values that
    /// are not strings become empty tag values.
    pub fn from_settings(settings: &Value) -> Vec<Tag> {
        settings
            .get(ALERT_RULE_TAGS_KEY)
            .and_then(Value::as_object)
            .map(|tags| {
                tags.iter()
                    .map(|(key, value)| Tag {
                        key: key.clone(),
                        value: value.as_str().unwrap_or_default().to_owned(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns the ids of `tags`, inserting the ones that don't exist yet.
    pub fn ensure_exist(conn: &Connection, tags: &[Tag]) -> Result<Vec<i64>, AlertSyncError> {
        let mut tag_ids = Vec::with_capacity(tags.len());

        for tag in tags {
            let existing: Option<i64> = conn
                .query_row(
                    "SELECT id FROM tag WHERE key = ? AND value = ?",
                    [&tag.key, &tag.value],
                    |row| row.get(0),
                )
                .optional()?;

            let tag_id = match existing {
                Some(id) => id,
                None => conn.query_row(
                    "INSERT INTO tag (key, value) VALUES (?, ?) RETURNING id",
                    [&tag.key, &tag.value],
                    |row| row.get(0),
                )?,
            };
            tag_ids.push(tag_id);
        }

        Ok(tag_ids)
    }

    /// Replaces every tag association of `alert_id` with the tags derived from
    /// `settings`. No diffing: the old set is deleted, the new set inserted.
    ///
    /// IMPORTANT: Caller must hold an immediate transaction
    pub fn replace_for_alert(
        conn: &Connection,
        alert_id: i64,
        settings: &Value,
    ) -> Result<(), AlertSyncError> {
        conn.execute("DELETE FROM alert_rule_tag WHERE alert_id = ?", [alert_id])?;

        let tags = Self::from_settings(settings);
        if tags.is_empty() {
            return Ok(());
        }

        for tag_id in Self::ensure_exist(conn, &tags)? {
            conn.execute(
                "INSERT INTO alert_rule_tag (alert_id, tag_id) VALUES (?, ?)",
                [alert_id, tag_id],
            )?;
        }

        Ok(())
    }

    pub fn for_alert(conn: &Connection, alert_id: i64) -> Result<Vec<Tag>, AlertSyncError> {
        let mut stmt = conn.prepare(
            "SELECT tag.key, tag.value
            FROM alert_rule_tag
            INNER JOIN tag ON tag.id = alert_rule_tag.tag_id
            WHERE alert_rule_tag.alert_id = ?
            ORDER BY tag.key, tag.value",
        )?;
        let rows = stmt.query_map([alert_id], |row| {
            Ok(Tag {
                key: row.get(0)?,
                value: row.get(1)?,
            })
        })?;

        let mut tags = Vec::new();
        for row in rows {
            tags.push(row?);
        }
        Ok(tags)
    }
}
