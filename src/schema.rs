pub const SCHEMA_VERSION: &str = "1";

pub const CREATE_SCHEMA_SQL: &str = r#"
BEGIN TRANSACTION;

CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', '1');

CREATE TABLE IF NOT EXISTS dashboard (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    org_id INTEGER NOT NULL,
    uid TEXT NOT NULL,
    slug TEXT NOT NULL,
    title TEXT NOT NULL,
    UNIQUE (org_id, uid)
);

-- An entry applies to a single user (user_id) or to every member of a role (role)
CREATE TABLE IF NOT EXISTS dashboard_acl (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    dashboard_id INTEGER NOT NULL,
    user_id INTEGER,
    role TEXT,
    permission INTEGER NOT NULL,
    FOREIGN KEY (dashboard_id) REFERENCES dashboard(id)
);

CREATE INDEX IF NOT EXISTS idx_dashboard_acl_dashboard ON dashboard_acl (dashboard_id);

CREATE TABLE IF NOT EXISTS alert (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    dashboard_id INTEGER NOT NULL,
    panel_id INTEGER NOT NULL,
    org_id INTEGER NOT NULL,
    user_id INTEGER NOT NULL,            -- Owner, never changes after insert
    name TEXT NOT NULL,
    message TEXT NOT NULL DEFAULT '',
    settings TEXT NOT NULL DEFAULT '{}', -- JSON
    state TEXT NOT NULL,
    new_state_date INTEGER NOT NULL,
    eval_data TEXT,                      -- JSON
    eval_date INTEGER,
    execution_error TEXT NOT NULL DEFAULT '',
    state_changes INTEGER NOT NULL DEFAULT 0,
    frequency INTEGER NOT NULL DEFAULT 0,
    for_secs INTEGER NOT NULL DEFAULT 0,
    created INTEGER NOT NULL,
    updated INTEGER NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_alert_owner_panel ON alert (dashboard_id, panel_id, user_id);
CREATE INDEX IF NOT EXISTS idx_alert_org ON alert (org_id);
CREATE INDEX IF NOT EXISTS idx_alert_user ON alert (user_id);

CREATE TABLE IF NOT EXISTS tag (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    UNIQUE (key, value)
);

CREATE TABLE IF NOT EXISTS alert_rule_tag (
    alert_id INTEGER NOT NULL,
    tag_id INTEGER NOT NULL,
    UNIQUE (alert_id, tag_id)
);

CREATE TABLE IF NOT EXISTS annotation (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    alert_id INTEGER NOT NULL,
    text TEXT NOT NULL DEFAULT '',
    created INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_annotation_alert ON annotation (alert_id);

CREATE TABLE IF NOT EXISTS alert_notification_state (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    alert_id INTEGER NOT NULL,
    notifier_id INTEGER NOT NULL,
    state TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_notification_state_alert ON alert_notification_state (alert_id);

COMMIT;
"#;
