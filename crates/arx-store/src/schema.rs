//! Physical schema. The whole batch is idempotent; it runs on every start.

pub(crate) const MIGRATIONS: &str = "
CREATE TABLE IF NOT EXISTS namespaces (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL UNIQUE,
    description TEXT NOT NULL DEFAULT '',
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS zones (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    name       TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS environments (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    name       TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS users (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    username      TEXT NOT NULL UNIQUE,
    email         TEXT,
    password_hash TEXT NOT NULL DEFAULT '',
    created_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS user_groups (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL UNIQUE,
    description TEXT NOT NULL DEFAULT '',
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS memberships (
    user_id  INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    group_id INTEGER NOT NULL REFERENCES user_groups(id) ON DELETE CASCADE,
    PRIMARY KEY (user_id, group_id)
);

CREATE TABLE IF NOT EXISTS roles (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL UNIQUE,
    description TEXT NOT NULL DEFAULT '',
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS permissions (
    id   INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS role_permissions (
    role_id       INTEGER NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
    permission_id INTEGER NOT NULL REFERENCES permissions(id) ON DELETE CASCADE,
    PRIMARY KEY (role_id, permission_id)
);

CREATE TABLE IF NOT EXISTS user_role_assignments (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id      INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    role_id      INTEGER NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
    namespace_id INTEGER REFERENCES namespaces(id) ON DELETE CASCADE
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_user_role_unique
    ON user_role_assignments(user_id, role_id, COALESCE(namespace_id, 0));

CREATE TABLE IF NOT EXISTS group_role_assignments (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    group_id     INTEGER NOT NULL REFERENCES user_groups(id) ON DELETE CASCADE,
    role_id      INTEGER NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
    namespace_id INTEGER REFERENCES namespaces(id) ON DELETE CASCADE
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_group_role_unique
    ON group_role_assignments(group_id, role_id, COALESCE(namespace_id, 0));

CREATE TABLE IF NOT EXISTS secret_nodes (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    parent_id      INTEGER REFERENCES secret_nodes(id),
    namespace_id   INTEGER NOT NULL REFERENCES namespaces(id),
    zone_id        INTEGER NOT NULL REFERENCES zones(id),
    environment_id INTEGER NOT NULL REFERENCES environments(id),
    name           TEXT NOT NULL,
    is_secret      INTEGER NOT NULL DEFAULT 1,
    secret_type    TEXT,
    max_reads      INTEGER,
    expires_at     TEXT,
    metadata       TEXT NOT NULL DEFAULT '{}',
    status         TEXT NOT NULL DEFAULT 'active',
    owner_id       INTEGER NOT NULL REFERENCES users(id),
    is_shared      INTEGER NOT NULL DEFAULT 0,
    created_by     INTEGER NOT NULL,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL,
    deleted_at     TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_secret_name_unique
    ON secret_nodes(namespace_id, zone_id, environment_id, COALESCE(parent_id, 0), name)
    WHERE deleted_at IS NULL;
CREATE INDEX IF NOT EXISTS idx_secret_owner ON secret_nodes(owner_id);

CREATE TABLE IF NOT EXISTS secret_versions (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    secret_id  INTEGER NOT NULL REFERENCES secret_nodes(id) ON DELETE CASCADE,
    version    INTEGER NOT NULL,
    ciphertext BLOB NOT NULL,
    metadata   TEXT NOT NULL,
    read_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    UNIQUE (secret_id, version)
);
CREATE INDEX IF NOT EXISTS idx_version_secret ON secret_versions(secret_id);

CREATE TABLE IF NOT EXISTS shares (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    secret_id    INTEGER NOT NULL REFERENCES secret_nodes(id) ON DELETE CASCADE,
    owner_id     INTEGER NOT NULL REFERENCES users(id),
    recipient_id INTEGER NOT NULL,
    is_group     INTEGER NOT NULL DEFAULT 0,
    permission   TEXT NOT NULL,
    wrapped_dek  BLOB,
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL,
    deleted_at   TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_share_unique
    ON shares(secret_id, recipient_id, is_group)
    WHERE deleted_at IS NULL;
CREATE INDEX IF NOT EXISTS idx_share_secret ON shares(secret_id);
CREATE INDEX IF NOT EXISTS idx_share_recipient ON shares(recipient_id);

CREATE TABLE IF NOT EXISTS audit_events (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    kind           TEXT NOT NULL,
    actor_user_id  INTEGER,
    secret_id      INTEGER,
    target_user_id INTEGER,
    role_id        INTEGER,
    namespace_id   INTEGER,
    details        TEXT NOT NULL DEFAULT '{}',
    timestamp      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_events(timestamp);
CREATE INDEX IF NOT EXISTS idx_audit_kind ON audit_events(kind);

CREATE TABLE IF NOT EXISTS auth_tokens (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    token_digest TEXT NOT NULL UNIQUE,
    user_id      INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    expires_at   TEXT,
    created_at   TEXT NOT NULL
);
";
