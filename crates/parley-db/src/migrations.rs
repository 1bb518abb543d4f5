use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

/// Tables are modeled after the column store the service was designed for:
/// no foreign keys, membership kept in both directions (`server_users` and
/// `user_servers`), and nothing relies on transactions.
pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id              TEXT PRIMARY KEY,
            email           TEXT NOT NULL UNIQUE,
            username        TEXT NOT NULL UNIQUE,
            password        TEXT NOT NULL,
            display_name    TEXT NOT NULL DEFAULT '',
            about           TEXT NOT NULL DEFAULT '',
            avatar          TEXT NOT NULL DEFAULT '',
            banner          TEXT NOT NULL DEFAULT ''
        );

        CREATE TABLE IF NOT EXISTS sessions (
            session_id  TEXT PRIMARY KEY,
            user_id     TEXT NOT NULL,
            timezone    TEXT NOT NULL,
            user_agent  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS servers (
            server_id   TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            banner      TEXT NOT NULL DEFAULT '',
            owner       TEXT NOT NULL,
            status      TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS server_users (
            server_id   TEXT NOT NULL,
            user_id     TEXT NOT NULL,
            PRIMARY KEY (server_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS user_servers (
            user_id     TEXT NOT NULL,
            server_id   TEXT NOT NULL,
            PRIMARY KEY (user_id, server_id)
        );

        CREATE TABLE IF NOT EXISTS categories (
            server_id   TEXT NOT NULL,
            category_id TEXT NOT NULL,
            name        TEXT NOT NULL,
            PRIMARY KEY (server_id, category_id)
        );

        CREATE TABLE IF NOT EXISTS channels (
            server_id       TEXT NOT NULL,
            channel_id      TEXT NOT NULL,
            category        TEXT NOT NULL,
            name            TEXT NOT NULL,
            parent_id       TEXT NOT NULL,
            parent_position INTEGER NOT NULL DEFAULT 0,
            position        INTEGER NOT NULL DEFAULT 0,
            status          TEXT NOT NULL,
            type            TEXT NOT NULL,
            PRIMARY KEY (server_id, channel_id)
        );

        CREATE TABLE IF NOT EXISTS channel_users (
            channel_id  TEXT NOT NULL,
            user_id     TEXT NOT NULL,
            PRIMARY KEY (channel_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS channel_access (
            channel_id  TEXT NOT NULL,
            user_id     TEXT NOT NULL,
            kind        TEXT NOT NULL DEFAULT 'member',
            PRIMARY KEY (channel_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS user_server_state (
            user_id         TEXT NOT NULL,
            server_id       TEXT NOT NULL,
            last_channel_id TEXT NOT NULL,
            PRIMARY KEY (user_id, server_id)
        );

        CREATE TABLE IF NOT EXISTS invitations (
            id          TEXT PRIMARY KEY,
            server_id   TEXT NOT NULL,
            created_by  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS messages (
            message_id      TEXT PRIMARY KEY,
            channel_id      TEXT NOT NULL,
            server_id       TEXT,
            sender_id       TEXT NOT NULL,
            content         TEXT NOT NULL,
            mentions        TEXT NOT NULL DEFAULT '[]',
            mentions_roles  TEXT NOT NULL DEFAULT '[]',
            created_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_channel
            ON messages(channel_id, created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
