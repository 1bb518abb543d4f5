use anyhow::Result;
use rusqlite::Row;
use rusqlite::types::Type;

use parley_types::models::{Channel, ChannelKind, ChannelStatus};
use parley_types::{ChannelId, InvitationId, ServerId, UserId};

use crate::models::{CategoryRow, MessageRow, ServerRow, ServerStateRow, SessionRow, UserRow};
use crate::statements::Statement;
use crate::store::{Store, enum_col, parse_col, text};

const USER_COLUMNS: &str = "id, email, username, password, display_name, about, avatar, banner";
const SERVER_COLUMNS: &str = "server_id, name, description, banner, owner, status, created_at";
const CHANNEL_COLUMNS: &str =
    "server_id, channel_id, category, name, parent_id, parent_position, position, status, type";

/// Typed reads (and single-statement writes) over any [`Store`].
pub trait StoreExt: Store {
    fn run(&self, statement: &Statement) -> Result<usize> {
        self.execute(statement.query, &statement.args)
    }

    // -- Sessions & users --

    fn find_session(&self, session_id: &str) -> Result<Option<SessionRow>> {
        let rows = self.query(
            "SELECT session_id, user_id, timezone, user_agent FROM sessions WHERE session_id = ?1",
            &[text(session_id)],
            |row| {
                Ok(SessionRow {
                    session_id: row.get(0)?,
                    user_id: parse_col(row, 1)?,
                    timezone: row.get(2)?,
                    user_agent: row.get(3)?,
                })
            },
        )?;
        Ok(rows.into_iter().next())
    }

    fn find_user(&self, id: UserId) -> Result<Option<UserRow>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
        Ok(self.query(&sql, &[text(id)], user_row)?.into_iter().next())
    }

    fn find_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1");
        Ok(self.query(&sql, &[text(email)], user_row)?.into_iter().next())
    }

    fn user_exists(&self, username: &str, email: &str) -> Result<bool> {
        let hits = self.query(
            "SELECT id FROM users WHERE username = ?1 OR email = ?2 LIMIT 1",
            &[text(username), text(email)],
            |row| row.get::<_, String>(0),
        )?;
        Ok(!hits.is_empty())
    }

    // -- Servers --

    fn find_server(&self, server_id: ServerId) -> Result<Option<ServerRow>> {
        let sql = format!("SELECT {SERVER_COLUMNS} FROM servers WHERE server_id = ?1");
        Ok(self.query(&sql, &[text(server_id)], server_row)?.into_iter().next())
    }

    fn user_server_ids(&self, user_id: UserId) -> Result<Vec<ServerId>> {
        self.query(
            "SELECT server_id FROM user_servers WHERE user_id = ?1",
            &[text(user_id)],
            |row| parse_col(row, 0),
        )
    }

    fn server_members(&self, server_id: ServerId) -> Result<Vec<UserId>> {
        self.query(
            "SELECT user_id FROM server_users WHERE server_id = ?1",
            &[text(server_id)],
            |row| parse_col(row, 0),
        )
    }

    fn is_server_member(&self, server_id: ServerId, user_id: UserId) -> Result<bool> {
        let hits = self.query(
            "SELECT user_id FROM server_users WHERE server_id = ?1 AND user_id = ?2",
            &[text(server_id), text(user_id)],
            |row| row.get::<_, String>(0),
        )?;
        Ok(!hits.is_empty())
    }

    fn invitation_server(&self, invitation_id: InvitationId) -> Result<Option<ServerId>> {
        let rows = self.query(
            "SELECT server_id FROM invitations WHERE id = ?1",
            &[text(invitation_id)],
            |row| parse_col(row, 0),
        )?;
        Ok(rows.into_iter().next())
    }

    fn server_states(&self, user_id: UserId) -> Result<Vec<ServerStateRow>> {
        self.query(
            "SELECT user_id, server_id, last_channel_id FROM user_server_state WHERE user_id = ?1",
            &[text(user_id)],
            server_state_row,
        )
    }

    fn server_states_for_server(&self, server_id: ServerId) -> Result<Vec<ServerStateRow>> {
        self.query(
            "SELECT user_id, server_id, last_channel_id FROM user_server_state WHERE server_id = ?1",
            &[text(server_id)],
            server_state_row,
        )
    }

    // -- Categories & channels --

    fn server_categories(&self, server_id: ServerId) -> Result<Vec<CategoryRow>> {
        self.query(
            "SELECT server_id, category_id, name FROM categories WHERE server_id = ?1",
            &[text(server_id)],
            |row| {
                Ok(CategoryRow {
                    server_id: parse_col(row, 0)?,
                    category_id: parse_col(row, 1)?,
                    name: row.get(2)?,
                })
            },
        )
    }

    /// Channel rows of a server in storage order. Ordering for display is
    /// the topology builder's job.
    fn server_channels(&self, server_id: ServerId) -> Result<Vec<Channel>> {
        let sql = format!("SELECT {CHANNEL_COLUMNS} FROM channels WHERE server_id = ?1");
        self.query(&sql, &[text(server_id)], channel_row)
    }

    fn find_channel(&self, server_id: ServerId, channel_id: ChannelId) -> Result<Option<Channel>> {
        let sql = format!("SELECT {CHANNEL_COLUMNS} FROM channels WHERE server_id = ?1 AND channel_id = ?2");
        Ok(self
            .query(&sql, &[text(server_id), text(channel_id)], channel_row)?
            .into_iter()
            .next())
    }

    fn channel_members(&self, channel_id: ChannelId) -> Result<Vec<UserId>> {
        self.query(
            "SELECT user_id FROM channel_users WHERE channel_id = ?1",
            &[text(channel_id)],
            |row| parse_col(row, 0),
        )
    }

    fn has_channel_access(&self, channel_id: ChannelId, user_id: UserId) -> Result<bool> {
        let hits = self.query(
            "SELECT kind FROM channel_access WHERE channel_id = ?1 AND user_id = ?2",
            &[text(channel_id), text(user_id)],
            |row| row.get::<_, String>(0),
        )?;
        Ok(!hits.is_empty())
    }

    fn channel_access(&self, channel_id: ChannelId) -> Result<Vec<(UserId, String)>> {
        self.query(
            "SELECT user_id, kind FROM channel_access WHERE channel_id = ?1",
            &[text(channel_id)],
            |row| Ok((parse_col(row, 0)?, row.get(1)?)),
        )
    }

    // -- Messages --

    /// Newest first.
    fn channel_messages(&self, channel_id: ChannelId, limit: u32) -> Result<Vec<MessageRow>> {
        self.query(
            "SELECT message_id, channel_id, server_id, sender_id, content, mentions, mentions_roles, created_at
             FROM messages
             WHERE channel_id = ?1
             ORDER BY created_at DESC
             LIMIT ?2",
            &[text(channel_id), rusqlite::types::Value::Integer(i64::from(limit))],
            |row| {
                let server_id: Option<String> = row.get(2)?;
                Ok(MessageRow {
                    message_id: parse_col(row, 0)?,
                    channel_id: parse_col(row, 1)?,
                    server_id: server_id
                        .map(|s| s.parse())
                        .transpose()
                        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?,
                    sender_id: parse_col(row, 3)?,
                    content: row.get(4)?,
                    mentions: json_col(row, 5)?,
                    mentions_roles: json_col(row, 6)?,
                    created_at: parse_col(row, 7)?,
                })
            },
        )
    }
}

impl<S: Store> StoreExt for S {}

fn user_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: parse_col(row, 0)?,
        email: row.get(1)?,
        username: row.get(2)?,
        password: row.get(3)?,
        display_name: row.get(4)?,
        about: row.get(5)?,
        avatar: row.get(6)?,
        banner: row.get(7)?,
    })
}

fn server_row(row: &Row<'_>) -> rusqlite::Result<ServerRow> {
    Ok(ServerRow {
        server_id: parse_col(row, 0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        banner: row.get(3)?,
        owner: parse_col(row, 4)?,
        status: row.get(5)?,
        created_at: parse_col(row, 6)?,
    })
}

fn channel_row(row: &Row<'_>) -> rusqlite::Result<Channel> {
    Ok(Channel {
        server_id: parse_col(row, 0)?,
        channel_id: parse_col(row, 1)?,
        category: row.get(2)?,
        name: row.get(3)?,
        parent_id: parse_col(row, 4)?,
        parent_position: row.get(5)?,
        position: row.get(6)?,
        status: enum_col(row, 7, ChannelStatus::parse)?,
        kind: enum_col(row, 8, ChannelKind::parse)?,
    })
}

fn server_state_row(row: &Row<'_>) -> rusqlite::Result<ServerStateRow> {
    Ok(ServerStateRow {
        user_id: parse_col(row, 0)?,
        server_id: parse_col(row, 1)?,
        last_channel_id: parse_col(row, 2)?,
    })
}

fn json_col<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use crate::statements;
    use chrono::Utc;
    use parley_types::CategoryId;

    fn channel(server_id: ServerId, category: &str, status: ChannelStatus) -> Channel {
        Channel {
            server_id,
            channel_id: ChannelId::new(),
            category: category.to_string(),
            name: "general".to_string(),
            parent_id: CategoryId::new(),
            parent_position: 1,
            position: 3,
            status,
            kind: ChannelKind::Textual,
        }
    }

    #[test]
    fn test_session_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let session = SessionRow {
            session_id: "s-1".into(),
            user_id: UserId::new(),
            timezone: "Europe/Paris".into(),
            user_agent: "Firefox".into(),
        };
        db.run(&statements::insert_session(&session)).unwrap();

        assert_eq!(db.find_session("s-1").unwrap(), Some(session));
        assert_eq!(db.find_session("s-2").unwrap(), None);
    }

    #[test]
    fn test_user_lookup_and_existence() {
        let db = Database::open_in_memory().unwrap();
        let id = UserId::new();
        db.run(&statements::insert_user(id, "a@b.c", "alice", "hash")).unwrap();

        let user = db.find_user(id).unwrap().unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(db.find_user_by_email("a@b.c").unwrap().unwrap().id, id);
        assert!(db.user_exists("alice", "other@b.c").unwrap());
        assert!(db.user_exists("bob", "a@b.c").unwrap());
        assert!(!db.user_exists("bob", "bob@b.c").unwrap());
    }

    #[test]
    fn test_channel_row_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let server_id = ServerId::new();
        let ch = channel(server_id, "Home", ChannelStatus::Private);
        db.run(&statements::insert_channel(&ch)).unwrap();

        assert_eq!(db.server_channels(server_id).unwrap(), vec![ch.clone()]);
        assert_eq!(db.find_channel(server_id, ch.channel_id).unwrap(), Some(ch.clone()));
        assert!(db.server_channels(ServerId::new()).unwrap().is_empty());
    }

    #[test]
    fn test_memberships() {
        let db = Database::open_in_memory().unwrap();
        let server_id = ServerId::new();
        let alice = UserId::new();
        let bob = UserId::new();
        db.run(&statements::insert_server_user(server_id, alice)).unwrap();
        db.run(&statements::insert_server_user(server_id, bob)).unwrap();
        db.run(&statements::delete_server_user(server_id, bob)).unwrap();

        assert_eq!(db.server_members(server_id).unwrap(), vec![alice]);
        assert!(db.is_server_member(server_id, alice).unwrap());
        assert!(!db.is_server_member(server_id, bob).unwrap());
    }

    #[test]
    fn test_duplicate_membership_is_a_write_failure() {
        let db = Database::open_in_memory().unwrap();
        let channel_id = ChannelId::new();
        let user = UserId::new();
        db.run(&statements::insert_channel_user(channel_id, user)).unwrap();
        assert!(db.run(&statements::insert_channel_user(channel_id, user)).is_err());
    }

    #[test]
    fn test_server_row_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let row = ServerRow {
            server_id: ServerId::new(),
            name: "Rustaceans".into(),
            description: "crabs".into(),
            banner: String::new(),
            owner: UserId::new(),
            status: "public".into(),
            created_at: Utc::now(),
        };
        db.run(&statements::insert_server(&row)).unwrap();

        let found = db.find_server(row.server_id).unwrap().unwrap();
        assert_eq!(found.name, "Rustaceans");
        assert_eq!(found.owner, row.owner);
        assert_eq!(found.created_at, row.created_at);
    }

    #[test]
    fn test_messages_keep_mentions() {
        let db = Database::open_in_memory().unwrap();
        let channel_id = ChannelId::new();
        let mentioned = UserId::new();
        let row = MessageRow {
            message_id: parley_types::MessageId::new(),
            channel_id,
            server_id: None,
            sender_id: UserId::new(),
            content: "hello".into(),
            mentions: vec![mentioned],
            mentions_roles: vec!["admin".into()],
            created_at: Utc::now(),
        };
        db.run(&statements::insert_message(&row)).unwrap();

        let rows = db.channel_messages(channel_id, 50).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].mentions, vec![mentioned]);
        assert_eq!(rows[0].mentions_roles, vec!["admin".to_string()]);
        assert_eq!(rows[0].server_id, None);
    }
}
