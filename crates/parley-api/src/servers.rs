use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::info;

use parley_db::models::{CategoryRow, ServerRow, ServerStateRow};
use parley_db::{Saga, Store, StoreExt, statements};
use parley_gateway::topology::build_categories;
use parley_types::api::{CreateServerRequest, CreateServerResponse, InvitationRef, ServerRef, ServerState};
use parley_types::events::{ServerMessage, ServerPayload};
use parley_types::models::{Channel, ChannelKind, ChannelStatus, ServerSummary};
use parley_types::{CategoryId, ChannelId, InvitationId, ServerId, UserId};

use crate::middleware::AuthUser;
use crate::{ApiError, AppState, blocking};

const DEFAULT_CATEGORY: &str = "Home";
const DEFAULT_CHANNEL: &str = "General";

/// Result of a successful join: what the joiner now sees and who to tell.
#[derive(Debug)]
pub struct JoinOutcome {
    pub server: ServerSummary,
    pub recipients: Vec<UserId>,
}

/// Creates a server with one category holding one textual channel, and makes
/// the owner its only member.
pub fn create_server<S: Store>(
    store: &S,
    owner: UserId,
    req: &CreateServerRequest,
) -> Result<ServerId, ApiError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("server name must not be empty".into()));
    }

    let server = ServerRow {
        server_id: ServerId::new(),
        name: name.to_string(),
        description: req.description.clone(),
        banner: String::new(),
        owner,
        status: req.status.clone(),
        created_at: Utc::now(),
    };
    let server_id = server.server_id;
    let category = CategoryRow {
        server_id,
        category_id: CategoryId::new(),
        name: DEFAULT_CATEGORY.to_string(),
    };
    let channel = Channel {
        server_id,
        channel_id: ChannelId::new(),
        category: category.name.clone(),
        name: DEFAULT_CHANNEL.to_string(),
        parent_id: category.category_id,
        parent_position: 0,
        position: 0,
        status: ChannelStatus::Public,
        kind: ChannelKind::Textual,
    };
    let channel_id = channel.channel_id;
    let state = ServerStateRow {
        user_id: owner,
        server_id,
        last_channel_id: channel_id,
    };

    let mut saga = Saga::new(store, "create_server");
    saga.step(
        "insert server",
        statements::insert_server(&server),
        Some(statements::delete_server(server_id)),
    )?;
    saga.step(
        "insert category",
        statements::insert_category(&category),
        Some(statements::delete_category(server_id, category.category_id)),
    )?;
    saga.step(
        "insert channel",
        statements::insert_channel(&channel),
        Some(statements::delete_channel(server_id, channel_id)),
    )?;
    saga.step(
        "subscribe owner",
        statements::insert_channel_user(channel_id, owner),
        Some(statements::delete_channel_user(channel_id, owner)),
    )?;
    saga.step(
        "add server member",
        statements::insert_server_user(server_id, owner),
        Some(statements::delete_server_user(server_id, owner)),
    )?;
    saga.step(
        "add to user's servers",
        statements::insert_user_server(owner, server_id),
        Some(statements::delete_user_server(owner, server_id)),
    )?;
    saga.step(
        "insert server state",
        statements::insert_server_state(&state),
        Some(statements::delete_server_state(owner, server_id)),
    )?;
    saga.complete();

    info!("{} created server {} ({})", owner, server_id, server.name);
    Ok(server_id)
}

/// Removes a server and everything hanging off it. Only the owner may do
/// this. Returns the members as they were before the deletion.
pub fn delete_server<S: Store>(
    store: &S,
    user_id: UserId,
    server_id: ServerId,
) -> Result<Vec<UserId>, ApiError> {
    let server = store.find_server(server_id)?.ok_or(ApiError::NotFound("server"))?;
    if server.owner != user_id {
        return Err(ApiError::Forbidden);
    }

    let members = store.server_members(server_id)?;
    let categories = store.server_categories(server_id)?;
    let channels = store.server_channels(server_id)?;
    let states = store.server_states_for_server(server_id)?;
    let mut subscriptions = Vec::with_capacity(channels.len());
    let mut grants = Vec::with_capacity(channels.len());
    for channel in &channels {
        subscriptions.push((channel.channel_id, store.channel_members(channel.channel_id)?));
        grants.push((channel.channel_id, store.channel_access(channel.channel_id)?));
    }

    let mut saga = Saga::new(store, "delete_server");
    saga.step_removing(
        "delete server",
        statements::delete_server(server_id),
        statements::insert_server(&server),
    )?;
    saga.step_with(
        "delete categories",
        statements::delete_categories(server_id),
        categories.iter().map(statements::insert_category),
    )?;
    saga.step_with(
        "delete channels",
        statements::delete_channels(server_id),
        channels.iter().map(statements::insert_channel),
    )?;
    for (channel_id, users) in &subscriptions {
        saga.step_with(
            "unsubscribe channel",
            statements::delete_channel_users(*channel_id),
            users.iter().map(|u| statements::insert_channel_user(*channel_id, *u)),
        )?;
    }
    for (channel_id, access) in &grants {
        saga.step_with(
            "revoke channel access",
            statements::delete_channel_access(*channel_id),
            access
                .iter()
                .map(|(u, kind)| statements::insert_channel_access(*channel_id, *u, kind)),
        )?;
    }
    saga.step_with(
        "delete server members",
        statements::delete_server_users(server_id),
        members.iter().map(|u| statements::insert_server_user(server_id, *u)),
    )?;
    for member in &members {
        saga.step_removing(
            "remove from user's servers",
            statements::delete_user_server(*member, server_id),
            statements::insert_user_server(*member, server_id),
        )?;
    }
    for state in &states {
        saga.step_removing(
            "delete server state",
            statements::delete_server_state(state.user_id, server_id),
            statements::insert_server_state(state),
        )?;
    }
    // Messages and invitations cannot be restored, so they go last.
    for channel in &channels {
        saga.step(
            "delete messages",
            statements::delete_channel_messages(channel.channel_id),
            None,
        )?;
    }
    saga.step("delete invitations", statements::delete_invitations(server_id), None)?;
    saga.complete();

    info!("{} deleted server {}", user_id, server_id);
    Ok(members)
}

pub fn create_invitation<S: Store>(
    store: &S,
    user_id: UserId,
    server_id: ServerId,
) -> Result<InvitationId, ApiError> {
    if store.find_server(server_id)?.is_none() {
        return Err(ApiError::NotFound("server"));
    }
    if !store.is_server_member(server_id, user_id)? {
        return Err(ApiError::Forbidden);
    }

    let invitation_id = InvitationId::new();
    store.run(&statements::insert_invitation(invitation_id, server_id, user_id))?;
    Ok(invitation_id)
}

/// Adds the user to the server behind an invitation, subscribing them to
/// every public channel. Recipients are the members before the join plus the joiner.
pub fn join_server<S: Store>(
    store: &S,
    user_id: UserId,
    invitation_id: InvitationId,
) -> Result<JoinOutcome, ApiError> {
    let server_id = store
        .invitation_server(invitation_id)?
        .ok_or(ApiError::NotFound("invitation"))?;
    let server = store.find_server(server_id)?.ok_or(ApiError::NotFound("server"))?;
    if store.is_server_member(server_id, user_id)? {
        return Err(ApiError::Conflict("already a member of this server"));
    }

    let mut recipients = store.server_members(server_id)?;
    let public: Vec<Channel> = store
        .server_channels(server_id)?
        .into_iter()
        .filter(|c| c.status == ChannelStatus::Public)
        .collect();
    let landing = build_categories(public.clone())
        .first()
        .and_then(|category| category.channels.first())
        .map(|channel| channel.channel_id);

    let mut saga = Saga::new(store, "join_server");
    for channel in &public {
        saga.step(
            "subscribe channel",
            statements::insert_channel_user(channel.channel_id, user_id),
            Some(statements::delete_channel_user(channel.channel_id, user_id)),
        )?;
    }
    saga.step(
        "add server member",
        statements::insert_server_user(server_id, user_id),
        Some(statements::delete_server_user(server_id, user_id)),
    )?;
    saga.step(
        "add to user's servers",
        statements::insert_user_server(user_id, server_id),
        Some(statements::delete_user_server(user_id, server_id)),
    )?;
    if let Some(last_channel_id) = landing {
        let state = ServerStateRow {
            user_id,
            server_id,
            last_channel_id,
        };
        saga.step(
            "insert server state",
            statements::insert_server_state(&state),
            Some(statements::delete_server_state(user_id, server_id)),
        )?;
    }
    saga.complete();

    info!("{} joined server {}", user_id, server_id);
    recipients.push(user_id);
    Ok(JoinOutcome {
        server: server.into(),
        recipients,
    })
}

/// Removes the user from the server. Recipients are the members before the
/// departure, the leaver included.
pub fn leave_server<S: Store>(
    store: &S,
    user_id: UserId,
    server_id: ServerId,
) -> Result<Vec<UserId>, ApiError> {
    if store.find_server(server_id)?.is_none() {
        return Err(ApiError::NotFound("server"));
    }
    if !store.is_server_member(server_id, user_id)? {
        return Err(ApiError::NotFound("membership"));
    }

    let recipients = store.server_members(server_id)?;
    let channels = store.server_channels(server_id)?;
    let state = store
        .server_states(user_id)?
        .into_iter()
        .find(|s| s.server_id == server_id);

    let mut saga = Saga::new(store, "leave_server");
    for channel in &channels {
        saga.step_removing(
            "unsubscribe channel",
            statements::delete_channel_user(channel.channel_id, user_id),
            statements::insert_channel_user(channel.channel_id, user_id),
        )?;
    }
    saga.step_removing(
        "remove server member",
        statements::delete_server_user(server_id, user_id),
        statements::insert_server_user(server_id, user_id),
    )?;
    saga.step_removing(
        "remove from user's servers",
        statements::delete_user_server(user_id, server_id),
        statements::insert_user_server(user_id, server_id),
    )?;
    if let Some(state) = state {
        saga.step_removing(
            "delete server state",
            statements::delete_server_state(user_id, server_id),
            statements::insert_server_state(&state),
        )?;
    }
    saga.complete();

    info!("{} left server {}", user_id, server_id);
    Ok(recipients)
}

pub fn load_server_state<S: Store>(store: &S, user_id: UserId) -> Result<ServerState, ApiError> {
    Ok(store
        .server_states(user_id)?
        .into_iter()
        .map(|s| (s.server_id, s.last_channel_id))
        .collect())
}

/// Records the last visited channel per server. Servers the user has no
/// state row for are ignored.
pub fn save_server_state<S: Store>(
    store: &S,
    user_id: UserId,
    state: &ServerState,
) -> Result<(), ApiError> {
    for (server_id, channel_id) in state {
        store.run(&statements::update_server_state(user_id, *server_id, *channel_id))?;
    }
    Ok(())
}

// -- Handlers --

pub async fn create(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<CreateServerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let server_id = blocking(move || create_server(&*db, user_id, &req)).await?;
    Ok((StatusCode::CREATED, Json(CreateServerResponse { server_id })))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<ServerRef>,
) -> Result<StatusCode, ApiError> {
    let db = state.db.clone();
    let server_id = req.server_id;
    let recipients = blocking(move || delete_server(&*db, user_id, server_id)).await?;

    state.broadcaster.broadcast(
        recipients,
        &ServerMessage::new(ServerPayload::ServerDeletion { id: server_id }),
    );
    Ok(StatusCode::NO_CONTENT)
}

pub async fn invite(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Path(server_id): Path<ServerId>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let invitation_id = blocking(move || create_invitation(&*db, user_id, server_id)).await?;
    Ok((StatusCode::CREATED, Json(InvitationRef { invitation_id })))
}

pub async fn join(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<InvitationRef>,
) -> Result<Json<ServerSummary>, ApiError> {
    let db = state.db.clone();
    let outcome = blocking(move || join_server(&*db, user_id, req.invitation_id)).await?;

    state.broadcaster.broadcast(
        outcome.recipients,
        &ServerMessage::new(ServerPayload::ServerJoin {
            user_id,
            server: outcome.server.clone(),
        }),
    );
    Ok(Json(outcome.server))
}

pub async fn leave(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<ServerRef>,
) -> Result<StatusCode, ApiError> {
    let db = state.db.clone();
    let server_id = req.server_id;
    let recipients = blocking(move || leave_server(&*db, user_id, server_id)).await?;

    state.broadcaster.broadcast(
        recipients,
        &ServerMessage::new(ServerPayload::ServerLeave { user_id, server_id }),
    );
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_state(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<Json<ServerState>, ApiError> {
    let db = state.db.clone();
    Ok(Json(blocking(move || load_server_state(&*db, user_id)).await?))
}

pub async fn update_state(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(req): Json<ServerState>,
) -> Result<StatusCode, ApiError> {
    let db = state.db.clone();
    blocking(move || save_server_state(&*db, user_id, &req)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FailingStore, count, seed_user};
    use parley_db::{Database, SagaError};
    use parley_gateway::topology::load_server_infos;

    fn request(name: &str) -> CreateServerRequest {
        CreateServerRequest {
            name: name.into(),
            description: String::new(),
            status: "public".into(),
        }
    }

    fn members_sorted(db: &Database, server_id: ServerId) -> Vec<UserId> {
        let mut members = db.server_members(server_id).unwrap();
        members.sort();
        members
    }

    fn sorted(mut users: Vec<UserId>) -> Vec<UserId> {
        users.sort();
        users
    }

    #[test]
    fn test_create_server_builds_default_topology() {
        let db = Database::open_in_memory().unwrap();
        let owner = seed_user(&db, "owner");

        let server_id = create_server(&db, owner, &request("Rustaceans")).unwrap();

        let infos = load_server_infos(&db, server_id, owner).unwrap().unwrap();
        assert_eq!(infos.categories.len(), 1);
        assert_eq!(infos.categories[0].name, "Home");
        let general = &infos.categories[0].channels[0];
        assert_eq!(general.name, "General");
        assert_eq!(general.kind, ChannelKind::Textual);

        assert_eq!(db.server_members(server_id).unwrap(), vec![owner]);
        assert_eq!(db.user_server_ids(owner).unwrap(), vec![server_id]);
        assert_eq!(db.channel_members(general.channel_id).unwrap(), vec![owner]);
        assert_eq!(
            load_server_state(&db, owner).unwrap().get(&server_id),
            Some(&general.channel_id)
        );
    }

    #[test]
    fn test_create_server_failure_leaves_no_trace() {
        let db = Database::open_in_memory().unwrap();
        let owner = seed_user(&db, "owner");
        let failing = FailingStore {
            inner: &db,
            fail_on: "INSERT INTO user_servers",
        };

        let result = create_server(&failing, owner, &request("Doomed"));

        match result {
            Err(ApiError::WriteFailure(SagaError::WriteFailure { operation, step, .. })) => {
                assert_eq!(operation, "create_server");
                assert_eq!(step, "add to user's servers");
            }
            other => panic!("expected a write failure, got {other:?}"),
        }
        for table in ["servers", "categories", "channels", "channel_users", "server_users", "user_servers", "user_server_state"] {
            assert_eq!(count(&db, table), 0, "{table} should be empty");
        }
    }

    #[test]
    fn test_create_server_rejects_blank_name() {
        let db = Database::open_in_memory().unwrap();
        let owner = seed_user(&db, "owner");

        let result = create_server(&db, owner, &request("   "));
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
        assert_eq!(count(&db, "servers"), 0);
    }

    #[test]
    fn test_join_recipients_are_prior_members_plus_joiner() {
        let db = Database::open_in_memory().unwrap();
        let owner = seed_user(&db, "owner");
        let joiner = seed_user(&db, "joiner");
        let server_id = create_server(&db, owner, &request("Guild")).unwrap();
        let invitation = create_invitation(&db, owner, server_id).unwrap();

        let outcome = join_server(&db, joiner, invitation).unwrap();

        assert_eq!(outcome.server.server_id, server_id);
        assert_eq!(sorted(outcome.recipients), sorted(vec![owner, joiner]));
        assert_eq!(members_sorted(&db, server_id), sorted(vec![owner, joiner]));
        assert!(load_server_infos(&db, server_id, joiner).unwrap().is_some());
        assert!(load_server_state(&db, joiner).unwrap().contains_key(&server_id));
    }

    #[test]
    fn test_join_twice_conflicts() {
        let db = Database::open_in_memory().unwrap();
        let owner = seed_user(&db, "owner");
        let server_id = create_server(&db, owner, &request("Guild")).unwrap();
        let invitation = create_invitation(&db, owner, server_id).unwrap();

        let result = join_server(&db, owner, invitation);
        assert!(matches!(result, Err(ApiError::Conflict(_))));
    }

    #[test]
    fn test_join_with_unknown_invitation_writes_nothing() {
        let db = Database::open_in_memory().unwrap();
        let owner = seed_user(&db, "owner");
        let joiner = seed_user(&db, "joiner");
        let server_id = create_server(&db, owner, &request("Guild")).unwrap();

        let result = join_server(&db, joiner, InvitationId::new());
        assert!(matches!(result, Err(ApiError::NotFound("invitation"))));
        assert_eq!(db.server_members(server_id).unwrap(), vec![owner]);
    }

    #[test]
    fn test_failed_join_is_rolled_back() {
        let db = Database::open_in_memory().unwrap();
        let owner = seed_user(&db, "owner");
        let joiner = seed_user(&db, "joiner");
        let server_id = create_server(&db, owner, &request("Guild")).unwrap();
        let invitation = create_invitation(&db, owner, server_id).unwrap();
        let channel_users_before = count(&db, "channel_users");

        let failing = FailingStore {
            inner: &db,
            fail_on: "INSERT INTO user_server_state",
        };
        assert!(matches!(
            join_server(&failing, joiner, invitation),
            Err(ApiError::WriteFailure(_))
        ));

        assert_eq!(db.server_members(server_id).unwrap(), vec![owner]);
        assert!(db.user_server_ids(joiner).unwrap().is_empty());
        assert_eq!(count(&db, "channel_users"), channel_users_before);
    }

    #[test]
    fn test_leave_notifies_everyone_including_leaver() {
        let db = Database::open_in_memory().unwrap();
        let owner = seed_user(&db, "owner");
        let joiner = seed_user(&db, "joiner");
        let server_id = create_server(&db, owner, &request("Guild")).unwrap();
        let invitation = create_invitation(&db, owner, server_id).unwrap();
        join_server(&db, joiner, invitation).unwrap();

        let recipients = leave_server(&db, joiner, server_id).unwrap();

        assert_eq!(sorted(recipients), sorted(vec![owner, joiner]));
        assert_eq!(db.server_members(server_id).unwrap(), vec![owner]);
        assert!(db.user_server_ids(joiner).unwrap().is_empty());
        assert!(load_server_infos(&db, server_id, joiner).unwrap().is_none());
        assert!(load_server_state(&db, joiner).unwrap().is_empty());
    }

    #[test]
    fn test_leave_without_membership_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let owner = seed_user(&db, "owner");
        let stranger = seed_user(&db, "stranger");
        let server_id = create_server(&db, owner, &request("Guild")).unwrap();

        assert!(matches!(
            leave_server(&db, stranger, server_id),
            Err(ApiError::NotFound("membership"))
        ));
    }

    #[test]
    fn test_only_owner_can_delete_server() {
        let db = Database::open_in_memory().unwrap();
        let owner = seed_user(&db, "owner");
        let joiner = seed_user(&db, "joiner");
        let server_id = create_server(&db, owner, &request("Guild")).unwrap();
        let invitation = create_invitation(&db, owner, server_id).unwrap();
        join_server(&db, joiner, invitation).unwrap();

        assert!(matches!(
            delete_server(&db, joiner, server_id),
            Err(ApiError::Forbidden)
        ));

        let recipients = delete_server(&db, owner, server_id).unwrap();
        assert_eq!(sorted(recipients), sorted(vec![owner, joiner]));
        for table in ["servers", "categories", "channels", "channel_users", "server_users", "user_servers", "user_server_state", "invitations"] {
            assert_eq!(count(&db, table), 0, "{table} should be empty");
        }
    }

    #[test]
    fn test_failed_delete_restores_server() {
        let db = Database::open_in_memory().unwrap();
        let owner = seed_user(&db, "owner");
        let server_id = create_server(&db, owner, &request("Guild")).unwrap();
        let before = load_server_infos(&db, server_id, owner).unwrap().unwrap();

        let failing = FailingStore {
            inner: &db,
            fail_on: "DELETE FROM user_servers",
        };
        assert!(matches!(
            delete_server(&failing, owner, server_id),
            Err(ApiError::WriteFailure(_))
        ));

        assert!(db.find_server(server_id).unwrap().is_some());
        assert_eq!(db.server_members(server_id).unwrap(), vec![owner]);
        assert_eq!(load_server_infos(&db, server_id, owner).unwrap().unwrap(), before);
    }

    #[test]
    fn test_failed_leave_does_not_restore_rows_already_gone() {
        let db = Database::open_in_memory().unwrap();
        let owner = seed_user(&db, "owner");
        let joiner = seed_user(&db, "joiner");
        let server_id = create_server(&db, owner, &request("Guild")).unwrap();
        let invitation = create_invitation(&db, owner, server_id).unwrap();
        join_server(&db, joiner, invitation).unwrap();
        // The joiner's own copy of the membership disappears before the leave runs.
        db.run(&statements::delete_user_server(joiner, server_id)).unwrap();

        let failing = FailingStore {
            inner: &db,
            fail_on: "DELETE FROM user_server_state",
        };
        assert!(matches!(
            leave_server(&failing, joiner, server_id),
            Err(ApiError::WriteFailure(_))
        ));

        assert_eq!(members_sorted(&db, server_id), sorted(vec![owner, joiner]));
        assert!(db.user_server_ids(joiner).unwrap().is_empty());
        assert!(load_server_state(&db, joiner).unwrap().contains_key(&server_id));
    }

    #[test]
    fn test_failed_delete_does_not_restore_rows_already_gone() {
        let db = Database::open_in_memory().unwrap();
        let owner = seed_user(&db, "owner");
        let joiner = seed_user(&db, "joiner");
        let server_id = create_server(&db, owner, &request("Guild")).unwrap();
        let invitation = create_invitation(&db, owner, server_id).unwrap();
        join_server(&db, joiner, invitation).unwrap();
        db.run(&statements::delete_user_server(joiner, server_id)).unwrap();

        let failing = FailingStore {
            inner: &db,
            fail_on: "DELETE FROM user_server_state",
        };
        assert!(matches!(
            delete_server(&failing, owner, server_id),
            Err(ApiError::WriteFailure(_))
        ));

        assert!(db.find_server(server_id).unwrap().is_some());
        assert_eq!(db.user_server_ids(owner).unwrap(), vec![server_id]);
        assert!(db.user_server_ids(joiner).unwrap().is_empty());
    }

    #[test]
    fn test_invitation_requires_membership() {
        let db = Database::open_in_memory().unwrap();
        let owner = seed_user(&db, "owner");
        let stranger = seed_user(&db, "stranger");
        let server_id = create_server(&db, owner, &request("Guild")).unwrap();

        assert!(matches!(
            create_invitation(&db, stranger, server_id),
            Err(ApiError::Forbidden)
        ));
        assert!(matches!(
            create_invitation(&db, owner, ServerId::new()),
            Err(ApiError::NotFound("server"))
        ));
    }

    #[test]
    fn test_server_state_updates_existing_rows_only() {
        let db = Database::open_in_memory().unwrap();
        let owner = seed_user(&db, "owner");
        let server_id = create_server(&db, owner, &request("Guild")).unwrap();
        let elsewhere = ChannelId::new();

        let mut update = ServerState::new();
        update.insert(server_id, elsewhere);
        update.insert(ServerId::new(), ChannelId::new());
        save_server_state(&db, owner, &update).unwrap();

        let state = load_server_state(&db, owner).unwrap();
        assert_eq!(state.len(), 1);
        assert_eq!(state.get(&server_id), Some(&elsewhere));
    }

    #[tokio::test]
    async fn test_join_pushes_to_members_only() {
        use std::sync::Arc;
        use std::time::Duration;

        use parley_gateway::{Broadcaster, ConnectionHandle, ConnectionRegistry, SessionValidator};

        use crate::AppStateInner;

        let db = Arc::new(Database::open_in_memory().unwrap());
        let owner = seed_user(&db, "owner");
        let joiner = seed_user(&db, "joiner");
        let stranger = seed_user(&db, "stranger");
        let server_id = create_server(&*db, owner, &request("Guild")).unwrap();
        let invitation = create_invitation(&*db, owner, server_id).unwrap();

        let registry = ConnectionRegistry::new();
        let mut queues = Vec::new();
        for user in [owner, joiner, stranger] {
            let (handle, rx) = ConnectionHandle::channel();
            registry.register(user, handle);
            queues.push(rx);
        }
        let state = Arc::new(AppStateInner {
            db: db.clone(),
            sessions: SessionValidator::new("test-secret", Duration::from_secs(60)),
            broadcaster: Broadcaster::new(registry),
        });

        let bogus = join(
            State(state.clone()),
            Extension(AuthUser(stranger)),
            Json(InvitationRef { invitation_id: InvitationId::new() }),
        )
        .await;
        assert!(matches!(bogus, Err(ApiError::NotFound("invitation"))));
        assert!(queues.iter_mut().all(|rx| rx.try_recv().is_err()));

        join(
            State(state),
            Extension(AuthUser(joiner)),
            Json(InvitationRef { invitation_id: invitation }),
        )
        .await
        .unwrap();

        for rx in &mut queues[..2] {
            let message = ServerMessage::decode(&rx.try_recv().unwrap()).unwrap();
            assert_eq!(message.kind, "server_join");
            assert!(matches!(
                message.payload,
                ServerPayload::ServerJoin { user_id, .. } if user_id == joiner
            ));
        }
        assert!(queues[2].try_recv().is_err());
    }
}
