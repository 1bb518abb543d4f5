use anyhow::{Result, anyhow};
use tracing::{debug, warn};

use parley_db::{Store, StoreExt};
use parley_types::events::{InitialPosition, ServerPayload};
use parley_types::models::{Category, Channel, ChannelStatus, ServerInfos, ServerSummary, UserProfile};
use parley_types::{ServerId, UserId};

/// Orders channels by `(parent_position, position)` and groups runs of equal
/// category names, in order of first appearance.
///
/// A category whose channels are not contiguous after sorting comes out as
/// several groups with the same name.
pub fn build_categories(mut channels: Vec<Channel>) -> Vec<Category> {
    // sort_by_key is stable: equal keys keep storage order.
    channels.sort_by_key(|c| (c.parent_position, c.position));

    let mut categories: Vec<Category> = Vec::new();
    for channel in channels {
        match categories.last_mut() {
            Some(current) if current.name == channel.category => current.channels.push(channel),
            _ => categories.push(Category {
                name: channel.category.clone(),
                channels: vec![channel],
            }),
        }
    }
    categories
}

/// Drops private channels the viewer has no access row for. A failed
/// lookup hides the channel rather than failing the whole view.
pub fn visible_channels<S: Store>(store: &S, channels: Vec<Channel>, viewer: UserId) -> Vec<Channel> {
    channels
        .into_iter()
        .filter(|channel| match channel.status {
            ChannelStatus::Public => true,
            ChannelStatus::Private => match store.has_channel_access(channel.channel_id, viewer) {
                Ok(allowed) => {
                    if !allowed {
                        debug!("{} has no access to private channel {}", viewer, channel.channel_id);
                    }
                    allowed
                }
                Err(e) => {
                    warn!(
                        "Access lookup for {} on channel {} failed, hiding it: {:#}",
                        viewer, channel.channel_id, e
                    );
                    false
                }
            },
        })
        .collect()
}

/// Topology of `server_id` as `viewer` may see it, or `None` if the viewer is
/// not a member of the server.
pub fn load_server_infos<S: Store>(
    store: &S,
    server_id: ServerId,
    viewer: UserId,
) -> Result<Option<ServerInfos>> {
    if !store.is_server_member(server_id, viewer)? {
        return Ok(None);
    }

    let channels = store.server_channels(server_id)?;
    let visible = visible_channels(store, channels, viewer);
    Ok(Some(ServerInfos {
        categories: build_categories(visible),
    }))
}

/// Summaries of every server the user belongs to. Dangling ids are skipped.
pub fn load_user_servers<S: Store>(store: &S, user_id: UserId) -> Result<Vec<ServerSummary>> {
    let mut servers = Vec::new();
    for server_id in store.user_server_ids(user_id)? {
        match store.find_server(server_id)? {
            Some(row) => servers.push(row.into()),
            None => warn!("{} lists missing server {}", user_id, server_id),
        }
    }
    Ok(servers)
}

/// Answer to the `initial` command.
pub fn load_initial<S: Store>(
    store: &S,
    viewer: UserId,
    position: InitialPosition,
) -> Result<ServerPayload> {
    let user: UserProfile = store
        .find_user(viewer)?
        .ok_or_else(|| anyhow!("user {} not found", viewer))?
        .into();

    let servers = load_user_servers(store, viewer)?;

    let server = match position {
        InitialPosition::Home => None,
        InitialPosition::Server(server_id) => load_server_infos(store, server_id, viewer)?,
    };

    Ok(ServerPayload::InitialLoad { user, servers, server })
}
