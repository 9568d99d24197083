//! Roster events: connect, disconnect, entry, team and name changes.

use crate::config::ServerConfig;
use crate::handlers::{HandlerCtx, HandlerError, resolve};
use crate::notify::{Templates, render};
use crate::repo::{Repository, RepositoryTx, ServerRow};
use crate::session::ServerSession;
use events::{Event, PlayerRef};
use tracing::warn;

pub async fn connect<R: Repository>(
    ctx: &HandlerCtx<R>,
    session: &mut ServerSession,
    server: &ServerRow,
    event: &Event,
    player: &PlayerRef,
    address: &str,
) -> Result<(), HandlerError> {
    let row = resolve(ctx, session, server, player).await?;

    // Best-effort geo enrichment from the connecting address.
    if let Some(ip) = address
        .rsplit_once(':')
        .map(|(host, _)| host)
        .and_then(|host| host.parse().ok())
        && let Some(point) = ctx.geo.lookup(ip)
    {
        ctx.repo.update_player_geo(row.player_id, point).await?;
    }

    let mut tx = ctx.repo.begin().await?;
    tx.record_connect(event.event_id, server.server_id, row.player_id, address)
        .await?;
    tx.commit().await?;

    let message = render(
        &Templates::for_server(&ServerConfig(&server.config)).connect,
        &[("playerName", row.name.clone())],
    );
    ctx.notifier.say(server.server_id, message);

    Ok(())
}

pub async fn disconnect<R: Repository>(
    ctx: &HandlerCtx<R>,
    session: &mut ServerSession,
    server: &ServerRow,
    event: &Event,
    player: &PlayerRef,
) -> Result<(), HandlerError> {
    let row = resolve(ctx, session, server, player).await?;

    let mut tx = ctx.repo.begin().await?;
    tx.record_disconnect(event.event_id, server.server_id, row.player_id)
        .await?;
    tx.commit().await?;

    session.remove(&player.unique_id);

    let rank = match ctx.repo.get_player_rank(row.player_id).await {
        Ok(rank) => rank,
        Err(err) => {
            warn!(%err, "rank lookup failed, announcing without it");
            None
        }
    };

    let message = render(
        &Templates::for_server(&ServerConfig(&server.config)).disconnect,
        &[
            ("playerName", row.name.clone()),
            ("playerRank", rank.map(|r| r.to_string()).unwrap_or_default()),
        ],
    );
    ctx.notifier.say(server.server_id, message);

    Ok(())
}

pub async fn entry<R: Repository>(
    ctx: &HandlerCtx<R>,
    session: &mut ServerSession,
    server: &ServerRow,
    player: &PlayerRef,
) -> Result<(), HandlerError> {
    resolve(ctx, session, server, player).await?;
    Ok(())
}

pub async fn change_team<R: Repository>(
    ctx: &HandlerCtx<R>,
    session: &mut ServerSession,
    server: &ServerRow,
    player: &PlayerRef,
    team: &str,
) -> Result<(), HandlerError> {
    resolve(ctx, session, server, player).await?;
    session.set_team(&player.unique_id, team);
    Ok(())
}

pub async fn change_name<R: Repository>(
    ctx: &HandlerCtx<R>,
    session: &mut ServerSession,
    server: &ServerRow,
    player: &PlayerRef,
    new_name: &str,
) -> Result<(), HandlerError> {
    // The row keys on unique id; the display name simply follows the most
    // recent observation.
    let renamed = PlayerRef {
        name: new_name.to_string(),
        ..player.clone()
    };
    resolve(ctx, session, server, &renamed).await?;
    Ok(())
}
