//! Trigger events: player, player-vs-player, team, world, rounds, and map
//! changes.

use crate::config::ServerConfig;
use crate::handlers::{HandlerCtx, HandlerError, resolve};
use crate::notify::{Templates, format_points, render};
use crate::repo::{Repository, RepositoryTx, ServerRow, TeamSide};
use crate::session::ServerSession;
use events::{Event, PlayerRef};
use tracing::{debug, info};

pub async fn player_action<R: Repository>(
    ctx: &HandlerCtx<R>,
    session: &mut ServerSession,
    server: &ServerRow,
    event: &Event,
    player: &PlayerRef,
    code: &str,
) -> Result<(), HandlerError> {
    let row = resolve(ctx, session, server, player).await?;

    let Some(action) = ctx
        .repo
        .find_action(&server.game, code, player.team.as_deref())
        .await?
    else {
        debug!(code, "unconfigured action ignored");
        return Ok(());
    };

    if !action.for_player {
        return Ok(());
    }

    let mut tx = ctx.repo.begin().await?;
    tx.record_action(
        event.event_id,
        server.server_id,
        row.player_id,
        None,
        code,
        action.reward_player,
    )
    .await?;
    tx.commit().await?;

    let message = render(
        &Templates::for_server(&ServerConfig(&server.config)).action,
        &[
            ("playerName", row.name.clone()),
            ("points", format_points(action.reward_player)),
            ("action", code.to_string()),
        ],
    );
    ctx.notifier.say(server.server_id, message);

    Ok(())
}

pub async fn player_player_action<R: Repository>(
    ctx: &HandlerCtx<R>,
    session: &mut ServerSession,
    server: &ServerRow,
    event: &Event,
    player: &PlayerRef,
    target: &PlayerRef,
    code: &str,
) -> Result<(), HandlerError> {
    let row = resolve(ctx, session, server, player).await?;
    let target_row = resolve(ctx, session, server, target).await?;

    let Some(action) = ctx
        .repo
        .find_action(&server.game, code, player.team.as_deref())
        .await?
    else {
        debug!(code, "unconfigured action ignored");
        return Ok(());
    };

    if !action.for_player_player {
        return Ok(());
    }

    let mut tx = ctx.repo.begin().await?;
    tx.record_action(
        event.event_id,
        server.server_id,
        row.player_id,
        Some(target_row.player_id),
        code,
        action.reward_player,
    )
    .await?;
    tx.commit().await?;

    let message = render(
        &Templates::for_server(&ServerConfig(&server.config)).action,
        &[
            ("playerName", row.name.clone()),
            ("points", format_points(action.reward_player)),
            ("action", code.to_string()),
        ],
    );
    ctx.notifier.say(server.server_id, message);

    Ok(())
}

pub async fn team_action<R: Repository>(
    ctx: &HandlerCtx<R>,
    session: &mut ServerSession,
    server: &ServerRow,
    event: &Event,
    team: &str,
    code: &str,
) -> Result<(), HandlerError> {
    let Some(action) = ctx
        .repo
        .find_action(&server.game, code, Some(team))
        .await?
    else {
        debug!(code, team, "unconfigured team action ignored");
        return Ok(());
    };

    if !action.for_team {
        return Ok(());
    }

    let config = ServerConfig(&server.config);
    let rewards: Vec<_> = session
        .team_members(team)
        .into_iter()
        .map(|player_id| (player_id, action.reward_team))
        .collect();

    let mut tx = ctx.repo.begin().await?;
    tx.record_team_bonus_batch(event.event_id, server.server_id, code, rewards)
        .await?;

    if config.enable_map_stats()
        && code.contains("Win")
        && let Some(side) = TeamSide::from_team(team)
    {
        tx.update_team_wins(server.server_id, side).await?;
    }

    tx.commit().await?;

    let message = render(
        &Templates::for_server(&config).team,
        &[
            ("team", team.to_string()),
            ("points", format_points(action.reward_team)),
            ("action", code.to_string()),
        ],
    );
    ctx.notifier.say(server.server_id, message);

    Ok(())
}

pub async fn world_action<R: Repository>(
    ctx: &HandlerCtx<R>,
    server: &ServerRow,
    event: &Event,
    code: &str,
) -> Result<(), HandlerError> {
    let mut tx = ctx.repo.begin().await?;
    tx.record_world_action(event.event_id, server.server_id, code)
        .await?;
    tx.commit().await?;
    Ok(())
}

pub async fn round_end<R: Repository>(
    ctx: &HandlerCtx<R>,
    server: &ServerRow,
) -> Result<(), HandlerError> {
    if !ServerConfig(&server.config).enable_map_stats() {
        return Ok(());
    }

    let mut tx = ctx.repo.begin().await?;
    tx.increment_server_rounds(server.server_id).await?;
    tx.commit().await?;
    Ok(())
}

pub async fn map_change<R: Repository>(
    ctx: &HandlerCtx<R>,
    session: &mut ServerSession,
    server: &ServerRow,
    map: &str,
) -> Result<(), HandlerError> {
    if map == server.active_map {
        return Ok(());
    }

    let config = ServerConfig(&server.config);
    let player_count = session.player_count(config.ignore_bots());

    let mut tx = ctx.repo.begin().await?;
    tx.reset_map_stats(server.server_id, map, player_count).await?;
    tx.commit().await?;

    info!(
        server_id = server.server_id,
        from = %server.active_map,
        to = map,
        "map changed"
    );

    Ok(())
}
