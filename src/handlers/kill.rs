//! Kill, teamkill, and suicide handling: the only handlers that run the
//! skill scorer.

use crate::config::ServerConfig;
use crate::handlers::{HandlerCtx, HandlerError, resolve, skill_after};
use crate::notify::{Templates, format_points, render};
use crate::repo::{PlayerRow, Repository, RepositoryTx, ServerRow};
use crate::session::ServerSession;
use crate::skill::{self, KillOutcome};
use events::{Event, PlayerRef};
use tracing::warn;

pub async fn kill<R: Repository>(
    ctx: &HandlerCtx<R>,
    session: &mut ServerSession,
    server: &ServerRow,
    event: &Event,
    killer: &PlayerRef,
    victim: &PlayerRef,
    weapon: &str,
    headshot: bool,
) -> Result<(), HandlerError> {
    let killer_row = resolve(ctx, session, server, killer).await?;
    let victim_row = resolve(ctx, session, server, victim).await?;

    let config = ServerConfig(&server.config);
    let modifier = ctx.weapons.modifier(&server.game, weapon).await?;

    // Below the player threshold kills are recorded but move no skill.
    let scored = session.player_count(config.ignore_bots()) >= config.min_players();
    let outcome = if scored {
        skill::score_kill(
            &ctx.skill,
            killer_row.skill,
            killer_row.games(),
            victim_row.skill,
            modifier,
            headshot,
            config.skill_max_change(ctx.skill.default_max_change),
        )
    } else {
        KillOutcome {
            killer_delta: 0,
            victim_delta: 0,
        }
    };

    let date = event.timestamp.date();
    let mut tx = ctx.repo.begin().await?;
    tx.record_frag(
        event.event_id,
        server.server_id,
        killer_row.player_id,
        victim_row.player_id,
        &server.active_map,
        weapon,
        headshot,
    )
    .await?;
    tx.apply_skill_delta(killer_row.player_id, outcome.killer_delta)
        .await?;
    tx.apply_skill_delta(victim_row.player_id, outcome.victim_delta)
        .await?;
    tx.upsert_weapon_stats(&server.game, weapon, 1, u64::from(headshot))
        .await?;
    tx.create_player_history(
        killer_row.player_id,
        date,
        1,
        0,
        skill_after(killer_row.skill, outcome.killer_delta),
    )
    .await?;
    tx.create_player_history(
        victim_row.player_id,
        date,
        0,
        1,
        skill_after(victim_row.skill, outcome.victim_delta),
    )
    .await?;
    tx.commit().await?;

    announce_kill(ctx, server, &killer_row, &victim_row, outcome.killer_delta).await;
    Ok(())
}

pub async fn teamkill<R: Repository>(
    ctx: &HandlerCtx<R>,
    session: &mut ServerSession,
    server: &ServerRow,
    event: &Event,
    killer: &PlayerRef,
    victim: &PlayerRef,
    weapon: &str,
) -> Result<(), HandlerError> {
    let killer_row = resolve(ctx, session, server, killer).await?;
    let victim_row = resolve(ctx, session, server, victim).await?;

    // Flat penalties, no Elo, and no weapon-stat path: teamkills are
    // tracked apart from frags.
    let outcome = skill::teamkill(&ctx.skill);

    let date = event.timestamp.date();
    let mut tx = ctx.repo.begin().await?;
    tx.record_teamkill(
        event.event_id,
        server.server_id,
        killer_row.player_id,
        victim_row.player_id,
        weapon,
    )
    .await?;
    tx.apply_skill_delta(killer_row.player_id, outcome.killer_delta)
        .await?;
    tx.apply_skill_delta(victim_row.player_id, outcome.victim_delta)
        .await?;
    tx.create_player_history(
        victim_row.player_id,
        date,
        0,
        1,
        skill_after(victim_row.skill, outcome.victim_delta),
    )
    .await?;
    tx.commit().await?;

    let message = render(
        &Templates::for_server(&ServerConfig(&server.config)).teamkill,
        &[
            ("killerName", killer_row.name.clone()),
            ("points", format_points(outcome.killer_delta)),
            ("victimName", victim_row.name.clone()),
        ],
    );
    ctx.notifier.say(server.server_id, message);

    Ok(())
}

pub async fn suicide<R: Repository>(
    ctx: &HandlerCtx<R>,
    session: &mut ServerSession,
    server: &ServerRow,
    event: &Event,
    player: &PlayerRef,
    weapon: &str,
) -> Result<(), HandlerError> {
    let row = resolve(ctx, session, server, player).await?;
    let delta = skill::suicide(&ctx.skill);

    let mut tx = ctx.repo.begin().await?;
    tx.record_suicide(event.event_id, server.server_id, row.player_id, weapon)
        .await?;
    tx.apply_skill_delta(row.player_id, delta).await?;
    tx.create_player_history(
        row.player_id,
        event.timestamp.date(),
        0,
        1,
        skill_after(row.skill, delta),
    )
    .await?;
    tx.commit().await?;

    let rank = match ctx.repo.get_player_rank(row.player_id).await {
        Ok(rank) => rank,
        Err(err) => {
            warn!(%err, "rank lookup failed, announcing without it");
            None
        }
    };

    let message = render(
        &Templates::for_server(&ServerConfig(&server.config)).suicide,
        &[
            ("playerName", row.name.clone()),
            ("playerRank", rank.map(|r| r.to_string()).unwrap_or_default()),
            ("points", format_points(delta)),
        ],
    );
    ctx.notifier.say(server.server_id, message);

    Ok(())
}

/// One canonical announcement per kill; headshots change the points, never
/// the message count.
async fn announce_kill<R: Repository>(
    ctx: &HandlerCtx<R>,
    server: &ServerRow,
    killer: &PlayerRow,
    victim: &PlayerRow,
    points: i32,
) {
    let ranks = async {
        let killer_rank = ctx.repo.get_player_rank(killer.player_id).await?;
        let victim_rank = ctx.repo.get_player_rank(victim.player_id).await?;
        Ok::<_, crate::repo::RepoError>((killer_rank, victim_rank))
    };

    let (killer_rank, victim_rank) = match ranks.await {
        Ok(ranks) => ranks,
        Err(err) => {
            warn!(%err, "rank lookup failed, announcing without ranks");
            (None, None)
        }
    };

    let message = render(
        &Templates::for_server(&ServerConfig(&server.config)).kill,
        &[
            ("killerName", killer.name.clone()),
            (
                "killerRank",
                killer_rank.map(|r| r.to_string()).unwrap_or_default(),
            ),
            ("points", format_points(points)),
            ("victimName", victim.name.clone()),
            (
                "victimRank",
                victim_rank.map(|r| r.to_string()).unwrap_or_default(),
            ),
        ],
    );

    ctx.notifier.say(server.server_id, message);
}
