//! The handler chain: resolve identities, enrich, score, persist, notify.
//!
//! Dispatch is a match over the event sum, so adding a variant without a
//! handler is a compile error. Every handler persists its event's writes in
//! a single repository transaction; notification happens after the commit
//! and can only log, never roll back.

mod action;
mod chat;
mod kill;
mod player;
mod status;

use crate::geo::GeoLookup;
use crate::metrics::Metrics;
use crate::notify::Notifier;
use crate::repo::{PlayerRow, RepoError, Repository, ServerRow};
use crate::session::{ServerSession, SessionMap};
use crate::skill::SkillConfig;
use events::{Event, EventKind, PlayerRef};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Repo(#[from] RepoError),
}

impl HandlerError {
    /// Worth exactly one retry before the event is dead-lettered.
    pub fn is_transient(&self) -> bool {
        matches!(self, HandlerError::Repo(RepoError::Transient(_)))
    }
}

/// Everything a handler needs, shared across workers.
pub struct HandlerCtx<R: Repository> {
    pub repo: R,
    pub notifier: Notifier,
    pub metrics: Arc<Metrics>,
    pub skill: SkillConfig,
    pub weapons: WeaponCache<R>,
    pub geo: Arc<dyn GeoLookup>,
}

impl<R: Repository> Clone for HandlerCtx<R> {
    fn clone(&self) -> Self {
        Self {
            repo: self.repo.clone(),
            notifier: self.notifier.clone(),
            metrics: self.metrics.clone(),
            skill: self.skill,
            weapons: self.weapons.clone(),
            geo: self.geo.clone(),
        }
    }
}

/// Weapon modifiers change rarely and the table is tiny; a short-TTL cache
/// keeps the per-kill lookup off the hot path.
pub struct WeaponCache<R> {
    repo: R,
    ttl: Duration,
    entries: Arc<Mutex<HashMap<(String, String), (f64, Instant)>>>,
}

impl<R: Clone> Clone for WeaponCache<R> {
    fn clone(&self) -> Self {
        Self {
            repo: self.repo.clone(),
            ttl: self.ttl,
            entries: self.entries.clone(),
        }
    }
}

impl<R: Repository> WeaponCache<R> {
    pub fn new(repo: R, ttl: Duration) -> Self {
        Self {
            repo,
            ttl,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The weapon's skill modifier; unknown weapons are worth 1.0.
    pub async fn modifier(&self, game: &str, code: &str) -> Result<f64, RepoError> {
        let key = (game.to_string(), code.to_string());
        let now = Instant::now();

        if let Ok(entries) = self.entries.lock()
            && let Some((modifier, cached_at)) = entries.get(&key)
            && now.duration_since(*cached_at) < self.ttl
        {
            return Ok(*modifier);
        }

        let modifier = self
            .repo
            .find_weapon(game, code)
            .await?
            .map(|weapon| weapon.modifier)
            .unwrap_or(1.0);

        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key, (modifier, now));
        }

        Ok(modifier)
    }
}

pub async fn handle_event<R: Repository>(
    ctx: &HandlerCtx<R>,
    sessions: &mut SessionMap,
    event: &Event,
) -> Result<(), HandlerError> {
    let Some(server) = ctx.repo.get_server(event.server_id).await? else {
        warn!(server_id = event.server_id, "event for unknown server dropped");
        return Ok(());
    };

    // Synthetic status events must not refresh the activity clock, or the
    // scraper would keep dead servers alive forever.
    if !matches!(event.kind, EventKind::ServerStatus(_)) {
        ctx.repo
            .mark_server_event(server.server_id, event.timestamp.assume_utc())
            .await?;
    }

    let session = sessions.server(server.server_id);

    match &event.kind {
        EventKind::PlayerKill {
            killer,
            victim,
            weapon,
            headshot,
        } => kill::kill(ctx, session, &server, event, killer, victim, weapon, *headshot).await,
        EventKind::PlayerTeamkill {
            killer,
            victim,
            weapon,
            ..
        } => kill::teamkill(ctx, session, &server, event, killer, victim, weapon).await,
        EventKind::PlayerSuicide { player, weapon } => {
            kill::suicide(ctx, session, &server, event, player, weapon).await
        }
        EventKind::PlayerConnect { player, address } => {
            player::connect(ctx, session, &server, event, player, address).await
        }
        EventKind::PlayerDisconnect { player, .. } => {
            player::disconnect(ctx, session, &server, event, player).await
        }
        EventKind::PlayerEntry { player } => {
            player::entry(ctx, session, &server, player).await
        }
        EventKind::PlayerChangeTeam { player, team } => {
            player::change_team(ctx, session, &server, player, team).await
        }
        EventKind::PlayerChangeName { player, new_name } => {
            player::change_name(ctx, session, &server, player, new_name).await
        }
        EventKind::ChatMessage {
            player,
            message,
            is_dead,
        } => chat::chat(ctx, session, &server, event, player, message, *is_dead).await,
        EventKind::PlayerAction { player, action } => {
            action::player_action(ctx, session, &server, event, player, action).await
        }
        EventKind::PlayerPlayerAction {
            player,
            target,
            action,
        } => action::player_player_action(ctx, session, &server, event, player, target, action).await,
        EventKind::TeamAction { team, action } => {
            action::team_action(ctx, session, &server, event, team, action).await
        }
        EventKind::WorldAction { action } => {
            action::world_action(ctx, &server, event, action).await
        }
        EventKind::RoundStart => Ok(()),
        EventKind::RoundEnd => action::round_end(ctx, &server).await,
        EventKind::MapChange { map } => {
            action::map_change(ctx, session, &server, map).await
        }
        EventKind::ServerStatus(snapshot) => {
            status::server_status(ctx, &server, snapshot).await
        }
    }
}

/// Resolve step shared by every player-bearing handler: upsert the row and
/// refresh the live roster.
async fn resolve<R: Repository>(
    ctx: &HandlerCtx<R>,
    session: &mut ServerSession,
    server: &ServerRow,
    player: &PlayerRef,
) -> Result<PlayerRow, RepoError> {
    let row = ctx
        .repo
        .upsert_player(&server.game, &player.unique_id, &player.name)
        .await?;
    session.observe(player, row.player_id);
    Ok(row)
}

/// A skill value after a delta, with the unsigned floor applied.
fn skill_after(skill: u32, delta: i32) -> u32 {
    u32::try_from((i64::from(skill) + i64::from(delta)).max(0)).unwrap_or(u32::MAX)
}
