//! Live roster per server, folded out of the event stream.
//!
//! The repository holds durable aggregates; handlers additionally need to
//! know who is on the server right now and on which team (team bonuses,
//! player-count gates). Each pipeline worker owns the sessions for the
//! servers partitioned onto it, so no locking is involved.

use crate::repo::{PlayerId, ServerId};
use events::PlayerRef;
use std::collections::HashMap;

#[derive(Clone, Debug)]
pub struct SessionPlayer {
    pub player_id: PlayerId,
    pub name: String,
    pub team: Option<String>,
    pub is_bot: bool,
}

#[derive(Debug, Default)]
pub struct ServerSession {
    players: HashMap<String, SessionPlayer>,
}

impl ServerSession {
    /// Records or refreshes a sighting of a player, keyed by unique id.
    pub fn observe(&mut self, player: &PlayerRef, player_id: PlayerId) {
        let entry = self
            .players
            .entry(player.unique_id.clone())
            .or_insert_with(|| SessionPlayer {
                player_id,
                name: player.name.clone(),
                team: None,
                is_bot: player.is_bot(),
            });

        entry.player_id = player_id;
        entry.name = player.name.clone();
        if player.team.is_some() {
            entry.team = player.team.clone();
        }
    }

    pub fn set_team(&mut self, unique_id: &str, team: &str) {
        if let Some(player) = self.players.get_mut(unique_id) {
            player.team = Some(team.to_string());
        }
    }

    pub fn remove(&mut self, unique_id: &str) {
        self.players.remove(unique_id);
    }

    pub fn team_members(&self, team: &str) -> Vec<PlayerId> {
        self.players
            .values()
            .filter(|player| player.team.as_deref() == Some(team))
            .map(|player| player.player_id)
            .collect()
    }

    pub fn player_count(&self, ignore_bots: bool) -> u32 {
        self.players
            .values()
            .filter(|player| !(ignore_bots && player.is_bot))
            .count() as u32
    }
}

#[derive(Debug, Default)]
pub struct SessionMap {
    servers: HashMap<ServerId, ServerSession>,
}

impl SessionMap {
    pub fn server(&mut self, server_id: ServerId) -> &mut ServerSession {
        self.servers.entry(server_id).or_default()
    }
}
