//! In-memory reference implementation of the repository port.
//!
//! This is the semantic model the port promises: idempotent upserts,
//! unsigned skill clamped at zero, rank as 1 + strictly-higher count,
//! team-specific action preference, same-day history aggregation, and
//! whole-event transactions with UUID duplicate suppression. Tests run
//! against it as the canonical double.

use crate::geo::GeoPoint;
use crate::repo::{
    ActionRow, ConnectMode, PlayerId, PlayerRow, RepoError, Repository, RepositoryTx, ServerId,
    ServerRow, ServerStatusUpdate, TeamSide, WeaponRow,
};
use rcon::EngineKind;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct HistoryRow {
    pub player_id: PlayerId,
    pub date: Date,
    pub kills: u64,
    pub deaths: u64,
    pub skill: u32,
}

/// One committed record, in commit order. Kept so ordering and idempotence
/// are observable from tests.
#[derive(Clone, Debug)]
pub struct RecordedEvent {
    pub event_id: Uuid,
    pub server_id: ServerId,
    pub kind: &'static str,
}

#[derive(Debug, Default)]
struct Store {
    next_server_id: u64,
    next_player_id: u64,
    servers: HashMap<ServerId, ServerRow>,
    servers_by_addr: HashMap<(String, u16), ServerId>,
    players: HashMap<PlayerId, PlayerRow>,
    players_by_key: HashMap<(String, String), PlayerId>,
    weapons: HashMap<(String, String), WeaponRow>,
    actions: Vec<ActionRow>,
    history: HashMap<(PlayerId, Date), HistoryRow>,
    seen_events: HashSet<Uuid>,
    event_log: Vec<RecordedEvent>,
}

#[derive(Clone, Default)]
pub struct MemoryRepository {
    store: Arc<Mutex<Store>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn store(&self) -> Result<MutexGuard<'_, Store>, RepoError> {
        self.store
            .lock()
            .map_err(|_| RepoError::Fatal("store mutex poisoned".to_string()))
    }

    // Seeding surface for startup and tests; admin tooling owns these rows
    // in production.

    pub fn seed_weapon(&self, game: &str, code: &str, name: &str, modifier: f64) {
        if let Ok(mut store) = self.store() {
            store.weapons.insert(
                (game.to_string(), code.to_string()),
                WeaponRow {
                    game: game.to_string(),
                    code: code.to_string(),
                    name: name.to_string(),
                    modifier,
                    kills: 0,
                    headshots: 0,
                },
            );
        }
    }

    pub fn seed_action(&self, action: ActionRow) {
        if let Ok(mut store) = self.store() {
            store.actions.push(action);
        }
    }

    pub fn set_server_token(&self, server_id: ServerId, hash: [u8; 32], prefix: &str) {
        if let Ok(mut store) = self.store()
            && let Some(server) = store.servers.get_mut(&server_id)
        {
            server.token_hash = Some(hash);
            server.token_prefix = Some(prefix.to_string());
        }
    }

    pub fn set_server_rcon(&self, server_id: ServerId, sealed: &str, engine: EngineKind) {
        if let Ok(mut store) = self.store()
            && let Some(server) = store.servers.get_mut(&server_id)
        {
            server.rcon_sealed = Some(sealed.to_string());
            server.engine = engine;
        }
    }

    pub fn set_server_config(&self, server_id: ServerId, key: &str, value: &str) {
        if let Ok(mut store) = self.store()
            && let Some(server) = store.servers.get_mut(&server_id)
        {
            server.config.insert(key.to_string(), value.to_string());
        }
    }

    pub fn recorded_events(&self) -> Vec<RecordedEvent> {
        self.store()
            .map(|store| store.event_log.clone())
            .unwrap_or_default()
    }

    pub fn history_row(&self, player_id: PlayerId, date: Date) -> Option<HistoryRow> {
        self.store()
            .ok()
            .and_then(|store| store.history.get(&(player_id, date)).cloned())
    }
}

impl Store {
    fn get_or_create_server(&mut self, address: &str, port: u16, game: &str) -> ServerRow {
        let key = (address.to_string(), port);

        if let Some(server_id) = self.servers_by_addr.get(&key)
            && let Some(server) = self.servers.get(server_id)
        {
            return server.clone();
        }

        self.next_server_id += 1;
        let server = ServerRow {
            server_id: self.next_server_id,
            address: address.to_string(),
            port,
            game: game.to_string(),
            name: None,
            engine: EngineKind::GoldSrc,
            connect_mode: ConnectMode::Direct,
            rcon_sealed: None,
            token_hash: None,
            token_prefix: None,
            active_map: String::new(),
            last_event: None,
            geo: None,
            config: HashMap::new(),
            rounds: 0,
            ct_wins: 0,
            t_wins: 0,
            map_rounds: 0,
            map_ct_wins: 0,
            map_t_wins: 0,
            active_players: 0,
            max_players: 0,
        };

        self.servers_by_addr.insert(key, server.server_id);
        self.servers.insert(server.server_id, server.clone());
        server
    }

    fn apply(&mut self, now: OffsetDateTime, op: Op) {
        match op {
            Op::SkillDelta { player, delta } => {
                if let Some(row) = self.players.get_mut(&player) {
                    row.skill = shifted_skill(row.skill, delta);
                    row.last_skill_change = Some(now);
                }
            }
            Op::WeaponStats {
                game,
                code,
                kills,
                headshots,
            } => {
                let row = self
                    .weapons
                    .entry((game.clone(), code.clone()))
                    .or_insert_with(|| WeaponRow {
                        game,
                        name: code.clone(),
                        code,
                        modifier: 1.0,
                        kills: 0,
                        headshots: 0,
                    });
                row.kills += kills;
                row.headshots += headshots;
            }
            Op::Frag { killer, victim } => {
                if let Some(row) = self.players.get_mut(&killer) {
                    row.kills += 1;
                    row.last_event = Some(now);
                }
                if let Some(row) = self.players.get_mut(&victim) {
                    row.deaths += 1;
                    row.last_event = Some(now);
                }
            }
            Op::Suicide { player } => {
                if let Some(row) = self.players.get_mut(&player) {
                    row.deaths += 1;
                    row.last_event = Some(now);
                }
            }
            Op::Teamkill { victim } => {
                if let Some(row) = self.players.get_mut(&victim) {
                    row.deaths += 1;
                    row.last_event = Some(now);
                }
            }
            Op::Reward { player, reward } => {
                if let Some(row) = self.players.get_mut(&player) {
                    row.skill = shifted_skill(row.skill, reward);
                    row.last_skill_change = Some(now);
                }
            }
            Op::Rounds { server } => {
                if let Some(row) = self.servers.get_mut(&server) {
                    row.rounds += 1;
                    row.map_rounds += 1;
                }
            }
            Op::TeamWin { server, side } => {
                if let Some(row) = self.servers.get_mut(&server) {
                    match side {
                        TeamSide::Ct => {
                            row.ct_wins += 1;
                            row.map_ct_wins += 1;
                        }
                        TeamSide::Terrorist => {
                            row.t_wins += 1;
                            row.map_t_wins += 1;
                        }
                    }
                }
            }
            Op::ResetMap {
                server,
                map,
                player_count,
            } => {
                if let Some(row) = self.servers.get_mut(&server) {
                    row.active_map = map;
                    row.map_rounds = 0;
                    row.map_ct_wins = 0;
                    row.map_t_wins = 0;
                    row.active_players = player_count;
                }
            }
            Op::History {
                player,
                date,
                kills,
                deaths,
                skill,
            } => {
                let row = self
                    .history
                    .entry((player, date))
                    .or_insert_with(|| HistoryRow {
                        player_id: player,
                        date,
                        kills: 0,
                        deaths: 0,
                        skill,
                    });
                row.kills += kills;
                row.deaths += deaths;
                row.skill = skill;
            }
            Op::Noop => {}
        }
    }
}

fn shifted_skill(skill: u32, delta: i32) -> u32 {
    u32::try_from((i64::from(skill) + i64::from(delta)).max(0)).unwrap_or(u32::MAX)
}

impl Repository for MemoryRepository {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, RepoError> {
        Ok(MemoryTx {
            store: self.store.clone(),
            event_ids: Vec::new(),
            log: Vec::new(),
            ops: Vec::new(),
        })
    }

    async fn find_or_create_server(
        &self,
        address: &str,
        port: u16,
        game: &str,
    ) -> Result<ServerRow, RepoError> {
        Ok(self.store()?.get_or_create_server(address, port, game))
    }

    async fn find_server_by_addr(
        &self,
        address: &str,
        port: u16,
    ) -> Result<Option<ServerRow>, RepoError> {
        let store = self.store()?;
        Ok(store
            .servers_by_addr
            .get(&(address.to_string(), port))
            .and_then(|id| store.servers.get(id))
            .cloned())
    }

    async fn find_server_by_token_prefix(
        &self,
        prefix: &str,
    ) -> Result<Option<ServerRow>, RepoError> {
        let store = self.store()?;
        Ok(store
            .servers
            .values()
            .find(|server| server.token_prefix.as_deref() == Some(prefix))
            .cloned())
    }

    async fn get_server(&self, server_id: ServerId) -> Result<Option<ServerRow>, RepoError> {
        Ok(self.store()?.servers.get(&server_id).cloned())
    }

    async fn list_servers(&self) -> Result<Vec<ServerRow>, RepoError> {
        Ok(self.store()?.servers.values().cloned().collect())
    }

    async fn update_server_status(
        &self,
        server_id: ServerId,
        update: ServerStatusUpdate,
    ) -> Result<(), RepoError> {
        let mut store = self.store()?;

        if let Some(server) = store.servers.get_mut(&server_id) {
            if update.name.is_some() {
                server.name = update.name;
            }
            if let Some(active) = update.active_players {
                server.active_players = active;
            }
            if let Some(max) = update.max_players {
                server.max_players = max;
            }
        }

        Ok(())
    }

    async fn mark_server_event(
        &self,
        server_id: ServerId,
        at: OffsetDateTime,
    ) -> Result<(), RepoError> {
        if let Some(server) = self.store()?.servers.get_mut(&server_id) {
            server.last_event = Some(at);
        }

        Ok(())
    }

    async fn upsert_player(
        &self,
        game: &str,
        unique_id: &str,
        name: &str,
    ) -> Result<PlayerRow, RepoError> {
        let mut store = self.store()?;
        let key = (game.to_string(), unique_id.to_string());

        if let Some(player_id) = store.players_by_key.get(&key).copied() {
            let row = store
                .players
                .get_mut(&player_id)
                .ok_or_else(|| RepoError::Fatal("player index out of sync".to_string()))?;
            row.name = name.to_string();
            row.last_event = Some(OffsetDateTime::now_utc());
            return Ok(row.clone());
        }

        store.next_player_id += 1;
        let row = PlayerRow {
            player_id: store.next_player_id,
            game: game.to_string(),
            unique_id: unique_id.to_string(),
            name: name.to_string(),
            skill: 1000,
            kills: 0,
            deaths: 0,
            last_event: Some(OffsetDateTime::now_utc()),
            last_skill_change: None,
            geo: None,
        };

        store.players_by_key.insert(key, row.player_id);
        store.players.insert(row.player_id, row.clone());
        Ok(row)
    }

    async fn find_players_by_id(
        &self,
        ids: &[PlayerId],
    ) -> Result<HashMap<PlayerId, PlayerRow>, RepoError> {
        let store = self.store()?;
        Ok(ids
            .iter()
            .filter_map(|id| store.players.get(id).map(|row| (*id, row.clone())))
            .collect())
    }

    async fn get_player_skill(&self, player_id: PlayerId) -> Result<Option<u32>, RepoError> {
        Ok(self.store()?.players.get(&player_id).map(|row| row.skill))
    }

    async fn get_player_rank(&self, player_id: PlayerId) -> Result<Option<u64>, RepoError> {
        let store = self.store()?;

        let Some(target) = store.players.get(&player_id) else {
            return Ok(None);
        };

        let higher = store
            .players
            .values()
            .filter(|row| row.skill > target.skill)
            .count() as u64;

        Ok(Some(1 + higher))
    }

    async fn update_player_geo(&self, player_id: PlayerId, geo: GeoPoint) -> Result<(), RepoError> {
        if let Some(row) = self.store()?.players.get_mut(&player_id) {
            row.geo = Some(geo);
        }

        Ok(())
    }

    async fn find_action(
        &self,
        game: &str,
        code: &str,
        team: Option<&str>,
    ) -> Result<Option<ActionRow>, RepoError> {
        let store = self.store()?;
        let matching = |row: &&ActionRow| row.game == game && row.code == code;

        if let Some(team) = team {
            // The team-specific row wins over the team-blank row.
            let specific = store
                .actions
                .iter()
                .filter(matching)
                .find(|row| row.team.as_deref() == Some(team));

            if specific.is_some() {
                return Ok(specific.cloned());
            }
        }

        Ok(store
            .actions
            .iter()
            .filter(matching)
            .find(|row| row.team.is_none())
            .cloned())
    }

    async fn find_weapon(&self, game: &str, code: &str) -> Result<Option<WeaponRow>, RepoError> {
        Ok(self
            .store()?
            .weapons
            .get(&(game.to_string(), code.to_string()))
            .cloned())
    }
}

#[derive(Debug)]
enum Op {
    SkillDelta { player: PlayerId, delta: i32 },
    WeaponStats {
        game: String,
        code: String,
        kills: u64,
        headshots: u64,
    },
    Frag { killer: PlayerId, victim: PlayerId },
    Suicide { player: PlayerId },
    Teamkill { victim: PlayerId },
    Reward { player: PlayerId, reward: i32 },
    Rounds { server: ServerId },
    TeamWin { server: ServerId, side: TeamSide },
    ResetMap {
        server: ServerId,
        map: String,
        player_count: u32,
    },
    History {
        player: PlayerId,
        date: Date,
        kills: u64,
        deaths: u64,
        skill: u32,
    },
    Noop,
}

/// Buffers ops until `commit`, then applies them under one store lock. A
/// batch whose event UUID was committed before is dropped whole, which is
/// what makes at-least-once replay safe.
pub struct MemoryTx {
    store: Arc<Mutex<Store>>,
    event_ids: Vec<Uuid>,
    log: Vec<RecordedEvent>,
    ops: Vec<Op>,
}

impl MemoryTx {
    fn record(&mut self, event_id: Uuid, server_id: ServerId, kind: &'static str, op: Op) {
        self.event_ids.push(event_id);
        self.log.push(RecordedEvent {
            event_id,
            server_id,
            kind,
        });
        self.ops.push(op);
    }
}

impl RepositoryTx for MemoryTx {
    async fn apply_skill_delta(&mut self, player_id: PlayerId, delta: i32) -> Result<(), RepoError> {
        self.ops.push(Op::SkillDelta {
            player: player_id,
            delta,
        });
        Ok(())
    }

    async fn upsert_weapon_stats(
        &mut self,
        game: &str,
        code: &str,
        kills: u64,
        headshots: u64,
    ) -> Result<(), RepoError> {
        self.ops.push(Op::WeaponStats {
            game: game.to_string(),
            code: code.to_string(),
            kills,
            headshots,
        });
        Ok(())
    }

    async fn record_frag(
        &mut self,
        event_id: Uuid,
        server_id: ServerId,
        killer: PlayerId,
        victim: PlayerId,
        _map: &str,
        _weapon: &str,
        _headshot: bool,
    ) -> Result<(), RepoError> {
        self.record(event_id, server_id, "frag", Op::Frag { killer, victim });
        Ok(())
    }

    async fn record_suicide(
        &mut self,
        event_id: Uuid,
        server_id: ServerId,
        player: PlayerId,
        _weapon: &str,
    ) -> Result<(), RepoError> {
        self.record(event_id, server_id, "suicide", Op::Suicide { player });
        Ok(())
    }

    async fn record_teamkill(
        &mut self,
        event_id: Uuid,
        server_id: ServerId,
        _killer: PlayerId,
        victim: PlayerId,
        _weapon: &str,
    ) -> Result<(), RepoError> {
        self.record(event_id, server_id, "teamkill", Op::Teamkill { victim });
        Ok(())
    }

    async fn record_chat(
        &mut self,
        event_id: Uuid,
        server_id: ServerId,
        _player: PlayerId,
        _message: &str,
        _is_dead: bool,
    ) -> Result<(), RepoError> {
        self.record(event_id, server_id, "chat", Op::Noop);
        Ok(())
    }

    async fn record_connect(
        &mut self,
        event_id: Uuid,
        server_id: ServerId,
        _player: PlayerId,
        _address: &str,
    ) -> Result<(), RepoError> {
        self.record(event_id, server_id, "connect", Op::Noop);
        Ok(())
    }

    async fn record_disconnect(
        &mut self,
        event_id: Uuid,
        server_id: ServerId,
        _player: PlayerId,
    ) -> Result<(), RepoError> {
        self.record(event_id, server_id, "disconnect", Op::Noop);
        Ok(())
    }

    async fn record_action(
        &mut self,
        event_id: Uuid,
        server_id: ServerId,
        player: PlayerId,
        _target: Option<PlayerId>,
        _code: &str,
        reward: i32,
    ) -> Result<(), RepoError> {
        self.record(event_id, server_id, "action", Op::Reward { player, reward });
        Ok(())
    }

    async fn record_team_bonus_batch(
        &mut self,
        event_id: Uuid,
        server_id: ServerId,
        _code: &str,
        rewards: Vec<(PlayerId, i32)>,
    ) -> Result<(), RepoError> {
        self.record(event_id, server_id, "team_bonus", Op::Noop);
        for (player, reward) in rewards {
            self.ops.push(Op::Reward { player, reward });
        }
        Ok(())
    }

    async fn record_world_action(
        &mut self,
        event_id: Uuid,
        server_id: ServerId,
        _code: &str,
    ) -> Result<(), RepoError> {
        self.record(event_id, server_id, "world_action", Op::Noop);
        Ok(())
    }

    async fn increment_server_rounds(&mut self, server_id: ServerId) -> Result<(), RepoError> {
        self.ops.push(Op::Rounds { server: server_id });
        Ok(())
    }

    async fn update_team_wins(
        &mut self,
        server_id: ServerId,
        side: TeamSide,
    ) -> Result<(), RepoError> {
        self.ops.push(Op::TeamWin {
            server: server_id,
            side,
        });
        Ok(())
    }

    async fn reset_map_stats(
        &mut self,
        server_id: ServerId,
        new_map: &str,
        player_count: u32,
    ) -> Result<(), RepoError> {
        self.ops.push(Op::ResetMap {
            server: server_id,
            map: new_map.to_string(),
            player_count,
        });
        Ok(())
    }

    async fn create_player_history(
        &mut self,
        player_id: PlayerId,
        date: Date,
        kills: u64,
        deaths: u64,
        skill: u32,
    ) -> Result<(), RepoError> {
        self.ops.push(Op::History {
            player: player_id,
            date,
            kills,
            deaths,
            skill,
        });
        Ok(())
    }

    async fn commit(self) -> Result<(), RepoError> {
        let mut store = self
            .store
            .lock()
            .map_err(|_| RepoError::Fatal("store mutex poisoned".to_string()))?;

        if self
            .event_ids
            .iter()
            .any(|id| store.seen_events.contains(id))
        {
            // Replay of an already-committed event.
            return Ok(());
        }

        let now = OffsetDateTime::now_utc();

        for op in self.ops {
            store.apply(now, op);
        }

        store.seen_events.extend(self.event_ids);
        store.event_log.extend(self.log);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn repo() -> MemoryRepository {
        MemoryRepository::new()
    }

    #[tokio::test]
    async fn upsert_player_is_idempotent_and_tracks_last_name() {
        let repo = repo();

        let first = repo.upsert_player("cstrike", "STEAM_1:0:111", "Joe").await.unwrap();
        let second = repo.upsert_player("cstrike", "STEAM_1:0:111", "Moe").await.unwrap();

        assert_eq!(first.player_id, second.player_id);
        assert_eq!(second.name, "Moe");
        assert_eq!(second.skill, 1000);

        let all = repo.find_players_by_id(&[first.player_id]).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[&first.player_id].name, "Moe");
    }

    #[tokio::test]
    async fn skill_never_goes_below_zero() {
        let repo = repo();
        let player = repo.upsert_player("cstrike", "STEAM_1:0:111", "Joe").await.unwrap();

        for delta in [-400, -400, -400, 50, -100] {
            let mut tx = repo.begin().await.unwrap();
            tx.apply_skill_delta(player.player_id, delta).await.unwrap();
            tx.commit().await.unwrap();
        }

        assert_eq!(repo.get_player_skill(player.player_id).await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn rank_counts_strictly_higher_players() {
        let repo = repo();
        let a = repo.upsert_player("cstrike", "A", "a").await.unwrap();
        let b = repo.upsert_player("cstrike", "B", "b").await.unwrap();
        let c = repo.upsert_player("cstrike", "C", "c").await.unwrap();

        let mut tx = repo.begin().await.unwrap();
        tx.apply_skill_delta(a.player_id, 100).await.unwrap();
        tx.apply_skill_delta(b.player_id, 50).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(repo.get_player_rank(a.player_id).await.unwrap(), Some(1));
        assert_eq!(repo.get_player_rank(b.player_id).await.unwrap(), Some(2));
        assert_eq!(repo.get_player_rank(c.player_id).await.unwrap(), Some(3));
        assert_eq!(repo.get_player_rank(999).await.unwrap(), None);
    }

    #[tokio::test]
    async fn concurrent_server_creation_observes_one_insert() {
        let repo = repo();

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let repo = repo.clone();
            tasks.push(tokio::spawn(async move {
                repo.find_or_create_server("203.0.113.9", 27015, "cstrike").await
            }));
        }

        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap().unwrap().server_id);
        }

        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(repo.list_servers().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn team_specific_action_is_preferred() {
        let repo = repo();
        let blank = ActionRow {
            game: "cstrike".to_string(),
            code: "Target_Bombed".to_string(),
            team: None,
            reward_player: 2,
            reward_team: 1,
            for_player: true,
            for_player_player: false,
            for_team: true,
            for_world: false,
        };
        let specific = ActionRow {
            team: Some("TERRORIST".to_string()),
            reward_player: 5,
            ..blank.clone()
        };

        repo.seed_action(blank);
        repo.seed_action(specific);

        let hit = repo
            .find_action("cstrike", "Target_Bombed", Some("TERRORIST"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.reward_player, 5);

        let fallback = repo
            .find_action("cstrike", "Target_Bombed", Some("CT"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fallback.reward_player, 2);

        let blank_only = repo
            .find_action("cstrike", "Target_Bombed", None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(blank_only.team, None);
    }

    #[tokio::test]
    async fn same_day_history_rows_aggregate() {
        let repo = repo();
        let player = repo.upsert_player("cstrike", "STEAM_1:0:111", "Joe").await.unwrap();
        let day = date!(2024 - 07 - 15);

        let mut tx = repo.begin().await.unwrap();
        tx.create_player_history(player.player_id, day, 1, 0, 1020).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = repo.begin().await.unwrap();
        tx.create_player_history(player.player_id, day, 2, 1, 1005).await.unwrap();
        tx.commit().await.unwrap();

        let row = repo.history_row(player.player_id, day).unwrap();
        assert_eq!(row.kills, 3);
        assert_eq!(row.deaths, 1);
        assert_eq!(row.skill, 1005);
    }

    #[tokio::test]
    async fn duplicate_event_commits_are_suppressed() {
        let repo = repo();
        let killer = repo.upsert_player("cstrike", "K", "k").await.unwrap();
        let victim = repo.upsert_player("cstrike", "V", "v").await.unwrap();
        let event_id = Uuid::new_v4();

        for _ in 0..2 {
            let mut tx = repo.begin().await.unwrap();
            tx.record_frag(event_id, 1, killer.player_id, victim.player_id, "de_dust2", "ak47", true)
                .await
                .unwrap();
            tx.apply_skill_delta(killer.player_id, 20).await.unwrap();
            tx.commit().await.unwrap();
        }

        let rows = repo.find_players_by_id(&[killer.player_id]).await.unwrap();
        assert_eq!(rows[&killer.player_id].kills, 1);
        assert_eq!(rows[&killer.player_id].skill, 1020);
        assert_eq!(repo.recorded_events().len(), 1);
    }

    #[tokio::test]
    async fn uncommitted_transactions_change_nothing() {
        let repo = repo();
        let player = repo.upsert_player("cstrike", "STEAM_1:0:111", "Joe").await.unwrap();

        let mut tx = repo.begin().await.unwrap();
        tx.apply_skill_delta(player.player_id, 500).await.unwrap();
        drop(tx);

        assert_eq!(
            repo.get_player_skill(player.player_id).await.unwrap(),
            Some(1000)
        );
    }

    #[tokio::test]
    async fn reset_map_stats_zeroes_map_counters() {
        let repo = repo();
        let server = repo
            .find_or_create_server("203.0.113.9", 27015, "cstrike")
            .await
            .unwrap();

        let mut tx = repo.begin().await.unwrap();
        tx.increment_server_rounds(server.server_id).await.unwrap();
        tx.update_team_wins(server.server_id, TeamSide::Ct).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = repo.begin().await.unwrap();
        tx.reset_map_stats(server.server_id, "de_inferno", 9).await.unwrap();
        tx.commit().await.unwrap();

        let row = repo.get_server(server.server_id).await.unwrap().unwrap();
        assert_eq!(row.active_map, "de_inferno");
        assert_eq!(row.map_rounds, 0);
        assert_eq!(row.map_ct_wins, 0);
        assert_eq!(row.map_t_wins, 0);
        assert_eq!(row.active_players, 9);
        // Lifetime counters survive the map change.
        assert_eq!(row.rounds, 1);
        assert_eq!(row.ct_wins, 1);
    }
}
