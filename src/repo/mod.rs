//! Storage port for the pipeline.
//!
//! The pipeline never sees a database; it sees these two traits. Lookups
//! and idempotent upserts live on [Repository]; every mutation belonging to
//! one event goes through a [RepositoryTx] so that the whole event commits
//! or none of it does. Records carry the event UUID, which implementations
//! use to suppress duplicates on replay.

pub mod memory;

pub use memory::MemoryRepository;

use crate::geo::GeoPoint;
use rcon::EngineKind;
use std::collections::HashMap;
use std::future::Future;
use thiserror::Error;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

pub type ServerId = u64;
pub type PlayerId = u64;

#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RepoError {
    /// Worth one retry; the workers dead-letter the event afterwards.
    #[error("transient storage error: {0}")]
    Transient(String),

    /// Insert lost a unique-constraint race; the caller re-reads.
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("storage error: {0}")]
    Fatal(String),
}

/// The two sides whose round wins are tracked.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TeamSide {
    Ct,
    Terrorist,
}

impl TeamSide {
    pub fn from_team(team: &str) -> Option<Self> {
        match team {
            "CT" => Some(TeamSide::Ct),
            "TERRORIST" => Some(TeamSide::Terrorist),
            _ => None,
        }
    }
}

/// How the daemon reaches the server for RCON.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ConnectMode {
    #[default]
    Direct,
    ContainerHost,
}

#[derive(Clone, Debug)]
pub struct ServerRow {
    pub server_id: ServerId,
    pub address: String,
    pub port: u16,
    pub game: String,
    pub name: Option<String>,
    pub engine: EngineKind,
    pub connect_mode: ConnectMode,
    /// RCON credential, sealed by the credential cipher.
    pub rcon_sealed: Option<String>,
    pub token_hash: Option<[u8; 32]>,
    /// `hlxn_XXXXXXXX` display prefix; the only cleartext kept.
    pub token_prefix: Option<String>,
    pub active_map: String,
    pub last_event: Option<OffsetDateTime>,
    pub geo: Option<GeoPoint>,
    pub config: HashMap<String, String>,
    pub rounds: u64,
    pub ct_wins: u64,
    pub t_wins: u64,
    pub map_rounds: u64,
    pub map_ct_wins: u64,
    pub map_t_wins: u64,
    pub active_players: u32,
    pub max_players: u32,
}

#[derive(Clone, Debug)]
pub struct PlayerRow {
    pub player_id: PlayerId,
    pub game: String,
    pub unique_id: String,
    pub name: String,
    /// Non-negative by storage type; deltas clamp at zero.
    pub skill: u32,
    pub kills: u64,
    pub deaths: u64,
    pub last_event: Option<OffsetDateTime>,
    pub last_skill_change: Option<OffsetDateTime>,
    pub geo: Option<GeoPoint>,
}

impl PlayerRow {
    /// Games played, as consumed by the K-factor decay.
    pub fn games(&self) -> u64 {
        self.kills + self.deaths
    }
}

#[derive(Clone, Debug)]
pub struct WeaponRow {
    pub game: String,
    pub code: String,
    pub name: String,
    pub modifier: f64,
    pub kills: u64,
    pub headshots: u64,
}

#[derive(Clone, Debug)]
pub struct ActionRow {
    pub game: String,
    pub code: String,
    /// A team-specific row is preferred over the team-blank row.
    pub team: Option<String>,
    pub reward_player: i32,
    pub reward_team: i32,
    pub for_player: bool,
    pub for_player_player: bool,
    pub for_team: bool,
    pub for_world: bool,
}

/// Fields the status scraper writes through to the server row.
#[derive(Clone, Debug, Default)]
pub struct ServerStatusUpdate {
    pub name: Option<String>,
    pub active_players: Option<u32>,
    pub max_players: Option<u32>,
}

pub trait Repository: Clone + Send + Sync + 'static {
    type Tx: RepositoryTx + Send;

    fn begin(&self) -> impl Future<Output = Result<Self::Tx, RepoError>> + Send;

    fn find_or_create_server(
        &self,
        address: &str,
        port: u16,
        game: &str,
    ) -> impl Future<Output = Result<ServerRow, RepoError>> + Send;

    fn find_server_by_addr(
        &self,
        address: &str,
        port: u16,
    ) -> impl Future<Output = Result<Option<ServerRow>, RepoError>> + Send;

    fn find_server_by_token_prefix(
        &self,
        prefix: &str,
    ) -> impl Future<Output = Result<Option<ServerRow>, RepoError>> + Send;

    fn get_server(
        &self,
        server_id: ServerId,
    ) -> impl Future<Output = Result<Option<ServerRow>, RepoError>> + Send;

    fn list_servers(&self) -> impl Future<Output = Result<Vec<ServerRow>, RepoError>> + Send;

    /// Status write-through. Deliberately leaves the last-event clock
    /// alone; only real log traffic keeps a server "active".
    fn update_server_status(
        &self,
        server_id: ServerId,
        update: ServerStatusUpdate,
    ) -> impl Future<Output = Result<(), RepoError>> + Send;

    fn mark_server_event(
        &self,
        server_id: ServerId,
        at: OffsetDateTime,
    ) -> impl Future<Output = Result<(), RepoError>> + Send;

    /// Creates or refreshes the player keyed by `(game, unique_id)`; the
    /// name always reflects the most recent observation.
    fn upsert_player(
        &self,
        game: &str,
        unique_id: &str,
        name: &str,
    ) -> impl Future<Output = Result<PlayerRow, RepoError>> + Send;

    fn find_players_by_id(
        &self,
        ids: &[PlayerId],
    ) -> impl Future<Output = Result<HashMap<PlayerId, PlayerRow>, RepoError>> + Send;

    fn get_player_skill(
        &self,
        player_id: PlayerId,
    ) -> impl Future<Output = Result<Option<u32>, RepoError>> + Send;

    /// Rank is 1 + the number of strictly higher-skilled players.
    fn get_player_rank(
        &self,
        player_id: PlayerId,
    ) -> impl Future<Output = Result<Option<u64>, RepoError>> + Send;

    fn update_player_geo(
        &self,
        player_id: PlayerId,
        geo: GeoPoint,
    ) -> impl Future<Output = Result<(), RepoError>> + Send;

    fn find_action(
        &self,
        game: &str,
        code: &str,
        team: Option<&str>,
    ) -> impl Future<Output = Result<Option<ActionRow>, RepoError>> + Send;

    fn find_weapon(
        &self,
        game: &str,
        code: &str,
    ) -> impl Future<Output = Result<Option<WeaponRow>, RepoError>> + Send;
}

/// Buffered writes for one event; nothing is visible until `commit`.
pub trait RepositoryTx {
    fn apply_skill_delta(
        &mut self,
        player_id: PlayerId,
        delta: i32,
    ) -> impl Future<Output = Result<(), RepoError>> + Send;

    fn upsert_weapon_stats(
        &mut self,
        game: &str,
        code: &str,
        kills: u64,
        headshots: u64,
    ) -> impl Future<Output = Result<(), RepoError>> + Send;

    fn record_frag(
        &mut self,
        event_id: Uuid,
        server_id: ServerId,
        killer: PlayerId,
        victim: PlayerId,
        map: &str,
        weapon: &str,
        headshot: bool,
    ) -> impl Future<Output = Result<(), RepoError>> + Send;

    fn record_suicide(
        &mut self,
        event_id: Uuid,
        server_id: ServerId,
        player: PlayerId,
        weapon: &str,
    ) -> impl Future<Output = Result<(), RepoError>> + Send;

    fn record_teamkill(
        &mut self,
        event_id: Uuid,
        server_id: ServerId,
        killer: PlayerId,
        victim: PlayerId,
        weapon: &str,
    ) -> impl Future<Output = Result<(), RepoError>> + Send;

    fn record_chat(
        &mut self,
        event_id: Uuid,
        server_id: ServerId,
        player: PlayerId,
        message: &str,
        is_dead: bool,
    ) -> impl Future<Output = Result<(), RepoError>> + Send;

    fn record_connect(
        &mut self,
        event_id: Uuid,
        server_id: ServerId,
        player: PlayerId,
        address: &str,
    ) -> impl Future<Output = Result<(), RepoError>> + Send;

    fn record_disconnect(
        &mut self,
        event_id: Uuid,
        server_id: ServerId,
        player: PlayerId,
    ) -> impl Future<Output = Result<(), RepoError>> + Send;

    /// Records the action and applies its reward to the acting player.
    fn record_action(
        &mut self,
        event_id: Uuid,
        server_id: ServerId,
        player: PlayerId,
        target: Option<PlayerId>,
        code: &str,
        reward: i32,
    ) -> impl Future<Output = Result<(), RepoError>> + Send;

    /// Records the team action and applies each listed reward.
    fn record_team_bonus_batch(
        &mut self,
        event_id: Uuid,
        server_id: ServerId,
        code: &str,
        rewards: Vec<(PlayerId, i32)>,
    ) -> impl Future<Output = Result<(), RepoError>> + Send;

    fn record_world_action(
        &mut self,
        event_id: Uuid,
        server_id: ServerId,
        code: &str,
    ) -> impl Future<Output = Result<(), RepoError>> + Send;

    fn increment_server_rounds(
        &mut self,
        server_id: ServerId,
    ) -> impl Future<Output = Result<(), RepoError>> + Send;

    fn update_team_wins(
        &mut self,
        server_id: ServerId,
        side: TeamSide,
    ) -> impl Future<Output = Result<(), RepoError>> + Send;

    /// Installs the new map and zeroes the per-map counters.
    fn reset_map_stats(
        &mut self,
        server_id: ServerId,
        new_map: &str,
        player_count: u32,
    ) -> impl Future<Output = Result<(), RepoError>> + Send;

    /// Same-day calls for one player aggregate into a single row.
    fn create_player_history(
        &mut self,
        player_id: PlayerId,
        date: Date,
        kills: u64,
        deaths: u64,
        skill: u32,
    ) -> impl Future<Output = Result<(), RepoError>> + Send;

    fn commit(self) -> impl Future<Output = Result<(), RepoError>> + Send;
}
