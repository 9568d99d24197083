//! Typed event model for Half-Life-family game server log streams, plus the
//! parsers that produce it: the line parser for engine log output and the
//! free-text parser for `status` command responses.

pub mod parser;
pub mod status;

use time::PrimitiveDateTime;
use uuid::Uuid;

pub use crate::parser::{LogParser, ParseError};
pub use crate::status::StatusSnapshot;

/// A player identity as extracted from a log line.
///
/// The `unique_id` is the platform identity token from the third slot of the
/// `"<name><uid><steam><team>"` quadruple. Server-controlled bots carry the
/// literal token `BOT` there.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct PlayerRef {
    pub name: String,
    pub user_id: i64,
    pub unique_id: String,
    pub team: Option<String>,
}

impl PlayerRef {
    pub fn is_bot(&self) -> bool {
        self.unique_id == "BOT"
    }
}

/// One parsed log event with its envelope.
///
/// `event_id` is generated at parse time; `correlation_id` starts equal to it
/// and is propagated through every downstream record written for this event.
#[derive(Clone, Debug)]
pub struct Event {
    pub event_id: Uuid,
    pub correlation_id: Uuid,
    pub server_id: u64,
    pub timestamp: PrimitiveDateTime,
    pub kind: EventKind,
}

impl Event {
    pub fn new(server_id: u64, timestamp: PrimitiveDateTime, kind: EventKind) -> Self {
        let event_id = Uuid::new_v4();

        Self {
            event_id,
            correlation_id: event_id,
            server_id,
            timestamp,
            kind,
        }
    }

    /// Every player identity referenced by this event, actor first.
    pub fn actors(&self) -> Vec<&PlayerRef> {
        match &self.kind {
            EventKind::PlayerConnect { player, .. }
            | EventKind::PlayerDisconnect { player, .. }
            | EventKind::PlayerEntry { player }
            | EventKind::PlayerChangeTeam { player, .. }
            | EventKind::PlayerChangeName { player, .. }
            | EventKind::PlayerSuicide { player, .. }
            | EventKind::PlayerAction { player, .. }
            | EventKind::ChatMessage { player, .. } => vec![player],

            EventKind::PlayerKill { killer, victim, .. }
            | EventKind::PlayerTeamkill { killer, victim, .. } => vec![killer, victim],

            EventKind::PlayerPlayerAction { player, target, .. } => vec![player, target],

            EventKind::TeamAction { .. }
            | EventKind::WorldAction { .. }
            | EventKind::RoundStart
            | EventKind::RoundEnd
            | EventKind::MapChange { .. }
            | EventKind::ServerStatus(_) => vec![],
        }
    }
}

/// The event variants the pipeline understands.
///
/// Dispatch over this sum replaces the runtime handler registry of older
/// stats daemons; a missing arm is a compile error rather than a silently
/// ignored event type.
#[derive(Clone, Debug)]
pub enum EventKind {
    PlayerConnect {
        player: PlayerRef,
        address: String,
    },
    PlayerDisconnect {
        player: PlayerRef,
        reason: Option<String>,
    },
    PlayerEntry {
        player: PlayerRef,
    },
    PlayerKill {
        killer: PlayerRef,
        victim: PlayerRef,
        weapon: String,
        headshot: bool,
    },
    PlayerSuicide {
        player: PlayerRef,
        weapon: String,
    },
    PlayerTeamkill {
        killer: PlayerRef,
        victim: PlayerRef,
        weapon: String,
        headshot: bool,
    },
    PlayerChangeTeam {
        player: PlayerRef,
        team: String,
    },
    PlayerChangeName {
        player: PlayerRef,
        new_name: String,
    },
    PlayerAction {
        player: PlayerRef,
        action: String,
    },
    PlayerPlayerAction {
        player: PlayerRef,
        target: PlayerRef,
        action: String,
    },
    TeamAction {
        team: String,
        action: String,
    },
    WorldAction {
        action: String,
    },
    ChatMessage {
        player: PlayerRef,
        message: String,
        is_dead: bool,
    },
    RoundStart,
    RoundEnd,
    MapChange {
        map: String,
    },
    ServerStatus(StatusSnapshot),
}

impl EventKind {
    /// Short tag used in logs and the raw-event record.
    pub fn tag(&self) -> &'static str {
        match self {
            EventKind::PlayerConnect { .. } => "player_connect",
            EventKind::PlayerDisconnect { .. } => "player_disconnect",
            EventKind::PlayerEntry { .. } => "player_entry",
            EventKind::PlayerKill { .. } => "player_kill",
            EventKind::PlayerSuicide { .. } => "player_suicide",
            EventKind::PlayerTeamkill { .. } => "player_teamkill",
            EventKind::PlayerChangeTeam { .. } => "player_change_team",
            EventKind::PlayerChangeName { .. } => "player_change_name",
            EventKind::PlayerAction { .. } => "player_action",
            EventKind::PlayerPlayerAction { .. } => "player_player_action",
            EventKind::TeamAction { .. } => "team_action",
            EventKind::WorldAction { .. } => "world_action",
            EventKind::ChatMessage { .. } => "chat_message",
            EventKind::RoundStart => "round_start",
            EventKind::RoundEnd => "round_end",
            EventKind::MapChange { .. } => "map_change",
            EventKind::ServerStatus(_) => "server_status",
        }
    }
}
