//! Line parser for Half-Life-family engine logs.
//!
//! Engine log lines carry the prefix `L MM/DD/YYYY - HH:MM:SS: ` followed by
//! one of a fixed set of tails. Player identities appear as the quadruple
//! `"<name><uid><steam><team>"`; positional coordinates like `[93 303 73]`
//! may follow an identity and are discarded.

use crate::{Event, EventKind, PlayerRef};
use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_until},
    character::complete::{char, digit1},
    combinator::opt,
    sequence::{delimited, preceded},
};
use thiserror::Error;
use time::{Date, Month, PrimitiveDateTime, Time};

#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum ParseError {
    /// The line does not carry the engine timestamp prefix.
    #[error("malformed log line")]
    Malformed,

    /// The prefix matched but the tail is not a pattern we understand.
    /// Counted by the pipeline, never treated as a hard error.
    #[error("unsupported log line")]
    UnsupportedLine,
}

/// Stateless, reentrant parser for one engine family.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogParser;

impl LogParser {
    pub fn new() -> Self {
        Self
    }

    /// True when the line carries the `L MM/DD/YYYY - HH:MM:SS: ` prefix.
    pub fn can_parse(&self, line: &str) -> bool {
        log_prefix(line).is_ok()
    }

    pub fn parse(&self, line: &str, server_id: u64) -> Result<Event, ParseError> {
        let (rest, timestamp) = log_prefix(line).map_err(|_| ParseError::Malformed)?;

        let kind = match tail.parse(rest) {
            Ok((_, kind)) => kind,
            Err(_) => return Err(ParseError::UnsupportedLine),
        };

        Ok(Event::new(server_id, timestamp, kind))
    }
}

fn number<T: std::str::FromStr>(i: &str) -> IResult<&str, T> {
    digit1.map_res(str::parse::<T>).parse(i)
}

fn log_prefix(i: &str) -> IResult<&str, PrimitiveDateTime> {
    let (i, _) = tag("L ").parse(i)?;
    let (i, (month, _, day, _, year)) =
        (number::<u8>, char('/'), number::<u8>, char('/'), number::<i32>).parse(i)?;
    let (i, _) = tag(" - ").parse(i)?;
    let (i, (hour, _, minute, _, second)) =
        (number::<u8>, char(':'), number::<u8>, char(':'), number::<u8>).parse(i)?;
    let (i, _) = tag(": ").parse(i)?;

    let month = Month::try_from(month).map_err(|_| fail(i))?;
    let date = Date::from_calendar_date(year, month, day).map_err(|_| fail(i))?;
    let time = Time::from_hms(hour, minute, second).map_err(|_| fail(i))?;

    Ok((i, PrimitiveDateTime::new(date, time)))
}

fn fail(i: &str) -> nom::Err<nom::error::Error<&str>> {
    nom::Err::Error(nom::error::Error {
        input: i,
        code: nom::error::ErrorKind::Verify,
    })
}

fn quoted(i: &str) -> IResult<&str, &str> {
    delimited(char('"'), take_until("\""), char('"')).parse(i)
}

/// Optional, discarded `[x y z]` position block.
fn coords(i: &str) -> IResult<&str, Option<&str>> {
    opt(preceded(
        char(' '),
        delimited(char('['), take_until("]"), char(']')),
    ))
    .parse(i)
}

/// `"<name><uid><steam><team>"` player quadruple.
///
/// The name may itself contain `<`, so the slots are split from the right:
/// the team slot is the last `<…>`, the steam slot the one before it, the
/// uid the one before that, and whatever remains is the name.
fn subject(i: &str) -> IResult<&str, PlayerRef> {
    let (i, body) = delimited(char('"'), take_until(">\""), tag(">\"")).parse(i)?;

    match player_from_quad(body) {
        Some(player) => Ok((i, player)),
        None => Err(fail(i)),
    }
}

fn rsplit_slot(s: &str) -> Option<(&str, &str)> {
    let idx = s.rfind('<')?;
    let slot = &s[idx + 1..];
    let head = &s[..idx];
    Some((head.strip_suffix('>').unwrap_or(head), slot))
}

fn player_from_quad(body: &str) -> Option<PlayerRef> {
    let (head, team) = rsplit_slot(body)?;
    let (head, unique_id) = rsplit_slot(head)?;
    let (name, user_id) = rsplit_slot(head)?;
    let user_id = user_id.parse::<i64>().ok()?;

    Some(PlayerRef {
        name: name.to_string(),
        user_id,
        unique_id: unique_id.to_string(),
        team: if team.is_empty() {
            None
        } else {
            Some(team.to_string())
        },
    })
}

/// The verb phrase following a player subject, before it is combined with
/// the subject into an [EventKind].
enum Tail {
    Connected { address: String },
    Disconnected { reason: Option<String> },
    Entered,
    JoinedTeam(String),
    ChangedName(String),
    Suicide { weapon: String },
    Say { message: String, dead: bool },
    Killed { victim: PlayerRef, weapon: String, headshot: bool },
    Triggered { action: String, target: Option<PlayerRef> },
}

fn tail(i: &str) -> IResult<&str, EventKind> {
    alt((player_line, team_line, world_line, map_line)).parse(i)
}

fn player_line(i: &str) -> IResult<&str, EventKind> {
    let (i, player) = subject(i)?;
    let (i, _) = coords(i)?;
    let (i, verb) = alt((
        connected,
        disconnected,
        entered,
        joined_team,
        changed_name,
        suicide,
        say,
        killed,
        triggered,
    ))
    .parse(i)?;

    let kind = match verb {
        Tail::Connected { address } => EventKind::PlayerConnect { player, address },
        Tail::Disconnected { reason } => EventKind::PlayerDisconnect { player, reason },
        Tail::Entered => EventKind::PlayerEntry { player },
        Tail::JoinedTeam(team) => EventKind::PlayerChangeTeam { player, team },
        Tail::ChangedName(new_name) => EventKind::PlayerChangeName { player, new_name },
        Tail::Suicide { weapon } => EventKind::PlayerSuicide { player, weapon },
        Tail::Say { message, dead } => EventKind::ChatMessage {
            player,
            message,
            is_dead: dead,
        },
        Tail::Killed {
            victim,
            weapon,
            headshot,
        } => {
            // Same observed team on both sides makes it a teamkill; unknown
            // teams never do.
            let same_team = player.team.is_some() && player.team == victim.team;

            if same_team {
                EventKind::PlayerTeamkill {
                    killer: player,
                    victim,
                    weapon,
                    headshot,
                }
            } else {
                EventKind::PlayerKill {
                    killer: player,
                    victim,
                    weapon,
                    headshot,
                }
            }
        }
        Tail::Triggered {
            action,
            target: Some(target),
        } => EventKind::PlayerPlayerAction {
            player,
            target,
            action,
        },
        Tail::Triggered {
            action,
            target: None,
        } => EventKind::PlayerAction { player, action },
    };

    Ok((i, kind))
}

fn connected(i: &str) -> IResult<&str, Tail> {
    preceded(tag(" connected, address "), quoted)
        .map(|address: &str| Tail::Connected {
            address: address.to_string(),
        })
        .parse(i)
}

fn disconnected(i: &str) -> IResult<&str, Tail> {
    let (i, _) = tag(" disconnected").parse(i)?;
    let (i, reason) = opt(delimited(tag(" (reason \""), take_until("\""), tag("\")"))).parse(i)?;

    Ok((
        i,
        Tail::Disconnected {
            reason: reason.map(str::to_string),
        },
    ))
}

fn entered(i: &str) -> IResult<&str, Tail> {
    tag(" entered the game").map(|_| Tail::Entered).parse(i)
}

fn joined_team(i: &str) -> IResult<&str, Tail> {
    preceded(tag(" joined team "), quoted)
        .map(|team: &str| Tail::JoinedTeam(team.to_string()))
        .parse(i)
}

fn changed_name(i: &str) -> IResult<&str, Tail> {
    preceded(tag(" changed name to "), quoted)
        .map(|name: &str| Tail::ChangedName(name.to_string()))
        .parse(i)
}

fn suicide(i: &str) -> IResult<&str, Tail> {
    preceded(tag(" committed suicide with "), quoted)
        .map(|weapon: &str| Tail::Suicide {
            weapon: weapon.to_string(),
        })
        .parse(i)
}

fn say(i: &str) -> IResult<&str, Tail> {
    let (i, message) = preceded(tag(" say "), quoted).parse(i)?;
    let (i, dead) = opt(tag(" (dead)")).parse(i)?;

    Ok((
        i,
        Tail::Say {
            message: message.to_string(),
            dead: dead.is_some(),
        },
    ))
}

fn killed(i: &str) -> IResult<&str, Tail> {
    let (i, _) = tag(" killed ").parse(i)?;
    let (i, victim) = subject(i)?;
    let (i, _) = coords(i)?;
    let (i, weapon) = preceded(tag(" with "), quoted).parse(i)?;
    let (i, headshot) = opt(tag(" (headshot)")).parse(i)?;

    Ok((
        i,
        Tail::Killed {
            victim,
            weapon: weapon.to_string(),
            headshot: headshot.is_some(),
        },
    ))
}

fn triggered(i: &str) -> IResult<&str, Tail> {
    let (i, action) = preceded(tag(" triggered "), quoted).parse(i)?;
    let (i, target) = opt(preceded(tag(" against "), subject)).parse(i)?;

    Ok((
        i,
        Tail::Triggered {
            action: action.to_string(),
            target,
        },
    ))
}

fn team_line(i: &str) -> IResult<&str, EventKind> {
    let (i, team) = preceded(tag("Team "), quoted).parse(i)?;
    let (i, action) = preceded(tag(" triggered "), quoted).parse(i)?;

    Ok((
        i,
        EventKind::TeamAction {
            team: team.to_string(),
            action: action.to_string(),
        },
    ))
}

fn world_line(i: &str) -> IResult<&str, EventKind> {
    let (i, action) = preceded(tag("World triggered "), quoted).parse(i)?;

    let kind = match action {
        "Round_Start" => EventKind::RoundStart,
        "Round_End" => EventKind::RoundEnd,
        other => EventKind::WorldAction {
            action: other.to_string(),
        },
    };

    Ok((i, kind))
}

fn map_line(i: &str) -> IResult<&str, EventKind> {
    preceded(tag("Started map "), quoted)
        .map(|map: &str| EventKind::MapChange {
            map: map.to_string(),
        })
        .parse(i)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARSER: LogParser = LogParser;

    fn parse(line: &str) -> Event {
        PARSER.parse(line, 7).expect("line should parse")
    }

    #[test]
    fn kill_with_headshot() {
        let event = parse(
            "L 07/15/2024 - 22:35:05: \"Killer<2><STEAM_1:0:111><TERRORIST>\" [93 303 73] killed \"Victim<3><STEAM_1:0:222><CT>\" [35 302 73] with \"ak47\" (headshot)",
        );

        assert_eq!(event.server_id, 7);
        assert_eq!(event.event_id, event.correlation_id);

        match event.kind {
            EventKind::PlayerKill {
                killer,
                victim,
                weapon,
                headshot,
            } => {
                assert_eq!(killer.name, "Killer");
                assert_eq!(killer.unique_id, "STEAM_1:0:111");
                assert_eq!(killer.team.as_deref(), Some("TERRORIST"));
                assert!(!killer.is_bot());
                assert_eq!(victim.name, "Victim");
                assert_eq!(victim.user_id, 3);
                assert_eq!(weapon, "ak47");
                assert!(headshot);
            }
            other => panic!("expected PlayerKill, got {other:?}"),
        }
    }

    #[test]
    fn same_team_kill_is_teamkill() {
        let event = parse(
            "L 07/15/2024 - 22:35:05: \"Killer<2><STEAM_1:0:111><TERRORIST>\" [93 303 73] killed \"Victim<3><STEAM_1:0:222><TERRORIST>\" [35 302 73] with \"ak47\" (headshot)",
        );

        assert!(matches!(event.kind, EventKind::PlayerTeamkill { .. }));
    }

    #[test]
    fn bot_suicide() {
        let event = parse(
            "L 07/15/2024 - 22:35:05: \"BotName<2><BOT><CT>\" [93 303 73] committed suicide with \"hegrenade\"",
        );

        match event.kind {
            EventKind::PlayerSuicide { player, weapon } => {
                assert!(player.is_bot());
                assert_eq!(weapon, "hegrenade");
            }
            other => panic!("expected PlayerSuicide, got {other:?}"),
        }
    }

    #[test]
    fn dead_chat() {
        let event =
            parse("L 06/28/2025 - 09:09:32: \"Brandon<2><BOT><TERRORIST>\" say \"hello\" (dead)");

        match event.kind {
            EventKind::ChatMessage {
                player,
                message,
                is_dead,
            } => {
                assert_eq!(message, "hello");
                assert_eq!(player.team.as_deref(), Some("TERRORIST"));
                assert!(is_dead);
            }
            other => panic!("expected ChatMessage, got {other:?}"),
        }
    }

    #[test]
    fn connect_and_disconnect() {
        let event = parse(
            "L 07/15/2024 - 22:30:00: \"Joe<5><STEAM_1:0:333><>\" connected, address \"10.0.0.9:27005\"",
        );
        match event.kind {
            EventKind::PlayerConnect { player, address } => {
                assert_eq!(address, "10.0.0.9:27005");
                assert_eq!(player.team, None);
            }
            other => panic!("expected PlayerConnect, got {other:?}"),
        }

        let event = parse(
            "L 07/15/2024 - 22:59:01: \"Joe<5><STEAM_1:0:333><CT>\" disconnected (reason \"Client left game\")",
        );
        match event.kind {
            EventKind::PlayerDisconnect { reason, .. } => {
                assert_eq!(reason.as_deref(), Some("Client left game"));
            }
            other => panic!("expected PlayerDisconnect, got {other:?}"),
        }

        let event = parse("L 07/15/2024 - 22:59:01: \"Joe<5><STEAM_1:0:333><CT>\" disconnected");
        assert!(matches!(
            event.kind,
            EventKind::PlayerDisconnect { reason: None, .. }
        ));
    }

    #[test]
    fn entry_team_and_name_changes() {
        let event = parse("L 07/15/2024 - 22:30:02: \"Joe<5><STEAM_1:0:333><>\" entered the game");
        assert!(matches!(event.kind, EventKind::PlayerEntry { .. }));

        let event =
            parse("L 07/15/2024 - 22:30:05: \"Joe<5><STEAM_1:0:333><>\" joined team \"CT\"");
        assert!(
            matches!(event.kind, EventKind::PlayerChangeTeam { team, .. } if team == "CT")
        );

        let event =
            parse("L 07/15/2024 - 22:31:05: \"Joe<5><STEAM_1:0:333><CT>\" changed name to \"Moe\"");
        assert!(
            matches!(event.kind, EventKind::PlayerChangeName { new_name, .. } if new_name == "Moe")
        );
    }

    #[test]
    fn triggered_actions() {
        let event = parse(
            "L 07/15/2024 - 22:40:00: \"Joe<5><STEAM_1:0:333><CT>\" triggered \"Defused_The_Bomb\"",
        );
        assert!(
            matches!(event.kind, EventKind::PlayerAction { action, .. } if action == "Defused_The_Bomb")
        );

        let event = parse(
            "L 07/15/2024 - 22:40:10: \"Joe<5><STEAM_1:0:333><CT>\" triggered \"Flashed\" against \"Moe<6><STEAM_1:0:444><TERRORIST>\"",
        );
        match event.kind {
            EventKind::PlayerPlayerAction { target, action, .. } => {
                assert_eq!(action, "Flashed");
                assert_eq!(target.name, "Moe");
            }
            other => panic!("expected PlayerPlayerAction, got {other:?}"),
        }

        let event = parse(
            "L 07/15/2024 - 22:41:00: Team \"CT\" triggered \"CTs_Win\"",
        );
        assert!(
            matches!(event.kind, EventKind::TeamAction { team, .. } if team == "CT")
        );

        let event = parse("L 07/15/2024 - 22:41:30: World triggered \"Game_Commencing\"");
        assert!(matches!(event.kind, EventKind::WorldAction { .. }));
    }

    #[test]
    fn round_and_map_lines() {
        let event = parse("L 07/15/2024 - 22:41:00: World triggered \"Round_Start\"");
        assert!(matches!(event.kind, EventKind::RoundStart));

        let event = parse("L 07/15/2024 - 22:43:00: World triggered \"Round_End\"");
        assert!(matches!(event.kind, EventKind::RoundEnd));

        let event = parse("L 07/15/2024 - 22:45:00: Started map \"de_inferno\"");
        assert!(matches!(event.kind, EventKind::MapChange { map } if map == "de_inferno"));
    }

    #[test]
    fn name_containing_angle_bracket() {
        let event = parse(
            "L 07/15/2024 - 22:30:02: \"<|Clan|>Joe<5><STEAM_1:0:333><CT>\" entered the game",
        );

        match event.kind {
            EventKind::PlayerEntry { player } => {
                assert_eq!(player.name, "<|Clan|>Joe");
                assert_eq!(player.user_id, 5);
            }
            other => panic!("expected PlayerEntry, got {other:?}"),
        }
    }

    #[test]
    fn unsupported_tail_is_soft_error() {
        let err = PARSER
            .parse("L 07/15/2024 - 22:35:05: Server cvar \"mp_timelimit\" = \"30\"", 1)
            .unwrap_err();
        assert_eq!(err, ParseError::UnsupportedLine);
    }

    #[test]
    fn missing_prefix_is_malformed() {
        let err = PARSER.parse("RL initialized", 1).unwrap_err();
        assert_eq!(err, ParseError::Malformed);
        assert!(!PARSER.can_parse("RL initialized"));
        assert!(PARSER.can_parse("L 07/15/2024 - 22:35:05: anything"));
    }
}
