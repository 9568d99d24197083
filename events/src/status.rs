//! Parser for the free-text response of the `status` RCON command.
//!
//! Both engine generations print a block of `key : value` lines followed by
//! one `#`-prefixed row per connected client. Only the fields the pipeline
//! consumes are extracted; everything else is ignored.

/// One client row from the `status` listing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StatusPlayer {
    pub name: String,
    pub unique_id: String,
}

impl StatusPlayer {
    pub fn is_bot(&self) -> bool {
        self.unique_id == "BOT"
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct StatusSnapshot {
    pub hostname: Option<String>,
    pub version: Option<String>,
    pub map: Option<String>,
    pub fps: Option<f32>,
    pub players_total: Option<u32>,
    pub players_max: Option<u32>,
    pub players: Vec<StatusPlayer>,
}

impl StatusSnapshot {
    /// Total connected clients, preferring the `players :` summary line over
    /// counting rows.
    pub fn total_players(&self) -> u32 {
        self.players_total
            .unwrap_or(self.players.len() as u32)
    }

    pub fn bot_count(&self) -> u32 {
        self.players.iter().filter(|p| p.is_bot()).count() as u32
    }

    /// Player count used for activity thresholds. With `ignore_bots` the
    /// bot rows are subtracted from the total.
    pub fn active_players(&self, ignore_bots: bool) -> u32 {
        let total = self.total_players();

        if ignore_bots {
            total.saturating_sub(self.bot_count())
        } else {
            total
        }
    }
}

pub fn parse(text: &str) -> StatusSnapshot {
    let mut snapshot = StatusSnapshot::default();

    for line in text.lines() {
        let line = line.trim();

        if line.is_empty() {
            continue;
        }

        if let Some(row) = line.strip_prefix('#') {
            if let Some(player) = parse_player_row(row) {
                snapshot.players.push(player);
            }
            continue;
        }

        let Some((key, value)) = line.split_once(':') else {
            continue;
        };

        let value = value.trim();

        match key.trim() {
            "hostname" => snapshot.hostname = Some(value.to_string()),
            "version" => snapshot.version = Some(value.to_string()),
            "map" => {
                snapshot.map = value.split_whitespace().next().map(str::to_string);
            }
            "fps" => snapshot.fps = value.parse().ok(),
            "players" => {
                let (total, max) = parse_player_counts(value);
                snapshot.players_total = total;
                snapshot.players_max = max;
            }
            _ => {}
        }
    }

    snapshot
}

/// `<n> … (<m> max)` out of the `players :` summary line.
fn parse_player_counts(value: &str) -> (Option<u32>, Option<u32>) {
    let total = value
        .split_whitespace()
        .next()
        .and_then(|tok| tok.parse().ok());

    let max = value.split('(').nth(1).and_then(|tail| {
        let tail = tail.trim();
        tail.strip_suffix(')')
            .unwrap_or(tail)
            .strip_suffix("max")
            .and_then(|n| n.trim().parse().ok())
    });

    (total, max)
}

/// One `#` row. The engines disagree on column order, so the unique-id is
/// located by shape (`BOT`, `STEAM_…`, `[U:…]`) rather than by position.
fn parse_player_row(row: &str) -> Option<StatusPlayer> {
    let open = row.find('"')?;
    let close = row[open + 1..].find('"')? + open + 1;

    let before = row[..open].trim();
    if before.chars().any(|c| c.is_ascii_alphabetic()) {
        // Column header row (`# userid name uniqueid …`).
        return None;
    }

    let name = row[open + 1..close].to_string();
    let tokens: Vec<&str> = row[close + 1..].split_whitespace().collect();

    let unique_id = tokens
        .iter()
        .find(|tok| **tok == "BOT" || tok.starts_with("STEAM_") || tok.starts_with("[U:"))
        .or_else(|| tokens.get(1))
        .or_else(|| tokens.first())?;

    Some(StatusPlayer {
        name,
        unique_id: unique_id.to_string(),
    })
}
