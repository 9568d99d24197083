//! Weapon-weighted Elo scoring for kill events.
//!
//! Kills move rating through a standard Elo expectation with a K-factor
//! that decays as a player accumulates games, scaled by the weapon's skill
//! modifier and a headshot bonus. Teamkills and suicides bypass the Elo
//! math entirely and apply flat penalties.

/// Scoring constants. The teamkill and suicide penalties are the observed
/// production values; they live here so a per-server override path has a
/// single place to land.
#[derive(Clone, Copy, Debug)]
pub struct SkillConfig {
    pub k_base: f64,
    pub headshot_bonus: f64,
    /// Victims lose this share of what killers gain.
    pub victim_share: f64,
    pub teamkill_penalty: i32,
    pub teamkill_compensation: i32,
    pub suicide_penalty: i32,
    /// Fallback for servers without a `SkillMaxChange` override.
    pub default_max_change: u32,
}

impl Default for SkillConfig {
    fn default() -> Self {
        Self {
            k_base: 16.0,
            headshot_bonus: 0.25,
            victim_share: 0.8,
            teamkill_penalty: -10,
            teamkill_compensation: 5,
            suicide_penalty: -5,
            default_max_change: 50,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct KillOutcome {
    pub killer_delta: i32,
    pub victim_delta: i32,
}

/// Elo update for a kill. `killer_games` drives the K-factor decay;
/// `modifier` is the weapon's skill modifier (1.0 when unknown);
/// `max_change` caps the magnitude of both deltas.
pub fn score_kill(
    config: &SkillConfig,
    killer_skill: u32,
    killer_games: u64,
    victim_skill: u32,
    modifier: f64,
    headshot: bool,
    max_change: u32,
) -> KillOutcome {
    let expected = expected_score(killer_skill, victim_skill);
    let k = config.k_base * k_decay(killer_games);
    let bonus = if headshot { 1.0 + config.headshot_bonus } else { 1.0 };

    let killer_delta = (k * modifier * (1.0 - expected) * bonus).round() as i32;
    let victim_delta = -((config.victim_share * f64::from(killer_delta.abs())).round() as i32);

    KillOutcome {
        killer_delta: clamp_delta(killer_delta, max_change),
        victim_delta: clamp_delta(victim_delta, max_change),
    }
}

pub fn teamkill(config: &SkillConfig) -> KillOutcome {
    KillOutcome {
        killer_delta: config.teamkill_penalty,
        victim_delta: config.teamkill_compensation,
    }
}

pub fn suicide(config: &SkillConfig) -> i32 {
    config.suicide_penalty
}

/// Logistic expectation of the killer winning the exchange.
fn expected_score(killer_skill: u32, victim_skill: u32) -> f64 {
    let diff = f64::from(victim_skill) - f64::from(killer_skill);
    1.0 / (1.0 + 10f64.powf(diff / 400.0))
}

/// 2.0 below 30 games, 1.0 from 400 games, linear in between.
fn k_decay(games: u64) -> f64 {
    const FULL_WEIGHT_UNTIL: f64 = 30.0;
    const SETTLED_AT: f64 = 400.0;

    let games = games as f64;

    if games < FULL_WEIGHT_UNTIL {
        2.0
    } else if games >= SETTLED_AT {
        1.0
    } else {
        2.0 - (games - FULL_WEIGHT_UNTIL) / (SETTLED_AT - FULL_WEIGHT_UNTIL)
    }
}

fn clamp_delta(delta: i32, max_change: u32) -> i32 {
    let cap = i32::try_from(max_change).unwrap_or(i32::MAX);
    delta.clamp(-cap, cap)
}
