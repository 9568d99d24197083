//! Daemon configuration: command-line flags, environment knobs, and the
//! free-form per-server config map with its tri-state booleans.

use clap::Parser;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "hlstatsd", about = "Game statistics daemon for HL-family servers")]
pub struct Args {
    /// UDP address the log ingress listens on.
    #[arg(long, default_value = "0.0.0.0:27500")]
    pub bind: SocketAddr,

    /// Pipeline worker count; defaults to min(cores, 8).
    #[arg(long)]
    pub workers: Option<usize>,

    /// Capacity of the bounded event queue.
    #[arg(long, default_value_t = 4096)]
    pub queue_capacity: usize,

    /// How often the status scraper sweeps eligible servers.
    #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
    pub status_interval: Duration,

    /// How long a shutdown drains the queue before cancelling workers.
    #[arg(long, default_value = "10s", value_parser = humantime::parse_duration)]
    pub drain_timeout: Duration,

    /// Game code assumed when auto-registering an unknown source address.
    #[arg(long, default_value = "cstrike")]
    pub default_game: String,

    /// Auto-register unknown source addresses instead of dropping them.
    #[arg(long)]
    pub auto_register: bool,
}

#[derive(Clone, Debug)]
pub struct DaemonConfig {
    pub bind: SocketAddr,
    pub workers: usize,
    pub queue_capacity: usize,
    pub status_interval: Duration,
    pub drain_timeout: Duration,
    pub default_game: String,
    pub auto_register: bool,
    /// Servers silent for longer than this are skipped by the scraper.
    pub active_window: Duration,
}

impl DaemonConfig {
    pub fn from_args(args: Args) -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        let active_minutes = std::env::var("RCON_ACTIVE_SERVER_MAX_AGE_MINUTES")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(60);

        Self {
            bind: args.bind,
            workers: args.workers.unwrap_or_else(|| cores.min(8)).max(1),
            queue_capacity: args.queue_capacity.max(1),
            status_interval: args.status_interval,
            drain_timeout: args.drain_timeout,
            default_game: args.default_game,
            auto_register: args.auto_register,
            active_window: Duration::from_secs(active_minutes * 60),
        }
    }
}

/// Tri-state boolean used across the per-server config map: truthy
/// `{1,true,yes,on}`, falsy `{0,false,no,off}`, anything else unset.
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Typed view over one server's free-form config map.
#[derive(Clone, Copy, Debug)]
pub struct ServerConfig<'a>(pub &'a HashMap<String, String>);

impl ServerConfig<'_> {
    fn flag(&self, key: &str, default: bool) -> bool {
        self.0
            .get(key)
            .and_then(|value| parse_flag(value))
            .unwrap_or(default)
    }

    fn int(&self, key: &str, default: u32) -> u32 {
        self.0
            .get(key)
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(default)
    }

    /// Whether bots are excluded from active-player counts and their chat
    /// is dropped.
    pub fn ignore_bots(&self) -> bool {
        self.flag("IgnoreBots", false)
    }

    /// Cap on the magnitude of a single skill change.
    pub fn skill_max_change(&self, default: u32) -> u32 {
        self.int("SkillMaxChange", default)
    }

    /// Minimum connected players before kills move skill.
    pub fn min_players(&self) -> u32 {
        self.int("MinPlayers", 0)
    }

    /// Days of inactivity before a player drops out of ranking views.
    pub fn min_activity(&self) -> u32 {
        self.int("MinActivity", 28)
    }

    pub fn enable_map_stats(&self) -> bool {
        self.flag("EnableMapStats", true)
    }

    /// Per-slot message template override, e.g. key `MsgKill`.
    pub fn template_override(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}
