//! hlstatsd: server-side runtime for a multiplayer game statistics daemon.
//!
//! Game servers stream log lines over UDP; the daemon authenticates each
//! source, parses lines into typed events, scores them against a skill
//! rating, persists the outcome through the repository port, and talks
//! back to servers over their native RCON wire to announce results and
//! poll live status.

pub mod auth;
pub mod config;
pub mod crypto;
pub mod geo;
pub mod handlers;
pub mod ingress;
pub mod metrics;
pub mod notify;
pub mod orchestrator;
pub mod pipeline;
pub mod repo;
pub mod scrape;
pub mod session;
pub mod skill;

pub use crate::config::{Args, DaemonConfig};
pub use crate::handlers::{HandlerCtx, WeaponCache};
pub use crate::ingress::{Ingress, IngressConfig};
pub use crate::metrics::Metrics;
pub use crate::notify::Notifier;
pub use crate::orchestrator::ServerOrchestrator;
pub use crate::pipeline::PipelineHandle;
pub use crate::repo::{MemoryRepository, Repository};
pub use crate::scrape::StatusScraper;
pub use crate::skill::SkillConfig;
