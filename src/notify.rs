//! Rendering and delivery of in-game announcements.
//!
//! One message is rendered per event from the server's template set and
//! queued per server. Queues are small and drop the oldest entry when full:
//! a wedged server must never stall the pipeline. Delivery failures are
//! logged and counted, never retried synchronously.

use crate::config::ServerConfig;
use crate::metrics::Metrics;
use crate::repo::ServerId;
use rcon::RconPool;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Pending messages kept per server before the oldest is dropped.
const QUEUE_CAPACITY: usize = 32;
/// Messages longer than this are shortened in logs; servers clip their own
/// display.
const LOG_TRUNCATE_AT: usize = 100;

/// The per-server announcement templates with their default wording.
#[derive(Clone, Debug)]
pub struct Templates {
    pub kill: String,
    pub suicide: String,
    pub teamkill: String,
    pub action: String,
    pub team: String,
    pub connect: String,
    pub disconnect: String,
}

impl Default for Templates {
    fn default() -> Self {
        Self {
            kill: "[Stats]: {killerName} (#{killerRank}) got {points} for killing {victimName} (#{victimRank})".to_string(),
            suicide: "[Stats]: {playerName} (#{playerRank}) lost {points} for suicide".to_string(),
            teamkill: "[Stats]: {killerName} lost {points} for team killing {victimName}"
                .to_string(),
            action: "[Stats]: {playerName} got {points} for {action}".to_string(),
            team: "[Stats]: Team {team} got {points} for {action}".to_string(),
            connect: "[Stats]: {playerName} connected".to_string(),
            disconnect: "[Stats]: {playerName} (#{playerRank}) disconnected".to_string(),
        }
    }
}

impl Templates {
    /// Applies per-server overrides from the config map (`MsgKill`,
    /// `MsgSuicide`, ...).
    pub fn for_server(config: &ServerConfig<'_>) -> Self {
        let mut templates = Self::default();

        let slots = [
            ("MsgKill", &mut templates.kill),
            ("MsgSuicide", &mut templates.suicide),
            ("MsgTeamkill", &mut templates.teamkill),
            ("MsgAction", &mut templates.action),
            ("MsgTeamAction", &mut templates.team),
            ("MsgConnect", &mut templates.connect),
            ("MsgDisconnect", &mut templates.disconnect),
        ];

        for (key, slot) in slots {
            if let Some(replacement) = config.template_override(key) {
                *slot = replacement.to_string();
            }
        }

        templates
    }
}

/// `{placeholder}` substitution.
pub fn render(template: &str, vars: &[(&str, String)]) -> String {
    let mut out = template.to_string();

    for (key, value) in vars {
        out = out.replace(&format!("{{{key}}}"), value);
    }

    out
}

/// Point values always carry an explicit sign.
pub fn format_points(points: i32) -> String {
    if points >= 0 {
        format!("+{points}")
    } else {
        points.to_string()
    }
}

#[derive(Clone)]
pub struct Notifier {
    inner: Arc<NotifierInner>,
}

struct NotifierInner {
    pool: RconPool,
    metrics: Arc<Metrics>,
    queues: Mutex<HashMap<ServerId, VecDeque<String>>>,
    wake: Notify,
}

impl Notifier {
    pub fn new(pool: RconPool, metrics: Arc<Metrics>) -> Self {
        Self {
            inner: Arc::new(NotifierInner {
                pool,
                metrics,
                queues: Mutex::new(HashMap::new()),
                wake: Notify::new(),
            }),
        }
    }

    /// Queues a vanilla `say` for the server.
    pub fn say(&self, server_id: ServerId, message: String) {
        self.enqueue(server_id, message);
    }

    /// Queues a targeted flavour, prefixed with the recipient's name.
    pub fn say_to(&self, server_id: ServerId, player_name: &str, message: String) {
        self.enqueue(server_id, format!("{player_name}: {message}"));
    }

    fn enqueue(&self, server_id: ServerId, message: String) {
        if message.len() > LOG_TRUNCATE_AT {
            debug!(
                server_id,
                message = %format!("{}…", truncated(&message)),
                "queueing oversized announcement"
            );
        }

        let Ok(mut queues) = self.inner.queues.lock() else {
            return;
        };

        let queue = queues.entry(server_id).or_default();

        if queue.len() >= QUEUE_CAPACITY {
            queue.pop_front();
            Metrics::bump(&self.inner.metrics.rcon_queue_drops);
        }

        queue.push_back(message);
        drop(queues);

        self.inner.wake.notify_one();
    }

    /// Runs the delivery loop until cancelled.
    pub fn spawn(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let inner = self.inner.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = inner.wake.notified() => {}
                }

                while let Some((server_id, message)) = next_message(&inner) {
                    let command = format!("say {message}");

                    match inner.pool.execute(server_id, &command).await {
                        Ok(_) => Metrics::bump(&inner.metrics.notifications_sent),
                        Err(err) => {
                            Metrics::bump(&inner.metrics.notifications_failed);
                            warn!(
                                server_id,
                                %err,
                                message = truncated(&message),
                                "announcement delivery failed"
                            );
                        }
                    }
                }
            }
        })
    }

    #[cfg(test)]
    pub(crate) fn queued(&self, server_id: ServerId) -> Vec<String> {
        self.inner
            .queues
            .lock()
            .map(|queues| {
                queues
                    .get(&server_id)
                    .map(|queue| queue.iter().cloned().collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }
}

fn next_message(inner: &NotifierInner) -> Option<(ServerId, String)> {
    let mut queues = inner.queues.lock().ok()?;

    let server_id = queues
        .iter()
        .find(|(_, queue)| !queue.is_empty())
        .map(|(id, _)| *id)?;

    let message = queues.get_mut(&server_id)?.pop_front()?;
    Some((server_id, message))
}

fn truncated(message: &str) -> &str {
    let mut end = LOG_TRUNCATE_AT.min(message.len());
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    &message[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcon::PoolConfig;

    #[test]
    fn renders_the_default_kill_template() {
        let templates = Templates::default();

        let message = render(
            &templates.kill,
            &[
                ("killerName", "Joe".to_string()),
                ("killerRank", "3".to_string()),
                ("points", format_points(20)),
                ("victimName", "Moe".to_string()),
                ("victimRank", "12".to_string()),
            ],
        );

        assert_eq!(
            message,
            "[Stats]: Joe (#3) got +20 for killing Moe (#12)"
        );
    }

    #[test]
    fn points_carry_an_explicit_sign() {
        assert_eq!(format_points(5), "+5");
        assert_eq!(format_points(-16), "-16");
        assert_eq!(format_points(0), "+0");
    }

    #[test]
    fn template_overrides_come_from_server_config() {
        let mut map = std::collections::HashMap::new();
        map.insert("MsgKill".to_string(), "{killerName} fragged {victimName}".to_string());
        let config = ServerConfig(&map);

        let templates = Templates::for_server(&config);
        assert_eq!(templates.kill, "{killerName} fragged {victimName}");
        assert_eq!(templates.suicide, Templates::default().suicide);
    }

    #[tokio::test]
    async fn full_queue_drops_the_oldest_message() {
        let metrics = Arc::new(Metrics::default());
        let notifier = Notifier::new(RconPool::new(PoolConfig::default()), metrics.clone());

        for n in 0..(QUEUE_CAPACITY + 2) {
            notifier.say(1, format!("msg {n}"));
        }

        let queued = notifier.queued(1);
        assert_eq!(queued.len(), QUEUE_CAPACITY);
        assert_eq!(queued.first().map(String::as_str), Some("msg 2"));
        assert_eq!(Metrics::get(&metrics.rcon_queue_drops), 2);
    }

    #[test]
    fn targeted_flavour_prefixes_the_player() {
        let notifier = Notifier::new(
            RconPool::new(PoolConfig::default()),
            Arc::new(Metrics::default()),
        );

        notifier.say_to(4, "Joe", "you rank #3".to_string());
        assert_eq!(notifier.queued(4), vec!["Joe: you rank #3".to_string()]);
    }
}
