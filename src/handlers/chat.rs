//! Chat recording. The only enrichment chat needs is the per-server
//! `IgnoreBots` policy.

use crate::config::ServerConfig;
use crate::handlers::{HandlerCtx, HandlerError, resolve};
use crate::repo::{Repository, RepositoryTx, ServerRow};
use crate::session::ServerSession;
use events::{Event, PlayerRef};

pub async fn chat<R: Repository>(
    ctx: &HandlerCtx<R>,
    session: &mut ServerSession,
    server: &ServerRow,
    event: &Event,
    player: &PlayerRef,
    message: &str,
    is_dead: bool,
) -> Result<(), HandlerError> {
    let row = resolve(ctx, session, server, player).await?;

    if player.is_bot() && ServerConfig(&server.config).ignore_bots() {
        return Ok(());
    }

    let mut tx = ctx.repo.begin().await?;
    tx.record_chat(
        event.event_id,
        server.server_id,
        row.player_id,
        message,
        is_dead,
    )
    .await?;
    tx.commit().await?;

    Ok(())
}
