//! Synthetic `ServerStatus` events from the scraper: write-through to the
//! server row and map-change detection.

use crate::config::ServerConfig;
use crate::handlers::{HandlerCtx, HandlerError};
use crate::repo::{Repository, RepositoryTx, ServerRow, ServerStatusUpdate};
use events::StatusSnapshot;
use tracing::info;

pub async fn server_status<R: Repository>(
    ctx: &HandlerCtx<R>,
    server: &ServerRow,
    snapshot: &StatusSnapshot,
) -> Result<(), HandlerError> {
    let config = ServerConfig(&server.config);
    let active = snapshot.active_players(config.ignore_bots());

    ctx.repo
        .update_server_status(
            server.server_id,
            ServerStatusUpdate {
                name: snapshot.hostname.clone(),
                active_players: Some(active),
                max_players: snapshot.players_max,
            },
        )
        .await?;

    if let Some(map) = snapshot.map.as_deref()
        && !map.is_empty()
        && map != server.active_map
    {
        let mut tx = ctx.repo.begin().await?;
        tx.reset_map_stats(server.server_id, map, active).await?;
        tx.commit().await?;

        info!(
            server_id = server.server_id,
            from = %server.active_map,
            to = map,
            "status scrape observed a map change"
        );
    }

    Ok(())
}
