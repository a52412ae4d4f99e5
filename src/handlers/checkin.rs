//! Door check-in: redeem a scan token exactly once.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::error::ScanError;
use crate::models::{ScanResponse, TicketStatus};
use crate::store::PipelineStore;

pub async fn scan<S: PipelineStore>(
    store: &S,
    scan_token: &str,
    now: DateTime<Utc>,
) -> Result<ScanResponse, ScanError> {
    let scan_token = scan_token.trim();
    if scan_token.is_empty() {
        return Err(ScanError::MissingToken);
    }

    let mut tx = store.begin().await?;
    let Some(ticket) = store.lock_ticket_by_token(&mut tx, scan_token).await? else {
        return Err(ScanError::NotFound);
    };
    match ticket.status {
        TicketStatus::Active => {}
        TicketStatus::Used => {
            warn!("Ticket {} scanned again (used at {:?})", ticket.id, ticket.used_at);
            return Err(ScanError::AlreadyUsed);
        }
        TicketStatus::Refunded => return Err(ScanError::Refunded),
    }

    store.mark_ticket_used(&mut tx, ticket.id, now).await?;
    store.commit(tx).await?;
    info!("Ticket {} checked in", ticket.id);

    Ok(ScanResponse {
        status: "ok".to_string(),
        ticket_id: ticket.id,
        used_at: now,
    })
}
