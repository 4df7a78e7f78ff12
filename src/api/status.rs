use super::{
    AppState,
    error::AppError,
    response::ok,
    schema::{FilterView, StatusView},
};
use axum::{extract::State, response::Response};

/// Pipeline health. A lite-server failure only blanks `head_seqno`; a store
/// failure is an error.
pub async fn status(
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    let pending_blocks = state.store.count_unprocessed().await?;
    let head_seqno = match state.client.get_chain_head().await {
        Ok(head) => Some(head.seqno),
        Err(e) => {
            tracing::warn!(error = %e, "status: chain head unavailable");
            None
        }
    };
    let filter = state.tracking.filter();
    Ok(ok(StatusView {
        connection: state.client.state().as_str(),
        queued_calls: state.client.queued(),
        pending_blocks,
        head_seqno,
        filter: FilterView {
            bits: filter.num_bits(),
            hashes: filter.num_hashes(),
            inserted: filter.inserted(),
        },
    }))
}
