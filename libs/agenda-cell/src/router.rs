// libs/agenda-cell/src/router.rs
use axum::{
    routing::{delete, get, post, put},
    Router,
};

use crate::handlers;
use crate::state::AgendaState;

pub fn agenda_routes(state: AgendaState) -> Router {
    let professional_routes = Router::new()
        .route("/settings", get(handlers::get_settings).put(handlers::update_settings))

        // Month partitions and single slots
        .route("/months/{year}/{month}", get(handlers::get_month))
        .route("/months/{year}/{month}/initialize", post(handlers::initialize_month))
        .route("/months/{year}/{month}/goal", put(handlers::set_month_goal))
        .route("/months/{year}/{month}/slots", post(handlers::add_slot))
        .route("/months/{year}/{month}/slots/{key}", delete(handlers::remove_slot))
        .route("/months/{year}/{month}/slots/{key}/book", post(handlers::book_slot))
        .route("/months/{year}/{month}/slots/{key}/cancel", post(handlers::cancel_slot))
        .route("/months/{year}/{month}/slots/{key}/reopen", post(handlers::reopen_slot))
        .route("/months/{year}/{month}/slots/{key}/block", post(handlers::block_slot))
        .route("/months/{year}/{month}/slots/{key}/payment", post(handlers::toggle_payment))

        // Blocking events
        .route("/events", get(handlers::list_events).post(handlers::create_event))
        .route("/events/conflicts", get(handlers::detect_conflicts))
        .route("/events/conflicts/resolve", post(handlers::resolve_conflict))
        .route("/events/{event_id}", put(handlers::update_event).delete(handlers::delete_event))

        .route("/patients/search", get(handlers::search_patients))

        .route("/waitlist", get(handlers::list_waitlist).post(handlers::enqueue_waitlist))
        .route("/waitlist/{entry_id}", delete(handlers::remove_waitlist_entry))
        .route("/waitlist/{entry_id}/assign", post(handlers::assign_waitlist_entry))

        .route("/audit", post(handlers::run_audit));

    Router::new()
        .nest("/professionals/{professional_id}", professional_routes)
        .with_state(state)
}
