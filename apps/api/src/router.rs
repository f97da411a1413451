use axum::{
    Router,
    routing::get,
};

use agenda_cell::{agenda_routes, AgendaState};

pub fn create_router(state: AgendaState) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic agenda API is running!" }))
        .nest("/agenda", agenda_routes(state))
}
