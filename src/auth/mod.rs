use crate::state::AppState;
use axum::Router;

mod dto;
pub mod gate;
pub mod handlers;
pub mod password;
pub mod session;

pub use dto::{LoginResponse, PublicUser};
pub use gate::{login, LoginOutcome};
pub use session::{AuthUser, MaybeAuthUser, SessionKeys, SuperAdmin};

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::auth_routes())
        .merge(handlers::admin_routes())
}
