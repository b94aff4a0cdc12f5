pub mod bridge;
pub mod handlers;
pub mod middleware;
pub mod orchestrator;
pub mod routes;

pub use orchestrator::{decide, RedirectDecision};
pub use routes::create_redirect_router;
