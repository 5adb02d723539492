// Authentication module
// Token inspection, session storage and single-flight token refresh

pub mod cookie;
mod manager;
pub mod refresh;
pub mod store;
pub mod token;

pub use manager::{RefreshPhase, SessionEvent, SessionManager};
pub use refresh::{CookieRefresher, Refresher};
pub use store::{FileSessionStore, MemorySessionStore, SessionStore};
pub use token::TokenInspector;
