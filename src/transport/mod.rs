//! HTTP transport: negotiation, allow-list guard, session registry, the
//! per-client engine, and the axum router that ties them together.
//!
//! Module layering, bottom up:
//!
//! - [`negotiate`] and [`guard`] are pure header checks
//! - [`session`] is the per-client protocol engine
//! - [`registry`] maps session ids to engines
//! - [`router`] is the HTTP surface over all of the above

pub mod guard;
pub mod negotiate;
pub mod registry;
pub mod router;
pub mod session;

pub use guard::AllowListGuard;
pub use negotiate::ResponseMode;
pub use registry::SessionRegistry;
pub use router::{GateServer, GateState};
pub use session::{Session, SessionReply};
