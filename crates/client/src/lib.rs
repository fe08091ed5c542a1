//! Client-side companion to the sidenote server.
//!
//! Three pieces, layered:
//!
//! - [`api`]: a typed HTTP client for the session endpoints, with every
//!   remote call routed through the bounded [`retry`] policy.
//! - [`ownership`]: the local-only map from session id to the owner
//!   token and fork lineage, behind an injected store object.
//! - [`reconcile`]: the transparent fork-on-first-write layer. A caller
//!   mutates through a [`SessionWriter`]; if the device does not own the
//!   session, the writer forks it, records the new ownership, retargets
//!   the visible session reference, and redirects the pending mutation,
//!   all before the call returns.

pub mod api;
pub mod ownership;
pub mod reconcile;
pub mod retry;

pub use api::{
    ApiClient, ApiError, ForkResult, MessageCreated, NewSession, Role, SessionView,
    ThreadCreated, WHOLE_DOCUMENT_CONTEXT,
};
pub use ownership::{MemoryOwnershipStore, OwnershipRecord, OwnershipStore};
pub use reconcile::{SessionWriter, WriteAccess, classify_access};
