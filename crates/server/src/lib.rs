//! Sidenote session persistence and forking service.
//!
//! A sidenote session is a pasted or uploaded document plus the discussion
//! threads anchored to selections of it. Sessions are shareable by
//! unguessable id; write authority is proven by a per-session owner token
//! held client-side only. Any holder of a session id may fork it, which
//! clones the whole session graph under fresh ids so viewers can branch
//! off a shared link without mutating the original.
//!
//! # Module structure
//!
//! - [`session`]: durable session/thread/message store with atomic fork
//! - [`auth`]: constant-time owner-token verification
//! - [`parse`]: content-addressed extraction cache and markdown cleanup
//! - [`ids`]: URL-safe identifier and secret generation
//! - [`api`]: the HTTP surface

pub mod api;
pub mod auth;
pub mod ids;
pub mod parse;
pub mod session;
