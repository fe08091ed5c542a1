//! Transparent fork-on-first-write.
//!
//! Reading a shared session needs nothing; the first write from a device
//! that does not own it must branch off a private copy. Every mutating
//! call resolves its target through one access classification:
//!
//! - `Owner`: a local record exists for the visible session, write
//!   straight through.
//! - `OwnerOfFork`: a local record points at a fork of the visible
//!   session, retarget to it instead of forking again.
//! - `NotOwner`: fork now, record the new ownership, retarget, and
//!   redirect the pending mutation through the returned thread id map.
//! - `ForkInFlight`: a fork call is currently on the wire.
//!
//! From the call site a mutation either succeeds, possibly after an
//! invisible fork, or fails uniformly.

use crate::api::{ApiClient, ApiError, MessageCreated, NewSession, Role, ThreadCreated, UpdateAck};
use crate::ownership::{OwnershipRecord, OwnershipStore};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Write authority of this device over a session id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteAccess {
    Owner {
        owner_token: String,
    },
    OwnerOfFork {
        fork_id: String,
        owner_token: String,
    },
    ForkInFlight,
    NotOwner,
}

/// The single transition function every mutating call goes through.
pub fn classify_access(
    ownership: &dyn OwnershipStore,
    session_id: &str,
    fork_in_flight: bool,
) -> WriteAccess {
    if fork_in_flight {
        return WriteAccess::ForkInFlight;
    }
    if let Some(record) = ownership.get(session_id) {
        return WriteAccess::Owner {
            owner_token: record.owner_token,
        };
    }
    if let Some((fork_id, record)) = ownership.find_fork_of(session_id) {
        return WriteAccess::OwnerOfFork {
            fork_id,
            owner_token: record.owner_token,
        };
    }
    WriteAccess::NotOwner
}

struct WriteTarget {
    session_id: String,
    owner_token: String,
    thread_id: Option<String>,
}

/// Handle for mutating one visible session, forking it first when the
/// device does not own it.
///
/// Writes through one handle are strictly sequential: a fork and the
/// mutation it redirects always complete before the next write starts,
/// so two writes can never race to fork the same session or append to
/// the same thread's tail out of order.
pub struct SessionWriter {
    api: ApiClient,
    ownership: Arc<dyn OwnershipStore>,
    session_id: Mutex<String>,
    write_gate: tokio::sync::Mutex<()>,
    fork_in_flight: AtomicBool,
}

impl SessionWriter {
    /// Wrap an existing session id, typically taken from a shared link.
    pub fn open(
        api: ApiClient,
        ownership: Arc<dyn OwnershipStore>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            api,
            ownership,
            session_id: Mutex::new(session_id.into()),
            write_gate: tokio::sync::Mutex::new(()),
            fork_in_flight: AtomicBool::new(false),
        }
    }

    /// Create a brand-new session and record its ownership locally.
    pub async fn create(
        api: ApiClient,
        ownership: Arc<dyn OwnershipStore>,
        markdown_content: &str,
    ) -> Result<Self, ApiError> {
        let NewSession {
            session_id,
            owner_token,
        } = api.create_session(markdown_content).await?;
        ownership.insert(
            &session_id,
            OwnershipRecord {
                owner_token,
                forked_from: None,
            },
        );
        Ok(Self::open(api, ownership, session_id))
    }

    /// The currently visible session id. Changes when a write retargets
    /// to a fork.
    pub fn session_id(&self) -> String {
        self.session_id.lock().unwrap().clone()
    }

    /// Current write authority, including `ForkInFlight` while a fork
    /// call is on the wire.
    pub fn access(&self) -> WriteAccess {
        classify_access(
            &*self.ownership,
            &self.session_id(),
            self.fork_in_flight.load(Ordering::SeqCst),
        )
    }

    pub fn is_owner(&self) -> bool {
        matches!(self.access(), WriteAccess::Owner { .. })
    }

    /// Resolve the session, token, and thread a pending mutation should
    /// go to, forking first when necessary. Callers hold the write gate.
    async fn ensure_write_target(&self, thread_id: Option<&str>) -> Result<WriteTarget, ApiError> {
        let current = self.session_id();
        match classify_access(&*self.ownership, &current, false) {
            WriteAccess::Owner { owner_token } => Ok(WriteTarget {
                session_id: current,
                owner_token,
                thread_id: thread_id.map(str::to_string),
            }),
            WriteAccess::OwnerOfFork {
                fork_id,
                owner_token,
            } => {
                tracing::debug!(original = %current, fork = %fork_id, "retargeting write to existing fork");
                *self.session_id.lock().unwrap() = fork_id.clone();
                Ok(WriteTarget {
                    session_id: fork_id,
                    owner_token,
                    thread_id: thread_id.map(str::to_string),
                })
            }
            WriteAccess::ForkInFlight | WriteAccess::NotOwner => {
                self.fork_in_flight.store(true, Ordering::SeqCst);
                let forked = self.api.fork_session(&current).await;
                self.fork_in_flight.store(false, Ordering::SeqCst);
                let forked = forked?;

                self.ownership.insert(
                    &forked.session_id,
                    OwnershipRecord {
                        owner_token: forked.owner_token.clone(),
                        forked_from: Some(current.clone()),
                    },
                );
                *self.session_id.lock().unwrap() = forked.session_id.clone();
                tracing::info!(original = %current, fork = %forked.session_id, "transparently forked before write");

                let remapped = thread_id.map(|tid| {
                    forked
                        .thread_id_map
                        .get(tid)
                        .cloned()
                        .unwrap_or_else(|| tid.to_string())
                });
                Ok(WriteTarget {
                    session_id: forked.session_id,
                    owner_token: forked.owner_token,
                    thread_id: remapped,
                })
            }
        }
    }

    pub async fn add_thread(
        &self,
        context: &str,
        snippet: &str,
    ) -> Result<ThreadCreated, ApiError> {
        let _gate = self.write_gate.lock().await;
        let target = self.ensure_write_target(None).await?;
        self.api
            .add_thread(&target.session_id, &target.owner_token, context, snippet)
            .await
    }

    pub async fn add_message(
        &self,
        thread_id: &str,
        role: Role,
        text: &str,
    ) -> Result<MessageCreated, ApiError> {
        let _gate = self.write_gate.lock().await;
        let target = self.ensure_write_target(Some(thread_id)).await?;
        let thread_id = target.thread_id.as_deref().unwrap_or(thread_id);
        self.api
            .add_message(&target.session_id, &target.owner_token, thread_id, role, text)
            .await
    }

    pub async fn update_message(
        &self,
        thread_id: &str,
        message_id: &str,
        text: &str,
    ) -> Result<UpdateAck, ApiError> {
        let _gate = self.write_gate.lock().await;
        let target = self.ensure_write_target(Some(thread_id)).await?;
        let thread_id = target.thread_id.as_deref().unwrap_or(thread_id);
        self.api
            .update_message(
                &target.session_id,
                &target.owner_token,
                thread_id,
                message_id,
                text,
            )
            .await
    }

    pub async fn truncate_after(
        &self,
        thread_id: &str,
        message_id: &str,
    ) -> Result<(), ApiError> {
        let _gate = self.write_gate.lock().await;
        let target = self.ensure_write_target(Some(thread_id)).await?;
        let thread_id = target.thread_id.as_deref().unwrap_or(thread_id);
        self.api
            .truncate_thread_after(
                &target.session_id,
                &target.owner_token,
                thread_id,
                message_id,
            )
            .await
    }

    /// Delete the visible session. Never forks: deleting something this
    /// device does not own is refused locally.
    pub async fn delete(&self) -> Result<(), ApiError> {
        let _gate = self.write_gate.lock().await;
        let current = self.session_id();
        match classify_access(&*self.ownership, &current, false) {
            WriteAccess::Owner { owner_token } => {
                self.api.delete_session(&current, &owner_token).await?;
                self.ownership.remove(&current);
                Ok(())
            }
            _ => Err(ApiError::Forbidden),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ownership::MemoryOwnershipStore;

    fn store_with(records: &[(&str, &str, Option<&str>)]) -> MemoryOwnershipStore {
        let store = MemoryOwnershipStore::new();
        for (id, token, forked_from) in records {
            store.insert(
                id,
                OwnershipRecord {
                    owner_token: token.to_string(),
                    forked_from: forked_from.map(str::to_string),
                },
            );
        }
        store
    }

    #[test]
    fn owner_when_record_exists() {
        let store = store_with(&[("s-1", "tok-1", None)]);
        assert_eq!(
            classify_access(&store, "s-1", false),
            WriteAccess::Owner {
                owner_token: "tok-1".to_string()
            }
        );
    }

    #[test]
    fn owner_of_fork_when_lineage_matches() {
        let store = store_with(&[("fork-1", "tok-f", Some("shared"))]);
        assert_eq!(
            classify_access(&store, "shared", false),
            WriteAccess::OwnerOfFork {
                fork_id: "fork-1".to_string(),
                owner_token: "tok-f".to_string()
            }
        );
    }

    #[test]
    fn not_owner_without_any_record() {
        let store = store_with(&[]);
        assert_eq!(classify_access(&store, "shared", false), WriteAccess::NotOwner);
    }

    #[test]
    fn fork_in_flight_shadows_everything() {
        let store = store_with(&[("s-1", "tok-1", None)]);
        assert_eq!(
            classify_access(&store, "s-1", true),
            WriteAccess::ForkInFlight
        );
    }

    #[test]
    fn own_record_wins_over_fork_lineage() {
        // Owning the session directly beats owning a fork of it.
        let store = store_with(&[
            ("shared", "tok-direct", None),
            ("fork-1", "tok-f", Some("shared")),
        ]);
        assert_eq!(
            classify_access(&store, "shared", false),
            WriteAccess::Owner {
                owner_token: "tok-direct".to_string()
            }
        );
    }
}
