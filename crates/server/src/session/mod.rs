pub mod error;
pub use error::{StoreError, StoreResult};

pub mod domain;
pub use domain::{
    ForkOutcome, Message, MessagePart, NewSession, Role, Session, Thread, ToolState,
    WHOLE_DOCUMENT_CONTEXT,
};

pub mod schema;
pub mod store;
pub use store::SessionStore;

pub mod sqlite;
pub use sqlite::SqliteSessionStore;
