//! taskdeck Core - Entity Types
//!
//! Pure data structures shared by the store and the sync engine: identities,
//! enums, tasks/users/projects, patches, filter criteria, backend errors and
//! the async backend contract. No locking, no I/O.

pub mod backend;
pub mod entities;
pub mod enums;
pub mod error;
pub mod filter;
pub mod identity;

pub use backend::{Deleted, TaskBackend};
pub use entities::{Entity, Project, Subtask, Task, TaskFields, TaskPatch, TypeDetails, User};
pub use enums::{EntityKind, Priority, Severity, TaskStatus, TaskType};
pub use error::{BackendError, BackendResult};
pub use filter::{FiltersPatch, Selection, TaskFilters};
pub use identity::{ProjectId, RequestId, TaskId, TempId, Timestamp, UserId};
