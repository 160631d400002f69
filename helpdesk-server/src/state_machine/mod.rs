//! Help request lifecycle.
//!
//! - **Transition**: the declarative table of legal status edges
//! - **Repository**: storage backends (in-memory, SQLite)
//! - **Store**: `RequestStore`, which applies the table and owns all writes

pub mod repository;
pub mod store;
pub mod transition;

pub use repository::{
    InMemoryRepository, NewHelpRequest, NotificationLog, Page, RepositoryError, RequestFilter,
    RequestRepository, SqliteRepository,
};
pub use store::{NewRequest, RequestStore, StoreError};
pub use transition::{is_legal, next_statuses, IllegalTransition, Transition, TRANSITIONS};
