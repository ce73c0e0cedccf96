#![forbid(unsafe_code)]

pub mod local;
pub mod repository;
pub mod rest;
pub mod sqlite;

pub use local::{FileSessionStore, InMemorySessionStore, LocalSessionStore, LocalStoreError};
pub use repository::{InMemoryRepository, Storage, StorageError};
