//! Addresses and storage for durable operator state.

mod persistence;
mod store;
mod tag;

pub use persistence::{ListPersister, MapPersister, PersistenceProvider, SetPersister, ValuePersister};
pub use store::{FileStore, MemoryStore, Store, StoreError};
pub use tag::{StateKind, StateTag, StreamId};
