pub mod persistent;

pub use persistent::{PersistedModel, PersistentDocument, PersistentStore};
