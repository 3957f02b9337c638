pub mod file_store;
pub mod memory_store;
pub mod records;
pub mod store;

pub use file_store::FileStore;
pub use memory_store::MemoryStore;
pub use records::{validate_key, ActionRecord, Identity, Target, TargetDetails, STORAGE_VERSION};
pub use store::{ActionLog, IdentityStore, TargetStore};
