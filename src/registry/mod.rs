//! Client registry
//!
//! Process-wide store of presence and declared identity for all connected
//! sessions. Constructed once at hub start and shared by every session.
//!
//! Two guarded maps with independent locks:
//!
//! - the presence map (session uid to origin address), written at connect
//!   and disconnect;
//! - the metadata map (session uid to declared identity), written by the
//!   identity-setting handlers.
//!
//! Name uniqueness is enforced inside a single critical section over the
//! metadata map, never by check-then-act. The two locks are never nested,
//! so no ordering deadlock is possible.

pub mod entry;
pub mod error;
pub mod store;

pub use entry::ClientMetadata;
pub use error::RegistryError;
pub use store::ClientRegistry;
