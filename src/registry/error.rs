//! Registry error types

use thiserror::Error;

/// Error type for registry transactions.
///
/// Conflicts are recoverable: the rejected update mutates no state and the
/// session stays open.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The requested name is held by a different live client.
    #[error("Name '{0}' is already taken by another client")]
    NameTaken(String),
}
