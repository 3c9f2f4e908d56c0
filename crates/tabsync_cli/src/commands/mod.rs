//! CLI command implementations.

pub mod edit;
pub mod inspect;
pub mod recover;
pub mod sync;
pub mod verify;
