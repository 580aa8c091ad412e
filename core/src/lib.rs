pub mod conflicts;
pub mod error;
pub mod reconciler;
