pub mod conflict_detection;
pub mod health;
pub mod query;
