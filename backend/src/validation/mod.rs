//! Input validation shared by request payloads and the tracking write path.

pub mod rules;

pub use validator::Validate;
