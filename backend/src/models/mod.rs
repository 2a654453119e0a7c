//! Data models shared across storage tiers, services and API handlers.

pub mod broadcast;
pub mod passenger;
pub mod tracking_request;
pub mod tracking_session;
pub mod train;
pub mod trip;
