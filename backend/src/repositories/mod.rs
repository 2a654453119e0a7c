pub mod tracking_session;
pub mod trip;

pub use tracking_session::{PgTrackingSessionRepository, TrackingSessionRepository};
pub use trip::{PgTripRepository, TripRepository};

#[cfg(any(test, feature = "test-utils"))]
pub use tracking_session::InMemoryTrackingSessionRepository;
#[cfg(any(test, feature = "test-utils"))]
pub use trip::InMemoryTripRepository;
