pub mod client;
pub mod error;
pub mod jwt;
pub mod navigator;
pub mod resources;
pub mod session;
pub mod transport;

pub use client::{ApiClient, RegisterRequest, DEFAULT_API_URL};
pub use error::ApiError;
pub use navigator::{LogNavigator, Navigator, RecordingNavigator, DEFAULT_LOGIN_PATH};
pub use resources::{ReportKind, Resource, Resources};
pub use session::{FileStorage, MemoryStorage, Session, SessionStore, TokenStorage, User, UserId};
pub use transport::{ApiRequest, ApiResponse, HttpMethod, HttpTransport, Transport};

/// Today's date (UTC), eg for naming downloaded reports.
pub fn today_utc() -> time::Date {
    time::OffsetDateTime::now_utc().date()
}

#[test]
fn test_today_utc() {
    let today = today_utc();
    assert!(today.year() >= 2024);
}
