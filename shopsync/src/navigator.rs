use log::warn;
use parking_lot::Mutex;

/// Default login entry point of the dashboard.
pub const DEFAULT_LOGIN_PATH: &str = "/login";

/// Where the client sends the user once their session can not be recovered.
pub trait Navigator: Send + Sync {
    fn redirect_to_login(&self, login_path: &str);
}

/// Just logs the redirect; for headless use, where "go to the login page" means "tell the user
/// to log in again".
#[derive(Debug, Default, Clone)]
pub struct LogNavigator;

impl Navigator for LogNavigator {
    fn redirect_to_login(&self, login_path: &str) {
        warn!("session ended, log in again (redirect to {login_path})");
    }
}

/// Remembers every redirect it was asked to perform.
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    redirects: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn redirects(&self) -> Vec<String> {
        self.redirects.lock().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn redirect_to_login(&self, login_path: &str) {
        self.redirects.lock().push(login_path.to_string());
    }
}
