#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use shopsync::error::Result;
use shopsync::{
    ApiClient, ApiError, ApiRequest, ApiResponse, MemoryStorage, RecordingNavigator, Session,
    SessionStore, Transport, User, UserId,
};
use std::collections::VecDeque;
use std::sync::Arc;

/// Transport that replays scripted responses in order and records what it was sent.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<ApiResponse>>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl ScriptedTransport {
    pub fn respond(&self, status: u16, body: Value) {
        self.responses
            .lock()
            .push_back(Ok(ApiResponse::from_json(status, &body)));
    }

    pub fn fail(&self, message: &str) {
        self.responses
            .lock()
            .push_back(Err(ApiError::Transport(message.to_string())));
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.requests.lock().iter().map(|r| r.path.clone()).collect()
    }

    pub fn bearers(&self) -> Vec<Option<String>> {
        self.requests
            .lock()
            .iter()
            .map(|r| r.bearer().map(|s| s.to_string()))
            .collect()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn dispatch(&self, request: &ApiRequest) -> Result<ApiResponse> {
        self.requests.lock().push(request.clone());
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| panic!("unscripted request: {} {}", request.method, request.path))
    }
}

pub struct Harness {
    pub client: ApiClient,
    pub transport: Arc<ScriptedTransport>,
    pub storage: Arc<MemoryStorage>,
    pub navigator: Arc<RecordingNavigator>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_storage(Arc::new(MemoryStorage::new()))
    }

    pub fn with_storage(storage: Arc<MemoryStorage>) -> Self {
        let transport = Arc::new(ScriptedTransport::default());
        let navigator = Arc::new(RecordingNavigator::new());
        let client = ApiClient::new(
            transport.clone(),
            Arc::new(SessionStore::new(storage.clone())),
            navigator.clone(),
        );
        Harness {
            client,
            transport,
            storage,
            navigator,
        }
    }

    pub fn session(&self) -> &SessionStore {
        self.client.session()
    }

    /// Puts the client into a logged-in state without going over the wire.
    pub fn logged_in(self, access_token: &str, refresh_token: Option<&str>) -> Self {
        self.session().set_session(Session {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.map(|s| s.to_string()),
            user: test_user(),
        });
        self
    }

    /// The user/token invariant, checked from the outside.
    pub fn assert_consistent(&self) {
        assert_eq!(
            self.session().access_token().is_some(),
            self.session().user().is_some()
        );
    }
}

pub fn test_user() -> User {
    User {
        id: UserId::Number(1),
        email: Some("ana@loja.com".to_string()),
        name: Some("Ana".to_string()),
    }
}

pub fn user_json() -> Value {
    json!({"id": 1, "email": "ana@loja.com", "name": "Ana"})
}

pub fn products_json() -> Value {
    json!([
        {"id": 1, "name": "Café", "price": 12.5, "stockQuantity": 40},
        {"id": 2, "name": "Açúcar", "price": 4.9, "stockQuantity": 0},
    ])
}
