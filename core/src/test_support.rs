//! Shared fixtures and platform fakes for unit tests

use crate::database::{CreateDiaryRequest, SchemaStore};
use crate::error::{AppError, Result};
use crate::platform::{
    ClientSettings, HttpMethod, HttpRequest, HttpResponse, HttpTransport, IdentityProvider, Prompt,
    TokenResponse,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, Semaphore};

pub fn diary_request(title: &str) -> CreateDiaryRequest {
    CreateDiaryRequest {
        title: title.to_string(),
        width: 300.0,
        height: 400.0,
        color: "#ff6b35".to_string(),
        font_color: "#1a1a1a".to_string(),
        font_family: "Georgia".to_string(),
        font_size: 16.0,
        bold: false,
        italic: true,
    }
}

pub async fn memory_store() -> SchemaStore {
    SchemaStore::open_in_memory().await.unwrap()
}

/// Scripted HTTP transport. Routes are matched in order by method and a
/// substring of the URL; each route answers once.
#[derive(Default)]
pub struct FakeTransport {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<HttpRequest>>,
}

struct Route {
    method: HttpMethod,
    url_contains: String,
    response: HttpResponse,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answer the next matching request once
    pub fn respond(&self, method: HttpMethod, url_contains: &str, status: u16, body: &str) {
        self.routes.lock().unwrap().push(Route {
            method,
            url_contains: url_contains.to_string(),
            response: HttpResponse::new(status, body.as_bytes().to_vec()),
        });
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, method: HttpMethod, url_contains: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == method && r.url.contains(url_contains))
            .count()
    }
}

#[async_trait]
impl HttpTransport for FakeTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.requests.lock().unwrap().push(request.clone());

        let mut routes = self.routes.lock().unwrap();
        let position = routes
            .iter()
            .position(|r| r.method == request.method && request.url.contains(&r.url_contains));

        match position {
            Some(i) => Ok(routes.remove(i).response),
            None => Err(AppError::Generic(format!(
                "no scripted response for {:?} {}",
                request.method, request.url
            ))),
        }
    }
}

/// Scripted identity provider
pub struct FakeIdentityProvider {
    responses: Mutex<VecDeque<TokenResponse>>,
    prompts: Mutex<Vec<Option<Prompt>>>,
    revoked: Mutex<Vec<String>>,
    loads: Mutex<usize>,
    /// Requests wait for a permit when set
    gate: Option<Arc<Semaphore>>,
    pub entered: Arc<Notify>,
}

impl FakeIdentityProvider {
    pub fn new(responses: Vec<TokenResponse>) -> Arc<Self> {
        Arc::new(Self::build(responses, None))
    }

    pub fn gated(responses: Vec<TokenResponse>, gate: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self::build(responses, Some(gate)))
    }

    fn build(responses: Vec<TokenResponse>, gate: Option<Arc<Semaphore>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            prompts: Mutex::new(Vec::new()),
            revoked: Mutex::new(Vec::new()),
            loads: Mutex::new(0),
            gate,
            entered: Arc::new(Notify::new()),
        }
    }

    pub fn prompts(&self) -> Vec<Option<Prompt>> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn revoked(&self) -> Vec<String> {
        self.revoked.lock().unwrap().clone()
    }

    pub fn loads(&self) -> usize {
        *self.loads.lock().unwrap()
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentityProvider {
    async fn load(&self, _settings: &ClientSettings) -> Result<()> {
        *self.loads.lock().unwrap() += 1;
        Ok(())
    }

    async fn request_token(&self, prompt: Option<Prompt>) -> Result<TokenResponse> {
        self.prompts.lock().unwrap().push(prompt);
        self.entered.notify_one();

        if let Some(gate) = &self.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|e| AppError::Generic(e.to_string()))?;
            permit.forget();
        }

        let next = self.responses.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| TokenResponse::failed("no_response", None)))
    }

    async fn revoke(&self, access_token: &str) -> Result<()> {
        self.revoked.lock().unwrap().push(access_token.to_string());
        Ok(())
    }
}
