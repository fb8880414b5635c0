//! Shared helpers for integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use meridian::network::{Network, NetworkError, Request, Response};
use url::Url;

pub fn origin() -> Url {
    Url::parse("http://localhost:8080/").unwrap()
}

/// Network answering from a fixed table of bodies, keyed by locator
///
/// Unlisted locators are unreachable. Every call is recorded.
#[derive(Debug, Default)]
pub struct FakeNetwork {
    routes: Mutex<HashMap<Url, Option<(u16, String)>>>,
    calls: Mutex<Vec<Url>>,
}

impl FakeNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_routes(routes: &[(&str, &str)]) -> Self {
        let network = Self::new();
        for (locator, body) in routes {
            network.respond(locator, 200, body);
        }
        network
    }

    pub fn respond(&self, locator: &str, status: u16, body: &str) {
        self.routes
            .lock()
            .unwrap()
            .insert(origin().join(locator).unwrap(), Some((status, body.to_string())));
    }

    pub fn go_offline(&self, locator: &str) {
        self.routes
            .lock()
            .unwrap()
            .insert(origin().join(locator).unwrap(), None);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_to(&self, locator: &str) -> usize {
        let url = origin().join(locator).unwrap();
        self.calls.lock().unwrap().iter().filter(|u| **u == url).count()
    }
}

#[async_trait]
impl Network for FakeNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
        self.calls.lock().unwrap().push(request.url.clone());
        match self.routes.lock().unwrap().get(&request.url).cloned().flatten() {
            Some((status, body)) => Ok(Response {
                url: request.url.clone(),
                status,
                headers: vec![("content-type".to_string(), "text/html".to_string())],
                body: body.into_bytes(),
            }),
            None => Err(NetworkError::Unreachable {
                url: request.url.to_string(),
                reason: "offline".to_string(),
            }),
        }
    }
}

pub fn get(locator: &str) -> Request {
    Request::get(origin().join(locator).unwrap())
}
