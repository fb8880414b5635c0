//! Test doubles shared by unit tests

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;
use url::Url;

use crate::network::{Network, NetworkError, Request, Response};

pub fn origin() -> Url {
    Url::parse("http://localhost:8080/").unwrap()
}

#[derive(Debug, Clone)]
enum Scripted {
    Respond { status: u16, body: Vec<u8> },
    Unreachable,
}

/// Network answering from a fixed script and recording every call
///
/// Locators are resolved against [`origin`]; anything not scripted is unreachable.
#[derive(Debug, Default)]
pub struct ScriptedNetwork {
    script: Mutex<HashMap<Url, Scripted>>,
    calls: Mutex<Vec<Url>>,
    holds: Mutex<HashMap<Url, Arc<Notify>>>,
}

impl ScriptedNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn url(locator: &str) -> Url {
        origin().join(locator).unwrap()
    }

    pub fn status(&self, locator: &str, status: u16, body: &str) {
        self.script.lock().unwrap().insert(
            Self::url(locator),
            Scripted::Respond {
                status,
                body: body.as_bytes().to_vec(),
            },
        );
    }

    pub fn ok(&self, locator: &str, body: &str) {
        self.status(locator, 200, body);
    }

    pub fn unreachable(&self, locator: &str) {
        self.script
            .lock()
            .unwrap()
            .insert(Self::url(locator), Scripted::Unreachable);
    }

    /// Makes requests for `locator` wait until the returned handle is notified
    pub fn hold(&self, locator: &str) -> Arc<Notify> {
        let release = Arc::new(Notify::new());
        self.holds
            .lock()
            .unwrap()
            .insert(Self::url(locator), release.clone());
        release
    }

    pub fn calls(&self) -> Vec<Url> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, locator: &str) -> usize {
        let url = Self::url(locator);
        self.calls().iter().filter(|u| **u == url).count()
    }
}

#[async_trait]
impl Network for ScriptedNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
        self.calls.lock().unwrap().push(request.url.clone());
        let hold = self.holds.lock().unwrap().get(&request.url).cloned();
        if let Some(release) = hold {
            release.notified().await;
        }
        let scripted = self.script.lock().unwrap().get(&request.url).cloned();
        match scripted {
            Some(Scripted::Respond { status, body }) => Ok(Response {
                url: request.url.clone(),
                status,
                headers: vec![("content-type".to_string(), "text/plain".to_string())],
                body,
            }),
            Some(Scripted::Unreachable) | None => Err(NetworkError::Unreachable {
                url: request.url.to_string(),
                reason: "scripted offline".to_string(),
            }),
        }
    }
}
