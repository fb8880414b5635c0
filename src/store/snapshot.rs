//! Snapshot store records: request keys, captured responses, generations

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

use crate::network::Response;

/// Hex-encoded SHA-256 of a string
pub(crate) fn digest(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Normalized resource locator a snapshot is stored under
///
/// The method is upper-cased and the fragment is dropped; everything else
/// (scheme, host case, default port, dot segments) is normalized by [`Url`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestKey {
    pub method: String,
    pub url: Url,
}

impl RequestKey {
    pub fn new(method: &Method, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method: method.as_str().to_ascii_uppercase(),
            url,
        }
    }

    /// Key for a GET of `url`
    pub fn get(url: &Url) -> Self {
        Self::new(&Method::GET, url)
    }

    /// Stable content-addressed name for this key
    pub fn digest(&self) -> String {
        digest(&self.to_string())
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// Immutable capture of a network response
///
/// Snapshots are never edited in place; storing a new one under the same key
/// replaces the old one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub key: RequestKey,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// When the response was captured
    pub stored_at: DateTime<Utc>,
}

impl Snapshot {
    /// Captures `response` under `key`
    pub fn capture(key: RequestKey, response: &Response) -> Self {
        Self {
            key,
            status: response.status,
            headers: response.headers.clone(),
            body: response.body.clone(),
            stored_at: Utc::now(),
        }
    }

    /// Rebuilds the response this snapshot was captured from
    pub fn to_response(&self) -> Response {
        Response {
            url: self.key.url.clone(),
            status: self.status,
            headers: self.headers.clone(),
            body: self.body.clone(),
        }
    }
}

/// Metadata describing a committed generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationInfo {
    /// Generation name, equal to the version label that created it
    pub name: String,
    /// Fingerprint of the manifest the generation was populated from
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
    /// Number of stored snapshots
    pub entries: usize,
}

/// A candidate generation being assembled before it becomes visible
///
/// Install builds one of these off to the side and hands it to
/// [`SnapshotStore::commit`](super::SnapshotStore::commit) in one piece, so a
/// half-populated generation is never observable.
#[derive(Debug, Clone)]
pub struct Generation {
    pub name: String,
    pub fingerprint: String,
    entries: Vec<Snapshot>,
}

impl Generation {
    pub fn new(name: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fingerprint: fingerprint.into(),
            entries: Vec::new(),
        }
    }

    /// Adds a snapshot, replacing any earlier one with the same key
    pub fn insert(&mut self, snapshot: Snapshot) {
        match self.entries.iter_mut().find(|s| s.key == snapshot.key) {
            Some(existing) => *existing = snapshot,
            None => self.entries.push(snapshot),
        }
    }

    pub fn entries(&self) -> &[Snapshot] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_entries(self) -> Vec<Snapshot> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(url: &str, body: &str) -> Response {
        Response {
            url: Url::parse(url).unwrap(),
            status: 200,
            headers: vec![("content-type".to_string(), "text/plain".to_string())],
            body: body.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_request_key_uppercases_method() {
        let url = Url::parse("http://localhost/a.css").unwrap();
        let key = RequestKey::new(&Method::from_bytes(b"get").unwrap(), &url);
        assert_eq!(key.method, "GET");
    }

    #[test]
    fn test_request_key_normalizes_host_and_port() {
        let a = RequestKey::get(&Url::parse("HTTP://LocalHost:80/a.css").unwrap());
        let b = RequestKey::get(&Url::parse("http://localhost/a.css").unwrap());
        assert_eq!(a, b);
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn test_request_key_keeps_query() {
        let a = RequestKey::get(&Url::parse("http://localhost/api?q=paris").unwrap());
        let b = RequestKey::get(&Url::parse("http://localhost/api?q=london").unwrap());
        assert_ne!(a, b);
    }

    #[test]
    fn test_request_key_display() {
        let key = RequestKey::get(&Url::parse("http://localhost/a.css").unwrap());
        assert_eq!(key.to_string(), "GET http://localhost/a.css");
    }

    #[test]
    fn test_snapshot_reproduces_response() {
        let original = response("http://localhost/a.css", "body { }");
        let snapshot = Snapshot::capture(RequestKey::get(&original.url), &original);
        assert_eq!(snapshot.to_response(), original);
    }

    #[test]
    fn test_generation_insert_replaces_same_key() {
        let first = response("http://localhost/", "one");
        let second = response("http://localhost/", "two");
        let mut generation = Generation::new("v1", "abc");

        generation.insert(Snapshot::capture(RequestKey::get(&first.url), &first));
        generation.insert(Snapshot::capture(RequestKey::get(&second.url), &second));

        assert_eq!(generation.len(), 1);
        assert_eq!(generation.entries()[0].body, b"two");
    }

    #[test]
    fn test_generation_keeps_insertion_order() {
        let mut generation = Generation::new("v1", "abc");
        for path in ["/", "/a.css", "/b.js"] {
            let r = response(&format!("http://localhost{}", path), path);
            generation.insert(Snapshot::capture(RequestKey::get(&r.url), &r));
        }
        let paths: Vec<_> = generation
            .entries()
            .iter()
            .map(|s| s.key.url.path().to_string())
            .collect();
        assert_eq!(paths, vec!["/", "/a.css", "/b.js"]);
    }
}
