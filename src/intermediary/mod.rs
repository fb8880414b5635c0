//! Network intermediary
//!
//! Sits between pages and the network. A [`Registration`] installs a
//! versioned app shell into the snapshot store, activates it (evicting every
//! other generation), and from then on answers requests from the pages it
//! controls cache-first through the [`Interceptor`].

mod interceptor;
mod lifecycle;
mod manifest;
mod registration;

pub use interceptor::{InterceptedResponse, Interceptor, ResponseSource};
pub use lifecycle::{
    activate, fetch_candidate, install, ActivationReport, LifecycleError, LifecycleState, LifecycleTask, Worker,
    WorkerId,
};
pub use manifest::{AssetManifest, DEFAULT_ASSETS, DEFAULT_VERSION};
pub use registration::{Client, ClientId, Registration, UpdateOutcome};
