//! Client forecast agent
//!
//! The agent is the page-side half of the dashboard. For every location it
//! shows whatever the snapshot store already holds, then asks the network
//! (through the intermediary) for fresh data and reconciles the two. Live
//! responses that came from the network are written back into the current
//! generation as dynamic entries, last write wins.

mod dashboard;
mod payload;
mod preferences;
mod refresh;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use url::Url;

pub use dashboard::{Dashboard, ForecastCard, UpdateSource};
pub use payload::{parse_forecast, Coordinates, ForecastPayload, PayloadError, PayloadPointers};
pub use preferences::{PreferenceError, PreferenceStore, PREFERRED_LOCATIONS_KEY};
pub use refresh::{RefreshConfig, RefreshHandle, RefreshMessage};

#[cfg(test)]
pub(crate) use payload::sample_forecast;

use crate::intermediary::{ClientId, InterceptedResponse, Registration};
use crate::network::{NetworkError, Request};
use crate::store::{Snapshot, SnapshotStore, StoreError};

/// Errors raised by agent operations
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Please enter a location")]
    EmptyLocation,

    #[error("Location already added: {0}")]
    AlreadyAdded(String),

    /// The forecast provider found no place by that name
    #[error("Looks like an incorrect location: {0}")]
    UnknownLocation(String),

    /// The air-quality source rejected the request (403/404)
    #[error("Air-quality source for {location} looks down right now (status {status})")]
    SourceUnavailable { location: String, status: u16 },

    #[error("Request to {url} failed with status {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("Invalid request URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error(transparent)]
    Preferences(#[from] PreferenceError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Endpoint templates and payload layout the agent works with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Forecast URL with a `{location}` placeholder
    pub forecast_url: String,
    /// Air-quality URL with `{lat}`, `{long}` and `{key}` placeholders
    pub air_quality_url: String,
    pub air_quality_key: String,
    pub pointers: PayloadPointers,
    /// Whether live responses are written back to the snapshot store
    pub store_dynamic: bool,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            forecast_url: "https://query.yahooapis.com/v1/public/yql?format=json&q=select * from weather.forecast where woeid in (select woeid from geo.places(1) where text='{location}') and u='c'".to_string(),
            air_quality_url: "https://api.airvisual.com/v2/nearest_city?lat={lat}&lon={long}&key={key}".to_string(),
            air_quality_key: String::new(),
            pointers: PayloadPointers::default(),
            store_dynamic: true,
        }
    }
}

fn encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

impl AgentSettings {
    pub fn forecast_url(&self, location: &str) -> Result<Url, url::ParseError> {
        Url::parse(&self.forecast_url.replace("{location}", &encode(location)))
    }

    pub fn air_quality_url(&self, coordinates: &Coordinates) -> Result<Url, url::ParseError> {
        Url::parse(
            &self
                .air_quality_url
                .replace("{lat}", &encode(&coordinates.latitude))
                .replace("{long}", &encode(&coordinates.longitude))
                .replace("{key}", &encode(&self.air_quality_key)),
        )
    }
}

/// Result of [`ForecastAgent::get_forecast`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForecastOutcome {
    pub location: String,
    /// A snapshot was found and shown before the live request
    pub shown_cached: bool,
    /// The live response was newer (or as new) and replaced the card
    pub applied_live: bool,
    /// The live response was served by the intermediary from a snapshot
    pub live_from_snapshot: bool,
    /// Air-quality data was attached from the live request
    pub air_quality: bool,
}

/// Result of [`ForecastAgent::add_location`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    Added(ForecastOutcome),
    /// Offline: the location is saved and will be fetched once the network is back
    Deferred(String),
}

/// Result of [`ForecastAgent::refresh_all`]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RefreshSummary {
    pub refreshed: Vec<String>,
    /// Refreshed locations whose live request was answered from a snapshot
    pub from_snapshot: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl RefreshSummary {
    /// Whether every refreshed card came from a snapshot, so nothing new was fetched
    pub fn served_from_snapshots(&self) -> bool {
        !self.refreshed.is_empty() && self.from_snapshot.len() == self.refreshed.len()
    }
}

/// Page-side forecast logic
pub struct ForecastAgent {
    registration: Arc<Registration>,
    store: Arc<dyn SnapshotStore>,
    client: ClientId,
    preferences: PreferenceStore,
    settings: AgentSettings,
    dashboard: Mutex<Dashboard>,
    preferred: Mutex<Vec<String>>,
}

impl ForecastAgent {
    /// Opens the agent's page on `registration`
    pub async fn open(
        registration: Arc<Registration>,
        page: Url,
        preferences: PreferenceStore,
        settings: AgentSettings,
    ) -> Self {
        let client = registration.open_client(page).await;
        let store = registration.store();
        Self {
            registration,
            store,
            client,
            preferences,
            settings,
            dashboard: Mutex::new(Dashboard::new()),
            preferred: Mutex::new(Vec::new()),
        }
    }

    pub fn client(&self) -> ClientId {
        self.client
    }

    pub async fn card(&self, location: &str) -> Option<ForecastCard> {
        self.dashboard.lock().await.card(location).cloned()
    }

    pub async fn cards(&self) -> Vec<ForecastCard> {
        self.dashboard.lock().await.cards().to_vec()
    }

    pub async fn preferred_locations(&self) -> Vec<String> {
        self.preferred.lock().await.clone()
    }

    /// Reads the stored location list without fetching anything
    pub async fn load_preferences(&self) -> Result<Vec<String>, AgentError> {
        let locations = self.preferences.preferred_locations().await?;
        *self.preferred.lock().await = locations.clone();
        Ok(locations)
    }

    /// Direct, read-only lookup in the current generation
    async fn cached_body(&self, request: &Request) -> Option<Vec<u8>> {
        match self.store.lookup_current(&request.key()).await {
            Ok(Some(snapshot)) => Some(snapshot.body),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(url = %request.url, error = %e, "snapshot lookup failed");
                None
            }
        }
    }

    /// Writes a live network response back as a dynamic entry
    async fn remember_response(&self, request: &Request, intercepted: &InterceptedResponse) {
        if !self.settings.store_dynamic || intercepted.from_snapshot() {
            return;
        }
        let snapshot = Snapshot::capture(request.key(), &intercepted.response);
        match self.store.insert_current(snapshot).await {
            Ok(Some(generation)) => {
                tracing::debug!(url = %request.url, %generation, "stored dynamic snapshot")
            }
            Ok(None) => tracing::debug!(url = %request.url, "no current generation for dynamic snapshot"),
            Err(e) => tracing::warn!(url = %request.url, error = %e, "failed to store dynamic snapshot"),
        }
    }

    /// Adds `location` to the preferred list and persists it, if new
    async fn remember_location(&self, location: &str) -> Result<(), AgentError> {
        let mut preferred = self.preferred.lock().await;
        if preferred.iter().any(|l| l == location) {
            return Ok(());
        }
        preferred.push(location.to_string());
        self.preferences.save_preferred_locations(&preferred).await?;
        tracing::info!(location, "location saved");
        Ok(())
    }

    /// Shows the cached forecast for `location`, then fetches and applies the live one
    pub async fn get_forecast(&self, location: &str) -> Result<ForecastOutcome, AgentError> {
        let request = Request::get(self.settings.forecast_url(location)?);

        let mut shown_cached = false;
        if let Some(body) = self.cached_body(&request).await {
            match parse_forecast(&body, &self.settings.pointers) {
                Ok(payload) => {
                    shown_cached = self
                        .dashboard
                        .lock()
                        .await
                        .apply_forecast(location, &payload, UpdateSource::Cached);
                    tracing::debug!(location, shown_cached, "cached forecast");
                    if let Some(coordinates) = &payload.coordinates {
                        self.show_cached_air_quality(location, coordinates).await;
                    }
                }
                Err(e) => tracing::debug!(location, error = %e, "ignoring unreadable cached forecast"),
            }
        }

        let intercepted = self.registration.handle_fetch(self.client, &request).await?;
        let status = intercepted.response.status;
        if status != 200 {
            return Err(AgentError::HttpStatus {
                url: request.url.to_string(),
                status,
            });
        }

        let payload = match parse_forecast(&intercepted.response.body, &self.settings.pointers) {
            Ok(payload) => payload,
            Err(PayloadError::NoResults) => {
                return Err(AgentError::UnknownLocation(location.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(coordinates) = &payload.coordinates {
            self.preferences.set_coordinates(location, coordinates).await?;
        }
        let applied_live = self
            .dashboard
            .lock()
            .await
            .apply_forecast(location, &payload, UpdateSource::Live);
        self.remember_response(&request, &intercepted).await;

        let air_quality = match &payload.coordinates {
            Some(coordinates) => match self.fetch_air_quality(location, coordinates).await {
                Ok(attached) => attached,
                Err(e) => {
                    tracing::warn!(location, error = %e, "air quality unavailable");
                    false
                }
            },
            None => false,
        };

        self.remember_location(location).await?;

        Ok(ForecastOutcome {
            location: location.to_string(),
            shown_cached,
            applied_live,
            live_from_snapshot: intercepted.from_snapshot(),
            air_quality,
        })
    }

    async fn show_cached_air_quality(&self, location: &str, coordinates: &Coordinates) {
        let Ok(url) = self.settings.air_quality_url(coordinates) else {
            return;
        };
        let request = Request::get(url);
        if let Some(body) = self.cached_body(&request).await {
            if let Ok(value) = serde_json::from_slice::<Value>(&body) {
                self.dashboard.lock().await.apply_air_quality(location, value);
            }
        }
    }

    /// Fetches air quality near `coordinates` and attaches it to the location's card
    ///
    /// Any cached reading is shown first.
    pub async fn fetch_air_quality(
        &self,
        location: &str,
        coordinates: &Coordinates,
    ) -> Result<bool, AgentError> {
        self.show_cached_air_quality(location, coordinates).await;

        let request = Request::get(self.settings.air_quality_url(coordinates)?);
        let intercepted = self.registration.handle_fetch(self.client, &request).await?;
        match intercepted.response.status {
            200 => {
                let value: Value = intercepted.response.json().map_err(PayloadError::from)?;
                let attached = self.dashboard.lock().await.apply_air_quality(location, value);
                self.remember_response(&request, &intercepted).await;
                Ok(attached)
            }
            status @ (403 | 404) => Err(AgentError::SourceUnavailable {
                location: location.to_string(),
                status,
            }),
            status => Err(AgentError::HttpStatus {
                url: request.url.to_string(),
                status,
            }),
        }
    }

    /// Adds a new location and fetches its forecast
    ///
    /// If the network is unreachable the location is saved anyway and
    /// [`AddOutcome::Deferred`] is returned.
    pub async fn add_location(&self, name: &str) -> Result<AddOutcome, AgentError> {
        let location = name.trim();
        if location.is_empty() {
            return Err(AgentError::EmptyLocation);
        }
        if self.preferred.lock().await.iter().any(|l| l == location) {
            return Err(AgentError::AlreadyAdded(location.to_string()));
        }

        match self.get_forecast(location).await {
            Ok(outcome) => Ok(AddOutcome::Added(outcome)),
            Err(AgentError::Network(e)) => {
                tracing::info!(location, error = %e, "offline; location will be fetched once online");
                self.remember_location(location).await?;
                Ok(AddOutcome::Deferred(location.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Restores the stored locations and fetches each one
    ///
    /// Individual fetch failures are logged; the return value is the number of
    /// locations restored.
    pub async fn startup(&self) -> Result<usize, AgentError> {
        let locations = self.load_preferences().await?;
        if locations.is_empty() {
            tracing::info!("no saved locations");
            return Ok(0);
        }
        tracing::info!(count = locations.len(), "loading recent forecast data");
        for location in &locations {
            if let Err(e) = self.get_forecast(location).await {
                tracing::warn!(%location, error = %e, "forecast unavailable");
            }
        }
        Ok(locations.len())
    }

    /// Re-fetches every card currently shown
    pub async fn refresh_all(&self) -> RefreshSummary {
        let locations = self.dashboard.lock().await.locations();
        let results = futures::future::join_all(
            locations.iter().map(|location| self.get_forecast(location)),
        )
        .await;

        let mut summary = RefreshSummary::default();
        for (location, result) in locations.into_iter().zip(results) {
            match result {
                Ok(outcome) => {
                    if outcome.live_from_snapshot {
                        summary.from_snapshot.push(location.clone());
                    }
                    summary.refreshed.push(location);
                }
                Err(e) => summary.failed.push((location, e.to_string())),
            }
        }
        summary
    }
}
