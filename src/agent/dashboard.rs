//! Forecast card state and cached-vs-live reconciliation

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use super::payload::ForecastPayload;

/// Where a card update came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UpdateSource {
    /// Direct snapshot store lookup, possibly stale
    Cached,
    /// Request issued through the intermediary
    Live,
}

/// One location's forecast card
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastCard {
    pub location: String,
    /// Creation time of the forecast currently shown
    pub last_updated: Option<DateTime<Utc>>,
    pub source: UpdateSource,
    pub forecast: Value,
    pub air_quality: Option<Value>,
}

/// Visible cards, in the order they were first shown
#[derive(Debug, Default)]
pub struct Dashboard {
    cards: Vec<ForecastCard>,
}

impl Dashboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shows `payload` on the location's card
    ///
    /// A card already showing a newer forecast is left alone and `false` is
    /// returned. Payloads without a creation time always apply.
    pub fn apply_forecast(
        &mut self,
        location: &str,
        payload: &ForecastPayload,
        source: UpdateSource,
    ) -> bool {
        let Some(card) = self.cards.iter_mut().find(|c| c.location == location) else {
            self.cards.push(ForecastCard {
                location: location.to_string(),
                last_updated: payload.created,
                source,
                forecast: payload.body.clone(),
                air_quality: None,
            });
            return true;
        };

        if let (Some(shown), Some(incoming)) = (card.last_updated, payload.created) {
            if incoming < shown {
                tracing::debug!(location, ?source, "keeping newer forecast");
                return false;
            }
        }

        card.last_updated = payload.created.or(card.last_updated);
        card.source = source;
        card.forecast = payload.body.clone();
        true
    }

    /// Attaches air-quality data to an existing card
    pub fn apply_air_quality(&mut self, location: &str, air_quality: Value) -> bool {
        match self.cards.iter_mut().find(|c| c.location == location) {
            Some(card) => {
                card.air_quality = Some(air_quality);
                true
            }
            None => false,
        }
    }

    pub fn card(&self, location: &str) -> Option<&ForecastCard> {
        self.cards.iter().find(|c| c.location == location)
    }

    pub fn cards(&self) -> &[ForecastCard] {
        &self.cards
    }

    pub fn locations(&self) -> Vec<String> {
        self.cards.iter().map(|c| c.location.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }
}
