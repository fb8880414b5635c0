//! Asset manifest: the app shell that must be cached before a generation is usable

use serde::{Deserialize, Serialize};
use url::Url;

use super::LifecycleError;
use crate::network::Request;
use crate::store::digest;

/// Default generation label for the bundled app shell
pub const DEFAULT_VERSION: &str = "WeatherByMeridianCache_v1.17";

/// Locators making up the dashboard's app shell
pub const DEFAULT_ASSETS: &[&str] = &[
    "/",
    "/index.html",
    "/scripts/app.js",
    "/scripts/localforage.min.js",
    "/scripts/toastr.js",
    "/styles/style.css",
    "/styles/toastr.min.css",
    "/images/clear.png",
    "/images/cloudy-scattered-showers.png",
    "/images/cloudy.png",
    "/images/fog.png",
    "/images/ic_add_white_24px.svg",
    "/images/ic_refresh_white_24px.svg",
    "/images/partly-cloudy.png",
    "/images/rain.png",
    "/images/scattered-showers.png",
    "/images/sleet.png",
    "/images/snow.png",
    "/images/thunderstorm.png",
    "/images/wind.png",
];

/// Ordered list of locators paired with the label of the generation they populate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetManifest {
    pub version: String,
    pub assets: Vec<String>,
}

impl Default for AssetManifest {
    fn default() -> Self {
        Self {
            version: DEFAULT_VERSION.to_string(),
            assets: DEFAULT_ASSETS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl AssetManifest {
    pub fn new(version: impl Into<String>, assets: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            version: version.into(),
            assets: assets.into_iter().map(Into::into).collect(),
        }
    }

    /// Identifies this exact manifest; any change to the label or a locator changes it
    pub fn fingerprint(&self) -> String {
        let mut material = self.version.clone();
        for asset in &self.assets {
            material.push('\n');
            material.push_str(asset);
        }
        digest(&material)
    }

    /// Resolves every locator against `origin`, keeping manifest order
    pub fn resolve(&self, origin: &Url) -> Result<Vec<Url>, LifecycleError> {
        self.assets
            .iter()
            .map(|locator| {
                Request::resolve(origin, locator).map_err(|source| LifecycleError::InvalidLocator {
                    locator: locator.clone(),
                    source,
                })
            })
            .collect()
    }
}
