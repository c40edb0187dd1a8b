use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};

const HTTP_TIMEOUT_SECS: u64 = 10;

/// One entry of the provider's ranked suggestion list. Only `address`,
/// `latitude` and `longitude` are persisted; the rest is classification
/// metadata carried for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct GeocodeMatch {
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub category: Option<String>,
    pub province: Option<String>,
    pub city: Option<String>,
    pub district: Option<String>,
}

/// Resolves a free-text place name into the provider's ranked matches.
/// An empty vec is a well-formed zero-match response, not a failure.
#[async_trait]
pub trait GeocodeResolver: Send + Sync {
    async fn resolve(&self, keyword: &str) -> AppResult<Vec<GeocodeMatch>>;
}

#[derive(Clone)]
pub struct GeocoderService {
    inner: Arc<dyn GeocodeResolver>,
}

impl std::fmt::Debug for GeocoderService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeocoderService").finish_non_exhaustive()
    }
}

impl GeocoderService {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        let api_key = config
            .geocoder_api_key
            .clone()
            .ok_or_else(|| AppError::Config("GEOCODER_API_KEY must be set".into()))?;
        let client = HttpSuggestClient::new(config, api_key)?;
        Ok(Self {
            inner: Arc::new(client),
        })
    }

    #[cfg(test)]
    pub fn from_resolver(inner: Arc<dyn GeocodeResolver>) -> Self {
        Self { inner }
    }

    pub async fn resolve(&self, keyword: &str) -> AppResult<Vec<GeocodeMatch>> {
        self.inner.resolve(keyword).await
    }
}

/// Client for the place-suggestion endpoint. The region and category filters
/// are fixed per process; only the keyword varies per call.
struct HttpSuggestClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: SecretString,
    region: String,
    category_filter: String,
}

impl HttpSuggestClient {
    fn new(config: &AppConfig, api_key: SecretString) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http,
            endpoint: config.suggest_endpoint.clone(),
            api_key,
            region: config.geocoder_region.clone(),
            category_filter: format!("category={}", config.geocoder_category),
        })
    }
}

#[async_trait]
impl GeocodeResolver for HttpSuggestClient {
    async fn resolve(&self, keyword: &str) -> AppResult<Vec<GeocodeMatch>> {
        let response = self
            .http
            .get(&self.endpoint)
            .query(&[
                ("region", self.region.as_str()),
                ("keyword", keyword),
                ("filter", self.category_filter.as_str()),
                ("key", self.api_key.expose_secret()),
            ])
            .send()
            .await?
            .error_for_status()?;

        // Body is read as text first so a malformed payload surfaces as a
        // decode error, distinct from the transport failures above.
        let body = response.text().await?;
        parse_envelope(&body)
    }
}

fn parse_envelope(body: &str) -> AppResult<Vec<GeocodeMatch>> {
    let envelope: SuggestionEnvelope = serde_json::from_str(body)?;

    if let Some(status) = envelope.status {
        if status != 0 {
            return Err(AppError::Provider {
                status,
                message: envelope.message.unwrap_or_default(),
            });
        }
    }

    Ok(envelope
        .data
        .into_iter()
        .filter_map(match_from_hit)
        .collect())
}

fn match_from_hit(hit: SuggestionHit) -> Option<GeocodeMatch> {
    // A hit without usable coordinates cannot enrich anything; treat it as
    // absent rather than persisting zeros.
    let location = hit.location?;
    let latitude = location.lat?;
    let longitude = location.lng?;
    Some(GeocodeMatch {
        address: hit.address.unwrap_or_default(),
        latitude,
        longitude,
        category: hit.category,
        province: hit.province,
        city: hit.city,
        district: hit.district,
    })
}

#[derive(Deserialize)]
struct SuggestionEnvelope {
    status: Option<i64>,
    message: Option<String>,
    #[serde(default)]
    data: Vec<SuggestionHit>,
}

#[derive(Deserialize)]
struct SuggestionHit {
    address: Option<String>,
    category: Option<String>,
    location: Option<HitLocation>,
    province: Option<String>,
    city: Option<String>,
    district: Option<String>,
}

#[derive(Deserialize)]
struct HitLocation {
    lat: Option<f64>,
    lng: Option<f64>,
}
