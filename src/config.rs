use std::{env, io};

use secrecy::SecretString;
use serde::Serialize;
use tracing::debug;

const DEFAULT_SUGGEST_ENDPOINT: &str = "https://apis.map.qq.com/ws/place/v1/suggestion";
const DEFAULT_QUEUE_CAPACITY: usize = 10_000;
const DEFAULT_RATE_PER_SEC: f64 = 2.0;
const DEFAULT_RATE_BURST: u32 = 5;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_path: String,
    pub suggest_endpoint: String,
    pub geocoder_api_key: Option<SecretString>,
    pub geocoder_region: String,
    pub geocoder_category: String,
    pub rate_per_sec: f64,
    pub rate_burst: u32,
    pub queue_capacity: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicAppConfig {
    pub database_path: String,
    pub suggest_endpoint: String,
    pub geocoder_region: String,
    pub geocoder_category: String,
    pub rate_per_sec: f64,
    pub rate_burst: u32,
    pub queue_capacity: usize,
    pub has_geocoder_key: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        Self {
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "geo-backfill.db".to_string()),
            suggest_endpoint: env::var("GEOCODER_SUGGEST_ENDPOINT")
                .unwrap_or_else(|_| DEFAULT_SUGGEST_ENDPOINT.to_string()),
            geocoder_api_key: env::var("GEOCODER_API_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(SecretString::from),
            geocoder_region: env::var("GEOCODER_REGION")
                .unwrap_or_else(|_| "Nanjing".to_string()),
            geocoder_category: env::var("GEOCODER_CATEGORY")
                .unwrap_or_else(|_| "residential".to_string()),
            rate_per_sec: parse_f64("GEOCODER_RATE_PER_SEC", DEFAULT_RATE_PER_SEC),
            rate_burst: parse_u32("GEOCODER_RATE_BURST", DEFAULT_RATE_BURST).max(1),
            queue_capacity: parse_usize("QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY).max(1),
        }
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        PublicAppConfig {
            database_path: self.database_path.clone(),
            suggest_endpoint: self.suggest_endpoint.clone(),
            geocoder_region: self.geocoder_region.clone(),
            geocoder_category: self.geocoder_category.clone(),
            rate_per_sec: self.rate_per_sec,
            rate_burst: self.rate_burst,
            queue_capacity: self.queue_capacity,
            has_geocoder_key: self.geocoder_api_key.is_some(),
        }
    }
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| *v > 0.0)
        .unwrap_or(default)
}

fn parse_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}
