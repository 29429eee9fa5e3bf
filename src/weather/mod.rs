//! Weather forecast collaborator.
//!
//! A `ForecastProvider` fetches a forecast series for a coordinate and a
//! `ForecastCache` keeps results for a time-to-live. `WeatherService` wires
//! the two together for the API layer.

use crate::records::ForecastPoint;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

pub mod mock;
pub mod remote;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Error)]
pub enum WeatherError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("dns error: {0}")]
    Dns(String),
    #[error("connect error: {0}")]
    Connect(std::io::Error),
    #[error("io error: {0}")]
    Io(std::io::Error),
    #[error("http status {0} ({1})")]
    Http(u16, String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid coordinates: {0}")]
    InvalidCoordinates(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastLocation {
    pub lat: f64,
    pub lng: f64,
    pub name: String,
    pub country: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherForecast {
    pub location: ForecastLocation,
    /// Offset from UTC in seconds.
    pub timezone: i64,
    pub forecast: Vec<ForecastPoint>,
}

pub trait ForecastProvider: Send + Sync + fmt::Debug {
    fn fetch_forecast(&self, lat: f64, lng: f64) -> Result<WeatherForecast, WeatherError>;
}

/// Key-value store with expiry. `now` is passed in so expiry is testable.
pub trait ForecastCache: Send + Sync + fmt::Debug {
    fn get(&self, key: &str, now: Instant) -> Option<WeatherForecast>;
    fn insert(&self, key: String, forecast: WeatherForecast, now: Instant);
    fn remove(&self, key: &str);
    fn clear(&self);
}

pub fn cache_key(lat: f64, lng: f64) -> String {
    format!("weather_{lat}_{lng}")
}

#[derive(Debug)]
struct CacheEntry {
    stored_at: Instant,
    forecast: WeatherForecast,
}

#[derive(Debug)]
pub struct TtlCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl TtlCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TtlCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

// A poisoned cache behaves as empty; the provider is still reachable.
impl ForecastCache for TtlCache {
    fn get(&self, key: &str, now: Instant) -> Option<WeatherForecast> {
        let mut entries = self.entries.lock().ok()?;
        let fresh = entries
            .get(key)
            .map(|entry| now.saturating_duration_since(entry.stored_at) < self.ttl)?;
        if fresh {
            entries.get(key).map(|entry| entry.forecast.clone())
        } else {
            entries.remove(key);
            None
        }
    }

    /// Expired entries for other keys are swept on every insert.
    fn insert(&self, key: String, forecast: WeatherForecast, now: Instant) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.retain(|_, entry| now.saturating_duration_since(entry.stored_at) < self.ttl);
            entries.insert(
                key,
                CacheEntry {
                    stored_at: now,
                    forecast,
                },
            );
        }
    }

    fn remove(&self, key: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(key);
        }
    }

    fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForecastLookup {
    pub forecast: WeatherForecast,
    pub cached: bool,
}

#[derive(Debug)]
pub struct WeatherService {
    provider: Box<dyn ForecastProvider>,
    cache: Box<dyn ForecastCache>,
}

impl WeatherService {
    pub fn new(provider: Box<dyn ForecastProvider>, cache: Box<dyn ForecastCache>) -> Self {
        Self { provider, cache }
    }

    pub fn forecast(&self, lat: f64, lng: f64) -> Result<ForecastLookup, WeatherError> {
        self.forecast_at(lat, lng, Instant::now())
    }

    pub fn forecast_at(
        &self,
        lat: f64,
        lng: f64,
        now: Instant,
    ) -> Result<ForecastLookup, WeatherError> {
        validate_coordinates(lat, lng)?;

        let key = cache_key(lat, lng);
        if let Some(forecast) = self.cache.get(&key, now) {
            debug!(%key, "Serving cached forecast");
            return Ok(ForecastLookup {
                forecast,
                cached: true,
            });
        }

        let forecast = self.provider.fetch_forecast(lat, lng).map_err(|err| {
            warn!(error = %err, lat, lng, "Forecast fetch failed");
            err
        })?;
        self.cache.insert(key, forecast.clone(), now);

        Ok(ForecastLookup {
            forecast,
            cached: false,
        })
    }
}

pub fn validate_coordinates(lat: f64, lng: f64) -> Result<(), WeatherError> {
    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        return Err(WeatherError::InvalidCoordinates(format!("latitude {lat}")));
    }
    if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
        return Err(WeatherError::InvalidCoordinates(format!("longitude {lng}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weather::mock::MockForecastProvider;

    fn forecast(rainfall_mm: f64) -> WeatherForecast {
        WeatherForecast {
            location: ForecastLocation::default(),
            timezone: 0,
            forecast: vec![ForecastPoint {
                rainfall_mm,
                ..ForecastPoint::default()
            }],
        }
    }

    #[test]
    fn cache_key_uses_plain_coordinates() {
        assert_eq!(cache_key(-23.5, 119.25), "weather_-23.5_119.25");
        assert_eq!(cache_key(10.0, 20.0), "weather_10_20");
    }

    #[test]
    fn ttl_cache_expires_entries() {
        let cache = TtlCache::new(Duration::from_secs(60));
        let start = Instant::now();
        cache.insert("k".to_string(), forecast(1.0), start);

        assert!(cache.get("k", start + Duration::from_secs(59)).is_some());
        assert!(cache.get("k", start + Duration::from_secs(60)).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn insert_sweeps_expired_entries_for_other_keys() {
        let cache = TtlCache::new(Duration::from_secs(1));
        let start = Instant::now();
        for index in 0..1000 {
            cache.insert(format!("weather_{index}_0"), forecast(0.0), start);
        }
        assert_eq!(cache.len(), 1000);

        let later = start + Duration::from_secs(3600);
        cache.insert("weather_fresh".to_string(), forecast(1.0), later);

        assert_eq!(cache.len(), 1);
        assert!(cache.get("weather_fresh", later).is_some());
        assert!(cache.get("weather_0_0", later).is_none());
    }

    #[test]
    fn ttl_cache_remove_and_clear() {
        let cache = TtlCache::default();
        let now = Instant::now();
        cache.insert("a".to_string(), forecast(1.0), now);
        cache.insert("b".to_string(), forecast(2.0), now);

        cache.remove("a");
        assert!(cache.get("a", now).is_none());
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn service_serves_second_lookup_from_cache() -> Result<(), WeatherError> {
        let provider = MockForecastProvider::ok(forecast(12.0));
        let calls = provider.call_counter();
        let service = WeatherService::new(Box::new(provider), Box::new(TtlCache::default()));
        let now = Instant::now();

        let first = service.forecast_at(-23.5, 119.2, now)?;
        let second = service.forecast_at(-23.5, 119.2, now + Duration::from_secs(10))?;

        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(second.forecast, first.forecast);
        assert_eq!(calls.get(), 1);
        Ok(())
    }

    #[test]
    fn service_refetches_after_ttl() -> Result<(), WeatherError> {
        let provider = MockForecastProvider::ok(forecast(12.0));
        let calls = provider.call_counter();
        let service = WeatherService::new(
            Box::new(provider),
            Box::new(TtlCache::new(Duration::from_secs(5))),
        );
        let now = Instant::now();

        service.forecast_at(1.0, 2.0, now)?;
        let later = service.forecast_at(1.0, 2.0, now + Duration::from_secs(6))?;

        assert!(!later.cached);
        assert_eq!(calls.get(), 2);
        Ok(())
    }

    #[test]
    fn provider_failures_are_not_cached() {
        let service = WeatherService::new(
            Box::new(MockForecastProvider::failing()),
            Box::new(TtlCache::default()),
        );

        assert!(matches!(
            service.forecast(1.0, 2.0),
            Err(WeatherError::Http(503, _))
        ));
    }

    #[test]
    fn out_of_range_coordinates_are_rejected() {
        let service = WeatherService::new(
            Box::new(MockForecastProvider::ok(forecast(0.0))),
            Box::new(TtlCache::default()),
        );

        assert!(matches!(
            service.forecast(91.0, 0.0),
            Err(WeatherError::InvalidCoordinates(_))
        ));
        assert!(matches!(
            service.forecast(0.0, f64::NAN),
            Err(WeatherError::InvalidCoordinates(_))
        ));
    }
}
