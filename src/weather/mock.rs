use crate::weather::{ForecastProvider, WeatherError, WeatherForecast};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Shared view of how many times a mock provider was asked for a forecast.
#[derive(Debug, Clone, Default)]
pub struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct MockForecastProvider {
    forecast: Option<WeatherForecast>,
    calls: CallCounter,
}

impl MockForecastProvider {
    pub fn ok(forecast: WeatherForecast) -> Self {
        Self {
            forecast: Some(forecast),
            calls: CallCounter::default(),
        }
    }

    /// Every fetch answers with HTTP 503.
    pub fn failing() -> Self {
        Self {
            forecast: None,
            calls: CallCounter::default(),
        }
    }

    pub fn call_counter(&self) -> CallCounter {
        self.calls.clone()
    }
}

impl ForecastProvider for MockForecastProvider {
    fn fetch_forecast(&self, _lat: f64, _lng: f64) -> Result<WeatherForecast, WeatherError> {
        self.calls.bump();
        self.forecast
            .clone()
            .ok_or_else(|| WeatherError::Http(503, "mock provider unavailable".to_string()))
    }
}
