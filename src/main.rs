use pit_risk::assess::{self, AssessmentSettings};
use pit_risk::config::{self, Config};
use pit_risk::site::load_site_from_path;
use pit_risk::state::AppState;
use pit_risk::weather::remote::RemoteForecastProvider;
use pit_risk::weather::{TtlCache, WeatherService};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;
use tracing::Level;

fn init_tracing(level: &str) {
    let level = level.parse::<Level>().unwrap_or(Level::INFO);
    let subscriber = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(level)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::load_default()?;
    init_tracing(config.log_level());
    tracing::info!(
        config_path = config::DEFAULT_CONFIG_PATH,
        app = %config.app.name,
        "pit-risk starting"
    );

    let settings = AssessmentSettings {
        tolerance_m: config.tolerance_m(),
        report_retention: config.report_retention(),
    };
    let mut app_state = load_state(&config, settings);
    app_state.set_weather(build_weather(&config));
    let state = Arc::new(RwLock::new(app_state));

    refresh_all(&state);

    let stop_flag = Arc::new(AtomicBool::new(false));
    let sweep_interval = config.sweep_interval();
    tracing::info!(
        interval_secs = sweep_interval.as_secs(),
        "Starting retention sweep thread"
    );
    let _retention_handle =
        assess::spawn_retention_thread(Arc::clone(&state), sweep_interval, Arc::clone(&stop_flag));

    let app = pit_risk::api::router(Arc::clone(&state));
    let port = config.server_port();
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "API server listening");
    axum::serve(listener, app).await?;

    stop_flag.store(true, Ordering::Relaxed);

    Ok(())
}

/// Seed from the site file, or start empty when it is missing or invalid.
fn load_state(config: &Config, settings: AssessmentSettings) -> AppState {
    let Some(path) = config.site_path() else {
        tracing::info!("No site file configured, starting with an empty store");
        return AppState::new(settings);
    };

    let site = match load_site_from_path(path) {
        Ok(site) => site,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to load site file, starting empty");
            return AppState::new(settings);
        }
    };
    let counts = (site.sumps.len(), site.pumps.len(), site.roads.len(), site.reports.len());

    match AppState::from_site(site, settings.clone(), SystemTime::now()) {
        Ok(state) => {
            tracing::info!(
                path = %path.display(),
                sumps = counts.0,
                pumps = counts.1,
                roads = counts.2,
                reports = counts.3,
                "Site loaded"
            );
            state
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to seed site, starting empty");
            AppState::new(settings)
        }
    }
}

fn build_weather(config: &Config) -> Option<Arc<WeatherService>> {
    let Some(endpoint) = config.weather_endpoint() else {
        tracing::warn!("No weather endpoint configured, forecast lookups disabled");
        return None;
    };

    tracing::info!(endpoint, "Weather provider configured");
    let provider = RemoteForecastProvider::new(
        endpoint.to_string(),
        config.weather_timeout(),
        config.weather_api_key().map(str::to_string),
    );
    let cache = TtlCache::new(config.weather_cache_ttl());
    Some(Arc::new(WeatherService::new(
        Box::new(provider),
        Box::new(cache),
    )))
}

/// Derived fields are recomputed after load rather than trusted from the file.
fn refresh_all(state: &Arc<RwLock<AppState>>) {
    match assess::assess_active_sumps(state) {
        Ok(analyses) => tracing::info!(sumps = analyses.len(), "Sumps assessed"),
        Err(e) => tracing::warn!(error = %e, "Failed to assess sumps at startup"),
    }

    let road_ids: Vec<String> = match state.read() {
        Ok(guard) => guard.roads().iter().map(|road| road.id.clone()).collect(),
        Err(_) => {
            tracing::warn!("State lock poisoned while listing roads");
            return;
        }
    };
    for road_id in &road_ids {
        if let Err(e) = assess::refresh_road(state, road_id) {
            tracing::warn!(road_id = %road_id, error = %e, "Failed to assess road at startup");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid_toml() -> Result<(), Box<dyn std::error::Error>> {
        let _config = config::load_default()?;
        Ok(())
    }

    #[test]
    fn default_site_seeds_and_refreshes() -> Result<(), Box<dyn std::error::Error>> {
        let config = config::load_default()?;
        let state = Arc::new(RwLock::new(load_state(&config, AssessmentSettings::default())));

        refresh_all(&state);

        let guard = state.read().map_err(|_| "state lock poisoned")?;
        assert!(!guard.sumps().is_empty());
        assert!(!guard.roads().is_empty());
        Ok(())
    }
}
