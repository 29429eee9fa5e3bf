use pit_risk::assess::road::road_warnings;
use pit_risk::assess::{self, AssessmentSettings};
use pit_risk::error::AppError;
use pit_risk::records::{ConditionTier, ReportSubmission};
use pit_risk::site::parse_site;
use pit_risk::state::AppState;
use std::io::{Read, Write};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const SITE: &str = r#"{
    "roads": [
        {"id": "ramp", "name": "Ramp A", "priority": "high",
         "requiredCrossFall": 3.0, "currentCrossFall": 3.0},
        {"id": "haul", "name": "Haul B", "requiredCrossFall": 2.5, "currentCrossFall": 2.5}
    ]
}"#;

fn shared_state(settings: AssessmentSettings) -> Result<Arc<RwLock<AppState>>, Box<dyn std::error::Error>> {
    let state = AppState::from_site(parse_site(SITE)?, settings, UNIX_EPOCH)?;
    Ok(Arc::new(RwLock::new(state)))
}

fn report(truck: &str, current_speed: f64, x: f64, y: f64) -> ReportSubmission {
    ReportSubmission {
        truck_id: truck.to_string(),
        payload_tonnes: 220.0,
        average_speed: 30.0,
        current_speed,
        x_m: x,
        y_m: y,
        timestamp: None,
    }
}

#[test]
fn confirmed_spots_surface_as_warnings_until_they_expire() -> Result<(), Box<dyn std::error::Error>> {
    let state = shared_state(AssessmentSettings::default())?;
    let day = Duration::from_secs(86_400);
    let start = UNIX_EPOCH + day * 100;

    assess::record_report_at(&state, "ramp", &report("T1", 15.0, 100.0, 200.0), start)?;
    assess::record_report_at(&state, "ramp", &report("T2", 14.0, 103.0, 204.0), start)?;
    assess::record_report_at(&state, "haul", &report("T3", 20.0, 10.0, 10.0), start)?;
    assess::record_report_at(&state, "haul", &report("T4", 19.0, 11.0, 11.0), start)?;

    let assessed = assess::active_road_sites(&state, start)?;
    let warnings = road_warnings(
        assessed
            .iter()
            .map(|(road, sites)| (road, sites.as_slice())),
    );
    assert_eq!(warnings.len(), 2);
    assert_eq!(warnings[0].road_id, "ramp");
    assert_eq!(warnings[0].critical_count, 1);
    assert_eq!(warnings[1].road_id, "haul");
    assert_eq!(warnings[1].soft_count, 1);

    let affected = assess::prune_and_refresh(&state, start + day * 31)?;
    assert_eq!(affected, vec!["haul".to_string(), "ramp".to_string()]);

    let guard = state.read().map_err(|_| AppError::StateLock)?;
    assert!(guard.reports().is_empty());
    assert!(
        guard
            .roads()
            .iter()
            .all(|road| road.condition == ConditionTier::Good)
    );
    Ok(())
}

#[test]
fn road_condition_changes_are_published() -> Result<(), Box<dyn std::error::Error>> {
    let state = shared_state(AssessmentSettings::default())?;
    let mut receiver = state
        .read()
        .map_err(|_| AppError::StateLock)?
        .subscribe_road_conditions();
    let now = SystemTime::now();

    assess::record_report_at(&state, "ramp", &report("T1", 20.0, 0.0, 0.0), now)?;
    assess::record_report_at(&state, "ramp", &report("T2", 20.0, 2.0, 2.0), now)?;

    assert!(receiver.has_changed()?);
    let conditions = receiver.borrow_and_update().clone();
    let ramp = conditions
        .iter()
        .find(|condition| condition.road_id == "ramp")
        .ok_or("ramp missing from published conditions")?;
    assert_eq!(ramp.condition, ConditionTier::Soft);

    assess::clear_road(&state, "ramp")?;
    assert_eq!(receiver.borrow_and_update()[0].condition, ConditionTier::Good);
    Ok(())
}

#[test]
fn wider_tolerance_merges_nearby_reports() -> Result<(), Box<dyn std::error::Error>> {
    let narrow = shared_state(AssessmentSettings::default())?;
    let wide = shared_state(AssessmentSettings {
        tolerance_m: 20.0,
        ..AssessmentSettings::default()
    })?;
    let now = SystemTime::now();

    for state in [&narrow, &wide] {
        assess::record_report_at(state, "ramp", &report("T1", 15.0, 1.0, 1.0), now)?;
        assess::record_report_at(state, "ramp", &report("T2", 15.0, 12.0, 12.0), now)?;
    }

    assert_eq!(assess::refresh_road(&narrow, "ramp")?.sites.len(), 2);
    let merged = assess::refresh_road(&wide, "ramp")?;
    assert_eq!(merged.sites.len(), 1);
    assert_eq!(merged.condition, ConditionTier::Critical);
    Ok(())
}

fn http_request(port: u16, request: String) -> std::io::Result<String> {
    let mut stream = std::net::TcpStream::connect(("127.0.0.1", port))?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    stream.write_all(request.as_bytes())?;
    let mut response = String::new();
    stream.read_to_string(&mut response)?;
    Ok(response)
}

#[tokio::test(flavor = "multi_thread")]
async fn telemetry_round_trips_over_http() -> Result<(), Box<dyn std::error::Error>> {
    let state = shared_state(AssessmentSettings::default())?;
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, pit_risk::api::router(state)).await;
    });

    let body = r#"{"truckId":"T1","payloadTonnes":200,"averageSpeed":30,"currentSpeed":15,"x_m":5,"y_m":5}"#;
    let request = format!(
        "POST /api/roads/ramp/telemetry HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let created = tokio::task::spawn_blocking(move || http_request(port, request)).await??;

    let missing = tokio::task::spawn_blocking(move || {
        http_request(
            port,
            "GET /api/roads/nope/softspots HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n"
                .to_string(),
        )
    })
    .await??;
    server.abort();

    assert!(created.starts_with("HTTP/1.1 201"));
    assert!(created.contains("\"severity\":\"CRITICAL\""));
    assert!(created.contains("\"confidence\":\"LOW\""));
    assert!(missing.starts_with("HTTP/1.1 404"));
    assert!(missing.contains("\"errorCode\":\"NOT_FOUND\""));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn road_survey_update_over_http() -> Result<(), Box<dyn std::error::Error>> {
    let state = shared_state(AssessmentSettings::default())?;
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, pit_risk::api::router(state)).await;
    });

    let put = |body: &'static str| {
        format!(
            "PUT /api/roads/ramp HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        )
    };
    let negative = put(r#"{"currentCrossFall":-1}"#);
    let regraded = put(r#"{"currentCrossFall":1.0,"waterLevel":10}"#);
    let rejected = tokio::task::spawn_blocking(move || http_request(port, negative)).await??;
    let updated = tokio::task::spawn_blocking(move || http_request(port, regraded)).await??;
    server.abort();

    assert!(rejected.starts_with("HTTP/1.1 400"));
    assert!(rejected.contains("\"errorCode\":\"INVALID_REQUEST\""));
    assert!(updated.starts_with("HTTP/1.1 200"));
    assert!(updated.contains("\"condition\":\"CRITICAL\""));
    assert!(updated.contains("\"risk\":\"severe\""));
    Ok(())
}
