//! Forecast provider over plain HTTP.
//!
//! Issues `GET {path}?lat=..&lon=..&units=metric&cnt=40[&appid=..]` and reads
//! an OpenWeatherMap-style 5-day/3-hour forecast body.

use crate::records::ForecastPoint;
use crate::weather::{ForecastLocation, ForecastProvider, WeatherError, WeatherForecast};
use serde::Deserialize;
use std::fmt;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

/// 5 days of 3-hour windows.
const FORECAST_COUNT: u32 = 40;

pub struct RemoteForecastProvider {
    endpoint: String,
    timeout: Duration,
    api_key: Option<String>,
}

impl RemoteForecastProvider {
    pub fn new(endpoint: String, timeout: Duration, api_key: Option<String>) -> Self {
        Self {
            endpoint,
            timeout,
            api_key,
        }
    }

    fn request_path(&self, base_path: &str, lat: f64, lng: f64) -> String {
        let separator = if base_path.contains('?') { '&' } else { '?' };
        let mut path = format!(
            "{base_path}{separator}lat={lat}&lon={lng}&units=metric&cnt={FORECAST_COUNT}"
        );
        if let Some(key) = self.api_key.as_deref() {
            path.push_str("&appid=");
            path.push_str(key);
        }
        path
    }
}

impl fmt::Debug for RemoteForecastProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteForecastProvider")
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .field("has_api_key", &self.api_key.is_some())
            .finish()
    }
}

impl ForecastProvider for RemoteForecastProvider {
    fn fetch_forecast(&self, lat: f64, lng: f64) -> Result<WeatherForecast, WeatherError> {
        let parsed = parse_http_url(&self.endpoint)?;
        let path = self.request_path(&parsed.path, lat, lng);
        let body = send_http_get(&parsed, &path, self.timeout)?;
        let response: ForecastResponse = serde_json::from_str(&body)?;
        Ok(response.into_forecast(lat, lng))
    }
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    #[serde(default)]
    city: Option<CityBlock>,
    #[serde(default)]
    list: Vec<ForecastItem>,
}

#[derive(Debug, Deserialize)]
struct CityBlock {
    #[serde(default)]
    name: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    timezone: i64,
    coord: Option<Coord>,
}

#[derive(Debug, Deserialize)]
struct Coord {
    lat: f64,
    lon: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ForecastItem {
    /// Unix seconds.
    dt: Option<i64>,
    main: MainBlock,
    /// Probability of precipitation, 0..1.
    pop: f64,
    rain: Option<RainBlock>,
    wind: WindBlock,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MainBlock {
    humidity: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RainBlock {
    #[serde(rename = "3h")]
    three_hours: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WindBlock {
    speed: f64,
}

impl ForecastResponse {
    fn into_forecast(self, lat: f64, lng: f64) -> WeatherForecast {
        let (location, timezone) = match self.city {
            Some(city) => {
                let (lat, lng) = city.coord.map(|c| (c.lat, c.lon)).unwrap_or((lat, lng));
                (
                    ForecastLocation {
                        lat,
                        lng,
                        name: city.name,
                        country: city.country,
                    },
                    city.timezone,
                )
            }
            None => (
                ForecastLocation {
                    lat,
                    lng,
                    ..ForecastLocation::default()
                },
                0,
            ),
        };

        WeatherForecast {
            location,
            timezone,
            forecast: self.list.iter().map(ForecastItem::to_point).collect(),
        }
    }
}

impl ForecastItem {
    fn to_point(&self) -> ForecastPoint {
        ForecastPoint {
            timestamp: self.dt.map(|seconds| seconds * 1000),
            rainfall_mm: self.rain.as_ref().map_or(0.0, |rain| rain.three_hours),
            rain_probability: self.pop * 100.0,
            humidity: self.main.humidity,
            wind_speed: self.wind.speed,
        }
    }
}

#[derive(Debug, PartialEq)]
struct ParsedUrl {
    host: String,
    port: u16,
    path: String,
}

fn parse_http_url(endpoint: &str) -> Result<ParsedUrl, WeatherError> {
    let trimmed = endpoint
        .strip_prefix("http://")
        .ok_or_else(|| WeatherError::InvalidUrl("only http:// supported".to_string()))?;

    let (host_port, path) = match trimmed.split_once('/') {
        Some((host_port, path)) => (host_port, format!("/{path}")),
        None => (trimmed, "/".to_string()),
    };
    if host_port.is_empty() {
        return Err(WeatherError::InvalidUrl("missing host".to_string()));
    }

    let (host, port) = match host_port.split_once(':') {
        Some((host, port)) if !port.is_empty() => (
            host,
            port.parse::<u16>()
                .map_err(|_| WeatherError::InvalidUrl("invalid port".to_string()))?,
        ),
        Some((host, _)) => (host, 80),
        None => (host_port, 80),
    };
    if host.is_empty() {
        return Err(WeatherError::InvalidUrl("missing host".to_string()));
    }

    Ok(ParsedUrl {
        host: host.to_string(),
        port,
        path,
    })
}

fn send_http_get(url: &ParsedUrl, path: &str, timeout: Duration) -> Result<String, WeatherError> {
    let addr = (url.host.as_str(), url.port)
        .to_socket_addrs()
        .map_err(|err| WeatherError::Dns(err.to_string()))?
        .next()
        .ok_or_else(|| WeatherError::Dns("no addresses resolved".to_string()))?;

    let mut stream = TcpStream::connect_timeout(&addr, timeout).map_err(WeatherError::Connect)?;
    stream
        .set_read_timeout(Some(timeout))
        .map_err(WeatherError::Io)?;
    stream
        .set_write_timeout(Some(timeout))
        .map_err(WeatherError::Io)?;

    let request = format!(
        "GET {path} HTTP/1.1\r\nHost: {}\r\nAccept: application/json\r\nConnection: close\r\n\r\n",
        url.host
    );
    stream
        .write_all(request.as_bytes())
        .map_err(WeatherError::Io)?;

    let mut response = String::new();
    stream
        .read_to_string(&mut response)
        .map_err(WeatherError::Io)?;

    split_http_response(&response)
}

fn split_http_response(response: &str) -> Result<String, WeatherError> {
    let (headers, body) = response
        .split_once("\r\n\r\n")
        .ok_or_else(|| WeatherError::Http(0, "invalid http response".to_string()))?;

    let status_code = headers
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .ok_or_else(|| WeatherError::Http(0, "missing status code".to_string()))?
        .parse::<u16>()
        .map_err(|_| WeatherError::Http(0, "invalid status code".to_string()))?;

    let body = if is_chunked(headers) {
        decode_chunked(body)?
    } else {
        body.to_string()
    };

    if status_code >= 400 {
        return Err(WeatherError::Http(status_code, body.trim().to_string()));
    }

    Ok(body)
}

fn is_chunked(headers: &str) -> bool {
    headers.lines().skip(1).any(|line| {
        line.split_once(':').is_some_and(|(name, value)| {
            name.trim().eq_ignore_ascii_case("transfer-encoding")
                && value.to_ascii_lowercase().contains("chunked")
        })
    })
}

/// Joins `size CRLF data CRLF` chunks up to the zero-size terminator.
/// Chunk extensions and trailers are ignored.
fn decode_chunked(body: &str) -> Result<String, WeatherError> {
    let invalid = || WeatherError::Http(0, "invalid chunked body".to_string());
    let mut rest = body.as_bytes();
    let mut decoded = Vec::with_capacity(body.len());

    loop {
        let line_end = rest
            .windows(2)
            .position(|window| window == b"\r\n")
            .ok_or_else(invalid)?;
        let size_line = std::str::from_utf8(&rest[..line_end]).map_err(|_| invalid())?;
        let size_field = size_line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_field, 16).map_err(|_| invalid())?;
        rest = &rest[line_end + 2..];
        if size == 0 {
            break;
        }

        let chunk = rest.get(..size).ok_or_else(invalid)?;
        decoded.extend_from_slice(chunk);
        rest = rest
            .get(size..)
            .and_then(|after| after.strip_prefix(b"\r\n"))
            .ok_or_else(invalid)?;
    }

    String::from_utf8(decoded).map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn parses_host_port_and_path() -> Result<(), WeatherError> {
        let parsed = parse_http_url("http://weather.local:9000/data/forecast")?;

        assert_eq!(
            parsed,
            ParsedUrl {
                host: "weather.local".to_string(),
                port: 9000,
                path: "/data/forecast".to_string(),
            }
        );
        assert_eq!(parse_http_url("http://weather.local")?.port, 80);
        Ok(())
    }

    #[test]
    fn rejects_https_and_bad_ports() {
        assert!(matches!(
            parse_http_url("https://api.example.com/forecast"),
            Err(WeatherError::InvalidUrl(_))
        ));
        assert!(matches!(
            parse_http_url("http://host:notaport/"),
            Err(WeatherError::InvalidUrl(_))
        ));
        assert!(matches!(
            parse_http_url("http:///forecast"),
            Err(WeatherError::InvalidUrl(_))
        ));
    }

    #[test]
    fn request_path_appends_query_and_key() {
        let provider = RemoteForecastProvider::new(
            "http://h/forecast".to_string(),
            Duration::from_secs(1),
            Some("abc".to_string()),
        );

        assert_eq!(
            provider.request_path("/forecast", -23.5, 119.0),
            "/forecast?lat=-23.5&lon=119&units=metric&cnt=40&appid=abc"
        );
        assert_eq!(
            provider.request_path("/forecast?v=2", 1.0, 2.0),
            "/forecast?v=2&lat=1&lon=2&units=metric&cnt=40&appid=abc"
        );
    }

    #[test]
    fn error_status_is_reported() {
        let result = split_http_response("HTTP/1.1 401 Unauthorized\r\n\r\nbad key\n");

        assert!(matches!(result, Err(WeatherError::Http(401, body)) if body == "bad key"));
    }

    #[test]
    fn chunked_body_is_decoded() -> Result<(), WeatherError> {
        let response = "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
                        7\r\n{\"list\"\r\n\
                        5;ext=1\r\n:[]}\n\r\n\
                        0\r\n\r\n";

        assert_eq!(split_http_response(response)?, "{\"list\":[]}\n");
        Ok(())
    }

    #[test]
    fn truncated_chunk_is_rejected() {
        let response = "HTTP/1.1 200 OK\r\ntransfer-encoding: Chunked\r\n\r\nff\r\n{}";

        assert!(matches!(
            split_http_response(response),
            Err(WeatherError::Http(0, message)) if message == "invalid chunked body"
        ));
    }

    #[test]
    fn forecast_body_maps_to_points() -> Result<(), serde_json::Error> {
        let body = r#"{
            "city": {"name": "Newman", "country": "AU", "timezone": 28800,
                     "coord": {"lat": -23.36, "lon": 119.73}},
            "list": [
                {"dt": 1700000000, "main": {"humidity": 90}, "pop": 0.8,
                 "rain": {"3h": 55.5}, "wind": {"speed": 12.0}},
                {"dt": 1700010800, "main": {"humidity": 40}, "wind": {"speed": 3.0}}
            ]
        }"#;

        let response: ForecastResponse = serde_json::from_str(body)?;
        let forecast = response.into_forecast(0.0, 0.0);

        assert_eq!(forecast.location.name, "Newman");
        assert_eq!(forecast.location.lat, -23.36);
        assert_eq!(forecast.timezone, 28800);
        assert_eq!(forecast.forecast.len(), 2);
        assert_eq!(forecast.forecast[0].timestamp, Some(1_700_000_000_000));
        assert_eq!(forecast.forecast[0].rainfall_mm, 55.5);
        assert_eq!(forecast.forecast[0].rain_probability, 80.0);
        assert_eq!(forecast.forecast[1].rainfall_mm, 0.0);
        assert_eq!(forecast.forecast[1].rain_probability, 0.0);
        Ok(())
    }

    #[test]
    fn fetches_from_local_http_server() -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let port = listener.local_addr()?.port();
        let server = thread::spawn(move || -> std::io::Result<String> {
            let (mut stream, _) = listener.accept()?;
            let mut buffer = [0u8; 1024];
            let read = stream.read(&mut buffer)?;
            let body = r#"{"list":[{"pop":0.75,"rain":{"3h":4.0}}]}"#;
            write!(
                stream,
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            )?;
            Ok(String::from_utf8_lossy(&buffer[..read]).to_string())
        });

        let provider = RemoteForecastProvider::new(
            format!("http://127.0.0.1:{port}/forecast"),
            Duration::from_secs(2),
            None,
        );
        let forecast = provider.fetch_forecast(5.0, 6.0)?;
        let request = server.join().map_err(|_| "server thread panicked")??;

        assert!(request.starts_with("GET /forecast?lat=5&lon=6&units=metric&cnt=40 HTTP/1.1"));
        assert_eq!(forecast.location.lat, 5.0);
        assert_eq!(forecast.forecast.len(), 1);
        assert_eq!(forecast.forecast[0].rain_probability, 75.0);
        Ok(())
    }

    #[test]
    fn fetches_chunked_response_from_local_http_server() -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let port = listener.local_addr()?.port();
        let server = thread::spawn(move || -> std::io::Result<()> {
            let (mut stream, _) = listener.accept()?;
            let mut buffer = [0u8; 1024];
            let _ = stream.read(&mut buffer)?;
            let first = r#"{"list":[{"pop":0.5,"#;
            let second = r#""rain":{"3h":60.0}}]}"#;
            write!(
                stream,
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n{:x}\r\n{}\r\n{:x}\r\n{}\r\n0\r\n\r\n",
                first.len(),
                first,
                second.len(),
                second
            )?;
            Ok(())
        });

        let provider = RemoteForecastProvider::new(
            format!("http://127.0.0.1:{port}/forecast"),
            Duration::from_secs(2),
            None,
        );
        let forecast = provider.fetch_forecast(5.0, 6.0)?;
        server.join().map_err(|_| "server thread panicked")??;

        assert_eq!(forecast.forecast.len(), 1);
        assert_eq!(forecast.forecast[0].rainfall_mm, 60.0);
        assert_eq!(forecast.forecast[0].rain_probability, 50.0);
        Ok(())
    }
}
