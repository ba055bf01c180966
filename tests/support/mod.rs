//! In-memory stand-in for the monitoring server's HTTP API.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use probewire_core::{
    ClientConfig, ConnectionSettings, Credential, HttpClient, HttpRequest, HttpResponse,
    MonitorClient, RetryConfig, TransportError, TransportFuture,
};
use serde::Deserialize;
use serde_json::json;

pub const PASS_HASH: &str = "1234567890";
pub const PASSWORD: &str = "correct-horse";
pub const VERSION: &str = "23.1.82.2175";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct SensorRow {
    pub objid: usize,
    pub name: String,
}

/// One request as the fake server understood it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenRequest {
    pub path: String,
    pub params: HashMap<String, String>,
}

impl SeenRequest {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn start(&self) -> usize {
        self.param("start").and_then(|v| v.parse().ok()).unwrap_or(0)
    }

    pub fn count(&self) -> usize {
        self.param("count").and_then(|v| v.parse().ok()).unwrap_or(0)
    }

    pub fn is_probe(&self) -> bool {
        self.path.ends_with("table.json") && self.param("count") == Some("0")
    }

    pub fn is_page(&self) -> bool {
        self.path.ends_with("table.json") && !self.is_probe()
    }
}

/// Fake table endpoint serving `available` sensor rows while advertising
/// `reported` as the total.
pub struct FakeServer {
    reported: usize,
    available: usize,
    delays: HashMap<usize, Duration>,
    failing: HashSet<usize>,
    flaky: Mutex<HashSet<usize>>,
    in_flight: Arc<AtomicUsize>,
    peak: AtomicUsize,
    requests: Mutex<Vec<SeenRequest>>,
}

impl FakeServer {
    pub fn with_rows(total: usize) -> Self {
        Self {
            reported: total,
            available: total,
            delays: HashMap::new(),
            failing: HashSet::new(),
            flaky: Mutex::new(HashSet::new()),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Server claims `reported` rows but only ever returns `available`.
    pub fn misreporting(reported: usize, available: usize) -> Self {
        Self {
            available,
            ..Self::with_rows(reported)
        }
    }

    /// Delays the page starting at `start`.
    pub fn delay_page(mut self, start: usize, delay: Duration) -> Self {
        self.delays.insert(start, delay);
        self
    }

    /// Page starting at `start` answers with HTTP 400.
    pub fn fail_page(mut self, start: usize) -> Self {
        self.failing.insert(start);
        self
    }

    /// First request for the page starting at `start` fails with a
    /// connection reset; later requests succeed.
    pub fn flaky_page(self, start: usize) -> Self {
        self.flaky.lock().expect("flaky lock").insert(start);
        self
    }

    pub fn requests(&self) -> Vec<SeenRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn page_requests(&self) -> Vec<SeenRequest> {
        self.requests().into_iter().filter(SeenRequest::is_page).collect()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn respond(&self, seen: &SeenRequest) -> HttpResponse {
        if seen.path.ends_with("getpasshash.htm") {
            return if seen.param("password") == Some(PASSWORD) {
                HttpResponse::ok(PASS_HASH)
            } else {
                HttpResponse::with_status(401, "<prtg><error>Unauthorized</error></prtg>")
            };
        }

        if seen.param("passhash") != Some(PASS_HASH) {
            return HttpResponse::with_status(401, "<prtg><error>Unauthorized</error></prtg>");
        }

        if seen.path.ends_with("getstatus.htm") {
            return HttpResponse::ok(json!({ "Version": VERSION, "Alarms": "2" }).to_string());
        }

        if self.failing.contains(&seen.start()) && seen.is_page() {
            return HttpResponse::with_status(400, "<prtg><error>Page unavailable</error></prtg>");
        }

        let start = seen.start().min(self.available);
        let end = (seen.start() + seen.count()).min(self.available);
        let rows: Vec<_> = (start..end)
            .map(|objid| json!({ "objid": objid, "name": format!("sensor-{objid}") }))
            .collect();

        HttpResponse::ok(
            json!({
                "prtg-version": VERSION,
                "treesize": self.reported,
                "sensors": rows,
            })
            .to_string(),
        )
    }
}

struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl HttpClient for FakeServer {
    fn execute(&self, request: HttpRequest) -> TransportFuture<'_> {
        Box::pin(async move {
            let seen = parse(&request.url);
            self.requests.lock().expect("requests lock").push(seen.clone());

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            let _guard = InFlight(Arc::clone(&self.in_flight));
            self.peak.fetch_max(now, Ordering::SeqCst);

            match self.delays.get(&seen.start()).copied() {
                Some(delay) if seen.is_page() => tokio::time::sleep(delay).await,
                _ => tokio::time::sleep(Duration::from_millis(1)).await,
            }

            let reset =
                seen.is_page() && self.flaky.lock().expect("flaky lock").remove(&seen.start());
            if reset {
                return Err(TransportError::transient("connection reset"));
            }

            Ok(self.respond(&seen))
        })
    }
}

/// Transport that times out on every request.
#[derive(Default)]
pub struct AlwaysTimeout {
    attempts: AtomicUsize,
}

impl AlwaysTimeout {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl HttpClient for AlwaysTimeout {
    fn execute(&self, _request: HttpRequest) -> TransportFuture<'_> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Err(TransportError::transient("request timeout")) })
    }
}

pub fn parse(url: &str) -> SeenRequest {
    let (path, query) = url.split_once('?').unwrap_or((url, ""));
    let params = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let value = urlencoding::decode(value).ok()?.into_owned();
            Some((key.to_string(), value))
        })
        .collect();

    SeenRequest {
        path: path.to_string(),
        params,
    }
}

pub fn settings() -> ConnectionSettings {
    ConnectionSettings::new(
        "https://monitor.test",
        "prtgadmin",
        Credential::PassHash(String::from(PASS_HASH)),
    )
    .expect("valid settings")
}

pub fn fast_config() -> ClientConfig {
    ClientConfig::default().with_retry(RetryConfig::linear(Duration::from_millis(1), 2))
}

pub async fn client_for(server: Arc<FakeServer>, config: ClientConfig) -> MonitorClient {
    MonitorClient::connect_with_transport(settings(), config, server)
        .await
        .expect("client connects")
}
