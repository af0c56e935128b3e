//! test doubles: a fake hub served over real http, and a recording view.

use crate::view::{DashboardView, DoorIndicator};

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const INDEX_HTML: &str = "<!doctype html><title>IoT Home</title>";
pub const STYLES_CSS: &str = ".bg-success{}.bg-danger{}";
pub const APP_JS: &str = "console.log('panel');";

// ==============================================================================
// fake hub
// ==============================================================================

struct FakeDevice {
    kind: &'static str,
    state: Option<String>,
}

struct QueuedState {
    reading: Value,
    delay: Option<Duration>,
}

struct HubInner {
    devices: BTreeMap<String, FakeDevice>,
    reading: Value,
    custom_body: Option<Value>,
    queued: VecDeque<QueuedState>,
    failing_assets: Vec<String>,
    asset_hits: HashMap<String, usize>,
    last_cookie: Option<String>,
}

struct Hub {
    inner: Mutex<HubInner>,
    ok: AtomicBool,
    state_calls: AtomicUsize,
    toggle_calls: AtomicUsize,
}

/// in-process stand-in for the hub's flask app
pub struct FakeHub {
    addr: SocketAddr,
    hub: Arc<Hub>,
}

impl FakeHub {
    pub async fn start() -> Self {
        let mut devices = BTreeMap::new();
        devices.insert("door_sala".to_string(), FakeDevice { kind: "switch", state: Some("OFF".to_string()) });
        devices.insert("temp_sensor".to_string(), FakeDevice { kind: "sensor", state: None });

        let hub = Arc::new(Hub {
            inner: Mutex::new(HubInner {
                devices,
                reading: json!(21.4),
                custom_body: None,
                queued: VecDeque::new(),
                failing_assets: Vec::new(),
                asset_hits: HashMap::new(),
                last_cookie: None,
            }),
            ok: AtomicBool::new(true),
            state_calls: AtomicUsize::new(0),
            toggle_calls: AtomicUsize::new(0),
        });

        let app = Router::new()
            .route("/api/state", get(state_handler))
            .route("/api/toggle/:slug", post(toggle_handler))
            .route("/", get(asset_handler))
            .route("/static/*rest", get(asset_handler))
            .with_state(hub.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Self { addr, hub }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn set_ok(&self, ok: bool) {
        self.hub.ok.store(ok, Ordering::SeqCst);
    }

    pub fn set_device_state(&self, slug: &str, state: &str) {
        let mut inner = self.hub.inner.lock().unwrap();
        if let Some(device) = inner.devices.get_mut(slug) {
            device.state = Some(state.to_string());
        }
    }

    pub fn set_reading(&self, reading: Value) {
        self.hub.inner.lock().unwrap().reading = reading;
    }

    /// replace the whole state body
    pub fn set_state_body(&self, body: Value) {
        self.hub.inner.lock().unwrap().custom_body = Some(body);
    }

    /// next state request answers with `reading`, after `delay`
    pub fn queue_state_response(&self, reading: Value, delay: Option<Duration>) {
        self.hub.inner.lock().unwrap().queued.push_back(QueuedState { reading, delay });
    }

    pub fn fail_asset(&self, path: &str) {
        self.hub.inner.lock().unwrap().failing_assets.push(path.to_string());
    }

    pub fn asset_hits(&self, path: &str) -> usize {
        self.hub.inner.lock().unwrap().asset_hits.get(path).copied().unwrap_or(0)
    }

    pub fn state_calls(&self) -> usize {
        self.hub.state_calls.load(Ordering::SeqCst)
    }

    pub fn toggle_calls(&self) -> usize {
        self.hub.toggle_calls.load(Ordering::SeqCst)
    }

    pub fn last_cookie(&self) -> Option<String> {
        self.hub.inner.lock().unwrap().last_cookie.clone()
    }

    pub async fn wait_for_state_calls(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.state_calls() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("hub never saw the expected state requests");
    }
}

async fn state_handler(State(hub): State<Arc<Hub>>, headers: HeaderMap) -> Json<Value> {
    hub.state_calls.fetch_add(1, Ordering::SeqCst);

    let (body, delay) = {
        let mut inner = hub.inner.lock().unwrap();
        inner.last_cookie = headers
            .get(header::COOKIE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let queued = inner.queued.pop_front();
        let delay = queued.as_ref().and_then(|q| q.delay);
        let body = match &inner.custom_body {
            Some(body) => body.clone(),
            None => {
                let reading = queued.map(|q| q.reading).unwrap_or_else(|| inner.reading.clone());
                let mut state = serde_json::Map::new();
                for (slug, device) in &inner.devices {
                    state.insert(
                        slug.clone(),
                        json!({ "name": slug, "type": device.kind, "state": device.state }),
                    );
                }
                if let Some(Value::Object(temp)) = state.get_mut("temp_sensor") {
                    temp.insert("reading".to_string(), reading);
                }
                json!({ "ok": hub.ok.load(Ordering::SeqCst), "state": state })
            }
        };
        (body, delay)
    };

    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    Json(body)
}

async fn toggle_handler(State(hub): State<Arc<Hub>>, Path(slug): Path<String>) -> Response {
    hub.toggle_calls.fetch_add(1, Ordering::SeqCst);

    let mut inner = hub.inner.lock().unwrap();
    match inner.devices.get_mut(&slug) {
        Some(device) if device.kind == "switch" => {
            let next = if device.state.as_deref() == Some("ON") { "OFF" } else { "ON" };
            device.state = Some(next.to_string());
            Json(json!({ "ok": true, "slug": slug, "state": next })).into_response()
        }
        _ => (
            StatusCode::NOT_FOUND,
            Json(json!({ "ok": false, "error": "Dispositivo no encontrado o no conmutable" })),
        )
            .into_response(),
    }
}

async fn asset_handler(State(hub): State<Arc<Hub>>, uri: axum::http::Uri) -> Response {
    let path = uri.path().to_string();
    let failing = {
        let mut inner = hub.inner.lock().unwrap();
        *inner.asset_hits.entry(path.clone()).or_insert(0) += 1;
        inner.failing_assets.contains(&path)
    };
    if failing {
        return (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response();
    }

    let (content_type, body) = match path.as_str() {
        "/" => ("text/html; charset=utf-8", INDEX_HTML),
        "/static/css/styles.css" => ("text/css", STYLES_CSS),
        "/static/js/app.js" => ("application/javascript", APP_JS),
        _ => return (StatusCode::NOT_FOUND, "not found").into_response(),
    };
    ([(header::CONTENT_TYPE, content_type)], body).into_response()
}

/// an address nothing listens on
pub async fn unreachable_addr() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

// ==============================================================================
// recording view
// ==============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum ViewEvent {
    Door(bool),
    Temperature(String),
    ToggleEnabled(bool),
}

#[derive(Default)]
pub struct RecordingView {
    events: Mutex<Vec<ViewEvent>>,
}

impl RecordingView {
    pub fn events(&self) -> Vec<ViewEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn door(&self) -> Option<DoorIndicator> {
        self.events().iter().rev().find_map(|e| match e {
            ViewEvent::Door(open) => Some(DoorIndicator::from_open(*open)),
            _ => None,
        })
    }

    pub fn temperature(&self) -> Option<String> {
        self.events().iter().rev().find_map(|e| match e {
            ViewEvent::Temperature(text) => Some(text.clone()),
            _ => None,
        })
    }

    pub fn toggle_history(&self) -> Vec<bool> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                ViewEvent::ToggleEnabled(enabled) => Some(*enabled),
                _ => None,
            })
            .collect()
    }
}

impl DashboardView for RecordingView {
    fn set_door_indicator(&self, open: bool) {
        self.events.lock().unwrap().push(ViewEvent::Door(open));
    }

    fn set_temperature(&self, text: &str) {
        self.events.lock().unwrap().push(ViewEvent::Temperature(text.to_string()));
    }

    fn set_toggle_enabled(&self, enabled: bool) {
        self.events.lock().unwrap().push(ViewEvent::ToggleEnabled(enabled));
    }
}
