//! Shared doubles and harnesses for the gateway test suites.

use std::collections::HashMap;
use std::ffi::OsString;
use std::net::SocketAddr;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crossbeam_channel::Sender;
use hyper::header::AUTHORIZATION;
use hyper::{Method, Request, StatusCode};
use ortho_config::{OrthoConfig, OrthoError};
use tempfile::TempDir;

use pmweb_config::{Config, LogFormat, SocketEndpoint};

use crate::bootstrap::{BootstrapError, ConfigLoader};
use crate::catalogue::{BUILTIN_CATALOGUE, CatalogueDocument, MetricCatalogue};
use crate::group::{
    GroupCallbacks, GroupError, GroupRequest, WebAccess, WebGroup, WebInDom, WebInstance,
    WebLabelSet, WebMetric, WebResult, WebScrape, WebSource, WebValue, WebValueSet,
};
use crate::health::HealthReporter;
use crate::http::{HttpError, HttpRequest, ResponseFormat, ResponseSink};
use crate::webapi::{
    self, ControlEvent, GatewayError, GatewayHandle, GatewaySettings, IncomingRequest, RestCommand,
};

/// Timestamp every test catalogue reports.
pub const SAMPLE_TIME: WebResult = WebResult {
    seconds: 1_700_000_000,
    nanoseconds: 250_000_000,
};

const fn fixed_clock() -> WebResult {
    SAMPLE_TIME
}

/// Built-in catalogue with a frozen clock.
pub fn catalogue() -> MetricCatalogue {
    let document = CatalogueDocument::from_json(BUILTIN_CATALOGUE).expect("built-in catalogue");
    MetricCatalogue::with_clock(document, fixed_clock)
}

/// Builds a parameter map from literal pairs.
pub fn params(pairs: &[(&str, &str)]) -> crate::group::Parameters {
    pairs
        .iter()
        .map(|(name, value)| ((*name).to_owned(), (*value).to_owned()))
        .collect()
}

/// Callback invocation recorded by [`RecordingCallbacks`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackEvent {
    Context(WebSource),
    Metric(WebMetric),
    Fetch(WebResult),
    ValueSet(WebValueSet),
    Value(WebValue),
    InDom(WebInDom),
    Instance(WebInstance),
    Scrape(WebScrape),
    Check(WebAccess),
}

/// Callback table that records everything it is told.
#[derive(Debug, Default)]
pub struct RecordingCallbacks {
    pub contexts: Vec<String>,
    pub events: Vec<CallbackEvent>,
    refusal: Option<GroupError>,
}

impl RecordingCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuses every access check with `error`.
    pub fn refusing(error: GroupError) -> Self {
        Self {
            refusal: Some(error),
            ..Self::default()
        }
    }

    /// Recorded events other than access checks.
    pub fn output(&self) -> Vec<CallbackEvent> {
        self.events
            .iter()
            .filter(|event| !matches!(event, CallbackEvent::Check(_)))
            .cloned()
            .collect()
    }

    fn record(&mut self, context: &str, event: CallbackEvent) {
        self.contexts.push(context.to_owned());
        self.events.push(event);
    }
}

impl GroupCallbacks for RecordingCallbacks {
    fn on_context(&mut self, context: &str, source: &WebSource) {
        self.record(context, CallbackEvent::Context(source.clone()));
    }

    fn on_metric(&mut self, context: &str, metric: &WebMetric) {
        self.record(context, CallbackEvent::Metric(metric.clone()));
    }

    fn on_fetch(&mut self, context: &str, result: &WebResult) {
        self.record(context, CallbackEvent::Fetch(*result));
    }

    fn on_fetch_values(&mut self, context: &str, valueset: &WebValueSet) {
        self.record(context, CallbackEvent::ValueSet(valueset.clone()));
    }

    fn on_fetch_value(&mut self, context: &str, value: &WebValue) {
        self.record(context, CallbackEvent::Value(value.clone()));
    }

    fn on_indom(&mut self, context: &str, indom: &WebInDom) {
        self.record(context, CallbackEvent::InDom(indom.clone()));
    }

    fn on_instance(&mut self, context: &str, instance: &WebInstance) {
        self.record(context, CallbackEvent::Instance(instance.clone()));
    }

    fn on_scrape(&mut self, context: &str, scrape: &WebScrape) {
        self.record(context, CallbackEvent::Scrape(scrape.clone()));
    }

    fn on_scrape_labels(&mut self, _context: &str, labels: &mut WebLabelSet) {
        let mut merged = std::collections::BTreeMap::new();
        for set in &labels.sets {
            for (name, value) in set {
                merged.insert(name.clone(), value.clone());
            }
        }
        labels.buffer = merged
            .into_iter()
            .map(|(name, value)| format!("{name}=\"{value}\""))
            .collect::<Vec<_>>()
            .join(",");
    }

    fn on_check(&mut self, context: &str, access: &WebAccess) -> Result<(), GroupError> {
        self.record(context, CallbackEvent::Check(access.clone()));
        match &self.refusal {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

/// One response as a client would reassemble it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Status on the wire; `200` once streaming began.
    pub status: StatusCode,
    /// Status passed to the terminal reply.
    pub reported: StatusCode,
    pub format: ResponseFormat,
    /// Streamed fragments followed by the terminal body.
    pub body: String,
    pub streamed: bool,
}

#[derive(Default)]
struct SinkState {
    pending: String,
    format: Option<ResponseFormat>,
    responses: Vec<Response>,
}

/// [`ResponseSink`] that reassembles responses in memory.
#[derive(Default)]
pub struct RecordingSink {
    state: Mutex<SinkState>,
    replied: Condvar,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Blocks until `count` responses have completed, then returns them.
    pub fn wait_for(&self, count: usize) -> Vec<Response> {
        let state = self.state.lock().expect("sink mutex poisoned");
        let (state, _) = self
            .replied
            .wait_timeout_while(state, Duration::from_secs(5), |state| {
                state.responses.len() < count
            })
            .expect("sink mutex poisoned");
        assert!(
            state.responses.len() >= count,
            "expected {count} responses, got {:?}",
            state.responses
        );
        state.responses.clone()
    }

    /// Number of responses completed so far.
    pub fn completed(&self) -> usize {
        self.state.lock().expect("sink mutex poisoned").responses.len()
    }

    /// Fragments streamed for the response still in flight.
    pub fn pending(&self) -> String {
        self.state.lock().expect("sink mutex poisoned").pending.clone()
    }
}

impl ResponseSink for RecordingSink {
    fn transfer(&self, fragment: &str, format: ResponseFormat) -> Result<(), HttpError> {
        if fragment.is_empty() {
            return Ok(());
        }
        let mut state = self.state.lock().map_err(|_| HttpError::Poisoned)?;
        state.pending.push_str(fragment);
        state.format.get_or_insert(format);
        Ok(())
    }

    fn reply(
        &self,
        status: StatusCode,
        body: &str,
        format: ResponseFormat,
    ) -> Result<(), HttpError> {
        let mut state = self.state.lock().map_err(|_| HttpError::Poisoned)?;
        let streamed = state.format.is_some();
        let mut text = std::mem::take(&mut state.pending);
        text.push_str(body);
        let response = Response {
            status: if streamed { StatusCode::OK } else { status },
            reported: status,
            format: state.format.take().unwrap_or(format),
            body: text,
            streamed,
        };
        state.responses.push(response);
        self.replied.notify_all();
        Ok(())
    }
}

type Script =
    dyn Fn(RestCommand, &GroupRequest<'_>, &mut dyn GroupCallbacks) -> Result<(), GroupError>
        + Send
        + Sync;

/// [`WebGroup`] whose every operation runs one closure.
pub struct ScriptedGroup {
    script: Box<Script>,
}

impl ScriptedGroup {
    pub fn new(
        script: impl Fn(RestCommand, &GroupRequest<'_>, &mut dyn GroupCallbacks) -> Result<(), GroupError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            script: Box::new(script),
        }
    }

    fn call(
        &self,
        command: RestCommand,
        request: &GroupRequest<'_>,
        callbacks: &mut dyn GroupCallbacks,
    ) -> Result<(), GroupError> {
        (self.script)(command, request, callbacks)
    }
}

impl WebGroup for ScriptedGroup {
    fn context(
        &self,
        request: &GroupRequest<'_>,
        callbacks: &mut dyn GroupCallbacks,
    ) -> Result<(), GroupError> {
        self.call(RestCommand::Context, request, callbacks)
    }

    fn metric(
        &self,
        request: &GroupRequest<'_>,
        callbacks: &mut dyn GroupCallbacks,
    ) -> Result<(), GroupError> {
        self.call(RestCommand::Metric, request, callbacks)
    }

    fn fetch(
        &self,
        request: &GroupRequest<'_>,
        callbacks: &mut dyn GroupCallbacks,
    ) -> Result<(), GroupError> {
        self.call(RestCommand::Fetch, request, callbacks)
    }

    fn indom(
        &self,
        request: &GroupRequest<'_>,
        callbacks: &mut dyn GroupCallbacks,
    ) -> Result<(), GroupError> {
        self.call(RestCommand::InDom, request, callbacks)
    }

    fn profile(
        &self,
        request: &GroupRequest<'_>,
        callbacks: &mut dyn GroupCallbacks,
    ) -> Result<(), GroupError> {
        self.call(RestCommand::Profile, request, callbacks)
    }

    fn store(
        &self,
        request: &GroupRequest<'_>,
        callbacks: &mut dyn GroupCallbacks,
    ) -> Result<(), GroupError> {
        self.call(RestCommand::Store, request, callbacks)
    }

    fn derive(
        &self,
        request: &GroupRequest<'_>,
        callbacks: &mut dyn GroupCallbacks,
    ) -> Result<(), GroupError> {
        self.call(RestCommand::Derive, request, callbacks)
    }

    fn scrape(
        &self,
        request: &GroupRequest<'_>,
        callbacks: &mut dyn GroupCallbacks,
    ) -> Result<(), GroupError> {
        self.call(RestCommand::Scrape, request, callbacks)
    }
}

/// Settings used by the in-process gateway harness.
pub fn settings() -> GatewaySettings {
    GatewaySettings {
        worker_threads: 2,
        worker_queue: 8,
        timeout: Duration::from_secs(1),
        require_credentials: false,
    }
}

/// Request as the connection layer hands it to the control loop.
pub fn request(method: Method, target: &str, authorization: Option<&str>, body: &str) -> HttpRequest {
    let mut builder = Request::builder().method(method).uri(target);
    if let Some(value) = authorization {
        builder = builder.header(AUTHORIZATION, value);
    }
    let (parts, ()) = builder.body(()).expect("valid request head").into_parts();
    HttpRequest::from_parts(&parts, body.as_bytes().to_vec())
}

/// `GET` request for `target`.
pub fn get(target: &str) -> HttpRequest {
    request(Method::GET, target, None, "")
}

/// `POST` request carrying a form body.
pub fn post(target: &str, body: &str) -> HttpRequest {
    request(Method::POST, target, None, body)
}

/// `GET` request for `target` as bytes on the wire.
pub fn wire_get(target: &str) -> String {
    format!("GET {target} HTTP/1.1\r\nHost: localhost\r\n\r\n")
}

/// Control loop driven directly, bypassing sockets.
///
/// The control loop binds a connection to the first sink it sees, so
/// [`GatewayHarness::exchange`] reuses one sink per connection.
pub struct GatewayHarness {
    handle: Option<GatewayHandle>,
    events: Sender<ControlEvent>,
    sinks: Mutex<HashMap<u64, Arc<RecordingSink>>>,
}

impl GatewayHarness {
    pub fn start(group: Arc<dyn WebGroup>, settings: GatewaySettings) -> Self {
        let handle = webapi::start(group, settings).expect("start gateway");
        let events = handle.events();
        Self {
            handle: Some(handle),
            events,
            sinks: Mutex::new(HashMap::new()),
        }
    }

    /// Submits `request` on `connection`.
    pub fn send(&self, connection: u64, sink: &Arc<RecordingSink>, request: &HttpRequest) {
        let request = request.clone();
        let sink: Arc<dyn ResponseSink> = Arc::clone(sink) as Arc<dyn ResponseSink>;
        self.events
            .send(ControlEvent::Request(IncomingRequest {
                connection,
                sink,
                request,
            }))
            .expect("control loop running");
    }

    /// Reports that the peer on `connection` hung up.
    pub fn close(&self, connection: u64) {
        self.sinks
            .lock()
            .expect("harness mutex poisoned")
            .remove(&connection);
        self.events
            .send(ControlEvent::Closed(connection))
            .expect("control loop running");
    }

    /// Sends one request on `connection` and waits for its response.
    pub fn exchange(&self, connection: u64, request: &HttpRequest) -> Response {
        let sink = Arc::clone(
            self.sinks
                .lock()
                .expect("harness mutex poisoned")
                .entry(connection)
                .or_insert_with(RecordingSink::new),
        );
        let before = sink.completed();
        self.send(connection, &sink, request);
        sink.wait_for(before + 1).remove(before)
    }

    pub fn shutdown(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.shutdown().expect("gateway shutdown");
        }
    }

    /// Stops the gateway, waiting at most `budget` for busy workers.
    pub fn shutdown_within(mut self, budget: Duration) -> Result<(), GatewayError> {
        self.handle
            .take()
            .map_or(Ok(()), |handle| handle.shutdown_within(budget))
    }
}

/// Loader that binds an ephemeral loopback port.
pub struct TestConfigLoader {
    config: Config,
}

impl TestConfigLoader {
    pub fn new() -> Self {
        Self {
            config: Config {
                listen: SocketEndpoint::tcp("127.0.0.1", 0),
                log_format: LogFormat::Compact,
                ..Config::default()
            },
        }
    }

    /// Loader whose catalogue file does not exist.
    pub fn missing_catalogue(dir: &TempDir) -> Self {
        let mut loader = Self::new();
        let path = dir.path().join("absent.json");
        loader.config.catalogue_path = Some(
            camino::Utf8PathBuf::from_path_buf(path).expect("temporary path was not valid UTF-8"),
        );
        loader
    }

    /// Loader listening on a Unix socket below `dir`.
    pub fn unix(dir: &TempDir) -> Self {
        let mut loader = Self::new();
        let path = dir.path().join("run").join("pmwebd.sock");
        loader.config.listen = SocketEndpoint::unix(
            camino::Utf8PathBuf::from_path_buf(path).expect("temporary path was not valid UTF-8"),
        );
        loader
    }
}

impl ConfigLoader for TestConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Loader that fails by passing an unparsable listen endpoint.
pub struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let args = vec![
            OsString::from("pmwebd"),
            OsString::from("--listen"),
            OsString::from("invalid://socket"),
        ];
        Config::load_from_iter(args)
    }
}

/// Structured health events tracked during scenarios.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    BootstrapStarting,
    BootstrapSucceeded,
    BootstrapFailed(String),
    CatalogueLoaded { sources: usize, metrics: usize },
    ListenerReady(Option<SocketAddr>),
    ListenerStopped,
}

/// Records health events for assertions.
#[derive(Default)]
pub struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
    changed: Condvar,
}

impl RecordingHealthReporter {
    /// Captures a copy of the recorded events.
    pub fn events(&self) -> Vec<HealthEvent> {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .clone()
    }

    /// Waits for the listener to come up and returns its bound address.
    pub fn wait_until_ready(&self) -> Option<SocketAddr> {
        let events = self.events.lock().expect("health reporter mutex poisoned");
        let (events, _) = self
            .changed
            .wait_timeout_while(events, Duration::from_secs(5), |events| {
                !events.iter().any(|event| {
                    matches!(
                        event,
                        HealthEvent::ListenerReady(_) | HealthEvent::BootstrapFailed(_)
                    )
                })
            })
            .expect("health reporter mutex poisoned");
        events.iter().find_map(|event| match event {
            HealthEvent::ListenerReady(address) => *address,
            _ => None,
        })
    }

    fn record(&self, event: HealthEvent) {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .push(event);
        self.changed.notify_all();
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn bootstrap_starting(&self) {
        self.record(HealthEvent::BootstrapStarting);
    }

    fn bootstrap_succeeded(&self, _config: &Config) {
        self.record(HealthEvent::BootstrapSucceeded);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        self.record(HealthEvent::BootstrapFailed(error.to_string()));
    }

    fn catalogue_loaded(&self, catalogue: &MetricCatalogue) {
        self.record(HealthEvent::CatalogueLoaded {
            sources: catalogue.source_count(),
            metrics: catalogue.metric_count(),
        });
    }

    fn listener_ready(&self, _endpoint: &SocketEndpoint, address: Option<SocketAddr>) {
        self.record(HealthEvent::ListenerReady(address));
    }

    fn listener_stopped(&self) {
        self.record(HealthEvent::ListenerStopped);
    }
}
