//! Collection operations answered from the catalogue.
//!
//! Each operation resolves its session, runs the access check, builds the
//! full list of entities under the state lock and only then reports them,
//! so slow clients never hold the lock.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use camino::Utf8Path;
use pmweb_config::DEFAULT_SESSION_TIMEOUT_SECS;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::group::{
    GroupCallbacks, GroupError, GroupRequest, InDomId, Parameters, PmId, WebAccess, WebGroup,
    WebInDom, WebInstance, WebLabelSet, WebMetric, WebResult, WebScrape, WebSource, WebValue,
    WebValueSet,
};
use crate::webapi::PARAMS;

use super::model::{CatalogueDocument, InDomSpec, Labels, MetricSpec, SourceSpec, ValueSpec};
use super::session::{Derived, Session, parse_definitions};
use super::{BUILTIN_CATALOGUE, CATALOGUE_TARGET, CatalogueError};

/// Domain number reserved for derived metrics.
const DERIVED_DOMAIN: u32 = 511;

/// Source of fetch and scrape timestamps.
pub type Clock = fn() -> WebResult;

/// Current wall-clock time.
#[must_use]
pub fn system_clock() -> WebResult {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    WebResult {
        seconds: i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX),
        nanoseconds: i64::from(elapsed.subsec_nanos()),
    }
}

/// [`WebGroup`] backed by an in-memory catalogue.
///
/// Sessions unused for longer than the idle timeout are dropped the next
/// time any request resolves a session.
pub struct MetricCatalogue {
    state: Mutex<State>,
    clock: Clock,
    idle_timeout: Duration,
    source_count: usize,
    metric_count: usize,
}

struct State {
    sources: Vec<SourceSpec>,
    sessions: HashMap<u32, Session>,
    next_session: u32,
}

impl MetricCatalogue {
    /// Serves `document` with wall-clock timestamps.
    #[must_use]
    pub fn new(document: CatalogueDocument) -> Self {
        Self::with_clock(document, system_clock)
    }

    /// Serves `document`, stamping samples with `clock`.
    #[must_use]
    pub fn with_clock(document: CatalogueDocument, clock: Clock) -> Self {
        let source_count = document.sources.len();
        let metric_count = document
            .sources
            .iter()
            .map(|source| source.metrics.len())
            .sum();
        Self {
            state: Mutex::new(State {
                sources: document.sources,
                sessions: HashMap::new(),
                next_session: 1,
            }),
            clock,
            idle_timeout: Duration::from_secs(DEFAULT_SESSION_TIMEOUT_SECS),
            source_count,
            metric_count,
        }
    }

    /// Expires sessions left idle for longer than `timeout`.
    #[must_use]
    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Serves the catalogue compiled into the binary.
    ///
    /// # Errors
    ///
    /// Returns a [`CatalogueError`] if the embedded document is invalid.
    pub fn builtin() -> Result<Self, CatalogueError> {
        CatalogueDocument::from_json(BUILTIN_CATALOGUE).map(Self::new)
    }

    /// Serves the file at `path`, or the built-in catalogue when unset.
    ///
    /// # Errors
    ///
    /// Returns a [`CatalogueError`] when the file cannot be loaded.
    pub fn load(path: Option<&Utf8Path>) -> Result<Self, CatalogueError> {
        let catalogue = match path {
            Some(path) => CatalogueDocument::from_path(path).map(Self::new)?,
            None => Self::builtin()?,
        };
        info!(
            target: CATALOGUE_TARGET,
            path = path.map_or("<builtin>", Utf8Path::as_str),
            sources = catalogue.source_count,
            metrics = catalogue.metric_count,
            "metric catalogue loaded"
        );
        Ok(catalogue)
    }

    /// Number of sources served.
    #[must_use]
    pub const fn source_count(&self) -> usize {
        self.source_count
    }

    /// Number of metrics across all sources.
    #[must_use]
    pub const fn metric_count(&self) -> usize {
        self.metric_count
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, GroupError> {
        self.state
            .lock()
            .map_err(|_| GroupError::failed("catalogue state poisoned"))
    }

    /// Resolves or opens the request's session.
    fn open(&self, request: &GroupRequest<'_>) -> Result<(u32, WebAccess), GroupError> {
        let mut state = self.lock()?;
        state.expire(self.idle_timeout);
        let id = match request.context {
            Some(text) => text
                .parse::<u32>()
                .ok()
                .filter(|id| state.sessions.contains_key(id))
                .ok_or_else(unknown_context)?,
            None => state.open_session(request.params)?,
        };
        if let Some(session) = state.sessions.get_mut(&id) {
            session.last_used = Instant::now();
        }
        let (_, source) = state.view(id)?;
        let access = WebAccess {
            username: source.username.clone(),
            password: source.password.clone(),
            realm: source.realm.clone(),
        };
        Ok((id, access))
    }

    fn run(
        &self,
        request: &GroupRequest<'_>,
        callbacks: &mut dyn GroupCallbacks,
        build: impl FnOnce(&mut State, u32) -> Result<Vec<Emit>, GroupError>,
    ) -> Result<(), GroupError> {
        let (id, access) = self.open(request)?;
        let context = id.to_string();
        callbacks.on_check(&context, &access)?;
        let events = {
            let mut state = self.lock()?;
            build(&mut state, id)?
        };
        emit(&context, events, callbacks);
        Ok(())
    }
}

impl WebGroup for MetricCatalogue {
    fn context(
        &self,
        request: &GroupRequest<'_>,
        callbacks: &mut dyn GroupCallbacks,
    ) -> Result<(), GroupError> {
        self.run(request, callbacks, |state, id| {
            let (_, source) = state.view(id)?;
            Ok(vec![Emit::Context(WebSource {
                source: source_id(source),
                hostspec: source.hostspec.clone(),
                labels: labels_json(&source.labels),
            })])
        })
    }

    fn metric(
        &self,
        request: &GroupRequest<'_>,
        callbacks: &mut dyn GroupCallbacks,
    ) -> Result<(), GroupError> {
        self.run(request, callbacks, |state, id| {
            let (session, source) = state.view(id)?;
            Ok(select_described(session, source, request.params)?
                .iter()
                .map(|metric| Emit::Metric(web_metric(source, metric)))
                .collect())
        })
    }

    fn fetch(
        &self,
        request: &GroupRequest<'_>,
        callbacks: &mut dyn GroupCallbacks,
    ) -> Result<(), GroupError> {
        let sample = (self.clock)();
        self.run(request, callbacks, |state, id| {
            let (session, source) = state.view(id)?;
            fetch_events(session, source, request.params, sample)
        })
    }

    fn indom(
        &self,
        request: &GroupRequest<'_>,
        callbacks: &mut dyn GroupCallbacks,
    ) -> Result<(), GroupError> {
        self.run(request, callbacks, |state, id| {
            let (session, source) = state.view(id)?;
            indom_events(session, source, request.params)
        })
    }

    fn profile(
        &self,
        request: &GroupRequest<'_>,
        callbacks: &mut dyn GroupCallbacks,
    ) -> Result<(), GroupError> {
        self.run(request, callbacks, |state, id| {
            state.profile(id, request.params).map(|()| Vec::new())
        })
    }

    fn store(
        &self,
        request: &GroupRequest<'_>,
        callbacks: &mut dyn GroupCallbacks,
    ) -> Result<(), GroupError> {
        self.run(request, callbacks, |state, id| {
            state.store(id, request.params).map(|()| Vec::new())
        })
    }

    fn derive(
        &self,
        request: &GroupRequest<'_>,
        callbacks: &mut dyn GroupCallbacks,
    ) -> Result<(), GroupError> {
        self.run(request, callbacks, |state, id| {
            state.derive(id, request.params).map(|()| Vec::new())
        })
    }

    fn scrape(
        &self,
        request: &GroupRequest<'_>,
        callbacks: &mut dyn GroupCallbacks,
    ) -> Result<(), GroupError> {
        let sample = (self.clock)();
        self.run(request, callbacks, |state, id| {
            let (session, source) = state.view(id)?;
            scrape_events(session, source, request.params, sample)
        })
    }
}

impl State {
    fn open_session(&mut self, params: &Parameters) -> Result<u32, GroupError> {
        let source = match params.get(PARAMS.hostspec) {
            Some(hostspec) => self
                .sources
                .iter()
                .position(|source| source.hostspec == *hostspec)
                .ok_or_else(|| {
                    GroupError::failed(format!("unknown host specification: {hostspec}"))
                })?,
            None if self.sources.is_empty() => {
                return Err(GroupError::failed("no metric sources available"));
            }
            None => 0,
        };
        let id = self.next_session;
        self.next_session = id
            .checked_add(1)
            .ok_or_else(|| GroupError::failed("session identifiers exhausted"))?;
        self.sessions.insert(id, Session::new(source));
        debug!(target: CATALOGUE_TARGET, context = id, source, "session opened");
        Ok(id)
    }

    fn expire(&mut self, timeout: Duration) {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, session| session.last_used.elapsed() < timeout);
        let expired = before - self.sessions.len();
        if expired > 0 {
            debug!(
                target: CATALOGUE_TARGET,
                expired,
                open = self.sessions.len(),
                "idle sessions expired"
            );
        }
    }

    fn view(&self, id: u32) -> Result<(&Session, &SourceSpec), GroupError> {
        let session = self.sessions.get(&id).ok_or_else(unknown_context)?;
        let source = self
            .sources
            .get(session.source)
            .ok_or_else(unknown_context)?;
        Ok((session, source))
    }

    fn profile(&mut self, id: u32, params: &Parameters) -> Result<(), GroupError> {
        let session = self.sessions.get_mut(&id).ok_or_else(unknown_context)?;
        let source = self
            .sources
            .get(session.source)
            .ok_or_else(unknown_context)?;
        let add = match params.get(PARAMS.expr).map(String::as_str) {
            Some("add") => true,
            Some("del") => false,
            _ => return Err(GroupError::failed("invalid profile expression")),
        };
        let domain = named_indom(source, params.get(PARAMS.indom))?;
        let instances = requested_instances(params, domain)?;
        let profile = session.profiles.entry(domain.indom).or_default();
        if add {
            profile.add(&instances);
        } else {
            profile.delete(&instances);
        }
        debug!(
            target: CATALOGUE_TARGET,
            context = id,
            indom = %domain.indom,
            add,
            instances = instances.len(),
            "instance profile changed"
        );
        Ok(())
    }

    fn store(&mut self, id: u32, params: &Parameters) -> Result<(), GroupError> {
        let (session, source) = self.view(id)?;
        let source_index = session.source;
        let target = match params.get(PARAMS.name) {
            Some(name) => resolve_name(session, source, name)?,
            None => resolve_pmid(
                session,
                source,
                params.get(PARAMS.pmid).map_or("", String::as_str),
            )?,
        };
        if target.name != target.spec.name {
            return Err(GroupError::failed("cannot store into derived metric"));
        }
        let value = params
            .get(PARAMS.value)
            .and_then(|text| target.spec.metric_type.parse_value(text))
            .ok_or_else(|| GroupError::failed("invalid value"))?;
        let instances = match target.spec.indom {
            None => None,
            Some(indom) => {
                let domain = source
                    .indom(indom)
                    .ok_or_else(|| GroupError::failed("unknown instance domain"))?;
                let wanted = requested_instances(params, domain)?;
                Some(if wanted.is_empty() {
                    domain.instances.iter().map(|instance| instance.id).collect()
                } else {
                    wanted
                })
            }
        };
        let name = target.name;

        let spec = self
            .sources
            .get_mut(source_index)
            .and_then(|source| source.metrics.iter_mut().find(|spec| spec.name == name))
            .ok_or_else(|| GroupError::failed("failed to lookup name"))?;
        match instances {
            None => {
                spec.values = vec![ValueSpec {
                    instance: None,
                    value,
                }];
            }
            Some(ids) => {
                for instance in ids {
                    match spec
                        .values
                        .iter_mut()
                        .find(|existing| existing.instance == Some(instance))
                    {
                        Some(existing) => existing.value = value.clone(),
                        None => spec.values.push(ValueSpec {
                            instance: Some(instance),
                            value: value.clone(),
                        }),
                    }
                }
            }
        }
        debug!(target: CATALOGUE_TARGET, context = id, metric = %name, "value stored");
        Ok(())
    }

    fn derive(&mut self, id: u32, params: &Parameters) -> Result<(), GroupError> {
        let session = self.sessions.get_mut(&id).ok_or_else(unknown_context)?;
        let source = self
            .sources
            .get(session.source)
            .ok_or_else(unknown_context)?;
        let definitions = match (params.get(PARAMS.name), params.get(PARAMS.expr)) {
            (Some(name), Some(expr)) => vec![Derived {
                name: name.trim().to_owned(),
                expr: expr.trim().to_owned(),
            }],
            (None, Some(text)) => parse_definitions(text)?,
            _ => Vec::new(),
        };
        if definitions.is_empty() {
            return Err(GroupError::failed("missing derived metric definition"));
        }
        {
            let mut seen = HashSet::new();
            for definition in &definitions {
                let name = definition.name.as_str();
                if source.metric(name).is_some()
                    || session.derived(name).is_some()
                    || !seen.insert(name)
                {
                    return Err(GroupError::failed(format!("duplicate metric name: {name}")));
                }
            }
        }
        debug!(
            target: CATALOGUE_TARGET,
            context = id,
            count = definitions.len(),
            "derived metrics registered"
        );
        session.derived.extend(definitions);
        Ok(())
    }
}

/// Entity to report once the state lock is released.
enum Emit {
    Context(WebSource),
    Metric(WebMetric),
    Fetch(WebResult),
    ValueSet(WebValueSet),
    Value(WebValue),
    InDom(WebInDom),
    Instance(WebInstance),
    Scrape(Box<ScrapePlan>),
}

/// A scrape sample whose labels still need converting.
struct ScrapePlan {
    sample: WebScrape,
    metric_labels: Vec<Vec<(String, String)>>,
    instance_labels: Vec<Vec<(String, String)>>,
}

fn emit(context: &str, events: Vec<Emit>, callbacks: &mut dyn GroupCallbacks) {
    for event in events {
        match event {
            Emit::Context(source) => callbacks.on_context(context, &source),
            Emit::Metric(metric) => callbacks.on_metric(context, &metric),
            Emit::Fetch(result) => callbacks.on_fetch(context, &result),
            Emit::ValueSet(valueset) => callbacks.on_fetch_values(context, &valueset),
            Emit::Value(value) => callbacks.on_fetch_value(context, &value),
            Emit::InDom(indom) => callbacks.on_indom(context, &indom),
            Emit::Instance(instance) => callbacks.on_instance(context, &instance),
            Emit::Scrape(plan) => {
                let ScrapePlan {
                    mut sample,
                    metric_labels,
                    instance_labels,
                } = *plan;
                sample.metric.labels = exposition_labels(context, metric_labels, callbacks);
                if let Some(instance) = sample.instance.as_mut() {
                    instance.labels = exposition_labels(context, instance_labels, callbacks);
                }
                callbacks.on_scrape(context, &sample);
            }
        }
    }
}

fn exposition_labels(
    context: &str,
    sets: Vec<Vec<(String, String)>>,
    callbacks: &mut dyn GroupCallbacks,
) -> Option<String> {
    let mut labels = WebLabelSet {
        sets,
        buffer: String::new(),
    };
    callbacks.on_scrape_labels(context, &mut labels);
    (!labels.buffer.is_empty()).then_some(labels.buffer)
}

fn unknown_context() -> GroupError {
    GroupError::failed("unknown context identifier")
}

/// A metric as addressed by the client, possibly through a derived alias.
struct Resolved<'a> {
    name: String,
    pmid: PmId,
    spec: &'a MetricSpec,
}

impl<'a> Resolved<'a> {
    fn direct(spec: &'a MetricSpec) -> Self {
        Self {
            name: spec.name.clone(),
            pmid: spec.pmid,
            spec,
        }
    }
}

fn derived_pmid(index: usize) -> PmId {
    let serial = u32::try_from(index + 1).unwrap_or(u32::MAX);
    PmId::new(DERIVED_DOMAIN, serial >> 10, serial & 0x3ff)
}

fn alias<'a>(source: &'a SourceSpec, index: usize, derived: &Derived) -> Option<Resolved<'a>> {
    source.metric(&derived.expr).map(|spec| Resolved {
        name: derived.name.clone(),
        pmid: derived_pmid(index),
        spec,
    })
}

fn resolve_name<'a>(
    session: &Session,
    source: &'a SourceSpec,
    name: &str,
) -> Result<Resolved<'a>, GroupError> {
    if let Some(spec) = source.metric(name) {
        return Ok(Resolved::direct(spec));
    }
    match session.derived(name) {
        Some((index, derived)) => alias(source, index, derived)
            .ok_or_else(|| GroupError::failed("cannot evaluate derived metric")),
        None => Err(GroupError::failed("failed to lookup name")),
    }
}

fn resolve_pmid<'a>(
    session: &Session,
    source: &'a SourceSpec,
    text: &str,
) -> Result<Resolved<'a>, GroupError> {
    let pmid: PmId = text
        .parse()
        .map_err(|_| GroupError::failed("invalid metric identifier"))?;
    if let Some(spec) = source.metrics.iter().find(|spec| spec.pmid == pmid) {
        return Ok(Resolved::direct(spec));
    }
    let (index, derived) = session
        .derived
        .iter()
        .enumerate()
        .find(|(index, _)| derived_pmid(*index) == pmid)
        .ok_or_else(|| GroupError::failed("failed to lookup pmid"))?;
    alias(source, index, derived).ok_or_else(|| GroupError::failed("cannot evaluate derived metric"))
}

fn list<'a>(params: &'a Parameters, key: &str) -> impl Iterator<Item = &'a str> {
    params
        .get(key)
        .into_iter()
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|item| !item.is_empty())
}

fn requested_names(params: &Parameters) -> Vec<&str> {
    list(params, PARAMS.names)
        .chain(list(params, PARAMS.name))
        .collect()
}

fn matches_prefix(name: &str, prefix: &str) -> bool {
    prefix.is_empty()
        || name == prefix
        || name
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('.'))
}

/// Metrics named by `names`/`name`, else those under `prefix`, else all.
fn select_described<'a>(
    session: &Session,
    source: &'a SourceSpec,
    params: &Parameters,
) -> Result<Vec<Resolved<'a>>, GroupError> {
    let names = requested_names(params);
    if !names.is_empty() {
        return names
            .into_iter()
            .map(|name| resolve_name(session, source, name))
            .collect();
    }
    let prefix = params.get(PARAMS.prefix).map_or("", String::as_str);
    let aliases = session
        .derived
        .iter()
        .enumerate()
        .filter_map(|(index, derived)| alias(source, index, derived));
    Ok(source
        .metrics
        .iter()
        .map(Resolved::direct)
        .chain(aliases)
        .filter(|metric| matches_prefix(&metric.name, prefix))
        .collect())
}

fn visible_values<'a>(
    session: &'a Session,
    spec: &'a MetricSpec,
) -> impl Iterator<Item = &'a ValueSpec> {
    spec.values
        .iter()
        .filter(move |value| match (spec.indom, value.instance) {
            (Some(indom), Some(instance)) => session.includes(indom, instance),
            _ => true,
        })
}

fn named_indom<'a>(
    source: &'a SourceSpec,
    text: Option<&String>,
) -> Result<&'a InDomSpec, GroupError> {
    let indom: InDomId = text
        .map_or("", String::as_str)
        .parse()
        .map_err(|_| GroupError::failed("invalid instance domain"))?;
    source
        .indom(indom)
        .ok_or_else(|| GroupError::failed("unknown instance domain"))
}

/// Instances selected by the `instance` and `iname` lists.
fn requested_instances(params: &Parameters, domain: &InDomSpec) -> Result<Vec<u32>, GroupError> {
    let mut ids = Vec::new();
    for text in list(params, PARAMS.instance) {
        let id = text
            .parse::<u32>()
            .ok()
            .filter(|id| domain.instance(*id).is_some())
            .ok_or_else(|| GroupError::failed(format!("unknown instance: {text}")))?;
        ids.push(id);
    }
    for name in list(params, PARAMS.iname) {
        let instance = domain
            .instance_named(name)
            .ok_or_else(|| GroupError::failed(format!("unknown instance name: {name}")))?;
        ids.push(instance.id);
    }
    Ok(ids)
}

fn fetch_events(
    session: &Session,
    source: &SourceSpec,
    params: &Parameters,
    sample: WebResult,
) -> Result<Vec<Emit>, GroupError> {
    let mut metrics = requested_names(params)
        .into_iter()
        .map(|name| resolve_name(session, source, name))
        .collect::<Result<Vec<_>, _>>()?;
    for text in list(params, PARAMS.pmids).chain(list(params, PARAMS.pmid)) {
        metrics.push(resolve_pmid(session, source, text)?);
    }

    let mut events = vec![Emit::Fetch(sample)];
    for metric in metrics {
        events.push(Emit::ValueSet(WebValueSet {
            pmid: metric.pmid,
            name: metric.name.clone(),
        }));
        events.extend(visible_values(session, metric.spec).map(|value| {
            Emit::Value(WebValue {
                pmid: metric.pmid,
                instance: value.instance,
                value: value.value.to_string(),
            })
        }));
    }
    Ok(events)
}

fn indom_events(
    session: &Session,
    source: &SourceSpec,
    params: &Parameters,
) -> Result<Vec<Emit>, GroupError> {
    let domain = if params.contains_key(PARAMS.indom) {
        named_indom(source, params.get(PARAMS.indom))?
    } else {
        let name = params.get(PARAMS.name).map_or("", String::as_str);
        let metric = resolve_name(session, source, name)?;
        let indom = metric
            .spec
            .indom
            .ok_or_else(|| GroupError::failed("metric has no instance domain"))?;
        source
            .indom(indom)
            .ok_or_else(|| GroupError::failed("unknown instance domain"))?
    };
    let wanted = requested_instances(params, domain)?;

    let mut events = vec![Emit::InDom(WebInDom {
        indom: domain.indom,
        labels: labels_json(&domain.labels),
        oneline: domain.oneline.clone(),
        helptext: domain.helptext.clone(),
    })];
    events.extend(
        domain
            .instances
            .iter()
            .filter(|instance| wanted.is_empty() || wanted.contains(&instance.id))
            .map(|instance| {
                Emit::Instance(WebInstance {
                    indom: domain.indom,
                    instance: instance.id,
                    name: instance.name.clone(),
                    labels: labels_json(&instance.labels),
                })
            }),
    );
    Ok(events)
}

fn scrape_events(
    session: &Session,
    source: &SourceSpec,
    params: &Parameters,
    sample: WebResult,
) -> Result<Vec<Emit>, GroupError> {
    let mut events = Vec::new();
    for metric in select_described(session, source, params)? {
        let described = WebMetric {
            labels: None,
            ..web_metric(source, &metric)
        };
        let domain = metric.spec.indom.and_then(|indom| source.indom(indom));
        let metric_labels = vec![label_pairs(&source.labels), label_pairs(&metric.spec.labels)];

        for value in visible_values(session, metric.spec) {
            let member = domain
                .zip(value.instance)
                .and_then(|(domain, id)| domain.instance(id).map(|instance| (domain, instance)));
            let (instance, instance_labels) = match member {
                Some((domain, instance)) => (
                    Some(WebInstance {
                        indom: domain.indom,
                        instance: instance.id,
                        name: instance.name.clone(),
                        labels: None,
                    }),
                    vec![
                        label_pairs(&source.labels),
                        label_pairs(&metric.spec.labels),
                        label_pairs(&domain.labels),
                        label_pairs(&instance.labels),
                    ],
                ),
                None => (None, Vec::new()),
            };
            events.push(Emit::Scrape(Box::new(ScrapePlan {
                sample: WebScrape {
                    seconds: sample.seconds,
                    nanoseconds: sample.nanoseconds,
                    metric: described.clone(),
                    instance,
                    value: WebValue {
                        pmid: metric.pmid,
                        instance: value.instance,
                        value: value.value.to_string(),
                    },
                },
                metric_labels: metric_labels.clone(),
                instance_labels,
            })));
        }
    }
    Ok(events)
}

fn digest(text: &str) -> String {
    Sha256::digest(text.as_bytes())
        .iter()
        .take(20)
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

fn source_id(source: &SourceSpec) -> String {
    source
        .source
        .clone()
        .unwrap_or_else(|| digest(&source.hostspec))
}

fn labels_json(labels: &Labels) -> Option<String> {
    if labels.is_empty() {
        return None;
    }
    serde_json::to_string(labels).ok()
}

fn label_pairs(labels: &Labels) -> Vec<(String, String)> {
    labels
        .iter()
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

fn web_metric(source: &SourceSpec, metric: &Resolved<'_>) -> WebMetric {
    let spec = metric.spec;
    let merged: Labels = source
        .labels
        .iter()
        .chain(&spec.labels)
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    WebMetric {
        name: metric.name.clone(),
        series: digest(&format!("{}\n{}", source_id(source), metric.name)),
        pmid: metric.pmid,
        indom: spec.indom.unwrap_or(InDomId::NULL),
        metric_type: spec.metric_type.as_str().to_owned(),
        sem: spec.sem.clone(),
        units: spec.units.clone(),
        labels: labels_json(&merged),
        oneline: spec.oneline.clone(),
        helptext: spec.helptext.clone(),
    }
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
