//! Control loop behaviour with in-memory clients.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hyper::{Method, StatusCode};
use rstest::{fixture, rstest};

use crate::group::{
    GroupError, InDomId, PmId, WebAccess, WebMetric, WebResult, WebScrape, WebValue, WebValueSet,
};
use crate::http::ResponseFormat;
use crate::webapi::{GatewayError, GatewaySettings, RestCommand};

use super::support::{self, GatewayHarness, RecordingSink, ScriptedGroup, get, post};

/// Worker-side gate that holds collection calls until released.
struct Gate {
    entered: Mutex<Sender<()>>,
    release: Mutex<Receiver<()>>,
}

struct GateControl {
    entered: Receiver<()>,
    release: Sender<()>,
}

impl GateControl {
    fn wait_entered(&self) {
        self.entered
            .recv_timeout(Duration::from_secs(5))
            .expect("collection call should start");
    }

    fn open(&self) {
        self.release.send(()).expect("gate still held");
    }
}

fn gate() -> (Arc<Gate>, GateControl) {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let gate = Arc::new(Gate {
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
    });
    (
        gate,
        GateControl {
            entered: entered_rx,
            release: release_tx,
        },
    )
}

impl Gate {
    fn pass(&self) {
        self.entered
            .lock()
            .expect("gate mutex poisoned")
            .send(())
            .expect("test still listening");
        self.release
            .lock()
            .expect("gate mutex poisoned")
            .recv()
            .expect("test releases the gate");
    }
}

/// Session emitting the single `kernel.all.load` value from the fetch
/// scenario.
fn load_fetch(
    command: RestCommand,
    callbacks: &mut dyn crate::group::GroupCallbacks,
) -> Result<(), GroupError> {
    assert_eq!(command, RestCommand::Fetch);
    let pmid = PmId::new(60, 2, 0);
    callbacks.on_check("1", &WebAccess::default())?;
    callbacks.on_fetch(
        "1",
        &WebResult {
            seconds: 1_700_000_000,
            nanoseconds: 5,
        },
    );
    callbacks.on_fetch_values(
        "1",
        &WebValueSet {
            pmid,
            name: "kernel.all.load".to_owned(),
        },
    );
    callbacks.on_fetch_value(
        "1",
        &WebValue {
            pmid,
            instance: None,
            value: "\"0.12\"".to_owned(),
        },
    );
    Ok(())
}

#[fixture]
fn catalogue_gateway() -> GatewayHarness {
    GatewayHarness::start(Arc::new(support::catalogue()), support::settings())
}

#[rstest]
fn fetch_streams_the_exact_document() {
    let group = ScriptedGroup::new(|command, _request, callbacks| load_fetch(command, callbacks));
    let gateway = GatewayHarness::start(Arc::new(group), support::settings());

    let response = gateway.exchange(1, &get("/pmapi/fetch?names=kernel.all.load"));
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.format, ResponseFormat::Json);
    assert!(response.streamed);
    assert_eq!(
        response.body,
        "{\"context\":\"1\",\"timestamp\":{\"sec\":1700000000,\"nsec\":5},\
         \"values\":[{\"pmid\":\"60.2.0\",\"name\":\"kernel.all.load\",\
         \"instances\":[{\"instance\":null,\"value\":\"0.12\"}]}]}\r\n"
    );
    gateway.shutdown();
}

#[rstest]
fn scrape_of_a_bare_counter_has_no_help_or_braces() {
    let group = ScriptedGroup::new(|_command, _request, callbacks| {
        callbacks.on_check("1", &WebAccess::default())?;
        let pmid = PmId::new(60, 0, 14);
        callbacks.on_scrape(
            "1",
            &WebScrape {
                seconds: 1,
                nanoseconds: 0,
                metric: WebMetric {
                    name: "kernel.all.sysfork".to_owned(),
                    series: "0".repeat(40),
                    pmid,
                    indom: InDomId::NULL,
                    metric_type: "u64".to_owned(),
                    sem: "counter".to_owned(),
                    units: "count".to_owned(),
                    labels: None,
                    oneline: None,
                    helptext: None,
                },
                instance: None,
                value: WebValue {
                    pmid,
                    instance: None,
                    value: "1234".to_owned(),
                },
            },
        );
        Ok(())
    });
    let gateway = GatewayHarness::start(Arc::new(group), support::settings());

    let response = gateway.exchange(1, &get("/metrics"));
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.format, ResponseFormat::Text);
    assert_eq!(
        response.body,
        "# PCP kernel.all.sysfork 60.0.14 u64 PM_INDOM_NULL counter count\n\
         # TYPE kernel_all_sysfork counter\n\
         kernel_all_sysfork 1234\n"
    );
    gateway.shutdown();
}

#[rstest]
#[case("/nowhere", StatusCode::NOT_FOUND, "unknown URL")]
#[case("/pmapi/3", StatusCode::NOT_FOUND, "unknown URL")]
#[case("/pmapi/fetch", StatusCode::BAD_REQUEST, "missing required parameters")]
#[case("/pmapi/store?name=hinv.ncpu", StatusCode::BAD_REQUEST, "missing required parameters")]
#[case("/pmapi/99/context", StatusCode::INTERNAL_SERVER_ERROR, "unknown context identifier")]
#[case(
    "/pmapi/fetch?names=no.such.metric",
    StatusCode::INTERNAL_SERVER_ERROR,
    "failed to lookup name"
)]
fn failures_carry_status_and_message(
    catalogue_gateway: GatewayHarness,
    #[case] target: &str,
    #[case] status: StatusCode,
    #[case] message: &str,
) {
    let response = catalogue_gateway.exchange(1, &get(target));
    assert_eq!(response.status, status);
    assert_eq!(response.format, ResponseFormat::Json);
    assert_eq!(
        response.body,
        format!("{{\"success\":false,\"message\":\"{message}\"}}\r\n")
    );
    catalogue_gateway.shutdown();
}

#[rstest]
fn catalogue_session_round_trip(catalogue_gateway: GatewayHarness) {
    let context = catalogue_gateway.exchange(1, &get("/pmapi/context?hostspec=localhost"));
    assert_eq!(context.status, StatusCode::OK);
    assert!(context.body.starts_with("{\"context\":\"1\",\"source\":\""));
    assert!(context.body.ends_with(
        "\"hostspec\":\"localhost\",\"labels\":{\"agent\":\"linux\",\"hostname\":\"localhost\"}}\r\n"
    ));

    let stored = catalogue_gateway.exchange(1, &get("/pmapi/1/store?name=hinv.ncpu&value=8"));
    assert_eq!(stored.body, "{\"success\":true}\r\n");
    assert!(!stored.streamed);

    let fetched = catalogue_gateway.exchange(1, &get("/pmapi/1/fetch?names=hinv.ncpu"));
    assert_eq!(
        fetched.body,
        "{\"context\":\"1\",\"timestamp\":{\"sec\":1700000000,\"nsec\":250000000},\
         \"values\":[{\"pmid\":\"60.0.32\",\"name\":\"hinv.ncpu\",\
         \"instances\":[{\"instance\":null,\"value\":8}]}]}\r\n"
    );
    catalogue_gateway.shutdown();
}

#[rstest]
fn context_parameter_selects_the_session(catalogue_gateway: GatewayHarness) {
    catalogue_gateway.exchange(1, &get("/pmapi/context"));
    let response = catalogue_gateway.exchange(1, &get("/pmapi/fetch?context=1&name=hinv.ncpu"));
    assert!(response.body.starts_with("{\"context\":\"1\","), "{}", response.body);
    catalogue_gateway.shutdown();
}

#[rstest]
fn compat_fetch_uses_numeric_identifiers(catalogue_gateway: GatewayHarness) {
    let response = catalogue_gateway.exchange(1, &get("/pmapi/_fetch?names=hinv.ncpu"));
    let pmid = PmId::new(60, 0, 32).raw();
    assert_eq!(
        response.body,
        format!(
            "{{\"timestamp\":{{\"s\":1700000000,\"us\":250000}},\
             \"values\":[{{\"pmid\":{pmid},\"name\":\"hinv.ncpu\",\
             \"instances\":[{{\"instance\":{},\"value\":2}}]}}]}}\r\n",
            u32::MAX
        )
    );
    catalogue_gateway.shutdown();
}

#[rstest]
fn derive_body_registers_an_alias(catalogue_gateway: GatewayHarness) {
    catalogue_gateway.exchange(1, &get("/pmapi/context"));
    let derived = catalogue_gateway.exchange(1, &post("/pmapi/1/derive", "cpu.count = hinv.ncpu"));
    assert_eq!(derived.status, StatusCode::OK);
    assert_eq!(derived.body, "{\"success\":true}\r\n");

    let described = catalogue_gateway.exchange(1, &get("/pmapi/1/metric?names=cpu.count"));
    assert!(
        described.body.contains("\"name\":\"cpu.count\""),
        "{}",
        described.body
    );
    assert!(described.body.contains("\"pmID\":\"511.0.1\""));
    catalogue_gateway.shutdown();
}

#[rstest]
fn scrape_labels_and_help_come_from_the_catalogue(catalogue_gateway: GatewayHarness) {
    let response =
        catalogue_gateway.exchange(1, &get("/metrics?names=kernel.all.sysfork&times=true"));
    assert_eq!(response.format, ResponseFormat::Text);
    assert!(
        response
            .body
            .contains("# HELP kernel_all_sysfork fork rate metric from /proc/stat\n"),
        "{}",
        response.body
    );
    assert!(
        response.body.ends_with(
            "kernel_all_sysfork{agent=\"linux\",hostname=\"localhost\"} 1234 1700000000250000\n"
        ),
        "{}",
        response.body
    );
    catalogue_gateway.shutdown();
}

#[rstest]
fn scrape_skips_string_metrics(catalogue_gateway: GatewayHarness) {
    let response = catalogue_gateway.exchange(1, &get("/metrics"));
    assert!(response.body.contains("kernel_percpu_cpu_user{instance.name=\"cpu1\""));
    assert!(!response.body.contains("kernel_uname_release"));
    catalogue_gateway.shutdown();
}

#[rstest]
#[case(None, StatusCode::UNAUTHORIZED, "authentication required")]
#[case(Some("YWxpY2U6d3Jvbmc="), StatusCode::FORBIDDEN, "authentication failed")]
fn guarded_sessions_refuse_clients(
    #[case] authorization: Option<&str>,
    #[case] status: StatusCode,
    #[case] message: &str,
) {
    let group = ScriptedGroup::new(|_command, _request, callbacks| {
        let access = WebAccess {
            username: Some("alice".to_owned()),
            password: Some("secret".to_owned()),
            realm: Some("pmweb".to_owned()),
        };
        callbacks.on_check("1", &access)?;
        callbacks.on_fetch("1", &WebResult::default());
        Ok(())
    });
    let gateway = GatewayHarness::start(Arc::new(group), support::settings());
    let header = authorization.map(|token| format!("Basic {token}"));
    let fetch = support::request(Method::GET, "/pmapi/fetch?names=x", header.as_deref(), "");

    let response = gateway.exchange(1, &fetch);
    assert_eq!(response.status, status);
    assert!(!response.streamed, "nothing may be emitted before the check");
    assert_eq!(
        response.body,
        format!("{{\"success\":false,\"message\":\"{message}\"}}\r\n")
    );
    gateway.shutdown();
}

#[rstest]
fn matching_credentials_are_accepted() {
    let group = ScriptedGroup::new(|_command, _request, callbacks| {
        let access = WebAccess {
            username: Some("alice".to_owned()),
            password: Some("secret".to_owned()),
            realm: None,
        };
        callbacks.on_check("1", &access)
    });
    let gateway = GatewayHarness::start(Arc::new(group), support::settings());
    let store = support::request(
        Method::GET,
        "/pmapi/store?name=x&value=1",
        Some("Basic YWxpY2U6c2VjcmV0"),
        "",
    );
    let response = gateway.exchange(1, &store);
    assert_eq!(response.status, StatusCode::OK);
    gateway.shutdown();
}

#[rstest]
fn server_policy_demands_credentials_everywhere(catalogue_gateway: GatewayHarness) {
    catalogue_gateway.shutdown();
    let settings = GatewaySettings {
        require_credentials: true,
        ..support::settings()
    };
    let gateway = GatewayHarness::start(Arc::new(support::catalogue()), settings);
    let response = gateway.exchange(1, &get("/pmapi/context"));
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    gateway.shutdown();
}

#[rstest]
fn second_request_on_a_busy_connection_conflicts() {
    let (gate, control) = gate();
    let group = ScriptedGroup::new(move |command, _request, callbacks| {
        gate.pass();
        load_fetch(command, callbacks)
    });
    let gateway = GatewayHarness::start(Arc::new(group), support::settings());
    let sink = RecordingSink::new();

    gateway.send(1, &sink, &get("/pmapi/fetch?names=kernel.all.load"));
    control.wait_entered();
    gateway.send(1, &sink, &get("/pmapi/fetch?names=kernel.all.load"));
    control.open();

    let responses = sink.wait_for(2);
    assert_eq!(responses[0].status, StatusCode::OK);
    assert!(responses[0].body.contains("\"name\":\"kernel.all.load\""));
    assert_eq!(responses[1].status, StatusCode::CONFLICT);
    assert_eq!(
        responses[1].body,
        "{\"success\":false,\"message\":\"request already in progress\"}\r\n"
    );
    gateway.shutdown();
}

#[rstest]
fn connections_run_independently() {
    let (gate, control) = gate();
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let group = ScriptedGroup::new(move |command, _request, callbacks| {
        if seen.fetch_add(1, Ordering::SeqCst) == 0 {
            gate.pass();
        }
        load_fetch(command, callbacks)
    });
    let gateway = GatewayHarness::start(Arc::new(group), support::settings());
    let slow = RecordingSink::new();

    gateway.send(1, &slow, &get("/pmapi/fetch?names=kernel.all.load"));
    control.wait_entered();
    let fast = gateway.exchange(2, &get("/pmapi/fetch?names=kernel.all.load"));
    assert_eq!(fast.status, StatusCode::OK);
    assert!(slow.pending().is_empty(), "slow request is still held");

    control.open();
    assert_eq!(slow.wait_for(1)[0].status, StatusCode::OK);
    gateway.shutdown();
}

#[rstest]
fn shutdown_gives_up_on_a_stuck_worker() {
    let (gate, control) = gate();
    let group = ScriptedGroup::new(move |command, _request, callbacks| {
        gate.pass();
        load_fetch(command, callbacks)
    });
    let gateway = GatewayHarness::start(Arc::new(group), support::settings());
    let stuck = RecordingSink::new();

    gateway.send(1, &stuck, &get("/pmapi/fetch?names=kernel.all.load"));
    control.wait_entered();
    let budget = Duration::from_millis(50);
    let error = gateway
        .shutdown_within(budget)
        .expect_err("worker still inside the collection call");
    assert!(matches!(error, GatewayError::DrainTimeout { budget: waited } if waited == budget));
    control.open();
}

#[rstest]
fn full_worker_queue_fails_the_request() {
    let (gate, control) = gate();
    let group = ScriptedGroup::new(move |command, _request, callbacks| {
        gate.pass();
        load_fetch(command, callbacks)
    });
    let settings = GatewaySettings {
        worker_threads: 1,
        worker_queue: 1,
        ..support::settings()
    };
    let gateway = GatewayHarness::start(Arc::new(group), settings);
    let running = RecordingSink::new();
    let queued = RecordingSink::new();

    gateway.send(1, &running, &get("/pmapi/fetch?names=kernel.all.load"));
    control.wait_entered();
    gateway.send(2, &queued, &get("/pmapi/fetch?names=kernel.all.load"));
    let refused = gateway.exchange(3, &get("/pmapi/fetch?names=kernel.all.load"));
    assert_eq!(refused.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        refused.body,
        "{\"success\":false,\"message\":\"worker queue exhausted\"}\r\n"
    );

    control.open();
    control.wait_entered();
    control.open();
    assert_eq!(running.wait_for(1)[0].status, StatusCode::OK);
    assert_eq!(queued.wait_for(1)[0].status, StatusCode::OK);
    gateway.shutdown();
}

#[rstest]
fn failure_after_streaming_appends_to_the_partial_body() {
    let group = ScriptedGroup::new(|_command, _request, callbacks| {
        callbacks.on_check("1", &WebAccess::default())?;
        callbacks.on_fetch("1", &WebResult::default());
        Err(GroupError::failed("backend went away"))
    });
    let gateway = GatewayHarness::start(Arc::new(group), support::settings());

    let response = gateway.exchange(1, &get("/pmapi/fetch?names=x"));
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.reported, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        response.body,
        "{\"context\":\"1\",\"timestamp\":{\"sec\":0,\"nsec\":0},\"values\":[\
         {\"success\":false,\"message\":\"backend went away\"}\r\n"
    );
    gateway.shutdown();
}

#[rstest]
fn unexplained_failures_report_a_placeholder() {
    let group = ScriptedGroup::new(|_command, _request, _callbacks| Err(GroupError::unexplained()));
    let gateway = GatewayHarness::start(Arc::new(group), support::settings());
    let response = gateway.exchange(1, &get("/pmapi/context"));
    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        response.body,
        "{\"success\":false,\"message\":\"(none)\"}\r\n"
    );
    gateway.shutdown();
}

#[rstest]
fn panicking_collection_calls_fail_cleanly() {
    let group = ScriptedGroup::new(|_command, _request, _callbacks| panic!("collection bug"));
    let gateway = GatewayHarness::start(Arc::new(group), support::settings());
    let response = gateway.exchange(1, &get("/pmapi/context"));
    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        response.body,
        "{\"success\":false,\"message\":\"collection call panicked\"}\r\n"
    );

    let healthy = gateway.exchange(2, &get("/pmapi/fetch?names=x"));
    assert_eq!(healthy.status, StatusCode::INTERNAL_SERVER_ERROR);
    gateway.shutdown();
}

#[rstest]
fn reply_is_attempted_after_the_peer_hangs_up() {
    let (gate, control) = gate();
    let group = ScriptedGroup::new(move |command, _request, callbacks| {
        gate.pass();
        load_fetch(command, callbacks)
    });
    let gateway = GatewayHarness::start(Arc::new(group), support::settings());
    let sink = RecordingSink::new();

    gateway.send(1, &sink, &get("/pmapi/fetch?names=kernel.all.load"));
    control.wait_entered();
    gateway.close(1);
    control.open();

    assert_eq!(sink.wait_for(1)[0].status, StatusCode::OK);
    gateway.shutdown();
}

#[rstest]
fn timeout_is_handed_to_the_collection_call() {
    let group = ScriptedGroup::new(|_command, request, callbacks| {
        callbacks.on_check("1", &WebAccess::default())?;
        if request.timeout == Duration::from_millis(1500) {
            Ok(())
        } else {
            Err(GroupError::failed(format!("timeout {:?}", request.timeout)))
        }
    });
    let settings = GatewaySettings {
        timeout: Duration::from_millis(1500),
        ..support::settings()
    };
    let gateway = GatewayHarness::start(Arc::new(group), settings);
    let response = gateway.exchange(1, &get("/pmapi/context"));
    assert_eq!(response.status, StatusCode::OK, "{}", response.body);
    gateway.shutdown();
}
