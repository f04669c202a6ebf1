//! Parameter names and per-command validation.
//!
//! Validation never aborts a request: a failed rule records `400` on the
//! baton and the request still dispatches, where the worker observes the
//! recorded status and completes immediately as a failure.

use hyper::{Method, StatusCode};

use super::baton::Baton;
use super::command::RestCommand;

/// Names of the query parameters the gateway inspects.
#[derive(Debug)]
pub struct ParamNames {
    /// Comma-separated metric names.
    pub names: &'static str,
    /// Single metric name.
    pub name: &'static str,
    /// Comma-separated metric identifiers.
    pub pmids: &'static str,
    /// Single metric identifier.
    pub pmid: &'static str,
    /// Instance-domain identifier.
    pub indom: &'static str,
    /// Derived-metric expression or profile action.
    pub expr: &'static str,
    /// Value to store.
    pub value: &'static str,
    /// Append sample timestamps to scrape output.
    pub times: &'static str,
    /// Session identifier.
    pub context: &'static str,
    /// Comma-separated instance identifiers.
    pub instance: &'static str,
    /// Comma-separated instance names.
    pub iname: &'static str,
    /// Metric-name prefix.
    pub prefix: &'static str,
    /// Host specification for new sessions.
    pub hostspec: &'static str,
}

/// The parameter name table.
pub static PARAMS: ParamNames = ParamNames {
    names: "names",
    name: "name",
    pmids: "pmids",
    pmid: "pmid",
    indom: "indom",
    expr: "expr",
    value: "value",
    times: "times",
    context: "context",
    instance: "instance",
    iname: "iname",
    prefix: "prefix",
    hostspec: "hostspec",
};

/// Applies the required-parameter rule for the baton's command.
///
/// Seeds the session from the `context` parameter when the URL carried
/// none, and reads the scrape `times` flag.
pub fn validate(baton: &mut Baton, method: &Method, names: &ParamNames) {
    if baton.context().is_none()
        && let Some(context) = baton.params().get(names.context).cloned()
    {
        baton.set_context(&context);
    }

    let command = baton.command();
    if command == RestCommand::Scrape {
        let times = baton
            .params()
            .get(names.times)
            .is_some_and(|value| value == "true");
        baton.set_times(times);
    }

    let params = baton.params();
    let has = |key: &str| params.contains_key(key);
    let valid = match command {
        RestCommand::Context | RestCommand::Metric | RestCommand::Scrape => true,
        RestCommand::Fetch => {
            has(names.name) || has(names.names) || has(names.pmid) || has(names.pmids)
        }
        RestCommand::InDom => has(names.indom) || has(names.name),
        RestCommand::Profile => has(names.indom),
        RestCommand::Store => (has(names.name) || has(names.pmid)) && has(names.value),
        RestCommand::Derive => *method == Method::POST || (has(names.name) && has(names.expr)),
        RestCommand::None => false,
    };
    if !valid {
        baton.record_status(StatusCode::BAD_REQUEST);
    }
}

/// Applies a request body: a derive POST supplies `expr` verbatim.
pub fn apply_body(baton: &mut Baton, method: &Method, body: &[u8], names: &ParamNames) {
    if baton.command() != RestCommand::Derive || *method != Method::POST {
        return;
    }
    let expr = String::from_utf8_lossy(body).into_owned();
    baton
        .params_mut()
        .entry(names.expr.to_owned())
        .or_insert(expr);
}
