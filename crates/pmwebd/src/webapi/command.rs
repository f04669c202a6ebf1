//! URL classification for the REST surface.
//!
//! Two URL families are served: `/pmapi/[<session>/][_]<command>` and the
//! fixed OpenMetrics path `/metrics`. Command names are matched by prefix
//! against an ordered table, so longer names precede any name they start
//! with (`metrics` before `metric`).

use std::fmt;

/// Commands understood by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RestCommand {
    /// Unrecognised; always rejected with 400.
    None,
    /// Open or describe a session.
    Context,
    /// Describe metrics.
    Metric,
    /// Sample values.
    Fetch,
    /// Describe an instance domain.
    InDom,
    /// Adjust the instance profile.
    Profile,
    /// Store a value.
    Store,
    /// Register derived metrics.
    Derive,
    /// OpenMetrics exposition.
    Scrape,
}

impl RestCommand {
    /// Canonical name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Context => "context",
            Self::Metric => "metric",
            Self::Fetch => "fetch",
            Self::InDom => "indom",
            Self::Profile => "profile",
            Self::Store => "store",
            Self::Derive => "derive",
            Self::Scrape => "scrape",
        }
    }
}

impl fmt::Display for RestCommand {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

const PMAPI_PREFIX: &str = "/pmapi/";

const COMMANDS: &[(&str, RestCommand)] = &[
    ("context", RestCommand::Context),
    ("profile", RestCommand::Profile),
    ("metrics", RestCommand::Scrape),
    ("metric", RestCommand::Metric),
    ("derive", RestCommand::Derive),
    ("fetch", RestCommand::Fetch),
    ("indom", RestCommand::InDom),
    ("store", RestCommand::Store),
];

const OPENMETRICS: &[(&str, RestCommand)] = &[("/metrics", RestCommand::Scrape)];

/// Outcome of classifying a handled URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Command to execute.
    pub command: RestCommand,
    /// Compatibility schema requested with a leading underscore.
    pub compat: bool,
    /// Session identifier embedded in the path.
    pub context: Option<String>,
}

/// Classifies a request path.
///
/// Returns `None` when the path is not served here, including a session
/// digit run that is not terminated by `/`.
#[must_use]
pub fn classify(path: &str) -> Option<Route> {
    if let Some(rest) = path.strip_prefix(PMAPI_PREFIX) {
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        let (context, name) = if digits > 0 {
            let (session, tail) = rest.split_at(digits);
            (Some(session.to_owned()), tail.strip_prefix('/')?)
        } else {
            (None, rest)
        };
        let (compat, name) = match name.strip_prefix('_') {
            Some(stripped) => (true, stripped),
            None => (false, name),
        };
        if let Some(command) = lookup(COMMANDS, name) {
            return Some(Route {
                command,
                compat,
                context,
            });
        }
    }
    lookup(OPENMETRICS, path).map(|command| Route {
        command,
        compat: false,
        context: None,
    })
}

fn lookup(table: &[(&str, RestCommand)], name: &str) -> Option<RestCommand> {
    table
        .iter()
        .find(|(prefix, _)| name.starts_with(prefix))
        .map(|(_, command)| *command)
}
