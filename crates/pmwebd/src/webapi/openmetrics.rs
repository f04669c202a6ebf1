//! OpenMetrics exposition of scrape samples.
//!
//! ```text
//! # PCP <header>
//! [# HELP <name> <text>]
//! # TYPE <name> <semantics>
//! <name>[{<labels>}] <value>[ <millis>]
//! ```

use std::fmt::{self, Write as _};

use crate::group::WebScrape;

use super::builder::quote;

/// Whether a value type can be exposed as a number.
#[must_use]
pub fn type_supported(metric_type: &str) -> bool {
    matches!(metric_type, "32" | "u32" | "64" | "u64" | "float" | "double")
}

/// Maps metric semantics onto an exposition type.
#[must_use]
pub fn semantics(sem: &str) -> &'static str {
    match sem {
        "counter" => "counter",
        "instant" | "discrete" => "gauge",
        _ => "unknown",
    }
}

/// Normalises a dotted metric name into an exposition name.
#[must_use]
pub fn metric_name(name: &str) -> String {
    sanitise(name, |ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == ':')
}

/// Normalises a label name.
#[must_use]
pub fn label_name(name: &str) -> String {
    sanitise(name, |ch| ch.is_ascii_alphanumeric() || ch == '_')
}

fn sanitise(name: &str, keep: impl Fn(char) -> bool) -> String {
    let mut out: String = name
        .chars()
        .map(|ch| if keep(ch) { ch } else { '_' })
        .collect();
    if out.starts_with(|ch: char| ch.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// Escapes a label value for use between double quotes.
#[must_use]
pub fn escape_label(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
    out
}

fn escape_help(text: &str) -> String {
    text.replace('\\', "\\\\").replace('\n', "\\n")
}

/// Milliseconds reported for a sample timestamp.
#[must_use]
pub const fn timestamp_millis(seconds: i64, nanoseconds: i64) -> i64 {
    seconds * 1000 + nanoseconds.div_euclid(1000)
}

/// Renders one sample, or `None` when its type has no exposition form.
#[must_use]
pub fn render(scrape: &WebScrape, compat: bool, times: bool) -> Option<String> {
    if !type_supported(&scrape.metric.metric_type) {
        return None;
    }
    let mut out = String::new();
    render_into(&mut out, scrape, compat, times).ok()?;
    Some(out)
}

fn render_into(out: &mut String, scrape: &WebScrape, compat: bool, times: bool) -> fmt::Result {
    let metric = &scrape.metric;
    let name = metric_name(&metric.name);

    if compat {
        writeln!(out, "# PCP {} {} {}", metric.name, metric.sem, metric.units)?;
    } else {
        writeln!(
            out,
            "# PCP {} {} {} {} {} {}",
            metric.name, metric.pmid, metric.metric_type, metric.indom, metric.sem, metric.units
        )?;
    }
    if let Some(oneline) = &metric.oneline {
        writeln!(out, "# HELP {name} {}", escape_help(oneline))?;
    }
    write!(out, "# TYPE {name} {}\n{name}", semantics(&metric.sem))?;

    let instance = scrape
        .instance
        .as_ref()
        .filter(|_| !metric.indom.is_null());
    let labels = instance
        .and_then(|instance| non_empty(instance.labels.as_deref()))
        .or_else(|| non_empty(metric.labels.as_deref()));
    let value = &scrape.value.value;

    match (instance, labels) {
        (Some(instance), labels) => {
            let quoted = quote(&instance.name);
            if compat {
                write!(out, "{{instance={quoted}")?;
            } else {
                write!(
                    out,
                    "{{instance.name={quoted},instance.id=\"{}\"",
                    instance.instance
                )?;
            }
            if let Some(labels) = labels {
                write!(out, ",{labels}")?;
            }
            write!(out, "}} {value}")?;
        }
        (None, Some(labels)) => write!(out, "{{{labels}}} {value}")?,
        (None, None) => write!(out, " {value}")?,
    }

    if times {
        writeln!(
            out,
            " {}",
            timestamp_millis(scrape.seconds, scrape.nanoseconds)
        )
    } else {
        writeln!(out)
    }
}

fn non_empty(labels: Option<&str>) -> Option<&str> {
    labels.filter(|text| !text.is_empty())
}
