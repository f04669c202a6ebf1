//! Incremental JSON and OpenMetrics output driven by collection events.
//!
//! Every event is rendered into one fragment and flushed to the client at
//! once, so memory use does not grow with the result size. Open containers
//! are tracked on the baton's suffix stack and closed either at a group
//! boundary or by completion.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::group::{
    GroupCallbacks, GroupError, NULL_INSTANCE_ID, WebAccess, WebInDom, WebInstance, WebLabelSet,
    WebMetric, WebResult, WebScrape, WebSource, WebValue, WebValueSet,
};
use crate::http::{ResponseFormat, ResponseSink};

use super::WEBAPI_TARGET;
use super::access::AccessPolicy;
use super::baton::{Baton, GroupKind, StreamState};
use super::openmetrics;
use super::suffix::Container;

/// Renders `text` as a JSON string literal.
#[must_use]
pub fn quote(text: &str) -> String {
    serde_json::Value::from(text).to_string()
}

fn labels_or_empty(labels: Option<&String>) -> &str {
    labels
        .map(String::as_str)
        .filter(|text| !text.is_empty())
        .unwrap_or("{}")
}

/// Callback table that streams one request's response.
pub struct StreamingBuilder<'a> {
    baton: &'a mut Baton,
    policy: AccessPolicy,
    client: Option<Arc<dyn ResponseSink>>,
}

impl<'a> StreamingBuilder<'a> {
    /// Binds a builder to a baton.
    pub fn new(baton: &'a mut Baton, policy: AccessPolicy) -> Self {
        let client = baton.client();
        Self {
            baton,
            policy,
            client,
        }
    }

    fn context_field(&self, context: &str) -> String {
        if self.baton.compat && context.bytes().all(|byte| byte.is_ascii_digit()) {
            context.to_owned()
        } else {
            quote(context)
        }
    }

    fn flush(&mut self, fragment: &str, format: ResponseFormat) {
        self.baton.format = format;
        let Some(client) = self.client.as_ref() else {
            return;
        };
        if let Err(error) = client.transfer(fragment, format) {
            debug!(
                target: WEBAPI_TARGET,
                connection = self.baton.connection,
                error = %error,
                "client unreachable; discarding further output"
            );
            self.client = None;
        }
    }

    fn open(&mut self, out: &mut String, token: char, container: Container) {
        out.push(token);
        self.baton.suffix.push(container);
    }

    /// Handles a group boundary shared by value-sets and instance domains.
    ///
    /// Closes the previous group of the same kind, emits the separator and
    /// resets the group counters when the identifier changes.
    fn enter_group(&mut self, out: &mut String, kind: GroupKind, id: u32) {
        let seen = match kind {
            GroupKind::ValueSet => self.baton.numvsets,
            GroupKind::InDom => self.baton.numindoms,
        };
        if seen > 0 {
            self.baton.suffix.close_to(self.baton.group_depth, out);
            out.push(',');
        }
        if self.baton.active_group(kind) != Some(id) {
            match kind {
                GroupKind::ValueSet => self.baton.numvsets = 0,
                GroupKind::InDom => self.baton.numindoms = 0,
            }
            self.baton.state = StreamState::InGroup { kind, id };
        }
        self.baton.numinsts = 0;
        match kind {
            GroupKind::ValueSet => self.baton.numvsets += 1,
            GroupKind::InDom => self.baton.numindoms += 1,
        }
        self.baton.group_depth = self.baton.suffix.depth();
    }

    fn push_texts(out: &mut String, oneline: Option<&String>, helptext: Option<&String>) {
        if let Some(oneline) = oneline {
            out.push_str(",\"text-oneline\":");
            out.push_str(&quote(oneline));
        }
        if let Some(helptext) = helptext {
            out.push_str(",\"text-helptext\":");
            out.push_str(&quote(helptext));
        }
    }
}

impl GroupCallbacks for StreamingBuilder<'_> {
    fn on_context(&mut self, context: &str, source: &WebSource) {
        self.baton.set_context(context);
        let mut out = String::new();
        self.open(&mut out, '{', Container::Object);
        out.push_str("\"context\":");
        out.push_str(&self.context_field(context));
        if !self.baton.compat {
            out.push_str(",\"source\":");
            out.push_str(&quote(&source.source));
            out.push_str(",\"hostspec\":");
            out.push_str(&quote(&source.hostspec));
            out.push_str(",\"labels\":");
            out.push_str(labels_or_empty(source.labels.as_ref()));
        }
        self.flush(&out, ResponseFormat::Json);
    }

    fn on_metric(&mut self, context: &str, metric: &WebMetric) {
        self.baton.set_context(context);
        let mut out = String::new();
        if self.baton.numpmids == 0 {
            self.open(&mut out, '{', Container::Object);
            out.push_str("\"context\":");
            out.push_str(&self.context_field(context));
            out.push_str(",\"metrics\":");
            self.open(&mut out, '[', Container::Array);
        } else {
            out.push(',');
        }
        self.baton.numpmids += 1;

        out.push_str("{\"name\":");
        out.push_str(&quote(&metric.name));
        out.push_str(",\"series\":");
        out.push_str(&quote(&metric.series));
        if self.baton.compat {
            out.push_str(&format!(
                ",\"pmID\":{},\"indom\":{}",
                metric.pmid.raw(),
                metric.indom.raw()
            ));
        } else {
            out.push_str(&format!(
                ",\"pmID\":\"{}\",\"indom\":\"{}\"",
                metric.pmid, metric.indom
            ));
        }
        out.push_str(",\"type\":");
        out.push_str(&quote(&metric.metric_type));
        out.push_str(",\"sem\":");
        out.push_str(&quote(&metric.sem));
        out.push_str(",\"units\":");
        out.push_str(&quote(&metric.units));
        out.push_str(",\"labels\":");
        out.push_str(labels_or_empty(metric.labels.as_ref()));
        Self::push_texts(&mut out, metric.oneline.as_ref(), metric.helptext.as_ref());
        out.push('}');
        self.flush(&out, ResponseFormat::Json);
    }

    fn on_fetch(&mut self, context: &str, result: &WebResult) {
        self.baton.set_context(context);
        self.baton.numvsets = 0;
        self.baton.numinsts = 0;
        self.baton.state = StreamState::InSession;

        let mut out = String::new();
        self.open(&mut out, '{', Container::Object);
        if self.baton.compat {
            out.push_str(&format!(
                "\"timestamp\":{{\"s\":{},\"us\":{}}},",
                result.seconds,
                result.nanoseconds.div_euclid(1000)
            ));
        } else {
            out.push_str("\"context\":");
            out.push_str(&self.context_field(context));
            out.push_str(&format!(
                ",\"timestamp\":{{\"sec\":{},\"nsec\":{}}},",
                result.seconds, result.nanoseconds
            ));
        }
        out.push_str("\"values\":");
        self.open(&mut out, '[', Container::Array);
        self.flush(&out, ResponseFormat::Json);
    }

    fn on_fetch_values(&mut self, context: &str, valueset: &WebValueSet) {
        self.baton.set_context(context);
        let mut out = String::new();
        self.enter_group(&mut out, GroupKind::ValueSet, valueset.pmid.raw());

        self.open(&mut out, '{', Container::Object);
        if self.baton.compat {
            out.push_str(&format!("\"pmid\":{}", valueset.pmid.raw()));
        } else {
            out.push_str(&format!("\"pmid\":\"{}\"", valueset.pmid));
        }
        out.push_str(",\"name\":");
        out.push_str(&quote(&valueset.name));
        out.push_str(",\"instances\":");
        self.open(&mut out, '[', Container::Array);
        self.flush(&out, ResponseFormat::Json);
    }

    fn on_fetch_value(&mut self, context: &str, value: &WebValue) {
        self.baton.set_context(context);
        let mut out = String::new();
        if self.baton.numinsts != 0 {
            out.push(',');
        }
        self.baton.numinsts += 1;

        match (self.baton.compat, value.instance) {
            (false, None) => {
                out.push_str(&format!("{{\"instance\":null,\"value\":{}}}", value.value));
            }
            (_, instance) => out.push_str(&format!(
                "{{\"instance\":{},\"value\":{}}}",
                instance.unwrap_or(NULL_INSTANCE_ID),
                value.value
            )),
        }
        self.flush(&out, ResponseFormat::Json);
    }

    fn on_indom(&mut self, context: &str, indom: &WebInDom) {
        self.baton.set_context(context);
        let mut out = String::new();
        self.enter_group(&mut out, GroupKind::InDom, indom.indom.raw());

        self.open(&mut out, '{', Container::Object);
        if self.baton.compat {
            out.push_str(&format!("\"indom\":{}", indom.indom.raw()));
        } else {
            out.push_str("\"context\":");
            out.push_str(&self.context_field(context));
            out.push_str(&format!(",\"indom\":\"{}\"", indom.indom));
        }
        out.push_str(",\"labels\":");
        out.push_str(labels_or_empty(indom.labels.as_ref()));
        Self::push_texts(&mut out, indom.oneline.as_ref(), indom.helptext.as_ref());
        out.push_str(",\"instances\":");
        self.open(&mut out, '[', Container::Array);
        self.flush(&out, ResponseFormat::Json);
    }

    fn on_instance(&mut self, context: &str, instance: &WebInstance) {
        self.baton.set_context(context);
        let mut out = String::new();
        if self.baton.numinsts != 0 {
            out.push(',');
        }
        self.baton.numinsts += 1;

        out.push_str(&format!(
            "{{\"instance\":{},\"name\":{},\"labels\":{}}}",
            instance.instance,
            quote(&instance.name),
            labels_or_empty(instance.labels.as_ref())
        ));
        self.flush(&out, ResponseFormat::Json);
    }

    fn on_scrape(&mut self, context: &str, scrape: &WebScrape) {
        self.baton.set_context(context);
        let Some(fragment) = openmetrics::render(scrape, self.baton.compat, self.baton.times)
        else {
            return;
        };
        self.flush(&fragment, ResponseFormat::Text);
    }

    fn on_scrape_labels(&mut self, _context: &str, labels: &mut WebLabelSet) {
        for set in &labels.sets {
            for (name, value) in set {
                self.baton.labels.insert(name.clone(), value.clone());
            }
        }
        let mut merged: Vec<_> = self.baton.labels.iter().collect();
        merged.sort();
        labels.buffer = merged
            .into_iter()
            .map(|(name, value)| {
                format!(
                    "{}=\"{}\"",
                    openmetrics::label_name(name),
                    openmetrics::escape_label(value)
                )
            })
            .collect::<Vec<_>>()
            .join(",");
        self.baton.labels.clear();
    }

    fn on_check(&mut self, context: &str, access: &WebAccess) -> Result<(), GroupError> {
        self.policy
            .check(access, self.baton.credentials())
            .map_err(|error| {
                trace!(
                    target: WEBAPI_TARGET,
                    connection = self.baton.connection,
                    context,
                    realm = access.realm.as_deref().unwrap_or(""),
                    reason = %error,
                    "session access refused"
                );
                GroupError::from(error)
            })
    }
}

#[cfg(test)]
#[path = "builder_tests.rs"]
mod tests;
