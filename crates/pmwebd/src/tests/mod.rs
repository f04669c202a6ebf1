//! Test suites for the gateway daemon.

mod gateway;
mod socket;
pub(crate) mod support;
