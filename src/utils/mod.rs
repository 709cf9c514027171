//! Shared utilities: the error taxonomy, logging setup and the diagnostic
//! event sink used by the consumer pipeline.

pub mod diagnostics;
pub mod error;
pub mod logging;

pub use diagnostics::{Diagnostic, DiagnosticSink, RecordingSink, TracingSink};
pub use error::{BrokerError, ClientError, Result, TopologyStep};

#[cfg(test)]
mod tests;
