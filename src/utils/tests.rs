use super::diagnostics::{Diagnostic, DiagnosticSink, RecordingSink, TracingSink};
use super::error::{ClientError, TopologyStep};
use super::logging;

#[test]
fn logging_init_accepts_levels() {
    // Should not panic
    logging::init("info");
    logging::init("debug");
    logging::init("warn");
    logging::init("nonsense");
}

#[test]
fn test_tracing_sink_handles_every_event() {
    let sink = TracingSink;
    sink.emit(Diagnostic::Dialing {
        url: "amqps://localhost:5671".to_string(),
    });
    sink.emit(Diagnostic::MalformedDelivery {
        delivery_tag: 1,
        body: vec![0xff, 0xfe],
        reason: "expected value".to_string(),
    });
    sink.emit(Diagnostic::StreamClosed {
        forwarded: 0,
        dropped: 1,
    });
}

#[test]
fn test_recording_sink_keeps_order_and_counts_malformed() {
    let sink = RecordingSink::new();
    sink.emit(Diagnostic::ChannelOpened);
    sink.emit(Diagnostic::MalformedDelivery {
        delivery_tag: 7,
        body: b"nope".to_vec(),
        reason: "expected value".to_string(),
    });
    sink.emit(Diagnostic::ReceiverGone);

    let events = sink.events();
    assert_eq!(events.len(), 3);
    assert_eq!(events[0], Diagnostic::ChannelOpened);
    assert_eq!(events[2], Diagnostic::ReceiverGone);
    assert_eq!(sink.malformed_count(), 1);
}

#[test]
fn test_topology_error_names_step_and_keeps_source() {
    let err = ClientError::Topology {
        step: TopologyStep::DeclareExchange,
        source: "PRECONDITION_FAILED - inequivalent arg 'durable'".into(),
    };
    let text = err.to_string();
    assert!(text.contains("declaring the exchange"));
    assert!(text.contains("inequivalent arg 'durable'"));

    let source = std::error::Error::source(&err).expect("source is kept");
    assert_eq!(
        source.to_string(),
        "PRECONDITION_FAILED - inequivalent arg 'durable'"
    );
}

#[test]
fn test_io_error_names_path() {
    let err = ClientError::Io {
        path: "/etc/certs/missing-ca.pem".into(),
        source: std::io::Error::from(std::io::ErrorKind::NotFound),
    };
    assert!(err.to_string().contains("/etc/certs/missing-ca.pem"));
}
