use std::sync::Arc;

use rust_siggen::error::{IoFailure, TransportError};
use rust_siggen::logging::MemoryLogSink;
use rust_siggen::transport::simulated::{SIMULATED_IDENTITY, SIMULATED_RESOURCE};
use rust_siggen::transport::{
    ConnectionState, SessionOptions, SharedTransport, SimulatedDriver, Transport, TransportSession,
};

fn session(driver: SimulatedDriver) -> (TransportSession<SimulatedDriver>, MemoryLogSink) {
    let log = MemoryLogSink::new();
    let session = TransportSession::new(driver).with_log_sink(Arc::new(log.clone()));
    (session, log)
}

#[test]
fn test_connect_send_query_disconnect() {
    let (mut session, log) = session(SimulatedDriver::new());
    let connection = session.connect(SIMULATED_RESOURCE).unwrap();
    assert_eq!(connection.state, ConnectionState::Connected);
    assert_eq!(session.state(), ConnectionState::Connected);

    assert_eq!(session.query("*IDN?").unwrap(), SIMULATED_IDENTITY);
    session.send("SOUR1:FREQ 2500").unwrap();
    assert_eq!(session.query("SOUR1:FREQ?").unwrap(), "2500");

    session.disconnect().unwrap();
    assert!(!session.is_connected());
    let counts = session.driver().counts();
    assert!(counts.balanced());
    assert_eq!(counts.go_to_local, 1);
    assert!(log.contains("connected to"));
    assert!(log.contains("sent: SOUR1:FREQ 2500"));
    assert!(log.contains("disconnected from"));
}

#[test]
fn test_open_failure_leaks_no_handles() {
    let (mut session, log) = session(SimulatedDriver::new().fail_open());
    let err = session.connect("USB0::0xFFFF::0x0000::NOPE::INSTR").unwrap_err();
    assert!(matches!(err, TransportError::InstrumentOpenFailed { .. }));
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(session.driver().counts().balanced());
    assert!(log.contains("failed to open"));
}

#[test]
fn test_missing_resource_manager() {
    let (mut session, _log) = session(SimulatedDriver::new().fail_resource_manager());
    let err = session.connect(SIMULATED_RESOURCE).unwrap_err();
    assert!(matches!(err, TransportError::ResourceManagerUnavailable { .. }));
    assert_eq!(session.driver().counts().rm_opened, 0);
}

#[test]
fn test_disconnect_is_idempotent() {
    let (mut session, _log) = session(SimulatedDriver::new());
    session.disconnect().unwrap();
    session.connect(SIMULATED_RESOURCE).unwrap();
    session.disconnect().unwrap();
    session.disconnect().unwrap();
    let counts = session.driver().counts();
    assert_eq!(counts.instruments_closed, 1);
    assert!(counts.balanced());
}

#[test]
fn test_reconnect_closes_previous_instrument() {
    let (mut session, _log) = session(SimulatedDriver::new());
    session.connect(SIMULATED_RESOURCE).unwrap();
    session.connect(SIMULATED_RESOURCE).unwrap();
    assert_eq!(session.driver().counts().instruments_closed, 1);
    session.disconnect().unwrap();
    assert!(session.driver().counts().balanced());
}

#[test]
fn test_io_without_connection() {
    let (mut session, _log) = session(SimulatedDriver::new());
    assert_eq!(
        session.send("OUTP1:STAT ON"),
        Err(TransportError::WriteFailed {
            command: "OUTP1:STAT ON".to_string(),
            reason: IoFailure::NotConnected,
        })
    );
    assert!(matches!(
        session.query("*IDN?"),
        Err(TransportError::WriteFailed {
            reason: IoFailure::NotConnected,
            ..
        })
    ));
    assert!(session.driver().written().is_empty());
}

#[test]
fn test_unanswered_query_times_out() {
    let (mut session, _log) = session(SimulatedDriver::new());
    session.connect(SIMULATED_RESOURCE).unwrap();
    let err = session.query("SOUR9:FREQ?").unwrap_err();
    assert!(matches!(
        err,
        TransportError::ReadFailed {
            reason: IoFailure::Status(_),
            ..
        }
    ));
}

#[test]
fn test_response_truncated_to_read_buffer() {
    let options = SessionOptions {
        read_buffer_size: 8,
        ..SessionOptions::default()
    };
    let mut session = TransportSession::with_options(SimulatedDriver::new(), options);
    session.connect(SIMULATED_RESOURCE).unwrap();
    let response = session.query("*IDN?").unwrap();
    assert_eq!(response, &SIMULATED_IDENTITY[..8]);
}

#[test]
fn test_custom_terminator_is_stripped() {
    let options = SessionOptions {
        line_terminator: "\r\n".to_string(),
        ..SessionOptions::default()
    };
    let mut session = TransportSession::with_options(SimulatedDriver::new(), options);
    session.connect(SIMULATED_RESOURCE).unwrap();
    session.send("SOUR2:VOLT 1.5").unwrap();
    assert_eq!(session.query("SOUR2:VOLT?").unwrap(), "1.5");
}

#[test]
fn test_resource_discovery() {
    let (mut session, _log) = session(
        SimulatedDriver::new().with_resources(vec![
            "USB0::0x1AB1::0x0642::DG1ZA0001::INSTR".to_string(),
            "TCPIP0::192.168.1.100::INSTR".to_string(),
        ]),
    );
    let found: Vec<String> = session.list_resources().collect();
    assert_eq!(found.len(), 2);
    assert!(found[1].starts_with("TCPIP0"));
}

#[test]
fn test_discovery_failure_is_an_empty_list() {
    let (mut session, log) = session(SimulatedDriver::new().fail_enumeration());
    assert_eq!(session.list_resources().count(), 0);
    assert!(log.contains("resource discovery failed"));

    let (mut session, log) = self::session(SimulatedDriver::new().fail_resource_manager());
    assert_eq!(session.list_resources().count(), 0);
    assert!(log.contains("resource discovery unavailable"));
}

#[tokio::test]
async fn test_shared_transport_from_many_tasks() {
    let mut session = TransportSession::new(SimulatedDriver::new());
    session.connect(SIMULATED_RESOURCE).unwrap();
    let shared = SharedTransport::spawn(session);

    let handles: Vec<_> = (1..=2u8)
        .map(|channel| {
            let shared = shared.clone();
            tokio::spawn(async move {
                let command = format!("SOUR{channel}:FREQ {}", u32::from(channel) * 1000);
                shared.send(&command).await.unwrap();
                shared.query(&format!("SOUR{channel}:FREQ?")).await.unwrap()
            })
        })
        .collect();

    let mut responses = Vec::new();
    for handle in handles {
        responses.push(handle.await.unwrap());
    }
    assert_eq!(responses, ["1000", "2000"]);
}
