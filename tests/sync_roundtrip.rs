use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use rust_siggen::channel::{ChannelState, Family, ParameterModel, Waveform};
use rust_siggen::config::SigGenConfig;
use rust_siggen::error::SyncError;
use rust_siggen::logging::MemoryLogSink;
use rust_siggen::transport::simulated::SIMULATED_RESOURCE;
use rust_siggen::transport::{SimulatedDriver, Transport, TransportSession};
use rust_siggen::units::UnitTag;
use rust_siggen::SyncEngine;

type SimEngine = SyncEngine<TransportSession<SimulatedDriver>>;

fn connected_engine(driver: SimulatedDriver) -> (SimEngine, MemoryLogSink) {
    let log = MemoryLogSink::new();
    let mut session = TransportSession::new(driver).with_log_sink(Arc::new(log.clone()));
    session.connect(SIMULATED_RESOURCE).unwrap();
    let engine = SyncEngine::new(session, 2, Duration::from_millis(500), Arc::new(log.clone()));
    (engine, log)
}

fn driver(engine: &SimEngine) -> &SimulatedDriver {
    engine.instrument().transport().driver()
}

#[tokio::test(start_paused = true)]
async fn test_edit_apply_refresh_round_trip() {
    let (mut engine, log) = connected_engine(SimulatedDriver::new());

    engine.edit(1, "frequency", 2.5, UnitTag::KiloHertz).unwrap();
    engine.set_enabled(1, true).unwrap();
    assert_eq!(engine.settle().await, 2);
    assert!(engine.take_failures().is_empty());

    assert_eq!(driver(&engine).register("SOUR1:FREQ"), Some("2500"));
    assert_eq!(driver(&engine).register("OUTP1:STAT"), Some("ON"));
    assert!(log.contains("applied"));

    // Read back into a fresh engine that has never seen the edit.
    let transport = TransportSession::new(SimulatedDriver::new());
    let debounce = Duration::from_millis(500);
    let mut fresh = SyncEngine::new(transport, 2, debounce, Arc::new(log.clone()));
    fresh.instrument_mut().transport_mut().connect(SIMULATED_RESOURCE).unwrap();
    fresh
        .instrument_mut()
        .transport_mut()
        .driver_mut()
        .set_register("SOUR1:FREQ", "2500");
    fresh.refresh_channel(1).unwrap();

    let channel = fresh.channel(1).unwrap();
    let frequency = channel.field("frequency").unwrap();
    assert_eq!(frequency.display_text(), "2.5");
    assert_eq!(frequency.display_unit(), UnitTag::KiloHertz);
    assert_eq!(channel.state(), ChannelState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_modulated_channel_end_to_end() {
    let (mut engine, _log) = connected_engine(SimulatedDriver::new());

    engine.set_family(2, Family::Fm).unwrap();
    engine.edit_symbol(2, "deviation", 5.0, "kHz").unwrap();
    engine.edit_symbol(2, "rate", 20.0, "Hz").unwrap();
    engine.select_shape(2, Waveform::Ramp).unwrap();
    engine.set_enabled(2, true).unwrap();
    assert_eq!(engine.pending(), 5);

    engine.settle().await;
    assert!(engine.take_failures().is_empty());

    let sent = driver(&engine).written().to_vec();
    assert_eq!(
        sent,
        [
            "SOUR2:MOD:TYP FM",
            "SOUR2:FM:DEV 5000",
            "SOUR2:FM:INT:FREQ 20",
            "SOUR2:FM:INT:FUNC RAMP",
            "SOUR2:MOD:STAT ON",
        ]
    );

    engine.refresh_channel(2).unwrap();
    let channel = engine.channel(2).unwrap();
    assert_eq!(channel.family(), Family::Fm);
    assert_eq!(channel.shape(), Waveform::Ramp);
    assert!(channel.enabled());
    assert_eq!(channel.field("deviation").unwrap().display_text(), "5.0");
}

#[tokio::test(start_paused = true)]
async fn test_failed_field_does_not_block_the_rest() {
    let (mut engine, log) = connected_engine(SimulatedDriver::new().fail_header("SOUR1:VOLT"));

    engine.edit(1, "amplitude", 2.0, UnitTag::VoltPeakToPeak).unwrap();
    engine.edit(1, "offset", 0.5, UnitTag::Volt).unwrap();
    engine.settle().await;

    let failures = engine.take_failures();
    assert_eq!(failures.len(), 1);
    match &failures[0] {
        SyncError::Apply(err) => {
            assert_eq!(err.channel, 1);
            assert_eq!(err.failures.len(), 1);
            assert_eq!(err.failures[0].field, "amplitude");
        }
        other => panic!("unexpected failure {other:?}"),
    }
    assert_eq!(driver(&engine).register("SOUR1:VOLT:OFFS"), Some("0.5"));
    assert!(log.contains("amplitude not applied"));
    assert_eq!(engine.channel(1).unwrap().state(), ChannelState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_engine_from_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "[transport]\nchannel_count = 1\n\n[dispatch]\ndebounce_ms = 100"
    )
    .unwrap();
    let config = SigGenConfig::load_from(file.path()).unwrap();
    assert_eq!(config.transport.channel_count, 1);

    let mut session = TransportSession::new(SimulatedDriver::with_channels(1));
    session.connect(SIMULATED_RESOURCE).unwrap();
    let mut engine = SyncEngine::from_config(session, &config, Arc::new(MemoryLogSink::new()));
    assert_eq!(engine.debounce(), Duration::from_millis(100));
    assert_eq!(engine.instrument().channels().len(), 1);

    engine.edit(1, "phase", 90.0, UnitTag::Degree).unwrap();
    tokio::time::advance(Duration::from_millis(100)).await;
    assert_eq!(engine.run_due(), 1);
    assert_eq!(driver(&engine).register("SOUR1:PHAS"), Some("90"));
}
