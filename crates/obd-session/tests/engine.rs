//! Session engine behaviour against a scripted adapter, on a paused clock.

use obd_protocol::{ObdError, Parameter, Reading};
use obd_session::{
    DiagnosticKind, DiagnosticOutcome, DiagnosticReport, ObdSession, SessionConfig, SessionError,
    SessionEvent, SessionState,
};
use obd_transport::mock::ConnectBehavior;
use obd_transport::{MockAdapter, Transport, TransportState};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

const INIT: [&str; 6] = ["ATZ", "ATE0", "ATL0", "ATS0", "ATH0", "ATSP0"];

fn spawn(adapter: &MockAdapter, config: SessionConfig) -> ObdSession {
    let adapter = adapter.clone();
    ObdSession::spawn(config, move || -> Box<dyn Transport> {
        Box::new(adapter.transport())
    })
}

fn no_freeze_frame() -> SessionConfig {
    SessionConfig {
        freeze_frame: Vec::new(),
        ..SessionConfig::default()
    }
}

/// Answers every command the way a healthy vehicle would
fn vehicle(command: &str) -> Vec<String> {
    let reply: &[&str] = match command {
        "ATZ" => &["ELM327 v1.5"],
        c if c.starts_with("AT") => &["OK"],
        "010C" => &["41 0C 1A F8"],
        "010D" => &["41 0D 28"],
        "0105" => &["41 05 5A"],
        "0110" => &["41 10 01 F4"],
        "03" => &["43 01 33 04 20 00 00"],
        "04" => &["44"],
        "020C" => &["42 0C 1A F8"],
        "020D" => &["42 0D 28"],
        "0205" => &["7F 02 12"],
        _ => &["NO DATA"],
    };
    reply.iter().map(|line| line.to_string()).collect()
}

/// Sleep until `ms` milliseconds after `start`
async fn at(start: Instant, ms: u64) {
    tokio::time::sleep_until(start + Duration::from_millis(ms)).await;
}

/// Commands sent after the init sequence
fn polls(adapter: &MockAdapter) -> Vec<String> {
    adapter
        .sent()
        .into_iter()
        .filter(|command| !command.starts_with("AT"))
        .collect()
}

async fn next_outcome(events: &mut broadcast::Receiver<SessionEvent>) -> DiagnosticOutcome {
    loop {
        match events.recv().await {
            Ok(SessionEvent::Diagnostic(outcome)) => return outcome,
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => panic!("engine gone"),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_init_sequence_timing() {
    let adapter = MockAdapter::new();
    let session = spawn(&adapter, SessionConfig::default());
    let start = Instant::now();
    session.connect().unwrap();

    at(start, 400).await;
    assert!(adapter.sent().is_empty());
    assert_eq!(session.snapshot().state, SessionState::Initializing);
    assert_eq!(session.snapshot().connection, TransportState::Connected);

    at(start, 600).await;
    assert_eq!(adapter.sent(), vec!["ATZ"]);

    at(start, 1900).await;
    assert_eq!(adapter.sent().len(), 1);

    at(start, 2100).await;
    assert_eq!(adapter.sent(), vec!["ATZ", "ATE0"]);

    at(start, 6100).await;
    assert_eq!(adapter.sent(), INIT.to_vec());

    at(start, 7900).await;
    assert!(polls(&adapter).is_empty());
    assert_eq!(session.snapshot().state, SessionState::Initializing);

    at(start, 8100).await;
    assert_eq!(polls(&adapter), vec!["010C"]);
    assert_eq!(session.snapshot().state, SessionState::Polling);
}

#[tokio::test(start_paused = true)]
async fn test_round_robin_polling() {
    let adapter = MockAdapter::with_responder(vehicle);
    let session = spawn(&adapter, SessionConfig::default());
    let start = Instant::now();
    session.connect().unwrap();

    at(start, 8200).await;
    assert_eq!(polls(&adapter), vec!["010C"]);
    assert_eq!(session.snapshot().value(Parameter::Rpm), Some(Reading::Whole(1726)));

    at(start, 8400).await;
    assert_eq!(polls(&adapter), vec!["010C", "010D"]);
    assert_eq!(session.snapshot().value(Parameter::Speed), Some(Reading::Whole(40)));

    // Nine parameters 300 ms apart, then back to the start
    at(start, 10_800).await;
    assert_eq!(
        polls(&adapter),
        vec!["010C", "010D", "0105", "0104", "0111", "012F", "010F", "0110", "010E", "010C"]
    );

    let snapshot = session.snapshot();
    assert_eq!(snapshot.value(Parameter::CoolantTemp), Some(Reading::Whole(50)));
    assert_eq!(snapshot.value(Parameter::Maf), Some(Reading::Tenths(5.0)));
    // NO DATA leaves the sample untouched
    assert_eq!(snapshot.value(Parameter::FuelLevel), None);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_then_cooldown() {
    let adapter = MockAdapter::new();
    let session = spawn(&adapter, SessionConfig::default());
    let start = Instant::now();
    session.connect().unwrap();

    at(start, 16_900).await;
    assert_eq!(polls(&adapter), vec!["010C"]);

    at(start, 17_100).await;
    assert_eq!(polls(&adapter), vec!["010C", "010D"]);
    assert_eq!(session.snapshot().value(Parameter::Rpm), None);
}

#[tokio::test(start_paused = true)]
async fn test_stale_timeout_is_ignored() {
    let adapter = MockAdapter::new();
    let session = spawn(&adapter, SessionConfig::default());
    let start = Instant::now();
    session.connect().unwrap();

    at(start, 8100).await;
    adapter.respond("41 0C 1A F8");

    at(start, 8500).await;
    assert_eq!(polls(&adapter), vec!["010C", "010D"]);

    // The 010C timeout armed at 8 s must not advance polling at 16 s
    at(start, 17_300).await;
    assert_eq!(polls(&adapter), vec!["010C", "010D"]);

    // 010D times out at 16.4 s, cool-down ends at 17.4 s
    at(start, 17_500).await;
    assert_eq!(polls(&adapter), vec!["010C", "010D", "0105"]);
}

#[tokio::test(start_paused = true)]
async fn test_stopped_waits_longer() {
    let adapter = MockAdapter::new();
    let session = spawn(&adapter, SessionConfig::default());
    let start = Instant::now();
    session.connect().unwrap();

    at(start, 8100).await;
    adapter.respond("SEARCHING...");
    adapter.respond("STOPPED");

    at(start, 10_000).await;
    assert_eq!(polls(&adapter), vec!["010C"]);

    at(start, 10_200).await;
    assert_eq!(polls(&adapter), vec!["010C", "010D"]);
}

#[tokio::test(start_paused = true)]
async fn test_echo_and_adapter_errors() {
    let adapter = MockAdapter::new();
    let session = spawn(&adapter, SessionConfig::default());
    let start = Instant::now();
    session.connect().unwrap();

    at(start, 8100).await;
    adapter.respond("010C");

    at(start, 8600).await;
    assert_eq!(polls(&adapter), vec!["010C"]);

    adapter.respond("CAN ERROR");
    at(start, 9000).await;
    assert_eq!(polls(&adapter), vec!["010C", "010D"]);

    adapter.respond("7F 01 12");
    at(start, 9400).await;
    assert_eq!(polls(&adapter), vec!["010C", "010D", "0105"]);
}

#[tokio::test(start_paused = true)]
async fn test_acknowledgements_do_not_stall_polling() {
    let adapter = MockAdapter::new();
    let session = spawn(&adapter, SessionConfig::default());
    let start = Instant::now();
    session.connect().unwrap();

    // Stray OK: wait out the cool-down, then poll the next parameter
    at(start, 8100).await;
    adapter.respond("OK");
    at(start, 9000).await;
    assert_eq!(polls(&adapter), vec!["010C"]);
    at(start, 9200).await;
    assert_eq!(polls(&adapter), vec!["010C", "010D"]);

    // DATA ERROR is a bus failure, not an acknowledgement
    adapter.respond("DATA ERROR");
    at(start, 9600).await;
    assert_eq!(polls(&adapter), vec!["010C", "010D", "0105"]);

    // Late banner after a reset
    adapter.respond("ELM327 v1.5");
    at(start, 10_700).await;
    assert_eq!(polls(&adapter), vec!["010C", "010D", "0105", "0104"]);

    // Unanswered polls keep cycling through timeouts
    at(start, 120_000).await;
    assert!(polls(&adapter).len() > 10);
    assert_eq!(session.snapshot().state, SessionState::Polling);
}

#[tokio::test(start_paused = true)]
async fn test_scan_ignores_acknowledgement() {
    let adapter = MockAdapter::new();
    let session = spawn(&adapter, no_freeze_frame());
    let mut events = session.events();
    let start = Instant::now();
    session.connect().unwrap();

    at(start, 8100).await;
    adapter.respond("41 0C 1A F8");
    at(start, 8150).await;
    session.scan_codes().unwrap();

    at(start, 8500).await;
    assert_eq!(polls(&adapter), vec!["010C", "03"]);
    adapter.respond("OK");

    at(start, 9000).await;
    assert_eq!(session.snapshot().state, SessionState::DiagnosticPending);
    assert_eq!(polls(&adapter), vec!["010C", "03"]);

    adapter.respond("43 01 33 00 00");
    let outcome = next_outcome(&mut events).await;
    assert_eq!(outcome.result, Ok(DiagnosticReport::CodesRead { count: 1 }));
}

#[tokio::test(start_paused = true)]
async fn test_bus_init_error_fails_scan() {
    let adapter = MockAdapter::new();
    let session = spawn(&adapter, no_freeze_frame());
    let mut events = session.events();
    let start = Instant::now();
    session.connect().unwrap();

    at(start, 8100).await;
    adapter.respond("41 0C 1A F8");
    at(start, 8150).await;
    session.scan_codes().unwrap();

    at(start, 8500).await;
    assert_eq!(polls(&adapter), vec!["010C", "03"]);
    adapter.respond("BUS INIT: ...ERROR");

    let outcome = next_outcome(&mut events).await;
    assert_eq!(outcome.kind, DiagnosticKind::Scan);
    assert_eq!(
        outcome.result,
        Err(SessionError::Protocol(ObdError::Adapter(
            "BUS INIT: ...ERROR".to_string()
        )))
    );
    assert!(start.elapsed() < Duration::from_millis(9000));

    let snapshot = session.snapshot();
    assert_eq!(snapshot.state, SessionState::Polling);
    assert!(snapshot.last_error.unwrap().contains("BUS INIT"));

    at(start, 9100).await;
    assert_eq!(polls(&adapter), vec!["010C", "03", "010D"]);
}

#[tokio::test(start_paused = true)]
async fn test_scan_waits_for_outstanding_poll() {
    let adapter = MockAdapter::new();
    let session = spawn(&adapter, no_freeze_frame());
    let mut events = session.events();
    let start = Instant::now();
    session.connect().unwrap();

    at(start, 8100).await;
    session.scan_codes().unwrap();

    at(start, 8200).await;
    let snapshot = session.snapshot();
    assert_eq!(snapshot.state, SessionState::DiagnosticPending);
    assert!(snapshot.is_scanning());

    // Late answer to the abandoned poll updates the sample only
    at(start, 8500).await;
    adapter.respond("41 0C 1A F8");

    at(start, 9500).await;
    assert_eq!(polls(&adapter), vec!["010C"]);
    assert_eq!(session.snapshot().value(Parameter::Rpm), Some(Reading::Whole(1726)));

    at(start, 9700).await;
    assert_eq!(polls(&adapter), vec!["010C", "03"]);
    adapter.respond("43 01 33 04 20 00 00");

    let outcome = next_outcome(&mut events).await;
    assert_eq!(outcome.kind, DiagnosticKind::Scan);
    assert_eq!(outcome.result, Ok(DiagnosticReport::CodesRead { count: 2 }));

    let snapshot = session.snapshot();
    let codes: Vec<String> = snapshot.dtcs.iter().map(|r| r.code.to_string()).collect();
    assert_eq!(codes, vec!["P0133", "P0420"]);
    assert!(snapshot.last_scan.is_some());
    assert_eq!(snapshot.state, SessionState::Polling);

    at(start, 10_100).await;
    assert_eq!(polls(&adapter), vec!["010C", "03"]);

    at(start, 10_300).await;
    assert_eq!(polls(&adapter), vec!["010C", "03", "010D"]);
}

#[tokio::test(start_paused = true)]
async fn test_scan_when_idle_uses_short_deferral() {
    let adapter = MockAdapter::with_responder(vehicle);
    let session = spawn(&adapter, no_freeze_frame());
    let start = Instant::now();
    session.connect().unwrap();

    at(start, 8100).await;
    session.scan_codes().unwrap();

    // 010D would have gone out at 8.3 s; the scan holds it back
    at(start, 8350).await;
    assert_eq!(polls(&adapter), vec!["010C"]);

    at(start, 8450).await;
    assert_eq!(polls(&adapter), vec!["010C", "03"]);

    at(start, 8950).await;
    assert_eq!(polls(&adapter), vec!["010C", "03", "010D"]);
}

#[tokio::test(start_paused = true)]
async fn test_scan_reads_freeze_frame() {
    let adapter = MockAdapter::with_responder(vehicle);
    let session = spawn(&adapter, SessionConfig::default());
    let mut events = session.events();
    let start = Instant::now();
    session.connect().unwrap();

    at(start, 8100).await;
    session.scan_codes().unwrap();

    let outcome = next_outcome(&mut events).await;
    assert_eq!(outcome.result, Ok(DiagnosticReport::CodesRead { count: 2 }));
    assert_eq!(
        polls(&adapter),
        vec!["010C", "03", "020C", "020D", "0205", "0204", "0211", "020F", "0210"]
    );

    let snapshot = session.snapshot();
    let frame = snapshot.dtcs[0].freeze_frame.as_ref().unwrap();
    assert_eq!(frame.dtc.to_string(), "P0133");
    assert_eq!(frame.values.get(&Parameter::Rpm), Some(&Reading::Whole(1726)));
    assert_eq!(frame.values.get(&Parameter::Speed), Some(&Reading::Whole(40)));
    assert_eq!(frame.values.len(), 2);
    assert!(snapshot.dtcs[1].freeze_frame.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_scan_no_data_means_no_codes() {
    let adapter = MockAdapter::new();
    let session = spawn(&adapter, SessionConfig::default());
    let mut events = session.events();
    let start = Instant::now();
    session.connect().unwrap();

    at(start, 8100).await;
    adapter.respond("41 0C 1A F8");
    at(start, 8150).await;
    session.scan_codes().unwrap();

    at(start, 8500).await;
    assert_eq!(polls(&adapter), vec!["010C", "03"]);
    adapter.respond("NO DATA");

    let outcome = next_outcome(&mut events).await;
    assert_eq!(outcome.result, Ok(DiagnosticReport::NoCodes));
    assert!(session.snapshot().dtcs.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_scan_timeout_reports_error() {
    let adapter = MockAdapter::new();
    let session = spawn(&adapter, SessionConfig::default());
    let mut events = session.events();
    let start = Instant::now();
    session.connect().unwrap();

    at(start, 8100).await;
    session.scan_codes().unwrap();

    let outcome = next_outcome(&mut events).await;
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(19_600) && elapsed < Duration::from_millis(19_700));
    assert_eq!(
        outcome.result,
        Err(SessionError::NoResponse {
            command: "03".to_string()
        })
    );
    assert!(session.snapshot().last_error.is_some());

    at(start, 20_200).await;
    assert_eq!(polls(&adapter), vec!["010C", "03", "010D"]);
}

#[tokio::test(start_paused = true)]
async fn test_clear_codes() {
    let adapter = MockAdapter::with_responder(vehicle);
    let session = spawn(&adapter, no_freeze_frame());
    let mut events = session.events();
    let start = Instant::now();
    session.connect().unwrap();

    at(start, 8100).await;
    session.scan_codes().unwrap();
    next_outcome(&mut events).await;
    assert_eq!(session.snapshot().dtcs.len(), 2);

    session.clear_codes().unwrap();
    let outcome = next_outcome(&mut events).await;
    assert_eq!(outcome.kind, DiagnosticKind::Clear);
    assert_eq!(outcome.result, Ok(DiagnosticReport::Cleared));
    assert!(session.snapshot().dtcs.is_empty());
    assert_eq!(polls(&adapter).iter().filter(|c| *c == "04").count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_clear_rejected() {
    let adapter = MockAdapter::with_responder(|command| match command {
        "04" => vec!["7F 04 22".to_string()],
        other => vehicle(other),
    });
    let session = spawn(&adapter, SessionConfig::default());
    let mut events = session.events();
    let start = Instant::now();
    session.connect().unwrap();

    at(start, 8100).await;
    session.clear_codes().unwrap();

    let outcome = next_outcome(&mut events).await;
    assert_eq!(
        outcome.result,
        Err(SessionError::Protocol(obd_protocol::ObdError::Rejected {
            service: 0x04
        }))
    );
    assert!(session.snapshot().last_error.is_some());
    assert_eq!(session.snapshot().state, SessionState::Polling);
}

#[tokio::test(start_paused = true)]
async fn test_diagnostic_guards() {
    let adapter = MockAdapter::new();
    let session = spawn(&adapter, SessionConfig::default());
    let mut events = session.events();
    let start = Instant::now();

    session.scan_codes().unwrap();
    assert_eq!(
        next_outcome(&mut events).await.result,
        Err(SessionError::NotConnected)
    );

    session.connect().unwrap();
    at(start, 1000).await;
    session.scan_codes().unwrap();
    assert_eq!(
        next_outcome(&mut events).await.result,
        Err(SessionError::NotReady(SessionState::Initializing))
    );

    at(start, 8100).await;
    session.scan_codes().unwrap();
    session.clear_codes().unwrap();
    let outcome = next_outcome(&mut events).await;
    assert_eq!(outcome.kind, DiagnosticKind::Clear);
    assert_eq!(outcome.result, Err(SessionError::Busy));
    assert!(session.snapshot().is_scanning());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_during_init() {
    let adapter = MockAdapter::new();
    let session = spawn(&adapter, SessionConfig::default());
    let start = Instant::now();
    session.connect().unwrap();

    at(start, 2500).await;
    session.disconnect().unwrap();

    at(start, 2600).await;
    let snapshot = session.snapshot();
    assert_eq!(snapshot.state, SessionState::Idle);
    assert_eq!(snapshot.connection, TransportState::Disconnected);

    at(start, 9000).await;
    assert_eq!(adapter.sent(), vec!["ATZ", "ATE0"]);

    session.connect().unwrap();
    at(start, 9600).await;
    assert_eq!(adapter.sent(), vec!["ATZ", "ATE0", "ATZ"]);
    assert_eq!(adapter.connects(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_resets_samples() {
    let adapter = MockAdapter::with_responder(vehicle);
    let session = spawn(&adapter, SessionConfig::default());
    let start = Instant::now();
    session.connect().unwrap();

    at(start, 8500).await;
    assert!(session.snapshot().value(Parameter::Rpm).is_some());
    session.disconnect().unwrap();

    at(start, 8600).await;
    let snapshot = session.snapshot();
    assert!(snapshot.samples.iter().all(|s| !s.value.is_available()));
    assert_eq!(snapshot.state, SessionState::Idle);

    let sent = adapter.sent().len();
    at(start, 30_000).await;
    assert_eq!(adapter.sent().len(), sent);
}

#[tokio::test(start_paused = true)]
async fn test_link_loss_halts_polling() {
    let adapter = MockAdapter::new();
    let session = spawn(&adapter, SessionConfig::default());
    let start = Instant::now();
    session.connect().unwrap();

    at(start, 8100).await;
    adapter.fail("connection reset");

    at(start, 8200).await;
    let snapshot = session.snapshot();
    assert_eq!(snapshot.state, SessionState::Idle);
    assert_eq!(
        snapshot.connection,
        TransportState::Failed("connection reset".to_string())
    );
    assert_eq!(snapshot.last_error.as_deref(), Some("connection reset"));

    at(start, 20_000).await;
    assert_eq!(polls(&adapter), vec!["010C"]);
}

#[tokio::test(start_paused = true)]
async fn test_connect_failure() {
    let adapter = MockAdapter::new();
    adapter.set_connect_behavior(ConnectBehavior::Fail("host unreachable".into()));
    let session = spawn(&adapter, SessionConfig::default());
    let start = Instant::now();
    session.connect().unwrap();

    at(start, 100).await;
    let snapshot = session.snapshot();
    assert_eq!(snapshot.state, SessionState::Idle);
    assert!(matches!(snapshot.connection, TransportState::Failed(_)));

    at(start, 10_000).await;
    assert!(adapter.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_demo_mode() {
    let adapter = MockAdapter::new();
    let session = spawn(&adapter, SessionConfig::default());
    let mut events = session.events();
    let start = Instant::now();
    session.start_demo().unwrap();

    at(start, 100).await;
    let snapshot = session.snapshot();
    assert_eq!(snapshot.state, SessionState::Demo);
    assert!(snapshot.is_connected());
    assert!(snapshot.samples.iter().all(|s| s.value.is_available()));
    assert_eq!(snapshot.dtcs.len(), 3);

    session.clear_codes().unwrap();
    let outcome = next_outcome(&mut events).await;
    assert_eq!(outcome.result, Ok(DiagnosticReport::Cleared));
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(1600) && elapsed < Duration::from_millis(1700));
    assert!(session.snapshot().dtcs.is_empty());

    session.scan_codes().unwrap();
    assert_eq!(
        next_outcome(&mut events).await.result,
        Ok(DiagnosticReport::NoCodes)
    );

    session.stop_demo().unwrap();
    at(start, 5000).await;
    let snapshot = session.snapshot();
    assert_eq!(snapshot.state, SessionState::Idle);
    assert!(snapshot.samples.iter().all(|s| !s.value.is_available()));
    assert!(snapshot.dtcs.is_empty());
    assert_eq!(adapter.connects(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_connect_ends_demo() {
    let adapter = MockAdapter::new();
    let session = spawn(&adapter, SessionConfig::default());
    let start = Instant::now();
    session.start_demo().unwrap();

    at(start, 100).await;
    session.connect().unwrap();

    at(start, 200).await;
    let snapshot = session.snapshot();
    assert_eq!(snapshot.state, SessionState::Initializing);
    assert!(snapshot.dtcs.is_empty());
    assert!(snapshot.samples.iter().all(|s| !s.value.is_available()));

    // Demo ticks no longer write samples
    at(start, 5000).await;
    assert!(session.snapshot().samples.iter().all(|s| !s.value.is_available()));
}

#[tokio::test(start_paused = true)]
async fn test_demo_replaces_connection() {
    let adapter = MockAdapter::with_responder(vehicle);
    let session = spawn(&adapter, SessionConfig::default());
    let start = Instant::now();
    session.connect().unwrap();

    at(start, 8500).await;
    session.start_demo().unwrap();

    at(start, 8600).await;
    assert_eq!(adapter.state(), TransportState::Disconnected);
    assert_eq!(session.snapshot().state, SessionState::Demo);

    let sent = adapter.sent().len();
    at(start, 20_000).await;
    assert_eq!(adapter.sent().len(), sent);
}
