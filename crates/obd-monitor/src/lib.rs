//! OBD Monitor
//!
//! Drives an [`ObdSession`] from the command line: connects (or starts demo
//! data), optionally scans and clears trouble codes, and logs a dashboard of
//! live values at a fixed interval until interrupted.

use anyhow::{bail, Result};
use obd_session::{
    DiagnosticKind, DiagnosticOutcome, ObdSession, SessionEvent, SessionSnapshot, SessionState,
};
use obd_transport::TransportState;
use std::fmt::Write as _;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Initialize logging
pub fn init_logging(verbose: bool, json: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true);

    if json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

/// What the monitor does once the session is up
#[derive(Debug, Clone)]
pub struct MonitorOptions {
    /// Use simulated data instead of an adapter
    pub demo: bool,
    /// Read trouble codes once live data is flowing
    pub scan: bool,
    /// Erase trouble codes after the scan
    pub clear: bool,
    /// Dashboard log period
    pub report_interval: Duration,
    /// Stop after this long; run until Ctrl-C when unset
    pub duration: Option<Duration>,
    /// Log snapshots as JSON instead of a text table
    pub json_snapshots: bool,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            demo: false,
            scan: false,
            clear: false,
            report_interval: Duration::from_secs(5),
            duration: None,
            json_snapshots: false,
        }
    }
}

/// Pending scan/clear work
#[derive(Debug, Default)]
struct Plan {
    scan: bool,
    clear: bool,
    in_flight: Option<DiagnosticKind>,
}

impl Plan {
    /// Next operation to issue once the session can take one
    fn next(&mut self, state: SessionState) -> Option<DiagnosticKind> {
        if self.in_flight.is_some() || !matches!(state, SessionState::Polling | SessionState::Demo)
        {
            return None;
        }
        let kind = if self.scan {
            self.scan = false;
            DiagnosticKind::Scan
        } else if self.clear {
            self.clear = false;
            DiagnosticKind::Clear
        } else {
            return None;
        };
        self.in_flight = Some(kind);
        Some(kind)
    }

    fn finished(&mut self, outcome: &DiagnosticOutcome) {
        if self.in_flight == Some(outcome.kind) {
            self.in_flight = None;
        }
    }
}

/// Run until Ctrl-C, the optional duration, or engine shutdown
pub async fn run_monitor(session: ObdSession, options: MonitorOptions) -> Result<()> {
    let mut events = session.events();
    let mut plan = Plan {
        scan: options.scan,
        clear: options.clear,
        in_flight: None,
    };

    if options.demo {
        session.start_demo()?;
    } else {
        session.connect()?;
    }

    let mut report = tokio::time::interval(options.report_interval);
    report.tick().await;
    let deadline = async {
        match options.duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = &mut deadline => {
                info!("Monitor duration elapsed");
                break;
            }
            _ = report.tick() => log_snapshot(&session.snapshot(), options.json_snapshots)?,
            event = events.recv() => match event {
                Ok(event) => {
                    if !on_event(&event, &mut plan) {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Dropped {} session events", missed);
                }
                Err(broadcast::error::RecvError::Closed) => bail!("session engine stopped"),
            },
        }

        if let Some(kind) = plan.next(session.snapshot().state) {
            info!("Requesting {:?}", kind);
            match kind {
                DiagnosticKind::Scan => session.scan_codes()?,
                DiagnosticKind::Clear => session.clear_codes()?,
            }
        }
    }

    log_snapshot(&session.snapshot(), options.json_snapshots)?;
    if options.demo {
        session.stop_demo()?;
    } else {
        session.disconnect()?;
    }
    Ok(())
}

/// Log one event; false when the monitor should stop
fn on_event(event: &SessionEvent, plan: &mut Plan) -> bool {
    match event {
        SessionEvent::StateChanged(state) => {
            info!("Session {}", state);
        }
        SessionEvent::Connection(connection) => {
            info!("Adapter {}", connection);
            if let TransportState::Failed(reason) = connection {
                warn!("Giving up: {}", reason);
                return false;
            }
        }
        SessionEvent::Diagnostic(outcome) => {
            match &outcome.result {
                Ok(report) => info!("{:?} complete: {:?}", outcome.kind, report),
                Err(e) => warn!("{:?} failed: {}", outcome.kind, e),
            }
            plan.finished(outcome);
        }
        SessionEvent::CodesUpdated(dtcs) => {
            for record in dtcs {
                info!(
                    "Trouble code {} ({})",
                    record.code,
                    record.code.category().display_name()
                );
            }
        }
        SessionEvent::ParameterUpdated(_) => {}
    }
    true
}

fn log_snapshot(snapshot: &SessionSnapshot, json: bool) -> Result<()> {
    if json {
        info!("{}", serde_json::to_string(snapshot)?);
    } else {
        info!("\n{}", format_dashboard(snapshot));
    }
    Ok(())
}

/// Render a snapshot as a plain text table
pub fn format_dashboard(snapshot: &SessionSnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "state: {} ({})", snapshot.state, snapshot.connection);
    for sample in &snapshot.samples {
        let _ = writeln!(
            out,
            "  {:<18} {:>8} {}",
            sample.title(),
            sample.value,
            if sample.value.is_available() {
                sample.unit()
            } else {
                ""
            }
        );
    }
    if snapshot.dtcs.is_empty() {
        let _ = writeln!(out, "  no trouble codes");
    }
    for record in &snapshot.dtcs {
        let captured = record
            .freeze_frame
            .as_ref()
            .map_or(0, |frame| frame.values.len());
        let _ = writeln!(
            out,
            "  {} {} (freeze frame values: {})",
            record.code,
            record.code.category().display_name(),
            captured
        );
    }
    if let Some(error) = &snapshot.last_error {
        let _ = writeln!(out, "  last error: {}", error);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use obd_protocol::{Dtc, DtcRecord, Parameter, Reading};
    use obd_session::{DiagnosticReport, SampleValue};

    #[test]
    fn test_dashboard_lists_every_parameter() {
        let mut snapshot = SessionSnapshot::default();
        snapshot.samples[Parameter::Rpm as usize].value = SampleValue::Reading(Reading::Whole(1726));
        let text = format_dashboard(&snapshot);

        assert!(text.starts_with("state: idle (disconnected)"));
        assert!(text.contains("Engine RPM"));
        assert!(text.contains("1726 rpm"));
        assert!(text.contains("unavailable"));
        assert!(text.contains("no trouble codes"));
        assert_eq!(text.lines().count(), 1 + Parameter::ALL.len() + 1);
    }

    #[test]
    fn test_dashboard_lists_codes() {
        let mut snapshot = SessionSnapshot::default();
        snapshot.dtcs.push(DtcRecord::new(Dtc::from_bytes([0x04, 0x20])));
        snapshot.last_error = Some("No response".into());
        let text = format_dashboard(&snapshot);
        assert!(text.contains("P0420 Powertrain"));
        assert!(text.contains("last error: No response"));
    }

    #[test]
    fn test_plan_order() {
        let mut plan = Plan {
            scan: true,
            clear: true,
            in_flight: None,
        };
        assert_eq!(plan.next(SessionState::Initializing), None);
        assert_eq!(plan.next(SessionState::Polling), Some(DiagnosticKind::Scan));
        assert_eq!(plan.next(SessionState::Polling), None);

        plan.finished(&DiagnosticOutcome {
            kind: DiagnosticKind::Scan,
            result: Ok(DiagnosticReport::NoCodes),
        });
        assert_eq!(plan.next(SessionState::Polling), Some(DiagnosticKind::Clear));
        assert_eq!(plan.next(SessionState::Polling), None);
    }
}
