//! Session Engine
//!
//! Single task that owns the transport and every piece of mutable session
//! state. Commands from handles, transport events and timer expiries all
//! arrive as messages, so no two handlers ever run concurrently.
//!
//! Each connection (or demo run) is an epoch; every transport event and
//! timer carries the epoch it was created in and is discarded once the epoch
//! has moved on. Within an epoch, each transmitted command bumps a
//! generation counter, and response timeouts and "send next" timers only act
//! when their generation is still current. Together these keep at most one
//! request in flight.

use crate::config::{SessionConfig, TransportFactory};
use crate::demo::DemoSource;
use crate::error::SessionError;
use crate::state::{
    unavailable_samples, DiagnosticKind, DiagnosticOutcome, DiagnosticReport, ParameterSample,
    SampleValue, SessionEvent, SessionSnapshot, SessionState,
};
use chrono::{DateTime, Utc};
use obd_protocol::{
    classify, init_sequence, DtcRecord, FreezeFrame, ObdError, Parameter, Reading, ResponseKind,
    CATALOG,
};
use obd_transport::{Transport, TransportEvent, TransportState};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, trace, warn};

/// Requests from session handles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Command {
    Connect,
    Disconnect,
    Diagnostic(DiagnosticKind),
    StartDemo,
    StopDemo,
}

/// Messages the engine sends itself
#[derive(Debug)]
pub(crate) enum Internal {
    Transport { epoch: u64, event: TransportEvent },
    Timer { epoch: u64, timer: Timer },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Timer {
    /// Send the init command at this index
    InitStep(usize),
    InitComplete,
    SendNext { generation: u64 },
    CommandTimeout { generation: u64 },
    DiagnosticSend { op: u64 },
    DiagnosticTimeout { op: u64 },
    DemoTick,
    DemoDiagnostic { op: u64 },
}

#[derive(Debug)]
enum Phase {
    /// Waiting out the deferral before transmission
    Deferred,
    /// `03`/`04` sent, waiting for a terminal answer
    AwaitingAnswer,
    /// Reading Mode 02 values for the first stored code
    FreezeFrame {
        pending: VecDeque<Parameter>,
        codes: usize,
    },
}

#[derive(Debug)]
struct Diagnostic {
    op: u64,
    kind: DiagnosticKind,
    phase: Phase,
}

pub(crate) struct Engine {
    config: SessionConfig,
    factory: Box<dyn TransportFactory>,
    internal: mpsc::UnboundedSender<Internal>,
    snapshot: watch::Sender<SessionSnapshot>,
    events: broadcast::Sender<SessionEvent>,

    transport: Option<Box<dyn Transport>>,
    state: SessionState,
    connection: TransportState,
    /// Cleared on teardown; every handler checks it
    active: bool,
    epoch: u64,
    generation: u64,
    awaiting_response: bool,
    /// Next catalog index to poll
    cursor: usize,
    last_request: Option<String>,
    diagnostic: Option<Diagnostic>,
    next_op: u64,
    samples: Vec<ParameterSample>,
    dtcs: Vec<DtcRecord>,
    last_scan: Option<DateTime<Utc>>,
    last_error: Option<String>,
    demo: Option<DemoSource>,
}

impl Engine {
    pub(crate) fn new(
        config: SessionConfig,
        factory: Box<dyn TransportFactory>,
        internal: mpsc::UnboundedSender<Internal>,
        snapshot: watch::Sender<SessionSnapshot>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            config,
            factory,
            internal,
            snapshot,
            events,
            transport: None,
            state: SessionState::Idle,
            connection: TransportState::Disconnected,
            active: false,
            epoch: 0,
            generation: 0,
            awaiting_response: false,
            cursor: 0,
            last_request: None,
            diagnostic: None,
            next_op: 0,
            samples: unavailable_samples(),
            dtcs: Vec::new(),
            last_scan: None,
            last_error: None,
            demo: None,
        }
    }

    /// Drive the engine until every handle is gone
    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        info!("OBD session engine started");
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
                Some(message) = internal.recv() => self.on_internal(message),
            }
            self.publish();
        }

        self.teardown(TransportState::Disconnected);
        info!("OBD session engine stopped");
    }

    // ---- commands ------------------------------------------------------

    pub(crate) fn on_command(&mut self, command: Command) {
        debug!("command {:?} in state {}", command, self.state);
        match command {
            Command::Connect => self.connect(),
            Command::Disconnect => self.disconnect(),
            Command::Diagnostic(kind) => self.request_diagnostic(kind),
            Command::StartDemo => self.start_demo(),
            Command::StopDemo => self.stop_demo(),
        }
    }

    fn connect(&mut self) {
        if self.demo.is_some() {
            self.stop_demo();
        }
        if self.transport.is_some() {
            debug!("Connect ignored, session already {}", self.state);
            return;
        }

        self.epoch += 1;
        self.active = true;
        self.cursor = 0;
        self.awaiting_response = false;
        self.last_request = None;
        self.last_error = None;
        self.set_state(SessionState::Connecting);

        let mut transport = self.factory.create();
        info!("Connecting over {}", transport.name());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let internal = self.internal.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if internal.send(Internal::Transport { epoch, event }).is_err() {
                    break;
                }
            }
        });

        transport.connect(tx);
        self.transport = Some(transport);
    }

    fn disconnect(&mut self) {
        if self.transport.is_none() {
            debug!("Disconnect ignored, no transport");
            return;
        }
        info!("Disconnecting");
        self.teardown(TransportState::Disconnected);
        self.samples = unavailable_samples();
    }

    /// Stop everything tied to the current connection
    fn teardown(&mut self, connection: TransportState) {
        self.active = false;
        self.epoch += 1;
        self.awaiting_response = false;
        self.last_request = None;
        if let Some(mut transport) = self.transport.take() {
            transport.disconnect();
        }
        if let Some(diagnostic) = self.diagnostic.take() {
            self.report(diagnostic.kind, Err(SessionError::Disconnected));
        }
        self.set_connection(connection);
        self.set_state(SessionState::Idle);
    }

    fn request_diagnostic(&mut self, kind: DiagnosticKind) {
        if self.diagnostic.is_some() {
            self.report(kind, Err(SessionError::Busy));
            return;
        }
        match self.state {
            SessionState::Polling => {}
            SessionState::Demo => return self.request_demo_diagnostic(kind),
            SessionState::Idle | SessionState::Connecting => {
                return self.report(kind, Err(SessionError::NotConnected));
            }
            state => return self.report(kind, Err(SessionError::NotReady(state))),
        }

        let poll_outstanding = self.awaiting_response;
        let defer = self.config.timing.diagnostic_defer(poll_outstanding);
        let op = self.begin_diagnostic(kind);
        info!(
            "{:?} requested, sending in {}ms{}",
            kind,
            defer.as_millis(),
            if poll_outstanding {
                " after the outstanding poll"
            } else {
                ""
            }
        );

        self.awaiting_response = false;
        self.schedule(defer, Timer::DiagnosticSend { op });
        self.schedule(
            defer + self.config.timing.diagnostic_timeout(),
            Timer::DiagnosticTimeout { op },
        );
    }

    fn begin_diagnostic(&mut self, kind: DiagnosticKind) -> u64 {
        self.next_op += 1;
        self.last_error = None;
        self.diagnostic = Some(Diagnostic {
            op: self.next_op,
            kind,
            phase: Phase::Deferred,
        });
        self.set_state(SessionState::DiagnosticPending);
        self.next_op
    }

    // ---- demo ----------------------------------------------------------

    fn start_demo(&mut self) {
        if self.demo.is_some() {
            return;
        }
        if self.transport.is_some() {
            self.teardown(TransportState::Disconnected);
        }

        info!("Starting demo mode");
        self.epoch += 1;
        self.active = true;
        let demo = DemoSource::new();
        self.dtcs = demo.stored_codes();
        self.last_scan = Some(Utc::now());
        self.demo = Some(demo);
        self.events
            .send(SessionEvent::CodesUpdated(self.dtcs.clone()))
            .ok();
        self.set_state(SessionState::Demo);
        self.demo_tick();
    }

    fn stop_demo(&mut self) {
        if self.demo.take().is_none() {
            return;
        }
        info!("Stopping demo mode");
        self.active = false;
        self.epoch += 1;
        if let Some(diagnostic) = self.diagnostic.take() {
            self.report(diagnostic.kind, Err(SessionError::Disconnected));
        }
        self.samples = unavailable_samples();
        self.dtcs.clear();
        self.last_scan = None;
        self.last_error = None;
        self.set_state(SessionState::Idle);
    }

    fn demo_tick(&mut self) {
        let readings = match self.demo.as_mut() {
            Some(demo) => demo.tick(),
            None => return,
        };
        for (parameter, reading) in readings {
            self.store_sample(parameter, reading);
        }
        self.schedule(self.config.timing.demo_tick(), Timer::DemoTick);
    }

    fn request_demo_diagnostic(&mut self, kind: DiagnosticKind) {
        let delay = match kind {
            DiagnosticKind::Scan => self.config.timing.demo_scan(),
            DiagnosticKind::Clear => self.config.timing.demo_clear(),
        };
        let op = self.begin_diagnostic(kind);
        self.schedule(delay, Timer::DemoDiagnostic { op });
    }

    fn finish_demo_diagnostic(&mut self, op: u64) {
        let kind = match &self.diagnostic {
            Some(diagnostic) if diagnostic.op == op => diagnostic.kind,
            _ => return,
        };
        let Some(demo) = self.demo.as_mut() else {
            return;
        };
        let report = match kind {
            DiagnosticKind::Scan => {
                let codes = demo.stored_codes();
                let count = codes.len();
                self.last_scan = Some(Utc::now());
                self.replace_codes(codes);
                if count == 0 {
                    DiagnosticReport::NoCodes
                } else {
                    DiagnosticReport::CodesRead { count }
                }
            }
            DiagnosticKind::Clear => {
                demo.clear_codes();
                self.replace_codes(Vec::new());
                DiagnosticReport::Cleared
            }
        };
        self.finish_diagnostic(Ok(report));
    }

    // ---- internal messages ---------------------------------------------

    pub(crate) fn on_internal(&mut self, message: Internal) {
        let (epoch, message) = match message {
            Internal::Transport { epoch, event } => (epoch, Ok(event)),
            Internal::Timer { epoch, timer } => (epoch, Err(timer)),
        };
        if epoch != self.epoch || !self.active {
            trace!("discarding stale message from epoch {}", epoch);
            return;
        }
        match message {
            Ok(TransportEvent::StateChanged(state)) => self.on_transport_state(state),
            Ok(TransportEvent::Line(line)) => self.on_line(&line),
            Err(timer) => self.on_timer(timer),
        }
    }

    fn on_transport_state(&mut self, state: TransportState) {
        match state {
            TransportState::Connecting => self.set_connection(state),
            TransportState::Connected => {
                self.set_connection(state);
                if self.state == SessionState::Connecting {
                    info!("Adapter link up, initializing");
                    self.set_state(SessionState::Initializing);
                    self.schedule_init();
                }
            }
            TransportState::Disconnected | TransportState::Failed(_) => {
                if let TransportState::Failed(reason) = &state {
                    warn!("Adapter link failed: {}", reason);
                    self.last_error = Some(reason.clone());
                } else {
                    info!("Adapter link closed");
                }
                // The transport has already given up; drop it without another report.
                self.transport = None;
                self.teardown(state);
                self.samples = unavailable_samples();
            }
        }
    }

    fn schedule_init(&mut self) {
        let commands = init_sequence(self.config.protocol);
        let timing = &self.config.timing;
        let offsets = timing.init_offsets(commands.len());
        let start = timing.polling_start(commands.len());
        for (index, offset) in offsets.into_iter().enumerate() {
            self.schedule(offset, Timer::InitStep(index));
        }
        self.schedule(start, Timer::InitComplete);
    }

    fn on_timer(&mut self, timer: Timer) {
        trace!("timer {:?}", timer);
        match timer {
            Timer::InitStep(index) => {
                if self.state != SessionState::Initializing {
                    return;
                }
                let commands = init_sequence(self.config.protocol);
                if let Some(command) = commands.get(index) {
                    self.transmit(&command.to_string());
                }
            }
            Timer::InitComplete => {
                if self.state != SessionState::Initializing {
                    return;
                }
                info!("Adapter initialized, polling {} parameters", CATALOG.len());
                self.set_state(SessionState::Polling);
                self.send_next_parameter();
            }
            Timer::SendNext { generation } => {
                if generation != self.generation || self.awaiting_response {
                    return;
                }
                match &self.diagnostic {
                    Some(Diagnostic {
                        phase: Phase::FreezeFrame { .. },
                        ..
                    }) => self.request_freeze_frame(),
                    Some(_) => {}
                    None => self.send_next_parameter(),
                }
            }
            Timer::CommandTimeout { generation } => self.on_command_timeout(generation),
            Timer::DiagnosticSend { op } => self.send_diagnostic(op),
            Timer::DiagnosticTimeout { op } => self.on_diagnostic_timeout(op),
            Timer::DemoTick => self.demo_tick(),
            Timer::DemoDiagnostic { op } => self.finish_demo_diagnostic(op),
        }
    }

    fn on_command_timeout(&mut self, generation: u64) {
        if generation != self.generation || !self.awaiting_response {
            return;
        }
        self.awaiting_response = false;
        let error = ObdError::Timeout {
            command: self.last_request.clone().unwrap_or_default(),
            after_ms: self.config.timing.command_timeout_ms,
        };
        warn!("{}", error);

        if let Some(Diagnostic {
            phase: Phase::FreezeFrame { codes, .. },
            ..
        }) = &self.diagnostic
        {
            let codes = *codes;
            debug!("Freeze frame read stalled, keeping what was captured");
            self.finish_diagnostic(Ok(DiagnosticReport::CodesRead { count: codes }));
            return;
        }
        self.schedule_next(self.config.timing.timeout_cooldown());
    }

    fn send_diagnostic(&mut self, op: u64) {
        let kind = match &mut self.diagnostic {
            Some(diagnostic) if diagnostic.op == op => {
                if !matches!(diagnostic.phase, Phase::Deferred) {
                    return;
                }
                diagnostic.phase = Phase::AwaitingAnswer;
                diagnostic.kind
            }
            _ => return,
        };
        self.transmit(kind.command());
        self.awaiting_response = true;
    }

    fn on_diagnostic_timeout(&mut self, op: u64) {
        let kind = match &self.diagnostic {
            Some(diagnostic) if diagnostic.op == op => match diagnostic.phase {
                Phase::FreezeFrame { .. } => return,
                _ => diagnostic.kind,
            },
            _ => return,
        };
        warn!("{:?} drew no answer", kind);
        self.awaiting_response = false;
        self.finish_diagnostic(Err(SessionError::NoResponse {
            command: kind.command().to_string(),
        }));
    }

    // ---- polling -------------------------------------------------------

    fn send_next_parameter(&mut self) {
        if !self.active
            || self.transport.is_none()
            || self.diagnostic.is_some()
            || self.state != SessionState::Polling
        {
            return;
        }
        let spec = &CATALOG[self.cursor];
        self.cursor = (self.cursor + 1) % CATALOG.len();
        self.send_command(&spec.request_code());
    }

    fn request_freeze_frame(&mut self) {
        let next = match &mut self.diagnostic {
            Some(Diagnostic {
                phase: Phase::FreezeFrame { pending, codes },
                ..
            }) => match pending.pop_front() {
                Some(parameter) => Ok(parameter),
                None => Err(*codes),
            },
            _ => return,
        };
        match next {
            Ok(parameter) => self.send_command(&parameter.spec().freeze_frame_code()),
            Err(count) => {
                let captured = self
                    .dtcs
                    .first()
                    .and_then(|record| record.freeze_frame.as_ref())
                    .map_or(0, |frame| frame.values.len());
                debug!("Freeze frame complete with {} values", captured);
                self.finish_diagnostic(Ok(DiagnosticReport::CodesRead { count }));
            }
        }
    }

    /// Send a command that expects an answer within the command timeout
    fn send_command(&mut self, command: &str) {
        self.transmit(command);
        self.awaiting_response = true;
        self.schedule(
            self.config.timing.command_timeout(),
            Timer::CommandTimeout {
                generation: self.generation,
            },
        );
    }

    fn transmit(&mut self, command: &str) {
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        self.generation += 1;
        debug!("-> {}", command);
        transport.send(command);
        self.last_request = Some(command.to_string());
    }

    /// Poll again after `delay` unless something else is sent first
    fn schedule_next(&mut self, delay: Duration) {
        self.schedule(
            delay,
            Timer::SendNext {
                generation: self.generation,
            },
        );
    }

    fn schedule(&self, delay: Duration, timer: Timer) {
        let internal = self.internal.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = internal.send(Internal::Timer { epoch, timer });
        });
    }

    // ---- responses -----------------------------------------------------

    fn on_line(&mut self, line: &str) {
        let kind = classify(line, self.last_request.as_deref());
        trace!("<- {:?} as {:?}", line, kind);
        let settle = self.config.timing.response_settle();

        match kind {
            ResponseKind::Noise | ResponseKind::Echo => {}
            ResponseKind::Searching => debug!("Adapter searching for protocol"),
            ResponseKind::Acknowledgement => {
                if self.diagnostic.is_none() && self.state == SessionState::Polling {
                    // The poll stays unanswered; move on after the cool-down
                    self.awaiting_response = false;
                    self.schedule_next(self.config.timing.timeout_cooldown());
                }
            }
            ResponseKind::Stopped => {
                debug!("Adapter search stopped");
                self.awaiting_response = false;
                self.schedule_next(self.config.timing.stopped_settle());
            }
            ResponseKind::NoData => match self.diagnostic_phase() {
                Some((kind, PhaseTag::Answer)) => {
                    info!("{:?}: no stored codes", kind);
                    self.awaiting_response = false;
                    self.last_scan = Some(Utc::now());
                    self.replace_codes(Vec::new());
                    self.finish_diagnostic(Ok(DiagnosticReport::NoCodes));
                }
                Some((_, PhaseTag::Deferred)) => {}
                _ => {
                    debug!("NO DATA for {:?}", self.last_request);
                    self.settle(settle);
                }
            },
            ResponseKind::Negative { service } => match self.diagnostic_phase() {
                Some((kind, PhaseTag::Answer)) if service == Some(kind.service()) => {
                    warn!("Vehicle rejected {:?}", kind);
                    self.awaiting_response = false;
                    self.finish_diagnostic(Err(ObdError::Rejected {
                        service: kind.service(),
                    }
                    .into()));
                }
                Some((_, PhaseTag::Answer | PhaseTag::Deferred)) => {}
                _ => {
                    debug!("Negative response {:?}", line);
                    self.settle(settle);
                }
            },
            ResponseKind::AdapterError(message) => match self.diagnostic_phase() {
                Some((kind, PhaseTag::Answer)) => {
                    warn!("Adapter error during {:?}: {}", kind, message);
                    self.awaiting_response = false;
                    self.finish_diagnostic(Err(ObdError::Adapter(message).into()));
                }
                Some((_, PhaseTag::Deferred)) => {}
                _ => {
                    warn!("Adapter error: {}", message);
                    self.settle(settle);
                }
            },
            ResponseKind::StoredCodes(codes) => {
                let count = codes.len();
                info!("Vehicle reports {} stored codes", count);
                self.last_scan = Some(Utc::now());
                self.replace_codes(codes.into_iter().map(DtcRecord::new).collect());
                self.awaiting_response = false;

                match self.diagnostic_phase() {
                    Some((DiagnosticKind::Scan, PhaseTag::Answer)) => self.after_scan(count),
                    Some((_, PhaseTag::Answer)) => {
                        let report = if count == 0 {
                            DiagnosticReport::NoCodes
                        } else {
                            DiagnosticReport::CodesRead { count }
                        };
                        self.finish_diagnostic(Ok(report));
                    }
                    Some(_) => {}
                    None => self.schedule_next(settle),
                }
            }
            ResponseKind::CodesCleared => {
                info!("Vehicle confirmed codes cleared");
                self.replace_codes(Vec::new());
                self.awaiting_response = false;
                match self.diagnostic_phase() {
                    Some((_, PhaseTag::Answer)) => {
                        self.finish_diagnostic(Ok(DiagnosticReport::Cleared))
                    }
                    Some(_) => {}
                    None => self.schedule_next(settle),
                }
            }
            ResponseKind::FreezeFrame(decoded) => {
                if !matches!(self.diagnostic_phase(), Some((_, PhaseTag::FreezeFrame))) {
                    debug!("Unsolicited freeze frame {:?}", line);
                    return;
                }
                if let Some((parameter, reading)) = decoded {
                    self.merge_freeze_frame(parameter, reading);
                }
                self.awaiting_response = false;
                self.schedule_next(settle);
            }
            ResponseKind::Parameter(parameter, reading) => {
                self.store_sample(parameter, reading);
                if self.diagnostic.is_none() {
                    self.awaiting_response = false;
                    self.schedule_next(settle);
                }
            }
            ResponseKind::Undecodable => {
                warn!("{}", ObdError::Undecodable(line.to_string()));
                if self.diagnostic.is_none() {
                    self.awaiting_response = false;
                    self.schedule_next(settle);
                }
            }
            ResponseKind::Unrecognized => {
                debug!("Unrecognized line {:?}", line);
                if self.diagnostic.is_none() {
                    self.awaiting_response = false;
                    self.schedule_next(settle);
                }
            }
        }
    }

    /// Release the in-flight slot and move on after `delay`
    ///
    /// During the freeze-frame phase this skips the requested PID.
    fn settle(&mut self, delay: Duration) {
        match self.diagnostic_phase() {
            None | Some((_, PhaseTag::FreezeFrame)) => {
                self.awaiting_response = false;
                self.schedule_next(delay);
            }
            Some(_) => {}
        }
    }

    fn after_scan(&mut self, count: usize) {
        let wanted: VecDeque<Parameter> = self.config.freeze_frame.iter().copied().collect();
        if count == 0 || wanted.is_empty() {
            let report = if count == 0 {
                DiagnosticReport::NoCodes
            } else {
                DiagnosticReport::CodesRead { count }
            };
            return self.finish_diagnostic(Ok(report));
        }

        debug!("Reading {} freeze frame values", wanted.len());
        if let Some(diagnostic) = self.diagnostic.as_mut() {
            diagnostic.phase = Phase::FreezeFrame {
                pending: wanted,
                codes: count,
            };
        }
        self.schedule_next(self.config.timing.response_settle());
    }

    fn merge_freeze_frame(&mut self, parameter: Parameter, reading: Reading) {
        let Some(record) = self.dtcs.first_mut() else {
            return;
        };
        record
            .freeze_frame
            .get_or_insert_with(|| FreezeFrame::new(record.code))
            .merge(parameter, reading);
        let dtcs = self.dtcs.clone();
        self.events.send(SessionEvent::CodesUpdated(dtcs)).ok();
    }

    fn diagnostic_phase(&self) -> Option<(DiagnosticKind, PhaseTag)> {
        self.diagnostic.as_ref().map(|diagnostic| {
            let tag = match diagnostic.phase {
                Phase::Deferred => PhaseTag::Deferred,
                Phase::AwaitingAnswer => PhaseTag::Answer,
                Phase::FreezeFrame { .. } => PhaseTag::FreezeFrame,
            };
            (diagnostic.kind, tag)
        })
    }

    fn finish_diagnostic(&mut self, result: Result<DiagnosticReport, SessionError>) {
        let Some(diagnostic) = self.diagnostic.take() else {
            return;
        };
        if let Err(e) = &result {
            self.last_error = Some(e.to_string());
        }
        self.report(diagnostic.kind, result);

        if self.demo.is_some() {
            self.set_state(SessionState::Demo);
        } else {
            self.set_state(SessionState::Polling);
            self.schedule_next(self.config.timing.resume());
        }
    }

    // ---- publication ---------------------------------------------------

    fn report(&mut self, kind: DiagnosticKind, result: Result<DiagnosticReport, SessionError>) {
        match &result {
            Ok(report) => info!("{:?} finished: {:?}", kind, report),
            Err(e) => warn!("{:?} failed: {}", kind, e),
        }
        self.events
            .send(SessionEvent::Diagnostic(DiagnosticOutcome { kind, result }))
            .ok();
    }

    fn store_sample(&mut self, parameter: Parameter, reading: Reading) {
        let sample = ParameterSample {
            parameter,
            value: SampleValue::Reading(reading),
            updated_at: Utc::now(),
        };
        trace!("{}", sample);
        self.samples[parameter as usize] = sample.clone();
        self.events.send(SessionEvent::ParameterUpdated(sample)).ok();
    }

    fn replace_codes(&mut self, dtcs: Vec<DtcRecord>) {
        self.dtcs = dtcs;
        self.events
            .send(SessionEvent::CodesUpdated(self.dtcs.clone()))
            .ok();
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!("session {} -> {}", self.state, state);
            self.state = state;
            self.events.send(SessionEvent::StateChanged(state)).ok();
        }
    }

    fn set_connection(&mut self, connection: TransportState) {
        if self.connection != connection {
            self.connection = connection.clone();
            self.events.send(SessionEvent::Connection(connection)).ok();
        }
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            connection: self.connection.clone(),
            samples: self.samples.clone(),
            dtcs: self.dtcs.clone(),
            diagnostic: self.diagnostic.as_ref().map(|d| d.kind),
            last_scan: self.last_scan,
            last_error: self.last_error.clone(),
        }
    }

    pub(crate) fn publish(&self) {
        let next = self.snapshot();
        self.snapshot.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

/// Phase without its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PhaseTag {
    Deferred,
    Answer,
    FreezeFrame,
}
