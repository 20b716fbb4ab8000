//! Command/acknowledge session with the analyzer.
//!
//! Every command that ends in `*OPC?` is confirmed by polling for a single
//! reply line. The instrument cannot report "still busy", so a read that
//! times out only means "not yet" until the attempt budget is spent.

use std::fmt;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::result::{AckTimeout, SessionError};
use crate::transport::{self, OpenOptions, Transport, VisaAddress};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    ModeReady,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Poll budgets and settle delays, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    pub ack_attempts: u32,
    pub mode_poll_ms: u64,
    pub command_delay_ms: u64,
    pub sweep_poll_ms: u64,
    pub sweep_settle_ms: u64,
    pub sweep_repetitions: u32,
    pub autoscale_delay_ms: u64,
    pub save_poll_ms: u64,
    pub step_delay_ms: u64,
    pub trace_count: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Timing {
            ack_attempts: 10,
            mode_poll_ms: 1000,
            command_delay_ms: 1000,
            sweep_poll_ms: 500,
            sweep_settle_ms: 1000,
            sweep_repetitions: 3,
            autoscale_delay_ms: 500,
            save_poll_ms: 5000,
            step_delay_ms: 3000,
            trace_count: 4,
        }
    }
}

impl Timing {
    /// Same budgets as the default, with every delay removed.
    pub fn immediate() -> Self {
        Timing {
            mode_poll_ms: 0,
            command_delay_ms: 0,
            sweep_poll_ms: 0,
            sweep_settle_ms: 0,
            autoscale_delay_ms: 0,
            save_poll_ms: 0,
            step_delay_ms: 0,
            ..Timing::default()
        }
    }

    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }
}

fn pause(ms: u64) {
    if ms > 0 {
        thread::sleep(Duration::from_millis(ms));
    }
}

/// Outcome of one `trigger_sweep` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepResult {
    pub acknowledged: u32,
}

/// Owns the instrument transport and enforces which operations are valid in
/// which [`SessionState`].
pub struct SessionController<T: Transport = Box<dyn Transport>> {
    transport: Option<T>,
    state: SessionState,
    timing: Timing,
}

impl<T: Transport> SessionController<T> {
    pub fn new(timing: Timing) -> Self {
        SessionController {
            transport: None,
            state: SessionState::Disconnected,
            timing,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    /// Takes ownership of an already opened transport. Any previous
    /// connection is closed first.
    pub fn attach(&mut self, transport: T) {
        self.disconnect();
        self.transport = Some(transport);
        self.state = SessionState::Connected;
        info!("session connected");
    }

    /// Clears and closes the transport. Safe to call in any state.
    pub fn disconnect(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.clear().and_then(|_| transport.close()) {
                warn!(error = %e, "error while closing transport");
            }
            info!("session disconnected");
        }
        self.state = SessionState::Disconnected;
    }

    fn require(
        &mut self,
        operation: &'static str,
        allowed: &[SessionState],
    ) -> Result<&mut T, SessionError> {
        match self.transport.as_mut() {
            Some(transport) if allowed.contains(&self.state) => Ok(transport),
            _ => Err(SessionError::InvalidState {
                operation,
                state: self.state,
            }),
        }
    }

    fn send(&mut self, command: &str) -> Result<(), SessionError> {
        let transport = self.require(
            "write",
            &[SessionState::Connected, SessionState::ModeReady],
        )?;
        debug!(command, "write");
        transport.write_line(command)?;
        Ok(())
    }

    /// Sends `command` and polls up to `max_attempts` times for a non-empty
    /// reply line, sleeping `poll_interval` between attempts.
    pub fn command_with_ack(
        &mut self,
        command: &str,
        max_attempts: u32,
        poll_interval: Duration,
    ) -> Result<String, SessionError> {
        self.send(command)?;
        let transport = self.require(
            "read",
            &[SessionState::Connected, SessionState::ModeReady],
        )?;
        for attempt in 1..=max_attempts {
            match transport.read_line() {
                Ok(line) if !line.trim().is_empty() => {
                    debug!(command, attempt, reply = line.trim(), "acknowledged");
                    return Ok(line.trim().to_owned());
                }
                Ok(_) => warn!(command, remaining = max_attempts - attempt, "empty reply"),
                Err(e) => warn!(
                    command,
                    remaining = max_attempts - attempt,
                    error = %e,
                    "waiting for acknowledgement"
                ),
            }
            if attempt < max_attempts && !poll_interval.is_zero() {
                thread::sleep(poll_interval);
            }
        }
        Err(AckTimeout {
            command: command.to_owned(),
            attempts: max_attempts,
        }
        .into())
    }

    /// Queries `*IDN?`.
    pub fn identify(&mut self) -> Result<String, SessionError> {
        self.require("identify", &[SessionState::Connected, SessionState::ModeReady])?;
        let attempts = self.timing.ack_attempts;
        let interval = Duration::from_millis(self.timing.mode_poll_ms);
        self.command_with_ack("*IDN?", attempts, interval)
    }

    /// Switches the analyzer into network analyzer mode, then holds the sweep
    /// and shows all S-parameter traces.
    ///
    /// Any failure leaves the session `Connected`, even when it was already
    /// `ModeReady`, since the instrument configuration is then unknown.
    pub fn set_mode(&mut self) -> Result<(), SessionError> {
        self.require("set_mode", &[SessionState::Connected, SessionState::ModeReady])?;
        let result = self.configure_na_mode();
        self.state = match result {
            Ok(()) => SessionState::ModeReady,
            Err(_) => SessionState::Connected,
        };
        result
    }

    fn configure_na_mode(&mut self) -> Result<(), SessionError> {
        let attempts = self.timing.ack_attempts;
        let interval = Duration::from_millis(self.timing.mode_poll_ms);
        self.command_with_ack("INST \"NA\";*OPC?", attempts, interval)
            .map_err(|e| e.escalate(SessionError::ModeSetFailure))?;

        info!("analyzer in NA mode, configuring");
        let delay = self.timing.command_delay_ms;
        pause(delay);
        self.send("INIT:CONT 0")?;
        pause(delay);
        let traces = format!("CALC:PAR:COUN {}", self.timing.trace_count);
        self.send(&traces)?;
        pause(delay);
        Ok(())
    }

    pub fn load_calibration(&mut self, id: i32) -> Result<(), SessionError> {
        self.require("load_calibration", &[SessionState::ModeReady])?;
        info!(id, "loading calibration state");
        self.send("MMEM:CDIR \"[INTERNAL]:\"")?;
        pause(self.timing.command_delay_ms);

        let command = format!("MMEMory:LOAD:STATe \"CalState_{}.sta\";*OPC?", id);
        let attempts = self.timing.ack_attempts;
        let interval = Duration::from_millis(self.timing.mode_poll_ms);
        self.command_with_ack(&command, attempts, interval)
            .map_err(|e| e.escalate(|source| SessionError::CalibrationLoadFailure { id, source }))?;
        info!(id, "calibration state loaded");
        Ok(())
    }

    /// Runs the configured number of sweep repetitions. Each repetition gets
    /// a fresh attempt budget.
    pub fn trigger_sweep(&mut self) -> Result<SweepResult, SessionError> {
        self.require("trigger_sweep", &[SessionState::ModeReady])?;
        let repetitions = self.timing.sweep_repetitions;
        let attempts = self.timing.ack_attempts;
        let interval = Duration::from_millis(self.timing.sweep_poll_ms);

        for repetition in 1..=repetitions {
            info!(repetition, repetitions, "starting sweep");
            self.command_with_ack("INIT:IMM;*OPC?", attempts, interval)
                .map_err(|e| e.escalate(|source| SessionError::SweepFailure { repetition, source }))?;
            pause(self.timing.sweep_settle_ms);

            if repetition < repetitions {
                for trace in 1..=self.timing.trace_count {
                    self.send(&format!("DISP:WIND:TRAC{}:Y:AUTO", trace))?;
                    pause(self.timing.autoscale_delay_ms);
                }
            }
        }
        Ok(SweepResult {
            acknowledged: repetitions,
        })
    }

    /// Stores the current traces as `<name>.s2p` on the external drive.
    pub fn save_dataset(&mut self, name: &str) -> Result<(), SessionError> {
        self.require("save_dataset", &[SessionState::ModeReady])?;
        self.send("MMEM:CDIR \"[USBDISK]:\"")?;
        pause(self.timing.command_delay_ms);

        let command = format!("MMEM:STOR:SNP \"{}.s2p\";*OPC?", name);
        let attempts = self.timing.ack_attempts;
        let interval = Duration::from_millis(self.timing.save_poll_ms);
        self.command_with_ack(&command, attempts, interval)
            .map_err(|e| {
                e.escalate(|source| SessionError::SaveFailure {
                    name: name.to_owned(),
                    source,
                })
            })?;
        info!(name, "dataset saved");
        Ok(())
    }
}

impl SessionController<Box<dyn Transport>> {
    /// Parses `address` and opens the matching socket or serial transport.
    pub fn connect(&mut self, address: &str, options: &OpenOptions) -> Result<(), SessionError> {
        let connection_error = |reason: String| SessionError::Connection {
            address: address.to_owned(),
            reason,
        };
        let resource: VisaAddress = address.parse().map_err(connection_error)?;
        info!(%resource, "connecting");
        let transport =
            transport::open(&resource, options).map_err(|e| connection_error(e.to_string()))?;
        self.attach(transport);
        Ok(())
    }
}

impl<T: Transport> Drop for SessionController<T> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;

    fn ready(mock: MockTransport) -> SessionController<MockTransport> {
        let mut session = SessionController::new(Timing::immediate());
        session.attach(mock);
        session.set_mode().unwrap();
        session
    }

    #[test]
    fn test_ack_on_seventh_attempt() {
        let replies = vec![None, None, None, None, None, None, Some("1")];
        let (mock, log) = MockTransport::scripted(replies, None);
        let mut session = SessionController::new(Timing::immediate());
        session.attach(mock);

        let reply = session
            .command_with_ack("INIT:IMM;*OPC?", 10, Duration::ZERO)
            .unwrap();
        assert_eq!(reply, "1");
        assert_eq!(log.borrow().reads, 7);
        assert_eq!(log.borrow().written, vec!["INIT:IMM;*OPC?"]);
    }

    #[test]
    fn test_empty_reply_is_not_an_ack() {
        let (mock, log) = MockTransport::scripted(vec![Some(""), Some("  "), Some("+1")], None);
        let mut session = SessionController::new(Timing::immediate());
        session.attach(mock);
        let reply = session.command_with_ack("*OPC?", 10, Duration::ZERO).unwrap();
        assert_eq!(reply, "+1");
        assert_eq!(log.borrow().reads, 3);
    }

    #[test]
    fn test_ack_timeout_after_exact_budget() {
        let (mock, log) = MockTransport::silent();
        let mut session = SessionController::new(Timing::immediate());
        session.attach(mock);

        let err = session.set_mode().unwrap_err();
        match err {
            SessionError::ModeSetFailure(timeout) => {
                assert_eq!(timeout.attempts, 10);
                assert_eq!(timeout.command, "INST \"NA\";*OPC?");
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(log.borrow().reads, 10);
        assert_eq!(log.borrow().written, vec!["INST \"NA\";*OPC?"]);
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[test]
    fn test_set_mode_is_idempotent() {
        let (mock, log) = MockTransport::acking();
        let mut session = ready(mock);
        session.set_mode().unwrap();
        assert_eq!(session.state(), SessionState::ModeReady);

        let handshake = ["INST \"NA\";*OPC?", "INIT:CONT 0", "CALC:PAR:COUN 4"];
        let expected: Vec<&str> = handshake.iter().chain(handshake.iter()).copied().collect();
        assert_eq!(log.borrow().written, expected);
    }

    #[test]
    fn test_failed_set_mode_drops_mode_ready() {
        let (mock, _log) = MockTransport::scripted(vec![Some("1")], None);
        let mut session = ready(mock);
        assert_eq!(session.state(), SessionState::ModeReady);

        assert!(matches!(
            session.set_mode(),
            Err(SessionError::ModeSetFailure(_))
        ));
        assert_eq!(session.state(), SessionState::Connected);
        assert!(matches!(
            session.trigger_sweep(),
            Err(SessionError::InvalidState {
                state: SessionState::Connected,
                ..
            })
        ));
    }

    #[test]
    fn test_operations_require_mode_ready() {
        let (mock, log) = MockTransport::acking();
        let mut session = SessionController::new(Timing::immediate());
        assert!(matches!(
            session.set_mode(),
            Err(SessionError::InvalidState {
                state: SessionState::Disconnected,
                ..
            })
        ));

        session.attach(mock);
        assert!(matches!(
            session.load_calibration(1),
            Err(SessionError::InvalidState { .. })
        ));
        assert!(matches!(
            session.trigger_sweep(),
            Err(SessionError::InvalidState { .. })
        ));
        assert!(matches!(
            session.save_dataset("dut"),
            Err(SessionError::InvalidState { .. })
        ));
        assert!(log.borrow().written.is_empty());
    }

    #[test]
    fn test_load_calibration_commands() {
        let (mock, log) = MockTransport::acking();
        let mut session = ready(mock);
        log.borrow_mut().written.clear();

        session.load_calibration(12).unwrap();
        assert_eq!(
            log.borrow().written,
            vec![
                "MMEM:CDIR \"[INTERNAL]:\"",
                "MMEMory:LOAD:STATe \"CalState_12.sta\";*OPC?"
            ]
        );
    }

    #[test]
    fn test_load_calibration_failure() {
        let (mock, _log) = MockTransport::scripted(vec![Some("1")], None);
        let mut session = ready(mock);
        let err = session.load_calibration(-1).unwrap_err();
        assert!(matches!(
            err,
            SessionError::CalibrationLoadFailure { id: -1, .. }
        ));
    }

    #[test]
    fn test_sweep_repetitions_and_autoscale() {
        let (mock, log) = MockTransport::acking();
        let mut session = ready(mock);
        log.borrow_mut().written.clear();

        let result = session.trigger_sweep().unwrap();
        assert_eq!(result.acknowledged, 3);

        let written = log.borrow().written.clone();
        let triggers = written.iter().filter(|c| *c == "INIT:IMM;*OPC?").count();
        let autoscales = written.iter().filter(|c| c.ends_with(":Y:AUTO")).count();
        assert_eq!(triggers, 3);
        assert_eq!(autoscales, 8);
        assert_eq!(written.last().map(String::as_str), Some("INIT:IMM;*OPC?"));
        assert_eq!(written[1], "DISP:WIND:TRAC1:Y:AUTO");
        assert_eq!(written[4], "DISP:WIND:TRAC4:Y:AUTO");
    }

    #[test]
    fn test_sweep_budget_is_per_repetition() {
        // mode ack, then 9 misses before each of the three sweep acks
        let mut replies = vec![Some("1")];
        for _ in 0..3 {
            replies.extend(std::iter::repeat(None).take(9));
            replies.push(Some("1"));
        }
        let (mock, log) = MockTransport::scripted(replies, None);
        let mut session = ready(mock);
        assert_eq!(session.trigger_sweep().unwrap().acknowledged, 3);
        assert_eq!(log.borrow().reads, 31);
    }

    #[test]
    fn test_sweep_failure_names_repetition() {
        let replies = vec![Some("1"), Some("1")];
        let (mock, _log) = MockTransport::scripted(replies, None);
        let mut session = ready(mock);
        match session.trigger_sweep().unwrap_err() {
            SessionError::SweepFailure { repetition, source } => {
                assert_eq!(repetition, 2);
                assert_eq!(source.attempts, 10);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_save_dataset() {
        let (mock, log) = MockTransport::acking();
        let mut session = ready(mock);
        log.borrow_mut().written.clear();
        session.save_dataset("dut_3").unwrap();
        assert_eq!(
            log.borrow().written,
            vec!["MMEM:CDIR \"[USBDISK]:\"", "MMEM:STOR:SNP \"dut_3.s2p\";*OPC?"]
        );
    }

    #[test]
    fn test_save_failure() {
        let (mock, log) = MockTransport::scripted(vec![Some("1")], None);
        let mut session = ready(mock);
        let err = session.save_dataset("dut").unwrap_err();
        assert!(matches!(err, SessionError::SaveFailure { ref name, .. } if name == "dut"));
        assert_eq!(log.borrow().reads, 11);
    }

    #[test]
    fn test_identify() {
        let (mock, _log) = MockTransport::scripted(vec![Some("Keysight Technologies,N9917A")], None);
        let mut session = SessionController::new(Timing::immediate());
        session.attach(mock);
        assert_eq!(session.identify().unwrap(), "Keysight Technologies,N9917A");
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let (mock, log) = MockTransport::acking();
        let mut session = ready(mock);
        session.disconnect();
        assert!(log.borrow().closed);
        assert_eq!(session.state(), SessionState::Disconnected);
        session.disconnect();
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(matches!(
            session.identify(),
            Err(SessionError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_connect_rejects_bad_address() {
        let mut session: SessionController = SessionController::new(Timing::immediate());
        let options = OpenOptions {
            read_timeout: Duration::from_millis(10),
            serial_baud: 9600,
        };
        let err = session.connect("GPIB0::16::INSTR", &options).unwrap_err();
        assert!(matches!(err, SessionError::Connection { .. }));
        assert_eq!(session.state(), SessionState::Disconnected);
    }
}
