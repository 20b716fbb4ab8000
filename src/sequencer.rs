use std::ops::RangeInclusive;
use std::thread;

use tracing::info;

use crate::result::SessionError;
use crate::session::SessionController;
use crate::transport::Transport;

/// Calibration state reserved for time-domain reflectometry.
pub const TDR_STATE: i32 = -1;

/// Highest fine sub-band calibration state stored on the analyzer.
pub const DEFAULT_FINE_END: i32 = 30;

/// File name stored for calibration state `id`.
///
/// State 0 is the coarse single-segment sweep and keeps the bare base name;
/// every other state gets an `_<id>` suffix.
pub fn dataset_name(base: &str, id: i32) -> String {
    if id == 0 {
        base.to_owned()
    } else {
        format!("{}_{}", base, id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementPlan {
    /// Full band in one segment (state 0).
    Coarse,
    /// Contiguous sub-bands 1..=end.
    Fine { end: i32 },
    /// Calibration ids start..=end.
    Range { start: i32, end: i32 },
    /// Full range reflectometry state, saved under the bare base name.
    Tdr,
}

impl MeasurementPlan {
    pub fn ids(&self) -> RangeInclusive<i32> {
        match *self {
            MeasurementPlan::Coarse => 0..=0,
            MeasurementPlan::Fine { end } => 1..=end,
            MeasurementPlan::Range { start, end } => start..=end,
            MeasurementPlan::Tdr => TDR_STATE..=TDR_STATE,
        }
    }

    fn name_for(&self, base: &str, id: i32) -> String {
        match self {
            MeasurementPlan::Tdr => base.to_owned(),
            _ => dataset_name(base, id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedDataset {
    pub id: i32,
    pub name: String,
}

/// Drives one session through load, sweep and save for each calibration
/// state of a plan, strictly in ascending id order.
pub struct Sequencer<'a, T: Transport> {
    session: &'a mut SessionController<T>,
}

impl<'a, T: Transport> Sequencer<'a, T> {
    pub fn new(session: &'a mut SessionController<T>) -> Self {
        Sequencer { session }
    }

    pub fn run(&mut self, plan: MeasurementPlan, base: &str) -> Result<Vec<SavedDataset>, SessionError> {
        let ids = plan.ids();
        if ids.is_empty() {
            return Err(SessionError::InvalidRange {
                start: *ids.start(),
                end: *ids.end(),
            });
        }

        info!(?plan, base, "starting measurements");
        self.session.set_mode()?;

        let delay = self.session.timing().step_delay();
        let mut saved = Vec::new();
        for id in ids {
            self.session.load_calibration(id)?;
            thread::sleep(delay);
            self.session.trigger_sweep()?;
            thread::sleep(delay);

            let name = plan.name_for(base, id);
            self.session.save_dataset(&name)?;
            thread::sleep(delay);
            saved.push(SavedDataset { id, name });
        }
        info!(count = saved.len(), "measurements complete");
        Ok(saved)
    }

    /// Runs `load → sweep → save` for every id in `start..=end`.
    pub fn run_range(&mut self, start: i32, end: i32, base: &str) -> Result<Vec<SavedDataset>, SessionError> {
        self.run(MeasurementPlan::Range { start, end }, base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Timing;
    use crate::transport::mock::MockTransport;

    fn session(mock: MockTransport) -> SessionController<MockTransport> {
        let mut session = SessionController::new(Timing::immediate());
        session.attach(mock);
        session
    }

    fn cycle_starts(written: &[String]) -> Vec<String> {
        written
            .iter()
            .filter(|c| c.starts_with("MMEMory:LOAD") || c.starts_with("MMEM:STOR"))
            .cloned()
            .collect()
    }

    #[test]
    fn test_dataset_name() {
        assert_eq!(dataset_name("dut", 0), "dut");
        assert_eq!(dataset_name("dut", 7), "dut_7");
        assert_eq!(dataset_name("dut", -1), "dut_-1");
    }

    #[test]
    fn test_range_runs_each_id_once_in_order() {
        let (mock, log) = MockTransport::acking();
        let mut session = session(mock);
        let saved = Sequencer::new(&mut session).run_range(1, 5, "dut").unwrap();

        let names: Vec<&str> = saved.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["dut_1", "dut_2", "dut_3", "dut_4", "dut_5"]);

        let expected: Vec<String> = (1..=5)
            .flat_map(|id| {
                vec![
                    format!("MMEMory:LOAD:STATe \"CalState_{}.sta\";*OPC?", id),
                    format!("MMEM:STOR:SNP \"dut_{}.s2p\";*OPC?", id),
                ]
            })
            .collect();
        let written = log.borrow().written.clone();
        assert_eq!(cycle_starts(&written), expected);
        assert_eq!(written.iter().filter(|c| *c == "INIT:IMM;*OPC?").count(), 15);
        assert_eq!(written[0], "INST \"NA\";*OPC?");
    }

    #[test]
    fn test_coarse_saves_bare_name() {
        let (mock, log) = MockTransport::acking();
        let mut session = session(mock);
        let saved = Sequencer::new(&mut session)
            .run(MeasurementPlan::Coarse, "dut")
            .unwrap();
        assert_eq!(saved, vec![SavedDataset { id: 0, name: "dut".to_owned() }]);
        assert!(log
            .borrow()
            .written
            .contains(&"MMEM:STOR:SNP \"dut.s2p\";*OPC?".to_owned()));
    }

    #[test]
    fn test_tdr_plan() {
        let (mock, log) = MockTransport::acking();
        let mut session = session(mock);
        let saved = Sequencer::new(&mut session)
            .run(MeasurementPlan::Tdr, "tdr")
            .unwrap();
        assert_eq!(saved, vec![SavedDataset { id: -1, name: "tdr".to_owned() }]);
        assert!(log
            .borrow()
            .written
            .contains(&"MMEMory:LOAD:STATe \"CalState_-1.sta\";*OPC?".to_owned()));
    }

    #[test]
    fn test_empty_range_is_rejected() {
        let (mock, log) = MockTransport::acking();
        let mut session = session(mock);
        let err = Sequencer::new(&mut session).run_range(5, 1, "dut").unwrap_err();
        assert!(matches!(err, SessionError::InvalidRange { start: 5, end: 1 }));
        assert!(log.borrow().written.is_empty());
    }

    #[test]
    fn test_full_i32_range_fails_on_first_step() {
        // mode set acknowledged, first calibration load never is
        let (mock, log) = MockTransport::scripted(vec![Some("1")], None);
        let mut session = session(mock);
        let err = Sequencer::new(&mut session)
            .run_range(i32::MIN, i32::MAX, "dut")
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::CalibrationLoadFailure { id: i32::MIN, .. }
        ));
        assert!(log
            .borrow()
            .written
            .contains(&format!("MMEMory:LOAD:STATe \"CalState_{}.sta\";*OPC?", i32::MIN)));
    }

    #[test]
    fn test_failure_stops_the_run() {
        // mode, load 1, three sweeps, save 1, load 2, then silence
        let replies = vec![Some("1"); 7];
        let (mock, log) = MockTransport::scripted(replies, None);
        let mut session = session(mock);
        let err = Sequencer::new(&mut session).run_range(1, 3, "dut").unwrap_err();
        assert!(matches!(err, SessionError::SweepFailure { repetition: 1, .. }));
        let written = log.borrow().written.clone();
        assert!(!written.iter().any(|c| c.contains("CalState_3")));
        assert!(!written.iter().any(|c| c.contains("dut_2.s2p")));
    }
}
