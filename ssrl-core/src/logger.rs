//! Implementations of [`Logger`].
use crate::{
    record::{Record, RecordStorage, RecordValue},
    Env, Info, LogMode, Logger,
};
use anyhow::Result;
use std::collections::HashMap;

#[derive(Default)]
struct Accumulator {
    ret: f32,
    len: usize,
    storage: RecordStorage,
}

/// Accumulates episode returns and lengths for each [`LogMode`].
///
/// A finished trajectory is stored when the step info reports
/// [`Info::is_traj_done`]. [`Logger::write_log`] aggregates the stored
/// trajectories of the mode, prints them with `log::info!` and keeps the
/// aggregated record, available through [`EpisodeLogger::last_record`].
#[derive(Default)]
pub struct EpisodeLogger {
    accs: HashMap<LogMode, Accumulator>,
    last: HashMap<LogMode, Record>,
}

impl EpisodeLogger {
    /// Creates a logger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the record written by the last call of `write_log(mode)`.
    pub fn last_record(&self, mode: LogMode) -> Option<&Record> {
        self.last.get(&mode)
    }
}

impl<E: Env> Logger<E> for EpisodeLogger {
    fn step(&mut self, _obs: &E::Obs, reward: f32, _done: bool, info: &E::Info, mode: LogMode) {
        let acc = self.accs.entry(mode).or_default();
        acc.ret += reward;
        acc.len += 1;

        if info.is_traj_done() {
            acc.storage.store(Record::from_slice(&[
                (
                    format!("{}_return", mode),
                    RecordValue::Scalar(acc.ret),
                ),
                (
                    format!("{}_length", mode),
                    RecordValue::Scalar(acc.len as f32),
                ),
            ]));
            acc.ret = 0.0;
            acc.len = 0;
        }
    }

    fn write_log(&mut self, mode: LogMode) -> Result<()> {
        let acc = match self.accs.get_mut(&mode) {
            Some(acc) if !acc.storage.is_empty() => acc,
            _ => return Ok(()),
        };
        let n = acc.storage.len();
        let record = acc.storage.aggregate()?;

        let mut keys = record.keys().cloned().collect::<Vec<_>>();
        keys.sort();
        let line = keys
            .iter()
            .filter_map(|k| record.get_scalar(k).ok().map(|v| format!("{}: {:.3}", k, v)))
            .collect::<Vec<_>>()
            .join(", ");
        log::info!("[{}] {} trajectories, {}", mode, n, line);

        self.last.insert(mode, record);
        Ok(())
    }
}

/// A logger that discards everything.
#[derive(Default, Clone, Copy)]
pub struct NullLogger;

impl<E: Env> Logger<E> for NullLogger {
    fn step(&mut self, _obs: &E::Obs, _reward: f32, _done: bool, _info: &E::Info, _mode: LogMode) {}

    fn write_log(&mut self, _mode: LogMode) -> Result<()> {
        Ok(())
    }
}
