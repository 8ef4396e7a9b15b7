//! Aggregation of a sequence of records.
use super::{Record, RecordValue};
use crate::error::SsrlError;
use std::collections::BTreeSet;

/// Stores records and reduces them into a single one.
///
/// Scalars with more than one observation are summarized with
/// `_min`, `_max`, `_mean` and `_median` suffixes; other value types keep
/// their most recent value.
#[derive(Debug, Default)]
pub struct RecordStorage {
    data: Vec<Record>,
}

fn min(vs: &[f32]) -> f32 {
    vs.iter().copied().fold(f32::INFINITY, f32::min)
}

fn max(vs: &[f32]) -> f32 {
    vs.iter().copied().fold(f32::NEG_INFINITY, f32::max)
}

fn mean(vs: &[f32]) -> f32 {
    vs.iter().sum::<f32>() / vs.len() as f32
}

fn median(mut vs: Vec<f32>) -> f32 {
    vs.sort_by(|x, y| x.total_cmp(y));
    vs[vs.len() / 2]
}

impl RecordStorage {
    /// Creates an empty storage.
    pub fn new() -> Self {
        Self { data: vec![] }
    }

    /// Stores a record.
    pub fn store(&mut self, record: Record) {
        self.data.push(record);
    }

    /// Returns the number of stored records.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn keys(&self) -> BTreeSet<String> {
        self.data
            .iter()
            .flat_map(|r| r.keys().cloned())
            .collect()
    }

    fn latest(&self, key: &str) -> Option<&RecordValue> {
        self.data.iter().rev().find_map(|r| r.get(key))
    }

    fn scalar(&self, key: &str) -> Result<Record, SsrlError> {
        let vs = self
            .data
            .iter()
            .filter_map(|r| r.get(key))
            .map(|v| match v {
                RecordValue::Scalar(v) => Ok(*v),
                _ => Err(SsrlError::RecordValueTypeError("Scalar".to_string())),
            })
            .collect::<Result<Vec<_>, _>>()?;

        if vs.len() == 1 {
            Ok(Record::from_scalar(key, vs[0]))
        } else {
            Ok(Record::from_slice(&[
                (format!("{}_min", key), RecordValue::Scalar(min(&vs))),
                (format!("{}_max", key), RecordValue::Scalar(max(&vs))),
                (format!("{}_mean", key), RecordValue::Scalar(mean(&vs))),
                (format!("{}_median", key), RecordValue::Scalar(median(vs))),
            ]))
        }
    }

    /// Aggregates all stored records and clears the storage.
    ///
    /// Returns an error when the same key holds a scalar in one record and
    /// another type in a different record.
    pub fn aggregate(&mut self) -> Result<Record, SsrlError> {
        let mut record = Record::empty();

        for key in self.keys().iter() {
            let r = match self.latest(key) {
                Some(RecordValue::Scalar(..)) => self.scalar(key)?,
                Some(value) => Record::from_slice(&[(key.clone(), value.clone())]),
                None => return Err(SsrlError::RecordKeyError(key.clone())),
            };
            record.merge_inplace(r);
        }

        self.data.clear();

        Ok(record)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_aggregate_scalars() {
        let mut storage = RecordStorage::new();
        for v in [3.0, 1.0, 2.0] {
            storage.store(Record::from_scalar("return", v));
        }
        storage.store(Record::from_scalar("length", 10.0));

        let record = storage.aggregate().unwrap();

        assert_eq!(record.get_scalar("return_min").unwrap(), 1.0);
        assert_eq!(record.get_scalar("return_max").unwrap(), 3.0);
        assert_eq!(record.get_scalar("return_mean").unwrap(), 2.0);
        assert_eq!(record.get_scalar("return_median").unwrap(), 2.0);
        assert_eq!(record.get_scalar("length").unwrap(), 10.0);
        assert!(storage.is_empty());
    }

    #[test]
    fn test_aggregate_keeps_latest_string() {
        let mut storage = RecordStorage::new();
        storage.store(Record::from_slice(&[("game", RecordValue::String("a".into()))]));
        storage.store(Record::from_slice(&[("game", RecordValue::String("b".into()))]));

        let record = storage.aggregate().unwrap();

        assert_eq!(record.get_string("game").unwrap(), "b");
    }

    #[test]
    fn test_aggregate_mixed_types_fails() {
        let mut storage = RecordStorage::new();
        storage.store(Record::from_slice(&[("x", RecordValue::String("a".into()))]));
        storage.store(Record::from_scalar("x", 1.0));

        assert!(storage.aggregate().is_err());
    }
}
