//! Records of named metric values.
use crate::error::SsrlError;
use std::collections::{hash_map::Keys, HashMap};

/// A value held by a [`Record`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordValue {
    /// Numeric metric such as a loss or a return.
    Scalar(f32),

    /// Text, for example the name of a game.
    String(String),
}

/// Named metric values produced by one call of an agent or a logger.
///
/// # Examples
///
/// ```rust
/// use ssrl_core::record::{Record, RecordValue};
///
/// let mut record = Record::from_scalar("loss", 0.5);
/// record.insert("neg_sim", RecordValue::Scalar(0.1));
/// let loss = record.get_scalar("loss").unwrap();
/// ```
#[derive(Debug, Clone, Default)]
pub struct Record(HashMap<String, RecordValue>);

impl Record {
    /// Creates an empty record.
    pub fn empty() -> Self {
        Self(HashMap::new())
    }

    /// Creates a record holding one scalar.
    pub fn from_scalar(name: impl Into<String>, value: f32) -> Self {
        Self(HashMap::from([(name.into(), RecordValue::Scalar(value))]))
    }

    /// Creates a record from key-value pairs.
    pub fn from_slice<K: Into<String> + Clone>(s: &[(K, RecordValue)]) -> Self {
        Self(
            s.iter()
                .map(|(k, v)| (k.clone().into(), v.clone()))
                .collect(),
        )
    }

    pub fn keys(&self) -> Keys<String, RecordValue> {
        self.0.keys()
    }

    pub fn insert(&mut self, k: impl Into<String>, v: RecordValue) {
        self.0.insert(k.into(), v);
    }

    pub fn get(&self, k: &str) -> Option<&RecordValue> {
        self.0.get(k)
    }

    /// Moves the entries of `record` into `self`, overwriting equal keys.
    pub fn merge_inplace(&mut self, record: Record) {
        self.0.extend(record.0);
    }

    /// Returns the scalar stored under `k`.
    pub fn get_scalar(&self, k: &str) -> Result<f32, SsrlError> {
        match self.0.get(k) {
            Some(RecordValue::Scalar(v)) => Ok(*v),
            Some(_) => Err(SsrlError::RecordValueTypeError("Scalar".to_string())),
            None => Err(SsrlError::RecordKeyError(k.to_string())),
        }
    }

    /// Returns the string stored under `k`.
    pub fn get_string(&self, k: &str) -> Result<String, SsrlError> {
        match self.0.get(k) {
            Some(RecordValue::String(s)) => Ok(s.clone()),
            Some(_) => Err(SsrlError::RecordValueTypeError("String".to_string())),
            None => Err(SsrlError::RecordKeyError(k.to_string())),
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_get_scalar_errors() {
        let mut record = Record::from_scalar("loss", 1.5);
        record.insert("game", RecordValue::String("pong".into()));

        assert_eq!(record.get_scalar("loss"), Ok(1.5));
        assert_eq!(
            record.get_scalar("game"),
            Err(SsrlError::RecordValueTypeError("Scalar".into()))
        );
        assert_eq!(
            record.get_scalar("missing"),
            Err(SsrlError::RecordKeyError("missing".into()))
        );
    }

    #[test]
    fn test_merge_overwrites() {
        let mut r = Record::from_slice(&[
            ("a", RecordValue::Scalar(1.0)),
            ("b", RecordValue::Scalar(2.0)),
        ]);
        r.merge_inplace(Record::from_scalar("b", 3.0));

        assert_eq!(r.len(), 2);
        assert_eq!(r.get_scalar("b").unwrap(), 3.0);
    }
}
