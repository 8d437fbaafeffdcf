//! Sequence-numbered execution of host commands.
use std::collections::BTreeMap;

use log::debug;
use serde_json::Value;

use crate::error::{Error, Result};

/// Releases items in strictly increasing sequence order, starting at 1.
/// Items that arrive early wait until every lower number has been released.
#[derive(Debug)]
pub struct OrderedExecutor<T> {
    next: u64,
    waiting: BTreeMap<u64, T>,
}

impl<T> Default for OrderedExecutor<T> {
    fn default() -> Self {
        Self {
            next: 1,
            waiting: BTreeMap::new(),
        }
    }
}

impl<T> OrderedExecutor<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// The sequence number that will be released next.
    pub fn next_seq(&self) -> u64 {
        self.next
    }

    pub fn pending(&self) -> usize {
        self.waiting.len()
    }

    /// Reads a sequence tag as sent by the host. Tags must be positive
    /// integers; JSON floats are accepted when they are integral.
    pub fn parse_seq(value: &Value) -> Result<u64> {
        let seq = match value {
            Value::Number(n) => n.as_u64().or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && *f >= 1.0 && *f <= 2f64.powi(53))
                    .map(|f| f as u64)
            }),
            _ => None,
        };
        match seq {
            Some(seq) if seq > 0 => Ok(seq),
            _ => Err(Error::InvalidSequence(value.to_string())),
        }
    }

    /// Queues `item` under `seq` and returns every item that is now ready, in
    /// order. The executor's state is final before the caller applies them, so
    /// a failing item cannot leave the queue half-updated.
    pub fn submit(&mut self, seq: u64, item: T) -> Result<Vec<T>> {
        if seq == 0 {
            return Err(Error::InvalidSequence(seq.to_string()));
        }
        if seq < self.next || self.waiting.contains_key(&seq) {
            return Err(Error::DuplicateSequence(seq));
        }
        self.waiting.insert(seq, item);

        let mut ready = Vec::new();
        while let Some(item) = self.waiting.remove(&self.next) {
            ready.push(item);
            self.next += 1;
        }
        if !self.waiting.is_empty() {
            debug!(
                "{} command(s) waiting for sequence number {}",
                self.waiting.len(),
                self.next
            );
        }
        Ok(ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_out_of_order_arrival_runs_in_order() {
        let mut executor = OrderedExecutor::new();
        let mut ran = Vec::new();
        for seq in [2, 1, 3] {
            ran.extend(executor.submit(seq, seq).unwrap());
        }
        assert_eq!(ran, vec![1, 2, 3]);
        assert_eq!(executor.next_seq(), 4);
        assert_eq!(executor.pending(), 0);
    }

    #[test]
    fn test_early_items_wait() {
        let mut executor = OrderedExecutor::new();
        assert!(executor.submit(3, "c").unwrap().is_empty());
        assert!(executor.submit(2, "b").unwrap().is_empty());
        assert_eq!(executor.pending(), 2);
        assert_eq!(executor.submit(1, "a").unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_duplicates_are_protocol_errors() {
        let mut executor = OrderedExecutor::new();
        executor.submit(1, ()).unwrap();
        assert!(matches!(executor.submit(1, ()), Err(Error::DuplicateSequence(1))));
        executor.submit(3, ()).unwrap();
        assert!(matches!(executor.submit(3, ()), Err(Error::DuplicateSequence(3))));
        assert!(matches!(executor.submit(0, ()), Err(Error::InvalidSequence(_))));
    }

    #[test]
    fn test_parse_seq() {
        type Exec = OrderedExecutor<()>;
        assert_eq!(Exec::parse_seq(&json!(7)).unwrap(), 7);
        assert_eq!(Exec::parse_seq(&json!(7.0)).unwrap(), 7);
        for bad in [json!(0), json!(-2), json!(1.5), json!("3"), json!(null)] {
            assert!(
                matches!(Exec::parse_seq(&bad), Err(Error::InvalidSequence(_))),
                "{bad} accepted"
            );
        }
    }
}
