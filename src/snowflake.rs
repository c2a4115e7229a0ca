//! Order number generator
//!
//! Snowflake layout: `timestamp_ms(41) | worker_id(10) | sequence(12)`.
//! One generator per process; ids are globally unique and monotonic per
//! worker. If the wall clock moves backwards by more than the tolerance the
//! generator refuses to produce ids instead of risking duplicates.

use std::sync::Mutex;

use crate::core_types::OrderNo;
use crate::error::SeckillError;

/// Custom epoch: 2024-01-01T00:00:00Z, keeps the 41-bit field good for ~69 years
const EPOCH_MS: u64 = 1_704_067_200_000;

const WORKER_BITS: u64 = 10;
const SEQUENCE_BITS: u64 = 12;
const MAX_WORKER_ID: u64 = (1 << WORKER_BITS) - 1;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

/// Largest backwards clock step absorbed by reusing the last timestamp
const REGRESSION_TOLERANCE_MS: u64 = 5;

struct GeneratorState {
    last_timestamp: u64,
    sequence: u64,
}

/// Process-wide order number generator
pub struct OrderNoGenerator {
    worker_id: u64,
    state: Mutex<GeneratorState>,
}

impl OrderNoGenerator {
    /// `worker_id` must fit in 10 bits
    pub fn new(worker_id: u64) -> Result<Self, SeckillError> {
        if worker_id > MAX_WORKER_ID {
            return Err(SeckillError::Internal(format!(
                "worker id {} exceeds {}",
                worker_id, MAX_WORKER_ID
            )));
        }
        Ok(Self {
            worker_id,
            state: Mutex::new(GeneratorState {
                last_timestamp: 0,
                sequence: 0,
            }),
        })
    }

    /// Generate the next order number
    pub fn next(&self) -> Result<OrderNo, SeckillError> {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|_| SeckillError::ClockRegression(u64::MAX))?
            .as_millis() as u64;
        self.next_at(now)
    }

    /// Core generation against a caller-provided clock reading
    fn next_at(&self, now_ms: u64) -> Result<OrderNo, SeckillError> {
        let mut state = self.state.lock().expect("generator mutex poisoned");

        let mut ts = now_ms;
        if ts < state.last_timestamp {
            let regression = state.last_timestamp - ts;
            if regression > REGRESSION_TOLERANCE_MS {
                return Err(SeckillError::ClockRegression(regression));
            }
            // Small skew: keep issuing against the last observed millisecond
            ts = state.last_timestamp;
        }

        if ts == state.last_timestamp {
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                // Sequence exhausted within this millisecond; move into the next
                ts += 1;
            }
        } else {
            state.sequence = 0;
        }
        state.last_timestamp = ts;

        let elapsed = ts.saturating_sub(EPOCH_MS);
        Ok((elapsed << (WORKER_BITS + SEQUENCE_BITS)) | (self.worker_id << SEQUENCE_BITS)
            | state.sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_worker_id_bounds() {
        assert!(OrderNoGenerator::new(1023).is_ok());
        assert!(OrderNoGenerator::new(1024).is_err());
    }

    #[test]
    fn test_ids_unique_and_monotonic() {
        let generator = OrderNoGenerator::new(1).unwrap();
        let mut seen = HashSet::new();
        let mut last = 0;
        for _ in 0..10_000 {
            let id = generator.next().unwrap();
            assert!(id > last, "ids must be strictly increasing");
            assert!(seen.insert(id));
            last = id;
        }
    }

    #[test]
    fn test_sequence_rollover_advances_timestamp() {
        let generator = OrderNoGenerator::new(1).unwrap();
        let base = EPOCH_MS + 1_000;
        let mut last = 0;
        // 4097 ids against a frozen clock must spill into the next millisecond
        for _ in 0..=(SEQUENCE_MASK + 1) {
            let id = generator.next_at(base).unwrap();
            assert!(id > last);
            last = id;
        }
        let ts_field = last >> (WORKER_BITS + SEQUENCE_BITS);
        assert_eq!(ts_field, base - EPOCH_MS + 1);
    }

    #[test]
    fn test_small_regression_absorbed() {
        let generator = OrderNoGenerator::new(1).unwrap();
        let base = EPOCH_MS + 5_000;
        let a = generator.next_at(base).unwrap();
        let b = generator.next_at(base - REGRESSION_TOLERANCE_MS).unwrap();
        assert!(b > a);
    }

    #[test]
    fn test_large_regression_rejected() {
        let generator = OrderNoGenerator::new(1).unwrap();
        let base = EPOCH_MS + 5_000;
        generator.next_at(base).unwrap();
        let err = generator.next_at(base - 6).unwrap_err();
        assert_eq!(err.code(), "CLOCK_REGRESSION");
        // A recovered clock resumes generation
        assert!(generator.next_at(base + 1).is_ok());
    }

    #[test]
    fn test_worker_id_embedded() {
        let generator = OrderNoGenerator::new(77).unwrap();
        let id = generator.next().unwrap();
        assert_eq!((id >> SEQUENCE_BITS) & MAX_WORKER_ID, 77);
    }
}
