//! Result collector: N pre-sized slots, each filled exactly once.
//!
//! 到着順に関係なく `results[i]` は常に index `i` の結果になる。

use thiserror::Error;

use crate::domain::{Outcome, ResultSlot, WorkerId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollectError {
    #[error("result index {index} is out of range for {len} slots")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("result slot {index} was already filled")]
    AlreadyFilled { index: usize },

    #[error("{} result slots are still empty", .missing.len())]
    Incomplete { missing: Vec<usize> },
}

#[derive(Debug)]
pub struct ResultCollector<R> {
    slots: Vec<Option<ResultSlot<R>>>,
    filled: usize,
    next_order: u64,
}

impl<R> ResultCollector<R> {
    pub fn new(n: usize) -> Self {
        Self {
            slots: (0..n).map(|_| None).collect(),
            filled: 0,
            next_order: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn filled(&self) -> usize {
        self.filled
    }

    pub fn is_filled(&self, index: usize) -> bool {
        matches!(self.slots.get(index), Some(Some(_)))
    }

    /// Store an outcome reported by a worker; stamps the next completion order.
    pub fn record(
        &mut self,
        index: usize,
        outcome: Outcome<R>,
        worker: Option<WorkerId>,
    ) -> Result<u64, CollectError> {
        let order = self.next_order;
        self.put(index, outcome, Some(order), worker)?;
        self.next_order += 1;
        Ok(order)
    }

    /// Store a marker written by the dispatcher itself (Cancelled / Aborted).
    pub fn mark(&mut self, index: usize, outcome: Outcome<R>) -> Result<(), CollectError> {
        self.put(index, outcome, None, None)
    }

    fn put(
        &mut self,
        index: usize,
        outcome: Outcome<R>,
        completion_order: Option<u64>,
        worker: Option<WorkerId>,
    ) -> Result<(), CollectError> {
        let len = self.slots.len();
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(CollectError::IndexOutOfRange { index, len })?;
        if slot.is_some() {
            return Err(CollectError::AlreadyFilled { index });
        }
        *slot = Some(ResultSlot {
            index,
            outcome,
            completion_order,
            worker,
        });
        self.filled += 1;
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.filled == self.slots.len()
    }

    pub fn missing(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_none())
            .map(|(i, _)| i)
            .collect()
    }

    /// The ordered results, only once every slot is filled.
    pub fn finish(self) -> Result<Vec<ResultSlot<R>>, CollectError> {
        if !self.is_complete() {
            return Err(CollectError::Incomplete {
                missing: self.missing(),
            });
        }
        Ok(self.slots.into_iter().flatten().collect())
    }

    /// The ordered results, filling any empty slot with `fallback(index)`.
    ///
    /// Output length is always N.
    pub fn seal(self, mut fallback: impl FnMut(usize) -> Outcome<R>) -> Vec<ResultSlot<R>> {
        self.slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| ResultSlot {
                    index,
                    outcome: fallback(index),
                    completion_order: None,
                    worker: None,
                })
            })
            .collect()
    }
}
