//! Pending-task backlog owned by the dispatcher.
//!
//! dispatcher のタスクだけが触るので Mutex は不要（メッセージパッシングで共有しない）。

use std::collections::VecDeque;
use std::sync::Arc;

use crate::domain::{ConfigurationError, Task};
use crate::rng::{StreamManager, check_stream_count};

/// Static block sizes: the first `n % p` workers get `ceil(n / p)` tasks,
/// the rest `floor(n / p)`. Returns an empty vec when `p == 0`.
pub fn block_sizes(n: usize, p: usize) -> Vec<usize> {
    if p == 0 {
        return Vec::new();
    }
    let base = n / p;
    let extra = n % p;
    (0..p).map(|i| base + usize::from(i < extra)).collect()
}

/// Ordered backlog of tasks that have not been handed to a worker.
///
/// Invariant: tasks are kept in ascending index order, including after `requeue`.
#[derive(Debug)]
pub struct TaskQueue<P> {
    pending: VecDeque<Task<P>>,
}

impl<P> TaskQueue<P> {
    /// Bind each argument to its index and its stream.
    ///
    /// Stream count is checked before anything is allocated.
    pub fn build(args: Vec<P>, streams: &StreamManager) -> Result<Self, ConfigurationError> {
        check_stream_count(args.len())?;
        let mut pending = VecDeque::with_capacity(args.len());
        for (index, payload) in args.into_iter().enumerate() {
            pending.push_back(Task::new(index, Arc::new(payload), streams.stream(index)?));
        }
        Ok(Self { pending })
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Lowest pending index, for the greedy (LoadBalanced) cursor.
    pub fn pop_next(&mut self) -> Option<Task<P>> {
        self.pending.pop_front()
    }

    /// Drain the backlog into `p` contiguous blocks sized by `block_sizes`.
    ///
    /// Blocks may be empty when `p` exceeds the backlog.
    pub fn partition(&mut self, p: usize) -> Vec<Vec<Task<P>>> {
        let sizes = block_sizes(self.pending.len(), p);
        let mut blocks = Vec::with_capacity(sizes.len());
        for size in sizes {
            blocks.push(self.pending.drain(..size).collect());
        }
        blocks
    }

    /// Put a task back, keeping index order.
    pub fn requeue(&mut self, task: Task<P>) {
        let at = self.pending.partition_point(|t| t.index() < task.index());
        self.pending.insert(at, task);
    }

    /// Empty the backlog, returning the indices that were still pending.
    pub fn drain_indices(&mut self) -> Vec<usize> {
        self.pending.drain(..).map(|t| t.index()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn queue(n: usize) -> TaskQueue<usize> {
        TaskQueue::build((0..n).collect(), &StreamManager::new(1)).unwrap()
    }

    #[rstest]
    #[case(10, 3, vec![4, 3, 3])]
    #[case(9, 3, vec![3, 3, 3])]
    #[case(2, 5, vec![1, 1, 0, 0, 0])]
    #[case(0, 2, vec![0, 0])]
    #[case(5, 0, vec![])]
    fn block_sizes_split_evenly(#[case] n: usize, #[case] p: usize, #[case] expected: Vec<usize>) {
        let sizes = block_sizes(n, p);
        assert_eq!(sizes, expected);
        assert_eq!(sizes.iter().sum::<usize>(), if p == 0 { 0 } else { n });
    }

    #[test]
    fn build_binds_payload_and_stream_to_index() {
        let mut q = queue(3);
        let t = q.pop_next().unwrap();
        assert_eq!(t.index(), 0);
        assert_eq!(*t.payload(), 0);
        assert_eq!(t.stream().index(), 0);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn every_task_carries_the_stream_of_its_own_index() {
        let manager = StreamManager::new(77);
        let mut q = TaskQueue::build((0..64).collect::<Vec<usize>>(), &manager).unwrap();
        while let Some(task) = q.pop_next() {
            let expected = manager.stream(task.index()).unwrap();
            assert_eq!(task.stream().index(), task.index());
            assert_eq!(task.stream(), &expected);
        }
    }

    #[test]
    fn partition_produces_contiguous_blocks() {
        let mut q = queue(10);
        let blocks = q.partition(3);
        let indices: Vec<Vec<usize>> = blocks
            .iter()
            .map(|b| b.iter().map(Task::index).collect())
            .collect();
        assert_eq!(
            indices,
            vec![vec![0, 1, 2, 3], vec![4, 5, 6], vec![7, 8, 9]]
        );
        assert!(q.is_empty());
    }

    #[test]
    fn requeue_keeps_index_order() {
        let mut q = queue(5);
        let t0 = q.pop_next().unwrap();
        let t1 = q.pop_next().unwrap();
        let t2 = q.pop_next().unwrap();

        q.requeue(t1);
        q.requeue(t0);
        assert_eq!(q.drain_indices(), vec![0, 1, 3, 4]);

        q.requeue(t2);
        assert_eq!(q.pop_next().map(|t| t.index()), Some(2));
    }

    #[test]
    fn empty_args_build_empty_queue() {
        let mut q = queue(0);
        assert!(q.is_empty());
        assert!(q.pop_next().is_none());
        assert!(q.partition(4).iter().all(Vec::is_empty));
    }
}
