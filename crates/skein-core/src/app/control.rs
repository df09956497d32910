//! RunControl - 実行中の run への外部からの操作
//!
//! - `cancel()`: 未開始のタスクを CANCELLED にして run を畳む
//! - `resize_pool(n)`: ワーカー数を変更（増やす / cordon して減らす）
//!
//! どちらも `watch` チャネルに値を置くだけで、反映は dispatcher のループが行う。

use std::sync::Arc;

use tokio::sync::watch;

use crate::domain::{ConfigurationError, MAX_WORKERS};

#[derive(Debug)]
struct Signals {
    cancel: watch::Sender<bool>,
    pool_size: watch::Sender<Option<usize>>,
}

/// Cloneable handle for one run. Clones share the same signals.
///
/// A control that has been cancelled stays cancelled; use a fresh one per run.
#[derive(Debug, Clone)]
pub struct RunControl {
    signals: Arc<Signals>,
}

impl RunControl {
    pub fn new() -> Self {
        let (cancel, _) = watch::channel(false);
        let (pool_size, _) = watch::channel(None);
        Self {
            signals: Arc::new(Signals { cancel, pool_size }),
        }
    }

    /// Stop assigning work. In-flight tasks finish; the rest become `CANCELLED`.
    pub fn cancel(&self) {
        // receiver がいなくても値は残る（send_replace は失敗しない）
        self.signals.cancel.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.signals.cancel.borrow()
    }

    /// Ask the dispatcher to run with `n` workers from now on.
    pub fn resize_pool(&self, n: usize) -> Result<(), ConfigurationError> {
        if n == 0 {
            return Err(ConfigurationError::EmptyPool);
        }
        if n > MAX_WORKERS {
            return Err(ConfigurationError::TooManyWorkers {
                requested: n,
                max: MAX_WORKERS,
            });
        }
        self.signals.pool_size.send_replace(Some(n));
        Ok(())
    }

    /// Last pool size requested through `resize_pool`.
    pub fn requested_pool_size(&self) -> Option<usize> {
        *self.signals.pool_size.borrow()
    }

    pub(crate) fn subscribe(&self) -> (watch::Receiver<bool>, watch::Receiver<Option<usize>>) {
        (
            self.signals.cancel.subscribe(),
            self.signals.pool_size.subscribe(),
        )
    }
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}
