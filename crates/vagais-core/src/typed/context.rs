//! TaskContext - Handler に渡される実行時情報とキャンセル通知

use tokio::sync::watch;

use crate::domain::{RecordId, SubjectId, UserId};

/// Cancellation is advisory: the handler decides where it is safe to stop.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

/// Sender half kept by the dispatcher, one per in-flight record.
#[derive(Debug)]
pub struct CancelSignal {
    tx: watch::Sender<bool>,
}

impl CancelToken {
    pub fn new() -> (CancelSignal, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (CancelSignal { tx }, CancelToken { rx })
    }

    /// 一度もキャンセルされない token（テストや直接呼び出し用）
    pub fn never() -> CancelToken {
        CancelToken::new().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// キャンセルされるまで待つ。signal 側が drop された場合は永遠に待つ
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let signalled = rx.wait_for(|cancelled| *cancelled).await.is_ok();
        if !signalled {
            std::future::pending::<()>().await;
        }
    }
}

impl CancelSignal {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// TaskContext は 1 回の attempt に渡される
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub record_id: RecordId,
    pub owner_id: UserId,
    pub subject_id: SubjectId,

    /// 1 始まり
    pub attempt: u32,

    pub cancel: CancelToken,
}

impl TaskContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
