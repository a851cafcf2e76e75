//! Waiting disciplines.
//!
//! A [`SuspendPoint`] decides where an execution context runs and what
//! happens at each of its wait points: the optional yield inside the rent
//! loop, and the hand-off channel's write and read-readiness waits.

use std::future::Future;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::channel::{HandoffChannel, WriteError};

/// Wait-point behaviour injected into every strategy loop.
pub trait SuspendPoint: Clone + Send + Sync + 'static {
    /// Start an execution context running `context`.
    fn spawn<F>(&self, context: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static;

    /// Cooperative suspension inside the loop body.
    fn suspend(&self) -> impl Future<Output = ()> + Send;

    /// Deposit `item` once the channel slot is free. A completed channel
    /// hands the item back.
    fn write<T: Send>(
        &self,
        channel: &HandoffChannel<T>,
        item: T,
    ) -> impl Future<Output = Result<(), WriteError<T>>> + Send;

    /// Wait for a pending item (`true`) or a drained, completed channel
    /// (`false`).
    fn wait_until_readable<T: Send>(
        &self,
        channel: &HandoffChannel<T>,
    ) -> impl Future<Output = bool> + Send;
}

/// Blocking discipline.
///
/// Each context owns a thread from the blocking pool. The suspend point does
/// nothing and channel waits park the thread, so the returned futures always
/// complete on first poll.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSuspend;

impl SuspendPoint for NoSuspend {
    fn spawn<F>(&self, context: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let handle = Handle::current();
        tokio::task::spawn_blocking(move || handle.block_on(context))
    }

    async fn suspend(&self) {}

    async fn write<T: Send>(
        &self,
        channel: &HandoffChannel<T>,
        item: T,
    ) -> Result<(), WriteError<T>> {
        channel.write_blocking(item)
    }

    async fn wait_until_readable<T: Send>(&self, channel: &HandoffChannel<T>) -> bool {
        channel.wait_until_readable_blocking()
    }
}

/// Suspending discipline.
///
/// Each context is a runtime task. The suspend point yields back to the
/// scheduler and channel waits suspend the task until woken.
#[derive(Debug, Clone, Copy, Default)]
pub struct YieldNow;

impl SuspendPoint for YieldNow {
    fn spawn<F>(&self, context: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        tokio::spawn(context)
    }

    async fn suspend(&self) {
        tokio::task::yield_now().await;
    }

    async fn write<T: Send>(
        &self,
        channel: &HandoffChannel<T>,
        item: T,
    ) -> Result<(), WriteError<T>> {
        channel.write(item).await
    }

    async fn wait_until_readable<T: Send>(&self, channel: &HandoffChannel<T>) -> bool {
        channel.wait_until_readable().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    async fn ping_pong<S: SuspendPoint>(suspend: S) -> Vec<u32> {
        let channel = Arc::new(HandoffChannel::<u32>::new());

        let reader = {
            let channel = channel.clone();
            let suspend = suspend.clone();
            suspend.clone().spawn(async move {
                let mut seen = Vec::new();
                while suspend.wait_until_readable(&*channel).await {
                    while let Some(v) = channel.try_read() {
                        seen.push(v);
                    }
                }
                seen
            })
        };

        let writer = {
            let channel = channel.clone();
            let suspend = suspend.clone();
            suspend.clone().spawn(async move {
                for k in 0..50u32 {
                    suspend.write(&*channel, k).await?;
                    suspend.suspend().await;
                }
                channel.complete();
                Ok::<_, crate::Error>(())
            })
        };

        writer.await.unwrap().unwrap();
        reader.await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_no_suspend_runs_on_blocking_threads() {
        let seen = ping_pong(NoSuspend).await;
        assert_eq!(seen, (0..50).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_yield_now_on_current_thread() {
        let seen = ping_pong(YieldNow).await;
        assert_eq!(seen, (0..50).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_no_suspend_on_current_thread_runtime() {
        // Blocking contexts live on their own threads, so a single-threaded
        // runtime still makes progress.
        let seen = ping_pong(NoSuspend).await;
        assert_eq!(seen.len(), 50);
    }
}
