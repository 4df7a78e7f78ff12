use super::StepReport;
use crate::{
    error::WatcherResult,
    lock::{DistributedLock, LockHandle},
};
use futures_util::FutureExt;
use std::{
    any::Any, panic::AssertUnwindSafe, pin::pin, sync::Arc, time::Duration,
};
use tokio::time::{Instant, interval_at, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Cross-instance guard around each step of one engine.
#[derive(Clone)]
pub struct StepLock {
    pub lock: Arc<dyn DistributedLock>,
    pub resource: String,
    pub wait: Duration,
}

/// Runs `step` every `interval` until `cancel` fires.
///
/// A step that fails or panics is logged and the loop carries on with the
/// next tick. When a step reports a backlog the next one starts right away.
/// Cancellation is only observed between steps, so an in-flight step always
/// finishes its current unit of work.
pub async fn run_periodic<R, F, Fut>(
    name: &'static str,
    interval: Duration,
    cancel: CancellationToken,
    lock: Option<StepLock>,
    mut step: F,
) where
    R: StepReport,
    F: FnMut() -> Fut,
    Fut: Future<Output = WatcherResult<R>>,
{
    info!(engine = name, ?interval, locked = lock.is_some(), "engine started");
    while !cancel.is_cancelled() {
        let report = guarded_step(name, lock.as_ref(), step()).await;
        if report.is_some_and(|r| r.has_backlog()) {
            tokio::task::yield_now().await;
            continue;
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(interval) => {}
        }
    }
    info!(engine = name, "engine stopped");
}

async fn guarded_step<R, Fut>(
    name: &'static str,
    lock: Option<&StepLock>,
    fut: Fut,
) -> Option<R>
where
    R: StepReport,
    Fut: Future<Output = WatcherResult<R>>,
{
    let handle = match lock {
        Some(l) => match l.lock.acquire(&l.resource, l.wait).await {
            Ok(Some(h)) => Some(h),
            Ok(None) => {
                debug!(engine = name, resource = %l.resource, "lock busy");
                return None;
            }
            Err(e) => {
                warn!(engine = name, error = %e, "lock unavailable");
                return None;
            }
        },
        None => None,
    };

    let fut = AssertUnwindSafe(fut).catch_unwind();
    let outcome = match (lock, &handle) {
        (Some(l), Some(h)) => keep_alive(name, l, h, fut).await,
        _ => fut.await,
    };

    if let (Some(l), Some(h)) = (lock, handle) {
        if let Err(e) = l.lock.release(&h).await {
            warn!(engine = name, error = %e, "lock release failed");
        }
    }

    match outcome {
        Ok(Ok(report)) => {
            if report.is_quiet() {
                debug!(engine = name, ?report, "step done");
            } else {
                info!(engine = name, ?report, "step done");
            }
            Some(report)
        }
        Ok(Err(e)) => {
            warn!(engine = name, error = %e, "step failed");
            None
        }
        Err(payload) => {
            error!(
                engine = name,
                panic = panic_message(payload.as_ref()),
                "step panicked"
            );
            None
        }
    }
}

/// Drives `fut` to completion, extending the lock every third of its ttl.
/// A lost lock is logged; the step still runs to the end.
async fn keep_alive<Fut: Future>(
    name: &'static str,
    lock: &StepLock,
    handle: &LockHandle,
    fut: Fut,
) -> Fut::Output {
    let period = (lock.lock.ttl() / 3).max(Duration::from_millis(1));
    let mut renew = interval_at(Instant::now() + period, period);
    let mut fut = pin!(fut);
    loop {
        tokio::select! {
            biased;
            out = &mut fut => return out,
            _ = renew.tick() => match lock.lock.extend(handle).await {
                Ok(true) => {}
                Ok(false) => warn!(
                    engine = name,
                    resource = %lock.resource,
                    "lock lost while the step was running"
                ),
                Err(e) => {
                    warn!(engine = name, error = %e, "lock extend failed")
                }
            },
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::{RpcError, WatcherError},
        lock::LocalLock,
    };
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Tick {
        backlog: bool,
    }

    impl StepReport for Tick {
        fn is_quiet(&self) -> bool {
            true
        }

        fn has_backlog(&self) -> bool {
            self.backlog
        }
    }

    fn counting(
        count: Arc<AtomicUsize>,
    ) -> impl FnMut() -> std::future::Ready<WatcherResult<Tick>> {
        move || {
            count.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Ok(Tick { backlog: false }))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_every_interval_until_cancelled() {
        let count = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_periodic(
            "test",
            Duration::from_secs(1),
            cancel.clone(),
            None,
            counting(count.clone()),
        ));

        sleep(Duration::from_millis(3_500)).await;
        cancel.cancel();
        task.await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 4);

        sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_survives_errors_and_panics() {
        let count = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let step = {
            let count = count.clone();
            move || {
                let n = count.fetch_add(1, Ordering::SeqCst);
                async move {
                    match n {
                        0 => Err(WatcherError::rpc("getMasterchainInfo")(
                            RpcError::Timeout(Duration::from_secs(30)),
                        )),
                        1 => panic!("step blew up"),
                        _ => Ok(Tick { backlog: false }),
                    }
                }
            }
        };
        let task = tokio::spawn(run_periodic(
            "test",
            Duration::from_secs(1),
            cancel.clone(),
            None,
            step,
        ));

        sleep(Duration::from_millis(2_500)).await;
        cancel.cancel();
        task.await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backlog_skips_the_sleep() {
        let count = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let step = {
            let count = count.clone();
            move || {
                let n = count.fetch_add(1, Ordering::SeqCst) + 1;
                std::future::ready(Ok(Tick { backlog: n < 3 }))
            }
        };
        let task = tokio::spawn(run_periodic(
            "test",
            Duration::from_secs(10),
            cancel.clone(),
            None,
            step,
        ));

        sleep(Duration::from_millis(500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_lock_skips_the_tick() {
        let count = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let local = Arc::new(LocalLock::new(Duration::from_secs(60)));
        let other_owner = local
            .acquire("sync", Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        let step_lock = StepLock {
            lock: local.clone(),
            resource: "sync".into(),
            wait: Duration::ZERO,
        };
        let task = tokio::spawn(run_periodic(
            "test",
            Duration::from_secs(1),
            cancel.clone(),
            Some(step_lock),
            counting(count.clone()),
        ));

        sleep(Duration::from_millis(2_500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        local.release(&other_owner).await.unwrap();
        sleep(Duration::from_secs(2)).await;
        assert!(count.load(Ordering::SeqCst) >= 1);
        // released after every step
        assert!(
            local.acquire("sync", Duration::ZERO).await.unwrap().is_some()
        );

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_held_through_a_step_longer_than_its_ttl() {
        let cancel = CancellationToken::new();
        let local = Arc::new(LocalLock::new(Duration::from_millis(90)));
        let contended = Arc::new(AtomicBool::new(false));
        let step = {
            let local = local.clone();
            let contended = contended.clone();
            move || {
                let local = local.clone();
                let contended = contended.clone();
                async move {
                    for _ in 0..10 {
                        sleep(Duration::from_millis(100)).await;
                        let rival =
                            local.acquire("process", Duration::ZERO).await?;
                        if rival.is_some() {
                            contended.store(true, Ordering::SeqCst);
                        }
                    }
                    Ok::<_, WatcherError>(Tick { backlog: false })
                }
            }
        };
        let step_lock = StepLock {
            lock: local.clone(),
            resource: "process".into(),
            wait: Duration::ZERO,
        };
        let task = tokio::spawn(run_periodic(
            "test",
            Duration::from_secs(3_600),
            cancel.clone(),
            Some(step_lock),
            step,
        ));

        sleep(Duration::from_secs(2)).await;
        assert!(!contended.load(Ordering::SeqCst));
        assert!(
            local
                .acquire("process", Duration::ZERO)
                .await
                .unwrap()
                .is_some()
        );

        cancel.cancel();
        task.await.unwrap();
    }
}
