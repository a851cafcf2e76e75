//! Strategy runner.

use std::hint::black_box;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::channel::HandoffChannel;
use crate::config::{Config, Discipline, Strategy};
use crate::error::{Error, Result};
use crate::harness::{NoProbe, NoSuspend, Probe, RunReport, SuspendPoint, YieldNow};
use crate::pool::{shared_pool, ArrayPool, Buffer, Element};
use crate::sync::SpinLock;

/// Per-context loop parameters.
#[derive(Debug, Clone, Copy)]
struct Workload {
    rental_size: usize,
    iterations: u64,
    clear: bool,
    scan: bool,
}

/// Benchmark harness for one element type.
///
/// Owns the pool every pooling strategy rents from: either the shared pool
/// for `T` or a private instance created with the configured limits.
pub struct Harness<T: Element> {
    config: Config,
    pool: Arc<ArrayPool<T>>,
}

impl<T: Element> Harness<T> {
    /// Validate `config` and select the pool it asks for.
    pub fn new(config: &Config) -> Result<Self> {
        let pool = if config.shared_pool {
            shared_pool::<T>()
        } else {
            Arc::new(ArrayPool::with_limits(
                config.max_array_length,
                config.max_arrays_per_bucket,
            ))
        };
        Self::with_pool(config, pool)
    }

    /// Validate `config` and run every pooling strategy against `pool`.
    pub fn with_pool(config: &Config, pool: Arc<ArrayPool<T>>) -> Result<Self> {
        config.validate()?;
        if config.rental_size > pool.max_array_length() {
            return Err(Error::InvalidConfig(format!(
                "rental size {} exceeds largest size class {}",
                config.rental_size,
                pool.max_array_length()
            )));
        }

        Ok(Self {
            config: config.clone(),
            pool,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Pool used by the pooling strategies.
    pub fn pool(&self) -> &Arc<ArrayPool<T>> {
        &self.pool
    }

    fn workload(&self) -> Workload {
        Workload {
            rental_size: self.config.rental_size,
            iterations: self.config.iterations,
            clear: self.config.clear,
            scan: self.config.scan,
        }
    }

    pub async fn serial(&self) -> Result<RunReport> {
        self.run(Strategy::Serial).await
    }

    pub async fn parallel(&self) -> Result<RunReport> {
        self.run(Strategy::Parallel).await
    }

    pub async fn producer_consumer(&self) -> Result<RunReport> {
        self.run(Strategy::ProducerConsumer).await
    }

    pub async fn lock_contention(&self) -> Result<RunReport> {
        self.run(Strategy::LockContention).await
    }

    /// Run `strategy` under the configured discipline.
    pub async fn run(&self, strategy: Strategy) -> Result<RunReport> {
        self.run_probed(strategy, Arc::new(NoProbe)).await
    }

    /// Run `strategy` under the configured discipline, reporting buffer
    /// movements to `probe`.
    pub async fn run_probed<P: Probe>(&self, strategy: Strategy, probe: Arc<P>) -> Result<RunReport> {
        match self.config.discipline {
            Discipline::Blocking => self.run_with(strategy, NoSuspend, probe).await,
            Discipline::Suspending => self.run_with(strategy, YieldNow, probe).await,
        }
    }

    /// Run `strategy` with an explicit suspend point.
    pub async fn run_with<S: SuspendPoint, P: Probe>(
        &self,
        strategy: Strategy,
        suspend: S,
        probe: Arc<P>,
    ) -> Result<RunReport> {
        info!(
            %strategy,
            element = std::any::type_name::<T>(),
            rental_size = self.config.rental_size,
            iterations = self.config.iterations,
            discipline = ?self.config.discipline,
            shared_pool = self.config.shared_pool,
            "starting run"
        );

        let start = Instant::now();
        let (contexts, operations) = match strategy {
            Strategy::Serial => self.run_serial(&suspend, &probe).await?,
            Strategy::Parallel => self.run_parallel(&suspend, &probe).await?,
            Strategy::ProducerConsumer => self.run_producer_consumer(&suspend, &probe).await?,
            Strategy::LockContention => self.run_lock_contention(&suspend).await?,
        };

        let report = RunReport {
            strategy,
            contexts,
            operations,
            elapsed: start.elapsed(),
            pool: strategy.uses_pool().then(|| self.pool.stats()),
        };
        info!("{}", report);
        Ok(report)
    }

    async fn run_serial<S: SuspendPoint, P: Probe>(
        &self,
        suspend: &S,
        probe: &Arc<P>,
    ) -> Result<(usize, u64)> {
        let context = rent_return_loop(
            self.pool.clone(),
            self.workload(),
            suspend.clone(),
            probe.clone(),
        );
        let operations = suspend.spawn(context).await??;
        Ok((1, operations))
    }

    async fn run_parallel<S: SuspendPoint, P: Probe>(
        &self,
        suspend: &S,
        probe: &Arc<P>,
    ) -> Result<(usize, u64)> {
        let contexts = self.config.parallelism();
        let handles: Vec<_> = (0..contexts)
            .map(|_| {
                suspend.spawn(rent_return_loop(
                    self.pool.clone(),
                    self.workload(),
                    suspend.clone(),
                    probe.clone(),
                ))
            })
            .collect();

        let mut operations = 0;
        for (i, handle) in handles.into_iter().enumerate() {
            operations += handle.await??;
            debug!(context = i, "parallel context finished");
        }
        Ok((contexts, operations))
    }

    async fn run_producer_consumer<S: SuspendPoint, P: Probe>(
        &self,
        suspend: &S,
        probe: &Arc<P>,
    ) -> Result<(usize, u64)> {
        let channel = Arc::new(HandoffChannel::new());
        let workload = self.workload();

        let consumer = suspend.spawn(consume(
            self.pool.clone(),
            channel.clone(),
            workload,
            suspend.clone(),
            probe.clone(),
        ));
        let producer = suspend.spawn(produce(
            self.pool.clone(),
            channel,
            workload,
            suspend.clone(),
            probe.clone(),
        ));

        // Join both before failing so neither context outlives the run. A
        // failed consumer makes the producer's write fail too, so its error
        // is reported first.
        let produced = producer.await;
        let consumed = consumer.await??;
        let produced = produced??;
        debug!(produced, consumed, "producer-consumer drained");
        Ok((2, produced))
    }

    async fn run_lock_contention<S: SuspendPoint>(&self, suspend: &S) -> Result<(usize, u64)> {
        let contexts = self.config.lock_contexts;
        let iterations = self.config.iterations;
        let lock = Arc::new(SpinLock::new());

        let handles: Vec<_> = (0..contexts)
            .map(|_| {
                let lock = lock.clone();
                suspend.spawn(async move {
                    for _ in 0..iterations {
                        lock.acquire().release();
                    }
                    iterations
                })
            })
            .collect();

        let mut operations = 0;
        for handle in handles {
            operations += handle.await?;
        }
        Ok((contexts, operations))
    }
}

/// Serial loop body: rent, optionally clear, suspend, optionally scan,
/// return.
async fn rent_return_loop<T: Element, S: SuspendPoint, P: Probe>(
    pool: Arc<ArrayPool<T>>,
    workload: Workload,
    suspend: S,
    probe: Arc<P>,
) -> Result<u64> {
    for _ in 0..workload.iterations {
        let mut buf = pool.rent(workload.rental_size);
        probe.on_rent(buf.id());
        if workload.clear {
            buf.clear();
        }
        suspend.suspend().await;
        if workload.scan {
            black_box(buf.scan());
        }
        probe.on_return(buf.id());
        pool.return_buffer(buf)?;
    }
    Ok(workload.iterations)
}

/// Completes the hand-off channel when dropped, including on unwind.
struct CompleteOnDrop<'a, T: Send>(&'a HandoffChannel<T>);

impl<T: Send> Drop for CompleteOnDrop<'_, T> {
    fn drop(&mut self) {
        self.0.complete();
    }
}

/// Rent and hand off `iterations` buffers, then complete the channel.
///
/// The channel is completed however the producer exits, so the consumer
/// never waits on a producer that is gone.
async fn produce<T: Element, S: SuspendPoint, P: Probe>(
    pool: Arc<ArrayPool<T>>,
    channel: Arc<HandoffChannel<Buffer<T>>>,
    workload: Workload,
    suspend: S,
    probe: Arc<P>,
) -> Result<u64> {
    let _complete = CompleteOnDrop(&*channel);
    for _ in 0..workload.iterations {
        let mut buf = pool.rent(workload.rental_size);
        probe.on_rent(buf.id());
        if workload.clear {
            buf.clear();
        }
        if workload.scan {
            black_box(buf.scan());
        }
        if let Err(rejected) = suspend.write(&*channel, buf).await {
            pool.return_buffer(rejected.into_inner())?;
            return Err(Error::ChannelCompleted);
        }
    }
    Ok(workload.iterations)
}

/// Drain the channel, returning every buffer to the pool.
///
/// If the consumer exits early the channel is completed, so a producer
/// blocked on a full slot errors out instead of waiting forever.
async fn consume<T: Element, S: SuspendPoint, P: Probe>(
    pool: Arc<ArrayPool<T>>,
    channel: Arc<HandoffChannel<Buffer<T>>>,
    workload: Workload,
    suspend: S,
    probe: Arc<P>,
) -> Result<u64> {
    let _complete = CompleteOnDrop(&*channel);
    let mut consumed = 0;
    loop {
        if !suspend.wait_until_readable(&*channel).await {
            probe.on_drained();
            return Ok(consumed);
        }
        while let Some(buf) = channel.try_read() {
            probe.on_handoff(buf.id());
            if workload.scan {
                black_box(buf.scan());
            }
            probe.on_return(buf.id());
            pool.return_buffer(buf)?;
            consumed += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::WriteError;
    use crate::types::BufferId;
    use parking_lot::Mutex;
    use std::future::Future;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::task::JoinHandle;
    use tokio::time::timeout;

    /// Harness-boundary timeout so a hang fails the test instead of the CI job.
    const RUN_TIMEOUT: Duration = Duration::from_secs(60);

    #[derive(Default)]
    struct Recorder {
        rented: Mutex<Vec<BufferId>>,
        returned: Mutex<Vec<BufferId>>,
        handed_off: Mutex<Vec<BufferId>>,
        drained: AtomicUsize,
    }

    impl Probe for Recorder {
        fn on_rent(&self, id: BufferId) {
            self.rented.lock().push(id);
        }

        fn on_return(&self, id: BufferId) {
            self.returned.lock().push(id);
        }

        fn on_handoff(&self, id: BufferId) {
            self.handed_off.lock().push(id);
        }

        fn on_drained(&self) {
            self.drained.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Tracks pool occupancy at every consumer read.
    struct OccupancyProbe {
        pool: Arc<ArrayPool<u8>>,
        max_outstanding: AtomicUsize,
    }

    impl Probe for OccupancyProbe {
        fn on_handoff(&self, _id: BufferId) {
            self.max_outstanding
                .fetch_max(self.pool.outstanding(), Ordering::SeqCst);
        }
    }

    /// Suspending discipline that counts how often a readiness wait reports
    /// a completed, drained channel.
    #[derive(Clone, Default)]
    struct CountingWaits {
        readable: Arc<AtomicUsize>,
        closed: Arc<AtomicUsize>,
    }

    impl SuspendPoint for CountingWaits {
        fn spawn<F>(&self, context: F) -> JoinHandle<F::Output>
        where
            F: Future + Send + 'static,
            F::Output: Send + 'static,
        {
            YieldNow.spawn(context)
        }

        async fn suspend(&self) {
            YieldNow.suspend().await
        }

        async fn write<T: Send>(
            &self,
            channel: &HandoffChannel<T>,
            item: T,
        ) -> std::result::Result<(), WriteError<T>> {
            channel.write(item).await
        }

        async fn wait_until_readable<T: Send>(&self, channel: &HandoffChannel<T>) -> bool {
            let readable = channel.wait_until_readable().await;
            let counter = if readable { &self.readable } else { &self.closed };
            counter.fetch_add(1, Ordering::SeqCst);
            readable
        }
    }

    /// Panics on the n-th rent or the n-th hand-off read.
    struct PanicAt {
        rent: Option<usize>,
        handoff: Option<usize>,
        rents: AtomicUsize,
        handoffs: AtomicUsize,
    }

    impl PanicAt {
        fn rent(n: usize) -> Self {
            Self {
                rent: Some(n),
                handoff: None,
                rents: AtomicUsize::new(0),
                handoffs: AtomicUsize::new(0),
            }
        }

        fn handoff(n: usize) -> Self {
            Self {
                rent: None,
                handoff: Some(n),
                rents: AtomicUsize::new(0),
                handoffs: AtomicUsize::new(0),
            }
        }
    }

    impl Probe for PanicAt {
        fn on_rent(&self, _id: BufferId) {
            let n = self.rents.fetch_add(1, Ordering::SeqCst) + 1;
            if Some(n) == self.rent {
                panic!("producer failed at rent {}", n);
            }
        }

        fn on_handoff(&self, _id: BufferId) {
            let n = self.handoffs.fetch_add(1, Ordering::SeqCst) + 1;
            if Some(n) == self.handoff {
                panic!("consumer failed at read {}", n);
            }
        }
    }

    fn config(strategy: Strategy, iterations: u64) -> Config {
        Config {
            strategy,
            iterations,
            workers: Some(4),
            lock_contexts: 8,
            ..Default::default()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_serial_scenario_counts_rents_and_returns() {
        let config = config(Strategy::Serial, 1000);
        let harness = Harness::<u8>::new(&config).unwrap();
        let probe = Arc::new(Recorder::default());

        let report = timeout(RUN_TIMEOUT, harness.run_probed(Strategy::Serial, probe.clone()))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.operations, 1000);
        assert_eq!(report.contexts, 1);
        assert_eq!(probe.rented.lock().len(), 1000);
        assert_eq!(probe.returned.lock().len(), 1000);

        let stats = harness.pool().stats();
        assert_eq!(stats.rents(), 1000);
        assert_eq!(stats.returns, 1000);
        assert_eq!(stats.outstanding, 0);
        // Serial reuse means a single allocation.
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_serial_rent_return_bijection() {
        let config = Config {
            clear: true,
            scan: true,
            discipline: Discipline::Suspending,
            ..config(Strategy::Serial, 500)
        };
        let harness = Harness::<u64>::new(&config).unwrap();
        let probe = Arc::new(Recorder::default());

        timeout(RUN_TIMEOUT, harness.run_probed(Strategy::Serial, probe.clone()))
            .await
            .unwrap()
            .unwrap();

        let mut rented = probe.rented.lock().clone();
        let mut returned = probe.returned.lock().clone();
        rented.sort();
        returned.sort();
        assert_eq!(rented.len(), 500);
        assert_eq!(rented, returned);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_both_disciplines() {
        for discipline in [Discipline::Blocking, Discipline::Suspending] {
            let config = Config {
                discipline,
                scan: true,
                ..config(Strategy::Parallel, 2000)
            };
            let harness = Harness::<i32>::new(&config).unwrap();

            let report = timeout(RUN_TIMEOUT, harness.parallel()).await.unwrap().unwrap();

            assert_eq!(report.contexts, 4);
            assert_eq!(report.operations, 8000);
            let stats = report.pool.unwrap();
            assert_eq!(stats.returns, 8000);
            assert_eq!(stats.outstanding, 0);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_no_double_issue() {
        #[derive(Default)]
        struct LiveSet {
            live: Mutex<rustc_hash::FxHashSet<BufferId>>,
            violations: AtomicUsize,
        }

        impl Probe for LiveSet {
            fn on_rent(&self, id: BufferId) {
                if !self.live.lock().insert(id) {
                    self.violations.fetch_add(1, Ordering::SeqCst);
                }
            }

            fn on_return(&self, id: BufferId) {
                self.live.lock().remove(&id);
            }
        }

        let config = Config {
            discipline: Discipline::Suspending,
            ..config(Strategy::Parallel, 2000)
        };
        let harness = Harness::<u8>::new(&config).unwrap();
        let probe = Arc::new(LiveSet::default());

        timeout(RUN_TIMEOUT, harness.run_probed(Strategy::Parallel, probe.clone()))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(probe.violations.load(Ordering::SeqCst), 0);
        assert!(probe.live.lock().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_producer_consumer_scenario_order_and_drain() {
        let config = Config {
            discipline: Discipline::Suspending,
            ..config(Strategy::ProducerConsumer, 5)
        };
        let harness = Harness::<u8>::new(&config).unwrap();
        let probe = Arc::new(Recorder::default());
        let waits = CountingWaits::default();

        let report = timeout(
            RUN_TIMEOUT,
            harness.run_with(Strategy::ProducerConsumer, waits.clone(), probe.clone()),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(report.operations, 5);
        assert_eq!(report.contexts, 2);
        assert_eq!(*probe.rented.lock(), *probe.handed_off.lock());
        assert_eq!(probe.handed_off.lock().len(), 5);
        assert_eq!(probe.returned.lock().len(), 5);
        // Every item was seen as readable before the single closing wait.
        assert_eq!(waits.closed.load(Ordering::SeqCst), 1);
        let readable = waits.readable.load(Ordering::SeqCst);
        assert!((1..=5).contains(&readable));
        assert_eq!(probe.drained.load(Ordering::SeqCst), 1);
        assert_eq!(harness.pool().outstanding(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_producer_consumer_backpressure_bound() {
        for discipline in [Discipline::Blocking, Discipline::Suspending] {
            let config = Config {
                discipline,
                clear: true,
                scan: true,
                ..config(Strategy::ProducerConsumer, 3000)
            };
            let pool = Arc::new(ArrayPool::<u8>::new());
            let harness = Harness::with_pool(&config, pool.clone()).unwrap();
            let probe = Arc::new(OccupancyProbe {
                pool: pool.clone(),
                max_outstanding: AtomicUsize::new(0),
            });

            timeout(
                RUN_TIMEOUT,
                harness.run_probed(Strategy::ProducerConsumer, probe.clone()),
            )
            .await
            .unwrap()
            .unwrap();

            // Producer's next buffer, the slot, and the consumer's buffer.
            assert!(probe.max_outstanding.load(Ordering::SeqCst) <= 3);
            assert_eq!(pool.outstanding(), 0);
            assert_eq!(pool.stats().returns, 3000);
        }
    }

    #[tokio::test]
    async fn test_producer_consumer_on_current_thread() {
        let config = Config {
            discipline: Discipline::Suspending,
            ..config(Strategy::ProducerConsumer, 200)
        };
        let harness = Harness::<String>::new(&config).unwrap();
        let report = timeout(RUN_TIMEOUT, harness.producer_consumer())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.operations, 200);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_lock_contention() {
        for discipline in [Discipline::Blocking, Discipline::Suspending] {
            let config = Config {
                discipline,
                ..config(Strategy::LockContention, 5000)
            };
            let harness = Harness::<u8>::new(&config).unwrap();
            let report = timeout(RUN_TIMEOUT, harness.lock_contention())
                .await
                .unwrap()
                .unwrap();

            assert_eq!(report.contexts, 8);
            assert_eq!(report.operations, 40_000);
            assert!(report.pool.is_none());
            assert_eq!(harness.pool().stats().rents(), 0);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_injected_pool_is_used() {
        let config = config(Strategy::Serial, 10);
        let pool = Arc::new(ArrayPool::<u8>::new());
        let harness = Harness::with_pool(&config, pool.clone()).unwrap();

        harness.serial().await.unwrap();
        assert_eq!(pool.stats().returns, 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shared_pool_selected() {
        let config = Config {
            shared_pool: true,
            ..config(Strategy::Serial, 10)
        };
        let harness = Harness::<f32>::new(&config).unwrap();
        assert!(Arc::ptr_eq(harness.pool(), &shared_pool::<f32>()));

        harness.serial().await.unwrap();
    }

    #[test]
    fn test_rental_size_beyond_largest_class_rejected() {
        let config = Config {
            rental_size: 4096,
            max_array_length: 1024,
            ..Default::default()
        };
        assert!(matches!(
            Harness::<u8>::new(&config),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_invalid_config_rejected_before_run() {
        let config = Config {
            iterations: 0,
            ..Default::default()
        };
        assert!(Harness::<u8>::new(&config).is_err());
    }

    #[test]
    fn test_producer_panic_fails_run_and_releases_consumer() {
        for discipline in [Discipline::Blocking, Discipline::Suspending] {
            let rt = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .unwrap();
            let config = Config {
                discipline,
                ..config(Strategy::ProducerConsumer, 100)
            };
            let harness = Harness::<u8>::new(&config).unwrap();

            let result = rt.block_on(async {
                timeout(
                    RUN_TIMEOUT,
                    harness.run_probed(Strategy::ProducerConsumer, Arc::new(PanicAt::rent(3))),
                )
                .await
            });
            assert!(matches!(result, Ok(Err(Error::ContextFailed(_)))));

            // No context is left parked on the channel.
            let start = Instant::now();
            rt.shutdown_timeout(Duration::from_secs(5));
            assert!(start.elapsed() < Duration::from_secs(2));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_consumer_panic_fails_run() {
        for discipline in [Discipline::Blocking, Discipline::Suspending] {
            let config = Config {
                discipline,
                ..config(Strategy::ProducerConsumer, 100)
            };
            let harness = Harness::<u8>::new(&config).unwrap();

            let result = timeout(
                RUN_TIMEOUT,
                harness.run_probed(Strategy::ProducerConsumer, Arc::new(PanicAt::handoff(3))),
            )
            .await
            .unwrap();
            assert!(matches!(result, Err(Error::ContextFailed(_))));
        }
    }

    #[tokio::test]
    async fn test_rejected_write_returns_buffer_to_pool() {
        let workload = Workload {
            rental_size: 64,
            iterations: 10,
            clear: false,
            scan: false,
        };

        let pool = Arc::new(ArrayPool::<u8>::new());
        let channel = Arc::new(HandoffChannel::new());
        channel.complete();
        let result = produce(pool.clone(), channel, workload, YieldNow, Arc::new(NoProbe)).await;
        assert!(matches!(result, Err(Error::ChannelCompleted)));
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.stats().returns, 1);

        let channel = Arc::new(HandoffChannel::new());
        channel.complete();
        let result = produce(pool.clone(), channel, workload, NoSuspend, Arc::new(NoProbe)).await;
        assert!(matches!(result, Err(Error::ChannelCompleted)));
        assert_eq!(pool.outstanding(), 0);
    }
}
