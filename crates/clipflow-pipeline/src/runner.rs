//! Worker runner
//!
//! Drives queue consumers: each pipeline gets a claim loop over its
//! `{main, retry}` pair with a bounded prefetch window, and a policy that
//! routes failures. `Transient` failures republish to the retry queue with
//! an incremented count until the budget is spent; everything else, and
//! anything past the budget, goes to the dead-letter queue, which a
//! monitor drains by logging and acking.
//!
//! Shutdown: `WorkerPool::shutdown` stops claiming, then waits for every
//! in-flight delivery to ack or nack before returning.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use clipflow_bus::{Delivery, WorkBus};
use clipflow_core::models::job::{queues, JobEnvelope, JobPayload};
use clipflow_core::AppError;

#[derive(Clone)]
pub struct RunnerConfig {
    /// In-flight window per consumer; bounds disk and index pressure.
    pub prefetch: usize,
    /// Transient failures beyond this count dead-letter the message.
    pub max_retries: u32,
    pub poll_interval: Duration,
}

impl RunnerConfig {
    pub fn new(prefetch: usize, max_retries: u32, poll_interval: Duration) -> Self {
        Self {
            prefetch,
            max_retries,
            poll_interval,
        }
    }
}

/// One pipeline's message handler.
#[async_trait]
pub trait JobHandler<P: JobPayload>: Send + Sync {
    async fn handle(&self, payload: P) -> Result<(), AppError>;
}

/// Spawns and owns the consumer tasks of one process.
pub struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerPool {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            handles: Vec::new(),
        }
    }

    /// Consume `P`'s main and retry queues with `handler`.
    pub fn spawn_consumer<P, H>(&mut self, bus: Arc<dyn WorkBus>, handler: Arc<H>, config: RunnerConfig)
    where
        P: JobPayload + Clone + Send + 'static,
        H: JobHandler<P> + 'static,
    {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            let main_queue = P::queue();
            let retry_queue = queues::retry(main_queue);
            let semaphore = Arc::new(Semaphore::new(config.prefetch));
            tracing::info!(
                queue = %main_queue,
                prefetch = config.prefetch,
                "Queue consumer started"
            );

            loop {
                if *shutdown_rx.borrow() {
                    break;
                }
                let permit = semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .expect("consumer semaphore closed");

                match bus.claim(&[main_queue, retry_queue.as_str()]).await {
                    Ok(Some(delivery)) => {
                        let bus = bus.clone();
                        let handler = handler.clone();
                        let config = config.clone();
                        tokio::spawn(async move {
                            let _permit = permit;
                            process_delivery::<P, H>(bus, handler, delivery, &config).await;
                        });
                    }
                    Ok(None) => {
                        drop(permit);
                        tokio::select! {
                            _ = sleep(config.poll_interval) => {}
                            _ = shutdown_rx.changed() => {}
                        }
                    }
                    Err(err) => {
                        drop(permit);
                        tracing::error!(queue = %main_queue, error = %err, "Failed to claim from queue");
                        tokio::select! {
                            _ = sleep(config.poll_interval) => {}
                            _ = shutdown_rx.changed() => {}
                        }
                    }
                }
            }

            // Drain: every spawned delivery task holds a permit.
            let _ = semaphore.acquire_many(config.prefetch as u32).await;
            tracing::info!(queue = %main_queue, "Queue consumer stopped");
        });
        self.handles.push(handle);
    }

    /// Drain a dead-letter queue: log each message for manual intervention
    /// and ack it.
    pub fn spawn_dlq_monitor(
        &mut self,
        bus: Arc<dyn WorkBus>,
        main_queue: &'static str,
        poll_interval: Duration,
    ) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            let dlq = queues::dlq(main_queue);
            loop {
                if *shutdown_rx.borrow() {
                    break;
                }
                match bus.claim(&[dlq.as_str()]).await {
                    Ok(Some(delivery)) => {
                        tracing::error!(
                            queue = %dlq,
                            delivery_id = %delivery.id,
                            envelope = %delivery.envelope,
                            "Dead-lettered message requires manual intervention"
                        );
                        if let Err(err) = bus.ack(delivery.id).await {
                            tracing::error!(queue = %dlq, error = %err, "Failed to ack DLQ message");
                        }
                    }
                    Ok(None) => {
                        tokio::select! {
                            _ = sleep(poll_interval) => {}
                            _ = shutdown_rx.changed() => {}
                        }
                    }
                    Err(err) => {
                        tracing::error!(queue = %dlq, error = %err, "Failed to claim from DLQ");
                        tokio::select! {
                            _ = sleep(poll_interval) => {}
                            _ = shutdown_rx.changed() => {}
                        }
                    }
                }
            }
        });
        self.handles.push(handle);
    }

    /// Stop claiming, drain in-flight deliveries, and join every consumer.
    pub async fn shutdown(self) {
        tracing::info!("Worker pool shutting down");
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
        tracing::info!("Worker pool stopped");
    }
}

async fn process_delivery<P, H>(
    bus: Arc<dyn WorkBus>,
    handler: Arc<H>,
    delivery: Delivery,
    config: &RunnerConfig,
) where
    P: JobPayload + Clone + Send,
    H: JobHandler<P>,
{
    let main_queue = P::queue();
    let envelope = match JobEnvelope::<P>::from_value(delivery.envelope.clone()) {
        Ok(envelope) => envelope,
        Err(err) => {
            // Undecodable payloads can never succeed; dead-letter as-is.
            tracing::error!(
                queue = %delivery.queue,
                delivery_id = %delivery.id,
                error = %err,
                "Failed to decode job envelope, moving to DLQ"
            );
            dead_letter(&bus, main_queue, delivery.envelope.clone()).await;
            ack(&bus, &delivery).await;
            return;
        }
    };

    match handler.handle(envelope.payload.clone()).await {
        Ok(()) => {
            ack(&bus, &delivery).await;
        }
        Err(err) if err.is_transient() && envelope.retry_count < config.max_retries => {
            let retried = envelope.retried();
            tracing::warn!(
                queue = %delivery.queue,
                retry_count = retried.retry_count,
                error = %err,
                "Job failed, scheduling retry"
            );
            match retried.to_value() {
                Ok(value) => {
                    let retry_queue = queues::retry(main_queue);
                    if bus.publish(&retry_queue, value, P::priority()).await.is_ok() {
                        ack(&bus, &delivery).await;
                    } else {
                        // Could not hand off; let the bus redeliver the original.
                        let _ = bus.nack(delivery.id).await;
                    }
                }
                Err(encode_err) => {
                    tracing::error!(error = %encode_err, "Failed to re-encode retry envelope");
                    let _ = bus.nack(delivery.id).await;
                }
            }
        }
        Err(err) => {
            tracing::error!(
                queue = %delivery.queue,
                retry_count = envelope.retry_count,
                error = %err,
                transient = err.is_transient(),
                "Job failed terminally, moving to DLQ"
            );
            if let Ok(value) = envelope.to_value() {
                dead_letter(&bus, main_queue, value).await;
            }
            ack(&bus, &delivery).await;
        }
    }
}

async fn ack(bus: &Arc<dyn WorkBus>, delivery: &Delivery) {
    if let Err(err) = bus.ack(delivery.id).await {
        tracing::error!(delivery_id = %delivery.id, error = %err, "Failed to ack delivery");
    }
}

async fn dead_letter(bus: &Arc<dyn WorkBus>, main_queue: &str, envelope: serde_json::Value) {
    let dlq = queues::dlq(main_queue);
    if let Err(err) = bus
        .publish(&dlq, envelope, clipflow_core::models::job::Priority::Low)
        .await
    {
        tracing::error!(queue = %dlq, error = %err, "Failed to publish to DLQ");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipflow_bus::MemoryBus;
    use clipflow_core::{AssembleFile, CommitChunk};
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;

    struct CountingHandler {
        calls: AtomicU32,
        result: fn() -> Result<(), AppError>,
    }

    #[async_trait]
    impl JobHandler<CommitChunk> for CountingHandler {
        async fn handle(&self, _payload: CommitChunk) -> Result<(), AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.result)()
        }
    }

    fn commit_envelope() -> serde_json::Value {
        JobEnvelope::new(CommitChunk {
            session_id: Uuid::new_v4(),
            chunk_index: 0,
            temp_key: "chunks/temp_1_aa".into(),
            owner: Uuid::new_v4(),
        })
        .to_value()
        .unwrap()
    }

    fn config() -> RunnerConfig {
        RunnerConfig::new(2, 3, Duration::from_millis(10))
    }

    async fn drive<H: JobHandler<CommitChunk> + 'static>(bus: Arc<MemoryBus>, handler: Arc<H>) {
        // Process until main and retry queues are dry.
        let retry = queues::retry(queues::CHUNK);
        loop {
            let delivery = bus
                .claim(&[queues::CHUNK, retry.as_str()])
                .await
                .unwrap();
            match delivery {
                Some(delivery) => {
                    process_delivery::<CommitChunk, H>(
                        bus.clone() as Arc<dyn WorkBus>,
                        handler.clone(),
                        delivery,
                        &config(),
                    )
                    .await;
                }
                None => break,
            }
        }
    }

    #[tokio::test]
    async fn successful_job_is_acked_once() {
        let bus = Arc::new(MemoryBus::new());
        let handler = Arc::new(CountingHandler {
            calls: AtomicU32::new(0),
            result: || Ok(()),
        });
        bus.publish(queues::CHUNK, commit_envelope(), clipflow_core::models::job::Priority::High)
            .await
            .unwrap();

        drive(bus.clone(), handler.clone()).await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(bus.inflight_count(), 0);
        assert_eq!(bus.depth(&queues::dlq(queues::CHUNK)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn transient_failures_retry_then_dead_letter() {
        let bus = Arc::new(MemoryBus::new());
        let handler = Arc::new(CountingHandler {
            calls: AtomicU32::new(0),
            result: || Err(AppError::Transient("storage down".into())),
        });
        bus.publish(queues::CHUNK, commit_envelope(), clipflow_core::models::job::Priority::High)
            .await
            .unwrap();

        drive(bus.clone(), handler.clone()).await;

        // Initial attempt + 3 retries, never a 5th processing.
        assert_eq!(handler.calls.load(Ordering::SeqCst), 4);
        assert_eq!(bus.depth(&queues::dlq(queues::CHUNK)).await.unwrap(), 1);
        assert_eq!(bus.depth(queues::CHUNK).await.unwrap(), 0);
        assert_eq!(bus.depth(&queues::retry(queues::CHUNK)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn fatal_failure_dead_letters_immediately() {
        let bus = Arc::new(MemoryBus::new());
        let handler = Arc::new(CountingHandler {
            calls: AtomicU32::new(0),
            result: || Err(AppError::Fatal("invariant violated".into())),
        });
        bus.publish(queues::CHUNK, commit_envelope(), clipflow_core::models::job::Priority::High)
            .await
            .unwrap();

        drive(bus.clone(), handler.clone()).await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(bus.depth(&queues::dlq(queues::CHUNK)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn undecodable_envelope_goes_to_dlq_without_handler_call() {
        let bus = Arc::new(MemoryBus::new());
        let handler = Arc::new(CountingHandler {
            calls: AtomicU32::new(0),
            result: || Ok(()),
        });
        bus.publish(
            queues::CHUNK,
            serde_json::json!({"payload": {"nonsense": true}}),
            clipflow_core::models::job::Priority::High,
        )
        .await
        .unwrap();

        drive(bus.clone(), handler.clone()).await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        assert_eq!(bus.depth(&queues::dlq(queues::CHUNK)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn pool_drains_and_stops_on_shutdown() {
        let bus: Arc<dyn WorkBus> = Arc::new(MemoryBus::new());
        let handler = Arc::new(CountingHandler {
            calls: AtomicU32::new(0),
            result: || Ok(()),
        });
        bus.publish(
            queues::CHUNK,
            commit_envelope(),
            clipflow_core::models::job::Priority::High,
        )
        .await
        .unwrap();

        let mut pool = WorkerPool::new();
        pool.spawn_consumer::<CommitChunk, _>(bus.clone(), handler.clone(), config());

        // Give the consumer a moment to pick the message up, then stop.
        tokio::time::sleep(Duration::from_millis(100)).await;
        pool.shutdown().await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    struct NoopAssembleHandler;

    #[async_trait]
    impl JobHandler<AssembleFile> for NoopAssembleHandler {
        async fn handle(&self, _payload: AssembleFile) -> Result<(), AppError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn dlq_monitor_logs_and_drains() {
        let bus = Arc::new(MemoryBus::new());
        let dlq = queues::dlq(queues::ASSEMBLY);
        bus.publish(&dlq, serde_json::json!({"x": 1}), clipflow_core::models::job::Priority::Low)
            .await
            .unwrap();

        let mut pool = WorkerPool::new();
        pool.spawn_dlq_monitor(bus.clone(), queues::ASSEMBLY, Duration::from_millis(10));
        // The unrelated consumer must not touch the DLQ.
        pool.spawn_consumer::<AssembleFile, _>(bus.clone(), Arc::new(NoopAssembleHandler), config());

        tokio::time::sleep(Duration::from_millis(100)).await;
        pool.shutdown().await;

        assert_eq!(bus.depth(&dlq).await.unwrap(), 0);
    }
}
