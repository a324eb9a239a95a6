//! Joining the producer and consumer tasks on the way out.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::Result;

/// Run until the producer finishes or `interrupt` resolves, then raise
/// `stop` and join the consumer.
///
/// The consumer is joined before the producer's outcome is returned, so a
/// failing source never leaves it polling the slot.
pub async fn run_to_completion(
    mut producer: JoinHandle<Result<()>>,
    consumer: JoinHandle<()>,
    stop: &AtomicBool,
    interrupt: impl Future<Output = ()>,
) -> Result<()> {
    let produced = tokio::select! {
        joined = &mut producer => joined,
        () = interrupt => {
            info!("interrupt received, stopping");
            stop.store(true, Ordering::Relaxed);
            producer.await
        }
    };

    stop.store(true, Ordering::Relaxed);
    let consumed = consumer.await;
    if let Err(err) = &consumed {
        warn!(error = %err, "consumer task failed");
    }

    produced??;
    consumed?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::error::PipelineError;

    fn polling_consumer(stop: &Arc<AtomicBool>) -> JoinHandle<()> {
        let stop = stop.clone();
        tokio::task::spawn_blocking(move || {
            while !stop.load(Ordering::Relaxed) {
                std::thread::sleep(Duration::from_millis(1));
            }
        })
    }

    #[tokio::test]
    async fn test_failing_producer_stops_consumer() {
        let stop = Arc::new(AtomicBool::new(false));
        let producer = tokio::task::spawn_blocking(|| Err(PipelineError::capture("device lost")));
        let consumer = polling_consumer(&stop);

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            run_to_completion(producer, consumer, &stop, std::future::pending()),
        )
        .await
        .expect("consumer left running");

        assert!(matches!(result, Err(PipelineError::Capture(_))));
        assert!(stop.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn test_interrupt_stops_both_tasks() {
        let stop = Arc::new(AtomicBool::new(false));
        let producer = {
            let stop = stop.clone();
            tokio::task::spawn_blocking(move || {
                while !stop.load(Ordering::Relaxed) {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Ok(())
            })
        };
        let consumer = polling_consumer(&stop);

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            run_to_completion(producer, consumer, &stop, async {}),
        )
        .await
        .expect("tasks left running");

        assert!(result.is_ok());
    }
}
