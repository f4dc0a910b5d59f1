//! Task dispatcher: the producer side of the command queue.

use std::sync::Arc;

use spiderd_core::commands::Command;

use crate::queue::{CommandQueue, QueueError};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// A command with the same dedup key is pending or in flight.
    #[error("A command for {key} is already queued or in progress")]
    AlreadyQueued { key: String },

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Enqueues lifecycle commands with the configured attempt bound.
#[derive(Clone)]
pub struct TaskDispatcher {
    queue: Arc<dyn CommandQueue>,
    max_attempts: u32,
}

impl TaskDispatcher {
    pub fn new(queue: Arc<dyn CommandQueue>, max_attempts: u32) -> Self {
        Self {
            queue,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Enqueue `command`, rejecting it if its key is already taken.
    pub async fn enqueue(&self, command: Command) -> Result<(), DispatchError> {
        let key = command.dedup_key();
        if !self.queue.push(&command, self.max_attempts).await? {
            tracing::info!(key = %key, command = %command, "Command rejected, key already queued");
            return Err(DispatchError::AlreadyQueued { key });
        }

        tracing::info!(key = %key, command = %command, "Command enqueued");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::testing::MemoryCommandQueue;

    fn execute(job_id: &str) -> Command {
        Command::Execute {
            job_id: job_id.into(),
        }
    }

    #[tokio::test]
    async fn second_command_for_same_job_is_rejected() {
        let queue = Arc::new(MemoryCommandQueue::default());
        let dispatcher = TaskDispatcher::new(queue.clone(), 2);

        dispatcher.enqueue(execute("abc123")).await.unwrap();
        assert_matches!(
            dispatcher
                .enqueue(Command::Cancel {
                    job_id: "abc123".into()
                })
                .await,
            Err(DispatchError::AlreadyQueued { key }) if key == "abc123"
        );
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn key_is_released_after_completion() {
        let queue = Arc::new(MemoryCommandQueue::default());
        let dispatcher = TaskDispatcher::new(queue.clone(), 2);

        dispatcher.enqueue(execute("abc123")).await.unwrap();
        let claimed = queue.claim().await.unwrap().unwrap();

        // In flight: still taken.
        assert!(dispatcher.enqueue(execute("abc123")).await.is_err());

        queue.complete(&claimed.key()).await.unwrap();
        dispatcher.enqueue(execute("abc123")).await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_enqueues_admit_exactly_one() {
        let queue = Arc::new(MemoryCommandQueue::default());
        let dispatcher = TaskDispatcher::new(queue.clone(), 2);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move { dispatcher.enqueue(execute("abc123")).await })
            })
            .collect();

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn version_and_job_keys_do_not_collide() {
        let queue = Arc::new(MemoryCommandQueue::default());
        let dispatcher = TaskDispatcher::new(queue.clone(), 2);

        dispatcher.enqueue(execute("v1")).await.unwrap();
        dispatcher
            .enqueue(Command::InspectVersion {
                version_id: "v1".into(),
            })
            .await
            .unwrap();
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn attempt_bound_is_carried_on_the_command() {
        let queue = Arc::new(MemoryCommandQueue::default());
        let dispatcher = TaskDispatcher::new(queue.clone(), 0);
        assert_eq!(dispatcher.max_attempts(), 1);

        dispatcher.enqueue(execute("abc123")).await.unwrap();
        let claimed = queue.claim().await.unwrap().unwrap();
        assert_eq!(claimed.attempt, 1);
        assert_eq!(claimed.max_attempts, 1);
    }
}
