use crate::error::EngineError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation and deadline carried through every chain call.
///
/// Collaborators receive it so they can stop their own work, and the engine
/// also races each call against it, so a collaborator that ignores the context
/// still gets abandoned promptly.
#[derive(Debug, Clone, Default)]
pub struct ExecContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl ExecContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        ExecContext { cancel, deadline: None }
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        // Never extend an earlier deadline
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Fails if the context is already cancelled or past its deadline.
    pub fn check(&self) -> Result<(), EngineError> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(EngineError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Runs `fut` to completion unless the context is cancelled or expires first.
    pub async fn run<T, F>(&self, fut: F) -> Result<T, EngineError>
    where
        F: Future<Output = Result<T, EngineError>>,
    {
        self.check()?;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(EngineError::Cancelled),
            _ = sleep_until_deadline(self.deadline) => Err(EngineError::DeadlineExceeded),
            result = fut => result,
        }
    }

    /// Sleeps for `duration`, returning early with an error on cancellation or deadline.
    pub async fn sleep(&self, duration: Duration) -> Result<(), EngineError> {
        self.run(async {
            tokio::time::sleep(duration).await;
            Ok(())
        })
        .await
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn run_completes_when_not_cancelled() {
        let ctx = ExecContext::new();
        let value = ctx.run(async { Ok::<_, EngineError>(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_context_fails_fast() {
        let ctx = ExecContext::new();
        ctx.cancel();
        let err = ctx.sleep(Duration::from_secs(60)).await.unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_interrupts_long_sleep() {
        let ctx = ExecContext::new().with_timeout(Duration::from_millis(250));
        let started = Instant::now();
        let err = ctx.sleep(Duration::from_secs(10)).await.unwrap_err();
        assert!(matches!(err, EngineError::DeadlineExceeded));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn later_deadline_does_not_extend_earlier_one() {
        let ctx = ExecContext::new()
            .with_timeout(Duration::from_millis(100))
            .with_timeout(Duration::from_secs(100));
        let deadline = ctx.deadline().unwrap();
        assert!(deadline <= Instant::now() + Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_from_another_task_stops_sleep() {
        let ctx = ExecContext::new();
        let token = ctx.cancellation_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });
        let err = ctx.sleep(Duration::from_secs(30)).await.unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
    }
}
