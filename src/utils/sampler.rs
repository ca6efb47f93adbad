//! Fixed-interval status sampling
//!
//! Every wait in the suite goes through [`TimeoutSampler`]: sample now, then
//! once per interval, until the sample decides or the deadline passes. The
//! interval never grows.

use anyhow::Result;
use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::error::StorageError;

/// Outcome of a single sample
#[derive(Debug)]
pub enum Sample<T> {
    /// Condition met, stop sampling
    Done(T),
    /// Not there yet, observed value kept for the timeout message
    Pending(Option<String>),
    /// Terminal state that can never satisfy the condition
    Stop(String),
}

impl<T> Sample<T> {
    pub fn pending() -> Self {
        Sample::Pending(None)
    }

    pub fn observed(value: impl Debug) -> Self {
        Sample::Pending(Some(format!("{value:?}")))
    }
}

#[derive(Clone, Debug)]
pub struct TimeoutSampler {
    timeout: Duration,
    interval: Duration,
    what: String,
}

impl TimeoutSampler {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self {
            timeout,
            interval,
            what: "condition".to_string(),
        }
    }

    /// Describe what is being waited for (used in logs and errors)
    pub fn waiting_for(mut self, what: impl Into<String>) -> Self {
        self.what = what.into();
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn expired(&self, last: Option<String>) -> StorageError {
        StorageError::Timeout {
            what: self.what.clone(),
            secs: self.timeout.as_secs(),
            last,
        }
    }

    /// Run `sample` until it returns [`Sample::Done`] or [`Sample::Stop`].
    ///
    /// Sampling errors are logged and sampling continues; the last one is kept
    /// for the timeout message.
    pub async fn wait_for<T, F, Fut>(&self, mut sample: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Sample<T>>>,
    {
        let start = Instant::now();
        let mut last = None;

        loop {
            match sample().await {
                Ok(Sample::Done(value)) => {
                    debug!("{} after {}ms", self.what, start.elapsed().as_millis());
                    return Ok(value);
                }
                Ok(Sample::Pending(observed)) => {
                    if observed.is_some() {
                        last = observed;
                    }
                }
                Ok(Sample::Stop(reason)) => {
                    return Err(StorageError::StopStatus {
                        what: self.what.clone(),
                        reason,
                    }
                    .into());
                }
                Err(e) => {
                    debug!("Error sampling {}: {:#}", self.what, e);
                    last = Some(format!("error: {e}"));
                }
            }

            if start.elapsed() + self.interval > self.timeout {
                return Err(self.expired(last).into());
            }

            sleep(self.interval).await;
        }
    }

    /// Sample a boolean predicate until it becomes true
    pub async fn wait_until<F, Fut>(&self, mut predicate: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        self.wait_for(|| {
            let fut = predicate();
            async move {
                Ok(if fut.await? {
                    Sample::Done(())
                } else {
                    Sample::pending()
                })
            }
        })
        .await
    }

    /// Succeed only if `predicate` stays false for the whole timeout.
    ///
    /// The predicate turning true is reported as an assertion failure.
    pub async fn expect_unchanged<F, Fut>(&self, predicate: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        match self.wait_until(predicate).await {
            Ok(()) => Err(StorageError::assertion(format!(
                "{} changed before {}s elapsed",
                self.what,
                self.timeout.as_secs()
            ))
            .into()),
            Err(e)
                if matches!(
                    e.downcast_ref::<StorageError>(),
                    Some(StorageError::Timeout { .. })
                ) =>
            {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
