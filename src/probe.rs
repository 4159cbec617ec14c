//! Bounded sequential index probing.
//!
//! The safe contract exposes its transactions as `txs(i)` with no length
//! getter; the count is the first index that fails to resolve. [`IndexProbe`]
//! turns that into a lazy, finite, non-restartable sequence:
//!
//! - indices are probed in order starting at 0, one request at a time;
//! - a non-transient failure ends the sequence (the collection is exhausted);
//! - a transient failure (timeout, busy provider) is retried at most
//!   `retries` extra times before ending the sequence;
//! - at most `cap` entries are ever produced. Reaching the cap is reported
//!   through [`ProbeEnd::Capped`] so callers can tell a truncated listing
//!   from a complete one.
//!
//! Once ended, the probe yields `None` forever.

use std::future::Future;

use tracing::debug;

use crate::error::FortError;

/// Why a probe stopped producing entries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProbeEnd {
    /// The index did not resolve; the collection has this many entries.
    Exhausted(u64),
    /// The hard cap was reached; more entries may exist.
    Capped(u64),
    /// Transient failures persisted past the retry budget at this index.
    Failed { index: u64, error: FortError },
}

pub struct IndexProbe<F> {
    fetch: F,
    next_index: u64,
    cap: u64,
    retries: u32,
    end: Option<ProbeEnd>,
}

impl<F, Fut, T> IndexProbe<F>
where
    F: FnMut(u64) -> Fut,
    Fut: Future<Output = Result<T, FortError>>,
{
    pub fn new(fetch: F, cap: u64, retries: u32) -> Self {
        Self {
            fetch,
            next_index: 0,
            cap,
            retries,
            end: None,
        }
    }

    /// Probe the next index.
    pub async fn next(&mut self) -> Option<T> {
        if self.end.is_some() {
            return None;
        }
        if self.next_index >= self.cap {
            debug!(cap = self.cap, "index probe reached its cap");
            self.end = Some(ProbeEnd::Capped(self.cap));
            return None;
        }

        let index = self.next_index;
        let mut attempt = 0;
        loop {
            match (self.fetch)(index).await {
                Ok(value) => {
                    self.next_index += 1;
                    return Some(value);
                }
                Err(e) if e.is_transient() && attempt < self.retries => {
                    attempt += 1;
                    debug!(index, attempt, error = %e, "retrying index probe");
                }
                Err(e) if e.is_transient() => {
                    self.end = Some(ProbeEnd::Failed { index, error: e });
                    return None;
                }
                Err(_) => {
                    self.end = Some(ProbeEnd::Exhausted(index));
                    return None;
                }
            }
        }
    }

    /// Drain the remaining entries.
    pub async fn collect(mut self) -> (Vec<T>, Option<ProbeEnd>) {
        let mut out = Vec::new();
        while let Some(v) = self.next().await {
            out.push(v);
        }
        (out, self.end)
    }

    pub fn end(&self) -> Option<&ProbeEnd> {
        self.end.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn revert() -> FortError {
        FortError::unknown("execution reverted")
    }

    #[tokio::test]
    async fn test_stops_at_first_missing_index() {
        let probe = IndexProbe::new(
            |i| async move { if i < 3 { Ok(i) } else { Err(revert()) } },
            1000,
            1,
        );
        let (items, end) = probe.collect().await;
        assert_eq!(items, vec![0, 1, 2]);
        assert_eq!(end, Some(ProbeEnd::Exhausted(3)));
    }

    #[tokio::test]
    async fn test_cap_is_enforced() {
        let probe = IndexProbe::new(|i| async move { Ok::<_, FortError>(i) }, 5, 0);
        let (items, end) = probe.collect().await;
        assert_eq!(items.len(), 5);
        assert_eq!(end, Some(ProbeEnd::Capped(5)));
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let probe = IndexProbe::new(
            move |i| {
                let c = c.clone();
                async move {
                    if i == 1 && c.fetch_add(1, Ordering::SeqCst) == 0 {
                        return Err(FortError::RequestTimeout);
                    }
                    if i < 2 {
                        Ok(i)
                    } else {
                        Err(revert())
                    }
                }
            },
            100,
            1,
        );
        let (items, end) = probe.collect().await;
        assert_eq!(items, vec![0, 1]);
        assert_eq!(end, Some(ProbeEnd::Exhausted(2)));
    }

    #[tokio::test]
    async fn test_persistent_transient_failure_ends_probe() {
        let mut probe = IndexProbe::new(
            |_| async move { Err::<u64, _>(FortError::ProviderBusy) },
            100,
            2,
        );
        assert_eq!(probe.next().await, None);
        assert!(matches!(probe.end(), Some(ProbeEnd::Failed { index: 0, .. })));
        // fused
        assert_eq!(probe.next().await, None);
    }
}
