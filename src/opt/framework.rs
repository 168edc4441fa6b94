// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operation (OPT) framework (component C8, spec §4.8): a single-shot
//! action that issues one or more Transit requests and awaits correlated
//! replies with a bounded wall-clock wait.
//!
//! The teacher's source used a latch a calling thread blocked on, released
//! by the callback thread. Per the redesign note in spec §9 ("async control
//! flow"), this is reimplemented as a plain bounded `tokio::time::timeout`
//! around an `async fn` — the "latch" is the await point itself, and
//! "counts down the latch exactly once" falls out of `Result`'s normal
//! control flow (the first `?` that fails short-circuits the rest).

use std::time::Duration;

use async_trait::async_trait;

use crate::error::CoreError;

/// Extra wall-clock grace added to an OPT's own response timeout before the
/// framework gives up and reports `Timeout` (spec §4.8, §5).
const OPT_GRACE: Duration = Duration::from_millis(300);

/// One logical action: issues requests, awaits replies, returns a typed
/// result or a `CoreError`. Implementors name their own `response_timeout`;
/// the framework adds the fixed grace on top.
#[async_trait]
pub trait Opt {
    type Output: Send;

    fn response_timeout(&self) -> Duration;

    async fn execute_task(&mut self) -> Result<Self::Output, CoreError>;
}

/// `{ ok: bool, description: string }` with the `"N/A"` / `"OK"` sentinels
/// from spec §3. `ok=true` only ever appears with `description="OK"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptResult<T> {
    pub ok: bool,
    pub description: String,
    pub value: Option<T>,
}

impl<T> OptResult<T> {
    fn ok(value: T) -> Self {
        Self { ok: true, description: "OK".to_owned(), value: Some(value) }
    }

    fn error(err: CoreError) -> Self {
        Self { ok: false, description: err.sanitized_message(), value: None }
    }

    pub fn not_set() -> Self {
        Self { ok: false, description: "N/A".to_owned(), value: None }
    }

    pub fn into_result(self) -> Result<T, CoreError> {
        match self.value {
            Some(v) if self.ok => Ok(v),
            _ => Err(CoreError::InvalidResponse(self.description)),
        }
    }
}

/// Run one OPT to completion, applying the `response_timeout + 300ms` grace
/// (spec §4.8, §5 "OPT-level grace").
pub async fn execute<O>(mut opt: O) -> OptResult<O::Output>
where
    O: Opt,
{
    let deadline = opt.response_timeout() + OPT_GRACE;
    match tokio::time::timeout(deadline, opt.execute_task()).await {
        Ok(Ok(value)) => OptResult::ok(value),
        Ok(Err(err)) => OptResult::error(err),
        Err(_) => OptResult::error(CoreError::OptTimeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysOk;

    #[async_trait]
    impl Opt for AlwaysOk {
        type Output = u32;
        fn response_timeout(&self) -> Duration {
            Duration::from_millis(10)
        }
        async fn execute_task(&mut self) -> Result<u32, CoreError> {
            Ok(42)
        }
    }

    struct AlwaysError;

    #[async_trait]
    impl Opt for AlwaysError {
        type Output = u32;
        fn response_timeout(&self) -> Duration {
            Duration::from_millis(10)
        }
        async fn execute_task(&mut self) -> Result<u32, CoreError> {
            Err(CoreError::ApduStatusWordError)
        }
    }

    struct NeverResolves;

    #[async_trait]
    impl Opt for NeverResolves {
        type Output = u32;
        fn response_timeout(&self) -> Duration {
            Duration::from_millis(5)
        }
        async fn execute_task(&mut self) -> Result<u32, CoreError> {
            std::future::pending::<()>().await;
            unreachable!()
        }
    }

    #[tokio::test]
    async fn ok_result_carries_value_and_ok_description() {
        let result = execute(AlwaysOk).await;
        assert!(result.ok);
        assert_eq!(result.description, "OK");
        assert_eq!(result.value, Some(42));
    }

    #[tokio::test]
    async fn error_result_is_not_ok_and_has_no_value() {
        let result = execute(AlwaysError).await;
        assert!(!result.ok);
        assert_eq!(result.value, None);
        assert_eq!(result.description, "ApduResponse status word error");
    }

    #[tokio::test]
    async fn exhausted_grace_reports_opt_timeout() {
        let result = execute(NeverResolves).await;
        assert!(!result.ok);
        assert_eq!(result.description, "Timeout waiting for operation response");
    }
}
