//! Span/timer decorator for lifecycle steps and subscriber setup.

use std::fmt;
use std::future::Future;
use std::time::Instant;

use tracing::field::Empty;
use tracing::Instrument;

use crate::model::Operation;

pub const COMPONENT: &str = "lifecycle";

/// Step of an orchestrated call recorded on its span.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Fetch,
    Before,
    Persist,
    After,
    Count,
    Custom,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Step::Fetch => "fetch",
            Step::Before => "before",
            Step::Persist => "persist",
            Step::After => "after",
            Step::Count => "count",
            Step::Custom => "custom",
        })
    }
}

/// Run `fut` inside a child span of the current span, recording duration and
/// outcome. The result is returned untouched.
pub async fn observe<T, E, F>(operation: Operation, resource: &str, step: Step, fut: F) -> Result<T, E>
where
    E: fmt::Display,
    F: Future<Output = Result<T, E>>,
{
    let span = tracing::info_span!(
        "lifecycle",
        component = COMPONENT,
        operation = %operation,
        resource = resource,
        step = %step,
        duration_ms = Empty,
        success = Empty,
        error = Empty,
        otel.status_code = Empty,
    );
    let started = Instant::now();
    let result = fut.instrument(span.clone()).await;
    span.record("duration_ms", started.elapsed().as_millis() as u64);
    span.record("success", result.is_ok());
    if let Err(e) = &result {
        span.record("otel.status_code", "ERROR");
        span.record("error", tracing::field::display(e));
    }
    result
}

/// Install a global fmt subscriber filtered by `RUST_LOG`, falling back to
/// `default_directive` (e.g. `"lifecycle_sdk=info"`).
pub fn init_tracing(default_directive: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn observe_returns_value_untouched() {
        let ok: Result<u32, String> = observe(Operation::Get, "user", Step::Persist, async { Ok(7) }).await;
        assert_eq!(ok, Ok(7));
    }

    #[tokio::test]
    async fn observe_returns_error_untouched() {
        let err: Result<u32, String> =
            observe(Operation::Create, "user", Step::Before, async { Err("rejected".to_string()) }).await;
        assert_eq!(err, Err("rejected".to_string()));
    }
}
