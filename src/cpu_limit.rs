//! Limiting the number of concurrent CPU-bound external processes.

use std::sync::LazyLock;

use tokio::sync::Semaphore;

use crate::prelude::*;

/// Semaphore used to limit the number of concurrent `pdftocairo`,
/// `pdfseparate` and `tesseract` processes.
static CPU_SEMAPHORE: LazyLock<Semaphore> =
    LazyLock::new(|| Semaphore::new(num_cpus::get()));

/// Call an async function while holding a permit from the CPU semaphore.
///
/// Rasterizing a 300 DPI page or running Thai OCR on it will each keep a core
/// busy, so with a large `--jobs` we could otherwise start far more of them
/// than the machine can run.
///
/// Don't hold a permit while waiting on the network.
#[instrument(level = "trace", skip_all)]
pub async fn with_cpu_semaphore<Func, Fut, R>(f: Func) -> Result<R>
where
    Func: FnOnce() -> Fut,
    Fut: Future<Output = Result<R>>,
{
    let permit = CPU_SEMAPHORE
        .acquire()
        .await
        .context("Could not acquire CPU permit")?;
    let result = f().await;
    drop(permit);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_result_and_releases_permit() {
        let before = CPU_SEMAPHORE.available_permits();
        let value = with_cpu_semaphore(|| async { Ok(42) }).await.unwrap();
        assert_eq!(value, 42);
        let err = with_cpu_semaphore(|| async { Err::<(), _>(anyhow!("boom")) }).await;
        assert!(err.is_err());
        assert_eq!(CPU_SEMAPHORE.available_permits(), before);
    }
}
