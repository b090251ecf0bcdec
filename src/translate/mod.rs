//! Translating chunks of page text with an external provider.
//!
//! Providers implement [`Translator`], and report every failure as either
//! [`RetryResult::Transient`] or [`RetryResult::Fatal`]. [`ChunkTranslator`]
//! adds everything else: rate limiting, timeouts, retries with exponential
//! backoff, and a visible placeholder for chunks we couldn't translate.

use std::{fmt, sync::Arc, time::Duration};

use clap::{Args, ValueEnum};
use keen_retry::{ExponentialJitter, ResolvedResult, RetryResult};
use leaky_bucket::RateLimiter;
use tokio::time;

use crate::{
    prelude::*,
    rate_limit::RateLimit,
    retry::{RetryOpts, retry_result_transient},
};

pub mod echo;
pub mod google;

/// Text substituted for a chunk whose translation failed permanently.
pub const TRANSLATION_FAILED_PLACEHOLDER: &str = "[Translation failed]";

/// Our different translation providers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[clap(rename_all = "snake_case")]
pub enum TranslatorType {
    /// The free Google Translate web endpoint.
    #[default]
    Google,

    /// Return the input unchanged. Useful for testing OCR without using the
    /// network.
    Echo,
}

impl TranslatorType {
    /// Instantiate an appropriate translator.
    pub fn create_translator(&self) -> Result<Arc<dyn Translator>> {
        match self {
            TranslatorType::Google => Ok(Arc::new(google::GoogleTranslator::new()?)),
            TranslatorType::Echo => Ok(Arc::new(echo::EchoTranslator)),
        }
    }
}

/// Options controlling how we talk to the translation provider.
#[derive(Args, Clone, Debug)]
pub struct TranslateOpts {
    /// The translation provider to use.
    #[clap(long, value_enum, default_value_t = TranslatorType::default())]
    pub translator: TranslatorType,

    /// The language of the scanned documents.
    #[clap(long, default_value = "th")]
    pub source_lang: String,

    /// The language to translate into.
    #[clap(long, default_value = "en")]
    pub target_lang: String,

    /// A rate limit for translation requests, of the form "1/s" or "30/m".
    /// This covers retries too, and is applied separately from `--jobs`.
    #[clap(long, default_value = "1/s")]
    pub rate_limit: RateLimit,

    /// A timeout, in seconds, for each translation request. A request that
    /// times out is retried. Use 0 to wait forever.
    #[clap(long, default_value = "60")]
    pub timeout: u64,

    #[clap(flatten)]
    pub retry: RetryOpts,
}

impl Default for TranslateOpts {
    fn default() -> Self {
        Self {
            translator: TranslatorType::default(),
            source_lang: "th".to_owned(),
            target_lang: "en".to_owned(),
            rate_limit: RateLimit::default(),
            timeout: 60,
            retry: RetryOpts::default(),
        }
    }
}

/// A [`RetryResult`] for translation requests. This allows [`Translator`]
/// instances to distinguish between errors that may be transient, and errors
/// that are definitely fatal.
pub type TranslateRetryResult<T> = RetryResult<(), (), T, anyhow::Error>;

/// Interface trait for translation providers.
#[async_trait]
pub trait Translator: fmt::Debug + Send + Sync + 'static {
    /// Translate `text` from `source_lang` to `target_lang`, making exactly
    /// one attempt.
    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> TranslateRetryResult<String>;
}

/// The result of translating one chunk. We never fail outright, because a
/// bad chunk shouldn't cost us the rest of the page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkTranslation {
    /// The translated text, or [`TRANSLATION_FAILED_PLACEHOLDER`]. Either way,
    /// it is wrapped in the whitespace that surrounded the original chunk.
    pub text: String,

    /// Did we have to substitute the placeholder?
    pub failed: bool,

    /// Errors we encountered, including those we recovered from.
    pub errors: Vec<String>,
}

/// Translates chunks using a [`Translator`], with rate limiting and retries.
///
/// This is shared between all page workers, so the rate limit is global.
pub struct ChunkTranslator {
    translator: Arc<dyn Translator>,
    rate_limiter: RateLimiter,
    source_lang: String,
    target_lang: String,
    timeout: Option<Duration>,
    retry: RetryOpts,
}

impl ChunkTranslator {
    /// Create a new [`ChunkTranslator`].
    pub fn new(translator: Arc<dyn Translator>, opts: &TranslateOpts) -> Result<Self> {
        if opts.retry.min_backoff_ms > opts.retry.max_backoff_ms {
            return Err(anyhow!(
                "--min-backoff-ms ({}) must not be larger than --max-backoff-ms ({})",
                opts.retry.min_backoff_ms,
                opts.retry.max_backoff_ms,
            ));
        }
        Ok(Self {
            translator,
            rate_limiter: opts.rate_limit.to_rate_limiter()?,
            source_lang: opts.source_lang.clone(),
            target_lang: opts.target_lang.clone(),
            timeout: (opts.timeout > 0).then(|| Duration::from_secs(opts.timeout)),
            retry: opts.retry.clone(),
        })
    }

    /// Translate a single chunk.
    ///
    /// Leading and trailing whitespace is never sent to the provider. We put
    /// it back afterwards, so that concatenating translated chunks keeps the
    /// page's line structure. A chunk containing only whitespace is returned
    /// as-is.
    #[instrument(level = "debug", skip_all, fields(chars = chunk.chars().count()))]
    pub async fn translate_chunk(&self, chunk: &str) -> ChunkTranslation {
        let (leading, core, trailing) = split_surrounding_whitespace(chunk);
        if core.is_empty() {
            return ChunkTranslation {
                text: chunk.to_owned(),
                failed: false,
                errors: vec![],
            };
        }

        let jitter = ExponentialJitter::FromBackoffRange {
            backoff_range_millis: self.retry.min_backoff_ms..=self.retry.max_backoff_ms,
            re_attempts: self.retry.max_retries,
            jitter_ratio: 0.2,
        };
        let result = self
            .attempt(core)
            .await
            .retry_with_async(|_| self.attempt(core))
            .with_exponential_jitter(|| jitter)
            .await
            .inspect_recovered(|_, _, retry_errors_list| {
                warn!(
                    "translation succeeded after retrying {} times (failed attempts: [{}])",
                    retry_errors_list.len(),
                    keen_retry::loggable_retry_errors(retry_errors_list)
                )
            })
            .inspect_given_up(|_, retry_errors_list, fatal_error| {
                error!(
                    "translation FAILED after exhausting all {} retrying attempts with error {fatal_error:?}",
                    retry_errors_list.len(),
                )
            });

        let full_err = |err: anyhow::Error| format!("{:#}", err);
        let wrap = |text: &str| format!("{leading}{text}{trailing}");
        match result {
            ResolvedResult::Ok { output, .. } => ChunkTranslation {
                text: wrap(&output),
                failed: false,
                errors: vec![],
            },
            ResolvedResult::Recovered {
                output,
                retry_errors,
                ..
            } => ChunkTranslation {
                text: wrap(&output),
                failed: false,
                errors: retry_errors.into_iter().map(full_err).collect(),
            },
            ResolvedResult::Fatal { error, .. } => {
                error!("translation FAILED with error {error:?}");
                ChunkTranslation {
                    text: wrap(TRANSLATION_FAILED_PLACEHOLDER),
                    failed: true,
                    errors: vec![full_err(error)],
                }
            }
            ResolvedResult::GivenUp {
                retry_errors,
                fatal_error,
                ..
            }
            | ResolvedResult::Unrecoverable {
                retry_errors,
                fatal_error,
                ..
            } => ChunkTranslation {
                text: wrap(TRANSLATION_FAILED_PLACEHOLDER),
                failed: true,
                errors: retry_errors
                    .into_iter()
                    .chain([fatal_error])
                    .map(full_err)
                    .collect(),
            },
        }
    }

    /// Make a single attempt at translating `text`, waiting for the rate
    /// limiter first.
    async fn attempt(&self, text: &str) -> TranslateRetryResult<String> {
        self.rate_limiter.acquire_one().await;
        let future =
            self.translator
                .translate(text, &self.source_lang, &self.target_lang);
        match self.timeout {
            Some(timeout) => match time::timeout(timeout, future).await {
                Ok(result) => result,
                Err(_) => retry_result_transient(anyhow!(
                    "translation request timed out after {:?}",
                    timeout
                )),
            },
            None => future.await,
        }
    }
}

/// Split `text` into leading whitespace, the text itself, and trailing
/// whitespace.
fn split_surrounding_whitespace(text: &str) -> (&str, &str, &str) {
    let start = text.len() - text.trim_start().len();
    let end = text.trim_end().len().max(start);
    (&text[..start], &text[start..end], &text[end..])
}

/// Translators for use in tests.
#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// How a [`FakeTranslator`] responds to a request: a delay, then a result.
    type RespondFn =
        dyn Fn(&str) -> (Duration, TranslateRetryResult<String>) + Send + Sync;

    /// A scripted translator which records every request it sees.
    pub struct FakeTranslator {
        respond: Box<RespondFn>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeTranslator {
        /// Create a translator which answers requests using `respond`.
        pub fn new(
            respond: impl Fn(&str) -> (Duration, TranslateRetryResult<String>)
            + Send
            + Sync
            + 'static,
        ) -> Self {
            Self {
                respond: Box::new(respond),
                calls: Mutex::new(vec![]),
            }
        }

        /// A translator which upper-cases its input immediately.
        pub fn uppercase() -> Self {
            Self::new(|text| {
                (Duration::ZERO, crate::retry::retry_result_ok(text.to_uppercase()))
            })
        }

        /// Every request we've seen, in the order they arrived.
        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("lock poisoned").clone()
        }
    }

    impl fmt::Debug for FakeTranslator {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("FakeTranslator").finish_non_exhaustive()
        }
    }

    #[async_trait]
    impl Translator for FakeTranslator {
        async fn translate(
            &self,
            text: &str,
            _source_lang: &str,
            _target_lang: &str,
        ) -> TranslateRetryResult<String> {
            self.calls
                .lock()
                .expect("lock poisoned")
                .push(text.to_owned());
            let (delay, result) = (self.respond)(text);
            if !delay.is_zero() {
                time::sleep(delay).await;
            }
            result
        }
    }

    /// Options which keep tests fast: no real rate limit, and tiny backoffs.
    pub fn fast_opts() -> TranslateOpts {
        TranslateOpts {
            translator: TranslatorType::Echo,
            rate_limit: "1000/s".parse().expect("valid rate limit"),
            retry: RetryOpts {
                max_retries: 3,
                min_backoff_ms: 1,
                max_backoff_ms: 2,
            },
            ..TranslateOpts::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::{testing::*, *};
    use crate::retry::{retry_result_fatal, retry_result_ok};

    fn chunk_translator(fake: &Arc<FakeTranslator>) -> ChunkTranslator {
        ChunkTranslator::new(fake.clone(), &fast_opts()).unwrap()
    }

    #[test]
    fn splits_surrounding_whitespace() {
        assert_eq!(
            split_surrounding_whitespace("\n  จิต ใจ \n"),
            ("\n  ", "จิต ใจ", " \n")
        );
        assert_eq!(split_surrounding_whitespace("abc"), ("", "abc", ""));
        assert_eq!(split_surrounding_whitespace(" \n "), (" \n ", "", ""));
        assert_eq!(split_surrounding_whitespace(""), ("", "", ""));
    }

    #[tokio::test]
    async fn translates_and_restores_whitespace() {
        let fake = Arc::new(FakeTranslator::uppercase());
        let result = chunk_translator(&fake).translate_chunk("\ncitta \n\n").await;
        assert_eq!(result.text, "\nCITTA \n\n");
        assert!(!result.failed);
        assert!(result.errors.is_empty());
        assert_eq!(fake.calls(), vec!["citta"]);
    }

    #[tokio::test]
    async fn whitespace_only_chunks_are_not_sent() {
        let fake = Arc::new(FakeTranslator::uppercase());
        let result = chunk_translator(&fake).translate_chunk(" \n\t").await;
        assert_eq!(result.text, " \n\t");
        assert!(!result.failed);
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let attempts = AtomicUsize::new(0);
        let fake = Arc::new(FakeTranslator::new(move |text| {
            let result = if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                retry_result_transient(anyhow!("HTTP 429"))
            } else {
                retry_result_ok(text.to_uppercase())
            };
            (Duration::ZERO, result)
        }));
        let result = chunk_translator(&fake).translate_chunk("sati").await;
        assert_eq!(result.text, "SATI");
        assert!(!result.failed);
        assert_eq!(result.errors.len(), 2);
        assert_eq!(fake.calls().len(), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_yield_placeholder() {
        let fake = Arc::new(FakeTranslator::new(|_| {
            (Duration::ZERO, retry_result_transient(anyhow!("HTTP 503")))
        }));
        let result = chunk_translator(&fake).translate_chunk("dukkha\n").await;
        assert_eq!(result.text, format!("{TRANSLATION_FAILED_PLACEHOLDER}\n"));
        assert!(result.failed);
        // One first try, plus three retries.
        assert_eq!(fake.calls().len(), 4);
        assert_eq!(result.errors.len(), 4);
        assert!(result.errors.iter().all(|e| e.contains("HTTP 503")));
    }

    #[tokio::test]
    async fn fatal_failures_are_not_retried() {
        let fake = Arc::new(FakeTranslator::new(|_| {
            (Duration::ZERO, retry_result_fatal(anyhow!("HTTP 413")))
        }));
        let result = chunk_translator(&fake).translate_chunk("anatta").await;
        assert_eq!(result.text, TRANSLATION_FAILED_PLACEHOLDER);
        assert!(result.failed);
        assert_eq!(fake.calls().len(), 1);
        assert_eq!(result.errors, vec!["HTTP 413"]);
    }

    #[tokio::test]
    async fn timeouts_are_transient() {
        let attempts = AtomicUsize::new(0);
        let fake = Arc::new(FakeTranslator::new(move |text| {
            let delay = if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                Duration::from_secs(30)
            } else {
                Duration::ZERO
            };
            (delay, retry_result_ok(text.to_uppercase()))
        }));
        let mut translator = chunk_translator(&fake);
        translator.timeout = Some(Duration::from_millis(20));
        let result = translator.translate_chunk("metta").await;
        assert_eq!(result.text, "METTA");
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("timed out"));
    }

    #[test]
    fn inverted_backoff_range_is_rejected() {
        let mut opts = fast_opts();
        opts.retry.min_backoff_ms = 500;
        opts.retry.max_backoff_ms = 100;
        let fake = Arc::new(FakeTranslator::uppercase());
        assert!(ChunkTranslator::new(fake, &opts).is_err());
    }
}
