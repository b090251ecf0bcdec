//! The free Google Translate web endpoint.
//!
//! This is the same endpoint used by the browser extension, so there's no
//! API key, no published rate limit, and no documented response format. The
//! response is a deeply nested JSON array, and the first element holds one
//! `[translated, original, ...]` entry per sentence.

use std::env;

use reqwest::Client;
use serde_json::Value;

use crate::{
    prelude::*,
    retry::{
        IsKnownTransient, retry_result_fatal, retry_result_ok, retry_result_transient,
        try_potentially_transient, try_transient,
    },
};

use super::{TranslateRetryResult, Translator};

/// Where we send requests unless `TRANSLATE_API_BASE` says otherwise.
const DEFAULT_API_BASE: &str = "https://translate.googleapis.com";

/// How much of an error body we include in error messages.
const MAX_ERROR_BODY_CHARS: usize = 200;

/// A translator using Google's free web endpoint.
#[derive(Debug)]
pub struct GoogleTranslator {
    client: Client,
    endpoint: String,
}

impl GoogleTranslator {
    /// Create a new translator, honoring `TRANSLATE_API_BASE`.
    pub fn new() -> Result<Self> {
        let base_url =
            env::var("TRANSLATE_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.to_owned());
        Self::with_base_url(&base_url)
    }

    /// Create a new translator talking to `base_url`.
    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .build()
            .context("could not create HTTP client")?;
        let endpoint = format!("{}/translate_a/single", base_url.trim_end_matches('/'));
        debug!(%endpoint, "Using Google Translate endpoint");
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl Translator for GoogleTranslator {
    #[instrument(level = "debug", skip_all, fields(chars = text.chars().count()))]
    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> TranslateRetryResult<String> {
        // Send the text as a form body, because a full-sized chunk of Thai is
        // far too long for a URL once it has been percent-encoded.
        let response = try_potentially_transient!(
            self.client
                .post(&self.endpoint)
                .query(&[
                    ("client", "gtx"),
                    ("sl", source_lang),
                    ("tl", target_lang),
                    ("dt", "t"),
                ])
                .form(&[("q", text)])
                .send()
                .await
        );

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body = body.chars().take(MAX_ERROR_BODY_CHARS).collect::<String>();
            let err = anyhow!("translation API returned {}: {}", status, body.trim());
            return if status.is_known_transient() {
                retry_result_transient(err)
            } else {
                retry_result_fatal(err)
            };
        }

        let body = try_potentially_transient!(response.text().await);
        trace!(%body, "Translation response");

        // A body we can't make sense of is usually an HTML error page from an
        // overloaded proxy, so give it another chance.
        let translated = try_transient!(parse_response(&body));
        retry_result_ok(translated)
    }
}

/// Extract the translated text from a response body.
fn parse_response(body: &str) -> Result<String> {
    let value = serde_json::from_str::<Value>(body)
        .context("translation API returned invalid JSON")?;
    let sentences = value
        .get(0)
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("translation API response has no sentences"))?;
    let translated = sentences
        .iter()
        .filter_map(|sentence| sentence.get(0).and_then(Value::as_str))
        .collect::<String>();
    if translated.trim().is_empty() {
        return Err(anyhow!("translation API returned an empty translation"));
    }
    Ok(translated)
}
