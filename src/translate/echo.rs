//! Echo translator for dry runs and testing.

use crate::{prelude::*, retry::retry_result_ok};

use super::{TranslateRetryResult, Translator};

/// Returns its input unchanged, without touching the network.
#[derive(Debug)]
pub struct EchoTranslator;

#[async_trait]
impl Translator for EchoTranslator {
    async fn translate(
        &self,
        text: &str,
        _source_lang: &str,
        _target_lang: &str,
    ) -> TranslateRetryResult<String> {
        retry_result_ok(text.to_owned())
    }
}
