//! Detecting known Pali terms in page text.
//!
//! Scanned Abhidhamma books mix Thai prose with romanized Pali vocabulary.
//! We don't translate those terms, but we do report which ones appear on each
//! page, so that readers can check how the translator treated them.

use std::collections::BTreeSet;

use schemars::JsonSchema;
use toml_span::{DeserError, de_helpers::TableHelper};

use crate::{async_utils::io::read_toml, prelude::*, toml_utils::from_toml_str};

/// Our built-in term list.
const DEFAULT_TERMS: &str = include_str!("pali/default_terms.toml");

/// A Pali term file, as written by the user.
#[derive(Clone, Debug, Default, JsonSchema)]
pub struct PaliTermConfig {
    /// Terms to look for. Case is ignored.
    pub terms: Vec<String>,

    /// Replace the built-in list instead of extending it. Defaults to false.
    pub replace_defaults: bool,
}

impl<'de> toml_span::Deserialize<'de> for PaliTermConfig {
    fn deserialize(value: &mut toml_span::Value<'de>) -> Result<Self, DeserError> {
        let mut th = TableHelper::new(value)?;
        let terms = th.required("terms")?;
        let replace_defaults = th.optional("replace_defaults").unwrap_or(false);
        th.finalize(None)?;
        Ok(Self {
            terms,
            replace_defaults,
        })
    }
}

/// An ordered set of lower-case Pali terms.
///
/// This is built once at startup and then shared read-only between all page
/// workers.
#[derive(Clone, Debug)]
pub struct PaliTermSet {
    terms: Vec<String>,
}

impl PaliTermSet {
    /// Build a term set. Terms are lower-cased and trimmed, and empty terms
    /// and duplicates are dropped. The first occurrence of each term decides
    /// its position.
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = BTreeSet::new();
        let terms = terms
            .into_iter()
            .map(|term| term.as_ref().trim().to_lowercase())
            .filter(|term| !term.is_empty() && seen.insert(term.clone()))
            .collect();
        Self { terms }
    }

    /// Our built-in term list.
    pub fn builtin() -> Self {
        let config = from_toml_str::<PaliTermConfig>(DEFAULT_TERMS)
            .expect("failed to parse built-in Pali term list");
        Self::new(config.terms)
    }

    /// Apply a user-supplied term file to the built-in list.
    pub fn from_config(config: PaliTermConfig) -> Self {
        if config.replace_defaults {
            Self::new(config.terms)
        } else {
            let builtin = Self::builtin();
            Self::new(builtin.terms.into_iter().chain(config.terms))
        }
    }

    /// Load our term set, using the term file at `path` if one was given.
    #[instrument(level = "debug", skip_all)]
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let terms = match path {
            Some(path) => Self::from_config(read_toml::<PaliTermConfig>(path).await?),
            None => Self::builtin(),
        };
        if terms.is_empty() {
            warn!("Pali term list is empty, so no terms will be reported");
        }
        debug!(count = terms.len(), "Loaded Pali terms");
        Ok(terms)
    }

    /// The terms, in order.
    #[cfg(test)]
    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    /// How many terms do we have?
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    /// Do we have any terms at all?
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Find every term that occurs in `text`, ignoring case.
    ///
    /// Results are in term-list order, and each term is reported once no
    /// matter how often it occurs. Terms are matched independently, so a term
    /// that is part of a longer term (`rupa` in `namarupa`) is reported
    /// whenever the longer one is.
    pub fn scan(&self, text: &str) -> Vec<String> {
        let text = text.to_lowercase();
        self.terms
            .iter()
            .filter(|term| text.contains(term.as_str()))
            .cloned()
            .collect()
    }
}
