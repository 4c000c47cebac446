//! Locale tags for recognition and synthesis

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default recognition language
pub const DEFAULT_LANGUAGE: &str = "es-ES";

/// A validated locale tag in canonical casing (e.g. `es-ES`, `zh-Hant-TW`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Language(String);

impl Language {
    /// Parse and canonicalize a locale tag
    ///
    /// Accepts `-` or `_` as separators. The primary subtag must be 2-3
    /// letters; remaining subtags are 1-8 alphanumerics.
    ///
    /// # Errors
    ///
    /// Returns `Error::Language` if the tag is malformed
    pub fn parse(tag: &str) -> Result<Self> {
        let tag = tag.trim();
        if tag.is_empty() {
            return Err(Error::Language("empty tag".to_string()));
        }

        let mut parts = Vec::new();
        for (index, subtag) in tag.split(['-', '_']).enumerate() {
            if subtag.is_empty()
                || subtag.len() > 8
                || !subtag.chars().all(|c| c.is_ascii_alphanumeric())
            {
                return Err(Error::Language(tag.to_string()));
            }

            let canonical = if index == 0 {
                if !(2..=3).contains(&subtag.len()) || !subtag.chars().all(|c| c.is_ascii_alphabetic())
                {
                    return Err(Error::Language(tag.to_string()));
                }
                subtag.to_ascii_lowercase()
            } else if subtag.len() == 4 && subtag.chars().all(|c| c.is_ascii_alphabetic()) {
                // Script: Latn, Hant
                let lower = subtag.to_ascii_lowercase();
                let mut chars = lower.chars();
                chars.next().map_or_else(String::new, |first| {
                    first.to_ascii_uppercase().to_string() + chars.as_str()
                })
            } else if (subtag.len() == 2 && subtag.chars().all(|c| c.is_ascii_alphabetic()))
                || (subtag.len() == 3 && subtag.chars().all(|c| c.is_ascii_digit()))
            {
                // Region: ES, 419
                subtag.to_ascii_uppercase()
            } else {
                subtag.to_ascii_lowercase()
            };

            parts.push(canonical);
        }

        Ok(Self(parts.join("-")))
    }

    /// The full canonical tag
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The primary language subtag (`es` for `es-ES`), as STT services expect
    #[must_use]
    pub fn primary(&self) -> &str {
        self.0.split('-').next().unwrap_or(&self.0)
    }
}

impl Default for Language {
    fn default() -> Self {
        Self(DEFAULT_LANGUAGE.to_string())
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Language {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Language {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Language> for String {
    fn from(value: Language) -> Self {
        value.0
    }
}
