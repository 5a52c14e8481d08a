//! Glob-style key patterns (`*` matches any run of characters)

use regex::Regex;

use crate::domain::{ServiceError, ServiceResult};

#[derive(Debug, Clone)]
pub struct KeyPattern {
    raw: String,
    regex: Regex,
}

impl KeyPattern {
    pub fn new(pattern: &str) -> ServiceResult<Self> {
        let escaped = regex::escape(pattern).replace(r"\*", ".*");
        let regex = Regex::new(&format!("^{}$", escaped)).map_err(|e| {
            ServiceError::validation(format!("Invalid key pattern '{}': {}", pattern, e), vec![])
        })?;

        Ok(Self {
            raw: pattern.to_string(),
            regex,
        })
    }

    pub fn matches(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}
