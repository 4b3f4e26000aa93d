//! Environment variable expansion for config files.
//!
//! Supported forms:
//! - `${VAR}` substitutes the value, missing variables are an error
//! - `${VAR:-fallback}` uses `fallback` when VAR is unset or empty
//! - `$$` produces a literal `$`

use regex::{Captures, Regex};
use std::env;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\$|\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
        .expect("Invalid regex pattern")
});

/// Expand placeholders in `input`.
///
/// Every missing variable is collected so a broken config reports all of
/// them at once; the error lists one variable per line.
pub fn expand(input: &str) -> Result<String, String> {
    let mut missing = Vec::new();

    let expanded = PLACEHOLDER.replace_all(input, |caps: &Captures| {
        let Some(name) = caps.get(1) else {
            return "$".to_string();
        };
        let fallback = caps.get(2).map(|m| m.as_str());

        match (env::var(name.as_str()), fallback) {
            (Ok(value), _) if value.contains(['\n', '\r']) => {
                missing.push(format!("'{}' contains a newline", name.as_str()));
                String::new()
            }
            (Ok(value), Some(fallback)) if value.is_empty() => fallback.to_string(),
            (Ok(value), _) => value,
            (Err(_), Some(fallback)) => fallback.to_string(),
            (Err(_), None) => {
                missing.push(format!("'{}' is not set", name.as_str()));
                String::new()
            }
        }
    });

    if missing.is_empty() {
        Ok(expanded.into_owned())
    } else {
        Err(missing.join("\n"))
    }
}
