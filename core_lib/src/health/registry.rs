//! Parsing of `name:url` check declarations

use super::checks::Check;
use tracing::debug;

/// Splits every declaration on its first `:`. Entries with an empty name or
/// url, or without a separator at all, are dropped.
pub fn parse_checks<S: AsRef<str>>(declarations: &[S]) -> Vec<Check> {
    declarations
        .iter()
        .filter_map(|raw| {
            let raw = raw.as_ref();
            match raw.split_once(':') {
                Some((name, url)) if !name.is_empty() && !url.is_empty() => Some(Check::new(name, url)),
                _ => {
                    debug!("skipping malformed check declaration {:?}", raw);
                    None
                }
            }
        })
        .collect()
}
