//! Tracing/logging bootstrap for the terminal client.

use std::{env, io};

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,chat_terminal=debug,backend_stomp=debug";

/// Initialize the global tracing subscriber, writing to stderr so chat
/// output on stdout stays readable.
///
/// Precedence:
/// 1) `RUST_LOG`
/// 2) `BOARDCHAT_TERMINAL_LOG`
/// 3) `BOARDCHAT_LOG`
/// 4) internal default filter
pub fn init() {
    let env_filter = filter_from_lookup(|key| env::var(key).ok());
    let _ = tracing_subscriber::fmt()
        .with_target(true)
        .with_writer(io::stderr)
        .with_env_filter(env_filter)
        .try_init();
}

fn filter_from_lookup<F>(lookup: F) -> EnvFilter
where
    F: Fn(&str) -> Option<String>,
{
    filter_directives(lookup)
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

/// First non-blank, parseable directive string in precedence order.
fn filter_directives<F>(lookup: F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    ["RUST_LOG", "BOARDCHAT_TERMINAL_LOG", "BOARDCHAT_LOG"]
        .into_iter()
        .filter_map(|key| lookup(key))
        .find(|value| !value.trim().is_empty() && EnvFilter::try_new(value).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn directives(pairs: &[(&str, &str)]) -> Option<String> {
        let map = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect::<HashMap<_, _>>();
        filter_directives(|key| map.get(key).cloned())
    }

    #[test]
    fn rust_log_wins_over_app_variables() {
        assert_eq!(
            directives(&[
                ("RUST_LOG", "warn"),
                ("BOARDCHAT_TERMINAL_LOG", "debug"),
                ("BOARDCHAT_LOG", "trace"),
            ])
            .as_deref(),
            Some("warn")
        );
    }

    #[test]
    fn blank_values_fall_through() {
        assert_eq!(
            directives(&[("RUST_LOG", "  "), ("BOARDCHAT_LOG", "backend_rest=trace")]).as_deref(),
            Some("backend_rest=trace")
        );
        assert_eq!(directives(&[]), None);
    }
}
