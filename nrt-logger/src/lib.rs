use tracing_subscriber::{
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter,
};

/// Maps a configured level name onto a filter directive.
///
/// Unknown names fall back to `info`.
pub fn filter_for_level(level: &str) -> EnvFilter {
    let directive = match level.to_ascii_uppercase().as_str() {
        "ERROR" => "error",
        "WARN" => "warn",
        "INFO" => "info",
        "DEBUG" => "debug",
        "TRACE" => "trace",
        _ => "info",
    };
    EnvFilter::new(directive)
}

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `NRT_LOG_LEVEL`. Calling this more than once
/// returns an error and leaves the first subscriber in place.
pub fn init() -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| filter_for_level(&nrt_config::CONFIG.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_levels_fall_back_to_info() {
        assert_eq!(filter_for_level("verbose").to_string(), "info");
        assert_eq!(filter_for_level("Debug").to_string(), "debug");
        assert_eq!(filter_for_level("ERROR").to_string(), "error");
    }

    #[test]
    fn second_init_is_rejected() {
        assert!(init().is_ok());
        tracing::info!("subscriber installed");
        assert!(init().is_err());
    }
}
