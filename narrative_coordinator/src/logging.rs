//! Logging bootstrap for hosts embedding the coordinator.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

/// Build the filter directive string from config (`info,module=debug,...`).
pub fn filter_directives(config: &LoggingConfig) -> String {
    let mut directives = config.level.to_lowercase();
    let mut modules: Vec<_> = config.module_levels.iter().collect();
    modules.sort();
    for (module, level) in modules {
        directives.push_str(&format!(",{}={}", module, level.to_lowercase()));
    }
    directives
}

/// Install the global tracing subscriber. `RUST_LOG` wins over the config.
///
/// Returns `false` if a subscriber was already installed.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter_directives(config)))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_target(true)
            .with_filter(env_filter)
            .boxed()
    };

    tracing_subscriber::registry().with(fmt_layer).try_init().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_filter_directives() {
        let config = LoggingConfig {
            level: "WARN".into(),
            json: false,
            module_levels: HashMap::from([
                ("narrative_coordinator::scheduler".to_string(), "DEBUG".to_string()),
                ("narrative_coordinator::cache".to_string(), "trace".to_string()),
            ]),
        };

        assert_eq!(
            filter_directives(&config),
            "warn,narrative_coordinator::cache=trace,narrative_coordinator::scheduler=debug"
        );
    }

    #[test]
    fn test_second_init_is_rejected() {
        let config = LoggingConfig::default();
        let _ = init_logging(&config);
        assert!(!init_logging(&config));
    }
}
