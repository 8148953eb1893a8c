//! Initialisation du système de logging `tracing`
//!
//! Le démon écrit ses logs sur la console via `tracing_subscriber::fmt`. Le
//! niveau minimum vient de la configuration (`host.log.min_level`) mais reste
//! surchargeable par la variable d'environnement `RUST_LOG`, directives
//! comprises (`RUST_LOG=sgcache=debug,info`).

use sgconfig::get_config;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Options d'initialisation du système de logging
#[derive(Debug, Clone)]
pub struct LoggingOptions {
    /// Niveau minimum des logs émis (ERROR, WARN, INFO, DEBUG, TRACE)
    pub min_level: String,
    /// Activer la sortie vers la console
    pub enable_console: bool,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            min_level: "INFO".to_string(),
            enable_console: true,
        }
    }
}

impl LoggingOptions {
    /// Construit les options depuis la configuration globale
    ///
    /// Les valeurs absentes ou illisibles retombent sur les défauts.
    pub fn from_config() -> Self {
        let config = get_config();
        Self {
            min_level: config
                .get_log_min_level()
                .unwrap_or_else(|_| "INFO".to_string()),
            enable_console: config.get_log_enable_console().unwrap_or(true),
        }
    }
}

/// Initialise le système de logging
///
/// À appeler une seule fois, au démarrage du démon. Le filtre de niveau est
/// construit depuis `options.min_level`, sauf si `RUST_LOG` est définie,
/// auquel cas ses directives prennent le dessus.
///
/// # Exemple
/// ```rust,no_run
/// use sgserver::logs::{LoggingOptions, init_logging};
///
/// init_logging(LoggingOptions::from_config());
/// ```
pub fn init_logging(options: LoggingOptions) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(options.min_level.clone()));

    let subscriber = tracing_subscriber::registry().with(filter);

    if options.enable_console {
        subscriber
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_ansi(true),
            )
            .init();
    } else {
        subscriber.init();
    }
}
