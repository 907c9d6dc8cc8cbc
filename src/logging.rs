//! Tracing subscriber setup.
//!
//! `RUST_LOG` wins when set; otherwise the configured level applies to this
//! crate and `audit` records, with dependencies held at `warn`.

use std::sync::OnceLock;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, ServerConfig};

static LOG_INIT: OnceLock<()> = OnceLock::new();

pub fn default_directive(level: &str) -> String {
    format!("warn,kagra_api={level},audit={level},tower_http={level}")
}

pub fn init_tracing(server: &ServerConfig) {
    LOG_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive(&server.log_level)));
        let registry = tracing_subscriber::registry().with(filter);

        let _ = match server.log_format {
            LogFormat::Json => registry
                .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
                .try_init(),
            LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        };
    });
}
