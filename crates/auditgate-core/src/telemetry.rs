//! Tracing setup for auditgate binaries.
//!
//! Log lines go to stderr so stdout stays free for the verdict summary.
//! `RUST_LOG` overrides the default filter, which keeps dependencies at
//! `warn` and auditgate's own crates at the requested level.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber. Only the first call takes effect.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
    };
    installed.ok();
}

fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    format!("warn,auditgate_core={level},auditgate={level}")
}
