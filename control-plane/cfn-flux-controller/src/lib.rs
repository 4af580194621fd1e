pub mod artifact;
pub mod cloud;
pub mod config;
pub mod controller;
pub mod crd;
pub mod duration;
pub mod source;

use tracing_subscriber::{
    EnvFilter, filter::LevelFilter, layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Installs the global subscriber. `RUST_LOG` wins over `default_env`.
pub fn init_tracing(default_env: &str) {
    let filter = match std::env::var("RUST_LOG") {
        Ok(v) if !v.trim().is_empty() => EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .parse_lossy(v),
        _ => EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .parse_lossy(default_env),
    };

    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .try_init();
}
