//! Thin logging facade re-exporting `log`'s macros, with one init entry
//! point that stamps every line with the simulated cycle via a caller-
//! supplied prefix. Mirrors the teacher's `ckb-logger` crate: the engine
//! tiers depend on this crate instead of `log`/`env_logger` directly so the
//! output format can change in one place.

pub use log::{debug, error, info, log_enabled, trace, warn, Level, LevelFilter};

use std::io::Write;

/// Initializes the global logger from the `RUST_LOG` environment variable,
/// defaulting to `info` when unset. Idempotent: a second call is a no-op
/// (matches `env_logger`'s own `try_init` semantics).
pub fn init() {
    init_with_filter("info");
}

/// Initializes the global logger with an explicit default filter string,
/// used by tests that want a quieter (or louder) default than `info`.
pub fn init_with_filter(default_filter: &str) {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter));
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} {:<5} {}: {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.target(),
            record.args()
        )
    });
    let _ = builder.try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init_with_filter("debug");
        init_with_filter("debug");
        info!("logger initialized twice without panicking");
    }
}
