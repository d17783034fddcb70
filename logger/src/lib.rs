//! The `logger` module configures `env_logger`.
//!
//! Every entry point is safe to call more than once; later calls are
//! ignored, so tests may call [`setup`] freely.

use {
    env_logger::{Builder, Env},
    std::io::Write,
};

fn init(builder: &mut Builder) {
    builder
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {:<5} {}] {}",
                buf.timestamp_millis(),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .is_test(cfg!(test));
    // A logger may already be installed by an earlier call.
    let _ = builder.try_init();
}

/// Configure the logger from a filter string, ignoring `RUST_LOG`.
pub fn setup_with(filter: &str) {
    let mut builder = Builder::new();
    builder.parse_filters(filter);
    init(&mut builder);
}

/// Configure the logger from `RUST_LOG`, falling back to `filter`.
pub fn setup_with_default(filter: &str) {
    init(&mut Builder::from_env(Env::new().default_filter_or(filter)));
}

/// Configure the logger from `RUST_LOG`, logging errors only when unset.
pub fn setup() {
    setup_with_default("error");
}
