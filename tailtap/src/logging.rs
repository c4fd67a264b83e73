/// Installs `env_logger`, filtered by `RUST_LOG` (defaulting to `info`).
/// The core engine never logs on the hot path — only counts — so this is
/// low-volume enough that a background flush thread, unlike in larger
/// simulators, buys nothing here.
pub fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}
