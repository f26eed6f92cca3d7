use std::sync::Once;

use log::LevelFilter;

static INIT_LOGGER: Once = Once::new();

pub fn setup_logger(verbosity: u8) {
    INIT_LOGGER.call_once(|| {
        let level = match verbosity {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            _ => LevelFilter::Debug,
        };
        // RUST_LOG still wins over the -v default.
        let _ = env_logger::Builder::new()
            .filter_level(level)
            .parse_default_env()
            .format_timestamp_millis()
            .try_init();
    });
}
