use env_logger::{Builder, Env, Target};
use log::LevelFilter;
use std::io::Write;

/// Install the global logger.
///
/// `RUST_LOG` wins over `default_level` when it is set.
pub fn setup_logging(default_level: LevelFilter) {
    let env = Env::default().default_filter_or(default_level.as_str());

    let _ = Builder::from_env(env)
        .target(Target::Stderr)
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {:<5} [{}] {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .try_init();
}

/// Map a `-v` count to a level filter.
pub fn level_for_verbosity(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}
