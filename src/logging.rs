use chrono::Local;
use fern::Dispatch;
use log::{Level, LevelFilter};

/// info 及以下写 stdout, warn / error 写 stderr
pub fn setup_logging(level: LevelFilter) -> Result<(), fern::InitError> {
    Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{:5}] {}",
                Local::now().format("%H:%M:%S%.3f"),
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(
            Dispatch::new()
                .filter(|meta| meta.level() > Level::Warn)
                .chain(std::io::stdout()),
        )
        .chain(
            Dispatch::new()
                .level(LevelFilter::Warn)
                .chain(std::io::stderr()),
        )
        .apply()?;
    Ok(())
}
