use std::env;

use log::LevelFilter;

use crate::queue::CopyMode;

pub const QUEUE_NUM: u16 = 0;
pub const COPY_RANGE: u32 = 0xFFFF;
pub const RECV_BUFFER_SIZE: usize = 4096;
pub const LOG_LEVEL_ENV: &str = "NFQ_LOG";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub queue_num: u16,
    pub family: u16,
    pub copy_mode: CopyMode,
    pub copy_range: u32,
    pub recv_buffer_size: usize,
    pub log_level: LevelFilter,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue_num: QUEUE_NUM,
            family: libc::AF_INET as u16,
            copy_mode: CopyMode::Packet,
            copy_range: COPY_RANGE,
            recv_buffer_size: RECV_BUFFER_SIZE,
            log_level: LevelFilter::Info,
        }
    }
}

impl Config {
    /// Hardcoded queue settings; only the log level may come from `NFQ_LOG`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(level) = env::var(LOG_LEVEL_ENV).ok().and_then(|v| parse_log_level(&v)) {
            config.log_level = level;
        }
        config
    }
}

pub fn parse_log_level(value: &str) -> Option<LevelFilter> {
    value.trim().parse().ok()
}
