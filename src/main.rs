use std::process::ExitCode;

// 引入模块
mod client;
mod config;
mod error;
mod logging;
mod netlink;
mod nfq_message;
mod queue;

use log::error;

use crate::{config::Config, queue::NetlinkQueue};

fn main() -> ExitCode {
    let config = Config::from_env();
    if let Err(e) = logging::setup_logging(config.log_level) {
        eprintln!("failed to initialise logging: {e}");
    }

    let result = client::run_with(NetlinkQueue::open, &config);
    if let Err(e) = &result {
        error!("{e}");
    }
    ExitCode::from(client::exit_status(&result))
}
