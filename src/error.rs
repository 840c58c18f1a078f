use std::io;

use thiserror::Error;

/// Fatal failures while bringing the queue up. Any of these ends the process with status 1.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("error opening queue handle: {0}")]
    Open(#[source] io::Error),

    #[error("error unbinding existing handler for family {family}: {source}")]
    UnbindFamily { family: u16, source: io::Error },

    #[error("error binding handler for family {family}: {source}")]
    BindFamily { family: u16, source: io::Error },

    #[error("error creating queue {queue_num}: {source}")]
    CreateQueue { queue_num: u16, source: io::Error },

    #[error("error setting copy mode on queue {queue_num}: {source}")]
    SetMode { queue_num: u16, source: io::Error },
}
