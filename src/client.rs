// ==========================================
// 队列客户端: setup -> 收包循环 -> teardown
// ==========================================
use std::io;

use log::{debug, error, info, warn};
use neli::nl::NlPayload;

use crate::{
    config::Config,
    error::SetupError,
    netlink::{self, DecodeError},
    nfq_message::{PACKET_MSG_TYPE, PacketMessage},
    queue::{QueueBackend, QueueHandle, Verdict},
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub reads: u64,
    pub packets: u64,
    pub handler_failures: u64,
    pub decode_failures: u64,
}

#[derive(Debug)]
pub enum LoopExit {
    EndOfStream,
    ReadError(io::Error),
}

#[derive(Debug)]
pub struct LoopSummary {
    pub stats: QueueStats,
    pub exit: LoopExit,
}

/// A fully configured queue. Dropping it destroys the queue, then the backend closes.
pub struct BoundQueue<B: QueueBackend, F> {
    backend: B,
    queue_num: u16,
    recv_buffer_size: usize,
    callback: F,
    stats: QueueStats,
}

pub fn make_queue<B, F>(
    mut backend: B,
    config: &Config,
    callback: F,
) -> Result<BoundQueue<B, F>, SetupError>
where
    B: QueueBackend,
    F: FnMut(&mut QueueHandle<'_, B>, &PacketMessage<'_>) -> io::Result<()>,
{
    let family = config.family;
    let queue_num = config.queue_num;

    backend
        .unbind_pf(family)
        .map_err(|source| SetupError::UnbindFamily { family, source })?;
    backend
        .bind_pf(family)
        .map_err(|source| SetupError::BindFamily { family, source })?;
    backend
        .create_queue(queue_num)
        .map_err(|source| SetupError::CreateQueue { queue_num, source })?;
    backend
        .set_mode(queue_num, config.copy_mode, config.copy_range)
        .map_err(|source| SetupError::SetMode { queue_num, source })?;

    info!(
        "queue {} bound (family {}, copy {:?} up to {} bytes)",
        queue_num, family, config.copy_mode, config.copy_range
    );
    Ok(BoundQueue {
        backend,
        queue_num,
        recv_buffer_size: config.recv_buffer_size,
        callback,
        stats: QueueStats::default(),
    })
}

impl<B, F> BoundQueue<B, F>
where
    B: QueueBackend,
    F: FnMut(&mut QueueHandle<'_, B>, &PacketMessage<'_>) -> io::Result<()>,
{
    /// Reads until end of stream or a read error. Every packet gets its verdict
    /// from the callback before the next read.
    pub fn run(&mut self) -> LoopSummary {
        let mut buf = vec![0u8; self.recv_buffer_size];
        let exit = loop {
            match self.backend.recv(&mut buf) {
                Ok(0) => {
                    debug!("queue {} reached end of stream", self.queue_num);
                    break LoopExit::EndOfStream;
                }
                Ok(n) => {
                    self.stats.reads += 1;
                    if let Err(e) = self.handle_packet(&buf[..n]) {
                        self.stats.decode_failures += 1;
                        warn!("dropping undecodable {n} byte read: {e}");
                    }
                }
                Err(e) => {
                    error!("recv: {e}");
                    break LoopExit::ReadError(e);
                }
            }
        };
        LoopSummary {
            stats: self.stats,
            exit,
        }
    }

    /// Decodes one read and calls the callback once per packet message in it.
    pub fn handle_packet(&mut self, data: &[u8]) -> Result<usize, DecodeError> {
        let mut handled = 0;
        let msgs = netlink::decode(data)?;
        for msg in msgs.iter() {
            let body = match &msg.nl_payload {
                NlPayload::Payload(body) if msg.nl_type == PACKET_MSG_TYPE => body,
                NlPayload::Err(err) => {
                    warn!("kernel rejected request {}: {err}", msg.nl_seq);
                    continue;
                }
                NlPayload::Ack(_) | NlPayload::Empty => continue,
                NlPayload::Payload(_) => {
                    debug!("ignoring netlink message type {:#06x}", msg.nl_type);
                    continue;
                }
            };

            let packet = PacketMessage::parse(body)?;
            if packet.queue_num != self.queue_num {
                warn!(
                    "packet {} for unknown queue {}",
                    packet.packet_id(),
                    packet.queue_num
                );
                continue;
            }

            self.stats.packets += 1;
            let mut handle = QueueHandle::new(&mut self.backend, self.queue_num);
            if let Err(e) = (self.callback)(&mut handle, &packet) {
                self.stats.handler_failures += 1;
                warn!(
                    "verdict for packet {} on queue {} failed: {e}",
                    packet.packet_id(),
                    self.queue_num
                );
            }
            handled += 1;
        }
        Ok(handled)
    }
}

impl<B: QueueBackend, F> Drop for BoundQueue<B, F> {
    fn drop(&mut self) {
        if let Err(e) = self.backend.destroy_queue(self.queue_num) {
            warn!("error destroying queue {}: {e}", self.queue_num);
        }
        debug!("queue {} destroyed", self.queue_num);
    }
}

/// Accepts every packet unchanged.
pub fn accept_packet<B: QueueBackend>(
    queue: &mut QueueHandle<'_, B>,
    packet: &PacketMessage<'_>,
) -> io::Result<()> {
    let id = packet.packet_id();
    info!("Packet handled (ID: {id})");
    queue.set_verdict(id, Verdict::Accept, None)
}

/// open -> setup -> loop -> teardown. Only setup can fail.
pub fn run_with<B, O>(open: O, config: &Config) -> Result<LoopSummary, SetupError>
where
    B: QueueBackend,
    O: FnOnce() -> io::Result<B>,
{
    let backend = open().map_err(SetupError::Open)?;
    let mut queue = make_queue(backend, config, accept_packet::<B>)?;
    let summary = queue.run();
    drop(queue);

    let stats = summary.stats;
    let reason = match &summary.exit {
        LoopExit::EndOfStream => "end of stream".to_string(),
        LoopExit::ReadError(e) => format!("read error ({})", e.kind()),
    };
    info!(
        "queue {} closed on {reason}: {} packets in {} reads, {} failed verdicts, {} bad reads",
        config.queue_num, stats.packets, stats.reads, stats.handler_failures, stats.decode_failures
    );
    Ok(summary)
}

pub fn exit_status(result: &Result<LoopSummary, SetupError>) -> u8 {
    match result {
        Ok(_) => 0,
        Err(_) => 1,
    }
}
