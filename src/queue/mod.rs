use std::io;

pub mod kernel;
#[cfg(test)]
pub mod mock;

pub use kernel::NetlinkQueue;

const NF_ACCEPT: u32 = 1;

/// 发回内核的裁决, 只放行
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
}

impl Verdict {
    pub fn code(self) -> u32 {
        match self {
            Verdict::Accept => NF_ACCEPT,
        }
    }
}

/// How much of each packet the kernel copies into the queued message.
/// Only full copies (`NFQNL_COPY_PACKET`) are requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CopyMode {
    Packet = 2,
}

/// Kernel side of a packet queue.
///
/// Opening the handle is the implementor's constructor and closing it is
/// dropping the value.
pub trait QueueBackend {
    fn unbind_pf(&mut self, family: u16) -> io::Result<()>;
    fn bind_pf(&mut self, family: u16) -> io::Result<()>;
    fn create_queue(&mut self, queue_num: u16) -> io::Result<()>;
    fn set_mode(&mut self, queue_num: u16, mode: CopyMode, range: u32) -> io::Result<()>;

    /// Blocking read of one datagram; `Ok(0)` means the peer has gone away.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn set_verdict(
        &mut self,
        queue_num: u16,
        packet_id: u32,
        verdict: Verdict,
        payload: Option<&[u8]>,
    ) -> io::Result<()>;

    fn destroy_queue(&mut self, queue_num: u16) -> io::Result<()>;
}

/// A backend bound to one queue, handed to the packet callback.
pub struct QueueHandle<'a, B: QueueBackend> {
    backend: &'a mut B,
    queue_num: u16,
}

impl<'a, B: QueueBackend> QueueHandle<'a, B> {
    pub fn new(backend: &'a mut B, queue_num: u16) -> Self {
        Self { backend, queue_num }
    }

    pub fn set_verdict(
        &mut self,
        packet_id: u32,
        verdict: Verdict,
        payload: Option<&[u8]>,
    ) -> io::Result<()> {
        self.backend
            .set_verdict(self.queue_num, packet_id, verdict, payload)
    }
}
