// ==========================================
// 内核后端: NETLINK_NETFILTER 套接字
// ==========================================
use std::{collections::VecDeque, error::Error, io, os::fd::AsRawFd};

use chrono::Utc;
use log::{debug, trace, warn};
use neli::{consts::socket::NlFamily, nl::NlPayload, socket::NlSocket};

use crate::{
    netlink::{self, NfMessage},
    nfq_message::{self, ConfigCommand},
    queue::{CopyMode, QueueBackend, Verdict},
};

const ACK_BUFFER_SIZE: usize = 8192;

pub struct NetlinkQueue {
    socket: NlSocket,
    seq: u32,
    // 等待 ACK 期间收到的报文, 留给下一次 recv
    pending: VecDeque<Vec<u8>>,
}

impl NetlinkQueue {
    pub fn open() -> io::Result<Self> {
        let socket = NlSocket::connect(NlFamily::Netfilter, None, &[])?;
        debug!("opened netfilter netlink socket (fd {})", socket.as_raw_fd());
        Ok(Self::with_socket(socket, Utc::now().timestamp() as u32))
    }

    /// Wraps a connected socket. The first request carries `seq + 1`.
    pub fn with_socket(socket: NlSocket, seq: u32) -> Self {
        Self {
            socket,
            seq,
            pending: VecDeque::new(),
        }
    }

    fn next_seq(&mut self) -> u32 {
        self.seq = self.seq.wrapping_add(1);
        self.seq
    }

    fn send(&self, msg: &NfMessage) -> io::Result<()> {
        let buf = netlink::encode(msg).map_err(invalid_data)?;
        self.socket.send(&buf, 0)?;
        Ok(())
    }

    /// Sends a request flagged for ACK and blocks until the kernel answers it.
    fn request(&mut self, msg: NfMessage) -> io::Result<()> {
        let seq = msg.nl_seq;
        self.send(&msg)?;

        let mut scratch = vec![0u8; ACK_BUFFER_SIZE];
        loop {
            let n = self.socket.recv(&mut scratch[..], 0)?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "netlink socket closed while waiting for ack",
                ));
            }

            let mut answer = None;
            for msg in netlink::decode(&scratch[..n]).map_err(invalid_data)? {
                match &msg.nl_payload {
                    NlPayload::Ack(ack) if msg.nl_seq == seq => answer = Some(ack.error),
                    NlPayload::Err(err) if msg.nl_seq == seq => answer = Some(err.error),
                    _ => {
                        trace!("holding back netlink message type {:#06x}", msg.nl_type);
                        self.pending.push_back(netlink::encode(&msg).map_err(invalid_data)?);
                    }
                }
            }

            match answer {
                Some(0) => return Ok(()),
                Some(errno) => return Err(io::Error::from_raw_os_error(-errno)),
                None => continue,
            }
        }
    }

    fn config(&mut self, command: ConfigCommand, queue_num: u16, family: u16) -> io::Result<()> {
        let seq = self.next_seq();
        let msg =
            nfq_message::config_command(seq, command, queue_num, family).map_err(invalid_data)?;
        self.request(msg)
    }
}

fn invalid_data<E>(e: E) -> io::Error
where
    E: Into<Box<dyn Error + Send + Sync>>,
{
    io::Error::new(io::ErrorKind::InvalidData, e)
}

impl QueueBackend for NetlinkQueue {
    fn unbind_pf(&mut self, family: u16) -> io::Result<()> {
        self.config(ConfigCommand::PfUnbind, 0, family)
    }

    fn bind_pf(&mut self, family: u16) -> io::Result<()> {
        self.config(ConfigCommand::PfBind, 0, family)
    }

    fn create_queue(&mut self, queue_num: u16) -> io::Result<()> {
        self.config(ConfigCommand::Bind, queue_num, 0)
    }

    fn set_mode(&mut self, queue_num: u16, mode: CopyMode, range: u32) -> io::Result<()> {
        let seq = self.next_seq();
        let msg = nfq_message::config_params(seq, queue_num, mode, range).map_err(invalid_data)?;
        self.request(msg)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(held) = self.pending.pop_front() {
            let n = held.len().min(buf.len());
            if n < held.len() {
                warn!("held-back message of {} bytes truncated to {n}", held.len());
            }
            buf[..n].copy_from_slice(&held[..n]);
            return Ok(n);
        }
        self.socket.recv(buf, 0)
    }

    fn set_verdict(
        &mut self,
        queue_num: u16,
        packet_id: u32,
        verdict: Verdict,
        payload: Option<&[u8]>,
    ) -> io::Result<()> {
        let seq = self.next_seq();
        let msg = nfq_message::verdict_message(seq, queue_num, packet_id, verdict, payload)
            .map_err(invalid_data)?;
        self.send(&msg)
    }

    fn destroy_queue(&mut self, queue_num: u16) -> io::Result<()> {
        self.config(ConfigCommand::Unbind, queue_num, 0)
    }
}
