// ==========================================
// netlink 帧: nlmsghdr / nlattr 由 neli 编解码
// ==========================================
use std::io::Cursor;

use neli::{
    FromBytesWithInput, Header, Size, ToBytes,
    consts::nl::NlmFFlags,
    err::{DeError, SerError},
    genl::Nlattr,
    nl::{NlPayload, Nlmsghdr},
    types::{Buffer, GenlBuffer, NlBuffer},
};
use thiserror::Error;

pub const NFNETLINK_V0: u8 = 0;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed netlink data: {0}")]
    Netlink(#[from] DeError),

    #[error("{kind} attribute too short ({len} bytes)")]
    ShortAttribute { kind: &'static str, len: usize },
}

/// struct nfgenmsg and the attributes that follow it.
#[derive(Debug, PartialEq, Eq, Size, ToBytes, FromBytesWithInput, Header)]
pub struct Nfgenmsg {
    pub family: u8,
    pub version: u8,
    // 网络字节序
    res_id: u16,
    #[neli(input = "input.saturating_sub(Self::header_size())")]
    pub attrs: GenlBuffer<u16, Buffer>,
}

impl Nfgenmsg {
    pub fn new(family: u8, res_id: u16) -> Self {
        Self {
            family,
            version: NFNETLINK_V0,
            res_id: res_id.to_be(),
            attrs: GenlBuffer::new(),
        }
    }

    /// Queue number for nfnetlink_queue messages.
    pub fn res_id(&self) -> u16 {
        u16::from_be(self.res_id)
    }

    pub fn with_attr(mut self, kind: u16, data: &[u8]) -> Result<Self, SerError> {
        self.attrs.push(Nlattr::new(false, false, kind, Buffer::from(data))?);
        Ok(self)
    }
}

/// Every netfilter message is an nfgenmsg under a raw `u16` message type.
pub type NfMessage = Nlmsghdr<u16, Nfgenmsg>;

pub fn message(msg_type: u16, flags: NlmFFlags, seq: u32, body: Nfgenmsg) -> NfMessage {
    Nlmsghdr::new(
        None,
        msg_type,
        flags,
        Some(seq),
        None,
        NlPayload::Payload(body),
    )
}

/// Splits one datagram into its netlink messages.
pub fn decode(data: &[u8]) -> Result<NlBuffer<u16, Nfgenmsg>, DeError> {
    NlBuffer::from_bytes_with_input(&mut Cursor::new(data), data.len())
}

pub fn encode(msg: &NfMessage) -> Result<Vec<u8>, SerError> {
    let mut buf = Cursor::new(Vec::with_capacity(msg.padded_size()));
    msg.to_bytes(&mut buf)?;
    Ok(buf.into_inner())
}
