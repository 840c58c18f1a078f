// ==========================================
// nfnetlink_queue 报文: 解包 PACKET, 构造 CONFIG / VERDICT
// ==========================================
use log::warn;
use neli::{
    consts::nl::{NlmF, NlmFFlags},
    err::SerError,
};

use crate::{
    netlink::{self, DecodeError, NfMessage, Nfgenmsg},
    queue::{CopyMode, Verdict},
};

const NFNL_SUBSYS_QUEUE: u16 = 3;

const NFQNL_MSG_PACKET: u16 = 0;
const NFQNL_MSG_VERDICT: u16 = 1;
const NFQNL_MSG_CONFIG: u16 = 2;

pub const PACKET_MSG_TYPE: u16 = queue_msg_type(NFQNL_MSG_PACKET);
pub const VERDICT_MSG_TYPE: u16 = queue_msg_type(NFQNL_MSG_VERDICT);
pub const CONFIG_MSG_TYPE: u16 = queue_msg_type(NFQNL_MSG_CONFIG);

pub const NFQA_PACKET_HDR: u16 = 1;
pub const NFQA_VERDICT_HDR: u16 = 2;
pub const NFQA_MARK: u16 = 3;
pub const NFQA_IFINDEX_INDEV: u16 = 5;
pub const NFQA_IFINDEX_OUTDEV: u16 = 6;
pub const NFQA_PAYLOAD: u16 = 10;

pub const NFQA_CFG_CMD: u16 = 1;
pub const NFQA_CFG_PARAMS: u16 = 2;

const fn queue_msg_type(kind: u16) -> u16 {
    (NFNL_SUBSYS_QUEUE << 8) | kind
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConfigCommand {
    Bind = 1,
    Unbind = 2,
    PfBind = 3,
    PfUnbind = 4,
}

/// struct nfqnl_msg_packet_hdr
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub packet_id: u32,
    pub hw_protocol: u16,
    pub hook: u8,
}

impl PacketHeader {
    fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < 7 {
            return Err(DecodeError::ShortAttribute {
                kind: "packet header",
                len: data.len(),
            });
        }
        Ok(Self {
            packet_id: u32::from_be_bytes([data[0], data[1], data[2], data[3]]),
            hw_protocol: u16::from_be_bytes([data[4], data[5]]),
            hook: data[6],
        })
    }
}

/// One queued packet as delivered by the kernel. Borrows the decoded message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketMessage<'a> {
    pub queue_num: u16,
    pub family: u8,
    pub header: Option<PacketHeader>,
    pub mark: Option<u32>,
    pub indev: Option<u32>,
    pub outdev: Option<u32>,
    pub payload: Option<&'a [u8]>,
}

impl<'a> PacketMessage<'a> {
    /// Only a malformed packet header fails the parse. A short mark or
    /// interface attribute is logged and left unset.
    pub fn parse(body: &'a Nfgenmsg) -> Result<Self, DecodeError> {
        let mut packet = PacketMessage {
            queue_num: body.res_id(),
            family: body.family,
            header: None,
            mark: None,
            indev: None,
            outdev: None,
            payload: None,
        };

        for attr in body.attrs.iter() {
            let data = attr.nla_payload.as_ref();
            match attr.nla_type.nla_type {
                NFQA_PACKET_HDR => packet.header = Some(PacketHeader::parse(data)?),
                NFQA_MARK => packet.mark = optional_u32(data, "mark"),
                NFQA_IFINDEX_INDEV => packet.indev = optional_u32(data, "indev"),
                NFQA_IFINDEX_OUTDEV => packet.outdev = optional_u32(data, "outdev"),
                NFQA_PAYLOAD => packet.payload = Some(data),
                _ => {}
            }
        }

        Ok(packet)
    }

    /// Queue-assigned identifier, 0 when the kernel sent no packet header.
    pub fn packet_id(&self) -> u32 {
        self.header.map(|h| h.packet_id).unwrap_or(0)
    }
}

impl AsRef<[u8]> for PacketMessage<'_> {
    fn as_ref(&self) -> &[u8] {
        self.payload.unwrap_or(&[])
    }
}

fn optional_u32(data: &[u8], kind: &str) -> Option<u32> {
    let value = data
        .get(..4)
        .and_then(|b| <[u8; 4]>::try_from(b).ok())
        .map(u32::from_be_bytes);
    if value.is_none() {
        warn!("ignoring short {kind} attribute ({} bytes)", data.len());
    }
    value
}

fn config_flags() -> NlmFFlags {
    NlmFFlags::new(&[NlmF::Request, NlmF::Ack])
}

pub fn config_command(
    seq: u32,
    command: ConfigCommand,
    queue_num: u16,
    family: u16,
) -> Result<NfMessage, SerError> {
    let pf = family.to_be_bytes();
    let body = Nfgenmsg::new(libc::AF_UNSPEC as u8, queue_num)
        .with_attr(NFQA_CFG_CMD, &[command as u8, 0, pf[0], pf[1]])?;
    Ok(netlink::message(CONFIG_MSG_TYPE, config_flags(), seq, body))
}

pub fn config_params(
    seq: u32,
    queue_num: u16,
    mode: CopyMode,
    range: u32,
) -> Result<NfMessage, SerError> {
    let mut params = [0u8; 5];
    params[..4].copy_from_slice(&range.to_be_bytes());
    params[4] = mode as u8;
    let body =
        Nfgenmsg::new(libc::AF_UNSPEC as u8, queue_num).with_attr(NFQA_CFG_PARAMS, &params)?;
    Ok(netlink::message(CONFIG_MSG_TYPE, config_flags(), seq, body))
}

/// Verdicts are not acknowledged.
pub fn verdict_message(
    seq: u32,
    queue_num: u16,
    packet_id: u32,
    verdict: Verdict,
    payload: Option<&[u8]>,
) -> Result<NfMessage, SerError> {
    let mut hdr = [0u8; 8];
    hdr[..4].copy_from_slice(&verdict.code().to_be_bytes());
    hdr[4..].copy_from_slice(&packet_id.to_be_bytes());

    let mut body =
        Nfgenmsg::new(libc::AF_UNSPEC as u8, queue_num).with_attr(NFQA_VERDICT_HDR, &hdr)?;
    if let Some(payload) = payload {
        body = body.with_attr(NFQA_PAYLOAD, payload)?;
    }
    Ok(netlink::message(
        VERDICT_MSG_TYPE,
        NlmFFlags::new(&[NlmF::Request]),
        seq,
        body,
    ))
}
