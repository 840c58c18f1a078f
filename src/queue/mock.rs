//! In-memory queue backend and log capture for tests.
use std::{
    cell::RefCell,
    collections::VecDeque,
    io,
    rc::Rc,
    sync::{Mutex, Once},
    thread::{self, ThreadId},
};

use log::{Level, LevelFilter, Log, Metadata, Record};
use neli::{
    consts::nl::{NlmF, NlmFFlags, Nlmsg},
    err::{Nlmsgerr, NlmsghdrErr},
    nl::{NlPayload, Nlmsghdr},
};

use crate::{
    netlink::{self, NfMessage, Nfgenmsg},
    nfq_message::{CONFIG_MSG_TYPE, NFQA_PACKET_HDR, NFQA_PAYLOAD, PACKET_MSG_TYPE},
    queue::{CopyMode, QueueBackend, Verdict},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    UnbindPf(u16),
    BindPf(u16),
    CreateQueue(u16),
    SetMode(u16, CopyMode, u32),
    Recv,
    Verdict {
        queue_num: u16,
        packet_id: u32,
        verdict: Verdict,
        payload: Option<Vec<u8>>,
    },
    DestroyQueue(u16),
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    UnbindPf,
    BindPf,
    CreateQueue,
    SetMode,
    Verdict,
}

pub struct MockQueue {
    reads: VecDeque<io::Result<Vec<u8>>>,
    calls: Rc<RefCell<Vec<Call>>>,
    failing: Option<Step>,
}

impl MockQueue {
    pub fn new() -> Self {
        Self {
            reads: VecDeque::new(),
            calls: Rc::new(RefCell::new(Vec::new())),
            failing: None,
        }
    }

    /// Shared view of every call made, still readable after the mock is dropped.
    pub fn journal(&self) -> Rc<RefCell<Vec<Call>>> {
        Rc::clone(&self.calls)
    }

    pub fn with_read(mut self, data: Vec<u8>) -> Self {
        self.reads.push_back(Ok(data));
        self
    }

    pub fn with_read_error(mut self, kind: io::ErrorKind) -> Self {
        self.reads.push_back(Err(io::Error::from(kind)));
        self
    }

    pub fn failing_at(mut self, step: Step) -> Self {
        self.failing = Some(step);
        self
    }

    fn record(&self, call: Call) {
        self.calls.borrow_mut().push(call);
    }

    fn outcome(&self, step: Step) -> io::Result<()> {
        if self.failing == Some(step) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("mock failure at {step:?}"),
            ));
        }
        Ok(())
    }
}

impl QueueBackend for MockQueue {
    fn unbind_pf(&mut self, family: u16) -> io::Result<()> {
        self.record(Call::UnbindPf(family));
        self.outcome(Step::UnbindPf)
    }

    fn bind_pf(&mut self, family: u16) -> io::Result<()> {
        self.record(Call::BindPf(family));
        self.outcome(Step::BindPf)
    }

    fn create_queue(&mut self, queue_num: u16) -> io::Result<()> {
        self.record(Call::CreateQueue(queue_num));
        self.outcome(Step::CreateQueue)
    }

    fn set_mode(&mut self, queue_num: u16, mode: CopyMode, range: u32) -> io::Result<()> {
        self.record(Call::SetMode(queue_num, mode, range));
        self.outcome(Step::SetMode)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.record(Call::Recv);
        match self.reads.pop_front() {
            Some(Ok(data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok(n)
            }
            Some(Err(e)) => Err(e),
            None => Ok(0),
        }
    }

    fn set_verdict(
        &mut self,
        queue_num: u16,
        packet_id: u32,
        verdict: Verdict,
        payload: Option<&[u8]>,
    ) -> io::Result<()> {
        self.record(Call::Verdict {
            queue_num,
            packet_id,
            verdict,
            payload: payload.map(<[u8]>::to_vec),
        });
        self.outcome(Step::Verdict)
    }

    fn destroy_queue(&mut self, queue_num: u16) -> io::Result<()> {
        self.record(Call::DestroyQueue(queue_num));
        Ok(())
    }
}

impl Drop for MockQueue {
    fn drop(&mut self) {
        self.record(Call::Close);
    }
}

/// A PACKET message as the kernel would frame it.
pub fn packet_message(queue_num: u16, packet_id: Option<u32>, payload: &[u8]) -> Vec<u8> {
    let mut body = Nfgenmsg::new(libc::AF_INET as u8, queue_num);
    if let Some(id) = packet_id {
        let mut hdr = [0u8; 7];
        hdr[..4].copy_from_slice(&id.to_be_bytes());
        hdr[4..6].copy_from_slice(&0x0800u16.to_be_bytes());
        body = body.with_attr(NFQA_PACKET_HDR, &hdr).unwrap();
    }
    let body = body.with_attr(NFQA_PAYLOAD, payload).unwrap();
    netlink::encode(&netlink::message(PACKET_MSG_TYPE, NlmFFlags::empty(), 0, body)).unwrap()
}

fn echoed<P>(seq: u32, nl_len: u32, nl_payload: P) -> NlmsghdrErr<u16, P> {
    NlmsghdrErr {
        nl_len,
        nl_type: CONFIG_MSG_TYPE,
        nl_flags: NlmFFlags::new(&[NlmF::Request, NlmF::Ack]),
        nl_seq: seq,
        nl_pid: 0,
        nl_payload,
    }
}

/// NLMSG_ERROR answering request `seq`. A nonzero `error` echoes the request body.
pub fn ack_message(seq: u32, error: i32) -> Vec<u8> {
    let payload = if error == 0 {
        NlPayload::Ack(Nlmsgerr {
            error,
            nlmsg: echoed(seq, 16, ()),
        })
    } else {
        NlPayload::Err(Nlmsgerr {
            error,
            nlmsg: echoed(seq, 20, Nfgenmsg::new(0, 0)),
        })
    };
    let msg: NfMessage = Nlmsghdr::new(
        None,
        Nlmsg::Error.into(),
        NlmFFlags::empty(),
        Some(seq),
        None,
        payload,
    );
    netlink::encode(&msg).unwrap()
}

// ==========================================
// 日志捕获: 按线程区分, 测试之间互不干扰
// ==========================================
static RECORDS: Mutex<Vec<(ThreadId, Level, String)>> = Mutex::new(Vec::new());

struct CaptureLogger;

impl Log for CaptureLogger {
    fn enabled(&self, _: &Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &Record<'_>) {
        RECORDS.lock().unwrap().push((
            thread::current().id(),
            record.level(),
            record.args().to_string(),
        ));
    }

    fn flush(&self) {}
}

static LOGGER: CaptureLogger = CaptureLogger;

pub fn capture_logs() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = log::set_logger(&LOGGER);
        log::set_max_level(LevelFilter::Trace);
    });
}

/// Lines logged at `level` by the calling thread.
pub fn captured(level: Level) -> Vec<String> {
    let me = thread::current().id();
    RECORDS
        .lock()
        .unwrap()
        .iter()
        .filter(|(id, lvl, _)| *id == me && *lvl == level)
        .map(|(_, _, line)| line.clone())
        .collect()
}
