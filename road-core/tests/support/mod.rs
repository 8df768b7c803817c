//! Test-only stand-ins for the three external collaborators (`Keep`,
//! `Packeteer`, `DatagramSink`). Real implementations live outside this
//! workspace; these give the transaction layer something to drive end to
//! end without a real socket, credential store, or CBOR body codec.
//!
//! `PlainPacketeer` is intentionally self-describing on the wire: it
//! prepends an encoded header to every packed body, so a standalone
//! `deliver` function can turn raw bytes received off a `MockSink`'s
//! outbox back into a full `Packet` for the peer stack's `receive`.

use road_core::{RoadConfig, Stack};
use road_wire::{
    AcceptStatus, CoatKind, DatagramSink, Keep, Packet, PacketHeader, PacketKind, PacketeerError, Packeteer,
    RxTray, Segment, TransactionKind, TxTray,
};
use std::collections::VecDeque;
use std::io;

const SEGMENT_PAYLOAD_MAX: usize = 32;

fn write_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_be_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn read_str(buf: &[u8], pos: &mut usize) -> String {
    let len = u32::from_be_bytes(buf[*pos..*pos + 4].try_into().unwrap()) as usize;
    *pos += 4;
    let s = String::from_utf8(buf[*pos..*pos + len].to_vec()).unwrap_or_default();
    *pos += len;
    s
}

fn tk_to_u8(tk: TransactionKind) -> u8 {
    match tk {
        TransactionKind::Join => 0,
        TransactionKind::Yoke => 1,
        TransactionKind::Allow => 2,
        TransactionKind::Alive => 3,
        TransactionKind::Message => 4,
    }
}

fn tk_from_u8(b: u8) -> TransactionKind {
    match b {
        0 => TransactionKind::Join,
        1 => TransactionKind::Yoke,
        2 => TransactionKind::Allow,
        3 => TransactionKind::Alive,
        _ => TransactionKind::Message,
    }
}

fn pk_to_u8(pk: PacketKind) -> u8 {
    match pk {
        PacketKind::Request => 0,
        PacketKind::Ack => 1,
        PacketKind::Response => 2,
        PacketKind::Nack => 3,
        PacketKind::Refuse => 4,
        PacketKind::Reject => 5,
        PacketKind::Renew => 6,
        PacketKind::Hello => 7,
        PacketKind::Cookie => 8,
        PacketKind::Initiate => 9,
        PacketKind::Unjoined => 10,
        PacketKind::Unallowed => 11,
        PacketKind::Resend => 12,
        PacketKind::Message => 13,
    }
}

fn pk_from_u8(b: u8) -> PacketKind {
    match b {
        0 => PacketKind::Request,
        1 => PacketKind::Ack,
        2 => PacketKind::Response,
        3 => PacketKind::Nack,
        4 => PacketKind::Refuse,
        5 => PacketKind::Reject,
        6 => PacketKind::Renew,
        7 => PacketKind::Hello,
        8 => PacketKind::Cookie,
        9 => PacketKind::Initiate,
        10 => PacketKind::Unjoined,
        11 => PacketKind::Unallowed,
        12 => PacketKind::Resend,
        _ => PacketKind::Message,
    }
}

fn encode_header(h: &PacketHeader) -> Vec<u8> {
    let mut out = Vec::new();
    write_str(&mut out, &h.sh);
    out.extend_from_slice(&h.sp.to_be_bytes());
    write_str(&mut out, &h.dh);
    out.extend_from_slice(&h.dp.to_be_bytes());
    out.extend_from_slice(&h.se.to_be_bytes());
    out.extend_from_slice(&h.de.to_be_bytes());
    out.push(tk_to_u8(h.tk));
    out.push(pk_to_u8(h.pk));
    out.push(u8::from(h.cf) | (u8::from(h.bf) << 1) | (u8::from(h.wf) << 2));
    out.extend_from_slice(&h.si.to_be_bytes());
    out.extend_from_slice(&h.ti.to_be_bytes());
    out
}

fn decode_header(buf: &[u8]) -> (PacketHeader, usize) {
    let mut pos = 0;
    let sh = read_str(buf, &mut pos);
    let sp = u16::from_be_bytes(buf[pos..pos + 2].try_into().unwrap());
    pos += 2;
    let dh = read_str(buf, &mut pos);
    let dp = u16::from_be_bytes(buf[pos..pos + 2].try_into().unwrap());
    pos += 2;
    let se = u32::from_be_bytes(buf[pos..pos + 4].try_into().unwrap());
    pos += 4;
    let de = u32::from_be_bytes(buf[pos..pos + 4].try_into().unwrap());
    pos += 4;
    let tk = tk_from_u8(buf[pos]);
    pos += 1;
    let pk = pk_from_u8(buf[pos]);
    pos += 1;
    let flags = buf[pos];
    pos += 1;
    let si = u32::from_be_bytes(buf[pos..pos + 4].try_into().unwrap());
    pos += 4;
    let ti = u32::from_be_bytes(buf[pos..pos + 4].try_into().unwrap());
    pos += 4;
    let header = PacketHeader {
        sh,
        sp,
        dh,
        dp,
        se,
        de,
        tk,
        pk,
        cf: flags & 0b001 != 0,
        bf: flags & 0b010 != 0,
        wf: flags & 0b100 != 0,
        si,
        ti,
        ck: CoatKind::Nada,
        fk: CoatKind::Nada,
    };
    (header, pos)
}

fn encode_fields(body: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    for (name, value) in body {
        write_str(&mut out, name);
        out.extend_from_slice(&(value.len() as u32).to_be_bytes());
        out.extend_from_slice(value);
    }
    out
}

fn decode_fields(buf: &[u8]) -> Vec<(String, Vec<u8>)> {
    let mut pos = 0;
    let count = u32::from_be_bytes(buf[pos..pos + 4].try_into().unwrap());
    pos += 4;
    let mut fields = Vec::new();
    for _ in 0..count {
        let name = read_str(buf, &mut pos);
        let len = u32::from_be_bytes(buf[pos..pos + 4].try_into().unwrap()) as usize;
        pos += 4;
        let value = buf[pos..pos + len].to_vec();
        pos += len;
        fields.push((name, value));
    }
    fields
}

/// Reconstructs a `Packet` from raw bytes that crossed a `MockSink`, the way
/// a real packeting layer would decode a header off an inbound datagram.
pub fn deliver(bytes: Vec<u8>) -> Packet {
    let (header, _) = decode_header(&bytes);
    Packet { header, packed: bytes }
}

#[derive(Debug, Default)]
pub struct PlainPacketeer;

impl Packeteer for PlainPacketeer {
    fn pack(&self, header: PacketHeader, body: &[(&str, Vec<u8>)]) -> Result<Packet, PacketeerError> {
        let mut packed = encode_header(&header);
        packed.extend_from_slice(&encode_fields(body));
        Ok(Packet { header, packed })
    }

    fn parse_body(&self, packet: &Packet) -> Result<Vec<(String, Vec<u8>)>, PacketeerError> {
        let (_, consumed) = decode_header(&packet.packed);
        if consumed > packet.packed.len() {
            return Err(PacketeerError::Parsing("truncated packet".into()));
        }
        Ok(decode_fields(&packet.packed[consumed..]))
    }

    fn split(&self, header: &PacketHeader, body: &[u8]) -> Result<TxTray, PacketeerError> {
        let chunks: Vec<&[u8]> = if body.is_empty() {
            vec![&body[0..0]]
        } else {
            body.chunks(SEGMENT_PAYLOAD_MAX).collect()
        };
        let total = chunks.len() as u32;
        let mut segments = Vec::with_capacity(chunks.len());
        for (i, chunk) in chunks.into_iter().enumerate() {
            let fields: Vec<(&str, Vec<u8>)> = vec![
                ("index", (i as u32).to_be_bytes().to_vec()),
                ("total", total.to_be_bytes().to_vec()),
                ("payload", chunk.to_vec()),
            ];
            let mut packed = encode_header(header);
            packed.extend_from_slice(&encode_fields(&fields));
            segments.push(Segment { index: i as u16, packed });
        }
        Ok(TxTray { segments })
    }

    fn new_rx_tray(&self) -> RxTray {
        RxTray::new()
    }
}

/// Accepts every credential by default; `reject_all` flips that for
/// refusal-path tests.
#[derive(Debug, Default, Clone)]
pub struct MockKeep {
    pub reject_all: bool,
    pub dumped_remotes: Vec<u32>,
    pub dumped_locals: Vec<u32>,
}

impl Keep for MockKeep {
    fn status_remote(&mut self, _role: &str, _verhex: &[u8], _pubhex: &[u8], _main: bool, _dump: bool) -> AcceptStatus {
        if self.reject_all {
            AcceptStatus::Rejected
        } else {
            AcceptStatus::Accepted
        }
    }

    fn dump_remote(&mut self, uid: u32) {
        self.dumped_remotes.push(uid);
    }

    fn dump_local(&mut self, uid: u32) {
        self.dumped_locals.push(uid);
    }

    fn load_remote(&self, _uid: u32) -> Option<AcceptStatus> {
        None
    }
}

/// Collects every outbound datagram instead of sending it anywhere.
#[derive(Debug, Default)]
pub struct MockSink {
    pub outbox: VecDeque<((String, u16), Vec<u8>)>,
}

impl DatagramSink for MockSink {
    fn send_to(&mut self, addr: (String, u16), bytes: Vec<u8>) -> io::Result<()> {
        self.outbox.push_back((addr, bytes));
        Ok(())
    }
}

pub type TestStack = Stack<MockKeep, PlainPacketeer, MockSink>;

pub fn new_stack(config: RoadConfig) -> TestStack {
    Stack::new(config, MockKeep::default(), PlainPacketeer, MockSink::default())
}

/// Drains every packet currently in `from`'s outbox into `to`'s `receive`,
/// addressed by `to`'s own `(host, port)`. Returns how many packets moved.
pub fn deliver_all(from: &mut TestStack, to: &mut TestStack) -> usize {
    let to_addr = to.local.ha.clone();
    let mut moved = 0;
    while let Some((addr, bytes)) = from.sink.outbox.pop_front() {
        if addr == to_addr {
            to.receive(deliver(bytes));
            moved += 1;
        }
    }
    moved
}

/// Repeatedly bounces whatever each side has queued until both outboxes are
/// empty or `max_rounds` is hit (guards against infinite ping-pong bugs).
pub fn pump(a: &mut TestStack, b: &mut TestStack, max_rounds: usize) {
    for _ in 0..max_rounds {
        let moved_to_b = deliver_all(a, b);
        let moved_to_a = deliver_all(b, a);
        if moved_to_b == 0 && moved_to_a == 0 {
            return;
        }
    }
}
