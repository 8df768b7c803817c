//! External-collaborator interfaces. The transaction layer depends on these
//! but never implements the real thing — a datagram socket, a full CBOR/JSON
//! packeting stack, and a persisted credential store all live outside this
//! workspace.

use crate::header::{Packet, PacketHeader};
use crate::kinds::AcceptStatus;
use crate::tray::{RxTray, TxTray};
use std::io;

/// The keep layer: persists and acceptance-checks remote long-term credentials.
pub trait Keep {
    /// Judge whether `(role, verhex, pubhex)` is accepted, pending, or
    /// rejected for a remote, optionally persisting the decision.
    fn status_remote(&mut self, role: &str, verhex: &[u8], pubhex: &[u8], main: bool, dump: bool) -> AcceptStatus;

    fn dump_remote(&mut self, uid: u32);

    fn dump_local(&mut self, uid: u32);

    fn load_remote(&self, uid: u32) -> Option<AcceptStatus>;
}

/// The packeting layer: packs/parses bodies, and builds/reassembles trays
/// for segmented messages.
pub trait Packeteer {
    /// Pack a header plus a body (an ordered field list) into an on-wire packet.
    fn pack(&self, header: PacketHeader, body: &[(&str, Vec<u8>)]) -> Result<Packet, PacketeerError>;

    /// Parse an inbound packet's body into an ordered field list.
    fn parse_body(&self, packet: &Packet) -> Result<Vec<(String, Vec<u8>)>, PacketeerError>;

    /// Split a message body into an ordered sequence of packed segments.
    fn split(&self, header: &PacketHeader, body: &[u8]) -> Result<TxTray, PacketeerError>;

    /// Start a fresh reassembly tray for an inbound segmented message.
    fn new_rx_tray(&self) -> RxTray;
}

#[derive(Debug, thiserror::Error)]
pub enum PacketeerError {
    #[error("packing error: {0}")]
    Packing(String),
    #[error("parsing error: {0}")]
    Parsing(String),
}

/// The datagram I/O layer's transmit half.
pub trait DatagramSink {
    fn send_to(&mut self, addr: (String, u16), bytes: Vec<u8>) -> io::Result<()>;
}
