use crate::kinds::{CoatKind, FootKind, PacketKind, TransactionKind};
use serde::{Deserialize, Serialize};

/// The twelve header fields every on-wire packet carries, consumed and
/// produced by the transaction layer but serialized by the packeting layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketHeader {
    /// Source host.
    pub sh: String,
    /// Source port.
    pub sp: u16,
    /// Destination host.
    pub dh: String,
    /// Destination port.
    pub dp: u16,
    /// Source uid (0 = unknown/ephemeral).
    pub se: u32,
    /// Destination uid (0 = unknown/ephemeral).
    pub de: u32,
    /// Transaction kind.
    pub tk: TransactionKind,
    /// Packet kind.
    pub pk: PacketKind,
    /// Correspondent flag: true if sender considers itself the correspondent.
    pub cf: bool,
    /// Broadcast flag (reserved).
    pub bf: bool,
    /// Wait flag: segment-by-segment acking requested.
    pub wf: bool,
    /// Session id.
    pub si: u32,
    /// Transaction id.
    pub ti: u32,
    /// Coat kind (always `Nada` at this layer).
    pub ck: CoatKind,
    /// Foot kind (always `Nada` at this layer).
    pub fk: FootKind,
}

impl PacketHeader {
    pub fn source_addr(&self) -> (String, u16) {
        (self.sh.clone(), self.sp)
    }

    pub fn dest_addr(&self) -> (String, u16) {
        (self.dh.clone(), self.dp)
    }

    /// Builds the header for a reply to `self`, swapping source and
    /// destination the way `Staler`/`Stalent` mirror a stale packet's header.
    pub fn mirrored(&self, pk: PacketKind) -> PacketHeader {
        PacketHeader {
            sh: self.dh.clone(),
            sp: self.dp,
            dh: self.sh.clone(),
            dp: self.sp,
            se: self.de,
            de: self.se,
            tk: self.tk,
            pk,
            cf: !self.cf,
            bf: self.bf,
            wf: self.wf,
            si: self.si,
            ti: self.ti,
            ck: CoatKind::Nada,
            fk: FootKind::Nada,
        }
    }
}

/// A framed on-wire packet: header plus an opaque packed body.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub header: PacketHeader,
    pub packed: Vec<u8>,
}
