//! Staler / Stalent (C2): stateless nacks for packets that match no live
//! transaction. Neither side is ever registered.

use crate::stack::Stack;
use road_wire::{DatagramSink, Keep, Packeteer};
use road_wire::{Packet, PacketKind};

/// A correspondent-style packet (`rmt` set) arrived with no matching
/// initiator: mirror its header and nack the sender directly.
pub fn stale_correspondent<K: Keep, P: Packeteer, D: DatagramSink>(
    stack: &mut Stack<K, P, D>,
    packet: &Packet,
) {
    stack.stats.inc("stale_correspondent_attempt");
    if packet.header.se == 0 && stack.remote_for_ha(&packet.header.source_addr()).is_none() {
        stack.stats.inc("unknown_correspondent_eid");
    }
    let reply_header = packet.header.mirrored(PacketKind::Nack);
    let addr = reply_header.dest_addr();
    stack.send_bare_nack(reply_header, addr);
    stack.stats.inc("stale_correspondent_nack");
}

/// An initiator-style packet arrived under a stale (or unknown) session id.
pub fn stale_initiator<K: Keep, P: Packeteer, D: DatagramSink>(
    stack: &mut Stack<K, P, D>,
    packet: &Packet,
) {
    stack.stats.inc("stale_initiator_attempt");
    if packet.header.se == 0 && stack.remote_for_ha(&packet.header.source_addr()).is_none() {
        stack.stats.inc("unknown_initiator_eid");
    }
    let reply_header = packet.header.mirrored(PacketKind::Nack);
    let addr = reply_header.dest_addr();
    stack.send_bare_nack(reply_header, addr);
    stack.stats.inc("stale_initiator_nack");
}
