//! Messenger / Messengent (C7): segmented, acknowledged application message
//! transfer with selective resend (spec §4.7).

use crate::body::{bytes_field, get_bytes, get_u32, has_all};
use crate::config::TransactionConfig;
use crate::index::{EndpointId, TransactionIndex};
use crate::stack::{Stack, TransactionState};
use crate::transaction::{Role, TxScaffold};
use road_wire::{DatagramSink, Keep, Packeteer};
use road_wire::{Packet, PacketHeader, PacketKind, RxTray, TransactionKind, TxTray};
use tracing::warn;

pub struct MessengerState {
    pub core: TxScaffold,
    tray: TxTray,
    acked_through: usize,
}

pub struct MessengentState {
    pub core: TxScaffold,
    tray: RxTray,
}

fn base_header<K: Keep, P: Packeteer, D: DatagramSink>(
    stack: &Stack<K, P, D>,
    core: &TxScaffold,
    dest: &(String, u16),
    pk: PacketKind,
) -> PacketHeader {
    PacketHeader {
        sh: stack.local.ha.0.clone(),
        sp: stack.local.ha.1,
        dh: dest.0.clone(),
        dp: dest.1,
        se: stack.local.uid,
        de: core.remote_uid,
        tk: TransactionKind::Message,
        pk,
        cf: core.role == Role::Correspondent,
        bf: core.bcst,
        wf: core.wait,
        si: core.sid,
        ti: core.tid,
        ck: Default::default(),
        fk: Default::default(),
    }
}

fn pack_misseds(indices: &[u16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(indices.len() * 2);
    for i in indices {
        out.extend_from_slice(&i.to_be_bytes());
    }
    out
}

fn unpack_misseds(buf: &[u8]) -> Vec<u16> {
    buf.chunks_exact(2).map(|c| u16::from_be_bytes([c[0], c[1]])).collect()
}

/// Sends `body` to `duid`, requiring an established allow session.
pub fn messenger_start<K: Keep, P: Packeteer, D: DatagramSink>(stack: &mut Stack<K, P, D>, duid: u32, body: Vec<u8>) {
    let Some(remote) = stack.remotes.get(&duid) else {
        warn!(duid, "Messenger: refusing to send, no remote registered");
        stack.stats.inc("unallowed_message_attempt");
        return;
    };
    if remote.allowed != Some(true) {
        warn!(duid, "Messenger: refusing to send, remote not allowed");
        stack.stats.inc("unallowed_message_attempt");
        return;
    }

    let now = stack.now();
    let cfg = stack.config.message;
    let sid = remote.sid;
    let remote_ha = remote.ha.clone();
    let tid = stack.remotes.get_mut(&duid).map(|r| r.next_tid()).unwrap_or(1);
    let mut core = TxScaffold::new(Role::Initiator, TransactionKind::Message, "Messenger", duid, sid, tid, now, cfg);

    let index = TransactionIndex {
        rmt: false,
        local_id: EndpointId::Uid(stack.local.uid),
        remote_id: EndpointId::Uid(duid),
        sid,
        tid,
        bcst: false,
    };
    if stack.transactions.contains_key(&index) {
        stack.stats.inc("message_index_collision");
        return;
    }

    let template = base_header(stack, &core, &remote_ha, PacketKind::Message);
    let Ok(tray) = stack.packeteer.split(&template, &body) else {
        stack.stats.inc("packing_error");
        return;
    };
    if tray.is_empty() {
        return;
    }

    core.reg_index = Some(index.clone());
    if let Some(remote) = stack.remotes.get_mut(&duid) {
        remote.add_transaction(index.clone());
    }

    let mut state = MessengerState { core, tray, acked_through: 0 };
    send_burst(stack, &mut state, &remote_ha);
    stack.transactions.insert(index, TransactionState::Messenger(state));
}

fn send_burst<K: Keep, P: Packeteer, D: DatagramSink>(
    stack: &mut Stack<K, P, D>,
    state: &mut MessengerState,
    dest: &(String, u16),
) {
    let burst_size = if state.core.wait { 1 } else { state.tray.len() - state.acked_through };
    let end = (state.acked_through + burst_size).min(state.tray.len());
    for segment in &state.tray.segments[state.acked_through..end] {
        let _ = stack.enqueue(dest.clone(), segment.packed.clone());
        stack.stats.inc("message_segment_tx");
    }
}

pub fn messenger_receive<K: Keep, P: Packeteer, D: DatagramSink>(
    stack: &mut Stack<K, P, D>,
    state: &mut MessengerState,
    pk: PacketKind,
    packet: Packet,
) {
    state.core.rx_packet = Some(packet.clone());
    match pk {
        PacketKind::Ack => {
            stack.stats.inc("message_segment_ack");
            let dest = packet.header.source_addr();
            if state.core.wait {
                state.acked_through += 1;
            } else {
                state.acked_through = state.tray.len();
            }
            if state.acked_through >= state.tray.len() {
                stack.stats.inc("message_initiate_complete");
                state.core.mark_removed();
            } else {
                send_burst(stack, state, &dest);
            }
        }
        PacketKind::Resend => {
            let Ok(fields) = stack.packeteer.parse_body(&packet) else {
                stack.stats.inc("invalid_resend");
                return;
            };
            let Some(misseds) = get_bytes(&fields, "misseds") else {
                stack.stats.inc("invalid_misseds");
                return;
            };
            let dest = packet.header.source_addr();
            for idx in unpack_misseds(&misseds) {
                if let Some(segment) = state.tray.get(idx) {
                    let _ = stack.enqueue(dest.clone(), segment.packed.clone());
                    stack.stats.inc("message_resend");
                } else {
                    stack.stats.inc("invalid_misseds");
                }
            }
        }
        PacketKind::Nack | PacketKind::Refuse | PacketKind::Reject => {
            stack.stats.inc(&state.core.stat_key());
            state.core.mark_removed();
        }
        _ => {}
    }
}

pub fn messenger_tick<K: Keep, P: Packeteer, D: DatagramSink>(stack: &mut Stack<K, P, D>, state: &mut MessengerState, now: f64) {
    if state.core.timeout.expired(now) {
        state.core.mark_removed();
        return;
    }
    if state.core.redo.expired(now) {
        if let Some(dest) = state.core.rx_packet.as_ref().map(|p| p.header.source_addr()) {
            send_burst(stack, state, &dest);
            stack.stats.inc("redo_segment");
        }
        state.core.redo.backoff(now);
    }
}

// -------------------------------------------------------------------------
// Messengent
// -------------------------------------------------------------------------

pub fn messengent_register<K: Keep, P: Packeteer, D: DatagramSink>(
    stack: &mut Stack<K, P, D>,
    packet: &Packet,
) -> TransactionIndex {
    let now = stack.now();
    let remote_uid = packet.header.se;
    let index = stack.index_for_inbound(&packet.header);

    // The index is already live under a different transaction: abort and
    // nack rather than clobber whatever currently owns it.
    if stack.transactions.contains_key(&index) {
        stack.stats.inc("message_index_collision");
        let header = packet.header.mirrored(PacketKind::Nack);
        let addr = header.dest_addr();
        stack.send_bare_nack(header, addr);
        return index;
    }

    let mut core = TxScaffold::new(
        Role::Correspondent,
        TransactionKind::Message,
        "Messengent",
        remote_uid,
        packet.header.si,
        packet.header.ti,
        now,
        TransactionConfig::messengent(),
    );
    core.reg_index = Some(index.clone());
    if let Some(remote) = stack.remotes.get_mut(&remote_uid) {
        remote.add_transaction(index.clone());
    }
    stack.transactions.insert(
        index.clone(),
        TransactionState::Messengent(MessengentState { core, tray: RxTray::new() }),
    );
    index
}

pub fn messengent_receive<K: Keep, P: Packeteer, D: DatagramSink>(
    stack: &mut Stack<K, P, D>,
    state: &mut MessengentState,
    pk: PacketKind,
    packet: Packet,
) {
    state.core.rx_packet = Some(packet.clone());
    if pk != PacketKind::Message {
        state.core.mark_removed();
        return;
    }

    let Ok(fields) = stack.packeteer.parse_body(&packet) else {
        stack.stats.inc("parsing_message_error");
        state.core.mark_removed();
        return;
    };
    if !has_all(&fields, &["index", "total", "payload"]) {
        stack.stats.inc("parsing_message_error");
        state.core.mark_removed();
        return;
    }
    let index = get_u32(&fields, "index").unwrap_or(0) as u16;
    let total = get_u32(&fields, "total").unwrap_or(0) as u16;
    let payload = get_bytes(&fields, "payload").unwrap_or_default();
    state.tray.insert(index, total, payload);
    stack.stats.inc("message_segment_rx");

    if state.core.wait {
        let header = packet.header.mirrored(PacketKind::Ack);
        if let Ok(ack) = stack.packeteer.pack(header, &[]) {
            let _ = stack.enqueue(ack.header.dest_addr(), ack.packed);
        }
    }

    if state.tray.is_complete() {
        if let Some(body) = state.tray.reassemble() {
            let name = stack
                .remotes
                .get(&state.core.remote_uid)
                .map(|r| r.name.clone())
                .unwrap_or_default();
            stack.rx_msgs.push_back((body, name));
        }
        let header = packet.header.mirrored(PacketKind::Ack);
        if let Ok(ack) = stack.packeteer.pack(header, &[]) {
            let _ = stack.enqueue(ack.header.dest_addr(), ack.packed);
        }
        stack.stats.inc("messagent_correspond_complete");
        state.core.mark_removed();
    }
}

pub fn messengent_tick<K: Keep, P: Packeteer, D: DatagramSink>(stack: &mut Stack<K, P, D>, state: &mut MessengentState, now: f64) {
    if state.core.timeout.expired(now) {
        state.core.mark_removed();
        return;
    }
    if !state.core.wait && state.core.redo.expired(now) {
        let chunks = state.tray.missed_chunks();
        if let (Some(chunk), Some(rx)) = (chunks.first(), state.core.rx_packet.as_ref()) {
            let dest = rx.header.source_addr();
            let header = rx.header.mirrored(PacketKind::Resend);
            let body = vec![bytes_field("misseds", &pack_misseds(chunk))];
            if let Ok(packet) = stack.packeteer.pack(header, &body) {
                let _ = stack.enqueue(dest, packet.packed);
            }
        }
        state.core.redo.backoff(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn misseds_round_trip_through_be_u16s() {
        let indices = vec![0u16, 3, 7, 65535];
        let packed = pack_misseds(&indices);
        assert_eq!(packed.len(), indices.len() * 2);
        assert_eq!(unpack_misseds(&packed), indices);
    }

    #[test]
    fn empty_misseds_round_trips_to_empty() {
        assert!(pack_misseds(&[]).is_empty());
        assert!(unpack_misseds(&[]).is_empty());
    }
}
