//! Aliver / Alivent (C6): heartbeat / liveness probing (spec §4.6).

use crate::config::TransactionConfig;
use crate::index::{EndpointId, TransactionIndex};
use crate::stack::{Stack, TransactionState};
use crate::transaction::{Role, TxScaffold};
use road_wire::{DatagramSink, Keep, Packeteer};
use road_wire::{Packet, PacketHeader, PacketKind, TransactionKind};
use tracing::warn;

pub struct AliverState {
    pub core: TxScaffold,
}

pub struct AliventState {
    pub core: TxScaffold,
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
        tk: TransactionKind::Alive,
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

/// Kicks off a liveness probe against `duid`. Cascades into join/allow if
/// either prerequisite is missing (spec §4.6).
pub fn aliver_start<K: Keep, P: Packeteer, D: DatagramSink>(stack: &mut Stack<K, P, D>, duid: u32, cascade: bool) {
    let Some(remote) = stack.remotes.get(&duid) else {
        warn!(duid, "Aliver: no remote registered for uid");
        return;
    };
    if remote.joined != Some(true) {
        let ha = remote.ha.clone();
        stack.stats.inc("unjoined_remote");
        if stack.local.main {
            stack.yoke(duid, 0.0);
        } else {
            stack.join(ha, 0.0);
        }
        return;
    }
    if remote.allowed != Some(true) {
        stack.stats.inc("unallowed_remote");
        stack.allow(duid, true, 0.0);
        return;
    }
    if stack.remote_has_live_transaction(duid, TransactionKind::Alive) {
        return;
    }

    let now = stack.now();
    let mut cfg = stack.config.alive;
    cfg.cascade = cascade;
    let sid = remote.sid;
    let remote_ha = remote.ha.clone();
    let tid = stack.remotes.get_mut(&duid).map(|r| r.next_tid()).unwrap_or(1);
    let mut core = TxScaffold::new(Role::Initiator, TransactionKind::Alive, "Aliver", duid, sid, tid, now, cfg);

    let header = base_header(stack, &core, &remote_ha, PacketKind::Request);
    match stack.packeteer.pack(header, &[]) {
        Ok(packet) => stack.transmit(&mut core, packet),
        Err(_) => {
            stack.stats.inc("packing_error");
            core.mark_removed();
        }
    }

    let index = TransactionIndex {
        rmt: false,
        local_id: EndpointId::Uid(stack.local.uid),
        remote_id: EndpointId::Uid(duid),
        sid,
        tid,
        bcst: false,
    };
    core.reg_index = Some(index.clone());
    if let Some(remote) = stack.remotes.get_mut(&duid) {
        remote.add_transaction(index.clone());
    }
    stack.transactions.insert(index, TransactionState::Aliver(AliverState { core }));
}

pub fn aliver_receive<K: Keep, P: Packeteer, D: DatagramSink>(
    stack: &mut Stack<K, P, D>,
    state: &mut AliverState,
    pk: PacketKind,
    packet: Packet,
) {
    state.core.rx_packet = Some(packet.clone());
    match pk {
        PacketKind::Ack => {
            if let Some(remote) = stack.remotes.get_mut(&state.core.remote_uid) {
                remote.alived = Some(true);
            }
            stack.stats.inc("alive_complete");
            state.core.mark_removed();
        }
        PacketKind::Unjoined => {
            if let Some(remote) = stack.remotes.get_mut(&state.core.remote_uid) {
                remote.joined = None;
                let ha = remote.ha.clone();
                stack.stats.inc(&state.core.stat_key());
                state.core.mark_removed();
                if stack.local.main {
                    stack.yoke(state.core.remote_uid, 0.0);
                } else {
                    stack.join(ha, 0.0);
                }
                return;
            }
            state.core.mark_removed();
        }
        PacketKind::Unallowed => {
            if let Some(remote) = stack.remotes.get_mut(&state.core.remote_uid) {
                remote.allowed = None;
            }
            let duid = state.core.remote_uid;
            stack.stats.inc(&state.core.stat_key());
            state.core.mark_removed();
            stack.allow(duid, true, 0.0);
        }
        PacketKind::Nack | PacketKind::Refuse | PacketKind::Reject => {
            if let Some(remote) = stack.remotes.get_mut(&state.core.remote_uid) {
                remote.alived = Some(false);
            }
            stack.stats.inc(&state.core.stat_key());
            state.core.mark_removed();
        }
        _ => {}
    }
}

pub fn aliver_tick<K: Keep, P: Packeteer, D: DatagramSink>(stack: &mut Stack<K, P, D>, state: &mut AliverState, now: f64) {
    if state.core.timeout.expired(now) {
        if let Some(remote) = stack.remotes.get_mut(&state.core.remote_uid) {
            remote.alived = Some(false);
        }
        state.core.mark_removed();
        return;
    }
    if state.core.redo.expired(now) {
        if let Some(packet) = state.core.tx_packet.clone() {
            let _ = stack.enqueue(packet.header.dest_addr(), packet.packed);
            stack.stats.inc("redo_alive");
        }
        state.core.redo.backoff(now);
    }
}

// -------------------------------------------------------------------------
// Alivent
// -------------------------------------------------------------------------

pub fn alivent_register<K: Keep, P: Packeteer, D: DatagramSink>(
    stack: &mut Stack<K, P, D>,
    packet: &Packet,
) -> TransactionIndex {
    let now = stack.now();
    let remote_uid = packet.header.se;
    let mut core = TxScaffold::new(
        Role::Correspondent,
        TransactionKind::Alive,
        "Alivent",
        remote_uid,
        packet.header.si,
        packet.header.ti,
        now,
        TransactionConfig::alivent(),
    );
    let index = stack.index_for_inbound(&packet.header);
    core.reg_index = Some(index.clone());
    if let Some(remote) = stack.remotes.get_mut(&remote_uid) {
        remote.add_transaction(index.clone());
    }
    stack
        .transactions
        .insert(index.clone(), TransactionState::Alivent(AliventState { core }));
    index
}

pub fn alivent_receive<K: Keep, P: Packeteer, D: DatagramSink>(
    stack: &mut Stack<K, P, D>,
    state: &mut AliventState,
    pk: PacketKind,
    packet: Packet,
) {
    state.core.rx_packet = Some(packet.clone());
    if pk != PacketKind::Request {
        state.core.mark_removed();
        return;
    }

    let remote = stack.remotes.get(&state.core.remote_uid);
    let joined = remote.map(|r| r.joined == Some(true)).unwrap_or(false);
    let allowed = remote.map(|r| r.allowed == Some(true)).unwrap_or(false);

    if !joined {
        stack.stats.inc("unjoined_allow_attempt");
        alivent_refuse(stack, state, PacketKind::Unjoined);
        state.core.mark_removed();
        return;
    }
    if !allowed {
        stack.stats.inc("unallowed_alive_attempt");
        alivent_refuse(stack, state, PacketKind::Unallowed);
        state.core.mark_removed();
        return;
    }

    if let Some(remote) = stack.remotes.get_mut(&state.core.remote_uid) {
        remote.alived = Some(true);
    }
    let header = packet.header.mirrored(PacketKind::Ack);
    if let Ok(ack) = stack.packeteer.pack(header, &[]) {
        let _ = stack.enqueue(ack.header.dest_addr(), ack.packed);
    }
    state.core.mark_removed();
}

fn alivent_refuse<K: Keep, P: Packeteer, D: DatagramSink>(stack: &mut Stack<K, P, D>, state: &mut AliventState, kind: PacketKind) {
    let Some(rx) = &state.core.rx_packet else {
        return;
    };
    let header = rx.header.mirrored(kind);
    if let Ok(packet) = stack.packeteer.pack(header, &[]) {
        let _ = stack.enqueue(packet.header.dest_addr(), packet.packed);
    }
}

pub fn alivent_tick<K: Keep, P: Packeteer, D: DatagramSink>(_stack: &mut Stack<K, P, D>, state: &mut AliventState, now: f64) {
    if state.core.timeout.expired(now) {
        state.core.mark_removed();
    }
}
