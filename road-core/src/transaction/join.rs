//! Joiner / Joinent (C3): the join handshake that establishes identity and
//! long-term keys (spec §4.3).

use crate::body::{bytes_field, get_bytes, get_str, get_u32, has_all, str_field, u32_field};
use crate::config::TransactionConfig;
use crate::crypto::{publican_from_bytes, verifier_from_bytes};
use crate::index::{EndpointId, TransactionIndex};
use crate::peer::Remote;
use crate::stack::{Stack, TransactionState};
use crate::transaction::{Role, TxScaffold};
use road_wire::{AcceptStatus, DatagramSink, Keep, Packeteer};
use road_wire::{Packet, PacketHeader, PacketKind, TransactionKind};
use tracing::warn;

pub struct JoinerState {
    pub core: TxScaffold,
}

pub struct JoinentState {
    pub core: TxScaffold,
}

fn request_header<K: Keep, P: Packeteer, D: DatagramSink>(
    stack: &Stack<K, P, D>,
    scaffold: &TxScaffold,
    dest: &(String, u16),
) -> PacketHeader {
    PacketHeader {
        sh: stack.local.ha.0.clone(),
        sp: stack.local.ha.1,
        dh: dest.0.clone(),
        dp: dest.1,
        se: stack.local.uid,
        de: 0,
        tk: TransactionKind::Join,
        pk: PacketKind::Request,
        cf: false,
        bf: scaffold.bcst,
        wf: scaffold.wait,
        si: scaffold.sid,
        ti: scaffold.tid,
        ck: Default::default(),
        fk: Default::default(),
    }
}

fn local_join_body<K: Keep, P: Packeteer, D: DatagramSink>(stack: &Stack<K, P, D>) -> Vec<(&'static str, Vec<u8>)> {
    vec![
        str_field("name", &stack.local.name),
        str_field("role", &stack.local.role),
        bytes_field("verhex", &stack.local.verhex()),
        bytes_field("pubhex", &stack.local.pubhex()),
    ]
}

/// Kicks off a join against `ha`. Refuses if we're `main` (spec §4.3
/// preconditions): the authoritative peer never initiates a join.
pub fn joiner_start<K: Keep, P: Packeteer, D: DatagramSink>(
    stack: &mut Stack<K, P, D>,
    ha: (String, u16),
    timeout: f64,
) {
    if stack.local.main {
        warn!("Joiner: refusing to join, local is main");
        return;
    }

    let uid = stack.uid_for_ha(&ha).unwrap_or(0);
    let mut remote = if uid != 0 {
        stack.take_remote(uid).unwrap_or_else(|| Remote::new(0, "", "", ha.clone()))
    } else {
        Remote::new(0, "", "", ha.clone())
    };

    let now = stack.now();
    let mut cfg = stack.config.join;
    if timeout > 0.0 {
        cfg.timeout = timeout;
    }
    let sid = remote.sid;
    let tid = remote.next_tid();
    let mut core = TxScaffold::new(Role::Initiator, TransactionKind::Join, "Joiner", remote.uid, sid, tid, now, cfg);
    let index = TransactionIndex {
        rmt: false,
        local_id: EndpointId::from_uid_or_ha(stack.local.uid, &stack.local.ha),
        remote_id: EndpointId::from_uid_or_ha(remote.uid, &remote.ha),
        sid,
        tid,
        bcst: false,
    };
    core.reg_index = Some(index.clone());
    remote.joined = None;
    remote.add_transaction(index.clone());

    let header = request_header(stack, &core, &ha);
    let body = local_join_body(stack);
    match stack.packeteer.pack(header, &body) {
        Ok(packet) => stack.transmit(&mut core, packet),
        Err(_) => {
            stack.stats.inc("packing_error");
            core.mark_removed();
        }
    }

    stack.add_remote(remote);
    stack.transactions.insert(index, TransactionState::Joiner(JoinerState { core }));
}

pub fn joiner_receive<K: Keep, P: Packeteer, D: DatagramSink>(
    stack: &mut Stack<K, P, D>,
    state: &mut JoinerState,
    pk: PacketKind,
    packet: Packet,
) {
    state.core.rx_packet = Some(packet.clone());
    match pk {
        PacketKind::Ack => {
            // pending: keep waiting for the full response.
        }
        PacketKind::Response => joiner_accept(stack, state, &packet),
        PacketKind::Nack | PacketKind::Refuse => {
            stack.stats.inc(&state.core.stat_key());
            state.core.mark_removed();
        }
        PacketKind::Reject => {
            if let Some(remote) = stack.remotes.get_mut(&state.core.remote_uid) {
                remote.joined = Some(false);
            }
            stack.dump_remote(state.core.remote_uid);
            stack.stats.inc(&state.core.stat_key());
            state.core.mark_removed();
        }
        PacketKind::Renew => joiner_renew(stack, state),
        _ => {}
    }
}

fn joiner_accept<K: Keep, P: Packeteer, D: DatagramSink>(
    stack: &mut Stack<K, P, D>,
    state: &mut JoinerState,
    packet: &Packet,
) {
    let Ok(fields) = stack.packeteer.parse_body(packet) else {
        stack.stats.inc("parsing_message_error");
        state.core.mark_removed();
        return;
    };
    if !has_all(&fields, &["leid", "reid", "name", "verhex", "pubhex", "role"]) {
        stack.stats.inc("invalid_accept");
        state.core.mark_removed();
        return;
    }
    let leid = get_u32(&fields, "leid").unwrap_or(0);
    let reid = get_u32(&fields, "reid").unwrap_or(0);
    let name = get_str(&fields, "name").unwrap_or_default();
    let role = get_str(&fields, "role").unwrap_or_default();
    let verhex = get_bytes(&fields, "verhex").unwrap_or_default();
    let pubhex = get_bytes(&fields, "pubhex").unwrap_or_default();

    let old_uid = state.core.remote_uid;
    let status = stack.keep.status_remote(&role, &verhex, &pubhex, false, true);
    let same_role_keys = stack
        .remotes
        .get(&old_uid)
        .map(|r| r.role == role && r.verhex().map(|v| v.to_vec()) == Some(verhex.clone()))
        .unwrap_or(false);

    if status == AcceptStatus::Rejected {
        if same_role_keys {
            stack.remove_remote(old_uid, true);
        } else {
            joiner_nack(stack, state, PacketKind::Reject);
        }
        state.core.mark_removed();
        return;
    }

    let vacuous = old_uid == 0;
    let same_all = stack
        .remotes
        .get(&old_uid)
        .map(|r| r.name == name && r.ha == packet.header.source_addr())
        .unwrap_or(false);
    if !(vacuous || same_all || stack.local.mutable) {
        joiner_nack(stack, state, PacketKind::Reject);
        state.core.mark_removed();
        return;
    }

    if stack.uid_for_name(&name).map(|u| u != old_uid).unwrap_or(false) {
        joiner_nack(stack, state, PacketKind::Reject);
        state.core.mark_removed();
        return;
    }
    if reid != old_uid && stack.remotes.contains_key(&reid) {
        joiner_nack(stack, state, PacketKind::Reject);
        state.core.mark_removed();
        return;
    }

    let Some(mut remote) = stack.take_remote(old_uid) else {
        stack.stats.inc("invalid_accept");
        state.core.mark_removed();
        return;
    };
    remote.uid = reid;
    remote.name = name;
    remote.role = role;
    remote.verfer = verifier_from_bytes(&verhex).ok();
    remote.pubber = publican_from_bytes(&pubhex).ok();
    remote.next_sid();
    remote.joined = Some(true);
    stack.add_remote(remote);

    if stack.local.uid != leid {
        stack.local.uid = leid;
        stack.dump_local();
    }
    stack.dump_remote(reid);
    stack.stats.inc("join_initiate_complete");

    let header = packet.header.mirrored(PacketKind::Ack);
    if let Ok(ack) = stack.packeteer.pack(header, &[]) {
        let _ = stack.enqueue(ack.header.dest_addr(), ack.packed);
    }

    if state.core.cascade {
        let timeout = state.core.timeout.duration();
        stack.allow(reid, true, timeout);
    }
    state.core.mark_removed();
}

fn joiner_renew<K: Keep, P: Packeteer, D: DatagramSink>(stack: &mut Stack<K, P, D>, state: &mut JoinerState) {
    stack.stats.inc(&state.core.stat_key());
    let ha = stack.remotes.get(&state.core.remote_uid).map(|r| r.ha.clone());
    if let Some(mut remote) = stack.take_remote(state.core.remote_uid) {
        remote.make_vacuous();
        remote.uid = 0;
        stack.add_remote(remote);
    }
    stack.local.uid = 0;
    stack.dump_local();
    state.core.mark_removed();
    if let Some(ha) = ha {
        let timeout = state.core.timeout.duration();
        stack.join(ha, timeout);
    }
}

fn joiner_nack<K: Keep, P: Packeteer, D: DatagramSink>(stack: &mut Stack<K, P, D>, state: &mut JoinerState, kind: PacketKind) {
    if let Some(rx) = &state.core.rx_packet {
        let header = rx.header.mirrored(kind);
        if let Ok(packet) = stack.packeteer.pack(header, &[]) {
            let _ = stack.enqueue(packet.header.dest_addr(), packet.packed);
        }
    }
    stack.stats.inc(&state.core.stat_key());
}

pub fn joiner_tick<K: Keep, P: Packeteer, D: DatagramSink>(stack: &mut Stack<K, P, D>, state: &mut JoinerState, now: f64) {
    if state.core.timeout.expired(now) {
        // Initiator outer timeout: remove silently (spec §4.1, §7.7).
        state.core.mark_removed();
        return;
    }
    if state.core.redo.expired(now) {
        if let Some(packet) = state.core.tx_packet.clone() {
            let _ = stack.enqueue(packet.header.dest_addr(), packet.packed);
            stack.stats.inc("redo_join");
        }
        state.core.redo.backoff(now);
    }
}

// -------------------------------------------------------------------------
// Joinent
// -------------------------------------------------------------------------

pub fn joinent_register<K: Keep, P: Packeteer, D: DatagramSink>(
    stack: &mut Stack<K, P, D>,
    packet: &Packet,
) -> TransactionIndex {
    let now = stack.now();
    let mut core = TxScaffold::new(
        Role::Correspondent,
        TransactionKind::Join,
        "Joinent",
        0,
        packet.header.si,
        packet.header.ti,
        now,
        TransactionConfig::joinent(),
    );
    let index = stack.index_for_inbound(&packet.header);
    core.reg_index = Some(index.clone());
    stack
        .transactions
        .insert(index.clone(), TransactionState::Joinent(JoinentState { core }));
    index
}

pub fn joinent_receive<K: Keep, P: Packeteer, D: DatagramSink>(
    stack: &mut Stack<K, P, D>,
    state: &mut JoinentState,
    pk: PacketKind,
    packet: Packet,
) {
    state.core.rx_packet = Some(packet.clone());
    match pk {
        PacketKind::Request => joinent_join(stack, state, &packet),
        PacketKind::Ack => joinent_complete(stack, state),
        PacketKind::Nack | PacketKind::Refuse | PacketKind::Reject => {
            stack.stats.inc(&state.core.stat_key());
            state.core.mark_removed();
        }
        _ => {}
    }
}

fn joinent_join<K: Keep, P: Packeteer, D: DatagramSink>(
    stack: &mut Stack<K, P, D>,
    state: &mut JoinentState,
    packet: &Packet,
) {
    if !stack.local.main {
        joinent_nack(stack, state, PacketKind::Reject);
        state.core.mark_removed();
        return;
    }

    let Ok(fields) = stack.packeteer.parse_body(packet) else {
        stack.stats.inc("parsing_message_error");
        state.core.mark_removed();
        return;
    };
    if !has_all(&fields, &["name", "verhex", "pubhex", "role"]) {
        stack.stats.inc("invalid_join");
        state.core.mark_removed();
        return;
    }
    let name = get_str(&fields, "name").unwrap_or_default();
    let role = get_str(&fields, "role").unwrap_or_default();
    let verhex = get_bytes(&fields, "verhex").unwrap_or_default();
    let pubhex = get_bytes(&fields, "pubhex").unwrap_or_default();

    let reid = packet.header.se;
    let ha = packet.header.source_addr();
    let vacuous = reid == 0;

    // Duplicate joins in progress against the same remote: refuse the
    // second one rather than race it against the first.
    let candidate_uid = if vacuous { stack.uid_for_ha(&ha).or_else(|| stack.uid_for_name(&name)) } else { Some(reid) };
    if candidate_uid.is_some_and(|uid| stack.remote_has_live_transaction(uid, TransactionKind::Join)) {
        stack.stats.inc("duplicate_join_attempt");
        joinent_nack(stack, state, PacketKind::Refuse);
        state.core.mark_removed();
        return;
    }

    let mut remote = if !vacuous {
        match stack.take_remote(reid) {
            Some(r) => r,
            None => {
                joinent_nack(stack, state, PacketKind::Renew);
                state.core.mark_removed();
                return;
            }
        }
    } else if let Some(uid) = stack.uid_for_ha(&ha) {
        // ephemeral join from an address we already know: reuse that remote.
        stack.take_remote(uid).unwrap_or_else(|| Remote::new(0, name.clone(), role.clone(), ha.clone()))
    } else if let Some(uid) = stack.uid_for_name(&name) {
        // ephemeral join matching a known name: re-target onto it.
        stack.take_remote(uid).unwrap_or_else(|| Remote::new(0, name.clone(), role.clone(), ha.clone()))
    } else {
        Remote::new(0, name.clone(), role.clone(), ha.clone())
    };

    let same_role_keys = remote.role == role && remote.verhex().map(|v| v.to_vec()) == Some(verhex.clone());
    let same_all = same_role_keys && remote.name == name && remote.ha == ha;

    let status = stack.keep.status_remote(&role, &verhex, &pubhex, true, true);
    if status == AcceptStatus::Rejected {
        if same_role_keys && remote.uid != 0 {
            let uid = remote.uid;
            drop(remote);
            stack.remove_remote(uid, true);
        } else {
            stack.add_remote(remote);
            joinent_nack(stack, state, PacketKind::Reject);
        }
        state.core.mark_removed();
        return;
    }

    if !(vacuous || same_all || stack.local.mutable) {
        stack.add_remote(remote);
        joinent_nack(stack, state, PacketKind::Reject);
        state.core.mark_removed();
        return;
    }

    if stack.uid_for_name(&name).map(|u| u != remote.uid).unwrap_or(false) {
        stack.add_remote(remote);
        joinent_nack(stack, state, PacketKind::Reject);
        state.core.mark_removed();
        return;
    }
    if stack.uid_for_ha(&ha).map(|u| u != remote.uid).unwrap_or(false) {
        // possible udp source collision; preserved from the source's ha check.
        stack.add_remote(remote);
        joinent_nack(stack, state, PacketKind::Reject);
        state.core.mark_removed();
        return;
    }

    let new_uid = if remote.uid == 0 { stack.mint_uid() } else { remote.uid };
    remote.uid = new_uid;
    remote.role = role;
    remote.name = name;
    remote.ha = ha;
    remote.verfer = verifier_from_bytes(&verhex).ok();
    remote.pubber = publican_from_bytes(&pubhex).ok();
    remote.joined = None;

    let accepted = status == AcceptStatus::Accepted;
    state.core.remote_uid = new_uid;
    let index = TransactionIndex {
        rmt: true,
        local_id: EndpointId::from_uid_or_ha(stack.local.uid, &stack.local.ha),
        remote_id: EndpointId::Uid(new_uid),
        sid: state.core.sid,
        tid: state.core.tid,
        bcst: state.core.bcst,
    };
    remote.add_transaction(index.clone());
    state.core.reg_index = Some(index);
    stack.add_remote(remote);
    stack.dump_remote(new_uid);

    if accepted {
        joinent_accept(stack, state, new_uid);
    } else {
        joinent_ack_pending(stack, state);
    }
}

fn joinent_accept<K: Keep, P: Packeteer, D: DatagramSink>(stack: &mut Stack<K, P, D>, state: &mut JoinentState, new_uid: u32) {
    let Some(rx) = state.core.rx_packet.clone() else {
        return;
    };
    let body = vec![
        u32_field("leid", new_uid),
        u32_field("reid", stack.local.uid),
        str_field("name", &stack.local.name.clone()),
        bytes_field("verhex", &stack.local.verhex()),
        bytes_field("pubhex", &stack.local.pubhex()),
        str_field("role", &stack.local.role.clone()),
    ];
    let header = rx.header.mirrored(PacketKind::Response);
    match stack.packeteer.pack(header, &body) {
        Ok(packet) => stack.transmit(&mut state.core, packet),
        Err(_) => {
            stack.stats.inc("packing_error");
            state.core.mark_removed();
        }
    }
}

fn joinent_ack_pending<K: Keep, P: Packeteer, D: DatagramSink>(stack: &mut Stack<K, P, D>, state: &mut JoinentState) {
    let Some(rx) = state.core.rx_packet.clone() else {
        return;
    };
    let header = rx.header.mirrored(PacketKind::Ack);
    if let Ok(packet) = stack.packeteer.pack(header, &[]) {
        stack.transmit(&mut state.core, packet);
    }
}

fn joinent_complete<K: Keep, P: Packeteer, D: DatagramSink>(stack: &mut Stack<K, P, D>, state: &mut JoinentState) {
    if let Some(remote) = stack.remotes.get_mut(&state.core.remote_uid) {
        remote.joined = Some(true);
        remote.next_sid();
    }
    stack.dump_remote(state.core.remote_uid);
    stack.stats.inc("join_correspond_complete");
    if state.core.cascade {
        let timeout = state.core.timeout.duration();
        stack.allow(state.core.remote_uid, true, timeout);
    }
    state.core.mark_removed();
}

fn joinent_nack<K: Keep, P: Packeteer, D: DatagramSink>(stack: &mut Stack<K, P, D>, state: &mut JoinentState, kind: PacketKind) {
    let Some(rx) = &state.core.rx_packet else {
        return;
    };
    // Nack is needed before the remote may be registered, so it is sent
    // directly to the request's source address rather than through transmit.
    let header = rx.header.mirrored(kind);
    let addr = header.dest_addr();
    match stack.packeteer.pack(header, &[]) {
        Ok(packet) => { let _ = stack.enqueue(addr, packet.packed); }
        Err(_) => stack.stats.inc("packing_error"),
    }
    stack.stats.inc(&state.core.stat_key());
}

pub fn joinent_tick<K: Keep, P: Packeteer, D: DatagramSink>(stack: &mut Stack<K, P, D>, state: &mut JoinentState, now: f64) {
    if state.core.timeout.expired(now) {
        joinent_nack(stack, state, PacketKind::Nack);
        state.core.mark_removed();
        return;
    }
    if state.core.redo.expired(now) {
        if let Some(packet) = state.core.tx_packet.clone() {
            let _ = stack.enqueue(packet.header.dest_addr(), packet.packed);
            stack.stats.inc("redo_accept");
        }
        state.core.redo.backoff(now);
    }
}
