//! Yoker / Yokent (C4): a reverse-initiated join driven by the `main` peer
//! against an already-known subordinate (spec §4.4).

use crate::body::{bytes_field, get_bytes, get_str, get_u32, has_all, str_field, u32_field};
use crate::config::TransactionConfig;
use crate::crypto::{publican_from_bytes, verifier_from_bytes};
use crate::index::{EndpointId, TransactionIndex};
use crate::stack::{Stack, TransactionState};
use crate::transaction::{Role, TxScaffold};
use road_wire::{AcceptStatus, DatagramSink, Keep, Packeteer};
use road_wire::{Packet, PacketHeader, PacketKind, TransactionKind};
use tracing::warn;

pub struct YokerState {
    pub core: TxScaffold,
}

pub struct YokentState {
    pub core: TxScaffold,
}

fn yoker_index<K: Keep, P: Packeteer, D: DatagramSink>(
    stack: &Stack<K, P, D>,
    remote_uid: u32,
    sid: u32,
    tid: u32,
) -> TransactionIndex {
    TransactionIndex {
        rmt: false,
        local_id: EndpointId::Uid(stack.local.uid),
        remote_id: EndpointId::Uid(remote_uid),
        sid,
        tid,
        bcst: false,
    }
}

/// Kicks off a yoke against `duid`. Only `main` ever yokes (spec §4.4).
pub fn yoker_start<K: Keep, P: Packeteer, D: DatagramSink>(stack: &mut Stack<K, P, D>, duid: u32, timeout: f64) {
    if !stack.local.main {
        warn!("Yoker: refusing to yoke, local is not main");
        return;
    }
    let Some(remote) = stack.remotes.get(&duid) else {
        return;
    };
    if stack.remote_has_live_transaction(duid, TransactionKind::Yoke) {
        stack.stats.inc("duplicate_yoke_attempt");
        return;
    }
    let Some(verhex) = remote.verhex() else {
        return;
    };
    let Some(pubhex) = remote.pubhex() else {
        return;
    };
    let role = remote.role.clone();
    let status = stack.keep.status_remote(&role, &verhex, &pubhex, true, false);
    if status != AcceptStatus::Accepted {
        stack.stats.inc("unnecessary_yoke_attempt");
        return;
    }

    let remote_ha = remote.ha.clone();
    let remote_name = remote.name.clone();

    let now = stack.now();
    let mut cfg = stack.config.yoke;
    if timeout > 0.0 {
        cfg.timeout = timeout;
    }
    let sid = 0;
    let tid = stack.remotes.get_mut(&duid).map(|r| r.next_tid()).unwrap_or(1);
    let mut core = TxScaffold::new(Role::Initiator, TransactionKind::Yoke, "Yoker", duid, sid, tid, now, cfg);
    let index = yoker_index(stack, duid, sid, tid);
    core.reg_index = Some(index.clone());

    let header = PacketHeader {
        sh: stack.local.ha.0.clone(),
        sp: stack.local.ha.1,
        dh: remote_ha.0.clone(),
        dp: remote_ha.1,
        se: stack.local.uid,
        de: duid,
        tk: TransactionKind::Yoke,
        pk: PacketKind::Request,
        cf: false,
        bf: core.bcst,
        wf: core.wait,
        si: sid,
        ti: tid,
        ck: Default::default(),
        fk: Default::default(),
    };
    let body = vec![
        u32_field("leid", stack.local.uid),
        str_field("lname", &stack.local.name),
        str_field("lrole", &stack.local.role),
        bytes_field("lverhex", &stack.local.verhex()),
        bytes_field("lpubhex", &stack.local.pubhex()),
        str_field("name", &remote_name),
        str_field("role", &role),
        bytes_field("verhex", &verhex),
        bytes_field("pubhex", &pubhex),
    ];
    match stack.packeteer.pack(header, &body) {
        Ok(packet) => stack.transmit(&mut core, packet),
        Err(_) => {
            stack.stats.inc("packing_error");
            core.mark_removed();
        }
    }

    if let Some(remote) = stack.remotes.get_mut(&duid) {
        remote.add_transaction(index.clone());
    }
    stack.transactions.insert(index, TransactionState::Yoker(YokerState { core }));
}

pub fn yoker_receive<K: Keep, P: Packeteer, D: DatagramSink>(
    stack: &mut Stack<K, P, D>,
    state: &mut YokerState,
    pk: PacketKind,
    packet: Packet,
) {
    state.core.rx_packet = Some(packet.clone());
    match pk {
        PacketKind::Ack => {
            stack.stats.inc("yoke_initiate_complete");
            if let Some(remote) = stack.remotes.get_mut(&state.core.remote_uid) {
                remote.next_sid();
            }
            stack.dump_remote(state.core.remote_uid);
            if state.core.cascade {
                let timeout = state.core.timeout.duration();
                stack.allow(state.core.remote_uid, true, timeout);
            }
            state.core.mark_removed();
        }
        PacketKind::Nack | PacketKind::Refuse | PacketKind::Reject => {
            stack.stats.inc(&state.core.stat_key());
            state.core.mark_removed();
        }
        _ => {}
    }
}

pub fn yoker_tick<K: Keep, P: Packeteer, D: DatagramSink>(stack: &mut Stack<K, P, D>, state: &mut YokerState, now: f64) {
    if state.core.timeout.expired(now) {
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
// Yokent
// -------------------------------------------------------------------------

pub fn yokent_register<K: Keep, P: Packeteer, D: DatagramSink>(
    stack: &mut Stack<K, P, D>,
    packet: &Packet,
) -> TransactionIndex {
    let now = stack.now();
    let mut core = TxScaffold::new(
        Role::Correspondent,
        TransactionKind::Yoke,
        "Yokent",
        packet.header.se,
        packet.header.si,
        packet.header.ti,
        now,
        TransactionConfig::yokent(),
    );
    let index = stack.index_for_inbound(&packet.header);
    core.reg_index = Some(index.clone());
    stack
        .transactions
        .insert(index.clone(), TransactionState::Yokent(YokentState { core }));
    index
}

pub fn yokent_receive<K: Keep, P: Packeteer, D: DatagramSink>(
    stack: &mut Stack<K, P, D>,
    state: &mut YokentState,
    pk: PacketKind,
    packet: Packet,
) {
    state.core.rx_packet = Some(packet.clone());
    match pk {
        PacketKind::Request => yokent_yoke(stack, state, &packet),
        _ => {
            // preserves the source's fallthrough: comparisons against the
            // nack kind in the error branches never actually filtered by
            // kind, so any other packet kind falls through to a plain nack.
            yokent_nack(stack, state, pk);
            state.core.mark_removed();
        }
    }
}

fn yokent_yoke<K: Keep, P: Packeteer, D: DatagramSink>(
    stack: &mut Stack<K, P, D>,
    state: &mut YokentState,
    packet: &Packet,
) {
    let Ok(fields) = stack.packeteer.parse_body(packet) else {
        stack.stats.inc("parsing_message_error");
        state.core.mark_removed();
        return;
    };
    if !has_all(
        &fields,
        &["leid", "lname", "lrole", "lverhex", "lpubhex", "name", "role", "verhex", "pubhex"],
    ) {
        stack.stats.inc("invalid_yoke");
        state.core.mark_removed();
        return;
    }
    let leid = get_u32(&fields, "leid").unwrap_or(0);
    let lname = get_str(&fields, "lname").unwrap_or_default();
    let lrole = get_str(&fields, "lrole").unwrap_or_default();
    let lverhex = get_bytes(&fields, "lverhex").unwrap_or_default();
    let lpubhex = get_bytes(&fields, "lpubhex").unwrap_or_default();
    let name = get_str(&fields, "name").unwrap_or_default();
    let role = get_str(&fields, "role").unwrap_or_default();

    let reid = packet.header.se;
    let vacuous = reid == 0;

    if !vacuous {
        // Non-vacuous: the remote (main) claims we already share history.
        // The source checks `self.local.mutable`, which on a Transaction
        // object never resolves to anything but the stack's own local
        // flag; we name that directly rather than reproduce the typo.
        let same_all = name == stack.local.name && role == stack.local.role;
        if !(same_all || stack.local.mutable) {
            yokent_nack(stack, state, PacketKind::Reject);
            state.core.mark_removed();
            return;
        }
    } else {
        // Vacuous: the source's uniqueness check here reads
        // `ha not in self.stack.remotes` (keyed by uid, so the lookup is
        // always true and the branch never fires as written). Preserve the
        // intended address-uniqueness check against `haRemotes` instead.
        let ha = packet.header.source_addr();
        if stack.uid_for_ha(&ha).is_some() {
            stack.stats.inc("invalid_yoke");
            state.core.mark_removed();
            return;
        }
    }

    if name != stack.local.name || role != stack.local.role {
        if stack.local.mutable {
            yokent_renew(stack, state);
        } else {
            yokent_nack(stack, state, PacketKind::Reject);
            state.core.mark_removed();
        }
        return;
    }

    let main_uid = if let Some(uid) = stack.uid_for_name(&lname) {
        uid
    } else {
        stack.mint_uid()
    };
    let main_remote = stack.take_remote(main_uid);
    let mut main_remote =
        main_remote.unwrap_or_else(|| crate::peer::Remote::new(main_uid, lname.clone(), lrole.clone(), packet.header.source_addr()));
    main_remote.uid = main_uid;
    main_remote.name = lname;
    main_remote.role = lrole;
    main_remote.ha = packet.header.source_addr();
    main_remote.verfer = verifier_from_bytes(&lverhex).ok();
    main_remote.pubber = publican_from_bytes(&lpubhex).ok();
    main_remote.next_sid();
    main_remote.joined = Some(true);
    stack.add_remote(main_remote);
    stack.dump_remote(main_uid);

    if stack.local.uid != leid && leid != 0 {
        stack.local.uid = leid;
        stack.dump_local();
    }

    stack.stats.inc("yoke_correspond_complete");
    let header = packet.header.mirrored(PacketKind::Ack);
    if let Ok(ack) = stack.packeteer.pack(header, &[]) {
        let _ = stack.enqueue(ack.header.dest_addr(), ack.packed);
    }

    if state.core.cascade {
        let timeout = state.core.timeout.duration();
        stack.allow(main_uid, true, timeout);
    }
    state.core.mark_removed();
}

fn yokent_nack<K: Keep, P: Packeteer, D: DatagramSink>(stack: &mut Stack<K, P, D>, state: &mut YokentState, kind: PacketKind) {
    let Some(rx) = &state.core.rx_packet else {
        return;
    };
    let header = rx.header.mirrored(kind);
    let addr = header.dest_addr();
    if let Some(ha) = stack.remotes.get(&state.core.remote_uid).map(|r| r.ha.clone()) {
        let header = rx.header.mirrored(kind);
        let mut header = header;
        header.dh = ha.0;
        header.dp = ha.1;
        if let Ok(packet) = stack.packeteer.pack(header, &[]) {
            let _ = stack.enqueue(packet.header.dest_addr(), packet.packed);
        }
    } else if let Ok(packet) = stack.packeteer.pack(header, &[]) {
        let _ = stack.enqueue(addr, packet.packed);
    }
    stack.stats.inc(&state.core.stat_key());
}

/// Wipes the given subordinate identity to vacuous and restarts an outward
/// join against its known address (spec §4.4's renew path).
pub fn yokent_renew<K: Keep, P: Packeteer, D: DatagramSink>(stack: &mut Stack<K, P, D>, state: &mut YokentState) {
    if stack.local.main || !stack.local.mutable {
        state.core.mark_removed();
        return;
    }
    let ha = stack.local.ha.clone();
    stack.local.uid = 0;
    stack.dump_local();
    if let Some(mut remote) = stack.take_remote(state.core.remote_uid) {
        remote.make_vacuous();
        remote.uid = 0;
        stack.add_remote(remote);
    }
    state.core.mark_removed();
    let timeout = state.core.timeout.duration();
    stack.join(ha, timeout);
}

pub fn yokent_tick<K: Keep, P: Packeteer, D: DatagramSink>(stack: &mut Stack<K, P, D>, state: &mut YokentState, now: f64) {
    if state.core.timeout.expired(now) {
        yokent_nack(stack, state, PacketKind::Nack);
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
