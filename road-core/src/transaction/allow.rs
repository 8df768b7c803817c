//! Allower / Allowent (C5): the CurveCP-style short-term-key handshake
//! (spec §4.5). Hello/cookie/initiate/ack, binding a fresh ephemeral
//! keypair to each side's long-term identity via a vouch.

use crate::config::TransactionConfig;
use crate::crypto::{fresh_nonce, open, seal, ShortKeyPair};
use crate::index::{EndpointId, TransactionIndex};
use crate::stack::{Stack, TransactionState};
use crate::transaction::{Role, TxScaffold};
use road_wire::packer::{
    CookiePacked, CookieStuff, HelloPacked, InitiatePacked, InitiateStuff, CANARY_SIZE, NONCE_SIZE,
};
use road_wire::{DatagramSink, Keep, Packeteer};
use road_wire::{Packet, PacketHeader, PacketKind, TransactionKind};
use tracing::warn;
use x25519_dalek::PublicKey;

pub struct AllowerState {
    pub core: TxScaffold,
    oreo: Option<[u8; NONCE_SIZE]>,
    allowent_short_pub: Option<PublicKey>,
}

pub struct AllowentState {
    pub core: TxScaffold,
    allower_short_pub: Option<PublicKey>,
    oreo: [u8; NONCE_SIZE],
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
        tk: TransactionKind::Allow,
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

/// Kicks off an allow against `duid`. If the remote isn't joined yet,
/// cascades into a join/yoke instead (spec §4.5 preconditions).
pub fn allower_start<K: Keep, P: Packeteer, D: DatagramSink>(
    stack: &mut Stack<K, P, D>,
    duid: u32,
    cascade: bool,
    timeout: f64,
) {
    let Some(remote) = stack.remotes.get(&duid) else {
        return;
    };
    if remote.joined != Some(true) {
        let ha = remote.ha.clone();
        if stack.local.main {
            stack.yoke(duid, timeout);
        } else {
            stack.join(ha, timeout);
        }
        return;
    }
    if remote.allowed.is_none() && stack.remote_has_live_transaction(duid, TransactionKind::Allow) {
        stack.stats.inc("duplicate_allow_attempt");
        return;
    }
    let Some(remote_pubber) = remote.pubber else {
        return;
    };

    let now = stack.now();
    let mut cfg = stack.config.allow;
    cfg.cascade = cascade;
    if timeout > 0.0 {
        cfg.timeout = timeout;
    }
    let sid = remote.sid;
    let tid = stack.remotes.get_mut(&duid).map(|r| r.next_tid()).unwrap_or(1);
    let mut core = TxScaffold::new(Role::Initiator, TransactionKind::Allow, "Allower", duid, sid, tid, now, cfg);

    let remote_ha = stack.remotes.get(&duid).map(|r| r.ha.clone()).unwrap();
    if let Some(remote) = stack.remotes.get_mut(&duid) {
        remote.rekey();
    }
    let our_short = stack.remotes.get(&duid).and_then(|r| r.short.clone()).unwrap();

    let nonce = fresh_nonce();
    let canary = [0u8; CANARY_SIZE];
    let cipher = match seal(our_short.private(), &remote_pubber, &nonce, &canary) {
        Ok(c) => c,
        Err(_) => {
            stack.stats.inc("packing_error");
            return;
        }
    };
    let hello = HelloPacked {
        short_pub: our_short.public_bytes(),
        cipher,
        nonce,
    };
    let Ok(body_bytes) = hello.pack() else {
        stack.stats.inc("packing_error");
        return;
    };

    let header = base_header(stack, &core, &remote_ha, PacketKind::Hello);
    match stack.packeteer.pack(header, &[("hello", body_bytes)]) {
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
    stack.transactions.insert(
        index,
        TransactionState::Allower(AllowerState {
            core,
            oreo: None,
            allowent_short_pub: None,
        }),
    );
}

pub fn allower_receive<K: Keep, P: Packeteer, D: DatagramSink>(
    stack: &mut Stack<K, P, D>,
    state: &mut AllowerState,
    pk: PacketKind,
    packet: Packet,
) {
    state.core.rx_packet = Some(packet.clone());
    match pk {
        PacketKind::Cookie => allower_cookie(stack, state, &packet),
        PacketKind::Ack => {
            if state.core.tx_packet.as_ref().map(|p| p.header.pk) == Some(PacketKind::Initiate) {
                allower_final_ack(stack, state, &packet);
            } else {
                allower_complete(stack, state);
            }
        }
        PacketKind::Nack | PacketKind::Refuse | PacketKind::Reject => {
            stack.stats.inc(&state.core.stat_key());
            state.core.mark_removed();
        }
        _ => {}
    }
}

fn allower_cookie<K: Keep, P: Packeteer, D: DatagramSink>(
    stack: &mut Stack<K, P, D>,
    state: &mut AllowerState,
    packet: &Packet,
) {
    let Ok(fields) = stack.packeteer.parse_body(packet) else {
        stack.stats.inc("invalid_cookie");
        state.core.mark_removed();
        return;
    };
    let Some((_, raw)) = fields.into_iter().find(|(n, _)| n == "cookie") else {
        stack.stats.inc("invalid_cookie");
        state.core.mark_removed();
        return;
    };
    let Ok(cookie) = CookiePacked::parse(&raw) else {
        stack.stats.inc("invalid_cookie");
        state.core.mark_removed();
        return;
    };
    let Some(remote) = stack.remotes.get(&state.core.remote_uid) else {
        state.core.mark_removed();
        return;
    };
    let Some(our_short) = remote.short.clone() else {
        state.core.mark_removed();
        return;
    };
    let Some(remote_pubber) = remote.pubber else {
        state.core.mark_removed();
        return;
    };
    let Ok(plain) = open(our_short.private(), &remote_pubber, &cookie.nonce, &cookie.cipher) else {
        stack.stats.inc("invalid_cookie");
        allower_nack(stack, state, PacketKind::Reject);
        state.core.mark_removed();
        return;
    };
    let Ok(stuff) = CookieStuff::parse(&plain) else {
        stack.stats.inc("invalid_cookie");
        state.core.mark_removed();
        return;
    };

    let allowent_short_pub = PublicKey::from(stuff.short_pub);
    state.oreo = Some(stuff.oreo);
    state.allowent_short_pub = Some(allowent_short_pub);

    // vouch: our long-term key holds our short key, checked by Allowent.
    let vnonce = fresh_nonce();
    let Ok(vcipher) = seal(
        &stack.local.keys.priver,
        &remote_pubber,
        &vnonce,
        &our_short.public_bytes(),
    ) else {
        stack.stats.inc("packing_error");
        state.core.mark_removed();
        return;
    };
    let initiate_stuff = InitiateStuff {
        long_pub: stack.local.pubhex(),
        vcipher,
        vnonce,
        fqdn: InitiateStuff::pack_fqdn(&stack.local.fqdn),
    };
    let Ok(plain) = initiate_stuff.pack() else {
        stack.stats.inc("packing_error");
        state.core.mark_removed();
        return;
    };
    let ononce = fresh_nonce();
    let Ok(ocipher) = seal(our_short.private(), &allowent_short_pub, &ononce, &plain) else {
        stack.stats.inc("packing_error");
        state.core.mark_removed();
        return;
    };
    let initiate = InitiatePacked {
        short_pub: our_short.public_bytes(),
        oreo: stuff.oreo,
        cipher: ocipher,
        nonce: ononce,
    };
    let Ok(body_bytes) = initiate.pack() else {
        stack.stats.inc("packing_error");
        state.core.mark_removed();
        return;
    };

    let dest = packet.header.source_addr();
    let header = base_header(stack, &state.core, &dest, PacketKind::Initiate);
    match stack.packeteer.pack(header, &[("initiate", body_bytes)]) {
        Ok(out) => stack.transmit(&mut state.core, out),
        Err(_) => {
            stack.stats.inc("packing_error");
            state.core.mark_removed();
        }
    }
}

fn allower_final_ack<K: Keep, P: Packeteer, D: DatagramSink>(
    stack: &mut Stack<K, P, D>,
    state: &mut AllowerState,
    packet: &Packet,
) {
    let header = packet.header.mirrored(PacketKind::Ack);
    if let Ok(ack) = stack.packeteer.pack(header, &[]) {
        let _ = stack.enqueue(ack.header.dest_addr(), ack.packed);
    }
    allower_complete(stack, state);
}

fn allower_complete<K: Keep, P: Packeteer, D: DatagramSink>(stack: &mut Stack<K, P, D>, state: &mut AllowerState) {
    if let Some(remote) = stack.remotes.get_mut(&state.core.remote_uid) {
        remote.allowed = Some(true);
        remote.next_sid();
    }
    stack.dump_remote(state.core.remote_uid);
    stack.stats.inc("allow_initiate_complete");
    if state.core.cascade {
        stack.alive(state.core.remote_uid, true);
    }
    state.core.mark_removed();
}

fn allower_nack<K: Keep, P: Packeteer, D: DatagramSink>(stack: &mut Stack<K, P, D>, state: &mut AllowerState, kind: PacketKind) {
    if let Some(rx) = &state.core.rx_packet {
        let header = rx.header.mirrored(kind);
        if let Ok(packet) = stack.packeteer.pack(header, &[]) {
            let _ = stack.enqueue(packet.header.dest_addr(), packet.packed);
        }
    }
    stack.stats.inc(&state.core.stat_key());
}

pub fn allower_tick<K: Keep, P: Packeteer, D: DatagramSink>(stack: &mut Stack<K, P, D>, state: &mut AllowerState, now: f64) {
    if state.core.timeout.expired(now) {
        state.core.mark_removed();
        return;
    }
    if state.core.redo.expired(now) {
        if let Some(packet) = state.core.tx_packet.clone() {
            let stat = match packet.header.pk {
                PacketKind::Hello => "redo_hello",
                PacketKind::Initiate => "redo_initiate",
                _ => "redo_final",
            };
            let _ = stack.enqueue(packet.header.dest_addr(), packet.packed);
            stack.stats.inc(stat);
        }
        state.core.redo.backoff(now);
    }
}

// -------------------------------------------------------------------------
// Allowent
// -------------------------------------------------------------------------

pub fn allowent_register<K: Keep, P: Packeteer, D: DatagramSink>(
    stack: &mut Stack<K, P, D>,
    packet: &Packet,
) -> TransactionIndex {
    let now = stack.now();
    let remote_uid = packet.header.se;
    let mut core = TxScaffold::new(
        Role::Correspondent,
        TransactionKind::Allow,
        "Allowent",
        remote_uid,
        packet.header.si,
        packet.header.ti,
        now,
        TransactionConfig::allowent(),
    );
    let index = stack.index_for_inbound(&packet.header);
    core.reg_index = Some(index.clone());
    if let Some(remote) = stack.remotes.get_mut(&remote_uid) {
        remote.add_transaction(index.clone());
    }
    stack.transactions.insert(
        index.clone(),
        TransactionState::Allowent(AllowentState {
            core,
            allower_short_pub: None,
            oreo: [0u8; NONCE_SIZE],
        }),
    );
    index
}

pub fn allowent_receive<K: Keep, P: Packeteer, D: DatagramSink>(
    stack: &mut Stack<K, P, D>,
    state: &mut AllowentState,
    pk: PacketKind,
    packet: Packet,
) {
    state.core.rx_packet = Some(packet.clone());
    match pk {
        PacketKind::Hello => allowent_hello(stack, state, &packet),
        PacketKind::Initiate => allowent_initiate(stack, state, &packet),
        PacketKind::Ack => allowent_final(stack, state),
        PacketKind::Nack | PacketKind::Refuse | PacketKind::Reject => {
            stack.stats.inc(&state.core.stat_key());
            state.core.mark_removed();
        }
        _ => {}
    }
}

fn allowent_hello<K: Keep, P: Packeteer, D: DatagramSink>(
    stack: &mut Stack<K, P, D>,
    state: &mut AllowentState,
    packet: &Packet,
) {
    let Ok(fields) = stack.packeteer.parse_body(packet) else {
        stack.stats.inc("invalid_hello");
        state.core.mark_removed();
        return;
    };
    let Some((_, raw)) = fields.into_iter().find(|(n, _)| n == "hello") else {
        stack.stats.inc("invalid_hello");
        state.core.mark_removed();
        return;
    };
    let Ok(hello) = HelloPacked::parse(&raw) else {
        stack.stats.inc("invalid_hello");
        state.core.mark_removed();
        return;
    };
    let allower_short_pub = PublicKey::from(hello.short_pub);
    let Some(remote) = stack.remotes.get(&state.core.remote_uid) else {
        state.core.mark_removed();
        return;
    };
    let Some(remote_pubber) = remote.pubber else {
        state.core.mark_removed();
        return;
    };
    if open(&stack.local.keys.priver, &remote_pubber, &hello.nonce, &hello.cipher).is_err() {
        stack.stats.inc("invalid_hello");
        state.core.mark_removed();
        return;
    }
    state.allower_short_pub = Some(allower_short_pub);
    state.oreo = fresh_nonce();

    if let Some(remote) = stack.remotes.get_mut(&state.core.remote_uid) {
        remote.rekey();
    }
    let our_short = stack.remotes.get(&state.core.remote_uid).and_then(|r| r.short.clone()).unwrap();

    let stuff = CookieStuff {
        short_pub: our_short.public_bytes(),
        seid: stack.local.uid,
        deid: state.core.remote_uid,
        oreo: state.oreo,
    };
    let plain = stuff.pack();
    let nonce = fresh_nonce();
    let Ok(cipher) = seal(&stack.local.keys.priver, &allower_short_pub, &nonce, &plain) else {
        stack.stats.inc("packing_error");
        state.core.mark_removed();
        return;
    };
    let cookie = CookiePacked { cipher, nonce };
    let Ok(body_bytes) = cookie.pack() else {
        stack.stats.inc("packing_error");
        state.core.mark_removed();
        return;
    };

    let header = packet.header.mirrored(PacketKind::Cookie);
    match stack.packeteer.pack(header, &[("cookie", body_bytes)]) {
        Ok(out) => stack.transmit(&mut state.core, out),
        Err(_) => {
            stack.stats.inc("packing_error");
            state.core.mark_removed();
        }
    }
}

fn allowent_initiate<K: Keep, P: Packeteer, D: DatagramSink>(
    stack: &mut Stack<K, P, D>,
    state: &mut AllowentState,
    packet: &Packet,
) {
    let Ok(fields) = stack.packeteer.parse_body(packet) else {
        stack.stats.inc("invalid_initiate");
        state.core.mark_removed();
        return;
    };
    let Some((_, raw)) = fields.into_iter().find(|(n, _)| n == "initiate") else {
        stack.stats.inc("invalid_initiate");
        state.core.mark_removed();
        return;
    };
    let Ok(initiate) = InitiatePacked::parse(&raw) else {
        stack.stats.inc("invalid_initiate");
        state.core.mark_removed();
        return;
    };

    let Some(allower_short_pub) = state.allower_short_pub else {
        state.core.mark_removed();
        return;
    };
    if initiate.short_pub != allower_short_pub.to_bytes() {
        stack.stats.inc("invalid_initiate");
        allowent_nack(stack, state, PacketKind::Reject);
        state.core.mark_removed();
        return;
    }
    if initiate.oreo != state.oreo {
        stack.stats.inc("invalid_initiate");
        allowent_nack(stack, state, PacketKind::Reject);
        state.core.mark_removed();
        return;
    }

    let Some(our_short) = stack.remotes.get(&state.core.remote_uid).and_then(|r| r.short.clone()) else {
        state.core.mark_removed();
        return;
    };
    let Ok(plain) = open(our_short.private(), &allower_short_pub, &initiate.nonce, &initiate.cipher) else {
        stack.stats.inc("invalid_initiate");
        allowent_nack(stack, state, PacketKind::Reject);
        state.core.mark_removed();
        return;
    };
    let Ok(stuff) = InitiateStuff::parse(&plain) else {
        stack.stats.inc("invalid_initiate");
        allowent_nack(stack, state, PacketKind::Reject);
        state.core.mark_removed();
        return;
    };

    let allower_long_pub = PublicKey::from(stuff.long_pub);
    let Ok(vouch) = open(&stack.local.keys.priver, &allower_long_pub, &stuff.vnonce, &stuff.vcipher) else {
        stack.stats.inc("invalid_initiate");
        allowent_nack(stack, state, PacketKind::Reject);
        state.core.mark_removed();
        return;
    };
    if vouch != allower_short_pub.to_bytes() {
        stack.stats.inc("invalid_initiate");
        allowent_nack(stack, state, PacketKind::Reject);
        state.core.mark_removed();
        return;
    }

    let fqdn = stuff.unpack_fqdn();
    if !stack.local.fqdn.is_empty() && fqdn != stack.local.fqdn {
        if stack.config.strict_fqdn {
            stack.stats.inc("invalid_initiate");
            allowent_nack(stack, state, PacketKind::Reject);
            state.core.mark_removed();
            return;
        }
        // Permissive default (spec §9 open question): logged, not rejected.
        warn!(initiator_fqdn = %fqdn, local_fqdn = %stack.local.fqdn, "Allowent: fqdn class mismatch, strict_fqdn is off");
    }

    let header = packet.header.mirrored(PacketKind::Ack);
    if let Ok(ack) = stack.packeteer.pack(header, &[]) {
        stack.transmit(&mut state.core, ack);
    }
}

fn allowent_final<K: Keep, P: Packeteer, D: DatagramSink>(stack: &mut Stack<K, P, D>, state: &mut AllowentState) {
    if let Some(remote) = stack.remotes.get_mut(&state.core.remote_uid) {
        remote.allowed = Some(true);
        remote.next_sid();
    }
    stack.dump_remote(state.core.remote_uid);
    stack.stats.inc("allow_correspond_complete");
    if state.core.cascade {
        stack.alive(state.core.remote_uid, true);
    }
    state.core.mark_removed();
}

fn allowent_nack<K: Keep, P: Packeteer, D: DatagramSink>(stack: &mut Stack<K, P, D>, state: &mut AllowentState, kind: PacketKind) {
    if let Some(rx) = &state.core.rx_packet {
        let header = rx.header.mirrored(kind);
        if let Ok(packet) = stack.packeteer.pack(header, &[]) {
            let _ = stack.enqueue(packet.header.dest_addr(), packet.packed);
        }
    }
    stack.stats.inc(&state.core.stat_key());
}

pub fn allowent_tick<K: Keep, P: Packeteer, D: DatagramSink>(stack: &mut Stack<K, P, D>, state: &mut AllowentState, now: f64) {
    if state.core.timeout.expired(now) {
        allowent_nack(stack, state, PacketKind::Nack);
        state.core.mark_removed();
        return;
    }
    if state.core.redo.expired(now) {
        if let Some(packet) = state.core.tx_packet.clone() {
            let _ = stack.enqueue(packet.header.dest_addr(), packet.packed);
            stack.stats.inc("redo_cookie");
        }
        state.core.redo.backoff(now);
    }
}
