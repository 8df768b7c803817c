//! The stack: owns the peer registries, the monotonic clock, the
//! transaction table, and the datagram queues. Routes inbound packets to
//! the matching transaction, ticks every live transaction, and exposes the
//! user-facing `join`/`yoke`/`allow`/`alive`/`send` primitives used to kick
//! off new exchanges.

use crate::config::RoadConfig;
use crate::index::{EndpointId, TransactionIndex};
use crate::peer::{Local, Remote};
use crate::stats::Stats;
use crate::transaction::alive;
use crate::transaction::allow;
use crate::transaction::join;
use crate::transaction::message;
use crate::transaction::staler;
use crate::transaction::yoke;
use crate::transaction::{Role, TxScaffold};
use road_wire::{DatagramSink, Keep, Packeteer};
use road_wire::{Packet, PacketHeader, PacketKind, TransactionKind};
use std::collections::{HashMap, VecDeque};

/// The tagged union over the seven concrete transaction kinds, dispatched
/// by `match` rather than a trait object (see `transaction` module docs).
pub enum TransactionState {
    Joiner(join::JoinerState),
    Joinent(join::JoinentState),
    Yoker(yoke::YokerState),
    Yokent(yoke::YokentState),
    Allower(allow::AllowerState),
    Allowent(allow::AllowentState),
    Aliver(alive::AliverState),
    Alivent(alive::AliventState),
    Messenger(message::MessengerState),
    Messengent(message::MessengentState),
}

impl TransactionState {
    pub fn scaffold(&self) -> &TxScaffold {
        match self {
            TransactionState::Joiner(s) => &s.core,
            TransactionState::Joinent(s) => &s.core,
            TransactionState::Yoker(s) => &s.core,
            TransactionState::Yokent(s) => &s.core,
            TransactionState::Allower(s) => &s.core,
            TransactionState::Allowent(s) => &s.core,
            TransactionState::Aliver(s) => &s.core,
            TransactionState::Alivent(s) => &s.core,
            TransactionState::Messenger(s) => &s.core,
            TransactionState::Messengent(s) => &s.core,
        }
    }

    pub fn scaffold_mut(&mut self) -> &mut TxScaffold {
        match self {
            TransactionState::Joiner(s) => &mut s.core,
            TransactionState::Joinent(s) => &mut s.core,
            TransactionState::Yoker(s) => &mut s.core,
            TransactionState::Yokent(s) => &mut s.core,
            TransactionState::Allower(s) => &mut s.core,
            TransactionState::Allowent(s) => &mut s.core,
            TransactionState::Aliver(s) => &mut s.core,
            TransactionState::Alivent(s) => &mut s.core,
            TransactionState::Messenger(s) => &mut s.core,
            TransactionState::Messengent(s) => &mut s.core,
        }
    }
}

pub struct Stack<K: Keep, P: Packeteer, D: DatagramSink> {
    pub local: Local,
    pub remotes: HashMap<u32, Remote>,
    pub name_remotes: HashMap<String, u32>,
    pub ha_remotes: HashMap<(String, u16), u32>,
    pub stats: Stats,
    pub config: RoadConfig,
    pub clock: f64,
    pub transactions: HashMap<TransactionIndex, TransactionState>,
    pub rx_msgs: VecDeque<(Vec<u8>, String)>,
    pub keep: K,
    pub packeteer: P,
    pub sink: D,
    next_local_uid: u32,
}

impl<K: Keep, P: Packeteer, D: DatagramSink> Stack<K, P, D> {
    pub fn new(config: RoadConfig, keep: K, packeteer: P, sink: D) -> Self {
        let local = Local::new(config.local.name.clone(), config.local.role.clone(), config.local.ha.clone());
        let mut local = local;
        local.main = config.local.main;
        local.mutable = config.local.mutable;
        local.fqdn = config.local.fqdn.clone();
        Stack {
            local,
            remotes: HashMap::new(),
            name_remotes: HashMap::new(),
            ha_remotes: HashMap::new(),
            stats: Stats::new(),
            config,
            clock: 0.0,
            transactions: HashMap::new(),
            rx_msgs: VecDeque::new(),
            keep,
            packeteer,
            sink,
            next_local_uid: 1,
        }
    }

    pub fn now(&self) -> f64 {
        self.clock
    }

    /// Advances the stack's monotonic clock by `dt` seconds and ticks every
    /// live transaction. No operation here blocks or yields (spec §5).
    pub fn advance(&mut self, dt: f64) {
        self.clock += dt;
        let now = self.clock;
        let indices: Vec<TransactionIndex> = self.transactions.keys().cloned().collect();
        for idx in indices {
            self.tick_one(&idx, now);
        }
    }

    fn tick_one(&mut self, idx: &TransactionIndex, now: f64) {
        let Some(mut state) = self.transactions.remove(idx) else {
            return;
        };
        match &mut state {
            TransactionState::Joiner(s) => join::joiner_tick(self, s, now),
            TransactionState::Joinent(s) => join::joinent_tick(self, s, now),
            TransactionState::Yoker(s) => yoke::yoker_tick(self, s, now),
            TransactionState::Yokent(s) => yoke::yokent_tick(self, s, now),
            TransactionState::Allower(s) => allow::allower_tick(self, s, now),
            TransactionState::Allowent(s) => allow::allowent_tick(self, s, now),
            TransactionState::Aliver(s) => alive::aliver_tick(self, s, now),
            TransactionState::Alivent(s) => alive::alivent_tick(self, s, now),
            TransactionState::Messenger(s) => message::messenger_tick(self, s, now),
            TransactionState::Messengent(s) => message::messengent_tick(self, s, now),
        }
        self.reinsert_if_live(idx.clone(), state);
    }

    fn reinsert_if_live(&mut self, idx: TransactionIndex, state: TransactionState) {
        if state.scaffold().removed {
            let reg_idx = state.scaffold().reg_index.clone().unwrap_or(idx);
            // The remote a torn-down transaction was registered against may
            // have moved uid (e.g. a Joiner accepted under a freshly minted
            // uid), so prune by index across the registry rather than by
            // the scaffold's (possibly stale) remote_uid.
            for remote in self.remotes.values_mut() {
                remote.remove_transaction(&reg_idx);
            }
            return;
        }
        let target = state.scaffold().reg_index.clone().unwrap_or(idx);
        self.transactions.insert(target, state);
    }

    /// Routes an inbound packet to its matching transaction, or to a
    /// stateless Staler/Stalent if none matches.
    pub fn receive(&mut self, packet: Packet) {
        let index = self.index_for_inbound(&packet.header);
        let pk = packet.header.pk;
        if !self.transactions.contains_key(&index) {
            self.receive_unmatched(index, pk, packet);
            return;
        }
        let mut state = self.transactions.remove(&index).unwrap();
        match &mut state {
            TransactionState::Joiner(s) => join::joiner_receive(self, s, pk, packet),
            TransactionState::Joinent(s) => join::joinent_receive(self, s, pk, packet),
            TransactionState::Yoker(s) => yoke::yoker_receive(self, s, pk, packet),
            TransactionState::Yokent(s) => yoke::yokent_receive(self, s, pk, packet),
            TransactionState::Allower(s) => allow::allower_receive(self, s, pk, packet),
            TransactionState::Allowent(s) => allow::allowent_receive(self, s, pk, packet),
            TransactionState::Aliver(s) => alive::aliver_receive(self, s, pk, packet),
            TransactionState::Alivent(s) => alive::alivent_receive(self, s, pk, packet),
            TransactionState::Messenger(s) => message::messenger_receive(self, s, pk, packet),
            TransactionState::Messengent(s) => message::messengent_receive(self, s, pk, packet),
        }
        self.reinsert_if_live(index, state);
    }

    fn receive_unmatched(&mut self, index: TransactionIndex, pk: PacketKind, packet: Packet) {
        let new_index = match (packet.header.tk, pk) {
            (TransactionKind::Join, PacketKind::Request) => Some(join::joinent_register(self, &packet)),
            (TransactionKind::Yoke, PacketKind::Request) => Some(yoke::yokent_register(self, &packet)),
            (TransactionKind::Allow, PacketKind::Hello) => Some(allow::allowent_register(self, &packet)),
            (TransactionKind::Alive, PacketKind::Request) => Some(alive::alivent_register(self, &packet)),
            (TransactionKind::Message, PacketKind::Message) => Some(message::messengent_register(self, &packet)),
            _ => None,
        };

        let Some(idx) = new_index else {
            if index.rmt {
                staler::stale_correspondent(self, &packet);
            } else {
                staler::stale_initiator(self, &packet);
            }
            return;
        };

        let Some(mut state) = self.transactions.remove(&idx) else {
            return;
        };
        match &mut state {
            TransactionState::Joinent(s) => join::joinent_receive(self, s, pk, packet),
            TransactionState::Yokent(s) => yoke::yokent_receive(self, s, pk, packet),
            TransactionState::Allowent(s) => allow::allowent_receive(self, s, pk, packet),
            TransactionState::Alivent(s) => alive::alivent_receive(self, s, pk, packet),
            TransactionState::Messengent(s) => message::messengent_receive(self, s, pk, packet),
            _ => {}
        }
        self.reinsert_if_live(idx, state);
    }

    // -- transaction index helpers --------------------------------------

    pub fn index_for_inbound(&self, header: &PacketHeader) -> TransactionIndex {
        TransactionIndex {
            rmt: header.cf,
            local_id: EndpointId::from_uid_or_ha(header.de, &self.local.ha),
            remote_id: EndpointId::from_uid_or_ha(header.se, &header.source_addr()),
            sid: header.si,
            tid: header.ti,
            bcst: header.bf,
        }
    }

    // -- registry mutation ------------------------------------------------

    pub fn remote_for_ha(&self, ha: &(String, u16)) -> Option<&Remote> {
        self.ha_remotes.get(ha).and_then(|uid| self.remotes.get(uid))
    }

    pub fn remote_for_name(&self, name: &str) -> Option<&Remote> {
        self.name_remotes.get(name).and_then(|uid| self.remotes.get(uid))
    }

    pub fn uid_for_ha(&self, ha: &(String, u16)) -> Option<u32> {
        self.ha_remotes.get(ha).copied()
    }

    pub fn uid_for_name(&self, name: &str) -> Option<u32> {
        self.name_remotes.get(name).copied()
    }

    /// Whether a live transaction of `kind` is already running against
    /// `uid`, checked against the transaction table itself rather than a
    /// remote's flat index list (which carries no kind of its own).
    pub fn remote_has_live_transaction(&self, uid: u32, kind: TransactionKind) -> bool {
        self.transactions
            .values()
            .any(|s| s.scaffold().remote_uid == uid && s.scaffold().kind == kind)
    }

    /// Removes a remote from all three registries and returns it by value,
    /// for handlers that need to mutate it before deciding its final uid.
    pub fn take_remote(&mut self, uid: u32) -> Option<Remote> {
        let remote = self.remotes.remove(&uid)?;
        self.name_remotes.remove(&remote.name);
        self.ha_remotes.remove(&remote.ha);
        Some(remote)
    }

    pub fn add_remote(&mut self, remote: Remote) -> u32 {
        let uid = remote.uid;
        self.name_remotes.insert(remote.name.clone(), uid);
        self.ha_remotes.insert(remote.ha.clone(), uid);
        self.remotes.insert(uid, remote);
        uid
    }

    pub fn remove_remote(&mut self, uid: u32, _clear: bool) {
        if let Some(remote) = self.remotes.remove(&uid) {
            self.name_remotes.remove(&remote.name);
            self.ha_remotes.remove(&remote.ha);
        }
    }

    /// Changes a remote's uid (e.g. on join-accept, or back to 0 on renew).
    pub fn move_remote(&mut self, old_uid: u32, new_uid: u32) {
        if let Some(mut remote) = self.remotes.remove(&old_uid) {
            remote.uid = new_uid;
            self.ha_remotes.insert(remote.ha.clone(), new_uid);
            self.name_remotes.insert(remote.name.clone(), new_uid);
            self.remotes.insert(new_uid, remote);
        }
    }

    pub fn rename_remote(&mut self, uid: u32, new_name: String) {
        if let Some(remote) = self.remotes.get_mut(&uid) {
            self.name_remotes.remove(&remote.name);
            remote.name = new_name.clone();
            self.name_remotes.insert(new_name, uid);
        }
    }

    pub fn mint_uid(&mut self) -> u32 {
        let uid = self.next_local_uid;
        self.next_local_uid += 1;
        uid
    }

    pub fn dump_remote(&mut self, uid: u32) {
        self.keep.dump_remote(uid);
    }

    pub fn dump_local(&mut self) {
        self.keep.dump_local(self.local.uid);
    }

    // -- outbound -----------------------------------------------------------

    pub fn enqueue(&mut self, addr: (String, u16), bytes: Vec<u8>) -> std::io::Result<()> {
        self.sink.send_to(addr, bytes)
    }

    pub fn send_bare_nack(&mut self, header: PacketHeader, addr: (String, u16)) {
        if let Ok(packet) = self.packeteer.pack(header, &[]) {
            let _ = self.enqueue(addr, packet.packed);
        } else {
            self.stats.inc("packing_error");
        }
    }

    /// On a send failure, counts it against the transaction's own failure
    /// stat (spec §4.1) and tears the transaction down instead of leaving it
    /// to time out silently.
    pub fn transmit(&mut self, scaffold: &mut TxScaffold, packet: Packet) {
        let addr = packet.header.dest_addr();
        if self.enqueue(addr, packet.packed.clone()).is_err() {
            self.stats.inc(&scaffold.stat_key());
            scaffold.mark_removed();
            return;
        }
        scaffold.tx_packet = Some(packet);
    }

    // -- user-facing entry points --------------------------------------------

    /// Kicks off a join against `ha`, creating an ephemeral remote if none
    /// is known at that address yet.
    pub fn join(&mut self, ha: (String, u16), timeout: f64) {
        join::joiner_start(self, ha, timeout);
    }

    pub fn yoke(&mut self, duid: u32, timeout: f64) {
        yoke::yoker_start(self, duid, timeout);
    }

    pub fn allow(&mut self, duid: u32, cascade: bool, timeout: f64) {
        allow::allower_start(self, duid, cascade, timeout);
    }

    pub fn alive(&mut self, duid: u32, cascade: bool) {
        alive::aliver_start(self, duid, cascade);
    }

    pub fn send_message(&mut self, duid: u32, body: Vec<u8>) {
        message::messenger_start(self, duid, body);
    }
}
