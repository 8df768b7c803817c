//! The transaction layer: a shared scaffold (timers, transmit, add/remove)
//! plus the seven concrete transaction kinds, each dispatched through a
//! closed `TransactionState` enum rather than a trait object — the kind set
//! is fixed at seven and dispatch is synchronous, so a `match` on a sum type
//! gets the teacher's logic/runner split without `Box<dyn _>` or the async
//! plumbing that split existed to support.

pub mod alive;
pub mod allow;
pub mod join;
pub mod message;
pub mod staler;
pub mod timer;
pub mod yoke;

use crate::config::TransactionConfig;
use crate::index::TransactionIndex;
use road_wire::{Packet, PacketKind, TransactionKind};
use timer::{RedoTimer, StoreTimer};

/// Whether this side originated the exchange (`Initiator`) or is responding
/// to one (`Correspondent`). Replaces the teacher's/source's subclass split
/// per spec §9's redesign note.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Correspondent,
}

/// Fields every transaction carries regardless of kind (spec §4.1).
pub struct TxScaffold {
    pub role: Role,
    pub kind: TransactionKind,
    pub class_name: &'static str,
    /// The remote this transaction runs against; `0` while still vacuous.
    pub remote_uid: u32,
    pub sid: u32,
    pub tid: u32,
    pub bcst: bool,
    pub wait: bool,
    pub cascade: bool,
    pub timeout: StoreTimer,
    pub redo: RedoTimer,
    pub tx_packet: Option<Packet>,
    pub rx_packet: Option<Packet>,
    /// The index this transaction is currently registered under (may change
    /// mid-flight, e.g. a Joiner whose local uid gets assigned on accept).
    pub reg_index: Option<TransactionIndex>,
    pub removed: bool,
}

impl TxScaffold {
    pub fn new(
        role: Role,
        kind: TransactionKind,
        class_name: &'static str,
        remote_uid: u32,
        sid: u32,
        tid: u32,
        now: f64,
        cfg: TransactionConfig,
    ) -> Self {
        TxScaffold {
            role,
            kind,
            class_name,
            remote_uid,
            sid,
            tid,
            bcst: cfg.bcst,
            wait: cfg.wait,
            cascade: cfg.cascade,
            timeout: StoreTimer::new(now, cfg.timeout),
            redo: RedoTimer::new(now, cfg.redo_timeout_min, cfg.redo_timeout_max),
            tx_packet: None,
            rx_packet: None,
            reg_index: None,
            removed: false,
        }
    }

    pub fn stat_key(&self) -> String {
        format!("{}_transaction_failure", self.class_name.to_lowercase())
    }

    pub fn mark_removed(&mut self) {
        self.removed = true;
    }
}

/// Outcome a kind-specific handler hands back to the stack so it knows
/// whether to keep driving this transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    Continue,
    Done,
}

pub(crate) fn pk_is_terminal_nack(pk: PacketKind) -> bool {
    matches!(
        pk,
        PacketKind::Nack | PacketKind::Refuse | PacketKind::Reject
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_nack_refuse_reject_are_terminal() {
        assert!(pk_is_terminal_nack(PacketKind::Nack));
        assert!(pk_is_terminal_nack(PacketKind::Refuse));
        assert!(pk_is_terminal_nack(PacketKind::Reject));
        assert!(!pk_is_terminal_nack(PacketKind::Ack));
        assert!(!pk_is_terminal_nack(PacketKind::Request));
        assert!(!pk_is_terminal_nack(PacketKind::Unjoined));
    }

    #[test]
    fn stat_key_lowercases_class_name() {
        let scaffold = TxScaffold::new(
            Role::Initiator,
            TransactionKind::Join,
            "Joiner",
            0,
            1,
            1,
            0.0,
            TransactionConfig::new(5.0, 1.0, 4.0),
        );
        assert_eq!(scaffold.stat_key(), "joiner_transaction_failure");
    }
}
