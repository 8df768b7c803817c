use serde::{Deserialize, Serialize};
use std::fmt;

/// The five protocol operations a transaction can carry out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionKind {
    Join,
    Yoke,
    Allow,
    Alive,
    Message,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionKind::Join => "join",
            TransactionKind::Yoke => "yoke",
            TransactionKind::Allow => "allow",
            TransactionKind::Alive => "alive",
            TransactionKind::Message => "message",
        };
        f.write_str(s)
    }
}

/// Packet kinds carried in the header's `pk` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PacketKind {
    Request,
    Ack,
    Response,
    Nack,
    Refuse,
    Reject,
    Renew,
    Hello,
    Cookie,
    Initiate,
    Unjoined,
    Unallowed,
    Resend,
    Message,
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Coat/foot kinds for the packeting layer's head/body/coat/foot framing.
/// This layer only ever produces `Nada` (no coat, no foot).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CoatKind {
    #[default]
    Nada,
}

pub type FootKind = CoatKind;

/// Result of the keep layer's check of a remote's long-term credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AcceptStatus {
    Accepted,
    Pending,
    Rejected,
}
