//! The transaction index (spec §3): the matching tuple that lets both sides
//! of a transaction agree on its identity even before either side has been
//! assigned a durable uid.

/// A peer endpoint identity as seen at index-computation time: its uid once
/// assigned, or its network address while still vacuous (uid 0) —
/// "bootstrapping", per spec §3.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EndpointId {
    Uid(u32),
    Ha(String, u16),
}

impl EndpointId {
    pub fn from_uid_or_ha(uid: u32, ha: &(String, u16)) -> Self {
        if uid == 0 {
            EndpointId::Ha(ha.0.clone(), ha.1)
        } else {
            EndpointId::Uid(uid)
        }
    }
}

/// `(rmt, local_id, remote_id, sid, tid, bcst)`. Uniquely identifies a
/// transaction across the pair of peers; the remote side computes the same
/// tuple with `rmt` inverted and local/remote swapped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionIndex {
    pub rmt: bool,
    pub local_id: EndpointId,
    pub remote_id: EndpointId,
    pub sid: u32,
    pub tid: u32,
    pub bcst: bool,
}

impl TransactionIndex {
    /// The index the *other* side would compute for the same exchange.
    pub fn inverted(&self) -> TransactionIndex {
        TransactionIndex {
            rmt: !self.rmt,
            local_id: self.remote_id.clone(),
            remote_id: self.local_id.clone(),
            sid: self.sid,
            tid: self.tid,
            bcst: self.bcst,
        }
    }
}
