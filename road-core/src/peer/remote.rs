use crate::crypto::ShortKeyPair;
use crate::index::TransactionIndex;
use ed25519_dalek::VerifyingKey;
use x25519_dalek::PublicKey;

/// A known counterpart (spec §3). `uid == 0` means ephemeral/unknown.
pub struct Remote {
    pub uid: u32,
    pub name: String,
    pub role: String,
    pub ha: (String, u16),
    pub verfer: Option<VerifyingKey>,
    pub pubber: Option<PublicKey>,
    /// Tri-state: `Some(true)` joined, `Some(false)` explicitly refused,
    /// `None` pending.
    pub joined: Option<bool>,
    pub allowed: Option<bool>,
    pub alived: Option<bool>,
    pub sid: u32,
    pub rsid: u32,
    next_tid: u32,
    pub short: Option<ShortKeyPair>,
    pub transactions: Vec<TransactionIndex>,
}

impl Remote {
    pub fn new(uid: u32, name: impl Into<String>, role: impl Into<String>, ha: (String, u16)) -> Self {
        Remote {
            uid,
            name: name.into(),
            role: role.into(),
            ha,
            verfer: None,
            pubber: None,
            joined: None,
            allowed: None,
            alived: None,
            sid: 0,
            rsid: 0,
            next_tid: 0,
            short: None,
            transactions: Vec::new(),
        }
    }

    pub fn verhex(&self) -> Option<[u8; 32]> {
        self.verfer.map(|v| v.to_bytes())
    }

    pub fn pubhex(&self) -> Option<[u8; 32]> {
        self.pubber.map(|p| p.to_bytes())
    }

    /// Advances and returns the next transaction id for this remote.
    pub fn next_tid(&mut self) -> u32 {
        self.next_tid += 1;
        self.next_tid
    }

    /// Advances to a new session id, the way a successful join/allow does.
    pub fn next_sid(&mut self) {
        self.sid += 1;
    }

    /// Regenerates the ephemeral short-term keypair and clears `allowed`,
    /// invalidating any allow handshake in progress.
    pub fn rekey(&mut self) {
        self.short = Some(ShortKeyPair::generate());
        self.allowed = None;
    }

    pub fn add_transaction(&mut self, index: TransactionIndex) {
        if !self.transactions.contains(&index) {
            self.transactions.push(index);
        }
    }

    pub fn remove_transaction(&mut self, index: &TransactionIndex) {
        self.transactions.retain(|i| i != index);
    }

    /// Resets the remote to a vacuous state, ready to re-join from scratch.
    pub fn make_vacuous(&mut self) {
        self.sid = 0;
        self.rsid = 0;
        self.next_tid = 0;
        self.joined = None;
        self.allowed = None;
    }
}
