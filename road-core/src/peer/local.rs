use crate::crypto::LongKeyPair;

/// The owning endpoint's own peer record.
pub struct Local {
    pub uid: u32,
    pub name: String,
    pub role: String,
    pub ha: (String, u16),
    /// Authoritative role in join: allowed to mint remote uids.
    pub main: bool,
    /// Whether identity rewrites (name/ha changes after first join) are permitted.
    pub mutable: bool,
    pub fqdn: String,
    pub keys: LongKeyPair,
}

impl Local {
    pub fn new(name: impl Into<String>, role: impl Into<String>, ha: (String, u16)) -> Self {
        Local {
            uid: 0,
            name: name.into(),
            role: role.into(),
            ha,
            main: false,
            mutable: false,
            fqdn: String::new(),
            keys: LongKeyPair::generate(),
        }
    }

    pub fn verhex(&self) -> [u8; 32] {
        self.keys.verhex()
    }

    pub fn pubhex(&self) -> [u8; 32] {
        self.keys.pubhex()
    }
}
