//! Builder-pattern configuration, in the shape of the teacher's
//! `DialogManagerConfig::client(addr).with_from_uri(...)` builders.

/// Per-transaction-kind timing and behavior knobs (spec §6).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransactionConfig {
    /// Outer timeout in seconds; `0.0` disables it.
    pub timeout: f64,
    pub redo_timeout_min: f64,
    pub redo_timeout_max: f64,
    /// On success, automatically progress join -> allow -> alive.
    pub cascade: bool,
    /// Segment-by-segment acking in messages.
    pub wait: bool,
    /// Broadcast flag (reserved).
    pub bcst: bool,
}

impl TransactionConfig {
    pub fn new(timeout: f64, redo_timeout_min: f64, redo_timeout_max: f64) -> Self {
        TransactionConfig {
            timeout,
            redo_timeout_min,
            redo_timeout_max,
            cascade: false,
            wait: false,
            bcst: false,
        }
    }

    pub fn with_cascade(mut self, cascade: bool) -> Self {
        self.cascade = cascade;
        self
    }

    pub fn with_wait(mut self, wait: bool) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_bcst(mut self, bcst: bool) -> Self {
        self.bcst = bcst;
        self
    }

    pub fn joiner() -> Self {
        Self::new(5.0, 1.0, 4.0)
    }

    pub fn joinent() -> Self {
        Self::new(5.0, 0.1, 2.0)
    }

    pub fn yoker() -> Self {
        Self::new(5.0, 1.0, 4.0)
    }

    pub fn yokent() -> Self {
        Self::new(5.0, 0.1, 2.0)
    }

    pub fn allower() -> Self {
        Self::new(4.0, 0.25, 1.0)
    }

    pub fn allowent() -> Self {
        Self::new(4.0, 0.25, 1.0)
    }

    pub fn aliver() -> Self {
        Self::new(10.0, 0.0, 0.0)
    }

    pub fn alivent() -> Self {
        Self::new(10.0, 0.0, 0.0)
    }

    pub fn messenger() -> Self {
        Self::new(10.0, 1.0, 3.0)
    }

    pub fn messengent() -> Self {
        Self::new(10.0, 1.0, 3.0)
    }
}

/// The owning endpoint's own configuration.
#[derive(Debug, Clone)]
pub struct LocalConfig {
    pub name: String,
    pub role: String,
    pub ha: (String, u16),
    /// Authoritative role in join: allowed to mint remote uids.
    pub main: bool,
    /// Whether identity rewrites (name/ha changes after first join) are permitted.
    pub mutable: bool,
    pub fqdn: String,
}

impl LocalConfig {
    pub fn new(name: impl Into<String>, ha: (String, u16)) -> Self {
        LocalConfig {
            name: name.into(),
            role: "road".to_string(),
            ha,
            main: false,
            mutable: false,
            fqdn: String::new(),
        }
    }

    pub fn main(mut self, main: bool) -> Self {
        self.main = main;
        self
    }

    pub fn mutable(mut self, mutable: bool) -> Self {
        self.mutable = mutable;
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    pub fn with_fqdn(mut self, fqdn: impl Into<String>) -> Self {
        self.fqdn = fqdn.into();
        self
    }
}

/// Top-level stack configuration.
#[derive(Debug, Clone)]
pub struct RoadConfig {
    pub local: LocalConfig,
    /// Reject an allow's initiate when its fqdn's class mismatches ours.
    /// Defaults to `false`, matching the source's permissive behavior
    /// (spec §9 open question) of logging the mismatch without rejecting.
    pub strict_fqdn: bool,
    pub join: TransactionConfig,
    pub yoke: TransactionConfig,
    pub allow: TransactionConfig,
    pub alive: TransactionConfig,
    pub message: TransactionConfig,
}

impl RoadConfig {
    pub fn new(local: LocalConfig) -> Self {
        RoadConfig {
            local,
            strict_fqdn: false,
            join: TransactionConfig::joiner(),
            yoke: TransactionConfig::yoker(),
            allow: TransactionConfig::allower(),
            alive: TransactionConfig::aliver(),
            message: TransactionConfig::messenger(),
        }
    }

    pub fn with_strict_fqdn(mut self, strict: bool) -> Self {
        self.strict_fqdn = strict;
        self
    }
}
