//! Fixed-size packed structures for the allow (CurveCP) handshake.
//!
//! This crate only owns the *framing* — concatenating and splitting the
//! byte fields in a fixed, well-known order. The actual encryption lives in
//! `road-core`'s crypto module; these types carry already-encrypted bytes.

use thiserror::Error;

pub const PUB_KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 24;
pub const MAC_SIZE: usize = 16;
pub const CANARY_SIZE: usize = 32;
pub const FQDN_SIZE: usize = 128;

pub const HELLO_CIPHER_SIZE: usize = CANARY_SIZE + MAC_SIZE;
pub const COOKIESTUFF_SIZE: usize = PUB_KEY_SIZE + 4 + 4 + NONCE_SIZE;
pub const COOKIE_CIPHER_SIZE: usize = COOKIESTUFF_SIZE + MAC_SIZE;
pub const VOUCH_CIPHER_SIZE: usize = PUB_KEY_SIZE + MAC_SIZE;
pub const INITIATESTUFF_SIZE: usize = PUB_KEY_SIZE + VOUCH_CIPHER_SIZE + NONCE_SIZE + FQDN_SIZE;
pub const INITIATE_CIPHER_SIZE: usize = INITIATESTUFF_SIZE + MAC_SIZE;

#[derive(Debug, Error)]
pub enum PackerError {
    #[error("packer field '{field}' has wrong size: expected {expected}, got {got}")]
    WrongSize {
        field: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("packed buffer too short: expected at least {expected} bytes, got {got}")]
    TooShort { expected: usize, got: usize },
}

fn check_len(field: &'static str, buf: &[u8], expected: usize) -> Result<(), PackerError> {
    if buf.len() != expected {
        return Err(PackerError::WrongSize {
            field,
            expected,
            got: buf.len(),
        });
    }
    Ok(())
}

/// `HELLO_PACKER` = `short_pub(32) || cipher(48) || nonce(24)`.
///
/// `cipher` is the 32-byte all-zero canary encrypted under
/// `(allower_short_priv, remote_long_pub)`.
#[derive(Debug, Clone)]
pub struct HelloPacked {
    pub short_pub: [u8; PUB_KEY_SIZE],
    pub cipher: Vec<u8>,
    pub nonce: [u8; NONCE_SIZE],
}

impl HelloPacked {
    pub fn pack(&self) -> Result<Vec<u8>, PackerError> {
        check_len("hello.cipher", &self.cipher, HELLO_CIPHER_SIZE)?;
        let mut out = Vec::with_capacity(PUB_KEY_SIZE + HELLO_CIPHER_SIZE + NONCE_SIZE);
        out.extend_from_slice(&self.short_pub);
        out.extend_from_slice(&self.cipher);
        out.extend_from_slice(&self.nonce);
        Ok(out)
    }

    pub fn parse(buf: &[u8]) -> Result<Self, PackerError> {
        let expected = PUB_KEY_SIZE + HELLO_CIPHER_SIZE + NONCE_SIZE;
        if buf.len() != expected {
            return Err(PackerError::TooShort {
                expected,
                got: buf.len(),
            });
        }
        let mut short_pub = [0u8; PUB_KEY_SIZE];
        short_pub.copy_from_slice(&buf[0..PUB_KEY_SIZE]);
        let cipher = buf[PUB_KEY_SIZE..PUB_KEY_SIZE + HELLO_CIPHER_SIZE].to_vec();
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&buf[PUB_KEY_SIZE + HELLO_CIPHER_SIZE..]);
        Ok(HelloPacked {
            short_pub,
            cipher,
            nonce,
        })
    }
}

/// `COOKIESTUFF_PACKER` = `short_pub(32) || seid(4) || deid(4) || oreo(24)`,
/// the plaintext sealed inside a cookie's `cipher`.
#[derive(Debug, Clone)]
pub struct CookieStuff {
    pub short_pub: [u8; PUB_KEY_SIZE],
    pub seid: u32,
    pub deid: u32,
    pub oreo: [u8; NONCE_SIZE],
}

impl CookieStuff {
    pub fn pack(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(COOKIESTUFF_SIZE);
        out.extend_from_slice(&self.short_pub);
        out.extend_from_slice(&self.seid.to_be_bytes());
        out.extend_from_slice(&self.deid.to_be_bytes());
        out.extend_from_slice(&self.oreo);
        out
    }

    pub fn parse(buf: &[u8]) -> Result<Self, PackerError> {
        check_len("cookiestuff", buf, COOKIESTUFF_SIZE)?;
        let mut short_pub = [0u8; PUB_KEY_SIZE];
        short_pub.copy_from_slice(&buf[0..32]);
        let seid = u32::from_be_bytes(buf[32..36].try_into().unwrap());
        let deid = u32::from_be_bytes(buf[36..40].try_into().unwrap());
        let mut oreo = [0u8; NONCE_SIZE];
        oreo.copy_from_slice(&buf[40..40 + NONCE_SIZE]);
        Ok(CookieStuff {
            short_pub,
            seid,
            deid,
            oreo,
        })
    }
}

/// `COOKIE_PACKER` = `cipher || nonce`.
#[derive(Debug, Clone)]
pub struct CookiePacked {
    pub cipher: Vec<u8>,
    pub nonce: [u8; NONCE_SIZE],
}

impl CookiePacked {
    pub fn pack(&self) -> Result<Vec<u8>, PackerError> {
        check_len("cookie.cipher", &self.cipher, COOKIE_CIPHER_SIZE)?;
        let mut out = Vec::with_capacity(COOKIE_CIPHER_SIZE + NONCE_SIZE);
        out.extend_from_slice(&self.cipher);
        out.extend_from_slice(&self.nonce);
        Ok(out)
    }

    pub fn parse(buf: &[u8]) -> Result<Self, PackerError> {
        let expected = COOKIE_CIPHER_SIZE + NONCE_SIZE;
        if buf.len() != expected {
            return Err(PackerError::TooShort {
                expected,
                got: buf.len(),
            });
        }
        let cipher = buf[0..COOKIE_CIPHER_SIZE].to_vec();
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&buf[COOKIE_CIPHER_SIZE..]);
        Ok(CookiePacked { cipher, nonce })
    }
}

/// `INITIATESTUFF_PACKER` = `long_pub(32) || vcipher(48) || vnonce(24) || fqdn(128)`,
/// the plaintext sealed inside an initiate's `cipher`.
#[derive(Debug, Clone)]
pub struct InitiateStuff {
    pub long_pub: [u8; PUB_KEY_SIZE],
    pub vcipher: Vec<u8>,
    pub vnonce: [u8; NONCE_SIZE],
    /// Right-space-padded to `FQDN_SIZE` bytes.
    pub fqdn: [u8; FQDN_SIZE],
}

impl InitiateStuff {
    pub fn pack_fqdn(fqdn: &str) -> [u8; FQDN_SIZE] {
        let mut buf = [b' '; FQDN_SIZE];
        let bytes = fqdn.as_bytes();
        let n = bytes.len().min(FQDN_SIZE);
        buf[..n].copy_from_slice(&bytes[..n]);
        buf
    }

    pub fn unpack_fqdn(&self) -> String {
        let trimmed = std::str::from_utf8(&self.fqdn)
            .unwrap_or("")
            .trim_end_matches(' ');
        trimmed.to_string()
    }

    pub fn pack(&self) -> Result<Vec<u8>, PackerError> {
        check_len("initiatestuff.vcipher", &self.vcipher, VOUCH_CIPHER_SIZE)?;
        let mut out = Vec::with_capacity(INITIATESTUFF_SIZE);
        out.extend_from_slice(&self.long_pub);
        out.extend_from_slice(&self.vcipher);
        out.extend_from_slice(&self.vnonce);
        out.extend_from_slice(&self.fqdn);
        Ok(out)
    }

    pub fn parse(buf: &[u8]) -> Result<Self, PackerError> {
        check_len("initiatestuff", buf, INITIATESTUFF_SIZE)?;
        let mut long_pub = [0u8; PUB_KEY_SIZE];
        long_pub.copy_from_slice(&buf[0..32]);
        let vcipher = buf[32..32 + VOUCH_CIPHER_SIZE].to_vec();
        let mut off = 32 + VOUCH_CIPHER_SIZE;
        let mut vnonce = [0u8; NONCE_SIZE];
        vnonce.copy_from_slice(&buf[off..off + NONCE_SIZE]);
        off += NONCE_SIZE;
        let mut fqdn = [0u8; FQDN_SIZE];
        fqdn.copy_from_slice(&buf[off..off + FQDN_SIZE]);
        Ok(InitiateStuff {
            long_pub,
            vcipher,
            vnonce,
            fqdn,
        })
    }
}

/// `INITIATE_PACKER` = `short_pub(32) || oreo(24) || cipher || nonce(24)`.
#[derive(Debug, Clone)]
pub struct InitiatePacked {
    pub short_pub: [u8; PUB_KEY_SIZE],
    pub oreo: [u8; NONCE_SIZE],
    pub cipher: Vec<u8>,
    pub nonce: [u8; NONCE_SIZE],
}

impl InitiatePacked {
    pub fn pack(&self) -> Result<Vec<u8>, PackerError> {
        check_len("initiate.cipher", &self.cipher, INITIATE_CIPHER_SIZE)?;
        let mut out =
            Vec::with_capacity(PUB_KEY_SIZE + NONCE_SIZE + INITIATE_CIPHER_SIZE + NONCE_SIZE);
        out.extend_from_slice(&self.short_pub);
        out.extend_from_slice(&self.oreo);
        out.extend_from_slice(&self.cipher);
        out.extend_from_slice(&self.nonce);
        Ok(out)
    }

    pub fn parse(buf: &[u8]) -> Result<Self, PackerError> {
        let expected = PUB_KEY_SIZE + NONCE_SIZE + INITIATE_CIPHER_SIZE + NONCE_SIZE;
        if buf.len() != expected {
            return Err(PackerError::TooShort {
                expected,
                got: buf.len(),
            });
        }
        let mut short_pub = [0u8; PUB_KEY_SIZE];
        short_pub.copy_from_slice(&buf[0..32]);
        let mut oreo = [0u8; NONCE_SIZE];
        oreo.copy_from_slice(&buf[32..32 + NONCE_SIZE]);
        let mut off = 32 + NONCE_SIZE;
        let cipher = buf[off..off + INITIATE_CIPHER_SIZE].to_vec();
        off += INITIATE_CIPHER_SIZE;
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&buf[off..off + NONCE_SIZE]);
        Ok(InitiatePacked {
            short_pub,
            oreo,
            cipher,
            nonce,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_round_trips() {
        let hp = HelloPacked {
            short_pub: [7u8; PUB_KEY_SIZE],
            cipher: vec![1u8; HELLO_CIPHER_SIZE],
            nonce: [2u8; NONCE_SIZE],
        };
        let packed = hp.pack().unwrap();
        let parsed = HelloPacked::parse(&packed).unwrap();
        assert_eq!(parsed.short_pub, hp.short_pub);
        assert_eq!(parsed.cipher, hp.cipher);
        assert_eq!(parsed.nonce, hp.nonce);
    }

    #[test]
    fn fqdn_padding_round_trips() {
        let fqdn = InitiateStuff::pack_fqdn("peer.example");
        let stuff = InitiateStuff {
            long_pub: [0u8; PUB_KEY_SIZE],
            vcipher: vec![0u8; VOUCH_CIPHER_SIZE],
            vnonce: [0u8; NONCE_SIZE],
            fqdn,
        };
        assert_eq!(stuff.unpack_fqdn(), "peer.example");
    }

    #[test]
    fn cookiestuff_round_trips() {
        let cs = CookieStuff {
            short_pub: [9u8; PUB_KEY_SIZE],
            seid: 42,
            deid: 7,
            oreo: [3u8; NONCE_SIZE],
        };
        let packed = cs.pack();
        let parsed = CookieStuff::parse(&packed).unwrap();
        assert_eq!(parsed.seid, 42);
        assert_eq!(parsed.deid, 7);
        assert_eq!(parsed.oreo, cs.oreo);
    }
}
