use std::fmt;

use base64::Engine;
use rand::Rng;

/// A 128 bit engine session id, stored as its 16 char url-safe base64 form.
///
/// Each accepted transport carries one; it seeds every [`SocketId`](crate::SocketId)
/// derived from the connection.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sid([u8; 16]);

impl Sid {
    /// A zeroed session id, mostly useful as a placeholder in tests.
    pub const ZERO: Self = Self([b'A'; 16]);

    /// Generate a new random session id.
    pub fn new() -> Self {
        Self::default()
    }

    /// The session id as a base64 string slice.
    pub fn as_str(&self) -> &str {
        // Invariant: the inner buffer only ever holds base64 chars.
        std::str::from_utf8(&self.0).expect("sid is always valid base64 ascii")
    }
}

impl Default for Sid {
    fn default() -> Self {
        let mut random = [0u8; 12]; // 12 bytes = 16 chars base64
        let mut id = [0u8; 16];
        rand::thread_rng().fill(&mut random);

        base64::prelude::BASE64_URL_SAFE_NO_PAD
            .encode_slice(random, &mut id)
            .expect("12 bytes always encode to 16 base64 chars");
        Sid(id)
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod test {
    use super::Sid;

    #[test]
    fn random_sids_are_distinct() {
        let a = Sid::new();
        let b = Sid::new();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 16);
    }

    #[test]
    fn display_matches_as_str() {
        let sid = Sid::new();
        assert_eq!(sid.to_string(), sid.as_str());
    }
}
