use crc::{Crc, Digest, CRC_32_ISO_HDLC};

// CRC-32/ISO-HDLC is the IEEE polynomial the Zip format declares.
static CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Rolling CRC-32 over an input's page bytes in page-number order.
pub struct Checksum {
    digest: Digest<'static, u32>,
}

impl Checksum {
    /// Creates a new `Checksum` in its initial state.
    pub fn new() -> Self {
        Self {
            digest: CRC32.digest(),
        }
    }

    /// Folds another page into the running checksum.
    pub fn update(&mut self, bytes: &[u8]) {
        self.digest.update(bytes);
    }

    /// Returns the final checksum value.
    pub fn finalize(self) -> u32 {
        self.digest.finalize()
    }
}
