//! The on-disk Zip record layouts.
//!
//! Every record is a fixed little-endian byte sequence with no implicit
//! padding, encoded field by field. Variable parts (the member name, the
//! Zip64 extension payloads) follow the fixed part and are written by the
//! caller.

use std::io::{self, Write};

use byteorder::{LittleEndian, WriteBytesExt};

/// "PK\x03\x04", the local file header.
pub const LOCAL_ENTRY_SIG: u32 = 0x0403_4B50;
/// "PK\x01\x02", the central directory entry.
pub const CENTRAL_ENTRY_SIG: u32 = 0x0201_4B50;
/// "PK\x05\x06", the end-of-central-directory record.
pub const EOCD_SIG: u32 = 0x0605_4B50;
/// "PK\x06\x06", the Zip64 end-of-central-directory record.
pub const EOCD64_SIG: u32 = 0x0606_4B50;
/// "PK\x06\x07", the Zip64 end-of-central-directory locator.
pub const EOCD64_LOCATOR_SIG: u32 = 0x0706_4B50;

/// Deflate compression needs format version 2.0.
pub const VERSION_DEFLATE: u16 = 20;
/// Zip64 extensions need format version 4.5.
pub const VERSION_ZIP64: u16 = 45;
/// Creator host system: Unix, in the high byte of the creator version.
pub const CREATOR_UNIX: u16 = 3 << 8;
/// Compression method 8, deflate.
pub const METHOD_DEFLATE: u16 = 8;
/// General-purpose flag bit 1: maximum compression was used.
pub const FLAG_MAX_COMPRESSION: u16 = 0x0002;
/// Extension id of the Zip64 extra field.
pub const ZIP64_EXT_ID: u16 = 0x0001;

/// Largest value a 16-bit count field can carry; also its sentinel.
pub const MASK16: u64 = 0xFFFF;
/// Largest value a 32-bit size or offset field can carry; also the
/// sentinel meaning "look in the Zip64 extension".
pub const MASK32: u64 = 0xFFFF_FFFF;

/// Local file header, written back into its reserved slot once the CRC
/// and compressed size are known. The member name follows, then the
/// Zip64 extra when present.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalHeader {
    pub needed_version: u16,
    pub flags: u16,
    pub method: u16,
    pub mod_time: u16,
    pub mod_date: u16,
    pub crc: u32,
    pub compressed_size: u32,
    pub size: u32,
    pub path_len: u16,
    pub extra_len: u16,
}

impl LocalHeader {
    pub const SIZE: usize = 30;

    pub fn encode_into<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(LOCAL_ENTRY_SIG)?;
        w.write_u16::<LittleEndian>(self.needed_version)?;
        w.write_u16::<LittleEndian>(self.flags)?;
        w.write_u16::<LittleEndian>(self.method)?;
        w.write_u16::<LittleEndian>(self.mod_time)?;
        w.write_u16::<LittleEndian>(self.mod_date)?;
        w.write_u32::<LittleEndian>(self.crc)?;
        w.write_u32::<LittleEndian>(self.compressed_size)?;
        w.write_u32::<LittleEndian>(self.size)?;
        w.write_u16::<LittleEndian>(self.path_len)?;
        w.write_u16::<LittleEndian>(self.extra_len)?;
        Ok(())
    }
}

/// The Zip64 extra of a local header always carries both sizes and
/// nothing else.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalZip64 {
    pub size: u64,
    pub compressed_size: u64,
}

impl LocalZip64 {
    pub const SIZE: usize = 20;

    pub fn encode_into<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u16::<LittleEndian>(ZIP64_EXT_ID)?;
        w.write_u16::<LittleEndian>(16)?;
        w.write_u64::<LittleEndian>(self.size)?;
        w.write_u64::<LittleEndian>(self.compressed_size)?;
        Ok(())
    }
}

/// Central directory entry. The member name follows, then the Zip64
/// extension when present.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CentralEntry {
    pub creator_version: u16,
    pub needed_version: u16,
    pub flags: u16,
    pub method: u16,
    pub mod_time: u16,
    pub mod_date: u16,
    pub crc: u32,
    pub compressed_size: u32,
    pub size: u32,
    pub path_len: u16,
    pub extra_len: u16,
    pub comment_len: u16,
    pub first_diskno: u16,
    pub internal_attribs: u16,
    pub external_attribs: u32,
    pub local_offset: u32,
}

impl CentralEntry {
    pub const SIZE: usize = 46;

    pub fn encode_into<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(CENTRAL_ENTRY_SIG)?;
        w.write_u16::<LittleEndian>(self.creator_version)?;
        w.write_u16::<LittleEndian>(self.needed_version)?;
        w.write_u16::<LittleEndian>(self.flags)?;
        w.write_u16::<LittleEndian>(self.method)?;
        w.write_u16::<LittleEndian>(self.mod_time)?;
        w.write_u16::<LittleEndian>(self.mod_date)?;
        w.write_u32::<LittleEndian>(self.crc)?;
        w.write_u32::<LittleEndian>(self.compressed_size)?;
        w.write_u32::<LittleEndian>(self.size)?;
        w.write_u16::<LittleEndian>(self.path_len)?;
        w.write_u16::<LittleEndian>(self.extra_len)?;
        w.write_u16::<LittleEndian>(self.comment_len)?;
        w.write_u16::<LittleEndian>(self.first_diskno)?;
        w.write_u16::<LittleEndian>(self.internal_attribs)?;
        w.write_u32::<LittleEndian>(self.external_attribs)?;
        w.write_u32::<LittleEndian>(self.local_offset)?;
        Ok(())
    }
}

/// The Zip64 extension of a central entry: up to three 64-bit values
/// (size, compressed size, local offset, in that order), only the ones
/// whose 32-bit field carries the sentinel. No disk number; archives are
/// single-part.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CentralZip64 {
    fields: Vec<u64>,
}

impl CentralZip64 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: u64) {
        self.fields.push(value);
    }

    /// Encoded length including the 4-byte extension header.
    pub fn encoded_len(&self) -> u16 {
        (4 + 8 * self.fields.len()) as u16
    }

    pub fn encode_into<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u16::<LittleEndian>(ZIP64_EXT_ID)?;
        w.write_u16::<LittleEndian>((8 * self.fields.len()) as u16)?;
        for &value in &self.fields {
            w.write_u64::<LittleEndian>(value)?;
        }
        Ok(())
    }
}

/// Zip64 end-of-central-directory record, written only when a count,
/// size, or offset overflows its classic field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Eocd64 {
    pub entry_count: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Eocd64 {
    pub const SIZE: usize = 56;

    pub fn encode_into<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(EOCD64_SIG)?;
        // Record size, not counting the signature and this field.
        w.write_u64::<LittleEndian>((Self::SIZE - 12) as u64)?;
        w.write_u16::<LittleEndian>(VERSION_ZIP64 | CREATOR_UNIX)?;
        w.write_u16::<LittleEndian>(VERSION_ZIP64)?;
        w.write_u32::<LittleEndian>(0)?; // this disk
        w.write_u32::<LittleEndian>(0)?; // central directory disk
        w.write_u64::<LittleEndian>(self.entry_count)?;
        w.write_u64::<LittleEndian>(self.entry_count)?;
        w.write_u64::<LittleEndian>(self.cd_size)?;
        w.write_u64::<LittleEndian>(self.cd_offset)?;
        Ok(())
    }
}

/// Zip64 locator, pointing a classic reader at the Zip64 end record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Eocd64Locator {
    pub eocd64_offset: u64,
}

impl Eocd64Locator {
    pub const SIZE: usize = 20;

    pub fn encode_into<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(EOCD64_LOCATOR_SIG)?;
        w.write_u32::<LittleEndian>(0)?; // disk holding the Zip64 end record
        w.write_u64::<LittleEndian>(self.eocd64_offset)?;
        w.write_u32::<LittleEndian>(1)?; // total disks
        Ok(())
    }
}

/// Classic end-of-central-directory record, always last. Fields that
/// overflow carry their sentinel and the truth lives in the Zip64 record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Eocd {
    pub entry_count: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
}

impl Eocd {
    pub const SIZE: usize = 22;

    pub fn encode_into<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(EOCD_SIG)?;
        w.write_u16::<LittleEndian>(0)?; // this disk
        w.write_u16::<LittleEndian>(0)?; // central directory disk
        w.write_u16::<LittleEndian>(self.entry_count)?;
        w.write_u16::<LittleEndian>(self.entry_count)?;
        w.write_u32::<LittleEndian>(self.cd_size)?;
        w.write_u32::<LittleEndian>(self.cd_offset)?;
        w.write_u16::<LittleEndian>(0)?; // comment length
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_header_layout() {
        let header = LocalHeader {
            needed_version: VERSION_DEFLATE,
            flags: FLAG_MAX_COMPRESSION,
            method: METHOD_DEFLATE,
            mod_time: 0x1234,
            mod_date: 0x5678,
            crc: 0xDEADBEEF,
            compressed_size: 100,
            size: 200,
            path_len: 8,
            extra_len: 0,
        };
        let mut buf = Vec::new();
        header.encode_into(&mut buf).expect("encode");

        assert_eq!(buf.len(), LocalHeader::SIZE);
        assert_eq!(&buf[0..4], b"PK\x03\x04");
        assert_eq!(&buf[4..6], &[20, 0]);
        assert_eq!(&buf[6..8], &[2, 0]);
        assert_eq!(&buf[8..10], &[8, 0]);
        assert_eq!(&buf[14..18], &[0xEF, 0xBE, 0xAD, 0xDE]);
        assert_eq!(&buf[18..22], &[100, 0, 0, 0]);
        assert_eq!(&buf[22..26], &[200, 0, 0, 0]);
        assert_eq!(&buf[26..28], &[8, 0]);
        assert_eq!(&buf[28..30], &[0, 0]);
    }

    #[test]
    fn test_local_zip64_layout() {
        let ext = LocalZip64 {
            size: 0x1_0000_0000,
            compressed_size: 0x2_0000_0001,
        };
        let mut buf = Vec::new();
        ext.encode_into(&mut buf).expect("encode");

        assert_eq!(buf.len(), LocalZip64::SIZE);
        assert_eq!(&buf[0..2], &[1, 0]);
        assert_eq!(&buf[2..4], &[16, 0]);
        assert_eq!(&buf[4..12], &[0, 0, 0, 0, 1, 0, 0, 0]);
        assert_eq!(&buf[12..20], &[1, 0, 0, 0, 2, 0, 0, 0]);
    }

    #[test]
    fn test_central_entry_layout() {
        let entry = CentralEntry {
            creator_version: VERSION_DEFLATE | CREATOR_UNIX,
            needed_version: VERSION_DEFLATE,
            flags: FLAG_MAX_COMPRESSION,
            method: METHOD_DEFLATE,
            mod_time: 0,
            mod_date: 0,
            crc: 0,
            compressed_size: 1,
            size: 2,
            path_len: 4,
            extra_len: 0,
            comment_len: 0,
            first_diskno: 0,
            internal_attribs: 0,
            external_attribs: 0o644 << 16,
            local_offset: 0x42,
        };
        let mut buf = Vec::new();
        entry.encode_into(&mut buf).expect("encode");

        assert_eq!(buf.len(), CentralEntry::SIZE);
        assert_eq!(&buf[0..4], b"PK\x01\x02");
        assert_eq!(&buf[4..6], &[20, 3]); // version 20, Unix creator
        assert_eq!(&buf[6..8], &[20, 0]);
        assert_eq!(&buf[42..46], &[0x42, 0, 0, 0]);
    }

    #[test]
    fn test_central_zip64_sizes() {
        let mut ext = CentralZip64::new();
        assert_eq!(ext.encoded_len(), 4);

        ext.push(0x1_0000_0000);
        ext.push(0x2_0000_0000);
        assert_eq!(ext.encoded_len(), 20);

        let mut buf = Vec::new();
        ext.encode_into(&mut buf).expect("encode");
        assert_eq!(buf.len(), 20);
        assert_eq!(&buf[0..2], &[1, 0]);
        assert_eq!(&buf[2..4], &[16, 0]);
    }

    #[test]
    fn test_eocd64_layout() {
        let end = Eocd64 {
            entry_count: 100_000,
            cd_size: 0x1000,
            cd_offset: 0x2000,
        };
        let mut buf = Vec::new();
        end.encode_into(&mut buf).expect("encode");

        assert_eq!(buf.len(), Eocd64::SIZE);
        assert_eq!(&buf[0..4], b"PK\x06\x06");
        assert_eq!(&buf[4..12], &[44, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(&buf[12..14], &[45, 3]);
        assert_eq!(&buf[14..16], &[45, 0]);
    }

    #[test]
    fn test_eocd64_locator_layout() {
        let locator = Eocd64Locator {
            eocd64_offset: 0x1_0000_0010,
        };
        let mut buf = Vec::new();
        locator.encode_into(&mut buf).expect("encode");

        assert_eq!(buf.len(), Eocd64Locator::SIZE);
        assert_eq!(&buf[0..4], b"PK\x06\x07");
        assert_eq!(&buf[8..16], &[0x10, 0, 0, 0, 1, 0, 0, 0]);
        assert_eq!(&buf[16..20], &[1, 0, 0, 0]);
    }

    #[test]
    fn test_eocd_layout() {
        let end = Eocd {
            entry_count: 3,
            cd_size: 150,
            cd_offset: 0x400,
        };
        let mut buf = Vec::new();
        end.encode_into(&mut buf).expect("encode");

        assert_eq!(buf.len(), Eocd::SIZE);
        assert_eq!(&buf[0..4], b"PK\x05\x06");
        assert_eq!(&buf[8..10], &[3, 0]);
        assert_eq!(&buf[10..12], &[3, 0]);
        assert_eq!(&buf[12..16], &[150, 0, 0, 0]);
        assert_eq!(&buf[16..20], &[0, 4, 0, 0]);
        assert_eq!(&buf[20..22], &[0, 0]);
    }
}
