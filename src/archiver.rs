use std::fs;
use std::path::{Path, PathBuf};

use crate::checksum::Checksum;
use crate::config::PackConfig;
use crate::deflate::{Deflater, Flush};
use crate::error::Result;
use crate::gateway::{self, Gateway};
use crate::registry::{self, Input};
use crate::zip::record::{
    CentralEntry, CentralZip64, Eocd, Eocd64, Eocd64Locator, LocalHeader, LocalZip64,
    CREATOR_UNIX, FLAG_MAX_COMPRESSION, MASK16, MASK32, METHOD_DEFLATE, VERSION_DEFLATE,
    VERSION_ZIP64,
};
use crate::zip::writer::ArchiveWriter;

/// What one input contributed to the archive, reported as the input lands.
#[derive(Debug, Clone)]
pub struct EntryReport {
    pub path: PathBuf,
    /// `page_size * page_count`.
    pub uncompressed_size: u64,
    /// Local header, payload, and central directory share combined.
    pub archived_size: u64,
}

/// Totals for a completed run.
#[derive(Debug, Clone)]
pub struct Summary {
    pub input_count: usize,
    pub uncompressed_size: u64,
    pub archive_size: u64,
}

/// Snapshots the given databases into a Zip archive at `archive`.
///
/// All inputs are captured at a single point in time: one read transaction
/// spans every attached database for the whole page-streaming phase. On
/// any failure the partially written archive is removed.
pub fn pack(archive: &Path, paths: &[PathBuf], config: &PackConfig) -> Result<Summary> {
    pack_with_progress(archive, paths, config, |_| {})
}

/// Like [`pack`], invoking `progress` once per input as its member lands
/// in the archive.
pub fn pack_with_progress(
    archive: &Path,
    paths: &[PathBuf],
    config: &PackConfig,
    mut progress: impl FnMut(&EntryReport),
) -> Result<Summary> {
    let mut inputs = registry::register(paths)?;
    let gateway = Gateway::open(config.busy_timeout)?;
    for input in &inputs {
        gateway.attach(input)?;
    }
    registry::check_output_collision(&inputs, archive)?;
    let mut writer = ArchiveWriter::create(archive)?;

    // The archive file exists from here on; a failure in any later phase
    // must not leave it behind.
    match run(gateway, &mut writer, &mut inputs, config, &mut progress) {
        Ok(summary) => Ok(summary),
        Err(e) => {
            drop(writer);
            if let Err(remove_err) = fs::remove_file(archive) {
                tracing::warn!(
                    path = %archive.display(),
                    error = %remove_err,
                    "failed to remove partial archive"
                );
            }
            Err(e)
        }
    }
}

/// The phases between archive creation and the finished trailer. Takes
/// the gateway by value so the connection can be closed, per the phase
/// order, before the central directory goes out.
fn run(
    mut gateway: Gateway,
    writer: &mut ArchiveWriter,
    inputs: &mut [Input],
    config: &PackConfig,
    progress: &mut dyn FnMut(&EntryReport),
) -> Result<Summary> {
    gateway.begin()?;
    tracing::debug!(inputs = inputs.len(), "read transaction open");

    for input in inputs.iter_mut() {
        let info = gateway.metadata(input)?;
        let mtime = gateway::modification_time(&input.path, &info.journal_mode)?;
        let (dos_date, dos_time) = registry::dos_date_time(mtime);
        input.page_size = info.page_size;
        input.page_count = info.page_count;
        input.dos_date = dos_date;
        input.dos_time = dos_time;
        tracing::debug!(
            path = %input.path.display(),
            page_size = info.page_size,
            page_count = info.page_count,
            journal_mode = %info.journal_mode,
            "input metadata"
        );
    }

    let mut deflater = Deflater::new(config.compression_level);
    let mut central = Vec::new();
    let mut total_uncompressed = 0u64;
    for input in inputs.iter() {
        let report = pack_input(&gateway, writer, &mut deflater, &mut central, input)?;
        total_uncompressed += report.uncompressed_size;
        progress(&report);
    }

    // Release the inputs before writing the directory; the snapshot is
    // fully drained at this point.
    gateway.rollback()?;
    drop(gateway);
    drop(deflater);

    let cd_offset = writer.position();
    writer.append(&central)?;
    let cd_size = writer.position() - cd_offset;

    let entry_count = inputs.len() as u64;
    if needs_zip64_trailer(entry_count, cd_offset, cd_size) {
        let mut buf = Vec::with_capacity(Eocd64::SIZE + Eocd64Locator::SIZE);
        Eocd64 {
            entry_count,
            cd_size,
            cd_offset,
        }
        .encode_into(&mut buf)?;
        Eocd64Locator {
            eocd64_offset: cd_offset + cd_size,
        }
        .encode_into(&mut buf)?;
        writer.append(&buf)?;
    }
    let mut buf = Vec::with_capacity(Eocd::SIZE);
    Eocd {
        entry_count: entry_count.min(MASK16) as u16,
        cd_size: cd_size.min(MASK32) as u32,
        cd_offset: cd_offset.min(MASK32) as u32,
    }
    .encode_into(&mut buf)?;
    writer.append(&buf)?;
    writer.sync()?;

    let archive_size = writer.position();
    tracing::debug!(cd_offset, cd_size, archive_size, "archive complete");
    Ok(Summary {
        input_count: inputs.len(),
        uncompressed_size: total_uncompressed,
        archive_size,
    })
}

/// Compresses one input into the archive: reserve the local header,
/// stream the pages through the checksum and the compressor, back-patch
/// the header, and stage the central directory entry.
fn pack_input(
    gateway: &Gateway,
    writer: &mut ArchiveWriter,
    deflater: &mut Deflater,
    central: &mut Vec<u8>,
    input: &Input,
) -> Result<EntryReport> {
    let size = input.page_size as u64 * input.page_count;
    let worst = worst_case_compressed(input.page_size, input.page_count);
    let local_offset = writer.position();
    let (l64, c64) = size_flags(size, worst, local_offset);
    let version = if c64 { VERSION_ZIP64 } else { VERSION_DEFLATE };
    let path_len = input.name.len() as u16;

    let header_len =
        LocalHeader::SIZE + input.name.len() + if l64 { LocalZip64::SIZE } else { 0 };
    writer.skip(header_len as u64)?;

    let mut checksum = Checksum::new();
    let mut compressed = 0u64;
    gateway.stream_pages(input, |page, last| {
        checksum.update(page);
        let flush = if last { Flush::Finish } else { Flush::Block };
        compressed += deflater.compress_page(page, flush, writer)?;
        Ok(())
    })?;
    if input.page_count == 0 {
        // Terminate the member with a finished empty stream so the
        // payload is still valid deflate.
        compressed += deflater.compress_page(&[], Flush::Finish, writer)?;
    }
    deflater.reset();
    let crc = checksum.finalize();

    let mut header_buf = Vec::with_capacity(header_len);
    LocalHeader {
        needed_version: version,
        flags: FLAG_MAX_COMPRESSION,
        method: METHOD_DEFLATE,
        mod_time: input.dos_time,
        mod_date: input.dos_date,
        crc,
        compressed_size: if l64 { MASK32 as u32 } else { compressed as u32 },
        size: if l64 { MASK32 as u32 } else { size as u32 },
        path_len,
        extra_len: if l64 { LocalZip64::SIZE as u16 } else { 0 },
    }
    .encode_into(&mut header_buf)?;
    header_buf.extend_from_slice(&input.name);
    if l64 {
        LocalZip64 {
            size,
            compressed_size: compressed,
        }
        .encode_into(&mut header_buf)?;
    }
    writer.write_at(local_offset, &header_buf)?;

    let (size32, compressed32, offset32, extra) =
        central_size_fields(size, compressed, local_offset, c64);
    let extra_len = extra.as_ref().map_or(0, CentralZip64::encoded_len);
    CentralEntry {
        creator_version: version | CREATOR_UNIX,
        needed_version: version,
        flags: FLAG_MAX_COMPRESSION,
        method: METHOD_DEFLATE,
        mod_time: input.dos_time,
        mod_date: input.dos_date,
        crc,
        compressed_size: compressed32,
        size: size32,
        path_len,
        extra_len,
        comment_len: 0,
        first_diskno: 0,
        internal_attribs: 0,
        external_attribs: (input.mode as u32) << 16,
        local_offset: offset32,
    }
    .encode_into(central)?;
    central.extend_from_slice(&input.name);
    if let Some(extra) = extra {
        extra.encode_into(central)?;
    }

    tracing::debug!(
        path = %input.path.display(),
        size,
        compressed,
        local_offset,
        zip64 = c64,
        "input packed"
    );
    let archived_size = (writer.position() - local_offset)
        + CentralEntry::SIZE as u64
        + input.name.len() as u64
        + extra_len as u64;
    Ok(EntryReport {
        path: input.path.clone(),
        uncompressed_size: size,
        archived_size,
    })
}

/// Worst-case deflate output for an input: every page as stored blocks of
/// at most 65535 bytes, five bytes of header each.
fn worst_case_compressed(page_size: u32, page_count: u64) -> u64 {
    let page_size = page_size as u64;
    page_count * (page_size + (page_size + 0xFFFE) / 0xFFFF * 5)
}

/// Which Zip64 forms an input needs. The local decision uses the
/// pessimistic compressed bound, since the header slot is reserved before
/// the real size exists.
fn size_flags(size: u64, worst_compressed: u64, local_offset: u64) -> (bool, bool) {
    let l64 = size > MASK32 || worst_compressed > MASK32;
    let c64 = l64 || local_offset > MASK32;
    (l64, c64)
}

/// The 32-bit central entry fields with Zip64 promotion. Greater-or-equal
/// on purpose: a value equal to the sentinel must itself move to the
/// extension, or a reader could not tell them apart.
fn central_size_fields(
    size: u64,
    compressed: u64,
    local_offset: u64,
    c64: bool,
) -> (u32, u32, u32, Option<CentralZip64>) {
    if !c64 {
        return (size as u32, compressed as u32, local_offset as u32, None);
    }
    let mut extra = CentralZip64::new();
    let mut promote = |value: u64| {
        if value >= MASK32 {
            extra.push(value);
            MASK32 as u32
        } else {
            value as u32
        }
    };
    let size32 = promote(size);
    let compressed32 = promote(compressed);
    let offset32 = promote(local_offset);
    (size32, compressed32, offset32, Some(extra))
}

/// Whether the directory totals overflow the classic end record.
fn needs_zip64_trailer(entry_count: u64, cd_offset: u64, cd_size: u64) -> bool {
    entry_count > MASK16 || cd_offset > MASK32 || cd_size > MASK32
}
