use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Datelike, Local, Timelike};

use crate::error::Result;
use crate::errinput;
use crate::Error;

/// Zip stores the member name length in 16 bits.
pub const MAX_PATH_LEN: usize = 0xFFFF;

/// One registered input database.
///
/// The path-derived fields are fixed at registration; the page geometry and
/// timestamp fields are filled in by the metadata phase, once the shared
/// read transaction holds the inputs still.
#[derive(Debug, Clone)]
pub struct Input {
    /// Caller-supplied relative path.
    pub path: PathBuf,
    /// Raw path bytes, stored verbatim as the archive member name.
    pub name: Vec<u8>,
    /// Identifier naming the attached database inside the connection.
    pub alias: String,
    /// Device id of the underlying file.
    pub dev: u64,
    /// Inode number of the underlying file.
    pub ino: u64,
    /// Low 16 mode bits, preserved into the member's external attributes.
    pub mode: u16,
    /// Page size in bytes, a power of two no larger than 65536.
    pub page_size: u32,
    /// Total logical pages.
    pub page_count: u64,
    /// Modification date in DOS format.
    pub dos_date: u16,
    /// Modification time in DOS format.
    pub dos_time: u16,
}

/// Validates the input paths and builds one record per path, in caller
/// order. Rejects absolute, empty, and over-long paths, anything that is
/// not a regular file, and duplicate files reached through different paths.
pub fn register(paths: &[PathBuf]) -> Result<Vec<Input>> {
    let mut inputs: Vec<Input> = Vec::with_capacity(paths.len());
    for (index, path) in paths.iter().enumerate() {
        let name = path.as_os_str().as_encoded_bytes().to_vec();
        if name.is_empty() {
            return errinput!("no empty paths allowed");
        }
        if name[0] == b'/' {
            return errinput!("{}: no absolute paths allowed", path.display());
        }
        if name.len() > MAX_PATH_LEN {
            return errinput!("{}: path too long", path.display());
        }
        let meta = fs::metadata(path)
            .map_err(|e| Error::IO(format!("{}: {}", path.display(), e)))?;
        if !meta.file_type().is_file() {
            return errinput!("{}: not a regular file", path.display());
        }
        if inputs
            .iter()
            .any(|seen| seen.dev == meta.dev() && seen.ino == meta.ino())
        {
            return errinput!("{}: duplicate input", path.display());
        }
        inputs.push(Input {
            path: path.clone(),
            name,
            alias: alias_for(index),
            dev: meta.dev(),
            ino: meta.ino(),
            mode: (meta.mode() & 0xFFFF) as u16,
            page_size: 0,
            page_count: 0,
            dos_date: 0,
            dos_time: 0,
        });
    }
    Ok(inputs)
}

/// Rejects an archive path that already exists and is one of the inputs.
/// Both device and inode must match to count as a collision.
pub fn check_output_collision(inputs: &[Input], archive: &Path) -> Result<()> {
    if let Ok(meta) = fs::metadata(archive) {
        for input in inputs {
            if input.dev == meta.dev() && input.ino == meta.ino() {
                return errinput!("{}: conflicts with an input file", archive.display());
            }
        }
    }
    Ok(())
}

/// Derives the internal name for the input at `index`: an underscore
/// followed by six base-36 digits, least-significant digit last. The
/// result is always a plain identifier, so it can never collide with an
/// SQL keyword.
fn alias_for(index: usize) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut digits = [b'0'; 6];
    let mut rest = index;
    for slot in digits.iter_mut().rev() {
        *slot = DIGITS[rest % 36];
        rest /= 36;
    }
    let mut name = String::with_capacity(7);
    name.push('_');
    name.extend(digits.iter().map(|&digit| digit as char));
    name
}

/// Packs a modification time into the DOS date/time pair used by Zip
/// entries, in local civil time.
pub fn dos_date_time(mtime: SystemTime) -> (u16, u16) {
    let local: DateTime<Local> = mtime.into();
    pack_dos(&local)
}

fn pack_dos<T: Datelike + Timelike>(t: &T) -> (u16, u16) {
    // DOS years span 1980-2107 in seven bits.
    let year = t.year().clamp(1980, 2107);
    let date = (((year - 1980) as u16) << 9) | ((t.month() as u16) << 5) | t.day() as u16;
    let time =
        ((t.hour() as u16) << 11) | ((t.minute() as u16) << 5) | ((t.second() as u16) >> 1);
    (date, time)
}
