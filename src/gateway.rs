use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

use rusqlite::{params, Connection, OpenFlags};

use crate::errdata;
use crate::error::Result;
use crate::registry::Input;
use crate::Error;

/// SQLite's largest supported page size.
pub const MAX_PAGE_SIZE: u32 = 0x10000;

// Every table-valued function is qualified with the main schema. Consider
// what would happen if one of the inputs contained a table named
// "pragma_page_size".
const METAINFO_SQL: &str = "SELECT page_size, page_count, journal_mode
    FROM main.pragma_page_size(?1),
         main.pragma_page_count(?1),
         main.pragma_journal_mode(?1)";

const PAGES_SQL: &str = "SELECT data FROM main.sqlite_dbpage(?1) ORDER BY pgno";

/// Metadata for one attached input, read under the shared transaction.
#[derive(Debug, Clone)]
pub struct Metainfo {
    pub page_size: u32,
    pub page_count: u64,
    pub journal_mode: String,
}

/// The reader connection. Its main database is an anonymous in-memory
/// store; the inputs are attached read-only under their aliases.
pub struct Gateway {
    conn: Connection,
    in_transaction: bool,
}

impl Gateway {
    /// Opens the in-memory connection with URI handling enabled and a
    /// busy timeout large enough that contention waits instead of failing.
    pub fn open(busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open_with_flags(
            "file::memory:",
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?;
        conn.busy_timeout(busy_timeout)?;
        Ok(Self {
            conn,
            in_transaction: false,
        })
    }

    /// Attaches one input read-only under its alias. The alias is inlined
    /// into the SQL because the grammar wants an identifier there; the
    /// path always travels as a bound text parameter, in URI form.
    pub fn attach(&self, input: &Input) -> Result<()> {
        let sql = format!("ATTACH DATABASE ?1 AS {}", input.alias);
        let uri = read_only_uri(&input.name);
        self.conn
            .execute(&sql, params![uri])
            .map_err(|e| Error::Database(format!("{}: attach: {}", input.path.display(), e)))?;
        tracing::debug!(path = %input.path.display(), alias = %input.alias, "attached input");
        Ok(())
    }

    /// Starts the shared read transaction. This is the consistency anchor:
    /// it takes locks on every attached database in one step.
    pub fn begin(&mut self) -> Result<()> {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        self.in_transaction = true;
        Ok(())
    }

    /// Rolls the shared transaction back. Idempotent.
    pub fn rollback(&mut self) -> Result<()> {
        if self.in_transaction {
            self.conn.execute_batch("ROLLBACK")?;
            self.in_transaction = false;
        }
        Ok(())
    }

    /// Reads the page geometry and journal mode of one attached input.
    pub fn metadata(&self, input: &Input) -> Result<Metainfo> {
        let mut stmt = self.conn.prepare(METAINFO_SQL)?;
        let info = stmt.query_row(params![input.alias], |row| {
            Ok(Metainfo {
                page_size: row.get(0)?,
                page_count: row.get::<_, i64>(1)? as u64,
                journal_mode: row.get(2)?,
            })
        })?;
        if info.page_size > MAX_PAGE_SIZE {
            return errdata!(
                "{}: unsupported page size {}",
                input.path.display(),
                info.page_size
            );
        }
        Ok(info)
    }

    /// Streams the input's pages in page-number order. Each page blob is
    /// handed to `sink` together with a flag marking the final page. The
    /// stream must match the metadata exactly; a short or long stream is a
    /// fatal inconsistency.
    pub fn stream_pages<F>(&self, input: &Input, mut sink: F) -> Result<()>
    where
        F: FnMut(&[u8], bool) -> Result<()>,
    {
        let mut stmt = self.conn.prepare(PAGES_SQL)?;
        let mut rows = stmt.query(params![input.alias])?;
        let mut seen = 0u64;
        while let Some(row) = rows.next()? {
            seen += 1;
            if seen > input.page_count {
                return errdata!("{}: inconsistent page count", input.path.display());
            }
            let value = row.get_ref(0)?;
            let page = value
                .as_blob()
                .map_err(|e| Error::Database(format!("{}: {}", input.path.display(), e)))?;
            if page.len() as u64 != input.page_size as u64 {
                return errdata!("{}: inconsistent page size", input.path.display());
            }
            sink(page, seen == input.page_count)?;
        }
        if seen < input.page_count {
            return errdata!("{}: inconsistent page count", input.path.display());
        }
        Ok(())
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        // Teardown path: the transaction must not outlive the pack run.
        if self.in_transaction {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                tracing::warn!(error = %e, "rollback during teardown failed");
            }
            self.in_transaction = false;
        }
    }
}

/// Picks the modification time recorded for a member. Stat the live file
/// again now that locks are held; in WAL mode a newer `-wal` sidecar
/// carries pages the main file does not, so its timestamp wins.
pub fn modification_time(path: &Path, journal_mode: &str) -> Result<SystemTime> {
    let meta =
        fs::metadata(path).map_err(|e| Error::IO(format!("{}: {}", path.display(), e)))?;
    let mut mtime = meta
        .modified()
        .map_err(|e| Error::IO(format!("{}: {}", path.display(), e)))?;
    if journal_mode == "wal" {
        let mut wal_path = path.as_os_str().to_owned();
        wal_path.push("-wal");
        if let Ok(wal_meta) = fs::metadata(Path::new(&wal_path)) {
            if let Ok(wal_mtime) = wal_meta.modified() {
                if wal_mtime > mtime {
                    mtime = wal_mtime;
                }
            }
        }
    }
    Ok(mtime)
}

/// Builds the read-only `file:` URI for a path, percent-encoding every
/// byte the URI grammar or SQLite would misread.
fn read_only_uri(path: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut uri = String::with_capacity(path.len() + 16);
    uri.push_str("file:");
    if path.first() == Some(&b'/') {
        uri.push_str("//");
    }
    for &byte in path {
        if byte == b'%' || byte == b'#' || byte == b'?' || byte <= 0x20 || byte >= 0x7F {
            uri.push('%');
            uri.push(HEX[(byte >> 4) as usize] as char);
            uri.push(HEX[(byte & 0xF) as usize] as char);
        } else {
            uri.push(byte as char);
        }
    }
    uri.push_str("?mode=ro");
    uri
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn test_input(path: &Path, alias: &str) -> Input {
        Input {
            path: path.to_path_buf(),
            name: path.as_os_str().as_encoded_bytes().to_vec(),
            alias: alias.to_string(),
            dev: 0,
            ino: 0,
            mode: 0o644,
            page_size: 0,
            page_count: 0,
            dos_date: 0,
            dos_time: 0,
        }
    }

    fn sample_db(dir: &Path) -> PathBuf {
        let path = dir.join("sample.db");
        let conn = Connection::open(&path).expect("create db");
        conn.execute_batch(
            "PRAGMA page_size = 4096;
             CREATE TABLE t (id INTEGER PRIMARY KEY, body TEXT);",
        )
        .expect("schema");
        let mut stmt = conn
            .prepare("INSERT INTO t (body) VALUES (?1)")
            .expect("prepare");
        for i in 0..64 {
            stmt.execute(params![format!("row {i} {}", "x".repeat(100))])
                .expect("insert");
        }
        drop(stmt);
        drop(conn);
        path
    }

    #[test]
    fn test_read_only_uri_plain() {
        assert_eq!(read_only_uri(b"db.sqlite"), "file:db.sqlite?mode=ro");
    }

    #[test]
    fn test_read_only_uri_escapes() {
        assert_eq!(
            read_only_uri(b"my db#1?.sqlite"),
            "file:my%20db%231%3F.sqlite?mode=ro"
        );
        assert_eq!(read_only_uri(b"50%.db"), "file:50%25.db?mode=ro");
        assert_eq!(read_only_uri(b"caf\xC3\xA9.db"), "file:caf%C3%A9.db?mode=ro");
    }

    #[test]
    fn test_read_only_uri_absolute_uses_authority() {
        assert_eq!(read_only_uri(b"/tmp/a.db"), "file:///tmp/a.db?mode=ro");
    }

    #[test]
    fn test_attach_and_metadata() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = sample_db(dir.path());

        let mut gw = Gateway::open(Duration::from_secs(5)).expect("open");
        let input = test_input(&path, "_000000");
        gw.attach(&input).expect("attach");
        gw.begin().expect("begin");

        let info = gw.metadata(&input).expect("metadata");
        assert_eq!(info.page_size, 4096);
        assert!(info.page_count >= 2);
        assert_eq!(info.journal_mode, "delete");

        gw.rollback().expect("rollback");
        gw.rollback().expect("rollback is idempotent");
    }

    #[test]
    fn test_attach_rejects_garbage() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("garbage.db");
        fs::write(&path, b"this is not a database, not even close").expect("write");

        let gw = Gateway::open(Duration::from_secs(5)).expect("open");
        let input = test_input(&path, "_000000");
        assert!(matches!(gw.attach(&input), Err(Error::Database(_))));
    }

    #[test]
    fn test_attach_is_read_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = sample_db(dir.path());

        let gw = Gateway::open(Duration::from_secs(5)).expect("open");
        let input = test_input(&path, "_000000");
        gw.attach(&input).expect("attach");

        let result = gw
            .conn
            .execute("INSERT INTO _000000.t (body) VALUES ('nope')", []);
        assert!(result.is_err());
    }

    #[test]
    fn test_stream_pages_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = sample_db(dir.path());

        let mut gw = Gateway::open(Duration::from_secs(5)).expect("open");
        let mut input = test_input(&path, "_000000");
        gw.attach(&input).expect("attach");
        gw.begin().expect("begin");

        let info = gw.metadata(&input).expect("metadata");
        input.page_size = info.page_size;
        input.page_count = info.page_count;

        let mut collected = Vec::new();
        let mut last_flags = Vec::new();
        match gw.stream_pages(&input, |page, last| {
            collected.extend_from_slice(page);
            last_flags.push(last);
            Ok(())
        }) {
            // Hosts whose SQLite lacks the dbpage table cannot run this.
            Err(Error::Database(msg)) if msg.contains("sqlite_dbpage") => return,
            other => other.expect("stream pages"),
        }

        assert_eq!(
            collected.len() as u64,
            info.page_size as u64 * info.page_count
        );
        assert_eq!(last_flags.iter().filter(|last| **last).count(), 1);
        assert_eq!(last_flags.last(), Some(&true));

        // A fully checkpointed rollback-journal database is its file.
        let on_disk = fs::read(&path).expect("read db");
        assert_eq!(collected, on_disk);
    }

    #[test]
    fn test_wal_sidecar_time_wins() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = sample_db(dir.path());

        // Switch to WAL and leave uncheckpointed frames behind. A second
        // connection keeps the sidecar alive; the last connection to close
        // would otherwise checkpoint and delete it.
        let conn = Connection::open(&path).expect("reopen");
        conn.query_row("PRAGMA journal_mode = wal", [], |row| {
            row.get::<_, String>(0)
        })
        .expect("wal");
        conn.execute("INSERT INTO t (body) VALUES ('wal frame')", [])
            .expect("insert");
        let holder = Connection::open(&path).expect("holder");
        let _: i64 = holder
            .query_row("SELECT count(*) FROM t", [], |row| row.get(0))
            .expect("holder read");
        drop(conn);

        let wal_path = {
            let mut p = path.as_os_str().to_owned();
            p.push("-wal");
            PathBuf::from(p)
        };
        assert!(wal_path.exists(), "wal sidecar should exist");

        // Age the main file so the sidecar is strictly newer.
        let old = SystemTime::now() - Duration::from_secs(3600);
        fs::File::options()
            .write(true)
            .open(&path)
            .expect("open db")
            .set_modified(old)
            .expect("set mtime");

        let chosen = modification_time(&path, "wal").expect("mtime");
        let main_mtime = fs::metadata(&path).expect("meta").modified().expect("mtime");
        assert!(chosen > main_mtime);

        // Without WAL mode the sidecar is ignored.
        let chosen = modification_time(&path, "delete").expect("mtime");
        assert_eq!(chosen, main_mtime);
    }
}
