use std::io::Write;

use flate2::{Compress, Compression, FlushCompress, Status};

use crate::error::Result;
use crate::Error;

/// Output buffer for one compress call: the largest page plus the worst
/// single-block expansion overhead.
pub const OUT_BUF_SIZE: usize = 0x10000 + 11;

/// Flush discipline for one page.
///
/// Closing the deflate block on every page boundary consistently beats
/// letting blocks span pages on mixed database content, at the cost of a
/// little overhead on runs of incompressible pages. Knowing in advance
/// which case a page falls into would double the compression cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flush {
    /// Close the current deflate block at the page boundary.
    Block,
    /// Emit the final block and finish the stream; last page only.
    Finish,
}

/// The streaming deflate state: raw stream (no wrapper container), one
/// instance reused across all inputs with a reset in between.
pub struct Deflater {
    state: Compress,
    buf: Vec<u8>,
}

impl Deflater {
    pub fn new(level: u32) -> Self {
        Self {
            state: Compress::new(Compression::new(level), false),
            buf: vec![0; OUT_BUF_SIZE],
        }
    }

    /// Compresses one page, writing every emitted byte straight to `out`.
    /// Returns the number of bytes written.
    pub fn compress_page<W: Write>(
        &mut self,
        page: &[u8],
        flush: Flush,
        out: &mut W,
    ) -> Result<u64> {
        let mode = match flush {
            Flush::Block => FlushCompress::Sync,
            Flush::Finish => FlushCompress::Finish,
        };
        let mut remaining = page;
        let mut written = 0u64;
        loop {
            let before_in = self.state.total_in();
            let before_out = self.state.total_out();
            let status = self.state.compress(remaining, &mut self.buf, mode)?;
            let consumed = (self.state.total_in() - before_in) as usize;
            let produced = (self.state.total_out() - before_out) as usize;
            remaining = &remaining[consumed..];
            if produced > 0 {
                out.write_all(&self.buf[..produced])?;
                written += produced as u64;
            }
            match status {
                Status::StreamEnd => break,
                Status::Ok | Status::BufError => {
                    // A call that did not fill the buffer has flushed
                    // everything it ever will; looping again would spin.
                    if flush == Flush::Block && remaining.is_empty() && produced < self.buf.len()
                    {
                        break;
                    }
                    if consumed == 0 && produced == 0 {
                        return Err(Error::Compress("deflate made no progress".to_string()));
                    }
                }
            }
        }
        Ok(written)
    }

    /// Resets the stream so the next input starts fresh.
    pub fn reset(&mut self) {
        self.state.reset();
    }
}
