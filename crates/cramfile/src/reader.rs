use byteorder::{BigEndian, ReadBytesExt};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::format::read_header;
use crate::job::{decode_record, Env, Job};
use crate::{CramError, Header};

/// Default read buffer capacity (2 MiB).
///
/// Cramfiles typically live on parallel file systems where per-syscall cost
/// is high, so the reader pulls large chunks. Launch-time code exposes this
/// as a knob.
pub const DEFAULT_BUFFER_SIZE: usize = 2 * 1024 * 1024;

/// Reads a cramfile sequentially, one job record per call.
///
/// On [`open`](CramReader::open) the header is validated and `max_job_size`
/// becomes available, so callers can allocate a single record buffer up
/// front and reuse it for every [`next_into`](CramReader::next_into). The
/// file handle is closed on drop.
pub struct CramReader {
    rdr: BufReader<File>,
    header: Header,
    /// Records consumed so far.
    consumed: u32,
}

impl CramReader {
    /// Opens a cramfile with the default read buffer.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CramError> {
        Self::open_with_capacity(path, DEFAULT_BUFFER_SIZE)
    }

    /// Opens a cramfile with an explicit read buffer capacity in bytes.
    ///
    /// # Errors
    ///
    /// Fails with [`CramError::Io`] if the file cannot be opened or is
    /// shorter than a header, [`CramError::BadMagic`] /
    /// [`CramError::UnsupportedVersion`] if the header is not a readable
    /// cram header.
    pub fn open_with_capacity<P: AsRef<Path>>(
        path: P,
        capacity: usize,
    ) -> Result<Self, CramError> {
        let file = File::open(path)?;
        let mut rdr = BufReader::with_capacity(capacity, file);
        let header = read_header(&mut rdr)?;

        Ok(Self {
            rdr,
            header,
            consumed: 0,
        })
    }

    /// Format version recorded in the header.
    pub fn version(&self) -> u32 {
        self.header.version
    }

    /// Number of job records in the file.
    pub fn num_jobs(&self) -> u32 {
        self.header.num_jobs
    }

    /// Sum of `num_procs` over every job.
    pub fn total_procs(&self) -> u32 {
        self.header.total_procs
    }

    /// Byte length of the largest record; the minimum usable buffer size
    /// for [`next_into`](CramReader::next_into).
    pub fn max_job_size(&self) -> u32 {
        self.header.max_job_size
    }

    /// True while unconsumed records remain.
    pub fn has_more(&self) -> bool {
        self.consumed < self.header.num_jobs
    }

    /// Reads the next record into `buf`, which must hold at least
    /// [`max_job_size`](CramReader::max_job_size) bytes.
    ///
    /// Returns `(record_len, num_procs)` — the record's byte length and its
    /// first field, peeked so the caller can route the record without
    /// decoding it. The cursor advances past exactly one record.
    ///
    /// # Errors
    ///
    /// [`CramError::TruncatedRecord`] if the record's length prefix exceeds
    /// `max_job_size` (or the supplied buffer), or if the file ends before
    /// the advertised bytes arrive.
    pub fn next_into(&mut self, buf: &mut [u8]) -> Result<(usize, u32), CramError> {
        let len = self.rdr.read_u32::<BigEndian>()? as usize;

        let available = buf.len().min(self.header.max_job_size as usize);
        if len > available {
            return Err(CramError::TruncatedRecord {
                expected: len,
                actual: available,
            });
        }

        let mut filled = 0;
        while filled < len {
            let n = self.rdr.read(&mut buf[filled..len])?;
            if n == 0 {
                return Err(CramError::TruncatedRecord {
                    expected: len,
                    actual: filled,
                });
            }
            filled += n;
        }

        if len < 4 {
            return Err(CramError::InvalidRecord("record too short for num_procs"));
        }
        let num_procs = (&buf[..4]).read_u32::<BigEndian>()?;

        self.consumed += 1;
        Ok((len, num_procs))
    }

    /// Returns a decoding iterator over the remaining records.
    ///
    /// The iterator keeps the first decoded job's environment as the delta
    /// base for the rest of the file. This is the surface inspection tools
    /// build their listings on.
    pub fn jobs(&mut self) -> Jobs<'_> {
        let buf = vec![0u8; self.header.max_job_size as usize];
        Jobs {
            rdr: self,
            buf,
            base: None,
        }
    }
}

/// Iterator over decoded jobs; see [`CramReader::jobs`].
pub struct Jobs<'a> {
    rdr: &'a mut CramReader,
    buf: Vec<u8>,
    base: Option<Env>,
}

impl Iterator for Jobs<'_> {
    type Item = Result<Job, CramError>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.rdr.has_more() {
            return None;
        }

        let len = match self.rdr.next_into(&mut self.buf) {
            Ok((len, _)) => len,
            Err(e) => return Some(Err(e)),
        };

        let job = match decode_record(&self.buf[..len], self.base.as_ref()) {
            Ok(job) => job,
            Err(e) => return Some(Err(e)),
        };

        if self.base.is_none() {
            self.base = Some(job.env.clone());
        }
        Some(Ok(job))
    }
}
