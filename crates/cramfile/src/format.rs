//! Cram binary format constants and header read/write helpers.
//!
//! The header is always the **first 20 bytes** of a cramfile:
//!
//! ```text
//! [magic: u32 BE = 0x6372_616d][version: u32][num_jobs: u32]
//! [total_procs: u32][max_job_size: u32]
//! ```

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Result as IoResult, Write};

use crate::CramError;

/// Magic number identifying cram v1 files (ASCII "cram").
pub const CRAM_MAGIC: u32 = 0x6372_616d;

/// Current format version. Bump when the binary layout changes.
pub const CRAM_VERSION: u32 = 1;

/// Size of the header in bytes: 5 big-endian `u32` fields.
pub const HEADER_BYTES: u64 = 20;

/// Parsed cramfile header.
///
/// `total_procs` is the sum of `num_procs` over every job record and
/// `max_job_size` bounds the byte length of any single record, so a reader
/// can size its decode buffer once before touching the records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version: u32,
    pub num_jobs: u32,
    pub total_procs: u32,
    pub max_job_size: u32,
}

/// Writes the cram header (magic plus the four [`Header`] fields) to `w`.
pub fn write_header<W: Write>(w: &mut W, header: &Header) -> IoResult<()> {
    w.write_u32::<BigEndian>(CRAM_MAGIC)?;
    w.write_u32::<BigEndian>(header.version)?;
    w.write_u32::<BigEndian>(header.num_jobs)?;
    w.write_u32::<BigEndian>(header.total_procs)?;
    w.write_u32::<BigEndian>(header.max_job_size)?;
    Ok(())
}

/// Reads and validates the cram header from `r`.
///
/// The reader must be positioned at offset 0. After this call the cursor is
/// at the first record's length prefix.
///
/// # Errors
///
/// Returns [`CramError::BadMagic`] if the file does not start with the cram
/// magic and [`CramError::UnsupportedVersion`] for any version other than
/// [`CRAM_VERSION`].
pub fn read_header<R: Read>(r: &mut R) -> Result<Header, CramError> {
    let magic = r.read_u32::<BigEndian>()?;
    if magic != CRAM_MAGIC {
        return Err(CramError::BadMagic(magic));
    }

    let version = r.read_u32::<BigEndian>()?;
    if version != CRAM_VERSION {
        return Err(CramError::UnsupportedVersion(version));
    }

    Ok(Header {
        version,
        num_jobs: r.read_u32::<BigEndian>()?,
        total_procs: r.read_u32::<BigEndian>()?,
        max_job_size: r.read_u32::<BigEndian>()?,
    })
}

/// Writes a length-prefixed string: `u32` byte count, then the raw bytes.
///
/// No nul terminator is written; zero-length strings are legal.
pub fn write_string<W: Write>(w: &mut W, bytes: &[u8]) -> IoResult<()> {
    w.write_u32::<BigEndian>(bytes.len() as u32)?;
    w.write_all(bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let header = Header {
            version: CRAM_VERSION,
            num_jobs: 3,
            total_procs: 17,
            max_job_size: 4096,
        };

        let mut buf = Vec::new();
        write_header(&mut buf, &header).unwrap();
        assert_eq!(buf.len() as u64, HEADER_BYTES);

        let parsed = read_header(&mut &buf[..]).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = Vec::new();
        write_header(
            &mut buf,
            &Header {
                version: CRAM_VERSION,
                num_jobs: 0,
                total_procs: 0,
                max_job_size: 0,
            },
        )
        .unwrap();
        buf[0] = 0xba;

        match read_header(&mut &buf[..]) {
            Err(CramError::BadMagic(_)) => {}
            other => panic!("expected BadMagic, got {:?}", other),
        }
    }

    #[test]
    fn rejects_unknown_version() {
        let mut buf = Vec::new();
        write_header(
            &mut buf,
            &Header {
                version: CRAM_VERSION + 1,
                num_jobs: 0,
                total_procs: 0,
                max_job_size: 0,
            },
        )
        .unwrap();

        match read_header(&mut &buf[..]) {
            Err(CramError::UnsupportedVersion(v)) => assert_eq!(v, CRAM_VERSION + 1),
            other => panic!("expected UnsupportedVersion, got {:?}", other),
        }
    }

    #[test]
    fn short_header_is_io_error() {
        let buf = [0x63u8, 0x72, 0x61];
        assert!(matches!(read_header(&mut &buf[..]), Err(CramError::Io(_))));
    }

    #[test]
    fn strings_carry_no_terminator() {
        let mut buf = Vec::new();
        write_string(&mut buf, b"abc").unwrap();
        assert_eq!(buf, [0, 0, 0, 3, b'a', b'b', b'c']);

        buf.clear();
        write_string(&mut buf, b"").unwrap();
        assert_eq!(buf, [0, 0, 0, 0]);
    }
}
