use byteorder::{BigEndian, WriteBytesExt};
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use crate::format::{write_header, CRAM_VERSION};
use crate::job::{encode_record, Env, Job};
use crate::reader::CramReader;
use crate::{CramError, Header};

/// Appends jobs to a cramfile, keeping the header true after every append.
///
/// The first appended job is stored in full and its environment becomes the
/// delta base for every later job. Each `append` writes one length-prefixed
/// record at the end of the file, then seeks back and rewrites the header so
/// `num_jobs`, `total_procs`, and `max_job_size` always describe the records
/// actually on disk — a half-written pack is still a readable cramfile.
pub struct CramWriter {
    file: std::fs::File,
    header: Header,
    /// First job's environment, the delta base. `None` until a job is written.
    base_env: Option<Env>,
}

impl CramWriter {
    /// Creates a new cramfile containing a header and no jobs.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, CramError> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let header = Header {
            version: CRAM_VERSION,
            num_jobs: 0,
            total_procs: 0,
            max_job_size: 0,
        };
        write_header(&mut file, &header)?;

        Ok(Self {
            file,
            header,
            base_env: None,
        })
    }

    /// Opens an existing cramfile for appending.
    ///
    /// Re-reads the header and the first record's environment so later
    /// appends delta-compress against the same base the file already uses.
    pub fn open_append<P: AsRef<Path>>(path: P) -> Result<Self, CramError> {
        let path = path.as_ref();

        let mut reader = CramReader::open(path)?;
        let header = Header {
            version: reader.version(),
            num_jobs: reader.num_jobs(),
            total_procs: reader.total_procs(),
            max_job_size: reader.max_job_size(),
        };
        let base_env = match reader.jobs().next() {
            Some(first) => Some(first?.env),
            None => None,
        };
        drop(reader);

        let mut file = OpenOptions::new().write(true).open(path)?;
        file.seek(SeekFrom::End(0))?;

        Ok(Self {
            file,
            header,
            base_env,
        })
    }

    /// Appends one job record and rewrites the header.
    ///
    /// # Errors
    ///
    /// [`CramError::InvalidRecord`] if the job violates the format's
    /// invariants (`num_procs >= 1`, at least the executable argument).
    pub fn append(&mut self, job: &Job) -> Result<(), CramError> {
        if job.num_procs == 0 {
            return Err(CramError::InvalidRecord("a job needs num_procs >= 1"));
        }
        if job.args.is_empty() {
            return Err(CramError::InvalidRecord(
                "a job needs at least the executable argument",
            ));
        }

        let record = encode_record(job, self.base_env.as_ref())?;

        self.file.seek(SeekFrom::End(0))?;
        self.file.write_u32::<BigEndian>(record.len() as u32)?;
        self.file.write_all(&record)?;

        self.header.num_jobs += 1;
        self.header.total_procs += job.num_procs;
        self.header.max_job_size = self.header.max_job_size.max(record.len() as u32);

        self.file.seek(SeekFrom::Start(0))?;
        write_header(&mut self.file, &self.header)?;

        if self.base_env.is_none() {
            self.base_env = Some(job.env.clone());
        }
        Ok(())
    }

    /// Number of jobs written so far (including any found on open).
    pub fn num_jobs(&self) -> u32 {
        self.header.num_jobs
    }

    /// Flushes buffered writes and syncs file contents to disk.
    pub fn flush(&mut self) -> Result<(), CramError> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::tempdir;

    fn env(pairs: &[(&str, &str)]) -> Env {
        pairs
            .iter()
            .map(|(k, v)| (k.as_bytes().to_vec(), v.as_bytes().to_vec()))
            .collect()
    }

    fn job(procs: u32, dir: &str, arg: &str, e: &[(&str, &str)]) -> Job {
        Job::new(
            procs,
            dir,
            vec![b"app".to_vec(), arg.as_bytes().to_vec()],
            env(e),
        )
    }

    // -------------------- Header invariants --------------------

    #[test]
    fn header_tracks_totals_and_max_record() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("totals.cram");

        let jobs = vec![
            job(4, "/tmp", "x", &[("A", "1"), ("B", "2")]),
            job(2, "/var/long/path/for/a/bigger/record", "y", &[("A", "1")]),
            job(9, "/t", "z", &[("C", "3")]),
        ];

        let mut writer = CramWriter::create(&path)?;
        let mut max_record = 0u32;
        for j in &jobs {
            let base = if writer.num_jobs() == 0 {
                None
            } else {
                Some(&jobs[0].env)
            };
            max_record = max_record.max(encode_record(j, base)?.len() as u32);
            writer.append(j)?;
        }
        writer.flush()?;

        let reader = CramReader::open(&path)?;
        assert_eq!(reader.num_jobs(), 3);
        assert_eq!(reader.total_procs(), 15);
        assert_eq!(reader.max_job_size(), max_record);
        Ok(())
    }

    #[test]
    fn many_jobs_roundtrip_pointwise() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("many.cram");

        let jobs: Vec<Job> = (0..200)
            .map(|i| {
                job(
                    1 + (i % 7),
                    &format!("/run/{}", i),
                    &format!("{}", i),
                    &[("STEP", &format!("{}", i)), ("COMMON", "same")],
                )
            })
            .collect();

        let mut writer = CramWriter::create(&path)?;
        for j in &jobs {
            writer.append(j)?;
        }
        writer.flush()?;

        let mut reader = CramReader::open(&path)?;
        let read_back: Result<Vec<_>, _> = reader.jobs().collect();
        assert_eq!(read_back?, jobs);
        Ok(())
    }

    // -------------------- Append mode --------------------

    #[test]
    fn reopen_preserves_delta_base() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("append.cram");

        let first = job(2, "/a", "1", &[("X", "p"), ("Y", "q")]);
        let second = job(3, "/b", "2", &[("Y", "r"), ("Z", "s")]);

        {
            let mut writer = CramWriter::create(&path)?;
            writer.append(&first)?;
            writer.flush()?;
        }
        {
            let mut writer = CramWriter::open_append(&path)?;
            assert_eq!(writer.num_jobs(), 1);
            writer.append(&second)?;
            writer.flush()?;
        }

        let mut reader = CramReader::open(&path)?;
        assert_eq!(reader.total_procs(), 5);
        let read_back: Result<Vec<_>, _> = reader.jobs().collect();
        assert_eq!(read_back?, vec![first, second]);
        Ok(())
    }

    #[test]
    fn reopen_empty_file_then_append() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("empty-append.cram");

        CramWriter::create(&path)?.flush()?;

        let mut writer = CramWriter::open_append(&path)?;
        assert_eq!(writer.num_jobs(), 0);
        writer.append(&job(1, "/", "x", &[]))?;
        writer.flush()?;

        let reader = CramReader::open(&path)?;
        assert_eq!(reader.num_jobs(), 1);
        Ok(())
    }

    // -------------------- Invariant checks --------------------

    #[test]
    fn rejects_zero_proc_job() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("zero.cram");

        let mut writer = CramWriter::create(&path)?;
        let bad = Job::new(0, "/", vec![b"app".to_vec()], Env::new());
        assert!(matches!(
            writer.append(&bad),
            Err(CramError::InvalidRecord(_))
        ));
        Ok(())
    }

    #[test]
    fn rejects_empty_args() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("noargs.cram");

        let mut writer = CramWriter::create(&path)?;
        let bad = Job::new(1, "/", Vec::new(), Env::new());
        assert!(matches!(
            writer.append(&bad),
            Err(CramError::InvalidRecord(_))
        ));
        Ok(())
    }
}
