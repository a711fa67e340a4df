//! The collective launch protocol: deliver every rank its job.
//!
//! The shape of the traffic matters at scale. The first job's record is the
//! payload most ranks need verbatim, so it travels by broadcast and every
//! rank decompresses it locally. Every later record goes point-to-point,
//! but only to the contiguous rank range that runs it — never an
//! all-to-all — and the root bounds its outstanding send requests with a
//! drain window so a million-rank launch does not hold a million requests.
//!
//! Any error the root sees (unreadable file, bad record, capacity) aborts
//! the whole allocation: a partially launched pack cannot be recovered.

use comm::{Comm, Request, Tag};
use cramfile::{decode_record, CramReader, Job};
use log::error;
use std::path::Path;

use crate::LaunchError;

/// Tag carrying a rank's 4-byte job id.
pub const TAG_JOB_ID: Tag = 1;
/// Tag carrying a raw job record.
pub const TAG_RECORD: Tag = 2;

/// Peers the root may have in flight (two requests each) before draining.
const SEND_WINDOW_PEERS: usize = 512;

const ROOT: u32 = 0;
const INACTIVE_ID: i32 = -1;

/// What the protocol decided for this rank.
pub enum Assignment<C: Comm> {
    /// This rank runs `job` as member `local.rank()` of its private world.
    Active { job: Job, job_id: u32, local: C },
    /// No job for this rank; it should finalize and exit 0.
    Inactive,
}

/// Runs the launch protocol. Collective: every rank of `comm` must call
/// this exactly once, with the same ordering relative to other
/// collectives.
pub fn partition<C: Comm>(
    comm: &C,
    path: &Path,
    buffer_size: usize,
) -> Result<Assignment<C>, LaunchError> {
    partition_with(comm, path, buffer_size, SEND_WINDOW_PEERS)
}

fn partition_with<C: Comm>(
    comm: &C,
    path: &Path,
    buffer_size: usize,
    window_peers: usize,
) -> Result<Assignment<C>, LaunchError> {
    let rank = comm.rank();
    let size = comm.size();

    // Root opens and validates the container, then everyone learns the
    // record buffer size.
    let mut reader = None;
    let mut size_buf = [0u8; 4];
    if rank == ROOT {
        let r = match CramReader::open_with_capacity(path, buffer_size) {
            Ok(r) => r,
            Err(e) => {
                error!("cannot open cram file {}: {}", path.display(), e);
                comm.abort(1);
                return Err(e.into());
            }
        };
        if r.num_jobs() == 0 {
            error!("cram file {} contains no jobs", path.display());
            comm.abort(1);
            return Err(LaunchError::EmptyContainer);
        }
        if r.total_procs() > size {
            error!(
                "this cram file requires {} processes, but the allocation has only {}",
                r.total_procs(),
                size
            );
            comm.abort(1);
            return Err(LaunchError::Capacity {
                required: r.total_procs(),
                available: size,
            });
        }
        size_buf = r.max_job_size().to_be_bytes();
        reader = Some(r);
    }
    comm.broadcast(ROOT, &mut size_buf)?;
    let max_job_size = u32::from_be_bytes(size_buf) as usize;
    let mut record = vec![0u8; max_job_size];

    // Record 0 travels to everyone; each rank decompresses it locally.
    if let Some(reader) = reader.as_mut() {
        if let Err(e) = reader.next_into(&mut record) {
            error!("cannot read first job record: {}", e);
            comm.abort(1);
            return Err(e.into());
        }
    }
    comm.broadcast(ROOT, &mut record)?;
    let first_job = match decode_record(&record, None) {
        Ok(job) => job,
        Err(e) => {
            error!("cannot decode first job record: {}", e);
            comm.abort(1);
            return Err(e.into());
        }
    };

    let (job_id, job) = if rank == ROOT {
        if let Err(e) = scatter_jobs(comm, reader.as_mut().unwrap(), &first_job, window_peers) {
            comm.abort(1);
            return Err(e);
        }
        (0, Some(first_job))
    } else if rank < first_job.num_procs {
        // member of job 0: the broadcast already delivered everything
        (0, Some(first_job))
    } else {
        let mut id_buf = [0u8; 4];
        comm.recv(ROOT, TAG_JOB_ID, &mut id_buf)?;
        let id = i32::from_be_bytes(id_buf);

        if id >= 0 {
            let len = comm.recv(ROOT, TAG_RECORD, &mut record)?;
            match decode_record(&record[..len], Some(&first_job.env)) {
                Ok(job) => (id, Some(job)),
                Err(e) => {
                    error!("cannot decode job record {}: {}", id, e);
                    comm.abort(1);
                    return Err(e.into());
                }
            }
        } else {
            (INACTIVE_ID, None)
        }
    };

    // Split the world by job id, then line everyone up before any rank
    // touches application state. Inactive ranks join the barrier too.
    let color = if job_id >= 0 { Some(job_id as u32) } else { None };
    let local = comm.split(color, rank)?;
    comm.barrier()?;

    match (job, local) {
        (Some(job), Some(local)) => Ok(Assignment::Active {
            job,
            job_id: job_id as u32,
            local,
        }),
        _ => Ok(Assignment::Inactive),
    }
}

/// Root side of the targeted delivery: walk records `1..num_jobs`, sending
/// each to its contiguous rank range, then hand every leftover rank an
/// inactive id.
fn scatter_jobs<C: Comm>(
    comm: &C,
    reader: &mut CramReader,
    first_job: &Job,
    window_peers: usize,
) -> Result<(), LaunchError> {
    let mut record = vec![0u8; reader.max_job_size() as usize];
    let mut pending: Vec<C::Request> = Vec::new();
    let mut next_rank = first_job.num_procs;
    let mut job_id: i32 = 0;

    while reader.has_more() {
        let (len, num_procs) = match reader.next_into(&mut record) {
            Ok(r) => r,
            Err(e) => {
                error!("cannot read job record {}: {}", job_id + 1, e);
                return Err(e.into());
            }
        };
        job_id += 1;

        let range_end = next_rank.saturating_add(num_procs);
        if range_end > comm.size() || range_end > reader.total_procs() {
            error!("job records overrun the header's process total");
            return Err(LaunchError::InconsistentTotals);
        }

        let id_bytes = job_id.to_be_bytes();
        for dest in next_rank..range_end {
            pending.push(comm.isend(dest, TAG_JOB_ID, &id_bytes)?);
            pending.push(comm.isend(dest, TAG_RECORD, &record[..len])?);
            drain_if_full(&mut pending, window_peers)?;
        }
        next_rank = range_end;
    }

    if next_rank != reader.total_procs() {
        error!("job records fall short of the header's process total");
        return Err(LaunchError::InconsistentTotals);
    }

    let inactive = INACTIVE_ID.to_be_bytes();
    for dest in next_rank..comm.size() {
        pending.push(comm.isend(dest, TAG_JOB_ID, &inactive)?);
        drain_if_full(&mut pending, window_peers)?;
    }

    for request in pending {
        request.wait()?;
    }
    Ok(())
}

fn drain_if_full<R: Request>(pending: &mut Vec<R>, window_peers: usize) -> Result<(), LaunchError> {
    if pending.len() >= 2 * window_peers {
        for request in pending.drain(..) {
            request.wait()?;
        }
    }
    Ok(())
}
