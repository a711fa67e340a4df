//! The shim between an application and its runtime.
//!
//! [`Cram::init`] is the intercepted initializer: it runs once the
//! underlying runtime is live (the `Comm` handle it receives is already
//! usable), decides whether cram is configured, and leaves the process
//! either owning a private world or marked inactive. After init, every
//! place the application would hand the runtime the global world goes
//! through [`Cram::resolve`], which swaps in the private world — the same
//! identity test a profiling-layer interposer performs on the world
//! constant, moved to the communicator seam.

use log::info;
use std::env;
use std::os::unix::ffi::OsStrExt;

use comm::Comm;
use cramfile::Job;

use crate::partition::{partition, Assignment};
use crate::{args, crash, output, setup, Config, LaunchError};

/// Outcome of [`Cram::init`].
pub enum Launch<C: Comm> {
    /// This rank runs (part of) a job; hand the application its shim.
    Active(Cram<C>),
    /// This rank has no job. The caller should finalize the runtime and
    /// exit 0 without ever entering the application.
    Inactive,
}

/// Per-process shim state for one active rank.
pub struct Cram<C: Comm> {
    global: C,
    /// The private world. `None` in disabled mode, where the global world
    /// doubles as the local one.
    local: Option<C>,
    job: Option<Job>,
    job_id: Option<u32>,
}

impl<C: Comm> Cram<C> {
    /// Runs the launch-time protocol on an initialized runtime.
    ///
    /// With `CRAM_FILE` unset this is a no-op shim: the application sees
    /// the allocation unchanged. Otherwise the container is partitioned,
    /// and an active rank is moved into its job (working directory,
    /// arguments, environment, output streams, crash handlers) before the
    /// application gains control.
    pub fn init(global: C) -> Result<Launch<C>, LaunchError> {
        let rank = global.rank();
        let config = Config::from_env(rank == 0);

        let Some(path) = config.file else {
            if rank == 0 {
                info!("CRAM_FILE not set, cram is disabled");
            }
            // mirror the real arguments so binding accessors stay correct
            args::publish(env::args_os().map(|a| a.as_bytes().to_vec()).collect());
            return Ok(Launch::Active(Self {
                global,
                local: None,
                job: None,
                job_id: None,
            }));
        };

        match partition(&global, &path, config.buffer_size)? {
            Assignment::Inactive => Ok(Launch::Inactive),
            Assignment::Active { job, job_id, local } => {
                setup::install_job(&job);
                let saved_stderr = output::redirect(config.output, job_id, local.rank());
                crash::install(job_id, local.rank(), saved_stderr);

                if rank == 0 {
                    info!("partitioned {} into packed jobs", path.display());
                }
                Ok(Launch::Active(Self {
                    global,
                    local: Some(local),
                    job: Some(job),
                    job_id: Some(job_id),
                }))
            }
        }
    }

    /// The world this rank's application should live in: the private world
    /// of its job, or the global world when cram is disabled.
    pub fn world(&self) -> &C {
        self.local.as_ref().unwrap_or(&self.global)
    }

    /// Substitution point for intercepted entry points: a reference to the
    /// global world resolves to the private world, any other communicator
    /// passes through untouched.
    pub fn resolve<'a>(&'a self, comm: &'a C) -> &'a C {
        if comm.same_world(&self.global) {
            self.world()
        } else {
            comm
        }
    }

    /// The job this rank is running, if cram is enabled.
    pub fn job(&self) -> Option<&Job> {
        self.job.as_ref()
    }

    /// This rank's job id within the container.
    pub fn job_id(&self) -> Option<u32> {
        self.job_id
    }

    /// Shuts the shim down: the private world is dropped and the crash
    /// path learns the runtime is finalized.
    pub fn finalize(self) {
        crash::mark_finalized();
        drop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testlock;
    use crate::CRAM_FILE_VAR;
    use comm::LocalComm;
    use std::thread;

    // -------------------- Disabled mode --------------------

    #[test]
    fn disabled_mode_aliases_the_global_world() {
        let _guard = testlock::hold();
        env::remove_var(CRAM_FILE_VAR);

        let handles: Vec<_> = LocalComm::world(3)
            .into_iter()
            .map(|comm| {
                thread::spawn(move || match Cram::init(comm).unwrap() {
                    Launch::Active(cram) => {
                        assert!(cram.job().is_none());
                        assert!(cram.job_id().is_none());
                        assert!(cram.world().same_world(&cram.global));
                        (cram.world().rank(), cram.world().size())
                    }
                    Launch::Inactive => panic!("disabled mode never deactivates ranks"),
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for (rank, (world_rank, world_size)) in results.into_iter().enumerate() {
            assert_eq!(world_rank, rank as u32);
            assert_eq!(world_size, 3);
        }
    }

    // -------------------- World substitution --------------------

    #[test]
    fn resolve_substitutes_only_the_global_world() {
        let mut worlds = LocalComm::world(1).into_iter();
        let global = worlds.next().unwrap();
        let local = global.split(Some(0), 0).unwrap().unwrap();
        let unrelated = LocalComm::world(1).into_iter().next().unwrap();

        let cram = Cram {
            global,
            local: Some(local),
            job: None,
            job_id: Some(0),
        };

        // the global world resolves to the private world
        assert!(cram.resolve(&cram.global).same_world(cram.world()));
        // any other communicator passes through
        assert!(cram.resolve(&unrelated).same_world(&unrelated));
        // and the private world is not the global one
        assert!(!cram.world().same_world(&cram.global));
    }
}
