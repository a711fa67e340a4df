//! In-process communicator: every rank is a thread of one process.
//!
//! A world is a shared [`Bus`] of per-rank mailboxes. Receives are
//! selective — a rank waits for the first message matching a (source, tag)
//! pair — and sends are buffered, so `isend` never blocks. Splitting builds
//! fresh buses, one per color, so sub-world traffic cannot alias the
//! parent's. Aborting trips a poison flag shared by a world and every world
//! split from it, waking all blocked ranks.

use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::{Comm, CommError, Request, Tag, RESERVED_TAGS};

/// Internal tag carrying broadcast payloads.
const BCAST_TAG: Tag = RESERVED_TAGS;

struct Msg {
    src: u32,
    tag: Tag,
    payload: Vec<u8>,
}

#[derive(Default)]
struct Mailbox {
    queue: Mutex<VecDeque<Msg>>,
    ready: Condvar,
}

/// Abort state shared by a world and all of its split descendants.
struct Poison {
    tripped: AtomicBool,
    code: Mutex<Option<i32>>,
    buses: Mutex<Vec<Weak<Bus>>>,
}

impl Poison {
    fn new() -> Self {
        Self {
            tripped: AtomicBool::new(false),
            code: Mutex::new(None),
            buses: Mutex::new(Vec::new()),
        }
    }

    fn register(&self, bus: &Arc<Bus>) {
        self.buses.lock().push(Arc::downgrade(bus));
    }

    /// Poisons the allocation. The first code wins; every bus descended
    /// from this world is woken so blocked ranks observe the abort.
    fn trip(&self, code: i32) {
        {
            let mut slot = self.code.lock();
            if slot.is_none() {
                *slot = Some(code);
            }
        }
        self.tripped.store(true, Ordering::SeqCst);

        for bus in self.buses.lock().iter().filter_map(Weak::upgrade) {
            bus.wake_all();
        }
    }
}

/// One round of a split collective: entries accumulate until every rank
/// has arrived, then the last arrival publishes each rank's sub-world.
#[derive(Default)]
struct SplitRound {
    entries: Vec<(u32, Option<u32>, u32)>,
    results: Option<HashMap<u32, Option<(Arc<Bus>, u32)>>>,
    taken: u32,
}

#[derive(Default)]
struct SyncState {
    barrier_gen: u64,
    barrier_count: u32,
    split: Option<SplitRound>,
}

struct Bus {
    size: u32,
    mailboxes: Vec<Mailbox>,
    sync: Mutex<SyncState>,
    sync_ready: Condvar,
    poison: Arc<Poison>,
}

impl Bus {
    fn new(size: u32, poison: Arc<Poison>) -> Arc<Self> {
        let bus = Arc::new(Self {
            size,
            mailboxes: (0..size).map(|_| Mailbox::default()).collect(),
            sync: Mutex::new(SyncState::default()),
            sync_ready: Condvar::new(),
            poison,
        });
        bus.poison.register(&bus);
        bus
    }

    fn check(&self) -> Result<(), CommError> {
        if self.poison.tripped.load(Ordering::SeqCst) {
            let code = (*self.poison.code.lock()).unwrap_or(1);
            return Err(CommError::Aborted { code });
        }
        Ok(())
    }

    /// Wakes every rank blocked on this bus. Locking each queue before
    /// notifying guarantees a waiter either sees the poison flag before
    /// sleeping or receives the wakeup.
    fn wake_all(&self) {
        for mailbox in &self.mailboxes {
            let _queue = mailbox.queue.lock();
            mailbox.ready.notify_all();
        }
        let _sync = self.sync.lock();
        self.sync_ready.notify_all();
    }
}

/// Completed-on-post send handle; local delivery is synchronous.
pub struct LocalRequest;

impl Request for LocalRequest {
    fn wait(self) -> Result<(), CommError> {
        Ok(())
    }
}

/// One rank's handle onto an in-process world. See the module docs.
pub struct LocalComm {
    bus: Arc<Bus>,
    rank: u32,
}

impl LocalComm {
    /// Builds a world of `size` ranks and returns one handle per rank,
    /// in rank order. Hand each to its rank's thread.
    pub fn world(size: u32) -> Vec<LocalComm> {
        assert!(size > 0, "a world needs at least one rank");
        let bus = Bus::new(size, Arc::new(Poison::new()));
        (0..size)
            .map(|rank| LocalComm {
                bus: bus.clone(),
                rank,
            })
            .collect()
    }
}

impl Comm for LocalComm {
    type Request = LocalRequest;

    fn rank(&self) -> u32 {
        self.rank
    }

    fn size(&self) -> u32 {
        self.bus.size
    }

    fn same_world(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.bus, &other.bus)
    }

    fn broadcast(&self, root: u32, buf: &mut [u8]) -> Result<(), CommError> {
        self.bus.check()?;

        if self.rank == root {
            for dest in 0..self.bus.size {
                if dest != root {
                    self.isend(dest, BCAST_TAG, buf)?;
                }
            }
            Ok(())
        } else {
            let n = self.recv(root, BCAST_TAG, buf)?;
            if n != buf.len() {
                return Err(CommError::ShortMessage {
                    expected: n,
                    actual: buf.len(),
                });
            }
            Ok(())
        }
    }

    fn isend(&self, dest: u32, tag: Tag, payload: &[u8]) -> Result<LocalRequest, CommError> {
        self.bus.check()?;

        let mailbox = &self.bus.mailboxes[dest as usize];
        let mut queue = mailbox.queue.lock();
        queue.push_back(Msg {
            src: self.rank,
            tag,
            payload: payload.to_vec(),
        });
        mailbox.ready.notify_all();
        Ok(LocalRequest)
    }

    fn recv(&self, src: u32, tag: Tag, buf: &mut [u8]) -> Result<usize, CommError> {
        let mailbox = &self.bus.mailboxes[self.rank as usize];
        let mut queue = mailbox.queue.lock();

        let msg = loop {
            self.bus.check()?;
            let matched = queue.iter().position(|m| m.src == src && m.tag == tag);
            if let Some(pos) = matched {
                // position() just found it
                break queue.remove(pos).unwrap();
            }
            mailbox.ready.wait(&mut queue);
        };
        drop(queue);

        if msg.payload.len() > buf.len() {
            return Err(CommError::ShortMessage {
                expected: msg.payload.len(),
                actual: buf.len(),
            });
        }
        buf[..msg.payload.len()].copy_from_slice(&msg.payload);
        Ok(msg.payload.len())
    }

    fn split(&self, color: Option<u32>, key: u32) -> Result<Option<Self>, CommError> {
        let mut sync = self.bus.sync.lock();

        // wait out a previous round that is still handing out results
        while sync.split.as_ref().map_or(false, |r| r.results.is_some()) {
            self.bus.check()?;
            self.bus.sync_ready.wait(&mut sync);
        }
        self.bus.check()?;

        let round = sync.split.get_or_insert_with(SplitRound::default);
        round.entries.push((self.rank, color, key));

        if round.entries.len() == self.bus.size as usize {
            // last arrival: group colored ranks, order each group by
            // (key, rank), and build one fresh bus per group
            let mut groups: BTreeMap<u32, Vec<(u32, u32)>> = BTreeMap::new();
            for &(rank, color, key) in &round.entries {
                if let Some(c) = color {
                    groups.entry(c).or_default().push((key, rank));
                }
            }

            let mut results: HashMap<u32, Option<(Arc<Bus>, u32)>> = round
                .entries
                .iter()
                .map(|&(rank, _, _)| (rank, None))
                .collect();
            for mut members in groups.into_values() {
                members.sort_unstable();
                let sub = Bus::new(members.len() as u32, self.bus.poison.clone());
                for (local_rank, &(_, rank)) in members.iter().enumerate() {
                    results.insert(rank, Some((sub.clone(), local_rank as u32)));
                }
            }

            round.results = Some(results);
            self.bus.sync_ready.notify_all();
        } else {
            while sync.split.as_ref().map_or(true, |r| r.results.is_none()) {
                self.bus.sync_ready.wait(&mut sync);
                self.bus.check()?;
            }
        }

        let round = sync.split.as_mut().unwrap();
        let mine = round
            .results
            .as_mut()
            .unwrap()
            .remove(&self.rank)
            .unwrap();
        round.taken += 1;
        if round.taken == self.bus.size {
            sync.split = None;
            self.bus.sync_ready.notify_all();
        }

        Ok(mine.map(|(bus, rank)| LocalComm { bus, rank }))
    }

    fn barrier(&self) -> Result<(), CommError> {
        let mut sync = self.bus.sync.lock();
        self.bus.check()?;

        let gen = sync.barrier_gen;
        sync.barrier_count += 1;
        if sync.barrier_count == self.bus.size {
            sync.barrier_count = 0;
            sync.barrier_gen = sync.barrier_gen.wrapping_add(1);
            self.bus.sync_ready.notify_all();
            return Ok(());
        }

        while sync.barrier_gen == gen {
            self.bus.sync_ready.wait(&mut sync);
            self.bus.check()?;
        }
        Ok(())
    }

    fn abort(&self, code: i32) -> CommError {
        self.bus.poison.trip(code);
        CommError::Aborted { code }
    }
}
