//! Job descriptors, the record codec, and the environment delta.
//!
//! A job's environment is stored as a **sorted** vector of (key, value)
//! byte-string pairs. Sortedness is what makes the delta cheap: subtracting
//! and merging are single linear passes over three cursors, and the writer's
//! diff comes out sorted for free. Keys are unique within a job.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::format::write_string;
use crate::CramError;

/// A job environment: (key, value) pairs sorted by key, keys unique.
pub type Env = Vec<(Vec<u8>, Vec<u8>)>;

/// One job invocation packed into a cramfile.
///
/// Strings are raw byte sequences; working directories, arguments, and
/// environment values need not be UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Number of processes this job runs on. Always >= 1.
    pub num_procs: u32,
    /// Working directory the job chdirs into at launch.
    pub working_dir: Vec<u8>,
    /// Argument vector. `args[0]` is the executable slot, so len >= 1.
    pub args: Vec<Vec<u8>>,
    /// Environment, sorted by key.
    pub env: Env,
}

impl Job {
    /// Builds a job, sorting `env` by key.
    ///
    /// Duplicate keys keep the last value given, so callers can layer
    /// overrides on top of a captured environment.
    pub fn new(
        num_procs: u32,
        working_dir: impl Into<Vec<u8>>,
        args: Vec<Vec<u8>>,
        mut env: Env,
    ) -> Self {
        env.sort_by(|a, b| a.0.cmp(&b.0));
        // keep the last of equal keys
        env.reverse();
        env.dedup_by(|a, b| a.0 == b.0);
        env.reverse();

        Self {
            num_procs,
            working_dir: working_dir.into(),
            args,
            env,
        }
    }
}

/// Diffs `env` against `base`, producing the delta a record stores.
///
/// Returns `(subtracted, changed)`:
/// - `subtracted`: keys present in `base` but absent from `env`.
/// - `changed`: pairs added relative to `base`, or whose value differs.
///
/// Both inputs must be sorted by key; both outputs come out sorted.
pub fn compress(base: &Env, env: &Env) -> (Vec<Vec<u8>>, Env) {
    let mut subtracted = Vec::new();
    let mut changed = Env::new();

    let (mut b, mut e) = (0, 0);
    while b < base.len() || e < env.len() {
        if b == base.len() {
            changed.push(env[e].clone());
            e += 1;
        } else if e == env.len() {
            subtracted.push(base[b].0.clone());
            b += 1;
        } else {
            match base[b].0.cmp(&env[e].0) {
                std::cmp::Ordering::Less => {
                    subtracted.push(base[b].0.clone());
                    b += 1;
                }
                std::cmp::Ordering::Greater => {
                    changed.push(env[e].clone());
                    e += 1;
                }
                std::cmp::Ordering::Equal => {
                    if base[b].1 != env[e].1 {
                        changed.push(env[e].clone());
                    }
                    b += 1;
                    e += 1;
                }
            }
        }
    }

    (subtracted, changed)
}

/// Reconstructs an environment from its base and a delta.
///
/// The output is the sorted merge of `(base ∪ changed) \ subtracted`:
/// - a key in both `base` and `changed` takes the changed value;
/// - a subtracted key that is not in `base` is tolerated and has no effect;
/// - a key in both `changed` and `subtracted` keeps the changed value.
///
/// All three inputs must be sorted. The merge walks three monotone cursors,
/// testing key equality explicitly at every step rather than pre-counting
/// matches, so a key that sorts to position 0 behaves like any other.
pub fn decompress(base: &Env, subtracted: &[Vec<u8>], changed: &Env) -> Env {
    let mut out = Env::with_capacity(base.len() + changed.len());

    let (mut b, mut c) = (0, 0);
    let mut s = 0;
    while b < base.len() || c < changed.len() {
        if b == base.len() {
            out.push(changed[c].clone());
            c += 1;
        } else if c == changed.len() {
            if !subtracted_matches(&base[b].0, subtracted, &mut s) {
                out.push(base[b].clone());
            }
            b += 1;
        } else {
            match base[b].0.cmp(&changed[c].0) {
                std::cmp::Ordering::Less => {
                    if !subtracted_matches(&base[b].0, subtracted, &mut s) {
                        out.push(base[b].clone());
                    }
                    b += 1;
                }
                std::cmp::Ordering::Greater => {
                    out.push(changed[c].clone());
                    c += 1;
                }
                std::cmp::Ordering::Equal => {
                    // changed wins; the entry is not counted as subtracted
                    out.push(changed[c].clone());
                    b += 1;
                    c += 1;
                }
            }
        }
    }

    out
}

/// Advances the subtraction cursor past keys that sort before `key`
/// (spurious subtractions) and reports whether `key` itself is subtracted.
fn subtracted_matches(key: &[u8], subtracted: &[Vec<u8>], s: &mut usize) -> bool {
    while *s < subtracted.len() && subtracted[*s].as_slice() < key {
        *s += 1;
    }
    if *s < subtracted.len() && subtracted[*s].as_slice() == key {
        *s += 1;
        true
    } else {
        false
    }
}

/// Encodes one job record, delta-compressing the environment against `base`.
///
/// Pass `base = None` for the first record: its environment is written in
/// full as "changed" pairs with zero subtractions. The returned bytes do not
/// include the container's `record_len` prefix.
pub fn encode_record(job: &Job, base: Option<&Env>) -> Result<Vec<u8>, CramError> {
    let mut buf = Vec::new();
    buf.write_u32::<BigEndian>(job.num_procs)?;
    write_string(&mut buf, &job.working_dir)?;

    buf.write_u32::<BigEndian>(job.args.len() as u32)?;
    for arg in &job.args {
        write_string(&mut buf, arg)?;
    }

    let (subtracted, changed) = match base {
        Some(base) => compress(base, &job.env),
        None => (Vec::new(), job.env.clone()),
    };

    buf.write_u32::<BigEndian>(subtracted.len() as u32)?;
    for key in &subtracted {
        write_string(&mut buf, key)?;
    }

    buf.write_u32::<BigEndian>(changed.len() as u32)?;
    for (key, value) in &changed {
        write_string(&mut buf, key)?;
        write_string(&mut buf, value)?;
    }

    Ok(buf)
}

/// Decodes one job record and reconstructs its full environment.
///
/// `base` is the first job's environment, used to expand the delta. The
/// first record itself is decoded with `base = None`.
///
/// # Errors
///
/// [`CramError::InvalidRecord`] if a count or string length overruns the
/// record; [`CramError::NoBaseForDelta`] if the record subtracts keys but no
/// base was supplied.
pub fn decode_record(record: &[u8], base: Option<&Env>) -> Result<Job, CramError> {
    let mut cur = record;

    let num_procs = take_u32(&mut cur)?;
    let working_dir = take_string(&mut cur)?;

    let num_args = take_u32(&mut cur)? as usize;
    let mut args = Vec::with_capacity(num_args.min(cur.len()));
    for _ in 0..num_args {
        args.push(take_string(&mut cur)?);
    }

    let num_subtracted = take_u32(&mut cur)? as usize;
    if num_subtracted > 0 && base.is_none() {
        return Err(CramError::NoBaseForDelta);
    }
    let mut subtracted = Vec::with_capacity(num_subtracted.min(cur.len()));
    for _ in 0..num_subtracted {
        subtracted.push(take_string(&mut cur)?);
    }

    let num_changed = take_u32(&mut cur)? as usize;
    let mut changed = Env::with_capacity(num_changed.min(cur.len()));
    for _ in 0..num_changed {
        let key = take_string(&mut cur)?;
        let value = take_string(&mut cur)?;
        changed.push((key, value));
    }

    let env = match base {
        Some(base) => decompress(base, &subtracted, &changed),
        None => changed,
    };

    Ok(Job {
        num_procs,
        working_dir,
        args,
        env,
    })
}

fn take_u32(cur: &mut &[u8]) -> Result<u32, CramError> {
    cur.read_u32::<BigEndian>()
        .map_err(|_| CramError::InvalidRecord("integer field overruns record"))
}

fn take_string(cur: &mut &[u8]) -> Result<Vec<u8>, CramError> {
    let len = take_u32(cur)? as usize;
    if len > cur.len() {
        return Err(CramError::InvalidRecord("string length overruns record"));
    }
    let (head, tail) = cur.split_at(len);
    *cur = tail;
    Ok(head.to_vec())
}
