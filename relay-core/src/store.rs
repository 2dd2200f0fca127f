//! Shared state store.
//!
//! A named POSIX shared memory segment sized exactly to [`SegmentLayout`] (the state
//! record plus its mutex handle slot), guarded by a named binary semaphore. The relay is the creator and owner: [`StateStore::create`]
//! unlinks any leftover segment and semaphore first, so a fresh run never observes
//! values from a previous unclean exit, and [`StateStore::destroy`] unlinks both.
//! Other processes [`StateStore::attach`] by name and never unlink.
//!
//! Every access copies the whole record while the semaphore is held. This is a
//! convention: the sibling process must take the same semaphore for the three
//! vectors to stay consistent.

use std::ffi::{CStr, CString};
use std::fs::File;
use std::io;
use std::os::fd::FromRawFd;
use std::ptr::{self, NonNull};

use memmap2::{MmapMut, MmapOptions};
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::state::{SegmentLayout, SharedState, Vec2};

const SEGMENT_LEN: usize = std::mem::size_of::<SegmentLayout>();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ownership {
    Owner,
    Attached,
}

fn ipc_name(name: &str) -> Result<CString, StoreError> {
    CString::new(name).map_err(|_| StoreError::InvalidName(name.to_string()))
}

fn ignore_missing(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Named counting semaphore initialised to 1, used as a cross-process mutex.
#[derive(Debug)]
pub struct NamedSemaphore {
    name: CString,
    sem: NonNull<libc::sem_t>,
}

// SAFETY: POSIX semaphores are designed for concurrent use from any thread or
// process; the handle is only closed in `Drop`.
unsafe impl Send for NamedSemaphore {}
unsafe impl Sync for NamedSemaphore {}

impl NamedSemaphore {
    fn open_with(name: CString, create: bool) -> Result<Self, StoreError> {
        // SAFETY: `name` is NUL-terminated; the variadic mode/value are only read with O_CREAT.
        let sem = unsafe {
            if create {
                libc::sem_open(
                    name.as_ptr(),
                    libc::O_CREAT,
                    0o666 as libc::c_uint,
                    1 as libc::c_uint,
                )
            } else {
                libc::sem_open(name.as_ptr(), 0)
            }
        };

        if sem == libc::SEM_FAILED {
            return Err(StoreError::Semaphore {
                name: name.to_string_lossy().into_owned(),
                source: io::Error::last_os_error(),
            });
        }

        let sem = NonNull::new(sem).ok_or_else(|| StoreError::Semaphore {
            name: name.to_string_lossy().into_owned(),
            source: io::Error::from(io::ErrorKind::InvalidData),
        })?;
        Ok(Self { name, sem })
    }

    /// Removes any semaphore with this name, then creates a fresh one holding 1.
    pub fn recreate(name: &str) -> Result<Self, StoreError> {
        let cname = ipc_name(name)?;
        ignore_missing(Self::unlink_name(&cname)).map_err(|source| StoreError::Unlink {
            name: name.to_string(),
            source,
        })?;
        Self::open_with(cname, true)
    }

    pub fn open(name: &str) -> Result<Self, StoreError> {
        Self::open_with(ipc_name(name)?, false)
    }

    fn unlink_name(name: &CStr) -> io::Result<()> {
        // SAFETY: `name` is NUL-terminated.
        if unsafe { libc::sem_unlink(name.as_ptr()) } == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Blocks until the semaphore is acquired. Signal interruptions are retried.
    pub fn acquire(&self) -> Result<SemaphoreGuard<'_>, StoreError> {
        loop {
            // SAFETY: `sem` stays valid until `Drop`.
            if unsafe { libc::sem_wait(self.sem.as_ptr()) } == 0 {
                return Ok(SemaphoreGuard { sem: self });
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(StoreError::Lock(err));
            }
        }
    }

    fn release(&self) {
        // SAFETY: only called by the guard that acquired it.
        unsafe {
            libc::sem_post(self.sem.as_ptr());
        }
    }

    pub fn name(&self) -> &CStr {
        &self.name
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        // SAFETY: the handle came from a successful `sem_open` and is closed once.
        unsafe {
            libc::sem_close(self.sem.as_ptr());
        }
    }
}

#[must_use = "the semaphore is released when the guard is dropped"]
pub struct SemaphoreGuard<'a> {
    sem: &'a NamedSemaphore,
}

impl Drop for SemaphoreGuard<'_> {
    fn drop(&mut self) {
        self.sem.release();
    }
}

/// Handle to the drone state segment and its semaphore.
#[derive(Debug)]
pub struct StateStore {
    segment_name: CString,
    _map: MmapMut,
    state: NonNull<SharedState>,
    mutex: NamedSemaphore,
    ownership: Ownership,
}

// SAFETY: the mapped record is only read or written through `StateGuard`, which
// holds the named semaphore for its whole lifetime.
unsafe impl Send for StateStore {}
unsafe impl Sync for StateStore {}

impl StateStore {
    /// Creates the segment and semaphore, replacing any left by a previous run.
    ///
    /// The new segment is zero-filled.
    pub fn create(segment_name: &str, mutex_name: &str) -> Result<Self, StoreError> {
        let cname = ipc_name(segment_name)?;
        ignore_missing(unlink_segment(&cname)).map_err(|source| StoreError::Unlink {
            name: segment_name.to_string(),
            source,
        })?;

        let file = open_segment(&cname, libc::O_CREAT | libc::O_RDWR).map_err(|source| {
            StoreError::Open {
                name: segment_name.to_string(),
                source,
            }
        })?;
        info!("Opened the shared memory {segment_name}");

        let (map, mutex) = match Self::prepare(&file, segment_name, mutex_name) {
            Ok(parts) => parts,
            Err(e) => {
                if let Err(unlink) = unlink_segment(&cname) {
                    warn!("Error unlinking the shared memory {segment_name}: {unlink}");
                }
                return Err(e);
            }
        };
        debug!("Created the semaphore {mutex_name}");

        let store = Self::from_parts(cname, map, mutex, Ownership::Owner);
        store.publish_mutex_handle();
        Ok(store)
    }

    /// Sizes and maps a freshly created segment, then recreates its semaphore.
    fn prepare(
        file: &File,
        segment_name: &str,
        mutex_name: &str,
    ) -> Result<(MmapMut, NamedSemaphore), StoreError> {
        file.set_len(SEGMENT_LEN as u64)
            .map_err(|source| StoreError::Resize {
                name: segment_name.to_string(),
                source,
            })?;
        let map = map_segment(file, segment_name)?;
        let mutex = NamedSemaphore::recreate(mutex_name)?;
        Ok((map, mutex))
    }

    fn publish_mutex_handle(&self) {
        let slot = self.layout();
        // SAFETY: `slot` points into the live mapping of SEGMENT_LEN bytes and the
        // field is never accessed through a reference.
        unsafe {
            ptr::write_volatile(
                ptr::addr_of_mut!((*slot.as_ptr()).mutex_handle),
                self.mutex.sem.as_ptr() as usize,
            )
        }
    }

    fn layout(&self) -> NonNull<SegmentLayout> {
        self.state.cast()
    }

    /// Opens an existing segment and semaphore without taking ownership.
    pub fn attach(segment_name: &str, mutex_name: &str) -> Result<Self, StoreError> {
        let cname = ipc_name(segment_name)?;
        let file = open_segment(&cname, libc::O_RDWR).map_err(|source| StoreError::Open {
            name: segment_name.to_string(),
            source,
        })?;

        let actual = file
            .metadata()
            .map_err(|source| StoreError::Open {
                name: segment_name.to_string(),
                source,
            })?
            .len();
        if actual != SEGMENT_LEN as u64 {
            return Err(StoreError::SizeMismatch {
                name: segment_name.to_string(),
                expected: SEGMENT_LEN,
                actual,
            });
        }

        let map = map_segment(&file, segment_name)?;
        let mutex = NamedSemaphore::open(mutex_name)?;
        Ok(Self::from_parts(cname, map, mutex, Ownership::Attached))
    }

    fn from_parts(
        segment_name: CString,
        mut map: MmapMut,
        mutex: NamedSemaphore,
        ownership: Ownership,
    ) -> Self {
        // mmap returns page-aligned, non-null memory of at least SEGMENT_LEN bytes.
        let state = NonNull::new(map.as_mut_ptr().cast::<SharedState>())
            .unwrap_or_else(NonNull::dangling);
        Self {
            segment_name,
            _map: map,
            state,
            mutex,
            ownership,
        }
    }

    pub fn is_owner(&self) -> bool {
        self.ownership == Ownership::Owner
    }

    /// Writes the initial vectors as one update.
    pub fn init(&self, position: Vec2, velocity: Vec2, force: Vec2) -> Result<(), StoreError> {
        let guard = self.lock()?;
        guard.write(SharedState::new(position, velocity, force));
        info!("Initialized the drone state: position {position}, velocity {velocity}, force {force}");
        Ok(())
    }

    /// Acquires the semaphore; it is released when the guard drops.
    pub fn lock(&self) -> Result<StateGuard<'_>, StoreError> {
        let held = self.mutex.acquire()?;
        Ok(StateGuard {
            store: self,
            _held: held,
        })
    }

    pub fn snapshot(&self) -> Result<SharedState, StoreError> {
        Ok(self.lock()?.read())
    }

    /// Unmaps the segment and, for the owner, unlinks the segment and the semaphore.
    ///
    /// Both unlinks are attempted; the first failure is returned.
    pub fn destroy(self) -> Result<(), StoreError> {
        let result = if self.is_owner() {
            let segment = unlink_segment(&self.segment_name).map_err(|source| {
                StoreError::Unlink {
                    name: self.segment_name.to_string_lossy().into_owned(),
                    source,
                }
            });
            let mutex = NamedSemaphore::unlink_name(self.mutex.name()).map_err(|source| {
                StoreError::Unlink {
                    name: self.mutex.name().to_string_lossy().into_owned(),
                    source,
                }
            });
            segment.and(mutex)
        } else {
            Ok(())
        };

        debug!(
            "Released the shared memory {}",
            self.segment_name.to_string_lossy()
        );
        drop(self);
        result
    }
}

/// Exclusive access to the shared record.
pub struct StateGuard<'a> {
    store: &'a StateStore,
    _held: SemaphoreGuard<'a>,
}

impl StateGuard<'_> {
    pub fn read(&self) -> SharedState {
        // SAFETY: the pointer targets a live mapping of SEGMENT_LEN bytes and the
        // semaphore is held. Volatile because other processes write the same memory.
        unsafe { ptr::read_volatile(self.store.state.as_ptr()) }
    }

    pub fn write(&self, state: SharedState) {
        // SAFETY: as in `read`; the mapping is writable.
        unsafe { ptr::write_volatile(self.store.state.as_ptr(), state) }
    }
}

fn open_segment(name: &CStr, flags: libc::c_int) -> io::Result<File> {
    // SAFETY: `name` is NUL-terminated.
    let fd = unsafe { libc::shm_open(name.as_ptr(), flags, 0o666 as libc::mode_t) };
    if fd == -1 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: `fd` was just returned by shm_open and is owned by nobody else.
    Ok(unsafe { File::from_raw_fd(fd) })
}

fn unlink_segment(name: &CStr) -> io::Result<()> {
    // SAFETY: `name` is NUL-terminated.
    if unsafe { libc::shm_unlink(name.as_ptr()) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn map_segment(file: &File, name: &str) -> Result<MmapMut, StoreError> {
    // SAFETY: the segment is shared on purpose; all access goes through volatile
    // reads/writes under the semaphore, never through Rust references.
    unsafe { MmapOptions::new().len(SEGMENT_LEN).map_mut(file) }.map_err(|source| {
        StoreError::Map {
            name: name.to_string(),
            source,
        }
    })
}
