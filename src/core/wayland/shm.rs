//! Shared-memory pixel buffers and their two-phase teardown.
//!
//! A window's pixels live in an anonymous memfd mapped on both sides of
//! the connection. Once the descriptor has been announced through
//! create_pool the compositor may read the mapping at any time, so the
//! memory cannot be reclaimed locally until a delete_id event confirms
//! the pool object is gone. Retired mappings wait in the deferred table
//! until then.

use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};

use memmap2::{MmapMut, MmapOptions};
use nix::sys::memfd::{memfd_create, MemFdCreateFlag};
use nix::unistd::ftruncate;

use crate::core::errors::{DisplayError, Result};

/// Upper bound on mappings awaiting deletion confirmation. Hitting it
/// means the compositor has stopped confirming deletions.
pub const DEFERRED_CHUNK_CAP: usize = 255;

/// An anonymous shared-memory region mapped read/write.
///
/// Dropping the mapping unmaps the memory and closes the descriptor, so
/// ownership is the teardown: a mapping is reclaimed exactly once, when
/// its owner lets go of it.
pub struct ShmMapping {
    fd: OwnedFd,
    map: MmapMut,
}

impl ShmMapping {
    /// Create, size, and map a fresh region. The memfd is anonymous and
    /// exclusive; only the returned descriptor keeps it alive.
    pub fn alloc(size: usize) -> Result<Self> {
        let fd = memfd_create(c"tioga-pixels", MemFdCreateFlag::MFD_CLOEXEC)?;
        ftruncate(&fd, size as libc::off_t)?;
        // SAFETY: the memfd was just created and sized; the mapping is
        // dropped before the descriptor
        let map = unsafe { MmapOptions::new().len(size).map_mut(fd.as_raw_fd())? };
        tracing::debug!("mapped {size} bytes of shared pixel memory");
        Ok(Self { fd, map })
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.len() == 0
    }

    pub fn fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.map
    }
}

/// A retired pool whose destroy request is in flight. The mapping is held
/// here until the compositor confirms the pool id is dead.
pub struct DeferredChunk {
    pub pool: u32,
    pub buffer: u32,
    pub mapping: ShmMapping,
}

/// Bounded table of retired pools awaiting delete_id.
#[derive(Default)]
pub struct DeferredTable {
    chunks: Vec<DeferredChunk>,
}

impl DeferredTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_capacity(&self) -> bool {
        self.chunks.len() < DEFERRED_CHUNK_CAP
    }

    /// Park a retired pool. Pool ids are unique among parked chunks: the
    /// compositor never confirms a deletion twice.
    pub fn park(&mut self, chunk: DeferredChunk) -> Result<()> {
        if !self.has_capacity() {
            return Err(DisplayError::DeferredTableFull(DEFERRED_CHUNK_CAP));
        }
        debug_assert!(
            self.chunks.iter().all(|c| c.pool != chunk.pool),
            "pool id parked twice"
        );
        tracing::debug!(
            "parked retired pool wl_shm_pool@{} ({} bytes) for deferred teardown",
            chunk.pool,
            chunk.mapping.len()
        );
        self.chunks.push(chunk);
        Ok(())
    }

    /// Reclaim the chunk whose pool object the compositor just confirmed
    /// deleted. Dropping it unmaps and closes; other chunks are untouched.
    /// Returns false when the id names no parked pool.
    pub fn reclaim(&mut self, pool: u32) -> bool {
        let Some(idx) = self.chunks.iter().position(|c| c.pool == pool) else {
            return false;
        };
        let chunk = self.chunks.swap_remove(idx);
        tracing::debug!("freed memory linked to wl_shm_pool@{}", chunk.pool);
        true
    }

    /// Whether a release event for this buffer id belongs to a retired
    /// pool rather than a live window.
    pub fn owns_buffer(&self, buffer: u32) -> bool {
        buffer != 0 && self.chunks.iter().any(|c| c.buffer == buffer)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_maps_requested_size() {
        // one 600x400 window worth of XRGB8888
        let mapping = ShmMapping::alloc(600 * 400 * 4).unwrap();
        assert_eq!(mapping.len(), 960_000);
    }

    #[test]
    fn test_mapping_is_writable() {
        let mut mapping = ShmMapping::alloc(4096).unwrap();
        mapping.pixels_mut()[0] = 0xAB;
        mapping.pixels_mut()[4095] = 0xCD;
        assert_eq!(mapping.pixels_mut()[0], 0xAB);
    }

    fn chunk(pool: u32, buffer: u32) -> DeferredChunk {
        DeferredChunk {
            pool,
            buffer,
            mapping: ShmMapping::alloc(64).unwrap(),
        }
    }

    #[test]
    fn test_reclaim_clears_only_the_named_pool() {
        let mut table = DeferredTable::new();
        table.park(chunk(10, 11)).unwrap();
        table.park(chunk(20, 21)).unwrap();

        assert!(table.reclaim(10));
        assert_eq!(table.len(), 1);
        assert!(table.owns_buffer(21));
        assert!(!table.owns_buffer(11));
    }

    #[test]
    fn test_reclaim_unknown_pool_is_noop() {
        let mut table = DeferredTable::new();
        table.park(chunk(10, 11)).unwrap();
        assert!(!table.reclaim(99));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_park_overflow_is_a_defined_error() {
        let mut table = DeferredTable::new();
        for i in 0..DEFERRED_CHUNK_CAP {
            table.park(chunk(100 + i as u32, 0)).unwrap();
        }
        let err = table.park(chunk(9999, 0)).unwrap_err();
        assert!(matches!(err, DisplayError::DeferredTableFull(_)));
    }

    #[test]
    fn test_zero_buffer_id_never_matches() {
        let mut table = DeferredTable::new();
        table.park(chunk(10, 0)).unwrap();
        assert!(!table.owns_buffer(0));
    }
}
