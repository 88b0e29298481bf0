//! Receive ring of pre-allocated packet buffers
//!
//! Each stream pump owns one `PacketRing`. Datagrams are read straight into
//! the next free slot, and the filled slot is handed out as a `Packet`: an
//! atomically reference-counted view that can be held by the reorder queue,
//! an in-progress frame and any number of access units at once. A slot is
//! free again once every `Packet` pointing at it has been dropped; the ring
//! never writes into a slot that is still referenced.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// Backing storage for one ring slot
#[derive(Clone)]
pub struct PacketData {
    buf: Box<[u8]>,
    len: usize,
    received_at: Instant,
}

impl PacketData {
    fn new(slot_size: usize) -> Self {
        PacketData {
            buf: vec![0u8; slot_size].into_boxed_slice(),
            len: 0,
            received_at: Instant::now(),
        }
    }
}

/// Reference-counted handle to a received datagram
///
/// Cloning a `Packet` takes a reference on its ring slot, dropping it
/// releases that reference.
#[derive(Clone)]
pub struct Packet {
    inner: Arc<PacketData>,
}

impl Packet {
    /// Build a standalone packet that does not belong to any ring
    pub fn from_slice(data: &[u8]) -> Self {
        Packet {
            inner: Arc::new(PacketData {
                buf: data.to_vec().into_boxed_slice(),
                len: data.len(),
                received_at: Instant::now(),
            }),
        }
    }

    /// Datagram bytes
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.inner.buf[..self.inner.len]
    }

    /// Datagram length
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len
    }

    /// Check if the datagram is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.len == 0
    }

    /// Time the datagram was received
    #[inline]
    pub fn received_at(&self) -> Instant {
        self.inner.received_at
    }

    /// Number of outstanding handles on this packet's slot
    ///
    /// The ring's own slot reference is not counted, so a packet that is only
    /// held by the caller reports 1. Packets detached from their ring by a
    /// reallocation, or built with `from_slice`, have no ring reference and
    /// report one less than that.
    #[inline]
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner) - 1
    }

    /// Check if two handles refer to the same slot
    #[inline]
    pub fn same_slot(&self, other: &Packet) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("len", &self.inner.len)
            .field("refs", &self.ref_count())
            .finish()
    }
}

/// Ring statistics
#[derive(Debug, Clone, Default)]
pub struct RingStats {
    /// Datagrams received into the ring
    pub packets_received: u64,
    /// Slots skipped because they were still referenced
    pub busy_skips: u64,
    /// Times every slot was busy and the ring had to be reallocated
    pub reallocations: u64,
}

/// Fixed-size ring of packet slots
pub struct PacketRing {
    slots: Vec<Packet>,
    slot_size: usize,
    cursor: usize,
    stats: RingStats,
}

impl PacketRing {
    /// Create a ring of `slot_count` buffers, each `slot_size` bytes long
    pub fn new(slot_count: usize, slot_size: usize) -> Self {
        let slot_count = slot_count.max(1);
        PacketRing {
            slots: Self::allocate(slot_count, slot_size),
            slot_size,
            cursor: 0,
            stats: RingStats::default(),
        }
    }

    fn allocate(slot_count: usize, slot_size: usize) -> Vec<Packet> {
        (0..slot_count)
            .map(|_| Packet {
                inner: Arc::new(PacketData::new(slot_size)),
            })
            .collect()
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Size of each slot in bytes
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Number of slots currently referenced outside the ring
    pub fn in_use(&self) -> usize {
        self.slots.iter().filter(|slot| slot.ref_count() > 0).count()
    }

    /// Ring statistics
    pub fn stats(&self) -> &RingStats {
        &self.stats
    }

    /// Find the next slot with no outstanding references, starting at the
    /// cursor. Reallocates the whole ring when every slot is busy.
    fn next_free_index(&mut self) -> usize {
        let count = self.slots.len();
        for step in 0..count {
            let index = (self.cursor + step) % count;
            if self.slots[index].ref_count() == 0 {
                return index;
            }
            self.stats.busy_skips += 1;
        }

        // Outstanding handles keep the old buffers alive until they drop
        warn!(
            slots = count,
            "every receive ring slot is still referenced, reallocating ring"
        );
        self.slots = Self::allocate(count, self.slot_size);
        self.stats.reallocations += 1;
        0
    }

    /// Fill the next free slot with `recv` and hand it out as a `Packet`
    ///
    /// `recv` is given the whole slot and returns the number of bytes it
    /// wrote. On error the slot stays free and the cursor does not move.
    pub fn receive<F, E>(&mut self, recv: F) -> Result<Packet, E>
    where
        F: FnOnce(&mut [u8]) -> Result<usize, E>,
    {
        let index = self.next_free_index();

        // Unique at this point, so make_mut never clones
        let slot = Arc::make_mut(&mut self.slots[index].inner);
        let len = recv(&mut slot.buf)?;
        slot.len = len.min(slot.buf.len());
        slot.received_at = Instant::now();

        self.cursor = (index + 1) % self.slots.len();
        self.stats.packets_received += 1;
        Ok(self.slots[index].clone())
    }
}
