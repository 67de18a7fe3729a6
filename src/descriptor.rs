use std::fmt;

use bitflags::bitflags;

use crate::socket::SocketId;

// Packed size word, as the hardware stores it:
// bits 0..=11 capacity in 16-byte units, bits 12..=27 valid byte count,
// bits 28..=31 status.
const CAPACITY_SHIFT: u32 = 0;
const CAPACITY_MASK: u32 = 0xFFF;
const CAPACITY_UNIT: u32 = 16;
const COUNT_SHIFT: u32 = 12;
const COUNT_MASK: u32 = 0xFFFF;
const STATUS_SHIFT: u32 = 28;
const STATUS_MASK: u32 = 0xF;

/// Index of a descriptor slot in the [`DescriptorPool`](crate::DescriptorPool).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorIndex(u16);

impl DescriptorIndex {
    pub const fn new(index: u16) -> DescriptorIndex {
        DescriptorIndex(index)
    }

    pub const fn get(self) -> u16 {
        self.0
    }

    pub(crate) const fn slot(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for DescriptorIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "D{}", self.0)
    }
}

bitflags! {
    /// Status bits of a descriptor's buffer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BufferStatus: u16 {
        /// The buffer holds data not yet consumed.
        const OCCUPIED = 1 << 0;
        const END_OF_PACKET = 1 << 1;
        /// Drop marker: the consumer skips this buffer.
        const MARKER = 1 << 2;
        const ERROR = 1 << 3;
    }
}

impl BufferStatus {
    /// Bits software may set when committing a buffer.
    pub const WRITE_MASK: BufferStatus = BufferStatus::END_OF_PACKET.union(BufferStatus::MARKER);
}

/// Capacity, valid byte count and status of a descriptor's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DescriptorSize {
    pub capacity: u32,
    pub count: u32,
    pub status: BufferStatus,
}

impl DescriptorSize {
    pub fn empty(capacity: u32) -> DescriptorSize {
        DescriptorSize {
            capacity,
            count: 0,
            status: BufferStatus::empty(),
        }
    }

    pub fn is_occupied(&self) -> bool {
        self.status.contains(BufferStatus::OCCUPIED)
    }

    /// Encode into the hardware size word.
    ///
    /// The capacity is rounded up to the 16-byte unit the hardware counts in.
    pub fn to_packed(self) -> u32 {
        let units = self.capacity.div_ceil(CAPACITY_UNIT) & CAPACITY_MASK;
        (units << CAPACITY_SHIFT)
            | ((self.count & COUNT_MASK) << COUNT_SHIFT)
            | ((u32::from(self.status.bits()) & STATUS_MASK) << STATUS_SHIFT)
    }

    pub fn from_packed(word: u32) -> DescriptorSize {
        DescriptorSize {
            capacity: ((word >> CAPACITY_SHIFT) & CAPACITY_MASK) * CAPACITY_UNIT,
            count: (word >> COUNT_SHIFT) & COUNT_MASK,
            status: BufferStatus::from_bits_truncate(((word >> STATUS_SHIFT) & STATUS_MASK) as u16),
        }
    }
}

bitflags! {
    /// Which hand-offs on a descriptor interrupt the CPU.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SyncFlags: u8 {
        /// Interrupt when a buffer is produced into this descriptor.
        const PRODUCER_INTERRUPT = 1 << 0;
        /// Interrupt when a buffer is consumed from this descriptor.
        const CONSUMER_INTERRUPT = 1 << 1;
    }
}

/// The producer/consumer pair a descriptor is wired between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncWord {
    pub producer: SocketId,
    pub consumer: SocketId,
    pub flags: SyncFlags,
}

impl SyncWord {
    pub fn new(producer: SocketId, consumer: SocketId, flags: SyncFlags) -> SyncWord {
        SyncWord {
            producer,
            consumer,
            flags,
        }
    }
}

impl Default for SyncWord {
    fn default() -> Self {
        SyncWord::new(
            SocketId::CPU_PRODUCER,
            SocketId::CPU_CONSUMER,
            SyncFlags::empty(),
        )
    }
}

/// Which of a descriptor's two next-links to follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    /// The consumer side's next descriptor.
    Read,
    /// The producer side's next descriptor.
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainLinks {
    pub read_next: DescriptorIndex,
    pub write_next: DescriptorIndex,
}

impl ChainLinks {
    pub fn both(next: DescriptorIndex) -> ChainLinks {
        ChainLinks {
            read_next: next,
            write_next: next,
        }
    }

    pub fn next(&self, link: Link) -> DescriptorIndex {
        match link {
            Link::Read => self.read_next,
            Link::Write => self.write_next,
        }
    }
}

/// One hardware descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    /// Address of the first usable byte of the buffer.
    pub buffer: usize,
    pub sync: SyncWord,
    pub chain: ChainLinks,
    pub size: DescriptorSize,
}

impl Descriptor {
    /// A free descriptor linked to itself.
    pub fn unlinked(index: DescriptorIndex) -> Descriptor {
        Descriptor {
            buffer: 0,
            sync: SyncWord::default(),
            chain: ChainLinks::both(index),
            size: DescriptorSize::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_size_word() {
        let size = DescriptorSize {
            capacity: 0xFFF0,
            count: 1234,
            status: BufferStatus::OCCUPIED | BufferStatus::END_OF_PACKET,
        };
        let word = size.to_packed();
        assert_eq!(word & 0xFFF, 0xFFF);
        assert_eq!((word >> 12) & 0xFFFF, 1234);
        assert_eq!(word >> 28, 0b0011);
        assert_eq!(DescriptorSize::from_packed(word), size);
    }

    #[test]
    fn packed_capacity_rounds_up() {
        let size = DescriptorSize::empty(1000);
        assert_eq!(DescriptorSize::from_packed(size.to_packed()).capacity, 1008);
    }

    #[test]
    fn write_mask_excludes_occupied() {
        assert!(!BufferStatus::WRITE_MASK.contains(BufferStatus::OCCUPIED));
        assert!(BufferStatus::WRITE_MASK.contains(BufferStatus::MARKER));
    }
}
