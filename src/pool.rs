//! Descriptor arena and buffer memory

use std::collections::HashMap;
use std::fmt;

use crate::descriptor::{ChainLinks, Descriptor, DescriptorIndex, DescriptorSize, Link, SyncWord};
use crate::dma_buffer::DmaBuffer;
use crate::{Error, Result};

struct Slot {
    descriptor: Descriptor,
    in_use: bool,
}

/// Fixed set of hardware descriptor slots plus the buffer memory they point at.
pub struct DescriptorPool {
    slots: Vec<Slot>,
    free: Vec<DescriptorIndex>,
    buffers: HashMap<usize, DmaBuffer>,
    alignment: usize,
}

impl fmt::Debug for DescriptorPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "DescriptorPool")?;
        writeln!(f, "  slots: {}", self.slots.len())?;
        writeln!(f, "  free: {}", self.free.len())?;
        write!(f, "  buffers: {}", self.buffers.len())
    }
}

impl DescriptorPool {
    pub fn new(count: u16, alignment: u32) -> DescriptorPool {
        let slots = (0..count)
            .map(|i| Slot {
                descriptor: Descriptor::unlinked(DescriptorIndex::new(i)),
                in_use: false,
            })
            .collect();
        // Hand out low indices first.
        let free = (0..count).rev().map(DescriptorIndex::new).collect();
        DescriptorPool {
            slots,
            free,
            buffers: HashMap::new(),
            alignment: alignment as usize,
        }
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_allocated(&self, index: DescriptorIndex) -> bool {
        self.slots
            .get(index.slot())
            .map(|s| s.in_use)
            .unwrap_or(false)
    }

    /// Read a descriptor.
    ///
    /// # Panics
    ///
    /// Panics if `index` is outside the pool.
    pub fn get(&self, index: DescriptorIndex) -> Descriptor {
        self.slots[index.slot()].descriptor
    }

    pub fn set(&mut self, index: DescriptorIndex, descriptor: Descriptor) {
        self.slots[index.slot()].descriptor = descriptor;
    }

    pub fn alloc_one(&mut self) -> Result<DescriptorIndex> {
        let index = self.free.pop().ok_or(Error::MemoryError)?;
        let slot = &mut self.slots[index.slot()];
        slot.in_use = true;
        slot.descriptor = Descriptor::unlinked(index);
        Ok(index)
    }

    pub fn free_one(&mut self, index: DescriptorIndex) {
        let slot = &mut self.slots[index.slot()];
        if !slot.in_use {
            log::warn!("descriptor {:?} freed twice", index);
            return;
        }
        slot.in_use = false;
        slot.descriptor = Descriptor::unlinked(index);
        self.free.push(index);
    }

    /// Allocate zeroed buffer memory and return its address.
    pub fn alloc_buffer(&mut self, size: u32) -> Result<usize> {
        let buffer = DmaBuffer::new(size as usize, self.alignment)?;
        let addr = buffer.addr();
        self.buffers.insert(addr, buffer);
        Ok(addr)
    }

    pub fn free_buffer(&mut self, addr: usize) {
        if self.buffers.remove(&addr).is_none() {
            log::warn!("no DMA buffer at {:#x}", addr);
        }
    }

    /// Allocate `count` descriptors linked into a ring in both directions.
    ///
    /// A non-zero `buffer_size` also gives each descriptor its own buffer.
    /// Nothing stays allocated on failure.
    pub fn alloc_chain(
        &mut self,
        count: u16,
        buffer_size: u32,
        sync: SyncWord,
    ) -> Result<DescriptorIndex> {
        if count == 0 {
            return Err(Error::BadArgument("empty descriptor chain"));
        }
        if self.free.len() < count as usize {
            return Err(Error::MemoryError);
        }
        let mut chain: Vec<DescriptorIndex> = Vec::with_capacity(count as usize);
        for _ in 0..count {
            chain.push(self.alloc_one()?);
        }
        for (i, &index) in chain.iter().enumerate() {
            let buffer = if buffer_size != 0 {
                match self.alloc_buffer(buffer_size) {
                    Ok(addr) => addr,
                    Err(e) => {
                        for &allocated in &chain[..i] {
                            let addr = self.get(allocated).buffer;
                            self.free_buffer(addr);
                        }
                        for &allocated in &chain {
                            self.free_one(allocated);
                        }
                        return Err(e);
                    }
                }
            } else {
                0
            };
            let next = chain[(i + 1) % chain.len()];
            self.set(
                index,
                Descriptor {
                    buffer,
                    sync,
                    chain: ChainLinks::both(next),
                    size: DescriptorSize::empty(buffer_size),
                },
            );
        }
        Ok(chain[0])
    }

    /// Release a chain allocated with [`alloc_chain`](Self::alloc_chain),
    /// following write links from `first`.
    pub fn free_chain(&mut self, first: DescriptorIndex, count: u16, free_buffers: bool) {
        let chain: Vec<DescriptorIndex> = self
            .chain(first, Link::Write)
            .take(count as usize)
            .collect();
        for index in chain {
            if free_buffers {
                let addr = self.get(index).buffer;
                if addr != 0 {
                    self.free_buffer(addr);
                }
            }
            self.free_one(index);
        }
    }

    /// Walk a chain starting at `first` until it loops back.
    pub fn chain(&self, first: DescriptorIndex, link: Link) -> ChainIter<'_> {
        ChainIter {
            pool: self,
            first,
            next: Some(first),
            link,
            remaining: self.slots.len(),
        }
    }
}

/// Iterator over the descriptors of one ring.
pub struct ChainIter<'a> {
    pool: &'a DescriptorPool,
    first: DescriptorIndex,
    next: Option<DescriptorIndex>,
    link: Link,
    // A malformed chain that never returns to `first` stops after visiting
    // every slot once.
    remaining: usize,
}

impl Iterator for ChainIter<'_> {
    type Item = DescriptorIndex;

    fn next(&mut self) -> Option<DescriptorIndex> {
        let current = self.next?;
        if self.remaining == 0 {
            self.next = None;
            return None;
        }
        self.remaining -= 1;
        let following = self.pool.get(current).chain.next(self.link);
        self.next = if following == self.first {
            None
        } else {
            Some(following)
        };
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::SyncFlags;
    use crate::socket::{Ip, SocketId};

    fn sync() -> SyncWord {
        SyncWord::new(
            SocketId::new(Ip::UsbIngress, 1),
            SocketId::new(Ip::UsbEgress, 1),
            SyncFlags::empty(),
        )
    }

    #[test]
    fn chain_is_a_ring() {
        let mut pool = DescriptorPool::new(16, 16);
        let first = pool.alloc_chain(5, 64, sync()).unwrap();
        assert_eq!(pool.free_count(), 11);
        assert_eq!(pool.buffer_count(), 5);

        let ring: Vec<_> = pool.chain(first, Link::Write).collect();
        assert_eq!(ring.len(), 5);
        assert_eq!(ring[0], first);
        let last = *ring.last().unwrap();
        assert_eq!(pool.get(last).chain.read_next, first);
        for index in &ring {
            let d = pool.get(*index);
            assert_ne!(d.buffer, 0);
            assert_eq!(d.size.capacity, 64);
            assert!(!d.size.is_occupied());
        }
    }

    #[test]
    fn free_chain_returns_everything() {
        let mut pool = DescriptorPool::new(64, 16);
        for _ in 0..20 {
            let count = fastrand::u16(1..16);
            let size = fastrand::u32(1..64) * 16;
            let with_buffers = fastrand::bool();
            let first = pool
                .alloc_chain(count, if with_buffers { size } else { 0 }, sync())
                .unwrap();
            assert_eq!(pool.free_count(), 64 - count as usize);
            pool.free_chain(first, count, with_buffers);
            assert_eq!(pool.free_count(), 64);
            assert_eq!(pool.buffer_count(), 0);
        }
    }

    #[test]
    fn exhausted_pool() {
        let mut pool = DescriptorPool::new(4, 16);
        assert_eq!(pool.alloc_chain(5, 0, sync()), Err(Error::MemoryError));
        assert_eq!(pool.free_count(), 4);
        let first = pool.alloc_chain(4, 0, sync()).unwrap();
        assert_eq!(pool.alloc_one(), Err(Error::MemoryError));
        pool.free_chain(first, 4, false);
        assert!(pool.alloc_one().is_ok());
    }

    #[test]
    fn double_free_is_ignored() {
        let mut pool = DescriptorPool::new(4, 16);
        let index = pool.alloc_one().unwrap();
        assert!(pool.is_allocated(index));
        pool.free_one(index);
        assert!(!pool.is_allocated(index));
        pool.free_one(index);
        assert_eq!(pool.free_count(), 4);
    }
}
