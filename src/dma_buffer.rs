use std::alloc::{self, Layout};
use std::fmt;
use std::mem;
use std::ptr::NonNull;
use std::slice;
use std::sync::atomic::{fence, Ordering};

use crate::Error;

/// Buffer memory backing one descriptor slot.
///
/// The memory is zeroed, aligned to the DMA alignment unit and stays at a
/// fixed address until dropped, so its address can be handed to hardware.
pub struct DmaBuffer {
    size: usize,
    layout: Layout,
    buffer: NonNull<u8>,
}

impl fmt::Debug for DmaBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "DmaBuffer")?;
        writeln!(f, "  size: {:#x?}", &self.size)?;
        writeln!(f, "  addr: {:#x?}", &self.addr())?;
        write!(f, "  align: {:?}", &self.layout.align())
    }
}

impl DmaBuffer {
    pub fn new(size: usize, align: usize) -> Result<DmaBuffer, Error> {
        if size == 0 {
            return Err(Error::BadArgument("zero sized DMA buffer"));
        }
        let layout = Layout::from_size_align(size, align.max(mem::align_of::<u32>()))
            .map_err(|_| Error::BadArgument("DMA buffer alignment"))?;
        // Safety: layout has a non-zero size.
        let buffer = unsafe { alloc::alloc_zeroed(layout) };
        let buffer = NonNull::new(buffer).ok_or(Error::MemoryError)?;
        Ok(DmaBuffer {
            size,
            layout,
            buffer,
        })
    }

    #[allow(clippy::mut_from_ref)]
    pub fn slice<T>(&self) -> &mut [T] {
        unsafe {
            slice::from_raw_parts_mut(
                self.buffer.as_ptr() as *mut T,
                self.size / mem::size_of::<T>(),
            )
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Address handed to descriptors.
    pub fn addr(&self) -> usize {
        self.buffer.as_ptr() as usize
    }

    /// Make hardware writes visible before the CPU reads the buffer.
    pub fn sync_for_cpu() {
        fence(Ordering::Acquire);
    }

    /// Make CPU writes visible before hardware reads the buffer.
    pub fn sync_for_device() {
        fence(Ordering::Release);
    }
}

impl Drop for DmaBuffer {
    fn drop(&mut self) {
        unsafe {
            alloc::dealloc(self.buffer.as_ptr(), self.layout);
        }
    }
}

unsafe impl Send for DmaBuffer {}
unsafe impl Sync for DmaBuffer {}
