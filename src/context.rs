use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};

use crate::channel::{Channel, ChannelShared};
use crate::critical::{CriticalSection, PriorityBoost};
use crate::descriptor::{Descriptor, DescriptorIndex};
use crate::limits::DmaLimits;
use crate::pool::DescriptorPool;
use crate::registry::SocketRegistry;
use crate::socket::{SocketId, SocketInterrupt, SocketRegisters};

/// One DMA engine: the descriptor pool, socket ownership and the socket
/// registers every channel on it shares.
pub struct DmaContext {
    limits: DmaLimits,
    pool: Mutex<DescriptorPool>,
    registry: Mutex<SocketRegistry<Weak<ChannelShared>>>,
    sockets: Arc<dyn SocketRegisters>,
    critical: Box<dyn CriticalSection>,
    next_id: AtomicU32,
}

impl fmt::Debug for DmaContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pool = self.pool.lock();
        writeln!(f, "DmaContext")?;
        writeln!(f, "  descriptors: {}", pool.capacity())?;
        writeln!(f, "  free: {}", pool.free_count())?;
        write!(f, "  buffers: {}", pool.buffer_count())
    }
}

impl DmaContext {
    pub fn new(limits: DmaLimits, sockets: Arc<dyn SocketRegisters>) -> Arc<DmaContext> {
        DmaContext::with_critical_section(limits, sockets, Box::new(PriorityBoost::default()))
    }

    pub fn with_critical_section(
        limits: DmaLimits,
        sockets: Arc<dyn SocketRegisters>,
        critical: Box<dyn CriticalSection>,
    ) -> Arc<DmaContext> {
        let pool = DescriptorPool::new(limits.descriptor_count, limits.alignment);
        let registry = SocketRegistry::new(&limits);
        Arc::new(DmaContext {
            limits,
            pool: Mutex::new(pool),
            registry: Mutex::new(registry),
            sockets,
            critical,
            next_id: AtomicU32::new(1),
        })
    }

    pub fn limits(&self) -> &DmaLimits {
        &self.limits
    }

    pub fn free_descriptors(&self) -> usize {
        self.pool.lock().free_count()
    }

    /// Number of live buffer allocations in the pool.
    pub fn allocated_buffers(&self) -> usize {
        self.pool.lock().buffer_count()
    }

    pub fn descriptor(&self, index: DescriptorIndex) -> Descriptor {
        self.pool.lock().get(index)
    }

    pub fn set_descriptor(&self, index: DescriptorIndex, descriptor: Descriptor) {
        self.pool.lock().set(index, descriptor)
    }

    pub fn socket_owned(&self, socket: SocketId) -> bool {
        self.registry.lock().is_owned(socket)
    }

    /// Deliver a socket interrupt to the channel that owns `socket`.
    ///
    /// This is the servicing-thread entry point; the raw interrupt handler
    /// only records the interrupt and defers here. Interrupts for unowned
    /// sockets are dropped.
    pub fn on_socket_interrupt(&self, socket: SocketId, interrupt: SocketInterrupt) {
        let owner = self.registry.lock().owner(socket).and_then(Weak::upgrade);
        match owner {
            Some(shared) => Channel { shared }.service(socket, interrupt),
            None => log::trace!("{:?} on unowned socket {:?}", interrupt, socket),
        }
    }

    pub(crate) fn pool(&self) -> MutexGuard<'_, DescriptorPool> {
        self.pool.lock()
    }

    pub(crate) fn registry(&self) -> MutexGuard<'_, SocketRegistry<Weak<ChannelShared>>> {
        self.registry.lock()
    }

    pub(crate) fn sockets(&self) -> &dyn SocketRegisters {
        &*self.sockets
    }

    pub(crate) fn run_critical(&self, f: &mut dyn FnMut()) {
        self.critical.run(f)
    }

    pub(crate) fn next_channel_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}
