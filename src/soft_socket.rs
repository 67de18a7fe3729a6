//! Socket bank emulated in software
//!
//! [`SoftSocketBank`] implements [`SocketRegisters`] in memory and moves data
//! through descriptors the way socket hardware would. Hardware sockets are
//! driven by calling [`produce`](SoftSocketBank::produce) and
//! [`consume`](SoftSocketBank::consume). Interrupts are delivered through
//! [`DmaContext::on_socket_interrupt`] after the bank's lock is released.

use std::collections::HashMap;
use std::fmt;
use std::ptr;

use parking_lot::Mutex;

use crate::context::DmaContext;
use crate::descriptor::{BufferStatus, DescriptorIndex, DescriptorSize, Link, SyncFlags};
use crate::socket::{
    SocketConfig, SocketId, SocketInterrupt, SocketInterrupts, SocketRegisters, SocketStatus,
    SuspendPolicy,
};

/// A `send_event` call seen by the bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentEvent {
    pub socket: SocketId,
    pub descriptor: DescriptorIndex,
    pub producer_event: bool,
}

/// A buffer drained by [`SoftSocketBank::consume`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consumed {
    pub descriptor: DescriptorIndex,
    pub data: Vec<u8>,
    pub status: BufferStatus,
}

#[derive(Debug, Default, Clone)]
struct SoftSocket {
    config: SocketConfig,
    suspend: SuspendPolicy,
    // Software released the buffer the consumer suspended at.
    released: bool,
}

impl SoftSocket {
    fn is_running(&self) -> bool {
        self.config.status.contains(SocketStatus::ENABLED)
            && !self.config.status.contains(SocketStatus::SUSPENDED)
    }

    fn raise(
        &mut self,
        interrupt: SocketInterrupts,
        pending: &mut Vec<SocketInterrupt>,
        event: SocketInterrupt,
    ) {
        self.config.interrupts |= interrupt;
        if self.config.interrupt_mask.contains(interrupt) {
            pending.push(event);
        }
    }

    fn suspend(&mut self, interrupt: SocketInterrupts, pending: &mut Vec<SocketInterrupt>) {
        self.config.status |= SocketStatus::SUSPENDED;
        self.raise(interrupt, pending, SocketInterrupt::Suspended);
    }

    /// Count `bytes` towards the transfer and stop once it is complete.
    fn account(&mut self, bytes: u32, pending: &mut Vec<SocketInterrupt>) {
        let config = &mut self.config;
        config.transfer_count += if config.status.contains(SocketStatus::UNIT_BUFFER) {
            1
        } else {
            bytes
        };
        if config.status.contains(SocketStatus::TRUNCATE)
            && config.transfer_size != 0
            && config.transfer_count >= config.transfer_size
        {
            config.status.remove(SocketStatus::ENABLED);
            self.raise(SocketInterrupts::TRANSFER_DONE, pending, SocketInterrupt::TransferDone);
        }
    }
}

#[derive(Default)]
struct BankState {
    sockets: HashMap<SocketId, SoftSocket>,
    sent: Vec<SentEvent>,
}

/// In-memory socket registers.
#[derive(Default)]
pub struct SoftSocketBank {
    state: Mutex<BankState>,
}

impl fmt::Debug for SoftSocketBank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        writeln!(f, "SoftSocketBank")?;
        writeln!(f, "  sockets: {}", state.sockets.len())?;
        write!(f, "  sent events: {}", state.sent.len())
    }
}

impl SoftSocketBank {
    pub fn new() -> SoftSocketBank {
        SoftSocketBank::default()
    }

    pub fn suspend_policy(&self, socket: SocketId) -> SuspendPolicy {
        self.state
            .lock()
            .sockets
            .get(&socket)
            .map(|s| s.suspend)
            .unwrap_or_default()
    }

    /// Every `send_event` call so far.
    pub fn sent_events(&self) -> Vec<SentEvent> {
        self.state.lock().sent.clone()
    }

    /// Drain the `send_event` log.
    pub fn take_events(&self) -> Vec<SentEvent> {
        std::mem::take(&mut self.state.lock().sent)
    }

    /// Produce `data` into the descriptor at the head of `socket`.
    ///
    /// Returns the descriptor written, or `None` if the socket is stopped,
    /// suspended, throttled or has no free descriptor.
    pub fn produce(
        &self,
        ctx: &DmaContext,
        socket: SocketId,
        data: &[u8],
        end_of_packet: bool,
    ) -> Option<DescriptorIndex> {
        let mut pending = Vec::new();
        let index = {
            let mut state = self.state.lock();
            let sock = state.sockets.get_mut(&socket)?;
            if !sock.is_running() {
                return None;
            }
            let index = sock.config.descriptor_head?;
            let mut descriptor = ctx.descriptor(index);
            if descriptor.size.is_occupied() {
                return None;
            }
            let threshold = sock.config.avail_count;
            if sock.config.status.contains(SocketStatus::AVAIL_ENABLE)
                && free_ahead(ctx, index, threshold) < usize::from(threshold)
            {
                return None;
            }

            let len = data.len().min(descriptor.size.capacity as usize);
            // SAFETY: descriptor buffers point at pool memory of at least
            // `capacity` bytes, owned by the producer while unoccupied.
            unsafe { ptr::copy_nonoverlapping(data.as_ptr(), descriptor.buffer as *mut u8, len) };

            let wrap_up = sock.config.status.contains(SocketStatus::WRAPUP);
            sock.config.status.remove(SocketStatus::WRAPUP);
            let mut status = BufferStatus::OCCUPIED;
            if end_of_packet || wrap_up {
                status |= BufferStatus::END_OF_PACKET;
            }
            descriptor.size.count = len as u32;
            descriptor.size.status = status;
            ctx.set_descriptor(index, descriptor);
            sock.config.descriptor_head = Some(descriptor.chain.next(Link::Write));

            if descriptor.sync.flags.contains(SyncFlags::PRODUCER_INTERRUPT) {
                sock.config.interrupts |= SocketInterrupts::PRODUCE_EVENT;
                pending.push(SocketInterrupt::Produced(index));
            }
            sock.account(len as u32, &mut pending);

            let suspend = match sock.suspend {
                SuspendPolicy::CurrentBuffer => true,
                SuspendPolicy::EndOfPacket => status.contains(BufferStatus::END_OF_PACKET),
                _ => false,
            };
            if suspend && sock.config.status.contains(SocketStatus::ENABLED) {
                sock.suspend(SocketInterrupts::SUSPEND, &mut pending);
            }
            index
        };
        log::trace!("{:?} produced {} bytes into {:?}", socket, data.len(), index);
        dispatch(ctx, socket, pending);
        Some(index)
    }

    /// Drain the descriptor at the head of `socket`.
    ///
    /// Returns `None` if the socket is stopped or suspended, has nothing to
    /// drain, suspended on this buffer or stalled on a drop marker.
    pub fn consume(&self, ctx: &DmaContext, socket: SocketId) -> Option<Consumed> {
        let mut pending = Vec::new();
        let consumed = {
            let mut state = self.state.lock();
            let sock = state.sockets.get_mut(&socket)?;
            if !sock.is_running() {
                return None;
            }
            let index = sock.config.descriptor_head?;
            let mut descriptor = ctx.descriptor(index);
            if !descriptor.size.is_occupied() {
                return None;
            }
            let status = descriptor.size.status;

            if status.contains(BufferStatus::MARKER)
                && sock.config.interrupt_mask.contains(SocketInterrupts::STALL)
            {
                sock.raise(SocketInterrupts::STALL, &mut pending, SocketInterrupt::Stall);
                drop(state);
                dispatch(ctx, socket, pending);
                return None;
            }

            let released = std::mem::take(&mut sock.released);
            if !released {
                let hold = match sock.suspend {
                    SuspendPolicy::EndOfPacket => status.contains(BufferStatus::END_OF_PACKET),
                    SuspendPolicy::PartialBuffer => {
                        descriptor.size.count < descriptor.size.capacity
                    }
                    _ => false,
                };
                if hold {
                    let interrupt = if sock.suspend == SuspendPolicy::PartialBuffer {
                        SocketInterrupts::PARTIAL_BUFFER
                    } else {
                        SocketInterrupts::SUSPEND
                    };
                    sock.config.status |= SocketStatus::SUSPENDED;
                    sock.config.interrupts |= interrupt;
                    if sock.config.interrupt_mask.contains(SocketInterrupts::SUSPEND) {
                        pending.push(SocketInterrupt::Suspended);
                    }
                    drop(state);
                    dispatch(ctx, socket, pending);
                    return None;
                }
            }

            let len = descriptor.size.count.min(descriptor.size.capacity) as usize;
            let mut data = vec![0; len];
            // SAFETY: an occupied descriptor's buffer holds `count` valid
            // bytes owned by the consumer until released.
            unsafe {
                ptr::copy_nonoverlapping(descriptor.buffer as *const u8, data.as_mut_ptr(), len)
            };

            descriptor.size = DescriptorSize::empty(descriptor.size.capacity);
            ctx.set_descriptor(index, descriptor);
            sock.config.descriptor_head = Some(descriptor.chain.next(Link::Read));

            if descriptor.sync.flags.contains(SyncFlags::CONSUMER_INTERRUPT) {
                sock.config.interrupts |= SocketInterrupts::CONSUME_EVENT;
                pending.push(SocketInterrupt::Consumed(index));
            }
            sock.account(len as u32, &mut pending);
            if sock.suspend == SuspendPolicy::CurrentBuffer
                && sock.config.status.contains(SocketStatus::ENABLED)
            {
                sock.suspend(SocketInterrupts::SUSPEND, &mut pending);
            }
            Consumed {
                descriptor: index,
                data,
                status: status - BufferStatus::OCCUPIED,
            }
        };
        log::trace!(
            "{:?} consumed {} bytes from {:?}",
            socket,
            consumed.data.len(),
            consumed.descriptor
        );
        dispatch(ctx, socket, pending);
        Some(consumed)
    }

    /// Flag a socket error.
    pub fn raise_error(&self, ctx: &DmaContext, socket: SocketId) {
        let mut pending = Vec::new();
        {
            let mut state = self.state.lock();
            let sock = state.sockets.entry(socket).or_default();
            sock.config.status.remove(SocketStatus::ENABLED);
            sock.raise(SocketInterrupts::ERROR, &mut pending, SocketInterrupt::Error);
        }
        dispatch(ctx, socket, pending);
    }
}

/// Free descriptors on the write chain starting at `head`, counting at most
/// `limit`.
fn free_ahead(ctx: &DmaContext, head: DescriptorIndex, limit: u16) -> usize {
    let mut free = 0;
    let mut index = head;
    for _ in 0..limit {
        let descriptor = ctx.descriptor(index);
        if descriptor.size.is_occupied() {
            break;
        }
        free += 1;
        index = descriptor.chain.next(Link::Write);
        if index == head {
            break;
        }
    }
    free
}

fn dispatch(ctx: &DmaContext, socket: SocketId, pending: Vec<SocketInterrupt>) {
    for interrupt in pending {
        ctx.on_socket_interrupt(socket, interrupt);
    }
}

impl SocketRegisters for SoftSocketBank {
    fn get_config(&self, socket: SocketId) -> SocketConfig {
        self.state
            .lock()
            .sockets
            .get(&socket)
            .map(|s| s.config)
            .unwrap_or_default()
    }

    fn set_config(&self, socket: SocketId, config: &SocketConfig) {
        self.state.lock().sockets.entry(socket).or_default().config = *config;
    }

    fn enable(&self, socket: SocketId) {
        let mut state = self.state.lock();
        let sock = state.sockets.entry(socket).or_default();
        sock.config.status |= SocketStatus::ENABLED;
        sock.config.status.remove(SocketStatus::SUSPENDED);
        sock.released = false;
    }

    fn disable(&self, socket: SocketId) {
        let mut state = self.state.lock();
        let sock = state.sockets.entry(socket).or_default();
        sock.config.status.remove(SocketStatus::ENABLED | SocketStatus::SUSPENDED);
    }

    fn send_event(&self, socket: SocketId, descriptor: DescriptorIndex, producer_event: bool) {
        let mut state = self.state.lock();
        if let Some(sock) = state.sockets.get_mut(&socket) {
            // A buffer committed at a suspended consumer releases it.
            if producer_event
                && sock.config.status.contains(SocketStatus::SUSPENDED)
                && sock.config.descriptor_head == Some(descriptor)
            {
                sock.config.status.remove(SocketStatus::SUSPENDED);
                sock.released = true;
            }
        }
        state.sent.push(SentEvent {
            socket,
            descriptor,
            producer_event,
        });
    }

    fn set_suspend_option(&self, socket: SocketId, policy: SuspendPolicy) {
        self.state.lock().sockets.entry(socket).or_default().suspend = policy;
    }

    fn resume(&self, socket: SocketId, policy: SuspendPolicy) {
        let mut state = self.state.lock();
        let sock = state.sockets.entry(socket).or_default();
        sock.suspend = policy;
        sock.config.status.remove(SocketStatus::SUSPENDED);
        sock.config.interrupts.remove(
            SocketInterrupts::SUSPEND | SocketInterrupts::PARTIAL_BUFFER | SocketInterrupts::STALL,
        );
        sock.released = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::critical::NoBoost;
    use crate::descriptor::{ChainLinks, Descriptor, SyncWord};
    use crate::limits::DmaLimits;
    use crate::socket::Ip;
    use std::sync::Arc;

    fn setup() -> (Arc<SoftSocketBank>, Arc<DmaContext>) {
        let bank = Arc::new(SoftSocketBank::new());
        let ctx = DmaContext::with_critical_section(
            DmaLimits::default(),
            bank.clone(),
            Box::new(NoBoost),
        );
        (bank, ctx)
    }

    /// A two-descriptor ring on freshly allocated buffers.
    fn ring(ctx: &DmaContext, socket: SocketId) -> (DescriptorIndex, DescriptorIndex) {
        let mut pool = ctx.pool();
        let a = pool.alloc_one().unwrap();
        let b = pool.alloc_one().unwrap();
        for (index, next) in [(a, b), (b, a)] {
            let buffer = pool.alloc_buffer(64).unwrap();
            pool.set(
                index,
                Descriptor {
                    buffer,
                    sync: SyncWord::new(socket, SocketId::CPU_CONSUMER, SyncFlags::empty()),
                    chain: ChainLinks::both(next),
                    size: DescriptorSize::empty(64),
                },
            );
        }
        (a, b)
    }

    fn start(
        bank: &SoftSocketBank,
        socket: SocketId,
        head: DescriptorIndex,
        status: SocketStatus,
        size: u32,
    ) {
        bank.set_config(
            socket,
            &SocketConfig {
                descriptor_head: Some(head),
                transfer_size: size,
                status,
                ..SocketConfig::default()
            },
        );
        bank.enable(socket);
    }

    #[test]
    fn produce_then_consume() {
        let (bank, ctx) = setup();
        let socket = SocketId::new(Ip::Gpif, 0);
        let (a, b) = ring(&ctx, socket);
        start(&bank, socket, a, SocketStatus::GO_ENABLE, 0);

        assert_eq!(bank.produce(&ctx, socket, b"hello", true), Some(a));
        assert_eq!(bank.produce(&ctx, socket, b"world", false), Some(b));
        // Ring is full.
        assert_eq!(bank.produce(&ctx, socket, b"!", false), None);

        let consumer = SocketId::new(Ip::UsbIngress, 0);
        start(&bank, consumer, a, SocketStatus::GO_ENABLE, 0);
        let first = bank.consume(&ctx, consumer).unwrap();
        assert_eq!(first.data, b"hello");
        assert_eq!(first.status, BufferStatus::END_OF_PACKET);
        assert_eq!(bank.consume(&ctx, consumer).unwrap().data, b"world");
        assert!(bank.consume(&ctx, consumer).is_none());
    }

    #[test]
    fn truncated_transfer_stops() {
        let (bank, ctx) = setup();
        let socket = SocketId::new(Ip::Gpif, 1);
        let (a, _) = ring(&ctx, socket);
        start(
            &bank,
            socket,
            a,
            SocketStatus::GO_ENABLE | SocketStatus::TRUNCATE | SocketStatus::UNIT_BUFFER,
            1,
        );
        assert!(bank.produce(&ctx, socket, &[1; 8], false).is_some());
        let config = bank.get_config(socket);
        assert_eq!(config.transfer_count, 1);
        assert!(!config.status.contains(SocketStatus::ENABLED));
        assert!(config.interrupts.contains(SocketInterrupts::TRANSFER_DONE));
        assert!(bank.produce(&ctx, socket, &[1; 8], false).is_none());
    }

    #[test]
    fn end_of_packet_suspends_producer() {
        let (bank, ctx) = setup();
        let socket = SocketId::new(Ip::Gpif, 2);
        let (a, _) = ring(&ctx, socket);
        start(&bank, socket, a, SocketStatus::GO_ENABLE, 0);
        bank.set_suspend_option(socket, SuspendPolicy::EndOfPacket);

        assert!(bank.produce(&ctx, socket, &[0; 4], true).is_some());
        assert!(bank.get_config(socket).status.contains(SocketStatus::SUSPENDED));
        assert!(bank.produce(&ctx, socket, &[0; 4], false).is_none());

        bank.resume(socket, SuspendPolicy::None);
        assert!(bank.produce(&ctx, socket, &[0; 4], false).is_some());
    }

    #[test]
    fn event_log() {
        let (bank, _ctx) = setup();
        let socket = SocketId::new(Ip::Storage, 0);
        bank.send_event(socket, DescriptorIndex::new(3), true);
        assert_eq!(bank.sent_events().len(), 1);
        let events = bank.take_events();
        assert_eq!(
            events,
            vec![SentEvent {
                socket,
                descriptor: DescriptorIndex::new(3),
                producer_event: true
            }]
        );
        assert!(bank.sent_events().is_empty());
    }
}
