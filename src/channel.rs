//! DMA channels
//!
//! A channel binds one or two descriptor chains to a producer/consumer socket
//! pair. Automatic channels let hardware move every buffer socket to socket.
//! Manual channels route each buffer through software, which can inspect,
//! modify, commit or discard it without copying the data.
//!
//! Every mutating call takes the channel lock with the channel's configured
//! [`Wait`]. Blocking calls release the lock while they wait on the
//! channel's event flags so the servicing layer can make progress.

mod control;
mod handoff;
mod wiring;

#[cfg(feature = "async")]
mod channel_async;

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::context::DmaContext;
use crate::descriptor::{BufferStatus, Descriptor, DescriptorIndex, Link};
use crate::event::{ChannelEvents, EventFlags};
use crate::limits::DmaLimits;
use crate::pool::DescriptorPool;
use crate::registry::SocketRegistry;
use crate::socket::{SocketConfig, SocketId, SuspendPolicy};
use crate::{Error, Result, Wait};

/// How a channel's descriptor chains are wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Hardware moves buffers socket to socket.
    Auto,
    /// Like `Auto`, but every produced and consumed buffer interrupts the CPU.
    AutoSignal,
    /// Software gets every produced buffer and commits or discards it.
    Manual,
    /// Hardware producer, software consumer.
    ManualIn,
    /// Software producer, hardware consumer.
    ManualOut,
}

impl ChannelKind {
    pub fn is_auto(self) -> bool {
        matches!(self, ChannelKind::Auto | ChannelKind::AutoSignal)
    }

    /// Whether the producer is a hardware socket.
    pub fn has_producer_socket(self) -> bool {
        self != ChannelKind::ManualOut
    }

    /// Whether the consumer is a hardware socket.
    pub fn has_consumer_socket(self) -> bool {
        self != ChannelKind::ManualIn
    }

    /// Free descriptors a channel of this kind requires at creation.
    fn descriptors_needed(self, count: u16) -> usize {
        let count = count as usize;
        match self {
            ChannelKind::Manual => 4 * count + 1,
            _ => count + 1,
        }
    }
}

/// Channel state.
///
/// `TransferComplete`, `SendComplete` and `RecvComplete` are only reported by
/// [`Channel::status`]: they are `Configured` with a completion pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    NotConfigured,
    Configured,
    Active,
    /// Software is sending an override buffer to the consumer.
    ProducerOverride,
    /// Software is receiving an override buffer from the producer.
    ConsumerOverride,
    Error,
    /// The producer is done but software still holds produced buffers.
    InCompletion,
    Aborted,
    TransferComplete,
    SendComplete,
    RecvComplete,
}

/// Where a transfer ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferMode {
    /// Transfer sizes count buffers.
    #[default]
    Buffer,
    /// Transfer sizes count bytes.
    Byte,
}

/// The two sides of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Producer,
    Consumer,
}

/// A buffer handed between software and the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Buffer {
    pub address: usize,
    /// Valid bytes.
    pub count: u32,
    /// Capacity in bytes.
    pub size: u32,
    pub status: BufferStatus,
}

impl Buffer {
    /// An empty caller-owned buffer, for override transfers.
    pub fn new(address: usize, size: u32) -> Buffer {
        Buffer {
            address,
            count: 0,
            size,
            status: BufferStatus::empty(),
        }
    }

    pub fn with_count(mut self, count: u32) -> Buffer {
        self.count = count;
        self
    }

    pub(crate) fn from_descriptor(d: &Descriptor) -> Buffer {
        Buffer {
            address: d.buffer,
            count: d.size.count,
            size: d.size.capacity,
            status: d.size.status,
        }
    }

    /// The whole buffer.
    ///
    /// # Safety
    ///
    /// `address` must point at `size` bytes of live memory that software
    /// currently owns under the hand-off protocol, and no other reference to
    /// that memory may exist.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn as_mut_slice(&self) -> &mut [u8] {
        std::slice::from_raw_parts_mut(self.address as *mut u8, self.size as usize)
    }

    /// The valid bytes.
    ///
    /// # Safety
    ///
    /// Same as [`as_mut_slice`](Self::as_mut_slice).
    pub unsafe fn data(&self) -> &[u8] {
        std::slice::from_raw_parts(self.address as *const u8, self.count.min(self.size) as usize)
    }
}

/// Event passed to a channel callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackEvent {
    /// A buffer was produced into a CPU-visible descriptor.
    Produced(Buffer),
    /// A buffer was consumed from a CPU-visible descriptor.
    Consumed(Buffer),
    TransferComplete,
    SendComplete,
    RecvComplete,
    Aborted,
    Error,
    ProducerSuspended,
    ConsumerSuspended,
}

impl CallbackEvent {
    /// The notification bit that gates this event.
    pub fn kind(&self) -> ChannelEvents {
        match self {
            CallbackEvent::Produced(_) => ChannelEvents::PRODUCE_EVENT,
            CallbackEvent::Consumed(_) => ChannelEvents::CONSUME_EVENT,
            CallbackEvent::TransferComplete => ChannelEvents::TRANSFER_COMPLETE,
            CallbackEvent::SendComplete => ChannelEvents::SEND_COMPLETE,
            CallbackEvent::RecvComplete => ChannelEvents::RECV_COMPLETE,
            CallbackEvent::Aborted => ChannelEvents::ABORTED,
            CallbackEvent::Error => ChannelEvents::ERROR,
            CallbackEvent::ProducerSuspended => ChannelEvents::PRODUCER_SUSPENDED,
            CallbackEvent::ConsumerSuspended => ChannelEvents::CONSUMER_SUSPENDED,
        }
    }
}

/// Receives channel events selected by the notification mask.
///
/// Callbacks run without the channel lock held and may call back into the
/// channel.
pub trait ChannelCallback: Send + Sync {
    fn on_event(&self, channel: &Channel, event: CallbackEvent);
}

impl<F> ChannelCallback for F
where
    F: Fn(&Channel, CallbackEvent) + Send + Sync,
{
    fn on_event(&self, channel: &Channel, event: CallbackEvent) {
        self(channel, event)
    }
}

/// Channel creation parameters.
#[derive(Clone)]
pub struct ChannelConfig {
    /// Bytes per buffer.
    pub size: u32,
    /// Buffers per chain. Zero creates a channel usable only for override
    /// transfers.
    pub count: u16,
    pub producer: SocketId,
    pub consumer: SocketId,
    /// Bytes reserved ahead of produced data.
    pub producer_header: u16,
    /// Bytes reserved after produced data.
    pub producer_footer: u16,
    /// Offset of consumed data in the buffer.
    pub consumer_header: u16,
    /// Producer throttle threshold, 0 to disable.
    pub avail_count: u16,
    pub notification: ChannelEvents,
    pub callback: Option<Arc<dyn ChannelCallback>>,
    pub mode: TransferMode,
    /// How long each call may wait for the channel lock.
    pub lock_wait: Wait,
}

impl fmt::Debug for ChannelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelConfig")
            .field("size", &self.size)
            .field("count", &self.count)
            .field("producer", &self.producer)
            .field("consumer", &self.consumer)
            .field("producer_header", &self.producer_header)
            .field("producer_footer", &self.producer_footer)
            .field("consumer_header", &self.consumer_header)
            .field("avail_count", &self.avail_count)
            .field("notification", &self.notification)
            .field("callback", &self.callback.is_some())
            .field("mode", &self.mode)
            .field("lock_wait", &self.lock_wait)
            .finish()
    }
}

impl ChannelConfig {
    pub fn new(size: u32, count: u16, producer: SocketId, consumer: SocketId) -> ChannelConfig {
        ChannelConfig {
            size,
            count,
            producer,
            consumer,
            producer_header: 0,
            producer_footer: 0,
            consumer_header: 0,
            avail_count: 0,
            notification: ChannelEvents::empty(),
            callback: None,
            mode: TransferMode::Buffer,
            lock_wait: Wait::Forever,
        }
    }

    pub fn producer_header(mut self, bytes: u16) -> ChannelConfig {
        self.producer_header = bytes;
        self
    }

    pub fn producer_footer(mut self, bytes: u16) -> ChannelConfig {
        self.producer_footer = bytes;
        self
    }

    pub fn consumer_header(mut self, bytes: u16) -> ChannelConfig {
        self.consumer_header = bytes;
        self
    }

    pub fn avail_count(mut self, count: u16) -> ChannelConfig {
        self.avail_count = count;
        self
    }

    pub fn mode(mut self, mode: TransferMode) -> ChannelConfig {
        self.mode = mode;
        self
    }

    pub fn lock_wait(mut self, wait: Wait) -> ChannelConfig {
        self.lock_wait = wait;
        self
    }

    /// Deliver the events in `notification` to `callback`.
    pub fn callback<C>(mut self, notification: ChannelEvents, callback: C) -> ChannelConfig
    where
        C: ChannelCallback + 'static,
    {
        self.notification = notification;
        self.callback = Some(Arc::new(callback));
        self
    }
}

/// State and transfer counters reported by [`Channel::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelStatus {
    pub state: ChannelState,
    pub producer_count: u32,
    pub consumer_count: u32,
}

/// Cursor snapshot of one descriptor chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainCursors {
    pub first: DescriptorIndex,
    pub active: DescriptorIndex,
    pub commit: DescriptorIndex,
    pub current: DescriptorIndex,
    pub descriptors: Vec<DescriptorIndex>,
}

/// Buffer geometry fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Geometry {
    pub size: u32,
    pub count: u16,
    pub producer_header: u16,
    pub producer_footer: u16,
    pub consumer_header: u16,
}

impl Geometry {
    fn new(config: &ChannelConfig) -> Geometry {
        Geometry {
            size: config.size,
            count: config.count,
            producer_header: config.producer_header,
            producer_footer: config.producer_footer,
            consumer_header: config.consumer_header,
        }
    }

    /// Offset and capacity of the producer side of each buffer.
    pub fn producer_layout(&self, kind: ChannelKind) -> (u32, u32) {
        if kind.is_auto() {
            (0, self.size)
        } else {
            let header = u32::from(self.producer_header);
            (header, self.size - header - u32::from(self.producer_footer))
        }
    }

    /// Offset and capacity of the consumer side of each buffer.
    pub fn consumer_layout(&self, kind: ChannelKind) -> (u32, u32) {
        match kind {
            ChannelKind::Manual => {
                let header = u32::from(self.consumer_header);
                (header, self.size - header)
            }
            _ => (0, self.size),
        }
    }
}

/// One descriptor ring and its cursors.
#[derive(Debug, Clone)]
pub(crate) struct Chain {
    pub first: DescriptorIndex,
    /// Next descriptor the producer hardware fills.
    pub active: DescriptorIndex,
    /// Next descriptor the consumer hardware drains.
    pub commit: DescriptorIndex,
    /// Descriptor software may touch.
    pub current: DescriptorIndex,
    pub link: Link,
    slots: Vec<DescriptorIndex>,
}

impl Chain {
    pub fn new(pool: &DescriptorPool, first: DescriptorIndex, link: Link) -> Chain {
        Chain {
            first,
            active: first,
            commit: first,
            current: first,
            link,
            slots: pool.chain(first, link).collect(),
        }
    }

    pub fn slots(&self) -> &[DescriptorIndex] {
        &self.slots
    }

    pub fn position(&self, index: DescriptorIndex) -> Option<usize> {
        self.slots.iter().position(|&i| i == index)
    }

    pub fn reset(&mut self) {
        self.active = self.first;
        self.commit = self.first;
        self.current = self.first;
    }

    /// Move `current` to the next descriptor of the ring.
    pub fn advance(&mut self, ctx: &DmaContext) {
        self.current = ctx.descriptor(self.current).chain.next(self.link);
    }

    fn cursors(&self) -> ChainCursors {
        ChainCursors {
            first: self.first,
            active: self.active,
            commit: self.commit,
            current: self.current,
            descriptors: self.slots.clone(),
        }
    }
}

/// Everything guarded by the channel lock.
pub(crate) struct ChannelCore {
    pub state: ChannelState,
    pub producer: SocketId,
    pub consumer: SocketId,
    pub geometry: Geometry,
    pub avail_count: u16,
    pub mode: TransferMode,
    pub producer_suspend: SuspendPolicy,
    pub consumer_suspend: SuspendPolicy,
    pub producer_chain: Option<Chain>,
    pub consumer_chain: Option<Chain>,
    pub override_descriptor: Option<DescriptorIndex>,
    /// Base address of each slot's buffer, in chain order.
    pub buffers: Vec<usize>,
    pub transfer_size: u32,
    pub discard_count: u32,
    pub dcache: bool,
}

impl ChannelCore {
    fn new(config: &ChannelConfig) -> ChannelCore {
        ChannelCore {
            state: ChannelState::NotConfigured,
            producer: config.producer,
            consumer: config.consumer,
            geometry: Geometry::new(config),
            avail_count: config.avail_count,
            mode: config.mode,
            producer_suspend: SuspendPolicy::None,
            consumer_suspend: SuspendPolicy::None,
            producer_chain: None,
            consumer_chain: None,
            override_descriptor: None,
            buffers: Vec::new(),
            transfer_size: 0,
            discard_count: 0,
            dcache: false,
        }
    }

    /// Fails unless the channel can take part in a transfer at all.
    pub fn check_live(&self) -> Result<()> {
        match self.state {
            ChannelState::NotConfigured => Err(Error::NotConfigured),
            ChannelState::Error => Err(Error::DmaFailure),
            ChannelState::Aborted => Err(Error::Aborted),
            _ => Ok(()),
        }
    }

    pub fn require_active(&self) -> Result<()> {
        self.check_live()?;
        match self.state {
            ChannelState::Active => Ok(()),
            _ => Err(Error::NotStarted),
        }
    }

    pub fn require_configured(&self) -> Result<()> {
        self.check_live()?;
        match self.state {
            ChannelState::Configured => Ok(()),
            _ => Err(Error::AlreadyStarted),
        }
    }

    /// Hardware sockets of this channel, producer first.
    pub fn hardware_sockets(&self) -> impl Iterator<Item = SocketId> {
        [self.producer, self.consumer]
            .into_iter()
            .filter(|s| !s.is_cpu())
    }

    pub fn producer_chain(&self) -> Result<&Chain> {
        self.producer_chain
            .as_ref()
            .ok_or(Error::NotSupported("channel has no producer buffers"))
    }

    pub fn consumer_chain(&self) -> Result<&Chain> {
        self.consumer_chain
            .as_ref()
            .ok_or(Error::NotSupported("channel has no consumer buffers"))
    }

    pub fn override_descriptor(&self) -> Result<DescriptorIndex> {
        self.override_descriptor.ok_or(Error::NotConfigured)
    }

    pub fn disable_sockets(&self, ctx: &DmaContext) {
        for socket in self.hardware_sockets() {
            ctx.sockets().disable(socket);
        }
    }

    /// Disable the sockets and point them back at the start of their chains
    /// with every interrupt masked.
    pub fn park_sockets(&self, ctx: &DmaContext) {
        let sockets = ctx.sockets();
        if !self.producer.is_cpu() {
            sockets.disable(self.producer);
            let config = SocketConfig {
                descriptor_head: self.producer_chain.as_ref().map(|c| c.first),
                ..SocketConfig::default()
            };
            sockets.set_config(self.producer, &config);
        }
        if !self.consumer.is_cpu() {
            sockets.disable(self.consumer);
            let config = SocketConfig {
                descriptor_head: self.consumer_chain.as_ref().map(|c| c.first),
                ..SocketConfig::default()
            };
            sockets.set_config(self.consumer, &config);
        }
    }

    pub fn reset_cursors(&mut self) {
        for chain in [self.producer_chain.as_mut(), self.consumer_chain.as_mut()]
            .into_iter()
            .flatten()
        {
            chain.reset();
        }
    }

    fn release_sockets(&self, registry: &mut SocketRegistry<std::sync::Weak<ChannelShared>>) {
        for socket in self.hardware_sockets() {
            registry.release(socket);
        }
    }

    /// Free every descriptor, buffer and socket the channel holds.
    fn teardown(&mut self, kind: ChannelKind, ctx: &DmaContext) {
        self.disable_sockets(ctx);
        {
            let mut pool = ctx.pool();
            wiring::release(kind, self, &mut pool);
        }
        self.release_sockets(&mut ctx.registry());
        self.state = ChannelState::NotConfigured;
    }
}

/// Channel data shared between handles and the servicing layer.
pub(crate) struct ChannelShared {
    pub id: u32,
    pub kind: ChannelKind,
    pub ctx: Arc<DmaContext>,
    pub events: EventFlags,
    pub callback: Option<Arc<dyn ChannelCallback>>,
    pub notification: ChannelEvents,
    pub lock_wait: Wait,
    pub core: Mutex<ChannelCore>,
}

impl ChannelShared {
    pub fn lock(&self) -> Result<MutexGuard<'_, ChannelCore>> {
        match self.lock_wait {
            Wait::Forever => Ok(self.core.lock()),
            Wait::NoWait => self.core.try_lock().ok_or(Error::MutexFailure),
            Wait::Timeout(d) => self.core.try_lock_for(d).ok_or(Error::MutexFailure),
        }
    }
}

impl Drop for ChannelShared {
    fn drop(&mut self) {
        let kind = self.kind;
        let core = self.core.get_mut();
        if core.state != ChannelState::NotConfigured {
            log::debug!("channel {} dropped without destroy", self.id);
            core.teardown(kind, &self.ctx);
        }
    }
}

/// Handle to a DMA channel.
///
/// Handles are cheap to clone. The channel's descriptors and sockets are
/// released by [`destroy`](Channel::destroy), or when the last handle is
/// dropped.
#[derive(Clone)]
pub struct Channel {
    pub(crate) shared: Arc<ChannelShared>,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Channel ({})", self.shared.id)?;
        writeln!(f, "  kind: {:?}", self.shared.kind)?;
        match self.shared.core.try_lock() {
            Some(core) => {
                writeln!(f, "  state: {:?}", core.state)?;
                writeln!(f, "  producer: {:?}", core.producer)?;
                writeln!(f, "  consumer: {:?}", core.consumer)?;
                writeln!(f, "  size: {:#x?}", core.geometry.size)?;
                writeln!(f, "  count: {:?}", core.geometry.count)?;
                write!(f, "  discard_count: {:?}", core.discard_count)
            }
            None => write!(f, "  <locked>"),
        }
    }
}

fn validate_geometry(kind: ChannelKind, config: &ChannelConfig, limits: &DmaLimits) -> Result<()> {
    if config.size == 0 || config.size > limits.max_buffer_size {
        return Err(Error::BadArgument("buffer size out of range"));
    }
    if kind.is_auto() {
        if !limits.is_aligned(config.size) {
            return Err(Error::BadArgument("buffer size not aligned"));
        }
    } else {
        let reserved = u32::from(config.producer_header) + u32::from(config.producer_footer);
        if reserved >= config.size || u32::from(config.consumer_header) >= config.size {
            return Err(Error::BadArgument("headers leave no room for data"));
        }
        if !limits.is_aligned(config.size - reserved) {
            return Err(Error::BadArgument("buffer payload size not aligned"));
        }
    }
    if config.avail_count != 0 {
        if config.avail_count >= config.count {
            return Err(Error::BadArgument("avail count must be below buffer count"));
        }
        if config.count >= limits.avail_count_limit {
            return Err(Error::BadArgument("too many buffers for an avail count"));
        }
    }
    Ok(())
}

fn validate_sockets<T>(
    kind: ChannelKind,
    config: &ChannelConfig,
    registry: &SocketRegistry<T>,
) -> Result<()> {
    match kind {
        ChannelKind::ManualIn if config.consumer != SocketId::CPU_CONSUMER => {
            return Err(Error::BadArgument("manual-in consumer must be the CPU"));
        }
        ChannelKind::ManualOut if config.producer != SocketId::CPU_PRODUCER => {
            return Err(Error::BadArgument("manual-out producer must be the CPU"));
        }
        _ => {}
    }
    let hardware = [
        (kind.has_producer_socket(), config.producer),
        (kind.has_consumer_socket(), config.consumer),
    ];
    for (required, socket) in hardware {
        if !required {
            continue;
        }
        if !registry.is_valid(socket) {
            return Err(Error::BadArgument("invalid socket"));
        }
        if registry.is_owned(socket) {
            return Err(Error::BadArgument("socket already in use"));
        }
    }
    if kind.has_producer_socket()
        && kind.has_consumer_socket()
        && config.producer == config.consumer
    {
        return Err(Error::BadArgument("producer and consumer are the same socket"));
    }
    Ok(())
}

impl Channel {
    /// Create a channel.
    ///
    /// On failure nothing is reserved: no socket, descriptor or buffer.
    pub fn create(
        ctx: &Arc<DmaContext>,
        kind: ChannelKind,
        config: ChannelConfig,
    ) -> Result<Channel> {
        validate_geometry(kind, &config, ctx.limits())?;

        let shared = Arc::new(ChannelShared {
            id: ctx.next_channel_id(),
            kind,
            ctx: ctx.clone(),
            events: EventFlags::new(),
            callback: config.callback.clone(),
            notification: config.notification,
            lock_wait: config.lock_wait,
            core: Mutex::new(ChannelCore::new(&config)),
        });
        let geometry = Geometry::new(&config);

        {
            let mut registry = ctx.registry();
            validate_sockets(kind, &config, &registry)?;
            if ctx.pool().free_count() < kind.descriptors_needed(config.count) {
                return Err(Error::MemoryError);
            }
            for (required, socket) in [
                (kind.has_producer_socket(), config.producer),
                (kind.has_consumer_socket(), config.consumer),
            ] {
                if required {
                    registry.acquire(socket, Arc::downgrade(&shared))?;
                }
            }
        }

        let built = {
            let mut pool = ctx.pool();
            wiring::build(kind, &geometry, config.producer, config.consumer, &mut pool)
        };
        let built = match built {
            Ok(built) => built,
            Err(e) => {
                let mut registry = ctx.registry();
                if kind.has_producer_socket() {
                    registry.release(config.producer);
                }
                if kind.has_consumer_socket() {
                    registry.release(config.consumer);
                }
                return Err(e);
            }
        };

        {
            let mut core = shared.core.lock();
            core.producer_chain = built.producer_chain;
            core.consumer_chain = built.consumer_chain;
            core.override_descriptor = Some(built.override_descriptor);
            core.buffers = built.buffers;
            core.park_sockets(ctx);
            core.state = ChannelState::Configured;
        }
        log::debug!(
            "channel {} created: {:?} {:?} -> {:?}, {} x {} bytes",
            shared.id,
            kind,
            config.producer,
            config.consumer,
            config.count,
            config.size
        );
        Ok(Channel { shared })
    }

    /// Release the channel's descriptors, buffers and sockets.
    ///
    /// Blocked callers on other handles return `Aborted`.
    pub fn destroy(&self) -> Result<()> {
        let shared = &self.shared;
        let mut core = shared.lock()?;
        if core.state == ChannelState::NotConfigured {
            return Err(Error::NotConfigured);
        }
        core.teardown(shared.kind, &shared.ctx);
        drop(core);
        shared.events.set(ChannelEvents::ABORTED);
        log::debug!("channel {} destroyed", shared.id);
        Ok(())
    }

    pub fn id(&self) -> u32 {
        self.shared.id
    }

    pub fn kind(&self) -> ChannelKind {
        self.shared.kind
    }

    pub fn context(&self) -> &Arc<DmaContext> {
        &self.shared.ctx
    }

    /// The raw state, without deriving completion states.
    pub fn state(&self) -> ChannelState {
        self.shared.core.lock().state
    }

    pub fn producer_socket(&self) -> SocketId {
        self.shared.core.lock().producer
    }

    pub fn consumer_socket(&self) -> SocketId {
        self.shared.core.lock().consumer
    }

    pub fn buffer_size(&self) -> u32 {
        self.shared.core.lock().geometry.size
    }

    pub fn buffer_count(&self) -> u16 {
        self.shared.core.lock().geometry.count
    }

    /// Buffers marked to be dropped that the consumer has not skipped yet.
    pub fn discard_count(&self) -> u32 {
        self.shared.core.lock().discard_count
    }

    pub fn override_descriptor(&self) -> Option<DescriptorIndex> {
        self.shared.core.lock().override_descriptor
    }

    pub fn cursors(&self, side: Side) -> Option<ChainCursors> {
        let core = self.shared.core.lock();
        let chain = match side {
            Side::Producer => core.producer_chain.as_ref(),
            Side::Consumer => core.consumer_chain.as_ref(),
        };
        chain.map(Chain::cursors)
    }

    /// Current event flags.
    pub fn events(&self) -> ChannelEvents {
        self.shared.events.get()
    }

    /// Hand `event` to the callback if the notification mask selects it.
    ///
    /// Must be called without the channel lock held.
    pub(crate) fn notify(&self, event: CallbackEvent, critical: bool) {
        let shared = &self.shared;
        if !shared.notification.intersects(event.kind()) {
            return;
        }
        let callback = match shared.callback.as_ref() {
            Some(callback) => callback,
            None => return,
        };
        if critical {
            let mut event = Some(event);
            shared.ctx.run_critical(&mut || {
                if let Some(event) = event.take() {
                    callback.on_event(self, event);
                }
            });
        } else {
            callback.on_event(self, event);
        }
    }
}

/// One step of a blocking call: either done, or wait for any of the events.
pub(crate) enum Attempt<T> {
    Ready(T),
    Wait(ChannelEvents),
}
