//! Buffer hand-off between software and the sockets

use std::time::Instant;

use crate::context::DmaContext;
use crate::descriptor::{
    BufferStatus, ChainLinks, Descriptor, DescriptorIndex, DescriptorSize, SyncFlags, SyncWord,
};
use crate::dma_buffer::DmaBuffer;
use crate::event::ChannelEvents;
use crate::limits::DmaLimits;
use crate::socket::{SocketConfig, SocketId, SocketInterrupts, SocketStatus, SuspendPolicy};
use crate::{Error, Result, Wait};

use super::{Attempt, Buffer, CallbackEvent, Channel, ChannelCore, ChannelKind, ChannelState};

impl ChannelCore {
    /// The buffer an automatic channel's consumer socket stopped at.
    fn suspended_consumer_buffer(&self, ctx: &DmaContext) -> Result<(DescriptorIndex, Descriptor)> {
        let config = ctx.sockets().get_config(self.consumer);
        if !config.status.contains(SocketStatus::SUSPENDED) {
            return Err(Error::InvalidSequence("consumer socket is not suspended"));
        }
        let index = config
            .descriptor_head
            .ok_or(Error::InvalidSequence("consumer socket has no descriptor"))?;
        let descriptor = ctx.descriptor(index);
        if !descriptor.size.is_occupied() {
            return Err(Error::InvalidSequence("no buffer at the suspended consumer"));
        }
        Ok((index, descriptor))
    }

    fn advance_producer(&mut self, ctx: &DmaContext) {
        if let Some(chain) = self.producer_chain.as_mut() {
            chain.advance(ctx);
        }
    }

    fn advance_consumer(&mut self, ctx: &DmaContext) {
        if let Some(chain) = self.consumer_chain.as_mut() {
            chain.advance(ctx);
        }
    }

    /// Point a drained `ManualOut` slot back at the channel's own buffer
    /// after `send_data` lent it caller memory.
    fn reclaim_consumer_slot(
        &self,
        ctx: &DmaContext,
        index: DescriptorIndex,
    ) -> Result<Descriptor> {
        let mut descriptor = ctx.descriptor(index);
        let position = self
            .consumer_chain()?
            .position(index)
            .ok_or(Error::InvalidSequence("descriptor is not on the consumer chain"))?;
        let (offset, capacity) = self.geometry.consumer_layout(ChannelKind::ManualOut);
        let own = self.buffers[position] + offset as usize;
        if descriptor.buffer != own || descriptor.size.capacity != capacity {
            descriptor.buffer = own;
            descriptor.size = DescriptorSize::empty(capacity);
            ctx.set_descriptor(index, descriptor);
        }
        Ok(descriptor)
    }

    /// Ask the consumer socket to stall on drop markers, once per run of
    /// discards.
    fn arm_stall(&mut self, ctx: &DmaContext) {
        self.discard_count += 1;
        if self.discard_count == 1 {
            let sockets = ctx.sockets();
            let mut config = sockets.get_config(self.consumer);
            config.interrupt_mask |= SocketInterrupts::STALL;
            sockets.set_config(self.consumer, &config);
        }
    }
}

fn validate_override(buffer: &Buffer, limits: &DmaLimits) -> Result<()> {
    if buffer.address == 0 {
        return Err(Error::NullPointer);
    }
    if buffer.size == 0 || buffer.size > limits.max_buffer_size || !limits.is_aligned(buffer.size) {
        return Err(Error::BadArgument("override buffer size"));
    }
    if buffer.count > buffer.size {
        return Err(Error::BadArgument("byte count exceeds buffer size"));
    }
    Ok(())
}

/// Socket registers for a single-buffer override transfer.
fn override_config(head: DescriptorIndex) -> SocketConfig {
    SocketConfig {
        descriptor_head: Some(head),
        transfer_size: 1,
        transfer_count: 0,
        status: SocketStatus::GO_ENABLE | SocketStatus::TRUNCATE | SocketStatus::UNIT_BUFFER,
        interrupts: SocketInterrupts::empty(),
        interrupt_mask: SocketInterrupts::TRANSFER_DONE | SocketInterrupts::ERROR,
        avail_count: 0,
    }
}

impl Channel {
    /// Wait for the next buffer software may work on.
    ///
    /// For `Manual` and `ManualIn` channels this is the next produced buffer,
    /// for `ManualOut` the next empty buffer to fill. Automatic channels
    /// return the buffer their consumer socket is suspended at, without
    /// waiting.
    pub fn get_buffer(&self, wait: Wait) -> Result<Buffer> {
        let deadline = wait.deadline(Instant::now());
        loop {
            match self.try_get_buffer()? {
                Attempt::Ready(buffer) => return Ok(buffer),
                Attempt::Wait(mask) => {
                    self.shared
                        .events
                        .wait_any_until(mask | ChannelEvents::FAILURE, deadline)?
                        .check_failure()?;
                }
            }
        }
    }

    pub(crate) fn try_get_buffer(&self) -> Result<Attempt<Buffer>> {
        let shared = &self.shared;
        let ctx = &*shared.ctx;
        let core = shared.lock()?;
        core.check_live()?;

        match shared.kind {
            ChannelKind::Auto | ChannelKind::AutoSignal => {
                core.require_active()?;
                let (_, descriptor) = core.suspended_consumer_buffer(ctx)?;
                Ok(Attempt::Ready(Buffer::from_descriptor(&descriptor)))
            }
            ChannelKind::Manual | ChannelKind::ManualIn => {
                let draining = shared.kind == ChannelKind::ManualIn
                    && core.state == ChannelState::InCompletion;
                if !draining {
                    core.require_active()?;
                }
                shared
                    .events
                    .clear(ChannelEvents::PRODUCE_EVENT | ChannelEvents::CONSUME_EVENT);
                let produced = ctx.descriptor(core.producer_chain()?.current);
                let paired_free = match &core.consumer_chain {
                    Some(chain) => !ctx.descriptor(chain.current).size.is_occupied(),
                    None => true,
                };
                if produced.size.is_occupied() && paired_free {
                    if core.dcache {
                        DmaBuffer::sync_for_cpu();
                    }
                    Ok(Attempt::Ready(Buffer::from_descriptor(&produced)))
                } else {
                    Ok(Attempt::Wait(
                        ChannelEvents::PRODUCE_EVENT
                            | ChannelEvents::CONSUME_EVENT
                            | ChannelEvents::TRANSFER_COMPLETE,
                    ))
                }
            }
            ChannelKind::ManualOut => {
                core.require_active()?;
                shared.events.clear(ChannelEvents::CONSUME_EVENT);
                let index = core.consumer_chain()?.current;
                if ctx.descriptor(index).size.is_occupied() {
                    return Ok(Attempt::Wait(
                        ChannelEvents::CONSUME_EVENT | ChannelEvents::TRANSFER_COMPLETE,
                    ));
                }
                let descriptor = core.reclaim_consumer_slot(ctx, index)?;
                Ok(Attempt::Ready(Buffer {
                    address: descriptor.buffer,
                    count: u32::from(core.geometry.consumer_header),
                    size: descriptor.size.capacity,
                    status: BufferStatus::empty(),
                }))
            }
        }
    }

    /// Pass `count` bytes of the current buffer to the consumer.
    ///
    /// Only end-of-packet and marker bits of `status` are kept. On a `Manual`
    /// channel an empty `status` forwards the producer's status bits.
    pub fn commit_buffer(&self, count: u32, status: BufferStatus) -> Result<()> {
        let shared = &self.shared;
        let ctx = &*shared.ctx;
        let sockets = ctx.sockets();
        let status = status & BufferStatus::WRITE_MASK;
        let mut core = shared.lock()?;
        core.check_live()?;

        match shared.kind {
            ChannelKind::ManualIn => Err(Error::NotSupported(
                "manual-in channels have no consumer socket",
            )),
            ChannelKind::Auto | ChannelKind::AutoSignal => {
                core.require_active()?;
                let (index, mut descriptor) = core.suspended_consumer_buffer(ctx)?;
                if count > descriptor.size.capacity {
                    return Err(Error::BadArgument("byte count exceeds buffer size"));
                }
                descriptor.size.count = count;
                descriptor.size.status = status | BufferStatus::OCCUPIED;
                if core.dcache {
                    DmaBuffer::sync_for_device();
                }
                ctx.set_descriptor(index, descriptor);

                let mut config = sockets.get_config(core.consumer);
                config
                    .interrupts
                    .remove(SocketInterrupts::SUSPEND | SocketInterrupts::PARTIAL_BUFFER);
                sockets.set_config(core.consumer, &config);
                if let Some(chain) = core.consumer_chain.as_mut() {
                    chain.commit = index;
                }
                sockets.send_event(core.consumer, index, true);
                log::trace!("channel {} committed {:?} ({} bytes)", shared.id, index, count);
                Ok(())
            }
            ChannelKind::Manual => {
                core.require_active()?;
                let produced_index = core.producer_chain()?.current;
                let index = core.consumer_chain()?.current;
                let produced = ctx.descriptor(produced_index);
                let mut descriptor = ctx.descriptor(index);
                if !produced.size.is_occupied() {
                    return Err(Error::InvalidSequence("no produced buffer to commit"));
                }
                if descriptor.size.is_occupied() {
                    return Err(Error::InvalidSequence("consumer still holds this buffer"));
                }
                if count > descriptor.size.capacity {
                    return Err(Error::BadArgument("byte count exceeds buffer size"));
                }
                let status = if status.is_empty() {
                    produced.size.status & BufferStatus::WRITE_MASK
                } else {
                    status
                };
                descriptor.size = DescriptorSize {
                    capacity: descriptor.size.capacity,
                    count,
                    status: status | BufferStatus::OCCUPIED,
                };
                if core.dcache {
                    DmaBuffer::sync_for_device();
                }
                ctx.set_descriptor(index, descriptor);
                sockets.send_event(core.consumer, index, true);
                core.advance_producer(ctx);
                core.advance_consumer(ctx);
                log::trace!("channel {} committed {:?} ({} bytes)", shared.id, index, count);
                Ok(())
            }
            ChannelKind::ManualOut => {
                core.require_active()?;
                let index = core.consumer_chain()?.current;
                if ctx.descriptor(index).size.is_occupied() {
                    return Err(Error::InvalidSequence("buffer was not obtained with get_buffer"));
                }
                let mut descriptor = core.reclaim_consumer_slot(ctx, index)?;
                if count > descriptor.size.capacity {
                    return Err(Error::BadArgument("byte count exceeds buffer size"));
                }
                descriptor.size.count = count;
                descriptor.size.status = status | BufferStatus::OCCUPIED;
                if core.dcache {
                    DmaBuffer::sync_for_device();
                }
                ctx.set_descriptor(index, descriptor);
                sockets.send_event(core.consumer, index, true);
                core.advance_consumer(ctx);
                log::trace!("channel {} committed {:?} ({} bytes)", shared.id, index, count);
                Ok(())
            }
        }
    }

    /// Drop the current produced buffer.
    ///
    /// On a `Manual` channel the consumer receives a drop marker in its place
    /// and skips it. On a `ManualIn` channel the buffer goes straight back to
    /// the producer.
    pub fn discard_buffer(&self) -> Result<()> {
        let shared = &self.shared;
        let ctx = &*shared.ctx;
        let sockets = ctx.sockets();
        let mut core = shared.lock()?;
        core.check_live()?;

        match shared.kind {
            ChannelKind::Manual => {
                core.require_active()?;
                let produced = ctx.descriptor(core.producer_chain()?.current);
                let index = core.consumer_chain()?.current;
                let mut descriptor = ctx.descriptor(index);
                if !produced.size.is_occupied() {
                    return Err(Error::InvalidSequence("no produced buffer to discard"));
                }
                if descriptor.size.is_occupied() {
                    return Err(Error::InvalidSequence("consumer still holds this buffer"));
                }
                descriptor.size = DescriptorSize {
                    capacity: descriptor.size.capacity,
                    count: 0,
                    status: BufferStatus::MARKER | BufferStatus::OCCUPIED,
                };
                ctx.set_descriptor(index, descriptor);
                core.arm_stall(ctx);
                sockets.send_event(core.consumer, index, true);
                core.advance_producer(ctx);
                core.advance_consumer(ctx);
                log::trace!("channel {} discarded {:?}", shared.id, index);
                Ok(())
            }
            ChannelKind::ManualIn => {
                let draining = core.state == ChannelState::InCompletion;
                if !draining {
                    core.require_active()?;
                }
                let index = core.producer_chain()?.current;
                let mut descriptor = ctx.descriptor(index);
                if !descriptor.size.is_occupied() {
                    return Err(Error::InvalidSequence("no produced buffer to discard"));
                }
                descriptor.size = DescriptorSize::empty(descriptor.size.capacity);
                ctx.set_descriptor(index, descriptor);
                sockets.send_event(core.producer, index, false);
                core.advance_producer(ctx);
                log::trace!("channel {} released {:?}", shared.id, index);

                let drained = draining
                    && !ctx
                        .descriptor(core.producer_chain()?.current)
                        .size
                        .is_occupied();
                if drained {
                    core.state = ChannelState::Configured;
                }
                drop(core);
                if drained {
                    log::debug!("channel {} drained", shared.id);
                    shared.events.set(ChannelEvents::TRANSFER_COMPLETE);
                    self.notify(CallbackEvent::TransferComplete, true);
                }
                Ok(())
            }
            _ => Err(Error::NotSupported("discard needs a CPU consumer")),
        }
    }

    /// Queue a caller-owned buffer of `count` bytes on a `ManualOut` channel.
    ///
    /// The caller keeps the memory alive and untouched until the consumer
    /// has drained it.
    pub fn send_data(&self, address: usize, count: u32) -> Result<()> {
        let shared = &self.shared;
        let ctx = &*shared.ctx;
        let mut core = shared.lock()?;
        core.check_live()?;
        if shared.kind != ChannelKind::ManualOut {
            return Err(Error::NotSupported("send_data needs a manual-out channel"));
        }
        if address == 0 {
            return Err(Error::NullPointer);
        }
        let limits = ctx.limits();
        if count > limits.max_buffer_size {
            return Err(Error::BadArgument("byte count exceeds buffer size"));
        }
        core.require_active()?;

        let index = core.consumer_chain()?.current;
        let mut descriptor = ctx.descriptor(index);
        if descriptor.size.is_occupied() {
            return Err(Error::InvalidSequence("consumer still holds this buffer"));
        }
        descriptor.buffer = address;
        descriptor.size = DescriptorSize {
            capacity: limits.align_up(count),
            count,
            status: BufferStatus::OCCUPIED,
        };
        if core.dcache {
            DmaBuffer::sync_for_device();
        }
        ctx.set_descriptor(index, descriptor);
        ctx.sockets().send_event(core.consumer, index, true);
        core.advance_consumer(ctx);
        Ok(())
    }

    /// Send one caller-owned buffer to the consumer socket, bypassing the
    /// channel's chains. Completion sets `SEND_COMPLETE`.
    pub fn setup_send_buffer(&self, buffer: &Buffer) -> Result<()> {
        let shared = &self.shared;
        let ctx = &*shared.ctx;
        let sockets = ctx.sockets();
        let mut core = shared.lock()?;
        core.check_live()?;
        if shared.kind == ChannelKind::ManualIn {
            return Err(Error::NotSupported("manual-in channels have no consumer socket"));
        }
        validate_override(buffer, ctx.limits())?;
        core.require_configured()?;

        let index = core.override_descriptor()?;
        let consumer = core.consumer;
        sockets.disable(consumer);
        sockets.set_suspend_option(consumer, SuspendPolicy::None);
        ctx.set_descriptor(
            index,
            Descriptor {
                buffer: buffer.address,
                sync: SyncWord::new(SocketId::CPU_PRODUCER, consumer, SyncFlags::empty()),
                chain: ChainLinks::both(index),
                size: DescriptorSize {
                    capacity: buffer.size,
                    count: buffer.count,
                    status: (buffer.status & BufferStatus::WRITE_MASK) | BufferStatus::OCCUPIED,
                },
            },
        );
        if core.dcache {
            DmaBuffer::sync_for_device();
        }
        shared
            .events
            .clear(ChannelEvents::COMPLETION | ChannelEvents::FAILURE);
        sockets.set_config(consumer, &override_config(index));
        core.state = ChannelState::ProducerOverride;
        sockets.enable(consumer);
        log::debug!(
            "channel {} sending {} bytes from {:#x}",
            shared.id,
            buffer.count,
            buffer.address
        );
        Ok(())
    }

    /// Receive one buffer from the producer socket into caller-owned memory,
    /// bypassing the channel's chains. Completion sets `RECV_COMPLETE`.
    pub fn setup_recv_buffer(&self, buffer: &Buffer) -> Result<()> {
        let shared = &self.shared;
        let ctx = &*shared.ctx;
        let sockets = ctx.sockets();
        let mut core = shared.lock()?;
        core.check_live()?;
        if shared.kind == ChannelKind::ManualOut {
            return Err(Error::NotSupported("manual-out channels have no producer socket"));
        }
        validate_override(&buffer.with_count(0), ctx.limits())?;
        core.require_configured()?;

        let index = core.override_descriptor()?;
        let producer = core.producer;
        sockets.disable(producer);
        sockets.set_suspend_option(producer, SuspendPolicy::None);
        ctx.set_descriptor(
            index,
            Descriptor {
                buffer: buffer.address,
                sync: SyncWord::new(producer, SocketId::CPU_CONSUMER, SyncFlags::empty()),
                chain: ChainLinks::both(index),
                size: DescriptorSize::empty(buffer.size),
            },
        );
        shared
            .events
            .clear(ChannelEvents::COMPLETION | ChannelEvents::FAILURE);
        sockets.set_config(producer, &override_config(index));
        core.state = ChannelState::ConsumerOverride;
        sockets.enable(producer);
        log::debug!("channel {} receiving into {:#x}", shared.id, buffer.address);
        Ok(())
    }

    /// Wait for the buffer set up with
    /// [`setup_recv_buffer`](Self::setup_recv_buffer) to be filled.
    pub fn wait_for_recv_buffer(&self, wait: Wait) -> Result<Buffer> {
        let deadline = wait.deadline(Instant::now());
        loop {
            match self.try_recv_buffer()? {
                Attempt::Ready(buffer) => return Ok(buffer),
                Attempt::Wait(mask) => {
                    self.shared
                        .events
                        .wait_any_until(mask | ChannelEvents::FAILURE, deadline)?
                        .check_failure()?;
                }
            }
        }
    }

    pub(crate) fn try_recv_buffer(&self) -> Result<Attempt<Buffer>> {
        let shared = &self.shared;
        let core = shared.lock()?;
        core.check_live()?;
        match core.state {
            ChannelState::ConsumerOverride => Ok(Attempt::Wait(ChannelEvents::RECV_COMPLETE)),
            ChannelState::Configured
                if shared.events.get().contains(ChannelEvents::RECV_COMPLETE) =>
            {
                let descriptor = shared.ctx.descriptor(core.override_descriptor()?);
                if core.dcache {
                    DmaBuffer::sync_for_cpu();
                }
                Ok(Attempt::Ready(Buffer::from_descriptor(&descriptor)))
            }
            _ => Err(Error::NotStarted),
        }
    }
}
