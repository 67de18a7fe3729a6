//! Transfer control and interrupt servicing

use std::time::Instant;

use crate::context::DmaContext;
use crate::descriptor::{BufferStatus, DescriptorIndex, DescriptorSize, Link};
use crate::event::ChannelEvents;
use crate::socket::{
    SocketConfig, SocketId, SocketInterrupt, SocketInterrupts, SocketStatus, SuspendPolicy,
};
use crate::{Error, Result, Wait};

use super::{
    wiring, Attempt, Buffer, CallbackEvent, Channel, ChannelCore, ChannelKind, ChannelShared,
    ChannelState, ChannelStatus, TransferMode,
};

impl ChannelCore {
    /// Program and enable one socket for a transfer of `count` units.
    fn arm_socket(
        &self,
        ctx: &DmaContext,
        socket: SocketId,
        head: DescriptorIndex,
        count: u32,
        producer: bool,
    ) {
        let sockets = ctx.sockets();
        let mut status = SocketStatus::GO_ENABLE;
        let mut mask = SocketInterrupts::ERROR | SocketInterrupts::SUSPEND;
        if count != 0 {
            status |= SocketStatus::TRUNCATE;
            mask |= SocketInterrupts::TRANSFER_DONE;
        }
        if self.mode == TransferMode::Buffer {
            status |= SocketStatus::UNIT_BUFFER;
        }
        let avail_count = if producer && self.avail_count != 0 {
            status |= SocketStatus::AVAIL_ENABLE;
            self.avail_count
        } else {
            0
        };
        let policy = if producer {
            self.producer_suspend
        } else {
            self.consumer_suspend
        };

        sockets.disable(socket);
        sockets.set_config(
            socket,
            &SocketConfig {
                descriptor_head: Some(head),
                transfer_size: count,
                transfer_count: 0,
                status,
                interrupts: SocketInterrupts::empty(),
                interrupt_mask: mask,
                avail_count,
            },
        );
        sockets.set_suspend_option(socket, policy);
        sockets.enable(socket);
    }

    /// Hand the producer descriptor paired with consumer descriptor `index`
    /// back to the producer socket.
    fn release_paired_producer(&self, ctx: &DmaContext, index: DescriptorIndex) {
        let (Some(producer_chain), Some(consumer_chain)) =
            (&self.producer_chain, &self.consumer_chain)
        else {
            return;
        };
        let Some(position) = consumer_chain.position(index) else {
            log::warn!("{:?} is not on the consumer chain", index);
            return;
        };
        let paired = producer_chain.slots()[position];
        let mut descriptor = ctx.descriptor(paired);
        descriptor.size = DescriptorSize::empty(descriptor.size.capacity);
        ctx.set_descriptor(paired, descriptor);
        ctx.sockets().send_event(self.producer, paired, false);
    }

    /// Move the stalled consumer socket past every drop marker at its head.
    fn skip_markers(&mut self, ctx: &DmaContext) {
        let sockets = ctx.sockets();
        let mut config = sockets.get_config(self.consumer);
        let Some(mut head) = config.descriptor_head else {
            return;
        };
        for _ in 0..self.geometry.count {
            let mut descriptor = ctx.descriptor(head);
            let marker = BufferStatus::MARKER | BufferStatus::OCCUPIED;
            if !descriptor.size.status.contains(marker) {
                break;
            }
            descriptor.size = DescriptorSize::empty(descriptor.size.capacity);
            ctx.set_descriptor(head, descriptor);
            self.release_paired_producer(ctx, head);
            self.discard_count = self.discard_count.saturating_sub(1);
            head = descriptor.chain.next(Link::Read);
            if let Some(chain) = self.consumer_chain.as_mut() {
                chain.commit = head;
            }
        }
        config.descriptor_head = Some(head);
        config.interrupts.remove(SocketInterrupts::STALL);
        sockets.set_config(self.consumer, &config);
        sockets.resume(self.consumer, self.consumer_suspend);
    }

    fn transfer_count(&self, ctx: &DmaContext, socket: SocketId) -> u32 {
        if socket.is_cpu() {
            0
        } else {
            ctx.sockets().get_config(socket).transfer_count
        }
    }
}

impl ChannelShared {
    /// Apply a transfer-done interrupt. Returns the completion to report.
    fn transfer_done(&self, core: &mut ChannelCore, from_producer: bool) -> Option<CallbackEvent> {
        let ctx = &*self.ctx;
        let sockets = ctx.sockets();
        let (state, flag, event) = match core.state {
            ChannelState::ProducerOverride if !from_producer => {
                sockets.disable(core.consumer);
                (
                    ChannelState::Configured,
                    ChannelEvents::SEND_COMPLETE,
                    CallbackEvent::SendComplete,
                )
            }
            ChannelState::ConsumerOverride if from_producer => {
                sockets.disable(core.producer);
                (
                    ChannelState::Configured,
                    ChannelEvents::RECV_COMPLETE,
                    CallbackEvent::RecvComplete,
                )
            }
            ChannelState::Active if from_producer && self.kind == ChannelKind::ManualIn => {
                sockets.disable(core.producer);
                let current = core.producer_chain.as_ref().map(|c| c.current);
                let pending = current.is_some_and(|i| ctx.descriptor(i).size.is_occupied());
                if pending {
                    core.state = ChannelState::InCompletion;
                    log::debug!("channel {} producer done, draining", self.id);
                    return None;
                }
                (
                    ChannelState::Configured,
                    ChannelEvents::TRANSFER_COMPLETE,
                    CallbackEvent::TransferComplete,
                )
            }
            ChannelState::Active if !from_producer => {
                core.disable_sockets(ctx);
                (
                    ChannelState::Configured,
                    ChannelEvents::TRANSFER_COMPLETE,
                    CallbackEvent::TransferComplete,
                )
            }
            _ => return None,
        };
        core.state = state;
        self.events.set(flag);
        log::debug!("channel {} {:?}", self.id, event);
        Some(event)
    }
}

impl Channel {
    /// Start a transfer of `count` units, 0 meaning unbounded.
    ///
    /// Units are buffers or bytes per [`TransferMode`].
    pub fn set_transfer(&self, count: u32) -> Result<()> {
        let shared = &self.shared;
        let ctx = &*shared.ctx;
        let mut core = shared.lock()?;
        core.require_configured()?;
        if core.geometry.count == 0 {
            return Err(Error::NotSupported("channel was created without buffers"));
        }

        {
            let mut pool = ctx.pool();
            wiring::rewire(shared.kind, &core, &mut pool);
        }
        core.reset_cursors();
        core.discard_count = 0;
        core.transfer_size = count;
        shared.events.clear(ChannelEvents::all());

        // Consumer first so nothing produced is missed.
        if !core.consumer.is_cpu() {
            if let Some(head) = core.consumer_chain.as_ref().map(|c| c.first) {
                core.arm_socket(ctx, core.consumer, head, count, false);
            }
        }
        if !core.producer.is_cpu() {
            if let Some(head) = core.producer_chain.as_ref().map(|c| c.first) {
                core.arm_socket(ctx, core.producer, head, count, true);
            }
        }
        core.state = ChannelState::Active;
        log::debug!("channel {} transfer of {} started", shared.id, count);
        Ok(())
    }

    /// End the producer's transfer after the buffer in progress.
    pub fn set_wrap_up(&self) -> Result<()> {
        let shared = &self.shared;
        let core = shared.lock()?;
        core.check_live()?;
        if shared.kind == ChannelKind::ManualOut {
            return Err(Error::NotSupported("manual-out channels have no producer socket"));
        }
        match core.state {
            ChannelState::Active | ChannelState::ConsumerOverride => {}
            _ => return Err(Error::NotStarted),
        }
        let sockets = shared.ctx.sockets();
        let mut config = sockets.get_config(core.producer);
        config.status |= SocketStatus::WRAPUP;
        sockets.set_config(core.producer, &config);
        Ok(())
    }

    /// Choose when each socket suspends itself.
    ///
    /// A side without a hardware socket only accepts
    /// [`SuspendPolicy::None`]. `PartialBuffer` is consumer-only.
    pub fn set_suspend(&self, producer: SuspendPolicy, consumer: SuspendPolicy) -> Result<()> {
        let shared = &self.shared;
        let mut core = shared.lock()?;
        core.check_live()?;
        if producer == SuspendPolicy::PartialBuffer {
            return Err(Error::BadArgument("partial-buffer suspend is consumer only"));
        }
        if !shared.kind.has_producer_socket() && producer != SuspendPolicy::None {
            return Err(Error::InvalidConfiguration("channel has no producer socket"));
        }
        if !shared.kind.has_consumer_socket() && consumer != SuspendPolicy::None {
            return Err(Error::InvalidConfiguration("channel has no consumer socket"));
        }
        match core.state {
            ChannelState::Configured | ChannelState::Active => {}
            _ => return Err(Error::InvalidSequence("suspend policy cannot change now")),
        }
        core.producer_suspend = producer;
        core.consumer_suspend = consumer;
        if core.state == ChannelState::Active {
            let sockets = shared.ctx.sockets();
            if !core.producer.is_cpu() {
                sockets.set_suspend_option(core.producer, producer);
            }
            if !core.consumer.is_cpu() {
                sockets.set_suspend_option(core.consumer, consumer);
            }
        }
        Ok(())
    }

    /// Resume suspended sockets. A `CurrentBuffer` policy is one-shot and
    /// reverts to `None` on resume.
    pub fn resume(&self, producer: bool, consumer: bool) -> Result<()> {
        let shared = &self.shared;
        let mut core = shared.lock()?;
        core.check_live()?;
        match core.state {
            ChannelState::Active
            | ChannelState::ProducerOverride
            | ChannelState::ConsumerOverride
            | ChannelState::InCompletion => {}
            _ => return Err(Error::NotStarted),
        }
        let sockets = shared.ctx.sockets();
        if producer && !core.producer.is_cpu() {
            if core.producer_suspend == SuspendPolicy::CurrentBuffer {
                core.producer_suspend = SuspendPolicy::None;
            }
            sockets.resume(core.producer, core.producer_suspend);
            shared.events.clear(ChannelEvents::PRODUCER_SUSPENDED);
        }
        if consumer && !core.consumer.is_cpu() {
            if core.consumer_suspend == SuspendPolicy::CurrentBuffer {
                core.consumer_suspend = SuspendPolicy::None;
            }
            sockets.resume(core.consumer, core.consumer_suspend);
            shared.events.clear(ChannelEvents::CONSUMER_SUSPENDED);
        }
        Ok(())
    }

    /// Stop any transfer and return to `Configured` with every descriptor
    /// and cursor as created. Works from any state, including `Error` and
    /// `Aborted`.
    pub fn reset(&self) -> Result<()> {
        let shared = &self.shared;
        let ctx = &*shared.ctx;
        let mut core = shared.lock()?;
        if core.state == ChannelState::NotConfigured {
            return Err(Error::NotConfigured);
        }
        {
            let mut pool = ctx.pool();
            wiring::rewire(shared.kind, &core, &mut pool);
        }
        core.reset_cursors();
        core.park_sockets(ctx);
        core.discard_count = 0;
        core.transfer_size = 0;
        core.state = ChannelState::Configured;
        shared.events.clear(ChannelEvents::all());
        shared.events.set(ChannelEvents::ABORTED);
        drop(core);
        log::debug!("channel {} reset", shared.id);
        self.notify(CallbackEvent::Aborted, true);
        Ok(())
    }

    /// Stop the sockets in place and fail every call until
    /// [`reset`](Self::reset) or [`destroy`](Self::destroy).
    pub fn abort(&self) -> Result<()> {
        let shared = &self.shared;
        let mut core = shared.lock()?;
        match core.state {
            ChannelState::NotConfigured => return Err(Error::NotConfigured),
            ChannelState::Aborted => return Err(Error::Aborted),
            _ => {}
        }
        core.disable_sockets(&shared.ctx);
        core.state = ChannelState::Aborted;
        drop(core);
        shared.events.set(ChannelEvents::ABORTED);
        log::debug!("channel {} aborted", shared.id);
        self.notify(CallbackEvent::Aborted, true);
        Ok(())
    }

    pub fn update_mode(&self, mode: TransferMode) -> Result<()> {
        let mut core = self.shared.lock()?;
        core.require_configured()?;
        core.mode = mode;
        Ok(())
    }

    /// Synchronize buffer memory with the device on every hand-off.
    pub fn cache_control(&self, enabled: bool) -> Result<()> {
        let mut core = self.shared.lock()?;
        core.check_live()?;
        core.dcache = enabled;
        Ok(())
    }

    /// State and socket transfer counters.
    ///
    /// A `Configured` channel with a pending completion reports the
    /// completion state instead.
    pub fn status(&self) -> Result<ChannelStatus> {
        let shared = &self.shared;
        let ctx = &*shared.ctx;
        let core = shared.lock()?;
        if core.state == ChannelState::NotConfigured {
            return Err(Error::NotConfigured);
        }
        let events = shared.events.get();
        let state = match core.state {
            ChannelState::Configured if events.contains(ChannelEvents::RECV_COMPLETE) => {
                ChannelState::RecvComplete
            }
            ChannelState::Configured if events.contains(ChannelEvents::SEND_COMPLETE) => {
                ChannelState::SendComplete
            }
            ChannelState::Configured if events.contains(ChannelEvents::TRANSFER_COMPLETE) => {
                ChannelState::TransferComplete
            }
            state => state,
        };
        let producer_count = match state {
            ChannelState::ConsumerOverride | ChannelState::RecvComplete => {
                ctx.descriptor(core.override_descriptor()?).size.count
            }
            _ => core.transfer_count(ctx, core.producer),
        };
        Ok(ChannelStatus {
            state,
            producer_count,
            consumer_count: core.transfer_count(ctx, core.consumer),
        })
    }

    /// Wait until the transfer or override in progress completes.
    pub fn wait_for_completion(&self, wait: Wait) -> Result<()> {
        let deadline = wait.deadline(Instant::now());
        loop {
            match self.try_completion()? {
                Attempt::Ready(()) => return Ok(()),
                Attempt::Wait(mask) => {
                    self.shared
                        .events
                        .wait_any_until(mask | ChannelEvents::FAILURE, deadline)?
                        .check_failure()?;
                }
            }
        }
    }

    pub(crate) fn try_completion(&self) -> Result<Attempt<()>> {
        let core = self.shared.lock()?;
        core.check_live()?;
        match core.state {
            ChannelState::Configured => Ok(Attempt::Ready(())),
            _ => Ok(Attempt::Wait(ChannelEvents::COMPLETION)),
        }
    }

    /// Apply an interrupt raised by one of this channel's sockets.
    pub(crate) fn service(&self, socket: SocketId, interrupt: SocketInterrupt) {
        let shared = &self.shared;
        let ctx = &*shared.ctx;
        let mut fired = Vec::with_capacity(1);
        {
            let mut core = shared.core.lock();
            if matches!(core.state, ChannelState::NotConfigured | ChannelState::Aborted) {
                log::trace!("channel {} ignoring {:?}", shared.id, interrupt);
                return;
            }
            let from_producer = socket == core.producer;
            match interrupt {
                SocketInterrupt::Produced(index) => {
                    let descriptor = ctx.descriptor(index);
                    if let Some(chain) = core.producer_chain.as_mut() {
                        chain.active = descriptor.chain.next(chain.link);
                    }
                    shared.events.set(ChannelEvents::PRODUCE_EVENT);
                    fired.push(CallbackEvent::Produced(Buffer::from_descriptor(&descriptor)));
                }
                SocketInterrupt::Consumed(index) => {
                    let descriptor = ctx.descriptor(index);
                    if shared.kind == ChannelKind::Manual {
                        core.release_paired_producer(ctx, index);
                    }
                    if let Some(chain) = core.consumer_chain.as_mut() {
                        chain.commit = descriptor.chain.next(chain.link);
                    }
                    shared.events.set(ChannelEvents::CONSUME_EVENT);
                    fired.push(CallbackEvent::Consumed(Buffer::from_descriptor(&descriptor)));
                }
                SocketInterrupt::TransferDone => {
                    fired.extend(shared.transfer_done(&mut core, from_producer));
                }
                SocketInterrupt::Suspended => {
                    let (flag, event) = if from_producer {
                        (ChannelEvents::PRODUCER_SUSPENDED, CallbackEvent::ProducerSuspended)
                    } else {
                        (ChannelEvents::CONSUMER_SUSPENDED, CallbackEvent::ConsumerSuspended)
                    };
                    shared.events.set(flag);
                    fired.push(event);
                }
                SocketInterrupt::Stall => {
                    if shared.kind == ChannelKind::Manual && !from_producer {
                        core.skip_markers(ctx);
                    }
                }
                SocketInterrupt::Error => {
                    log::warn!("channel {} socket {:?} reported an error", shared.id, socket);
                    core.disable_sockets(ctx);
                    core.state = ChannelState::Error;
                    shared.events.set(ChannelEvents::ERROR);
                    fired.push(CallbackEvent::Error);
                }
            }
        }
        for event in fired {
            self.notify(event, false);
        }
    }
}
