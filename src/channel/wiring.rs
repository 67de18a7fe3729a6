//! Descriptor chain layout for each channel kind

use crate::descriptor::{DescriptorIndex, DescriptorSize, Link, SyncFlags, SyncWord};
use crate::pool::DescriptorPool;
use crate::socket::SocketId;
use crate::Result;

use super::{Chain, ChannelCore, ChannelKind, Geometry};

pub(crate) struct Wiring {
    pub producer_chain: Option<Chain>,
    pub consumer_chain: Option<Chain>,
    pub override_descriptor: DescriptorIndex,
    pub buffers: Vec<usize>,
}

/// Allocate and link the descriptors of a new channel.
///
/// Automatic channels get one ring shared by both sockets. Manual channels
/// get a ring per hardware side over one set of buffers, with the producer
/// chain offset past the producer header and the consumer chain past the
/// consumer header. Every channel also gets an override descriptor.
pub(crate) fn build(
    kind: ChannelKind,
    geometry: &Geometry,
    producer: SocketId,
    consumer: SocketId,
    pool: &mut DescriptorPool,
) -> Result<Wiring> {
    let override_descriptor = pool.alloc_one()?;
    match build_chains(kind, geometry, producer, consumer, pool) {
        Ok((producer_chain, consumer_chain, buffers)) => Ok(Wiring {
            producer_chain,
            consumer_chain,
            override_descriptor,
            buffers,
        }),
        Err(e) => {
            pool.free_one(override_descriptor);
            Err(e)
        }
    }
}

type Chains = (Option<Chain>, Option<Chain>, Vec<usize>);

fn build_chains(
    kind: ChannelKind,
    geometry: &Geometry,
    producer: SocketId,
    consumer: SocketId,
    pool: &mut DescriptorPool,
) -> Result<Chains> {
    let count = geometry.count;
    if count == 0 {
        return Ok((None, None, Vec::new()));
    }

    if kind.is_auto() {
        let flags = if kind == ChannelKind::AutoSignal {
            SyncFlags::PRODUCER_INTERRUPT | SyncFlags::CONSUMER_INTERRUPT
        } else {
            SyncFlags::empty()
        };
        let sync = SyncWord::new(producer, consumer, flags);
        let first = pool.alloc_chain(count, geometry.size, sync)?;
        let chain = Chain::new(pool, first, Link::Write);
        let buffers = chain.slots().iter().map(|&i| pool.get(i).buffer).collect();
        let mut consumer_chain = chain.clone();
        consumer_chain.link = Link::Read;
        return Ok((Some(chain), Some(consumer_chain), buffers));
    }

    let mut buffers = Vec::with_capacity(count as usize);
    for _ in 0..count {
        match pool.alloc_buffer(geometry.size) {
            Ok(addr) => buffers.push(addr),
            Err(e) => {
                free_buffers(pool, &buffers);
                return Err(e);
            }
        }
    }

    let producer_chain = if kind.has_producer_socket() {
        let sync = SyncWord::new(producer, SocketId::CPU_CONSUMER, SyncFlags::PRODUCER_INTERRUPT);
        match pool.alloc_chain(count, 0, sync) {
            Ok(first) => Some(Chain::new(pool, first, Link::Write)),
            Err(e) => {
                free_buffers(pool, &buffers);
                return Err(e);
            }
        }
    } else {
        None
    };

    let consumer_chain = if kind.has_consumer_socket() {
        let sync = SyncWord::new(SocketId::CPU_PRODUCER, consumer, SyncFlags::CONSUMER_INTERRUPT);
        match pool.alloc_chain(count, 0, sync) {
            Ok(first) => Some(Chain::new(pool, first, Link::Read)),
            Err(e) => {
                if let Some(chain) = &producer_chain {
                    pool.free_chain(chain.first, count, false);
                }
                free_buffers(pool, &buffers);
                return Err(e);
            }
        }
    } else {
        None
    };

    if let Some(chain) = &producer_chain {
        let (offset, capacity) = geometry.producer_layout(kind);
        lay_out(pool, chain, &buffers, offset, capacity);
    }
    if let Some(chain) = &consumer_chain {
        let (offset, capacity) = geometry.consumer_layout(kind);
        lay_out(pool, chain, &buffers, offset, capacity);
    }
    Ok((producer_chain, consumer_chain, buffers))
}

fn free_buffers(pool: &mut DescriptorPool, buffers: &[usize]) {
    for &addr in buffers {
        pool.free_buffer(addr);
    }
}

/// Point each descriptor of `chain` at its buffer and mark it empty.
fn lay_out(
    pool: &mut DescriptorPool,
    chain: &Chain,
    buffers: &[usize],
    offset: u32,
    capacity: u32,
) {
    for (&index, &base) in chain.slots().iter().zip(buffers) {
        let mut descriptor = pool.get(index);
        descriptor.buffer = base + offset as usize;
        descriptor.size = DescriptorSize::empty(capacity);
        pool.set(index, descriptor);
    }
}

/// Return every descriptor of the channel to its freshly created layout.
///
/// Cursors are left to the caller.
pub(crate) fn rewire(kind: ChannelKind, core: &ChannelCore, pool: &mut DescriptorPool) {
    let geometry = &core.geometry;
    if let Some(chain) = &core.producer_chain {
        let (offset, capacity) = geometry.producer_layout(kind);
        lay_out(pool, chain, &core.buffers, offset, capacity);
    }
    if let Some(chain) = &core.consumer_chain {
        if !kind.is_auto() {
            let (offset, capacity) = geometry.consumer_layout(kind);
            lay_out(pool, chain, &core.buffers, offset, capacity);
        }
    }
    if let Some(index) = core.override_descriptor {
        let mut descriptor = pool.get(index);
        descriptor.size = DescriptorSize::empty(0);
        pool.set(index, descriptor);
    }
}

/// Free the channel's chains, buffers and override descriptor.
pub(crate) fn release(kind: ChannelKind, core: &mut ChannelCore, pool: &mut DescriptorPool) {
    let count = core.geometry.count;
    if kind.is_auto() {
        // One ring serves both sides.
        if let Some(chain) = core.producer_chain.take() {
            pool.free_chain(chain.first, count, true);
        }
        core.consumer_chain = None;
    } else {
        for chain in [core.producer_chain.take(), core.consumer_chain.take()]
            .into_iter()
            .flatten()
        {
            pool.free_chain(chain.first, count, false);
        }
        free_buffers(pool, &core.buffers);
    }
    core.buffers.clear();
    if let Some(index) = core.override_descriptor.take() {
        pool.free_one(index);
    }
}
