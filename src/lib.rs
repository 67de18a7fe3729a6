//! DMA channels over socket pairs.
//!
//! A [`DmaContext`] owns one DMA engine's descriptor pool and socket
//! registers. [`Channel`]s connect a producer socket to a consumer socket
//! through descriptor chains and let software take part in the data path
//! without copying. Socket registers are reached through the
//! [`SocketRegisters`] trait; [`SoftSocketBank`] implements it in memory.

mod channel;
mod context;
mod critical;
mod descriptor;
mod dma_buffer;
mod error;
mod event;
mod limits;
mod pool;
mod registry;
mod socket;
mod soft_socket;
mod wait;

pub use channel::{
    Buffer, CallbackEvent, ChainCursors, Channel, ChannelCallback, ChannelConfig, ChannelKind,
    ChannelState, ChannelStatus, Side, TransferMode,
};
pub use context::DmaContext;
pub use critical::{CriticalSection, NoBoost, PriorityBoost};
pub use descriptor::{
    BufferStatus, ChainLinks, Descriptor, DescriptorIndex, DescriptorSize, Link, SyncFlags,
    SyncWord,
};
pub use dma_buffer::DmaBuffer;
pub use error::{Error, Result};
pub use event::{ChannelEvents, EventFlags};
pub use limits::DmaLimits;
pub use pool::{ChainIter, DescriptorPool};
pub use registry::SocketRegistry;
pub use socket::{
    Ip, SocketConfig, SocketId, SocketInterrupt, SocketInterrupts, SocketRegisters, SocketStatus,
    SuspendPolicy,
};
pub use soft_socket::{Consumed, SentEvent, SoftSocketBank};
pub use wait::Wait;
