//! Hardware sockets and the register interface the channel layer drives

use std::fmt;

use bitflags::bitflags;

use crate::descriptor::DescriptorIndex;

/// IP blocks that own DMA sockets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ip {
    /// Low performance peripherals (serial, I2S, SPI)
    Serial,
    /// General programmable interface
    Gpif,
    /// Storage (SD/MMC/SDIO)
    Storage,
    /// USB egress endpoints
    UsbEgress,
    /// USB ingress endpoints
    UsbIngress,
}

impl Ip {
    pub const COUNT: usize = 5;

    const CPU_RAW: u8 = 0x3F;

    pub const fn index(self) -> usize {
        self as usize
    }

    fn from_raw(raw: u8) -> Option<Ip> {
        match raw {
            0 => Some(Ip::Serial),
            1 => Some(Ip::Gpif),
            2 => Some(Ip::Storage),
            3 => Some(Ip::UsbEgress),
            4 => Some(Ip::UsbIngress),
            _ => None,
        }
    }
}

/// A hardware socket, or one of the two virtual CPU sockets.
///
/// The upper byte names the IP block and the lower byte the socket number
/// within that block.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(u16);

impl SocketId {
    /// The CPU acting as the consumer of a channel.
    pub const CPU_CONSUMER: SocketId = SocketId((Ip::CPU_RAW as u16) << 8);
    /// The CPU acting as the producer of a channel.
    pub const CPU_PRODUCER: SocketId = SocketId(((Ip::CPU_RAW as u16) << 8) | 1);

    pub const fn new(ip: Ip, number: u8) -> SocketId {
        SocketId(((ip as u16) << 8) | number as u16)
    }

    pub const fn from_raw(raw: u16) -> SocketId {
        SocketId(raw)
    }

    pub const fn raw(self) -> u16 {
        self.0
    }

    /// The owning IP block, `None` for CPU sockets and unknown blocks.
    pub fn ip(self) -> Option<Ip> {
        Ip::from_raw((self.0 >> 8) as u8)
    }

    pub const fn number(self) -> u8 {
        (self.0 & 0xFF) as u8
    }

    pub const fn is_cpu(self) -> bool {
        (self.0 >> 8) as u8 == Ip::CPU_RAW
    }
}

impl fmt::Debug for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == SocketId::CPU_CONSUMER {
            write!(f, "CPU.cons")
        } else if *self == SocketId::CPU_PRODUCER {
            write!(f, "CPU.prod")
        } else {
            match self.ip() {
                Some(ip) => write!(f, "{:?}.{}", ip, self.number()),
                None => write!(f, "Socket({:#06x})", self.0),
            }
        }
    }
}

bitflags! {
    /// Socket status flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SocketStatus: u32 {
        const ENABLED = 1 << 0;
        const SUSPENDED = 1 << 1;
        const GO_ENABLE = 1 << 2;
        const WRAPUP = 1 << 3;
        /// Stop once `transfer_size` units have moved.
        const TRUNCATE = 1 << 4;
        /// `transfer_size` counts buffers instead of bytes.
        const UNIT_BUFFER = 1 << 5;
        const AVAIL_ENABLE = 1 << 6;
    }
}

bitflags! {
    /// Socket interrupt sources, used both as pending flags and as a mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SocketInterrupts: u32 {
        const PRODUCE_EVENT = 1 << 0;
        const CONSUME_EVENT = 1 << 1;
        const TRANSFER_DONE = 1 << 2;
        const SUSPEND = 1 << 3;
        const ERROR = 1 << 4;
        const STALL = 1 << 5;
        const PARTIAL_BUFFER = 1 << 6;
    }
}

/// The register view of one socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SocketConfig {
    /// Descriptor the socket works on next.
    pub descriptor_head: Option<DescriptorIndex>,
    /// Units to move before the transfer is done, 0 for unbounded.
    pub transfer_size: u32,
    /// Units moved so far.
    pub transfer_count: u32,
    pub status: SocketStatus,
    /// Pending interrupts.
    pub interrupts: SocketInterrupts,
    pub interrupt_mask: SocketInterrupts,
    /// Free-buffer threshold below which the producer throttles.
    pub avail_count: u16,
}

/// When a socket suspends itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SuspendPolicy {
    #[default]
    None,
    /// After a buffer carrying end-of-packet.
    EndOfPacket,
    /// After the buffer in progress completes.
    CurrentBuffer,
    /// After a partially filled buffer (consumer only).
    PartialBuffer,
}

/// An interrupt raised by a socket, delivered by the servicing layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketInterrupt {
    /// A buffer was produced into a descriptor that interrupts the CPU.
    Produced(DescriptorIndex),
    /// A buffer was consumed from a descriptor that interrupts the CPU.
    Consumed(DescriptorIndex),
    TransferDone,
    Suspended,
    /// The consumer stopped at a drop-marker descriptor.
    Stall,
    Error,
}

/// Access to the socket register blocks.
///
/// The channel layer never touches registers directly. Implementations must
/// not call back into the channel layer from these methods: interrupts are
/// delivered separately through
/// [`DmaContext::on_socket_interrupt`](crate::DmaContext::on_socket_interrupt).
pub trait SocketRegisters: Send + Sync {
    fn get_config(&self, socket: SocketId) -> SocketConfig;
    fn set_config(&self, socket: SocketId, config: &SocketConfig);
    fn enable(&self, socket: SocketId);
    fn disable(&self, socket: SocketId);
    /// Tell `socket` that `descriptor` changed hands.
    ///
    /// `producer_event` is true when software acted as the producer (a buffer
    /// became available to a consumer socket), false when it acted as the
    /// consumer (a buffer was handed back to a producer socket).
    fn send_event(&self, socket: SocketId, descriptor: DescriptorIndex, producer_event: bool);
    fn set_suspend_option(&self, socket: SocketId, policy: SuspendPolicy);
    /// Clear pending interrupts and leave the suspended state.
    fn resume(&self, socket: SocketId, policy: SuspendPolicy);
}
