//! Hardware limits used to validate channel geometry and socket numbers

use crate::socket::Ip;

/// Hardware constants for a DMA engine instance.
///
/// The defaults describe the reference USB peripheral controller. Tests and
/// smaller targets can shrink the descriptor pool or socket counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmaLimits {
    /// Largest buffer a single descriptor can describe, in bytes.
    pub max_buffer_size: u32,
    /// Buffer sizes must be a multiple of this many bytes.
    pub alignment: u32,
    /// Buffer counts at or above this value cannot use an avail-count threshold.
    pub avail_count_limit: u16,
    /// Number of hardware descriptor slots.
    pub descriptor_count: u16,
    /// Sockets per IP block, indexed by [`Ip::index`].
    pub sockets_per_ip: [u8; Ip::COUNT],
}

impl Default for DmaLimits {
    fn default() -> Self {
        DmaLimits {
            max_buffer_size: 0xFFF0,
            alignment: 16,
            avail_count_limit: 32,
            descriptor_count: 512,
            sockets_per_ip: [8, 32, 6, 16, 16],
        }
    }
}

impl DmaLimits {
    /// Round `size` up to the next multiple of the alignment unit.
    pub fn align_up(&self, size: u32) -> u32 {
        let unit = self.alignment.max(1);
        size.div_ceil(unit) * unit
    }

    pub fn is_aligned(&self, size: u32) -> bool {
        size % self.alignment.max(1) == 0
    }

    pub fn sockets_on(&self, ip: Ip) -> u8 {
        self.sockets_per_ip[ip.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment() {
        let limits = DmaLimits::default();
        assert_eq!(limits.align_up(0), 0);
        assert_eq!(limits.align_up(1), 16);
        assert_eq!(limits.align_up(512), 512);
        assert!(limits.is_aligned(1024));
        assert!(!limits.is_aligned(1000));
        assert_eq!(limits.sockets_on(Ip::UsbEgress), 16);
    }
}
