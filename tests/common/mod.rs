#![allow(dead_code)]

use std::sync::Arc;

use dma_channel::{DmaContext, DmaLimits, Ip, NoBoost, SocketId, SoftSocketBank};

pub const GPIF_0: SocketId = SocketId::new(Ip::Gpif, 0);
pub const GPIF_1: SocketId = SocketId::new(Ip::Gpif, 1);
pub const USB_IN_1: SocketId = SocketId::new(Ip::UsbIngress, 1);
pub const USB_OUT_1: SocketId = SocketId::new(Ip::UsbEgress, 1);

pub fn setup() -> (Arc<SoftSocketBank>, Arc<DmaContext>) {
    setup_with(DmaLimits::default())
}

pub fn setup_with(limits: DmaLimits) -> (Arc<SoftSocketBank>, Arc<DmaContext>) {
    let bank = Arc::new(SoftSocketBank::new());
    let ctx = DmaContext::with_critical_section(limits, bank.clone(), Box::new(NoBoost));
    (bank, ctx)
}

/// `len` bytes of a repeating pattern starting at `seed`.
pub fn pattern(seed: u8, len: usize) -> Vec<u8> {
    (0..len).map(|i| seed.wrapping_add(i as u8)).collect()
}
