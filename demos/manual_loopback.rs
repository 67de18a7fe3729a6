use std::sync::Arc;

use dma_channel::{
    BufferStatus, Channel, ChannelConfig, ChannelKind, DmaContext, DmaLimits, Ip, Result, SocketId,
    SoftSocketBank, Wait,
};

fn main() -> Result<()> {
    let bank = Arc::new(SoftSocketBank::new());
    let ctx = DmaContext::new(DmaLimits::default(), bank.clone());
    println!("{:?}", ctx);

    let gpif = SocketId::new(Ip::Gpif, 0);
    let usb = SocketId::new(Ip::UsbIngress, 1);

    // 16 byte header in front of every buffer the host receives
    let config = ChannelConfig::new(1024, 4, gpif, usb)
        .producer_header(16)
        .consumer_header(0);
    let channel = Channel::create(&ctx, ChannelKind::Manual, config)?;
    println!("{:?}", channel);

    channel.set_transfer(0)?;

    for seq in 0..16u32 {
        let items = fastrand::usize(1..=252);
        let data: Vec<u8> = (0..items * 4).map(|_| fastrand::u8(..)).collect();
        bank.produce(&ctx, gpif, &data, true);

        let buffer = channel.get_buffer(Wait::from_millis(100))?;
        // every fourth buffer is dropped
        if seq % 4 == 3 {
            channel.discard_buffer()?;
            assert!(bank.consume(&ctx, usb).is_none());
            continue;
        }

        let header =
            unsafe { std::slice::from_raw_parts_mut((buffer.address - 16) as *mut u8, 16) };
        header[..4].copy_from_slice(&seq.to_le_bytes());
        header[4..8].copy_from_slice(&buffer.count.to_le_bytes());
        channel.commit_buffer(buffer.count + 16, BufferStatus::empty())?;

        let consumed = bank.consume(&ctx, usb).expect("committed buffer");
        assert_eq!(&consumed.data[..4], &seq.to_le_bytes());
        assert_eq!(&consumed.data[16..], &data[..]);
        println!("seq {:2}: {:4} bytes, {:?}", seq, consumed.data.len(), consumed.status);
    }

    println!("{:?}", channel.status()?);
    channel.destroy()
}
