use std::sync::Arc;

use dma_channel::{
    Buffer, BufferStatus, Channel, ChannelConfig, ChannelKind, DmaBuffer, DmaContext, DmaLimits, Ip,
    Result, SocketId, SoftSocketBank, Wait,
};

fn main() -> Result<()> {
    let bank = Arc::new(SoftSocketBank::new());
    let ctx = DmaContext::new(DmaLimits::default(), bank.clone());

    let storage = SocketId::new(Ip::Storage, 0);
    let usb = SocketId::new(Ip::UsbEgress, 2);
    // no buffers of its own: the channel only carries override transfers
    let channel = Channel::create(
        &ctx,
        ChannelKind::Auto,
        ChannelConfig::new(512, 0, usb, storage),
    )?;

    let block = DmaBuffer::new(512, 16)?;
    println!("{:?}", block);
    for (i, b) in block.slice::<u8>().iter_mut().enumerate() {
        *b = i as u8;
    }

    let mut send = Buffer::new(block.addr(), 512).with_count(512);
    send.status = BufferStatus::END_OF_PACKET;
    channel.setup_send_buffer(&send)?;
    let written = bank.consume(&ctx, storage).expect("override buffer");
    channel.wait_for_completion(Wait::from_millis(100))?;
    println!("sent {} bytes, {:?}", written.data.len(), channel.status()?);

    let target = DmaBuffer::new(1024, 16)?;
    channel.setup_recv_buffer(&Buffer::new(target.addr(), 1024))?;
    bank.produce(&ctx, usb, &written.data, true);
    let received = channel.wait_for_recv_buffer(Wait::from_millis(100))?;
    println!("received {} bytes, {:?}", received.count, channel.status()?);
    assert_eq!(&target.slice::<u8>()[..512], block.slice::<u8>());

    channel.destroy()
}
