use std::sync::Arc;
use std::thread;
use std::time::Duration;

use dma_channel::{
    BufferStatus, Channel, ChannelConfig, ChannelKind, DmaContext, DmaLimits, Error, Ip, Result,
    SocketId, SoftSocketBank, Wait,
};

fn main() -> Result<()> {
    let bank = Arc::new(SoftSocketBank::new());
    let ctx = DmaContext::new(DmaLimits::default(), bank.clone());

    let usb = SocketId::new(Ip::UsbIngress, 4);
    let config = ChannelConfig::new(1024, 4, SocketId::CPU_PRODUCER, usb);
    let channel = Channel::create(&ctx, ChannelKind::ManualOut, config)?;
    println!("{:?}", channel);

    let items = 64;
    channel.set_transfer(items)?;

    let consumer = {
        let (bank, ctx) = (bank.clone(), ctx.clone());
        thread::spawn(move || {
            let mut total = 0;
            let mut drained = 0;
            while drained < items {
                match bank.consume(&ctx, usb) {
                    Some(consumed) => {
                        total += consumed.data.len();
                        drained += 1;
                    }
                    None => thread::sleep(Duration::from_micros(200)),
                }
            }
            total
        })
    };

    let sent = async_io::block_on(async {
        let mut sent = 0;
        for _ in 0..items {
            let buffer = channel.get_buffer_async(Wait::from_millis(1000)).await?;
            let words = fastrand::usize(1..=256);
            let payload = unsafe { &mut buffer.as_mut_slice()[..words * 4] };
            for w in payload.chunks_exact_mut(4) {
                w.copy_from_slice(&fastrand::u32(..).to_le_bytes());
            }
            channel.commit_buffer((words * 4) as u32, BufferStatus::empty())?;
            sent += words * 4;
        }
        channel.wait_for_completion_async(Wait::from_millis(1000)).await?;
        Ok::<usize, Error>(sent)
    })?;

    let total = consumer.join().expect("consumer thread");
    assert_eq!(sent, total);
    println!("moved {} bytes, {:?}", total, channel.status()?);
    Ok(())
}
