use std::sync::Arc;
use std::thread;
use std::time::Duration;

use dma_channel::{
    Channel, ChannelConfig, ChannelKind, ChannelState, DmaContext, DmaLimits, Error, Ip, Result,
    SocketId, SoftSocketBank, Wait,
};

fn main() -> Result<()> {
    let bank = Arc::new(SoftSocketBank::new());
    let ctx = DmaContext::new(DmaLimits::default(), bank.clone());

    let gpif = SocketId::new(Ip::Gpif, 3);
    let config = ChannelConfig::new(4096, 8, gpif, SocketId::CPU_CONSUMER);
    let channel = Channel::create(&ctx, ChannelKind::ManualIn, config)?;
    println!("{:?}", channel);

    let buffers = 20;
    channel.set_transfer(buffers)?;

    let producer = {
        let (bank, ctx) = (bank.clone(), ctx.clone());
        thread::spawn(move || {
            let mut sent = 0;
            while sent < buffers {
                let len = fastrand::usize(1..=4096);
                let data = vec![sent as u8; len];
                if bank.produce(&ctx, gpif, &data, false).is_some() {
                    sent += 1;
                } else {
                    thread::sleep(Duration::from_millis(1));
                }
            }
        })
    };

    let mut received = 0;
    loop {
        match channel.get_buffer(Wait::from_millis(500)) {
            Ok(buffer) => {
                let data = unsafe { buffer.data() };
                assert!(data.iter().all(|b| *b == received as u8));
                received += 1;
                channel.discard_buffer()?;
            }
            Err(Error::NotStarted) => break,
            Err(e) => return Err(e),
        }
        if channel.state() == ChannelState::Configured {
            break;
        }
    }
    producer.join().expect("producer thread");

    channel.wait_for_completion(Wait::from_millis(500))?;
    println!("received {} buffers, {:?}", received, channel.status()?);
    Ok(())
}
