#![cfg(feature = "async")]

mod common;

use std::thread;
use std::time::Duration;

use common::{setup, GPIF_0, USB_IN_1};
use dma_channel::{Buffer, BufferStatus, Channel, ChannelConfig, ChannelKind, Error, SocketId, Wait};

#[test]
fn async_get_buffer() {
    let (bank, ctx) = setup();
    let channel = Channel::create(
        &ctx,
        ChannelKind::ManualIn,
        ChannelConfig::new(512, 4, GPIF_0, SocketId::CPU_CONSUMER),
    )
    .unwrap();
    channel.set_transfer(0).unwrap();

    let producer = {
        let (bank, ctx) = (bank.clone(), ctx.clone());
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            bank.produce(&ctx, GPIF_0, b"async", true).unwrap();
        })
    };
    let buffer = async_io::block_on(channel.get_buffer_async(Wait::from_millis(2000))).unwrap();
    producer.join().unwrap();
    assert_eq!(unsafe { buffer.data() }, b"async");

    channel.discard_buffer().unwrap();
    assert_eq!(
        async_io::block_on(channel.get_buffer_async(Wait::from_millis(10))),
        Err(Error::Timeout)
    );
}

#[test]
fn async_completion() {
    let (bank, ctx) = setup();
    let channel = Channel::create(
        &ctx,
        ChannelKind::Manual,
        ChannelConfig::new(512, 2, GPIF_0, USB_IN_1),
    )
    .unwrap();
    let mut memory = vec![3u8; 32];
    channel
        .setup_send_buffer(&Buffer::new(memory.as_mut_ptr() as usize, 32).with_count(32))
        .unwrap();

    let consumer = {
        let (bank, ctx) = (bank.clone(), ctx.clone());
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            bank.consume(&ctx, USB_IN_1).unwrap()
        })
    };
    async_io::block_on(channel.wait_for_completion_async(Wait::Forever)).unwrap();
    assert_eq!(consumer.join().unwrap().data, vec![3u8; 32]);
    assert_eq!(consumer_status(&channel), BufferStatus::empty());
}

fn consumer_status(channel: &Channel) -> BufferStatus {
    let index = channel.override_descriptor().unwrap();
    channel.context().descriptor(index).size.status
}

#[test]
fn async_recv_buffer_abort() {
    let (_bank, ctx) = setup();
    let channel = Channel::create(
        &ctx,
        ChannelKind::ManualIn,
        ChannelConfig::new(512, 4, GPIF_0, SocketId::CPU_CONSUMER),
    )
    .unwrap();
    let mut memory = vec![0u8; 64];
    channel
        .setup_recv_buffer(&Buffer::new(memory.as_mut_ptr() as usize, 64))
        .unwrap();

    let aborter = {
        let channel = channel.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            channel.abort().unwrap();
        })
    };
    assert_eq!(
        async_io::block_on(channel.wait_for_recv_buffer_async(Wait::Forever)),
        Err(Error::Aborted)
    );
    aborter.join().unwrap();
}
