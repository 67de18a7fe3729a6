mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{setup, setup_with, GPIF_0, GPIF_1, USB_IN_1};
use dma_channel::{
    Buffer, CallbackEvent, Channel, ChannelConfig, ChannelEvents, ChannelKind, ChannelState,
    DmaLimits, Error, SocketId, SocketRegisters, SocketStatus, SuspendPolicy, TransferMode, Wait,
};

fn config_for(kind: ChannelKind, size: u32, count: u16) -> ChannelConfig {
    match kind {
        ChannelKind::ManualIn => ChannelConfig::new(size, count, GPIF_0, SocketId::CPU_CONSUMER),
        ChannelKind::ManualOut => ChannelConfig::new(size, count, SocketId::CPU_PRODUCER, USB_IN_1),
        _ => ChannelConfig::new(size, count, GPIF_0, USB_IN_1),
    }
}

const KINDS: [ChannelKind; 5] = [
    ChannelKind::Auto,
    ChannelKind::AutoSignal,
    ChannelKind::Manual,
    ChannelKind::ManualIn,
    ChannelKind::ManualOut,
];

#[test]
fn create_destroy_leaks_nothing() {
    let (_bank, ctx) = setup();
    let free = ctx.free_descriptors();
    for kind in KINDS {
        let channel = Channel::create(&ctx, kind, config_for(kind, 1024, 4)).unwrap();
        assert_eq!(channel.state(), ChannelState::Configured);
        assert!(ctx.free_descriptors() < free);
        channel.destroy().unwrap();
        assert_eq!(ctx.free_descriptors(), free, "{:?}", kind);
        assert_eq!(ctx.allocated_buffers(), 0, "{:?}", kind);
        assert!(!ctx.socket_owned(GPIF_0));
        assert!(!ctx.socket_owned(USB_IN_1));
        assert_eq!(channel.destroy(), Err(Error::NotConfigured));
    }
}

#[test]
fn dropping_last_handle_releases() {
    let (_bank, ctx) = setup();
    let free = ctx.free_descriptors();
    {
        let channel = Channel::create(
            &ctx,
            ChannelKind::Manual,
            config_for(ChannelKind::Manual, 512, 8),
        )
        .unwrap();
        let other = channel.clone();
        drop(channel);
        assert!(ctx.socket_owned(GPIF_0));
        assert_eq!(other.state(), ChannelState::Configured);
    }
    assert_eq!(ctx.free_descriptors(), free);
    assert!(!ctx.socket_owned(GPIF_0));
}

#[test]
fn avail_count_is_validated() {
    let (_bank, ctx) = setup();
    let free = ctx.free_descriptors();

    let config = config_for(ChannelKind::Auto, 512, 4).avail_count(4);
    assert!(matches!(Channel::create(&ctx, ChannelKind::Auto, config), Err(Error::BadArgument(_))));

    let config = config_for(ChannelKind::Auto, 512, 32).avail_count(2);
    assert!(matches!(Channel::create(&ctx, ChannelKind::Auto, config), Err(Error::BadArgument(_))));

    assert_eq!(ctx.free_descriptors(), free);
    assert!(!ctx.socket_owned(GPIF_0));

    let config = config_for(ChannelKind::Auto, 512, 31).avail_count(30);
    Channel::create(&ctx, ChannelKind::Auto, config).unwrap();
}

#[test]
fn geometry_is_validated() {
    let (_bank, ctx) = setup();
    for (kind, config) in [
        (ChannelKind::Auto, config_for(ChannelKind::Auto, 0, 4)),
        (ChannelKind::Auto, config_for(ChannelKind::Auto, 0x10000, 4)),
        (ChannelKind::Auto, config_for(ChannelKind::Auto, 100, 4)),
        (
            ChannelKind::Manual,
            config_for(ChannelKind::Manual, 512, 4).producer_header(12),
        ),
        (
            ChannelKind::ManualIn,
            config_for(ChannelKind::ManualIn, 64, 4)
                .producer_header(32)
                .producer_footer(32),
        ),
    ] {
        assert!(
            matches!(Channel::create(&ctx, kind, config.clone()), Err(Error::BadArgument(_))),
            "{:?}",
            config
        );
    }

    // Headers may make the total unaligned as long as the payload is not.
    let config = config_for(ChannelKind::Manual, 524, 4).producer_header(12);
    Channel::create(&ctx, ChannelKind::Manual, config).unwrap();
}

#[test]
fn sockets_are_validated() {
    let (_bank, ctx) = setup();
    let bad = [
        (ChannelKind::Auto, ChannelConfig::new(512, 4, GPIF_0, GPIF_0)),
        (
            ChannelKind::Auto,
            ChannelConfig::new(512, 4, SocketId::CPU_PRODUCER, USB_IN_1),
        ),
        (ChannelKind::ManualIn, ChannelConfig::new(512, 4, GPIF_0, USB_IN_1)),
        (
            ChannelKind::ManualOut,
            ChannelConfig::new(512, 4, GPIF_0, USB_IN_1),
        ),
        (
            ChannelKind::Manual,
            ChannelConfig::new(512, 4, SocketId::new(dma_channel::Ip::Storage, 6), USB_IN_1),
        ),
    ];
    for (kind, config) in bad {
        assert!(
            matches!(Channel::create(&ctx, kind, config), Err(Error::BadArgument(_))),
            "{:?}",
            kind
        );
    }

    let _held = Channel::create(
        &ctx,
        ChannelKind::Auto,
        ChannelConfig::new(512, 4, GPIF_0, USB_IN_1),
    )
    .unwrap();
    assert_eq!(
        Channel::create(
            &ctx,
            ChannelKind::Auto,
            ChannelConfig::new(512, 4, GPIF_1, USB_IN_1),
        )
        .err(),
        Some(Error::BadArgument("socket already in use"))
    );
    assert!(!ctx.socket_owned(GPIF_1));
}

#[test]
fn descriptor_shortage() {
    let limits = DmaLimits {
        descriptor_count: 8,
        ..DmaLimits::default()
    };
    let (_bank, ctx) = setup_with(limits);
    // Manual channels reserve headroom for four descriptors per buffer.
    let config = config_for(ChannelKind::Manual, 256, 2);
    assert_eq!(
        Channel::create(&ctx, ChannelKind::Manual, config).err(),
        Some(Error::MemoryError)
    );
    assert_eq!(ctx.free_descriptors(), 8);
    assert!(!ctx.socket_owned(GPIF_0));

    let config = config_for(ChannelKind::Auto, 256, 7);
    let _channel = Channel::create(&ctx, ChannelKind::Auto, config).unwrap();
    assert_eq!(ctx.free_descriptors(), 0);
}

#[test]
fn override_only_channel() {
    let (_bank, ctx) = setup();
    let channel = Channel::create(
        &ctx,
        ChannelKind::Auto,
        config_for(ChannelKind::Auto, 512, 0),
    )
    .unwrap();
    assert!(channel.override_descriptor().is_some());
    assert!(matches!(channel.set_transfer(0), Err(Error::NotSupported(_))));
}

#[test]
fn set_transfer_programs_sockets() {
    let (bank, ctx) = setup();
    let channel = Channel::create(
        &ctx,
        ChannelKind::Auto,
        config_for(ChannelKind::Auto, 1024, 8),
    )
    .unwrap();

    channel.set_transfer(0).unwrap();
    assert_eq!(channel.state(), ChannelState::Active);
    let consumer = bank.get_config(USB_IN_1);
    assert!(consumer.status.contains(SocketStatus::ENABLED | SocketStatus::UNIT_BUFFER));
    assert!(!consumer.status.contains(SocketStatus::TRUNCATE));
    assert!(!consumer
        .interrupt_mask
        .contains(dma_channel::SocketInterrupts::TRANSFER_DONE));
    assert_eq!(channel.set_transfer(0), Err(Error::AlreadyStarted));
    assert_eq!(channel.update_mode(TransferMode::Byte), Err(Error::AlreadyStarted));

    channel.reset().unwrap();
    channel.update_mode(TransferMode::Byte).unwrap();
    channel.set_transfer(4096).unwrap();
    let producer = bank.get_config(GPIF_0);
    assert!(producer.status.contains(SocketStatus::TRUNCATE));
    assert!(!producer.status.contains(SocketStatus::UNIT_BUFFER));
    assert_eq!(producer.transfer_size, 4096);
}

#[test]
fn reset_is_idempotent() {
    let (bank, ctx) = setup();
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    let config = config_for(ChannelKind::ManualIn, 512, 4).callback(
        ChannelEvents::ABORTED,
        move |_: &Channel, event: CallbackEvent| {
            assert_eq!(event, CallbackEvent::Aborted);
            seen.fetch_add(1, Ordering::SeqCst);
        },
    );
    let channel = Channel::create(&ctx, ChannelKind::ManualIn, config).unwrap();
    channel.set_transfer(0).unwrap();
    bank.produce(&ctx, GPIF_0, &[1, 2, 3], false).unwrap();

    channel.reset().unwrap();
    let first = (channel.status().unwrap(), channel.cursors(dma_channel::Side::Producer));
    channel.reset().unwrap();
    let second = (channel.status().unwrap(), channel.cursors(dma_channel::Side::Producer));
    assert_eq!(first, second);
    assert_eq!(first.0.state, ChannelState::Configured);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let cursors = first.1.unwrap();
    assert_eq!(cursors.current, cursors.first);
    for index in cursors.descriptors {
        assert!(!ctx.descriptor(index).size.is_occupied());
    }
    assert!(!bank.get_config(GPIF_0).status.contains(SocketStatus::ENABLED));
}

#[test]
fn abort_blocks_until_reset() {
    let (_bank, ctx) = setup();
    let channel = Channel::create(
        &ctx,
        ChannelKind::Manual,
        config_for(ChannelKind::Manual, 512, 4),
    )
    .unwrap();
    channel.set_transfer(0).unwrap();
    channel.abort().unwrap();

    assert_eq!(channel.status().unwrap().state, ChannelState::Aborted);
    assert_eq!(channel.get_buffer(Wait::NoWait), Err(Error::Aborted));
    assert_eq!(channel.commit_buffer(0, Default::default()), Err(Error::Aborted));
    assert_eq!(channel.discard_buffer(), Err(Error::Aborted));
    assert_eq!(channel.set_transfer(0), Err(Error::Aborted));
    assert_eq!(channel.set_wrap_up(), Err(Error::Aborted));
    assert_eq!(
        channel.set_suspend(SuspendPolicy::None, SuspendPolicy::None),
        Err(Error::Aborted)
    );
    assert_eq!(channel.resume(true, true), Err(Error::Aborted));
    assert_eq!(channel.wait_for_completion(Wait::NoWait), Err(Error::Aborted));
    assert_eq!(channel.cache_control(true), Err(Error::Aborted));
    assert_eq!(channel.send_data(0x1000, 16), Err(Error::Aborted));
    let mut memory = vec![0u8; 32];
    let target = Buffer::new(memory.as_mut_ptr() as usize, 32);
    assert_eq!(channel.setup_recv_buffer(&target), Err(Error::Aborted));
    assert_eq!(channel.abort(), Err(Error::Aborted));

    channel.reset().unwrap();
    channel.set_transfer(0).unwrap();
    assert_eq!(channel.get_buffer(Wait::NoWait), Err(Error::Timeout));
}

#[test]
fn suspend_policies_are_checked() {
    let (bank, ctx) = setup();
    let channel = Channel::create(
        &ctx,
        ChannelKind::ManualIn,
        config_for(ChannelKind::ManualIn, 512, 4),
    )
    .unwrap();
    assert!(matches!(
        channel.set_suspend(SuspendPolicy::PartialBuffer, SuspendPolicy::None),
        Err(Error::BadArgument(_))
    ));
    assert!(matches!(
        channel.set_suspend(SuspendPolicy::None, SuspendPolicy::EndOfPacket),
        Err(Error::InvalidConfiguration(_))
    ));
    assert_eq!(channel.resume(true, false), Err(Error::NotStarted));

    channel
        .set_suspend(SuspendPolicy::EndOfPacket, SuspendPolicy::None)
        .unwrap();
    channel.set_transfer(0).unwrap();
    assert_eq!(bank.suspend_policy(GPIF_0), SuspendPolicy::EndOfPacket);

    channel
        .set_suspend(SuspendPolicy::CurrentBuffer, SuspendPolicy::None)
        .unwrap();
    assert_eq!(bank.suspend_policy(GPIF_0), SuspendPolicy::CurrentBuffer);
    bank.produce(&ctx, GPIF_0, &[0; 16], false).unwrap();
    assert!(channel.events().contains(ChannelEvents::PRODUCER_SUSPENDED));
    assert!(bank.produce(&ctx, GPIF_0, &[0; 16], false).is_none());

    // Current-buffer suspension is one-shot.
    channel.resume(true, false).unwrap();
    assert_eq!(bank.suspend_policy(GPIF_0), SuspendPolicy::None);
    assert!(!channel.events().contains(ChannelEvents::PRODUCER_SUSPENDED));
    assert!(bank.produce(&ctx, GPIF_0, &[0; 16], false).is_some());
}

#[test]
fn wrap_up_ends_packet() {
    let (bank, ctx) = setup();
    let channel = Channel::create(
        &ctx,
        ChannelKind::ManualIn,
        config_for(ChannelKind::ManualIn, 512, 4),
    )
    .unwrap();
    assert_eq!(channel.set_wrap_up(), Err(Error::NotStarted));
    channel.set_transfer(0).unwrap();
    channel.set_wrap_up().unwrap();
    bank.produce(&ctx, GPIF_0, &[7; 10], false).unwrap();
    let buffer = channel.get_buffer(Wait::NoWait).unwrap();
    assert!(buffer
        .status
        .contains(dma_channel::BufferStatus::END_OF_PACKET));

    let out = Channel::create(
        &ctx,
        ChannelKind::ManualOut,
        ChannelConfig::new(512, 2, SocketId::CPU_PRODUCER, GPIF_1),
    )
    .unwrap();
    assert!(matches!(out.set_wrap_up(), Err(Error::NotSupported(_))));
}

#[test]
fn socket_error_fails_waiters() {
    let (bank, ctx) = setup();
    let errors = Arc::new(AtomicUsize::new(0));
    let seen = errors.clone();
    let config = config_for(ChannelKind::ManualIn, 512, 4).callback(
        ChannelEvents::ERROR,
        move |_: &Channel, _: CallbackEvent| {
            seen.fetch_add(1, Ordering::SeqCst);
        },
    );
    let channel = Channel::create(&ctx, ChannelKind::ManualIn, config).unwrap();
    channel.set_transfer(0).unwrap();

    let waiter = {
        let channel = channel.clone();
        std::thread::spawn(move || channel.get_buffer(Wait::Forever))
    };
    std::thread::sleep(std::time::Duration::from_millis(20));
    bank.raise_error(&ctx, GPIF_0);
    assert_eq!(waiter.join().unwrap(), Err(Error::DmaFailure));

    assert_eq!(channel.state(), ChannelState::Error);
    assert_eq!(channel.wait_for_completion(Wait::NoWait), Err(Error::DmaFailure));
    assert_eq!(errors.load(Ordering::SeqCst), 1);

    channel.reset().unwrap();
    assert_eq!(channel.state(), ChannelState::Configured);
}

#[test]
fn destroy_unblocks_waiters() {
    let (_bank, ctx) = setup();
    let channel = Channel::create(
        &ctx,
        ChannelKind::ManualIn,
        config_for(ChannelKind::ManualIn, 512, 4),
    )
    .unwrap();
    channel.set_transfer(0).unwrap();
    let waiter = {
        let channel = channel.clone();
        std::thread::spawn(move || channel.get_buffer(Wait::Forever))
    };
    std::thread::sleep(std::time::Duration::from_millis(20));
    channel.destroy().unwrap();
    assert_eq!(waiter.join().unwrap(), Err(Error::Aborted));
    assert_eq!(channel.get_buffer(Wait::NoWait), Err(Error::NotConfigured));
}

#[test]
fn debug_reports_state() {
    let (_bank, ctx) = setup();
    let config = config_for(ChannelKind::Auto, 512, 2).lock_wait(Wait::NoWait);
    let channel = Channel::create(&ctx, ChannelKind::Auto, config).unwrap();
    channel.set_transfer(0).unwrap();
    channel.abort().unwrap();
    assert!(format!("{:?}", channel).contains("Aborted"));
}
