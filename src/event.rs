//! Channel event flags

use std::time::Instant;

use bitflags::bitflags;
use parking_lot::{Condvar, Mutex};

#[cfg(feature = "async")]
use std::task::{Context, Poll, Waker};

use crate::{Error, Result, Wait};

bitflags! {
    /// Channel events.
    ///
    /// The same bits are used for the event-flag group, the callback
    /// notification mask and [`CallbackEvent::kind`](crate::CallbackEvent::kind).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ChannelEvents: u32 {
        const TRANSFER_COMPLETE = 1 << 0;
        const SEND_COMPLETE = 1 << 1;
        const RECV_COMPLETE = 1 << 2;
        const PRODUCE_EVENT = 1 << 3;
        const CONSUME_EVENT = 1 << 4;
        const ABORTED = 1 << 5;
        const ERROR = 1 << 6;
        const PRODUCER_SUSPENDED = 1 << 7;
        const CONSUMER_SUSPENDED = 1 << 8;
    }
}

impl ChannelEvents {
    /// Events that end every wait.
    pub const FAILURE: ChannelEvents = ChannelEvents::ERROR.union(ChannelEvents::ABORTED);

    pub const COMPLETION: ChannelEvents = ChannelEvents::TRANSFER_COMPLETE
        .union(ChannelEvents::SEND_COMPLETE)
        .union(ChannelEvents::RECV_COMPLETE);

    /// Turn a failure event into its error. Errors win over aborts.
    pub fn check_failure(self) -> Result<ChannelEvents> {
        if self.contains(ChannelEvents::ERROR) {
            Err(Error::DmaFailure)
        } else if self.contains(ChannelEvents::ABORTED) {
            Err(Error::Aborted)
        } else {
            Ok(self)
        }
    }
}

/// An event-flag group.
///
/// The servicing layer sets flags; blocking API calls wait on any of a set
/// of flags. Flags stay set until cleared.
#[derive(Default)]
pub struct EventFlags {
    flags: Mutex<ChannelEvents>,
    cond: Condvar,
    #[cfg(feature = "async")]
    wakers: Mutex<Vec<Waker>>,
}

impl EventFlags {
    pub fn new() -> EventFlags {
        EventFlags::default()
    }

    pub fn get(&self) -> ChannelEvents {
        *self.flags.lock()
    }

    pub fn set(&self, events: ChannelEvents) {
        *self.flags.lock() |= events;
        self.cond.notify_all();
        #[cfg(feature = "async")]
        for waker in self.wakers.lock().drain(..) {
            waker.wake();
        }
    }

    pub fn clear(&self, events: ChannelEvents) {
        self.flags.lock().remove(events);
    }

    /// Wait until any of `mask` is set and return the matching flags.
    pub fn wait_any(&self, mask: ChannelEvents, wait: Wait) -> Result<ChannelEvents> {
        self.wait_any_until(mask, wait.deadline(Instant::now()))
    }

    /// Like [`wait_any`](Self::wait_any) with an absolute deadline, `None`
    /// waiting forever.
    pub fn wait_any_until(
        &self,
        mask: ChannelEvents,
        deadline: Option<Instant>,
    ) -> Result<ChannelEvents> {
        let mut flags = self.flags.lock();
        loop {
            let hit = *flags & mask;
            if !hit.is_empty() {
                return Ok(hit);
            }
            match deadline {
                None => self.cond.wait(&mut flags),
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return Err(Error::Timeout);
                    }
                    // Re-checked at the top of the loop, timed out or not.
                    let _ = self.cond.wait_until(&mut flags, deadline);
                }
            }
        }
    }

    #[cfg(feature = "async")]
    pub fn poll_any(&self, mask: ChannelEvents, cx: &mut Context<'_>) -> Poll<ChannelEvents> {
        // Register first so a `set` racing with the check still wakes us.
        self.wakers.lock().push(cx.waker().clone());
        let hit = self.get() & mask;
        if hit.is_empty() {
            Poll::Pending
        } else {
            Poll::Ready(hit)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn set_then_wait() {
        let flags = EventFlags::new();
        flags.set(ChannelEvents::PRODUCE_EVENT | ChannelEvents::ERROR);
        let hit = flags
            .wait_any(ChannelEvents::PRODUCE_EVENT, Wait::NoWait)
            .unwrap();
        assert_eq!(hit, ChannelEvents::PRODUCE_EVENT);
        flags.clear(ChannelEvents::PRODUCE_EVENT);
        assert_eq!(flags.get(), ChannelEvents::ERROR);
    }

    #[test]
    fn no_wait_times_out() {
        let flags = EventFlags::new();
        assert_eq!(
            flags.wait_any(ChannelEvents::all(), Wait::NoWait),
            Err(Error::Timeout)
        );
        assert_eq!(
            flags.wait_any(ChannelEvents::all(), Wait::from_millis(10)),
            Err(Error::Timeout)
        );
    }

    #[test]
    fn wakes_waiting_thread() {
        let flags = Arc::new(EventFlags::new());
        let setter = flags.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            setter.set(ChannelEvents::ABORTED);
        });
        let hit = flags
            .wait_any(
                ChannelEvents::CONSUME_EVENT | ChannelEvents::FAILURE,
                Wait::Forever,
            )
            .unwrap();
        assert_eq!(hit.check_failure(), Err(Error::Aborted));
        handle.join().unwrap();
    }

    #[test]
    fn error_wins_over_abort() {
        assert_eq!(
            ChannelEvents::FAILURE.check_failure(),
            Err(Error::DmaFailure)
        );
        assert_eq!(
            ChannelEvents::TRANSFER_COMPLETE.check_failure(),
            Ok(ChannelEvents::TRANSFER_COMPLETE)
        );
    }
}
