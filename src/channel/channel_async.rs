use std::future::{poll_fn, Future};
use std::pin::Pin;
use std::task::Poll;
use std::time::Instant;

use async_io::Timer;

use crate::event::ChannelEvents;
use crate::{Error, Result, Wait};

use super::{Attempt, Buffer, Channel};

impl Channel {
    async fn wait_events(
        &self,
        mask: ChannelEvents,
        deadline: Option<Instant>,
    ) -> Result<ChannelEvents> {
        let mut timer = deadline.map(Timer::at);
        let hit = poll_fn(|cx| {
            if let Poll::Ready(hit) = self.shared.events.poll_any(mask, cx) {
                return Poll::Ready(Ok(hit));
            }
            if let Some(timer) = timer.as_mut() {
                if Pin::new(timer).poll(cx).is_ready() {
                    return Poll::Ready(Err(Error::Timeout));
                }
            }
            Poll::Pending
        })
        .await?;
        hit.check_failure()
    }

    pub async fn wait_for_completion_async(&self, wait: Wait) -> Result<()> {
        let deadline = wait.deadline(Instant::now());
        loop {
            match self.try_completion()? {
                Attempt::Ready(()) => return Ok(()),
                Attempt::Wait(mask) => {
                    self.wait_events(mask | ChannelEvents::FAILURE, deadline).await?;
                }
            }
        }
    }

    pub async fn get_buffer_async(&self, wait: Wait) -> Result<Buffer> {
        let deadline = wait.deadline(Instant::now());
        loop {
            match self.try_get_buffer()? {
                Attempt::Ready(buffer) => return Ok(buffer),
                Attempt::Wait(mask) => {
                    self.wait_events(mask | ChannelEvents::FAILURE, deadline).await?;
                }
            }
        }
    }

    pub async fn wait_for_recv_buffer_async(&self, wait: Wait) -> Result<Buffer> {
        let deadline = wait.deadline(Instant::now());
        loop {
            match self.try_recv_buffer()? {
                Attempt::Ready(buffer) => return Ok(buffer),
                Attempt::Wait(mask) => {
                    self.wait_events(mask | ChannelEvents::FAILURE, deadline).await?;
                }
            }
        }
    }
}
