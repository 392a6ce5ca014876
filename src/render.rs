//! Single-flight handoff of pixel frames to a dedicated render context.
//!
//! The network context calls [`RenderScheduler::request_render`] with the
//! buffer it has been filling. A snapshot of that buffer travels through a
//! one-slot channel to [`RenderScheduler::render_loop`], which runs on its own
//! executor and pushes the snapshot to the strip. The requester waits for the
//! completion signal for at most [`RENDER_TIMEOUT`].
//!
//! Because the render context owns its snapshot, frames that arrive during a
//! push write into the network-side buffer and never tear the frame being
//! shown.
#![allow(clippy::future_not_send, reason = "single-threaded")]

use derive_more::Display;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, with_timeout};
use portable_atomic::{AtomicBool, Ordering};

use crate::pixel_buffer::PixelBuffer;

#[cfg(not(feature = "host"))]
pub mod ws2812;

/// Longest a requester waits for a push to finish.
pub const RENDER_TIMEOUT: Duration = Duration::from_millis(200);

/// Channel carrying one frame snapshot to the render context.
pub type RenderRequestChannel = Channel<CriticalSectionRawMutex, PixelBuffer, 1>;

/// Signal raised by the render context after each push.
pub type RenderCompletionSignal = Signal<CriticalSectionRawMutex, ()>;

/// Pushes a full buffer onto the strip's data line.
pub trait PixelDriver {
    /// Write every pixel in `pixels`, returning once the strip has latched.
    async fn push(&mut self, pixels: &PixelBuffer);
}

/// What happened to a render request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RenderOutcome {
    /// The render context reported a finished push.
    Completed,
    /// No completion arrived within [`RENDER_TIMEOUT`]. The push may still finish later.
    TimedOut,
    /// Another request was already pending, so nothing was sent.
    Dropped,
}

/// Coordinates the network context with the render context.
///
/// Create it as a `static` so both executors can reach it.
pub struct RenderScheduler {
    pending: AtomicBool,
    requests: RenderRequestChannel,
    completion: RenderCompletionSignal,
}

impl RenderScheduler {
    /// An idle scheduler.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pending: AtomicBool::new(false),
            requests: Channel::new(),
            completion: Signal::new(),
        }
    }

    /// True while a requester is waiting on a push.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Hand a snapshot of `pixels` to the render context and wait for it to be shown.
    ///
    /// Returns [`RenderOutcome::Dropped`] at once if another request is
    /// pending, or if the render context has not yet picked up the previous
    /// snapshot. Otherwise waits for completion, bounded by [`RENDER_TIMEOUT`].
    ///
    /// After a [`RenderOutcome::TimedOut`], the late push may still raise the
    /// completion signal. The next request can then report
    /// [`RenderOutcome::Completed`] for that earlier frame before its own
    /// snapshot has been pushed.
    pub async fn request_render(&self, pixels: &PixelBuffer) -> RenderOutcome {
        if self.pending.swap(true, Ordering::AcqRel) {
            trace!("Render: request dropped, one already pending");
            return RenderOutcome::Dropped;
        }
        let _pending = PendingGuard(&self.pending);

        self.completion.reset();
        if self.requests.try_send(pixels.clone()).is_err() {
            debug!("Render: previous frame not yet taken, dropping request");
            return RenderOutcome::Dropped;
        }

        match with_timeout(RENDER_TIMEOUT, self.completion.wait()).await {
            Ok(()) => RenderOutcome::Completed,
            Err(_) => {
                debug!(
                    "Render: no completion within {} ms",
                    RENDER_TIMEOUT.as_millis()
                );
                RenderOutcome::TimedOut
            }
        }
    }

    /// Serve render requests forever: receive a snapshot, push it, signal completion.
    ///
    /// Run exactly one of these, on the render context.
    pub async fn render_loop(&self, driver: &mut impl PixelDriver) -> ! {
        loop {
            let frame = self.requests.receive().await;
            driver.push(&frame).await;
            self.completion.signal(());
        }
    }
}

impl Default for RenderScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Clears the pending marker however the request ends, including cancellation.
struct PendingGuard<'a>(&'a AtomicBool);

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
