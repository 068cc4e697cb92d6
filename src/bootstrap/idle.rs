//! Reader-idle timers.
//!
//! An [`IdleTimer`] fires when nothing was read for its configured duration.
//! Reads are observed through a shared [`ReadActivity`], fed by an
//! [`ActivityStream`] wrapping either the raw or the decrypted transport.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{sleep_until, Instant, Sleep};

/// Last read instant shared between a transport and its timers.
#[derive(Debug, Clone)]
pub struct ReadActivity {
    inner: Arc<ActivityInner>,
}

#[derive(Debug)]
struct ActivityInner {
    origin: Instant,
    /// Nanoseconds after `origin` of the latest read.
    last_read: AtomicU64,
    reads: AtomicU64,
}

impl ReadActivity {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ActivityInner {
                origin: Instant::now(),
                last_read: AtomicU64::new(0),
                reads: AtomicU64::new(0),
            }),
        }
    }

    /// Note that something was read just now.
    pub fn record(&self) {
        let offset = self.inner.origin.elapsed().as_nanos() as u64;
        self.inner.last_read.fetch_max(offset, Ordering::AcqRel);
        self.inner.reads.fetch_add(1, Ordering::AcqRel);
    }

    /// Number of reads recorded so far.
    pub fn reads(&self) -> u64 {
        self.inner.reads.load(Ordering::Acquire)
    }

    pub fn last_read(&self) -> Option<Instant> {
        if self.reads() == 0 {
            return None;
        }
        let offset = self.inner.last_read.load(Ordering::Acquire);
        Some(self.inner.origin + Duration::from_nanos(offset))
    }
}

impl Default for ReadActivity {
    fn default() -> Self {
        Self::new()
    }
}

/// Transport wrapper that records every non-empty read.
#[derive(Debug)]
pub struct ActivityStream<S> {
    inner: S,
    activity: ReadActivity,
}

impl<S> ActivityStream<S> {
    pub fn new(inner: S, activity: ReadActivity) -> Self {
        Self { inner, activity }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for ActivityStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        ready!(Pin::new(&mut self.inner).poll_read(cx, buf))?;
        if buf.filled().len() > before {
            self.activity.record();
        }
        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for ActivityStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Whether a timer keeps firing after its first event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleMode {
    OneShot,
    Periodic,
}

/// Raised when a timer saw no reads for its whole window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleEvent {
    /// Time since the last read, or since arming if nothing was read.
    pub idle_for: Duration,
    /// 1 for the first event of this timer.
    pub sequence: u32,
}

/// Cancellable reader-idle timer.
///
/// Dropping the timer cancels it; a dropped timer can never fire.
#[derive(Debug)]
pub struct IdleTimer {
    timeout: Duration,
    activity: ReadActivity,
    mode: IdleMode,
    armed_at: Instant,
    sleep: Pin<Box<Sleep>>,
    fired: u32,
    exhausted: bool,
}

impl IdleTimer {
    /// Arm a timer now. `timeout` must be non-zero.
    pub fn new(timeout: Duration, activity: ReadActivity, mode: IdleMode) -> Self {
        debug_assert!(!timeout.is_zero(), "idle timer needs a non-zero timeout");
        let armed_at = Instant::now();
        Self {
            timeout,
            activity,
            mode,
            armed_at,
            sleep: Box::pin(sleep_until(armed_at + timeout)),
            fired: 0,
            exhausted: false,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn armed_at(&self) -> Instant {
        self.armed_at
    }

    /// Earliest instant the timer may fire given the reads seen so far.
    pub fn deadline(&self) -> Instant {
        self.last_activity() + self.timeout
    }

    fn last_activity(&self) -> Instant {
        match self.activity.last_read() {
            Some(read) if read > self.armed_at => read,
            _ => self.armed_at,
        }
    }

    /// Poll for expiry. A one-shot timer is `Pending` forever after firing.
    pub fn poll_expired(&mut self, cx: &mut Context<'_>) -> Poll<IdleEvent> {
        if self.exhausted {
            return Poll::Pending;
        }

        loop {
            ready!(self.sleep.as_mut().poll(cx));

            let now = Instant::now();
            let deadline = self.deadline();
            if deadline > now {
                // Something was read since the sleep started.
                self.sleep.as_mut().reset(deadline);
                continue;
            }

            self.fired += 1;
            let event = IdleEvent {
                idle_for: now - self.last_activity(),
                sequence: self.fired,
            };

            match self.mode {
                IdleMode::OneShot => self.exhausted = true,
                IdleMode::Periodic => {
                    // Next window starts now.
                    self.armed_at = now;
                    self.sleep.as_mut().reset(now + self.timeout);
                }
            }
            return Poll::Ready(event);
        }
    }

    pub async fn expired(&mut self) -> IdleEvent {
        std::future::poll_fn(|cx| self.poll_expired(cx)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test(start_paused = true)]
    async fn fires_after_timeout_without_reads() {
        let mut timer =
            IdleTimer::new(Duration::from_secs(5), ReadActivity::new(), IdleMode::OneShot);
        let start = Instant::now();

        let event = timer.expired().await;
        assert_eq!(start.elapsed(), Duration::from_secs(5));
        assert_eq!(event.sequence, 1);
        assert_eq!(event.idle_for, Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn reads_postpone_the_deadline() {
        let activity = ReadActivity::new();
        let mut timer = IdleTimer::new(Duration::from_secs(5), activity.clone(), IdleMode::OneShot);
        let start = Instant::now();

        tokio::time::advance(Duration::from_secs(3)).await;
        activity.record();

        timer.expired().await;
        assert_eq!(start.elapsed(), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn one_shot_fires_once() {
        let mut timer =
            IdleTimer::new(Duration::from_millis(10), ReadActivity::new(), IdleMode::OneShot);
        timer.expired().await;

        let again = tokio::time::timeout(Duration::from_secs(60), timer.expired()).await;
        assert!(again.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_fires_every_window() {
        let mut timer =
            IdleTimer::new(Duration::from_secs(2), ReadActivity::new(), IdleMode::Periodic);
        let start = Instant::now();

        assert_eq!(timer.expired().await.sequence, 1);
        assert_eq!(timer.expired().await.sequence, 2);
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn activity_stream_records_reads() {
        let (client, server) = tokio::io::duplex(64);
        let activity = ReadActivity::new();
        let mut stream = ActivityStream::new(server, activity.clone());
        let mut client = client;

        assert_eq!(activity.last_read(), None);
        client.write_all(b"hello").await.unwrap();

        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
        assert!(activity.reads() >= 1);
        assert!(activity.last_read().is_some());

        stream.write_all(b"x").await.unwrap();
        let mut one = [0u8; 1];
        client.read_exact(&mut one).await.unwrap();
        assert_eq!(&one, b"x");
    }
}
