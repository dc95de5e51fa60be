//! Bounded elastic pool of live RPC channels.
//!
//! Channels are created on demand up to the configured bound and parked in
//! an idle set between requests. `acquire` suspends when every channel is
//! checked out; releasing (dropping the guard) wakes one waiter. A guard
//! whose call failed at the transport level is marked invalid and its
//! channel destroyed instead of re-offered - no caller may ever observe a
//! channel a previous caller marked broken.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use async_channel::{Receiver, Sender, TryRecvError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::connection::{Channel, ChannelFactory};
use crate::{Error, Result};

/// Pool of channels to one address/credential pair. Cheap to clone; clones
/// share the same channels and bound.
#[derive(Debug, Clone)]
pub(crate) struct ChannelPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    factory: ChannelFactory,
    idle_tx: Sender<Channel>,
    idle_rx: Receiver<Channel>,
    permits: Arc<Semaphore>,
    max_size: usize,
}

impl ChannelPool {
    /// Create a pool bound to the given factory. No channels are dialed
    /// until the first `acquire`.
    pub(crate) fn new(factory: ChannelFactory, max_size: usize) -> Self {
        let max_size = max_size.max(1);
        let (idle_tx, idle_rx) = async_channel::bounded(max_size);
        Self {
            inner: Arc::new(PoolInner {
                factory,
                idle_tx,
                idle_rx,
                permits: Arc::new(Semaphore::new(max_size)),
                max_size,
            }),
        }
    }

    /// Configured channel bound
    pub(crate) fn max_size(&self) -> usize {
        self.inner.max_size
    }

    /// Number of currently idle channels
    #[cfg(test)]
    pub(crate) fn idle_len(&self) -> usize {
        self.inner.idle_rx.len()
    }

    /// Check out a channel, reusing an idle one when possible and dialing a
    /// new one otherwise. Suspends while the pool is at capacity with no
    /// idle channel. Idle channels past the keepalive interval are
    /// ping-probed before reuse; a failed probe discards the channel and,
    /// with retry enabled, dials a replacement transparently.
    pub(crate) async fn acquire(&self) -> Result<PooledChannel> {
        let permit = Arc::clone(&self.inner.permits)
            .acquire_owned()
            .await
            .map_err(|_| Error::connection("channel pool is closed"))?;

        let tuning = self.inner.factory.tuning();
        loop {
            match self.inner.idle_rx.try_recv() {
                Ok(channel) => {
                    if channel.idle_for() >= tuning.keepalive {
                        if !tuning.keepalive_while_idle {
                            debug!("discarding stale channel to {}", channel.peer());
                            continue;
                        }
                        match channel.ping().await {
                            Ok(()) => return Ok(self.wrap(channel, permit)),
                            Err(e) if tuning.retry_enabled => {
                                debug!("stale channel failed its probe, replacing: {e}");
                                continue;
                            }
                            Err(e) => return Err(e),
                        }
                    }
                    return Ok(self.wrap(channel, permit));
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }

        let channel = self.inner.factory.connect().await?;
        Ok(self.wrap(channel, permit))
    }

    fn wrap(&self, channel: Channel, permit: OwnedSemaphorePermit) -> PooledChannel {
        PooledChannel {
            channel: Some(channel),
            valid: true,
            idle_tx: self.inner.idle_tx.clone(),
            _permit: permit,
        }
    }
}

/// A checked-out channel. Returns to the idle set on drop unless marked
/// invalid, in which case the channel is destroyed and the pool may dial a
/// replacement on demand.
#[derive(Debug)]
pub(crate) struct PooledChannel {
    channel: Option<Channel>,
    valid: bool,
    idle_tx: Sender<Channel>,
    _permit: OwnedSemaphorePermit,
}

impl PooledChannel {
    /// Mark the channel broken; it will be destroyed instead of re-offered.
    pub(crate) fn invalidate(&mut self) {
        self.valid = false;
    }
}

impl Deref for PooledChannel {
    type Target = Channel;

    fn deref(&self) -> &Self::Target {
        self.channel.as_ref().unwrap()
    }
}

impl DerefMut for PooledChannel {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.channel.as_mut().unwrap()
    }
}

impl Drop for PooledChannel {
    fn drop(&mut self) {
        if let Some(channel) = self.channel.take() {
            if self.valid {
                // capacity equals the pool bound, so this only fails when
                // the pool itself is gone
                if self.idle_tx.try_send(channel).is_err() {
                    debug!("idle set unavailable, dropping channel");
                }
            } else {
                debug!("discarding broken channel to {}", channel.peer());
            }
        }
    }
}
