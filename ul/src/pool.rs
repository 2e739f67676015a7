//! Association pool
//!
//! A [`Pool`] keeps established associations around for reuse,
//! keyed by destination
//! (host, port, calling and called AE titles,
//! and the parameters which shape the negotiation,
//! see [`DestinationKey`]).
//! Each destination has a bounded number of associations,
//! idle and checked out together;
//! asking for more fails right away with a pool exhaustion error
//! instead of waiting.
//!
//! Associations are checked out with [`Pool::acquire`]
//! and handed back with [`Pool::release`],
//! which recycles them only if they are still established.
//! A checked out association which is simply dropped
//! frees its slot and closes its connection.
//!
//! The bookkeeping lives behind a single lock,
//! which is never held across network I/O.
//!
//! # Example
//!
//! ```no_run
//! # async fn run() -> dicomlink_ul::Result<()> {
//! use dicomlink_ul::{Destination, PoolBuilder, PoolLimits, TcpConnector};
//! use tokio_util::sync::CancellationToken;
//!
//! let destination: Destination = "PACS@10.0.0.11:104".parse().unwrap();
//! let pool = PoolBuilder::new()
//!     .limits_for(&destination, PoolLimits { capacity: 2, ..Default::default() })
//!     .build(TcpConnector);
//!
//! let cancel = CancellationToken::new();
//! let mut association = pool.acquire(&destination, &cancel).await?;
//! association.echo(&cancel).await?;
//! pool.release(association).await;
//! pool.close().await;
//! # Ok(())
//! # }
//! ```
use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use snafu::ensure;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::association::{Association, AssociationState};
use crate::destination::{Destination, DestinationKey};
use crate::error::{PoolClosedSnafu, PoolExhaustedSnafu, Result};
use crate::transport::Connector;

/// The bounds of the associations kept for one destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolLimits {
    /// the maximum number of associations, idle and checked out
    pub capacity: usize,
    /// how long an association may stay idle before it is closed
    pub max_idle: Duration,
}

impl Default for PoolLimits {
    fn default() -> Self {
        PoolLimits {
            capacity: 5,
            max_idle: Duration::from_secs(300),
        }
    }
}

/// A snapshot of the associations kept for one destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolStats {
    pub idle: usize,
    pub in_use: usize,
    pub capacity: usize,
}

#[derive(Debug)]
struct IdleEntry<S> {
    association: Association<S>,
    since: Instant,
}

#[derive(Debug)]
struct State<S> {
    idle: HashMap<DestinationKey, Vec<IdleEntry<S>>>,
    in_use: HashMap<DestinationKey, usize>,
    closed: bool,
}

impl<S> State<S> {
    fn idle_count(&self, key: &DestinationKey) -> usize {
        self.idle.get(key).map_or(0, Vec::len)
    }

    fn in_use_count(&self, key: &DestinationKey) -> usize {
        self.in_use.get(key).copied().unwrap_or(0)
    }

    fn check_in(&mut self, key: &DestinationKey) {
        if let Some(count) = self.in_use.get_mut(key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.in_use.remove(key);
            }
        }
    }
}

#[derive(Debug)]
struct Shared<S> {
    state: Mutex<State<S>>,
    default_limits: PoolLimits,
    limits: HashMap<DestinationKey, PoolLimits>,
    shutdown: CancellationToken,
}

impl<S> Shared<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    fn lock(&self) -> MutexGuard<'_, State<S>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn limits(&self, key: &DestinationKey) -> PoolLimits {
        self.limits.get(key).copied().unwrap_or(self.default_limits)
    }

    /// Close the associations which stayed idle for too long.
    async fn sweep(&self) -> usize {
        let expired: Vec<Association<S>> = {
            let mut state = self.lock();
            let mut expired = Vec::new();
            for (key, entries) in state.idle.iter_mut() {
                let max_idle = self.limits(key).max_idle;
                let (stale, fresh): (Vec<_>, Vec<_>) = std::mem::take(entries)
                    .into_iter()
                    .partition(|entry| entry.since.elapsed() > max_idle);
                *entries = fresh;
                expired.extend(stale.into_iter().map(|entry| entry.association));
            }
            state.idle.retain(|_, entries| !entries.is_empty());
            expired
        };

        let count = expired.len();
        for mut association in expired {
            debug!(
                "Evicting idle association with {}",
                association.destination()
            );
            association.close().await;
        }
        trace!("Pool sweep closed {} idle associations", count);
        count
    }
}

/// The slot of a checked out association.
///
/// Dropping it gives the slot back to the pool.
#[derive(Debug)]
struct Checkout<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    key: DestinationKey,
    shared: Arc<Shared<S>>,
    returned: bool,
}

impl<S> Checkout<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    fn check_in(&mut self, state: &mut State<S>) {
        if !self.returned {
            state.check_in(&self.key);
            self.returned = true;
        }
    }
}

impl<S> Drop for Checkout<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    fn drop(&mut self) {
        if !self.returned {
            let shared = Arc::clone(&self.shared);
            let mut state = shared.lock();
            self.check_in(&mut state);
        }
    }
}

/// An association checked out of a [`Pool`].
///
/// Dereferences to the [`Association`].
/// Hand it back with [`Pool::release`].
#[derive(Debug)]
pub struct PooledAssociation<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    association: Association<S>,
    checkout: Checkout<S>,
}

impl<S> Deref for PooledAssociation<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    type Target = Association<S>;

    fn deref(&self) -> &Association<S> {
        &self.association
    }
}

impl<S> DerefMut for PooledAssociation<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    fn deref_mut(&mut self) -> &mut Association<S> {
        &mut self.association
    }
}

/// Builder of a [`Pool`].
#[derive(Debug, Clone)]
pub struct PoolBuilder {
    default_limits: PoolLimits,
    limits: HashMap<DestinationKey, PoolLimits>,
    sweep_interval: Duration,
}

impl Default for PoolBuilder {
    fn default() -> Self {
        PoolBuilder {
            default_limits: PoolLimits::default(),
            limits: HashMap::new(),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl PoolBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define the limits of destinations without limits of their own.
    pub fn default_limits(mut self, limits: PoolLimits) -> Self {
        self.default_limits = limits;
        self
    }

    /// Define the limits of one destination.
    pub fn limits_for(mut self, destination: &Destination, limits: PoolLimits) -> Self {
        self.limits.insert(destination.key(), limits);
        self
    }

    /// Define how often idle associations are checked for eviction.
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Build the pool.
    ///
    /// When called within a Tokio runtime,
    /// a background task sweeps idle associations periodically
    /// until the pool is closed or dropped.
    /// Otherwise, call [`Pool::sweep`] as needed.
    pub fn build<C>(self, connector: C) -> Pool<C>
    where
        C: Connector,
    {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                idle: HashMap::new(),
                in_use: HashMap::new(),
                closed: false,
            }),
            default_limits: self.default_limits,
            limits: self.limits,
            shutdown: CancellationToken::new(),
        });

        if tokio::runtime::Handle::try_current().is_ok() {
            spawn_sweeper(
                Arc::downgrade(&shared),
                self.sweep_interval,
                shared.shutdown.clone(),
            );
        } else {
            debug!("No runtime available, idle associations are swept on demand");
        }

        Pool {
            connector: Arc::new(connector),
            shared,
        }
    }
}

fn spawn_sweeper<S>(shared: Weak<Shared<S>>, interval: Duration, shutdown: CancellationToken)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let Some(shared) = shared.upgrade() else {
                break;
            };
            shared.sweep().await;
        }
        trace!("Pool sweeper stopped");
    });
}

/// A pool of associations to any number of destinations.
///
/// Cloning the pool yields another handle to the same associations.
pub struct Pool<C>
where
    C: Connector,
{
    connector: Arc<C>,
    shared: Arc<Shared<C::Stream>>,
}

impl<C> Clone for Pool<C>
where
    C: Connector,
{
    fn clone(&self) -> Self {
        Pool {
            connector: Arc::clone(&self.connector),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C> fmt::Debug for Pool<C>
where
    C: Connector,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("Pool")
            .field("idle_destinations", &state.idle.len())
            .field("closed", &state.closed)
            .finish()
    }
}

enum Checkin<S> {
    Reuse(Association<S>),
    Connect,
    Exhausted,
}

impl<C> Pool<C>
where
    C: Connector,
{
    /// Obtain an association to the destination.
    ///
    /// An idle association to the same destination is reused
    /// if it is still established and was not idle for too long,
    /// taking the timeouts of `destination`.
    /// Otherwise a new association is negotiated,
    /// outside of the pool's lock,
    /// if the destination has capacity left.
    pub async fn acquire(
        &self,
        destination: &Destination,
        cancel: &CancellationToken,
    ) -> Result<PooledAssociation<C::Stream>> {
        let key = destination.key();
        let limits = self.shared.limits(&key);

        let mut stale = Vec::new();
        let checkin = {
            let mut state = self.shared.lock();
            ensure!(!state.closed, PoolClosedSnafu);

            let mut reused = None;
            if let Some(entries) = state.idle.get_mut(&key) {
                while let Some(entry) = entries.pop() {
                    if entry.association.state() == AssociationState::Established
                        && entry.since.elapsed() <= limits.max_idle
                    {
                        reused = Some(entry.association);
                        break;
                    }
                    stale.push(entry.association);
                }
            }

            match reused {
                Some(association) => {
                    *state.in_use.entry(key.clone()).or_default() += 1;
                    Checkin::Reuse(association)
                }
                None if state.idle_count(&key) + state.in_use_count(&key) >= limits.capacity => {
                    Checkin::Exhausted
                }
                None => {
                    *state.in_use.entry(key.clone()).or_default() += 1;
                    Checkin::Connect
                }
            }
        };

        for mut association in stale {
            debug!("Discarding stale association with {}", key);
            association.close().await;
        }

        let reused = match checkin {
            Checkin::Exhausted => {
                return PoolExhaustedSnafu {
                    key: key.to_string(),
                    capacity: limits.capacity,
                }
                .fail()
            }
            Checkin::Reuse(association) => Some(association),
            Checkin::Connect => None,
        };
        let checkout = Checkout {
            key: key.clone(),
            shared: Arc::clone(&self.shared),
            returned: false,
        };
        if let Some(mut association) = reused {
            debug!("Reusing idle association with {}", key);
            association.set_timeouts(*destination.timeouts());
            return Ok(PooledAssociation {
                association,
                checkout,
            });
        }

        debug!("Opening new association with {}", key);
        let mut association = Association::new(destination.clone())
            .with_shutdown(self.shared.shutdown.child_token());
        // on failure, dropping the checkout frees the slot
        association.connect(self.connector.as_ref(), cancel).await?;
        Ok(PooledAssociation {
            association,
            checkout,
        })
    }

    /// Hand an association back to the pool.
    ///
    /// Only an association which is still established is kept for reuse,
    /// any other is closed.
    pub async fn release(&self, pooled: PooledAssociation<C::Stream>) {
        let PooledAssociation {
            association,
            mut checkout,
        } = pooled;

        let rejected = {
            let mut state = self.shared.lock();
            checkout.check_in(&mut state);
            if !state.closed && association.state() == AssociationState::Established {
                state
                    .idle
                    .entry(checkout.key.clone())
                    .or_default()
                    .push(IdleEntry {
                        association,
                        since: Instant::now(),
                    });
                None
            } else {
                Some(association)
            }
        };

        match rejected {
            None => trace!("Association with {} returned to the pool", checkout.key),
            Some(mut association) => {
                if association.state() != AssociationState::Closed {
                    warn!(
                        "Closing association with {} released while {}",
                        checkout.key,
                        association.state()
                    );
                }
                association.close().await;
            }
        }
    }

    /// Close the idle associations which exceeded their maximum idle time,
    /// returning how many were closed.
    ///
    /// This runs periodically in the background
    /// if the pool was built within a Tokio runtime.
    pub async fn sweep(&self) -> usize {
        self.shared.sweep().await
    }

    /// Obtain the current number of associations kept for a destination.
    pub fn stats(&self, destination: &Destination) -> PoolStats {
        let key = destination.key();
        let capacity = self.shared.limits(&key).capacity;
        let state = self.shared.lock();
        PoolStats {
            idle: state.idle_count(&key),
            in_use: state.in_use_count(&key),
            capacity,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Close the pool.
    ///
    /// Idle associations are aborted,
    /// operations of checked out associations are cancelled,
    /// and further calls to [`acquire`](Self::acquire) fail.
    pub async fn close(&self) {
        let idle: Vec<Association<C::Stream>> = {
            let mut state = self.shared.lock();
            state.closed = true;
            state
                .idle
                .drain()
                .flat_map(|(_, entries)| entries)
                .map(|entry| entry.association)
                .collect()
        };
        self.shared.shutdown.cancel();
        debug!("Closing pool with {} idle associations", idle.len());
        for mut association in idle {
            association.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use async_trait::async_trait;
    use tokio::io::DuplexStream;

    /// Refuses every connection.
    struct Unreachable;

    #[async_trait]
    impl Connector for Unreachable {
        type Stream = DuplexStream;

        async fn connect(&self, _host: &str, _port: u16) -> std::io::Result<DuplexStream> {
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "refused",
            ))
        }
    }

    #[tokio::test]
    async fn failed_connection_frees_the_slot() {
        let destination = Destination::new("localhost", 11112, "ANY-SCP");
        let pool = PoolBuilder::new()
            .limits_for(
                &destination,
                PoolLimits {
                    capacity: 1,
                    ..Default::default()
                },
            )
            .build(Unreachable);
        let cancel = CancellationToken::new();

        for _ in 0..2 {
            let err = pool.acquire(&destination, &cancel).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Transport);
        }
        assert_eq!(
            pool.stats(&destination),
            PoolStats {
                idle: 0,
                in_use: 0,
                capacity: 1
            }
        );
    }

    #[tokio::test]
    async fn closed_pool_refuses_to_acquire() {
        let destination = Destination::new("localhost", 11112, "ANY-SCP");
        let pool = PoolBuilder::new().build(Unreachable);
        assert_eq!(pool.stats(&destination).capacity, 5);
        pool.close().await;
        assert!(pool.is_closed());
        let err = pool
            .acquire(&destination, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, crate::Error::PoolClosed { .. }));
        assert_eq!(pool.sweep().await, 0);
    }
}
