//! Resilient connection on top of an unreliable bind primitive

use std::{
    collections::VecDeque,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        mpsc::{self, RecvTimeoutError},
        Arc, Mutex, MutexGuard, RwLock, Weak,
    },
    thread::{self, ThreadId},
    time::{Duration, Instant},
};

use crate::error::Result;

use super::{
    binder::{BindEvents, Binder, EventSink},
    config::ConnectionConfig,
    error::ConnectionError,
    state::ConnectionState,
};

/// Outcome delivered to bind listeners
pub type BindResult<H> = std::result::Result<H, ConnectionError>;

type BindListener<H> = Box<dyn FnOnce(BindResult<H>) + Send>;
type ConnectedListener<H> = Arc<dyn Fn(&H) + Send + Sync>;
type DisconnectListener = Arc<dyn Fn() + Send + Sync>;

/// Token returned by [`ConnectionManager::add_connected_listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct ManagerState<H> {
    state: ConnectionState,
    handle: Option<H>,
    /// Bind listeners waiting for the current attempt, oldest first
    pending: VecDeque<BindListener<H>>,
    rapid_disconnects: u32,
    last_connected: Option<Instant>,
    auto_reconnect: bool,
}

impl<H> ManagerState<H> {
    /// Where a bind attempt that ended without a connection leaves us
    fn idle_state(&self) -> ConnectionState {
        if self.last_connected.is_some() {
            ConnectionState::Disconnected
        } else {
            ConnectionState::Unbound
        }
    }
}

/// Removes the current thread from the dispatching set on drop
struct DispatchGuard<'a> {
    threads: &'a Mutex<Vec<ThreadId>>,
    id: ThreadId,
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        let mut threads = self.threads.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(pos) = threads.iter().position(|id| *id == self.id) {
            threads.swap_remove(pos);
        }
    }
}

struct ManagerInner<B: Binder> {
    binder: B,
    config: ConnectionConfig,
    state: Mutex<ManagerState<B::Handle>>,
    connected_listeners: RwLock<Vec<(ListenerId, ConnectedListener<B::Handle>)>>,
    connection_listener: RwLock<Option<DisconnectListener>>,
    /// Threads currently running event callbacks
    dispatching: Mutex<Vec<ThreadId>>,
    next_listener_id: AtomicU64,
    weak_self: Weak<ManagerInner<B>>,
}

impl<B: Binder> ManagerInner<B> {
    fn lock_state(&self) -> MutexGuard<'_, ManagerState<B::Handle>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn events(&self) -> BindEvents<B::Handle> {
        let sink: Weak<dyn EventSink<B::Handle>> = self.weak_self.clone();
        BindEvents::new(sink)
    }

    fn enter_dispatch(&self) -> DispatchGuard<'_> {
        let id = thread::current().id();
        self.dispatching
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(id);
        DispatchGuard {
            threads: &self.dispatching,
            id,
        }
    }

    fn would_deadlock(&self) -> bool {
        let current = thread::current().id();
        if self.binder.event_thread() == Some(current) {
            return true;
        }
        let threads = self.dispatching.lock().unwrap_or_else(|e| e.into_inner());
        threads.contains(&current)
    }

    fn peek(&self) -> Option<B::Handle> {
        let st = self.lock_state();
        match (&st.state, &st.handle) {
            (ConnectionState::Bound, Some(handle)) if self.binder.is_alive(handle) => {
                Some(handle.clone())
            }
            _ => None,
        }
    }

    fn bind_async(&self, listener: BindListener<B::Handle>) {
        enum Next<H> {
            Reply(BindListener<H>, BindResult<H>),
            Bind,
            Wait,
        }

        let next = {
            let mut st = self.lock_state();
            match st.state {
                ConnectionState::Refused => Next::Reply(listener, Err(ConnectionError::Refused)),
                ConnectionState::Bound => {
                    let alive = st.handle.clone().filter(|h| self.binder.is_alive(h));
                    match alive {
                        Some(handle) => Next::Reply(listener, Ok(handle)),
                        None => {
                            st.handle = None;
                            st.pending.push_back(listener);
                            st.state = ConnectionState::Binding;
                            Next::Bind
                        }
                    }
                }
                ConnectionState::Binding => {
                    st.pending.push_back(listener);
                    Next::Wait
                }
                ConnectionState::Unbound | ConnectionState::Disconnected => {
                    st.pending.push_back(listener);
                    st.state = ConnectionState::Binding;
                    Next::Bind
                }
            }
        };

        match next {
            Next::Reply(listener, result) => {
                if result.is_err() {
                    log::error!(
                        "Too many failed connections, refusing to bind to {}",
                        self.config.target
                    );
                }
                listener(result);
            }
            Next::Bind => self.issue_bind(),
            Next::Wait => {}
        }
    }

    fn issue_bind(&self) {
        log::debug!("Binding to {}", self.config.target);
        let Err(e) = self.binder.bind(&self.config.target, self.events()) else {
            return;
        };

        log::error!("Failed to bind to {}: {}", self.config.target, e);
        let pending = {
            let mut st = self.lock_state();
            if st.state != ConnectionState::Binding {
                return;
            }
            st.state = st.idle_state();
            std::mem::take(&mut st.pending)
        };
        notify_pending(pending, Err(e));
    }

    fn schedule_reconnect(&self) {
        let weak = self.weak_self.clone();
        let delay = self.config.reconnect_delay;
        let spawned = thread::Builder::new()
            .name("ipc-reconnect".to_string())
            .spawn(move || {
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                if let Some(inner) = weak.upgrade() {
                    inner.reconnect();
                }
            });
        if let Err(e) = spawned {
            log::error!("Failed to schedule reconnect to {}: {}", self.config.target, e);
        }
    }

    fn reconnect(&self) {
        let issue = {
            let mut st = self.lock_state();
            if st.state == ConnectionState::Disconnected && st.auto_reconnect {
                st.state = ConnectionState::Binding;
                true
            } else {
                false
            }
        };
        if issue {
            self.issue_bind();
        }
    }

    /// Forget the cached handle without counting a disconnect
    fn invalidate(&self) {
        let mut st = self.lock_state();
        if st.state == ConnectionState::Bound {
            st.handle = None;
            st.state = ConnectionState::Disconnected;
        }
    }
}

impl<B: Binder> EventSink<B::Handle> for ManagerInner<B> {
    fn connected(&self, handle: B::Handle) {
        let _dispatch = self.enter_dispatch();
        let pending = {
            let mut st = self.lock_state();
            if matches!(st.state, ConnectionState::Unbound | ConnectionState::Refused) {
                log::debug!(
                    "Ignoring connection to {} while {}",
                    self.config.target,
                    st.state
                );
                return;
            }
            st.state = ConnectionState::Bound;
            st.handle = Some(handle.clone());
            st.last_connected = Some(Instant::now());
            std::mem::take(&mut st.pending)
        };
        log::debug!("Connected to {}", self.config.target);

        notify_pending(pending, Ok(handle.clone()));

        let listeners: Vec<_> = {
            let listeners = self
                .connected_listeners
                .read()
                .unwrap_or_else(|e| e.into_inner());
            listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
        };
        for listener in listeners {
            listener(&handle);
        }
    }

    fn disconnected(&self) {
        let _dispatch = self.enter_dispatch();
        let (reconnect, refused) = {
            let mut st = self.lock_state();
            match st.state {
                ConnectionState::Unbound => return,
                ConnectionState::Refused => {
                    st.handle = None;
                    (false, VecDeque::new())
                }
                _ => {
                    st.handle = None;
                    let since = st.last_connected.map(|at| at.elapsed());
                    match since {
                        Some(dt) => log::debug!(
                            "Disconnected from {}, dT = {} ms",
                            self.config.target,
                            dt.as_millis()
                        ),
                        None => log::debug!("Disconnected from {}", self.config.target),
                    }

                    if since.map_or(false, |dt| dt < self.config.rapid_disconnect_window) {
                        st.rapid_disconnects += 1;
                    } else {
                        st.rapid_disconnects = 0;
                    }

                    if st.rapid_disconnects >= self.config.max_rapid_disconnects {
                        st.state = ConnectionState::Refused;
                        log::error!(
                            "{} disconnected {} times within {:?} of connecting, refusing to bind",
                            self.config.target,
                            st.rapid_disconnects,
                            self.config.rapid_disconnect_window
                        );
                        (false, std::mem::take(&mut st.pending))
                    } else {
                        // A bind already in flight stays in flight
                        if st.state != ConnectionState::Binding {
                            st.state = ConnectionState::Disconnected;
                        }
                        (
                            st.auto_reconnect && st.state == ConnectionState::Disconnected,
                            VecDeque::new(),
                        )
                    }
                }
            }
        };

        notify_pending(refused, Err(ConnectionError::Refused));
        if reconnect {
            self.schedule_reconnect();
        }

        let listener = self
            .connection_listener
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(listener) = listener {
            listener();
        }
    }

    fn failed(&self, reason: String) {
        let _dispatch = self.enter_dispatch();
        let pending = {
            let mut st = self.lock_state();
            if st.state != ConnectionState::Binding {
                log::debug!("Ignoring late bind failure for {}: {}", self.config.target, reason);
                return;
            }
            st.state = st.idle_state();
            std::mem::take(&mut st.pending)
        };
        log::error!("Failed to bind to {}: {}", self.config.target, reason);
        notify_pending(pending, Err(ConnectionError::BindFailed(reason)));
    }
}

impl<B: Binder> Drop for ManagerInner<B> {
    fn drop(&mut self) {
        let active = {
            let st = self.state.get_mut().unwrap_or_else(|e| e.into_inner());
            matches!(
                st.state,
                ConnectionState::Binding | ConnectionState::Bound | ConnectionState::Disconnected
            )
        };
        if active {
            self.binder.unbind(&self.config.target);
        }
    }
}

/// Every queued listener gets the outcome, in FIFO order
fn notify_pending<H: Clone>(pending: VecDeque<BindListener<H>>, result: BindResult<H>) {
    for listener in pending {
        listener(result.clone());
    }
}

/// Stable client handle over an unreliable [`Binder`]
///
/// Concurrent bind requests share one underlying bind. Listeners never run
/// while internal locks are held, so they may call back into the manager.
/// After `max_rapid_disconnects` disconnects in a row, each within
/// `rapid_disconnect_window` of its connection, the manager refuses to bind
/// until [`reset`](Self::reset). Cheap to clone.
pub struct ConnectionManager<B: Binder> {
    inner: Arc<ManagerInner<B>>,
}

impl<B: Binder> ConnectionManager<B> {
    pub fn new(binder: B, config: ConnectionConfig) -> Result<Self> {
        config.validate()?;
        let auto_reconnect = config.auto_reconnect;
        let inner = Arc::new_cyclic(|weak_self| ManagerInner {
            binder,
            config,
            state: Mutex::new(ManagerState {
                state: ConnectionState::Unbound,
                handle: None,
                pending: VecDeque::new(),
                rapid_disconnects: 0,
                last_connected: None,
                auto_reconnect,
            }),
            connected_listeners: RwLock::new(Vec::new()),
            connection_listener: RwLock::new(None),
            dispatching: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
            weak_self: weak_self.clone(),
        });
        Ok(Self { inner })
    }

    /// Request a handle; `listener` runs once with the outcome
    ///
    /// Runs immediately when bound or refused, otherwise once the pending bind
    /// resolves.
    pub fn bind_async<F>(&self, listener: F)
    where
        F: FnOnce(BindResult<B::Handle>) + Send + 'static,
    {
        self.inner.bind_async(Box::new(listener));
    }

    /// Bind without waiting for the outcome, logging failures
    pub fn bind(&self) {
        let target = self.inner.config.target.clone();
        self.bind_async(move |result| {
            if let Err(e) = result {
                log::error!("Failed to bind to {}: {}", target, e);
            }
        });
    }

    /// Block until bound
    ///
    /// Fails with `WouldDeadlock` instead of blocking on the thread that
    /// delivers bind events. Waits indefinitely if the binder never answers.
    pub fn bind_sync(&self) -> BindResult<B::Handle> {
        self.bind_blocking(None)
    }

    /// Block until bound or until `timeout` elapses
    pub fn bind_sync_timeout(&self, timeout: Duration) -> BindResult<B::Handle> {
        self.bind_blocking(Some(timeout))
    }

    fn bind_blocking(&self, timeout: Option<Duration>) -> BindResult<B::Handle> {
        if let Some(handle) = self.inner.peek() {
            return Ok(handle);
        }
        if self.inner.would_deadlock() {
            log::error!(
                "Blocking bind to {} requested from the event thread",
                self.inner.config.target
            );
            return Err(ConnectionError::WouldDeadlock);
        }

        let (tx, rx) = mpsc::channel();
        self.bind_async(move |result| {
            let _ = tx.send(result);
        });

        match timeout {
            None => rx.recv().unwrap_or(Err(ConnectionError::Unbound)),
            Some(timeout) => match rx.recv_timeout(timeout) {
                Ok(result) => result,
                Err(RecvTimeoutError::Timeout) => Err(ConnectionError::Timeout),
                Err(RecvTimeoutError::Disconnected) => Err(ConnectionError::Unbound),
            },
        }
    }

    /// Handle of the current connection, if bound to a live peer
    pub fn peek(&self) -> Option<B::Handle> {
        self.inner.peek()
    }

    /// Drop the connection; pending listeners get `Unbound`
    pub fn unbind(&self) {
        let (pending, active) = {
            let mut st = self.inner.lock_state();
            let previous = st.state;
            if previous != ConnectionState::Refused {
                st.state = ConnectionState::Unbound;
            }
            st.handle = None;
            (
                std::mem::take(&mut st.pending),
                matches!(
                    previous,
                    ConnectionState::Binding
                        | ConnectionState::Bound
                        | ConnectionState::Disconnected
                ),
            )
        };

        if active {
            self.inner.binder.unbind(&self.inner.config.target);
            log::debug!("Unbound from {}", self.inner.config.target);
        }
        notify_pending(pending, Err(ConnectionError::Unbound));
    }

    /// Leave the Refused state; returns `false` if it was not refused
    pub fn reset(&self) -> bool {
        let mut st = self.inner.lock_state();
        if st.state != ConnectionState::Refused {
            return false;
        }
        st.state = ConnectionState::Unbound;
        st.rapid_disconnects = 0;
        st.last_connected = None;
        log::info!("Circuit breaker for {} reset", self.inner.config.target);
        true
    }

    /// Run a call against the peer, rebinding and retrying once on failure
    pub fn execute<R, E, F>(&self, mut call: F) -> BindResult<R>
    where
        F: FnMut(&B::Handle) -> std::result::Result<R, E>,
        E: fmt::Display,
    {
        let handle = self.bind_sync()?;
        match call(&handle) {
            Ok(value) => Ok(value),
            Err(e) => {
                log::warn!(
                    "Call to {} failed ({}), rebinding once",
                    self.inner.config.target,
                    e
                );
                self.inner.invalidate();
                let handle = self.bind_sync()?;
                call(&handle).map_err(|e| ConnectionError::CallFailed(e.to_string()))
            }
        }
    }

    /// Run `listener` on every new connection
    pub fn add_connected_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&B::Handle) + Send + Sync + 'static,
    {
        let id = ListenerId(self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed));
        let mut listeners = self
            .inner
            .connected_listeners
            .write()
            .unwrap_or_else(|e| e.into_inner());
        listeners.push((id, Arc::new(listener)));
        id
    }

    pub fn remove_connected_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self
            .inner
            .connected_listeners
            .write()
            .unwrap_or_else(|e| e.into_inner());
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    /// Run `listener` after every disconnect
    pub fn set_connection_listener<F>(&self, listener: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self
            .inner
            .connection_listener
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(listener));
    }

    pub fn clear_connection_listener(&self) {
        *self
            .inner
            .connection_listener
            .write()
            .unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn set_auto_reconnect(&self, enabled: bool) {
        self.inner.lock_state().auto_reconnect = enabled;
    }

    pub fn auto_reconnect(&self) -> bool {
        self.inner.lock_state().auto_reconnect
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock_state().state
    }

    /// Consecutive rapid disconnects counted so far
    pub fn rapid_disconnects(&self) -> u32 {
        self.inner.lock_state().rapid_disconnects
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    pub fn binder(&self) -> &B {
        &self.inner.binder
    }
}

impl<B: Binder> Clone for ConnectionManager<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: Binder> fmt::Debug for ConnectionManager<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.inner.lock_state();
        f.debug_struct("ConnectionManager")
            .field("target", &self.inner.config.target)
            .field("state", &st.state)
            .field("rapid_disconnects", &st.rapid_disconnects)
            .field("pending", &st.pending.len())
            .finish()
    }
}
