//! Multiplex dispatcher.
//!
//! Maintains `appID -> mailbox | handler`: a bounded mailbox of
//! `(remoteAddr, bytes)` per registered application. If a mailbox stays full
//! for more than 5 seconds, the caller is told to close the offending
//! tunnel rather than deadlocking the single-threaded dispatcher.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::warn;

/// Mailbox capacity.
pub const MAILBOX_CAPACITY: usize = 100;
/// How long a full mailbox may block delivery before the dispatcher gives
/// up and asks the caller to close the tunnel.
pub const BACKPRESSURE_LIMIT: Duration = Duration::from_secs(5);

/// One inbound message delivered to an [`AppConn`]: the remote peer and
/// app-id it came from, plus the payload.
#[derive(Debug, Clone)]
pub struct AppMessage {
    pub from_peer: u64,
    pub from_app: u32,
    pub data: Bytes,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no handler or mailbox registered for app {0}")]
    NoRegistration(u32),
    #[error("mailbox for app {0} has been full for more than 5s")]
    MailboxStuck(u32),
}

/// A non-blocking, synchronously invoked sink for one app id. Handlers must
/// not block: do real work on their own task/pool.
#[async_trait]
pub trait AppHandler: Send + Sync + 'static {
    async fn handle(&self, msg: AppMessage);
}

struct MailboxEntry {
    tx: mpsc::Sender<AppMessage>,
    full_since: Mutex<Option<Instant>>,
}

enum Registration {
    Mailbox(Arc<MailboxEntry>),
    Handler(Arc<dyn AppHandler>),
}

/// Receiving half handed back to whoever registered a mailbox: the
/// application-connection abstraction over a dispatcher mailbox.
pub struct AppConn {
    app_id: u32,
    rx: mpsc::Receiver<AppMessage>,
    dispatcher: Arc<Dispatcher>,
    closed: AtomicBool,
}

impl AppConn {
    pub async fn recv(&mut self) -> Option<AppMessage> {
        self.rx.recv().await
    }

    pub fn app_id(&self) -> u32 {
        self.app_id
    }
}

impl Drop for AppConn {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.dispatcher.unregister(self.app_id);
        }
    }
}

#[derive(Default)]
pub struct Dispatcher {
    table: DashMap<u32, Registration>,
}

impl Dispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            table: DashMap::new(),
        })
    }

    /// Register a mailbox-backed app connection, returning the receiving
    /// half. Re-registering an app id that already has one replaces it.
    pub fn register_mailbox(self: &Arc<Self>, app_id: u32) -> AppConn {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        self.table.insert(
            app_id,
            Registration::Mailbox(Arc::new(MailboxEntry {
                tx,
                full_since: Mutex::new(None),
            })),
        );
        AppConn {
            app_id,
            rx,
            dispatcher: self.clone(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn register_handler(&self, app_id: u32, handler: Arc<dyn AppHandler>) {
        self.table.insert(app_id, Registration::Handler(handler));
    }

    pub fn unregister(&self, app_id: u32) {
        self.table.remove(&app_id);
    }

    /// Deliver one inbound message. Handlers run inline;
    /// mailbox delivery uses `try_send` and escalates to
    /// [`DispatchError::MailboxStuck`] once the mailbox has refused delivery
    /// continuously for [`BACKPRESSURE_LIMIT`].
    pub async fn dispatch(
        &self,
        to_app: u32,
        from_peer: u64,
        from_app: u32,
        data: Bytes,
    ) -> Result<(), DispatchError> {
        let entry = self
            .table
            .get(&to_app)
            .ok_or(DispatchError::NoRegistration(to_app))?;

        match &*entry {
            Registration::Handler(handler) => {
                let handler = handler.clone();
                drop(entry);
                handler
                    .handle(AppMessage {
                        from_peer,
                        from_app,
                        data,
                    })
                    .await;
                Ok(())
            }
            Registration::Mailbox(mailbox) => {
                let mailbox = mailbox.clone();
                drop(entry);
                self.deliver_to_mailbox(to_app, &mailbox, from_peer, from_app, data)
            }
        }
    }

    fn deliver_to_mailbox(
        &self,
        app_id: u32,
        mailbox: &MailboxEntry,
        from_peer: u64,
        from_app: u32,
        data: Bytes,
    ) -> Result<(), DispatchError> {
        let msg = AppMessage {
            from_peer,
            from_app,
            data,
        };
        match mailbox.tx.try_send(msg) {
            Ok(()) => {
                *mailbox.full_since.lock().expect("mailbox mutex poisoned") = None;
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                let mut guard = mailbox.full_since.lock().expect("mailbox mutex poisoned");
                let since = *guard.get_or_insert_with(Instant::now);
                if since.elapsed() >= BACKPRESSURE_LIMIT {
                    warn!(app_id, "mailbox stuck full for 5s, signalling tunnel close");
                    Err(DispatchError::MailboxStuck(app_id))
                } else {
                    Ok(())
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(DispatchError::NoRegistration(app_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mailbox_delivers_in_order() {
        let dispatcher = Dispatcher::new();
        let mut conn = dispatcher.register_mailbox(10);

        dispatcher
            .dispatch(10, 1, 2, Bytes::from_static(b"a"))
            .await
            .unwrap();
        dispatcher
            .dispatch(10, 1, 2, Bytes::from_static(b"b"))
            .await
            .unwrap();

        let first = conn.recv().await.unwrap();
        let second = conn.recv().await.unwrap();
        assert_eq!(&first.data[..], b"a");
        assert_eq!(&second.data[..], b"b");
    }

    #[tokio::test]
    async fn dispatch_to_unregistered_app_errors() {
        let dispatcher = Dispatcher::new();
        let res = dispatcher.dispatch(99, 1, 2, Bytes::from_static(b"x")).await;
        assert!(matches!(res, Err(DispatchError::NoRegistration(99))));
    }

    #[tokio::test]
    async fn dropping_app_conn_unregisters_it() {
        let dispatcher = Dispatcher::new();
        let conn = dispatcher.register_mailbox(5);
        drop(conn);
        let res = dispatcher.dispatch(5, 1, 2, Bytes::from_static(b"x")).await;
        assert!(matches!(res, Err(DispatchError::NoRegistration(5))));
    }

    #[tokio::test]
    async fn handler_is_invoked_inline() {
        struct Counter(std::sync::atomic::AtomicUsize);
        #[async_trait]
        impl AppHandler for Counter {
            async fn handle(&self, _msg: AppMessage) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
        let dispatcher = Dispatcher::new();
        let counter = Arc::new(Counter(std::sync::atomic::AtomicUsize::new(0)));
        dispatcher.register_handler(7, counter.clone());
        dispatcher
            .dispatch(7, 1, 2, Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn full_mailbox_reports_stuck_after_deadline() {
        let dispatcher = Dispatcher::new();
        let _conn = dispatcher.register_mailbox(1);
        for _ in 0..MAILBOX_CAPACITY {
            dispatcher
                .dispatch(1, 0, 0, Bytes::from_static(b"x"))
                .await
                .unwrap();
        }
        // Mailbox is now full; simulate the 5s deadline having passed by
        // dispatching again after manually rewinding `full_since`.
        let entry = dispatcher.table.get(&1).unwrap();
        if let Registration::Mailbox(m) = &*entry {
            *m.full_since.lock().unwrap() = Some(Instant::now() - BACKPRESSURE_LIMIT - Duration::from_secs(1));
        }
        drop(entry);
        let res = dispatcher.dispatch(1, 0, 0, Bytes::from_static(b"y")).await;
        assert!(matches!(res, Err(DispatchError::MailboxStuck(1))));
    }
}
