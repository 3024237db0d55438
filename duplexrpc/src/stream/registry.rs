use foldhash::fast::RandomState;
use std::{
    collections::HashMap,
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::ReaderParam;
use crate::{Error, ErrorKind, Result};

enum Slot {
    /// The decode side arrived first and waits for a stream.
    Consumer(oneshot::Sender<ReaderParam>),
    /// The POST arrived first; the stream is parked until a consumer takes
    /// it, and the sender acknowledges the take.
    Producer(ReaderParam, oneshot::Sender<()>),
}

struct Entry {
    ticket: u64,
    slot: Slot,
}

/// Rendezvous points for streamed reader parameters, keyed by identifier.
///
/// Each entry holds at most one waiting party and is removed as soon as the
/// handoff completes or its waiter gives up. The map lock is only taken for
/// membership changes, never across a wait.
pub struct StreamRegistry {
    entries: Mutex<HashMap<Uuid, Entry, RandomState>>,
    ticket: AtomicU64,
    timeout: Duration,
}

/// Evicts the entry a waiter created, unless it was already consumed or
/// replaced by a later one.
struct SlotGuard<'a> {
    registry: &'a StreamRegistry,
    id: Uuid,
    ticket: u64,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        let mut entries = self.registry.lock();
        if entries
            .get(&self.id)
            .is_some_and(|entry| entry.ticket == self.ticket)
        {
            entries.remove(&self.id);
        }
    }
}

impl StreamRegistry {
    /// `timeout` bounds how long either party waits for the other.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: Mutex::default(),
            ticket: AtomicU64::default(),
            timeout,
        }
    }

    /// Waits for the stream posted under `id`.
    ///
    /// # Errors
    ///
    /// `Canceled` if `cancel` fires or no stream arrives in time, and
    /// `InvalidArgument` if another call is already waiting on `id`.
    pub async fn take(&self, id: Uuid, cancel: &CancellationToken) -> Result<ReaderParam> {
        let (ticket, rx) = loop {
            let mut entries = self.lock();
            match entries.remove(&id) {
                Some(Entry {
                    slot: Slot::Producer(reader, ack),
                    ..
                }) => {
                    if ack.send(()).is_ok() {
                        return Ok(reader);
                    }
                    // the producer gave up meanwhile; wait for a fresh one.
                }
                Some(entry) => {
                    entries.insert(id, entry);
                    return Err(Error::new(
                        ErrorKind::InvalidArgument,
                        format!("stream {id} is already awaited"),
                    ));
                }
                None => {
                    let (tx, rx) = oneshot::channel();
                    let ticket = self.next_ticket();
                    entries.insert(
                        id,
                        Entry {
                            ticket,
                            slot: Slot::Consumer(tx),
                        },
                    );
                    break (ticket, rx);
                }
            }
        };

        let _guard = SlotGuard {
            registry: self,
            id,
            ticket,
        };
        let mut rx = rx;
        let result = tokio::select! {
            biased;
            reader = &mut rx => reader.map_err(|_| {
                Error::new(ErrorKind::Canceled, format!("stream {id} was abandoned"))
            }),
            () = cancel.cancelled() => Err(Error::new(
                ErrorKind::Canceled,
                format!("call cancelled while waiting for stream {id}"),
            )),
            () = tokio::time::sleep(self.timeout) => Err(Error::new(
                ErrorKind::Canceled,
                format!("no stream {id} within {:?}", self.timeout),
            )),
        };
        // a producer that slipped in past the deadline still owns a handoff.
        result.or_else(|err| settle(&mut rx).ok_or(err))
    }

    /// Hands `reader` to the call waiting on `id`, waiting for one to show
    /// up if necessary.
    ///
    /// # Errors
    ///
    /// `Canceled` if `cancel` fires or no consumer arrives in time, and
    /// `InvalidArgument` if a stream is already parked under `id`.
    pub async fn deliver(
        &self,
        id: Uuid,
        reader: ReaderParam,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut reader = reader;
        let (ticket, ack) = loop {
            let mut entries = self.lock();
            match entries.remove(&id) {
                Some(Entry {
                    slot: Slot::Consumer(tx),
                    ..
                }) => match tx.send(reader) {
                    Ok(()) => return Ok(()),
                    // the consumer gave up meanwhile; look again.
                    Err(returned) => reader = returned,
                },
                Some(entry) => {
                    entries.insert(id, entry);
                    return Err(Error::new(
                        ErrorKind::InvalidArgument,
                        format!("stream {id} is already posted"),
                    ));
                }
                None => {
                    let (ack_tx, ack_rx) = oneshot::channel();
                    let ticket = self.next_ticket();
                    entries.insert(
                        id,
                        Entry {
                            ticket,
                            slot: Slot::Producer(reader, ack_tx),
                        },
                    );
                    break (ticket, ack_rx);
                }
            }
        };

        let _guard = SlotGuard {
            registry: self,
            id,
            ticket,
        };
        let mut ack = ack;
        let result = tokio::select! {
            biased;
            taken = &mut ack => taken.map_err(|_| {
                Error::new(ErrorKind::Canceled, format!("stream {id} was dropped"))
            }),
            () = cancel.cancelled() => Err(Error::new(
                ErrorKind::Canceled,
                format!("request cancelled before stream {id} was taken"),
            )),
            () = tokio::time::sleep(self.timeout) => Err(Error::new(
                ErrorKind::Canceled,
                format!("no consumer for stream {id} within {:?}", self.timeout),
            )),
        };
        result.or_else(|err| settle(&mut ack).ok_or(err))
    }

    /// Number of parties currently waiting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn next_ticket(&self) -> u64 {
        self.ticket.fetch_add(1, Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Entry, RandomState>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Closes a handoff slot whose waiter gave up. Returns the value if the
/// other party delivered it first; otherwise that party's send now fails and
/// it keeps its value.
fn settle<T>(rx: &mut oneshot::Receiver<T>) -> Option<T> {
    rx.close();
    rx.try_recv().ok()
}

impl std::fmt::Debug for StreamRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamRegistry")
            .field("waiting", &self.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::io::AsyncReadExt;

    const TIMEOUT: Duration = Duration::from_secs(5);

    async fn read_all(mut reader: ReaderParam) -> Vec<u8> {
        let mut buf = vec![];
        reader.read_to_end(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn test_producer_first() {
        let registry = Arc::new(StreamRegistry::new(TIMEOUT));
        let id = Uuid::new_v4();
        let (reader, done) = ReaderParam::new(&b"hello"[..]);

        let producer = tokio::spawn({
            let registry = registry.clone();
            async move { registry.deliver(id, reader, &CancellationToken::new()).await }
        });
        while registry.is_empty() {
            tokio::task::yield_now().await;
        }

        let reader = registry.take(id, &CancellationToken::new()).await.unwrap();
        producer.await.unwrap().unwrap();
        assert!(registry.is_empty());

        assert_eq!(read_all(reader).await, b"hello");
        done.await.unwrap();
    }

    #[tokio::test]
    async fn test_consumer_first() {
        let registry = Arc::new(StreamRegistry::new(TIMEOUT));
        let id = Uuid::new_v4();

        let consumer = tokio::spawn({
            let registry = registry.clone();
            async move { registry.take(id, &CancellationToken::new()).await }
        });
        while registry.is_empty() {
            tokio::task::yield_now().await;
        }

        let (reader, _done) = ReaderParam::new(&b"world"[..]);
        registry
            .deliver(id, reader, &CancellationToken::new())
            .await
            .unwrap();
        let reader = consumer.await.unwrap().unwrap();
        assert!(registry.is_empty());
        assert_eq!(read_all(reader).await, b"world");
    }

    #[tokio::test]
    async fn test_cancel_evicts_entry() {
        let registry = Arc::new(StreamRegistry::new(TIMEOUT));
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();

        let consumer = tokio::spawn({
            let registry = registry.clone();
            let cancel = cancel.clone();
            async move { registry.take(id, &cancel).await }
        });
        while registry.is_empty() {
            tokio::task::yield_now().await;
        }
        cancel.cancel();
        let err = consumer.await.unwrap().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Canceled);
        assert!(registry.is_empty());

        // a late producer finds no consumer and gives up at its own deadline.
        let registry = StreamRegistry::new(Duration::from_millis(50));
        let (reader, done) = ReaderParam::new(&b"late"[..]);
        let err = registry
            .deliver(id, reader, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Canceled);
        assert!(registry.is_empty());
        // the parked stream was dropped, releasing its sender.
        done.await.unwrap();
    }

    #[test]
    fn test_settle_late_handoff() {
        // delivered before the waiter gave up: the handoff stands.
        let (tx, mut rx) = oneshot::channel();
        tx.send(7).unwrap();
        assert_eq!(settle(&mut rx), Some(7));

        // gave up first: the sender gets its value back.
        let (tx, mut rx) = oneshot::channel::<u32>();
        assert_eq!(settle(&mut rx), None);
        assert_eq!(tx.send(7), Err(7));
    }

    #[tokio::test]
    async fn test_single_use() {
        let registry = Arc::new(StreamRegistry::new(TIMEOUT));
        let id = Uuid::new_v4();

        let first = tokio::spawn({
            let registry = registry.clone();
            async move { registry.take(id, &CancellationToken::new()).await }
        });
        while registry.is_empty() {
            tokio::task::yield_now().await;
        }
        let err = registry
            .take(id, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);

        let (reader, _done) = ReaderParam::new(&b"once"[..]);
        registry
            .deliver(id, reader, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(read_all(first.await.unwrap().unwrap()).await, b"once");

        // after the handoff the identifier starts from scratch.
        let second = tokio::spawn({
            let registry = registry.clone();
            async move { registry.take(id, &CancellationToken::new()).await }
        });
        while registry.is_empty() {
            tokio::task::yield_now().await;
        }
        let (reader, _done) = ReaderParam::new(&b"twice"[..]);
        registry
            .deliver(id, reader, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(read_all(second.await.unwrap().unwrap()).await, b"twice");
    }
}
