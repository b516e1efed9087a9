use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

/// A transport that can be cached by [`Mux`]: it has an identity, a way
/// to await its death, and a teardown.
#[async_trait]
pub trait Muxed: Clone + Send + Sync + 'static {
    fn id(&self) -> u64;

    /// Resolve when the transport terminates. Called at most once, by
    /// the supervisor that owns this transport.
    async fn died(&self);

    /// Best-effort teardown of the transport and its carrier.
    async fn close(&self);
}

/// Cached-transport state machine: `None` is cold, `Some` is live.
///
/// Creation runs under the state mutex, so at most one transport is ever
/// being built and concurrent cold callers queue up to receive the one
/// fresh clone. Each stored transport gets a supervisor task that awaits
/// its death and resets the slot — unless the slot already belongs to a
/// newer transport.
pub struct Mux<T> {
    slot: Arc<Mutex<Option<T>>>,
}

impl<T> Mux<T> {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
        }
    }
}

impl<T> Default for Mux<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Muxed> Mux<T> {
    /// Return the cached transport, creating it with `connect` if the
    /// state is cold. No liveness probe is performed on a cached
    /// transport; supervised death is what returns the state to cold.
    ///
    /// A failed creation leaves the state cold and surfaces the error to
    /// this caller; the next caller retries from scratch.
    pub async fn ensure<F, Fut, E>(&self, connect: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut slot = self.slot.lock().await;
        if let Some(transport) = slot.as_ref() {
            return Ok(transport.clone());
        }

        let transport = connect().await?;
        *slot = Some(transport.clone());
        tokio::spawn(supervise(Arc::clone(&self.slot), transport.clone()));

        Ok(transport)
    }

    /// Tear down the cached transport, if any, and go cold.
    pub async fn teardown(&self) {
        let stale = self.slot.lock().await.take();
        if let Some(transport) = stale {
            transport.close().await;
        }
    }

    /// Identity of the cached transport, if the state is live.
    pub async fn live_id(&self) -> Option<u64> {
        self.slot.lock().await.as_ref().map(Muxed::id)
    }
}

/// Watch one specific transport. The identity check before and after the
/// blocking wait keeps a stale supervisor from wiping state that already
/// belongs to a replacement transport.
async fn supervise<T: Muxed>(slot: Arc<Mutex<Option<T>>>, transport: T) {
    {
        let guard = slot.lock().await;
        match guard.as_ref() {
            Some(current) if current.id() == transport.id() => {}
            _ => return,
        }
    }

    transport.died().await;

    let stale = {
        let mut guard = slot.lock().await;
        match guard.as_ref() {
            Some(current) if current.id() == transport.id() => guard.take(),
            _ => None,
        }
    };
    if let Some(transport) = stale {
        transport.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::watch;

    #[derive(Clone, Debug)]
    struct FakeTransport {
        id: u64,
        death: watch::Receiver<bool>,
        closed: Arc<AtomicUsize>,
    }

    fn fake_transport(id: u64) -> (FakeTransport, watch::Sender<bool>, Arc<AtomicUsize>) {
        let (death_tx, death_rx) = watch::channel(false);
        let closed = Arc::new(AtomicUsize::new(0));
        (
            FakeTransport {
                id,
                death: death_rx,
                closed: closed.clone(),
            },
            death_tx,
            closed,
        )
    }

    #[async_trait]
    impl Muxed for FakeTransport {
        fn id(&self) -> u64 {
            self.id
        }

        async fn died(&self) {
            let mut death = self.death.clone();
            loop {
                if *death.borrow() {
                    return;
                }
                if death.changed().await.is_err() {
                    return;
                }
            }
        }

        async fn close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn wait_cold(mux: &Mux<FakeTransport>) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while mux.live_id().await.is_some() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("mux never went cold");
    }

    #[tokio::test]
    async fn test_concurrent_cold_start_creates_once() {
        let mux = Arc::new(Mux::new());
        let created = Arc::new(AtomicUsize::new(0));
        let (transport, _death_tx, _closed) = fake_transport(7);

        let mut tasks = Vec::new();
        for _ in 0..100 {
            let mux = Arc::clone(&mux);
            let created = Arc::clone(&created);
            let transport = transport.clone();
            tasks.push(tokio::spawn(async move {
                mux.ensure(|| async move {
                    created.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok::<_, ()>(transport)
                })
                .await
                .unwrap()
                .id()
            }));
        }

        for task in tasks {
            assert_eq!(task.await.unwrap(), 7);
        }
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cached_transport_is_reused_without_reconnect() {
        let mux = Mux::new();
        let created = AtomicUsize::new(0);
        let (transport, _death_tx, _closed) = fake_transport(1);

        for _ in 0..3 {
            let transport = transport.clone();
            let got = mux
                .ensure(|| async {
                    created.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ()>(transport)
                })
                .await
                .unwrap();
            assert_eq!(got.id(), 1);
        }
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_supervised_death_resets_state_and_closes() {
        let mux = Mux::new();
        let (first, first_death, first_closed) = fake_transport(1);
        mux.ensure(|| async { Ok::<_, ()>(first) }).await.unwrap();
        assert_eq!(mux.live_id().await, Some(1));

        first_death.send(true).unwrap();
        wait_cold(&mux).await;
        assert_eq!(first_closed.load(Ordering::SeqCst), 1);

        // next caller reconnects from scratch
        let (second, _death_tx, _closed) = fake_transport(2);
        let got = mux.ensure(|| async { Ok::<_, ()>(second) }).await.unwrap();
        assert_eq!(got.id(), 2);
        assert_eq!(mux.live_id().await, Some(2));
    }

    #[tokio::test]
    async fn test_at_most_one_live_transport() {
        let mux = Mux::new();
        let live = Arc::new(AtomicUsize::new(0));

        for id in 1..=5u64 {
            let (transport, death_tx, _closed) = fake_transport(id);
            let live_count = Arc::clone(&live);
            mux.ensure(|| async move {
                assert_eq!(live_count.fetch_add(1, Ordering::SeqCst), 0);
                Ok::<_, ()>(transport)
            })
            .await
            .unwrap();

            death_tx.send(true).unwrap();
            wait_cold(&mux).await;
            live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_stale_supervisor_leaves_replacement_alone() {
        let mux = Mux::new();
        let (first, first_death, first_closed) = fake_transport(1);
        mux.ensure(|| async { Ok::<_, ()>(first) }).await.unwrap();
        tokio::task::yield_now().await;

        mux.teardown().await;
        assert_eq!(first_closed.load(Ordering::SeqCst), 1);
        assert_eq!(mux.live_id().await, None);

        let (second, _second_death, second_closed) = fake_transport(2);
        mux.ensure(|| async { Ok::<_, ()>(second) }).await.unwrap();

        // the first transport's death arrives late; its supervisor must
        // not touch the replacement
        first_death.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(mux.live_id().await, Some(2));
        assert_eq!(second_closed.load(Ordering::SeqCst), 0);
        assert_eq!(first_closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_creation_leaves_state_cold() {
        let mux: Mux<FakeTransport> = Mux::new();
        let err = mux
            .ensure(|| async { Err::<FakeTransport, &str>("dial failed") })
            .await
            .unwrap_err();
        assert_eq!(err, "dial failed");
        assert_eq!(mux.live_id().await, None);

        let (transport, _death_tx, _closed) = fake_transport(3);
        let got = mux.ensure(|| async { Ok::<_, ()>(transport) }).await.unwrap();
        assert_eq!(got.id(), 3);
    }

    #[tokio::test]
    async fn test_teardown_when_cold_is_a_no_op() {
        let mux: Mux<FakeTransport> = Mux::new();
        mux.teardown().await;
        assert_eq!(mux.live_id().await, None);
    }
}
