//! Per-user ordered delivery. Each active user gets a lane: an mpsc queue
//! drained by its own task, so one user's updates run in arrival order while
//! different users never wait on each other.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::bot::Bot;
use crate::chat::Update;
use crate::model::UserId;
use crate::observability;

const LANE_CAPACITY: usize = 64;

#[async_trait]
pub trait UpdateHandler: Send + Sync + 'static {
    async fn handle(&self, update: Update);
}

#[async_trait]
impl UpdateHandler for Bot {
    async fn handle(&self, update: Update) {
        Bot::handle(self, update).await
    }
}

type Lanes = DashMap<UserId, mpsc::Sender<Update>>;

pub struct Dispatcher<H: UpdateHandler> {
    handler: Arc<H>,
    lanes: Arc<Lanes>,
    running: Arc<AtomicUsize>,
    closed: AtomicBool,
    update_timeout: Duration,
    lane_idle: Duration,
}

impl<H: UpdateHandler> Dispatcher<H> {
    pub fn new(handler: Arc<H>, update_timeout: Duration, lane_idle: Duration) -> Self {
        Self {
            handler,
            lanes: Arc::new(DashMap::new()),
            running: Arc::new(AtomicUsize::new(0)),
            closed: AtomicBool::new(false),
            update_timeout,
            lane_idle,
        }
    }

    /// Queues `update` on its sender's lane, opening one if needed. Never
    /// waits: a full lane sheds the update, and so does a closed dispatcher.
    pub fn dispatch(&self, update: Update) {
        let user_id = update.sender().user_id;
        if self.closed.load(Ordering::SeqCst) {
            tracing::warn!("shutting down, dropped update from user {user_id}");
            return;
        }
        let mut update = update;
        loop {
            let tx = self
                .lanes
                .entry(user_id)
                .or_insert_with(|| self.spawn_lane(user_id))
                .clone();
            match tx.try_send(update) {
                Ok(()) => return,
                Err(TrySendError::Full(_)) => {
                    metrics::counter!(observability::UPDATES_SHED_TOTAL).increment(1);
                    tracing::warn!("lane for user {user_id} is full, dropped update");
                    return;
                }
                Err(TrySendError::Closed(back)) => {
                    // The lane went idle between lookup and send.
                    self.lanes.remove_if(&user_id, |_, t| t.same_channel(&tx));
                    update = back;
                }
            }
        }
    }

    fn spawn_lane(&self, user_id: UserId) -> mpsc::Sender<Update> {
        let (tx, rx) = mpsc::channel(LANE_CAPACITY);
        let lane = Lane {
            user_id,
            handler: self.handler.clone(),
            lanes: self.lanes.clone(),
            running: self.running.clone(),
            update_timeout: self.update_timeout,
            lane_idle: self.lane_idle,
        };
        let n = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::gauge!(observability::LANES_ACTIVE).set(n as f64);
        tokio::spawn(lane.run(rx));
        tx
    }

    /// Lanes still running, including ones draining after [`close`](Self::close).
    pub fn active(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Stops accepting updates. Queued ones still run.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.lanes.clear();
    }
}

struct Lane<H: UpdateHandler> {
    user_id: UserId,
    handler: Arc<H>,
    lanes: Arc<Lanes>,
    running: Arc<AtomicUsize>,
    update_timeout: Duration,
    lane_idle: Duration,
}

impl<H: UpdateHandler> Lane<H> {
    async fn run(self, mut rx: mpsc::Receiver<Update>) {
        loop {
            match tokio::time::timeout(self.lane_idle, rx.recv()).await {
                Ok(Some(update)) => self.handle_one(update).await,
                Ok(None) => break,
                Err(_) => {
                    // Close under the map lock: a racing dispatch either made
                    // it into the buffer drained below or fails and reopens.
                    self.lanes.remove_if(&self.user_id, |_, _| {
                        rx.close();
                        true
                    });
                    rx.close();
                    while let Some(update) = rx.recv().await {
                        self.handle_one(update).await;
                    }
                    break;
                }
            }
        }
        let n = self.running.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::gauge!(observability::LANES_ACTIVE).set(n as f64);
        tracing::debug!("lane for user {} closed", self.user_id);
    }

    async fn handle_one(&self, update: Update) {
        if tokio::time::timeout(self.update_timeout, self.handler.handle(update))
            .await
            .is_err()
        {
            metrics::counter!(observability::UPDATES_TIMED_OUT_TOTAL).increment(1);
            tracing::warn!(
                "update from user {} abandoned after {:?}",
                self.user_id,
                self.update_timeout
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{ChatKind, Sender};
    use crate::model::ChatId;
    use std::sync::Mutex;

    /// Text is `<delay ms> <label>`; records the label once the delay passed.
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl UpdateHandler for Recorder {
        async fn handle(&self, update: Update) {
            let Update::Message { text, .. } = update else {
                return;
            };
            let (delay, label) = text.split_once(' ').unwrap();
            tokio::time::sleep(Duration::from_millis(delay.parse().unwrap())).await;
            self.seen.lock().unwrap().push(label.to_string());
        }
    }

    fn msg(user: i64, text: &str) -> Update {
        Update::Message {
            chat_id: ChatId(user),
            chat_kind: ChatKind::Private,
            from: Sender {
                user_id: UserId(user),
                name: format!("user{user}"),
            },
            text: text.into(),
        }
    }

    fn dispatcher(rec: &Arc<Recorder>) -> Dispatcher<Recorder> {
        Dispatcher::new(rec.clone(), Duration::from_secs(5), Duration::from_secs(60))
    }

    #[tokio::test(start_paused = true)]
    async fn keeps_arrival_order_per_user() {
        let rec = Arc::new(Recorder::default());
        let d = dispatcher(&rec);
        d.dispatch(msg(1, "300 a"));
        d.dispatch(msg(1, "10 b"));
        d.dispatch(msg(1, "0 c"));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(rec.seen(), vec!["a", "b", "c"]);
        assert_eq!(d.active(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn users_do_not_wait_on_each_other() {
        let rec = Arc::new(Recorder::default());
        let d = dispatcher(&rec);
        d.dispatch(msg(1, "4000 slow"));
        d.dispatch(msg(2, "0 fast"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(rec.seen(), vec!["fast"]);
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(rec.seen(), vec!["fast", "slow"]);
        assert_eq!(d.active(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_update_is_abandoned() {
        let rec = Arc::new(Recorder::default());
        let d = dispatcher(&rec);
        d.dispatch(msg(1, "600000 stuck"));
        d.dispatch(msg(1, "0 next"));
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(rec.seen(), vec!["next"]);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_lane_exits_and_reopens() {
        let rec = Arc::new(Recorder::default());
        let d = dispatcher(&rec);
        d.dispatch(msg(1, "0 first"));
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(d.active(), 0);

        d.dispatch(msg(1, "0 second"));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(rec.seen(), vec!["first", "second"]);
        assert_eq!(d.active(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn full_lane_sheds_updates() {
        let rec = Arc::new(Recorder::default());
        let d = dispatcher(&rec);
        // The first update is taken off the queue before the rest arrive.
        d.dispatch(msg(1, "1000 busy"));
        tokio::time::sleep(Duration::from_millis(1)).await;
        for _ in 0..LANE_CAPACITY + 10 {
            d.dispatch(msg(1, "0 queued"));
        }
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(rec.seen().len(), 1 + LANE_CAPACITY);
    }

    #[tokio::test(start_paused = true)]
    async fn close_drains_queued_updates() {
        let rec = Arc::new(Recorder::default());
        let d = dispatcher(&rec);
        d.dispatch(msg(1, "100 a"));
        d.dispatch(msg(1, "100 b"));
        d.close();
        d.dispatch(msg(1, "0 late"));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(rec.seen(), vec!["a", "b"]);
        assert_eq!(d.active(), 0);
    }
}
