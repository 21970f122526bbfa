//! Lifecycle harness embedded by every producer: bounded message
//! channel with timeout-and-drop semantics, a priority control channel,
//! and the loop variants spec.md §4.4 names.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;

use gollum_core::{ControlMessage, Message, MetricsRegistry, PluginStateCell};

use crate::fuse::Fuse;

/// Whether a loop callback wants to keep running or stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    Continue,
    Stop,
}

/// Cheap, cloneable front door to a producer's channels — what the
/// routing fabric and supervisor hold onto, as opposed to `ProducerBase`
/// itself, which owns the receiving ends exclusively.
#[derive(Clone)]
pub struct ProducerHandle {
    id: Arc<str>,
    message_tx: mpsc::Sender<Message>,
    control_tx: mpsc::Sender<ControlMessage>,
    channel_timeout: Duration,
    metrics: Arc<MetricsRegistry>,
}

impl ProducerHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn message_sender(&self) -> mpsc::Sender<Message> {
        self.message_tx.clone()
    }

    pub fn control_sender(&self) -> mpsc::Sender<ControlMessage> {
        self.control_tx.clone()
    }

    /// Attempts delivery, polling `try_send` until it succeeds or
    /// `channel_timeout` elapses (tokio's bounded `mpsc` has no native
    /// `send_timeout`, so this is the poll-based stand-in). On timeout
    /// or a closed channel, routes `msg` to `drop_fn` instead and counts
    /// the drop under `<id>:Messages-dropped`.
    pub async fn enqueue(&self, mut msg: Message, drop_fn: impl FnOnce(Message)) {
        let deadline = Instant::now() + self.channel_timeout;
        loop {
            match self.message_tx.try_send(msg) {
                Ok(()) => return,
                Err(mpsc::error::TrySendError::Closed(m)) => {
                    self.metrics.add(&format!("{}:Messages-dropped", self.id), 1);
                    drop_fn(m);
                    return;
                }
                Err(mpsc::error::TrySendError::Full(m)) => {
                    msg = m;
                    if Instant::now() >= deadline {
                        self.metrics.add(&format!("{}:Messages-dropped", self.id), 1);
                        drop_fn(msg);
                        return;
                    }
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            }
        }
    }
}

/// Owns a producer's receiving channel ends and runs its loop. Embedded
/// by composition rather than inherited from, per spec.md §9's note
/// against deep inheritance trees.
pub struct ProducerBase {
    pub id: Arc<str>,
    pub state: Arc<PluginStateCell>,
    pub fuse: Arc<Fuse>,
    pub metrics: Arc<MetricsRegistry>,
    pub shutdown_timeout: Duration,
    message_rx: mpsc::Receiver<Message>,
    control_rx: mpsc::Receiver<ControlMessage>,
    handle: ProducerHandle,
    stop_callback: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    stop_called: AtomicBool,
}

impl ProducerBase {
    pub fn new(
        id: impl Into<Arc<str>>,
        channel_capacity: usize,
        channel_timeout: Duration,
        shutdown_timeout: Duration,
        metrics: Arc<MetricsRegistry>,
    ) -> (Self, ProducerHandle) {
        let id: Arc<str> = id.into();
        let (message_tx, message_rx) = mpsc::channel(channel_capacity.max(1));
        let (control_tx, control_rx) = mpsc::channel(16);
        let handle = ProducerHandle {
            id: id.clone(),
            message_tx,
            control_tx,
            channel_timeout,
            metrics: metrics.clone(),
        };
        let base = Self {
            id,
            state: Arc::new(PluginStateCell::default()),
            fuse: Arc::new(Fuse::new()),
            metrics,
            shutdown_timeout,
            message_rx,
            control_rx,
            handle: handle.clone(),
            stop_callback: Mutex::new(None),
            stop_called: AtomicBool::new(false),
        };
        (base, handle)
    }

    pub fn handle(&self) -> ProducerHandle {
        self.handle.clone()
    }

    /// Registers the function that runs exactly once when this
    /// producer's loop exits, by whatever path (graceful stop, closed
    /// channel). Overwrites any previously set callback.
    pub fn set_stop_callback(&self, f: impl FnOnce() + Send + 'static) {
        *self.stop_callback.lock() = Some(Box::new(f));
    }

    fn run_stop_callback_once(&self) {
        if self.stop_called.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(f) = self.stop_callback.lock().take() {
            f();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop_called.load(Ordering::SeqCst)
    }

    /// Drains and returns whatever remains in the message channel
    /// without blocking, for the shutdown drain-then-flush sequence in
    /// spec.md §4.4.
    pub fn drain_pending(&mut self) -> Vec<Message> {
        let mut drained = Vec::new();
        while let Ok(msg) = self.message_rx.try_recv() {
            drained.push(msg);
        }
        drained
    }

    pub async fn control_loop<Fut>(&mut self, mut on_control: impl FnMut(ControlMessage) -> Fut)
    where
        Fut: Future<Output = LoopControl>,
    {
        loop {
            match self.control_rx.recv().await {
                Some(c) => {
                    if on_control(c).await == LoopControl::Stop {
                        break;
                    }
                }
                None => break,
            }
        }
        self.run_stop_callback_once();
    }

    pub async fn message_loop<Fut>(&mut self, mut on_message: impl FnMut(Message) -> Fut)
    where
        Fut: Future<Output = LoopControl>,
    {
        loop {
            match self.message_rx.recv().await {
                Some(m) => {
                    if on_message(m).await == LoopControl::Stop {
                        break;
                    }
                }
                None => break,
            }
        }
        self.run_stop_callback_once();
    }

    pub async fn ticker_loop<Fut>(&mut self, interval: Duration, mut on_tick: impl FnMut() -> Fut)
    where
        Fut: Future<Output = LoopControl>,
    {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if on_tick().await == LoopControl::Stop {
                break;
            }
        }
        self.run_stop_callback_once();
    }

    /// Control messages are observed before any data message posted
    /// after them, per spec.md §5's ordering guarantee: the `select!`
    /// is `biased` with the control arm listed first.
    pub async fn message_control_loop<MFut, CFut>(
        &mut self,
        mut on_message: impl FnMut(Message) -> MFut,
        mut on_control: impl FnMut(ControlMessage) -> CFut,
    ) where
        MFut: Future<Output = LoopControl>,
        CFut: Future<Output = LoopControl>,
    {
        loop {
            tokio::select! {
                biased;
                ctrl = self.control_rx.recv() => {
                    match ctrl {
                        Some(c) => if on_control(c).await == LoopControl::Stop { break; },
                        None => break,
                    }
                }
                msg = self.message_rx.recv() => {
                    match msg {
                        Some(m) => if on_message(m).await == LoopControl::Stop { break; },
                        None => break,
                    }
                }
            }
        }
        self.run_stop_callback_once();
    }

    pub async fn ticker_message_control_loop<MFut, CFut, TFut>(
        &mut self,
        interval: Duration,
        mut on_message: impl FnMut(Message) -> MFut,
        mut on_control: impl FnMut(ControlMessage) -> CFut,
        mut on_tick: impl FnMut() -> TFut,
    ) where
        MFut: Future<Output = LoopControl>,
        CFut: Future<Output = LoopControl>,
        TFut: Future<Output = LoopControl>,
    {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                biased;
                ctrl = self.control_rx.recv() => {
                    match ctrl {
                        Some(c) => if on_control(c).await == LoopControl::Stop { break; },
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    if on_tick().await == LoopControl::Stop { break; }
                }
                msg = self.message_rx.recv() => {
                    match msg {
                        Some(m) => if on_message(m).await == LoopControl::Stop { break; },
                        None => break,
                    }
                }
            }
        }
        self.run_stop_callback_once();
    }
}

/// Catches every exit path a loop method doesn't already cover, most
/// importantly a panic unwinding out of an `on_message`/`on_control`/
/// `on_tick` callback mid-loop: the loop body never reaches its own
/// trailing `run_stop_callback_once()` call, but unwinding still drops
/// `ProducerBase`, so the callback runs here instead. `stop_called`
/// makes the two paths idempotent with each other.
impl Drop for ProducerBase {
    fn drop(&mut self) {
        self.run_stop_callback_once();
    }
}
