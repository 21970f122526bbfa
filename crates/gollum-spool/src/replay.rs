//! Independent spool reader: walks sealed segments and re-injects their
//! messages into the routing fabric, on its own schedule separate from
//! the spooling producer's own message loop.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use gollum_core::Message;

use crate::producer::Shared;
use crate::spool_file::SpoolFile;

/// Runs until `cancel` fires, waking every `interval` (conventionally
/// half `MaxFileAgeMin`, per spec.md §4.5) to drain every sealed segment
/// across every spool file the producer behind `shared` has opened.
/// Takes the producer's shared state by `Arc` rather than a reference to
/// the producer itself, so this task can run concurrently with the
/// producer's own `produce()` loop once ownership of the producer has
/// moved into its own task (see [`crate::producer::SpoolingProducer::shared_state`]).
pub async fn run(shared: Arc<Shared>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                replay_once(&shared).await;
            }
        }
    }
}

async fn replay_once(shared: &Arc<Shared>) {
    let files: Vec<Arc<SpoolFile>> = shared.spool_files.lock().values().cloned().collect();
    for file in files {
        if let Err(e) = replay_file(shared, &file) {
            tracing::warn!(stream = file.stream_name(), error = %e, "spool replay failed for this stream's segments");
        }
    }
}

fn replay_file(shared: &Shared, file: &SpoolFile) -> std::io::Result<()> {
    for segment in file.sealed_segments()? {
        let messages = file.read_segment(segment)?;
        file.record_read(messages.len() as u64);
        for msg in messages {
            replay_message(shared, msg);
        }
        file.delete_segment(segment)?;
    }
    Ok(())
}

/// Materializes a persisted message back onto the stream it was spooled
/// from. If dispatch on that stream would route it right back to the
/// stream it was just read off of, the message is dropped rather than
/// delivered — otherwise it would simply be re-spooled, looping forever
/// where a producer's own drop target is this spooler.
fn replay_message(shared: &Shared, mut msg: Message) {
    let spooled_from = msg.stream_id();
    msg.set_stream_id(msg.prev_stream_id());
    let targets = shared.stream_registry.route(msg);
    for (tx, routed) in targets {
        if routed.stream_id() == spooled_from {
            shared.metrics.add(&format!("{}:Messages-dropped", shared.id), 1);
            continue;
        }
        let _ = tx.try_send(routed);
    }
}
