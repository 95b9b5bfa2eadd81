//! Change-feed adapter: drains a channel of notifications into the dispatcher.

use std::pin::Pin;

use tokio::sync::futures::Notified;
use tokio::sync::mpsc;
use tracing::info;

use requeue_core::ChangeEvent;

use crate::dispatcher::EventDispatcher;

/// Dispatch events from `events` until the channel closes or `shutdown` fires.
///
/// `shutdown` should already be enabled so a notification sent while an event
/// is being handled is not missed. Returns the number of events handled.
pub async fn run_feed(
    dispatcher: &EventDispatcher,
    mut events: mpsc::Receiver<ChangeEvent>,
    mut shutdown: Pin<&mut Notified<'_>>,
) -> usize {
    let mut handled = 0;
    loop {
        tokio::select! {
            next = events.recv() => match next {
                Some(event) => {
                    dispatcher.handle(&event);
                    handled += 1;
                }
                None => {
                    info!(handled, "change feed closed");
                    break;
                }
            },
            _ = shutdown.as_mut() => {
                info!(handled, "change feed stopped");
                break;
            }
        }
    }
    handled
}
