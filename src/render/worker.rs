//! Render worker - runs in separate thread(s)

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use flume::{Receiver, Sender};
use log::{debug, warn};

use super::request::{RenderRequest, RenderResponse};
use super::source::SharedSource;

/// Main worker function - runs in a dedicated thread.
///
/// Requests that arrive after `closed` is set are skipped without touching
/// the source; renders already under way finish and are dropped by the
/// receiving side.
#[expect(
    clippy::needless_pass_by_value,
    reason = "Values moved into thread, need ownership"
)]
pub fn render_worker(
    source: SharedSource,
    requests: Receiver<RenderRequest>,
    responses: Sender<RenderResponse>,
    closed: Arc<AtomicBool>,
) {
    for request in requests {
        match request {
            RenderRequest::Page {
                id,
                page,
                target_width,
            } => {
                if closed.load(Ordering::Acquire) {
                    continue;
                }

                let started = Instant::now();
                let response = match source.render_page(page, target_width) {
                    Ok(buffer) => {
                        debug!(
                            "Rendered page {page} at {}x{} in {:?}",
                            buffer.width(),
                            buffer.height(),
                            started.elapsed()
                        );
                        RenderResponse::Page { id, page, buffer }
                    }
                    Err(error) => {
                        warn!("Failed to render page {page}: {error}");
                        RenderResponse::Error { id, page, error }
                    }
                };

                if responses.send(response).is_err() {
                    break;
                }
            }

            RenderRequest::Shutdown => break,
        }
    }
}
