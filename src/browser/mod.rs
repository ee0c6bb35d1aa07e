//! Browser adapter: one long-lived `chromiumoxide` browser instance shared by
//! every tuner and by the VOD/EPG extraction paths, analogous to how the
//! upstream RTSP transcoder holds one shared `StreamManager` for the process
//! lifetime (`manager.rs`). Pages are owned exclusively by whichever task
//! opened them (spec.md §5 "shared-resource policy"): a tuner's page lives as
//! long as the tuner does, while EPG/VOD pages are transient and must be
//! closed by their opener.
//!
//! Event callbacks on browser objects are re-architected per spec.md §9 into
//! explicit `Subscription` capability bags with a `cancel()` that also fires
//! on `Drop`, rather than ad-hoc listener teardown scattered through call
//! sites.

use anyhow::{Context, Result};
use chromiumoxide::cdp::browser_protocol::network::EventResponseReceived;
use chromiumoxide::{Browser as CdpBrowser, BrowserConfig, Page};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

/// A cancellation handle for a background event-listener task. Cancels on
/// explicit `cancel()` or when dropped, so a page-scoped subscription never
/// outlives the function that created it even on an early-return error path.
pub struct Subscription {
    cancel_tx: Option<oneshot::Sender<()>>,
}

impl Subscription {
    pub fn cancel(mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Shared browser handle. Cloning is cheap (an `Arc` around the CDP client);
/// the underlying browser process is launched exactly once.
#[derive(Clone)]
pub struct Browser {
    inner: Arc<CdpBrowser>,
}

impl Browser {
    /// Launches the shared browser with a debug port and persistent profile
    /// directory (so login/cookie state survives restarts per spec.md §5).
    pub async fn launch(debug_port: u16, profile_dir: &str) -> Result<Self> {
        let config = BrowserConfig::builder()
            .with_head() // the rendered frame is screen-captured; headless-new still needs a virtual display
            .port(debug_port)
            .user_data_dir(profile_dir)
            .viewport(None)
            .build()
            .map_err(|e| anyhow::anyhow!("building browser config: {e}"))?;

        let (browser, mut handler) = CdpBrowser::launch(config)
            .await
            .context("launching headless browser")?;

        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    warn!("browser handler event error: {e}");
                }
            }
            info!("browser CDP handler stream ended");
        });

        Ok(Self { inner: Arc::new(browser) })
    }

    /// Opens a new page on the given virtual display. The caller owns the
    /// page's lifetime and must close it (tuners keep theirs for the life of
    /// the tuner; EPG/VOD extraction closes it when done, via a finalizer on
    /// every exit path).
    pub async fn new_page(&self, url: &str) -> Result<Page> {
        self.inner
            .new_page(url)
            .await
            .with_context(|| format!("opening page at {url}"))
    }

    /// Subscribes to network responses on `page`, invoking `on_response` for
    /// each observed URL. Used by both the EPG ingestor (API endpoint
    /// capture) and the VOD extractor (m3u8 URL capture). Returns a
    /// `Subscription` the caller must hold for as long as observation should
    /// continue; dropping or cancelling it stops the listener task.
    pub async fn observe_responses<F>(&self, page: &Page, mut on_response: F) -> Result<Subscription>
    where
        F: FnMut(String, Option<String>) + Send + 'static,
    {
        let mut events = page
            .event_listener::<EventResponseReceived>()
            .await
            .context("installing response listener")?;
        let (cancel_tx, mut cancel_rx) = oneshot::channel();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut cancel_rx => break,
                    next = events.next() => {
                        match next {
                            Some(event) => {
                                let url = event.response.url.clone();
                                let content_type = event.response.mime_type.clone();
                                on_response(url, Some(content_type));
                            }
                            None => break,
                        }
                    }
                }
            }
        });

        Ok(Subscription { cancel_tx: Some(cancel_tx) })
    }

    /// Closes a transient page. Call sites use this in a finalizer (e.g. a
    /// scope guard or the tail of every branch) so a page opened for a single
    /// extraction never leaks even when the extraction errors out partway
    /// through (spec.md §5).
    pub async fn close_page(page: &Page) {
        if let Err(e) = page.close().await {
            warn!("closing transient page failed: {e}");
        }
    }

    pub async fn shutdown(&self) {
        info!("closing shared browser");
        if let Err(e) = self.inner.close().await {
            error!("error closing browser: {e}");
        }
    }
}
