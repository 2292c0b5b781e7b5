use std::path::Path;
use std::time::Duration;

use pelago_core::error::PublishError;
use reqwest::Client;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use url::Url;

/// Default maximum wait for the importer to become available.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(10);

/// Delay between importer status polls.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Status body the importer reports when it is ready to pick up work.
const AVAILABLE_BODY: &str = "AVAILABLE";

/// How long a trigger call waits for the importer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    /// Give up after this long. The caller can trigger again later.
    Bounded(Duration),
    /// Wait until the importer answers, however long that takes. Used for
    /// removal runs that must not leave a manifest unprocessed.
    Unbounded,
}

/// Importer state as reported by its status endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportStatus {
    /// The importer is ready to be triggered.
    Available,
    /// The importer answered with something other than available; the
    /// body is kept for diagnostics.
    Busy(String),
    /// The status endpoint could not be reached.
    Unreachable(String),
}

/// HTTP client for the portal's import trigger endpoints.
///
/// The importer exposes two endpoints: a status endpoint whose plain-text
/// body reports availability, and a trigger endpoint that starts an import
/// pass over the datasets directory when POSTed to.
#[derive(Clone)]
pub struct ImportTrigger {
    client: Client,
    status_url: Url,
    trigger_url: Url,
    poll_interval: Duration,
}

impl ImportTrigger {
    /// Creates a client for the given status and trigger endpoints.
    ///
    /// # Errors
    ///
    /// Returns `PublishError::InvalidUrl` if either URL is malformed and
    /// `PublishError::Client` if the HTTP client cannot be built.
    pub fn new(status_url: &str, trigger_url: &str) -> Result<Self, PublishError> {
        let status_url = Url::parse(status_url)
            .map_err(|_| PublishError::InvalidUrl(status_url.to_string()))?;
        let trigger_url = Url::parse(trigger_url)
            .map_err(|_| PublishError::InvalidUrl(trigger_url.to_string()))?;

        let client = Client::builder()
            .user_agent("Pelago/0.2 (archive-publisher)")
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PublishError::Client(e.to_string()))?;

        Ok(Self {
            client,
            status_url,
            trigger_url,
            poll_interval: POLL_INTERVAL,
        })
    }

    /// Overrides the status poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Reports the importer's state without failing. Transport errors
    /// collapse into [`ImportStatus::Unreachable`]; callers that need the
    /// error itself use [`trigger_import`](Self::trigger_import).
    pub async fn check_status(&self) -> ImportStatus {
        match self.fetch_status().await {
            Ok(body) if body == AVAILABLE_BODY => ImportStatus::Available,
            Ok(body) => ImportStatus::Busy(body),
            Err(err) => ImportStatus::Unreachable(err.to_string()),
        }
    }

    /// One GET against the status endpoint, returning the trimmed body.
    async fn fetch_status(&self) -> Result<String, PublishError> {
        let resp = self
            .client
            .get(self.status_url.clone())
            .send()
            .await
            .map_err(|e| PublishError::Client(format!("status request failed: {e}")))?;
        let body = resp
            .text()
            .await
            .map_err(|e| PublishError::Client(format!("status body unreadable: {e}")))?;
        Ok(body.trim().to_string())
    }

    /// POSTs the trigger endpoint. The importer reads the datasets
    /// directory on its own schedule after this returns.
    pub async fn trigger(&self) -> Result<(), PublishError> {
        let resp = self
            .client
            .post(self.trigger_url.clone())
            .send()
            .await
            .map_err(|e| PublishError::Client(format!("trigger request failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(PublishError::Client(format!(
                "trigger endpoint answered HTTP {}",
                resp.status().as_u16()
            )));
        }
        info!(url = %self.trigger_url, "import triggered");
        Ok(())
    }

    /// Polls the status endpoint until the importer is available, then
    /// triggers it. A busy importer is polled again after the poll
    /// interval; transport errors propagate immediately.
    ///
    /// # Errors
    ///
    /// Returns `PublishError::ImportNotAvailable` when a bounded wait
    /// expires with the importer still busy.
    pub async fn trigger_import(&self, wait: WaitMode) -> Result<(), PublishError> {
        let started = Instant::now();
        let mut polls = 0_u32;
        loop {
            let body = self.fetch_status().await?;
            polls += 1;
            if body == AVAILABLE_BODY {
                return self.trigger().await;
            }
            debug!(status = %body, "importer not available yet");

            // A busy importer always gets a second look, even with a
            // zero deadline.
            if let WaitMode::Bounded(max) = wait {
                if polls >= 2 && started.elapsed() >= max {
                    let waited_secs = started.elapsed().as_secs();
                    warn!(waited_secs, "importer never became available");
                    return Err(PublishError::ImportNotAvailable { waited_secs });
                }
            }
            sleep(self.poll_interval).await;
        }
    }

    /// Waits for the importer to consume and delete a removal manifest.
    /// The importer deletes `manifest` when it has retired the named
    /// packages; until then the removals are pending on the portal side.
    pub async fn wait_for_manifest_removal(
        &self,
        manifest: &Path,
        wait: WaitMode,
    ) -> Result<(), PublishError> {
        let started = Instant::now();
        loop {
            if !manifest.exists() {
                info!(manifest = %manifest.display(), "removal manifest consumed");
                return Ok(());
            }
            if let WaitMode::Bounded(max) = wait {
                if started.elapsed() >= max {
                    return Err(PublishError::ImportNotAvailable {
                        waited_secs: started.elapsed().as_secs(),
                    });
                }
            }
            sleep(self.poll_interval).await;
        }
    }
}
