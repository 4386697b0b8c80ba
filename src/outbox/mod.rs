use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::OutboxConfig;
use crate::schema;
use crate::transport::UploadClient;

/// Pending observation files carry this extension; anything else in
/// `incoming/` is left untouched.
const PENDING_EXTENSION: &str = "json";

/// Outcome tally for one drain run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub sent: usize,
    pub failed: usize,
}

/// Drains the pending-file directory once per invocation.
///
/// Each `.json` file in `incoming/` is decoded, validated, and uploaded,
/// then moved to exactly one of `sent/` or `failed/` via an atomic rename.
/// One file's fault never aborts the rest of the batch, and nothing here
/// retries: a failed file stays in `failed/` until an operator re-queues it.
///
/// The processor takes no lock on the directory; running two instances
/// concurrently is an operational error the scheduler must prevent.
pub struct OutboxProcessor {
    incoming: PathBuf,
    sent: PathBuf,
    failed: PathBuf,
    client: UploadClient,
}

impl OutboxProcessor {
    /// Creates a processor for the configured outbox directory and endpoint.
    pub fn new(cfg: &OutboxConfig) -> Result<Self> {
        let client = UploadClient::new(&cfg.endpoint, cfg.timeout)
            .context("building upload client")?;

        Ok(Self {
            incoming: cfg.incoming(),
            sent: cfg.sent(),
            failed: cfg.failed(),
            client,
        })
    }

    /// Processes every pending file exactly once, in name order.
    ///
    /// Fails hard only on directory-level faults (unreadable `incoming/`,
    /// missing terminal directories); those are infrastructure the processor
    /// expects to pre-exist, not per-file conditions.
    pub async fn drain(&self) -> Result<DrainStats> {
        let mut names = Vec::new();

        let entries = std::fs::read_dir(&self.incoming)
            .with_context(|| format!("reading outbox directory {}", self.incoming.display()))?;

        for entry in entries {
            let entry = entry.context("reading outbox directory entry")?;
            let name = entry.file_name();
            if Path::new(&name).extension() == Some(OsStr::new(PENDING_EXTENSION)) {
                names.push(name);
            }
        }

        // Name order makes runs deterministic regardless of readdir order.
        names.sort();

        let mut stats = DrainStats::default();

        for name in names {
            let path = self.incoming.join(&name);

            match self.process_file(&path).await {
                Ok(()) => {
                    self.settle(&path, &name, &self.sent)?;
                    info!(file = %name.to_string_lossy(), "uploaded, moved to sent");
                    stats.sent += 1;
                }
                Err(e) => {
                    self.settle(&path, &name, &self.failed)?;
                    warn!(
                        file = %name.to_string_lossy(),
                        error = %format!("{e:#}"),
                        "rejected, moved to failed",
                    );
                    stats.failed += 1;
                }
            }
        }

        info!(sent = stats.sent, failed = stats.failed, "outbox drain complete");

        Ok(stats)
    }

    /// Decode, validate, upload. Any error classifies the file as failed.
    async fn process_file(&self, path: &Path) -> Result<()> {
        let raw = std::fs::read_to_string(path).context("reading pending file")?;

        let payload: serde_json::Value =
            serde_json::from_str(&raw).context("decoding pending file")?;

        let submission = schema::validate(&payload)?;

        self.client.send(&submission).await?;

        Ok(())
    }

    /// Moves a file to its terminal directory. Rename, never copy-then-delete,
    /// so the move is atomic and the file exists in exactly one place.
    fn settle(&self, from: &Path, name: &OsString, terminal: &Path) -> Result<()> {
        let dest = terminal.join(name);
        std::fs::rename(from, &dest)
            .with_context(|| format!("moving {} to {}", from.display(), dest.display()))
    }
}
