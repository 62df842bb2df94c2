use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use aiden_core::event::{Event, Subscription};

/// JSONL event logger.
///
/// Appends every event it sees to `{log_dir}/{project_id}.jsonl`, one JSON
/// object per line, flushing after each line so a crash loses nothing that
/// was already written.
pub struct EventLogger {
    log_dir: PathBuf,
    writers: HashMap<String, BufWriter<File>>,
}

impl EventLogger {
    pub fn new(log_dir: PathBuf) -> Self {
        Self {
            log_dir,
            writers: HashMap::new(),
        }
    }

    pub fn log_path(log_dir: &Path, project_id: &str) -> PathBuf {
        log_dir.join(format!("{}.jsonl", project_id))
    }

    /// Consume events until cancelled or the bus goes away.
    ///
    /// Takes an existing subscription so nothing published between spawning
    /// and the first poll is missed.
    pub async fn run(mut self, mut events: Subscription, cancel: CancellationToken) {
        if let Err(e) = tokio::fs::create_dir_all(&self.log_dir).await {
            error!(error = %e, path = %self.log_dir.display(), "Failed to create event log directory");
            return;
        }
        info!(path = %self.log_dir.display(), "Event logger started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Event logger cancelled");
                    break;
                }
                next = events.recv() => {
                    match next {
                        Some(event) => {
                            if let Err(e) = self.write(&event).await {
                                error!(error = %e, project_id = %event.project_id, "Failed to write event log entry");
                            }
                        }
                        None => {
                            debug!("Event bus closed, event logger stopping");
                            break;
                        }
                    }
                }
            }
        }

        // Drain whatever is already buffered so a cancel right after a
        // publish still records it.
        while let Some(event) = events.try_recv() {
            if let Err(e) = self.write(&event).await {
                error!(error = %e, "Failed to write event log entry");
            }
        }
        for writer in self.writers.values_mut() {
            writer.flush().await.ok();
        }
        debug!("Event logger finished");
    }

    async fn write(&mut self, event: &Event) -> std::io::Result<()> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        if !self.writers.contains_key(&event.project_id) {
            let path = Self::log_path(&self.log_dir, &event.project_id);
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?;
            debug!(path = %path.display(), "Opened project event log");
            self.writers
                .insert(event.project_id.clone(), BufWriter::new(file));
        }
        let Some(writer) = self.writers.get_mut(&event.project_id) else {
            return Ok(());
        };
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aiden_core::event::{types, EventBus, EventSink};
    use serde_json::json;

    #[tokio::test]
    async fn writes_one_file_per_project() {
        let dir = tempfile::tempdir().unwrap();
        let bus = EventBus::new(32);
        let cancel = CancellationToken::new();
        let logger = EventLogger::new(dir.path().join("events"));
        let handle = tokio::spawn(logger.run(bus.subscribe_all(), cancel.clone()));

        bus.publish(types::PROJECT_STARTED, json!({}), "p-1");
        bus.publish(types::PHASE_STARTED, json!({"phase_type": "analysis"}), "p-1");
        bus.publish(types::PROJECT_STARTED, json!({}), "p-2");

        // Give the logger a chance to drain before cancelling.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        cancel.cancel();
        handle.await.unwrap();

        let p1 = std::fs::read_to_string(EventLogger::log_path(&dir.path().join("events"), "p-1"))
            .unwrap();
        let lines: Vec<Event> = p1
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].event_type, "project.started");
        assert_eq!(lines[1].data["phase_type"], "analysis");

        let p2 = std::fs::read_to_string(EventLogger::log_path(&dir.path().join("events"), "p-2"))
            .unwrap();
        assert_eq!(p2.lines().count(), 1);
    }

    #[tokio::test]
    async fn appends_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        for _ in 0..2 {
            let bus = EventBus::new(8);
            let cancel = CancellationToken::new();
            let sub = bus.subscribe_all();
            bus.publish(types::PROJECT_PAUSED, json!({}), "p-1");
            cancel.cancel();
            EventLogger::new(dir.path().to_path_buf()).run(sub, cancel).await;
        }
        let log = std::fs::read_to_string(EventLogger::log_path(dir.path(), "p-1")).unwrap();
        assert_eq!(log.lines().count(), 2);
    }
}
