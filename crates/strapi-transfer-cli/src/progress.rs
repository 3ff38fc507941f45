//! Rendering of the progress stream: spinners or JSON lines.

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use strapi_transfer::{ProgressEvent, TransferStage};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::summary::format_bytes;

/// Consume progress events until the engine is dropped.
pub fn spawn(mut rx: broadcast::Receiver<ProgressEvent>, json_lines: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut spinners = Spinners::new();
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            };
            if json_lines {
                eprintln!("{}", json_line(&event));
            } else {
                spinners.update(&event);
            }
        }
        spinners.clear();
    })
}

/// `{"event": "stage::progress", ...}` for one event.
pub fn json_line(event: &ProgressEvent) -> String {
    let mut value = serde_json::to_value(event).unwrap_or_else(|_| json!({}));
    if let Some(map) = value.as_object_mut() {
        map.remove("type");
        map.insert("event".into(), json!(event.name()));
        map.insert("timestamp".into(), json!(chrono::Utc::now().to_rfc3339()));
    }
    value.to_string()
}

struct Spinners {
    multi: MultiProgress,
    bars: HashMap<TransferStage, ProgressBar>,
}

impl Spinners {
    fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: HashMap::new(),
        }
    }

    fn update(&mut self, event: &ProgressEvent) {
        match event {
            ProgressEvent::StageStart { stage, .. } => {
                let bar = self.multi.add(ProgressBar::new_spinner());
                bar.set_style(
                    ProgressStyle::default_spinner()
                        .template("{spinner:.green} {msg}")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                );
                bar.set_message(format!("{}: starting", stage));
                bar.enable_steady_tick(Duration::from_millis(100));
                self.bars.insert(*stage, bar);
            }
            ProgressEvent::StageProgress { stage, data } => {
                if let Some(bar) = self.bars.get(stage) {
                    bar.set_message(format!(
                        "{}: {} transferred (size: {})",
                        stage,
                        data.count,
                        format_bytes(data.bytes)
                    ));
                }
            }
            ProgressEvent::StageFinish { stage, data } => {
                if let Some(bar) = self.bars.remove(stage) {
                    bar.finish_with_message(format!(
                        "{}: {} transferred (size: {})",
                        stage,
                        data.count,
                        format_bytes(data.bytes)
                    ));
                }
            }
            ProgressEvent::StageError { stage, error } => {
                if let Some(bar) = self.bars.remove(stage) {
                    bar.abandon_with_message(format!("{}: failed ({})", stage, error));
                }
            }
            _ => {}
        }
    }

    fn clear(&mut self) {
        for (_, bar) in self.bars.drain() {
            bar.abandon();
        }
    }
}
