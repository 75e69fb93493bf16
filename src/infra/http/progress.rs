use std::collections::VecDeque;

use async_trait::async_trait;
use reqwest::Response;
use tracing::{debug, warn};

use crate::domain::entities::import_job::ImportProgress;
use crate::usecase::ports::api::{ApiError, ProgressEvent, ProgressFeed};

/// Incremental `text/event-stream` decoder for upload progress.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<ProgressEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    events.push(event);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }

        events
    }

    /// Flushes an event the server did not terminate with a blank line.
    pub fn finish(&mut self) -> Option<ProgressEvent> {
        if !self.buffer.is_empty() {
            let mut rest = std::mem::take(&mut self.buffer);
            rest.extend_from_slice(b"\n\n");
            return self.push(&rest).into_iter().next();
        }
        self.dispatch()
    }

    fn dispatch(&mut self) -> Option<ProgressEvent> {
        let name = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        to_progress_event(name.as_deref(), &data)
    }
}

fn to_progress_event(name: Option<&str>, data: &str) -> Option<ProgressEvent> {
    let json = serde_json::from_str::<serde_json::Value>(data).ok();
    let kind = name
        .map(str::to_string)
        .or_else(|| {
            json.as_ref()
                .and_then(|json| json.get("status"))
                .and_then(|status| status.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "progress".to_string());
    let snapshot = json
        .as_ref()
        .filter(|json| json.get("processed").is_some() || json.get("total").is_some())
        .and_then(|json| serde_json::from_value::<ImportProgress>(json.clone()).ok());

    match kind.as_str() {
        "completed" | "complete" | "done" => Some(ProgressEvent::Completed(snapshot)),
        "error" | "failed" => {
            let message = json
                .as_ref()
                .and_then(|json| json.get("message"))
                .and_then(|message| message.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| data.to_string());
            Some(ProgressEvent::Error(message))
        }
        _ => match snapshot {
            Some(snapshot) => Some(ProgressEvent::Progress(snapshot)),
            None => {
                warn!(event = %kind, "ignoring unreadable progress event");
                None
            }
        },
    }
}

pub struct SseProgressFeed {
    response: Response,
    decoder: SseDecoder,
    queue: VecDeque<ProgressEvent>,
    closed: bool,
}

impl SseProgressFeed {
    pub fn new(response: Response) -> Self {
        Self {
            response,
            decoder: SseDecoder::default(),
            queue: VecDeque::new(),
            closed: false,
        }
    }
}

#[async_trait]
impl ProgressFeed for SseProgressFeed {
    async fn next_event(&mut self) -> Result<Option<ProgressEvent>, ApiError> {
        loop {
            if let Some(event) = self.queue.pop_front() {
                return Ok(Some(event));
            }
            if self.closed {
                return Ok(None);
            }

            let chunk = self
                .response
                .chunk()
                .await
                .map_err(|err| ApiError::Network(err.to_string()))?;
            match chunk {
                Some(bytes) => self.queue.extend(self.decoder.push(&bytes)),
                None => {
                    debug!("progress feed closed by server");
                    self.closed = true;
                    self.queue.extend(self.decoder.finish());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_events_split_across_chunks() {
        let mut decoder = SseDecoder::default();

        let first = decoder.push(b"event: progress\ndata: {\"processed\":1,");
        assert!(first.is_empty());

        let second = decoder.push(b"\"total\":3,\"succeeded\":1}\r\n\r\n: keep-alive\n\n");
        assert_eq!(
            second,
            vec![ProgressEvent::Progress(ImportProgress {
                processed: 1,
                total: 3,
                succeeded: 1,
                ..ImportProgress::default()
            })]
        );
    }

    #[test]
    fn recognises_terminal_events() {
        let mut decoder = SseDecoder::default();
        let events = decoder.push(
            b"event: completed\ndata: {\"processed\":3,\"total\":3}\n\nevent: error\ndata: {\"message\":\"sheet missing\"}\n\n",
        );

        assert!(matches!(events[0], ProgressEvent::Completed(Some(p)) if p.processed == 3));
        assert_eq!(events[1], ProgressEvent::Error("sheet missing".to_string()));
    }

    #[test]
    fn status_field_stands_in_for_event_name() {
        let mut decoder = SseDecoder::default();
        let events = decoder.push(b"data: {\"status\":\"done\"}\n\n");
        assert_eq!(events, vec![ProgressEvent::Completed(None)]);
    }

    #[test]
    fn finish_flushes_unterminated_event() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"event: error\ndata: boom").is_empty());
        assert_eq!(decoder.finish(), Some(ProgressEvent::Error("boom".to_string())));
        assert_eq!(decoder.finish(), None);
    }
}
