use serde::Serialize;
use tokio::sync::broadcast;

use crate::model::Submission;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Lifecycle events for one submitter's job. Exactly one terminal event
/// (`Error` or `Done`) is emitted per job.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    Started,
    Update {
        message: String,
    },
    Error {
        message: String,
        details: Option<String>,
    },
    Done {
        submission: Box<Submission>,
    },
}

impl JobEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobEvent::Error { .. } | JobEvent::Done { .. })
    }
}

/// Fan-out handle for one submitter's event stream. Any number of subscribers
/// may attach; all receive every event. Sending with no subscribers is fine.
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: broadcast::Sender<JobEvent>,
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    pub fn started(&self) {
        self.send(JobEvent::Started);
    }

    pub fn update(&self, message: impl Into<String>) {
        self.send(JobEvent::Update {
            message: message.into(),
        });
    }

    pub fn error(&self, message: impl Into<String>, details: Option<String>) {
        self.send(JobEvent::Error {
            message: message.into(),
            details,
        });
    }

    pub fn done(&self, submission: Submission) {
        self.send(JobEvent::Done {
            submission: Box::new(submission),
        });
    }

    fn send(&self, event: JobEvent) {
        // A send error only means nobody is listening right now.
        let _ = self.sender.send(event);
    }
}
