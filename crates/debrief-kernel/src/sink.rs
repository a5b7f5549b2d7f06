//! Output side of playback.

use debrief_types::Message;
use tokio::sync::mpsc;

/// Error returned by a sink. Logged by the scheduler, never propagated.
pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// Receives every played message, in order, one at a time.
pub trait PlaybackSink: Send + 'static {
    fn handle_message(&mut self, message: &Message) -> Result<(), SinkError>;
}

impl PlaybackSink for mpsc::UnboundedSender<Message> {
    fn handle_message(&mut self, message: &Message) -> Result<(), SinkError> {
        self.send(message.clone())?;
        Ok(())
    }
}
