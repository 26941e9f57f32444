use encoding_rs::{CoderResult, Decoder, UTF_8};
use futures_util::StreamExt;
use opwatch_core::{message_from_value, EventKind, FrameDecoder, ProtocolEvent, WorkspaceId};
use opwatch_logging::{op_debug, op_info, op_trace, op_warn};

use crate::{AnswerUpdate, ChatAnswer, ChatRequest, ChatTransport, StreamError, TurnError};

/// What the session should do after an event was handled.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    Continue,
    Finished(ChatAnswer),
}

/// Receives decoded events in arrival order.
pub trait StreamHandler: Send {
    fn handle(&mut self, event: ProtocolEvent) -> Result<Dispatch, StreamError>;
}

pub trait AnswerSink: Send + Sync {
    fn emit(&self, update: AnswerUpdate);
}

pub struct ChannelAnswerSink {
    tx: std::sync::mpsc::Sender<AnswerUpdate>,
}

impl ChannelAnswerSink {
    pub fn new(tx: std::sync::mpsc::Sender<AnswerUpdate>) -> Self {
        Self { tx }
    }
}

impl AnswerSink for ChannelAnswerSink {
    fn emit(&self, update: AnswerUpdate) {
        let _ = self.tx.send(update);
    }
}

/// Accumulates `delta` text and turns the terminal event into an answer.
pub struct AnswerHandler<'a> {
    sink: &'a dyn AnswerSink,
    buffer: String,
}

impl<'a> AnswerHandler<'a> {
    pub fn new(sink: &'a dyn AnswerSink) -> Self {
        Self {
            sink,
            buffer: String::new(),
        }
    }
}

impl StreamHandler for AnswerHandler<'_> {
    fn handle(&mut self, event: ProtocolEvent) -> Result<Dispatch, StreamError> {
        match event.kind {
            EventKind::Delta => {
                let text = event
                    .str_field("text")
                    .or_else(|| event.payload.as_str());
                if let Some(text) = text {
                    self.buffer.push_str(text);
                    self.sink.emit(AnswerUpdate::Partial(self.buffer.clone()));
                }
                Ok(Dispatch::Continue)
            }
            EventKind::Result => {
                if !event.payload.is_object() {
                    return Err(StreamError::Decode(format!(
                        "expected an object, got {}",
                        event.payload
                    )));
                }
                let mut answer: ChatAnswer = serde_json::from_value(event.payload)
                    .map_err(|err| StreamError::Decode(err.to_string()))?;
                if answer.answer.is_empty() {
                    answer.answer = std::mem::take(&mut self.buffer);
                }
                Ok(Dispatch::Finished(answer))
            }
            EventKind::Error => {
                let message = message_from_value(&event.payload)
                    .unwrap_or_else(|| "the server reported an error".to_string());
                Err(StreamError::Remote(message))
            }
            EventKind::Message | EventKind::Other(_) => {
                op_trace!("Ignoring {} event", event.kind.as_str());
                Ok(Dispatch::Continue)
            }
        }
    }
}

/// One streaming request: bytes in, handler callbacks out.
pub struct StreamSession {
    frames: FrameDecoder,
    utf8: Decoder,
    dispatched: usize,
}

impl Default for StreamSession {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamSession {
    pub fn new() -> Self {
        Self {
            frames: FrameDecoder::new(),
            utf8: UTF_8.new_decoder_without_bom_handling(),
            dispatched: 0,
        }
    }

    /// Runs the stream until the handler finishes it or the transport closes.
    ///
    /// A stream that closes without a terminal event is `Incomplete`, even
    /// when nothing was received at all.
    pub async fn run(
        mut self,
        transport: &dyn ChatTransport,
        workspace: &WorkspaceId,
        request: &ChatRequest,
        handler: &mut dyn StreamHandler,
    ) -> Result<ChatAnswer, StreamError> {
        let mut body = transport
            .open_stream(workspace, request)
            .await
            .map_err(StreamError::Open)?;

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(StreamError::Interrupted)?;
            let text = self.decode(&chunk, false);
            let events = self.frames.push(&text);
            if let Some(answer) = self.dispatch(events, handler)? {
                return Ok(answer);
            }
        }

        let tail = self.decode(&[], true);
        let mut events = self.frames.push(&tail);
        events.extend(self.frames.finish());
        if let Some(answer) = self.dispatch(events, handler)? {
            return Ok(answer);
        }

        Err(StreamError::Incomplete {
            events: self.dispatched,
        })
    }

    fn dispatch(
        &mut self,
        events: Vec<ProtocolEvent>,
        handler: &mut dyn StreamHandler,
    ) -> Result<Option<ChatAnswer>, StreamError> {
        for event in events {
            self.dispatched += 1;
            if let Dispatch::Finished(answer) = handler.handle(event)? {
                return Ok(Some(answer));
            }
        }
        Ok(None)
    }

    fn decode(&mut self, bytes: &[u8], last: bool) -> String {
        let mut text = String::new();
        let mut src = bytes;
        loop {
            let needed = self
                .utf8
                .max_utf8_buffer_length(src.len())
                .unwrap_or(src.len() + 16);
            text.reserve(needed);
            let (result, read, _) = self.utf8.decode_to_string(src, &mut text, last);
            src = &src[read..];
            if let CoderResult::InputEmpty = result {
                return text;
            }
        }
    }
}

/// Answers one chat question, streaming when possible.
///
/// Any stream failure triggers exactly one single-shot fallback request. The
/// sink always ends with either `Final` or `Failed`.
pub async fn run_turn(
    transport: &dyn ChatTransport,
    workspace: &WorkspaceId,
    request: &ChatRequest,
    sink: &dyn AnswerSink,
) -> Result<ChatAnswer, TurnError> {
    let mut handler = AnswerHandler::new(sink);
    let stream = match StreamSession::new()
        .run(transport, workspace, request, &mut handler)
        .await
    {
        Ok(answer) => {
            op_debug!("Streamed answer complete for {}", workspace);
            sink.emit(AnswerUpdate::Final(answer.clone()));
            return Ok(answer);
        }
        Err(err) => err,
    };

    op_warn!(
        "Answer stream for {} failed: {}; retrying once without streaming",
        workspace,
        stream
    );
    match transport.ask(workspace, request).await {
        Ok(answer) => {
            op_info!("Fallback answer received for {}", workspace);
            sink.emit(AnswerUpdate::Final(answer.clone()));
            Ok(answer)
        }
        Err(fallback) => {
            op_warn!("Fallback answer for {} failed: {}", workspace, fallback);
            sink.emit(AnswerUpdate::Failed(fallback.user_message().to_string()));
            Err(TurnError { stream, fallback })
        }
    }
}

