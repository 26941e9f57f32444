//! Opwatch engine: HTTP transports, answer streaming with fallback, run
//! pollers and the session loop that executes controller effects.
mod http;
mod persist;
mod poller;
mod session;
mod settings;
mod stream;
mod transport;
mod types;

pub use http::Endpoints;
pub use persist::{
    ensure_output_dir, load_snapshot, save_snapshot, AtomicFileWriter, PersistError,
};
pub use poller::{PollExit, Poller};
pub use session::{ChannelEventSink, EventSink, SessionHandle};
pub use settings::{ClientSettings, SettingsError};
pub use stream::{
    run_turn, AnswerHandler, AnswerSink, ChannelAnswerSink, Dispatch, StreamHandler, StreamSession,
};
pub use transport::{ByteStream, ChatTransport, HttpBackend, JobTransport};
pub use types::{
    AnswerUpdate, ChatAnswer, ChatMessage, ChatRequest, StreamError, TransportError, TurnError,
};
