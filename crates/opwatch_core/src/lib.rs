//! Opwatch core: frame decoding, job handles, the workspace registry and the
//! pure session state machine. No IO happens in this crate.
mod effect;
mod frame;
mod job;
mod message;
mod msg;
mod registry;
mod state;
mod update;
mod view_model;
mod workspace;

pub use effect::{Effect, SessionEvent};
pub use frame::{EventKind, FrameDecoder, ProtocolEvent};
pub use job::{JobHandle, JobKind, JobStatus, RunId, RunSnapshot, Transition};
pub use message::{extract_message, message_from_value};
pub use msg::Msg;
pub use registry::{PollTicket, Registry, RegistrySnapshot, WorkspaceSnapshot};
pub use state::SessionState;
pub use update::update;
pub use view_model::{JobRowView, SessionView};
pub use workspace::{ReadModel, WorkspaceId, WorkspaceState};
