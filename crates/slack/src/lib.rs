//! Slack surface of the Secret Santa service.
//!
//! - **Commands** (`commands`) - slash-command payloads, envelopes and routing
//! - **Messages** (`messages`) - `{response_type, text}` replies and their texts
//! - **Notifier** (`notifier`) - delivery to per-request `response_url`s
//! - **Service** (`service`) - the `/get`, `/initialize`, `/participate` and
//!   `/randomize` handlers over a participant store
//!
//! ```text
//! Slack form POST → SlashCommandPayload → CommandEnvelope → CommandRouter
//!                                                              ↓
//!                       response_url ← Notifier ← SecretSantaService → ParticipantStore
//! ```

pub mod commands;
pub mod messages;
pub mod notifier;
pub mod service;

pub use commands::{
    normalize_santa_command, CommandEnvelope, CommandReply, CommandRouter, SantaCommand,
    SantaCommandService, SlashCommandPayload,
};
pub use messages::{ResponseType, SlackMessage};
pub use notifier::{NotificationError, Notifier, RecordingNotifier, ResponseUrlNotifier};
pub use service::SecretSantaService;
