//! Conversation runtime for maimai.
//!
//! A message that passes the wake window is classified into a
//! [`requests::RequestKind`]. Chat requests take a per-user run lock and an
//! admission slot, then either short-circuit through the deterministic
//! [`fast_path`] or run the five-stage [`pipeline`]:
//!
//! 1. **Emotion** - label the user's mood
//! 2. **Thinking** - draft a deliberation and conclusion
//! 3. **Retrieval** - remembered facts plus background notes
//! 4. **Persona** - the user's persona instruction
//! 5. **Generation** - the reply itself
//!
//! Every stage has a degraded default, so a dispatch always produces a reply.
//! All model access goes through [`llm::InferenceGateway`].

pub mod adaptation;
pub mod fast_path;
pub mod llm;
pub mod pipeline;
pub mod requests;
pub mod runtime;
pub mod stages;

#[cfg(test)]
pub(crate) mod testing;

pub use adaptation::StyleAdapter;
pub use fast_path::FastPathResponder;
pub use llm::{GatewayError, GatewaySet, InferenceGateway, OpenAiCompatGateway};
pub use pipeline::{Pipeline, PipelineOutcome};
pub use requests::{Command, RequestKind};
pub use runtime::{ConversationRuntime, RuntimeParts};
pub use stages::{Stage, StageError};
