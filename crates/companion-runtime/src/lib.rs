//! Runtime (C9-C12): the per-user serializer, the chat pipeline, the
//! proactive scorer, and the reflection worker — the four pieces the
//! scheduler and the chat endpoint drive. Every other crate in this
//! workspace is a passive component this one composes.

pub mod chat;
pub mod interaction;
pub mod proactive;
pub mod reflection;
pub mod serializer;

pub use chat::{ChatInput, ChatOutput, ChatPipeline};
pub use interaction::InteractionRecord;
pub use proactive::{ProactiveOutput, ProactiveScorer, TriggerKind};
pub use reflection::ReflectionWorker;
pub use serializer::{SerializerHandle, UserSerializer};
