pub mod naming;
pub mod orchestrator;

pub use orchestrator::{
    ChatEvent, ChatEventStream, ChatReply, ChatStream, ChatTurn, ConversationOrchestrator,
};
