pub mod api_types;
pub mod factory;
pub mod gateway;
pub mod providers;
pub mod retry;

pub use api_types::{
    Capabilities, LlmRequest, LlmResponse, Message, Role, ToolCallRequest, ToolDef,
};
pub use factory::{build_client, Provider};
pub use gateway::{LlmClient, LlmError};
