pub mod cancel;
pub mod config;
pub mod error;
pub mod observer;
pub mod session;
pub mod tools;

pub use cancel::CancelToken;
pub use config::{
    AppConfig, AppContext, Credentials, DomainDefinition, DomainsConfig, FleetConfig, RulesConfig,
    ServerSpec,
};
pub use error::{CorralError, ErrorKind};
pub use observer::{Observer, ObserverEvent};
pub use session::{ChatMessage, ChatRole, SessionContext};
pub use tools::{coerce_arguments, Tool, ToolExecutionResult, ToolHandler, ToolInputSchema};
