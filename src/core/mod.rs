pub mod audio;
pub mod credentials;
pub mod events;
pub mod realtime;

// Re-export commonly used types for convenience
pub use credentials::{
    ChainedCredentialProvider, Credential, CredentialProvider, EnvCredentialProvider,
    FileCredentialProvider, PromptCredentialProvider, ProxyCredentialProvider,
    StaticCredentialProvider,
};
pub use events::{EventBridge, VoiceEvent};
pub use realtime::{
    RealtimeError, RealtimeResult, SessionCapabilities, SessionState, VoiceSession,
    WebSocketConnector,
};
