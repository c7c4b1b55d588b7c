pub mod cache;
pub mod config;
pub mod connectors;
pub mod controller;
pub mod diagnostics;
pub mod docs;
pub mod events;
pub mod mcp;
pub mod replay;
pub mod runs;
pub mod traces;
pub mod version;
pub mod workspace;

pub use cache::CacheCommand;
pub use config::ConfigCommand;
pub use connectors::ConnectorsCommand;
pub use controller::ControllerCommand;
pub use diagnostics::{DoctorCommand, PingCommand, ProvidersCommand};
pub use docs::DocsCommand;
pub use events::EventsCommand;
pub use mcp::McpCommand;
pub use replay::RunCommand;
pub use runs::RunsCommand;
pub use traces::TracesCommand;
pub use version::VersionCommand;
pub use workspace::WorkspaceCommand;
