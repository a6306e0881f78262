pub mod clients;
pub mod error;
pub mod manifest;
pub mod session;
pub mod transport;
pub mod types;

pub use clients::{ChatClient, FilesystemClient, PackClient, SourceControlClient};
pub use error::{McpError, Result};
pub use manifest::{ServerManifest, ServerSpec};
pub use session::McpSession;
pub use transport::{StdioTransport, ToolBackend};
pub use types::{ForkInfo, GrepMatch, GrepResult, PackResult, PullRequestInfo, RepositoryInfo, ToolInfo};
