//! MCP client: JSON-RPC protocol types, transports (stdio subprocess and
//! streamable HTTP), and the connection handshake used by the skill
//! registry.

pub mod connection;
pub mod protocol;
pub mod transport;

pub use connection::{McpConnection, McpError};
pub use protocol::{McpToolDef, ToolCallResult};
pub use transport::{HttpTransport, McpTransport, StdioTransport, TransportError};
