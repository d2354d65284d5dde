pub mod message;
pub mod role;
pub mod schema;
pub mod tool;

pub use message::{Message, MessageContent, ToolRequest, ToolResponse};
pub use role::Role;
pub use schema::OutputSchema;
pub use tool::{Tool, ToolCall};
