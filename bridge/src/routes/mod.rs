pub mod health;
pub mod link;
pub mod mcp;
pub mod resources;
pub mod sse;
pub mod tools;
