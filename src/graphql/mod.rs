pub mod context;
pub mod mutations;
pub mod queries;
pub mod schema;
pub mod types;
pub mod validate;

pub use context::{RequestContext, SessionChange, SessionState};
pub use schema::{build_schema, ForumSchema};
