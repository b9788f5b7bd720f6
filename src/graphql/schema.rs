use async_graphql::{EmptySubscription, Schema};

use super::mutations::MutationRoot;
use super::queries::QueryRoot;

/// GraphQL Schema type
pub type ForumSchema = Schema<QueryRoot, MutationRoot, EmptySubscription>;

/// Build the GraphQL schema. Per-request data ([`super::RequestContext`]) is
/// attached to each request rather than to the schema.
pub fn build_schema() -> ForumSchema {
    Schema::build(QueryRoot, MutationRoot, EmptySubscription)
        .limit_depth(16)
        .finish()
}
