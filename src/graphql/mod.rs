// Gateway module for graphql - follows the Train Station Pattern
// All external access must go through this gateway

mod documents;
mod response;

pub use documents::{
    parse_document, DocumentResolver, GraphQlDocument, Operation, OperationKind,
    OperationRegistry,
};
pub use response::{extension_status, GraphQlEnvelope};
