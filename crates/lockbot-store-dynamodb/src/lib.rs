//! DynamoDB implementation of [`lockbot_core::store::KvBackend`].
//!
//! Each logical table maps to one DynamoDB table with a single string hash
//! key. Conditional writes are expressed as `ConditionExpression`s so the
//! check and the write happen in one request.

mod backend;
mod convert;

pub use backend::{DynamoBackend, DynamoConfig, KEY_ATTRIBUTE};
