//! Transport-free core of the STAS connector bridge: the plan model, the
//! plan validator and the structured error body shared by every endpoint.

pub mod athlete;
pub mod error;
pub mod etag;
pub mod external_id;
pub mod link_code;
pub mod plan;
pub mod schema;
pub mod validate;
