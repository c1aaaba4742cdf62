//! # Collection Module
//!
//! The per-named-API façade and the types every verb shares.
//!
//! ## Contained Modules:
//!
//! - **`api_collection`**: [`ApiCollection`], the dispatch pipeline for HTTP verbs and
//!   the owner of a collection's real-time connections.
//! - **`dynamic`**: resolved operation tables and convention-based synthesis.
//! - **`params`**: per-call [`RequestParams`].
//! - **`response`**: the [`ApiResponse`] contract.

#![forbid(unsafe_code)]

pub mod api_collection;
pub mod dynamic;
pub mod params;
pub mod response;

pub use api_collection::ApiCollection;
pub use dynamic::{ConfigType, OperationTable, Synthesize};
pub use params::RequestParams;
pub use response::ApiResponse;
