//! # lib_apiclient
//!
//! A configuration-driven API client. Endpoints are declared once per named
//! collection (commands, queries, requests and real-time sockets) and addressed as
//! `"collection:operation"` through an [`ApiManager`].
//!
//! ```no_run
//! use lib_apiclient::{ApiCollectionConfig, ApiManager, QueryConfig, RequestParams};
//!
//! # async fn run() -> lib_apiclient::ClientResult<()> {
//! let manager = ApiManager::new()?;
//! manager.register(
//!     ApiCollectionConfig::new("blog")
//!         .with_base_url("https://api.test")
//!         .with_query("getPost", QueryConfig::new("/posts").with_item("/posts/{_id}")),
//! )?;
//! let post = manager.query_item("blog:getPost", "42", RequestParams::new()).await?;
//! println!("{}", post.data);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod collection;
pub mod configs;
pub mod errors;
#[cfg(feature = "loggers")]
pub mod loggers;
pub mod manager;
pub mod realtime;
pub mod retrieve;

pub use collection::{ApiCollection, ApiResponse, ConfigType, RequestParams};
pub use configs::{
    ApiCollectionConfig, CommandConfig, DataHook, HeadersHook, QueryConfig, RequestConfig,
    ResponseHook, SocketConfig, TransportKind, UriHook,
};
#[cfg(feature = "config-files")]
pub use configs::loader::load_collections;
pub use errors::{ApiError, ClientError, ClientResult, ConfigurationError, ValidationError};
pub use manager::{parse_api_name, ApiManager};
pub use realtime::{handler, ConnectionState, MessageHandler, RtcConnection, Unsubscribe};
