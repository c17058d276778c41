//! Platform capabilities
//!
//! HTTP, durable key-value storage and the OAuth identity provider are
//! injected behind these traits.

pub mod http;
pub mod identity;
pub mod storage;

pub use http::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
pub use identity::{ClientSettings, IdentityProvider, Prompt, TokenResponse};
pub use storage::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore};
