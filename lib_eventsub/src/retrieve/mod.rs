//! # Data Retrieval Module
//!
//! HTTP collaborators for the provider's REST surface.
//!
//! ## Contained Modules:
//!
//! - **`api_client`**: a generic `ApiClient` built on `reqwest` and
//!   `reqwest-middleware`, featuring automatic retries with exponential
//!   backoff and a per-request timeout.
//! - **`helix`**: `HelixClient`, the [`SubscriptionApi`](crate::collaborators::SubscriptionApi)
//!   implementation for the Helix EventSub subscriptions endpoint.

pub mod api_client;
pub mod helix;

pub use api_client::{ApiClient, ApiResponse};
pub use helix::HelixClient;
