//! Cloud Provider Network API Client
//!
//! A Rust client for the provider's network API: floating public addresses,
//! network interfaces, instances and security groups.
//!
//! # Example
//!
//! ```no_run
//! use cloud_client::{AllocateAddressRequest, CloudClient, CloudClientTrait};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = CloudClient::new(
//!     "http://cloud-api.cloudops:80".to_string(),
//!     "your-api-token".to_string(),
//! )?;
//!
//! let address = client
//!     .allocate_address(AllocateAddressRequest {
//!         public_ipv4_pool: Some("pool-edge".to_string()),
//!         ..Default::default()
//!     })
//!     .await?;
//!
//! let interfaces = client
//!     .query_network_interfaces(&[("private-ip-address", "10.0.1.17")])
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **test-util**: `MockCloudClient`, an in-memory provider with a call log

pub mod client;
pub mod common;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod cloud_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::CloudClient;
pub use common::HttpClient;
pub use error::CloudError;
pub use models::*;
pub use cloud_trait::CloudClientTrait;
#[cfg(feature = "test-util")]
pub use mock::{Call, MockCloudClient};
