//! AMI Client - Asterisk Manager Interface plumbing
//!
//! Connects to a PBX manager port, logs in, keeps the connection alive across
//! drops, and fans events out to any number of subscribers. It knows nothing
//! about what the events mean.
//!
//! # Example
//!
//! ```no_run
//! use ami_client::{Action, AmiClient, AmiSettings};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = AmiClient::connect(AmiSettings {
//!         host: "10.0.0.5".to_string(),
//!         username: "monitor".to_string(),
//!         secret: "secret".to_string(),
//!         ..Default::default()
//!     });
//!
//!     let mut events = client.subscribe();
//!     client.wait_connected(Duration::from_secs(5)).await;
//!     client.action(Action::new("DeviceStateList")).await.unwrap();
//!
//!     while let Ok(event) = events.recv().await {
//!         println!("{:?} {:?}", event.event(), event.get("Device"));
//!     }
//! }
//! ```

mod client;
mod error;
pub mod framing;
mod message;

pub use client::{AmiClient, AmiSettings};
pub use error::AmiError;
pub use message::{Action, AmiMessage};
