//! Dragonfly BMC Control
//!
//! This crate provides the wire layer for Redfish power management of
//! BMCs (Baseboard Management Controllers).
//!
//! # Components
//!
//! - **types**: power states, request descriptions, transport configuration
//! - **redfish**: interpretation of `ComputerSystem` status bodies
//! - **transport**: the submit / wait / harvest capability the power engine
//!   drives
//! - **http**: a reqwest implementation of that capability
//!
//! # Example
//!
//! ```
//! use dragonfly_bmc::{interpret, PowerState, PowerRequest, Method};
//!
//! let request = PowerRequest::get("bmc1.example.com", "/redfish/v1/Systems/1");
//! assert_eq!(request.method, Method::Get);
//! assert_eq!(request.url, "https://bmc1.example.com/redfish/v1/Systems/1");
//!
//! assert_eq!(interpret(br#"{"PowerState":"On"}"#), Ok(PowerState::On));
//! ```

pub mod error;
pub mod http;
pub mod redfish;
pub mod transport;
pub mod types;

pub use error::{BmcError, Result};
pub use http::HttpTransport;
pub use redfish::{interpret, InterpretError, POWER_STATE_FIELD};
pub use transport::{Transport, TransportEvent};
pub use types::{
    redfish_url, Credentials, ExtraHeader, Method, PowerRequest, PowerState, RequestId,
    TransportConfig, DEFAULT_MESSAGE_TIMEOUT,
};
