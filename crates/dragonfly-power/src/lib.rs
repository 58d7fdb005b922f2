//! Dragonfly Power Control
//!
//! The concurrent engine behind the `redfishpower` shell. It fans power
//! commands out to many BMCs at once, confirms on/off transitions by
//! polling each BMC's status path, and reports one line per host.
//!
//! # Components
//!
//! - **session**: operator settings and the host registry
//! - **hostlist**: hostlist expressions (`node[1-4,8]`)
//! - **operation**: operations, retry chains and their lifecycle
//! - **retry**: completion handlers and the confirmation state machine
//! - **delayed**: confirmation polls waiting for their fire time
//! - **dispatch**: shell command parsing and fan-out
//! - **shell**: the single-threaded event loop
//!
//! # Example
//!
//! ```
//! use dragonfly_power::{dispatch, Command, HostRegistry, Lifecycle, OpKind, Reply, Session};
//! use tokio::time::Instant;
//!
//! let hosts = HostRegistry::from_hostlist("node[1-2]").unwrap();
//! let mut session = Session::new(hosts).with_stat_path("redfish/v1/Systems/1");
//! let mut lifecycle = Lifecycle::new();
//!
//! let now = Instant::now();
//! let reply = dispatch(Command::parse("stat"), &mut session, &mut lifecycle, now).unwrap();
//! match reply {
//!     Reply::Submit(ops) => {
//!         assert_eq!(ops.len(), 2);
//!         assert_eq!(ops[0].kind(), OpKind::Stat);
//!     }
//!     other => panic!("unexpected reply {:?}", other),
//! }
//! ```

pub mod delayed;
pub mod dispatch;
pub mod error;
pub mod hostlist;
pub mod operation;
pub mod retry;
pub mod session;
pub mod shell;

pub use delayed::DelayedQueue;
pub use dispatch::{dispatch, Command, Reply, HELP};
pub use error::{PowerError, Result};
pub use hostlist::{expand, HostRegistry};
pub use operation::{Chain, Lifecycle, OpKind, Operation};
pub use retry::{on_complete, PowerResult, Resolution, Transition};
pub use session::{
    ActionPath, Session, DEFAULT_COMMAND_TIMEOUT, DEFAULT_POLL_DELAY, INCREMENTAL_WAIT,
};
pub use shell::{Shell, PROMPT};
