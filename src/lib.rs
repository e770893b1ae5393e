//! # cdgate
//!
//! Gateway that tunnels IP traffic over a constrained, low-bandwidth field
//! bus using the compact CDNET protocol, so commodity IP tools can talk to
//! microcontroller-class bus nodes that cannot afford a full TCP/IP stack.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Host IP Stack (kernel)                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │                     TUN Device (cdgate0)                    │
//! │               [IP packets read/written here]                │
//! ├─────────────────────────────────────────────────────────────┤
//! │                        Gateway Loop                         │
//! │  ┌──────────────┐ ┌───────────────┐ ┌────────────────────┐  │
//! │  │   Address    │─│ Fragmentation │─│  L0 Transaction    │  │
//! │  │  Translator  │ │ / Reassembly  │ │    Scheduler       │  │
//! │  └──────────────┘ └───────────────┘ └────────────────────┘  │
//! │              Frame / Packet Pools (fixed capacity)          │
//! ├─────────────────────────────────────────────────────────────┤
//! │              Bus Transport (chardev / loopback)             │
//! ├─────────────────────────────────────────────────────────────┤
//! │         Multi-drop field bus, single-byte node macs         │
//! └─────────────────────────────────────────────────────────────┘
//! ```

#![warn(clippy::all, clippy::pedantic)]
// Allow stylistic lints that don't affect correctness
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_possible_truncation)] // Lengths are bounded by frame size
#![allow(clippy::doc_markdown)]
#![allow(clippy::match_same_arms)]

pub mod config;
pub mod error;
pub mod frag;
pub mod gateway;
pub mod pool;
pub mod protocol;
pub mod scheduler;
pub mod translate;
pub mod transport;
pub mod tun;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
