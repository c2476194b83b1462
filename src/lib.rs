//! `mixdesc` — a mix-network node's server descriptor/directory
//! parser-and-signer, and its durable delivery queue with Cottrell/binomial
//! timed-pool mixing.
//!
//! The crate is organized leaves-first, matching the system overview:
//! [`canon`] and [`digest`] provide the canonical text form and the
//! digest-and-sign engine; [`config`] is the generic section tokenizer;
//! [`descriptor`] and [`directory`] build the typed, validated models on
//! top of those; [`queue`] is the directory-backed message store, with its
//! [`queue::delivery`] and [`queue::mixpool`] submodules layering retry
//! scheduling and mix-pool batch selection on top of the same core.

pub mod canon;
pub mod config;
pub mod crypto;
pub mod descriptor;
pub mod digest;
pub mod directory;
pub mod error;
pub mod interval;
pub mod prng;
pub mod queue;

pub use descriptor::ServerDescriptor;
pub use directory::Directory;
pub use error::{ConfigError, CryptoError, MixError, MixFatalError};
pub use queue::delivery::DeliveryQueue;
pub use queue::mixpool::{BinomialCottrellMixPool, CottrellMixPool, CottrellParams, TimedMixPool};
pub use queue::Queue;
