#![allow(clippy::type_complexity)]
#![deny(clippy::clone_on_ref_ptr)]

#[macro_use]
extern crate tracing;

mod assembler;
mod auto_flush_timer;
mod charset;
mod codec;
mod config;
mod error;
mod event;
mod identity_map;
mod internal_events;
mod line_matcher;
mod listener;
mod map_cleaner;
mod tokenizer;

pub use assembler::Assembler;
pub use codec::Codec;
pub use config::{Config, IdentityMapConfig, What};
pub use error::{CapacityExceeded, ConfigError};
pub use event::MergedEvent;
pub use identity_map::IdentityMap;
pub use listener::{EmissionContext, FnSink, Sink};

/// A boxed, thread-safe error — the type every [`Sink::process_event`]
/// reports downstream failures through (§7).
pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, Error>;
