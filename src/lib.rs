#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(rust_2018_idioms)]
#![warn(missing_debug_implementations)]
#![deny(unused_must_use)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod action;
pub mod agas;
pub mod client;
pub mod codec;
pub mod component;
pub mod config;
pub mod distribution;
pub mod error;
pub mod id;
pub mod runtime;
pub mod transport;

pub use action::Action;
pub use client::Client;
pub use codec::{Codec, MsgPack};
pub use component::Component;
pub use config::RuntimeConfig;
pub use distribution::DistributionPolicy;
pub use error::{RegistrationError, RuntimeError};
pub use id::{ActionId, ComponentTypeId, GlobalId, LocalHandle, LocalityId};
pub use runtime::{Invocation, Runtime, RuntimeBuilder};
pub use transport::Transport;
