//! Core types for switchyard.
//!
//! This crate provides the pieces of the request pipeline that carry no
//! concurrency or failure-recovery logic, shared by the client crate
//! (`switchyard-client`) and anything that implements its extension traits.
//!
//! ## Contents
//!
//! - [`ErrorKind`], [`TransportError`]: error kinds and the transport error type
//! - [`Encoder`], [`Decoder`]: parameter encoders and response decoders
//! - [`merge_parameters`]: recursive merge of common and per-request parameters

mod codec;
mod error;
mod merge;

pub use codec::*;
pub use error::*;
pub use merge::*;
