//! Key management services and secure engine call gate for an isolated enclave.
//!
//! [`Kms`] implements the PKCS#11 flavoured entry point of the key management services. It owns
//! the lock latches, the session table and the local object store, and delegates to an optional
//! [`ExternalToken`](ext_token::ExternalToken) for objects living outside the enclave.
//!
//! [`CallGate`] is the single entry point crossing the isolation boundary. It validates the
//! caller, serves the secure engine services (firmware image handling among them) and forwards
//! KMS requests to the dispatcher.

#![no_std]

#[cfg(test)]
extern crate std;

#[macro_use]
extern crate delog;
generate_macros!();

pub mod callgate;
pub mod config;
pub mod crypto;
pub mod dispatcher;
pub mod ext_token;
pub mod fwimg;
pub mod locks;
pub mod objects;
pub mod session;
pub mod store;

#[cfg(test)]
mod testing;

pub use secure_engine_kms_interface as interface;

pub use callgate::{CallGate, EngineServices, Platform, ServiceArgs, Status};
pub use config::{KmsConfig, MemoryMap, Region};
pub use dispatcher::{Kms, KmsEntry, Request};
pub use fwimg::{FirmwareImages, Flash, ImageLayout};
