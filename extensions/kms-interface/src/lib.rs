//! Identifiers, status words and records exchanged with the secure engine.
//!
//! Everything in this crate crosses the isolation boundary, either as a KMS function identifier
//! handed to the dispatcher or as a secure engine service identifier handed to the call gate.

#![no_std]

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FromReprError;

impl fmt::Display for FromReprError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("unknown value")
    }
}

macro_rules! enum_number {
    (
        #[repr($repr:tt)]
        $(#[$outer:meta])*
        $vis:vis enum $name:ident {
            $($(#[doc = $doc:literal])* $var:ident = $num:expr),+
            $(,)*
        }
    ) => {
        $(#[$outer])*
        #[repr($repr)]
        $vis enum $name {
            $(
                $(#[doc = $doc])*
                $var = $num,
            )*
        }

        impl TryFrom<$repr> for $name {
            type Error = $crate::FromReprError;
            fn try_from(val: $repr) -> ::core::result::Result<Self, $crate::FromReprError> {
                match val {
                    $(
                        $num => Ok($name::$var),
                    )*
                    _ => Err($crate::FromReprError)
                }
            }
        }

        impl From<$name> for $repr {
            fn from(value: $name) -> $repr {
                match value {
                    $(
                        $name::$var => $num,
                    )*
                }
            }
        }

        impl $name {
            #[allow(unused)]
            pub const fn all() -> &'static [$name] {
                &[
                    $(
                        $name::$var
                    ),*
                ]
            }
        }
    }
}

mod engine;
mod function;
mod info;
mod pkcs11;
mod rv;

pub use engine::{
    is_kms_service, FwState, FwType, SeResult, SeStatus, ServiceId, KMS_ADDON, SE_ADDON_MASK,
    VALID_ALL_SLOTS,
};
pub use function::{Cluster, FunctionId, CLUSTER_MASK, FIRST_ID, LAST_ID};
pub use info::{
    blank_padded, ActiveFwInfo, Info, MechanismInfo, SessionInfo, SlotInfo, TokenInfo, Version,
};
pub use pkcs11::{
    attribute, class, key_type, mechanism, MechanismFlags, SessionFlags, SlotFlags, TokenFlags,
    AttributeType, MechanismType, ObjectHandle, SessionHandle, SlotId,
};
pub use rv::Rv;
