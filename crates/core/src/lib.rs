/// Declares a fieldless enum with a fixed wire string per variant, plus
/// `as_str`/`parse`, `Display` and string-based serde impls.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($variant:ident => $wire:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $wire),+
                }
            }

            pub fn parse(s: &str) -> Result<Self, $crate::CoreError> {
                match s {
                    $($wire => Ok(Self::$variant),)+
                    _ => Err($crate::CoreError::UnknownVariant {
                        kind: stringify!($name),
                        value: s.to_string(),
                    }),
                }
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ::serde::Serialize for $name {
            fn serialize<S: ::serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> ::serde::Deserialize<'de> for $name {
            fn deserialize<D: ::serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                Self::parse(&raw).map_err(::serde::de::Error::custom)
            }
        }
    };
}

pub mod actor;
pub mod clock;
pub mod error;
pub mod events;
pub mod fingerprint;
pub mod ids;
pub mod model;
pub mod patch;

pub use actor::{Actor, Role};
pub use clock::{MonotonicClock, Timestamp};
pub use error::CoreError;
pub use events::*;
pub use fingerprint::{fingerprint, ReplicaFingerprint};
pub use ids::*;
pub use model::*;
pub use patch::{DealChanges, DealPatch, LenderChanges, LenderPatch};
