//! Macros for defining typed identifier types.

/// Macro to define a typed identifier backed by an opaque string.
///
/// Unlike identifiers minted by this system, these values are assigned by an
/// external authority (the job manager, the cloud provider) and carry no
/// internal structure we can rely on. The generated newtype provides:
/// - `parse()` with strict validation (non-empty, printable, no whitespace)
/// - `Display` and `FromStr` implementations
/// - `Serialize` and `Deserialize` implementations
/// - `Ord`, `Hash`, and other standard traits
///
/// # Example
///
/// ```ignore
/// define_opaque_id!(JobId);
///
/// let job_id: JobId = "8e9f0c1a-7a54-4a2f-9a11-2f4e7c2a9b01".parse()?;
/// ```
#[macro_export]
macro_rules! define_opaque_id {
    ($name:ident) => {
        /// A typed identifier for this resource kind.
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(String);

        impl $name {
            /// Parses an identifier from a string.
            ///
            /// The string must be non-empty and must not contain whitespace
            /// or control characters.
            pub fn parse(s: &str) -> Result<Self, $crate::IdError> {
                if s.is_empty() {
                    return Err($crate::IdError::Empty);
                }

                if let Some(position) = s
                    .char_indices()
                    .find(|(_, c)| c.is_whitespace() || c.is_control())
                    .map(|(i, _)| i)
                {
                    return Err($crate::IdError::InvalidCharacter { position });
                }

                Ok(Self(s.to_string()))
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Self::parse(&s).map_err(serde::de::Error::custom)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}
