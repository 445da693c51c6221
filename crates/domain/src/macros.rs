//! Macro for implementing Display and FromStr for status enums
//!
//! Domain enums are stored as lowercase strings in SQLite and appear in log
//! fields. This macro gives them one consistent textual form.
//!
//! # Example
//!
//! ```rust
//! use calsync_domain::impl_status_conversions;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//! pub enum Color {
//!     Red,
//!     Blue,
//! }
//!
//! impl_status_conversions!(Color {
//!     Red => "red",
//!     Blue => "blue",
//! });
//!
//! assert_eq!(Color::Red.to_string(), "red");
//! assert_eq!("BLUE".parse::<Color>().unwrap(), Color::Blue);
//! ```

/// Implements Display and FromStr traits for status enums
///
/// This macro generates:
/// - Display trait: converts enum variants to their storage string
/// - FromStr trait: parses case-insensitive strings to enum variants
#[macro_export]
macro_rules! impl_status_conversions {
    ($enum_name:ident { $($variant:ident => $str:literal),+ $(,)? }) => {
        impl std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(Self::$variant => f.write_str($str),)+
                }
            }
        }

        impl std::str::FromStr for $enum_name {
            type Err = String;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s.to_lowercase().as_str() {
                    $($str => Ok(Self::$variant),)+
                    _ => Err(format!("Invalid {}: {}", stringify!($enum_name), s)),
                }
            }
        }
    };
}
