//! Backing source dispatch macro.
//!
//! Both vendor data sources expose the same method names, so most operations on
//! [`BackingSource`](crate::db::data_source::BackingSource) forward one expression
//! to whichever variant is present.

/// Macro for forwarding an expression to every `BackingSource` variant.
///
/// # Example
///
/// ```ignore
/// impl_source_dispatch!(self, source => source.login_timeout())
/// ```
#[macro_export]
macro_rules! impl_source_dispatch {
    ($source:expr, $s:ident => $body:expr) => {
        match $source {
            $crate::db::data_source::BackingSource::Postgres($s) => $body,
            $crate::db::data_source::BackingSource::MariaDb($s) => $body,
        }
    };
}

pub use impl_source_dispatch;
