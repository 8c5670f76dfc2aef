use core::fmt;

/// Errors raised by [`crate::CollisionCacheBuilder`] validation.
///
/// Every other fallible outcome in this crate (a missing key, a loader that
/// declines to produce a value) is represented as `None`/`false`, not as an
/// `Error`: those are expected, common outcomes of a cache lookup, not
/// misconfiguration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A builder parameter was out of range or missing a required companion
    /// setter. The payload names the offending parameter.
    InvalidArgument(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument(what) => write!(f, "invalid argument: {what}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Convenience alias used throughout the builder.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_offending_argument() {
        use alloc::format;
        let err = Error::InvalidArgument("bucket_size");
        assert_eq!(format!("{err}"), "invalid argument: bucket_size");
    }

    #[test]
    fn is_copy_and_comparable() {
        let a = Error::InvalidArgument("capacity");
        let b = a;
        assert_eq!(a, b);
    }
}
