//! Shared validation helpers for config and request checks.

use crate::types::{Error, Result};

/// Validate that a string is not empty.
pub fn validate_non_empty(s: &str, field: &str) -> Result<()> {
    if s.trim().is_empty() {
        return Err(Error::validation(format!("{} cannot be empty", field)));
    }
    Ok(())
}

/// Validate that a value is positive.
pub fn validate_positive(n: i32, field: &str) -> Result<()> {
    if n <= 0 {
        return Err(Error::validation(format!("{} must be positive", field)));
    }
    Ok(())
}

/// Validate that a value is zero or positive.
pub fn validate_non_negative(n: i32, field: &str) -> Result<()> {
    if n < 0 {
        return Err(Error::validation(format!("{} must not be negative", field)));
    }
    Ok(())
}

/// Return the first value that appears more than once.
pub fn first_duplicate<'a, I>(items: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = std::collections::HashSet::new();
    items.into_iter().find(|item| !seen.insert(*item))
}
