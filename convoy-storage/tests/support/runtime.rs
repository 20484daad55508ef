//! Glue for running async store code inside proptest cases.

use std::fmt::Display;

use proptest::test_runner::TestCaseError;

pub fn runtime() -> Result<tokio::runtime::Runtime, TestCaseError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))
}

/// Map any error into a failed test case, keeping `context` in the message.
pub fn fail<E: Display>(context: &'static str) -> impl FnOnce(E) -> TestCaseError {
    move |e| TestCaseError::fail(format!("{context}: {e}"))
}
