//! Pass/fail decisions for a single test identity.

use crate::registry::{FaultCategory, TestId};
use fdo_protocol::transport::FdoResponse;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Recorded result of one test identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TestOutcome {
    #[must_use]
    pub const fn pass() -> Self {
        Self {
            passed: true,
            error: None,
        }
    }

    #[must_use]
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            passed: false,
            error: Some(error.into()),
        }
    }
}

/// Judge the IUT's reply to a faulted message.
///
/// A negative identity passes when the IUT answered with a non-200 status and
/// an FDO error body. The code is compared with [`TestId::expected_error`],
/// and a mismatch only warns.
#[must_use]
pub fn check_expected_error(id: TestId, response: &FdoResponse) -> TestOutcome {
    if response.is_success() {
        return TestOutcome::fail(format!(
            "{id}: expected an error reply, IUT answered {} with message {:?}",
            response.status, response.msg_type
        ));
    }
    if response.status == 200 {
        return TestOutcome::fail(format!(
            "{id}: error message returned with HTTP 200"
        ));
    }
    let Some(message) = response.error_message() else {
        return TestOutcome::fail(format!(
            "{id}: HTTP {} without a decodable FDO error message",
            response.status
        ));
    };
    match id.expected_error() {
        Some(expected) if message.code != expected.code() => {
            warn!(
                test_id = %id,
                expected = %expected,
                received = message.code,
                "IUT rejected the message with a different error code"
            );
        }
        _ => debug!(test_id = %id, code = message.code, "expected error received"),
    }
    TestOutcome::pass()
}

/// Judge a `CHECK_RESP` identity from whether the reply decoded.
#[must_use]
pub fn check_response<T, E: std::fmt::Display>(id: TestId, decoded: &Result<T, E>) -> TestOutcome {
    debug_assert_eq!(id.category(), FaultCategory::CheckResponse);
    match decoded {
        Ok(_) => TestOutcome::pass(),
        Err(e) => TestOutcome::fail(format!("{id}: {e}")),
    }
}
