//! Client-role protocol drivers.
//!
//! Each requestor plays one side of a flow against an implementation under
//! test and takes an optional [`TestId`] on every step. When the identity
//! targets the step, the outgoing message is corrupted (or the reply is
//! checked) and the step returns [`StepOutcome::Judged`]; otherwise the step
//! runs normally, validates the reply strictly and returns
//! [`StepOutcome::Continue`].

/// Unwrap a [`StepOutcome::Continue`] or return the judged outcome.
macro_rules! try_step {
    ($step:expr) => {
        match $step {
            $crate::requestor::StepOutcome::Continue(v) => v,
            $crate::requestor::StepOutcome::Judged(outcome) => return Ok(outcome),
        }
    };
}

pub mod to0;
pub mod to1;
pub mod to2;

pub use to0::To0Requestor;
pub use to1::To1Requestor;
pub use to2::{To2Config, To2Requestor};

use crate::error::ConformanceResult;
use crate::matcher::{TestOutcome, check_expected_error};
use crate::registry::TestId;
use fdo_protocol::Cmd;
use fdo_protocol::transport::FdoClient;

/// Result of one requestor step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome<T> {
    /// The exchange succeeded; carries the decoded reply.
    Continue(T),
    /// The identity under test was decided by this step.
    Judged(TestOutcome),
}

impl<T> StepOutcome<T> {
    /// The reply, or `None` once the identity has been judged.
    pub fn into_continue(self) -> Option<T> {
        match self {
            Self::Continue(v) => Some(v),
            Self::Judged(_) => None,
        }
    }

    #[must_use]
    pub const fn is_judged(&self) -> bool {
        matches!(self, Self::Judged(_))
    }
}

/// `test` if it acts on the exchange opened by `request`.
pub(crate) fn fault_for(test: Option<TestId>, request: Cmd) -> Option<TestId> {
    test.filter(|id| id.cmd() == request || Some(id.cmd()) == request.reply())
}

/// A negative identity for `request`, if `test` is one.
pub(crate) fn negative_for(test: Option<TestId>, request: Cmd) -> Option<TestId> {
    fault_for(test, request).filter(|id| id.is_negative())
}

/// Whether a positive `test` is satisfied once the `request` exchange succeeds.
pub(crate) fn passes_at(test: Option<TestId>, request: Cmd) -> bool {
    test.is_some_and(|id| !id.is_negative() && fault_for(Some(id), request).is_some())
}

/// Post a corrupted message and judge the reply against `id`.
pub(crate) async fn send_faulted<T>(
    client: &FdoClient,
    id: TestId,
    cmd: Cmd,
    body: Vec<u8>,
    token: Option<&str>,
) -> ConformanceResult<StepOutcome<T>> {
    tracing::debug!(test_id = %id, cmd = %cmd, len = body.len(), "sending faulted message");
    let response = client.send(cmd, body, token).await?;
    Ok(StepOutcome::Judged(check_expected_error(id, &response)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn faults_match_request_or_reply() {
        assert_eq!(
            fault_for(Some(TestId::Rvt21CheckResp), Cmd::To0Hello),
            Some(TestId::Rvt21CheckResp)
        );
        assert_eq!(
            fault_for(Some(TestId::Devt33Positive), Cmd::To1ProveToRv),
            Some(TestId::Devt33Positive)
        );
        assert_eq!(fault_for(Some(TestId::Dot64BadSignature), Cmd::To2HelloDevice), None);
        assert_eq!(fault_for(None, Cmd::To2HelloDevice), None);
    }

    #[test]
    fn positives_and_checks_are_not_negative() {
        assert_eq!(negative_for(Some(TestId::Dot60Positive), Cmd::To2HelloDevice), None);
        assert!(passes_at(Some(TestId::Dot60Positive), Cmd::To2HelloDevice));
        assert!(!passes_at(Some(TestId::Dot60BadEncoding), Cmd::To2HelloDevice));
        assert_eq!(negative_for(Some(TestId::Rvt23CheckResp), Cmd::To0OwnerSign), None);
        assert_eq!(
            negative_for(Some(TestId::VoucherBadHdrHmac), Cmd::To0OwnerSign),
            Some(TestId::VoucherBadHdrHmac)
        );
    }
}
