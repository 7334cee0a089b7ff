//! Checksum validation policies.
//!
//! Transfers feed each available checksum through the active policy; the
//! policy decides whether a mismatch aborts the transfer, is logged, or is
//! ignored. Checksums from best-effort side channels are marked unofficial
//! and never abort on their own.

use std::cmp::Ordering;

use depot_core::repository::{
    CHECKSUM_POLICY_FAIL, CHECKSUM_POLICY_IGNORE, CHECKSUM_POLICY_WARN,
};
use depot_util::errors::{DepotError, DepotResult};

/// Bit flag marking a checksum obtained from an unofficial side channel.
pub const KIND_UNOFFICIAL: u32 = 1;

/// The three policy strengths, ordered leniency-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChecksumPolicyKind {
    Ignore,
    Warn,
    Fail,
}

impl ChecksumPolicyKind {
    /// Parse a policy string; unknown strings fall back to the default with
    /// a warning, an empty string is simply the default.
    pub fn parse(policy: &str) -> Self {
        match policy {
            CHECKSUM_POLICY_IGNORE => ChecksumPolicyKind::Ignore,
            CHECKSUM_POLICY_WARN | "" => ChecksumPolicyKind::Warn,
            CHECKSUM_POLICY_FAIL => ChecksumPolicyKind::Fail,
            other => {
                tracing::warn!("unknown checksum policy {other:?}, using {CHECKSUM_POLICY_WARN:?}");
                ChecksumPolicyKind::Warn
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumPolicyKind::Ignore => CHECKSUM_POLICY_IGNORE,
            ChecksumPolicyKind::Warn => CHECKSUM_POLICY_WARN,
            ChecksumPolicyKind::Fail => CHECKSUM_POLICY_FAIL,
        }
    }
}

/// The stricter of two policies: FAIL > WARN > IGNORE.
pub fn stricter(a: ChecksumPolicyKind, b: ChecksumPolicyKind) -> ChecksumPolicyKind {
    match a.cmp(&b) {
        Ordering::Less => b,
        _ => a,
    }
}

/// The stricter of two policy strings.
pub fn stricter_policy_str(a: &str, b: &str) -> String {
    stricter(ChecksumPolicyKind::parse(a), ChecksumPolicyKind::parse(b))
        .as_str()
        .to_string()
}

/// Callbacks a transfer drives while validating checksums.
pub trait ChecksumPolicy {
    /// A checksum matched the computed digest.
    fn on_checksum_match(&mut self, algorithm: &str, kind: u32);

    /// A checksum did not match. An `Err` return aborts the transfer.
    fn on_checksum_mismatch(
        &mut self,
        algorithm: &str,
        kind: u32,
        error: DepotError,
    ) -> DepotResult<()>;

    /// A checksum could not be retrieved or computed.
    fn on_checksum_error(&mut self, algorithm: &str, kind: u32, error: &DepotError);

    /// All checksum sources are exhausted without a verdict. An `Err`
    /// return aborts the transfer.
    fn on_no_more_checksums(&mut self) -> DepotResult<()>;

    /// The transfer is being retried from scratch; drop collected state.
    fn on_transfer_retry(&mut self);

    /// The transfer failed checksum validation; decide whether the
    /// destination should be discarded or kept anyway.
    fn on_transfer_checksum_failure(&self, error: &DepotError) -> bool;
}

/// Obtain the policy object for a kind; `Ignore` performs no validation.
pub fn new_checksum_policy(
    kind: ChecksumPolicyKind,
    resource: &str,
) -> Option<Box<dyn ChecksumPolicy>> {
    match kind {
        ChecksumPolicyKind::Ignore => None,
        ChecksumPolicyKind::Warn => Some(Box::new(WarnChecksumPolicy {
            resource: resource.to_string(),
        })),
        ChecksumPolicyKind::Fail => Some(Box::new(FailChecksumPolicy {
            resource: resource.to_string(),
            unofficial_failure: None,
        })),
    }
}

struct WarnChecksumPolicy {
    resource: String,
}

impl ChecksumPolicy for WarnChecksumPolicy {
    fn on_checksum_match(&mut self, algorithm: &str, _kind: u32) {
        tracing::debug!("{algorithm} ok for {}", self.resource);
    }

    fn on_checksum_mismatch(
        &mut self,
        algorithm: &str,
        _kind: u32,
        error: DepotError,
    ) -> DepotResult<()> {
        tracing::warn!("{algorithm} mismatch for {}: {error}", self.resource);
        Ok(())
    }

    fn on_checksum_error(&mut self, algorithm: &str, _kind: u32, error: &DepotError) {
        tracing::debug!("could not validate {algorithm} for {}: {error}", self.resource);
    }

    fn on_no_more_checksums(&mut self) -> DepotResult<()> {
        tracing::warn!("no checksums available for {}", self.resource);
        Ok(())
    }

    fn on_transfer_retry(&mut self) {}

    fn on_transfer_checksum_failure(&self, _error: &DepotError) -> bool {
        false
    }
}

struct FailChecksumPolicy {
    resource: String,
    unofficial_failure: Option<DepotError>,
}

impl ChecksumPolicy for FailChecksumPolicy {
    fn on_checksum_match(&mut self, _algorithm: &str, kind: u32) {
        if kind & KIND_UNOFFICIAL == 0 {
            // An official match absolves earlier unofficial failures.
            self.unofficial_failure = None;
        }
    }

    fn on_checksum_mismatch(
        &mut self,
        _algorithm: &str,
        kind: u32,
        error: DepotError,
    ) -> DepotResult<()> {
        if kind & KIND_UNOFFICIAL != 0 {
            self.unofficial_failure = Some(error);
            return Ok(());
        }
        Err(error)
    }

    fn on_checksum_error(&mut self, algorithm: &str, _kind: u32, error: &DepotError) {
        tracing::debug!("could not validate {algorithm} for {}: {error}", self.resource);
    }

    fn on_no_more_checksums(&mut self) -> DepotResult<()> {
        if let Some(error) = self.unofficial_failure.take() {
            return Err(error);
        }
        Err(DepotError::ChecksumFailure {
            file: self.resource.clone(),
            message: "checksum validation failed, no checksums available".to_string(),
        })
    }

    fn on_transfer_retry(&mut self) {
        self.unofficial_failure = None;
    }

    fn on_transfer_checksum_failure(&self, _error: &DepotError) -> bool {
        true
    }
}
