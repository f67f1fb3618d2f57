use serde::{Deserialize, Serialize};

/// Canonical document lifecycle state. Always derived, never copied verbatim
/// from a single provider message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InternalStatus {
    Draft,
    Pending,
    InProgress,
    Signed,
    Cancelled,
    Rejected,
    Expired,
}

impl InternalStatus {
    pub const ALL: [InternalStatus; 7] = [
        InternalStatus::Draft,
        InternalStatus::Pending,
        InternalStatus::InProgress,
        InternalStatus::Signed,
        InternalStatus::Cancelled,
        InternalStatus::Rejected,
        InternalStatus::Expired,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            InternalStatus::Signed
                | InternalStatus::Cancelled
                | InternalStatus::Rejected
                | InternalStatus::Expired
        )
    }

    /// Terminal states that pass through derivation regardless of signer progress.
    fn is_negative_terminal(self) -> bool {
        matches!(
            self,
            InternalStatus::Cancelled | InternalStatus::Rejected | InternalStatus::Expired
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            InternalStatus::Draft => "draft",
            InternalStatus::Pending => "pending",
            InternalStatus::InProgress => "in_progress",
            InternalStatus::Signed => "signed",
            InternalStatus::Cancelled => "cancelled",
            InternalStatus::Rejected => "rejected",
            InternalStatus::Expired => "expired",
        }
    }
}

impl std::fmt::Display for InternalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Per-signer progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignerStatus {
    Pending,
    InProgress,
    Signed,
    Rejected,
    Cancelled,
}

impl SignerStatus {
    /// Translates the provider's signer vocabulary. Unrecognized input is `Pending`.
    pub fn from_provider(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "new" => SignerStatus::Pending,
            "link-opened" => SignerStatus::InProgress,
            "signed" => SignerStatus::Signed,
            "refused" => SignerStatus::Rejected,
            "cancelled" => SignerStatus::Cancelled,
            _ => SignerStatus::Pending,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SignerStatus::Signed | SignerStatus::Rejected | SignerStatus::Cancelled
        )
    }

    fn rank(self) -> u8 {
        match self {
            SignerStatus::Pending => 0,
            SignerStatus::InProgress => 1,
            SignerStatus::Signed | SignerStatus::Rejected | SignerStatus::Cancelled => 2,
        }
    }

    /// Returns the status to store after observing `observed`, or `None` when the
    /// observation is stale or a duplicate. Terminal signers never move.
    pub fn advance(self, observed: SignerStatus) -> Option<SignerStatus> {
        if self.is_terminal() || observed.rank() <= self.rank() {
            None
        } else {
            Some(observed)
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SignerStatus::Pending => "pending",
            SignerStatus::InProgress => "in_progress",
            SignerStatus::Signed => "signed",
            SignerStatus::Rejected => "rejected",
            SignerStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for SignerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Derives the document status from the provider's aggregate status (already
/// mapped through the strategy's vocabulary) and the current signer statuses.
///
/// Negative terminal provider states win outright. A provider `signed` only
/// sticks once every signer has signed. Otherwise partial local progress
/// overrides a lagging provider aggregate.
pub fn derive_internal_status(provider: InternalStatus, signers: &[SignerStatus]) -> InternalStatus {
    if provider.is_negative_terminal() {
        return provider;
    }

    let total = signers.len();
    let signed = signers
        .iter()
        .filter(|status| **status == SignerStatus::Signed)
        .count();

    if provider == InternalStatus::Signed {
        return if signed == total {
            InternalStatus::Signed
        } else {
            InternalStatus::InProgress
        };
    }

    if signed > 0 && signed < total {
        return InternalStatus::InProgress;
    }

    provider
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signer_vocabulary_is_case_insensitive() {
        assert_eq!(SignerStatus::from_provider("NEW"), SignerStatus::Pending);
        assert_eq!(
            SignerStatus::from_provider("Link-Opened"),
            SignerStatus::InProgress
        );
        assert_eq!(SignerStatus::from_provider("signed"), SignerStatus::Signed);
        assert_eq!(SignerStatus::from_provider("refused"), SignerStatus::Rejected);
        assert_eq!(
            SignerStatus::from_provider("cancelled"),
            SignerStatus::Cancelled
        );
        assert_eq!(SignerStatus::from_provider("waiting"), SignerStatus::Pending);
        assert_eq!(SignerStatus::from_provider(""), SignerStatus::Pending);
    }

    #[test]
    fn advance_only_moves_forward() {
        assert_eq!(
            SignerStatus::Pending.advance(SignerStatus::InProgress),
            Some(SignerStatus::InProgress)
        );
        assert_eq!(
            SignerStatus::InProgress.advance(SignerStatus::Signed),
            Some(SignerStatus::Signed)
        );
        assert_eq!(SignerStatus::InProgress.advance(SignerStatus::Pending), None);
        assert_eq!(SignerStatus::Pending.advance(SignerStatus::Pending), None);
        assert_eq!(SignerStatus::Signed.advance(SignerStatus::Pending), None);
        assert_eq!(SignerStatus::Signed.advance(SignerStatus::Rejected), None);
        assert_eq!(SignerStatus::Rejected.advance(SignerStatus::Signed), None);
        assert_eq!(
            SignerStatus::Pending.advance(SignerStatus::Rejected),
            Some(SignerStatus::Rejected)
        );
    }

    #[test]
    fn negative_terminal_provider_states_pass_through() {
        let signers = [SignerStatus::Signed, SignerStatus::Pending];
        for status in [
            InternalStatus::Cancelled,
            InternalStatus::Rejected,
            InternalStatus::Expired,
        ] {
            assert_eq!(derive_internal_status(status, &signers), status);
        }
    }

    #[test]
    fn provider_signed_requires_every_signer() {
        assert_eq!(
            derive_internal_status(
                InternalStatus::Signed,
                &[SignerStatus::Signed, SignerStatus::Signed]
            ),
            InternalStatus::Signed
        );
        assert_eq!(
            derive_internal_status(
                InternalStatus::Signed,
                &[SignerStatus::Signed, SignerStatus::Rejected]
            ),
            InternalStatus::InProgress
        );
        assert_eq!(
            derive_internal_status(InternalStatus::Signed, &[]),
            InternalStatus::Signed
        );
    }

    #[test]
    fn partial_progress_overrides_lagging_provider() {
        assert_eq!(
            derive_internal_status(
                InternalStatus::Pending,
                &[SignerStatus::Pending, SignerStatus::Signed]
            ),
            InternalStatus::InProgress
        );
        assert_eq!(
            derive_internal_status(
                InternalStatus::Pending,
                &[SignerStatus::InProgress, SignerStatus::Pending]
            ),
            InternalStatus::Pending
        );
    }

    #[test]
    fn derivation_ignores_signer_order() {
        let forward = [
            SignerStatus::Signed,
            SignerStatus::Pending,
            SignerStatus::InProgress,
        ];
        let mut reversed = forward;
        reversed.reverse();
        for provider in InternalStatus::ALL {
            assert_eq!(
                derive_internal_status(provider, &forward),
                derive_internal_status(provider, &reversed)
            );
        }
    }
}
