//! Invoice workflow status lattice.
//!
//! The ordering is total and storage-level: `Consulted < WithDetail <
//! Registered < Posted`. Automatic transitions may only move a status upward;
//! the single escape hatch is [`InvoiceStatus::Posted`], set by an explicit
//! accounting action.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Workflow status of an invoice.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    /// Seen once (any entry path), header only.
    Consulted,
    /// Line items have been attached.
    WithDetail,
    /// Bulk-submission intent confirmed.
    Registered,
    /// Booked by accounting. Terminal.
    Posted,
}

impl InvoiceStatus {
    /// Numeric rank; display precedence is the same ordering restated, so this
    /// is the one source of truth for both storage and presentation.
    pub fn rank(self) -> u8 {
        match self {
            InvoiceStatus::Consulted => 0,
            InvoiceStatus::WithDetail => 1,
            InvoiceStatus::Registered => 2,
            InvoiceStatus::Posted => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == InvoiceStatus::Posted
    }

    /// Anti-regression guard: accept `proposed` only if it does not move the
    /// status downward. A regressing proposal is a logged no-op, not an error:
    /// concurrent producers routinely re-submit stale statuses.
    pub fn advance(self, proposed: InvoiceStatus) -> InvoiceStatus {
        if proposed < self {
            warn!(
                current = %self.storage_label(),
                proposed = %proposed.storage_label(),
                "ignoring status regression"
            );
            return self;
        }
        proposed
    }

    /// Status after line items are attached: only a bare `Consulted` invoice is
    /// promoted; anything further along keeps its status (the line items are
    /// still replaced by the store).
    pub fn after_line_items_attached(self) -> InvoiceStatus {
        match self {
            InvoiceStatus::Consulted => InvoiceStatus::WithDetail,
            other => other,
        }
    }

    /// Status after a bulk re-submission confirms registration intent. A
    /// posted invoice is final; everything else lands on `Registered`.
    pub fn after_registration_confirmed(self) -> InvoiceStatus {
        match self {
            InvoiceStatus::Posted => InvoiceStatus::Posted,
            other => other.advance(InvoiceStatus::Registered),
        }
    }

    /// Canonical storage spelling.
    pub fn storage_label(self) -> &'static str {
        match self {
            InvoiceStatus::Consulted => "CONSULTED",
            InvoiceStatus::WithDetail => "WITH_DETAIL",
            InvoiceStatus::Registered => "REGISTERED",
            InvoiceStatus::Posted => "POSTED",
        }
    }

    /// Human-facing spelling, used only at the presentation boundary (the
    /// underscore becomes a space). Never stored.
    pub fn display_label(self) -> &'static str {
        match self {
            InvoiceStatus::Consulted => "CONSULTED",
            InvoiceStatus::WithDetail => "WITH DETAIL",
            InvoiceStatus::Registered => "REGISTERED",
            InvoiceStatus::Posted => "POSTED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_matches_ranks() {
        use InvoiceStatus::*;
        assert!(Consulted < WithDetail);
        assert!(WithDetail < Registered);
        assert!(Registered < Posted);
        assert_eq!(Posted.rank(), 3);
    }

    #[test]
    fn advance_rejects_regressions_silently() {
        use InvoiceStatus::*;
        assert_eq!(Registered.advance(Consulted), Registered);
        assert_eq!(Posted.advance(WithDetail), Posted);
        assert_eq!(Consulted.advance(Registered), Registered);
        // Re-proposing the current status is a no-op, not a regression.
        assert_eq!(WithDetail.advance(WithDetail), WithDetail);
    }

    #[test]
    fn line_items_promote_only_from_consulted() {
        use InvoiceStatus::*;
        assert_eq!(Consulted.after_line_items_attached(), WithDetail);
        assert_eq!(WithDetail.after_line_items_attached(), WithDetail);
        assert_eq!(Registered.after_line_items_attached(), Registered);
        assert_eq!(Posted.after_line_items_attached(), Posted);
    }

    #[test]
    fn registration_confirmation_never_touches_posted() {
        use InvoiceStatus::*;
        assert_eq!(Consulted.after_registration_confirmed(), Registered);
        assert_eq!(WithDetail.after_registration_confirmed(), Registered);
        assert_eq!(Registered.after_registration_confirmed(), Registered);
        assert_eq!(Posted.after_registration_confirmed(), Posted);
    }

    #[test]
    fn display_label_spells_with_detail_with_a_space() {
        assert_eq!(InvoiceStatus::WithDetail.display_label(), "WITH DETAIL");
        assert_eq!(InvoiceStatus::WithDetail.storage_label(), "WITH_DETAIL");
    }
}
