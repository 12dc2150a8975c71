//! # Per-Operator Hint Masks
//!
//! Optimizer hints are attached to individual logical operator instances as small
//! bitmasks, never as global state. Enumerators receive the mask by value; when a
//! conflict has to be neutralized they work on a local copy, so the operator stored
//! in the plan arena is never edited and concurrent compilations cannot observe the
//! change.
//!
//! Table lists named by index-join hints (`INL_JOIN(t2)`) are kept next to the mask
//! because diagnostics quote them back to the user.

use serde::{Deserialize, Serialize};
use std::ops::{BitAnd, BitOr, BitOrAssign};

macro_rules! hint_mask {
    ($(#[$meta:meta])* $name:ident { $($(#[$cmeta:meta])* $konst:ident = $bit:expr,)* }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl $name {
            $($(#[$cmeta])* pub const $konst: $name = $name(1 << $bit);)*

            pub const NONE: $name = $name(0);

            pub fn contains(&self, other: $name) -> bool {
                self.0 & other.0 != 0
            }

            pub fn is_empty(&self) -> bool {
                self.0 == 0
            }

            /// Copy with the given bits cleared.
            pub fn without(self, other: $name) -> $name {
                $name(self.0 & !other.0)
            }
        }

        impl BitOr for $name {
            type Output = $name;
            fn bitor(self, rhs: $name) -> $name {
                $name(self.0 | rhs.0)
            }
        }

        impl BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: $name) {
                self.0 |= rhs.0;
            }
        }

        impl BitAnd for $name {
            type Output = $name;
            fn bitand(self, rhs: $name) -> $name {
                $name(self.0 & rhs.0)
            }
        }
    };
}

hint_mask! {
    /// Join method preferences (`HASH_JOIN`, `INL_JOIN(t)`, `BROADCAST_JOIN`, ...).
    JoinPrefer {
        MERGE_JOIN = 0,
        HASH_JOIN = 1,
        LEFT_AS_INLJ_INNER = 2,
        RIGHT_AS_INLJ_INNER = 3,
        LEFT_AS_INLHJ_INNER = 4,
        RIGHT_AS_INLHJ_INNER = 5,
        LEFT_AS_INLMJ_INNER = 6,
        RIGHT_AS_INLMJ_INNER = 7,
        LEFT_AS_HJ_BUILD = 8,
        RIGHT_AS_HJ_BUILD = 9,
        LEFT_AS_HJ_PROBE = 10,
        RIGHT_AS_HJ_PROBE = 11,
        BC_JOIN = 12,
        SHUFFLE_JOIN = 13,
        NO_HASH_JOIN = 14,
        NO_MERGE_JOIN = 15,
        NO_INDEX_JOIN = 16,
        NO_INDEX_HASH_JOIN = 17,
        NO_INDEX_MERGE_JOIN = 18,
    }
}

hint_mask! {
    /// Aggregation preferences.
    AggPrefer {
        HASH_AGG = 0,
        STREAM_AGG = 1,
        MPP_1PHASE_AGG = 2,
        MPP_2PHASE_AGG = 3,
    }
}

impl JoinPrefer {
    pub const INDEX_JOIN_FAMILY: JoinPrefer = JoinPrefer(
        Self::LEFT_AS_INLJ_INNER.0
            | Self::RIGHT_AS_INLJ_INNER.0
            | Self::LEFT_AS_INLHJ_INNER.0
            | Self::RIGHT_AS_INLHJ_INNER.0
            | Self::LEFT_AS_INLMJ_INNER.0
            | Self::RIGHT_AS_INLMJ_INNER.0,
    );

    pub const LEFT_INDEX_JOIN_INNER: JoinPrefer = JoinPrefer(
        Self::LEFT_AS_INLJ_INNER.0 | Self::LEFT_AS_INLHJ_INNER.0 | Self::LEFT_AS_INLMJ_INNER.0,
    );

    pub const RIGHT_INDEX_JOIN_INNER: JoinPrefer = JoinPrefer(
        Self::RIGHT_AS_INLJ_INNER.0 | Self::RIGHT_AS_INLHJ_INNER.0 | Self::RIGHT_AS_INLMJ_INNER.0,
    );

    pub const NO_INDEX_JOIN_FAMILY: JoinPrefer = JoinPrefer(
        Self::NO_INDEX_JOIN.0 | Self::NO_INDEX_HASH_JOIN.0 | Self::NO_INDEX_MERGE_JOIN.0,
    );

    pub const MPP_JOIN: JoinPrefer = JoinPrefer(Self::BC_JOIN.0 | Self::SHUFFLE_JOIN.0);

    pub const HJ_SIDE: JoinPrefer = JoinPrefer(
        Self::LEFT_AS_HJ_BUILD.0
            | Self::RIGHT_AS_HJ_BUILD.0
            | Self::LEFT_AS_HJ_PROBE.0
            | Self::RIGHT_AS_HJ_PROBE.0,
    );

    /// `HASH_JOIN_BUILD(left)` or `HASH_JOIN_PROBE(right)`.
    pub fn force_left_to_build(&self) -> bool {
        self.contains(Self::LEFT_AS_HJ_BUILD) || self.contains(Self::RIGHT_AS_HJ_PROBE)
    }

    /// `HASH_JOIN_BUILD(right)` or `HASH_JOIN_PROBE(left)`.
    pub fn force_right_to_build(&self) -> bool {
        self.contains(Self::RIGHT_AS_HJ_BUILD) || self.contains(Self::LEFT_AS_HJ_PROBE)
    }

    pub fn has_mpp_join_hints(&self) -> bool {
        self.contains(Self::MPP_JOIN)
    }

    pub fn has_index_join_hints(&self) -> bool {
        self.contains(Self::INDEX_JOIN_FAMILY)
    }

    /// The MPP engine only executes hash joins: either the mask carries only MPP
    /// exchange hints, or only hash-join method hints.
    pub fn is_supported_in_mpp(&self) -> bool {
        if self.is_empty() {
            return true;
        }
        let only_mpp = *self & Self::MPP_JOIN;
        let only_hash = *self & (Self::HASH_JOIN | Self::HJ_SIDE);
        only_mpp == *self || only_hash == *self
    }
}

/// Join hint state carried by a logical join.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JoinHints {
    #[serde(default)]
    pub prefer: JoinPrefer,
    /// Tables named in `INL_JOIN(...)`/`TIDB_INLJ(...)`.
    #[serde(default)]
    pub inl_join_tables: Vec<String>,
    #[serde(default)]
    pub inl_hash_join_tables: Vec<String>,
    #[serde(default)]
    pub inl_merge_join_tables: Vec<String>,
}

impl JoinHints {
    pub fn new(prefer: JoinPrefer) -> Self {
        Self {
            prefer,
            ..Default::default()
        }
    }
}

/// Aggregation hint state carried by a logical aggregation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggHints {
    #[serde(default)]
    pub prefer: AggPrefer,
    /// `AGG_TO_COP()`.
    #[serde(default)]
    pub agg_to_cop: bool,
}

impl AggHints {
    /// Drop mutually exclusive preferences. Returns the cleaned mask and whether a
    /// conflict was found.
    pub fn resolve_conflicts(&self) -> (AggPrefer, bool) {
        let mut prefer = self.prefer;
        let mut conflicted = false;
        if prefer.contains(AggPrefer::HASH_AGG) && prefer.contains(AggPrefer::STREAM_AGG) {
            prefer = prefer.without(AggPrefer::HASH_AGG | AggPrefer::STREAM_AGG);
            conflicted = true;
        }
        if prefer.contains(AggPrefer::MPP_1PHASE_AGG) && prefer.contains(AggPrefer::MPP_2PHASE_AGG) {
            prefer = prefer.without(AggPrefer::MPP_1PHASE_AGG | AggPrefer::MPP_2PHASE_AGG);
            conflicted = true;
        }
        (prefer, conflicted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_ops() {
        let p = JoinPrefer::HASH_JOIN | JoinPrefer::LEFT_AS_HJ_BUILD;
        assert!(p.contains(JoinPrefer::HASH_JOIN));
        assert!(p.force_left_to_build());
        assert!(!p.force_right_to_build());
        assert_eq!(p.without(JoinPrefer::HASH_JOIN), JoinPrefer::LEFT_AS_HJ_BUILD);
    }

    #[test]
    fn test_mpp_support_mask() {
        assert!(JoinPrefer::NONE.is_supported_in_mpp());
        assert!(JoinPrefer::BC_JOIN.is_supported_in_mpp());
        assert!((JoinPrefer::HASH_JOIN | JoinPrefer::LEFT_AS_HJ_BUILD).is_supported_in_mpp());
        assert!(!JoinPrefer::MERGE_JOIN.is_supported_in_mpp());
        assert!(!(JoinPrefer::BC_JOIN | JoinPrefer::RIGHT_AS_INLJ_INNER).is_supported_in_mpp());
    }

    #[test]
    fn test_agg_conflicts_cleared() {
        let hints = AggHints {
            prefer: AggPrefer::HASH_AGG | AggPrefer::STREAM_AGG | AggPrefer::MPP_1PHASE_AGG,
            agg_to_cop: false,
        };
        let (prefer, conflicted) = hints.resolve_conflicts();
        assert!(conflicted);
        assert_eq!(prefer, AggPrefer::MPP_1PHASE_AGG);
    }
}
