//! Domain identifiers (strongly-typed IDs).
//!
//! # ULID ベースの ID + Phantom type
//! すべての ID は ULID (Universally Unique Lexicographically Sortable Identifier)
//! を使い、`Id<T>` のマーカー型 `T` で種類を区別します。
//!
//! - **時刻でソート可能**: 生成順 = 作成順（一覧の新しい順ソートにそのまま使える）
//! - **分散生成可能**: ストアに採番を頼らない
//! - **型安全**: `RecordId` と `AgentId` は混同できない
//!
//! 文字列表現は `{prefix}{ulid}`（例: `rec-01J...`）。パース時はプレフィックス無しも受け付けます。

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
pub trait IdMarker: Send + Sync + 'static {
    /// Display で使うプレフィックス（例: "rec-", "agent-"）
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    /// ULID から Id を作成
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    /// 内部の ULID を取得
    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Returned when a string is not a valid id of the expected kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {expected}id: {raw:?}")]
pub struct IdParseError {
    expected: &'static str,
    raw: String,
}

impl<T: IdMarker> FromStr for Id<T> {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(T::prefix()).unwrap_or(s);
        Ulid::from_string(raw)
            .map(Self::from_ulid)
            .map_err(|_| IdParseError {
                expected: T::prefix(),
                raw: s.to_string(),
            })
    }
}

// JSON 上は Display と同じ文字列で表現する
impl<T: IdMarker> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de, T: IdMarker> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ========================================
// マーカー型の定義
// ========================================

macro_rules! id_marker {
    ($(#[$doc:meta])* $marker:ident => $prefix:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $marker {}

        impl IdMarker for $marker {
            fn prefix() -> &'static str {
                $prefix
            }
        }
    };
}

id_marker!(
    /// Record のマーカー型
    RecordMarker => "rec-"
);
id_marker!(
    /// User のマーカー型
    UserMarker => "user-"
);
id_marker!(
    /// Organization のマーカー型
    OrganizationMarker => "org-"
);
id_marker!(
    /// Agent のマーカー型
    AgentMarker => "agent-"
);
id_marker!(
    /// Review のマーカー型
    ReviewMarker => "review-"
);

/// Identifier of a Record (execution / payment / refund / notification).
pub type RecordId = Id<RecordMarker>;

/// Identifier of a User (record owner, agent creator, reviewer).
pub type UserId = Id<UserMarker>;

/// Identifier of an Organization.
pub type OrganizationId = Id<OrganizationMarker>;

/// Identifier of an Agent in the catalog.
pub type AgentId = Id<AgentMarker>;

/// Identifier of a Review.
pub type ReviewId = Id<ReviewMarker>;
