//! The closed set of entity operations.
//!
//! Every entity action names exactly one [`EntityOp`]. Persisting ops
//! (queries and saves) come in triples: the request plus its `Success` and
//! `Error` completions.

use crate::Error;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

macro_rules! op_prefix {
    () => {
        "@entcache/"
    };
}

/// Prefix shared by every op string.
pub const OP_PREFIX: &str = op_prefix!();

macro_rules! entity_ops {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// An operation an entity action asks the cache (and possibly the
        /// server) to perform.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum EntityOp {
            $($variant),+
        }

        impl EntityOp {
            /// Every op, in declaration order.
            pub const ALL: &'static [EntityOp] = &[$(EntityOp::$variant),+];

            /// The stable op string, e.g. `@entcache/query-all`.
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(EntityOp::$variant => concat!(op_prefix!(), $name)),+
                }
            }
        }
    };
}

entity_ops! {
    CancelPersist => "cancel-persist",
    CanceledPersist => "canceled-persist",

    QueryAll => "query-all",
    QueryAllSuccess => "query-all/success",
    QueryAllError => "query-all/error",
    QueryLoad => "query-load",
    QueryLoadSuccess => "query-load/success",
    QueryLoadError => "query-load/error",
    QueryMany => "query-many",
    QueryManySuccess => "query-many/success",
    QueryManyError => "query-many/error",
    QueryByKey => "query-by-key",
    QueryByKeySuccess => "query-by-key/success",
    QueryByKeyError => "query-by-key/error",

    SaveAddMany => "save/add-many",
    SaveAddManySuccess => "save/add-many/success",
    SaveAddManyError => "save/add-many/error",
    SaveAddOne => "save/add-one",
    SaveAddOneSuccess => "save/add-one/success",
    SaveAddOneError => "save/add-one/error",
    SaveDeleteMany => "save/delete-many",
    SaveDeleteManySuccess => "save/delete-many/success",
    SaveDeleteManyError => "save/delete-many/error",
    SaveDeleteOne => "save/delete-one",
    SaveDeleteOneSuccess => "save/delete-one/success",
    SaveDeleteOneError => "save/delete-one/error",
    SaveUpdateMany => "save/update-many",
    SaveUpdateManySuccess => "save/update-many/success",
    SaveUpdateManyError => "save/update-many/error",
    SaveUpdateOne => "save/update-one",
    SaveUpdateOneSuccess => "save/update-one/success",
    SaveUpdateOneError => "save/update-one/error",
    SaveUpsertMany => "save/upsert-many",
    SaveUpsertManySuccess => "save/upsert-many/success",
    SaveUpsertManyError => "save/upsert-many/error",
    SaveUpsertOne => "save/upsert-one",
    SaveUpsertOneSuccess => "save/upsert-one/success",
    SaveUpsertOneError => "save/upsert-one/error",

    AddAll => "add-all",
    AddMany => "add-many",
    AddOne => "add-one",
    RemoveAll => "remove-all",
    RemoveMany => "remove-many",
    RemoveOne => "remove-one",
    UpdateMany => "update-many",
    UpdateOne => "update-one",
    UpsertMany => "upsert-many",
    UpsertOne => "upsert-one",

    CommitAll => "commit-all",
    CommitMany => "commit-many",
    CommitOne => "commit-one",
    UndoAll => "undo-all",
    UndoMany => "undo-many",
    UndoOne => "undo-one",

    SetChangeState => "set-change-state",
    SetCollection => "set-collection",
    SetFilter => "set-filter",
    SetLoaded => "set-loaded",
    SetLoading => "set-loading",
}

/// `(request, success, error)` for every persisting op.
const PERSIST_TRIPLES: &[(EntityOp, EntityOp, EntityOp)] = {
    use EntityOp::*;
    &[
        (QueryAll, QueryAllSuccess, QueryAllError),
        (QueryLoad, QueryLoadSuccess, QueryLoadError),
        (QueryMany, QueryManySuccess, QueryManyError),
        (QueryByKey, QueryByKeySuccess, QueryByKeyError),
        (SaveAddMany, SaveAddManySuccess, SaveAddManyError),
        (SaveAddOne, SaveAddOneSuccess, SaveAddOneError),
        (SaveDeleteMany, SaveDeleteManySuccess, SaveDeleteManyError),
        (SaveDeleteOne, SaveDeleteOneSuccess, SaveDeleteOneError),
        (SaveUpdateMany, SaveUpdateManySuccess, SaveUpdateManyError),
        (SaveUpdateOne, SaveUpdateOneSuccess, SaveUpdateOneError),
        (SaveUpsertMany, SaveUpsertManySuccess, SaveUpsertManyError),
        (SaveUpsertOne, SaveUpsertOneSuccess, SaveUpsertOneError),
    ]
};

impl EntityOp {
    fn triple(self) -> Option<&'static (EntityOp, EntityOp, EntityOp)> {
        PERSIST_TRIPLES
            .iter()
            .find(|(req, ok, err)| *req == self || *ok == self || *err == self)
    }

    /// The success completion of a persisting request op.
    pub fn success(self) -> Option<Self> {
        self.triple()
            .filter(|(req, _, _)| *req == self)
            .map(|(_, ok, _)| *ok)
    }

    /// The error completion of a persisting request op.
    pub fn error(self) -> Option<Self> {
        self.triple()
            .filter(|(req, _, _)| *req == self)
            .map(|(_, _, err)| *err)
    }

    /// The request op a completion belongs to (the op itself for requests
    /// and for non-persisting ops).
    pub fn request(self) -> Self {
        self.triple().map_or(self, |(req, _, _)| *req)
    }

    /// Whether this op asks the data service for something.
    pub fn is_persist(self) -> bool {
        PERSIST_TRIPLES.iter().any(|(req, _, _)| *req == self)
    }

    /// Whether this op is a query request.
    pub fn is_query(self) -> bool {
        matches!(
            self,
            Self::QueryAll | Self::QueryLoad | Self::QueryMany | Self::QueryByKey
        )
    }

    /// Whether this op is a save request.
    pub fn is_save(self) -> bool {
        self.is_persist() && !self.is_query()
    }

    /// Whether this op is a success completion.
    pub fn is_success(self) -> bool {
        PERSIST_TRIPLES.iter().any(|(_, ok, _)| *ok == self)
    }

    /// Whether this op is an error completion.
    pub fn is_error(self) -> bool {
        PERSIST_TRIPLES.iter().any(|(_, _, err)| *err == self)
    }
}

impl fmt::Display for EntityOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityOp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || Error::UnknownEntityOp(s.to_string());
        let name = s.strip_prefix(OP_PREFIX).ok_or_else(unknown)?;
        Self::ALL
            .iter()
            .copied()
            .find(|op| &op.as_str()[OP_PREFIX.len()..] == name)
            .ok_or_else(unknown)
    }
}

impl Serialize for EntityOp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EntityOp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
