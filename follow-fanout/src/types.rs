use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ProcessError;

/// A user or tweet id. Producers send ids either as JSON numbers or as numeric
/// strings, both decode to the same value. Serializes back as a JSON number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NumericId(u64);

impl NumericId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NumericId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for NumericId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("not a decimal id: {0:?}")]
pub struct InvalidId(pub String);

impl FromStr for NumericId {
    type Err = InvalidId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // u64::from_str accepts a leading '+', ids never carry one
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(InvalidId(s.to_owned()));
        }
        s.parse::<u64>()
            .map(NumericId)
            .map_err(|_| InvalidId(s.to_owned()))
    }
}

impl Serialize for NumericId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0)
    }
}

struct NumericIdVisitor;

impl Visitor<'_> for NumericIdVisitor {
    type Value = NumericId;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a non-negative integer or a string of decimal digits")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<NumericId, E> {
        Ok(NumericId(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<NumericId, E> {
        u64::try_from(v)
            .map(NumericId)
            .map_err(|_| E::invalid_value(de::Unexpected::Signed(v), &self))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<NumericId, E> {
        v.parse()
            .map_err(|_| E::invalid_value(de::Unexpected::Str(v), &self))
    }
}

impl<'de> Deserialize<'de> for NumericId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(NumericIdVisitor)
    }
}

/// One follow or unfollow, as published on the follow topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowEvent {
    pub followee_id: NumericId,
    pub followee_handle: String,
    pub follower_id: NumericId,
    pub follower_handle: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowOp {
    Add,
    Remove,
}

impl FollowOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            FollowOp::Add => "add",
            FollowOp::Remove => "remove",
        }
    }
}

/// A checked follow relation: the follower subscribes to the followee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowRelation {
    pub followee_id: NumericId,
    pub followee_handle: String,
    pub follower_id: NumericId,
    pub follower_handle: String,
}

impl FollowEvent {
    pub fn op(&self) -> FollowOp {
        match self.remove {
            Some(true) => FollowOp::Remove,
            _ => FollowOp::Add,
        }
    }

    /// Checks the handles and splits the event into its relation and operation.
    pub fn into_relation(self) -> Result<(FollowRelation, FollowOp), ProcessError> {
        let op = self.op();
        if self.followee_handle.is_empty() {
            return Err(ProcessError::InvalidEvent(
                "followee_handle is empty".to_owned(),
            ));
        }
        if self.follower_handle.is_empty() {
            return Err(ProcessError::InvalidEvent(
                "follower_handle is empty".to_owned(),
            ));
        }

        let relation = FollowRelation {
            followee_id: self.followee_id,
            followee_handle: self.followee_handle,
            follower_id: self.follower_id,
            follower_handle: self.follower_handle,
        };
        Ok((relation, op))
    }
}

/// A new tweet, as published on the tweet topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TweetEvent {
    pub tweet_id: NumericId,
    pub author_id: NumericId,
}

/// Published once per tweet to both fanout topics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanoutMessage {
    pub tweet_id: NumericId,
    pub follower_ids: Vec<String>,
}
