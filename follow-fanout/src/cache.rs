use std::fmt;
use std::sync::Arc;

use common_redis::Client;
use serde::{Deserialize, Serialize};

use crate::types::NumericId;

pub const FOLLOWER_IDS: &str = "follower_ids";
pub const FOLLOWEE_IDS: &str = "followee_ids";
pub const FOLLOWERS: &str = "followers";
pub const FOLLOWEES: &str = "followees";

pub fn follower_ids_key(user: NumericId) -> String {
    format!("{user}:{FOLLOWER_IDS}")
}

pub fn followee_ids_key(user: NumericId) -> String {
    format!("{user}:{FOLLOWEE_IDS}")
}

pub fn followers_key(user: NumericId) -> String {
    format!("{user}:{FOLLOWERS}")
}

pub fn followees_key(user: NumericId) -> String {
    format!("{user}:{FOLLOWEES}")
}

/// The markup fragment stored in the html cache for one user. The handle is
/// embedded as given.
pub fn render_user(handle: &str) -> String {
    format!(r#"<div class="user-container">{handle}</div>"#)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    /// Id lists, `<user>:follower_ids` and `<user>:followee_ids`
    Data,
    /// Rendered lists, `<user>:followers` and `<user>:followees`
    Html,
}

impl CacheKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheKind::Data => "data",
            CacheKind::Html => "html",
        }
    }

    pub fn suffixes(&self) -> [&'static str; 2] {
        match self {
            CacheKind::Data => [FOLLOWER_IDS, FOLLOWEE_IDS],
            CacheKind::Html => [FOLLOWERS, FOLLOWEES],
        }
    }

    /// Whether `key` has the `<numeric id>:<suffix>` shape of a list held by this cache.
    pub fn accepts_key(&self, key: &str) -> bool {
        let Some((user, suffix)) = key.split_once(':') else {
            return false;
        };
        user.parse::<NumericId>().is_ok() && self.suffixes().contains(&suffix)
    }
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type CacheClient = Arc<dyn Client + Send + Sync>;

/// The two list stores. Nothing spans them: a write to one can succeed while the
/// matching write to the other fails.
#[derive(Clone)]
pub struct Caches {
    data: CacheClient,
    html: CacheClient,
}

impl Caches {
    pub fn new(data: CacheClient, html: CacheClient) -> Self {
        Self { data, html }
    }

    pub fn data(&self) -> &CacheClient {
        &self.data
    }

    pub fn html(&self) -> &CacheClient {
        &self.html
    }

    pub fn get(&self, kind: CacheKind) -> &CacheClient {
        match kind {
            CacheKind::Data => &self.data,
            CacheKind::Html => &self.html,
        }
    }
}
