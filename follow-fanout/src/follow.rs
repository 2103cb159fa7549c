use async_trait::async_trait;
use common_redis::CustomRedisError;
use metrics::counter;
use tracing::{debug, error, info, instrument};

use crate::cache::{
    followee_ids_key, followees_key, follower_ids_key, followers_key, render_user, CacheKind,
    Caches,
};
use crate::consumer::EventHandler;
use crate::error::ProcessError;
use crate::metrics_consts::{CACHE_WRITES, CONSISTENCY_REPAIR_NEEDED, FOLLOW_DEDUPE_SKIPPED};
use crate::retry::RetryPolicy;
use crate::types::{FollowEvent, FollowOp, FollowRelation};

/// One side of a relation: the same user written to an id list and to its html
/// mirror. The html write is only attempted once the id write went through, so a
/// failed pair never leaves the html list ahead of the id list.
#[derive(Debug, Clone, PartialEq, Eq)]
struct MirroredEntry {
    id_key: String,
    id: String,
    html_key: String,
    html: String,
}

impl FollowRelation {
    /// The followee gains a follower, and the follower gains a followee, in that order.
    fn entries(&self) -> [MirroredEntry; 2] {
        [
            MirroredEntry {
                id_key: follower_ids_key(self.followee_id),
                id: self.follower_id.to_string(),
                html_key: followers_key(self.followee_id),
                html: render_user(&self.follower_handle),
            },
            MirroredEntry {
                id_key: followee_ids_key(self.follower_id),
                id: self.followee_id.to_string(),
                html_key: followees_key(self.follower_id),
                html: render_user(&self.followee_handle),
            },
        ]
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeltaOutcome {
    /// List writes that went through, including removals that found nothing.
    pub writes: usize,
    /// Entries left alone because the id list already held the id.
    pub skipped: usize,
}

/// Keeps the four follow lists of a relation in step with follow events.
pub struct FollowProcessor {
    caches: Caches,
    retry: RetryPolicy,
    dedupe: bool,
}

impl FollowProcessor {
    pub fn new(caches: Caches, retry: RetryPolicy, dedupe: bool) -> Self {
        Self {
            caches,
            retry,
            dedupe,
        }
    }

    /// Apply one follow or unfollow to both caches.
    ///
    /// Writes go in a fixed order: followee's follower ids, followee's followers,
    /// follower's followee ids, follower's followees. Each write is retried on its
    /// own. If the very first write fails nothing was changed and the error is
    /// retryable. Once anything was written the remaining writes are still
    /// attempted, and failures are reported as `PartiallyApplied` with the keys
    /// that need repair, since redelivering would duplicate the writes that stuck.
    #[instrument(skip_all, fields(
        followee_id = %relation.followee_id,
        follower_id = %relation.follower_id,
        op = op.as_str()
    ))]
    pub async fn apply_follow_delta(
        &self,
        relation: &FollowRelation,
        op: FollowOp,
    ) -> Result<DeltaOutcome, ProcessError> {
        let mut outcome = DeltaOutcome::default();
        let mut repair_keys = Vec::new();

        for entry in relation.entries() {
            let nothing_written = outcome.writes == 0 && repair_keys.is_empty();

            if op == FollowOp::Add && self.dedupe {
                match self.already_present(&entry).await {
                    Ok(true) => {
                        debug!(key = %entry.id_key, id = %entry.id, "already present, skipping");
                        counter!(FOLLOW_DEDUPE_SKIPPED).increment(1);
                        outcome.skipped += 1;
                        continue;
                    }
                    Ok(false) => {}
                    Err(err) if nothing_written => return Err(ProcessError::CacheUnavailable(err)),
                    Err(err) => {
                        error!(key = %entry.id_key, "failed to read list: {}", err);
                        repair_keys.extend([entry.id_key, entry.html_key]);
                        continue;
                    }
                }
            }

            match self.write(CacheKind::Data, &entry.id_key, &entry.id, op).await {
                Ok(()) => outcome.writes += 1,
                Err(err) if nothing_written => return Err(ProcessError::CacheUnavailable(err)),
                Err(err) => {
                    error!(key = %entry.id_key, op = op.as_str(), "cache write failed: {}", err);
                    repair_keys.extend([entry.id_key, entry.html_key]);
                    continue;
                }
            }

            match self
                .write(CacheKind::Html, &entry.html_key, &entry.html, op)
                .await
            {
                Ok(()) => outcome.writes += 1,
                Err(err) => {
                    error!(key = %entry.html_key, op = op.as_str(), "cache write failed: {}", err);
                    repair_keys.push(entry.html_key);
                }
            }
        }

        if repair_keys.is_empty() {
            Ok(outcome)
        } else {
            counter!(CONSISTENCY_REPAIR_NEEDED).increment(repair_keys.len() as u64);
            Err(ProcessError::PartiallyApplied { repair_keys })
        }
    }

    async fn already_present(&self, entry: &MirroredEntry) -> Result<bool, CustomRedisError> {
        let client = self.caches.data();
        let ids = self
            .retry
            .run("lrange", || client.lrange(entry.id_key.clone()))
            .await?;
        Ok(ids.contains(&entry.id))
    }

    async fn write(
        &self,
        kind: CacheKind,
        key: &str,
        value: &str,
        op: FollowOp,
    ) -> Result<(), CustomRedisError> {
        let client = self.caches.get(kind);
        let result = self
            .retry
            .run(op.as_str(), || {
                let key = key.to_owned();
                let value = value.to_owned();
                async move {
                    match op {
                        FollowOp::Add => client.rpush(key, value).await,
                        // Unfollow takes back a single occurrence, the one the follow appended
                        FollowOp::Remove => {
                            let removed = client.lrem(key.clone(), 1, value).await?;
                            if removed == 0 {
                                debug!(key = %key, "nothing to remove");
                            }
                            Ok(())
                        }
                    }
                }
            })
            .await;

        let status = if result.is_ok() { "ok" } else { "failed" };
        counter!(
            CACHE_WRITES,
            "cache" => kind.as_str(),
            "op" => op.as_str(),
            "status" => status
        )
        .increment(1);
        result
    }
}

#[async_trait]
impl EventHandler<FollowEvent> for FollowProcessor {
    async fn handle(&self, event: FollowEvent) -> Result<(), ProcessError> {
        let (relation, op) = event.into_relation()?;
        let outcome = self.apply_follow_delta(&relation, op).await?;
        info!(
            followee_id = %relation.followee_id,
            follower_id = %relation.follower_id,
            op = op.as_str(),
            writes = outcome.writes,
            skipped = outcome.skipped,
            "follow applied"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NumericId;
    use common_redis::MockRedisClient;
    use std::sync::Arc;
    use std::time::Duration;

    struct Fixture {
        data: MockRedisClient,
        html: MockRedisClient,
        processor: FollowProcessor,
    }

    fn fixture(dedupe: bool) -> Fixture {
        fixture_with(MockRedisClient::new(), MockRedisClient::new(), dedupe)
    }

    fn fixture_with(data: MockRedisClient, html: MockRedisClient, dedupe: bool) -> Fixture {
        let caches = Caches::new(Arc::new(data.clone()), Arc::new(html.clone()));
        let retry = RetryPolicy::new(2, Duration::from_millis(1));
        Fixture {
            data,
            html,
            processor: FollowProcessor::new(caches, retry, dedupe),
        }
    }

    fn relation(followee: u64, followee_at: &str, follower: u64, follower_at: &str) -> FollowRelation {
        FollowRelation {
            followee_id: NumericId::new(followee),
            followee_handle: followee_at.to_owned(),
            follower_id: NumericId::new(follower),
            follower_handle: follower_at.to_owned(),
        }
    }

    fn div(handle: &str) -> String {
        format!("<div class=\"user-container\">{handle}</div>")
    }

    #[tokio::test]
    async fn follow_appends_to_all_four_lists() {
        let f = fixture(false);
        let outcome = f
            .processor
            .apply_follow_delta(&relation(1, "@a", 2, "@b"), FollowOp::Add)
            .await
            .unwrap();

        assert_eq!(outcome, DeltaOutcome { writes: 4, skipped: 0 });
        assert_eq!(f.data.list("1:follower_ids"), vec!["2"]);
        assert_eq!(f.data.list("2:followee_ids"), vec!["1"]);
        assert_eq!(f.html.list("1:followers"), vec![div("@b")]);
        assert_eq!(f.html.list("2:followees"), vec![div("@a")]);
    }

    #[tokio::test]
    async fn writes_go_in_a_fixed_order() {
        let f = fixture(false);
        f.processor
            .apply_follow_delta(&relation(1, "@a", 2, "@b"), FollowOp::Add)
            .await
            .unwrap();

        let data_keys: Vec<_> = f.data.get_calls().into_iter().map(|c| c.key).collect();
        let html_keys: Vec<_> = f.html.get_calls().into_iter().map(|c| c.key).collect();
        assert_eq!(data_keys, vec!["1:follower_ids", "2:followee_ids"]);
        assert_eq!(html_keys, vec!["1:followers", "2:followees"]);
    }

    #[tokio::test]
    async fn appends_keep_arrival_order() {
        let f = fixture(false);
        f.processor
            .apply_follow_delta(&relation(1, "@a", 2, "@b"), FollowOp::Add)
            .await
            .unwrap();
        f.processor
            .apply_follow_delta(&relation(1, "@a", 3, "@c"), FollowOp::Add)
            .await
            .unwrap();

        assert_eq!(f.data.list("1:follower_ids"), vec!["2", "3"]);
        assert_eq!(f.html.list("1:followers"), vec![div("@b"), div("@c")]);
    }

    #[tokio::test]
    async fn duplicate_follows_append_twice_without_dedupe() {
        let f = fixture(false);
        for _ in 0..2 {
            f.processor
                .apply_follow_delta(&relation(1, "@a", 2, "@b"), FollowOp::Add)
                .await
                .unwrap();
        }
        assert_eq!(f.data.list("1:follower_ids"), vec!["2", "2"]);
        assert_eq!(f.html.list("2:followees"), vec![div("@a"), div("@a")]);
    }

    #[tokio::test]
    async fn dedupe_skips_present_entries() {
        let f = fixture(true);
        f.processor
            .apply_follow_delta(&relation(1, "@a", 2, "@b"), FollowOp::Add)
            .await
            .unwrap();
        let outcome = f
            .processor
            .apply_follow_delta(&relation(1, "@a", 2, "@b"), FollowOp::Add)
            .await
            .unwrap();

        assert_eq!(outcome, DeltaOutcome { writes: 0, skipped: 2 });
        assert_eq!(f.data.list("1:follower_ids"), vec!["2"]);
        assert_eq!(f.html.list("1:followers"), vec![div("@b")]);
    }

    #[tokio::test]
    async fn unfollow_removes_one_occurrence() {
        let data = MockRedisClient::new()
            .with_list("1:follower_ids", &["2", "3", "2"])
            .with_list("2:followee_ids", &["1"]);
        let html = MockRedisClient::new()
            .with_list("1:followers", &[div("@b").as_str(), &div("@c"), &div("@b")])
            .with_list("2:followees", &[div("@a").as_str()]);
        let f = fixture_with(data, html, false);

        f.processor
            .apply_follow_delta(&relation(1, "@a", 2, "@b"), FollowOp::Remove)
            .await
            .unwrap();

        assert_eq!(f.data.list("1:follower_ids"), vec!["3", "2"]);
        assert_eq!(f.html.list("1:followers"), vec![div("@c"), div("@b")]);
        assert!(f.data.list("2:followee_ids").is_empty());
        assert!(f.html.list("2:followees").is_empty());
    }

    #[tokio::test]
    async fn unfollow_of_unknown_relation_is_a_noop() {
        let f = fixture(false);
        let outcome = f
            .processor
            .apply_follow_delta(&relation(1, "@a", 2, "@b"), FollowOp::Remove)
            .await
            .unwrap();

        assert_eq!(outcome.writes, 4);
        assert!(!f.data.contains_key("1:follower_ids"));
        assert!(!f.html.contains_key("2:followees"));
    }

    #[tokio::test]
    async fn first_write_failure_is_retryable_and_changes_nothing() {
        let f = fixture(false);
        f.data.fail("*", "*", CustomRedisError::Timeout, 100);

        let err = f
            .processor
            .apply_follow_delta(&relation(1, "@a", 2, "@b"), FollowOp::Add)
            .await
            .unwrap_err();

        assert!(matches!(err, ProcessError::CacheUnavailable(_)));
        assert!(err.is_retryable());
        assert!(f.html.get_calls().is_empty());
        assert!(!f.data.contains_key("1:follower_ids"));
    }

    #[tokio::test]
    async fn transient_failures_are_retried_in_place() {
        let f = fixture(false);
        f.html.fail("rpush", "1:followers", CustomRedisError::Timeout, 1);

        f.processor
            .apply_follow_delta(&relation(1, "@a", 2, "@b"), FollowOp::Add)
            .await
            .unwrap();

        assert_eq!(f.html.list("1:followers"), vec![div("@b")]);
    }

    #[tokio::test]
    async fn later_failures_report_repair_keys() {
        let f = fixture(false);
        f.html.fail("rpush", "2:followees", CustomRedisError::Timeout, 100);

        let err = f
            .processor
            .apply_follow_delta(&relation(1, "@a", 2, "@b"), FollowOp::Add)
            .await
            .unwrap_err();

        match &err {
            ProcessError::PartiallyApplied { repair_keys } => {
                assert_eq!(repair_keys, &vec!["2:followees".to_owned()])
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(!err.is_retryable());
        // Everything else still went through
        assert_eq!(f.data.list("1:follower_ids"), vec!["2"]);
        assert_eq!(f.html.list("1:followers"), vec![div("@b")]);
        assert_eq!(f.data.list("2:followee_ids"), vec!["1"]);
    }

    #[tokio::test]
    async fn failed_id_write_skips_its_html_mirror() {
        let f = fixture(false);
        f.data.fail("rpush", "2:followee_ids", CustomRedisError::Timeout, 100);

        let err = f
            .processor
            .apply_follow_delta(&relation(1, "@a", 2, "@b"), FollowOp::Add)
            .await
            .unwrap_err();

        match err {
            ProcessError::PartiallyApplied { repair_keys } => {
                assert_eq!(repair_keys, vec!["2:followee_ids", "2:followees"])
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(!f.html.contains_key("2:followees"));
    }

    #[tokio::test]
    async fn handler_rejects_empty_handles() {
        let f = fixture(false);
        let event = FollowEvent {
            followee_id: NumericId::new(1),
            followee_handle: String::new(),
            follower_id: NumericId::new(2),
            follower_handle: "@b".to_owned(),
            remove: None,
        };

        let err = f.processor.handle(event).await.unwrap_err();
        assert!(matches!(err, ProcessError::InvalidEvent(_)));
        assert!(f.data.get_calls().is_empty());
    }
}
