//! Bulk listing of managed resources
//!
//! Lists every customer-managed object of a kind, fetches its tags and
//! yields a descriptor for each object carrying the ownership tag key. The
//! result is a lazy stream: nothing is fetched until it is polled, and
//! dropping it abandons in-flight tag fetches.

use crate::config::{FanOut, ListerConfig};
use crate::descriptor::ResourceDescriptor;
use crate::error::ConvergeError;
use converge_common::tags::{TAG_MANAGER, from_records};
use converge_common::{AwsError, CloudApi, ListScope, RawObject, ResourceKind};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::sync::Arc;
use tracing::debug;

pub struct BulkLister<C> {
    api: Arc<C>,
    config: ListerConfig,
    region: Option<String>,
}

impl<C> Clone for BulkLister<C> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            config: self.config,
            region: self.region.clone(),
        }
    }
}

impl<C: CloudApi + 'static> BulkLister<C> {
    pub fn new(api: Arc<C>, config: ListerConfig) -> Self {
        Self {
            api,
            config,
            region: None,
        }
    }

    /// Region recorded on the descriptors this lister yields
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Stream managed resources of `kind` in listing order.
    ///
    /// Objects that vanish or carry no tag set between the listing and the
    /// tag fetch are skipped; any other error ends the stream with that error.
    pub fn list(
        &self,
        kind: ResourceKind,
    ) -> BoxStream<'static, Result<ResourceDescriptor, ConvergeError>> {
        let api = Arc::clone(&self.api);
        let objects = stream::once(async move { api.list(kind, ListScope::CustomerManaged).await })
            .map_ok(|objects| stream::iter(objects.into_iter().map(Ok::<_, AwsError>)))
            .try_flatten()
            .map_err(ConvergeError::from);

        let api = Arc::clone(&self.api);
        let region = self.region.clone();
        let fetch_tags = move |object: RawObject| hydrate(Arc::clone(&api), kind, region.clone(), object);

        let hydrated = match self.config.fan_out {
            FanOut::Sequential => objects.and_then(fetch_tags).boxed(),
            FanOut::Concurrent(workers) => objects
                .map_ok(fetch_tags)
                .try_buffered(workers.max(1))
                .boxed(),
        };

        hydrated
            .try_filter_map(|descriptor| async move { Ok::<_, ConvergeError>(descriptor) })
            .boxed()
    }
}

/// Fetch tags for one listed object. `Ok(None)` means skip it.
async fn hydrate<C: CloudApi>(
    api: Arc<C>,
    kind: ResourceKind,
    region: Option<String>,
    object: RawObject,
) -> Result<Option<ResourceDescriptor>, ConvergeError> {
    let records = match api.get_tags(kind, &object.identifier).await {
        Ok(records) => records,
        Err(e) if e.is_expected_listing_churn() => {
            debug!(kind = %kind, identifier = %object.identifier, error = %e, "Skipping listed object");
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };

    let tags = from_records(&records);
    if !tags.contains_key(TAG_MANAGER) {
        return Ok(None);
    }
    Ok(Some(ResourceDescriptor::discovered(kind, object, tags, region)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge_test_utils::{FailOn, FakeCloud, owned_by};

    #[tokio::test]
    async fn skips_unmanaged_objects() {
        let cloud = Arc::new(FakeCloud::new());
        cloud.seed(ResourceKind::Role, "managed", Some(owned_by("converge")));
        cloud.seed(ResourceKind::Role, "foreign", Some(owned_by("team-b")));
        cloud.seed(ResourceKind::Role, "untagged", None);

        let names: Vec<String> = BulkLister::new(cloud, ListerConfig::sequential())
            .list(ResourceKind::Role)
            .map_ok(|d| d.name().unwrap_or_default().to_string())
            .try_collect()
            .await
            .unwrap();
        assert_eq!(names, vec!["managed", "foreign"]);
    }

    #[tokio::test]
    async fn unexpected_tag_errors_end_the_listing() {
        let cloud = Arc::new(FakeCloud::new());
        cloud.seed(ResourceKind::Bucket, "a", Some(owned_by("converge")));
        cloud.seed(ResourceKind::Bucket, "b", Some(owned_by("converge")));
        cloud.fail(FailOn::GetTags, "b", "AccessDenied");

        let results: Vec<_> = BulkLister::new(cloud, ListerConfig::with_concurrency(4))
            .list(ResourceKind::Bucket)
            .collect()
            .await;
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(ConvergeError::Transport(_))));
    }

    #[tokio::test]
    async fn listing_is_lazy() {
        let cloud = Arc::new(FakeCloud::new());
        cloud.seed(ResourceKind::Role, "r", Some(owned_by("converge")));
        let stream = BulkLister::new(Arc::clone(&cloud), ListerConfig::sequential()).list(ResourceKind::Role);
        assert_eq!(cloud.tag_reads(), 0);
        drop(stream);
        assert_eq!(cloud.tag_reads(), 0);
    }
}
