//! Query router
//!
//! Callers describe a query once; the router runs it against the primary
//! store or, for a failover request, against the caller's ephemeral store.
//! Results have the same shape either way.

use crate::pagination::{Page, page_options, paginate};
use crate::pipeline::{Stage, fold, run_stages};
use crate::primary::PrimaryStore;
use safemode_common::{Category, Document, Error, Filter, QueryOptions, Result};
use safemode_store::{EphemeralStoreManager, UserStore};
use std::sync::Arc;
use tracing::{debug, warn};

/// Per-request routing decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryContext {
    /// Authenticated user the request runs for
    pub user_id: String,
    /// Set by request middleware when the primary store is unhealthy
    pub failover: bool,
}

impl QueryContext {
    pub fn primary(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            failover: false,
        }
    }

    pub fn failover(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            failover: true,
        }
    }
}

pub struct QueryRouter {
    primary: Arc<dyn PrimaryStore>,
    stores: Arc<EphemeralStoreManager>,
    /// Per-category limit used when a failover store has to be built
    item_limit: usize,
}

fn resolve(model: &str) -> Result<Category> {
    Category::from_model(model).ok_or_else(|| Error::UnknownCollection(model.to_string()))
}

impl QueryRouter {
    pub fn new(primary: Arc<dyn PrimaryStore>, stores: Arc<EphemeralStoreManager>, item_limit: usize) -> Self {
        Self {
            primary,
            stores,
            item_limit,
        }
    }

    pub fn stores(&self) -> &Arc<EphemeralStoreManager> {
        &self.stores
    }

    async fn failover_store(&self, ctx: &QueryContext) -> Result<Arc<UserStore>> {
        self.stores
            .ensure_store(&ctx.user_id, self.item_limit)
            .await
            .inspect_err(|e| {
                if e.is_recovery_failure() {
                    warn!(user_id = %ctx.user_id, error = %e, "could not stage user data from backup");
                }
            })
    }

    pub async fn find(
        &self,
        ctx: &QueryContext,
        model: &str,
        filter: &Filter,
        options: &QueryOptions,
    ) -> Result<Vec<Document>> {
        let category = resolve(model)?;
        if !ctx.failover {
            return Ok(self.primary.find(category, filter, options).await?);
        }
        let store = self.failover_store(ctx).await?;
        Ok(store.find(category, filter, options))
    }

    pub async fn find_one(&self, ctx: &QueryContext, model: &str, filter: &Filter) -> Result<Option<Document>> {
        let category = resolve(model)?;
        if !ctx.failover {
            return Ok(self.primary.find_one(category, filter).await?);
        }
        let store = self.failover_store(ctx).await?;
        Ok(store.find_one(category, filter))
    }

    pub async fn count(&self, ctx: &QueryContext, model: &str, filter: &Filter) -> Result<usize> {
        let category = resolve(model)?;
        if !ctx.failover {
            return Ok(self.primary.count(category, filter).await?);
        }
        let store = self.failover_store(ctx).await?;
        Ok(store.count(category, filter))
    }

    /// Run a pipeline
    ///
    /// In failover mode only match, sort, skip and limit are honoured and
    /// the result is best-effort.
    pub async fn aggregate(&self, ctx: &QueryContext, model: &str, pipeline: &[Stage]) -> Result<Vec<Document>> {
        let category = resolve(model)?;
        if !ctx.failover {
            return Ok(self.primary.aggregate(category, pipeline).await?);
        }
        let folded = fold(pipeline);
        if folded.ignored > 0 {
            warn!(
                collection = %category,
                ignored = folded.ignored,
                "unsupported aggregation stages dropped in safe mode"
            );
        }
        let store = self.failover_store(ctx).await?;
        let docs = store.find(category, &folded.filter, &folded.options);
        Ok(run_stages(docs, &folded.rest))
    }

    /// One page of results plus the pagination envelope
    pub async fn find_page(
        &self,
        ctx: &QueryContext,
        model: &str,
        filter: &Filter,
        options: QueryOptions,
        page: usize,
        limit: usize,
    ) -> Result<Page<Document>> {
        let paged = QueryOptions {
            sort: options.sort,
            ..page_options(page, limit)
        };
        let total = self.count(ctx, model, filter).await?;
        let data = self.find(ctx, model, filter, &paged).await?;
        debug!(model, page, total, failover = ctx.failover, "paged query");
        Ok(paginate(data, total, page, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::parse_pipeline;
    use crate::primary::{ConnectionState, MemoryPrimaryStore};
    use async_trait::async_trait;
    use safemode_backup::BundleProvider;
    use safemode_common::config::StoreConfig;
    use safemode_common::{BackupFormat, ExtractedUserBundle, Profile, SortSpec};
    use serde_json::{Value, json};
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn orders() -> Vec<Document> {
        vec![
            doc(json!({"_id": "o1", "userId": "u1", "status": "paid", "total": 30})),
            doc(json!({"_id": "o2", "userId": "u1", "status": "new", "total": 10})),
            doc(json!({"_id": "o3", "userId": "u1", "status": "paid", "total": 20})),
            doc(json!({"_id": "o4", "userId": "u1", "status": "paid", "total": 50})),
        ]
    }

    /// Serves the same orders the primary store holds
    #[derive(Default)]
    struct FixedProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BundleProvider for FixedProvider {
        async fn get_or_extract(&self, user_id: &str, limit: usize) -> Result<ExtractedUserBundle> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut bundle =
                ExtractedUserBundle::empty(user_id, "b1", limit, BackupFormat::NewlineDelimited);
            bundle.profile = Some(Profile::new(doc(json!({"_id": user_id, "role": "user"}))));
            for order in orders() {
                bundle.push(Category::Orders, order);
            }
            Ok(bundle)
        }
    }

    fn router() -> (Arc<MemoryPrimaryStore>, Arc<FixedProvider>, QueryRouter) {
        let primary = Arc::new(MemoryPrimaryStore::new());
        for order in orders() {
            primary.insert(Category::Orders, order);
        }
        let provider = Arc::new(FixedProvider::default());
        let stores = Arc::new(EphemeralStoreManager::new(provider.clone(), StoreConfig::default()));
        let router = QueryRouter::new(primary.clone(), stores, 50);
        (primary, provider, router)
    }

    fn ids(docs: &[Document]) -> Vec<String> {
        docs.iter().map(|d| d["_id"].as_str().unwrap().to_string()).collect()
    }

    #[tokio::test]
    async fn test_primary_and_failover_agree() {
        let (_, provider, router) = router();
        let filter = Filter::new().eq("status", "paid");
        let options = QueryOptions::new().sort(SortSpec::desc("total")).limit(2);

        let primary = router
            .find(&QueryContext::primary("u1"), "Order", &filter, &options)
            .await
            .unwrap();
        let failover = router
            .find(&QueryContext::failover("u1"), "orders", &filter, &options)
            .await
            .unwrap();
        let as_set = |docs: &[Document]| ids(docs).into_iter().collect::<BTreeSet<_>>();
        assert_eq!(as_set(&primary), as_set(&failover));
        assert_eq!(ids(&failover), vec!["o4", "o1"]);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        for ctx in [QueryContext::primary("u1"), QueryContext::failover("u1")] {
            assert_eq!(router.count(&ctx, "order", &filter).await.unwrap(), 3);
            let one = router.find_one(&ctx, "orders", &Filter::new().eq("_id", "o2")).await.unwrap();
            assert_eq!(one.unwrap()["total"], 10);
        }
    }

    #[tokio::test]
    async fn test_primary_mode_never_builds_a_store() {
        let (_, provider, router) = router();
        router
            .count(&QueryContext::primary("u1"), "orders", &Filter::new())
            .await
            .unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
        assert_eq!(router.stores().active_users(), 0);
    }

    #[tokio::test]
    async fn test_unknown_model() {
        let (_, _, router) = router();
        let err = router
            .find(&QueryContext::failover("u1"), "Shipment", &Filter::new(), &QueryOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownCollection(name) if name == "Shipment"));
    }

    #[tokio::test]
    async fn test_failover_aggregate_folds_supported_stages() {
        let (_, _, router) = router();
        let pipeline = parse_pipeline(&json!([
            {"$match": {"status": "paid"}},
            {"$group": {"_id": "$status", "n": {"$sum": 1}}},
            {"$sort": {"total": 1}},
            {"$skip": 1},
            {"$limit": 5}
        ]))
        .unwrap();
        let docs = router
            .aggregate(&QueryContext::failover("u1"), "orders", &pipeline)
            .await
            .unwrap();
        assert_eq!(ids(&docs), vec!["o1", "o4"]);

        // the primary runs pipelines natively and rejects what it cannot run
        let err = router
            .aggregate(&QueryContext::primary("u1"), "orders", &pipeline)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PrimaryQuery(_)));
    }

    #[tokio::test]
    async fn test_failover_aggregate_respects_stage_order() {
        let (_, _, router) = router();
        let pipeline = parse_pipeline(&json!([
            {"$limit": 2},
            {"$sort": {"total": 1}},
            {"$match": {"status": "paid"}}
        ]))
        .unwrap();
        let primary = router
            .aggregate(&QueryContext::primary("u1"), "orders", &pipeline)
            .await
            .unwrap();
        let failover = router
            .aggregate(&QueryContext::failover("u1"), "orders", &pipeline)
            .await
            .unwrap();
        assert_eq!(ids(&primary), vec!["o1"]);
        assert_eq!(ids(&failover), ids(&primary));
    }

    #[tokio::test]
    async fn test_primary_outage_surfaces_unavailable() {
        let (primary, _, router) = router();
        primary.set_state(ConnectionState::Disconnected);
        let err = router
            .count(&QueryContext::primary("u1"), "orders", &Filter::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PrimaryUnavailable(_)));
        // the same request flagged as failover still succeeds
        assert_eq!(
            router
                .count(&QueryContext::failover("u1"), "orders", &Filter::new())
                .await
                .unwrap(),
            4
        );
    }

    #[tokio::test]
    async fn test_find_page() {
        let (_, _, router) = router();
        for ctx in [QueryContext::primary("u1"), QueryContext::failover("u1")] {
            let page = router
                .find_page(
                    &ctx,
                    "orders",
                    &Filter::new(),
                    QueryOptions::new().sort(SortSpec::asc("total")),
                    2,
                    3,
                )
                .await
                .unwrap();
            assert_eq!(ids(&page.data), vec!["o4"]);
            assert_eq!(page.pagination.total, 4);
            assert_eq!(page.pagination.pages, 2);
            assert!(!page.pagination.has_more);
        }
    }
}
