use crate::reconcile::{ImportRequest, Reconciler};
use crate::report::RunReport;
use actix::prelude::*;
use actix_broker::{BrokerIssue, BrokerSubscribe};
use catalog_types::source::{SupplierSource, SupplierSourceRepository};
use std::sync::Arc;
use typesafe_repository::IdentityOf;

/// Owns the reconciler and the supplier source registry. Import runs are
/// handled one at a time.
pub struct ImportService {
    reconciler: Arc<Reconciler>,
    sources: Arc<dyn SupplierSourceRepository>,
}

impl ImportService {
    pub fn new(reconciler: Reconciler, sources: Arc<dyn SupplierSourceRepository>) -> Self {
        Self {
            reconciler: Arc::new(reconciler),
            sources,
        }
    }
}

impl Actor for ImportService {
    type Context = Context<Self>;
}

#[derive(Message, Clone, Debug)]
#[rtype(result = "Result<RunReport, anyhow::Error>")]
pub struct RunImport(pub ImportRequest);

/// Published on the system broker after every run.
#[derive(Message, Clone, Debug)]
#[rtype(result = "()")]
pub struct ImportFinished(pub RunReport);

#[derive(Message)]
#[rtype(result = "Result<Vec<SupplierSource>, anyhow::Error>")]
pub struct ListSources;

#[derive(Message)]
#[rtype(result = "Result<(), anyhow::Error>")]
pub struct AddSource(pub SupplierSource);

#[derive(Message)]
#[rtype(result = "Result<Option<SupplierSource>, anyhow::Error>")]
pub struct SetActive(pub IdentityOf<SupplierSource>, pub bool);

impl Handler<RunImport> for ImportService {
    type Result = AtomicResponse<Self, Result<RunReport, anyhow::Error>>;

    fn handle(&mut self, RunImport(request): RunImport, _ctx: &mut Self::Context) -> Self::Result {
        let reconciler = self.reconciler.clone();
        let fut = async move { reconciler.run(request).await };
        AtomicResponse::new(Box::pin(fut.into_actor(self).map(|res, act, _ctx| {
            match &res {
                Ok(report) => act.issue_system_async(ImportFinished(report.clone())),
                Err(err) => log::error!("Import run failed: {err:#}"),
            }
            res
        })))
    }
}

impl Handler<ListSources> for ImportService {
    type Result = ResponseActFuture<Self, Result<Vec<SupplierSource>, anyhow::Error>>;

    fn handle(&mut self, _: ListSources, _ctx: &mut Self::Context) -> Self::Result {
        let sources = self.sources.clone();
        let fut = async move { sources.list().await };
        Box::pin(fut.into_actor(self))
    }
}

impl Handler<AddSource> for ImportService {
    type Result = ResponseActFuture<Self, Result<(), anyhow::Error>>;

    fn handle(&mut self, AddSource(source): AddSource, _ctx: &mut Self::Context) -> Self::Result {
        let sources = self.sources.clone();
        let fut = async move {
            if source.source_url.is_empty() {
                return Err(anyhow::anyhow!("Source URL is empty"));
            }
            log::info!("Adding source {} ({})", source.source_url, source.supplier_name);
            sources.save(source).await
        };
        Box::pin(fut.into_actor(self))
    }
}

impl Handler<SetActive> for ImportService {
    type Result = ResponseActFuture<Self, Result<Option<SupplierSource>, anyhow::Error>>;

    fn handle(&mut self, SetActive(id, active): SetActive, _ctx: &mut Self::Context) -> Self::Result {
        let sources = self.sources.clone();
        let fut = async move {
            let Some(mut source) = sources.get_one(&id).await? else {
                return Ok(None);
            };
            source.active = active;
            sources.save(source.clone()).await?;
            Ok(Some(source))
        };
        Box::pin(fut.into_actor(self))
    }
}

/// Logs run summaries published by [`ImportService`].
#[derive(Default)]
pub struct ReportLogger;

impl Actor for ReportLogger {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.subscribe_system_async::<ImportFinished>(ctx);
    }
}

impl Handler<ImportFinished> for ReportLogger {
    type Result = ();

    fn handle(&mut self, ImportFinished(report): ImportFinished, _ctx: &mut Self::Context) -> Self::Result {
        log::info!("Import finished: {}", report.summary());
        for source in report.sources.iter().filter(|s| s.error_count > 0) {
            log::warn!(
                "{} ({}): {} error(s) {:?}, last: {}",
                source.supplier,
                source.url,
                source.error_count,
                source.error_codes,
                source.last_error_message.as_deref().unwrap_or_default()
            );
        }
    }
}
