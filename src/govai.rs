//! Typed queries and mutations for every GovAI resource.
//!
//! [`GovAi`] pairs the resource accessors with one shared [`QueryClient`]:
//! each read is a [`Query`] under its resource key and stale time from
//! [`keys`], and each write is a [`Mutation`] with the optimistic patches and
//! invalidations that keep every view consistent.
//!
//! ```rust,no_run
//! use govai_query::prelude::*;
//!
//! # async fn run(govai: GovAi) -> Result<(), QueryError> {
//! // A view subscribes...
//! let _board = Subscription::new(govai.pipeline());
//!
//! // ...and a click moves a card. The board shows it immediately, the
//! // write goes out, then the board refetches.
//! govai.set_pipeline_status("e1", PipelineStatus::Won).await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;

use futures::FutureExt;
use tracing::debug;

use crate::QueryError;
use crate::api::{
    ActionMessage, Agency, AgencyFilters, AgencyList, AgencyMatch, Certification, Company,
    CompanyUpdate, Document, Evaluation, EvaluationList, EvaluationPatch, GovAiApi, Identified,
    NewCertification, NewDocument, NewPastPerformance, OpportunityDetail, OpportunityFilters,
    PastPerformance, RecommendedAgency, StaleCount,
};
use crate::keys;
use crate::pipeline::{PipelineBoard, PipelineStatus};
use crate::subscription::http::{Mutation, Query, QueryClient, QueryKey, QueryOptions};
use crate::transport::Transport;
use crate::upload::{DocumentUploader, UploadError, UploadFile};

/// The GovAI data layer: accessors plus a shared query cache.
///
/// Cloning is cheap; clones share the cache.
#[derive(Debug, Clone)]
pub struct GovAi {
    api: GovAiApi,
    client: QueryClient,
}

impl GovAi {
    /// Creates the data layer with a default [`QueryClient`].
    #[must_use]
    pub fn new(transport: Transport) -> Self {
        Self::with_client(transport, QueryClient::new())
    }

    #[must_use]
    pub const fn with_client(transport: Transport, client: QueryClient) -> Self {
        Self {
            api: GovAiApi::new(transport),
            client,
        }
    }

    #[must_use]
    pub const fn api(&self) -> &GovAiApi {
        &self.api
    }

    #[must_use]
    pub const fn client(&self) -> &QueryClient {
        &self.client
    }

    fn query<T, F, Fut>(&self, key: QueryKey, options: QueryOptions, read: F) -> Query<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(GovAiApi) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
    {
        let api = self.api.clone();
        Query::new(key, move || read(api.clone()).boxed(), self.client.clone())
            .with_options(options)
    }

    async fn run<I, O, F, Fut>(&self, mutation: Mutation<I, O>, write: F) -> Result<O, QueryError>
    where
        I: Send + 'static,
        O: Send + Sync + 'static,
        F: FnOnce(GovAiApi, I) -> Fut + Send + 'static,
        Fut: Future<Output = Result<O, QueryError>> + Send + 'static,
    {
        let api = self.api.clone();
        mutation
            .execute(&self.client, move |input| write(api, input).boxed())
            .await
    }

    // Queries

    /// One page of evaluated opportunities.
    #[must_use]
    pub fn opportunities(&self, filters: &OpportunityFilters) -> Query<EvaluationList> {
        let filters = filters.clone();
        self.query(keys::opportunity_list(&filters), keys::lists(), move |api| {
            let filters = filters.clone();
            async move { api.list_opportunities(&filters).await }
        })
    }

    #[must_use]
    pub fn opportunity(&self, id: &str) -> Query<OpportunityDetail> {
        let id = id.to_string();
        self.query(keys::opportunity_detail(&id), keys::lists(), move |api| {
            let id = id.clone();
            async move { api.get_opportunity(&id).await }
        })
    }

    /// The pipeline kanban board.
    #[must_use]
    pub fn pipeline(&self) -> Query<PipelineBoard> {
        self.query(keys::pipeline(), keys::lists(), |api| async move {
            api.pipeline_board().await
        })
    }

    #[must_use]
    pub fn stale_count(&self) -> Query<StaleCount> {
        self.query(keys::stale_count(), keys::stats(), |api| async move {
            api.stale_count().await
        })
    }

    #[must_use]
    pub fn agencies(&self, filters: &AgencyFilters) -> Query<AgencyList> {
        let filters = filters.clone();
        self.query(keys::agency_list(&filters), keys::reference(), move |api| {
            let filters = filters.clone();
            async move { api.list_agencies(&filters).await }
        })
    }

    #[must_use]
    pub fn agency(&self, id: &str) -> Query<Agency> {
        let id = id.to_string();
        self.query(keys::agency_detail(&id), keys::reference(), move |api| {
            let id = id.clone();
            async move { api.get_agency(&id).await }
        })
    }

    #[must_use]
    pub fn recommended_agencies(&self) -> Query<Vec<RecommendedAgency>> {
        self.query(keys::recommended_agencies(), keys::reference(), |api| async move {
            api.recommended_agencies().await
        })
    }

    #[must_use]
    pub fn agency_match(&self, id: &str) -> Query<AgencyMatch> {
        let id = id.to_string();
        self.query(keys::agency_match(&id), keys::reference(), move |api| {
            let id = id.clone();
            async move { api.agency_match(&id).await }
        })
    }

    #[must_use]
    pub fn documents(&self) -> Query<Vec<Document>> {
        self.query(keys::documents(), keys::lists(), |api| async move {
            api.list_documents().await
        })
    }

    #[must_use]
    pub fn certifications(&self) -> Query<Vec<Certification>> {
        self.query(keys::certifications(), keys::lists(), |api| async move {
            api.list_certifications().await
        })
    }

    #[must_use]
    pub fn past_performance(&self) -> Query<Vec<PastPerformance>> {
        self.query(keys::past_performance(), keys::lists(), |api| async move {
            api.list_past_performance().await
        })
    }

    #[must_use]
    pub fn company(&self) -> Query<Company> {
        self.query(keys::company_profile(), keys::reference(), |api| async move {
            api.get_company().await
        })
    }

    // Mutations

    /// Saves a user edit to an evaluation.
    ///
    /// Every cached list, detail and the pipeline board show the edit right
    /// away. On success the server's copy replaces it and opportunities and
    /// the pipeline are invalidated; on failure every view is rolled back.
    ///
    /// # Errors
    ///
    /// Returns the write's error after rolling back.
    pub async fn update_evaluation(
        &self,
        id: &str,
        patch: EvaluationPatch,
    ) -> Result<Evaluation, QueryError> {
        let target = id.to_string();
        let mutation = Mutation::new("evaluations.update", patch.clone())
            .affects(keys::pipeline())
            .affects(keys::opportunities());
        let mutation = self.with_evaluation_effects(mutation, id, Some(&patch));
        self.run(mutation, move |api, patch| async move {
            api.update_evaluation(&target, &patch).await
        })
        .await
    }

    /// Moves an evaluation to a pipeline column.
    ///
    /// # Errors
    ///
    /// Returns the write's error after rolling back.
    pub async fn set_pipeline_status(
        &self,
        id: &str,
        status: PipelineStatus,
    ) -> Result<Evaluation, QueryError> {
        self.update_evaluation(id, EvaluationPatch::status(status))
            .await
    }

    /// Replaces the user's notes on an evaluation.
    ///
    /// # Errors
    ///
    /// Returns the write's error after rolling back.
    pub async fn set_notes(&self, id: &str, notes: &str) -> Result<Evaluation, QueryError> {
        self.update_evaluation(id, EvaluationPatch::notes(notes))
            .await
    }

    /// Rescores one evaluation and merges the result into every cached view.
    ///
    /// # Errors
    ///
    /// Returns the write's error.
    pub async fn refresh_evaluation(&self, id: &str) -> Result<Evaluation, QueryError> {
        let mutation =
            Mutation::new("evaluations.refresh", id.to_string()).affects(keys::stale_count());
        let mutation = self.with_evaluation_effects(mutation, id, None);
        self.run(mutation, |api, id| async move {
            api.refresh_evaluation(&id).await
        })
        .await
    }

    /// Starts opportunity discovery. New results arrive on the next reads.
    ///
    /// # Errors
    ///
    /// Returns the write's error.
    pub async fn trigger_discovery(&self, force_refresh: bool) -> Result<ActionMessage, QueryError> {
        let mutation = Mutation::new("discovery.trigger", force_refresh)
            .affects(keys::opportunities())
            .affects(keys::evaluations());
        self.run(mutation, |api, force_refresh| async move {
            api.trigger_discovery(force_refresh).await
        })
        .await
    }

    /// Rescores every stale evaluation.
    ///
    /// # Errors
    ///
    /// Returns the write's error.
    pub async fn rescore_all(&self) -> Result<ActionMessage, QueryError> {
        let mutation = Mutation::new("evaluations.rescore_all", ())
            .affects(keys::opportunities())
            .affects(keys::evaluations());
        self.run(mutation, |api, ()| async move { api.rescore_all().await })
            .await
    }

    /// Saves the company profile.
    ///
    /// Agency recommendations and the stale count depend on the profile, so
    /// they are invalidated along with it.
    ///
    /// # Errors
    ///
    /// Returns the write's error after rolling back.
    pub async fn update_company(&self, update: CompanyUpdate) -> Result<Company, QueryError> {
        let patch = update.clone();
        let mutation = Mutation::new("company.update", update)
            .optimistic::<Company, _>(keys::company_profile(), move |company| {
                patch.apply_to(company);
            })
            .merge::<Company, _>(keys::company_profile(), |company, server: &Company| {
                company.clone_from(server);
            })
            .affects(keys::company())
            .affects(keys::recommended_agencies())
            .affects(keys::stale_count());
        self.run(mutation, |api, update| async move {
            api.update_company(&update).await
        })
        .await
    }

    /// Registers an already stored file. Most callers want [`upload`](Self::upload).
    ///
    /// # Errors
    ///
    /// Returns the write's error.
    pub async fn create_document(&self, document: NewDocument) -> Result<Document, QueryError> {
        self.create_record("documents.create", keys::documents(), document, |api, document| async move {
            api.create_document(&document).await
        })
        .await
    }

    /// # Errors
    ///
    /// Returns the write's error after putting the document back.
    pub async fn delete_document(&self, id: &str) -> Result<(), QueryError> {
        self.delete_record::<Document, _, _>("documents.delete", keys::documents(), id, |api, id| async move {
            api.delete_document(&id).await
        })
        .await
    }

    /// # Errors
    ///
    /// Returns [`QueryError::Validation`] without sending anything when a
    /// required field is missing, otherwise the write's error.
    pub async fn create_certification(
        &self,
        certification: NewCertification,
    ) -> Result<Certification, QueryError> {
        certification.validate()?;
        self.create_record(
            "certifications.create",
            keys::certifications(),
            certification,
            |api, certification| async move { api.create_certification(&certification).await },
        )
        .await
    }

    /// # Errors
    ///
    /// Returns the write's error after putting the certification back.
    pub async fn delete_certification(&self, id: &str) -> Result<(), QueryError> {
        self.delete_record::<Certification, _, _>(
            "certifications.delete",
            keys::certifications(),
            id,
            |api, id| async move { api.delete_certification(&id).await },
        )
        .await
    }

    /// # Errors
    ///
    /// Returns [`QueryError::Validation`] without sending anything when a
    /// required field is missing, otherwise the write's error.
    pub async fn create_past_performance(
        &self,
        record: NewPastPerformance,
    ) -> Result<PastPerformance, QueryError> {
        record.validate()?;
        self.create_record(
            "past_performance.create",
            keys::past_performance(),
            record,
            |api, record| async move { api.create_past_performance(&record).await },
        )
        .await
    }

    /// # Errors
    ///
    /// Returns the write's error after putting the record back.
    pub async fn delete_past_performance(&self, id: &str) -> Result<(), QueryError> {
        self.delete_record::<PastPerformance, _, _>(
            "past_performance.delete",
            keys::past_performance(),
            id,
            |api, id| async move { api.delete_past_performance(&id).await },
        )
        .await
    }

    #[must_use]
    pub fn uploader(&self) -> DocumentUploader {
        DocumentUploader::new(self.api.clone(), self.client.clone())
    }

    /// Uploads a file and registers it as a document.
    ///
    /// # Errors
    ///
    /// Returns the [`UploadError`] of the step that failed.
    pub async fn upload(&self, file: UploadFile) -> Result<Document, UploadError> {
        self.uploader().upload(file).await
    }

    /// Adds the cache effects of a write returning an evaluation: the
    /// optimistic `patch`, if any, then the server's copy merged into every
    /// cached list, detail and the pipeline board holding `id`.
    fn with_evaluation_effects<I>(
        &self,
        mut mutation: Mutation<I, Evaluation>,
        id: &str,
        patch: Option<&EvaluationPatch>,
    ) -> Mutation<I, Evaluation>
    where
        I: Send + 'static,
    {
        let lists = self
            .client
            .keys_where::<EvaluationList>(&keys::opportunity_lists(), |list| {
                list.get(id).is_some()
            });
        let details = self
            .client
            .keys_where::<OpportunityDetail>(&keys::opportunity_details(), |detail| {
                detail.evaluation.as_ref().is_some_and(|e| e.id == id)
            });
        debug!(id, lists = lists.len(), details = details.len(), "evaluation cached in views");

        if let Some(patch) = patch {
            let known = lists
                .iter()
                .find_map(|key| self.client.get_query_data::<EvaluationList>(key)?.get(id).cloned())
                .or_else(|| {
                    details.iter().find_map(|key| {
                        self.client
                            .get_query_data::<OpportunityDetail>(key)?
                            .evaluation
                    })
                });

            let on_list = {
                let (id, patch) = (id.to_string(), patch.clone());
                move |list: &mut EvaluationList| {
                    if let Some(e) = list.evaluations.iter_mut().find(|e| e.id == id) {
                        patch.apply_to(e);
                    }
                }
            };
            let on_detail = {
                let patch = patch.clone();
                move |detail: &mut OpportunityDetail| {
                    if let Some(e) = detail.evaluation.as_mut() {
                        patch.apply_to(e);
                    }
                }
            };
            let on_board = {
                let (id, patch) = (id.to_string(), patch.clone());
                move |board: &mut PipelineBoard| {
                    // Saving a new opportunity puts its card on the board
                    if !board.apply(&id, &patch)
                        && patch.user_saved.is_some()
                        && let Some(mut card) = known.clone()
                    {
                        patch.apply_to(&mut card);
                        board.upsert(card);
                    }
                }
            };

            for key in &lists {
                mutation = mutation.optimistic::<EvaluationList, _>(key.clone(), on_list.clone());
            }
            for key in &details {
                mutation = mutation.optimistic::<OpportunityDetail, _>(key.clone(), on_detail.clone());
            }
            mutation = mutation.optimistic::<PipelineBoard, _>(keys::pipeline(), on_board);
        }

        let merge_list = |list: &mut EvaluationList, server: &Evaluation| {
            if let Some(e) = list.evaluations.iter_mut().find(|e| e.id == server.id) {
                e.merge_from(server);
            }
        };
        let merge_detail = |detail: &mut OpportunityDetail, server: &Evaluation| {
            if let Some(e) = detail.evaluation.as_mut() {
                e.merge_from(server);
            }
        };
        for key in lists {
            mutation = mutation.merge::<EvaluationList, _>(key, merge_list);
        }
        for key in details {
            mutation = mutation.merge::<OpportunityDetail, _>(key, merge_detail);
        }
        mutation.merge::<PipelineBoard, _>(keys::pipeline(), |board, server: &Evaluation| {
            let mut card = board
                .find(&server.id)
                .map_or_else(|| server.clone(), |(_, card)| card.clone());
            card.merge_from(server);
            board.upsert(card);
        })
    }

    async fn create_record<T, N, F, Fut>(
        &self,
        resource: &'static str,
        key: QueryKey,
        input: N,
        write: F,
    ) -> Result<T, QueryError>
    where
        T: Clone + Send + Sync + 'static,
        N: Send + 'static,
        F: FnOnce(GovAiApi, N) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
    {
        let mutation = Mutation::new(resource, input)
            .merge::<Vec<T>, _>(key.clone(), |items, created: &T| items.push(created.clone()))
            .affects(key);
        self.run(mutation, write).await
    }

    async fn delete_record<T, F, Fut>(
        &self,
        resource: &'static str,
        key: QueryKey,
        id: &str,
        write: F,
    ) -> Result<(), QueryError>
    where
        T: Identified + Clone + Send + Sync + 'static,
        F: FnOnce(GovAiApi, String) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), QueryError>> + Send + 'static,
    {
        let target = id.to_string();
        let mutation = Mutation::new(resource, id.to_string())
            .optimistic::<Vec<T>, _>(key.clone(), move |items| {
                items.retain(|item| item.id() != target);
            })
            .affects(key);
        self.run(mutation, write).await
    }
}
