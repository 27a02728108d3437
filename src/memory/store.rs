// src/memory/store.rs
// Async façade over the memory store, scoped to one owning user. All SQL
// runs through the pool's blocking executor; this type just moves params
// into `interact` closures and hands back the typed results.

use std::sync::Arc;

use anyhow::Result;

use crate::config::StoreConfig;
use crate::db::DatabasePool;
use crate::error::EngramError;
use crate::memory::{base, layers, model, search};
use crate::memory::types::{
    BaseVectorsPatch, ContextMemory, ContextPatch, ContextVectorsPatch, CreateContextParams,
    CreateExperienceParams, CreateIdentityParams, CreateMemoryParams, CreatePreferenceParams,
    ExperienceMemory, ExperiencePatch, ExperienceVectorsPatch, IdentityFacets, IdentityMemory,
    IdentityPatch, IdentityType, IdentityVectorsPatch, MemoryLayer, MemoryPage, MergeStrategy,
    Patch, PreferenceMemory, PreferencePatch, PreferenceVectorsPatch, QueryMemoriesParams,
    SearchOptions, SearchResults, UserMemory, UserMemoryPatch,
};

#[derive(Clone)]
pub struct UserMemoryStore {
    pool: Arc<DatabasePool>,
    user_id: String,
    /// Expected embedding width; None disables width checks.
    embedding_dimensions: Option<usize>,
}

impl UserMemoryStore {
    pub fn new(pool: Arc<DatabasePool>, user_id: impl Into<String>) -> Self {
        Self {
            pool,
            user_id: user_id.into(),
            embedding_dimensions: None,
        }
    }

    /// Enforce a fixed embedding width on every vector accepted by this
    /// store. Mismatched vectors are rejected before any SQL runs.
    pub fn with_embedding_dimensions(mut self, dimensions: usize) -> Self {
        self.embedding_dimensions = Some(dimensions);
        self
    }

    /// Open a pool per the configuration and scope a store to one user.
    /// With no `db_path` configured the store runs fully in memory.
    pub async fn open(
        config: &StoreConfig,
        user_id: impl Into<String>,
    ) -> crate::error::Result<Self> {
        let pool = match &config.db_path {
            Some(path) => DatabasePool::open(path).await,
            None => DatabasePool::open_in_memory().await,
        }
        .map_err(EngramError::Anyhow)?;
        Ok(Self::new(Arc::new(pool), user_id)
            .with_embedding_dimensions(config.embedding_dimensions))
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    fn check_embedding(&self, field: &str, embedding: Option<&[f32]>) -> Result<()> {
        if let (Some(dims), Some(vec)) = (self.embedding_dimensions, embedding) {
            if vec.len() != dims {
                anyhow::bail!(EngramError::InvalidInput(format!(
                    "{field} embedding has {} dimensions, expected {dims}",
                    vec.len()
                )));
            }
        }
        Ok(())
    }

    fn check_patch(&self, field: &str, patch: &Patch<Vec<f32>>) -> Result<()> {
        let value = match patch {
            Patch::Set(v) => Some(v.as_slice()),
            _ => None,
        };
        self.check_embedding(field, value)
    }

    fn check_base_params(&self, params: &CreateMemoryParams) -> Result<()> {
        self.check_embedding("summary", params.summary_vector.as_deref())?;
        self.check_embedding("details", params.details_vector.as_deref())
    }

    // -- base records -------------------------------------------------------

    /// Create a bare base record in the given layer, with no extension row.
    pub async fn create(&self, layer: MemoryLayer, params: CreateMemoryParams) -> Result<UserMemory> {
        self.check_base_params(&params)?;
        let user_id = self.user_id.clone();
        self.pool
            .interact(move |conn| base::create_user_memory_sync(conn, &user_id, layer, &params))
            .await
    }

    pub async fn find(&self, id: i64) -> Result<Option<UserMemory>> {
        let user_id = self.user_id.clone();
        self.pool
            .interact(move |conn| base::find_user_memory_sync(conn, &user_id, id))
            .await
    }

    pub async fn update(&self, id: i64, patch: UserMemoryPatch) -> Result<bool> {
        let user_id = self.user_id.clone();
        self.pool
            .interact(move |conn| base::update_user_memory_sync(conn, &user_id, id, &patch))
            .await
    }

    pub async fn delete(&self, id: i64) -> Result<bool> {
        let user_id = self.user_id.clone();
        self.pool
            .interact(move |conn| base::delete_user_memory_sync(conn, &user_id, id))
            .await
    }

    /// Remove every memory this user owns, including context rows.
    pub async fn delete_all(&self) -> Result<u64> {
        let user_id = self.user_id.clone();
        self.pool
            .interact(move |conn| base::delete_all_user_memories_sync(conn, &user_id))
            .await
    }

    /// Remove every memory this user owns within one layer.
    pub async fn delete_all_in_layer(&self, layer: MemoryLayer) -> Result<u64> {
        let user_id = self.user_id.clone();
        self.pool
            .interact(move |conn| layers::delete_all_for_layer_sync(conn, &user_id, layer))
            .await
    }

    // -- vectors ------------------------------------------------------------

    pub async fn update_vectors(&self, id: i64, patch: BaseVectorsPatch) -> Result<bool> {
        self.check_patch("summary", &patch.summary_vector)?;
        self.check_patch("details", &patch.details_vector)?;
        let user_id = self.user_id.clone();
        self.pool
            .interact(move |conn| base::update_base_vectors_sync(conn, &user_id, id, &patch))
            .await
    }

    pub async fn update_identity_vectors(
        &self,
        identity_id: i64,
        patch: IdentityVectorsPatch,
    ) -> Result<bool> {
        self.check_patch("description", &patch.description_vector)?;
        let user_id = self.user_id.clone();
        self.pool
            .interact(move |conn| {
                base::update_identity_vectors_sync(conn, &user_id, identity_id, &patch)
            })
            .await
    }

    pub async fn update_experience_vectors(
        &self,
        experience_id: i64,
        patch: ExperienceVectorsPatch,
    ) -> Result<bool> {
        self.check_patch("situation", &patch.situation_vector)?;
        self.check_patch("action", &patch.action_vector)?;
        self.check_patch("key_learning", &patch.key_learning_vector)?;
        let user_id = self.user_id.clone();
        self.pool
            .interact(move |conn| {
                base::update_experience_vectors_sync(conn, &user_id, experience_id, &patch)
            })
            .await
    }

    pub async fn update_preference_vectors(
        &self,
        preference_id: i64,
        patch: PreferenceVectorsPatch,
    ) -> Result<bool> {
        self.check_patch("conclusion_directives", &patch.conclusion_directives_vector)?;
        let user_id = self.user_id.clone();
        self.pool
            .interact(move |conn| {
                base::update_preference_vectors_sync(conn, &user_id, preference_id, &patch)
            })
            .await
    }

    pub async fn update_context_vectors(
        &self,
        context_id: i64,
        patch: ContextVectorsPatch,
    ) -> Result<bool> {
        self.check_patch("title", &patch.title_vector)?;
        self.check_patch("description", &patch.description_vector)?;
        let user_id = self.user_id.clone();
        self.pool
            .interact(move |conn| {
                base::update_context_vectors_sync(conn, &user_id, context_id, &patch)
            })
            .await
    }

    // -- layered creates ----------------------------------------------------

    pub async fn create_context_memory(
        &self,
        base: CreateMemoryParams,
        context: CreateContextParams,
    ) -> Result<(UserMemory, ContextMemory)> {
        self.check_base_params(&base)?;
        self.check_embedding("title", context.title_vector.as_deref())?;
        self.check_embedding("description", context.description_vector.as_deref())?;
        let user_id = self.user_id.clone();
        self.pool
            .interact(move |conn| {
                model::create_context_memory_sync(conn, &user_id, &base, &context)
            })
            .await
    }

    pub async fn create_experience_memory(
        &self,
        base: CreateMemoryParams,
        experience: CreateExperienceParams,
    ) -> Result<(UserMemory, ExperienceMemory)> {
        self.check_base_params(&base)?;
        self.check_embedding("situation", experience.situation_vector.as_deref())?;
        self.check_embedding("action", experience.action_vector.as_deref())?;
        self.check_embedding("key_learning", experience.key_learning_vector.as_deref())?;
        let user_id = self.user_id.clone();
        self.pool
            .interact(move |conn| {
                model::create_experience_memory_sync(conn, &user_id, &base, &experience)
            })
            .await
    }

    pub async fn create_preference_memory(
        &self,
        base: CreateMemoryParams,
        preference: CreatePreferenceParams,
    ) -> Result<(UserMemory, PreferenceMemory)> {
        self.check_base_params(&base)?;
        self.check_embedding(
            "conclusion_directives",
            preference.conclusion_directives_vector.as_deref(),
        )?;
        let user_id = self.user_id.clone();
        self.pool
            .interact(move |conn| {
                model::create_preference_memory_sync(conn, &user_id, &base, &preference)
            })
            .await
    }

    // -- identity entries ---------------------------------------------------

    pub async fn add_identity_entry(
        &self,
        base: CreateMemoryParams,
        identity: CreateIdentityParams,
    ) -> Result<(UserMemory, IdentityMemory)> {
        self.check_base_params(&base)?;
        self.check_embedding("description", identity.description_vector.as_deref())?;
        let user_id = self.user_id.clone();
        self.pool
            .interact(move |conn| model::add_identity_entry_sync(conn, &user_id, &base, &identity))
            .await
    }

    pub async fn update_identity_entry(
        &self,
        identity_id: i64,
        base_patch: Option<UserMemoryPatch>,
        identity_patch: Option<IdentityPatch>,
        strategy: MergeStrategy,
    ) -> Result<bool> {
        let user_id = self.user_id.clone();
        self.pool
            .interact(move |conn| {
                model::update_identity_entry_sync(
                    conn,
                    &user_id,
                    identity_id,
                    base_patch.as_ref(),
                    identity_patch.as_ref(),
                    strategy,
                )
            })
            .await
    }

    pub async fn remove_identity_entry(&self, identity_id: i64) -> Result<bool> {
        let user_id = self.user_id.clone();
        self.pool
            .interact(move |conn| layers::remove_identity_entry_sync(conn, &user_id, identity_id))
            .await
    }

    // -- other layer entries ------------------------------------------------

    pub async fn update_context_entry(&self, context_id: i64, patch: ContextPatch) -> Result<bool> {
        let user_id = self.user_id.clone();
        self.pool
            .interact(move |conn| {
                layers::update_context_entry_sync(conn, &user_id, context_id, &patch)
            })
            .await
    }

    pub async fn update_experience_entry(
        &self,
        experience_id: i64,
        patch: ExperiencePatch,
    ) -> Result<bool> {
        let user_id = self.user_id.clone();
        self.pool
            .interact(move |conn| {
                layers::update_experience_entry_sync(conn, &user_id, experience_id, &patch)
            })
            .await
    }

    pub async fn update_preference_entry(
        &self,
        preference_id: i64,
        patch: PreferencePatch,
    ) -> Result<bool> {
        let user_id = self.user_id.clone();
        self.pool
            .interact(move |conn| {
                layers::update_preference_entry_sync(conn, &user_id, preference_id, &patch)
            })
            .await
    }

    pub async fn remove_experience_entry(&self, experience_id: i64) -> Result<bool> {
        let user_id = self.user_id.clone();
        self.pool
            .interact(move |conn| {
                layers::remove_experience_entry_sync(conn, &user_id, experience_id)
            })
            .await
    }

    pub async fn remove_preference_entry(&self, preference_id: i64) -> Result<bool> {
        let user_id = self.user_id.clone();
        self.pool
            .interact(move |conn| {
                layers::remove_preference_entry_sync(conn, &user_id, preference_id)
            })
            .await
    }

    /// Remove a context entry together with every base record it links.
    pub async fn remove_context_entry(&self, context_id: i64) -> Result<bool> {
        let user_id = self.user_id.clone();
        self.pool
            .interact(move |conn| layers::remove_context_entry_sync(conn, &user_id, context_id))
            .await
    }

    // -- lookups and listings -----------------------------------------------

    pub async fn find_identity(&self, id: i64) -> Result<Option<IdentityMemory>> {
        let user_id = self.user_id.clone();
        self.pool
            .interact(move |conn| layers::find_identity_sync(conn, &user_id, id))
            .await
    }

    pub async fn find_experience(&self, id: i64) -> Result<Option<ExperienceMemory>> {
        let user_id = self.user_id.clone();
        self.pool
            .interact(move |conn| layers::find_experience_sync(conn, &user_id, id))
            .await
    }

    pub async fn find_preference(&self, id: i64) -> Result<Option<PreferenceMemory>> {
        let user_id = self.user_id.clone();
        self.pool
            .interact(move |conn| layers::find_preference_sync(conn, &user_id, id))
            .await
    }

    pub async fn find_context(&self, id: i64) -> Result<Option<ContextMemory>> {
        let user_id = self.user_id.clone();
        self.pool
            .interact(move |conn| layers::find_context_sync(conn, &user_id, id))
            .await
    }

    pub async fn list_identities(&self, limit: Option<i64>) -> Result<Vec<IdentityMemory>> {
        let user_id = self.user_id.clone();
        self.pool
            .interact(move |conn| layers::list_identities_sync(conn, &user_id, limit))
            .await
    }

    pub async fn list_identities_by_type(
        &self,
        identity_type: IdentityType,
        limit: Option<i64>,
    ) -> Result<Vec<IdentityMemory>> {
        let user_id = self.user_id.clone();
        self.pool
            .interact(move |conn| {
                layers::list_identities_by_type_sync(conn, &user_id, identity_type, limit)
            })
            .await
    }

    pub async fn list_experiences(&self, limit: Option<i64>) -> Result<Vec<ExperienceMemory>> {
        let user_id = self.user_id.clone();
        self.pool
            .interact(move |conn| layers::list_experiences_sync(conn, &user_id, limit))
            .await
    }

    pub async fn list_preferences(&self, limit: Option<i64>) -> Result<Vec<PreferenceMemory>> {
        let user_id = self.user_id.clone();
        self.pool
            .interact(move |conn| layers::list_preferences_sync(conn, &user_id, limit))
            .await
    }

    pub async fn list_contexts(&self, limit: Option<i64>) -> Result<Vec<ContextMemory>> {
        let user_id = self.user_id.clone();
        self.pool
            .interact(move |conn| layers::list_contexts_sync(conn, &user_id, limit))
            .await
    }

    /// Identity entries eligible for prompt injection: relationship 'self'
    /// or unclassified only.
    pub async fn query_identities_for_injection(&self, limit: i64) -> Result<Vec<IdentityMemory>> {
        let user_id = self.user_id.clone();
        self.pool
            .interact(move |conn| {
                search::query_identities_for_injection_sync(conn, &user_id, limit)
            })
            .await
    }

    // -- facets and browse --------------------------------------------------

    pub async fn query_tags(
        &self,
        layers: Option<Vec<MemoryLayer>>,
        page: i64,
        size: i64,
    ) -> Result<Vec<crate::memory::types::TagCount>> {
        let user_id = self.user_id.clone();
        self.pool
            .interact(move |conn| {
                model::query_tags_sync(conn, &user_id, layers.as_deref(), page, size)
            })
            .await
    }

    pub async fn query_identity_facets(&self, page: i64, size: i64) -> Result<IdentityFacets> {
        let user_id = self.user_id.clone();
        self.pool
            .interact(move |conn| model::query_identity_facets_sync(conn, &user_id, page, size))
            .await
    }

    pub async fn query_memories(&self, params: QueryMemoriesParams) -> Result<MemoryPage> {
        let user_id = self.user_id.clone();
        self.pool
            .interact(move |conn| model::query_memories_sync(conn, &user_id, &params))
            .await
    }

    // -- blended search -----------------------------------------------------

    /// Blended retrieval over contexts, experiences and preferences with
    /// per-layer budgets, followed by one access-metrics batch in its own
    /// transaction. Identity is never part of blended search.
    pub async fn search(&self, options: SearchOptions) -> Result<SearchResults> {
        self.check_embedding("query", options.embedding.as_deref())?;
        let limits = options.limits;
        let embedding = options.embedding;

        let ctx_user = self.user_id.clone();
        let ctx_vec = embedding.clone();
        let contexts = self.pool.interact(move |conn| {
            search::search_contexts_sync(conn, &ctx_user, ctx_vec.as_deref(), limits.contexts, None)
        });

        let exp_user = self.user_id.clone();
        let exp_vec = embedding.clone();
        let experiences = self.pool.interact(move |conn| {
            search::search_experiences_sync(
                conn,
                &exp_user,
                exp_vec.as_deref(),
                limits.experiences,
                None,
            )
        });

        let pref_user = self.user_id.clone();
        let pref_vec = embedding;
        let preferences = self.pool.interact(move |conn| {
            search::search_preferences_sync(
                conn,
                &pref_user,
                pref_vec.as_deref(),
                limits.preferences,
                None,
            )
        });

        let (contexts, experiences, preferences) = tokio::join!(contexts, experiences, preferences);
        let results = SearchResults {
            contexts: contexts?,
            experiences: experiences?,
            preferences: preferences?,
        };

        // Base rows surfaced directly plus those reached through contexts.
        let mut memory_ids: Vec<i64> = Vec::new();
        memory_ids.extend(results.experiences.iter().map(|s| s.item.user_memory_id));
        memory_ids.extend(results.preferences.iter().map(|s| s.item.user_memory_id));
        for scored in &results.contexts {
            memory_ids.extend(scored.item.user_memory_ids.iter().copied());
        }
        memory_ids.sort_unstable();
        memory_ids.dedup();
        let context_ids: Vec<i64> = results.contexts.iter().map(|s| s.item.id).collect();

        let touch_user = self.user_id.clone();
        self.pool
            .interact(move |conn| {
                model::touch_access_metrics_sync(conn, &touch_user, &memory_ids, &context_ids)
            })
            .await?;

        Ok(results)
    }

    /// Exposed for callers that surface rows through their own queries and
    /// still need the metrics bump.
    pub async fn touch_access_metrics(
        &self,
        memory_ids: Vec<i64>,
        context_ids: Vec<i64>,
    ) -> Result<()> {
        let user_id = self.user_id.clone();
        self.pool
            .interact(move |conn| {
                model::touch_access_metrics_sync(conn, &user_id, &memory_ids, &context_ids)
            })
            .await
    }
}
