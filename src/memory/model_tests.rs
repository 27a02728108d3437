// src/memory/model_tests.rs
// Aggregate model behavior: transactional creates, identity entry
// semantics, cascade removal, access metrics, facets and browsing.

use crate::db::test_support::test_pool;
use crate::memory::types::{
    CreateContextParams, CreateExperienceParams, CreateIdentityParams, CreateMemoryParams,
    CreatePreferenceParams, ExperiencePatch, IdentityPatch, MemoryLayer, MergeStrategy, Patch,
    QueryMemoriesParams, Relationship, UserMemoryPatch,
};
use crate::memory::UserMemoryStore;

fn base_params(title: &str) -> CreateMemoryParams {
    CreateMemoryParams {
        title: Some(title.to_string()),
        summary: Some(format!("summary of {title}")),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_create_and_find_base_memory() {
    let pool = test_pool().await;
    let store = UserMemoryStore::new(pool, "alice");

    let created = store
        .create(MemoryLayer::Context, base_params("first"))
        .await
        .unwrap();
    assert_eq!(created.memory_layer, MemoryLayer::Context);
    assert_eq!(created.accessed_count, 0);

    let found = store.find(created.id).await.unwrap().unwrap();
    assert_eq!(found.title.as_deref(), Some("first"));
}

#[tokio::test]
async fn test_ownership_isolation() {
    let pool = test_pool().await;
    let alice = UserMemoryStore::new(pool.clone(), "alice");
    let mallory = UserMemoryStore::new(pool, "mallory");

    let created = alice
        .create(MemoryLayer::Context, base_params("private"))
        .await
        .unwrap();

    // A foreign owner sees nothing and changes nothing.
    assert!(mallory.find(created.id).await.unwrap().is_none());
    assert!(!mallory.delete(created.id).await.unwrap());
    let patch = UserMemoryPatch {
        title: Patch::Set("stolen".to_string()),
        ..Default::default()
    };
    assert!(!mallory.update(created.id, patch).await.unwrap());

    let still = alice.find(created.id).await.unwrap().unwrap();
    assert_eq!(still.title.as_deref(), Some("private"));
}

#[tokio::test]
async fn test_update_base_partial_and_clear() {
    let pool = test_pool().await;
    let store = UserMemoryStore::new(pool, "alice");
    let created = store
        .create(MemoryLayer::Preference, base_params("prefs"))
        .await
        .unwrap();

    let patch = UserMemoryPatch {
        title: Patch::Set("renamed".to_string()),
        summary: Patch::Clear,
        ..Default::default()
    };
    assert!(store.update(created.id, patch).await.unwrap());

    let updated = store.find(created.id).await.unwrap().unwrap();
    assert_eq!(updated.title.as_deref(), Some("renamed"));
    assert!(updated.summary.is_none());
    // Untouched field survives.
    assert_eq!(updated.memory_layer, MemoryLayer::Preference);
}

#[tokio::test]
async fn test_empty_patch_reports_existence_only() {
    let pool = test_pool().await;
    let store = UserMemoryStore::new(pool, "alice");
    let created = store
        .create(MemoryLayer::Context, base_params("idle"))
        .await
        .unwrap();

    assert!(store.update(created.id, UserMemoryPatch::default()).await.unwrap());
    assert!(!store.update(created.id + 999, UserMemoryPatch::default()).await.unwrap());

    let after = store.find(created.id).await.unwrap().unwrap();
    assert_eq!(after.updated_at, created.updated_at);
}

#[tokio::test]
async fn test_create_experience_memory_links_rows() {
    let pool = test_pool().await;
    let store = UserMemoryStore::new(pool, "alice");

    let (memory, experience) = store
        .create_experience_memory(
            base_params("deploy gone wrong"),
            CreateExperienceParams {
                situation: Some("prod deploy failed".to_string()),
                key_learning: Some("stage first".to_string()),
                score_confidence: Some(0.9),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(memory.memory_layer, MemoryLayer::Experience);
    assert_eq!(experience.user_memory_id, memory.id);
    assert_eq!(experience.score_confidence, Some(0.9));
}

#[tokio::test]
async fn test_create_context_memory_seeds_link_array() {
    let pool = test_pool().await;
    let store = UserMemoryStore::new(pool, "alice");

    let (memory, context) = store
        .create_context_memory(
            base_params("apartment hunt"),
            CreateContextParams {
                title: Some("moving to Lisbon".to_string()),
                current_status: Some("ongoing".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(context.user_memory_ids, vec![memory.id]);
    assert_eq!(context.current_status.as_deref(), Some("ongoing"));
}

#[tokio::test]
async fn test_layered_create_is_atomic() {
    let pool = test_pool().await;
    let store = UserMemoryStore::new(pool.clone(), "alice");

    // Force the extension insert to fail mid-transaction.
    pool.interact(|conn| {
        conn.execute("DROP TABLE user_memory_experiences", [])?;
        Ok(())
    })
    .await
    .unwrap();

    let result = store
        .create_experience_memory(base_params("doomed"), CreateExperienceParams::default())
        .await;
    assert!(result.is_err());

    // The base insert must have rolled back with it.
    let count: i64 = pool
        .interact(|conn| {
            conn.query_row("SELECT COUNT(*) FROM user_memories", [], |row| row.get(0))
                .map_err(Into::into)
        })
        .await
        .unwrap();
    assert_eq!(count, 0, "no orphan base row after failed layered create");
}

#[tokio::test]
async fn test_add_identity_entry_defaults_and_normalization() {
    let pool = test_pool().await;
    let store = UserMemoryStore::new(pool, "alice");

    let (memory, identity) = store
        .add_identity_entry(
            base_params("who I am"),
            CreateIdentityParams {
                description: Some("senior data engineer".to_string()),
                role: Some("engineer".to_string()),
                relationship: Some("  Self ".to_string()),
                identity_type: Some("PROFESSIONAL".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(memory.status.as_deref(), Some("active"));
    assert!(memory.last_accessed_at.is_some());
    assert_eq!(identity.relationship, Some(Relationship::SelfRelation));
    assert_eq!(
        identity.identity_type,
        Some(crate::memory::IdentityType::Professional)
    );
}

#[tokio::test]
async fn test_unknown_relationship_becomes_null() {
    let pool = test_pool().await;
    let store = UserMemoryStore::new(pool, "alice");

    let (_, identity) = store
        .add_identity_entry(
            base_params("pet"),
            CreateIdentityParams {
                relationship: Some("houseplant".to_string()),
                identity_type: Some("botanical".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(identity.relationship.is_none());
    assert!(identity.identity_type.is_none());
}

#[tokio::test]
async fn test_update_identity_entry_merge_keeps_unspecified() {
    let pool = test_pool().await;
    let store = UserMemoryStore::new(pool, "alice");

    let (_, identity) = store
        .add_identity_entry(
            base_params("profile"),
            CreateIdentityParams {
                description: Some("guitarist".to_string()),
                role: Some("musician".to_string()),
                relationship: Some("self".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let updated = store
        .update_identity_entry(
            identity.id,
            None,
            Some(IdentityPatch {
                description: Patch::Set("bassist".to_string()),
                ..Default::default()
            }),
            MergeStrategy::Merge,
        )
        .await
        .unwrap();
    assert!(updated);

    let after = store.find_identity(identity.id).await.unwrap().unwrap();
    assert_eq!(after.description.as_deref(), Some("bassist"));
    assert_eq!(after.role.as_deref(), Some("musician"));
    assert_eq!(after.relationship, Some(Relationship::SelfRelation));
}

#[tokio::test]
async fn test_update_identity_entry_replace_wipes_unspecified() {
    let pool = test_pool().await;
    let store = UserMemoryStore::new(pool, "alice");

    let (_, identity) = store
        .add_identity_entry(
            base_params("profile"),
            CreateIdentityParams {
                description: Some("guitarist".to_string()),
                role: Some("musician".to_string()),
                relationship: Some("self".to_string()),
                episodic_date: Some("2020-01-01".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    store
        .update_identity_entry(
            identity.id,
            None,
            Some(IdentityPatch {
                description: Patch::Set("bassist".to_string()),
                ..Default::default()
            }),
            MergeStrategy::Replace,
        )
        .await
        .unwrap();

    let after = store.find_identity(identity.id).await.unwrap().unwrap();
    assert_eq!(after.description.as_deref(), Some("bassist"));
    // Everything not supplied got reset.
    assert!(after.role.is_none());
    assert!(after.relationship.is_none());
    assert!(after.episodic_date.is_none());
}

#[tokio::test]
async fn test_replace_without_identity_payload_leaves_row_untouched() {
    let pool = test_pool().await;
    let store = UserMemoryStore::new(pool, "alice");

    let (_, identity) = store
        .add_identity_entry(
            base_params("profile"),
            CreateIdentityParams {
                description: Some("guitarist".to_string()),
                role: Some("musician".to_string()),
                relationship: Some("self".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // Base-only update under replace: the identity row is not part of the
    // payload and must survive as-is.
    let updated = store
        .update_identity_entry(
            identity.id,
            Some(UserMemoryPatch {
                title: Patch::Set("renamed profile".to_string()),
                ..Default::default()
            }),
            None,
            MergeStrategy::Replace,
        )
        .await
        .unwrap();
    assert!(updated);

    let after = store.find_identity(identity.id).await.unwrap().unwrap();
    assert_eq!(after.description.as_deref(), Some("guitarist"));
    assert_eq!(after.role.as_deref(), Some("musician"));
    assert_eq!(after.relationship, Some(Relationship::SelfRelation));

    let base = store.find(identity.user_memory_id).await.unwrap().unwrap();
    assert_eq!(base.title.as_deref(), Some("renamed profile"));
}

#[tokio::test]
async fn test_update_identity_entry_foreign_owner_is_not_found() {
    let pool = test_pool().await;
    let alice = UserMemoryStore::new(pool.clone(), "alice");
    let mallory = UserMemoryStore::new(pool, "mallory");

    let (_, identity) = alice
        .add_identity_entry(base_params("profile"), CreateIdentityParams::default())
        .await
        .unwrap();

    let updated = mallory
        .update_identity_entry(identity.id, None, None, MergeStrategy::Merge)
        .await
        .unwrap();
    assert!(!updated);
}

#[tokio::test]
async fn test_remove_identity_entry_cascades_from_base() {
    let pool = test_pool().await;
    let store = UserMemoryStore::new(pool.clone(), "alice");

    let (memory, identity) = store
        .add_identity_entry(base_params("gone"), CreateIdentityParams::default())
        .await
        .unwrap();

    assert!(store.remove_identity_entry(identity.id).await.unwrap());
    assert!(store.find(memory.id).await.unwrap().is_none());
    assert!(store.find_identity(identity.id).await.unwrap().is_none());

    // Second removal is simply "not found".
    assert!(!store.remove_identity_entry(identity.id).await.unwrap());
}

#[tokio::test]
async fn test_remove_context_entry_deletes_linked_bases() {
    let pool = test_pool().await;
    let store = UserMemoryStore::new(pool, "alice");

    let (memory, context) = store
        .create_context_memory(base_params("project"), CreateContextParams::default())
        .await
        .unwrap();
    let unrelated = store
        .create(MemoryLayer::Experience, base_params("unrelated"))
        .await
        .unwrap();

    assert!(store.remove_context_entry(context.id).await.unwrap());
    assert!(store.find(memory.id).await.unwrap().is_none());
    assert!(store.find_context(context.id).await.unwrap().is_none());
    // Unlinked rows survive.
    assert!(store.find(unrelated.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_touch_access_metrics_bumps_base_and_layers() {
    let pool = test_pool().await;
    let store = UserMemoryStore::new(pool, "alice");

    let (memory, experience) = store
        .create_experience_memory(base_params("lesson"), CreateExperienceParams::default())
        .await
        .unwrap();
    let (_, context) = store
        .create_context_memory(base_params("theme"), CreateContextParams::default())
        .await
        .unwrap();

    store
        .touch_access_metrics(vec![memory.id], vec![context.id])
        .await
        .unwrap();
    store
        .touch_access_metrics(vec![memory.id], vec![])
        .await
        .unwrap();

    let base = store.find(memory.id).await.unwrap().unwrap();
    assert_eq!(base.accessed_count, 2);
    assert!(base.accessed_at.is_some());
    assert!(base.last_accessed_at.is_some());

    let exp = store.find_experience(experience.id).await.unwrap().unwrap();
    assert!(exp.accessed_at.is_some());

    let ctx = store.find_context(context.id).await.unwrap().unwrap();
    assert!(ctx.accessed_at.is_some());
}

#[tokio::test]
async fn test_touch_with_empty_input_is_a_noop() {
    let pool = test_pool().await;
    let store = UserMemoryStore::new(pool, "alice");
    let created = store
        .create(MemoryLayer::Context, base_params("quiet"))
        .await
        .unwrap();

    store.touch_access_metrics(vec![], vec![]).await.unwrap();

    let after = store.find(created.id).await.unwrap().unwrap();
    assert_eq!(after.accessed_count, 0);
    assert!(after.accessed_at.is_none());
}

#[tokio::test]
async fn test_touch_is_owner_scoped() {
    let pool = test_pool().await;
    let alice = UserMemoryStore::new(pool.clone(), "alice");
    let mallory = UserMemoryStore::new(pool, "mallory");

    let created = alice
        .create(MemoryLayer::Context, base_params("mine"))
        .await
        .unwrap();

    mallory
        .touch_access_metrics(vec![created.id], vec![])
        .await
        .unwrap();

    let after = alice.find(created.id).await.unwrap().unwrap();
    assert_eq!(after.accessed_count, 0);
}

#[tokio::test]
async fn test_delete_all_clears_only_this_user() {
    let pool = test_pool().await;
    let alice = UserMemoryStore::new(pool.clone(), "alice");
    let bob = UserMemoryStore::new(pool, "bob");

    alice
        .create_context_memory(base_params("a1"), CreateContextParams::default())
        .await
        .unwrap();
    alice
        .create(MemoryLayer::Experience, base_params("a2"))
        .await
        .unwrap();
    let kept = bob
        .create(MemoryLayer::Context, base_params("b1"))
        .await
        .unwrap();

    let deleted = alice.delete_all().await.unwrap();
    assert_eq!(deleted, 2);
    assert!(alice.list_contexts(None).await.unwrap().is_empty());
    assert!(bob.find(kept.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_delete_all_in_layer() {
    let pool = test_pool().await;
    let store = UserMemoryStore::new(pool, "alice");

    let (_, experience) = store
        .create_experience_memory(base_params("e1"), CreateExperienceParams::default())
        .await
        .unwrap();
    let (_, context) = store
        .create_context_memory(base_params("c1"), CreateContextParams::default())
        .await
        .unwrap();

    let deleted = store
        .delete_all_in_layer(MemoryLayer::Experience)
        .await
        .unwrap();
    assert_eq!(deleted, 1);
    assert!(store.find_experience(experience.id).await.unwrap().is_none());
    // Other layers are untouched.
    assert!(store.find_context(context.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_update_experience_entry_patch() {
    let pool = test_pool().await;
    let store = UserMemoryStore::new(pool, "alice");

    let (_, experience) = store
        .create_experience_memory(
            base_params("x"),
            CreateExperienceParams {
                situation: Some("original".to_string()),
                reasoning: Some("why".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let ok = store
        .update_experience_entry(
            experience.id,
            ExperiencePatch {
                situation: Patch::Set("rewritten".to_string()),
                reasoning: Patch::Clear,
                score_confidence: Patch::Set(0.5),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(ok);

    let after = store.find_experience(experience.id).await.unwrap().unwrap();
    assert_eq!(after.situation.as_deref(), Some("rewritten"));
    assert!(after.reasoning.is_none());
    assert_eq!(after.score_confidence, Some(0.5));
}

#[tokio::test]
async fn test_query_tags_frequencies_and_layer_filter() {
    let pool = test_pool().await;
    let store = UserMemoryStore::new(pool, "alice");

    for (layer, tags) in [
        (MemoryLayer::Context, vec!["travel", "work"]),
        (MemoryLayer::Context, vec!["travel", ""]),
        (MemoryLayer::Experience, vec!["work"]),
    ] {
        let params = CreateMemoryParams {
            tags: Some(tags.into_iter().map(String::from).collect()),
            ..base_params("tagged")
        };
        store.create(layer, params).await.unwrap();
    }

    let all = store.query_tags(None, 1, 10).await.unwrap();
    let travel = all.iter().find(|t| t.tag == "travel").unwrap();
    let work = all.iter().find(|t| t.tag == "work").unwrap();
    assert_eq!(travel.count, 2);
    assert_eq!(work.count, 2);
    assert!(all.iter().all(|t| !t.tag.trim().is_empty()));

    let contexts_only = store
        .query_tags(Some(vec![MemoryLayer::Context]), 1, 10)
        .await
        .unwrap();
    let work = contexts_only.iter().find(|t| t.tag == "work").unwrap();
    assert_eq!(work.count, 1);
}

#[tokio::test]
async fn test_query_identity_facets() {
    let pool = test_pool().await;
    let store = UserMemoryStore::new(pool, "alice");

    for role in ["engineer", "engineer", "parent"] {
        store
            .add_identity_entry(
                base_params("id"),
                CreateIdentityParams {
                    role: Some(role.to_string()),
                    tags: Some(vec!["core".to_string()]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }

    let facets = store.query_identity_facets(1, 10).await.unwrap();
    assert_eq!(facets.roles[0].role, "engineer");
    assert_eq!(facets.roles[0].count, 2);
    assert_eq!(facets.tags[0].tag, "core");
    assert_eq!(facets.tags[0].count, 3);
}

#[tokio::test]
async fn test_query_memories_pagination_and_keyword() {
    let pool = test_pool().await;
    let store = UserMemoryStore::new(pool, "alice");

    for i in 0..5 {
        store
            .create_experience_memory(
                base_params(&format!("lesson {i}")),
                CreateExperienceParams {
                    situation: Some("s".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }

    let page = store
        .query_memories(QueryMemoriesParams {
            layer: MemoryLayer::Experience,
            q: None,
            categories: None,
            types: None,
            tags: None,
            sort: None,
            order: None,
            page: 1,
            page_size: 2,
        })
        .await
        .unwrap();
    assert_eq!(page.total, 5);
    assert_eq!(page.items.len(), 2);
    assert!(page.items[0].layer_detail.is_some());

    let filtered = store
        .query_memories(QueryMemoriesParams {
            layer: MemoryLayer::Experience,
            q: Some("lesson 3".to_string()),
            categories: None,
            types: None,
            tags: None,
            sort: None,
            order: None,
            page: 1,
            page_size: 10,
        })
        .await
        .unwrap();
    assert_eq!(filtered.total, 1);
    assert_eq!(filtered.items[0].memory.title.as_deref(), Some("lesson 3"));
}

#[tokio::test]
async fn test_list_identities_by_type() {
    let pool = test_pool().await;
    let store = UserMemoryStore::new(pool, "alice");

    for ty in ["personal", "professional", "professional"] {
        store
            .add_identity_entry(
                base_params("id"),
                CreateIdentityParams {
                    identity_type: Some(ty.to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }

    let pros = store
        .list_identities_by_type(crate::memory::IdentityType::Professional, None)
        .await
        .unwrap();
    assert_eq!(pros.len(), 2);
    assert_eq!(store.list_identities(None).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_create_preference_memory() {
    let pool = test_pool().await;
    let store = UserMemoryStore::new(pool, "alice");

    let (memory, preference) = store
        .create_preference_memory(
            base_params("tabs or spaces"),
            CreatePreferenceParams {
                conclusion_directives: Some("always spaces".to_string()),
                suggestions: Some(vec!["configure rustfmt".to_string()]),
                score_priority: Some(0.7),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(memory.memory_layer, MemoryLayer::Preference);
    assert_eq!(preference.user_memory_id, memory.id);
    assert_eq!(
        preference.suggestions.as_deref(),
        Some(&["configure rustfmt".to_string()][..])
    );
}
