// src/memory/model.rs
// Aggregate operations spanning the base table and the layer tables.
//
// Every mutating operation here runs in a single transaction on the caller's
// connection, so a failed extension insert never strands a base row.

use std::collections::HashMap;

use anyhow::Result;
use rusqlite::{params, params_from_iter, Connection, ToSql};

use crate::memory::base::{
    create_user_memory_sync, update_user_memory_sync, user_memory_from_row, BASE_COLUMNS,
};
use crate::memory::layers::{
    apply_identity_patch_sync, find_context_sync, find_experience_sync, find_identity_sync,
    find_preference_sync, insert_context_sync, insert_experience_sync, insert_identity_sync,
    insert_preference_sync,
};
use crate::memory::types::{
    now_rfc3339, ContextMemory, CreateContextParams, CreateExperienceParams, CreateIdentityParams,
    CreateMemoryParams, CreatePreferenceParams, ExperienceMemory, IdentityFacets, IdentityMemory,
    IdentityPatch, MemoryLayer, MemoryListItem, MemoryPage, MemorySort, MergeStrategy, Patch,
    PreferenceMemory, QueryMemoriesParams, RoleCount, SortOrder, TagCount, UserMemory,
    UserMemoryPatch,
};

// ---------------------------------------------------------------------------
// Transactional creates
// ---------------------------------------------------------------------------

/// Create a context memory: base row plus a context row seeded with the new
/// base id, atomically.
pub fn create_context_memory_sync(
    conn: &Connection,
    user_id: &str,
    base: &CreateMemoryParams,
    context: &CreateContextParams,
) -> Result<(UserMemory, ContextMemory)> {
    let tx = conn.unchecked_transaction()?;
    let memory = create_user_memory_sync(&tx, user_id, MemoryLayer::Context, base)?;
    let context_id = insert_context_sync(&tx, user_id, &[memory.id], context)?;
    let row = find_context_sync(&tx, user_id, context_id)?
        .ok_or_else(|| anyhow::anyhow!("inserted context {context_id} not found"))?;
    tx.commit()?;
    Ok((memory, row))
}

pub fn create_experience_memory_sync(
    conn: &Connection,
    user_id: &str,
    base: &CreateMemoryParams,
    experience: &CreateExperienceParams,
) -> Result<(UserMemory, ExperienceMemory)> {
    let tx = conn.unchecked_transaction()?;
    let memory = create_user_memory_sync(&tx, user_id, MemoryLayer::Experience, base)?;
    let experience_id = insert_experience_sync(&tx, user_id, memory.id, experience)?;
    let row = find_experience_sync(&tx, user_id, experience_id)?
        .ok_or_else(|| anyhow::anyhow!("inserted experience {experience_id} not found"))?;
    tx.commit()?;
    Ok((memory, row))
}

pub fn create_preference_memory_sync(
    conn: &Connection,
    user_id: &str,
    base: &CreateMemoryParams,
    preference: &CreatePreferenceParams,
) -> Result<(UserMemory, PreferenceMemory)> {
    let tx = conn.unchecked_transaction()?;
    let memory = create_user_memory_sync(&tx, user_id, MemoryLayer::Preference, base)?;
    let preference_id = insert_preference_sync(&tx, user_id, memory.id, preference)?;
    let row = find_preference_sync(&tx, user_id, preference_id)?
        .ok_or_else(|| anyhow::anyhow!("inserted preference {preference_id} not found"))?;
    tx.commit()?;
    Ok((memory, row))
}

// ---------------------------------------------------------------------------
// Identity entries
// ---------------------------------------------------------------------------

/// Create an identity memory. The base row defaults to status 'active' and a
/// fresh last_accessed_at; relationship and type normalize at write time.
pub fn add_identity_entry_sync(
    conn: &Connection,
    user_id: &str,
    base: &CreateMemoryParams,
    identity: &CreateIdentityParams,
) -> Result<(UserMemory, IdentityMemory)> {
    let now = now_rfc3339();
    let mut base = base.clone();
    if base.status.is_none() {
        base.status = Some("active".to_string());
    }

    let tx = conn.unchecked_transaction()?;
    let mut memory = create_user_memory_sync(&tx, user_id, MemoryLayer::Identity, &base)?;
    tx.execute(
        "UPDATE user_memories SET last_accessed_at = ? WHERE id = ?",
        params![now, memory.id],
    )?;
    memory.last_accessed_at = Some(now);
    let identity_id = insert_identity_sync(&tx, user_id, memory.id, identity)?;
    let row = find_identity_sync(&tx, user_id, identity_id)?
        .ok_or_else(|| anyhow::anyhow!("inserted identity {identity_id} not found"))?;
    tx.commit()?;
    Ok((memory, row))
}

/// Update an identity entry and optionally its base row.
///
/// Under `Merge` only supplied fields change. Under `Replace` every identity
/// field absent from the patch is reset to NULL; the base patch always
/// applies field-by-field. Returns false when the identity does not exist
/// for this owner.
pub fn update_identity_entry_sync(
    conn: &Connection,
    user_id: &str,
    identity_id: i64,
    base_patch: Option<&UserMemoryPatch>,
    identity_patch: Option<&IdentityPatch>,
    strategy: MergeStrategy,
) -> Result<bool> {
    let tx = conn.unchecked_transaction()?;
    let Some(existing) = find_identity_sync(&tx, user_id, identity_id)? else {
        return Ok(false);
    };

    if let Some(patch) = base_patch {
        update_user_memory_sync(&tx, user_id, existing.user_memory_id, patch)?;
    }

    // The identity row only changes when an identity payload was supplied;
    // a base-only update leaves it alone even under replace.
    if let Some(patch) = identity_patch {
        let effective = match strategy {
            MergeStrategy::Merge => patch.clone(),
            // Absent fields wipe to NULL under replace.
            MergeStrategy::Replace => replace_patch(patch.clone()),
        };
        apply_identity_patch_sync(&tx, user_id, identity_id, &effective)?;
    }
    tx.commit()?;
    Ok(true)
}

fn replace_patch(patch: IdentityPatch) -> IdentityPatch {
    fn widen<T>(p: Patch<T>) -> Patch<T> {
        match p {
            Patch::Keep => Patch::Clear,
            other => other,
        }
    }
    IdentityPatch {
        description: widen(patch.description),
        role: widen(patch.role),
        relationship: widen(patch.relationship),
        identity_type: widen(patch.identity_type),
        episodic_date: widen(patch.episodic_date),
        tags: widen(patch.tags),
        metadata: widen(patch.metadata),
        captured_at: widen(patch.captured_at),
    }
}

// ---------------------------------------------------------------------------
// Access metrics
// ---------------------------------------------------------------------------

/// Bump access metrics for surfaced rows: accessed_count and both access
/// stamps on base rows, accessed_at on the matching extension rows (grouped
/// by layer) and on the touched context rows. Runs in its own transaction;
/// empty inputs issue nothing.
pub fn touch_access_metrics_sync(
    conn: &Connection,
    user_id: &str,
    memory_ids: &[i64],
    context_ids: &[i64],
) -> Result<()> {
    if memory_ids.is_empty() && context_ids.is_empty() {
        return Ok(());
    }
    let now = now_rfc3339();
    let tx = conn.unchecked_transaction()?;

    if !memory_ids.is_empty() {
        let ph = placeholders(memory_ids.len());
        let mut args: Vec<Box<dyn ToSql>> = vec![
            Box::new(now.clone()),
            Box::new(now.clone()),
            Box::new(now.clone()),
        ];
        args.extend(memory_ids.iter().map(|id| Box::new(*id) as Box<dyn ToSql>));
        args.push(Box::new(user_id.to_string()));
        tx.execute(
            &format!(
                "UPDATE user_memories SET accessed_count = accessed_count + 1, accessed_at = ?, \
                 last_accessed_at = ?, updated_at = ? WHERE id IN ({ph}) AND user_id = ?"
            ),
            params_from_iter(args.iter().map(|a| a.as_ref())),
        )?;

        // Propagate accessed_at to the extension row of each touched base
        // row, grouped by layer.
        let mut by_layer: HashMap<MemoryLayer, Vec<i64>> = HashMap::new();
        {
            let mut stmt = tx.prepare(&format!(
                "SELECT id, memory_layer FROM user_memories WHERE id IN ({ph}) AND user_id = ?"
            ))?;
            let mut sel_args: Vec<Box<dyn ToSql>> = memory_ids
                .iter()
                .map(|id| Box::new(*id) as Box<dyn ToSql>)
                .collect();
            sel_args.push(Box::new(user_id.to_string()));
            let mut rows = stmt.query(params_from_iter(sel_args.iter().map(|a| a.as_ref())))?;
            while let Some(row) = rows.next()? {
                let id: i64 = row.get(0)?;
                let layer_raw: String = row.get(1)?;
                if let Ok(layer) = layer_raw.parse::<MemoryLayer>() {
                    by_layer.entry(layer).or_default().push(id);
                }
            }
        }
        for (layer, ids) in &by_layer {
            let table = match layer {
                MemoryLayer::Identity => "user_memory_identities",
                MemoryLayer::Experience => "user_memory_experiences",
                MemoryLayer::Preference => "user_memory_preferences",
                // Context base rows have no 1:1 extension; the context rows
                // themselves are bumped below via context_ids.
                MemoryLayer::Context => continue,
            };
            let ph = placeholders(ids.len());
            let mut args: Vec<Box<dyn ToSql>> = vec![Box::new(now.clone())];
            args.extend(ids.iter().map(|id| Box::new(*id) as Box<dyn ToSql>));
            args.push(Box::new(user_id.to_string()));
            tx.execute(
                &format!(
                    "UPDATE {table} SET accessed_at = ? \
                     WHERE user_memory_id IN ({ph}) AND user_id = ?"
                ),
                params_from_iter(args.iter().map(|a| a.as_ref())),
            )?;
        }
    }

    if !context_ids.is_empty() {
        let ph = placeholders(context_ids.len());
        let mut args: Vec<Box<dyn ToSql>> = vec![Box::new(now.clone())];
        args.extend(context_ids.iter().map(|id| Box::new(*id) as Box<dyn ToSql>));
        args.push(Box::new(user_id.to_string()));
        tx.execute(
            &format!(
                "UPDATE user_memory_contexts SET accessed_at = ? WHERE id IN ({ph}) AND user_id = ?"
            ),
            params_from_iter(args.iter().map(|a| a.as_ref())),
        )?;
    }

    tx.commit()?;
    Ok(())
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

// ---------------------------------------------------------------------------
// Facets
// ---------------------------------------------------------------------------

/// Tag frequencies across base rows, optionally restricted to layers.
/// Empty and whitespace-only tags are ignored.
pub fn query_tags_sync(
    conn: &Connection,
    user_id: &str,
    layers: Option<&[MemoryLayer]>,
    page: i64,
    size: i64,
) -> Result<Vec<TagCount>> {
    let mut sql = String::from(
        "SELECT je.value AS tag, COUNT(*) AS n \
         FROM user_memories m, json_each(m.tags) je \
         WHERE m.user_id = ? AND TRIM(je.value) != ''",
    );
    let mut args: Vec<Box<dyn ToSql>> = vec![Box::new(user_id.to_string())];
    if let Some(layers) = layers {
        if !layers.is_empty() {
            sql.push_str(&format!(
                " AND m.memory_layer IN ({})",
                placeholders(layers.len())
            ));
            args.extend(
                layers
                    .iter()
                    .map(|l| Box::new(l.as_ref().to_string()) as Box<dyn ToSql>),
            );
        }
    }
    sql.push_str(" GROUP BY je.value ORDER BY n DESC, tag ASC LIMIT ? OFFSET ?");
    let (limit, offset) = page_window(page, size);
    args.push(Box::new(limit));
    args.push(Box::new(offset));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(args.iter().map(|a| a.as_ref())), |row| {
        Ok(TagCount {
            tag: row.get(0)?,
            count: row.get(1)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Tag and role frequencies over the identity layer.
pub fn query_identity_facets_sync(
    conn: &Connection,
    user_id: &str,
    page: i64,
    size: i64,
) -> Result<IdentityFacets> {
    let (limit, offset) = page_window(page, size);

    let mut stmt = conn.prepare(
        "SELECT je.value AS tag, COUNT(*) AS n \
         FROM user_memory_identities i, json_each(i.tags) je \
         WHERE i.user_id = ? AND TRIM(je.value) != '' \
         GROUP BY je.value ORDER BY n DESC, tag ASC LIMIT ? OFFSET ?",
    )?;
    let tags = stmt
        .query_map(params![user_id, limit, offset], |row| {
            Ok(TagCount {
                tag: row.get(0)?,
                count: row.get(1)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut stmt = conn.prepare(
        "SELECT role, COUNT(*) AS n FROM user_memory_identities \
         WHERE user_id = ? AND role IS NOT NULL AND TRIM(role) != '' \
         GROUP BY role ORDER BY n DESC, role ASC LIMIT ? OFFSET ?",
    )?;
    let roles = stmt
        .query_map(params![user_id, limit, offset], |row| {
            Ok(RoleCount {
                role: row.get(0)?,
                count: row.get(1)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(IdentityFacets { tags, roles })
}

fn page_window(page: i64, size: i64) -> (i64, i64) {
    let size = size.max(1);
    let page = page.max(1);
    (size, (page - 1) * size)
}

// ---------------------------------------------------------------------------
// Paginated browse
// ---------------------------------------------------------------------------

/// One page of base rows for a layer, each joined with a JSON snapshot of
/// its layer row. Context rows join through json_each membership.
pub fn query_memories_sync(
    conn: &Connection,
    user_id: &str,
    q: &QueryMemoriesParams,
) -> Result<MemoryPage> {
    let mut wheres = vec![
        "m.user_id = ?".to_string(),
        "m.memory_layer = ?".to_string(),
    ];
    let mut args: Vec<Box<dyn ToSql>> = vec![
        Box::new(user_id.to_string()),
        Box::new(q.layer.as_ref().to_string()),
    ];

    if let Some(keyword) = q.q.as_deref().filter(|s| !s.trim().is_empty()) {
        wheres.push("(m.title LIKE ? OR m.summary LIKE ? OR m.details LIKE ?)".to_string());
        let like = format!("%{}%", keyword.trim());
        for _ in 0..3 {
            args.push(Box::new(like.clone()));
        }
    }
    if let Some(categories) = q.categories.as_deref().filter(|c| !c.is_empty()) {
        wheres.push(format!(
            "m.memory_category IN ({})",
            placeholders(categories.len())
        ));
        args.extend(
            categories
                .iter()
                .map(|c| Box::new(c.clone()) as Box<dyn ToSql>),
        );
    }
    if let Some(types) = q.types.as_deref().filter(|t| !t.is_empty()) {
        wheres.push(format!("m.memory_type IN ({})", placeholders(types.len())));
        args.extend(types.iter().map(|t| Box::new(t.clone()) as Box<dyn ToSql>));
    }
    if let Some(tags) = q.tags.as_deref().filter(|t| !t.is_empty()) {
        wheres.push(format!(
            "EXISTS (SELECT 1 FROM json_each(m.tags) WHERE value IN ({}))",
            placeholders(tags.len())
        ));
        args.extend(tags.iter().map(|t| Box::new(t.clone()) as Box<dyn ToSql>));
    }

    let where_sql = wheres.join(" AND ");

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM user_memories m WHERE {where_sql}"),
        params_from_iter(args.iter().map(|a| a.as_ref())),
        |row| row.get(0),
    )?;

    let order = match q.order {
        Some(SortOrder::Asc) => "ASC",
        _ => "DESC",
    };
    let order_expr = order_expression(q.sort, q.layer);
    let detail_expr = layer_detail_expression(q.layer);

    let (limit, offset) = page_window(q.page, q.page_size);
    let sql = format!(
        "SELECT {base_cols}, {detail_expr} AS layer_detail \
         FROM user_memories m WHERE {where_sql} \
         ORDER BY {order_expr} {order}, m.id DESC LIMIT {limit} OFFSET {offset}",
        base_cols = BASE_COLUMNS
            .split(", ")
            .map(|c| format!("m.{c}"))
            .collect::<Vec<_>>()
            .join(", "),
    );

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(args.iter().map(|a| a.as_ref())))?;
    let mut items = Vec::new();
    while let Some(row) = rows.next()? {
        let memory = user_memory_from_row(row)?;
        let detail_json: Option<String> = row.get(17)?;
        items.push(MemoryListItem {
            memory,
            layer_detail: detail_json.and_then(|s| serde_json::from_str(&s).ok()),
        });
    }

    Ok(MemoryPage {
        items,
        total,
        page: q.page.max(1),
        page_size: limit,
    })
}

fn order_expression(sort: Option<MemorySort>, layer: MemoryLayer) -> String {
    use MemorySort::*;
    match sort {
        None => "m.created_at".to_string(),
        Some(CreatedAt) => "m.created_at".to_string(),
        Some(UpdatedAt) => "m.updated_at".to_string(),
        Some(CapturedAt) => "m.captured_at".to_string(),
        Some(AccessedCount) => "m.accessed_count".to_string(),
        Some(ScoreConfidence) => score_expr(layer, MemoryLayer::Experience, "user_memory_experiences", "score_confidence"),
        Some(ScorePriority) => score_expr(layer, MemoryLayer::Preference, "user_memory_preferences", "score_priority"),
        Some(ScoreImpact) => context_score_expr(layer, "score_impact"),
        Some(ScoreUrgency) => context_score_expr(layer, "score_urgency"),
    }
}

fn score_expr(layer: MemoryLayer, expected: MemoryLayer, table: &str, col: &str) -> String {
    if layer == expected {
        format!("(SELECT e.{col} FROM {table} e WHERE e.user_memory_id = m.id LIMIT 1)")
    } else {
        // Score column does not apply to this layer; fall back to recency.
        "m.created_at".to_string()
    }
}

fn context_score_expr(layer: MemoryLayer, col: &str) -> String {
    if layer == MemoryLayer::Context {
        format!(
            "(SELECT c.{col} FROM user_memory_contexts c, json_each(c.user_memory_ids) je \
             WHERE je.value = m.id AND c.user_id = m.user_id LIMIT 1)"
        )
    } else {
        "m.created_at".to_string()
    }
}

fn layer_detail_expression(layer: MemoryLayer) -> String {
    match layer {
        MemoryLayer::Identity => "(SELECT json_object('id', i.id, 'description', i.description, \
             'role', i.role, 'relationship', i.relationship, 'type', i.type, \
             'episodicDate', i.episodic_date) \
             FROM user_memory_identities i WHERE i.user_memory_id = m.id LIMIT 1)"
            .to_string(),
        MemoryLayer::Experience => "(SELECT json_object('id', e.id, 'situation', e.situation, \
             'action', e.action, 'keyLearning', e.key_learning, \
             'scoreConfidence', e.score_confidence, 'type', e.type) \
             FROM user_memory_experiences e WHERE e.user_memory_id = m.id LIMIT 1)"
            .to_string(),
        MemoryLayer::Preference => "(SELECT json_object('id', p.id, \
             'conclusionDirectives', p.conclusion_directives, \
             'scorePriority', p.score_priority, 'type', p.type) \
             FROM user_memory_preferences p WHERE p.user_memory_id = m.id LIMIT 1)"
            .to_string(),
        MemoryLayer::Context => "(SELECT json_object('id', c.id, 'title', c.title, \
             'type', c.type, 'currentStatus', c.current_status, \
             'scoreImpact', c.score_impact, 'scoreUrgency', c.score_urgency) \
             FROM user_memory_contexts c, json_each(c.user_memory_ids) je \
             WHERE je.value = m.id AND c.user_id = m.user_id LIMIT 1)"
            .to_string(),
    }
}

