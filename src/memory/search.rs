// src/memory/search.rs
// Per-layer retrieval. With a query embedding, rows rank by cosine
// similarity over the layer's primary vector (contexts: description,
// experiences: situation, preferences: conclusion_directives); rows with no
// stored vector carry a NULL similarity and sort last. Without an embedding,
// ordering falls back to created_at.

use anyhow::Result;
use rusqlite::{params_from_iter, Connection, Row, ToSql};

use crate::db::vector::embedding_to_bytes;
use crate::memory::layers::{
    context_from_row, experience_from_row, identity_from_row, preference_from_row,
    CONTEXT_COLUMNS, EXPERIENCE_COLUMNS, IDENTITY_COLUMNS, PREFERENCE_COLUMNS,
};
use crate::memory::types::{
    ContextMemory, ExperienceMemory, IdentityMemory, PreferenceMemory, Scored,
};

pub fn search_contexts_sync(
    conn: &Connection,
    user_id: &str,
    embedding: Option<&[f32]>,
    limit: i64,
    type_filter: Option<&str>,
) -> Result<Vec<Scored<ContextMemory>>> {
    search_layer(
        conn,
        "user_memory_contexts",
        CONTEXT_COLUMNS,
        "description_vector",
        16,
        user_id,
        embedding,
        limit,
        type_filter,
        context_from_row,
    )
}

pub fn search_experiences_sync(
    conn: &Connection,
    user_id: &str,
    embedding: Option<&[f32]>,
    limit: i64,
    type_filter: Option<&str>,
) -> Result<Vec<Scored<ExperienceMemory>>> {
    search_layer(
        conn,
        "user_memory_experiences",
        EXPERIENCE_COLUMNS,
        "situation_vector",
        15,
        user_id,
        embedding,
        limit,
        type_filter,
        experience_from_row,
    )
}

pub fn search_preferences_sync(
    conn: &Connection,
    user_id: &str,
    embedding: Option<&[f32]>,
    limit: i64,
    type_filter: Option<&str>,
) -> Result<Vec<Scored<PreferenceMemory>>> {
    search_layer(
        conn,
        "user_memory_preferences",
        PREFERENCE_COLUMNS,
        "conclusion_directives_vector",
        12,
        user_id,
        embedding,
        limit,
        type_filter,
        preference_from_row,
    )
}

#[allow(clippy::too_many_arguments)]
fn search_layer<T>(
    conn: &Connection,
    table: &str,
    columns: &str,
    vector_col: &str,
    similarity_idx: usize,
    user_id: &str,
    embedding: Option<&[f32]>,
    limit: i64,
    type_filter: Option<&str>,
    map: fn(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<Vec<Scored<T>>> {
    // A non-positive budget means the layer was opted out of; issue nothing.
    if limit <= 0 {
        return Ok(Vec::new());
    }

    let mut args: Vec<Box<dyn ToSql>> = Vec::new();
    let similarity_expr = match embedding {
        Some(vec) => {
            args.push(Box::new(embedding_to_bytes(vec)));
            format!(
                "CASE WHEN {vector_col} IS NULL THEN NULL \
                 ELSE 1.0 - vec_distance_cosine({vector_col}, ?) END"
            )
        }
        None => "NULL".to_string(),
    };

    let mut sql = format!(
        "SELECT {columns}, {similarity_expr} AS similarity FROM {table} WHERE user_id = ?"
    );
    args.push(Box::new(user_id.to_string()));
    if let Some(t) = type_filter {
        sql.push_str(" AND type = ?");
        args.push(Box::new(t.to_string()));
    }
    // NULL similarities sort after every scored row under DESC.
    if embedding.is_some() {
        sql.push_str(" ORDER BY similarity DESC, created_at DESC");
    } else {
        sql.push_str(" ORDER BY created_at DESC, id DESC");
    }
    sql.push_str(&format!(" LIMIT {limit}"));

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(args.iter().map(|a| a.as_ref())))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let item = map(row)?;
        let similarity: Option<f64> = row.get(similarity_idx)?;
        out.push(Scored { similarity, item });
    }
    Ok(out)
}

/// Identity entries safe to inject into a conversation: only rows whose
/// relationship is 'self' or unclassified (NULL). Ordered by captured_at,
/// newest first.
pub fn query_identities_for_injection_sync(
    conn: &Connection,
    user_id: &str,
    limit: i64,
) -> Result<Vec<IdentityMemory>> {
    if limit <= 0 {
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare(&format!(
        "SELECT {IDENTITY_COLUMNS} FROM user_memory_identities \
         WHERE user_id = ? AND (relationship = 'self' OR relationship IS NULL) \
         ORDER BY captured_at DESC, id DESC LIMIT {limit}"
    ))?;
    let rows = stmt.query_map([user_id], identity_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}
