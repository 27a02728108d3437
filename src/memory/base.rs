// src/memory/base.rs
// Base user_memories store: CRUD plus vector-column updates.
//
// Every query is scoped by user_id. A row owned by someone else is
// indistinguishable from a missing row (None / false), never an error.

use anyhow::Result;
use rusqlite::{params, params_from_iter, Connection, Row, ToSql};

use crate::db::vector::embedding_to_bytes;
use crate::memory::types::{
    json_from_sql, json_to_sql, now_rfc3339, BaseVectorsPatch, ContextVectorsPatch,
    CreateMemoryParams, ExperienceVectorsPatch, IdentityVectorsPatch, MemoryLayer, Patch,
    PreferenceVectorsPatch, UserMemory, UserMemoryPatch,
};

pub(crate) const BASE_COLUMNS: &str = "id, user_id, title, summary, details, memory_layer, \
     memory_type, memory_category, tags, metadata, status, captured_at, accessed_at, \
     accessed_count, last_accessed_at, created_at, updated_at";

pub(crate) fn user_memory_from_row(row: &Row<'_>) -> rusqlite::Result<UserMemory> {
    let layer_raw: String = row.get(5)?;
    let memory_layer: MemoryLayer = layer_raw.parse().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            5,
            rusqlite::types::Type::Text,
            format!("unknown memory layer: {layer_raw}").into(),
        )
    })?;
    Ok(UserMemory {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        summary: row.get(3)?,
        details: row.get(4)?,
        memory_layer,
        memory_type: row.get(6)?,
        memory_category: row.get(7)?,
        tags: json_from_sql(row.get(8)?),
        metadata: json_from_sql(row.get(9)?),
        status: row.get(10)?,
        captured_at: row.get(11)?,
        accessed_at: row.get(12)?,
        accessed_count: row.get(13)?,
        last_accessed_at: row.get(14)?,
        created_at: row.get(15)?,
        updated_at: row.get(16)?,
    })
}

/// Insert a base row for the given layer and return it.
pub fn create_user_memory_sync(
    conn: &Connection,
    user_id: &str,
    layer: MemoryLayer,
    params_in: &CreateMemoryParams,
) -> Result<UserMemory> {
    let now = now_rfc3339();
    conn.execute(
        "INSERT INTO user_memories (user_id, title, summary, details, summary_vector, \
         details_vector, memory_layer, memory_type, memory_category, tags, metadata, status, \
         captured_at, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            user_id,
            params_in.title,
            params_in.summary,
            params_in.details,
            params_in.summary_vector.as_deref().map(embedding_to_bytes),
            params_in.details_vector.as_deref().map(embedding_to_bytes),
            layer.as_ref(),
            params_in.memory_type,
            params_in.memory_category,
            json_to_sql(&params_in.tags),
            json_to_sql(&params_in.metadata),
            params_in.status,
            params_in.captured_at,
            now,
            now,
        ],
    )?;
    let id = conn.last_insert_rowid();
    find_user_memory_sync(conn, user_id, id)?
        .ok_or_else(|| anyhow::anyhow!("inserted memory {id} not found"))
}

pub fn find_user_memory_sync(
    conn: &Connection,
    user_id: &str,
    id: i64,
) -> Result<Option<UserMemory>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BASE_COLUMNS} FROM user_memories WHERE id = ? AND user_id = ?"
    ))?;
    let mut rows = stmt.query(params![id, user_id])?;
    match rows.next()? {
        Some(row) => Ok(Some(user_memory_from_row(row)?)),
        None => Ok(None),
    }
}

/// Partial update of a base row. Returns false when the row does not exist
/// for this owner. An all-Keep patch issues no UPDATE at all.
pub fn update_user_memory_sync(
    conn: &Connection,
    user_id: &str,
    id: i64,
    patch: &UserMemoryPatch,
) -> Result<bool> {
    if patch.is_empty() {
        return Ok(find_user_memory_sync(conn, user_id, id)?.is_some());
    }

    let mut sets: Vec<String> = Vec::new();
    let mut args: Vec<Box<dyn ToSql>> = Vec::new();
    push_text_patch(&mut sets, &mut args, "title", &patch.title);
    push_text_patch(&mut sets, &mut args, "summary", &patch.summary);
    push_text_patch(&mut sets, &mut args, "details", &patch.details);
    push_text_patch(&mut sets, &mut args, "memory_type", &patch.memory_type);
    push_text_patch(&mut sets, &mut args, "memory_category", &patch.memory_category);
    push_json_patch(&mut sets, &mut args, "tags", &patch.tags);
    push_json_patch(&mut sets, &mut args, "metadata", &patch.metadata);
    push_text_patch(&mut sets, &mut args, "status", &patch.status);
    push_text_patch(&mut sets, &mut args, "captured_at", &patch.captured_at);

    sets.push("updated_at = ?".to_string());
    args.push(Box::new(now_rfc3339()));
    args.push(Box::new(id));
    args.push(Box::new(user_id.to_string()));

    let sql = format!(
        "UPDATE user_memories SET {} WHERE id = ? AND user_id = ?",
        sets.join(", ")
    );
    let changed = conn.execute(&sql, params_from_iter(args.iter().map(|a| a.as_ref())))?;
    Ok(changed > 0)
}

/// Delete a base row. FK cascade removes its 1:1 extension row.
pub fn delete_user_memory_sync(conn: &Connection, user_id: &str, id: i64) -> Result<bool> {
    let changed = conn.execute(
        "DELETE FROM user_memories WHERE id = ? AND user_id = ?",
        params![id, user_id],
    )?;
    Ok(changed > 0)
}

/// Wipe everything this user owns. Context rows have no FK to the base
/// table, so they are cleared explicitly in the same transaction.
pub fn delete_all_user_memories_sync(conn: &Connection, user_id: &str) -> Result<u64> {
    let tx = conn.unchecked_transaction()?;
    let base = tx.execute("DELETE FROM user_memories WHERE user_id = ?", [user_id])?;
    tx.execute(
        "DELETE FROM user_memory_contexts WHERE user_id = ?",
        [user_id],
    )?;
    tx.commit()?;
    tracing::debug!(user_id, deleted = base, "cleared all user memories");
    Ok(base as u64)
}

// ---------------------------------------------------------------------------
// Vector updates
// ---------------------------------------------------------------------------

pub fn update_base_vectors_sync(
    conn: &Connection,
    user_id: &str,
    id: i64,
    patch: &BaseVectorsPatch,
) -> Result<bool> {
    let mut sets: Vec<String> = Vec::new();
    let mut args: Vec<Box<dyn ToSql>> = Vec::new();
    push_vector_patch(&mut sets, &mut args, "summary_vector", &patch.summary_vector);
    push_vector_patch(&mut sets, &mut args, "details_vector", &patch.details_vector);
    run_vector_update(conn, "user_memories", user_id, id, sets, args)
}

pub fn update_identity_vectors_sync(
    conn: &Connection,
    user_id: &str,
    identity_id: i64,
    patch: &IdentityVectorsPatch,
) -> Result<bool> {
    let mut sets: Vec<String> = Vec::new();
    let mut args: Vec<Box<dyn ToSql>> = Vec::new();
    push_vector_patch(
        &mut sets,
        &mut args,
        "description_vector",
        &patch.description_vector,
    );
    run_vector_update(conn, "user_memory_identities", user_id, identity_id, sets, args)
}

pub fn update_experience_vectors_sync(
    conn: &Connection,
    user_id: &str,
    experience_id: i64,
    patch: &ExperienceVectorsPatch,
) -> Result<bool> {
    let mut sets: Vec<String> = Vec::new();
    let mut args: Vec<Box<dyn ToSql>> = Vec::new();
    push_vector_patch(&mut sets, &mut args, "situation_vector", &patch.situation_vector);
    push_vector_patch(&mut sets, &mut args, "action_vector", &patch.action_vector);
    push_vector_patch(
        &mut sets,
        &mut args,
        "key_learning_vector",
        &patch.key_learning_vector,
    );
    run_vector_update(conn, "user_memory_experiences", user_id, experience_id, sets, args)
}

pub fn update_preference_vectors_sync(
    conn: &Connection,
    user_id: &str,
    preference_id: i64,
    patch: &PreferenceVectorsPatch,
) -> Result<bool> {
    let mut sets: Vec<String> = Vec::new();
    let mut args: Vec<Box<dyn ToSql>> = Vec::new();
    push_vector_patch(
        &mut sets,
        &mut args,
        "conclusion_directives_vector",
        &patch.conclusion_directives_vector,
    );
    run_vector_update(conn, "user_memory_preferences", user_id, preference_id, sets, args)
}

pub fn update_context_vectors_sync(
    conn: &Connection,
    user_id: &str,
    context_id: i64,
    patch: &ContextVectorsPatch,
) -> Result<bool> {
    let mut sets: Vec<String> = Vec::new();
    let mut args: Vec<Box<dyn ToSql>> = Vec::new();
    push_vector_patch(&mut sets, &mut args, "title_vector", &patch.title_vector);
    push_vector_patch(
        &mut sets,
        &mut args,
        "description_vector",
        &patch.description_vector,
    );
    run_vector_update(conn, "user_memory_contexts", user_id, context_id, sets, args)
}

fn run_vector_update(
    conn: &Connection,
    table: &str,
    user_id: &str,
    id: i64,
    mut sets: Vec<String>,
    mut args: Vec<Box<dyn ToSql>>,
) -> Result<bool> {
    // Empty patch issues no statement at all.
    if sets.is_empty() {
        return Ok(false);
    }
    sets.push("updated_at = ?".to_string());
    args.push(Box::new(now_rfc3339()));
    args.push(Box::new(id));
    args.push(Box::new(user_id.to_string()));
    let sql = format!(
        "UPDATE {table} SET {} WHERE id = ? AND user_id = ?",
        sets.join(", ")
    );
    let changed = conn.execute(&sql, params_from_iter(args.iter().map(|a| a.as_ref())))?;
    Ok(changed > 0)
}

// ---------------------------------------------------------------------------
// Dynamic SET-clause helpers (shared with the layer stores)
// ---------------------------------------------------------------------------

pub(crate) fn push_text_patch(
    sets: &mut Vec<String>,
    args: &mut Vec<Box<dyn ToSql>>,
    col: &str,
    patch: &Patch<String>,
) {
    match patch {
        Patch::Keep => {}
        Patch::Clear => sets.push(format!("{col} = NULL")),
        Patch::Set(v) => {
            sets.push(format!("{col} = ?"));
            args.push(Box::new(v.clone()));
        }
    }
}

pub(crate) fn push_real_patch(
    sets: &mut Vec<String>,
    args: &mut Vec<Box<dyn ToSql>>,
    col: &str,
    patch: &Patch<f64>,
) {
    match patch {
        Patch::Keep => {}
        Patch::Clear => sets.push(format!("{col} = NULL")),
        Patch::Set(v) => {
            sets.push(format!("{col} = ?"));
            args.push(Box::new(*v));
        }
    }
}

pub(crate) fn push_json_patch<T: serde::Serialize>(
    sets: &mut Vec<String>,
    args: &mut Vec<Box<dyn ToSql>>,
    col: &str,
    patch: &Patch<T>,
) {
    match patch {
        Patch::Keep => {}
        Patch::Clear => sets.push(format!("{col} = NULL")),
        Patch::Set(v) => match serde_json::to_string(v) {
            Ok(text) => {
                sets.push(format!("{col} = ?"));
                args.push(Box::new(text));
            }
            Err(e) => tracing::warn!("skipping unserializable {col} patch: {e}"),
        },
    }
}

pub(crate) fn push_vector_patch(
    sets: &mut Vec<String>,
    args: &mut Vec<Box<dyn ToSql>>,
    col: &str,
    patch: &Patch<Vec<f32>>,
) {
    match patch {
        Patch::Keep => {}
        Patch::Clear => sets.push(format!("{col} = NULL")),
        Patch::Set(v) => {
            sets.push(format!("{col} = ?"));
            args.push(Box::new(embedding_to_bytes(v)));
        }
    }
}
