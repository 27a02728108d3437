// src/memory/layers.rs
// Extension stores for the four layers.
//
// Identity, experience and preference rows are 1:1 with a base row and are
// removed through their owning base row (the FK cascade cleans them up).
// Context rows fan out over many base rows via a JSON id array and delete
// their linked base rows explicitly.

use anyhow::Result;
use rusqlite::{params, params_from_iter, Connection, Row, ToSql};

use crate::db::vector::embedding_to_bytes;
use crate::memory::base::{push_json_patch, push_real_patch, push_text_patch};
use crate::memory::types::{
    enum_from_sql, json_from_sql, json_to_sql, now_rfc3339, ContextMemory, ContextPatch,
    CreateContextParams, CreateExperienceParams, CreateIdentityParams, CreatePreferenceParams,
    ExperienceMemory, ExperiencePatch, IdentityMemory, IdentityPatch, IdentityType, MemoryLayer,
    Patch, PreferenceMemory, PreferencePatch, Relationship,
};

pub(crate) const IDENTITY_COLUMNS: &str = "id, user_memory_id, description, role, relationship, \
     type, episodic_date, tags, metadata, captured_at, accessed_at, created_at, updated_at";

pub(crate) const EXPERIENCE_COLUMNS: &str = "id, user_memory_id, situation, action, key_learning, \
     reasoning, possible_outcome, score_confidence, type, tags, metadata, captured_at, \
     accessed_at, created_at, updated_at";

pub(crate) const PREFERENCE_COLUMNS: &str = "id, user_memory_id, conclusion_directives, \
     suggestions, score_priority, type, tags, metadata, captured_at, accessed_at, created_at, \
     updated_at";

pub(crate) const CONTEXT_COLUMNS: &str = "id, user_memory_ids, title, description, type, \
     current_status, associated_subjects, associated_objects, score_impact, score_urgency, tags, \
     metadata, captured_at, accessed_at, created_at, updated_at";

pub(crate) fn identity_from_row(row: &Row<'_>) -> rusqlite::Result<IdentityMemory> {
    Ok(IdentityMemory {
        id: row.get(0)?,
        user_memory_id: row.get(1)?,
        description: row.get(2)?,
        role: row.get(3)?,
        relationship: enum_from_sql::<Relationship>(row.get(4)?),
        identity_type: enum_from_sql::<IdentityType>(row.get(5)?),
        episodic_date: row.get(6)?,
        tags: json_from_sql(row.get(7)?),
        metadata: json_from_sql(row.get(8)?),
        captured_at: row.get(9)?,
        accessed_at: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

pub(crate) fn experience_from_row(row: &Row<'_>) -> rusqlite::Result<ExperienceMemory> {
    Ok(ExperienceMemory {
        id: row.get(0)?,
        user_memory_id: row.get(1)?,
        situation: row.get(2)?,
        action: row.get(3)?,
        key_learning: row.get(4)?,
        reasoning: row.get(5)?,
        possible_outcome: row.get(6)?,
        score_confidence: row.get(7)?,
        experience_type: row.get(8)?,
        tags: json_from_sql(row.get(9)?),
        metadata: json_from_sql(row.get(10)?),
        captured_at: row.get(11)?,
        accessed_at: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

pub(crate) fn preference_from_row(row: &Row<'_>) -> rusqlite::Result<PreferenceMemory> {
    Ok(PreferenceMemory {
        id: row.get(0)?,
        user_memory_id: row.get(1)?,
        conclusion_directives: row.get(2)?,
        suggestions: json_from_sql(row.get(3)?),
        score_priority: row.get(4)?,
        preference_type: row.get(5)?,
        tags: json_from_sql(row.get(6)?),
        metadata: json_from_sql(row.get(7)?),
        captured_at: row.get(8)?,
        accessed_at: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

pub(crate) fn context_from_row(row: &Row<'_>) -> rusqlite::Result<ContextMemory> {
    Ok(ContextMemory {
        id: row.get(0)?,
        user_memory_ids: json_from_sql(row.get(1)?).unwrap_or_default(),
        title: row.get(2)?,
        description: row.get(3)?,
        context_type: row.get(4)?,
        current_status: row.get(5)?,
        associated_subjects: json_from_sql(row.get(6)?),
        associated_objects: json_from_sql(row.get(7)?),
        score_impact: row.get(8)?,
        score_urgency: row.get(9)?,
        tags: json_from_sql(row.get(10)?),
        metadata: json_from_sql(row.get(11)?),
        captured_at: row.get(12)?,
        accessed_at: row.get(13)?,
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
    })
}

// ---------------------------------------------------------------------------
// Inserts (called inside the aggregate model's transactions)
// ---------------------------------------------------------------------------

/// Insert an identity row. Relationship and type are normalized against the
/// vocabulary; unknown values land as NULL.
pub fn insert_identity_sync(
    conn: &Connection,
    user_id: &str,
    user_memory_id: i64,
    p: &CreateIdentityParams,
) -> Result<i64> {
    let now = now_rfc3339();
    let relationship = p
        .relationship
        .as_deref()
        .and_then(Relationship::normalize)
        .map(|r| r.as_ref().to_string());
    let identity_type = p
        .identity_type
        .as_deref()
        .and_then(IdentityType::normalize)
        .map(|t| t.as_ref().to_string());
    conn.execute(
        "INSERT INTO user_memory_identities (user_id, user_memory_id, description, \
         description_vector, role, relationship, type, episodic_date, tags, metadata, \
         captured_at, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            user_id,
            user_memory_id,
            p.description,
            p.description_vector.as_deref().map(embedding_to_bytes),
            p.role,
            relationship,
            identity_type,
            p.episodic_date,
            json_to_sql(&p.tags),
            json_to_sql(&p.metadata),
            p.captured_at,
            now,
            now,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn insert_experience_sync(
    conn: &Connection,
    user_id: &str,
    user_memory_id: i64,
    p: &CreateExperienceParams,
) -> Result<i64> {
    let now = now_rfc3339();
    conn.execute(
        "INSERT INTO user_memory_experiences (user_id, user_memory_id, situation, \
         situation_vector, action, action_vector, key_learning, key_learning_vector, reasoning, \
         possible_outcome, score_confidence, type, tags, metadata, captured_at, created_at, \
         updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            user_id,
            user_memory_id,
            p.situation,
            p.situation_vector.as_deref().map(embedding_to_bytes),
            p.action,
            p.action_vector.as_deref().map(embedding_to_bytes),
            p.key_learning,
            p.key_learning_vector.as_deref().map(embedding_to_bytes),
            p.reasoning,
            p.possible_outcome,
            p.score_confidence,
            p.experience_type,
            json_to_sql(&p.tags),
            json_to_sql(&p.metadata),
            p.captured_at,
            now,
            now,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn insert_preference_sync(
    conn: &Connection,
    user_id: &str,
    user_memory_id: i64,
    p: &CreatePreferenceParams,
) -> Result<i64> {
    let now = now_rfc3339();
    conn.execute(
        "INSERT INTO user_memory_preferences (user_id, user_memory_id, conclusion_directives, \
         conclusion_directives_vector, suggestions, score_priority, type, tags, metadata, \
         captured_at, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            user_id,
            user_memory_id,
            p.conclusion_directives,
            p.conclusion_directives_vector
                .as_deref()
                .map(embedding_to_bytes),
            json_to_sql(&p.suggestions),
            p.score_priority,
            p.preference_type,
            json_to_sql(&p.tags),
            json_to_sql(&p.metadata),
            p.captured_at,
            now,
            now,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn insert_context_sync(
    conn: &Connection,
    user_id: &str,
    user_memory_ids: &[i64],
    p: &CreateContextParams,
) -> Result<i64> {
    let now = now_rfc3339();
    conn.execute(
        "INSERT INTO user_memory_contexts (user_id, user_memory_ids, title, title_vector, \
         description, description_vector, type, current_status, associated_subjects, \
         associated_objects, score_impact, score_urgency, tags, metadata, captured_at, \
         created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            user_id,
            serde_json::to_string(user_memory_ids)?,
            p.title,
            p.title_vector.as_deref().map(embedding_to_bytes),
            p.description,
            p.description_vector.as_deref().map(embedding_to_bytes),
            p.context_type,
            p.current_status,
            json_to_sql(&p.associated_subjects),
            json_to_sql(&p.associated_objects),
            p.score_impact,
            p.score_urgency,
            json_to_sql(&p.tags),
            json_to_sql(&p.metadata),
            p.captured_at,
            now,
            now,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

// ---------------------------------------------------------------------------
// Lookups
// ---------------------------------------------------------------------------

pub fn find_identity_sync(
    conn: &Connection,
    user_id: &str,
    id: i64,
) -> Result<Option<IdentityMemory>> {
    find_one(
        conn,
        &format!("SELECT {IDENTITY_COLUMNS} FROM user_memory_identities WHERE id = ? AND user_id = ?"),
        user_id,
        id,
        identity_from_row,
    )
}

pub fn find_experience_sync(
    conn: &Connection,
    user_id: &str,
    id: i64,
) -> Result<Option<ExperienceMemory>> {
    find_one(
        conn,
        &format!(
            "SELECT {EXPERIENCE_COLUMNS} FROM user_memory_experiences WHERE id = ? AND user_id = ?"
        ),
        user_id,
        id,
        experience_from_row,
    )
}

pub fn find_preference_sync(
    conn: &Connection,
    user_id: &str,
    id: i64,
) -> Result<Option<PreferenceMemory>> {
    find_one(
        conn,
        &format!(
            "SELECT {PREFERENCE_COLUMNS} FROM user_memory_preferences WHERE id = ? AND user_id = ?"
        ),
        user_id,
        id,
        preference_from_row,
    )
}

pub fn find_context_sync(
    conn: &Connection,
    user_id: &str,
    id: i64,
) -> Result<Option<ContextMemory>> {
    find_one(
        conn,
        &format!("SELECT {CONTEXT_COLUMNS} FROM user_memory_contexts WHERE id = ? AND user_id = ?"),
        user_id,
        id,
        context_from_row,
    )
}

fn find_one<T>(
    conn: &Connection,
    sql: &str,
    user_id: &str,
    id: i64,
    map: fn(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<Option<T>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params![id, user_id])?;
    match rows.next()? {
        Some(row) => Ok(Some(map(row)?)),
        None => Ok(None),
    }
}

/// All identity entries for the user, most recent first.
pub fn list_identities_sync(
    conn: &Connection,
    user_id: &str,
    limit: Option<i64>,
) -> Result<Vec<IdentityMemory>> {
    list_rows(
        conn,
        &format!(
            "SELECT {IDENTITY_COLUMNS} FROM user_memory_identities WHERE user_id = ? \
             ORDER BY created_at DESC, id DESC"
        ),
        user_id,
        limit,
        identity_from_row,
    )
}

/// Identity entries of one normalized type, most recent first.
pub fn list_identities_by_type_sync(
    conn: &Connection,
    user_id: &str,
    identity_type: IdentityType,
    limit: Option<i64>,
) -> Result<Vec<IdentityMemory>> {
    let mut sql = format!(
        "SELECT {IDENTITY_COLUMNS} FROM user_memory_identities \
         WHERE user_id = ? AND type = ? ORDER BY created_at DESC, id DESC"
    );
    if let Some(n) = limit {
        sql.push_str(&format!(" LIMIT {n}"));
    }
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![user_id, identity_type.as_ref()], identity_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn list_experiences_sync(
    conn: &Connection,
    user_id: &str,
    limit: Option<i64>,
) -> Result<Vec<ExperienceMemory>> {
    list_rows(
        conn,
        &format!(
            "SELECT {EXPERIENCE_COLUMNS} FROM user_memory_experiences WHERE user_id = ? \
             ORDER BY created_at DESC, id DESC"
        ),
        user_id,
        limit,
        experience_from_row,
    )
}

pub fn list_preferences_sync(
    conn: &Connection,
    user_id: &str,
    limit: Option<i64>,
) -> Result<Vec<PreferenceMemory>> {
    list_rows(
        conn,
        &format!(
            "SELECT {PREFERENCE_COLUMNS} FROM user_memory_preferences WHERE user_id = ? \
             ORDER BY created_at DESC, id DESC"
        ),
        user_id,
        limit,
        preference_from_row,
    )
}

pub fn list_contexts_sync(
    conn: &Connection,
    user_id: &str,
    limit: Option<i64>,
) -> Result<Vec<ContextMemory>> {
    list_rows(
        conn,
        &format!(
            "SELECT {CONTEXT_COLUMNS} FROM user_memory_contexts WHERE user_id = ? \
             ORDER BY created_at DESC, id DESC"
        ),
        user_id,
        limit,
        context_from_row,
    )
}

fn list_rows<T>(
    conn: &Connection,
    base_sql: &str,
    user_id: &str,
    limit: Option<i64>,
    map: fn(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<Vec<T>> {
    let sql = match limit {
        Some(n) => format!("{base_sql} LIMIT {n}"),
        None => base_sql.to_string(),
    };
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([user_id], map)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

// ---------------------------------------------------------------------------
// Partial updates
// ---------------------------------------------------------------------------

/// Patch an identity row in place. Relationship/type values outside the
/// vocabulary are written as NULL, matching create.
pub fn apply_identity_patch_sync(
    conn: &Connection,
    user_id: &str,
    id: i64,
    patch: &IdentityPatch,
) -> Result<bool> {
    let mut sets: Vec<String> = Vec::new();
    let mut args: Vec<Box<dyn ToSql>> = Vec::new();
    push_text_patch(&mut sets, &mut args, "description", &patch.description);
    push_text_patch(&mut sets, &mut args, "role", &patch.role);
    push_relationship_patch(&mut sets, &mut args, &patch.relationship);
    push_identity_type_patch(&mut sets, &mut args, &patch.identity_type);
    push_text_patch(&mut sets, &mut args, "episodic_date", &patch.episodic_date);
    push_json_patch(&mut sets, &mut args, "tags", &patch.tags);
    push_json_patch(&mut sets, &mut args, "metadata", &patch.metadata);
    push_text_patch(&mut sets, &mut args, "captured_at", &patch.captured_at);
    run_layer_update(conn, "user_memory_identities", user_id, id, sets, args)
}

pub fn update_experience_entry_sync(
    conn: &Connection,
    user_id: &str,
    id: i64,
    patch: &ExperiencePatch,
) -> Result<bool> {
    let mut sets: Vec<String> = Vec::new();
    let mut args: Vec<Box<dyn ToSql>> = Vec::new();
    push_text_patch(&mut sets, &mut args, "situation", &patch.situation);
    push_text_patch(&mut sets, &mut args, "action", &patch.action);
    push_text_patch(&mut sets, &mut args, "key_learning", &patch.key_learning);
    push_text_patch(&mut sets, &mut args, "reasoning", &patch.reasoning);
    push_text_patch(&mut sets, &mut args, "possible_outcome", &patch.possible_outcome);
    push_real_patch(&mut sets, &mut args, "score_confidence", &patch.score_confidence);
    push_text_patch(&mut sets, &mut args, "type", &patch.experience_type);
    push_json_patch(&mut sets, &mut args, "tags", &patch.tags);
    push_json_patch(&mut sets, &mut args, "metadata", &patch.metadata);
    push_text_patch(&mut sets, &mut args, "captured_at", &patch.captured_at);
    run_layer_update(conn, "user_memory_experiences", user_id, id, sets, args)
}

pub fn update_preference_entry_sync(
    conn: &Connection,
    user_id: &str,
    id: i64,
    patch: &PreferencePatch,
) -> Result<bool> {
    let mut sets: Vec<String> = Vec::new();
    let mut args: Vec<Box<dyn ToSql>> = Vec::new();
    push_text_patch(
        &mut sets,
        &mut args,
        "conclusion_directives",
        &patch.conclusion_directives,
    );
    push_json_patch(&mut sets, &mut args, "suggestions", &patch.suggestions);
    push_real_patch(&mut sets, &mut args, "score_priority", &patch.score_priority);
    push_text_patch(&mut sets, &mut args, "type", &patch.preference_type);
    push_json_patch(&mut sets, &mut args, "tags", &patch.tags);
    push_json_patch(&mut sets, &mut args, "metadata", &patch.metadata);
    push_text_patch(&mut sets, &mut args, "captured_at", &patch.captured_at);
    run_layer_update(conn, "user_memory_preferences", user_id, id, sets, args)
}

pub fn update_context_entry_sync(
    conn: &Connection,
    user_id: &str,
    id: i64,
    patch: &ContextPatch,
) -> Result<bool> {
    let mut sets: Vec<String> = Vec::new();
    let mut args: Vec<Box<dyn ToSql>> = Vec::new();
    push_text_patch(&mut sets, &mut args, "title", &patch.title);
    push_text_patch(&mut sets, &mut args, "description", &patch.description);
    push_text_patch(&mut sets, &mut args, "type", &patch.context_type);
    push_text_patch(&mut sets, &mut args, "current_status", &patch.current_status);
    push_json_patch(
        &mut sets,
        &mut args,
        "associated_subjects",
        &patch.associated_subjects,
    );
    push_json_patch(
        &mut sets,
        &mut args,
        "associated_objects",
        &patch.associated_objects,
    );
    push_real_patch(&mut sets, &mut args, "score_impact", &patch.score_impact);
    push_real_patch(&mut sets, &mut args, "score_urgency", &patch.score_urgency);
    push_json_patch(&mut sets, &mut args, "tags", &patch.tags);
    push_json_patch(&mut sets, &mut args, "metadata", &patch.metadata);
    push_text_patch(&mut sets, &mut args, "captured_at", &patch.captured_at);
    run_layer_update(conn, "user_memory_contexts", user_id, id, sets, args)
}

fn run_layer_update(
    conn: &Connection,
    table: &str,
    user_id: &str,
    id: i64,
    mut sets: Vec<String>,
    mut args: Vec<Box<dyn ToSql>>,
) -> Result<bool> {
    if sets.is_empty() {
        // Nothing to change; report whether the row exists for this owner.
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {table} WHERE id = ? AND user_id = ?"),
            params![id, user_id],
            |row| row.get(0),
        )?;
        return Ok(count > 0);
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

fn push_relationship_patch(
    sets: &mut Vec<String>,
    args: &mut Vec<Box<dyn ToSql>>,
    patch: &Patch<String>,
) {
    match patch {
        Patch::Keep => {}
        Patch::Clear => sets.push("relationship = NULL".to_string()),
        Patch::Set(raw) => {
            sets.push("relationship = ?".to_string());
            args.push(Box::new(
                Relationship::normalize(raw).map(|r| r.as_ref().to_string()),
            ));
        }
    }
}

fn push_identity_type_patch(
    sets: &mut Vec<String>,
    args: &mut Vec<Box<dyn ToSql>>,
    patch: &Patch<String>,
) {
    match patch {
        Patch::Keep => {}
        Patch::Clear => sets.push("type = NULL".to_string()),
        Patch::Set(raw) => {
            sets.push("type = ?".to_string());
            args.push(Box::new(
                IdentityType::normalize(raw).map(|t| t.as_ref().to_string()),
            ));
        }
    }
}

// ---------------------------------------------------------------------------
// Removals
// ---------------------------------------------------------------------------

/// Remove an identity entry by deleting its owning base row; the FK cascade
/// removes the identity row itself. Returns false when the entry does not
/// exist for this owner.
pub fn remove_identity_entry_sync(conn: &Connection, user_id: &str, id: i64) -> Result<bool> {
    remove_via_base(conn, "user_memory_identities", user_id, id)
}

pub fn remove_experience_entry_sync(conn: &Connection, user_id: &str, id: i64) -> Result<bool> {
    remove_via_base(conn, "user_memory_experiences", user_id, id)
}

pub fn remove_preference_entry_sync(conn: &Connection, user_id: &str, id: i64) -> Result<bool> {
    remove_via_base(conn, "user_memory_preferences", user_id, id)
}

fn remove_via_base(conn: &Connection, table: &str, user_id: &str, id: i64) -> Result<bool> {
    let tx = conn.unchecked_transaction()?;
    let base_id: Option<i64> = tx
        .query_row(
            &format!("SELECT user_memory_id FROM {table} WHERE id = ? AND user_id = ?"),
            params![id, user_id],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;
    let Some(base_id) = base_id else {
        return Ok(false);
    };
    tx.execute(
        "DELETE FROM user_memories WHERE id = ? AND user_id = ?",
        params![base_id, user_id],
    )?;
    tx.commit()?;
    Ok(true)
}

/// Wipe one layer for this user. Deleting the base rows cascades away the
/// 1:1 extension rows; the context variant also clears the context table.
pub fn delete_all_for_layer_sync(
    conn: &Connection,
    user_id: &str,
    layer: MemoryLayer,
) -> Result<u64> {
    let tx = conn.unchecked_transaction()?;
    let deleted = tx.execute(
        "DELETE FROM user_memories WHERE user_id = ? AND memory_layer = ?",
        params![user_id, layer.as_ref()],
    )?;
    if layer == MemoryLayer::Context {
        tx.execute(
            "DELETE FROM user_memory_contexts WHERE user_id = ?",
            [user_id],
        )?;
    }
    tx.commit()?;
    Ok(deleted as u64)
}

/// Remove a context entry and every base record it links to.
pub fn remove_context_entry_sync(conn: &Connection, user_id: &str, id: i64) -> Result<bool> {
    let tx = conn.unchecked_transaction()?;
    let ids_json: Option<String> = tx
        .query_row(
            "SELECT user_memory_ids FROM user_memory_contexts WHERE id = ? AND user_id = ?",
            params![id, user_id],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;
    let Some(ids_json) = ids_json else {
        return Ok(false);
    };
    let linked: Vec<i64> = serde_json::from_str(&ids_json).unwrap_or_default();
    for base_id in linked {
        tx.execute(
            "DELETE FROM user_memories WHERE id = ? AND user_id = ?",
            params![base_id, user_id],
        )?;
    }
    tx.execute(
        "DELETE FROM user_memory_contexts WHERE id = ? AND user_id = ?",
        params![id, user_id],
    )?;
    tx.commit()?;
    Ok(true)
}
