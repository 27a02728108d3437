// src/db/vector.rs
// Embedding <-> BLOB conversion for sqlite-vec

/// Serialize an embedding to the little-endian f32 byte layout that
/// sqlite-vec's `vec_distance_cosine` expects.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Deserialize a stored embedding BLOB back to f32 values.
///
/// Trailing bytes that do not form a full f32 are ignored (they can only
/// appear if the column was written by something other than this crate).
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
