//! Envelope serializer
//!
//! Translates between the in-memory [`Transaction`] and the storable JSON
//! envelope, re-attaching live collection references on load. Deserialization
//! failures are recoverable by design: `Outbox::get_all` logs and skips the
//! offending entry instead of aborting the enumeration.

use std::sync::Arc;

use driftq_domain::constants::ENVELOPE_VERSION;
use driftq_domain::{
    CollectionRegistry, Mutation, MutationRecord, OutboxError, Result, Transaction,
    TransactionEnvelope,
};

/// Serialize a transaction into its UTF-8 JSON envelope.
pub fn serialize(tx: &Transaction) -> Result<String> {
    let envelope = TransactionEnvelope::from(tx);
    serde_json::to_string(&envelope).map_err(|e| OutboxError::Serialization(e.to_string()))
}

/// Parse a stored envelope and rehydrate it into a live transaction.
///
/// Fails with a recoverable error when the JSON is malformed, the envelope
/// version is unknown, or a `collection_id` no longer resolves against the
/// registry.
pub fn deserialize(blob: &str, collections: &CollectionRegistry) -> Result<Transaction> {
    let envelope: TransactionEnvelope =
        serde_json::from_str(blob).map_err(|e| OutboxError::DeserializeFailed(e.to_string()))?;

    if envelope.version != ENVELOPE_VERSION {
        return Err(OutboxError::UnsupportedVersion(envelope.version));
    }

    let mut mutations = Vec::with_capacity(envelope.mutations.len());
    for record in &envelope.mutations {
        let collection = collections
            .get(&record.collection_id)
            .ok_or_else(|| OutboxError::UnknownCollection(record.collection_id.clone()))?;
        mutations.push(rehydrate(record, collection));
    }

    let mut tx = Transaction::new(
        envelope.id,
        envelope.mutation_fn_name,
        mutations,
        envelope.idempotency_key,
        envelope.created_at,
        envelope.metadata,
    );
    tx.retry_count = envelope.retry_count;
    tx.next_attempt_at = envelope.next_attempt_at;
    tx.last_error = envelope.last_error;

    Ok(tx)
}

fn rehydrate(record: &MutationRecord, collection: Arc<dyn driftq_domain::Collection>) -> Mutation {
    Mutation {
        global_key: record.global_key.clone(),
        kind: record.kind,
        modified: record.modified.clone(),
        original: record.original.clone(),
        collection_id: record.collection_id.clone(),
        collection,
    }
}
