//! Command parsing and reply shaping
//!
//! Everything here is pure: it turns query text into a command document and a
//! command reply into a [`ResultStream`], without talking to a server.

use bson::{Bson, Document};
use sluice_query::{
    next_single, next_yield, DataError, Envelope, Meta, Result, ResultStream,
    ResultStreamBuilder, TypeRegistry, Value,
};
use tracing::{debug, error};

/// Header of every MongoDB result stream
pub const REPLY_COLUMN: &str = "Reply";

/// Parse query text (relaxed or canonical extended JSON) into a command document
pub fn parse_command(query: &str) -> Result<Document> {
    let json: serde_json::Value = serde_json::from_str(query).map_err(|e| {
        error!("Failed to parse MongoDB command: {}", e);
        DataError::InvalidQuery(format!("cannot parse command \"{}\": {}", query, e))
    })?;

    let command = Bson::try_from(json).map_err(|e| {
        DataError::InvalidQuery(format!("cannot convert command \"{}\" to bson: {}", query, e))
    })?;

    match command {
        Bson::Document(doc) if !doc.is_empty() => Ok(doc),
        Bson::Document(_) => Err(DataError::InvalidQuery("empty command".to_string())),
        other => Err(DataError::InvalidQuery(format!(
            "command must be a document, got {:?}",
            other.element_type()
        ))),
    }
}

/// Turn a command reply into a schema-less stream with a single `Reply` column
///
/// Replies carrying a `cursor` are flattened: every array-valued field of the
/// cursor (`firstBatch`, `nextBatch`) contributes its items in order. Any
/// other reply is a single row holding the whole document.
pub fn reply_stream(mut reply: Document) -> ResultStream {
    let builder = ResultStreamBuilder::new()
        .with_header(vec![REPLY_COLUMN.to_string()])
        .with_meta(Meta::schema_less());

    match reply.remove("cursor") {
        Some(cursor) => builder
            .with_sequence(next_yield(move |emitter| {
                let cursor = match cursor {
                    Bson::Document(cursor) => cursor,
                    _ => {
                        return Err(DataError::malformed_reply(
                            "type assertion for cursor object failed",
                        ))
                    }
                };

                for (_, batch) in cursor {
                    if let Bson::Array(items) = batch {
                        for item in items {
                            emitter.emit(reply_row(item));
                        }
                    }
                }
                debug!("Flattened {} documents from cursor", emitter.len());
                Ok(())
            }))
            .build(),
        None => builder
            .with_sequence(next_single(reply_row(Bson::Document(reply))))
            .build(),
    }
}

fn reply_row(value: Bson) -> Vec<Value> {
    vec![Value::from(Envelope::new(value))]
}

/// Make BSON values binary round-trippable through `registry`
pub fn register_types(registry: &TypeRegistry) -> Result<()> {
    registry.register::<Bson>("mongo.bson")?;
    registry.register::<Document>("mongo.document")?;
    registry.register::<bson::oid::ObjectId>("mongo.object_id")?;
    registry.register::<bson::Binary>("mongo.binary")?;
    registry.register::<bson::Regex>("mongo.regex")?;
    registry.register::<bson::Timestamp>("mongo.timestamp")?;
    registry.register::<bson::Decimal128>("mongo.decimal128")?;
    registry.register::<bson::DateTime>("mongo.datetime")?;
    Ok(())
}
