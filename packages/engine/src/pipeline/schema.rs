// packages/engine/src/pipeline/schema.rs
//! Schema-checked pipeline
//!
//! [`SchemaPipeline`] validates a JSON object record against a declared
//! [`RecordSchema`] and hands valid records to a [`RecordSink`].

use crate::pipeline::contract::{PersistFault, Pipeline, ValidatedRecord, ValidationFault};
use crate::registry::JobId;
use crate::runtime::channel::RawRecord;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// JSON kind a field must have
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Number,
    Integer,
    Bool,
    Array,
    Object,
    Any,
}

impl FieldKind {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Bool => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Any => true,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Bool => "bool",
            Self::Array => "array",
            Self::Object => "object",
            Self::Any => "any",
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default = "default_true")]
    pub required: bool,
}

impl FieldSpec {
    pub fn required(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
        }
    }
}

/// Declared shape of the records of one output table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSchema {
    pub table: String,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,

    /// Accept fields the schema does not declare
    #[serde(default = "default_true")]
    pub allow_extra: bool,
}

impl RecordSchema {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            fields: Vec::new(),
            allow_extra: true,
        }
    }

    pub fn field(mut self, spec: FieldSpec) -> Self {
        self.fields.push(spec);
        self
    }

    pub fn strict(mut self) -> Self {
        self.allow_extra = false;
        self
    }

    pub fn validate(&self, record: &RawRecord) -> Result<ValidatedRecord, ValidationFault> {
        for spec in &self.fields {
            match record.get(&spec.name) {
                None | Some(Value::Null) if spec.required => {
                    return Err(ValidationFault::MissingField(spec.name.clone()));
                }
                None | Some(Value::Null) => {}
                Some(value) if !spec.kind.matches(value) => {
                    return Err(ValidationFault::WrongKind {
                        field: spec.name.clone(),
                        expected: spec.kind.as_str().to_string(),
                        actual: kind_of(value).to_string(),
                    });
                }
                Some(_) => {}
            }
        }

        if !self.allow_extra {
            if let Some(extra) = record.keys().find(|k| !self.fields.iter().any(|f| &f.name == *k)) {
                return Err(ValidationFault::UnexpectedField(extra.clone()));
            }
        }

        Ok(ValidatedRecord {
            table: self.table.clone(),
            fields: record.clone(),
        })
    }
}

/// Where validated records go
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn write(&self, job: JobId, record: &ValidatedRecord) -> Result<(), PersistFault>;

    async fn delete_job(&self, job: JobId) -> Result<(), PersistFault>;
}

/// Keeps records per job; optionally rejects duplicate values of a key field
#[derive(Debug, Default)]
pub struct InMemorySink {
    records: DashMap<JobId, Vec<ValidatedRecord>>,
    unique_key: Option<String>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject a second record with the same value of `field` in the same
    /// table and job
    pub fn with_unique_key(field: impl Into<String>) -> Self {
        Self {
            records: DashMap::new(),
            unique_key: Some(field.into()),
        }
    }

    pub fn records(&self, job: JobId) -> Vec<ValidatedRecord> {
        self.records.get(&job).map(|r| r.clone()).unwrap_or_default()
    }

    pub fn len(&self, job: JobId) -> usize {
        self.records.get(&job).map_or(0, |r| r.len())
    }

    pub fn total(&self) -> usize {
        self.records.iter().map(|r| r.len()).sum()
    }
}

#[async_trait]
impl RecordSink for InMemorySink {
    async fn write(&self, job: JobId, record: &ValidatedRecord) -> Result<(), PersistFault> {
        let mut rows = self.records.entry(job).or_default();

        if let Some(key) = &self.unique_key {
            if let Some(value) = record.fields.get(key) {
                let clash = rows
                    .iter()
                    .any(|r| r.table == record.table && r.fields.get(key) == Some(value));
                if clash {
                    return Err(PersistFault::Conflict(format!("{}.{} = {}", record.table, key, value)));
                }
            }
        }

        rows.push(record.clone());
        Ok(())
    }

    async fn delete_job(&self, job: JobId) -> Result<(), PersistFault> {
        if let Some((_, rows)) = self.records.remove(&job) {
            info!("Discarded {} records of job {}", rows.len(), job);
        }
        Ok(())
    }
}

/// Logs records instead of storing them
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl RecordSink for LogSink {
    async fn write(&self, job: JobId, record: &ValidatedRecord) -> Result<(), PersistFault> {
        let body = serde_json::to_string(&record.fields).map_err(|e| PersistFault::Constraint(e.to_string()))?;
        info!("job={} table={} record={}", job, record.table, body);
        Ok(())
    }

    async fn delete_job(&self, job: JobId) -> Result<(), PersistFault> {
        info!("job={} discarded", job);
        Ok(())
    }
}

/// Pipeline built from a schema and a sink
pub struct SchemaPipeline {
    name: String,
    schema: RecordSchema,
    sink: Arc<dyn RecordSink>,
}

impl SchemaPipeline {
    pub fn new(name: impl Into<String>, schema: RecordSchema, sink: Arc<dyn RecordSink>) -> Self {
        Self {
            name: name.into(),
            schema,
            sink,
        }
    }

    pub fn schema(&self) -> &RecordSchema {
        &self.schema
    }
}

#[async_trait]
impl Pipeline for SchemaPipeline {
    fn name(&self) -> &str {
        &self.name
    }

    async fn validate(&self, record: &RawRecord) -> Result<ValidatedRecord, ValidationFault> {
        self.schema.validate(record)
    }

    async fn persist(&self, job: JobId, record: ValidatedRecord) -> Result<(), PersistFault> {
        self.sink.write(job, &record).await?;
        debug!("{} persisted a record into {}", self.name, record.table);
        Ok(())
    }

    async fn discard(&self, job: JobId) -> Result<(), PersistFault> {
        self.sink.delete_job(job).await
    }
}
