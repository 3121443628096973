//! Error report adapter: append-only audit history

use super::base::TableAssembler;
use crate::detector::ErrorReport;
use crate::error::Result;
use crate::store::{Document, DocumentId, FieldPath, Filter, FindOptions, SortOrder};
use crate::types::{Timestamp, CREATED_AT_FIELD};

#[derive(Debug, Clone)]
pub struct ErrorReportDao {
    assembler: TableAssembler,
}

impl ErrorReportDao {
    pub fn new(assembler: TableAssembler) -> Self {
        Self { assembler }
    }

    pub fn assembler(&self) -> &TableAssembler {
        &self.assembler
    }

    /// Persist a report. Reports are never deduplicated.
    pub fn insert(&self, report: &ErrorReport) -> Result<DocumentId> {
        let doc = Document::from_value(serde_json::to_value(report)?)?;
        let id = self
            .assembler
            .store()
            .insert_one(self.assembler.namespace(), &doc)?;
        log::info!("Error report for {} stored as {}", report.timestamp, id);
        Ok(id)
    }

    /// Most recently created report
    pub fn latest(&self) -> Result<Option<ErrorReport>> {
        let doc = self.assembler.store().find_one(
            self.assembler.namespace(),
            &Filter::new(),
            Some((FieldPath::from(CREATED_AT_FIELD), SortOrder::Descending)),
        )?;
        doc.map(|d| -> Result<ErrorReport> { Ok(serde_json::from_value(d.into_value())?) })
            .transpose()
    }

    /// Reports whose window ends in `[start, end]`, oldest first
    pub fn reports_between(&self, start: Timestamp, end: Timestamp) -> Result<Vec<ErrorReport>> {
        let options = FindOptions::new(Filter::new().timestamp_between(start, end))
            .sort(CREATED_AT_FIELD, SortOrder::Ascending);
        self.assembler
            .store()
            .find(self.assembler.namespace(), &options)?
            .into_iter()
            .map(|d| -> Result<ErrorReport> { Ok(serde_json::from_value(d.into_value())?) })
            .collect()
    }
}
