//! Junction table lookups for many-to-many relations.

use sqlrecord_core::Result;

use crate::query::ActiveQuery;
use crate::record::Record;
use crate::session::Session;

/// Fetches the junction rows that connect a set of owners.
pub struct JunctionRowsFinder<'s> {
    session: &'s Session,
}

impl<'s> JunctionRowsFinder<'s> {
    pub fn new(session: &'s Session) -> Self {
        Self { session }
    }

    /// Junction rows reachable from `owners`, as plain rows.
    ///
    /// No owners means no rows and no query.
    pub fn find(&self, junction: &ActiveQuery, owners: &[Record]) -> Result<Vec<Record>> {
        if owners.is_empty() {
            return Ok(Vec::new());
        }
        let mut query = junction.clone().as_array();
        query.primary_model = None;
        query.filter_by_models(owners)?;
        let rows = query.all(self.session)?;
        tracing::trace!(
            owners = owners.len(),
            junction_rows = rows.len(),
            "Fetched junction rows"
        );
        Ok(rows)
    }
}
