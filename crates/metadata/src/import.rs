//! Database importer: copy one metadata store into another.
//!
//! Experiments are matched by name (first-or-create) and their new IDs
//! remembered; every subsequent table is copied in a fixed order with the
//! experiment reference rewritten. Inserts ignore conflicts, so importing
//! the same source twice leaves the destination unchanged.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{ExperimentRepo, ImportRepo};
use crate::store::MetadataStore;
use std::collections::HashMap;
use std::sync::Arc;

/// Copies tables from a source store to a destination store.
pub struct Importer {
    source: Arc<dyn MetadataStore>,
    dest: Arc<dyn MetadataStore>,
}

impl Importer {
    pub fn new(source: Arc<dyn MetadataStore>, dest: Arc<dyn MetadataStore>) -> Self {
        Self { source, dest }
    }

    /// Copy the contents of the source store into the destination store.
    pub async fn import(&self) -> MetadataResult<()> {
        let id_map = self.import_experiments().await?;

        let tags = self.source.list_experiment_tags_all().await?;
        let mut remapped = Vec::with_capacity(tags.len());
        for mut tag in tags {
            tag.experiment_id = remap(&id_map, tag.experiment_id)?;
            remapped.push(tag);
        }
        let written = self.dest.import_experiment_tags(&remapped).await?;
        tracing::info!(found = remapped.len(), written, "imported experiment_tags");

        let runs = self.source.list_runs_all().await?;
        let mut remapped = Vec::with_capacity(runs.len());
        for mut run in runs {
            run.experiment_id = remap(&id_map, run.experiment_id)?;
            remapped.push(run);
        }
        let written = self.dest.import_runs(&remapped).await?;
        tracing::info!(found = remapped.len(), written, "imported runs");

        let rows = self.source.list_tags_all().await?;
        let written = self.dest.import_tags(&rows).await?;
        tracing::info!(found = rows.len(), written, "imported tags");

        let rows = self.source.list_params_all().await?;
        let written = self.dest.import_params(&rows).await?;
        tracing::info!(found = rows.len(), written, "imported params");

        let rows = self.source.list_metrics_all().await?;
        let written = self.dest.import_metrics(&rows).await?;
        tracing::info!(found = rows.len(), written, "imported metrics");

        let rows = self.source.list_latest_metrics_all().await?;
        let written = self.dest.import_latest_metrics(&rows).await?;
        tracing::info!(found = rows.len(), written, "imported latest_metrics");

        Ok(())
    }

    /// Copy experiments by name, returning the source→destination ID map.
    async fn import_experiments(&self) -> MetadataResult<HashMap<i32, i32>> {
        let experiments = self.source.list_experiments_all().await?;
        let mut id_map = HashMap::with_capacity(experiments.len());
        for experiment in &experiments {
            let created = self.dest.first_or_create_experiment(experiment).await?;
            id_map.insert(experiment.experiment_id, created.experiment_id);
        }
        tracing::info!(found = experiments.len(), "imported experiments");
        Ok(id_map)
    }
}

fn remap(id_map: &HashMap<i32, i32>, experiment_id: i32) -> MetadataResult<i32> {
    id_map.get(&experiment_id).copied().ok_or_else(|| {
        MetadataError::Internal(format!(
            "row references experiment_id {experiment_id} absent from source experiments"
        ))
    })
}
