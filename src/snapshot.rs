//! Snapshot store and dataset schema cache.
//! One process-scoped handle per dataset: the parquet path, a column list
//! filled once by a zero-row schema probe, and the full frame loaded once on
//! first query. Both cells use initialize-once semantics so concurrent first
//! requests cannot race the probe. The snapshots themselves are read-only
//! inputs produced by the ingestion jobs.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use once_cell::sync::OnceCell;
use polars::prelude::*;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{PipelineError, PipelineResult};
use crate::manifest::Dataset;

struct TableHandle {
    dataset: Dataset,
    path: PathBuf,
    columns: OnceCell<Arc<Vec<String>>>,
    frame: OnceCell<DataFrame>,
}

/// Process-scoped store over the five parquet snapshots under one data root.
/// Construct once at startup and thread through the dispatcher.
pub struct SnapshotStore {
    root: PathBuf,
    tables: Vec<TableHandle>,
}

pub type SharedSnapshots = Arc<SnapshotStore>;

impl SnapshotStore {
    pub fn open<P: Into<PathBuf>>(root: P) -> SnapshotStore {
        let root = root.into();
        let tables = Dataset::ALL
            .iter()
            .map(|&dataset| TableHandle {
                dataset,
                path: root.join(dataset.file_name()),
                columns: OnceCell::new(),
                frame: OnceCell::new(),
            })
            .collect();
        SnapshotStore { root, tables }
    }

    pub fn shared<P: Into<PathBuf>>(root: P) -> SharedSnapshots {
        Arc::new(SnapshotStore::open(root))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Snapshot file backing a dataset; interpolated into the query text's
    /// FROM clause (paths are configuration, not caller input).
    pub fn path_for(&self, ds: Dataset) -> &Path {
        &self.handle(ds).path
    }

    /// Ordered column names for a dataset, probed once per process lifetime
    /// with a zero-row read. An unreadable snapshot fails here and on every
    /// later call for the dataset; there is no partial-schema fallback.
    pub fn columns(&self, ds: Dataset) -> PipelineResult<Arc<Vec<String>>> {
        let h = self.handle(ds);
        h.columns
            .get_or_try_init(|| probe_columns(&h.path, ds))
            .cloned()
            .map_err(|e: anyhow::Error| {
                PipelineError::execution(format!("schema probe failed for {ds}: {e:#}"))
            })
    }

    pub fn has_column(&self, ds: Dataset, name: &str) -> PipelineResult<bool> {
        Ok(self.columns(ds)?.iter().any(|c| c == name))
    }

    /// Full frame for a dataset, loaded once and shared thereafter. Clones
    /// are cheap; the underlying buffers are reference-counted.
    pub fn frame(&self, ds: Dataset) -> PipelineResult<DataFrame> {
        let h = self.handle(ds);
        h.frame
            .get_or_try_init(|| load_frame(&h.path, ds))
            .cloned()
            .map_err(|e: anyhow::Error| {
                PipelineError::execution(format!("loading snapshot for {ds}: {e:#}"))
            })
    }

    /// Walk the data root and log what is actually on disk against what the
    /// datasets expect. Called once at startup.
    pub fn log_inventory(&self) {
        let mut found = 0usize;
        for entry in WalkDir::new(&self.root).max_depth(2).into_iter().flatten() {
            let p = entry.path();
            if p.extension().map(|e| e == "parquet").unwrap_or(false) {
                found += 1;
                debug!(target: "courtside::store", "snapshot present: '{}'", p.display());
            }
        }
        info!(
            target: "courtside::store",
            "data root '{}': {} parquet file(s) discovered",
            self.root.display(),
            found
        );
        for h in &self.tables {
            if !h.path.exists() {
                warn!(
                    target: "courtside::store",
                    "expected snapshot missing for {}: '{}'",
                    h.dataset,
                    h.path.display()
                );
            }
        }
    }

    fn handle(&self, ds: Dataset) -> &TableHandle {
        // Construction follows Dataset::ALL, which follows declaration order.
        &self.tables[ds as usize]
    }
}

fn probe_columns(path: &Path, ds: Dataset) -> anyhow::Result<Arc<Vec<String>>> {
    let file = File::open(path)
        .with_context(|| format!("opening snapshot '{}'", path.display()))?;
    let df = ParquetReader::new(file)
        .with_slice(Some((0, 0)))
        .finish()
        .with_context(|| format!("probing schema of '{}'", path.display()))?;
    let cols: Vec<String> = df.get_column_names().iter().map(|s| s.to_string()).collect();
    debug!(target: "courtside::store", "schema probe {}: {} column(s)", ds, cols.len());
    Ok(Arc::new(cols))
}

fn load_frame(path: &Path, ds: Dataset) -> anyhow::Result<DataFrame> {
    let file = File::open(path)
        .with_context(|| format!("opening snapshot '{}'", path.display()))?;
    let df = ParquetReader::new(file)
        .finish()
        .with_context(|| format!("reading snapshot '{}'", path.display()))?;
    debug!(target: "courtside::store", "loaded {}: {} row(s)", ds, df.height());
    Ok(df)
}
