//! Drives one conversion run from source to output datasets.
//!
//! ```text
//! Idle -> SourceOpened -> SchemaBuilt -> LayerInProgress* -> Finalizing -> Completed
//!   \__________\______________\_______________\________________\-> Failed
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use grid_source::{GridDataset, GridGeometry, GridLayer, LayerInfo, OpenOptions};
use projection::{BuiltinTransforms, Crs, TransformProvider};
use tracing::{debug, info, instrument, warn};

use crate::config::EngineConfig;
use crate::context::{ConversionContext, Progress};
use crate::emitter::{begin_dataset, DatasetHandle, OutputPointRecord, PointSchema};
use crate::error::{ConversionError, ErrorKind};
use crate::request::{
    output_path, sanitize_name, ConversionRequest, ErrorPolicy, OutputFormat, OutputMode,
};
use crate::resolver::{CellLocator, CoordinateResolver};
use crate::result::{ConversionCounts, ConversionResult, WarningLog};
use crate::spill::ColumnSpill;
use crate::transform::ValueTransform;

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    SourceOpened,
    SchemaBuilt,
    LayerInProgress(usize),
    Finalizing,
    Completed,
    Failed,
}

/// Conversion engine: configuration plus the CRS transform capability.
#[derive(Clone)]
pub struct Converter {
    config: EngineConfig,
    provider: Arc<dyn TransformProvider>,
}

impl std::fmt::Debug for Converter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Converter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for Converter {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Converter {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            provider: Arc::new(BuiltinTransforms),
        }
    }

    /// Replace the built-in transform provider.
    pub fn with_provider(mut self, provider: Arc<dyn TransformProvider>) -> Self {
        self.provider = provider;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Convert every selected layer of `request.source` into point datasets.
    ///
    /// Cancellation is observed before each layer; a cancelled run still
    /// returns `Ok` with well-formed output for the layers it finished.
    #[instrument(skip_all, fields(source = %request.source.display(), format = %request.format))]
    pub fn convert(
        &self,
        request: &ConversionRequest,
        context: &ConversionContext,
    ) -> Result<ConversionResult, ConversionError> {
        let started = Instant::now();
        let mut run = Run::new(&self.config, request, context);

        match run.execute(&self.provider) {
            Ok(()) => {
                let result = run.into_result(started);
                info!(
                    layers = result.layers_completed,
                    records = result.counts.records_written,
                    outputs = result.outputs.len(),
                    warnings = result.warning_count,
                    cancelled = result.cancelled,
                    elapsed_ms = result.elapsed.as_millis() as u64,
                    "Conversion finished"
                );
                Ok(result)
            }
            Err(mut err) => {
                run.transition(RunState::Failed);
                err.orphaned_outputs = run.outputs;
                if !err.orphaned_outputs.is_empty() {
                    warn!(
                        orphaned = err.orphaned_outputs.len(),
                        "Conversion failed; completed outputs left on disk"
                    );
                }
                warn!(kind = %err.kind, error = %err, "Conversion failed");
                Err(err)
            }
        }
    }
}

/// Convert with the default engine configuration.
pub fn convert(
    request: &ConversionRequest,
    context: &ConversionContext,
) -> Result<ConversionResult, ConversionError> {
    Converter::default().convert(request, context)
}

/// Per-run inputs that do not change between layers.
struct Plan<'a> {
    source: PathBuf,
    geometry: GridGeometry,
    indices: Vec<usize>,
    target: Crs,
    base: String,
    values: ValueTransform,
    schema: Option<PointSchema>,
    locator: &'a mut CellLocator,
}

struct Run<'a> {
    config: &'a EngineConfig,
    request: &'a ConversionRequest,
    context: &'a ConversionContext,
    state: RunState,
    counts: ConversionCounts,
    warnings: WarningLog,
    outputs: Vec<PathBuf>,
    layers_completed: usize,
    layers_total: usize,
    cancelled: bool,
    source_crs: String,
    target_crs: String,
}

impl<'a> Run<'a> {
    fn new(
        config: &'a EngineConfig,
        request: &'a ConversionRequest,
        context: &'a ConversionContext,
    ) -> Self {
        Self {
            config,
            request,
            context,
            state: RunState::Idle,
            counts: ConversionCounts::default(),
            warnings: WarningLog::new(config.max_warnings),
            outputs: Vec::new(),
            layers_completed: 0,
            layers_total: 0,
            cancelled: false,
            source_crs: String::new(),
            target_crs: String::new(),
        }
    }

    fn transition(&mut self, next: RunState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "Run state transition");
            self.state = next;
        }
    }

    fn execute(&mut self, provider: &Arc<dyn TransformProvider>) -> Result<(), ConversionError> {
        let (config, request) = (self.config, self.request);
        config
            .validate()
            .map_err(|e| ConversionError::invalid_request(format!("engine config: {}", e)))?;
        request.validate()?;

        let source = &request.source;
        let options = OpenOptions {
            source_crs: request.source_crs()?,
            variable: request.variable.clone(),
        };
        let mut dataset = grid_source::open(source, &options)
            .map_err(|e| ConversionError::from(e).with_dataset(source))?;
        self.transition(RunState::SourceOpened);

        let target = match request.target_crs()? {
            Some(crs) => crs,
            None => dataset.crs().clone(),
        };
        self.source_crs = dataset.crs().identifier();
        self.target_crs = target.identifier();

        let indices = select_indices(dataset.layer_infos(), request.layers.as_deref())?;
        self.layers_total = indices.len();

        let mut resolver = CoordinateResolver::new(Arc::clone(provider), config.transform_cache_capacity);
        let transform = resolver
            .transform_for(dataset.crs(), &target)
            .map_err(|e| ConversionError::from(e).with_dataset(source))?;
        let geometry = *dataset.geometry();
        let mut locator = CellLocator::new(geometry, transform, config.coordinate_cache_max_cells);

        let values = ValueTransform::new(dataset.nodata(), &request.values, config.nodata_tolerance)
            .map_err(ConversionError::invalid_request)?;

        let schema = match request.mode {
            OutputMode::PerLayer => Some(PointSchema::new(
                vec![request.attributes.value_field.clone()],
                request.attributes.include_cell_index,
            )),
            // Columns are fixed once the completed layers are known
            OutputMode::MultiColumn => None,
        };
        self.transition(RunState::SchemaBuilt);

        info!(
            source = %source.display(),
            source_crs = %self.source_crs,
            target_crs = %self.target_crs,
            layers = self.layers_total,
            rows = geometry.rows,
            cols = geometry.cols,
            mode = ?request.mode,
            "Starting conversion"
        );

        let mut plan = Plan {
            source: source.clone(),
            geometry,
            indices,
            target,
            base: request.output_base(),
            values,
            schema,
            locator: &mut locator,
        };

        match request.mode {
            OutputMode::PerLayer => self.convert_per_layer(&mut dataset, &mut plan)?,
            OutputMode::MultiColumn => self.convert_multi_column(&mut dataset, &mut plan)?,
        }

        self.transition(RunState::Finalizing);
        dataset.close();
        let stats = resolver.stats();
        debug!(hits = stats.hits, misses = stats.misses, "Transform cache stats");
        self.transition(RunState::Completed);
        Ok(())
    }

    /// Next layer to convert, or `None` when done or cancelled.
    fn next_layer(
        &mut self,
        stream: &mut grid_source::LayerStream<'_>,
        source: &Path,
    ) -> Result<Option<GridLayer>, ConversionError> {
        if stream.remaining() == 0 {
            return Ok(None);
        }
        if self.context.is_cancelled() {
            info!(
                completed = self.layers_completed,
                total = self.layers_total,
                "Conversion cancelled"
            );
            self.cancelled = true;
            return Ok(None);
        }
        match stream.next() {
            Some(layer) => {
                let layer = layer.map_err(|e| ConversionError::from(e).with_dataset(source))?;
                self.transition(RunState::LayerInProgress(self.layers_completed + 1));
                Ok(Some(layer))
            }
            None => Ok(None),
        }
    }

    fn layer_done(&mut self, label: &str, records: u64) {
        self.layers_completed += 1;
        info!(
            layer = label,
            completed = self.layers_completed,
            total = self.layers_total,
            records,
            "Layer converted"
        );
        self.context.report(Progress {
            completed: self.layers_completed,
            total: self.layers_total,
            label: label.to_string(),
        });
    }

    fn convert_per_layer(
        &mut self,
        dataset: &mut GridDataset,
        plan: &mut Plan<'_>,
    ) -> Result<(), ConversionError> {
        let schema = plan
            .schema
            .clone()
            .ok_or_else(|| ConversionError::invalid_request("per-layer schema missing"))?;
        let format = self.request.format;
        let mut used = HashSet::new();
        let mut stream = dataset.select_layers(&plan.indices);

        while let Some(layer) = self.next_layer(&mut stream, &plan.source)? {
            let label = layer.label().to_string();
            let name_label = (sanitize_name(&label) != plan.base).then_some(label.as_str());
            let path = layer_output_path(
                &mut used,
                &self.request.output_dir,
                &plan.base,
                name_label,
                format,
            );

            let mut handle = begin_dataset(&path, format, &schema, &plan.target, self.config.batch_size)
                .map_err(|e| ConversionError::from(e).with_dataset(&path).with_layer(&label))?;

            if let Err(err) = self.write_layer(&layer, &mut handle, plan) {
                handle.abandon();
                return Err(err.with_dataset(&path).with_layer(&label));
            }

            let summary = handle
                .end_dataset()
                .map_err(|e| ConversionError::from(e).with_dataset(&path).with_layer(&label))?;
            self.outputs.push(summary.path);
            self.layer_done(&label, summary.records);
        }
        Ok(())
    }

    fn write_layer(
        &mut self,
        layer: &GridLayer,
        handle: &mut DatasetHandle,
        plan: &mut Plan<'_>,
    ) -> Result<(), ConversionError> {
        let emit_absent = plan.values.emits_absent();
        for row in 0..layer.rows {
            for col in 0..layer.cols {
                self.counts.cells_processed += 1;
                let raw = layer.values[row * layer.cols + col];
                let value = plan.values.apply(raw);
                if value.is_none() && !emit_absent {
                    self.counts.skipped_nodata += 1;
                    continue;
                }

                let Some((x, y)) = self.locate(plan.locator, row, col, Some(layer.label()))? else {
                    continue;
                };
                handle
                    .write_record(&OutputPointRecord {
                        row,
                        col,
                        x,
                        y,
                        values: vec![value],
                    })
                    .map_err(|e| ConversionError::from(e).with_cell(row, col))?;
                self.counts.records_written += 1;
            }
        }
        Ok(())
    }

    fn convert_multi_column(
        &mut self,
        dataset: &mut GridDataset,
        plan: &mut Plan<'_>,
    ) -> Result<(), ConversionError> {
        let cells = plan.geometry.len();
        let spill_dir = self.config.spill_dir.as_deref();
        let mut spill = ColumnSpill::new(spill_dir, cells)
            .map_err(|e| spill_error(spill_dir.unwrap_or(&std::env::temp_dir()), e))?;
        let mut labels = Vec::with_capacity(plan.indices.len());
        let emit_absent = plan.values.emits_absent();

        {
            let mut stream = dataset.select_layers(&plan.indices);
            while let Some(layer) = self.next_layer(&mut stream, &plan.source)? {
                let mut column = spill.begin_column().map_err(|e| spill_error(spill.path(), e))?;
                let mut present = 0u64;
                for raw in &layer.values {
                    self.counts.cells_processed += 1;
                    let value = plan.values.apply(*raw);
                    match value {
                        Some(_) => present += 1,
                        None if !emit_absent => self.counts.skipped_nodata += 1,
                        None => {}
                    }
                    column.push(value).map_err(|e| spill_error(spill.path(), e))?;
                }
                column.finish().map_err(|e| spill_error(spill.path(), e))?;
                labels.push(layer.label().to_string());
                self.layer_done(layer.label(), present);
            }
        }

        if labels.is_empty() {
            debug!("No completed layers; nothing to write");
            return Ok(());
        }

        self.transition(RunState::Finalizing);
        let format = self.request.format;
        let schema = PointSchema::new(labels, self.request.attributes.include_cell_index);
        let path = output_path(&self.request.output_dir, &plan.base, None, format);
        let mut handle = begin_dataset(&path, format, &schema, &plan.target, self.config.batch_size)
            .map_err(|e| ConversionError::from(e).with_dataset(&path))?;

        if let Err(err) = self.write_columns(&spill, &mut handle, plan, emit_absent) {
            handle.abandon();
            return Err(match err.context.dataset {
                Some(_) => err,
                None => err.with_dataset(&path),
            });
        }

        let summary = handle
            .end_dataset()
            .map_err(|e| ConversionError::from(e).with_dataset(&path))?;
        debug!(columns = spill.column_count(), records = summary.records, "Wrote multi-column dataset");
        self.outputs.push(summary.path);
        Ok(())
    }

    fn write_columns(
        &mut self,
        spill: &ColumnSpill,
        handle: &mut DatasetHandle,
        plan: &mut Plan<'_>,
        emit_absent: bool,
    ) -> Result<(), ConversionError> {
        let cols = plan.geometry.cols;
        let mut reader = spill.reader();
        let mut index = 0usize;

        while let Some(values) = reader.next_cell().map_err(|e| spill_error(spill.path(), e))? {
            let (row, col) = (index / cols, index % cols);
            index += 1;
            if !emit_absent && values.iter().all(Option::is_none) {
                continue;
            }
            let Some((x, y)) = self.locate(plan.locator, row, col, None)? else {
                continue;
            };
            handle
                .write_record(&OutputPointRecord { row, col, x, y, values })
                .map_err(|e| ConversionError::from(e).with_cell(row, col))?;
            self.counts.records_written += 1;
        }
        Ok(())
    }

    /// Output coordinate of a cell, applying the reprojection error policy.
    fn locate(
        &mut self,
        locator: &mut CellLocator,
        row: usize,
        col: usize,
        layer: Option<&str>,
    ) -> Result<Option<(f64, f64)>, ConversionError> {
        match locator.locate(row, col) {
            Ok(coord) => Ok(Some(coord)),
            Err(e) => match self.request.on_reprojection_error {
                ErrorPolicy::FailFast => Err(ConversionError::from(e).with_cell(row, col)),
                ErrorPolicy::SkipCell => {
                    self.counts.skipped_unprojectable += 1;
                    let message = match layer {
                        Some(layer) => format!("layer {}: skipped cell ({}, {}): {}", layer, row, col, e),
                        None => format!("skipped cell ({}, {}): {}", row, col, e),
                    };
                    self.warnings.push(message);
                    Ok(None)
                }
            },
        }
    }

    fn into_result(self, started: Instant) -> ConversionResult {
        let (warnings, warning_count) = self.warnings.into_parts();
        ConversionResult {
            counts: self.counts,
            layers_completed: self.layers_completed,
            layers_total: self.layers_total,
            outputs: self.outputs,
            warnings,
            warning_count,
            cancelled: self.cancelled,
            elapsed: started.elapsed(),
            source_crs: self.source_crs,
            target_crs: self.target_crs,
        }
    }
}

/// Output path for one layer, suffixed `_2`, `_3`, ... when an earlier
/// layer of the run already claimed the same file name.
fn layer_output_path(
    used: &mut HashSet<PathBuf>,
    dir: &Path,
    base: &str,
    label: Option<&str>,
    format: OutputFormat,
) -> PathBuf {
    let mut path = output_path(dir, base, label, format);
    let mut n = 1;
    while used.contains(&path) {
        n += 1;
        let suffixed = match label {
            Some(label) => format!("{}_{}", label, n),
            None => n.to_string(),
        };
        path = output_path(dir, base, Some(&suffixed), format);
    }
    used.insert(path.clone());
    path
}

/// I/O failure on the temporary column files, attributed to the spill
/// directory rather than the output dataset.
fn spill_error(dir: &Path, e: std::io::Error) -> ConversionError {
    ConversionError::new(ErrorKind::Io, format!("spill file: {}", e)).with_dataset(dir)
}

/// Indices of the requested layers (all when `wanted` is `None`), in
/// source order. Labels or source file names are accepted.
fn select_indices(
    infos: &[LayerInfo],
    wanted: Option<&[String]>,
) -> Result<Vec<usize>, ConversionError> {
    let Some(wanted) = wanted else {
        return Ok((0..infos.len()).collect());
    };
    let mut indices = wanted
        .iter()
        .map(|name| {
            infos
                .iter()
                .position(|info| info.label == *name || info.source_name == *name)
                .ok_or_else(|| ConversionError::invalid_request(format!("layer '{}' not found", name)))
        })
        .collect::<Result<Vec<_>, _>>()?;
    indices.sort_unstable();
    indices.dedup();
    Ok(indices)
}
