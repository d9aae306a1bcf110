//! YAML job files.
//!
//! ```yaml
//! engine:
//!   batch_size: 8192
//! defaults:
//!   output_dir: ${OUT_DIR}
//!   format: csv
//!   values:
//!     nodata: pass_through
//! jobs:
//!   - name: ppt
//!     source: prism/ppt
//!   - name: tmean
//!     source: prism/tmean
//!     mode: multi_column
//! ```
//!
//! `${VAR}` references are expanded from the environment before parsing.
//! Each job is merged over `defaults` (nested maps merge key by key) and
//! relative paths are resolved against the job file's directory.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use point_converter::{ConversionRequest, EngineConfig};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};

#[derive(Debug, Deserialize)]
struct RawJobFile {
    #[serde(default)]
    engine: Option<EngineConfig>,
    #[serde(default)]
    defaults: Option<Value>,
    jobs: Vec<Value>,
}

/// One named conversion.
#[derive(Debug, Clone)]
pub struct Job {
    pub name: String,
    pub request: ConversionRequest,
}

/// A parsed, validated job file.
#[derive(Debug, Clone)]
pub struct JobFile {
    pub engine: EngineConfig,
    pub jobs: Vec<Job>,
}

/// Read, expand and validate a job file.
pub fn load_jobs(path: &Path) -> Result<JobFile> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read job file {}", path.display()))?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    parse_jobs(&content, base_dir).with_context(|| format!("Invalid job file {}", path.display()))
}

/// Parse job file text; relative paths are resolved against `base_dir`.
pub fn parse_jobs(content: &str, base_dir: &Path) -> Result<JobFile> {
    let expanded = shellexpand::env(content).context("Failed to expand environment variables")?;
    let raw: RawJobFile = serde_yaml::from_str(&expanded).context("Failed to parse job file YAML")?;

    if raw.jobs.is_empty() {
        bail!("job file defines no jobs");
    }

    let engine = raw.engine.unwrap_or_else(EngineConfig::from_env);
    engine.validate().map_err(|e| anyhow!("invalid engine config: {}", e))?;

    let defaults = raw.defaults.unwrap_or_else(|| Value::Mapping(Mapping::new()));
    let mut names = HashSet::new();
    let mut jobs = Vec::with_capacity(raw.jobs.len());

    for (i, job) in raw.jobs.into_iter().enumerate() {
        let mut merged = defaults.clone();
        merge(&mut merged, job);

        let name = match &mut merged {
            Value::Mapping(map) => map.remove("name"),
            _ => bail!("job {} is not a mapping", i + 1),
        };
        let name = match name {
            Some(Value::String(name)) => name,
            Some(other) => bail!("job {} has a non-string name: {:?}", i + 1, other),
            None => format!("job-{}", i + 1),
        };
        if !names.insert(name.clone()) {
            bail!("duplicate job name '{}'", name);
        }

        let mut request: ConversionRequest = serde_yaml::from_value(merged)
            .with_context(|| format!("job '{}' is not a valid request", name))?;
        request.source = resolve(base_dir, &request.source);
        request.output_dir = resolve(base_dir, &request.output_dir);
        request
            .validate()
            .with_context(|| format!("job '{}' failed validation", name))?;

        jobs.push(Job { name, request });
    }

    Ok(JobFile { engine, jobs })
}

/// Overlay `overlay` onto `base`; mappings merge recursively, anything else
/// replaces.
fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base), Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn resolve(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use point_converter::{NodataPolicy, OutputFormat, OutputMode};

    const JOBS: &str = r#"
defaults:
  output_dir: out
  format: csv
  values:
    nodata: pass_through
    scale: 0.1
jobs:
  - name: ppt
    source: prism/ppt
  - source: /abs/tmean
    mode: multi_column
    values:
      scale: 1.0
"#;

    #[test]
    fn test_defaults_merge() {
        let file = parse_jobs(JOBS, Path::new("/jobs")).unwrap();
        assert_eq!(file.jobs.len(), 2);

        let ppt = &file.jobs[0];
        assert_eq!(ppt.name, "ppt");
        assert_eq!(ppt.request.source, PathBuf::from("/jobs/prism/ppt"));
        assert_eq!(ppt.request.output_dir, PathBuf::from("/jobs/out"));
        assert_eq!(ppt.request.format, OutputFormat::Csv);
        assert_eq!(ppt.request.values.scale, 0.1);

        let tmean = &file.jobs[1];
        assert_eq!(tmean.name, "job-2");
        assert_eq!(tmean.request.source, PathBuf::from("/abs/tmean"));
        assert_eq!(tmean.request.mode, OutputMode::MultiColumn);
        assert_eq!(tmean.request.values.scale, 1.0);
        assert_eq!(tmean.request.values.nodata, NodataPolicy::PassThrough);
    }

    #[test]
    fn test_env_expansion() {
        std::env::set_var("G2P_TEST_JOB_OUT", "/expanded");
        let text = "jobs:\n  - source: a.asc\n    output_dir: ${G2P_TEST_JOB_OUT}/points\n";
        let file = parse_jobs(text, Path::new("/jobs")).unwrap();
        assert_eq!(file.jobs[0].request.output_dir, PathBuf::from("/expanded/points"));

        let missing = "jobs:\n  - source: a.asc\n    output_dir: ${G2P_TEST_UNSET_VARIABLE}\n";
        assert!(parse_jobs(missing, Path::new("/jobs")).is_err());
    }

    #[test]
    fn test_rejects_bad_files() {
        assert!(parse_jobs("jobs: []\n", Path::new(".")).is_err());
        let dup = "jobs:\n  - {name: a, source: x.asc, output_dir: o}\n  - {name: a, source: y.asc, output_dir: o}\n";
        assert!(parse_jobs(dup, Path::new(".")).is_err());
        let bad_crs = "jobs:\n  - {source: x.asc, output_dir: o, target_crs: 'EPSG:1'}\n";
        assert!(parse_jobs(bad_crs, Path::new(".")).is_err());
        let bad_engine = "engine: {batch_size: 0}\njobs:\n  - {source: x.asc, output_dir: o}\n";
        assert!(parse_jobs(bad_engine, Path::new(".")).is_err());
    }
}
