//! Import of model instances from `*.eip` text files
//!
//! A file describes one model instance:
//!
//! ```text
//! # eco-industrial park, two companies
//! model 3
//! alpha = 1.0
//! beta = 0.5
//! delta = 0.25
//! process 1 1 load=10 cin=0 cout=5
//! process 2 1 load=4 cin=1 cout=2
//! ```
//!
//! The `model` line is optional; without it the id is taken from the
//! trailing digits of the file name (`park_12.eip` -> 12).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use regex::Regex;
use rusqlite::Connection;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::assembler;
use crate::db;
use crate::models::{Coefficients, CompanyId, ModelInput, ProcessId, ProcessRecord};

/// Find all model files below `dir`
pub fn find_model_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "eip"))
        .collect();
    files.sort();
    files
}

fn id_from_file_name(path: &Path) -> Option<i64> {
    let stem = path.file_stem()?.to_str()?;
    let digits: String = stem
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse().ok()
}

/// Parse the text of one model file
pub fn parse_model(content: &str, fallback_id: Option<i64>) -> Result<ModelInput> {
    let model_re = Regex::new(r"^model\s+(-?\d+)$")?;
    let coeff_re = Regex::new(r"^(alpha|beta|delta)\s*=\s*(\S+)$")?;
    let process_re = Regex::new(
        r"^process\s+(-?\d+)\s+(-?\d+)\s+load\s*=\s*(\S+)\s+cin\s*=\s*(\S+)\s+cout\s*=\s*(\S+)$",
    )?;

    let mut model_id = None;
    let (mut alpha, mut beta, mut delta) = (None, None, None);
    let mut processes = Vec::new();

    for (n, raw) in content.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let lineno = n + 1;

        if let Some(cap) = model_re.captures(line) {
            model_id = Some(cap[1].parse::<i64>()?);
        } else if let Some(cap) = coeff_re.captures(line) {
            let value: f64 = cap[2]
                .parse()
                .with_context(|| format!("line {lineno}: bad {} value", &cap[1]))?;
            match &cap[1] {
                "alpha" => alpha = Some(value),
                "beta" => beta = Some(value),
                _ => delta = Some(value),
            }
        } else if let Some(cap) = process_re.captures(line) {
            let number = |i: usize| -> Result<f64> {
                cap[i]
                    .parse()
                    .with_context(|| format!("line {lineno}: bad number {:?}", &cap[i]))
            };
            processes.push(ProcessRecord {
                company: CompanyId(cap[1].parse()?),
                process: ProcessId(cap[2].parse()?),
                load: number(3)?,
                concentration_in_max: number(4)?,
                concentration_out_max: number(5)?,
            });
        } else {
            bail!("line {lineno}: unrecognised {line:?}");
        }
    }

    let model_id = model_id
        .or(fallback_id)
        .ok_or_else(|| anyhow!("no model id given and none in the file name"))?;
    let missing = |name: &str| anyhow!("model {model_id}: missing {name}");

    Ok(ModelInput {
        model_id,
        coefficients: Coefficients {
            alpha: alpha.ok_or_else(|| missing("alpha"))?,
            beta: beta.ok_or_else(|| missing("beta"))?,
            delta: delta.ok_or_else(|| missing("delta"))?,
        },
        processes,
    })
}

/// Parse a model file and check that it assembles
pub fn read_model_file(path: &Path) -> Result<ModelInput> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let input = parse_model(&content, id_from_file_name(path))
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    assembler::assemble(&input)
        .with_context(|| format!("{} does not describe a valid model", path.display()))?;
    Ok(input)
}

/// Import every model file under `dir` into the database
pub fn import_to_database(conn: &mut Connection, dir: &Path) -> Result<ImportStats> {
    let mut stats = ImportStats::default();

    info!(dir = %dir.display(), "scanning for model files");
    let files = find_model_files(dir);
    debug!(count = files.len(), "found model files");

    for path in &files {
        match read_model_file(path) {
            Ok(input) => {
                db::upsert_model(conn, &input)?;
                stats.models += 1;
                stats.processes += input.processes.len();
                info!(
                    model = input.model_id,
                    processes = input.processes.len(),
                    file = %path.display(),
                    "imported model"
                );
            }
            Err(e) => {
                warn!(file = %path.display(), "skipping model file: {e:#}");
                stats.errors += 1;
            }
        }
    }

    Ok(stats)
}

#[derive(Debug, Default)]
pub struct ImportStats {
    pub models: usize,
    pub processes: usize,
    pub errors: usize,
}

impl std::fmt::Display for ImportStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Imported {} models ({} processes). Errors: {}",
            self.models, self.processes, self.errors
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARK: &str = "\
# two companies
model 3
alpha = 1.0
beta = 0.5
delta = 0.25   # intra-company cost

process 1 1 load=10 cin=0 cout=5
process 2 1 load=4 cin=1 cout=2
";

    #[test]
    fn parses_model_text() {
        let model = parse_model(PARK, None).unwrap();
        assert_eq!(model.model_id, 3);
        assert_eq!(model.coefficients.delta, 0.25);
        assert_eq!(model.processes.len(), 2);
        assert_eq!(model.processes[1].concentration_out_max, 2.0);
    }

    #[test]
    fn id_falls_back_to_file_name() {
        let text = PARK.replace("model 3\n", "");
        let model = parse_model(&text, id_from_file_name(Path::new("park_12.eip"))).unwrap();
        assert_eq!(model.model_id, 12);
        assert_eq!(id_from_file_name(Path::new("park.eip")), None);
    }

    #[test]
    fn rejects_unknown_lines_and_missing_coefficients() {
        assert!(parse_model("model 1\nalpha = 1\nbeta = 1\nfoo\n", None).is_err());
        assert!(parse_model("model 1\nalpha = 1\nbeta = 1\n", None).is_err());
        assert!(parse_model("alpha = 1\nbeta = 1\ndelta = 1\n", None).is_err());
    }

    #[test]
    fn imports_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("park_3.eip"), PARK).unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(
            dir.path().join("nested/park_8.eip"),
            "alpha = 1\nbeta = 1\ndelta = 1\nprocess 1 1 load=6 cin=0 cout=3\n",
        )
        .unwrap();
        // duplicate process key: does not assemble
        fs::write(
            dir.path().join("broken_9.eip"),
            "alpha = 1\nbeta = 1\ndelta = 1\n\
             process 1 1 load=6 cin=0 cout=3\nprocess 1 1 load=7 cin=0 cout=3\n",
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut conn = Connection::open_in_memory().unwrap();
        db::init_schema(&conn).unwrap();
        let stats = import_to_database(&mut conn, dir.path()).unwrap();

        assert_eq!(stats.models, 2);
        assert_eq!(stats.processes, 3);
        assert_eq!(stats.errors, 1);
        assert_eq!(db::list_model_ids(&conn).unwrap(), vec![3, 8]);
    }
}
