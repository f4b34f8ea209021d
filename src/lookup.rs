//! Side tables: sample names, cell types and predefined contrasts.
//!
//! All of them are loaded once before merging and only read afterwards.

use anyhow::{bail, Context, Result};
use indexmap::IndexSet;
use std::collections::HashMap;
use std::path::Path;

use crate::anchor::SampleKey;
use crate::utils::{open_reader, read_lines, string_to_kmer};

/// Two-way mapping between sample names and sample ids.
#[derive(Debug, Clone, Default)]
pub struct SampleNames {
    name_to_id: HashMap<String, u64>,
    id_to_name: HashMap<u64, String>,
}

impl SampleNames {
    /// Reads `<sample_name> <sample_id>` pairs, one per line.
    pub fn load(path: &Path) -> Result<Self> {
        let mut names = SampleNames::default();
        for (idx, line) in read_lines(path)?.enumerate() {
            let line =
                line.with_context(|| format!("read line {} from {}", idx + 1, path.display()))?;
            let mut parts = line.split_whitespace();
            let (Some(name), Some(id)) = (parts.next(), parts.next()) else {
                if line.trim().is_empty() {
                    continue;
                }
                bail!("line {} of {} is not '<sample_name> <sample_id>'", idx + 1, path.display());
            };
            let id: u64 = id.parse().with_context(|| {
                format!("parse sample id '{id}' on line {} of {}", idx + 1, path.display())
            })?;
            names.insert(name, id);
        }
        Ok(names)
    }

    pub fn insert(&mut self, name: &str, id: u64) {
        self.name_to_id.insert(name.to_string(), id);
        self.id_to_name.insert(id, name.to_string());
    }

    pub fn id(&self, name: &str) -> Option<u64> {
        self.name_to_id.get(name).copied()
    }

    pub fn name(&self, id: u64) -> Option<&str> {
        self.id_to_name.get(&id).map(String::as_str)
    }

    /// Name of the sample, or its numeric id when unnamed.
    pub fn display(&self, id: u64) -> String {
        self.name(id).map_or_else(|| id.to_string(), str::to_string)
    }

    pub fn len(&self) -> usize {
        self.name_to_id.len()
    }
}

fn samplesheet_reader(path: &Path) -> Result<csv::Reader<std::io::BufReader<Box<dyn std::io::Read>>>> {
    Ok(csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_reader(open_reader(path)?))
}

fn resolve_sample(names: &SampleNames, name: &str, path: &Path, line: usize) -> Result<u64> {
    match names.id(name) {
        Some(id) => Ok(id),
        None => bail!("unknown sample '{}' on line {} of {}", name, line, path.display()),
    }
}

/// `(sample_id, barcode) -> cell type` from rows `sample_name,barcode,cell_type`.
#[derive(Debug, Clone, Default)]
pub struct CellTypeTable {
    cell_types: IndexSet<String>,
    by_sample: HashMap<SampleKey, u32>,
}

impl CellTypeTable {
    pub fn load(path: &Path, names: &SampleNames) -> Result<Self> {
        let mut table = CellTypeTable::default();
        for (idx, row) in samplesheet_reader(path)?.records().enumerate() {
            let row = row.with_context(|| format!("read row {} of {}", idx + 1, path.display()))?;
            if row.len() < 3 {
                bail!("row {} of {} must be 'sample_name,barcode,cell_type'", idx + 1, path.display());
            }
            let sample_id = resolve_sample(names, &row[0], path, idx + 1)?;
            let barcode = string_to_kmer(&row[1])
                .with_context(|| format!("parse barcode on row {} of {}", idx + 1, path.display()))?;
            table.insert(sample_id, barcode, &row[2]);
        }
        Ok(table)
    }

    pub fn insert(&mut self, sample_id: u64, barcode: u64, cell_type: &str) {
        let (cell_type_id, _) = self.cell_types.insert_full(cell_type.to_string());
        self.by_sample.insert((sample_id, barcode), cell_type_id as u32);
    }

    pub fn contains(&self, key: &SampleKey) -> bool {
        self.by_sample.contains_key(key)
    }

    pub fn cell_type_id(&self, key: &SampleKey) -> Option<u32> {
        self.by_sample.get(key).copied()
    }

    pub fn cell_type_name(&self, id: u32) -> Option<&str> {
        self.cell_types.get_index(id as usize).map(String::as_str)
    }

    pub fn n_cell_types(&self) -> usize {
        self.cell_types.len()
    }
}

/// Predefined contrast vectors from rows `sample_name,c_1,...,c_n`.
#[derive(Debug, Clone, Default)]
pub struct ContrastSheet {
    n_cjs: usize,
    by_sample: HashMap<u64, Vec<f64>>,
}

impl ContrastSheet {
    pub fn load(path: &Path, names: &SampleNames) -> Result<Self> {
        let mut sheet = ContrastSheet::default();
        for (idx, row) in samplesheet_reader(path)?.records().enumerate() {
            let row = row.with_context(|| format!("read row {} of {}", idx + 1, path.display()))?;
            if row.len() < 2 {
                bail!("row {} of {} has no contrast values", idx + 1, path.display());
            }
            let sample_id = resolve_sample(names, &row[0], path, idx + 1)?;
            let values = row
                .iter()
                .skip(1)
                .map(|v| v.parse::<f64>())
                .collect::<Result<Vec<_>, _>>()
                .with_context(|| format!("parse contrast on row {} of {}", idx + 1, path.display()))?;
            sheet.insert(sample_id, values).with_context(|| format!("row {} of {}", idx + 1, path.display()))?;
        }
        Ok(sheet)
    }

    pub fn insert(&mut self, sample_id: u64, values: Vec<f64>) -> Result<()> {
        if self.by_sample.is_empty() {
            self.n_cjs = values.len();
        } else if values.len() != self.n_cjs {
            bail!("expected {} contrast values, found {}", self.n_cjs, values.len());
        }
        self.by_sample.insert(sample_id, values);
        Ok(())
    }

    pub fn n_cjs(&self) -> usize {
        self.n_cjs
    }

    pub fn contrasts(&self, sample_id: u64) -> Option<&[f64]> {
        self.by_sample.get(&sample_id).map(Vec::as_slice)
    }
}

/// Every side table of one run.
#[derive(Debug, Clone, Default)]
pub struct LookupTables {
    pub sample_names: SampleNames,
    pub cell_types: Option<CellTypeTable>,
    pub contrasts: Option<ContrastSheet>,
}

impl LookupTables {
    pub fn load(
        sample_names: Option<&Path>,
        cell_type_samplesheet: Option<&Path>,
        cjs_samplesheet: Option<&Path>,
    ) -> Result<Self> {
        let sample_names = match sample_names {
            Some(path) => SampleNames::load(path)?,
            None => SampleNames::default(),
        };
        let cell_types = cell_type_samplesheet
            .map(|path| CellTypeTable::load(path, &sample_names))
            .transpose()?;
        let contrasts =
            cjs_samplesheet.map(|path| ContrastSheet::load(path, &sample_names)).transpose()?;
        Ok(Self { sample_names, cell_types, contrasts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{content}").unwrap();
        file
    }

    fn names() -> SampleNames {
        let file = write_tmp("liver 0\nbrain\t1\n\nlung 2\n");
        SampleNames::load(file.path()).unwrap()
    }

    #[test]
    fn test_sample_names_both_ways() {
        let names = names();
        assert_eq!(names.len(), 3);
        assert_eq!(names.id("brain"), Some(1));
        assert_eq!(names.name(2), Some("lung"));
        assert_eq!(names.display(0), "liver");
        assert_eq!(names.display(9), "9");
    }

    #[test]
    fn test_sample_names_rejects_bad_id() {
        let file = write_tmp("liver zero\n");
        assert!(SampleNames::load(file.path()).is_err());
    }

    #[test]
    fn test_cell_type_table() {
        let file = write_tmp("liver,ACGT,hepatocyte\nbrain,AAAA,neuron\nliver,TTTT,hepatocyte\n");
        let table = CellTypeTable::load(file.path(), &names()).unwrap();
        assert_eq!(table.n_cell_types(), 2);
        let key = (0, string_to_kmer("TTTT").unwrap());
        assert!(table.contains(&key));
        assert_eq!(table.cell_type_id(&key), Some(0));
        assert_eq!(table.cell_type_name(1), Some("neuron"));
        assert!(!table.contains(&(1, string_to_kmer("ACGT").unwrap())));
    }

    #[test]
    fn test_cell_type_table_unknown_sample() {
        let file = write_tmp("kidney,ACGT,podocyte\n");
        let err = CellTypeTable::load(file.path(), &names()).unwrap_err();
        assert!(format!("{err:#}").contains("unknown sample 'kidney'"));
    }

    #[test]
    fn test_contrast_sheet() {
        let file = write_tmp("liver,1.0,-1\nbrain,-0.5,0.5\n");
        let sheet = ContrastSheet::load(file.path(), &names()).unwrap();
        assert_eq!(sheet.n_cjs(), 2);
        assert_eq!(sheet.contrasts(1), Some(&[-0.5, 0.5][..]));
        assert_eq!(sheet.contrasts(2), None);
    }

    #[test]
    fn test_contrast_sheet_ragged_rows() {
        let file = write_tmp("liver,1.0,-1\nbrain,-0.5\n");
        assert!(ContrastSheet::load(file.path(), &names()).is_err());
    }
}
