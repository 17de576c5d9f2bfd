//! Task selection and expansion into balancing columns.
//!
//! A task whose observed values are all integral is treated as a
//! classification task and expands into one sparse indicator per observed
//! class: present (1) where the row has that class, missing everywhere else.
//! Any other task is balanced as-is. The rule is a heuristic: a regression
//! target that happens to contain only integers is treated as classification.

use itertools::Itertools;
use tracing::warn;

use crate::dataset::Dataset;
use crate::error::ConfigError;

/// Column-name prefixes written by the splitter; never picked up as tasks.
pub const RESERVED_PREFIXES: [&str; 2] = ["Split", "MinIntersetDistance"];

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TaskKind {
    Classification,
    Regression,
}

/// One objective row of the balancing problem.
#[derive(Debug, Clone, PartialEq)]
pub struct BalancingTask {
    pub name: String,
    pub parent: String,
    /// Class value for indicator columns derived from classification tasks.
    pub class: Option<f64>,
    pub values: Vec<Option<f64>>,
}

impl BalancingTask {
    #[inline]
    pub fn is_observed(&self, row: usize) -> bool {
        self.values[row].is_some()
    }

    pub fn observed_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }
}

/// Original task names: the explicit list, or every column except the
/// structure column, ignored columns, and reserved output columns.
pub fn resolve_original_tasks(
    data: &Dataset,
    structure_column: &str,
    tasks: Option<&[String]>,
    ignore_columns: &[String],
) -> Result<Vec<String>, ConfigError> {
    if !data.has_column(structure_column) {
        return Err(ConfigError::UnknownColumn(structure_column.to_string()));
    }
    match tasks {
        Some(tasks) => {
            for t in tasks {
                data.numeric(t)?;
            }
            Ok(tasks.to_vec())
        }
        None => {
            let names = data
                .column_names()
                .into_iter()
                .filter(|&c| c != structure_column)
                .filter(|&c| !ignore_columns.iter().any(|i| i == c))
                .filter(|&c| !RESERVED_PREFIXES.iter().any(|p| c.starts_with(p)))
                .map(str::to_string)
                .collect::<Vec<_>>();
            for t in &names {
                data.numeric(t)?;
            }
            Ok(names)
        }
    }
}

pub fn infer_kind(values: &[Option<f64>]) -> TaskKind {
    if values.iter().flatten().all(|v| v % 1.0 == 0.0) {
        TaskKind::Classification
    } else {
        TaskKind::Regression
    }
}

/// Distinct observed classes, in order of first appearance.
fn observed_classes(values: &[Option<f64>]) -> Vec<f64> {
    values
        .iter()
        .flatten()
        // fold -0.0 into 0.0 so both land in one class
        .map(|&v| if v == 0.0 { 0.0 } else { v })
        .unique_by(|v| v.to_bits())
        .collect()
}

fn class_label(class: f64) -> String {
    if class.abs() < i64::MAX as f64 {
        format!("{}", class as i64)
    } else {
        format!("{class}")
    }
}

/// Balancing tasks for the given original tasks.
///
/// Tasks without a single observed value contribute nothing and are logged.
pub fn expand_tasks(data: &Dataset, original: &[String]) -> Result<Vec<BalancingTask>, ConfigError> {
    let mut out = Vec::new();
    for task in original {
        let values = data.numeric(task)?;
        if values.iter().all(Option::is_none) {
            warn!("[tasks] task {task:?} has no observed values; it is not balanced");
            continue;
        }
        match infer_kind(&values) {
            TaskKind::Classification => {
                for class in observed_classes(&values) {
                    let indicator = values
                        .iter()
                        .map(|v| match v {
                            Some(x) if *x == class => Some(1.0),
                            _ => None,
                        })
                        .collect();
                    out.push(BalancingTask {
                        name: format!("{task}_{}", class_label(class)),
                        parent: task.clone(),
                        class: Some(class),
                        values: indicator,
                    });
                }
            }
            TaskKind::Regression => out.push(BalancingTask {
                name: task.clone(),
                parent: task.clone(),
                class: None,
                values,
            }),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::ColumnValues;

    fn data() -> Dataset {
        Dataset::new()
            .with_column(
                "SMILES",
                ColumnValues::Text(vec![Some("C".into()), Some("CC".into()), Some("CCC".into()), Some("CCCC".into())]),
            )
            .unwrap()
            .with_column("act", ColumnValues::Float(vec![Some(1.0), Some(0.0), None, Some(1.0)]))
            .unwrap()
            .with_column("logp", ColumnValues::Float(vec![Some(0.5), None, Some(2.25), Some(1.0)]))
            .unwrap()
            .with_column("empty", ColumnValues::Float(vec![None, None, None, None]))
            .unwrap()
            .with_column("Split", ColumnValues::Int(vec![Some(0), Some(1), Some(0), Some(1)]))
            .unwrap()
            .with_column("MinIntersetDistance", ColumnValues::Float(vec![Some(0.1); 4]))
            .unwrap()
            .with_column("id", ColumnValues::Int(vec![Some(10), Some(11), Some(12), Some(13)]))
            .unwrap()
    }

    #[test]
    fn auto_detection_skips_reserved_and_ignored_columns() {
        let tasks = resolve_original_tasks(&data(), "SMILES", None, &["id".to_string()]).unwrap();
        assert_eq!(tasks, vec!["act", "logp", "empty"]);
    }

    #[test]
    fn explicit_tasks_must_exist_and_be_numeric() {
        let d = data();
        let err = resolve_original_tasks(&d, "SMILES", Some(&["nope".to_string()]), &[]).unwrap_err();
        assert_eq!(err, ConfigError::UnknownColumn("nope".into()));
        let err = resolve_original_tasks(&d, "SMILES", Some(&["SMILES".to_string()]), &[]).unwrap_err();
        assert_eq!(err, ConfigError::NonNumericTask("SMILES".into()));
        let err = resolve_original_tasks(&d, "smiles", None, &[]).unwrap_err();
        assert_eq!(err, ConfigError::UnknownColumn("smiles".into()));
    }

    #[test]
    fn classification_expands_into_sparse_indicators() {
        let tasks = expand_tasks(&data(), &["act".to_string()]).unwrap();
        let names: Vec<_> = tasks.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["act_1", "act_0"]);
        assert_eq!(tasks[0].values, vec![Some(1.0), None, None, Some(1.0)]);
        // rows with the other class are missing, not zero
        assert_eq!(tasks[1].values, vec![None, Some(1.0), None, None]);
        assert!(tasks.iter().all(|t| t.parent == "act"));
    }

    #[test]
    fn regression_and_empty_tasks() {
        let tasks = expand_tasks(&data(), &["logp".to_string(), "empty".to_string()]).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].name, "logp");
        assert_eq!(tasks[0].class, None);
        assert_eq!(tasks[0].observed_count(), 3);
    }

    #[test]
    fn single_class_indicator_equals_observed_mask() {
        let d = Dataset::new()
            .with_column("y", ColumnValues::Int(vec![Some(3), None, Some(3)]))
            .unwrap();
        let tasks = expand_tasks(&d, &["y".to_string()]).unwrap();
        assert_eq!(tasks.len(), 1);
        let mask: Vec<bool> = (0..3).map(|r| tasks[0].is_observed(r)).collect();
        assert_eq!(mask, vec![true, false, true]);
    }

    #[test]
    fn kind_inference() {
        assert_eq!(infer_kind(&[Some(1.0), None, Some(-2.0)]), TaskKind::Classification);
        assert_eq!(infer_kind(&[Some(1.0), Some(0.5)]), TaskKind::Regression);
    }
}
