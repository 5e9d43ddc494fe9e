//! Observation table
//!
//! 列主序数值表。缺失单元格为 `NaN`，行数在构造时固定。
//! 序列化时缺失单元格写为 `null`。

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{GFormulaError, Result};
use crate::sanitize::has_infinite_values;

/// 命名数值列上的有序行集合
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SerializedTable", into = "SerializedTable")]
pub struct ObservationTable {
    names: Vec<String>,
    columns: Vec<Vec<f64>>,
    n_rows: usize,
}

impl ObservationTable {
    /// 由 `(列名, 值)` 对构建表
    ///
    /// 列名为空或重复、列长不一致、含无穷值时报错
    pub fn from_columns<I, S>(columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Vec<f64>)>,
        S: Into<String>,
    {
        let mut names: Vec<String> = Vec::new();
        let mut values: Vec<Vec<f64>> = Vec::new();

        for (name, column) in columns {
            let name = name.into();
            if name.trim().is_empty() {
                return Err(GFormulaError::Configuration(
                    "column names must be non-empty".to_string(),
                ));
            }
            if names.iter().any(|n| *n == name) {
                return Err(GFormulaError::Configuration(format!(
                    "duplicate column '{name}'"
                )));
            }
            if has_infinite_values(&column) {
                return Err(GFormulaError::Configuration(format!(
                    "column '{name}' contains infinite values"
                )));
            }
            if let Some(first) = values.first() {
                if first.len() != column.len() {
                    return Err(GFormulaError::Configuration(format!(
                        "column '{name}' has {} rows, expected {}",
                        column.len(),
                        first.len()
                    )));
                }
            }
            names.push(name);
            values.push(column);
        }

        let n_rows = values.first().map_or(0, Vec::len);
        Ok(Self {
            names,
            columns: values,
            n_rows,
        })
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_columns(&self) -> usize {
        self.names.len()
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.position(name).map(|i| self.columns[i].as_slice())
    }

    /// 同 [`column`](Self::column)，未知列名返回配置错误
    pub fn require_column(&self, name: &str) -> Result<&[f64]> {
        self.column(name).ok_or_else(|| {
            GFormulaError::Configuration(format!("column '{name}' not found in table"))
        })
    }

    /// 单元格值（缺失为 `NaN`），未知列或行返回 `None`
    pub fn value(&self, row: usize, name: &str) -> Option<f64> {
        self.column(name).and_then(|c| c.get(row).copied())
    }

    /// 覆盖已有列或追加新列
    pub fn set_column(&mut self, name: &str, values: Vec<f64>) -> Result<()> {
        if values.len() != self.n_rows && !self.names.is_empty() {
            return Err(GFormulaError::Configuration(format!(
                "column '{name}' has {} rows, expected {}",
                values.len(),
                self.n_rows
            )));
        }
        if has_infinite_values(&values) {
            return Err(GFormulaError::Configuration(format!(
                "column '{name}' contains infinite values"
            )));
        }

        match self.position(name) {
            Some(i) => self.columns[i] = values,
            None => {
                if self.names.is_empty() {
                    self.n_rows = values.len();
                }
                self.names.push(name.to_string());
                self.columns.push(values);
            }
        }
        Ok(())
    }

    /// 按给定行号顺序组成新表（允许重复）
    pub fn select_rows(&self, indices: &[usize]) -> Result<Self> {
        if let Some(&bad) = indices.iter().find(|&&i| i >= self.n_rows) {
            return Err(GFormulaError::Configuration(format!(
                "row index {bad} out of range for table of {} rows",
                self.n_rows
            )));
        }

        let columns = self
            .columns
            .iter()
            .map(|c| indices.iter().map(|&i| c[i]).collect())
            .collect();

        Ok(Self {
            names: self.names.clone(),
            columns,
            n_rows: indices.len(),
        })
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }
}

impl fmt::Display for ObservationTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ObservationTable({} rows x {} columns: {})",
            self.n_rows,
            self.names.len(),
            self.names.join(", ")
        )
    }
}

// ==================== Serialized Form ====================

#[derive(Clone, Debug, Serialize, Deserialize)]
struct SerializedColumn {
    name: String,
    values: Vec<Option<f64>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct SerializedTable {
    columns: Vec<SerializedColumn>,
}

impl TryFrom<SerializedTable> for ObservationTable {
    type Error = GFormulaError;

    fn try_from(raw: SerializedTable) -> Result<Self> {
        ObservationTable::from_columns(raw.columns.into_iter().map(|c| {
            let values = c
                .values
                .into_iter()
                .map(|v| v.unwrap_or(f64::NAN))
                .collect();
            (c.name, values)
        }))
    }
}

impl From<ObservationTable> for SerializedTable {
    fn from(table: ObservationTable) -> Self {
        let columns = table
            .names
            .into_iter()
            .zip(table.columns)
            .map(|(name, values)| SerializedColumn {
                name,
                values: values
                    .into_iter()
                    .map(|v| if v.is_nan() { None } else { Some(v) })
                    .collect(),
            })
            .collect();
        SerializedTable { columns }
    }
}
