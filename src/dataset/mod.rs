pub mod io;

use crate::error::ConfigError;

/// Cells of one column. Missing values are explicit `None`s.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValues {
    Text(Vec<Option<String>>),
    Float(Vec<Option<f64>>),
    Int(Vec<Option<i64>>),
}

impl ColumnValues {
    pub fn len(&self) -> usize {
        match self {
            ColumnValues::Text(v) => v.len(),
            ColumnValues::Float(v) => v.len(),
            ColumnValues::Int(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Numeric view of the column; `None` for text columns.
    pub fn to_numeric(&self) -> Option<Vec<Option<f64>>> {
        match self {
            ColumnValues::Text(_) => None,
            ColumnValues::Float(v) => Some(v.clone()),
            ColumnValues::Int(v) => Some(v.iter().map(|x| x.map(|i| i as f64)).collect()),
        }
    }

    /// Cell rendered for tabular output; missing cells are empty.
    pub fn render(&self, row: usize) -> String {
        match self {
            ColumnValues::Text(v) => v[row].clone().unwrap_or_default(),
            ColumnValues::Float(v) => v[row].map(|x| x.to_string()).unwrap_or_default(),
            ColumnValues::Int(v) => v[row].map(|x| x.to_string()).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: ColumnValues,
}

/// Row-ordered table of named columns. Row identity is the position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    columns: Vec<Column>,
    n_rows: usize,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    #[inline]
    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Adds a column, replacing any existing column of the same name in place.
    /// The first column fixes the row count.
    pub fn insert(&mut self, name: impl Into<String>, values: ColumnValues) -> Result<(), ConfigError> {
        let name = name.into();
        if self.columns.is_empty() {
            self.n_rows = values.len();
        } else if values.len() != self.n_rows {
            return Err(ConfigError::ColumnLength {
                column: name,
                rows: values.len(),
                expected: self.n_rows,
            });
        }
        match self.columns.iter_mut().find(|c| c.name == name) {
            Some(existing) => existing.values = values,
            None => self.columns.push(Column { name, values }),
        }
        Ok(())
    }

    /// Builder-style `insert`, handy when assembling tables by hand.
    pub fn with_column(mut self, name: impl Into<String>, values: ColumnValues) -> Result<Self, ConfigError> {
        self.insert(name, values)?;
        Ok(self)
    }

    pub fn drop_columns(&mut self, names: &[String]) {
        self.columns.retain(|c| !names.contains(&c.name));
    }

    pub fn numeric(&self, name: &str) -> Result<Vec<Option<f64>>, ConfigError> {
        let col = self
            .column(name)
            .ok_or_else(|| ConfigError::UnknownColumn(name.to_string()))?;
        col.values
            .to_numeric()
            .ok_or_else(|| ConfigError::NonNumericTask(name.to_string()))
    }

    pub fn text(&self, name: &str) -> Result<&[Option<String>], ConfigError> {
        let col = self
            .column(name)
            .ok_or_else(|| ConfigError::UnknownColumn(name.to_string()))?;
        match &col.values {
            ColumnValues::Text(v) => Ok(v),
            _ => Err(ConfigError::NonTextColumn(name.to_string())),
        }
    }

    pub fn ints(&self, name: &str) -> Option<&[Option<i64>]> {
        match &self.column(name)?.values {
            ColumnValues::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn floats(&self, name: &str) -> Option<&[Option<f64>]> {
        match &self.column(name)?.values {
            ColumnValues::Float(v) => Some(v),
            _ => None,
        }
    }
}
