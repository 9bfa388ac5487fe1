use crate::{
    error::PlanError,
    query::ast::{
        common::TableRef,
        copy::{Copy, CsvOptions},
    },
};

#[derive(Debug, Clone)]
pub struct CopyBuilder {
    ast: Copy,
}

impl CopyBuilder {
    pub fn new(table: TableRef) -> Self {
        Self {
            ast: Copy {
                table,
                columns: Vec::new(),
                options: CsvOptions::default(),
            },
        }
    }

    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.ast.columns = columns.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn delimiter(mut self, delimiter: char) -> Self {
        self.ast.options.delimiter = delimiter;
        self
    }

    pub fn quote(mut self, quote: char) -> Self {
        self.ast.options.quote = quote;
        self
    }

    pub fn options(mut self, options: CsvOptions) -> Self {
        self.ast.options = options;
        self
    }

    /// Finishes the statement. A COPY with no target columns is a
    /// configuration error rather than a silent no-op.
    pub fn build(self) -> Result<Copy, PlanError> {
        if self.ast.columns.is_empty() {
            return Err(PlanError::EmptyColumnList(self.ast.table.to_string()));
        }
        Ok(self.ast)
    }
}
