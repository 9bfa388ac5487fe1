use crate::query::ast::common::TableRef;

#[derive(Debug, Clone)]
pub struct Truncate {
    pub table: TableRef,
}
