use crate::query::ast::{common::TableRef, truncate::Truncate};

#[derive(Debug, Clone)]
pub struct TruncateBuilder {
    ast: Truncate,
}

impl TruncateBuilder {
    pub fn new(table: TableRef) -> Self {
        Self {
            ast: Truncate { table },
        }
    }

    pub fn build(self) -> Truncate {
        self.ast
    }
}

#[cfg(test)]
mod tests {
    use crate::query::{ast::common::TableRef, builder::truncate::TruncateBuilder};

    #[test]
    fn test_truncate_builder() {
        let ast = TruncateBuilder::new(TableRef {
            schema: None,
            name: "users".to_string(),
        })
        .build();

        assert_eq!(ast.table.name, "users");
        assert!(ast.table.schema.is_none());
    }
}
