/// Shorthand for [`TableRef::new`](crate::query::ast::common::TableRef::new):
/// `table_ref!("sales")` or `table_ref!("public", "sales")`.
#[macro_export]
macro_rules! table_ref {
    ($name:expr) => {
        $crate::query::ast::common::TableRef::new(None, $name)
    };
    ($schema:expr, $name:expr) => {
        $crate::query::ast::common::TableRef::new(Some($schema), $name)
    };
}
