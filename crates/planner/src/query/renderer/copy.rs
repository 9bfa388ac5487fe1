use crate::query::ast::copy::Copy;
use crate::query::renderer::Render;

impl Render for Copy {
    fn render(&self, r: &mut super::Renderer) {
        r.sql.push_str("COPY ");
        r.render_table_ref(&self.table);

        r.sql.push_str(" ( ");
        let cols: Vec<String> = self
            .columns
            .iter()
            .map(|col| r.dialect.quote_identifier(col))
            .collect();
        r.sql.push_str(&cols.join(", "));
        r.sql.push_str(" )");

        r.sql.push_str(" FROM STDIN");

        let delimiter = r.dialect.quote_literal(&self.options.delimiter.to_string());
        let quote = r.dialect.quote_literal(&self.options.quote.to_string());
        r.sql.push_str(" WITH CSV DELIMITER AS ");
        r.sql.push_str(&delimiter);
        r.sql.push_str(" QUOTE AS ");
        r.sql.push_str(&quote);
        r.sql.push(';');
    }
}
