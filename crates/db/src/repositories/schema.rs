//! Schema description handed to the reasoning model.

pub const MAX_SAMPLE_VALUE_CHARS: usize = 100;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableSample {
    pub name: String,
    pub create_sql: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Renders each table as its `CREATE TABLE` statement followed by a comment
/// block with up to `sample_rows` tab-separated example rows.
pub fn render_table_info(tables: &[TableSample], sample_rows: usize) -> String {
    let mut blocks = Vec::with_capacity(tables.len());
    for table in tables {
        let mut block = table.create_sql.trim().to_string();
        if sample_rows > 0 {
            let rows = table.rows.iter().take(sample_rows).collect::<Vec<_>>();
            block.push_str(&format!(
                "\n\n/*\n{} rows from {} table:\n{}",
                sample_rows,
                table.name,
                table.columns.join("\t")
            ));
            for row in rows {
                let cells =
                    row.iter().map(|cell| truncate_cell(cell)).collect::<Vec<_>>().join("\t");
                block.push('\n');
                block.push_str(&cells);
            }
            block.push_str("\n*/");
        }
        blocks.push(block);
    }
    blocks.join("\n\n")
}

fn truncate_cell(cell: &str) -> String {
    if cell.chars().count() <= MAX_SAMPLE_VALUE_CHARS {
        return cell.to_string();
    }
    let mut truncated = cell.chars().take(MAX_SAMPLE_VALUE_CHARS).collect::<String>();
    truncated.push_str("...");
    truncated
}
