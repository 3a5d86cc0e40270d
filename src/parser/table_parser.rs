use tracing::{debug, info};

pub const NO_TABLES_SENTINEL: &str = "No tabular data found in the source document.";

pub struct TableParser;

impl TableParser {
    pub fn new() -> Self {
        Self
    }

    /// 提取文本中的 Markdown 管道表格，作为提示词中的参考数据
    ///
    /// 连续两行及以上以 `|` 开头并以 `|` 结尾的行视为一个表格，
    /// 多个表格之间以空行分隔。未找到时返回固定提示语。
    pub fn extract_pipe_tables(&self, text: &str) -> String {
        let mut tables: Vec<String> = Vec::new();
        let mut run: Vec<&str> = Vec::new();

        for line in text.lines() {
            let row = line.trim();
            if Self::is_pipe_row(row) {
                run.push(row);
                continue;
            }
            Self::flush(&mut run, &mut tables);
        }
        Self::flush(&mut run, &mut tables);

        info!("管道表格提取完成，共 {} 个", tables.len());
        if tables.is_empty() {
            NO_TABLES_SENTINEL.to_string()
        } else {
            tables.join("\n\n")
        }
    }

    fn is_pipe_row(row: &str) -> bool {
        row.len() >= 2 && row.starts_with('|') && row.ends_with('|')
    }

    fn flush(run: &mut Vec<&str>, tables: &mut Vec<String>) {
        // 单独一行不构成表格
        if run.len() >= 2 {
            debug!("检测到表格: {} 行", run.len());
            tables.push(run.join("\n"));
        }
        run.clear();
    }
}

impl Default for TableParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn consecutive_pipe_rows_form_tables() {
        let text = "Results\n\
                    | Arm | ORR |\n\
                    |---|---|\n\
                    | A | 45% |\n\
                    Some narrative text.\n\
                    | lonely | row |\n\
                    \n\
                    | AE | n |\n\
                      | Nausea | 12 |\n";
        let tables = TableParser::new().extract_pipe_tables(text);
        assert_eq!(
            tables,
            "| Arm | ORR |\n|---|---|\n| A | 45% |\n\n| AE | n |\n| Nausea | 12 |"
        );
    }

    #[test]
    fn text_without_tables_yields_sentinel() {
        let tables = TableParser::new().extract_pipe_tables("No tables | here\n|only one|\n");
        assert_eq!(tables, NO_TABLES_SENTINEL);
    }
}
