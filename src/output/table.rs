#![forbid(unsafe_code)]

use std::io;

#[derive(Debug, Default)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn row(&mut self, cols: impl IntoIterator<Item = impl Into<String>>) {
        self.rows.push(cols.into_iter().map(Into::into).collect());
    }

    pub fn print(&self) -> io::Result<()> {
        self.write_to(io::stdout().lock())
    }

    pub fn print_csv(&self) -> io::Result<()> {
        self.write_csv_to(io::stdout().lock())
    }

    pub fn write_csv_to(&self, out: impl io::Write) -> io::Result<()> {
        let mut wtr = csv::Writer::from_writer(out);
        wtr.write_record(&self.headers)?;
        for row in &self.rows {
            wtr.write_record(row)?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn write_to(&self, mut out: impl io::Write) -> io::Result<()> {
        let mut widths = vec![0usize; self.headers.len()];
        for (i, h) in self.headers.iter().enumerate() {
            widths[i] = widths[i].max(visible_width(h));
        }
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                if i >= widths.len() {
                    widths.push(0);
                }
                widths[i] = widths[i].max(visible_width(cell));
            }
        }

        writeln!(&mut out, "{}", format_row(&self.headers, &widths))?;
        for row in &self.rows {
            writeln!(&mut out, "{}", format_row(row, &widths))?;
        }
        Ok(())
    }
}

fn visible_width(s: &str) -> usize {
    // Best-effort: assume each char is width 1. Ratatui UI handles widths separately.
    s.chars().count()
}

fn format_row(row: &[String], widths: &[usize]) -> String {
    let mut out = String::new();
    let last = row.len().saturating_sub(1);
    for (i, cell) in row.iter().enumerate() {
        if i > 0 {
            out.push_str("  ");
        }
        out.push_str(cell);
        // No trailing padding after the last column.
        if i == last {
            break;
        }
        let w = widths
            .get(i)
            .copied()
            .unwrap_or_else(|| visible_width(cell));
        let pad = w.saturating_sub(visible_width(cell));
        out.extend(std::iter::repeat_n(' ', pad));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        let mut t = Table::new(["ID", "STATUS", "TASK"]);
        t.row(["1700000000", "working", "fix the bug"]);
        t.row(["1700000001-1", "done", "add tests, docs"]);
        t
    }

    #[test]
    fn columns_are_aligned() {
        let mut out = Vec::new();
        sample().write_to(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "ID            STATUS   TASK\n\
             1700000000    working  fix the bug\n\
             1700000001-1  done     add tests, docs\n"
        );
    }

    #[test]
    fn csv_quotes_cells_with_commas() {
        let mut out = Vec::new();
        sample().write_csv_to(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "ID,STATUS,TASK\n1700000000,working,fix the bug\n1700000001-1,done,\"add tests, docs\"\n"
        );
    }
}
