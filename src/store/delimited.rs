// src/store/delimited.rs

//! Minimal reader for comma-delimited result files.
//!
//! Handles double-quoted fields as written by R's `write.csv`: separators,
//! doubled quotes and line breaks inside a quoted field all belong to the
//! field. Records are terminated by `\n` or `\r\n` outside quotes.

/// Split a whole delimited text into records.
///
/// Blank lines between records are skipped.
pub fn records(contents: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    // Whether the record under construction holds anything at all, so that
    // `""` alone is still a record but an empty line is not.
    let mut touched = false;
    let mut chars = contents.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            '"' if current.is_empty() => {
                in_quotes = true;
                touched = true;
            }
            ',' if !in_quotes => {
                fields.push(std::mem::take(&mut current));
                touched = true;
            }
            '\r' if !in_quotes && chars.peek() == Some(&'\n') => {}
            '\n' if !in_quotes => {
                end_record(&mut records, &mut fields, &mut current, touched);
                touched = false;
            }
            other => {
                current.push(other);
                touched = true;
            }
        }
    }
    end_record(&mut records, &mut fields, &mut current, touched);
    records
}

fn end_record(
    records: &mut Vec<Vec<String>>,
    fields: &mut Vec<String>,
    current: &mut String,
    touched: bool,
) {
    if touched {
        fields.push(std::mem::take(current));
        records.push(std::mem::take(fields));
    } else {
        fields.clear();
        current.clear();
    }
}

/// Split one line into fields.
pub fn split_line(line: &str) -> Vec<String> {
    records(line).into_iter().next().unwrap_or_else(|| vec![String::new()])
}

/// Header row of a delimited text, if any.
pub fn header(contents: &str) -> Option<Vec<String>> {
    records(contents).into_iter().next()
}
