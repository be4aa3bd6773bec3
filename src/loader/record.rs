//! Object program record format.
//!
//! An object program is line-oriented text. The first character of each
//! line names the record type; the rest is fixed-column fields:
//!
//! ```text
//! H<name>  <start:6><length:6>        header
//! D(<symbol:6><offset:6>)*            external definitions
//! T<offset:6><count:2><bytes:count*2> text
//! M<offset:6><half-bytes:2><+|-><symbol> modification
//! E[<entry:6>]                        end
//! ```
//!
//! Blank lines and other record types (e.g. `R` references) are skipped.

use crate::loader::LoadError;
use std::path::Path;

/// A parsed object record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Header {
        name: String,
        start: u32,
        length: u32,
    },
    Define(Vec<(String, u32)>),
    Text {
        offset: u32,
        bytes: Vec<u8>,
    },
    Modify {
        offset: u32,
        half_bytes: u32,
        subtract: bool,
        symbol: String,
    },
    End {
        entry: Option<u32>,
    },
}

/// A parsed object program: records paired with their 1-based line numbers.
#[derive(Debug, Clone, Default)]
pub struct ObjectProgram {
    pub records: Vec<(usize, Record)>,
}

impl ObjectProgram {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Parse object program text.
pub fn parse_object(source: &str) -> Result<ObjectProgram, LoadError> {
    let mut program = ObjectProgram::default();

    for (line_num, line) in source.lines().enumerate() {
        let line_num = line_num + 1;

        let mut chars = line.chars();
        let Some(kind) = chars.next() else {
            continue;
        };
        let body = chars.as_str();

        let record = match kind {
            'H' => parse_header(body, line_num)?,
            'D' => parse_define(body, line_num)?,
            'T' => parse_text(body, line_num)?,
            'M' => parse_modify(body, line_num)?,
            'E' => parse_end(body, line_num)?,
            _ => continue,
        };

        program.records.push((line_num, record));
    }

    Ok(program)
}

/// Read and parse an object program from disk.
pub fn load_object_file<P: AsRef<Path>>(path: P) -> Result<ObjectProgram, LoadError> {
    let source = std::fs::read_to_string(path.as_ref()).map_err(|e| LoadError::Io {
        path: path.as_ref().display().to_string(),
        message: e.to_string(),
    })?;
    parse_object(&source)
}

fn parse_header(body: &str, line: usize) -> Result<Record, LoadError> {
    let body = body.trim();
    // The last 12 columns are start and length; the name is whatever precedes them.
    if body.len() < 12 || !body.is_char_boundary(body.len() - 12) {
        return Err(LoadError::Truncated { line, field: "header" });
    }
    let (name, numbers) = body.split_at(body.len() - 12);
    let name = name.trim();
    if name.is_empty() {
        return Err(LoadError::MissingField { line, field: "program name" });
    }

    Ok(Record::Header {
        name: name.to_string(),
        start: hex_field(numbers, 0, 6, line, "start address")?,
        length: hex_field(numbers, 6, 12, line, "program length")?,
    })
}

fn parse_define(body: &str, line: usize) -> Result<Record, LoadError> {
    let mut symbols = Vec::new();
    let mut pos = 0;

    // A trailing partial group is ignored.
    while pos + 12 <= body.len() {
        let symbol = text_field(body, pos, pos + 6, line, "symbol name")?.trim();
        if !symbol.is_empty() {
            let offset = hex_field(body, pos + 6, pos + 12, line, "symbol offset")?;
            symbols.push((symbol.to_string(), offset));
        }
        pos += 12;
    }

    Ok(Record::Define(symbols))
}

fn parse_text(body: &str, line: usize) -> Result<Record, LoadError> {
    let offset = hex_field(body, 0, 6, line, "text offset")?;
    let count = hex_field(body, 6, 8, line, "text length")? as usize;

    let bytes = (0..count)
        .map(|i| {
            let start = 8 + i * 2;
            hex_field(body, start, start + 2, line, "text byte").map(|b| b as u8)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Record::Text { offset, bytes })
}

fn parse_modify(body: &str, line: usize) -> Result<Record, LoadError> {
    let offset = hex_field(body, 0, 6, line, "modification offset")?;
    let half_bytes = hex_field(body, 6, 8, line, "modification length")?;
    let subtract = match text_field(body, 8, 9, line, "modification sign")? {
        "+" => false,
        "-" => true,
        other => {
            return Err(LoadError::MalformedField {
                line,
                field: "modification sign",
                text: other.to_string(),
            })
        }
    };
    let symbol = body.get(9..).unwrap_or("").trim();
    if symbol.is_empty() {
        return Err(LoadError::MissingField { line, field: "modification symbol" });
    }

    Ok(Record::Modify {
        offset,
        half_bytes,
        subtract,
        symbol: symbol.to_string(),
    })
}

fn parse_end(body: &str, line: usize) -> Result<Record, LoadError> {
    let operand = body.trim();
    if operand.is_empty() {
        return Ok(Record::End { entry: None });
    }
    let entry = u32::from_str_radix(operand, 16).map_err(|_| LoadError::MalformedField {
        line,
        field: "entry point",
        text: operand.to_string(),
    })?;
    Ok(Record::End { entry: Some(entry) })
}

/// The text in columns `start..end` of a record body.
fn text_field<'a>(
    body: &'a str,
    start: usize,
    end: usize,
    line: usize,
    field: &'static str,
) -> Result<&'a str, LoadError> {
    body.get(start..end).ok_or(LoadError::Truncated { line, field })
}

/// Parse columns `start..end` of a record body as hexadecimal.
fn hex_field(
    body: &str,
    start: usize,
    end: usize,
    line: usize,
    field: &'static str,
) -> Result<u32, LoadError> {
    let text = text_field(body, start, end, line, field)?;
    u32::from_str_radix(text, 16).map_err(|_| LoadError::MalformedField {
        line,
        field,
        text: text.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header() {
        let program = parse_object("HCOPY  000000001077\n").unwrap();
        assert_eq!(
            program.records,
            vec![(1, Record::Header { name: "COPY".into(), start: 0, length: 0x1077 })]
        );
    }

    #[test]
    fn test_parse_header_full_width_name() {
        let program = parse_object("HRDREC 000000000049").unwrap();
        assert!(matches!(
            &program.records[0].1,
            Record::Header { name, length: 0x49, .. } if name == "RDREC"
        ));
    }

    #[test]
    fn test_parse_define_groups() {
        let program = parse_object("DBUFFER000033BUFEND001033LENGTH00002D").unwrap();
        assert_eq!(
            program.records[0].1,
            Record::Define(vec![
                ("BUFFER".into(), 0x33),
                ("BUFEND".into(), 0x1033),
                ("LENGTH".into(), 0x2D),
            ])
        );
    }

    #[test]
    fn test_parse_text() {
        let program = parse_object("T00001D0317202D4B100000").unwrap();
        assert_eq!(
            program.records[0].1,
            Record::Text { offset: 0x1D, bytes: vec![0x17, 0x20, 0x2D] }
        );
    }

    #[test]
    fn test_parse_modify() {
        let program = parse_object("M00000405+RDREC\nM00001406-LENGTH").unwrap();
        assert_eq!(
            program.records[0].1,
            Record::Modify { offset: 4, half_bytes: 5, subtract: false, symbol: "RDREC".into() }
        );
        assert!(matches!(&program.records[1].1, Record::Modify { subtract: true, .. }));
    }

    #[test]
    fn test_parse_end() {
        let program = parse_object("E000000\nE").unwrap();
        assert_eq!(program.records[0].1, Record::End { entry: Some(0) });
        assert_eq!(program.records[1].1, Record::End { entry: None });
    }

    #[test]
    fn test_skips_blank_and_unknown_records() {
        let program = parse_object("\nRRDREC WRREC\nHCOPY  000000000003\n\nE\n").unwrap();
        assert_eq!(program.len(), 2);
        assert_eq!(program.records[0].0, 3);
    }

    #[test]
    fn test_malformed_number() {
        let err = parse_object("T0000ZZ01FF").unwrap_err();
        assert!(matches!(err, LoadError::MalformedField { line: 1, field: "text offset", .. }));
    }

    #[test]
    fn test_truncated_text() {
        let err = parse_object("T0000000302").unwrap_err();
        assert!(matches!(err, LoadError::Truncated { line: 1, field: "text byte" }));
    }

    #[test]
    fn test_bad_sign() {
        let err = parse_object("M00000405*RDREC").unwrap_err();
        assert!(matches!(err, LoadError::MalformedField { field: "modification sign", .. }));
    }
}
