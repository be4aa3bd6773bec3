//! Relocating linking loader for SIC/XE object programs.
//!
//! This module provides:
//! - A parser for the H/D/T/M/E object record format
//! - A two-pass linker that places control sections and applies
//!   modification records

pub mod linker;
pub mod record;

pub use linker::{link, LinkReport};
pub use record::{load_object_file, parse_object, ObjectProgram, Record};

use crate::cpu::Resources;
use std::path::Path;
use thiserror::Error;

/// Parse and link object program text into `res`.
pub fn load(res: &mut Resources, source: &str) -> Result<LinkReport, LoadError> {
    let program = parse_object(source)?;
    link(res, &program)
}

/// Read, parse and link an object program file into `res`.
pub fn load_file<P: AsRef<Path>>(res: &mut Resources, path: P) -> Result<LinkReport, LoadError> {
    let program = load_object_file(path)?;
    link(res, &program)
}

/// Errors that can occur while loading an object program.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("cannot read {path}: {message}")]
    Io { path: String, message: String },

    #[error("malformed {field} on line {line}: {text:?}")]
    MalformedField {
        line: usize,
        field: &'static str,
        text: String,
    },

    #[error("record too short on line {line}: missing {field}")]
    Truncated { line: usize, field: &'static str },

    #[error("missing {field} on line {line}")]
    MissingField { line: usize, field: &'static str },

    #[error("record outside any control section on line {line}")]
    NoControlSection { line: usize },

    #[error("undefined symbol on line {line}: {symbol}")]
    UnresolvedSymbol { line: usize, symbol: String },

    #[error("control section {name} on line {line} does not match the first pass")]
    SectionMismatch { line: usize, name: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prog.obj");
        std::fs::write(&path, "HPROG  000000000003\nT00000003010005\nE\n").unwrap();
        let mut res = Resources::new(dir.path());

        let report = load_file(&mut res, &path).unwrap();

        assert_eq!(report.sections[0].name, "PROG");
        assert_eq!(res.read_word(0), 0x01_0005);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut res = Resources::new(dir.path());
        let err = load_file(&mut res, dir.path().join("missing.obj")).unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
    }
}
