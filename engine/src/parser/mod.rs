//! Input parsing: CSV with delimiter auto-detection, or JSON.
//!
//! CSV cells are kept as raw bytes; the mapping engine decodes them (UTF-8,
//! then Windows-1252) when a record is mapped. Headings are decoded here.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::error::{CsvError, MappingError, PipelineError};
use crate::value::{decode_bytes, RawRecord, Value};

/// Format of an input file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    /// Pick from the file extension, CSV otherwise
    #[default]
    Auto,
    Csv,
    Json,
}

impl InputFormat {
    /// Resolve `Auto` against a file path.
    pub fn resolve(self, path: &Path) -> InputFormat {
        match self {
            InputFormat::Auto => match path.extension().and_then(|e| e.to_str()) {
                Some(ext) if ext.eq_ignore_ascii_case("json") => InputFormat::Json,
                _ => InputFormat::Csv,
            },
            other => other,
        }
    }
}

/// Parsed input with metadata
#[derive(Debug, Clone)]
pub struct ParsedInput {
    pub format: InputFormat,
    /// Detected delimiter (CSV only)
    pub delimiter: Option<char>,
    /// Column headers (CSV only)
    pub headings: Vec<String>,
    pub records: Vec<RawRecord>,
}

impl ParsedInput {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Detect the delimiter by counting occurrences in the first line
pub fn detect_delimiter(content: &str) -> char {
    let first_line = content.lines().next().unwrap_or("");

    let mut best_sep = ';';
    let mut best_count = 0;
    for sep in [';', ',', '\t', '|'] {
        let count = first_line.matches(sep).count();
        if count > best_count {
            best_count = count;
            best_sep = sep;
        }
    }
    best_sep
}

/// Parse CSV bytes, detecting the delimiter from the header line.
pub fn parse_csv_bytes(bytes: &[u8]) -> Result<ParsedInput, CsvError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(CsvError::EmptyFile);
    }
    let header_end = bytes.iter().position(|b| *b == b'\n').unwrap_or(bytes.len());
    let delimiter = detect_delimiter(&decode_bytes(&bytes[..header_end]));
    parse_csv_with(bytes, delimiter)
}

/// Parse CSV bytes with an explicit delimiter.
pub fn parse_csv_with(bytes: &[u8], delimiter: char) -> Result<ParsedInput, CsvError> {
    let delimiter_byte = u8::try_from(delimiter).map_err(|_| CsvError::Parse {
        line: 1,
        message: format!("delimiter '{}' is not a single byte", delimiter),
    })?;
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter_byte)
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let headings: Vec<String> = reader
        .byte_headers()?
        .iter()
        .map(|h| decode_bytes(h).trim_start_matches('\u{feff}').to_string())
        .collect();
    if headings.iter().all(String::is_empty) {
        return Err(CsvError::NoHeaders);
    }

    let shared: Arc<[String]> = headings.clone().into();
    let mut records = Vec::new();
    for row in reader.byte_records() {
        let row = row?;
        let mut values: Vec<Value> = row.iter().map(|cell| Value::Bytes(cell.to_vec())).collect();
        values.resize(shared.len().max(values.len()), Value::Bytes(Vec::new()));
        records.push(RawRecord::row(shared.clone(), values));
    }
    debug!(rows = records.len(), delimiter = %delimiter.escape_default(), "csv parsed");

    Ok(ParsedInput {
        format: InputFormat::Csv,
        delimiter: Some(delimiter),
        headings,
        records,
    })
}

/// Parse JSON: one object, or an array of objects.
pub fn parse_json(bytes: &[u8]) -> Result<ParsedInput, PipelineError> {
    let json: serde_json::Value = serde_json::from_slice(bytes)?;
    let items = match json {
        serde_json::Value::Array(items) => items,
        other => vec![other],
    };
    let records = items
        .into_iter()
        .map(|item| RawRecord::from_value(Value::from(item)))
        .map(|raw| match raw {
            Ok(RawRecord::Row { .. }) => Err(MappingError::InvalidRecord("list")),
            other => other,
        })
        .collect::<Result<Vec<_>, _>>()?;
    debug!(rows = records.len(), "json parsed");

    Ok(ParsedInput {
        format: InputFormat::Json,
        delimiter: None,
        headings: Vec::new(),
        records,
    })
}

/// Parse bytes in the given format. `Auto` is treated as CSV.
pub fn parse_bytes(bytes: &[u8], format: InputFormat) -> Result<ParsedInput, PipelineError> {
    match format {
        InputFormat::Json => parse_json(bytes),
        InputFormat::Csv | InputFormat::Auto => Ok(parse_csv_bytes(bytes)?),
    }
}

/// Read and parse a file, resolving `Auto` from its extension.
pub fn parse_file(path: impl AsRef<Path>, format: InputFormat) -> Result<ParsedInput, PipelineError> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(CsvError::Io)?;
    parse_bytes(&bytes, format.resolve(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(raw: &RawRecord, key: &str) -> String {
        raw.get(key).cloned().unwrap_or_default().normalize().to_string()
    }

    #[test]
    fn test_simple_csv() {
        let parsed = parse_csv_bytes(b"name;age\nAlice;30\nBob;25").unwrap();

        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed.delimiter, Some(';'));
        assert_eq!(parsed.headings, vec!["name", "age"]);
        assert_eq!(text(&parsed.records[0], "name"), "Alice");
        assert_eq!(text(&parsed.records[1], "age"), "25");
    }

    #[test]
    fn test_cells_stay_raw_bytes() {
        let parsed = parse_csv_bytes(b"a,b\n1,2").unwrap();
        assert_eq!(parsed.records[0].get("a"), Some(&Value::Bytes(b"1".to_vec())));
    }

    #[test]
    fn test_quoted_values() {
        let parsed = parse_csv_bytes(b"name;value\n\"Alice\";\"Hello; World\"").unwrap();
        assert_eq!(text(&parsed.records[0], "value"), "Hello; World");
    }

    #[test]
    fn test_empty_lines_skipped() {
        let parsed = parse_csv_bytes(b"a;b\n1;2\n\n3;4\n").unwrap();
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn test_missing_values_are_empty() {
        let parsed = parse_csv_bytes(b"a;b;c\n1").unwrap();
        assert_eq!(text(&parsed.records[0], "a"), "1");
        assert_eq!(text(&parsed.records[0], "c"), "");
    }

    #[test]
    fn test_latin1_cells_decode_when_mapped() {
        // "Société" in Windows-1252
        let mut bytes = b"name\n".to_vec();
        bytes.extend_from_slice(&[0x53, 0x6F, 0x63, 0x69, 0xE9, 0x74, 0xE9]);
        let parsed = parse_csv_bytes(&bytes).unwrap();
        assert_eq!(text(&parsed.records[0], "name"), "Société");
    }

    #[test]
    fn test_empty_csv_error() {
        assert!(matches!(parse_csv_bytes(b"  \n"), Err(CsvError::EmptyFile)));
    }

    #[test]
    fn test_detect_delimiter() {
        assert_eq!(detect_delimiter("a;b;c\n1;2;3"), ';');
        assert_eq!(detect_delimiter("a,b,c\n1,2,3"), ',');
        assert_eq!(detect_delimiter("a\tb\tc\n1\t2\t3"), '\t');
        assert_eq!(detect_delimiter("a|b|c\n1|2|3"), '|');
    }

    #[test]
    fn test_json_object_and_array() {
        let one = parse_json(br#"{"a": 1}"#).unwrap();
        assert_eq!(one.len(), 1);

        let many = parse_json(br#"[{"a": 1}, {"a": {"b": 2}}]"#).unwrap();
        assert_eq!(many.len(), 2);
        assert_eq!(many.format, InputFormat::Json);
    }

    #[test]
    fn test_json_scalars_are_rejected() {
        assert!(parse_json(b"[1, 2]").is_err());
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(InputFormat::Auto.resolve(Path::new("x.JSON")), InputFormat::Json);
        assert_eq!(InputFormat::Auto.resolve(Path::new("x.txt")), InputFormat::Csv);
        assert_eq!(InputFormat::Json.resolve(Path::new("x.csv")), InputFormat::Json);
    }

    #[test]
    fn test_json_keeps_key_order() {
        let parsed = parse_json(br#"{"zeta": 1, "alpha": 2, "mid": 3}"#).unwrap();
        let keys: Vec<String> = parsed.records[0]
            .clone()
            .into_pairs()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, ["zeta", "alpha", "mid"]);
    }
}
