//! Column-once tabular encoding
//!
//! ```text
//! events[2]{timestamp,source_id,endpoint_path,error_type,http_status,response_time_ms,resolved,fix_method}:
//! 2026-03-01T00:00:00Z,alpha,/quote,rate_limit,429,120,false,
//! 2026-03-01T00:01:00Z,alpha,/quote,timeout,,5000,true,"reprobe, then cache"
//! ```
//!
//! The header declares the table name, the row count and the ordered field
//! names once. Each row is one comma-delimited record in header order. An empty
//! cell is an absent value; cells containing separators, quotes, line breaks or
//! edge whitespace, and empty strings, are double-quoted with `""` escaping.

use crate::classifier::EndpointHealth;
use crate::domain::{EndpointStatus, ErrorEvent, ErrorType};
use crate::error::TelemetryError;
use crate::learning::StrategyRate;
use chrono::{DateTime, SecondsFormat, Utc};
use std::str::FromStr;

pub type Cell = Option<String>;

/// A record type with a fixed column order
pub trait TabularRecord: Sized {
    const FIELDS: &'static [&'static str];

    fn to_row(&self) -> Vec<Cell>;

    fn from_row(row: &[Cell]) -> Result<Self, TelemetryError>;
}

/// A decoded table before it is mapped to records
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTable {
    pub name: String,
    pub fields: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl RawTable {
    /// Map rows to records, checking the header matches the record's columns
    pub fn into_records<T: TabularRecord>(self) -> Result<Vec<T>, TelemetryError> {
        if self.fields.iter().map(String::as_str).ne(T::FIELDS.iter().copied()) {
            return Err(TelemetryError::FieldMismatch {
                expected: T::FIELDS.join(","),
                found: self.fields.join(","),
            });
        }
        self.rows.iter().map(|row| T::from_row(row)).collect()
    }
}

/// Encode records as one table
pub fn encode_table<T: TabularRecord>(name: &str, records: &[T]) -> String {
    let mut out = format!("{}[{}]{{{}}}:\n", name, records.len(), T::FIELDS.join(","));
    for record in records {
        let cells: Vec<String> = record.to_row().iter().map(encode_cell).collect();
        out.push_str(&cells.join(","));
        out.push('\n');
    }
    out
}

/// Decode a payload holding exactly one table into records
pub fn decode_table<T: TabularRecord>(input: &str) -> Result<Vec<T>, TelemetryError> {
    let mut tables = decode_tables(input)?;
    match tables.len() {
        1 => tables.remove(0).into_records(),
        n => Err(TelemetryError::MalformedHeader(format!(
            "expected one table, found {}",
            n
        ))),
    }
}

/// Decode every table in a payload, in order
pub fn decode_tables(input: &str) -> Result<Vec<RawTable>, TelemetryError> {
    let mut parser = Parser::new(input);
    let mut tables = Vec::new();
    loop {
        parser.skip_blank_lines();
        if parser.at_end() {
            return Ok(tables);
        }
        tables.push(parser.table()?);
    }
}

fn encode_cell(cell: &Cell) -> String {
    let Some(value) = cell else {
        return String::new();
    };
    let needs_quotes = value.is_empty()
        || value.contains([',', '"', '\n', '\r'])
        || value.starts_with(char::is_whitespace)
        || value.ends_with(char::is_whitespace);
    if needs_quotes {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.clone()
    }
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
    row: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            row: 0,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_blank_lines(&mut self) {
        while matches!(self.peek(), Some('\n') | Some('\r')) {
            self.pos += 1;
        }
    }

    /// Consume a line terminator, or accept end of input
    fn end_of_line(&mut self) -> bool {
        match self.peek() {
            None => true,
            Some('\n') => {
                self.pos += 1;
                true
            }
            Some('\r') => {
                self.pos += 1;
                if self.peek() == Some('\n') {
                    self.pos += 1;
                }
                true
            }
            _ => false,
        }
    }

    fn table(&mut self) -> Result<RawTable, TelemetryError> {
        let line_end = self.input[self.pos..]
            .find('\n')
            .map_or(self.input.len(), |i| self.pos + i);
        let header = self.input[self.pos..line_end].trim_end_matches('\r');
        let (name, declared, fields) = parse_header(header)?;
        self.pos = (line_end + 1).min(self.input.len());

        let mut rows = Vec::with_capacity(declared);
        self.row = 0;
        while rows.len() < declared {
            if self.at_end() {
                return Err(TelemetryError::RowCountMismatch {
                    declared,
                    found: rows.len(),
                });
            }
            self.row += 1;
            let row = self.record()?;
            if row.len() != fields.len() {
                return Err(TelemetryError::RowWidth {
                    row: self.row,
                    expected: fields.len(),
                    found: row.len(),
                });
            }
            rows.push(row);
        }

        // Anything other than a blank line or the next header is an extra row
        if let Some(next) = self.input[self.pos..].lines().next() {
            if !next.trim().is_empty() && parse_header(next.trim_end_matches('\r')).is_err() {
                let extra = self.input[self.pos..]
                    .lines()
                    .take_while(|l| !l.trim().is_empty())
                    .count();
                return Err(TelemetryError::RowCountMismatch {
                    declared,
                    found: declared + extra,
                });
            }
        }

        Ok(RawTable { name, fields, rows })
    }

    fn record(&mut self) -> Result<Vec<Cell>, TelemetryError> {
        let mut cells = Vec::new();
        loop {
            cells.push(self.cell()?);
            match self.peek() {
                Some(',') => {
                    self.pos += 1;
                }
                _ => {
                    if self.end_of_line() {
                        return Ok(cells);
                    }
                    return Err(TelemetryError::InvalidValue {
                        field: format!("row {}", self.row),
                        value: self.input[self.pos..].chars().take(16).collect(),
                    });
                }
            }
        }
    }

    fn cell(&mut self) -> Result<Cell, TelemetryError> {
        if self.peek() != Some('"') {
            let start = self.pos;
            while !matches!(self.peek(), None | Some(',') | Some('\n') | Some('\r')) {
                self.bump();
            }
            let raw = &self.input[start..self.pos];
            return Ok((!raw.is_empty()).then(|| raw.to_string()));
        }

        self.pos += 1;
        let mut value = String::new();
        loop {
            match self.bump() {
                None => return Err(TelemetryError::UnterminatedQuote(self.row)),
                Some('"') if self.peek() == Some('"') => {
                    self.pos += 1;
                    value.push('"');
                }
                Some('"') => return Ok(Some(value)),
                Some(c) => value.push(c),
            }
        }
    }
}

fn parse_header(line: &str) -> Result<(String, usize, Vec<String>), TelemetryError> {
    let malformed = || TelemetryError::MalformedHeader(line.to_string());

    let body = line.strip_suffix(':').ok_or_else(malformed)?;
    let (name, rest) = body.split_once('[').ok_or_else(malformed)?;
    let (count, rest) = rest.split_once(']').ok_or_else(malformed)?;
    let fields = rest
        .strip_prefix('{')
        .and_then(|r| r.strip_suffix('}'))
        .ok_or_else(malformed)?;

    if name.is_empty() || name.contains(',') {
        return Err(malformed());
    }
    let declared: usize = count.parse().map_err(|_| malformed())?;
    let fields: Vec<String> = fields.split(',').map(str::to_string).collect();
    if fields.iter().any(|f| f.is_empty()) {
        return Err(malformed());
    }

    Ok((name.to_string(), declared, fields))
}

fn cell(row: &[Cell], index: usize, field: &str) -> Result<Option<String>, TelemetryError> {
    row.get(index)
        .cloned()
        .ok_or_else(|| TelemetryError::InvalidValue {
            field: field.to_string(),
            value: "<missing>".into(),
        })
}

fn required(row: &[Cell], index: usize, field: &str) -> Result<String, TelemetryError> {
    cell(row, index, field)?.ok_or_else(|| TelemetryError::InvalidValue {
        field: field.to_string(),
        value: String::new(),
    })
}

fn parse_required<T: FromStr>(row: &[Cell], index: usize, field: &str) -> Result<T, TelemetryError> {
    let raw = required(row, index, field)?;
    raw.parse().map_err(|_| TelemetryError::InvalidValue {
        field: field.to_string(),
        value: raw,
    })
}

fn parse_optional<T: FromStr>(
    row: &[Cell],
    index: usize,
    field: &str,
) -> Result<Option<T>, TelemetryError> {
    match cell(row, index, field)? {
        None => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(|_| TelemetryError::InvalidValue {
            field: field.to_string(),
            value: raw,
        }),
    }
}

fn format_time(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_time(raw: &str, field: &str) -> Result<DateTime<Utc>, TelemetryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| TelemetryError::InvalidValue {
            field: field.to_string(),
            value: raw.to_string(),
        })
}

impl TabularRecord for ErrorEvent {
    const FIELDS: &'static [&'static str] = &[
        "timestamp",
        "source_id",
        "endpoint_path",
        "error_type",
        "http_status",
        "response_time_ms",
        "resolved",
        "fix_method",
    ];

    fn to_row(&self) -> Vec<Cell> {
        vec![
            Some(format_time(&self.timestamp)),
            Some(self.source_id.clone()),
            Some(self.endpoint_path.clone()),
            Some(self.error_type.as_str().to_string()),
            self.http_status.map(|s| s.to_string()),
            Some(self.response_time_ms.to_string()),
            Some(self.resolved.to_string()),
            self.fix_method.clone(),
        ]
    }

    fn from_row(row: &[Cell]) -> Result<Self, TelemetryError> {
        let error_type = required(row, 3, "error_type")?;
        Ok(ErrorEvent {
            timestamp: parse_time(&required(row, 0, "timestamp")?, "timestamp")?,
            source_id: required(row, 1, "source_id")?,
            endpoint_path: required(row, 2, "endpoint_path")?,
            error_type: ErrorType::try_from(error_type.as_str()).map_err(|_| {
                TelemetryError::InvalidValue {
                    field: "error_type".into(),
                    value: error_type.clone(),
                }
            })?,
            http_status: parse_optional(row, 4, "http_status")?,
            response_time_ms: parse_required(row, 5, "response_time_ms")?,
            resolved: parse_required(row, 6, "resolved")?,
            fix_method: cell(row, 7, "fix_method")?,
        })
    }
}

impl TabularRecord for StrategyRate {
    const FIELDS: &'static [&'static str] = &[
        "strategy",
        "source_id",
        "success_count",
        "fail_count",
        "success_rate",
    ];

    fn to_row(&self) -> Vec<Cell> {
        vec![
            Some(self.strategy.clone()),
            self.source_id.clone(),
            Some(self.success_count.to_string()),
            Some(self.fail_count.to_string()),
            Some(self.success_rate.to_string()),
        ]
    }

    fn from_row(row: &[Cell]) -> Result<Self, TelemetryError> {
        Ok(StrategyRate {
            strategy: required(row, 0, "strategy")?,
            source_id: cell(row, 1, "source_id")?,
            success_count: parse_required(row, 2, "success_count")?,
            fail_count: parse_required(row, 3, "fail_count")?,
            success_rate: parse_required(row, 4, "success_rate")?,
        })
    }
}

impl TabularRecord for EndpointHealth {
    const FIELDS: &'static [&'static str] = &[
        "source_id",
        "endpoint_path",
        "status",
        "error_rate",
        "consecutive_failures",
        "total_checks",
        "last_checked",
    ];

    fn to_row(&self) -> Vec<Cell> {
        vec![
            Some(self.source_id.clone()),
            Some(self.endpoint_path.clone()),
            Some(self.status.as_str().to_string()),
            Some(self.error_rate.to_string()),
            Some(self.consecutive_failures.to_string()),
            Some(self.total_checks.to_string()),
            self.last_checked.as_ref().map(format_time),
        ]
    }

    fn from_row(row: &[Cell]) -> Result<Self, TelemetryError> {
        let status = required(row, 2, "status")?;
        Ok(EndpointHealth {
            source_id: required(row, 0, "source_id")?,
            endpoint_path: required(row, 1, "endpoint_path")?,
            status: EndpointStatus::try_from(status.as_str()).map_err(|_| {
                TelemetryError::InvalidValue {
                    field: "status".into(),
                    value: status.clone(),
                }
            })?,
            error_rate: parse_required(row, 3, "error_rate")?,
            consecutive_failures: parse_required(row, 4, "consecutive_failures")?,
            total_checks: parse_required(row, 5, "total_checks")?,
            last_checked: cell(row, 6, "last_checked")?
                .map(|raw| parse_time(&raw, "last_checked"))
                .transpose()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(secs: u32, error_type: ErrorType) -> ErrorEvent {
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, secs).unwrap();
        ErrorEvent::new(ts, "alpha", "/quote", error_type)
    }

    #[test]
    fn test_header_declares_count_and_fields_once() {
        let encoded = encode_table("events", &[event(0, ErrorType::Timeout)]);
        let mut lines = encoded.lines();
        assert_eq!(
            lines.next().unwrap(),
            "events[1]{timestamp,source_id,endpoint_path,error_type,http_status,response_time_ms,resolved,fix_method}:"
        );
        assert_eq!(
            lines.next().unwrap(),
            "2026-03-01T00:00:00Z,alpha,/quote,timeout,,0,false,"
        );
        assert!(lines.next().is_none());
    }

    #[test]
    fn test_quoting_preserves_awkward_values() {
        let mut e = event(1, ErrorType::RateLimit).with_http_status(Some(429));
        e.resolve("say \"hi\", then\nretry ");
        let mut empty = event(2, ErrorType::Unknown);
        empty.resolve("");

        let encoded = encode_table("events", &[e.clone(), empty.clone()]);
        let decoded: Vec<ErrorEvent> = decode_table(&encoded).unwrap();
        assert_eq!(decoded, vec![e, empty]);
    }

    #[test]
    fn test_subsecond_timestamps_survive() {
        let ts = Utc.timestamp_opt(1_772_000_000, 123_456_789).unwrap();
        let e = ErrorEvent::new(ts, "a", "/b", ErrorType::StaleData);
        let decoded: Vec<ErrorEvent> = decode_table(&encode_table("events", &[e.clone()])).unwrap();
        assert_eq!(decoded[0].timestamp, ts);
    }

    #[test]
    fn test_empty_table() {
        let encoded = encode_table::<ErrorEvent>("events", &[]);
        let decoded: Vec<ErrorEvent> = decode_table(&encoded).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_row_count_mismatch() {
        let encoded = encode_table("events", &[event(0, ErrorType::Timeout)]);
        let short = encoded.replacen("events[1]", "events[2]", 1);
        assert_eq!(
            decode_table::<ErrorEvent>(&short),
            Err(TelemetryError::RowCountMismatch { declared: 2, found: 1 })
        );

        let long = encoded.replacen("events[1]", "events[0]", 1);
        assert!(matches!(
            decode_table::<ErrorEvent>(&long),
            Err(TelemetryError::RowCountMismatch { declared: 0, .. })
        ));
    }

    #[test]
    fn test_field_mismatch_and_bad_rows() {
        let encoded = encode_table("events", &[event(0, ErrorType::Timeout)]);
        let renamed = encoded.replacen("source_id", "source", 1);
        assert!(matches!(
            decode_table::<ErrorEvent>(&renamed),
            Err(TelemetryError::FieldMismatch { .. })
        ));

        let narrow = "events[1]{timestamp,source_id,endpoint_path,error_type,http_status,response_time_ms,resolved,fix_method}:\na,b\n";
        assert!(matches!(
            decode_table::<ErrorEvent>(narrow),
            Err(TelemetryError::RowWidth { row: 1, expected: 8, found: 2 })
        ));

        assert!(matches!(
            decode_table::<ErrorEvent>("events{a}:\n"),
            Err(TelemetryError::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_unterminated_quote() {
        let input = "t[1]{strategy,source_id,success_count,fail_count,success_rate}:\n\"open,,1,2,0.5\n";
        assert_eq!(
            decode_table::<StrategyRate>(input),
            Err(TelemetryError::UnterminatedQuote(1))
        );
    }

    #[test]
    fn test_multiple_tables_in_one_payload() {
        let rates = vec![StrategyRate {
            strategy: "reprobe".into(),
            source_id: None,
            success_count: 3,
            fail_count: 1,
            success_rate: 0.75,
        }];
        let health = vec![EndpointHealth {
            source_id: "alpha".into(),
            endpoint_path: "/quote".into(),
            status: EndpointStatus::Critical,
            error_rate: 0.12,
            consecutive_failures: 3,
            total_checks: 50,
            last_checked: None,
        }];
        let payload = format!(
            "{}\n{}",
            encode_table("strategies", &rates),
            encode_table("endpoints", &health)
        );

        let tables = decode_tables(&payload).unwrap();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].name, "strategies");
        let mut tables = tables.into_iter();
        let decoded_rates: Vec<StrategyRate> = tables.next().unwrap().into_records().unwrap();
        let decoded_health: Vec<EndpointHealth> = tables.next().unwrap().into_records().unwrap();
        assert_eq!(decoded_rates, rates);
        assert_eq!(decoded_health, health);
    }
}
