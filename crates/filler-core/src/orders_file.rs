//! Orders exchange file
//!
//! Plain comma-separated rows with a header. The generate phase writes it,
//! the insert phase reads whole orders back and the fill phase reads only the
//! `order_id` and `account_id` columns. Fields never contain commas, so no
//! quoting is applied.

use crate::error::{FillerError, Result};
use crate::types::{Order, WorkItem};
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

pub const HEADER: [&str; 10] = [
    "account_id",
    "order_id",
    "symbol",
    "order_started",
    "order_completed",
    "total_shares_purchased",
    "total_cost_of_order",
    "attr_0",
    "attr_1",
    "attr_2",
];

/// Streams orders into the exchange format
pub struct OrdersFileWriter<W: Write> {
    out: BufWriter<W>,
    rows: usize,
}

impl OrdersFileWriter<File> {
    pub fn create(path: &Path) -> Result<Self> {
        Self::new(File::create(path)?)
    }
}

impl<W: Write> OrdersFileWriter<W> {
    pub fn new(inner: W) -> Result<Self> {
        let mut out = BufWriter::new(inner);
        writeln!(out, "{}", HEADER.join(","))?;
        Ok(Self { out, rows: 0 })
    }

    pub fn write(&mut self, order: &Order) -> Result<()> {
        let completed = order
            .order_completed
            .map(format_timestamp)
            .unwrap_or_default();
        writeln!(
            self.out,
            "{},{},{},{},{},{},{},{},{},{}",
            order.account_id,
            order.order_id,
            order.symbol,
            format_timestamp(order.order_started),
            completed,
            order.total_shares_purchased,
            order.total_cost_of_order,
            order.attr_0,
            order.attr_1,
            order.attr_2,
        )?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Flush buffered rows and return the number written
    pub fn finish(mut self) -> Result<usize> {
        self.out.flush()?;
        Ok(self.rows)
    }
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, false)
}

/// Header-driven row reader
struct Rows<R: Read> {
    lines: std::io::Lines<BufReader<R>>,
    columns: HashMap<String, usize>,
    line: usize,
}

impl<R: Read> Rows<R> {
    fn new(inner: R) -> Result<Self> {
        let mut lines = BufReader::new(inner).lines();
        let header = lines.next().transpose()?.unwrap_or_default();
        let columns = header
            .trim_end_matches('\r')
            .split(',')
            .enumerate()
            .map(|(idx, name)| (name.trim().to_string(), idx))
            .collect();
        Ok(Self {
            lines,
            columns,
            line: 1,
        })
    }

    fn column(&self, name: &str) -> Result<usize> {
        self.columns
            .get(name)
            .copied()
            .ok_or_else(|| FillerError::MissingColumn(name.to_string()))
    }

    /// Next non-empty row split into fields
    fn next_row(&mut self) -> Option<Result<(usize, Vec<String>)>> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            self.line += 1;
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            let fields = line.split(',').map(str::to_string).collect();
            return Some(Ok((self.line, fields)));
        }
    }
}

fn field<'a>(fields: &'a [String], idx: usize, name: &str, line: usize) -> Result<&'a str> {
    fields
        .get(idx)
        .map(String::as_str)
        .ok_or_else(|| FillerError::OrdersFileParse {
            line,
            message: format!("missing value for {}", name),
        })
}

fn parse<T>(fields: &[String], idx: usize, name: &str, line: usize) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = field(fields, idx, name, line)?;
    raw.trim().parse().map_err(|e: T::Err| FillerError::OrdersFileParse {
        line,
        message: format!("invalid {} '{}': {}", name, raw, e),
    })
}

fn parse_timestamp(raw: &str, name: &str, line: usize) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| FillerError::OrdersFileParse {
            line,
            message: format!("invalid {} '{}': {}", name, raw, e),
        })
}

/// Read the (order_id, account_id) pairs consumed by the fill phase
pub fn read_work_items(path: &Path) -> Result<Vec<WorkItem>> {
    parse_work_items(File::open(path)?)
}

pub fn parse_work_items<R: Read>(inner: R) -> Result<Vec<WorkItem>> {
    let mut rows = Rows::new(inner)?;
    let order_col = rows.column("order_id")?;
    let account_col = rows.column("account_id")?;

    let mut items = Vec::new();
    while let Some(row) = rows.next_row() {
        let (line, fields) = row?;
        let order_id: Uuid = parse(&fields, order_col, "order_id", line)?;
        let account_id: i64 = parse(&fields, account_col, "account_id", line)?;
        items.push(WorkItem::new(order_id, account_id));
    }
    Ok(items)
}

/// Read complete orders for the insert phase
pub fn read_orders(path: &Path) -> Result<Vec<Order>> {
    parse_orders(File::open(path)?)
}

pub fn parse_orders<R: Read>(inner: R) -> Result<Vec<Order>> {
    let mut rows = Rows::new(inner)?;
    let cols = HEADER
        .iter()
        .map(|name| rows.column(name))
        .collect::<Result<Vec<_>>>()?;

    let mut orders = Vec::new();
    while let Some(row) = rows.next_row() {
        let (line, f) = row?;
        let completed = field(&f, cols[4], HEADER[4], line)?;
        let order_completed = if completed.trim().is_empty() {
            None
        } else {
            Some(parse_timestamp(completed, HEADER[4], line)?)
        };

        orders.push(Order {
            account_id: parse(&f, cols[0], HEADER[0], line)?,
            order_id: parse(&f, cols[1], HEADER[1], line)?,
            symbol: field(&f, cols[2], HEADER[2], line)?.to_string(),
            order_started: parse_timestamp(field(&f, cols[3], HEADER[3], line)?, HEADER[3], line)?,
            order_completed,
            total_shares_purchased: parse(&f, cols[5], HEADER[5], line)?,
            total_cost_of_order: parse::<Decimal>(&f, cols[6], HEADER[6], line)?,
            attr_0: field(&f, cols[7], HEADER[7], line)?.to_string(),
            attr_1: field(&f, cols[8], HEADER[8], line)?.to_string(),
            attr_2: field(&f, cols[9], HEADER[9], line)?.to_string(),
        });
    }
    Ok(orders)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "account_id,order_id,symbol,order_started,order_completed,total_shares_purchased,total_cost_of_order,attr_0,attr_1,attr_2\n\
        42,0b5b4a34-6c5b-4cf8-9a8e-0c1f1b2b9d11,qxz,2024-05-01T12:00:00.123456+00:00,,250,12.34,foo,bar,baz\n\
        \n\
        7,6f1e3d7e-3c7e-4e43-8d0e-5d0b7e1f2a33,qxz,2024-05-01T12:00:01+00:00,,3,99.99,foo,bar,baz\n";

    #[test]
    fn test_parse_work_items_uses_header_positions() {
        let items = parse_work_items(SAMPLE.as_bytes()).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].account_id, 42);
        assert_eq!(
            items[0].order_id,
            Uuid::parse_str("0b5b4a34-6c5b-4cf8-9a8e-0c1f1b2b9d11").unwrap()
        );
        assert_eq!(items[1].account_id, 7);
    }

    #[test]
    fn test_parse_orders_reads_python_style_timestamps() {
        let orders = parse_orders(SAMPLE.as_bytes()).unwrap();
        assert_eq!(orders[0].total_shares_purchased, 250);
        assert_eq!(orders[0].total_cost_of_order, Decimal::new(1234, 2));
        assert!(orders[0].order_completed.is_none());
        assert_eq!(orders[0].order_started.timestamp_subsec_micros(), 123456);
    }

    #[test]
    fn test_missing_column_is_reported() {
        let err = parse_work_items("order_id,symbol\n".as_bytes()).unwrap_err();
        assert!(matches!(err, FillerError::MissingColumn(ref c) if c == "account_id"));
    }

    #[test]
    fn test_bad_value_reports_line() {
        let input = "account_id,order_id\nnot-a-number,0b5b4a34-6c5b-4cf8-9a8e-0c1f1b2b9d11\n";
        let err = parse_work_items(input.as_bytes()).unwrap_err();
        assert!(matches!(err, FillerError::OrdersFileParse { line: 2, .. }));
    }

    #[test]
    fn test_writer_output_reads_back() {
        let order = Order {
            account_id: 5,
            order_id: Uuid::new_v4(),
            symbol: "abc".to_string(),
            order_started: Utc::now(),
            order_completed: None,
            total_shares_purchased: 10,
            total_cost_of_order: Decimal::new(5050, 2),
            attr_0: "foo".to_string(),
            attr_1: "bar".to_string(),
            attr_2: "baz".to_string(),
        };

        let mut buf = Vec::new();
        let mut writer = OrdersFileWriter::new(&mut buf).unwrap();
        writer.write(&order).unwrap();
        assert_eq!(writer.finish().unwrap(), 1);

        let parsed = parse_orders(buf.as_slice()).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].order_id, order.order_id);
        assert_eq!(parsed[0].total_cost_of_order, order.total_cost_of_order);
    }
}
