//! Plain-text rendering of node replies, one `key value` pair per line.

use std::io::{self, Write};

use munin_client::{ConfigReport, FetchValues, ServiceReport};

/// Writes one name per line.
pub fn write_names<W: Write>(out: &mut W, names: &[String]) -> io::Result<()> {
    for name in names {
        writeln!(out, "{}", name)?;
    }
    Ok(())
}

/// Writes `service.directive value` and `service.field.attr value` lines.
pub fn write_configs<W: Write>(out: &mut W, report: &ConfigReport) -> io::Result<()> {
    for (service, config) in report.ok() {
        for (key, value) in &config.graph {
            writeln!(out, "{}.{} {}", service, key, value)?;
        }
        for (field, attrs) in &config.fields {
            for (attr, value) in attrs {
                writeln!(out, "{}.{}.{} {}", service, field, attr, value)?;
            }
        }
    }
    Ok(())
}

/// Writes `service.field value` lines.
pub fn write_values<W: Write>(out: &mut W, report: &ServiceReport<FetchValues>) -> io::Result<()> {
    for (service, values) in report.ok() {
        for (field, value) in values.iter() {
            writeln!(out, "{}.{} {}", service, field, value)?;
        }
    }
    Ok(())
}
