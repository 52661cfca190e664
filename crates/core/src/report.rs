//! Rendering scan results for the output sink.

use std::io::{self, Write};

use crate::matcher::ScanReport;

/// How matched types are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NameStyle {
    /// Simple name only ("Widget").
    Short,
    /// Namespace-qualified name ("Acme.Ui.Widget").
    #[default]
    Full,
}

/// Names of the matched types in report order, rendered per `style`.
pub fn rendered_names(report: &ScanReport, style: NameStyle) -> Vec<String> {
    report
        .matches
        .iter()
        .map(|m| match style {
            NameStyle::Short => m.name.clone(),
            NameStyle::Full => m.full_name.clone(),
        })
        .collect()
}

/// Write one name per line to the sink.
pub fn write_names<W: Write>(sink: &mut W, names: &[String]) -> io::Result<()> {
    for name in names {
        writeln!(sink, "{name}")?;
    }
    sink.flush()
}
