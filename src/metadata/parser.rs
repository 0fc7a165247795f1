//! Control-file (deb822) stanza parsing for `Packages` indices.

use crate::models::PackageRecord;
use std::fmt;

/// Where an index came from; stamped onto every record parsed from it.
#[derive(Debug, Clone, Copy)]
pub struct StanzaContext<'a> {
    pub archive: &'a str,
    pub pocket: &'a str,
    pub component: &'a str,
}

/// Records produced from one index, plus how many stanzas were dropped.
#[derive(Debug, Default)]
pub struct ParsedIndex {
    pub records: Vec<PackageRecord>,
    pub skipped: usize,
}

/// A field with its continuation lines folded in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Lowercased field name
    pub name: String,
    pub value: String,
}

/// Why a stanza did not yield a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StanzaError {
    MissingField(&'static str),
    OrphanContinuation,
    MalformedLine(String),
}

impl fmt::Display for StanzaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StanzaError::MissingField(name) => write!(f, "missing required field {}", name),
            StanzaError::OrphanContinuation => {
                write!(f, "continuation line before any field")
            }
            StanzaError::MalformedLine(line) => write!(f, "malformed line: {}", line),
        }
    }
}

/// Iterator over the stanzas of a control file, each as its raw lines.
pub struct Stanzas<'a> {
    lines: std::str::Lines<'a>,
}

impl<'a> Stanzas<'a> {
    pub fn new(text: &'a str) -> Self {
        Self { lines: text.lines() }
    }
}

impl<'a> Iterator for Stanzas<'a> {
    type Item = Vec<&'a str>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut stanza = Vec::new();
        for line in self.lines.by_ref() {
            if line.trim().is_empty() {
                if stanza.is_empty() {
                    continue;
                }
                return Some(stanza);
            }
            stanza.push(line);
        }
        if stanza.is_empty() { None } else { Some(stanza) }
    }
}

/// Split a stanza into fields, folding continuation lines into the
/// preceding field's value.
pub fn parse_fields(lines: &[&str]) -> Result<Vec<Field>, StanzaError> {
    let mut fields: Vec<Field> = Vec::new();

    for line in lines {
        if line.starts_with('#') {
            continue;
        }

        if line.starts_with(' ') || line.starts_with('\t') {
            let field = fields.last_mut().ok_or(StanzaError::OrphanContinuation)?;
            let content = line.trim_start();
            // A lone "." stands for an empty line inside multi-line values
            let content = if content == "." { "" } else { content };
            field.value.push('\n');
            field.value.push_str(content);
            continue;
        }

        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| StanzaError::MalformedLine(line.to_string()))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(StanzaError::MalformedLine(line.to_string()));
        }

        fields.push(Field {
            name: name.to_ascii_lowercase(),
            value: value.trim().to_string(),
        });
    }

    Ok(fields)
}

fn field_value<'f>(fields: &'f [Field], name: &str) -> Option<&'f str> {
    // Last occurrence wins on duplicated fields
    fields
        .iter()
        .rev()
        .find(|f| f.name == name)
        .map(|f| f.value.trim())
        .filter(|v| !v.is_empty())
}

/// Turn one stanza into a record.
pub fn parse_stanza(
    lines: &[&str],
    ctx: &StanzaContext<'_>,
) -> Result<PackageRecord, StanzaError> {
    let fields = parse_fields(lines)?;

    let package = field_value(&fields, "package").ok_or(StanzaError::MissingField("Package"))?;
    let version = field_value(&fields, "version").ok_or(StanzaError::MissingField("Version"))?;
    let architecture = field_value(&fields, "architecture")
        .ok_or(StanzaError::MissingField("Architecture"))?;

    // "Source: foo (1.2-3)" names the source package foo at another version
    let source = field_value(&fields, "source")
        .and_then(|s| s.split_whitespace().next())
        .unwrap_or(package);

    Ok(PackageRecord {
        archive: ctx.archive.to_string(),
        package: package.to_string(),
        version: version.to_string(),
        architecture: architecture.to_string(),
        component: ctx.component.to_string(),
        pocket: ctx.pocket.to_string(),
        source: source.to_string(),
    })
}

/// Parse a decompressed `Packages` index.
///
/// Invalid stanzas are dropped and counted; they never fail the batch.
pub fn parse_index(data: &[u8], ctx: &StanzaContext<'_>) -> ParsedIndex {
    let text = String::from_utf8_lossy(data);
    let mut parsed = ParsedIndex::default();

    for stanza in Stanzas::new(&text) {
        match parse_stanza(&stanza, ctx) {
            Ok(record) => parsed.records.push(record),
            Err(e) => {
                tracing::debug!(
                    archive = ctx.archive,
                    pocket = ctx.pocket,
                    component = ctx.component,
                    reason = %e,
                    "Skipping stanza"
                );
                parsed.skipped += 1;
            }
        }
    }

    parsed
}
