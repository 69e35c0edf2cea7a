//! Parser for collectd's `types.db` format: one dataset per non-comment
//! line, `name src src ...` where each source spec is `name:TYPE:min:max`.
//! The resulting datasets annotate legacy value lists with `dsnames` and
//! `dstypes` before they go out on the wire.

use crate::errors::TypesDbError;
use std::collections::HashMap;

/// How a data source's consecutive observations relate to each other.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DataSourceType {
    /// A GAUGE value is stored as-is, for values which may increase as well
    /// as decrease, such as temperatures or the amount of memory used.
    Gauge,

    /// A COUNTER is for continuously incrementing counters that may wrap
    /// around, like the octet counters of a busy switch port.
    Counter,

    /// DERIVE stores the derivative of the observed value; the change
    /// between reads is what is interesting, not the current total.
    Derive,

    /// ABSOLUTE is for counters which are reset upon reading.
    Absolute,
}

impl DataSourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            DataSourceType::Gauge => "GAUGE",
            DataSourceType::Counter => "COUNTER",
            DataSourceType::Derive => "DERIVE",
            DataSourceType::Absolute => "ABSOLUTE",
        }
    }

    /// Case-insensitive match against the allowed set.
    fn from_token(token: &str) -> Option<DataSourceType> {
        if token.eq_ignore_ascii_case("GAUGE") {
            Some(DataSourceType::Gauge)
        } else if token.eq_ignore_ascii_case("COUNTER") {
            Some(DataSourceType::Counter)
        } else if token.eq_ignore_ascii_case("DERIVE") {
            Some(DataSourceType::Derive)
        } else if token.eq_ignore_ascii_case("ABSOLUTE") {
            Some(DataSourceType::Absolute)
        } else {
            None
        }
    }
}

/// One typed data source of a dataset. Min and max are kept as the opaque
/// strings found in the file ("U" for unbounded); they are passed through,
/// not interpreted.
#[derive(Debug, PartialEq, Clone)]
pub struct DataSource {
    pub name: String,
    pub kind: DataSourceType,
    pub min: String,
    pub max: String,
}

#[derive(Debug, PartialEq, Clone)]
pub struct DataSet {
    pub name: String,
    pub sources: Vec<DataSource>,
}

/// Parses a whole types.db blob. Parsing is all-or-nothing: any malformed
/// line fails the entire input and no partial dataset list is returned.
pub fn parse_types_db(content: &str) -> Result<Vec<DataSet>, TypesDbError> {
    let mut sets = Vec::new();

    for raw_line in content.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut tokens = line.split_whitespace();
        let name = tokens.next().expect("non-blank line has a first token");

        let mut sources = Vec::new();
        for token in tokens {
            let spec = token.trim_matches(',');
            if spec.is_empty() {
                continue;
            }

            let fields: Vec<&str> = spec.split(':').collect();
            if fields.len() != 4 {
                return Err(TypesDbError::MalformedSource {
                    line: line.to_string(),
                    spec: spec.to_string(),
                });
            }

            let kind = DataSourceType::from_token(fields[1]).ok_or_else(|| {
                TypesDbError::UnknownType {
                    spec: spec.to_string(),
                    kind: fields[1].to_string(),
                }
            })?;

            sources.push(DataSource {
                name: fields[0].to_string(),
                kind,
                min: fields[2].to_string(),
                max: fields[3].to_string(),
            });
        }

        if sources.is_empty() {
            return Err(TypesDbError::MissingSources {
                line: line.to_string(),
            });
        }

        sets.push(DataSet {
            name: name.to_string(),
            sources,
        });
    }

    Ok(sets)
}

/// Lookup cache from dataset name to the annotation lists attached to value
/// lists at dispatch time. Built once at configure time, read-only after.
#[derive(Debug, Default)]
pub struct DataSetIndex {
    sets: HashMap<String, DataSetEntry>,
}

#[derive(Debug)]
struct DataSetEntry {
    names: Vec<String>,
    types: Vec<&'static str>,
}

impl DataSetIndex {
    pub fn insert_all(&mut self, sets: Vec<DataSet>) {
        for set in sets {
            let entry = DataSetEntry {
                names: set.sources.iter().map(|s| s.name.clone()).collect(),
                types: set.sources.iter().map(|s| s.kind.as_str()).collect(),
            };
            self.sets.insert(set.name, entry);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// The `(dsnames, dstypes)` lists for a dataset, if it is known.
    pub fn annotation(&self, dataset: &str) -> Option<(Vec<String>, Vec<String>)> {
        self.sets.get(dataset).map(|entry| {
            (
                entry.names.clone(),
                entry.types.iter().map(|t| t.to_string()).collect(),
            )
        })
    }
}
