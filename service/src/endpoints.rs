//! Endpoint catalog.
//!
//! Every resource the sync engine knows about is described as data: where its list lives,
//! where the records sit in the response, which table and columns they land in, and how to
//! derive the per-record detail request. Behavior is selected by looking a spec up, never by
//! specializing code per endpoint.

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::congress::lookup_field;

/// How the list response carries its records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseShape {
    /// `records_key` holds an array of records.
    Array,
    /// `records_key` holds a single record (the `congress` endpoint).
    Object,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    Int,
    String,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    /// Dotted path the value is read from; defaults to `name`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<&'static str>,
}

impl Column {
    #[must_use]
    pub const fn int(name: &'static str) -> Self {
        Self {
            name,
            column_type: ColumnType::Int,
            source: None,
        }
    }

    #[must_use]
    pub const fn string(name: &'static str) -> Self {
        Self {
            name,
            column_type: ColumnType::String,
            source: None,
        }
    }

    #[must_use]
    pub const fn json(name: &'static str) -> Self {
        Self {
            name,
            column_type: ColumnType::Json,
            source: None,
        }
    }

    #[must_use]
    pub fn from_path(mut self, source: &'static str) -> Self {
        self.source = Some(source);
        self
    }

    #[must_use]
    pub fn source_path(&self) -> &str {
        self.source.unwrap_or(self.name)
    }
}

/// Destination table for one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSchema {
    pub table: &'static str,
    pub primary_key: Vec<&'static str>,
    pub columns: Vec<Column>,
}

impl TableSchema {
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Secondary fetch derived from a primary record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetailSpec {
    /// Path template, e.g. `member/{bioguideId}` or `bill/{congress}/{type:lower}/{number}`.
    pub url_template: &'static str,
    /// Dotted path of the detail object inside the response.
    pub records_key: &'static str,
}

/// Static descriptor of one resource type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointSpec {
    pub name: &'static str,
    /// List path template; `{congress}` is the only placeholder.
    pub list_template: &'static str,
    pub records_key: &'static str,
    pub response_shape: ResponseShape,
    /// Stamp a `congress` field on records that do not carry one.
    pub inject_congress: bool,
    /// Endpoint honors `fromDateTime`/`toDateTime` and `sort=updateDate+asc`.
    pub supports_updated_since: bool,
    pub schema: TableSchema,
    pub detail: Option<DetailSpec>,
}

impl EndpointSpec {
    #[must_use]
    pub const fn table(&self) -> &'static str {
        self.schema.table
    }

    /// List path for one congress.
    ///
    /// # Errors
    /// Returns an error if the list template is malformed.
    pub fn list_path(&self, congress: u32) -> Result<String, TemplateError> {
        let mut fields = Map::new();
        fields.insert("congress".into(), Value::from(congress));
        render_template(self.list_template, &fields)
    }
}

/// All endpoints, in sync order.
#[derive(Debug, Clone)]
pub struct EndpointCatalog {
    endpoints: Vec<EndpointSpec>,
}

impl EndpointCatalog {
    #[must_use]
    pub const fn new(endpoints: Vec<EndpointSpec>) -> Self {
        Self { endpoints }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&EndpointSpec> {
        self.endpoints.iter().find(|e| e.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.endpoints.iter().map(|e| e.name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EndpointSpec> {
        self.endpoints.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Keep only the named endpoints. An empty selection keeps everything.
    #[must_use]
    pub fn select(self, names: &[String]) -> Self {
        if names.is_empty() {
            return self;
        }
        Self {
            endpoints: self
                .endpoints
                .into_iter()
                .filter(|e| names.iter().any(|n| n == e.name))
                .collect(),
        }
    }

    /// Table definitions for every endpoint, including the `detail` column where applicable.
    #[must_use]
    pub fn schema_manifest(&self) -> Value {
        let tables: Vec<Value> = self
            .endpoints
            .iter()
            .map(|e| {
                let mut columns: Map<String, Value> = e
                    .schema
                    .columns
                    .iter()
                    .map(|c| (c.name.to_string(), serde_json::json!(c.column_type)))
                    .collect();
                if e.detail.is_some() {
                    columns.insert(DETAIL_COLUMN.into(), serde_json::json!(ColumnType::Json));
                }
                serde_json::json!({
                    "table": e.schema.table,
                    "endpoint": e.name,
                    "primary_key": e.schema.primary_key,
                    "columns": columns,
                })
            })
            .collect();
        Value::Array(tables)
    }

    /// The Congress.gov v3 resources this connector syncs.
    #[must_use]
    #[allow(clippy::too_many_lines)]
    pub fn congress_gov() -> Self {
        Self::new(vec![
            EndpointSpec {
                name: "bill",
                list_template: "bill/{congress}",
                records_key: "bills",
                response_shape: ResponseShape::Array,
                inject_congress: false,
                supports_updated_since: true,
                schema: TableSchema {
                    table: "bill",
                    primary_key: vec!["congress", "type", "number"],
                    columns: vec![
                        Column::int("congress"),
                        Column::json("latestAction"),
                        Column::string("number"),
                        Column::string("originChamber"),
                        Column::string("originChamberCode"),
                        Column::string("title"),
                        Column::string("type"),
                        Column::string("updateDate"),
                        Column::string("updateDateIncludingText"),
                        Column::string("url"),
                    ],
                },
                detail: Some(DetailSpec {
                    url_template: "bill/{congress}/{type:lower}/{number}",
                    records_key: "bill",
                }),
            },
            EndpointSpec {
                name: "congress",
                list_template: "congress/{congress}",
                records_key: "congress",
                response_shape: ResponseShape::Object,
                inject_congress: true,
                supports_updated_since: false,
                schema: TableSchema {
                    table: "congress",
                    primary_key: vec!["name"],
                    columns: vec![
                        Column::string("name"),
                        Column::int("congress"),
                        Column::string("startYear"),
                        Column::string("endYear"),
                        Column::json("sessions"),
                        Column::string("updateDate"),
                        Column::string("url"),
                    ],
                },
                detail: None,
            },
            EndpointSpec {
                name: "member",
                list_template: "member/congress/{congress}",
                records_key: "members",
                response_shape: ResponseShape::Array,
                inject_congress: true,
                supports_updated_since: false,
                schema: TableSchema {
                    table: "member",
                    primary_key: vec!["bioguideId"],
                    columns: vec![
                        Column::string("bioguideId"),
                        Column::int("congress"),
                        Column::json("depiction"),
                        Column::string("district"),
                        Column::string("name"),
                        Column::string("partyName"),
                        Column::string("state"),
                        Column::json("terms"),
                        Column::string("updateDate"),
                        Column::string("url"),
                    ],
                },
                detail: Some(DetailSpec {
                    url_template: "member/{bioguideId}",
                    records_key: "member",
                }),
            },
            EndpointSpec {
                name: "committee",
                list_template: "committee/{congress}",
                records_key: "committees",
                response_shape: ResponseShape::Array,
                inject_congress: true,
                supports_updated_since: true,
                schema: TableSchema {
                    table: "committee",
                    primary_key: vec!["systemCode"],
                    columns: vec![
                        Column::string("systemCode"),
                        Column::int("congress"),
                        Column::string("chamber"),
                        Column::string("committeeTypeCode"),
                        Column::string("name"),
                        Column::json("parent"),
                        Column::json("subcommittees"),
                        Column::string("updateDate"),
                        Column::string("url"),
                    ],
                },
                detail: Some(DetailSpec {
                    url_template: "committee/{chamber:lower}/{systemCode}",
                    records_key: "committee",
                }),
            },
            EndpointSpec {
                name: "amendment",
                list_template: "amendment/{congress}",
                records_key: "amendments",
                response_shape: ResponseShape::Array,
                inject_congress: false,
                supports_updated_since: true,
                schema: TableSchema {
                    table: "amendment",
                    primary_key: vec!["congress", "type", "number"],
                    columns: vec![
                        Column::int("congress"),
                        Column::string("type"),
                        Column::string("number"),
                        Column::string("description"),
                        Column::string("purpose"),
                        Column::json("latestAction"),
                        Column::string("updateDate"),
                        Column::string("url"),
                    ],
                },
                detail: Some(DetailSpec {
                    url_template: "amendment/{congress}/{type:lower}/{number}",
                    records_key: "amendment",
                }),
            },
            EndpointSpec {
                name: "hearing",
                list_template: "hearing/{congress}",
                records_key: "hearings",
                response_shape: ResponseShape::Array,
                inject_congress: false,
                supports_updated_since: false,
                schema: TableSchema {
                    table: "hearing",
                    primary_key: vec!["congress", "chamber", "jacketNumber"],
                    columns: vec![
                        Column::int("congress"),
                        Column::string("chamber"),
                        Column::int("jacketNumber"),
                        Column::string("number"),
                        Column::string("part"),
                        Column::string("updateDate"),
                        Column::string("url"),
                    ],
                },
                detail: Some(DetailSpec {
                    url_template: "hearing/{congress}/{chamber:lower}/{jacketNumber}",
                    records_key: "hearing",
                }),
            },
            communication_endpoint(
                "houseCommunication",
                "houseCommunications",
                "house_communication",
                "house-communication/{congress}",
                DetailSpec {
                    url_template:
                        "house-communication/{congress}/{communicationType.code:lower}/{number}",
                    records_key: "house-communication",
                },
            ),
            communication_endpoint(
                "senateCommunication",
                "senateCommunications",
                "senate_communication",
                "senate-communication/{congress}",
                DetailSpec {
                    url_template:
                        "senate-communication/{congress}/{communicationType.code:lower}/{number}",
                    records_key: "senate-communication",
                },
            ),
            EndpointSpec {
                name: "nomination",
                list_template: "nomination/{congress}",
                records_key: "nominations",
                response_shape: ResponseShape::Array,
                inject_congress: false,
                supports_updated_since: true,
                schema: TableSchema {
                    table: "nomination",
                    primary_key: vec!["congress", "citation"],
                    columns: vec![
                        Column::int("congress"),
                        Column::string("citation"),
                        Column::string("number"),
                        Column::string("partNumber"),
                        Column::string("description"),
                        Column::string("organization"),
                        Column::json("nominationType"),
                        Column::json("latestAction"),
                        Column::string("receivedDate"),
                        Column::string("updateDate"),
                        Column::string("url"),
                    ],
                },
                detail: Some(DetailSpec {
                    url_template: "nomination/{congress}/{number}",
                    records_key: "nomination",
                }),
            },
            EndpointSpec {
                name: "treaty",
                list_template: "treaty/{congress}",
                records_key: "treaties",
                response_shape: ResponseShape::Array,
                inject_congress: true,
                supports_updated_since: true,
                schema: TableSchema {
                    table: "treaty",
                    primary_key: vec!["congress", "number", "suffix"],
                    columns: vec![
                        Column::int("congress"),
                        Column::string("number"),
                        Column::string("suffix"),
                        Column::int("congressReceived"),
                        Column::int("congressConsidered"),
                        Column::string("topic"),
                        Column::string("transmittedDate"),
                        Column::string("updateDate"),
                        Column::string("url"),
                    ],
                },
                detail: Some(DetailSpec {
                    url_template: "treaty/{congress}/{number}",
                    records_key: "treaty",
                }),
            },
        ])
    }
}

fn communication_endpoint(
    name: &'static str,
    records_key: &'static str,
    table: &'static str,
    list_template: &'static str,
    detail: DetailSpec,
) -> EndpointSpec {
    EndpointSpec {
        name,
        list_template,
        records_key,
        response_shape: ResponseShape::Array,
        inject_congress: true,
        supports_updated_since: false,
        schema: TableSchema {
            table,
            primary_key: vec!["congress", "communicationTypeCode", "number"],
            columns: vec![
                Column::int("congress"),
                Column::string("communicationTypeCode").from_path("communicationType.code"),
                Column::json("communicationType"),
                Column::string("number"),
                Column::string("chamber"),
                Column::string("updateDate"),
                Column::string("url"),
            ],
        },
        detail: Some(detail),
    }
}

/// Name of the column holding merged detail JSON.
pub const DETAIL_COLUMN: &str = "detail";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    /// Placeholder field absent, null, or not a scalar.
    #[error("template field '{0}' is missing or null")]
    MissingField(String),

    #[error("malformed template '{template}': {reason}")]
    Malformed { template: String, reason: String },
}

/// Substitute `{field}` / `{a.b}` / `{field:lower}` placeholders from a record.
/// Substituted values are percent-encoded.
///
/// # Errors
/// Returns [`TemplateError::MissingField`] when a referenced field is absent, null, or not
/// a string/number/bool, and [`TemplateError::Malformed`] for unbalanced braces or unknown
/// modifiers.
pub fn render_template(template: &str, record: &Map<String, Value>) -> Result<String, TemplateError> {
    let malformed = |reason: &str| TemplateError::Malformed {
        template: template.to_string(),
        reason: reason.to_string(),
    };

    let mut out = String::with_capacity(template.len() + 16);
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after.find('}').ok_or_else(|| malformed("unclosed '{'"))?;
        let placeholder = &after[..close];
        if placeholder.is_empty() || placeholder.contains('{') {
            return Err(malformed("empty or nested placeholder"));
        }

        let (field, modifier) = match placeholder.split_once(':') {
            Some((field, modifier)) => (field, Some(modifier)),
            None => (placeholder, None),
        };

        let raw = match lookup_field(record, field) {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            _ => return Err(TemplateError::MissingField(field.to_string())),
        };

        let value = match modifier {
            None => raw,
            Some("lower") => raw.to_lowercase(),
            Some(other) => return Err(malformed(&format!("unknown modifier '{other}'"))),
        };

        out.push_str(&urlencoding::encode(&value));
        rest = &after[close + 1..];
    }

    if rest.contains('}') {
        return Err(malformed("unmatched '}'"));
    }
    out.push_str(rest);
    Ok(out)
}
