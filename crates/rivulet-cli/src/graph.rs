//! YAML graph documents.
//!
//! Example:
//! ```yaml
//! config:
//!   mem_cap_bytes: 67108864
//!   temp_dirs: ["/var/tmp/rivulet"]
//! schemas:
//!   customer:
//!     - {name: id,   type: Int64}
//!     - {name: name, type: Utf8}
//!   order:
//!     - {name: id,    type: Int64}
//!     - {name: total, type: Float64}
//!   joined:
//!     - {name: id,    type: Int64}
//!     - {name: name,  type: Utf8}
//!     - {name: total, type: Float64}
//! nodes:
//!   - {name: customers, type: CSV_READER, attributes: {fileURL: customers.csv}, outputs: [customer]}
//!   - {name: orders,    type: CSV_READER, attributes: {fileURL: orders.csv},    outputs: [order]}
//!   - name: join
//!     type: HASH_JOIN
//!     attributes: {joinKey: id, joinType: leftOuter}
//!     inputs: [customer, order]
//!     outputs: [joined]
//!   - {name: out, type: FILE_WRITER, attributes: {fileURL: joined.csv}, inputs: [joined]}
//! edges:
//!   - {from: customers, to: "join:0"}
//!   - {from: orders,    to: "join:1"}
//!   - {from: join,      to: out}
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use thiserror::Error;

use rivulet_core::attributes::Attributes;
use rivulet_core::config::EngineConfig;
use rivulet_core::schema::{DataType, Field, Schema};
use rivulet_exec::{ExecError, Pipeline};
use rivulet_operators::PortSchemas;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("reading graph: {0}")]
    Io(#[from] std::io::Error),
    #[error("parsing graph: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("schema '{name}': {msg}")]
    Schema { name: String, msg: String },
    #[error("node '{node}': {msg}")]
    Node { node: String, msg: String },
    #[error("bad endpoint '{0}': expected 'node' or 'node:port'")]
    Endpoint(String),
    #[error(transparent)]
    Exec(#[from] ExecError),
}

pub type Result<T> = std::result::Result<T, GraphError>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GraphDoc {
    #[serde(default)]
    pub config: ConfigOverrides,
    #[serde(default)]
    pub schemas: BTreeMap<String, Vec<FieldDef>>,
    pub nodes: Vec<NodeDef>,
    #[serde(default)]
    pub edges: Vec<EdgeDef>,
}

/// Engine settings a graph may pin; unset fields keep the environment's.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigOverrides {
    pub mem_cap_bytes: Option<usize>,
    pub temp_dirs: Option<Vec<String>>,
    pub port_capacity: Option<usize>,
    pub yield_interval: Option<usize>,
    pub spill_codec: Option<String>,
    pub spill_storage: Option<String>,
    pub spill_chunk_rows: Option<usize>,
    pub sort_buffer_capacity: Option<usize>,
    pub sort_tapes: Option<usize>,
    pub hash_table_size: Option<usize>,
}

impl ConfigOverrides {
    pub fn apply(&self, cfg: &mut EngineConfig) {
        if let Some(v) = self.mem_cap_bytes {
            cfg.mem_cap_bytes = v;
        }
        if let Some(v) = &self.temp_dirs {
            cfg.temp_dirs = v.clone();
        }
        if let Some(v) = self.port_capacity {
            cfg.port_capacity = v;
        }
        if let Some(v) = self.yield_interval {
            cfg.yield_interval = v;
        }
        if let Some(v) = &self.spill_codec {
            cfg.spill_codec = v.to_ascii_lowercase();
        }
        if let Some(v) = &self.spill_storage {
            cfg.spill_storage = v.to_ascii_lowercase();
        }
        if let Some(v) = self.spill_chunk_rows {
            cfg.spill_chunk_rows = v;
        }
        if let Some(v) = self.sort_buffer_capacity {
            cfg.sort_buffer_capacity = v;
        }
        if let Some(v) = self.sort_tapes {
            cfg.sort_tapes = v;
        }
        if let Some(v) = self.hash_table_size {
            cfg.hash_table_size = v;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default = "nullable_default")]
    pub nullable: bool,
}

fn nullable_default() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDef {
    pub name: String,
    #[serde(rename = "type")]
    pub component_type: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
    /// Schema names, one per input port.
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Schema names, one per output port.
    #[serde(default)]
    pub outputs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDef {
    pub from: String,
    pub to: String,
}

impl GraphDoc {
    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_yaml(&std::fs::read_to_string(path)?)
    }

    pub fn schema(&self, name: &str) -> Result<Schema> {
        let defs = self.schemas.get(name).ok_or_else(|| GraphError::Schema {
            name: name.to_string(),
            msg: "not declared".into(),
        })?;
        let fields = defs
            .iter()
            .map(|f| {
                let dt = DataType::parse(&f.data_type).map_err(|e| GraphError::Schema {
                    name: name.to_string(),
                    msg: e.to_string(),
                })?;
                Ok(Field::new(f.name.clone(), dt, f.nullable))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Schema::new(fields))
    }

    fn ports(&self, node: &NodeDef) -> Result<PortSchemas> {
        let resolve = |names: &[String]| {
            names
                .iter()
                .map(|n| self.schema(n))
                .collect::<Result<Vec<_>>>()
        };
        Ok(PortSchemas::new(resolve(&node.inputs)?, resolve(&node.outputs)?))
    }

    /// Build a runnable pipeline under `config`.
    pub fn build(&self, config: EngineConfig) -> Result<Pipeline> {
        let mut pipeline = Pipeline::new(config);
        for node in &self.nodes {
            let attrs = node_attributes(node)?;
            let ports = self.ports(node)?;
            pipeline.add_component(node.name.clone(), &node.component_type, &attrs, ports)?;
        }
        for edge in &self.edges {
            let (from, from_port) = parse_endpoint(&edge.from)?;
            let (to, to_port) = parse_endpoint(&edge.to)?;
            pipeline.connect(from, from_port, to, to_port)?;
        }
        Ok(pipeline)
    }
}

fn node_attributes(node: &NodeDef) -> Result<Attributes> {
    node.attributes
        .iter()
        .map(|(k, v)| {
            let value = attribute_text(v).ok_or_else(|| GraphError::Node {
                node: node.name.clone(),
                msg: format!("attribute '{k}' must be a scalar or a list of scalars"),
            })?;
            Ok((k.clone(), value))
        })
        .collect()
}

/// Scalars become their text; lists are joined with `;` like key specs.
fn attribute_text(v: &Value) -> Option<String> {
    match v {
        Value::Null => Some(String::new()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Sequence(items) => items
            .iter()
            .map(attribute_text)
            .collect::<Option<Vec<_>>>()
            .map(|parts| parts.join(";")),
        _ => None,
    }
}

/// `node` means port 0; `node:2` means port 2.
pub fn parse_endpoint(s: &str) -> Result<(&str, usize)> {
    match s.rsplit_once(':') {
        None if !s.trim().is_empty() => Ok((s.trim(), 0)),
        Some((node, port)) if !node.trim().is_empty() => port
            .trim()
            .parse()
            .map(|p| (node.trim(), p))
            .map_err(|_| GraphError::Endpoint(s.to_string())),
        _ => Err(GraphError::Endpoint(s.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"
config:
  port_capacity: 4
schemas:
  customer:
    - {name: id, type: Int64}
    - {name: name, type: Utf8}
  order:
    - {name: id, type: Int64}
    - {name: total, type: Float64}
  joined:
    - {name: id, type: Int64}
    - {name: name, type: Utf8}
    - {name: total, type: Float64}
nodes:
  - {name: customers, type: CSV_READER, attributes: {fileURL: "@DIR@/customers.csv"}, outputs: [customer]}
  - {name: orders, type: CSV_READER, attributes: {fileURL: "@DIR@/orders.csv"}, outputs: [order]}
  - name: join
    type: HASH_JOIN
    attributes: {joinKey: id, joinType: leftOuter, allowSlaveDuplicates: true}
    inputs: [customer, order]
    outputs: [joined]
  - {name: out, type: FILE_WRITER, attributes: {fileURL: "@DIR@/out/joined.csv"}, inputs: [joined]}
edges:
  - {from: customers, to: "join:0"}
  - {from: orders, to: "join:1"}
  - {from: join, to: out}
"#;

    #[test]
    fn endpoints() {
        assert_eq!(parse_endpoint("join").unwrap(), ("join", 0));
        assert_eq!(parse_endpoint("join:1").unwrap(), ("join", 1));
        assert!(parse_endpoint("join:x").is_err());
        assert!(parse_endpoint(":1").is_err());
        assert!(parse_endpoint("").is_err());
    }

    #[test]
    fn attribute_values_are_stringified() {
        assert_eq!(attribute_text(&Value::Bool(true)).as_deref(), Some("true"));
        let list: Value = serde_yaml::from_str("[a, b, 3]").unwrap();
        assert_eq!(attribute_text(&list).as_deref(), Some("a;b;3"));
        let map: Value = serde_yaml::from_str("{a: 1}").unwrap();
        assert_eq!(attribute_text(&map), None);
    }

    #[test]
    fn unknown_schema_is_reported() {
        let doc = GraphDoc::from_yaml("nodes: [{name: a, type: CSV_READER, outputs: [nope]}]").unwrap();
        let err = doc.build(EngineConfig::default()).err().map(|e| e.to_string());
        assert!(err.unwrap_or_default().contains("nope"));
    }

    #[test]
    fn runs_a_csv_join_graph() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_string_lossy().into_owned();
        std::fs::write(dir.path().join("customers.csv"), "id,name\n1,ann\n2,bob\n").unwrap();
        std::fs::write(dir.path().join("orders.csv"), "id,total\n1,9.5\n1,3\n").unwrap();

        let doc = GraphDoc::from_yaml(&DOC.replace("@DIR@", &root)).unwrap();
        let mut cfg = EngineConfig {
            temp_dirs: vec![root.clone()],
            ..Default::default()
        };
        doc.config.apply(&mut cfg);
        assert_eq!(cfg.port_capacity, 4);

        let report = doc.build(cfg).unwrap().run().unwrap();
        assert_eq!(report.nodes.len(), 4);
        let out = std::fs::read_to_string(dir.path().join("out/joined.csv")).unwrap();
        assert_eq!(out, "id,name,total\n1,ann,9.5\n1,ann,3\n2,bob,\n");
    }
}
