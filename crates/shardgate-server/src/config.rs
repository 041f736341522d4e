use serde::Deserialize;
use shardgate_core::{SchemaCatalog, SchemaDescriptor, TableRule};
use std::collections::HashSet;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub data_nodes: Vec<DataNodeConfig>,
    #[serde(default)]
    pub schemas: Vec<SchemaConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DataNodeConfig {
    pub name: String,
    pub database: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchemaConfig {
    pub name: String,
    /// Node answering statements that touch no configured table.
    pub data_node: Option<String>,
    #[serde(default)]
    pub tables: Vec<TableConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TableConfig {
    pub name: String,
    pub data_nodes: Vec<String>,
}

impl Config {
    pub fn from_path(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let mut nodes = HashSet::new();
        for node in &self.data_nodes {
            if node.name.is_empty() {
                return Err(anyhow::anyhow!("data node with empty name"));
            }
            if !nodes.insert(node.name.as_str()) {
                return Err(anyhow::anyhow!(format!("duplicate data node {}", node.name)));
            }
        }
        let known = |name: &str| nodes.is_empty() || nodes.contains(name);

        let mut schemas = HashSet::new();
        for schema in &self.schemas {
            if schema.name.is_empty() {
                return Err(anyhow::anyhow!("schema with empty name"));
            }
            if !schemas.insert(schema.name.as_str()) {
                return Err(anyhow::anyhow!(format!("duplicate schema {}", schema.name)));
            }
            if let Some(node) = &schema.data_node {
                if node.is_empty() {
                    return Err(anyhow::anyhow!(format!(
                        "schema {} has an empty data_node",
                        schema.name
                    )));
                }
                if !known(node.as_str()) {
                    return Err(anyhow::anyhow!(format!(
                        "schema {} references unknown data node {}",
                        schema.name, node
                    )));
                }
            }
            let mut tables = HashSet::new();
            for table in &schema.tables {
                if !tables.insert(table.name.to_uppercase()) {
                    return Err(anyhow::anyhow!(format!(
                        "duplicate table {} in schema {}",
                        table.name, schema.name
                    )));
                }
                if table.data_nodes.is_empty() {
                    return Err(anyhow::anyhow!(format!(
                        "table {}.{} has no data nodes",
                        schema.name, table.name
                    )));
                }
                if let Some(node) = table.data_nodes.iter().find(|node| !known(node.as_str())) {
                    return Err(anyhow::anyhow!(format!(
                        "table {}.{} references unknown data node {}",
                        schema.name, table.name, node
                    )));
                }
            }
        }
        Ok(())
    }

    /// Immutable schema metadata handed to execution handlers.
    pub fn catalog(&self) -> anyhow::Result<SchemaCatalog> {
        let mut catalog = SchemaCatalog::new();
        for schema in &self.schemas {
            let mut descriptor = SchemaDescriptor::new(&schema.name, schema.data_node.clone());
            for table in &schema.tables {
                descriptor.add_table(TableRule {
                    name: table.name.clone(),
                    data_nodes: table.data_nodes.clone(),
                })?;
            }
            catalog.add_schema(descriptor)?;
        }
        Ok(catalog)
    }
}
